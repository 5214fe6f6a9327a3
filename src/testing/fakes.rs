//! In-memory host platform
//!
//! A loopback peer connector that "connects" an offerer and an answerer
//! inside one process, plus scripted media devices, a recording notifier and
//! a memory clipboard. Enough to run both call flows end to end in tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};

use crate::activity::AudioTap;
use crate::codec::{SdpType, SessionDescription};
use crate::config::IceConfig;
use crate::errors::CallError;
use crate::gathering::GatheringTrigger;
use crate::media::{LocalStream, LocalTrack, MediaConstraints, PcmSource, TrackKind};
use crate::platform::{Clipboard, MediaDevices, Notifier, PeerConnector, PeerLink, RemoteTrack};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a loopback link reports candidate gathering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringBehavior {
    /// Completion fires as soon as the local description is set.
    Completes,
    /// Completion never fires; only the gate timeout releases the wait.
    Stalls,
}

/// Step at which every link of a connector fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFailure {
    CreateOffer,
    CreateAnswer,
    SetLocal,
}

#[derive(Default)]
struct LinkState {
    tracks: Vec<LocalTrack>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    gathered: bool,
    trigger: Option<GatheringTrigger>,
    sink: Option<mpsc::UnboundedSender<RemoteTrack>>,
    transport: Option<watch::Sender<bool>>,
    connected: bool,
    closed: bool,
}

struct LinkShared {
    id: String,
    state: Mutex<LinkState>,
}

#[derive(Default)]
struct Registry {
    links: Mutex<HashMap<String, Arc<LinkShared>>>,
    taps: Mutex<Vec<AudioTap>>,
}

impl Registry {
    /// Bring the transport up on both sides, then deliver each side's
    /// tracks to the other side's sink when `with_tracks` is set.
    fn connect(&self, a: &LinkShared, b: &LinkShared, with_tracks: bool) {
        for side in [a, b] {
            let mut state = lock(&side.state);
            state.connected = true;
            if let Some(transport) = state.transport.as_ref() {
                transport.send_replace(true);
            }
        }
        if with_tracks {
            let a_tracks = lock(&a.state).tracks.clone();
            let b_tracks = lock(&b.state).tracks.clone();
            self.deliver(&a_tracks, b);
            self.deliver(&b_tracks, a);
        }
        log::debug!("Loopback connected {} <-> {}", a.id, b.id);
    }

    fn deliver(&self, tracks: &[LocalTrack], to: &LinkShared) {
        let sink = lock(&to.state).sink.clone();
        let Some(sink) = sink else {
            return;
        };
        for track in tracks {
            let audio = (track.kind() == TrackKind::Audio).then(|| {
                let tap = AudioTap::new(48_000, 4096);
                lock(&self.taps).push(tap.clone());
                tap
            });
            let _ = sink.send(RemoteTrack {
                id: track.id().to_string(),
                kind: track.kind(),
                audio,
            });
        }
    }
}

/// Creates [`LoopbackLink`]s that find each other through the session id in
/// their descriptions.
#[derive(Clone)]
pub struct LoopbackConnector {
    registry: Arc<Registry>,
    created: Arc<AtomicUsize>,
    gathering: GatheringBehavior,
    failure: Option<LinkFailure>,
    remote_tracks: bool,
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            created: Arc::new(AtomicUsize::new(0)),
            gathering: GatheringBehavior::Completes,
            failure: None,
            remote_tracks: true,
        }
    }

    /// Links connect but never deliver a remote track, like a peer whose
    /// only track has not sent a packet yet.
    pub fn without_remote_tracks(mut self) -> Self {
        self.remote_tracks = false;
        self
    }

    pub fn with_gathering(mut self, gathering: GatheringBehavior) -> Self {
        self.gathering = gathering;
        self
    }

    pub fn failing_at(mut self, failure: LinkFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Number of links created so far.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Inbound audio taps handed to either side, in delivery order.
    pub fn audio_taps(&self) -> Vec<AudioTap> {
        lock(&self.registry.taps).clone()
    }
}

#[async_trait]
impl PeerConnector for LoopbackConnector {
    async fn create(&self, _config: &IceConfig) -> Result<Arc<dyn PeerLink>, CallError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::new(LinkShared {
            id: uuid::Uuid::new_v4().simple().to_string(),
            state: Mutex::new(LinkState::default()),
        });
        lock(&self.registry.links).insert(shared.id.clone(), shared.clone());
        Ok(Arc::new(LoopbackLink {
            shared,
            registry: self.registry.clone(),
            gathering: self.gathering,
            failure: self.failure,
            remote_tracks: self.remote_tracks,
        }))
    }
}

/// One side of a loopback call.
pub struct LoopbackLink {
    shared: Arc<LinkShared>,
    registry: Arc<Registry>,
    gathering: GatheringBehavior,
    failure: Option<LinkFailure>,
    remote_tracks: bool,
}

impl LoopbackLink {
    fn check(&self, step: LinkFailure) -> Result<(), CallError> {
        if self.failure == Some(step) {
            return Err(CallError::negotiation("loopback", format!("{:?} failed", step)));
        }
        if lock(&self.shared.state).closed {
            return Err(CallError::negotiation("loopback", "link closed"));
        }
        Ok(())
    }

    fn describe(&self, sdp_type: SdpType) -> SessionDescription {
        let state = lock(&self.shared.state);
        let mut sdp = format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.shared.id
        );
        for (mid, track) in state.tracks.iter().enumerate() {
            sdp.push_str(&format!(
                "m={} 9 UDP/TLS/RTP/SAVPF 0\r\na=mid:{}\r\na=msid:- {}\r\n",
                track.kind(),
                mid,
                track.id()
            ));
        }
        SessionDescription { sdp_type, sdp }
    }
}

/// Session id from the `o=` line.
fn origin_id(sdp: &str) -> Option<&str> {
    sdp.lines()
        .find_map(|line| line.strip_prefix("o="))
        .and_then(|origin| origin.split_whitespace().nth(1))
}

#[async_trait]
impl PeerLink for LoopbackLink {
    fn id(&self) -> &str {
        &self.shared.id
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<(), CallError> {
        lock(&self.shared.state).tracks.push(track.clone());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        self.check(LinkFailure::CreateOffer)?;
        Ok(self.describe(SdpType::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        self.check(LinkFailure::CreateAnswer)?;
        if lock(&self.shared.state).remote.is_none() {
            return Err(CallError::negotiation("create answer", "no remote offer"));
        }
        Ok(self.describe(SdpType::Answer))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), CallError> {
        self.check(LinkFailure::SetLocal)?;
        let trigger = {
            let mut state = lock(&self.shared.state);
            state.local = Some(description);
            if self.gathering == GatheringBehavior::Completes {
                state.gathered = true;
                state.trigger.clone()
            } else {
                None
            }
        };
        if let Some(trigger) = trigger {
            tokio::spawn(async move {
                trigger.fire();
            });
        }
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), CallError> {
        let peer_id = origin_id(&description.sdp)
            .ok_or_else(|| CallError::negotiation("set remote", "missing origin line"))?
            .to_string();
        let peer = lock(&self.registry.links)
            .get(&peer_id)
            .cloned()
            .ok_or_else(|| CallError::negotiation("set remote", "unknown peer"))?;

        let sdp_type = description.sdp_type;
        lock(&self.shared.state).remote = Some(description);

        // The offerer applying the answer completes the handshake.
        if sdp_type == SdpType::Answer {
            self.registry.connect(&self.shared, &peer, self.remote_tracks);
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let state = lock(&self.shared.state);
        let mut description = state.local.clone()?;
        if state.gathered {
            description
                .sdp
                .push_str("a=candidate:1 1 udp 2130706431 127.0.0.1 9 typ host\r\na=end-of-candidates\r\n");
        }
        Some(description)
    }

    fn on_gathering_complete(&self, trigger: GatheringTrigger) {
        let mut state = lock(&self.shared.state);
        if state.gathered {
            trigger.fire();
        }
        state.trigger = Some(trigger);
    }

    fn on_remote_track(&self, sink: mpsc::UnboundedSender<RemoteTrack>) {
        lock(&self.shared.state).sink = Some(sink);
    }

    fn on_transport_connected(&self, connected: watch::Sender<bool>) {
        let mut state = lock(&self.shared.state);
        if state.connected {
            connected.send_replace(true);
        }
        state.transport = Some(connected);
    }

    async fn close(&self) -> Result<(), CallError> {
        let mut state = lock(&self.shared.state);
        state.closed = true;
        state.sink = None;
        state.transport = None;
        lock(&self.registry.links).remove(&self.shared.id);
        Ok(())
    }
}

/// Media devices that grant or refuse every request.
pub struct ScriptedMediaDevices {
    denial: Option<String>,
    microphone: Option<PcmSource>,
    calls: AtomicUsize,
}

impl ScriptedMediaDevices {
    pub fn allow() -> Self {
        Self {
            denial: None,
            microphone: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            denial: Some(reason.into()),
            microphone: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Granted audio tracks are fed from `source` instead of sending silence.
    pub fn with_microphone(mut self, source: PcmSource) -> Self {
        self.microphone = Some(source);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for ScriptedMediaDevices {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<LocalStream, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.denial {
            Some(reason) => Err(CallError::MediaAccessDenied(reason.clone())),
            None => {
                let stream = LocalStream::from_constraints(constraints);
                Ok(match &self.microphone {
                    Some(source) => stream.with_audio_source(source.clone()),
                    None => stream,
                })
            }
        }
    }
}

/// What a [`RecordingNotifier`] was asked to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Transient(String),
    Error(String),
    Dismissed,
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        lock(&self.notices).clone()
    }

    pub fn errors(&self) -> Vec<String> {
        lock(&self.notices)
            .iter()
            .filter_map(|n| match n {
                Notice::Error(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn transients(&self) -> Vec<String> {
        lock(&self.notices)
            .iter()
            .filter_map(|n| match n {
                Notice::Transient(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn show_transient_message(&self, text: &str) {
        lock(&self.notices).push(Notice::Transient(text.to_string()));
    }

    fn show_blocking_error(&self, text: &str) {
        lock(&self.notices).push(Notice::Error(text.to_string()));
    }

    fn dismiss_error(&self) {
        lock(&self.notices).push(Notice::Dismissed);
    }
}

/// Clipboard holding the last text written.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    contents: Mutex<Option<String>>,
    fail: bool,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clipboard whose writes always fail.
    pub fn failing() -> Self {
        Self {
            contents: Mutex::new(None),
            fail: true,
        }
    }

    pub fn contents(&self) -> Option<String> {
        lock(&self.contents).clone()
    }
}

#[async_trait]
impl Clipboard for MemoryClipboard {
    async fn write_text(&self, text: &str) -> Result<(), CallError> {
        if self.fail {
            return Err(CallError::ClipboardWriteFailed("clipboard unavailable".to_string()));
        }
        *lock(&self.contents) = Some(text.to_string());
        Ok(())
    }
}
