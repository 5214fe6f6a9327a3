//! Call session
//!
//! One [`CallSession`] drives one peer link through the manual signaling
//! exchange. The role is fixed at construction: a session started with an
//! inbound invitation token is the responder, any other is the initiator.
//!
//! State lives in a `watch` channel so a UI can follow transitions without
//! polling. Steps run strictly in sequence through `&mut self`; the only
//! concurrent inputs are the gathering trigger, the channel of remote tracks
//! and the transport-up signal, all fed by the peer backend.

mod initiator;
mod responder;

pub use initiator::Invitation;
pub use responder::ResponseCode;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use url::Url;

use crate::activity::ActivityMonitor;
use crate::codec::{SdpType, SessionDescription};
use crate::config::{ActivityConfig, IceConfig, ZeroCallConfig};
use crate::errors::{CallError, ConfigError};
use crate::gathering::{GatheringGate, GatheringOutcome};
use crate::i18n::I18n;
use crate::invite;
use crate::media::{LocalMediaController, LocalTrack, MediaConstraints, ToggleLabels, TrackKind};
use crate::platform::{Clipboard, MediaDevices, Notifier, PeerConnector, PeerLink, RemoteTrack};

/// Which side of the handshake this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    /// Creates the invitation and applies the response code.
    Initiator,
    /// Accepts an invitation and hands back a response code.
    Responder,
}

impl CallRole {
    pub fn from_inbound(token: Option<&str>) -> Self {
        match token {
            Some(t) if !t.trim().is_empty() => CallRole::Responder,
            _ => CallRole::Initiator,
        }
    }
}

impl std::fmt::Display for CallRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallRole::Initiator => write!(f, "initiator"),
            CallRole::Responder => write!(f, "responder"),
        }
    }
}

/// Why a call ended up in [`ConnectionState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    MediaAccessDenied,
    InvalidInvitation,
    InvalidResponseCode,
    NegotiationFailed,
    RemoteMediaTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    AwaitingLocalMedia,
    CreatingOffer,
    CreatingAnswer,
    AwaitingGatheringComplete(SdpType),
    OfferReady,
    AnswerReady,
    AwaitingAnswerInput,
    ApplyingAnswer,
    AwaitingRemoteMedia,
    Connected,
    Failed(FailureKind),
}

impl ConnectionState {
    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed(_))
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::AwaitingGatheringComplete(kind) => {
                write!(f, "AwaitingGatheringComplete({})", kind)
            }
            ConnectionState::Failed(kind) => write!(f, "Failed({:?})", kind),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Host capabilities a session runs against.
#[derive(Clone)]
pub struct CallDeps {
    pub connector: Arc<dyn PeerConnector>,
    pub media: Arc<dyn MediaDevices>,
    pub clipboard: Arc<dyn Clipboard>,
    pub notifier: Arc<dyn Notifier>,
    pub i18n: I18n,
}

/// Per-call settings, resolved from [`ZeroCallConfig`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ice: IceConfig,
    pub gathering_timeout: Duration,
    /// Responder only; `None` waits for remote media indefinitely.
    pub remote_media_timeout: Option<Duration>,
    pub invite_base: Url,
    pub constraints: MediaConstraints,
    pub activity: ActivityConfig,
}

impl SessionSettings {
    pub fn from_config(config: &ZeroCallConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            ice: config.ice.clone(),
            gathering_timeout: config.gathering.timeout(),
            remote_media_timeout: config.session.remote_media_timeout(),
            invite_base: config.invite.base()?,
            constraints: MediaConstraints {
                audio: config.media.audio,
                video: config.media.video,
            },
            activity: config.activity.clone(),
        })
    }
}

/// The single call of this process.
pub struct CallSession {
    id: String,
    role: CallRole,
    inbound_token: Option<String>,
    settings: SessionSettings,
    deps: CallDeps,
    media: LocalMediaController,
    link: Option<Arc<dyn PeerLink>>,
    remote_rx: Option<mpsc::UnboundedReceiver<RemoteTrack>>,
    transport: Option<watch::Receiver<bool>>,
    remote_tracks: Vec<RemoteTrack>,
    activity: Option<ActivityMonitor>,
    state: watch::Sender<ConnectionState>,
    answer_applied: bool,
}

impl CallSession {
    /// `inbound` is whatever the user opened the app with: an invitation
    /// link, a query string or a bare token.
    pub fn new(inbound: Option<&str>, settings: SessionSettings, deps: CallDeps) -> Self {
        let inbound_token = inbound.and_then(invite::inbound_token);
        let role = CallRole::from_inbound(inbound_token.as_deref());
        let (state, _) = watch::channel(ConnectionState::Idle);
        let id = uuid::Uuid::new_v4().to_string();
        log::info!("Call {} started as {}", id, role);

        Self {
            id,
            role,
            inbound_token,
            media: LocalMediaController::new(deps.media.clone()),
            settings,
            deps,
            link: None,
            remote_rx: None,
            transport: None,
            remote_tracks: Vec::new(),
            activity: None,
            state,
            answer_applied: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Follow state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn i18n(&self) -> &I18n {
        &self.deps.i18n
    }

    pub fn remote_tracks(&self) -> &[RemoteTrack] {
        &self.remote_tracks
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        log::info!("Call {}: {} -> {}", self.id, previous, next);
    }

    /// Enter `Failed(kind)`, show the translated error and hand `err` back.
    fn fail(&self, kind: FailureKind, err: CallError) -> CallError {
        log::error!("Call {} failed: {}", self.id, err);
        self.transition(ConnectionState::Failed(kind));
        self.report(&err);
        err
    }

    /// Show the translated message for `err` without changing state.
    pub fn report(&self, err: &CallError) {
        self.deps
            .notifier
            .show_blocking_error(&self.deps.i18n.translate(err.message_key()));
    }

    pub fn dismiss_error(&self) {
        self.deps.notifier.dismiss_error();
    }

    /// Map a peer backend error raised during negotiation.
    fn fail_negotiation(&self, err: CallError) -> CallError {
        self.fail(FailureKind::NegotiationFailed, err)
    }

    fn ensure(
        &self,
        operation: &'static str,
        role: CallRole,
        allowed: impl Fn(ConnectionState) -> bool,
    ) -> Result<(), CallError> {
        let state = self.state();
        if self.role != role || !allowed(state) {
            log::warn!("Call {}: {} rejected in {} as {}", self.id, operation, state, self.role);
            return Err(CallError::InvalidState {
                operation,
                state: format!("{} as {}", state, self.role),
            });
        }
        Ok(())
    }

    async fn acquire_local_media(&mut self) -> Result<(), CallError> {
        self.transition(ConnectionState::AwaitingLocalMedia);
        let acquired = self
            .media
            .acquire(self.settings.constraints)
            .await
            .map(|_| ());
        acquired.map_err(|e| self.fail(FailureKind::MediaAccessDenied, e))
    }

    /// Create the link, attach every local track and start listening for
    /// remote tracks.
    async fn open_link(&mut self) -> Result<Arc<dyn PeerLink>, CallError> {
        let link = self.deps.connector.create(&self.settings.ice).await?;
        let tracks: Vec<LocalTrack> = self
            .media
            .stream()
            .map(|s| s.tracks().to_vec())
            .unwrap_or_default();
        for track in &tracks {
            link.add_track(track).await?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        link.on_remote_track(tx);
        self.remote_rx = Some(rx);
        let (connected, transport) = watch::channel(false);
        link.on_transport_connected(connected);
        self.transport = Some(transport);
        self.link = Some(link.clone());
        log::debug!("Call {}: link {} open with {} track(s)", self.id, link.id(), tracks.len());
        Ok(link)
    }

    /// Arm a gathering gate on `link`. Must run before the local description
    /// is set.
    fn arm_gate(&self, link: &Arc<dyn PeerLink>) -> GatheringGate {
        let gate = GatheringGate::new(self.settings.gathering_timeout);
        link.on_gathering_complete(gate.trigger());
        gate
    }

    /// Wait on the gate and read back the final local description.
    async fn final_description(
        &self,
        link: &Arc<dyn PeerLink>,
        gate: GatheringGate,
        kind: SdpType,
    ) -> Result<(SessionDescription, GatheringOutcome), CallError> {
        self.transition(ConnectionState::AwaitingGatheringComplete(kind));
        let outcome = gate.wait().await;
        let description = link
            .local_description()
            .await
            .ok_or_else(|| CallError::negotiation("final description", "no local description"))?;
        Ok((description, outcome))
    }

    /// Write `text` to the clipboard and report the result. Failure only
    /// costs the user a manual copy.
    async fn copy_to_clipboard(&self, text: &str, copied_key: &str, failed_key: &str) -> bool {
        match self.deps.clipboard.write_text(text).await {
            Ok(()) => {
                self.deps
                    .notifier
                    .show_transient_message(&self.deps.i18n.translate(copied_key));
                true
            }
            Err(e) => {
                log::warn!("Call {}: {}", self.id, e);
                self.deps
                    .notifier
                    .show_blocking_error(&self.deps.i18n.translate(failed_key));
                false
            }
        }
    }

    pub fn toggle_audio(&self) -> Option<bool> {
        self.media.toggle_audio()
    }

    pub fn toggle_video(&self) -> Option<bool> {
        self.media.toggle_video()
    }

    pub fn current_labels(&self) -> Option<ToggleLabels> {
        self.media.current_labels()
    }

    /// Wait for the next inbound track and attach it. Resolves to `None`
    /// once the link is gone; pends forever before a link exists, so it is
    /// safe inside `select!`.
    pub async fn next_remote_track(&mut self) -> Option<RemoteTrack> {
        let track = match self.remote_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        };
        match track {
            Some(track) => {
                self.attach_remote_track(track.clone());
                Some(track)
            }
            None => {
                self.remote_rx = None;
                None
            }
        }
    }

    fn attach_remote_track(&mut self, track: RemoteTrack) {
        log::info!("Call {}: remote {} track {} attached", self.id, track.kind, track.id);

        if track.kind == TrackKind::Audio && self.activity.is_none() {
            if let Some(tap) = track.audio.clone() {
                self.activity = Some(ActivityMonitor::spawn(tap, &self.settings.activity));
            }
        }
        self.remote_tracks.push(track);
        self.mark_connected("first remote track");
    }

    fn mark_connected(&self, reason: &str) {
        if self.state() == ConnectionState::AwaitingRemoteMedia {
            log::info!("Call {}: connected ({})", self.id, reason);
            self.transition(ConnectionState::Connected);
            self.deps
                .notifier
                .show_transient_message(&self.deps.i18n.translate("call_connected"));
        }
    }

    /// Responder: wait until the remote peer is reachable, bounded by the
    /// configured remote-media timeout. Either the first remote track or the
    /// transport coming up counts, so a muted or video-only initiator still
    /// connects.
    pub async fn wait_until_connected(&mut self) -> Result<(), CallError> {
        self.ensure("wait_until_connected", self.role, |s| {
            matches!(s, ConnectionState::AwaitingRemoteMedia | ConnectionState::Connected)
        })?;

        let reached = match self.settings.remote_media_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.remote_reachable()).await {
                Ok(reached) => reached,
                Err(_) => {
                    return Err(self.fail(
                        FailureKind::RemoteMediaTimeout,
                        CallError::RemoteMediaTimeout(limit),
                    ))
                }
            },
            None => self.remote_reachable().await,
        };
        if !reached {
            return Err(self.fail_negotiation(CallError::negotiation(
                "remote media",
                "link closed before the remote peer was reached",
            )));
        }
        Ok(())
    }

    /// `false` if the link went away first.
    async fn remote_reachable(&mut self) -> bool {
        let mut transport = self.transport.clone();
        while self.state() == ConnectionState::AwaitingRemoteMedia {
            tokio::select! {
                // A track that is already queued wins over the transport
                biased;
                track = self.next_remote_track() => {
                    if track.is_none() {
                        return false;
                    }
                }
                up = transport_up(&mut transport) => {
                    if up {
                        self.mark_connected("transport up");
                    }
                }
            }
        }
        true
    }

    /// Whether the remote participant is currently audible.
    pub fn speaking(&self) -> bool {
        self.activity.as_ref().is_some_and(|a| a.is_speaking())
    }

    pub fn speaking_updates(&self) -> Option<watch::Receiver<bool>> {
        self.activity.as_ref().map(|a| a.subscribe())
    }

    /// Tear down the link and the activity monitor.
    pub async fn close(&mut self) -> Result<(), CallError> {
        if let Some(activity) = self.activity.take() {
            activity.stop();
        }
        self.remote_rx = None;
        self.transport = None;
        if let Some(link) = self.link.take() {
            link.close().await?;
            log::info!("Call {}: link {} closed", self.id, link.id());
        }
        Ok(())
    }
}

/// Resolves `true` once the transport reports up, `false` if its sender is
/// gone (after which it pends). Pends forever without a receiver.
async fn transport_up(transport: &mut Option<watch::Receiver<bool>>) -> bool {
    let Some(receiver) = transport.as_mut() else {
        return std::future::pending().await;
    };
    let up = receiver.wait_for(|up| *up).await.is_ok();
    if !up {
        *transport = None;
    }
    up
}
