//! Local media
//!
//! [`LocalMediaController`] owns the local stream for the one call on this
//! page/process. Enablement lives on each track as a shared flag, so the
//! peer backend (which sends silence while an audio track is disabled) and
//! the UI labels always read the same state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

use crate::errors::CallError;
use crate::permissions;
use crate::platform::MediaDevices;

/// Media kind of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Which kinds to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Sample rate of every [`PcmSource`].
pub const CAPTURE_SAMPLE_RATE: u32 = 48_000;

/// Live mono PCM at [`CAPTURE_SAMPLE_RATE`] feeding a local audio track.
///
/// The receiving half is handed out once, to whichever sender encodes it.
/// Dropping it tells the producer (a microphone thread, a test feeder) to
/// stop.
#[derive(Debug, Clone)]
pub struct PcmSource {
    frames: Arc<Mutex<Option<mpsc::Receiver<Vec<f32>>>>>,
}

impl PcmSource {
    /// A source and the sender that feeds it. Producers should `try_send`
    /// and drop frames when the buffer is full.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Vec<f32>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let source = Self {
            frames: Arc::new(Mutex::new(Some(rx))),
        };
        (tx, source)
    }

    /// Take the receiving half. `None` once taken.
    pub fn take(&self) -> Option<mpsc::Receiver<Vec<f32>>> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// A local capture track. Clones share the enabled flag and the source.
#[derive(Debug, Clone)]
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    enabled: Arc<AtomicBool>,
    source: Option<PcmSource>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            id: format!("{}-{}", kind, uuid::Uuid::new_v4()),
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            source: None,
        }
    }

    /// Attach captured PCM. Only meaningful for audio tracks.
    pub fn with_source(mut self, source: PcmSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn source(&self) -> Option<&PcmSource> {
        self.source.as_ref()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Flip the flag and return the new value.
    pub fn toggle(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::AcqRel)
    }
}

/// The local stream: every captured track.
#[derive(Debug, Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks,
        }
    }

    /// Stream with one fresh track per requested kind.
    pub fn from_constraints(constraints: MediaConstraints) -> Self {
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(LocalTrack::new(TrackKind::Audio));
        }
        if constraints.video {
            tracks.push(LocalTrack::new(TrackKind::Video));
        }
        Self::new(tracks)
    }

    /// Feed every audio track from `source`.
    pub fn with_audio_source(mut self, source: PcmSource) -> Self {
        for track in self.tracks.iter_mut().filter(|t| t.kind == TrackKind::Audio) {
            track.source = Some(source.clone());
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &LocalTrack> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }

    /// `Some(true)` if any track of `kind` is enabled, `None` without tracks
    /// of that kind.
    pub fn kind_enabled(&self, kind: TrackKind) -> Option<bool> {
        let mut tracks = self.tracks_of(kind).peekable();
        tracks.peek()?;
        Some(tracks.any(|t| t.is_enabled()))
    }
}

/// Current enablement per kind; `false` also covers "no such track".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackEnablement {
    pub audio: bool,
    pub video: bool,
}

/// i18n keys for the two toggle buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleLabels {
    pub mic: &'static str,
    pub cam: &'static str,
}

impl ToggleLabels {
    pub fn for_enablement(enablement: TrackEnablement) -> Self {
        Self {
            mic: if enablement.audio { "mic_off" } else { "mic_on" },
            cam: if enablement.video { "cam_off" } else { "cam_on" },
        }
    }
}

/// Acquires and controls the local stream.
pub struct LocalMediaController {
    devices: Arc<dyn MediaDevices>,
    stream: Option<LocalStream>,
}

impl LocalMediaController {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            stream: None,
        }
    }

    /// Request capture. A stream acquired earlier is returned as is.
    pub async fn acquire(&mut self, constraints: MediaConstraints) -> Result<&LocalStream, CallError> {
        if self.stream.is_none() {
            let stream = self.devices.get_user_media(constraints).await?;
            log::info!(
                "Acquired local stream {} with {} track(s)",
                stream.id(),
                stream.tracks().len()
            );
            self.stream = Some(stream);
        }
        self.stream
            .as_ref()
            .ok_or_else(|| CallError::MediaAccessDenied("no local stream".to_string()))
    }

    pub fn stream(&self) -> Option<&LocalStream> {
        self.stream.as_ref()
    }

    pub fn toggle_audio(&self) -> Option<bool> {
        self.toggle(TrackKind::Audio)
    }

    pub fn toggle_video(&self) -> Option<bool> {
        self.toggle(TrackKind::Video)
    }

    /// Flip every track of `kind`; `None` before acquisition or without
    /// such tracks.
    fn toggle(&self, kind: TrackKind) -> Option<bool> {
        let stream = self.stream.as_ref()?;
        let mut any = false;
        let mut enabled = false;
        for track in stream.tracks_of(kind) {
            any = true;
            enabled |= track.toggle();
        }
        if !any {
            return None;
        }
        log::info!("Local {} {}", kind, if enabled { "enabled" } else { "disabled" });
        Some(enabled)
    }

    pub fn enablement(&self) -> Option<TrackEnablement> {
        let stream = self.stream.as_ref()?;
        Some(TrackEnablement {
            audio: stream.kind_enabled(TrackKind::Audio).unwrap_or(false),
            video: stream.kind_enabled(TrackKind::Video).unwrap_or(false),
        })
    }

    pub fn current_labels(&self) -> Option<ToggleLabels> {
        self.enablement().map(ToggleLabels::for_enablement)
    }
}

/// Capture devices of the machine this process runs on.
///
/// When `require_devices` is set the permissions probe must pass and, with
/// the `audio` feature, the microphone must open. Otherwise tracks are
/// created regardless (useful on headless hosts, where the backend sends
/// silence).
#[derive(Debug, Clone)]
pub struct HostMediaDevices {
    require_devices: bool,
}

impl HostMediaDevices {
    pub fn new(require_devices: bool) -> Self {
        Self { require_devices }
    }
}

#[async_trait]
impl MediaDevices for HostMediaDevices {
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<LocalStream, CallError> {
        if !constraints.audio && !constraints.video {
            return Err(CallError::MediaAccessDenied(
                "no audio or video requested".to_string(),
            ));
        }
        if self.require_devices {
            let infos = tokio::task::spawn_blocking(move || permissions::check_media_access(constraints))
                .await
                .map_err(|e| CallError::MediaAccessDenied(format!("device probe failed: {}", e)))??;
            for info in infos {
                log::info!("{} capture: {}", info.kind, info.message);
            }
        }
        let stream = LocalStream::from_constraints(constraints);
        if !constraints.audio {
            return Ok(stream);
        }
        Ok(match microphone(self.require_devices).await? {
            Some(source) => stream.with_audio_source(source),
            None => stream,
        })
    }
}

/// Start microphone capture. Without a working device this is an error only
/// when devices are required; otherwise the audio track carries silence.
#[cfg(feature = "audio")]
async fn microphone(require_devices: bool) -> Result<Option<PcmSource>, CallError> {
    let started = tokio::task::spawn_blocking(crate::audio::start_microphone)
        .await
        .map_err(|e| CallError::MediaAccessDenied(format!("microphone start failed: {}", e)))?;
    match started {
        Ok(source) => Ok(Some(source)),
        Err(e) if require_devices => Err(e),
        Err(e) => {
            log::warn!("No microphone capture, sending silence: {}", e);
            Ok(None)
        }
    }
}

#[cfg(not(feature = "audio"))]
async fn microphone(_require_devices: bool) -> Result<Option<PcmSource>, CallError> {
    Ok(None)
}
