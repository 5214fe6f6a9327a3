//! Host platform capabilities
//!
//! The call core never talks to a transport, a clipboard or a screen
//! directly. It goes through the traits below, which the native backend
//! (`crate::webrtc`, [`clipboard`], [`notify`]) and the in-memory fakes in
//! `crate::testing` implement.

pub mod clipboard;
pub mod notify;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::activity::AudioTap;
use crate::codec::SessionDescription;
use crate::config::IceConfig;
use crate::errors::CallError;
use crate::gathering::GatheringTrigger;
use crate::media::{LocalStream, LocalTrack, MediaConstraints, TrackKind};

pub use clipboard::CommandClipboard;
pub use notify::ConsoleNotifier;

/// Creates peer connections.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create(&self, config: &IceConfig) -> Result<std::sync::Arc<dyn PeerLink>, CallError>;
}

/// One peer connection, as seen by the call state machine.
#[async_trait]
pub trait PeerLink: Send + Sync {
    fn id(&self) -> &str;

    async fn add_track(&self, track: &LocalTrack) -> Result<(), CallError>;

    async fn create_offer(&self) -> Result<SessionDescription, CallError>;

    async fn create_answer(&self) -> Result<SessionDescription, CallError>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), CallError>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), CallError>;

    /// Current local description, including candidates gathered so far.
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Fire `trigger` once candidate gathering completes.
    fn on_gathering_complete(&self, trigger: GatheringTrigger);

    /// Deliver every inbound track to `sink`.
    fn on_remote_track(&self, sink: mpsc::UnboundedSender<RemoteTrack>);

    /// Publish `true` on `connected` once the transport to the remote peer
    /// is up, even if no remote track has arrived.
    fn on_transport_connected(&self, connected: watch::Sender<bool>);

    async fn close(&self) -> Result<(), CallError>;
}

/// Inbound media track attached by the remote peer.
#[derive(Debug, Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    /// PCM feed for audio tracks
    pub audio: Option<AudioTap>,
}

/// Local capture devices.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Fails with [`CallError::MediaAccessDenied`] when access is refused or
    /// the requested devices are missing.
    async fn get_user_media(&self, constraints: MediaConstraints) -> Result<LocalStream, CallError>;
}

/// System clipboard.
#[async_trait]
pub trait Clipboard: Send + Sync {
    async fn write_text(&self, text: &str) -> Result<(), CallError>;
}

/// Where user-facing messages go. Fire and forget.
pub trait Notifier: Send + Sync {
    fn show_transient_message(&self, text: &str);

    fn show_blocking_error(&self, text: &str);

    fn dismiss_error(&self) {}
}
