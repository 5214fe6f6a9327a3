//! zerocall: serverless peer-to-peer audio/video calls
//!
//! Two people set up a call without any signaling server. The initiator
//! creates an invitation link that carries its encoded offer; the responder
//! opens it, accepts, and sends back a short response code carrying the
//! answer; the initiator pastes that code and the call connects.
//!
//! # Features
//! - Copy/paste signaling: session descriptions encoded as URL-safe tokens
//! - Candidate gathering bounded by a timeout, so links are produced promptly
//! - Explicit, observable connection state machine for both roles
//! - Local microphone/camera toggles with translated labels
//! - Remote "speaking" indicator driven by a frequency analyzer
//! - webrtc-rs peer connections; host capabilities behind traits
//!
//! # Usage
//! ```rust,no_run
//! use std::sync::Arc;
//! use zerocall::{
//!     CallDeps, CallSession, CommandClipboard, ConsoleNotifier, HostMediaDevices, I18n,
//!     RtcPeerConnector, SessionSettings, ZeroCallConfig,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ZeroCallConfig::load_or_default();
//! let i18n = I18n::new();
//! i18n.initialize(None);
//! let deps = CallDeps {
//!     connector: Arc::new(RtcPeerConnector::new()?),
//!     media: Arc::new(HostMediaDevices::new(config.media.require_devices)),
//!     clipboard: Arc::new(CommandClipboard::new()),
//!     notifier: Arc::new(ConsoleNotifier::new()),
//!     i18n,
//! };
//! let mut session = CallSession::new(None, SessionSettings::from_config(&config)?, deps);
//! let invitation = session.create_invitation().await?;
//! println!("{}", invitation.link);
//! # Ok(())
//! # }
//! ```
pub mod activity;
#[cfg(feature = "audio")]
pub mod audio;
pub mod codec;
pub mod config;
pub mod controller;
pub mod errors;
pub mod gathering;
pub mod i18n;
pub mod invite;
pub mod media;
pub mod permissions;
pub mod platform;
pub mod session;
pub mod webrtc;

// Testing utilities - in-memory host platform and synthetic media
pub mod testing;

// Re-exports for convenience
pub use activity::{ActivityMonitor, AudioTap, SpectrumAnalyzer};
pub use codec::{decode, encode, MalformedTokenError, SdpType, SessionDescription};
pub use config::ZeroCallConfig;
pub use controller::{CallController, UiEvent, UiUpdate};
pub use errors::{CallError, ConfigError};
pub use gathering::{GatheringGate, GatheringOutcome, GatheringTrigger};
pub use i18n::I18n;
pub use media::{HostMediaDevices, LocalMediaController, MediaConstraints, ToggleLabels, TrackKind};
pub use platform::{CommandClipboard, ConsoleNotifier};
pub use session::{
    CallDeps, CallRole, CallSession, ConnectionState, FailureKind, Invitation, ResponseCode,
    SessionSettings,
};
pub use crate::webrtc::RtcPeerConnector;

/// Initialize logging for zerocall
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "zerocall=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        platform: std::env::consts::OS.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub platform: String,
}
