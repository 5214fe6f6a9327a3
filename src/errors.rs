use std::time::Duration;
use thiserror::Error;

/// Errors raised while driving a call.
///
/// Every variant maps to a translated, user-facing message through
/// [`CallError::message_key`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("Media access denied: {0}")]
    MediaAccessDenied(String),
    #[error("Invalid invitation: {0}")]
    InvalidInvitation(String),
    #[error("Invalid response code: {0}")]
    InvalidResponseCode(String),
    #[error("Clipboard write failed: {0}")]
    ClipboardWriteFailed(String),
    #[error("Negotiation error: {0}")]
    Negotiation(String),
    #[error("No remote media after {0:?}")]
    RemoteMediaTimeout(Duration),
    #[error("Operation `{operation}` not allowed while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },
}

impl CallError {
    /// i18n key of the message shown to the user for this error.
    pub fn message_key(&self) -> &'static str {
        match self {
            CallError::MediaAccessDenied(_) => "no_media_access",
            CallError::InvalidInvitation(_) => "invalid_invitation",
            CallError::InvalidResponseCode(_) => "invalid_response_code",
            CallError::ClipboardWriteFailed(_) => "failed_to_copy_link",
            CallError::Negotiation(_) => "failed_to_create_invitation",
            CallError::RemoteMediaTimeout(_) => "remote_media_timeout",
            CallError::InvalidState { .. } => "operation_not_allowed",
        }
    }

    pub(crate) fn negotiation(context: &str, err: impl std::fmt::Display) -> Self {
        CallError::Negotiation(format!("{}: {}", context, err))
    }
}

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
