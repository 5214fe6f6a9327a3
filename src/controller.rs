//! UI event dispatch
//!
//! [`CallController`] is the seam between a front end (the CLI here) and the
//! call session. It maps each user action to a session operation and makes
//! sure every failure reaches the user as a translated message; failures the
//! session already reported are not shown twice.

use crate::errors::CallError;
use crate::session::{CallSession, ConnectionState, Invitation, ResponseCode};

/// Something the user did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    CreateInvitation,
    AcceptInvitation,
    SubmitResponse(String),
    ToggleMic,
    ToggleCam,
    CloseError,
}

/// What an event produced, for the front end to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiUpdate {
    InvitationReady(Invitation),
    ResponseReady(ResponseCode),
    Connected,
    /// New translated labels for the mic and camera buttons
    Labels { mic: String, cam: String },
    Nothing,
}

pub struct CallController {
    session: CallSession,
}

impl CallController {
    pub fn new(session: CallSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut CallSession {
        &mut self.session
    }

    pub async fn dispatch(&mut self, event: UiEvent) -> Result<UiUpdate, CallError> {
        log::debug!("UI event {:?} in {}", event, self.session.state());
        let result = match event {
            UiEvent::CreateInvitation => self
                .session
                .create_invitation()
                .await
                .map(UiUpdate::InvitationReady),
            UiEvent::AcceptInvitation => self
                .session
                .accept_invitation()
                .await
                .map(UiUpdate::ResponseReady),
            UiEvent::SubmitResponse(code) => self
                .session
                .submit_response(&code)
                .await
                .map(|()| UiUpdate::Connected),
            UiEvent::ToggleMic => {
                self.session.toggle_audio();
                Ok(self.toggle_labels().map_or(UiUpdate::Nothing, |(mic, cam)| {
                    UiUpdate::Labels { mic, cam }
                }))
            }
            UiEvent::ToggleCam => {
                self.session.toggle_video();
                Ok(self.toggle_labels().map_or(UiUpdate::Nothing, |(mic, cam)| {
                    UiUpdate::Labels { mic, cam }
                }))
            }
            UiEvent::CloseError => {
                self.session.dismiss_error();
                Ok(UiUpdate::Nothing)
            }
        };

        if let Err(e @ CallError::InvalidState { .. }) = &result {
            // Rejected before any transition, so nothing was shown yet.
            self.session.report(e);
        }
        result
    }

    /// Translated (mic, cam) button labels; `None` before media is acquired.
    pub fn toggle_labels(&self) -> Option<(String, String)> {
        let labels = self.session.current_labels()?;
        let i18n = self.session.i18n();
        Some((i18n.translate(labels.mic), i18n.translate(labels.cam)))
    }

    pub fn is_connected(&self) -> bool {
        self.session.state() == ConnectionState::Connected
    }

    pub fn into_session(self) -> CallSession {
        self.session
    }
}
