use url::Url;

use super::{CallRole, CallSession, ConnectionState, FailureKind};
use crate::codec::{self, SdpType};
use crate::errors::CallError;
use crate::gathering::GatheringOutcome;
use crate::invite;

/// The initiator's half of the exchange, ready to be shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub token: String,
    pub link: Url,
    /// Whether the link made it to the clipboard
    pub copied: bool,
    pub gathering: GatheringOutcome,
}

impl CallSession {
    /// Acquire media, create the offer, wait for candidate gathering and
    /// publish the invitation link. Ends in `AwaitingAnswerInput`.
    pub async fn create_invitation(&mut self) -> Result<Invitation, CallError> {
        self.ensure("create_invitation", CallRole::Initiator, |s| s == ConnectionState::Idle)?;

        self.acquire_local_media().await?;
        self.transition(ConnectionState::CreatingOffer);

        let (description, gathering) = match self.negotiate_offer().await {
            Ok(result) => result,
            Err(e) => return Err(self.fail_negotiation(e)),
        };

        self.transition(ConnectionState::OfferReady);
        let token = codec::encode(&description);
        let link = invite::invitation_link(&self.settings.invite_base, &token);
        log::info!(
            "Call {}: invitation ready ({} byte token, gathering {:?})",
            self.id,
            token.len(),
            gathering
        );

        let copied = self
            .copy_to_clipboard(link.as_str(), "invitation_link_copied", "failed_to_copy_link")
            .await;
        self.transition(ConnectionState::AwaitingAnswerInput);

        Ok(Invitation {
            token,
            link,
            copied,
            gathering,
        })
    }

    async fn negotiate_offer(&mut self) -> Result<(codec::SessionDescription, GatheringOutcome), CallError> {
        let link = self.open_link().await?;
        let gate = self.arm_gate(&link);
        let offer = link.create_offer().await?;
        link.set_local_description(offer).await?;
        self.final_description(&link, gate, SdpType::Offer).await
    }

    /// Apply the responder's code. A code that does not decode, or that the
    /// link rejects, leaves the call in `Failed(InvalidResponseCode)`, from
    /// which another code may be submitted.
    pub async fn submit_response(&mut self, code: &str) -> Result<(), CallError> {
        self.ensure("submit_response", CallRole::Initiator, |s| {
            matches!(
                s,
                ConnectionState::AwaitingAnswerInput
                    | ConnectionState::Failed(FailureKind::InvalidResponseCode)
            )
        })?;
        if self.answer_applied {
            return Err(CallError::InvalidState {
                operation: "submit_response",
                state: "answer already applied".to_string(),
            });
        }

        self.transition(ConnectionState::ApplyingAnswer);

        let answer = match codec::decode_as(code, SdpType::Answer) {
            Ok(answer) => answer,
            Err(e) => {
                return Err(self.fail(
                    FailureKind::InvalidResponseCode,
                    CallError::InvalidResponseCode(e.to_string()),
                ))
            }
        };

        let Some(link) = self.link.clone() else {
            return Err(self.fail_negotiation(CallError::negotiation("submit response", "no peer link")));
        };
        if let Err(e) = link.set_remote_description(answer).await {
            return Err(self.fail(
                FailureKind::InvalidResponseCode,
                CallError::InvalidResponseCode(e.to_string()),
            ));
        }

        self.answer_applied = true;
        self.transition(ConnectionState::Connected);
        self.deps
            .notifier
            .show_transient_message(&self.deps.i18n.translate("call_connected"));
        Ok(())
    }
}
