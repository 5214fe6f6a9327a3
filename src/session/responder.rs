use super::{CallRole, CallSession, ConnectionState, FailureKind};
use crate::codec::{self, SdpType, SessionDescription};
use crate::errors::CallError;
use crate::gathering::GatheringOutcome;

/// The responder's half of the exchange, to be pasted back by the initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCode {
    pub token: String,
    pub copied: bool,
    pub gathering: GatheringOutcome,
}

impl CallSession {
    /// Join the call the inbound invitation describes. Runs only when the
    /// user confirms; ends in `AwaitingRemoteMedia`.
    pub async fn accept_invitation(&mut self) -> Result<ResponseCode, CallError> {
        self.ensure("accept_invitation", CallRole::Responder, |s| s == ConnectionState::Idle)?;

        self.acquire_local_media().await?;

        let token = self.inbound_token.clone().unwrap_or_default();
        let offer = match codec::decode_as(&token, SdpType::Offer) {
            Ok(offer) => offer,
            Err(e) => {
                return Err(self.fail(
                    FailureKind::InvalidInvitation,
                    CallError::InvalidInvitation(e.to_string()),
                ))
            }
        };

        self.transition(ConnectionState::CreatingAnswer);
        let (description, gathering) = match self.negotiate_answer(offer).await {
            Ok(result) => result,
            Err(e @ CallError::InvalidInvitation(_)) => {
                return Err(self.fail(FailureKind::InvalidInvitation, e))
            }
            Err(e) => return Err(self.fail_negotiation(e)),
        };

        self.transition(ConnectionState::AnswerReady);
        let token = codec::encode(&description);
        log::info!(
            "Call {}: response code ready ({} bytes, gathering {:?})",
            self.id,
            token.len(),
            gathering
        );

        let copied = self
            .copy_to_clipboard(&token, "response_code_copied", "failed_to_copy_response_code")
            .await;
        self.deps
            .notifier
            .show_transient_message(&self.deps.i18n.translate("response_info_paste_back"));
        self.transition(ConnectionState::AwaitingRemoteMedia);

        Ok(ResponseCode {
            token,
            copied,
            gathering,
        })
    }

    async fn negotiate_answer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<(SessionDescription, GatheringOutcome), CallError> {
        let link = self.open_link().await?;
        link.set_remote_description(offer)
            .await
            .map_err(|e| CallError::InvalidInvitation(e.to_string()))?;

        let gate = self.arm_gate(&link);
        let answer = link.create_answer().await?;
        link.set_local_description(answer).await?;
        self.final_description(&link, gate, SdpType::Answer).await
    }
}
