//! End-to-end call flows over the in-memory loopback host

use std::sync::Arc;
use std::time::Duration;

use zerocall::codec::{self, SdpType};
use zerocall::gathering::GatheringOutcome;
use zerocall::testing::{
    synthetic_tone, GatheringBehavior, LinkFailure, LoopbackConnector, MemoryClipboard,
    RecordingNotifier, ScriptedMediaDevices,
};
use zerocall::{
    CallController, CallDeps, CallError, CallRole, CallSession, ConnectionState, FailureKind, I18n,
    SessionSettings, TrackKind, UiEvent, UiUpdate, ZeroCallConfig,
};

struct Side {
    session: CallSession,
    notifier: Arc<RecordingNotifier>,
    clipboard: Arc<MemoryClipboard>,
    media: Arc<ScriptedMediaDevices>,
}

struct SideBuilder<'a> {
    connector: &'a LoopbackConnector,
    inbound: Option<String>,
    clipboard: MemoryClipboard,
    media: ScriptedMediaDevices,
    config: ZeroCallConfig,
}

impl<'a> SideBuilder<'a> {
    fn new(connector: &'a LoopbackConnector) -> Self {
        Self {
            connector,
            inbound: None,
            clipboard: MemoryClipboard::new(),
            media: ScriptedMediaDevices::allow(),
            config: ZeroCallConfig::default(),
        }
    }

    fn inbound(mut self, inbound: &str) -> Self {
        self.inbound = Some(inbound.to_string());
        self
    }

    fn clipboard(mut self, clipboard: MemoryClipboard) -> Self {
        self.clipboard = clipboard;
        self
    }

    fn media(mut self, media: ScriptedMediaDevices) -> Self {
        self.media = media;
        self
    }

    fn build(self) -> Side {
        let i18n = I18n::new();
        i18n.initialize(Some("en"));
        let notifier = Arc::new(RecordingNotifier::new());
        let clipboard = Arc::new(self.clipboard);
        let media = Arc::new(self.media);
        let deps = CallDeps {
            connector: Arc::new(self.connector.clone()),
            media: media.clone(),
            clipboard: clipboard.clone(),
            notifier: notifier.clone(),
            i18n,
        };
        let settings = SessionSettings::from_config(&self.config).unwrap();
        Side {
            session: CallSession::new(self.inbound.as_deref(), settings, deps),
            notifier,
            clipboard,
            media,
        }
    }
}

/// Run both halves of the handshake and return (initiator, responder).
async fn connected_pair(connector: &LoopbackConnector) -> (Side, Side) {
    let mut alice = SideBuilder::new(connector).build();
    let invitation = alice.session.create_invitation().await.unwrap();

    let mut bob = SideBuilder::new(connector).inbound(invitation.link.as_str()).build();
    let response = bob.session.accept_invitation().await.unwrap();

    alice.session.submit_response(&response.token).await.unwrap();
    bob.session.wait_until_connected().await.unwrap();
    (alice, bob)
}

#[cfg(test)]
mod call_flow_tests {
    use super::*;

    #[tokio::test]
    async fn test_full_call_connects_both_sides() {
        let connector = LoopbackConnector::new();

        let mut alice = SideBuilder::new(&connector).build();
        assert_eq!(alice.session.role(), CallRole::Initiator);
        let invitation = alice.session.create_invitation().await.unwrap();

        assert_eq!(alice.session.state(), ConnectionState::AwaitingAnswerInput);
        assert_eq!(invitation.gathering, GatheringOutcome::Complete);
        assert!(invitation.copied);
        assert_eq!(alice.clipboard.contents().as_deref(), Some(invitation.link.as_str()));
        assert!(alice
            .notifier
            .transients()
            .contains(&"Invitation link copied to clipboard".to_string()));

        // The link carries the offer with its gathered candidates
        let offer = codec::decode_as(&invitation.token, SdpType::Offer).unwrap();
        assert!(offer.sdp.contains("a=candidate:"));

        let mut bob = SideBuilder::new(&connector).inbound(invitation.link.as_str()).build();
        assert_eq!(bob.session.role(), CallRole::Responder);
        let response = bob.session.accept_invitation().await.unwrap();

        assert_eq!(bob.session.state(), ConnectionState::AwaitingRemoteMedia);
        assert_eq!(bob.clipboard.contents().as_deref(), Some(response.token.as_str()));
        assert!(bob
            .notifier
            .transients()
            .contains(&"Send this code back to the person who invited you".to_string()));

        alice.session.submit_response(&response.token).await.unwrap();
        assert_eq!(alice.session.state(), ConnectionState::Connected);

        bob.session.wait_until_connected().await.unwrap();
        assert_eq!(bob.session.state(), ConnectionState::Connected);
        assert!(!bob.session.remote_tracks().is_empty());

        let track = alice.session.next_remote_track().await.unwrap();
        assert_eq!(track.kind, TrackKind::Audio);

        assert!(alice.notifier.errors().is_empty());
        assert!(bob.notifier.errors().is_empty());
        assert_eq!(connector.created_count(), 2);
    }

    #[tokio::test]
    async fn test_bare_token_makes_a_responder() {
        let connector = LoopbackConnector::new();
        let mut alice = SideBuilder::new(&connector).build();
        let invitation = alice.session.create_invitation().await.unwrap();

        let mut bob = SideBuilder::new(&connector).inbound(&invitation.token).build();
        assert_eq!(bob.session.role(), CallRole::Responder);
        bob.session.accept_invitation().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_response_code_can_be_retried() {
        let connector = LoopbackConnector::new();
        let mut alice = SideBuilder::new(&connector).build();
        let invitation = alice.session.create_invitation().await.unwrap();
        let mut bob = SideBuilder::new(&connector).inbound(invitation.link.as_str()).build();
        let response = bob.session.accept_invitation().await.unwrap();

        let err = alice.session.submit_response("definitely not a code").await.unwrap_err();
        assert!(matches!(err, CallError::InvalidResponseCode(_)));
        assert_eq!(
            alice.session.state(),
            ConnectionState::Failed(FailureKind::InvalidResponseCode)
        );
        assert_eq!(alice.notifier.errors(), vec!["The response code is not valid".to_string()]);

        // An offer pasted by mistake is rejected the same way
        let err = alice.session.submit_response(&invitation.token).await.unwrap_err();
        assert!(matches!(err, CallError::InvalidResponseCode(_)));

        alice.session.submit_response(&response.token).await.unwrap();
        assert_eq!(alice.session.state(), ConnectionState::Connected);

        // Applied at most once
        let err = alice.session.submit_response(&response.token).await.unwrap_err();
        assert!(matches!(err, CallError::InvalidState { .. }));
        assert_eq!(alice.session.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_media_denied_creates_no_link() {
        let connector = LoopbackConnector::new();
        let mut alice = SideBuilder::new(&connector)
            .media(ScriptedMediaDevices::deny("no camera"))
            .build();

        let err = alice.session.create_invitation().await.unwrap_err();
        assert!(matches!(err, CallError::MediaAccessDenied(_)));
        assert_eq!(
            alice.session.state(),
            ConnectionState::Failed(FailureKind::MediaAccessDenied)
        );
        assert_eq!(
            alice.notifier.errors(),
            vec!["Could not access the camera or microphone".to_string()]
        );
        assert_eq!(alice.media.calls(), 1);
        assert_eq!(connector.created_count(), 0);
        assert!(alice.clipboard.contents().is_none());
    }

    #[tokio::test]
    async fn test_responder_media_denied() {
        let connector = LoopbackConnector::new();
        let mut alice = SideBuilder::new(&connector).build();
        let invitation = alice.session.create_invitation().await.unwrap();

        let mut bob = SideBuilder::new(&connector)
            .inbound(invitation.link.as_str())
            .media(ScriptedMediaDevices::deny("busy"))
            .build();
        assert!(bob.session.accept_invitation().await.is_err());
        assert_eq!(
            bob.session.state(),
            ConnectionState::Failed(FailureKind::MediaAccessDenied)
        );
        assert_eq!(connector.created_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_invitation() {
        let connector = LoopbackConnector::new();
        let mut bob = SideBuilder::new(&connector)
            .inbound("https://zero-call.org/?invite=%%%")
            .build();
        assert_eq!(bob.session.role(), CallRole::Responder);

        let err = bob.session.accept_invitation().await.unwrap_err();
        assert!(matches!(err, CallError::InvalidInvitation(_)));
        assert_eq!(
            bob.session.state(),
            ConnectionState::Failed(FailureKind::InvalidInvitation)
        );
        assert_eq!(bob.notifier.errors(), vec!["The invitation link is not valid".to_string()]);
        assert_eq!(connector.created_count(), 0);
    }

    #[tokio::test]
    async fn test_invitation_rejected_by_link() {
        // An offer from a peer this host has never seen
        let other = LoopbackConnector::new();
        let mut alice = SideBuilder::new(&other).build();
        let invitation = alice.session.create_invitation().await.unwrap();

        let connector = LoopbackConnector::new();
        let mut bob = SideBuilder::new(&connector).inbound(&invitation.token).build();
        let err = bob.session.accept_invitation().await.unwrap_err();
        assert!(matches!(err, CallError::InvalidInvitation(_)));
        assert_eq!(
            bob.session.state(),
            ConnectionState::Failed(FailureKind::InvalidInvitation)
        );
    }

    #[tokio::test]
    async fn test_offer_failure_is_negotiation_failure() {
        let connector = LoopbackConnector::new().failing_at(LinkFailure::CreateOffer);
        let mut alice = SideBuilder::new(&connector).build();

        let err = alice.session.create_invitation().await.unwrap_err();
        assert!(matches!(err, CallError::Negotiation(_)));
        assert_eq!(
            alice.session.state(),
            ConnectionState::Failed(FailureKind::NegotiationFailed)
        );
        assert_eq!(alice.notifier.errors(), vec!["Failed to create the connection".to_string()]);
    }

    #[tokio::test]
    async fn test_answer_failure_is_negotiation_failure() {
        let connector = LoopbackConnector::new();
        let mut alice = SideBuilder::new(&connector).build();
        let invitation = alice.session.create_invitation().await.unwrap();

        // Same registry, so the offer's origin is known
        let failing = connector.clone().failing_at(LinkFailure::CreateAnswer);
        let mut bob = SideBuilder::new(&failing).inbound(&invitation.token).build();
        let err = bob.session.accept_invitation().await.unwrap_err();
        assert!(matches!(err, CallError::Negotiation(_)));
        assert_eq!(
            bob.session.state(),
            ConnectionState::Failed(FailureKind::NegotiationFailed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_gathering_times_out_with_partial_offer() {
        let connector = LoopbackConnector::new().with_gathering(GatheringBehavior::Stalls);
        let mut alice = SideBuilder::new(&connector).build();

        let started = tokio::time::Instant::now();
        let invitation = alice.session.create_invitation().await.unwrap();

        assert_eq!(invitation.gathering, GatheringOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(2000));
        assert_eq!(alice.session.state(), ConnectionState::AwaitingAnswerInput);
        let offer = codec::decode_as(&invitation.token, SdpType::Offer).unwrap();
        assert!(!offer.sdp.contains("a=candidate:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_responder_gives_up_without_remote_media() {
        let connector = LoopbackConnector::new();
        let mut alice = SideBuilder::new(&connector).build();
        let invitation = alice.session.create_invitation().await.unwrap();
        let mut bob = SideBuilder::new(&connector).inbound(invitation.link.as_str()).build();
        bob.session.accept_invitation().await.unwrap();

        // The initiator never pastes the response code
        let err = bob.session.wait_until_connected().await.unwrap_err();
        assert_eq!(err, CallError::RemoteMediaTimeout(Duration::from_secs(30)));
        assert_eq!(
            bob.session.state(),
            ConnectionState::Failed(FailureKind::RemoteMediaTimeout)
        );
        assert_eq!(
            bob.notifier.errors(),
            vec!["The other side did not connect in time".to_string()]
        );
    }

    #[tokio::test]
    async fn test_responder_connects_on_transport_without_tracks() {
        let connector = LoopbackConnector::new().without_remote_tracks();
        let mut alice = SideBuilder::new(&connector).build();
        let invitation = alice.session.create_invitation().await.unwrap();

        let mut bob = SideBuilder::new(&connector).inbound(invitation.link.as_str()).build();
        let response = bob.session.accept_invitation().await.unwrap();
        alice.session.submit_response(&response.token).await.unwrap();

        bob.session.wait_until_connected().await.unwrap();
        assert_eq!(bob.session.state(), ConnectionState::Connected);
        assert!(bob.session.remote_tracks().is_empty());
        assert!(!bob.session.speaking());
        assert_eq!(
            bob.notifier
                .transients()
                .iter()
                .filter(|t| t.as_str() == "Call connected")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_clipboard_failure_is_not_fatal() {
        let connector = LoopbackConnector::new();
        let mut alice = SideBuilder::new(&connector)
            .clipboard(MemoryClipboard::failing())
            .build();

        let invitation = alice.session.create_invitation().await.unwrap();
        assert!(!invitation.copied);
        assert_eq!(alice.session.state(), ConnectionState::AwaitingAnswerInput);
        assert_eq!(
            alice.notifier.errors(),
            vec!["Could not copy the invitation link, copy it manually".to_string()]
        );
    }

    #[tokio::test]
    async fn test_operations_out_of_order_are_rejected() {
        let connector = LoopbackConnector::new();
        let mut alice = SideBuilder::new(&connector).build();

        let err = alice.session.submit_response("abc").await.unwrap_err();
        assert!(matches!(err, CallError::InvalidState { .. }));
        let err = alice.session.accept_invitation().await.unwrap_err();
        assert!(matches!(err, CallError::InvalidState { .. }));
        assert_eq!(alice.session.state(), ConnectionState::Idle);

        alice.session.create_invitation().await.unwrap();
        let err = alice.session.create_invitation().await.unwrap_err();
        assert!(matches!(err, CallError::InvalidState { .. }));
        assert_eq!(alice.session.state(), ConnectionState::AwaitingAnswerInput);
        assert_eq!(connector.created_count(), 1);
    }

    #[tokio::test]
    async fn test_state_changes_are_observable() {
        let connector = LoopbackConnector::new();
        let mut alice = SideBuilder::new(&connector).build();
        let mut states = alice.session.subscribe();
        assert_eq!(*states.borrow_and_update(), ConnectionState::Idle);

        alice.session.create_invitation().await.unwrap();
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ConnectionState::AwaitingAnswerInput);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_speaking_indicator() {
        let connector = LoopbackConnector::new();
        let (_alice, mut bob) = connected_pair(&connector).await;

        // Drain the rest of the initiator's tracks
        while bob.session.remote_tracks().len() < 2 {
            bob.session.next_remote_track().await.unwrap();
        }
        assert!(!bob.session.speaking());
        let mut speaking = bob.session.speaking_updates().unwrap();

        // The first tap delivered belongs to the responder
        let tap = connector.audio_taps()[0].clone();
        tap.push(&synthetic_tone(440.0, 0.5, 4096, 48_000));
        tokio::time::timeout(Duration::from_secs(1), speaking.wait_for(|s| *s))
            .await
            .unwrap()
            .unwrap();
        assert!(bob.session.speaking());

        bob.session.close().await.unwrap();
        assert!(!bob.session.speaking());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let connector = LoopbackConnector::new();
        let (mut alice, _bob) = connected_pair(&connector).await;

        assert_eq!(alice.session.state(), ConnectionState::Connected);
        alice.session.close().await.unwrap();
        // Closing twice is harmless
        alice.session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_toggles_flip_local_tracks() {
        let connector = LoopbackConnector::new();
        let mut alice = SideBuilder::new(&connector).build();
        assert_eq!(alice.session.toggle_audio(), None);

        alice.session.create_invitation().await.unwrap();
        assert_eq!(alice.session.toggle_audio(), Some(false));
        assert_eq!(alice.session.toggle_audio(), Some(true));
        assert_eq!(alice.session.toggle_video(), Some(false));
        let labels = alice.session.current_labels().unwrap();
        assert_eq!(labels.mic, "mic_off");
        assert_eq!(labels.cam, "cam_on");
    }
}

#[cfg(test)]
mod controller_tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_drives_initiator() {
        let connector = LoopbackConnector::new();
        let alice = SideBuilder::new(&connector).build();
        let notifier = alice.notifier.clone();
        let mut controller = CallController::new(alice.session);

        assert_eq!(controller.dispatch(UiEvent::ToggleMic).await.unwrap(), UiUpdate::Nothing);
        assert!(controller.toggle_labels().is_none());

        let update = controller.dispatch(UiEvent::CreateInvitation).await.unwrap();
        let UiUpdate::InvitationReady(invitation) = update else {
            panic!("expected an invitation, got {:?}", update);
        };

        let update = controller.dispatch(UiEvent::ToggleMic).await.unwrap();
        assert_eq!(
            update,
            UiUpdate::Labels {
                mic: "Turn microphone on".to_string(),
                cam: "Turn camera off".to_string(),
            }
        );

        let mut bob = SideBuilder::new(&connector).inbound(invitation.link.as_str()).build();
        let response = bob.session.accept_invitation().await.unwrap();
        let update = controller
            .dispatch(UiEvent::SubmitResponse(response.token))
            .await
            .unwrap();
        assert_eq!(update, UiUpdate::Connected);
        assert!(controller.is_connected());
        assert!(notifier.errors().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_event_is_reported_once() {
        let connector = LoopbackConnector::new();
        let alice = SideBuilder::new(&connector).build();
        let notifier = alice.notifier.clone();
        let mut controller = CallController::new(alice.session);

        let err = controller.dispatch(UiEvent::AcceptInvitation).await.unwrap_err();
        assert!(matches!(err, CallError::InvalidState { .. }));
        assert_eq!(
            notifier.errors(),
            vec!["That action is not available right now".to_string()]
        );
        assert_eq!(controller.session().state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_session_failures_are_not_reported_twice() {
        let connector = LoopbackConnector::new();
        let alice = SideBuilder::new(&connector)
            .media(ScriptedMediaDevices::deny("denied"))
            .build();
        let notifier = alice.notifier.clone();
        let mut controller = CallController::new(alice.session);

        assert!(controller.dispatch(UiEvent::CreateInvitation).await.is_err());
        assert_eq!(notifier.errors().len(), 1);

        controller.dispatch(UiEvent::CloseError).await.unwrap();
        assert_eq!(
            notifier.notices().last(),
            Some(&zerocall::testing::Notice::Dismissed)
        );
    }

    #[tokio::test]
    async fn test_dispatch_drives_responder() {
        let connector = LoopbackConnector::new();
        let mut alice = SideBuilder::new(&connector).build();
        let invitation = alice.session.create_invitation().await.unwrap();

        let bob = SideBuilder::new(&connector).inbound(invitation.link.as_str()).build();
        let mut controller = CallController::new(bob.session);
        let err = controller.dispatch(UiEvent::CreateInvitation).await.unwrap_err();
        assert!(matches!(err, CallError::InvalidState { .. }));

        let update = controller.dispatch(UiEvent::AcceptInvitation).await.unwrap();
        assert!(matches!(update, UiUpdate::ResponseReady(_)));
        assert_eq!(controller.session().state(), ConnectionState::AwaitingRemoteMedia);
    }
}
