use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use super::{tap, tracks};
use crate::activity::AudioTap;
use crate::codec::{SdpType, SessionDescription};
use crate::config::{BundlePolicy, IceConfig, IceServer, IceTransportPolicy};
use crate::errors::CallError;
use crate::gathering::GatheringTrigger;
use crate::media::{LocalTrack, TrackKind};
use crate::platform::{PeerConnector, PeerLink, RemoteTrack};

/// Samples kept per inbound audio tap: enough for the analyzer window plus
/// jitter.
const TAP_CAPACITY: usize = 4096;

impl From<IceServer> for RTCIceServer {
    fn from(server: IceServer) -> Self {
        RTCIceServer {
            urls: server.urls,
            username: server.username.unwrap_or_default(),
            credential: server.credential.unwrap_or_default(),
            ..Default::default()
        }
    }
}

fn rtc_configuration(config: &IceConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: config.servers.iter().cloned().map(RTCIceServer::from).collect(),
        ice_transport_policy: match config.transport_policy {
            IceTransportPolicy::All => RTCIceTransportPolicy::All,
            IceTransportPolicy::Relay => RTCIceTransportPolicy::Relay,
        },
        bundle_policy: match config.bundle_policy {
            BundlePolicy::Balanced => RTCBundlePolicy::Balanced,
            BundlePolicy::MaxCompat => RTCBundlePolicy::MaxCompat,
            BundlePolicy::MaxBundle => RTCBundlePolicy::MaxBundle,
        },
        ..Default::default()
    }
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription, CallError> {
    match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
    }
    .map_err(|e| CallError::negotiation("Invalid SDP", e))
}

fn from_rtc(description: RTCSessionDescription) -> Result<SessionDescription, CallError> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        other => {
            return Err(CallError::negotiation(
                "Unsupported description type",
                other,
            ))
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Peer connections backed by webrtc-rs, with the default codec set
/// (Opus, VP8, ...) and interceptors (NACK, RTCP reports, TWCC).
pub struct RtcPeerConnector {
    api: API,
}

impl RtcPeerConnector {
    pub fn new() -> Result<Self, CallError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| CallError::negotiation("Failed to register codecs", e))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| CallError::negotiation("Failed to register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api })
    }
}

#[async_trait]
impl PeerConnector for RtcPeerConnector {
    async fn create(&self, config: &IceConfig) -> Result<Arc<dyn PeerLink>, CallError> {
        let peer_connection = Arc::new(
            self.api
                .new_peer_connection(rtc_configuration(config))
                .await
                .map_err(|e| CallError::negotiation("Failed to create peer connection", e))?,
        );
        Ok(Arc::new(RtcPeer::new(peer_connection)))
    }
}

type Slot<T> = Arc<Mutex<Option<T>>>;

/// Start reading an inbound track and announce it on `sink`.
///
/// The read loop runs on its own task so the on-track handler returns and
/// the next track can be delivered.
fn attach_remote(
    peer_id: &str,
    track: Arc<TrackRemote>,
    kind: TrackKind,
    sink: &Slot<mpsc::UnboundedSender<RemoteTrack>>,
    tasks: &Mutex<Vec<JoinHandle<()>>>,
) {
    log::info!(
        "Peer {}: remote {} track {} ({})",
        peer_id,
        kind,
        track.id(),
        track.codec().capability.mime_type
    );

    let id = track.id();
    let audio = match kind {
        TrackKind::Audio => {
            let audio_tap = AudioTap::new(48_000, TAP_CAPACITY);
            lock(tasks).push(tap::spawn_inbound_audio(track, audio_tap.clone()));
            Some(audio_tap)
        }
        TrackKind::Video => {
            lock(tasks).push(tap::spawn_inbound_drain(track));
            None
        }
    };

    if let Some(sink) = lock(sink).as_ref() {
        let _ = sink.send(RemoteTrack { id, kind, audio });
    }
}

/// One webrtc-rs peer connection.
pub struct RtcPeer {
    id: String,
    peer_connection: Arc<RTCPeerConnection>,
    trigger: Slot<GatheringTrigger>,
    sink: Slot<mpsc::UnboundedSender<RemoteTrack>>,
    transport: Slot<watch::Sender<bool>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    closed: Arc<AtomicBool>,
}

impl RtcPeer {
    fn new(peer_connection: Arc<RTCPeerConnection>) -> Self {
        let peer = Self {
            id: uuid::Uuid::new_v4().to_string(),
            peer_connection,
            trigger: Arc::new(Mutex::new(None)),
            sink: Arc::new(Mutex::new(None)),
            transport: Arc::new(Mutex::new(None)),
            tasks: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        peer.install_handlers();
        peer
    }

    fn install_handlers(&self) {
        // End of candidates arrives either as a `None` candidate or as the
        // gatherer reaching Complete; the trigger ignores the second one.
        let trigger = self.trigger.clone();
        let peer_id = self.id.clone();
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                match candidate {
                    Some(candidate) => {
                        log::debug!("ICE candidate gathered for peer {}: {}", peer_id, candidate)
                    }
                    None => {
                        if let Some(trigger) = lock(&trigger).as_ref() {
                            trigger.fire();
                        }
                    }
                }
                Box::pin(async {})
            }));

        let trigger = self.trigger.clone();
        self.peer_connection
            .on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
                if state == RTCIceGathererState::Complete {
                    if let Some(trigger) = lock(&trigger).as_ref() {
                        trigger.fire();
                    }
                }
                Box::pin(async {})
            }));

        let transport = self.transport.clone();
        let peer_id = self.id.clone();
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                match state {
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                        log::warn!("Peer {} connection {}", peer_id, state)
                    }
                    RTCPeerConnectionState::Connected => {
                        log::info!("Peer {} connection {}", peer_id, state);
                        if let Some(connected) = lock(&transport).as_ref() {
                            connected.send_replace(true);
                        }
                    }
                    _ => log::info!("Peer {} connection {}", peer_id, state),
                }
                Box::pin(async {})
            }));

        let sink = self.sink.clone();
        let tasks = self.tasks.clone();
        let peer_id = self.id.clone();
        self.peer_connection
            .on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                match track.kind() {
                    RTPCodecType::Audio => attach_remote(&peer_id, track, TrackKind::Audio, &sink, &tasks),
                    RTPCodecType::Video => attach_remote(&peer_id, track, TrackKind::Video, &sink, &tasks),
                    other => log::warn!("Peer {}: ignoring {} track", peer_id, other),
                }
                Box::pin(async {})
            }));
    }

    fn check_open(&self) -> Result<(), CallError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CallError::negotiation("Peer connection", "closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerLink for RtcPeer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<(), CallError> {
        self.check_open()?;
        let handles = tracks::attach(&self.peer_connection, track, &self.id).await?;
        lock(&self.tasks).extend(handles);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        self.check_open()?;
        log::info!("Creating SDP offer for peer {}", self.id);
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| CallError::negotiation("Failed to create offer", e))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        self.check_open()?;
        log::info!("Creating SDP answer for peer {}", self.id);
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| CallError::negotiation("Failed to create answer", e))?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), CallError> {
        self.check_open()?;
        self.peer_connection
            .set_local_description(to_rtc(description)?)
            .await
            .map_err(|e| CallError::negotiation("Failed to set local description", e))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), CallError> {
        self.check_open()?;
        log::info!("Setting remote {} for peer {}", description.sdp_type, self.id);
        self.peer_connection
            .set_remote_description(to_rtc(description)?)
            .await
            .map_err(|e| CallError::negotiation("Failed to set remote description", e))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let description = self.peer_connection.local_description().await?;
        from_rtc(description).ok()
    }

    fn on_gathering_complete(&self, trigger: GatheringTrigger) {
        // Store before reading the state: completion landing in between then
        // finds the trigger in the slot
        *lock(&self.trigger) = Some(trigger.clone());
        if self.peer_connection.ice_gathering_state() == RTCIceGatheringState::Complete {
            trigger.fire();
        }
    }

    fn on_remote_track(&self, sink: mpsc::UnboundedSender<RemoteTrack>) {
        *lock(&self.sink) = Some(sink);
    }

    fn on_transport_connected(&self, connected: watch::Sender<bool>) {
        *lock(&self.transport) = Some(connected.clone());
        if self.peer_connection.connection_state() == RTCPeerConnectionState::Connected {
            connected.send_replace(true);
        }
    }

    async fn close(&self) -> Result<(), CallError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        log::info!("Closing peer connection {}", self.id);
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        lock(&self.sink).take();
        lock(&self.transport).take();
        self.peer_connection
            .close()
            .await
            .map_err(|e| CallError::negotiation("Failed to close peer connection", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_server_conversion() {
        let server = IceServer {
            urls: vec!["turn:turn.example.org:3478".to_string()],
            username: Some("user".to_string()),
            credential: None,
        };
        let rtc: RTCIceServer = server.into();
        assert_eq!(rtc.urls, vec!["turn:turn.example.org:3478".to_string()]);
        assert_eq!(rtc.username, "user");
        assert_eq!(rtc.credential, "");
    }

    #[test]
    fn test_policy_mapping() {
        let mut ice = IceConfig::default();
        ice.transport_policy = IceTransportPolicy::Relay;
        ice.bundle_policy = BundlePolicy::Balanced;
        let rtc = rtc_configuration(&ice);
        assert_eq!(rtc.ice_transport_policy, RTCIceTransportPolicy::Relay);
        assert_eq!(rtc.bundle_policy, RTCBundlePolicy::Balanced);
        assert_eq!(rtc.ice_servers.len(), ice.servers.len());
    }

    #[tokio::test]
    async fn test_offer_from_real_stack() {
        let connector = RtcPeerConnector::new().unwrap();
        let ice = IceConfig {
            servers: Vec::new(),
            ..IceConfig::default()
        };
        let link = connector.create(&ice).await.unwrap();
        link.add_track(&LocalTrack::new(TrackKind::Audio)).await.unwrap();

        let offer = link.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("v=0"));
        assert!(offer.sdp.contains("m=audio"));
        link.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_armed_after_gathering_still_fires() {
        let connector = RtcPeerConnector::new().unwrap();
        let ice = IceConfig {
            servers: Vec::new(),
            ..IceConfig::default()
        };
        let peer_connection = Arc::new(
            connector
                .api
                .new_peer_connection(rtc_configuration(&ice))
                .await
                .unwrap(),
        );
        let peer = RtcPeer::new(Arc::clone(&peer_connection));
        peer.add_track(&LocalTrack::new(TrackKind::Audio)).await.unwrap();

        let mut gathered = peer_connection.gathering_complete_promise().await;
        let offer = peer.create_offer().await.unwrap();
        peer.set_local_description(offer).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(10), gathered.recv())
            .await
            .unwrap();
        assert_eq!(peer_connection.ice_gathering_state(), RTCIceGatheringState::Complete);

        let gate = crate::gathering::GatheringGate::new(std::time::Duration::from_secs(60));
        let trigger = gate.trigger();
        peer.on_gathering_complete(trigger.clone());
        assert!(trigger.has_fired());
        peer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_transport_signal_starts_down() {
        let connector = RtcPeerConnector::new().unwrap();
        let link = connector.create(&IceConfig::default()).await.unwrap();
        let (connected, observed) = watch::channel(false);
        link.on_transport_connected(connected);
        assert!(!*observed.borrow());
        link.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_link_rejects_work() {
        let connector = RtcPeerConnector::new().unwrap();
        let link = connector.create(&IceConfig::default()).await.unwrap();
        link.close().await.unwrap();
        assert!(matches!(link.create_offer().await, Err(CallError::Negotiation(_))));
        // Second close is a no-op
        assert!(link.close().await.is_ok());
    }
}
