//! Local sample tracks
//!
//! Each [`LocalTrack`] becomes a `TrackLocalStaticSample` on the peer
//! connection. Audio tracks get a pump that writes one Opus packet every
//! 20 ms for the life of the call: captured microphone audio while the
//! track is enabled and a capture source is attached, silence otherwise.
//! A muted track keeps sending, so the remote on-track handler still fires.

use bytes::Bytes;
#[cfg(feature = "audio")]
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::errors::CallError;
use crate::media::{LocalTrack, TrackKind};

/// 20 ms Opus frame (CELT, fullband) that decodes to silence.
const OPUS_SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

const AUDIO_FRAME_DURATION: Duration = Duration::from_millis(20);

/// Outgoing voice bitrate
#[cfg(feature = "audio")]
const VOICE_BITRATE: u32 = 32_000;

/// Encoded packets held back at most (200 ms); older ones are dropped.
#[cfg(feature = "audio")]
const MAX_QUEUED_PACKETS: usize = 10;

fn silence() -> Bytes {
    Bytes::from_static(&OPUS_SILENCE_FRAME)
}

pub(super) fn codec_capability(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
            rtcp_feedback: vec![],
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
    }
}

/// Add `track` to the connection and start its background tasks.
pub(super) async fn attach(
    peer_connection: &Arc<RTCPeerConnection>,
    track: &LocalTrack,
    stream_id: &str,
) -> Result<Vec<JoinHandle<()>>, CallError> {
    let sample_track = Arc::new(TrackLocalStaticSample::new(
        codec_capability(track.kind()),
        track.id().to_string(),
        stream_id.to_string(),
    ));

    let rtp_sender = peer_connection
        .add_track(Arc::clone(&sample_track) as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .map_err(|e| CallError::negotiation("Failed to add track", e))?;
    log::debug!("Added local {} track {}", track.kind(), track.id());

    let mut tasks = vec![spawn_rtcp_drain(rtp_sender)];
    if track.kind() == TrackKind::Audio {
        tasks.push(spawn_audio_pump(sample_track, track.clone()));
    }
    Ok(tasks)
}

/// Read incoming RTCP so interceptors (NACK, reports) keep working.
fn spawn_rtcp_drain(rtp_sender: Arc<RTCRtpSender>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rtcp_buf = vec![0u8; 1500];
        while let Ok((_, _)) = rtp_sender.read(&mut rtcp_buf).await {}
    })
}

#[cfg(feature = "audio")]
struct LiveAudio {
    frames: tokio::sync::mpsc::Receiver<Vec<f32>>,
    encoder: crate::audio::OpusEncoder,
    packets: VecDeque<Bytes>,
}

/// Chooses what each 20 ms packet of a local audio track carries.
struct AudioPayload {
    #[cfg(feature = "audio")]
    live: Option<LiveAudio>,
}

impl AudioPayload {
    #[cfg(feature = "audio")]
    fn new(track: &LocalTrack) -> Self {
        let Some(frames) = track.source().and_then(|source| source.take()) else {
            return Self { live: None };
        };
        match crate::audio::OpusEncoder::new(VOICE_BITRATE) {
            Ok(encoder) => Self {
                live: Some(LiveAudio {
                    frames,
                    encoder,
                    packets: VecDeque::new(),
                }),
            },
            Err(e) => {
                log::warn!("Sending silence on {}: {}", track.id(), e);
                Self { live: None }
            }
        }
    }

    #[cfg(not(feature = "audio"))]
    fn new(track: &LocalTrack) -> Self {
        if track.source().is_some() {
            log::warn!("Built without the audio feature, sending silence on {}", track.id());
        }
        Self {}
    }

    #[cfg(feature = "audio")]
    fn next_packet(&mut self, enabled: bool) -> Bytes {
        let Some(live) = self.live.as_mut() else {
            return silence();
        };
        while let Ok(pcm) = live.frames.try_recv() {
            match live.encoder.encode(&pcm) {
                Ok(packets) => live.packets.extend(packets),
                Err(e) => log::debug!("Dropping captured audio: {}", e),
            }
        }
        while live.packets.len() > MAX_QUEUED_PACKETS {
            live.packets.pop_front();
        }
        if !enabled {
            live.packets.clear();
            return silence();
        }
        live.packets.pop_front().unwrap_or_else(silence)
    }

    #[cfg(not(feature = "audio"))]
    fn next_packet(&mut self, _enabled: bool) -> Bytes {
        silence()
    }
}

fn spawn_audio_pump(sample_track: Arc<TrackLocalStaticSample>, local: LocalTrack) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut payload = AudioPayload::new(&local);
        let mut interval = tokio::time::interval(AUDIO_FRAME_DURATION);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let sample = Sample {
                data: payload.next_packet(local.is_enabled()),
                duration: AUDIO_FRAME_DURATION,
                ..Default::default()
            };
            if let Err(e) = sample_track.write_sample(&sample).await {
                log::debug!("Audio pump for {} stopped: {}", local.id(), e);
                break;
            }
        }
    })
}
