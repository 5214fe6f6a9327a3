//! Inbound track readers
//!
//! Audio RTP is decoded to mono PCM (with the `audio` feature) and pushed
//! into the track's [`AudioTap`]. Without the feature packets are only
//! counted, so the activity indicator stays quiet. The tap is detached when
//! the track ends, which stops its monitor.

use std::sync::Arc;
use tokio::task::JoinHandle;
use webrtc::track::track_remote::TrackRemote;

use crate::activity::AudioTap;
#[cfg(feature = "audio")]
use crate::audio::OpusDecoder;

/// Where decoded inbound audio goes.
struct PcmSink {
    tap: AudioTap,
    #[cfg(feature = "audio")]
    decoder: Option<OpusDecoder>,
}

impl PcmSink {
    #[cfg(feature = "audio")]
    fn new(tap: AudioTap) -> Self {
        let decoder = match OpusDecoder::new(tap.sample_rate()) {
            Ok(decoder) => Some(decoder),
            Err(e) => {
                log::warn!("Remote audio will not be analyzed: {}", e);
                None
            }
        };
        Self { tap, decoder }
    }

    #[cfg(not(feature = "audio"))]
    fn new(tap: AudioTap) -> Self {
        Self { tap }
    }

    #[cfg(feature = "audio")]
    fn feed(&mut self, payload: &[u8]) {
        if let Some(decoder) = self.decoder.as_mut() {
            match decoder.decode(payload) {
                Ok(pcm) => self.tap.push(pcm),
                Err(e) => log::debug!("Opus decode error: {}", e),
            }
        }
    }

    #[cfg(not(feature = "audio"))]
    fn feed(&mut self, _payload: &[u8]) {}
}

pub(super) fn spawn_inbound_audio(track: Arc<TrackRemote>, tap: AudioTap) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sink = PcmSink::new(tap);
        let mut packets = 0u64;
        loop {
            match track.read_rtp().await {
                Ok((packet, _)) => {
                    packets += 1;
                    if !packet.payload.is_empty() {
                        sink.feed(&packet.payload);
                    }
                }
                Err(e) => {
                    log::debug!("Remote audio track {} ended: {}", track.id(), e);
                    break;
                }
            }
        }
        log::info!("Remote audio track {} closed after {} packets", track.id(), packets);
        sink.tap.detach();
    })
}

/// Keep reading a track we do not render so its buffers do not fill up.
pub(super) fn spawn_inbound_drain(track: Arc<TrackRemote>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while track.read(&mut buf).await.is_ok() {}
        log::debug!("Remote {} track {} closed", track.kind(), track.id());
    })
}
