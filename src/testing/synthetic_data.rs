//! Synthetic media and signaling payloads
//!
//! Deterministic stand-ins for microphone audio and browser-generated
//! session descriptions, so the activity indicator and the codec can be
//! exercised without devices or a network.

use crate::codec::{SdpType, SessionDescription};
use crate::media::TrackKind;

/// Mono sine tone, the simplest signal the activity indicator must detect.
pub fn synthetic_tone(frequency: f32, amplitude: f32, samples: usize, sample_rate: u32) -> Vec<f32> {
    (0..samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * amplitude
        })
        .collect()
}

/// One 20 ms mono frame of voice-band audio at 48 kHz.
///
/// Two partials (fundamental plus a formant-ish overtone) with a slowly
/// varying envelope, continuous across frame numbers.
pub fn synthetic_voice_frame(frame_number: u64) -> Vec<f32> {
    const SAMPLE_RATE: f64 = 48_000.0;
    const SAMPLES: usize = 960;

    (0..SAMPLES)
        .map(|i| {
            let t = (frame_number as f64 * SAMPLES as f64 + i as f64) / SAMPLE_RATE;
            let envelope = 0.2 + 0.1 * (2.0 * std::f64::consts::PI * 3.0 * t).sin();
            let fundamental = (2.0 * std::f64::consts::PI * 180.0 * t).sin();
            let overtone = 0.5 * (2.0 * std::f64::consts::PI * 720.0 * t).sin();
            (envelope * (fundamental + overtone)) as f32
        })
        .collect()
}

/// A plausible browser-style session description with one `m=` section per
/// kind and a couple of host candidates.
pub fn synthetic_description(sdp_type: SdpType, kinds: &[TrackKind]) -> SessionDescription {
    let session_id = 4_611_731_400_430_051_336u64;
    let mut sdp = format!(
        "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=group:BUNDLE",
        session_id
    );
    for mid in 0..kinds.len() {
        sdp.push_str(&format!(" {}", mid));
    }
    sdp.push_str("\r\na=msid-semantic: WMS\r\n");

    let setup = match sdp_type {
        SdpType::Offer => "actpass",
        SdpType::Answer => "active",
    };
    for (mid, kind) in kinds.iter().enumerate() {
        let (payload, rtpmap) = match kind {
            TrackKind::Audio => (111, "opus/48000/2"),
            TrackKind::Video => (96, "VP8/90000"),
        };
        sdp.push_str(&format!(
            "m={kind} 9 UDP/TLS/RTP/SAVPF {payload}\r\n\
             c=IN IP4 0.0.0.0\r\n\
             a=mid:{mid}\r\n\
             a=setup:{setup}\r\n\
             a=sendrecv\r\n\
             a=rtpmap:{payload} {rtpmap}\r\n\
             a=candidate:1 1 udp 2130706431 192.168.1.20 5{mid}000 typ host\r\n\
             a=candidate:2 1 udp 1694498815 203.0.113.7 5{mid}000 typ srflx raddr 192.168.1.20 rport 5{mid}000\r\n\
             a=end-of-candidates\r\n"
        ));
    }

    SessionDescription { sdp_type, sdp }
}
