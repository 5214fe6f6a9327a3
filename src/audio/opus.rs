//! Opus over libopus, mono at 48 kHz

use bytes::Bytes;

/// 20 ms at 48 kHz.
pub const FRAME_SAMPLES: usize = 960;

/// Largest Opus frame: 120 ms at 48 kHz.
const MAX_FRAME_SAMPLES: usize = 5760;

/// Largest packet we ask libopus to write.
const MAX_PACKET_BYTES: usize = 4000;

/// OPUS_APPLICATION_VOIP
const APPLICATION_VOIP: i32 = 2048;

const SAMPLE_RATE: i32 = 48_000;

/// Mono voice encoder.
///
/// Accumulates PCM and emits one packet per full 20 ms frame. Owned by the
/// single task that pumps the local audio track.
pub struct OpusEncoder {
    encoder: *mut libopus_sys::OpusEncoder,
    pending: Vec<f32>,
}

// SAFETY: the encoder pointer is only used through `&mut self`, from the
// task that owns this value. No `Sync`.
unsafe impl Send for OpusEncoder {}

impl OpusEncoder {
    pub fn new(bitrate: u32) -> Result<Self, String> {
        let mut error: i32 = 0;
        let encoder =
            unsafe { libopus_sys::opus_encoder_create(SAMPLE_RATE, 1, APPLICATION_VOIP, &mut error) };
        if encoder.is_null() || error != 0 {
            return Err(format!("Failed to create Opus encoder: error code {}", error));
        }

        let result = unsafe {
            libopus_sys::opus_encoder_ctl(
                encoder,
                libopus_sys::OPUS_SET_BITRATE_REQUEST as i32,
                bitrate as i32,
            )
        };
        if result != 0 {
            unsafe { libopus_sys::opus_encoder_destroy(encoder) };
            return Err(format!("Failed to set bitrate: error code {}", result));
        }

        Ok(Self {
            encoder,
            pending: Vec::with_capacity(FRAME_SAMPLES * 2),
        })
    }

    /// Encode `pcm`, returning zero or more complete packets. Leftover
    /// samples wait for the next call.
    pub fn encode(&mut self, pcm: &[f32]) -> Result<Vec<Bytes>, String> {
        self.pending.extend_from_slice(pcm);

        let mut packets = Vec::new();
        while self.pending.len() >= FRAME_SAMPLES {
            let mut output = vec![0u8; MAX_PACKET_BYTES];
            let len = unsafe {
                libopus_sys::opus_encode_float(
                    self.encoder,
                    self.pending.as_ptr(),
                    FRAME_SAMPLES as i32,
                    output.as_mut_ptr(),
                    output.len() as i32,
                )
            };
            self.pending.drain(..FRAME_SAMPLES);
            if len < 0 {
                return Err(format!("Opus encoding failed: error code {}", len));
            }
            output.truncate(len as usize);
            packets.push(Bytes::from(output));
        }
        Ok(packets)
    }
}

impl Drop for OpusEncoder {
    fn drop(&mut self) {
        unsafe { libopus_sys::opus_encoder_destroy(self.encoder) };
    }
}

/// Mono float decoder.
///
/// Owned by exactly one reader task, never shared.
pub struct OpusDecoder {
    decoder: *mut libopus_sys::OpusDecoder,
    pcm: Vec<f32>,
}

// SAFETY: same single-owner rule as the encoder.
unsafe impl Send for OpusDecoder {}

impl OpusDecoder {
    pub fn new(sample_rate: u32) -> Result<Self, String> {
        let mut error: i32 = 0;
        let decoder = unsafe { libopus_sys::opus_decoder_create(sample_rate as i32, 1, &mut error) };
        if decoder.is_null() || error != 0 {
            return Err(format!("Failed to create Opus decoder: error code {}", error));
        }
        Ok(Self {
            decoder,
            pcm: vec![0.0; MAX_FRAME_SAMPLES],
        })
    }

    pub fn decode(&mut self, packet: &[u8]) -> Result<&[f32], String> {
        let samples = unsafe {
            libopus_sys::opus_decode_float(
                self.decoder,
                packet.as_ptr(),
                packet.len() as i32,
                self.pcm.as_mut_ptr(),
                MAX_FRAME_SAMPLES as i32,
                0,
            )
        };
        if samples < 0 {
            return Err(format!("error code {}", samples));
        }
        Ok(&self.pcm[..samples as usize])
    }
}

impl Drop for OpusDecoder {
    fn drop(&mut self) {
        unsafe { libopus_sys::opus_decoder_destroy(self.decoder) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_tone;

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len().max(1) as f32).sqrt()
    }

    #[test]
    fn test_silence_frame_decodes_to_silence() {
        let mut decoder = OpusDecoder::new(48_000).unwrap();
        let pcm = decoder.decode(&[0xf8, 0xff, 0xfe]).unwrap();
        assert_eq!(pcm.len(), 960);
        assert!(pcm.iter().all(|s| s.abs() < 1e-3));
    }

    #[test]
    fn test_encoder_buffers_partial_frames() {
        let mut encoder = OpusEncoder::new(32_000).unwrap();
        assert!(encoder.encode(&[0.0; 500]).unwrap().is_empty());
        // 500 + 1500 = two full frames and 80 samples left over
        assert_eq!(encoder.encode(&[0.0; 1500]).unwrap().len(), 2);
        assert_eq!(encoder.encode(&[0.0; 880]).unwrap().len(), 1);
    }

    #[test]
    fn test_tone_survives_encoding() {
        let tone = synthetic_tone(440.0, 0.5, FRAME_SAMPLES * 10, 48_000);
        let mut encoder = OpusEncoder::new(32_000).unwrap();
        let mut decoder = OpusDecoder::new(48_000).unwrap();

        let packets = encoder.encode(&tone).unwrap();
        assert_eq!(packets.len(), 10);

        let mut decoded = Vec::new();
        for packet in &packets {
            decoded.extend_from_slice(decoder.decode(packet).unwrap());
        }
        assert_eq!(decoded.len(), tone.len());
        // Skip codec warm-up
        assert!(rms(&decoded[FRAME_SAMPLES * 5..]) > 0.1);
    }
}
