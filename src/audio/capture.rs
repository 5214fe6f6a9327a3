//! Microphone capture
//!
//! A dedicated thread owns the cpal input stream and forwards 48 kHz mono
//! frames into a [`PcmSource`]. cpal streams are not `Send` on every host,
//! so the stream never leaves that thread. The thread stops once the
//! source's receiver is dropped.

use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use tokio::sync::{mpsc, oneshot};

use crate::errors::CallError;
use crate::media::{PcmSource, CAPTURE_SAMPLE_RATE};

/// Bounded so a stalled consumer cannot grow memory; callbacks are ~10 ms.
const MAX_BUFFER_FRAMES: usize = 64;

const LIVENESS_POLL: Duration = Duration::from_millis(100);

fn denied(context: &str, e: impl std::fmt::Display) -> CallError {
    CallError::MediaAccessDenied(format!("{}: {}", context, e))
}

/// Open the default microphone. Blocks until the stream is playing or has
/// failed to start, so call it off the async runtime.
pub fn start_microphone() -> Result<PcmSource, CallError> {
    let (frames, source) = PcmSource::channel(MAX_BUFFER_FRAMES);
    let (ready_tx, ready_rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("zerocall-microphone".to_string())
        .spawn(move || run_capture(frames, ready_tx))
        .map_err(|e| denied("Failed to start capture thread", e))?;

    ready_rx
        .blocking_recv()
        .map_err(|_| CallError::MediaAccessDenied("Capture thread exited".to_string()))??;
    Ok(source)
}

fn run_capture(frames: mpsc::Sender<Vec<f32>>, ready: oneshot::Sender<Result<(), CallError>>) {
    let stream = match open_stream(frames.clone()) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while !frames.is_closed() {
        std::thread::sleep(LIVENESS_POLL);
    }
    drop(stream);
    log::info!("Microphone capture stopped");
}

fn open_stream(frames: mpsc::Sender<Vec<f32>>) -> Result<cpal::Stream, CallError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CallError::MediaAccessDenied("No default microphone".to_string()))?;
    let supported = device
        .default_input_config()
        .map_err(|e| denied("No supported microphone config", e))?;
    let config: StreamConfig = supported.config();
    let channels = usize::from(config.channels.max(1));
    let mut resampler = Resampler::new(config.sample_rate.0, CAPTURE_SAMPLE_RATE);

    log::info!(
        "Capturing from {} at {} Hz, {} channel(s)",
        device.name().unwrap_or_default(),
        config.sample_rate.0,
        channels
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let frame = resampler.process(&downmix(data, channels));
                // Never block the audio callback
                let _ = frames.try_send(frame);
            },
            |err| log::error!("Microphone capture error: {}", err),
            None,
        )
        .map_err(|e| denied("Failed to build microphone stream", e))?;
    stream.play().map_err(|e| denied("Failed to start microphone", e))?;
    Ok(stream)
}

/// Average interleaved channels into one.
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear resampler for one continuous mono signal.
struct Resampler {
    /// Input samples per output sample
    step: f64,
    /// Next output position, relative to the first sample of the next input
    /// block. `-1.0` is the last sample of the previous block.
    position: f64,
    last: f32,
}

impl Resampler {
    fn new(from: u32, to: u32) -> Self {
        Self {
            step: f64::from(from) / f64::from(to.max(1)),
            position: 0.0,
            last: 0.0,
        }
    }

    fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if (self.step - 1.0).abs() < f64::EPSILON {
            return input.to_vec();
        }

        let last = self.last;
        let at = |i: isize| if i < 0 { last } else { input[i as usize] };
        let end = input.len() as f64 - 1.0;

        let mut output = Vec::with_capacity((input.len() as f64 / self.step) as usize + 1);
        while self.position < end {
            let base = self.position.floor();
            let frac = (self.position - base) as f32;
            let a = at(base as isize);
            let b = at(base as isize + 1);
            output.push(a + (b - a) * frac);
            self.position += self.step;
        }

        self.position -= input.len() as f64;
        if let Some(&sample) = input.last() {
            self.last = sample;
        }
        output
    }
}
