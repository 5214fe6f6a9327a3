//! Remote activity indicator
//!
//! Classifies whether the remote participant is audibly active. Inbound PCM
//! lands in an [`AudioTap`]; every tick the monitor runs the latest window
//! through a [`SpectrumAnalyzer`] that mimics a Web Audio `AnalyserNode`
//! (`getByteFrequencyData`), sums the bins, and reports "speaking" while the
//! sum exceeds the configured threshold.
//!
//! Best effort by nature: flicker near the threshold is acceptable, and the
//! monitor never fails. It stops on its own once the tap is detached.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ActivityConfig;

#[derive(Debug)]
struct TapInner {
    samples: Mutex<VecDeque<f32>>,
    capacity: usize,
    sample_rate: u32,
    attached: AtomicBool,
}

/// Rolling buffer of the most recent inbound PCM samples (mono).
///
/// Clones share the buffer. The producer detaches the tap when the inbound
/// track ends.
#[derive(Debug, Clone)]
pub struct AudioTap {
    inner: Arc<TapInner>,
}

impl AudioTap {
    pub fn new(sample_rate: u32, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(TapInner {
                samples: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                sample_rate,
                attached: AtomicBool::new(true),
            }),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    /// Append samples, dropping the oldest beyond capacity.
    pub fn push(&self, pcm: &[f32]) {
        if !self.is_attached() {
            return;
        }
        let mut samples = self
            .inner
            .samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let skip = pcm.len().saturating_sub(self.inner.capacity);
        for &sample in &pcm[skip..] {
            if samples.len() == self.inner.capacity {
                samples.pop_front();
            }
            samples.push_back(sample);
        }
    }

    /// The newest `count` samples, zero-padded at the front when fewer are
    /// buffered.
    pub fn latest(&self, count: usize) -> Vec<f32> {
        let samples = self
            .inner
            .samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let available = samples.len().min(count);
        let mut out = vec![0.0; count - available];
        out.extend(samples.iter().skip(samples.len() - available));
        out
    }

    pub fn detach(&self) {
        self.inner.attached.store(false, Ordering::Release);
    }

    pub fn is_attached(&self) -> bool {
        self.inner.attached.load(Ordering::Acquire)
    }
}

/// Frequency-domain analyzer producing byte magnitudes per bin.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(config: &ActivityConfig) -> Self {
        let fft_size = config.fft_size.max(2);
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        Self {
            fft,
            fft_size,
            smoothing: config.smoothing.clamp(0.0, 1.0),
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels,
            window: blackman_window(fft_size),
            smoothed: vec![0.0; fft_size / 2],
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Analyze the newest `fft_size` samples into `bin_count()` bytes.
    pub fn byte_frequency_data(&mut self, samples: &[f32]) -> Vec<u8> {
        let start = samples.len().saturating_sub(self.fft_size);
        let frame = &samples[start..];
        let pad = self.fft_size - frame.len();

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { frame[i - pad] };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.buffer);

        let scale = 1.0 / self.fft_size as f32;
        let range = self.max_decibels - self.min_decibels;
        let mut bytes = Vec::with_capacity(self.bin_count());
        for (bin, value) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.buffer[bin].norm() * scale;
            let next = self.smoothing * *value + (1.0 - self.smoothing) * magnitude;
            *value = if next.is_finite() { next } else { 0.0 };

            let byte = if *value <= 0.0 {
                0
            } else {
                let db = 20.0 * value.log10();
                let scaled = 255.0 * (db - self.min_decibels) / range;
                scaled.clamp(0.0, 255.0) as u8
            };
            bytes.push(byte);
        }
        bytes
    }
}

fn blackman_window(size: usize) -> Vec<f32> {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;
    (0..size)
        .map(|i| {
            let x = i as f32 / size as f32;
            a0 - a1 * (2.0 * std::f32::consts::PI * x).cos()
                + a2 * (4.0 * std::f32::consts::PI * x).cos()
        })
        .collect()
}

/// Sum of byte frequency bins for one tick.
pub fn activity_level(bins: &[u8]) -> u32 {
    bins.iter().map(|&b| b as u32).sum()
}

pub fn is_speaking(bins: &[u8], threshold: u32) -> bool {
    activity_level(bins) > threshold
}

/// Running indicator over one remote audio tap.
pub struct ActivityMonitor {
    speaking: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl ActivityMonitor {
    /// Start sampling `tap` every `config.tick_ms`.
    pub fn spawn(tap: AudioTap, config: &ActivityConfig) -> Self {
        let (tx, rx) = watch::channel(false);
        let mut analyzer = SpectrumAnalyzer::new(config);
        let threshold = config.threshold;
        let tick = config.tick();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if !tap.is_attached() || tx.is_closed() {
                    break;
                }
                let samples = tap.latest(analyzer.fft_size());
                let bins = analyzer.byte_frequency_data(&samples);
                let speaking = is_speaking(&bins, threshold);
                tx.send_if_modified(|current| {
                    if *current != speaking {
                        log::debug!("Remote {}", if speaking { "speaking" } else { "quiet" });
                        *current = speaking;
                        true
                    } else {
                        false
                    }
                });
            }
            tx.send_if_modified(|current| std::mem::replace(current, false));
            log::debug!("Remote activity monitor stopped");
        });

        Self { speaking: rx, task }
    }

    pub fn is_speaking(&self) -> bool {
        *self.speaking.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.speaking.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for ActivityMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
