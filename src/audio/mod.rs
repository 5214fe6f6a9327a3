//! Native audio: microphone capture and Opus coding
//!
//! Only built with the `audio` feature. Without it local audio tracks carry
//! silence and remote audio is not analyzed.

pub mod capture;
pub mod opus;

pub use capture::start_microphone;
pub use opus::{OpusDecoder, OpusEncoder};
