//! Testing utilities for zerocall
//!
//! In-memory implementations of the host platform traits and synthetic
//! media, for offline tests of both call flows.

pub mod fakes;
pub mod synthetic_data;

pub use fakes::{
    GatheringBehavior, LinkFailure, LoopbackConnector, LoopbackLink, MemoryClipboard, Notice,
    RecordingNotifier, ScriptedMediaDevices,
};
pub use synthetic_data::{synthetic_description, synthetic_tone, synthetic_voice_frame};
