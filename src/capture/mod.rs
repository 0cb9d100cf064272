// src/capture/mod.rs

pub mod clip_buffer;
pub mod clip_writer;

pub use clip_buffer::{CapturePolicy, Clip, ClipBuffer, ClipPhase, ClipTransition, FrameAction};
pub use clip_writer::{ClipLocator, ClipManifest, ClipWriter};
