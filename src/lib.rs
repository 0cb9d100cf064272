// src/lib.rs
//
// Collision event tracking and clip capture over pre-annotated video.
//
//   analysis   tracking and per-detection event flags
//   capture    pre/post-event clip buffer and the JPEG clip writer
//   pipeline   per-session composition, reports, events, metrics
//   notify     alert delivery and background clip dispatch
//   replay     JSON-lines detection logs as a frame source

pub mod analysis;
pub mod capture;
pub mod config;
pub mod notify;
pub mod pipeline;
pub mod replay;
pub mod types;

pub use config::{Config, PipelineOptions};
pub use pipeline::{FrameReport, Session, SessionOutcome};
pub use types::{BBox, Detection, Frame, StreamInfo, TrackId};
