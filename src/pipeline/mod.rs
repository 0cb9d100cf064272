// src/pipeline/mod.rs

pub mod event_bus;
pub mod frame_context;
pub mod metrics;
pub mod session;

pub use event_bus::{EventBus, PipelineEvent};
pub use frame_context::{AnnotatedDetection, CaptureStatus, FrameReport, RejectedDetection};
pub use metrics::{MetricsSummary, SessionMetrics};
pub use session::{Session, SessionOutcome};
