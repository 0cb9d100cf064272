// src/pipeline/frame_context.rs
//
// What the pipeline reports back for one frame. Everything a renderer or a
// downstream consumer needs lives here so nobody has to reach into tracker
// or clip-buffer state after the fact.

use serde::Serialize;

use crate::analysis::EventFlags;
use crate::types::{Detection, RejectReason, TrackId};

pub const COLOR_BASE: [u8; 3] = [0, 255, 0];
pub const COLOR_SUSPICIOUS: [u8; 3] = [255, 0, 0];
pub const COLOR_ACCIDENT: [u8; 3] = [0, 0, 255];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedDetection {
    #[serde(flatten)]
    pub detection: Detection,
    /// `None` when tracking is disabled
    pub track_id: Option<TrackId>,
    #[serde(flatten)]
    pub flags: EventFlags,
}

impl AnnotatedDetection {
    /// RGB box colour. Accident wins over suspicious.
    pub fn color(&self) -> [u8; 3] {
        if self.flags.is_accident {
            COLOR_ACCIDENT
        } else if self.flags.is_suspicious {
            COLOR_SUSPICIOUS
        } else {
            COLOR_BASE
        }
    }

    pub fn label_text(&self) -> String {
        let mut text = format!("{} {:.2}", self.detection.label, self.detection.confidence);
        if self.flags.is_suspicious {
            text.push_str(" (SUSPICIOUS)");
        }
        if self.flags.is_accident {
            text.push_str(" (ACCIDENT)");
        }
        text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RejectedDetection {
    /// Position in the frame's raw detection list
    pub index: usize,
    #[serde(flatten)]
    pub reason: RejectReason,
}

/// Clip buffer phase as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Disabled,
    Idle,
    Capturing,
    Settled,
    Finalized,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub seq: u64,
    pub timestamp_ms: f64,
    pub annotations: Vec<AnnotatedDetection>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedDetection>,
    pub any_accident: bool,
    pub capture: CaptureStatus,
}

impl FrameReport {
    pub fn suspicious_count(&self) -> usize {
        self.annotations
            .iter()
            .filter(|a| a.flags.is_suspicious)
            .count()
    }
}
