// src/analysis/event_classifier.rs
//
// Per-detection event flags for one frame.
//
//   ACCELERATION: |v2 - v1| over the last three centroids of a track
//   COLLISION:    IoU between any two boxes of the same frame
//   SUSPICIOUS:   restricted label with enough confidence
//
// Collision is O(n^2) in the frame's detection count, fine for tens of
// objects. History is read, never written; the tracker owns it.

use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use crate::config::ClassifierConfig;
use crate::types::{Centroid, Detection, TrackId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventFlags {
    pub is_accident: bool,
    pub is_suspicious: bool,
}

/// A detection together with whatever the tracker knows about it. Without
/// tracking `track_id` is `None` and `history` is empty, which simply
/// disables the acceleration rule.
#[derive(Debug, Clone, Copy)]
pub struct TrackedDetection<'a> {
    pub detection: &'a Detection,
    pub track_id: Option<TrackId>,
    pub history: &'a [Centroid],
}

impl<'a> TrackedDetection<'a> {
    pub fn untracked(detection: &'a Detection) -> Self {
        Self {
            detection,
            track_id: None,
            history: &[],
        }
    }
}

pub struct EventClassifier {
    acceleration_threshold: f64,
    collision_iou_threshold: f64,
    suspicious_labels: HashSet<String>,
    suspicious_confidence: f32,
}

impl EventClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            acceleration_threshold: config.acceleration_threshold,
            collision_iou_threshold: config.collision_iou_threshold,
            suspicious_labels: config.suspicious_labels.iter().cloned().collect(),
            suspicious_confidence: config.suspicious_confidence,
        }
    }

    /// One `EventFlags` per input, same order.
    pub fn classify(&self, tracked: &[TrackedDetection<'_>]) -> Vec<EventFlags> {
        let mut flags: Vec<EventFlags> = tracked
            .iter()
            .map(|t| EventFlags {
                is_accident: false,
                is_suspicious: self.is_suspicious(t.detection),
            })
            .collect();

        for (i, t) in tracked.iter().enumerate() {
            if let Some(accel) = acceleration(t.history) {
                if accel > self.acceleration_threshold {
                    debug!(
                        "Sudden acceleration on {} '{}': {:.1}px/frame",
                        t.track_id
                            .map(|id| id.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        t.detection.label,
                        accel
                    );
                    flags[i].is_accident = true;
                }
            }
        }

        for i in 0..tracked.len() {
            for j in (i + 1)..tracked.len() {
                let iou = tracked[i].detection.bbox.iou(&tracked[j].detection.bbox);
                if iou > self.collision_iou_threshold {
                    debug!(
                        "Collision between '{}' and '{}' (IoU={:.3})",
                        tracked[i].detection.label, tracked[j].detection.label, iou
                    );
                    flags[i].is_accident = true;
                    flags[j].is_accident = true;
                }
            }
        }

        flags
    }

    pub fn is_suspicious(&self, det: &Detection) -> bool {
        det.confidence > self.suspicious_confidence && self.suspicious_labels.contains(&det.label)
    }
}

/// |v2 - v1| over the last three centroids, `None` with fewer than three.
pub fn acceleration(history: &[Centroid]) -> Option<f64> {
    let [.., a, b, c] = history else {
        return None;
    };
    let v1 = a.distance(b);
    let v2 = b.distance(c);
    Some((v2 - v1).abs())
}

// ============================================================================
// TESTS
// ============================================================================
