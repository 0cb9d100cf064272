// src/types.rs
//
// Shared value types flowing through the pipeline. Detections arrive from
// an external detector, frames from an external video source; everything
// here is plain data with no pipeline state.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Fallback frame rate when the source reports none (or zero).
pub const DEFAULT_FPS: f64 = 24.0;

/// Anything above this is treated as corrupt metadata. Buffer sizes are
/// derived from fps, so an absurd value would mean an absurd allocation.
pub const MAX_FPS: f64 = 1000.0;

// ============================================================================
// IDENTIFIERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

// ============================================================================
// GEOMETRY
// ============================================================================

/// Axis-aligned box in integer pixel coordinates, `x1 < x2` and `y1 < y2`
/// for any box that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i64 {
        self.x2 as i64 - self.x1 as i64
    }

    pub fn height(&self) -> i64 {
        self.y2 as i64 - self.y1 as i64
    }

    /// Zero for degenerate or inverted boxes. Widened to i128: two full
    /// i32 spans multiply past i64.
    pub fn area(&self) -> i128 {
        if self.width() <= 0 || self.height() <= 0 {
            return 0;
        }
        self.width() as i128 * self.height() as i128
    }

    pub fn has_positive_area(&self) -> bool {
        self.width() > 0 && self.height() > 0
    }

    pub fn centroid(&self) -> Centroid {
        Centroid {
            x: (self.x1 as f64 + self.x2 as f64) / 2.0,
            y: (self.y1 as f64 + self.y2 as f64) / 2.0,
        }
    }

    /// Intersection-over-union. Zero when the boxes do not overlap or
    /// merely touch along an edge.
    pub fn iou(&self, other: &BBox) -> f64 {
        let left = self.x1.max(other.x1) as i128;
        let top = self.y1.max(other.y1) as i128;
        let right = self.x2.min(other.x2) as i128;
        let bottom = self.y2.min(other.y2) as i128;

        if right <= left || bottom <= top {
            return 0.0;
        }

        let inter = (right - left) * (bottom - top);
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            return 0.0;
        }
        inter as f64 / union as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub x: f64,
    pub y: f64,
}

impl Centroid {
    pub fn distance(&self, other: &Centroid) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

// ============================================================================
// DETECTIONS
// ============================================================================

/// One object instance reported by the external detector for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BBox,
}

/// Why a detection was refused at the pipeline boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    NonPositiveArea { width: i64, height: i64 },
    NonFiniteConfidence,
    ConfidenceOutOfRange { confidence: f32 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveArea { width, height } => {
                write!(f, "bbox has non-positive area ({}x{})", width, height)
            }
            Self::NonFiniteConfidence => write!(f, "confidence is not finite"),
            Self::ConfidenceOutOfRange { confidence } => {
                write!(f, "confidence {:.3} outside [0, 1]", confidence)
            }
        }
    }
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    pub fn centroid(&self) -> Centroid {
        self.bbox.centroid()
    }

    /// Contract check on detector output. Boxes without area would poison
    /// the IoU computation, so they never reach the tracker.
    pub fn validate(&self) -> Result<(), RejectReason> {
        if !self.bbox.has_positive_area() {
            return Err(RejectReason::NonPositiveArea {
                width: self.bbox.width(),
                height: self.bbox.height(),
            });
        }
        if !self.confidence.is_finite() {
            return Err(RejectReason::NonFiniteConfidence);
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(RejectReason::ConfidenceOutOfRange {
                confidence: self.confidence,
            });
        }
        Ok(())
    }
}

// ============================================================================
// FRAMES
// ============================================================================

/// A decoded frame: packed RGB24, row-major. `data` may be empty when the
/// source only supplies detection metadata.
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub timestamp_ms: f64,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(seq: u64, timestamp_ms: f64, data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            seq,
            timestamp_ms,
            data,
            width,
            height,
        }
    }

    /// Metadata-only frame with no pixel buffer.
    pub fn empty(seq: u64, timestamp_ms: f64) -> Self {
        Self::new(seq, timestamp_ms, Vec::new(), 0, 0)
    }

    pub fn has_image(&self) -> bool {
        !self.data.is_empty()
    }

    /// True when the buffer holds exactly `width * height` RGB pixels.
    pub fn is_rgb_consistent(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * 3
    }
}

// ============================================================================
// STREAM METADATA
// ============================================================================

/// Metadata as reported by the video source; any field may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Stream metadata after defaults have been applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StreamParams {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl StreamInfo {
    /// Missing or unusable fps falls back to `default_fps` (itself falling
    /// back to 24.0); missing dimensions become 0 and are left for the clip
    /// writer to refuse.
    pub fn resolve(&self, default_fps: f64) -> StreamParams {
        let fallback = if is_plausible_fps(default_fps) {
            default_fps
        } else {
            DEFAULT_FPS
        };
        let fps = match self.fps {
            Some(fps) if is_plausible_fps(fps) => fps,
            Some(fps) if fps.is_finite() && fps > MAX_FPS => {
                warn!(
                    "Stream reports {:.0} fps (max {:.0}), defaulting to {:.1}",
                    fps, MAX_FPS, fallback
                );
                fallback
            }
            other => {
                debug!("Stream fps {:?} unusable, defaulting to {:.1}", other, fallback);
                fallback
            }
        };
        StreamParams {
            fps,
            width: self.width.unwrap_or(0),
            height: self.height.unwrap_or(0),
        }
    }
}

fn is_plausible_fps(fps: f64) -> bool {
    fps.is_finite() && fps > 0.0 && fps <= MAX_FPS
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid_is_box_center() {
        let c = BBox::new(10, 20, 30, 60).centroid();
        assert_eq!(c, Centroid { x: 20.0, y: 40.0 });
    }

    #[test]
    fn test_iou_half_overlap_is_exactly_half() {
        let a = BBox::new(0, 0, 10, 10);
        let b = BBox::new(0, 0, 10, 20);
        assert_eq!(a.iou(&b), 0.5);
    }

    #[test]
    fn test_iou_full_i32_span_does_not_overflow() {
        let huge = BBox::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX);
        let det = Detection::new("car", 0.9, huge);
        assert!(det.validate().is_ok());
        assert_eq!(huge.iou(&huge), 1.0);

        let quarter = BBox::new(0, 0, i32::MAX, i32::MAX);
        let iou = huge.iou(&quarter);
        assert!(iou > 0.24 && iou < 0.26, "iou = {}", iou);
    }

    #[test]
    fn test_iou_touching_edges_is_zero() {
        let a = BBox::new(0, 0, 10, 10);
        let b = BBox::new(10, 0, 20, 10);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_disjoint_is_zero() {
        let a = BBox::new(0, 0, 50, 50);
        let b = BBox::new(100, 100, 200, 200);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_validate_rejects_degenerate_box() {
        let det = Detection::new("car", 0.9, BBox::new(10, 10, 10, 40));
        assert_eq!(
            det.validate(),
            Err(RejectReason::NonPositiveArea {
                width: 0,
                height: 30
            })
        );
    }

    #[test]
    fn test_validate_rejects_bad_confidence() {
        let nan = Detection::new("car", f32::NAN, BBox::new(0, 0, 5, 5));
        assert_eq!(nan.validate(), Err(RejectReason::NonFiniteConfidence));

        let high = Detection::new("car", 1.5, BBox::new(0, 0, 5, 5));
        assert!(matches!(
            high.validate(),
            Err(RejectReason::ConfidenceOutOfRange { .. })
        ));
    }

    #[test]
    fn test_stream_defaults() {
        let params = StreamInfo::default().resolve(DEFAULT_FPS);
        assert_eq!(params.fps, 24.0);
        assert_eq!(params.width, 0);
        assert_eq!(params.height, 0);

        let zero_fps = StreamInfo {
            fps: Some(0.0),
            width: Some(640),
            height: Some(480),
        };
        let params = zero_fps.resolve(DEFAULT_FPS);
        assert_eq!(params.fps, 24.0);
        assert_eq!(params.width, 640);
    }

    #[test]
    fn test_implausible_fps_falls_back() {
        let absurd = StreamInfo {
            fps: Some(1e12),
            ..StreamInfo::default()
        };
        assert_eq!(absurd.resolve(10.0).fps, 10.0);
        assert_eq!(absurd.resolve(1e9).fps, DEFAULT_FPS);

        let high_but_real = StreamInfo {
            fps: Some(MAX_FPS),
            ..StreamInfo::default()
        };
        assert_eq!(high_but_real.resolve(DEFAULT_FPS).fps, MAX_FPS);
    }
}
