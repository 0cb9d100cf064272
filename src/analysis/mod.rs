// src/analysis/mod.rs
//
// Per-frame analysis stages.
//
// Signal flow:
//   Detections → object_tracker → TrackedDetection → event_classifier → EventFlags
//
// The tracker owns all temporal state; the classifier only reads the
// centroid history it is handed.

pub mod event_classifier;
pub mod object_tracker;

pub use event_classifier::{EventClassifier, EventFlags, TrackedDetection};
pub use object_tracker::{ObjectTracker, Track, TrackerUpdate};
