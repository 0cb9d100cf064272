// src/pipeline/metrics.rs
//
// Per-session counters. Cloning shares the counters, so the background
// clip dispatcher can keep counting after the session itself is gone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct SessionMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub total_detections: Arc<AtomicU64>,
    pub rejected_detections: Arc<AtomicU64>,
    pub accident_frames: Arc<AtomicU64>,
    pub suspicious_detections: Arc<AtomicU64>,
    pub tracks_created: Arc<AtomicU64>,
    pub tracks_expired: Arc<AtomicU64>,
    pub clips_captured: Arc<AtomicU64>,
    pub clips_written: Arc<AtomicU64>,
    pub clip_write_failures: Arc<AtomicU64>,
    pub notify_successes: Arc<AtomicU64>,
    pub notify_failures: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            total_detections: Arc::new(AtomicU64::new(0)),
            rejected_detections: Arc::new(AtomicU64::new(0)),
            accident_frames: Arc::new(AtomicU64::new(0)),
            suspicious_detections: Arc::new(AtomicU64::new(0)),
            tracks_created: Arc::new(AtomicU64::new(0)),
            tracks_expired: Arc::new(AtomicU64::new(0)),
            clips_captured: Arc::new(AtomicU64::new(0)),
            clips_written: Arc::new(AtomicU64::new(0)),
            clip_write_failures: Arc::new(AtomicU64::new(0)),
            notify_successes: Arc::new(AtomicU64::new(0)),
            notify_failures: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            fps: self.fps(),
            total_detections: self.total_detections.load(Ordering::Relaxed),
            rejected_detections: self.rejected_detections.load(Ordering::Relaxed),
            accident_frames: self.accident_frames.load(Ordering::Relaxed),
            suspicious_detections: self.suspicious_detections.load(Ordering::Relaxed),
            tracks_created: self.tracks_created.load(Ordering::Relaxed),
            tracks_expired: self.tracks_expired.load(Ordering::Relaxed),
            clips_captured: self.clips_captured.load(Ordering::Relaxed),
            clips_written: self.clips_written.load(Ordering::Relaxed),
            clip_write_failures: self.clip_write_failures.load(Ordering::Relaxed),
            notify_successes: self.notify_successes.load(Ordering::Relaxed),
            notify_failures: self.notify_failures.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub fps: f64,
    pub total_detections: u64,
    pub rejected_detections: u64,
    pub accident_frames: u64,
    pub suspicious_detections: u64,
    pub tracks_created: u64,
    pub tracks_expired: u64,
    pub clips_captured: u64,
    pub clips_written: u64,
    pub clip_write_failures: u64,
    pub notify_successes: u64,
    pub notify_failures: u64,
    pub elapsed_secs: f64,
}
