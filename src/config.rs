// src/config.rs
//
// YAML configuration. Every section has defaults, so a partial file (or no
// section at all) yields the documented behaviour.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::DEFAULT_FPS;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tracker: TrackerConfig,
    pub classifier: ClassifierConfig,
    pub clip: ClipConfig,
    pub pipeline: PipelineOptions,
    pub notify: NotifyConfig,
    pub input: InputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Maximum centroid distance (pixels, exclusive) for a detection to
    /// continue an existing track
    pub distance_threshold: f64,
    /// Consecutive non-empty updates a track may go unmatched before it is
    /// dropped. `None` keeps tracks for the whole session.
    pub max_missed_frames: Option<u32>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 50.0,
            max_missed_frames: Some(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// |v2 - v1| in pixels/frame above which a track is flagged
    pub acceleration_threshold: f64,
    /// IoU above which two boxes in the same frame count as a collision
    pub collision_iou_threshold: f64,
    /// Labels treated as restricted objects
    pub suspicious_labels: Vec<String>,
    /// Confidence above which a restricted label is flagged
    pub suspicious_confidence: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            acceleration_threshold: 15.0,
            collision_iou_threshold: 0.5,
            suspicious_labels: ["gun", "knife", "backpack", "suspicious_bag", "explosive_device"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            suspicious_confidence: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipConfig {
    pub pre_window_seconds: f64,
    pub post_window_seconds: f64,
    /// Used when the stream reports no usable fps
    pub default_fps: f64,
    /// Allow a new capture episode once the previous one has settled
    pub rearm: bool,
    pub output_dir: PathBuf,
    pub jpeg_quality: u8,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            pre_window_seconds: 5.0,
            post_window_seconds: 5.0,
            default_fps: DEFAULT_FPS,
            rearm: false,
            output_dir: PathBuf::from("output/clips"),
            jpeg_quality: 85,
        }
    }
}

/// Which stages a session runs. Each stage can be switched off
/// independently; the session wires whatever remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub tracking: bool,
    pub classification: bool,
    pub clip_capture: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            tracking: true,
            classification: true,
            clip_capture: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// POST target for clip notifications; log-only when unset
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_parallel_sessions: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("sessions"),
            output_dir: PathBuf::from("output"),
            max_parallel_sessions: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides, applied after the file is loaded.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("CRASH_SENTINEL_WEBHOOK_URL") {
            self.notify.webhook_url = Some(url).filter(|u| !u.is_empty());
        }
        if let Ok(dir) = std::env::var("CRASH_SENTINEL_INPUT_DIR") {
            self.input.input_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.tracker;
        if !t.distance_threshold.is_finite() || t.distance_threshold <= 0.0 {
            bail!(
                "tracker.distance_threshold must be positive, got {}",
                t.distance_threshold
            );
        }

        let c = &self.classifier;
        if !c.acceleration_threshold.is_finite() || c.acceleration_threshold < 0.0 {
            bail!(
                "classifier.acceleration_threshold must be non-negative, got {}",
                c.acceleration_threshold
            );
        }
        if !(0.0..=1.0).contains(&c.collision_iou_threshold) {
            bail!(
                "classifier.collision_iou_threshold must be within [0, 1], got {}",
                c.collision_iou_threshold
            );
        }
        if !(0.0..=1.0).contains(&c.suspicious_confidence) {
            bail!(
                "classifier.suspicious_confidence must be within [0, 1], got {}",
                c.suspicious_confidence
            );
        }

        let clip = &self.clip;
        for (name, value) in [
            ("clip.pre_window_seconds", clip.pre_window_seconds),
            ("clip.post_window_seconds", clip.post_window_seconds),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{} must be non-negative, got {}", name, value);
            }
        }
        if !(1..=100).contains(&clip.jpeg_quality) {
            bail!("clip.jpeg_quality must be within 1..=100, got {}", clip.jpeg_quality);
        }

        if self.input.max_parallel_sessions == 0 {
            bail!("input.max_parallel_sessions must be at least 1");
        }
        Ok(())
    }
}
