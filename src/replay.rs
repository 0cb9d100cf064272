// src/replay.rs
//
// Detection-log frame source. A session is a JSON-lines file:
//
//   {"meta": {"fps": 10.0, "width": 640, "height": 480}}      optional, first line
//   {"seq": 0, "timestamp_ms": 0.0, "image": "f0.png", "detections": [...]}
//   ...
//
// Image paths are relative to the log file. A malformed line ends the
// stream at that point, like a caller hanging up mid-upload; everything
// before it is still replayed.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::types::{Detection, Frame, StreamInfo, DEFAULT_FPS};

const LOG_EXTENSION: &str = "jsonl";

#[derive(Debug, Clone, Deserialize)]
struct MetaRecord {
    meta: StreamInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameRecord {
    pub seq: u64,
    #[serde(default)]
    pub timestamp_ms: Option<f64>,
    #[serde(default)]
    pub image: Option<PathBuf>,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

pub struct ReplayLog {
    path: PathBuf,
    session_id: String,
    stream: StreamInfo,
    records: Vec<FrameRecord>,
    /// 1-based line number of the first malformed line, if any
    truncated_at: Option<usize>,
}

impl ReplayLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read detection log {}", path.display()))?;
        let session_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "session".to_string());
        let mut log = Self::parse(&contents, session_id);
        log.path = path.to_path_buf();
        log.fill_dimensions_from_image();
        Ok(log)
    }

    /// Parse log contents. Never fails; see `truncated_at`.
    pub fn parse(contents: &str, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let mut stream = StreamInfo::default();
        let mut records = Vec::new();
        let mut truncated_at = None;

        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if records.is_empty() {
                if let Ok(meta) = serde_json::from_str::<MetaRecord>(line) {
                    stream = meta.meta;
                    continue;
                }
            }
            match serde_json::from_str::<FrameRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        "[{}] Line {} is malformed ({}), treating as end of stream",
                        session_id,
                        idx + 1,
                        e
                    );
                    truncated_at = Some(idx + 1);
                    break;
                }
            }
        }

        debug!(
            "[{}] Parsed {} frame records, meta={:?}",
            session_id,
            records.len(),
            stream
        );
        Self {
            path: PathBuf::new(),
            session_id,
            stream,
            records,
            truncated_at,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stream_info(&self) -> StreamInfo {
        self.stream
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn truncated_at(&self) -> Option<usize> {
        self.truncated_at
    }

    /// Whether any frame references an image. Without images there is
    /// nothing to put in a clip.
    pub fn has_images(&self) -> bool {
        self.records.iter().any(|r| r.image.is_some())
    }

    /// Frames in log order with their raw detections. Images are decoded
    /// lazily; an unreadable image yields a frame without pixels.
    pub fn frames(self) -> impl Iterator<Item = (Frame, Vec<Detection>)> {
        let base_dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let fps = self
            .stream
            .fps
            .filter(|f| f.is_finite() && *f > 0.0)
            .unwrap_or(DEFAULT_FPS);
        let session_id = self.session_id;

        self.records.into_iter().map(move |record| {
            let timestamp_ms = record
                .timestamp_ms
                .unwrap_or(record.seq as f64 * 1000.0 / fps);
            let frame = match &record.image {
                Some(image) => load_frame(&base_dir.join(image), record.seq, timestamp_ms)
                    .unwrap_or_else(|e| {
                        warn!("[{}] Frame {}: {:#}", session_id, record.seq, e);
                        Frame::empty(record.seq, timestamp_ms)
                    }),
                None => Frame::empty(record.seq, timestamp_ms),
            };
            (frame, record.detections)
        })
    }

    fn fill_dimensions_from_image(&mut self) {
        if self.stream.width.is_some() && self.stream.height.is_some() {
            return;
        }
        let base_dir = self.path.parent().unwrap_or_else(|| Path::new(""));
        let Some(first) = self.records.iter().find_map(|r| r.image.as_ref()) else {
            return;
        };
        match image::image_dimensions(base_dir.join(first)) {
            Ok((width, height)) => {
                debug!(
                    "[{}] Dimensions not in meta, using first image: {}x{}",
                    self.session_id, width, height
                );
                self.stream.width.get_or_insert(width);
                self.stream.height.get_or_insert(height);
            }
            Err(e) => debug!("[{}] Could not probe {}: {}", self.session_id, first.display(), e),
        }
    }
}

fn load_frame(path: &Path, seq: u64, timestamp_ms: f64) -> Result<Frame> {
    let img = image::open(path)
        .with_context(|| format!("Failed to load image {}", path.display()))?
        .to_rgb8();
    let (width, height) = img.dimensions();
    Ok(Frame::new(seq, timestamp_ms, img.into_raw(), width, height))
}

/// All `*.jsonl` detection logs under `dir`, sorted.
pub fn find_session_logs(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        anyhow::bail!("Input directory {} does not exist", dir.display());
    }

    let mut logs: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(LOG_EXTENSION))
        })
        .collect();
    logs.sort();

    info!("Found {} detection log(s) in {}", logs.len(), dir.display());
    Ok(logs)
}
