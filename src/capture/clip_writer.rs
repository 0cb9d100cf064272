// src/capture/clip_writer.rs
//
// Persists a finished clip as a directory of JPEG frames plus a JSON
// manifest carrying fps and geometry, which is everything a downstream
// muxer needs to produce a playable video.
//
// Zero-dimension clips are refused outright: they come from streams that
// never reported their size, and encoding them would produce garbage.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::clip_buffer::Clip;

pub const MANIFEST_FILE: &str = "clip.json";

/// Where a persisted clip lives; handed to the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClipLocator(pub PathBuf);

impl fmt::Display for ClipLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipManifest {
    pub clip_id: Uuid,
    pub session_id: String,
    pub trigger_seq: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Sequence numbers of the frames written, in file order
    pub frame_seqs: Vec<u64>,
    pub created_at: DateTime<Utc>,
}

pub struct ClipWriter {
    output_dir: PathBuf,
    jpeg_quality: u8,
}

impl ClipWriter {
    pub fn new(output_dir: impl Into<PathBuf>, jpeg_quality: u8) -> Self {
        Self {
            output_dir: output_dir.into(),
            jpeg_quality,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn write(&self, session_id: &str, clip: &Clip) -> Result<ClipLocator> {
        if clip.width == 0 || clip.height == 0 {
            bail!(
                "Clip {} has zero dimensions ({}x{}), refusing to encode",
                clip.clip_id,
                clip.width,
                clip.height
            );
        }
        if clip.is_empty() {
            bail!("Clip {} has no frames", clip.clip_id);
        }

        let dir = self.output_dir.join(format!("{}_{}", session_id, clip.clip_id));
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create clip directory {}", dir.display()))?;

        let mut frame_seqs = Vec::with_capacity(clip.len());
        for frame in &clip.frames {
            if frame.width != clip.width || frame.height != clip.height || !frame.is_rgb_consistent()
            {
                warn!(
                    "Clip {}: frame {} is {}x{} with {} bytes, expected {}x{}; skipped",
                    clip.clip_id,
                    frame.seq,
                    frame.width,
                    frame.height,
                    frame.data.len(),
                    clip.width,
                    clip.height
                );
                continue;
            }
            let Some(jpeg) =
                encode_rgb_to_jpeg(&frame.data, frame.width, frame.height, self.jpeg_quality)
            else {
                warn!("Clip {}: frame {} failed to encode; skipped", clip.clip_id, frame.seq);
                continue;
            };
            let path = dir.join(frame_file_name(frame_seqs.len()));
            fs::write(&path, &jpeg)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            frame_seqs.push(frame.seq);
        }

        if frame_seqs.is_empty() {
            bail!(
                "Clip {}: none of {} frames could be encoded",
                clip.clip_id,
                clip.len()
            );
        }

        let manifest = ClipManifest {
            clip_id: clip.clip_id,
            session_id: session_id.to_string(),
            trigger_seq: clip.trigger_seq,
            fps: clip.fps,
            width: clip.width,
            height: clip.height,
            frame_seqs,
            created_at: Utc::now(),
        };
        let manifest_path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(&manifest)?;
        fs::write(&manifest_path, json)
            .with_context(|| format!("Failed to write {}", manifest_path.display()))?;

        info!(
            "Clip {} written: {} frames @ {:.1} fps ({}x{}) -> {}",
            clip.clip_id,
            manifest.frame_seqs.len(),
            clip.fps,
            clip.width,
            clip.height,
            dir.display()
        );
        Ok(ClipLocator(dir))
    }
}

pub fn frame_file_name(index: usize) -> String {
    format!("frame_{:05}.jpg", index)
}

/// Encode raw RGB bytes into a JPEG. Returns None on failure.
pub fn encode_rgb_to_jpeg(rgb_data: &[u8], width: u32, height: u32, quality: u8) -> Option<Vec<u8>> {
    use image::{ImageBuffer, RgbImage};

    let img: RgbImage = ImageBuffer::from_raw(width, height, rgb_data.to_vec())?;

    let mut buf = std::io::Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    if let Err(e) = img.write_with_encoder(encoder) {
        debug!("JPEG encode failed: {}", e);
        return None;
    }
    Some(buf.into_inner())
}
