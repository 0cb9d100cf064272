// src/main.rs
//
// crash-sentinel [config.yaml]
//
// Replays every detection log under `input.input_dir` as its own session.
// Sessions run on the blocking pool, at most `max_parallel_sessions` at a
// time. Per session the runner writes `annotations.jsonl` (one FrameReport
// per frame) and `events.jsonl` under `input.output_dir/<session>/`, then
// hands finished clips to the background dispatcher. The process waits for
// outstanding dispatches before exiting.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crash_sentinel::capture::ClipWriter;
use crash_sentinel::config::{Config, PipelineOptions};
use crash_sentinel::notify::{ClipDispatcher, Notifier};
use crash_sentinel::pipeline::{Session, SessionMetrics};
use crash_sentinel::replay::{find_session_logs, ReplayLog};

const DEFAULT_CONFIG: &str = "config.yaml";
const ANNOTATIONS_FILE: &str = "annotations.jsonl";
const EVENTS_FILE: &str = "events.jsonl";

struct SessionRun {
    session_id: String,
    frames: usize,
    metrics: SessionMetrics,
    dispatch: Option<JoinHandle<()>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();
    config.validate()?;

    init_tracing(&config.logging.level);
    info!("🚨 Crash Sentinel starting");
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "Thresholds: distance={:.1}px, acceleration={:.1}px/frame, collision IoU>{:.2}, suspicious conf>{:.2}",
        config.tracker.distance_threshold,
        config.classifier.acceleration_threshold,
        config.classifier.collision_iou_threshold,
        config.classifier.suspicious_confidence
    );

    let logs = find_session_logs(&config.input.input_dir)?;
    if logs.is_empty() {
        error!(
            "No detection logs found in {}",
            config.input.input_dir.display()
        );
        return Ok(());
    }

    let notifier = Notifier::from_config(&config.notify)?;
    match &notifier {
        Notifier::Webhook(webhook) => info!("📡 Notifications go to {}", webhook.url()),
        Notifier::Log => info!("📡 No webhook configured, notifications are logged only"),
    }
    let dispatcher = ClipDispatcher::new(
        Handle::current(),
        ClipWriter::new(&config.clip.output_dir, config.clip.jpeg_quality),
        notifier,
    );

    let config = Arc::new(config);
    let semaphore = Arc::new(Semaphore::new(config.input.max_parallel_sessions));
    let mut sessions = Vec::with_capacity(logs.len());

    for path in logs {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .context("Session semaphore closed")?;
        let config = Arc::clone(&config);
        let dispatcher = dispatcher.clone();
        sessions.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let result = run_session(&path, &config, &dispatcher);
            (path, result)
        }));
    }

    let mut dispatches = Vec::new();
    let mut failed = 0usize;
    for handle in sessions {
        match handle.await {
            Ok((_, Ok(run))) => {
                let summary = run.metrics.summary();
                info!(
                    "✓ [{}] {} frames ({:.0} fps), {} accident frames, {} suspicious, {} clip(s)",
                    run.session_id,
                    run.frames,
                    summary.fps,
                    summary.accident_frames,
                    summary.suspicious_detections,
                    summary.clips_captured
                );
                if let Some(dispatch) = run.dispatch {
                    dispatches.push((run.session_id, run.metrics, dispatch));
                }
            }
            Ok((path, Err(e))) => {
                failed += 1;
                error!("Failed to process {}: {:#}", path.display(), e);
            }
            Err(e) => {
                failed += 1;
                error!("Session task failed: {}", e);
            }
        }
    }

    if !dispatches.is_empty() {
        info!("Waiting for {} clip dispatch(es)", dispatches.len());
    }
    for (session_id, metrics, dispatch) in dispatches {
        if let Err(e) = dispatch.await {
            error!("[{}] Clip dispatch task failed: {}", session_id, e);
        }
        let summary = metrics.summary();
        info!(
            "[{}] Clips written: {}, write failures: {}, notifications sent: {}, failed: {}",
            session_id,
            summary.clips_written,
            summary.clip_write_failures,
            summary.notify_successes,
            summary.notify_failures
        );
    }

    if failed > 0 {
        warn!("{} session(s) failed", failed);
    }
    info!("🏁 Done");
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("crash_sentinel={},warn", level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run_session(path: &Path, config: &Config, dispatcher: &ClipDispatcher) -> Result<SessionRun> {
    let log = ReplayLog::open(path)?;
    let session_id = log.session_id().to_string();
    info!(
        "Processing {} ({} frames)",
        path.display(),
        log.len()
    );

    let mut options = config.pipeline;
    if options.clip_capture && !log.has_images() {
        info!(
            "[{}] Log carries no images, clip capture disabled",
            session_id
        );
        options.clip_capture = false;
    }

    let out_dir = config.input.output_dir.join(&session_id);
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let mut annotations = open_output(out_dir.join(ANNOTATIONS_FILE))?;
    let mut events = open_output(out_dir.join(EVENTS_FILE))?;

    Ok(replay_session(
        log,
        config,
        options,
        dispatcher,
        &mut annotations,
        &mut events,
    ))
}

/// Feed every frame of `log` through a fresh session. Output failures end
/// the stream early but never cost the session its clips: they are handed
/// to the dispatcher before anything else can go wrong.
fn replay_session(
    log: ReplayLog,
    config: &Config,
    options: PipelineOptions,
    dispatcher: &ClipDispatcher,
    annotations: &mut impl Write,
    events: &mut impl Write,
) -> SessionRun {
    let session_id = log.session_id().to_string();
    let mut session = Session::with_options(&session_id, config, log.stream_info(), options);
    let truncated_at = log.truncated_at();
    let mut frames = 0usize;

    for (frame, detections) in log.frames() {
        let report = session.process_frame(frame, detections);
        frames += 1;
        let written = write_line(&mut *annotations, &report).and_then(|_| {
            session
                .drain_events()
                .iter()
                .try_for_each(|e| write_line(&mut *events, e))
        });
        // Output trouble closes the stream early; the session still finalizes
        if let Err(e) = written {
            error!("[{}] Stopping at frame {}: {:#}", session_id, report.seq, e);
            break;
        }
    }
    if let Some(line) = truncated_at {
        warn!(
            "[{}] Log ended early at line {}, finalizing with {} frames",
            session_id, line, frames
        );
    }

    let outcome = session.finish();
    let dispatch = dispatcher.dispatch(&session_id, outcome.clips, outcome.metrics.clone());

    let flushed = outcome
        .events
        .iter()
        .try_for_each(|e| write_line(&mut *events, e))
        .and_then(|_| annotations.flush().context("Failed to flush annotations"))
        .and_then(|_| events.flush().context("Failed to flush events"));
    if let Err(e) = flushed {
        error!("[{}] Session output incomplete: {:#}", session_id, e);
    }

    SessionRun {
        session_id,
        frames,
        metrics: outcome.metrics,
        dispatch,
    }
}

fn open_output(path: PathBuf) -> Result<BufWriter<File>> {
    let file =
        File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn write_line<T: Serialize>(out: &mut impl Write, record: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, record)?;
    out.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crash_sentinel::capture::ClipWriter;
    use std::io;
    use uuid::Uuid;

    /// Rejects every write, like a full disk.
    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "No space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "No space left on device"))
        }
    }

    fn colliding_log(dir: &Path, frames: u64) -> PathBuf {
        image::RgbImage::from_pixel(4, 2, image::Rgb([40, 40, 40]))
            .save(dir.join("f.png"))
            .unwrap();
        let det = r#"{"label": "car", "confidence": 0.9, "bbox": {"x1": 0, "y1": 0, "x2": 2, "y2": 2}}"#;
        let mut log = String::from("{\"meta\": {\"fps\": 10.0, \"width\": 4, \"height\": 2}}\n");
        for seq in 0..frames {
            log.push_str(&format!(
                "{{\"seq\": {}, \"image\": \"f.png\", \"detections\": [{}, {}]}}\n",
                seq, det, det
            ));
        }
        let path = dir.join("crash.jsonl");
        fs::write(&path, log).unwrap();
        path
    }

    #[tokio::test]
    async fn test_output_failure_still_dispatches_clips() {
        let dir = std::env::temp_dir().join(format!("crash-sentinel-test-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let log = ReplayLog::open(colliding_log(&dir, 40)).unwrap();

        let config = Config::default();
        let dispatcher = ClipDispatcher::new(
            Handle::current(),
            ClipWriter::new(dir.join("clips"), 80),
            Notifier::Log,
        );
        let mut events = Vec::new();
        let run = replay_session(
            log,
            &config,
            config.pipeline,
            &dispatcher,
            &mut FullDisk,
            &mut events,
        );

        // Stream closed at the first failed write, clip kept anyway
        assert_eq!(run.frames, 1);
        let handle = run.dispatch.expect("clip must be dispatched");
        handle.await.unwrap();
        let summary = run.metrics.summary();
        assert_eq!(summary.clips_captured, 1);
        assert_eq!(summary.clips_written, 1);
        assert_eq!(summary.notify_successes, 1);

        fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_replay_writes_reports_and_events() {
        let dir = std::env::temp_dir().join(format!("crash-sentinel-test-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let log = ReplayLog::open(colliding_log(&dir, 3)).unwrap();

        let config = Config::default();
        let dispatcher = ClipDispatcher::new(
            Handle::current(),
            ClipWriter::new(dir.join("clips"), 80),
            Notifier::Log,
        );
        let (mut annotations, mut events) = (Vec::new(), Vec::new());
        let run = replay_session(
            log,
            &config,
            config.pipeline,
            &dispatcher,
            &mut annotations,
            &mut events,
        );
        assert_eq!(run.frames, 3);
        run.dispatch.expect("clip must be dispatched").await.unwrap();

        let reports = String::from_utf8(annotations).unwrap();
        assert_eq!(reports.lines().count(), 3);
        let events = String::from_utf8(events).unwrap();
        assert!(events.contains("\"event\":\"clip_finalized\""));

        fs::remove_dir_all(dir).ok();
    }
}
