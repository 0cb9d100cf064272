// src/notify.rs
//
// Alert delivery for persisted clips.
//
// The pipeline only builds a `NotificationRequest`; where it goes is up to
// the configured `Notifier`. Failures come back as errors for the caller to
// log. Nothing here retries.

use anyhow::{bail, Context, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::capture::clip_writer::encode_rgb_to_jpeg;
use crate::capture::{Clip, ClipLocator, ClipWriter};
use crate::config::NotifyConfig;
use crate::pipeline::SessionMetrics;

const SUBJECT: &str = "Accident Detected by EagleEye_Vision";
const THUMBNAIL_QUALITY: u8 = 70;

// ============================================================================
// REQUEST
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct NotificationRequest {
    /// Unique id for correlating deliveries
    pub event_id: Uuid,
    pub session_id: String,
    pub clip_id: Uuid,
    pub clip_locator: ClipLocator,
    pub frame_count: usize,
    pub fps: f64,
    pub trigger_seq: u64,
    pub detected_at: DateTime<Utc>,
    pub subject: String,
    pub body: String,
    /// Trigger frame as base64 JPEG, when it could be encoded
    pub thumbnail_jpeg_base64: Option<String>,
}

impl NotificationRequest {
    pub fn new(session_id: &str, clip: &Clip, clip_locator: ClipLocator) -> Self {
        let thumbnail_jpeg_base64 = clip
            .trigger_frame()
            .filter(|f| f.is_rgb_consistent() && f.has_image())
            .and_then(|f| encode_rgb_to_jpeg(&f.data, f.width, f.height, THUMBNAIL_QUALITY))
            .map(|jpeg| base64::engine::general_purpose::STANDARD.encode(jpeg));

        // Alert e-mail wording; the clip is referenced by locator, not attached
        let body = format!(
            "Dear User,\n\n\
             An accident was detected by EagleEye_Vision in session {} at frame {}. \
             See the video clip for details: {} ({} frames @ {:.1} fps).\n\n\
             Regards,\nEagleEye_Vision Alert",
            session_id,
            clip.trigger_seq,
            clip_locator,
            clip.len(),
            clip.fps
        );

        Self {
            event_id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            clip_id: clip.clip_id,
            clip_locator,
            frame_count: clip.len(),
            fps: clip.fps,
            trigger_seq: clip.trigger_seq,
            detected_at: Utc::now(),
            subject: SUBJECT.to_string(),
            body,
            thumbnail_jpeg_base64,
        }
    }
}

// ============================================================================
// NOTIFIERS
// ============================================================================

pub enum Notifier {
    /// Log the request and nothing else
    Log,
    Webhook(WebhookNotifier),
}

impl Notifier {
    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        match config.webhook_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(Self::Webhook(WebhookNotifier::new(
                url.to_string(),
                config.timeout_secs,
            )?)),
            _ => Ok(Self::Log),
        }
    }

    pub async fn notify(&self, request: &NotificationRequest) -> Result<()> {
        match self {
            Self::Log => {
                info!(
                    "📣 {}: session={} clip={} ({} frames) at {}",
                    request.subject,
                    request.session_id,
                    request.clip_id,
                    request.frame_count,
                    request.clip_locator
                );
                Ok(())
            }
            Self::Webhook(webhook) => webhook.send(request).await,
        }
    }
}

pub struct WebhookNotifier {
    http_client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout_secs: u64) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http_client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn send(&self, request: &NotificationRequest) -> Result<()> {
        debug!(
            "Sending notification {} for clip {} to {}",
            request.event_id, request.clip_id, self.url
        );

        let response = self
            .http_client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("Notification request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            bail!("Notification endpoint returned {}: {}", status, body);
        }

        info!(
            "📣 Notification {} delivered for clip {}",
            request.event_id, request.clip_id
        );
        Ok(())
    }
}

// ============================================================================
// DISPATCH
// ============================================================================

/// Persists finished clips and sends their notifications in the background.
/// The caller gets a handle back immediately and may drop it.
#[derive(Clone)]
pub struct ClipDispatcher {
    runtime: Handle,
    writer: Arc<ClipWriter>,
    notifier: Arc<Notifier>,
}

impl ClipDispatcher {
    pub fn new(runtime: Handle, writer: ClipWriter, notifier: Notifier) -> Self {
        Self {
            runtime,
            writer: Arc::new(writer),
            notifier: Arc::new(notifier),
        }
    }

    pub fn dispatch(
        &self,
        session_id: &str,
        clips: Vec<Clip>,
        metrics: SessionMetrics,
    ) -> Option<JoinHandle<()>> {
        if clips.is_empty() {
            debug!("[{}] No clips to dispatch", session_id);
            return None;
        }

        info!("[{}] Dispatching {} clip(s)", session_id, clips.len());
        let session_id = session_id.to_string();
        let writer = Arc::clone(&self.writer);
        let notifier = Arc::clone(&self.notifier);

        Some(self.runtime.spawn(async move {
            for clip in clips {
                deliver(&session_id, clip, &writer, &notifier, &metrics).await;
            }
        }))
    }
}

async fn deliver(
    session_id: &str,
    clip: Clip,
    writer: &Arc<ClipWriter>,
    notifier: &Notifier,
    metrics: &SessionMetrics,
) {
    let clip_id = clip.clip_id;
    let writer = Arc::clone(writer);
    let sid = session_id.to_string();

    // JPEG encoding is CPU-bound
    let written = tokio::task::spawn_blocking(move || -> Result<NotificationRequest> {
        let locator = writer.write(&sid, &clip)?;
        Ok(NotificationRequest::new(&sid, &clip, locator))
    })
    .await;

    let request = match written {
        Ok(Ok(request)) => {
            metrics.inc(&metrics.clips_written);
            request
        }
        Ok(Err(e)) => {
            metrics.inc(&metrics.clip_write_failures);
            error!("[{}] Failed to write clip {}: {:#}", session_id, clip_id, e);
            return;
        }
        Err(e) => {
            metrics.inc(&metrics.clip_write_failures);
            error!("[{}] Clip {} writer task failed: {}", session_id, clip_id, e);
            return;
        }
    };

    match notifier.notify(&request).await {
        Ok(()) => metrics.inc(&metrics.notify_successes),
        Err(e) => {
            metrics.inc(&metrics.notify_failures);
            error!(
                "[{}] Notification for clip {} failed: {:#}",
                session_id, clip_id, e
            );
        }
    }
}
