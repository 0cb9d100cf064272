// src/pipeline/session.rs
//
// One video stream, end to end.
//
//   raw detections ─▶ validate ─▶ ObjectTracker ─▶ EventClassifier
//                                                        │
//                                    frame ─▶ ClipBuffer ◀┘ any accident
//
// Every stage is optional (`PipelineOptions`):
//   - no tracking:        classifier runs without history (no acceleration rule)
//   - no classification:  any valid detection triggers capture (event-model mode)
//   - no clip capture:    frames are dropped after the report is built
//
// `process_frame` never fails. Bad detections end up in the report, not
// in an error. All state belongs to the session; nothing is shared.

use tracing::{debug, info, warn};

use super::event_bus::{EventBus, PipelineEvent};
use super::frame_context::{AnnotatedDetection, CaptureStatus, FrameReport, RejectedDetection};
use super::metrics::SessionMetrics;
use crate::analysis::{EventClassifier, EventFlags, ObjectTracker, TrackedDetection};
use crate::capture::{Clip, ClipBuffer, ClipPhase, ClipTransition};
use crate::config::{Config, PipelineOptions};
use crate::types::{Detection, Frame, StreamInfo, StreamParams, TrackId};

const MAX_PENDING_EVENTS: usize = 4096;

/// What is left once a session has seen its last frame.
pub struct SessionOutcome {
    pub session_id: String,
    pub clips: Vec<Clip>,
    /// Events still pending at finish, clip finalization included
    pub events: Vec<PipelineEvent>,
    pub metrics: SessionMetrics,
}

pub struct Session {
    id: String,
    options: PipelineOptions,
    params: StreamParams,
    tracker: Option<ObjectTracker>,
    classifier: Option<EventClassifier>,
    clip_buffer: Option<ClipBuffer>,
    events: EventBus,
    metrics: SessionMetrics,
    last_seq: Option<u64>,
}

impl Session {
    pub fn new(id: impl Into<String>, config: &Config, stream: StreamInfo) -> Self {
        Self::with_options(id, config, stream, config.pipeline)
    }

    pub fn with_options(
        id: impl Into<String>,
        config: &Config,
        stream: StreamInfo,
        options: PipelineOptions,
    ) -> Self {
        let id = id.into();
        let params = stream.resolve(config.clip.default_fps);

        let tracker = options
            .tracking
            .then(|| ObjectTracker::new(config.tracker.clone()));
        let classifier = options
            .classification
            .then(|| EventClassifier::new(&config.classifier));
        let clip_buffer = options
            .clip_capture
            .then(|| ClipBuffer::new(&config.clip, params));

        if options.clip_capture && !options.classification {
            info!(
                "[{}] Classification disabled: every detection counts as an accident",
                id
            );
        }
        info!(
            "[{}] Session started: {:.1} fps, {}x{}, tracking={}, classification={}, clip_capture={}",
            id,
            params.fps,
            params.width,
            params.height,
            options.tracking,
            options.classification,
            options.clip_capture
        );

        Self {
            id,
            options,
            params,
            tracker,
            classifier,
            clip_buffer,
            events: EventBus::new(MAX_PENDING_EVENTS),
            metrics: SessionMetrics::new(),
            last_seq: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    pub fn params(&self) -> StreamParams {
        self.params
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn tracker(&self) -> Option<&ObjectTracker> {
        self.tracker.as_ref()
    }

    pub fn drain_events(&mut self) -> Vec<PipelineEvent> {
        self.events.drain()
    }

    pub fn capture_status(&self) -> CaptureStatus {
        match self.clip_buffer.as_ref().map(ClipBuffer::phase) {
            None => CaptureStatus::Disabled,
            Some(ClipPhase::Idle) => CaptureStatus::Idle,
            Some(ClipPhase::Capturing { .. }) => CaptureStatus::Capturing,
            Some(ClipPhase::Settled) => CaptureStatus::Settled,
            Some(ClipPhase::Finalized) => CaptureStatus::Finalized,
        }
    }

    pub fn process_frame(&mut self, frame: Frame, detections: Vec<Detection>) -> FrameReport {
        let seq = frame.seq;
        let timestamp_ms = frame.timestamp_ms;

        if let Some(last) = self.last_seq {
            if seq <= last {
                warn!(
                    "[{}] Frame {} arrived after frame {}, processing in arrival order",
                    self.id, seq, last
                );
            }
        }
        self.last_seq = Some(seq);

        self.metrics.inc(&self.metrics.total_frames);
        self.metrics
            .add(&self.metrics.total_detections, detections.len() as u64);

        let (valid, rejected) = self.validate(seq, detections);

        // Tracking
        let track_ids: Vec<Option<TrackId>> = match self.tracker.as_mut() {
            Some(tracker) => {
                let update = tracker.update_detailed(&valid);
                for id in &update.created {
                    let label = tracker.get(*id).map(|t| t.label.clone()).unwrap_or_default();
                    self.events.publish(PipelineEvent::TrackCreated {
                        seq,
                        track_id: *id,
                        label,
                    });
                }
                for id in &update.expired {
                    self.events
                        .publish(PipelineEvent::TrackExpired { seq, track_id: *id });
                }
                self.metrics
                    .add(&self.metrics.tracks_created, update.created.len() as u64);
                self.metrics
                    .add(&self.metrics.tracks_expired, update.expired.len() as u64);
                update.assignments.into_iter().map(Some).collect()
            }
            None => vec![None; valid.len()],
        };

        // Classification
        let flags: Vec<EventFlags> = match self.classifier.as_ref() {
            Some(classifier) => {
                let tracked: Vec<TrackedDetection> = valid
                    .iter()
                    .zip(&track_ids)
                    .map(|(detection, track_id)| TrackedDetection {
                        detection,
                        track_id: *track_id,
                        history: match (self.tracker.as_ref(), track_id) {
                            (Some(tracker), Some(id)) => tracker.history(*id),
                            _ => &[],
                        },
                    })
                    .collect();
                classifier.classify(&tracked)
            }
            None => vec![EventFlags::default(); valid.len()],
        };

        let annotations: Vec<AnnotatedDetection> = valid
            .into_iter()
            .zip(track_ids)
            .zip(flags)
            .map(|((detection, track_id), flags)| AnnotatedDetection {
                detection,
                track_id,
                flags,
            })
            .collect();

        let any_accident = if self.classifier.is_some() {
            annotations.iter().any(|a| a.flags.is_accident)
        } else {
            self.clip_buffer.is_some() && !annotations.is_empty()
        };
        self.publish_flags(seq, timestamp_ms, &annotations, any_accident);

        // Clip capture
        match self.clip_buffer.as_mut() {
            Some(buffer) => match buffer.push(frame, any_accident) {
                ClipTransition::None => {}
                ClipTransition::Started {
                    clip_id,
                    pre_event_frames,
                    ..
                } => self.events.publish(PipelineEvent::ClipStarted {
                    seq,
                    clip_id,
                    pre_event_frames,
                }),
                ClipTransition::Settled { clip_id, frames } => {
                    self.events.publish(PipelineEvent::ClipSettled {
                        seq,
                        clip_id,
                        frames,
                    })
                }
            },
            None => drop(frame),
        }

        FrameReport {
            seq,
            timestamp_ms,
            annotations,
            rejected,
            any_accident,
            capture: self.capture_status(),
        }
    }

    /// End of stream, normal or early. Closes whatever clip content exists
    /// and releases the frame buffers.
    pub fn finish(mut self) -> SessionOutcome {
        let clips = match self.clip_buffer.as_mut() {
            Some(buffer) => buffer.finalize(),
            None => Vec::new(),
        };

        for clip in &clips {
            self.events.publish(PipelineEvent::ClipFinalized {
                clip_id: clip.clip_id,
                trigger_seq: clip.trigger_seq,
                frames: clip.len(),
            });
        }
        self.metrics
            .add(&self.metrics.clips_captured, clips.len() as u64);

        let summary = self.metrics.summary();
        info!(
            "[{}] Session finished: {} frames, {} detections ({} rejected), {} accident frames, {} tracks, {} clip(s)",
            self.id,
            summary.total_frames,
            summary.total_detections,
            summary.rejected_detections,
            summary.accident_frames,
            summary.tracks_created,
            clips.len()
        );
        if clips.is_empty() {
            debug!("[{}] No accident captured, nothing to persist", self.id);
        }

        SessionOutcome {
            session_id: self.id,
            clips,
            events: self.events.drain(),
            metrics: self.metrics,
        }
    }

    fn validate(
        &mut self,
        seq: u64,
        detections: Vec<Detection>,
    ) -> (Vec<Detection>, Vec<RejectedDetection>) {
        let mut valid = Vec::with_capacity(detections.len());
        let mut rejected = Vec::new();
        for (index, det) in detections.into_iter().enumerate() {
            match det.validate() {
                Ok(()) => valid.push(det),
                Err(reason) => {
                    warn!(
                        "[{}] Frame {}: rejected detection #{} '{}': {}",
                        self.id, seq, index, det.label, reason
                    );
                    self.metrics.inc(&self.metrics.rejected_detections);
                    self.events.publish(PipelineEvent::DetectionRejected {
                        seq,
                        index,
                        reason,
                    });
                    rejected.push(RejectedDetection { index, reason });
                }
            }
        }
        (valid, rejected)
    }

    fn publish_flags(
        &mut self,
        seq: u64,
        timestamp_ms: f64,
        annotations: &[AnnotatedDetection],
        any_accident: bool,
    ) {
        for a in annotations.iter().filter(|a| a.flags.is_suspicious) {
            self.metrics.inc(&self.metrics.suspicious_detections);
            self.events.publish(PipelineEvent::SuspiciousObject {
                seq,
                track_id: a.track_id,
                label: a.detection.label.clone(),
                confidence: a.detection.confidence,
            });
        }

        if any_accident {
            self.metrics.inc(&self.metrics.accident_frames);
            let flagged: Vec<&AnnotatedDetection> = if self.classifier.is_some() {
                annotations.iter().filter(|a| a.flags.is_accident).collect()
            } else {
                annotations.iter().collect()
            };
            self.events.publish(PipelineEvent::AccidentFlagged {
                seq,
                timestamp_ms,
                track_ids: flagged.iter().filter_map(|a| a.track_id).collect(),
                detections: flagged.len(),
            });
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BBox;

    fn det(label: &str, confidence: f32, x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection::new(label, confidence, BBox::new(x1, y1, x2, y2))
    }

    fn frame(seq: u64) -> Frame {
        Frame::new(seq, seq as f64 * 100.0, vec![0u8; 4 * 2 * 3], 4, 2)
    }

    fn stream(fps: f64) -> StreamInfo {
        StreamInfo {
            fps: Some(fps),
            width: Some(4),
            height: Some(2),
        }
    }

    fn quiet() -> Vec<Detection> {
        vec![det("car", 0.9, 100, 100, 140, 140)]
    }

    fn collision() -> Vec<Detection> {
        vec![
            det("car", 0.9, 100, 100, 140, 140),
            det("car", 0.9, 100, 100, 140, 140),
        ]
    }

    #[test]
    fn test_zero_detection_stream_stays_idle() {
        let mut session = Session::new("s", &Config::default(), stream(10.0));
        for seq in 0..20 {
            let report = session.process_frame(frame(seq), Vec::new());
            assert!(report.annotations.is_empty());
            assert!(!report.any_accident);
            assert_eq!(report.capture, CaptureStatus::Idle);
        }
        assert_eq!(session.tracker().map(|t| t.tracks_created()), Some(0));
        let outcome = session.finish();
        assert!(outcome.clips.is_empty());
        assert_eq!(outcome.metrics.summary().total_frames, 20);
    }

    #[test]
    fn test_full_capture_scenario() {
        // pre = post = 5 s at 10 fps: 50 + 1 + 50 frames
        let mut session = Session::new("s", &Config::default(), stream(10.0));
        for seq in 0..60 {
            session.process_frame(frame(seq), quiet());
        }
        let report = session.process_frame(frame(60), collision());
        assert!(report.any_accident);
        assert_eq!(report.capture, CaptureStatus::Capturing);
        assert!(report.annotations.iter().all(|a| a.flags.is_accident));
        for seq in 61..121 {
            session.process_frame(frame(seq), quiet());
        }
        let events = session.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::ClipSettled {
                seq: 110,
                frames: 101,
                ..
            }
        )));

        let outcome = session.finish();
        assert_eq!(outcome.clips.len(), 1);
        let clip = &outcome.clips[0];
        assert_eq!(clip.len(), 101);
        assert_eq!(clip.trigger_seq, 60);
        assert_eq!(clip.frames.first().map(|f| f.seq), Some(10));
        assert_eq!(clip.frames.last().map(|f| f.seq), Some(110));
        assert_eq!((clip.width, clip.height), (4, 2));
        assert!(matches!(
            outcome.events.as_slice(),
            [PipelineEvent::ClipFinalized { frames: 101, .. }]
        ));
    }

    #[test]
    fn test_rejected_detections_are_reported() {
        let mut session = Session::new("s", &Config::default(), stream(10.0));
        let report = session.process_frame(
            frame(0),
            vec![
                det("car", 0.9, 0, 0, 10, 10),
                det("car", 0.9, 10, 10, 10, 20),
                det("car", f32::NAN, 0, 0, 10, 10),
                det("car", 1.5, 50, 50, 60, 60),
            ],
        );
        assert_eq!(report.annotations.len(), 1);
        let indices: Vec<usize> = report.rejected.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(session.metrics().summary().rejected_detections, 3);

        let rejected_events = session
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, PipelineEvent::DetectionRejected { .. }))
            .count();
        assert_eq!(rejected_events, 3);
    }

    #[test]
    fn test_track_ids_follow_objects() {
        let mut session = Session::new("s", &Config::default(), stream(10.0));
        let first = session.process_frame(
            frame(0),
            vec![det("car", 0.9, 0, 0, 20, 20), det("person", 0.9, 300, 300, 320, 340)],
        );
        let second = session.process_frame(
            frame(1),
            vec![det("person", 0.9, 302, 300, 322, 340), det("car", 0.9, 3, 0, 23, 20)],
        );
        assert_eq!(first.annotations[0].track_id, Some(TrackId(0)));
        assert_eq!(first.annotations[1].track_id, Some(TrackId(1)));
        assert_eq!(second.annotations[0].track_id, Some(TrackId(1)));
        assert_eq!(second.annotations[1].track_id, Some(TrackId(0)));

        let created = session
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, PipelineEvent::TrackCreated { .. }))
            .count();
        assert_eq!(created, 2);
    }

    #[test]
    fn test_suspicious_object_is_not_an_accident() {
        let mut session = Session::new("s", &Config::default(), stream(10.0));
        let report = session.process_frame(frame(0), vec![det("knife", 0.8, 0, 0, 10, 10)]);
        assert!(!report.any_accident);
        assert_eq!(report.suspicious_count(), 1);
        assert_eq!(report.capture, CaptureStatus::Idle);
        assert_eq!(report.annotations[0].label_text(), "knife 0.80 (SUSPICIOUS)");
    }

    #[test]
    fn test_event_model_mode_triggers_on_any_detection() {
        let options = PipelineOptions {
            tracking: true,
            classification: false,
            clip_capture: true,
        };
        let mut session =
            Session::with_options("s", &Config::default(), stream(2.0), options);
        assert!(!session.process_frame(frame(0), Vec::new()).any_accident);
        let report = session.process_frame(frame(1), quiet());
        assert!(report.any_accident);
        assert_eq!(report.capture, CaptureStatus::Capturing);
        assert!(!report.annotations[0].flags.is_accident);
    }

    #[test]
    fn test_without_tracking_collisions_still_flag() {
        let options = PipelineOptions {
            tracking: false,
            ..PipelineOptions::default()
        };
        let mut session =
            Session::with_options("s", &Config::default(), stream(10.0), options);
        let report = session.process_frame(frame(0), collision());
        assert!(report.any_accident);
        assert!(report.annotations.iter().all(|a| a.track_id.is_none()));
        assert!(session.tracker().is_none());
    }

    #[test]
    fn test_capture_disabled_produces_no_clip() {
        let options = PipelineOptions {
            clip_capture: false,
            ..PipelineOptions::default()
        };
        let mut session =
            Session::with_options("s", &Config::default(), stream(10.0), options);
        let report = session.process_frame(frame(0), collision());
        assert!(report.any_accident);
        assert_eq!(report.capture, CaptureStatus::Disabled);
        assert!(session.finish().clips.is_empty());
    }

    #[test]
    fn test_early_close_still_finalizes() {
        let mut session = Session::new("s", &Config::default(), stream(10.0));
        for seq in 0..5 {
            session.process_frame(frame(seq), quiet());
        }
        session.process_frame(frame(5), collision());
        session.process_frame(frame(6), quiet());
        let outcome = session.finish();
        assert_eq!(outcome.clips.len(), 1);
        assert_eq!(outcome.clips[0].len(), 7);
        assert_eq!(outcome.metrics.summary().clips_captured, 1);
    }

    #[test]
    fn test_absurd_fps_metadata_is_ignored() {
        let info = StreamInfo {
            fps: Some(1e12),
            width: Some(4),
            height: Some(2),
        };
        let mut session = Session::new("s", &Config::default(), info);
        assert_eq!(session.params().fps, 24.0);
        let report = session.process_frame(frame(0), collision());
        assert_eq!(report.capture, CaptureStatus::Capturing);
        assert_eq!(session.finish().clips[0].len(), 1);
    }

    #[test]
    fn test_missing_metadata_uses_defaults() {
        let session = Session::new("s", &Config::default(), StreamInfo::default());
        let params = session.params();
        assert_eq!(params.fps, 24.0);
        assert_eq!((params.width, params.height), (0, 0));
    }
}
