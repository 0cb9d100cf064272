// src/pipeline/event_bus.rs
//
// Decoupled event system. The session publishes lifecycle events instead
// of callers polling tracker and clip-buffer state.

use serde::Serialize;
use std::collections::VecDeque;
use tracing::warn;
use uuid::Uuid;

use crate::types::{RejectReason, TrackId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    TrackCreated {
        seq: u64,
        track_id: TrackId,
        label: String,
    },

    TrackExpired {
        seq: u64,
        track_id: TrackId,
    },

    AccidentFlagged {
        seq: u64,
        timestamp_ms: f64,
        track_ids: Vec<TrackId>,
        detections: usize,
    },

    SuspiciousObject {
        seq: u64,
        track_id: Option<TrackId>,
        label: String,
        confidence: f32,
    },

    DetectionRejected {
        seq: u64,
        index: usize,
        reason: RejectReason,
    },

    ClipStarted {
        seq: u64,
        clip_id: Uuid,
        pre_event_frames: usize,
    },

    ClipSettled {
        seq: u64,
        clip_id: Uuid,
        frames: usize,
    },

    ClipFinalized {
        clip_id: Uuid,
        trigger_seq: u64,
        frames: usize,
    },
}

pub struct EventBus {
    events: VecDeque<PipelineEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_pending.min(1024)),
            max_pending,
        }
    }

    pub fn publish(&mut self, event: PipelineEvent) {
        if self.max_pending == 0 {
            return;
        }
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expired(seq: u64) -> PipelineEvent {
        PipelineEvent::TrackExpired {
            seq,
            track_id: TrackId(seq),
        }
    }

    #[test]
    fn test_drops_oldest_when_full() {
        let mut bus = EventBus::new(2);
        bus.publish(expired(1));
        bus.publish(expired(2));
        bus.publish(expired(3));
        assert_eq!(bus.pending_count(), 2);
        assert_eq!(bus.drain(), vec![expired(2), expired(3)]);
        assert_eq!(bus.pending_count(), 0);
    }

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_value(PipelineEvent::TrackCreated {
            seq: 4,
            track_id: TrackId(0),
            label: "car".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "track_created");
        assert_eq!(json["track_id"], 0);
    }
}
