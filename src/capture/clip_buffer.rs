// src/capture/clip_buffer.rs
//
// Event clip capture.
//
// Every frame enters a rolling pre-event window. The first flagged frame
// opens an episode seeded with that window plus the trigger frame, then
// the next `round(fps * post_window_seconds)` frames are appended whether
// or not they are flagged. Once the post window is spent the buffer settles
// and by default never captures again in the session; with `rearm` a later
// flagged frame opens a new episode.
//
//   Idle ──flag──▶ Capturing(n) ──n frames──▶ Settled ──flag & rearm──▶ Capturing
//     │                 │                        │
//     └────────────── finalize() ────────────────┴──▶ Finalized
//
// Phase transitions live on `ClipPhase` and do not look at frame content,
// so the policy can be exercised without images.

use std::collections::VecDeque;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ClipConfig;
use crate::types::{Frame, StreamParams};

// ============================================================================
// PHASE MACHINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipPhase {
    Idle,
    Capturing { remaining: u32 },
    /// Post window spent; waiting for end-of-stream (or a re-arm)
    Settled,
    Finalized,
}

/// What the buffer must do with the current frame besides keeping it in
/// the pre-event window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    Skip,
    /// Open an episode from the pre-event window plus this frame
    Start,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePolicy {
    pub post_frames: u32,
    pub rearm: bool,
}

impl ClipPhase {
    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing { .. })
    }

    /// Guarded transition for one incoming frame.
    pub fn on_frame(self, triggered: bool, policy: CapturePolicy) -> (ClipPhase, FrameAction) {
        let start = |post: u32| {
            let next = if post == 0 {
                ClipPhase::Settled
            } else {
                ClipPhase::Capturing { remaining: post }
            };
            (next, FrameAction::Start)
        };

        match self {
            Self::Idle if triggered => start(policy.post_frames),
            Self::Idle => (Self::Idle, FrameAction::Skip),
            Self::Capturing { remaining } => {
                let remaining = remaining.saturating_sub(1);
                let next = if remaining == 0 {
                    Self::Settled
                } else {
                    Self::Capturing { remaining }
                };
                (next, FrameAction::Append)
            }
            Self::Settled if triggered && policy.rearm => start(policy.post_frames),
            Self::Settled => (Self::Settled, FrameAction::Skip),
            Self::Finalized => (Self::Finalized, FrameAction::Skip),
        }
    }
}

// ============================================================================
// CLIPS
// ============================================================================

/// A finished capture: frames oldest first plus the geometry the encoder
/// needs. Dimensions come from stream metadata and may be zero.
#[derive(Debug, Clone)]
pub struct Clip {
    pub clip_id: Uuid,
    pub trigger_seq: u64,
    pub frames: Vec<Frame>,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl Clip {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn trigger_frame(&self) -> Option<&Frame> {
        self.frames.iter().find(|f| f.seq == self.trigger_seq)
    }
}

struct Episode {
    clip_id: Uuid,
    trigger_seq: u64,
    frames: Vec<Frame>,
}

/// Reported back to the session for event publishing.
#[derive(Debug, Clone, PartialEq)]
pub enum ClipTransition {
    None,
    Started {
        clip_id: Uuid,
        trigger_seq: u64,
        pre_event_frames: usize,
    },
    Settled {
        clip_id: Uuid,
        frames: usize,
    },
}

// ============================================================================
// BUFFER
// ============================================================================

pub struct ClipBuffer {
    params: StreamParams,
    policy: CapturePolicy,
    pre_capacity: usize,
    pre_buffer: VecDeque<Frame>,
    phase: ClipPhase,
    current: Option<Episode>,
    finished: Vec<Clip>,
}

impl ClipBuffer {
    pub fn new(config: &ClipConfig, params: StreamParams) -> Self {
        let pre_capacity = (params.fps * config.pre_window_seconds).round() as usize;
        let post_frames = (params.fps * config.post_window_seconds).round() as u32;
        debug!(
            "Clip buffer: {:.1} fps, {} pre-event frames, {} post-event frames, rearm={}",
            params.fps, pre_capacity, post_frames, config.rearm
        );
        Self {
            params,
            policy: CapturePolicy {
                post_frames,
                rearm: config.rearm,
            },
            pre_capacity,
            // Grows with the frames actually seen, never sized up front
            pre_buffer: VecDeque::new(),
            phase: ClipPhase::Idle,
            current: None,
            finished: Vec::new(),
        }
    }

    pub fn phase(&self) -> ClipPhase {
        self.phase
    }

    pub fn pre_capacity(&self) -> usize {
        self.pre_capacity
    }

    pub fn post_frames(&self) -> u32 {
        self.policy.post_frames
    }

    pub fn pre_buffered(&self) -> usize {
        self.pre_buffer.len()
    }

    /// Frames held by the open episode, if any.
    pub fn captured_len(&self) -> usize {
        self.current.as_ref().map_or(0, |e| e.frames.len())
    }

    pub fn finished_clips(&self) -> usize {
        self.finished.len()
    }

    pub fn has_content(&self) -> bool {
        self.current.is_some() || !self.finished.is_empty()
    }

    /// Feed one frame. `triggered` is whether any detection on it was
    /// flagged as an accident.
    pub fn push(&mut self, frame: Frame, triggered: bool) -> ClipTransition {
        if self.phase == ClipPhase::Finalized {
            warn!("Frame {} arrived after finalize, dropped", frame.seq);
            return ClipTransition::None;
        }

        let (next, action) = self.phase.on_frame(triggered, self.policy);
        let mut transition = ClipTransition::None;

        match action {
            FrameAction::Skip => {}
            FrameAction::Start => {
                let clip_id = Uuid::new_v4();
                let pre_event_frames = self.pre_buffer.len();
                let mut frames = Vec::with_capacity(pre_event_frames + 1);
                frames.extend(self.pre_buffer.iter().cloned());
                frames.push(frame.clone());
                info!(
                    "Accident at frame {}: capturing clip {} ({} pre-event frames, {} to follow)",
                    frame.seq, clip_id, pre_event_frames, self.policy.post_frames
                );
                self.current = Some(Episode {
                    clip_id,
                    trigger_seq: frame.seq,
                    frames,
                });
                transition = ClipTransition::Started {
                    clip_id,
                    trigger_seq: frame.seq,
                    pre_event_frames,
                };
            }
            FrameAction::Append => {
                if let Some(episode) = self.current.as_mut() {
                    episode.frames.push(frame.clone());
                }
            }
        }

        if next == ClipPhase::Settled {
            if let Some((clip_id, frames)) = self.close_episode() {
                transition = ClipTransition::Settled { clip_id, frames };
            }
        }
        self.phase = next;

        self.retain_pre_event(frame);
        transition
    }

    /// End of stream. Closes an episode still in its post window, drops the
    /// pre-event window and hands back every clip of the session. Calling it
    /// twice yields nothing the second time.
    pub fn finalize(&mut self) -> Vec<Clip> {
        if self.phase == ClipPhase::Finalized {
            return Vec::new();
        }
        if let ClipPhase::Capturing { remaining } = self.phase {
            if let Some((clip_id, frames)) = self.close_episode() {
                info!(
                    "Stream ended mid-capture: clip {} closed early with {} frames ({} post-event frames missing)",
                    clip_id, frames, remaining
                );
            }
        }
        self.phase = ClipPhase::Finalized;
        self.pre_buffer.clear();
        self.pre_buffer.shrink_to_fit();
        std::mem::take(&mut self.finished)
    }

    fn close_episode(&mut self) -> Option<(Uuid, usize)> {
        let episode = self.current.take()?;
        let frames = episode.frames.len();
        info!("Clip {} settled with {} frames", episode.clip_id, frames);
        self.finished.push(Clip {
            clip_id: episode.clip_id,
            trigger_seq: episode.trigger_seq,
            frames: episode.frames,
            width: self.params.width,
            height: self.params.height,
            fps: self.params.fps,
        });
        Some((episode.clip_id, frames))
    }

    fn retain_pre_event(&mut self, frame: Frame) {
        if self.pre_capacity == 0 {
            return;
        }
        while self.pre_buffer.len() >= self.pre_capacity {
            self.pre_buffer.pop_front();
        }
        self.pre_buffer.push_back(frame);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn params(fps: f64) -> StreamParams {
        StreamParams {
            fps,
            width: 4,
            height: 2,
        }
    }

    fn config(pre: f64, post: f64, rearm: bool) -> ClipConfig {
        ClipConfig {
            pre_window_seconds: pre,
            post_window_seconds: post,
            rearm,
            ..ClipConfig::default()
        }
    }

    fn frame(seq: u64) -> Frame {
        Frame::new(seq, seq as f64 * 100.0, vec![0u8; 4 * 2 * 3], 4, 2)
    }

    const SINGLE: CapturePolicy = CapturePolicy {
        post_frames: 2,
        rearm: false,
    };

    #[test]
    fn test_phase_idle_waits_for_trigger() {
        assert_eq!(
            ClipPhase::Idle.on_frame(false, SINGLE),
            (ClipPhase::Idle, FrameAction::Skip)
        );
        assert_eq!(
            ClipPhase::Idle.on_frame(true, SINGLE),
            (ClipPhase::Capturing { remaining: 2 }, FrameAction::Start)
        );
    }

    #[test]
    fn test_phase_capturing_counts_down_regardless_of_flags() {
        let phase = ClipPhase::Capturing { remaining: 2 };
        let (phase, action) = phase.on_frame(false, SINGLE);
        assert_eq!(phase, ClipPhase::Capturing { remaining: 1 });
        assert_eq!(action, FrameAction::Append);
        let (phase, action) = phase.on_frame(true, SINGLE);
        assert_eq!(phase, ClipPhase::Settled);
        assert_eq!(action, FrameAction::Append);
    }

    #[test]
    fn test_phase_settled_ignores_triggers_without_rearm() {
        assert_eq!(
            ClipPhase::Settled.on_frame(true, SINGLE),
            (ClipPhase::Settled, FrameAction::Skip)
        );
        let rearm = CapturePolicy {
            rearm: true,
            ..SINGLE
        };
        assert_eq!(
            ClipPhase::Settled.on_frame(true, rearm),
            (ClipPhase::Capturing { remaining: 2 }, FrameAction::Start)
        );
    }

    #[test]
    fn test_phase_zero_post_window_settles_on_trigger() {
        let policy = CapturePolicy {
            post_frames: 0,
            rearm: false,
        };
        assert_eq!(
            ClipPhase::Idle.on_frame(true, policy),
            (ClipPhase::Settled, FrameAction::Start)
        );
    }

    #[test]
    fn test_phase_never_returns_to_idle() {
        let mut phase = ClipPhase::Idle;
        let policy = CapturePolicy {
            post_frames: 3,
            rearm: true,
        };
        let mut left_idle = false;
        for i in 0..50 {
            phase = phase.on_frame(i % 7 == 3, policy).0;
            left_idle |= phase != ClipPhase::Idle;
            if left_idle {
                assert_ne!(phase, ClipPhase::Idle);
            }
        }
        assert!(left_idle);
    }

    #[test]
    fn test_quiet_stream_produces_nothing() {
        let mut buffer = ClipBuffer::new(&config(5.0, 5.0, false), params(10.0));
        for seq in 0..200 {
            assert_eq!(buffer.push(frame(seq), false), ClipTransition::None);
        }
        assert_eq!(buffer.phase(), ClipPhase::Idle);
        assert!(!buffer.has_content());
        assert!(buffer.finalize().is_empty());
        assert_eq!(buffer.phase(), ClipPhase::Finalized);
    }

    #[test]
    fn test_pre_buffer_never_exceeds_capacity() {
        let mut buffer = ClipBuffer::new(&config(5.0, 5.0, false), params(10.0));
        assert_eq!(buffer.pre_capacity(), 50);
        for seq in 0..120 {
            buffer.push(frame(seq), false);
            assert!(buffer.pre_buffered() <= 50);
        }
        assert_eq!(buffer.pre_buffered(), 50);
    }

    #[test]
    fn test_clip_brackets_event() {
        let mut buffer = ClipBuffer::new(&config(5.0, 5.0, false), params(10.0));
        let mut seq = 0;
        for _ in 0..60 {
            buffer.push(frame(seq), false);
            seq += 1;
        }
        let trigger_seq = seq;
        let started = buffer.push(frame(seq), true);
        seq += 1;
        assert!(matches!(
            started,
            ClipTransition::Started {
                pre_event_frames: 50,
                ..
            }
        ));
        assert_eq!(buffer.captured_len(), 51);

        // Later frames are flagged too; they must not extend the clip
        for _ in 0..60 {
            buffer.push(frame(seq), true);
            seq += 1;
        }
        assert_eq!(buffer.phase(), ClipPhase::Settled);

        let clips = buffer.finalize();
        assert_eq!(clips.len(), 1);
        let clip = &clips[0];
        assert_eq!(clip.len(), 101);
        assert_eq!(clip.trigger_seq, trigger_seq);
        assert_eq!(clip.frames.first().unwrap().seq, 10);
        assert_eq!(clip.frames.last().unwrap().seq, 110);
        assert!(clip.frames.windows(2).all(|w| w[0].seq + 1 == w[1].seq));
        assert_eq!(clip.trigger_frame().map(|f| f.seq), Some(trigger_seq));
        assert_eq!((clip.width, clip.height), (4, 2));
        assert_eq!(clip.fps, 10.0);
    }

    #[test]
    fn test_short_lead_in_uses_what_is_buffered() {
        let mut buffer = ClipBuffer::new(&config(5.0, 1.0, false), params(10.0));
        for seq in 0..3 {
            buffer.push(frame(seq), false);
        }
        buffer.push(frame(3), true);
        assert_eq!(buffer.captured_len(), 4);
    }

    #[test]
    fn test_stream_end_mid_capture_keeps_partial_clip() {
        let mut buffer = ClipBuffer::new(&config(1.0, 5.0, false), params(10.0));
        for seq in 0..20 {
            buffer.push(frame(seq), false);
        }
        buffer.push(frame(20), true);
        for seq in 21..25 {
            buffer.push(frame(seq), false);
        }
        assert!(buffer.phase().is_capturing());
        let clips = buffer.finalize();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].len(), 10 + 1 + 4);
        assert_eq!(buffer.pre_buffered(), 0);
        assert!(buffer.finalize().is_empty());
    }

    #[test]
    fn test_single_clip_per_session_by_default() {
        let mut buffer = ClipBuffer::new(&config(0.5, 0.5, false), params(10.0));
        for seq in 0..40 {
            buffer.push(frame(seq), seq == 10 || seq == 30);
        }
        assert_eq!(buffer.finalize().len(), 1);
    }

    #[test]
    fn test_rearm_produces_one_clip_per_episode() {
        let mut buffer = ClipBuffer::new(&config(0.5, 0.5, true), params(10.0));
        let mut settled = 0;
        for seq in 0..40 {
            if let ClipTransition::Settled { frames, .. } = buffer.push(frame(seq), seq == 10 || seq == 30)
            {
                assert_eq!(frames, 5 + 1 + 5);
                settled += 1;
            }
        }
        assert_eq!(settled, 2);
        let clips = buffer.finalize();
        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].trigger_seq, 10);
        assert_eq!(clips[1].trigger_seq, 30);
        assert_ne!(clips[0].clip_id, clips[1].clip_id);
    }

    #[test]
    fn test_zero_pre_window_keeps_no_history() {
        let mut buffer = ClipBuffer::new(&config(0.0, 0.2, false), params(10.0));
        for seq in 0..5 {
            buffer.push(frame(seq), false);
        }
        assert_eq!(buffer.pre_buffered(), 0);
        buffer.push(frame(5), true);
        buffer.push(frame(6), false);
        buffer.push(frame(7), false);
        let clips = buffer.finalize();
        let seqs: Vec<u64> = clips[0].frames.iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![5, 6, 7]);
    }

    #[test]
    fn test_huge_windows_allocate_lazily() {
        let mut buffer = ClipBuffer::new(&config(1e9, 1e9, false), params(1000.0));
        assert!(buffer.pre_capacity() > 1_000_000_000);
        for seq in 0..3 {
            buffer.push(frame(seq), false);
        }
        buffer.push(frame(3), true);
        assert_eq!(buffer.captured_len(), 4);
        assert_eq!(buffer.finalize()[0].len(), 4);
    }

    #[test]
    fn test_frames_after_finalize_are_dropped() {
        let mut buffer = ClipBuffer::new(&config(1.0, 1.0, false), params(10.0));
        buffer.finalize();
        assert_eq!(buffer.push(frame(0), true), ClipTransition::None);
        assert_eq!(buffer.phase(), ClipPhase::Finalized);
    }
}
