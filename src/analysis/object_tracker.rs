// src/analysis/object_tracker.rs
//
// Centroid nearest-neighbour tracker. Gives every detection a persistent
// track id by matching it against the last known centroid of each track.
//
// Design:
//   - Greedy matching, not globally optimal (n is tens per frame)
//   - Tracks are visited oldest-first through an explicit ascending id
//     list, so the older track always claims a contested detection
//   - Distance ties go to the detection scanned first
//   - Tracks unmatched for `max_missed_frames` non-empty updates are
//     dropped; ids are never reused

use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::TrackerConfig;
use crate::types::{BBox, Centroid, Detection, TrackId};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    /// One entry per frame this track was matched, oldest first
    pub centroid_history: Vec<Centroid>,
    pub label: String,
    pub bbox: BBox,
    /// Consecutive non-empty updates without a match
    pub missed_frames: u32,
}

impl Track {
    fn new(id: TrackId, det: &Detection, centroid: Centroid) -> Self {
        Self {
            id,
            centroid_history: vec![centroid],
            label: det.label.clone(),
            bbox: det.bbox,
            missed_frames: 0,
        }
    }

    pub fn last_centroid(&self) -> Centroid {
        // Invariant: history is seeded at creation and only ever appended
        self.centroid_history[self.centroid_history.len() - 1]
    }

    fn claim(&mut self, det: &Detection, centroid: Centroid) {
        self.centroid_history.push(centroid);
        self.label = det.label.clone();
        self.bbox = det.bbox;
        self.missed_frames = 0;
    }
}

/// Outcome of one `update` call beyond the per-detection ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerUpdate {
    /// Track id per input detection, in input order
    pub assignments: Vec<TrackId>,
    pub created: Vec<TrackId>,
    pub expired: Vec<TrackId>,
}

// ============================================================================
// TRACKER
// ============================================================================

pub struct ObjectTracker {
    config: TrackerConfig,
    tracks: HashMap<TrackId, Track>,
    /// Live track ids, ascending. Ids are handed out monotonically so
    /// appending keeps this sorted.
    order: Vec<TrackId>,
    next_id: u64,
}

impl ObjectTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: HashMap::with_capacity(32),
            order: Vec::with_capacity(32),
            next_id: 0,
        }
    }

    /// Assign a track id to every detection. Callers are expected to have
    /// validated the detections already.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<TrackId> {
        self.update_detailed(detections).assignments
    }

    pub fn update_detailed(&mut self, detections: &[Detection]) -> TrackerUpdate {
        if detections.is_empty() {
            return TrackerUpdate::default();
        }

        let centroids: Vec<Centroid> = detections.iter().map(Detection::centroid).collect();
        let mut assigned: Vec<Option<TrackId>> = vec![None; detections.len()];
        let threshold = self.config.distance_threshold;

        // Oldest track first
        for &track_id in &self.order {
            let Some(track) = self.tracks.get_mut(&track_id) else {
                continue;
            };
            let last = track.last_centroid();

            let mut best: Option<(usize, f64)> = None;
            for (di, centroid) in centroids.iter().enumerate() {
                if assigned[di].is_some() {
                    continue;
                }
                let dist = last.distance(centroid);
                if dist >= threshold {
                    continue;
                }
                // Strict comparison: the first candidate at a given distance wins
                if best.map_or(true, |(_, best_dist)| dist < best_dist) {
                    best = Some((di, dist));
                }
            }

            match best {
                Some((di, dist)) => {
                    assigned[di] = Some(track_id);
                    track.claim(&detections[di], centroids[di]);
                    debug!(
                        "Track {} claimed det #{} '{}' (dist={:.1}px, history={})",
                        track_id,
                        di,
                        detections[di].label,
                        dist,
                        track.centroid_history.len()
                    );
                }
                None => track.missed_frames += 1,
            }
        }

        let mut created = Vec::new();
        let assignments: Vec<TrackId> = assigned
            .into_iter()
            .enumerate()
            .map(|(di, slot)| match slot {
                Some(id) => id,
                None => {
                    let id = TrackId(self.next_id);
                    self.next_id += 1;
                    let det = &detections[di];
                    debug!(
                        "New track {} created: label={}, bbox=[{},{},{},{}]",
                        id, det.label, det.bbox.x1, det.bbox.y1, det.bbox.x2, det.bbox.y2
                    );
                    self.tracks.insert(id, Track::new(id, det, centroids[di]));
                    self.order.push(id);
                    created.push(id);
                    id
                }
            })
            .collect();

        let expired = self.prune_stale();

        TrackerUpdate {
            assignments,
            created,
            expired,
        }
    }

    fn prune_stale(&mut self) -> Vec<TrackId> {
        let Some(max_missed) = self.config.max_missed_frames else {
            return Vec::new();
        };

        let mut expired = Vec::new();
        let tracks = &mut self.tracks;
        self.order.retain(|id| {
            let stale = tracks
                .get(id)
                .map_or(true, |t| t.missed_frames > max_missed);
            if stale {
                if let Some(track) = tracks.remove(id) {
                    info!(
                        "Track {} ({}) expired after {} unmatched frames",
                        id, track.label, track.missed_frames
                    );
                }
                expired.push(*id);
            }
            !stale
        });
        expired
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn history(&self, id: TrackId) -> &[Centroid] {
        self.tracks
            .get(&id)
            .map(|t| t.centroid_history.as_slice())
            .unwrap_or(&[])
    }

    /// Live tracks, oldest first.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.order.iter().filter_map(|id| self.tracks.get(id))
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Total ids handed out this session (live and expired).
    pub fn tracks_created(&self) -> u64 {
        self.next_id
    }
}

// ============================================================================
// TESTS
// ============================================================================
