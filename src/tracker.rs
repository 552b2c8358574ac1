// src/tracker.rs
//
// Centroid-based multi-person tracker for serve clips.
//
// The pose model returns an unordered set of detections per frame; this
// module turns that stream into identity-stable tracks so each person's
// joint history can be sliced into classifier sequences.
//
// Design:
//   - Greedy nearest-centroid matching under a fixed distance gate
//     (sufficient for 1-3 people on a court, no IoU needed)
//   - Tracks coast through missed detections up to a threshold
//   - Eviction flags the track inactive but keeps the entry, so the
//     per-clip movement summary survives; an evicted identity is never
//     reused for a later detection at the same spot

use crate::types::{Detection, FrameDetections, TrackerConfig, BODY_JOINT_COUNT};
use tracing::{debug, info};

/// One row of the per-clip keypoint table: a single track's body joints
/// in a single frame.
#[derive(Debug, Clone)]
pub struct TrackRow {
    pub frame_index: usize,
    pub frame_name: String,
    pub track_id: u32,
    /// Joints 5..=16, in order, [x, y] each.
    pub joints: Vec<[f32; 2]>,
}

/// Per-track summary emitted once per clip.
#[derive(Debug, Clone)]
pub struct TrackSummary {
    pub track_id: u32,
    pub total_movement: f32,
    pub num_frames: usize,
    pub first_frame: String,
    pub last_frame: String,
    pub active: bool,
}

/// A single tracked person.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: u32,
    /// Full 17-joint array from the last matched detection.
    last_keypoints: Option<Vec<[f32; 2]>>,
    last_centroid: Option<(f32, f32)>,
    /// Cumulative per-joint L2 displacement across matched frames.
    total_movement: f32,
    /// Names of the frames this track was matched in.
    frames: Vec<String>,
    missed: u32,
    active: bool,
}

impl Track {
    fn new(id: u32) -> Self {
        Self {
            id,
            last_keypoints: None,
            last_centroid: None,
            total_movement: 0.0,
            frames: Vec::new(),
            missed: 0,
            active: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn total_movement(&self) -> f32 {
        self.total_movement
    }

    pub fn last_centroid(&self) -> Option<(f32, f32)> {
        self.last_centroid
    }

    /// Absorb a matched detection: update pose, accumulate movement,
    /// reset the miss counter.
    fn observe(&mut self, det: &Detection, frame_name: &str) {
        // Movement accumulates only when both poses have the same joint
        // layout; the first observation has nothing to diff against.
        if let Some(prev) = &self.last_keypoints {
            if prev.len() == det.keypoints.len() {
                let displacement: f32 = prev
                    .iter()
                    .zip(det.keypoints.iter())
                    .map(|(p, k)| {
                        let dx = k[0] - p[0];
                        let dy = k[1] - p[1];
                        (dx * dx + dy * dy).sqrt()
                    })
                    .sum();
                self.total_movement += displacement;
            }
        }

        self.last_keypoints = Some(det.keypoints.clone());
        self.last_centroid = Some(det.centroid());
        self.frames.push(frame_name.to_string());
        self.missed = 0;
    }

    fn mark_missed(&mut self, max_missed: u32) {
        self.missed += 1;
        if self.missed > max_missed {
            self.active = false;
        }
    }

    fn summary(&self) -> Option<TrackSummary> {
        let first = self.frames.first()?;
        let last = self.frames.last()?;
        Some(TrackSummary {
            track_id: self.id,
            total_movement: self.total_movement,
            num_frames: self.frames.len(),
            first_frame: first.clone(),
            last_frame: last.clone(),
            active: self.active,
        })
    }
}

// ============================================================================
// MAIN TRACKER
// ============================================================================

/// Tracker state for one clip. Created fresh per clip and discarded after
/// the summary is emitted; identities never cross clip boundaries.
pub struct IdentityTracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u32,
}

impl IdentityTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::with_capacity(4),
            next_id: 0,
        }
    }

    /// Process one frame of detections. Returns the table rows produced by
    /// this frame (one per matched or newly created track).
    pub fn process_frame(&mut self, frame: &FrameDetections) -> Vec<TrackRow> {
        let dets = &frame.detections;

        if dets.is_empty() {
            // Nobody detected: every active track coasts one frame.
            self.age_unmatched(&[]);
            return Vec::new();
        }

        let centroids: Vec<(f32, f32)> = dets.iter().map(|d| d.centroid()).collect();

        // Assignment of detection index to track index within self.tracks.
        let mut det_to_track: Vec<Option<usize>> = vec![None; dets.len()];
        let mut det_claimed: Vec<bool> = vec![false; dets.len()];

        // Active tracks claim detections in ascending track-ID order; each
        // takes the nearest unclaimed detection within the gate, ties broken
        // by lowest detection index. Tracks are stored in creation order, so
        // iteration order is ID order.
        for (ti, track) in self.tracks.iter().enumerate() {
            if !track.active {
                continue;
            }
            let Some((tcx, tcy)) = track.last_centroid else {
                continue;
            };

            let mut best_det: Option<usize> = None;
            let mut best_distance = self.config.distance_gate;
            for (di, &(dcx, dcy)) in centroids.iter().enumerate() {
                if det_claimed[di] {
                    continue;
                }
                let distance = ((tcx - dcx).powi(2) + (tcy - dcy).powi(2)).sqrt();
                if distance < best_distance {
                    best_distance = distance;
                    best_det = Some(di);
                }
            }

            if let Some(di) = best_det {
                det_claimed[di] = true;
                det_to_track[di] = Some(ti);
                debug!(
                    "Track {} claimed detection {} at {:.0}px",
                    track.id, di, best_distance
                );
            }
        }

        // Leftover detections start brand-new tracks, ascending index order.
        for (di, claimed) in det_claimed.iter().enumerate() {
            if !claimed {
                let ti = self.tracks.len();
                info!(
                    "New track {} created at frame {} ({})",
                    self.next_id, frame.frame_index, frame.frame_name
                );
                self.tracks.push(Track::new(self.next_id));
                self.next_id += 1;
                det_to_track[di] = Some(ti);
            }
        }

        // Apply matches and emit table rows in detection order.
        let mut rows = Vec::with_capacity(dets.len());
        let mut matched_tracks: Vec<bool> = vec![false; self.tracks.len()];
        for (di, det) in dets.iter().enumerate() {
            let Some(ti) = det_to_track[di] else {
                continue;
            };
            matched_tracks[ti] = true;
            self.tracks[ti].observe(det, &frame.frame_name);
            rows.push(TrackRow {
                frame_index: frame.frame_index,
                frame_name: frame.frame_name.clone(),
                track_id: self.tracks[ti].id,
                joints: det.body_joints().to_vec(),
            });
        }

        self.age_unmatched(&matched_tracks);
        rows
    }

    /// Increment miss counters for active tracks that got nothing this
    /// frame; past the threshold the track is evicted for good.
    fn age_unmatched(&mut self, matched: &[bool]) {
        let max_missed = self.config.max_missed_frames;
        for (ti, track) in self.tracks.iter_mut().enumerate() {
            if !track.active || matched.get(ti).copied().unwrap_or(false) {
                continue;
            }
            track.mark_missed(max_missed);
            if !track.active {
                info!(
                    "Track {} evicted after {} consecutive missed frames",
                    track.id, track.missed
                );
            }
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Per-track summaries in ID order. Tracks that never matched a frame
    /// are omitted (cannot happen through process_frame, which observes a
    /// new track in its creation frame).
    pub fn summaries(&self) -> Vec<TrackSummary> {
        self.tracks.iter().filter_map(|t| t.summary()).collect()
    }

    /// The track that moved the most over the clip. The server is almost
    /// always the most-moved person, so this picks the subject of interest.
    pub fn most_moved(&self) -> Option<TrackSummary> {
        self.summaries()
            .into_iter()
            .max_by(|a, b| {
                a.total_movement
                    .partial_cmp(&b.total_movement)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

// ============================================================================
// TESTS
// ============================================================================
