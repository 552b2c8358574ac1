// src/types.rs

use serde::{Deserialize, Serialize};

/// Joints per person in the standard COCO body-pose layout.
pub const KEYPOINT_COUNT: usize = 17;

/// First body joint used by the pipeline (left shoulder). Face keypoints
/// (nose, eyes, ears, indices 0..=4) carry no serve-motion signal and are
/// discarded everywhere downstream of the pose model.
pub const FIRST_BODY_JOINT: usize = 5;

/// Shoulders through ankles: indices 5..=16.
pub const BODY_JOINT_COUNT: usize = 12;

/// One x/y pair per body joint.
pub const FEATURES_PER_FRAME: usize = 2 * BODY_JOINT_COUNT;

/// One detected person in one frame, as returned by the pose model:
/// the full 17-joint array in pixel coordinates plus a bounding box.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// [x, y] per joint, COCO order, length 17.
    pub keypoints: Vec<[f32; 2]>,
    /// [x1, y1, x2, y2] in pixels.
    pub bbox: [f32; 4],
}

impl Detection {
    /// Mean position over all joints.
    pub fn centroid(&self) -> (f32, f32) {
        if self.keypoints.is_empty() {
            return (0.0, 0.0);
        }
        let n = self.keypoints.len() as f32;
        let (sx, sy) = self
            .keypoints
            .iter()
            .fold((0.0f32, 0.0f32), |(sx, sy), kp| (sx + kp[0], sy + kp[1]));
        (sx / n, sy / n)
    }

    /// The 12 body joints the tracker and sequence logic operate on.
    pub fn body_joints(&self) -> &[[f32; 2]] {
        let end = (FIRST_BODY_JOINT + BODY_JOINT_COUNT).min(self.keypoints.len());
        let start = FIRST_BODY_JOINT.min(end);
        &self.keypoints[start..end]
    }
}

/// All detections for one frame. Detections are unordered; the count
/// varies 0..N frame to frame. An empty list means the pose model saw
/// nobody; that is a normal frame, not an error.
#[derive(Debug, Clone)]
pub struct FrameDetections {
    pub frame_index: usize,
    pub frame_name: String,
    pub detections: Vec<Detection>,
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tracker: TrackerConfig,
    pub sequence: SequenceConfig,
    pub phase: PhaseConfig,
    pub balance: BalanceConfig,
    pub io: IoConfig,
    /// Seed for augmentation and balancing. Tracking is deterministic
    /// regardless; augmented output is only reproducible when this is set.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Maximum centroid distance (pixels, detector coordinate space) for a
    /// detection to be claimed by an existing track. Empirical value.
    pub distance_gate: f32,
    /// Consecutive unmatched frames before a track is evicted. Empirical value.
    pub max_missed_frames: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            distance_gate: 150.0,
            max_missed_frames: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Frames per classifier input unit. One full serve motion.
    pub length: usize,
    /// Floor for the normalization scale, to avoid dividing by a degenerate
    /// standard deviation on near-static clips.
    pub scale_epsilon: f32,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            length: 48,
            scale_epsilon: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    /// Add a Gaussian prior centered on the sequence midpoint to the velocity
    /// curve before taking the argmax, discouraging spurious peaks at the
    /// clip edges.
    pub center_prior: bool,
    /// Weight of the prior. Empirical value.
    pub center_prior_weight: f32,
    /// Prior width as a fraction of sequence length.
    pub center_prior_width: f32,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            center_prior: true,
            center_prior_weight: 0.05,
            center_prior_width: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// Minimum sequences per subject. The effective target is the larger of
    /// this and the biggest real pool across subjects, so no subject is
    /// shrunk below its own real sample count.
    pub min_target_per_class: usize,
    /// Phase-bucket ratio pre : impact : post. Remainder frames are allocated
    /// post, then impact, then pre. Empirical values.
    pub ratio_pre: usize,
    pub ratio_impact: usize,
    pub ratio_post: usize,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            min_target_per_class: 18,
            ratio_pre: 1,
            ratio_impact: 1,
            ratio_post: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Root of per-clip directories of per-frame detection JSON files.
    pub detections_dir: String,
    /// Where per-clip track tables and movement summaries are written.
    pub tracks_dir: String,
    /// Root of per-subject directories of extracted clip sequences
    /// (one `keypoints_with_tracks.csv` per clip directory).
    pub subjects_dir: String,
    /// Where the balanced dataset and its manifest are written.
    pub dataset_dir: String,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            detections_dir: "detections".to_string(),
            tracks_dir: "pose_tracks".to_string(),
            subjects_dir: "pose_tracks/players".to_string(),
            dataset_dir: "balanced_dataset".to_string(),
        }
    }
}
