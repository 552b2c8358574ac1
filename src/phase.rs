// src/phase.rs
//
// Ball-strike (impact) frame estimation and phase bucketing.
//
// A serve sequence has a pre-impact wind-up, the strike itself, and the
// follow-through. The strike is approximated as the frame of peak
// inter-frame joint velocity; an optional Gaussian prior centered on the
// sequence midpoint keeps spurious edge peaks from winning the argmax.

use crate::sequence::Sequence;
use crate::types::PhaseConfig;

/// Where the estimated impact frame falls relative to the sequence midpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseBucket {
    Pre,
    Impact,
    Post,
}

impl PhaseBucket {
    pub const ALL: [PhaseBucket; 3] = [PhaseBucket::Pre, PhaseBucket::Impact, PhaseBucket::Post];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Impact => "impact",
            Self::Post => "post",
        }
    }
}

/// Per-frame velocity: L2 norm of the full-frame joint displacement to the
/// next frame. The last frame repeats the prior value to preserve length.
pub fn frame_velocities(seq: &Sequence) -> Vec<f32> {
    let n = seq.frames();
    if n < 2 {
        return vec![0.0; n];
    }
    let data = seq.data();
    let mut speeds = Vec::with_capacity(n);
    for t in 0..n - 1 {
        let a = data.row(t);
        let b = data.row(t + 1);
        let sq: f32 = a
            .iter()
            .zip(b.iter())
            .map(|(&x, &y)| (y - x) * (y - x))
            .sum();
        speeds.push(sq.sqrt());
    }
    let last = *speeds.last().unwrap_or(&0.0);
    speeds.push(last);
    speeds
}

/// Index of the estimated ball-strike frame. Degenerate sequences
/// (length <= 2) return the midpoint directly.
pub fn estimate_impact_index(seq: &Sequence, config: &PhaseConfig) -> usize {
    let n = seq.frames();
    if n <= 2 {
        return n / 2;
    }

    let mut speeds = frame_velocities(seq);

    if config.center_prior {
        let center = (n as f32 - 1.0) / 2.0;
        let sigma = config.center_prior_width * n as f32;
        for (i, speed) in speeds.iter_mut().enumerate() {
            let d = i as f32 - center;
            let bias = (-(d * d) / (2.0 * sigma * sigma)).exp();
            *speed += config.center_prior_weight * bias;
        }
    }

    // First index of the maximum, matching argmax semantics.
    let mut best = 0usize;
    let mut best_speed = f32::NEG_INFINITY;
    for (i, &speed) in speeds.iter().enumerate() {
        if speed > best_speed {
            best_speed = speed;
            best = i;
        }
    }
    best
}

/// Bucket a sequence by where its impact frame sits: two or more frames
/// before the midpoint is `pre`, two or more after is `post`, anything
/// within one frame of the midpoint is `impact`.
pub fn bucket_of(seq: &Sequence, config: &PhaseConfig) -> PhaseBucket {
    let impact = estimate_impact_index(seq, config) as i64;
    let center = seq.midpoint() as i64;
    if impact <= center - 2 {
        PhaseBucket::Pre
    } else if impact >= center + 2 {
        PhaseBucket::Post
    } else {
        PhaseBucket::Impact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FEATURES_PER_FRAME;
    use ndarray::Array2;

    /// A 48-frame sequence whose joints jump sharply at `burst`.
    fn burst_sequence(burst: usize) -> Sequence {
        let data = Array2::from_shape_fn((48, FEATURES_PER_FRAME), |(t, _)| {
            if t > burst {
                10.0
            } else {
                0.0
            }
        });
        Sequence::new(data).unwrap()
    }

    #[test]
    fn test_impact_at_velocity_peak() {
        let config = PhaseConfig::default();
        let seq = burst_sequence(24);
        assert_eq!(estimate_impact_index(&seq, &config), 24);
    }

    #[test]
    fn test_single_frame_returns_zero() {
        let config = PhaseConfig::default();
        let data = Array2::zeros((1, FEATURES_PER_FRAME));
        let seq = Sequence::new(data).unwrap();
        assert_eq!(estimate_impact_index(&seq, &config), 0);
    }

    #[test]
    fn test_two_frames_return_midpoint() {
        let config = PhaseConfig::default();
        let data = Array2::zeros((2, FEATURES_PER_FRAME));
        let seq = Sequence::new(data).unwrap();
        assert_eq!(estimate_impact_index(&seq, &config), 1);
    }

    #[test]
    fn test_velocity_length_matches_frames() {
        let seq = burst_sequence(10);
        assert_eq!(frame_velocities(&seq).len(), 48);
    }

    #[test]
    fn test_center_prior_breaks_flat_ties_toward_midpoint() {
        // A static sequence has zero velocity everywhere; the prior alone
        // should pull the argmax to the midpoint neighborhood, not frame 0.
        let config = PhaseConfig::default();
        let data = Array2::from_elem((48, FEATURES_PER_FRAME), 1.0);
        let seq = Sequence::new(data).unwrap();
        let impact = estimate_impact_index(&seq, &config);
        assert!((20..=27).contains(&impact), "got {impact}");
    }

    #[test]
    fn test_bucketing_thresholds() {
        let config = PhaseConfig::default();
        // Midpoint of 48 frames is 24.
        assert_eq!(bucket_of(&burst_sequence(20), &config), PhaseBucket::Pre);
        assert_eq!(bucket_of(&burst_sequence(24), &config), PhaseBucket::Impact);
        assert_eq!(bucket_of(&burst_sequence(23), &config), PhaseBucket::Impact);
        assert_eq!(bucket_of(&burst_sequence(30), &config), PhaseBucket::Post);
    }

    #[test]
    fn test_bucket_names() {
        assert_eq!(PhaseBucket::Pre.as_str(), "pre");
        assert_eq!(PhaseBucket::Impact.as_str(), "impact");
        assert_eq!(PhaseBucket::Post.as_str(), "post");
    }
}
