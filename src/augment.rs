// src/augment.rs
//
// Phase-aware sequence augmentation.
//
// Nine transform kinds, chosen uniformly at random per call. Geometric
// transforms (rotate, scale, noise) perturb coordinates; temporal ones
// (time_warp, time_scale, frame_drop, impact_realign) perturb the time
// axis while keeping the pre/impact/post structure intact. Every output
// is re-normalized so augmented sequences stay on the same centering and
// scale convention as real ones. Inputs are never mutated.

use crate::phase::estimate_impact_index;
use crate::sequence::Sequence;
use crate::types::{PhaseConfig, SequenceConfig};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    Rotate,
    Scale,
    Noise,
    TimeWarp,
    TimeScale,
    FrameDrop,
    PostImpactMask,
    LocalizedNoise,
    ImpactRealign,
}

impl TransformKind {
    pub const ALL: [TransformKind; 9] = [
        TransformKind::Rotate,
        TransformKind::Scale,
        TransformKind::Noise,
        TransformKind::TimeWarp,
        TransformKind::TimeScale,
        TransformKind::FrameDrop,
        TransformKind::PostImpactMask,
        TransformKind::LocalizedNoise,
        TransformKind::ImpactRealign,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rotate => "rotate",
            Self::Scale => "scale",
            Self::Noise => "noise",
            Self::TimeWarp => "time_warp",
            Self::TimeScale => "time_scale",
            Self::FrameDrop => "frame_drop",
            Self::PostImpactMask => "post_impact_mask",
            Self::LocalizedNoise => "localized_noise",
            Self::ImpactRealign => "impact_realign",
        }
    }
}

/// How post_impact_mask suppresses the window after the strike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskMode {
    /// Extra Gaussian noise over the window.
    Noise,
    /// Blend each frame halfway toward the window mean.
    Blend,
}

pub struct AugmentationEngine {
    rng: StdRng,
    phase: PhaseConfig,
    scale_epsilon: f32,
}

impl AugmentationEngine {
    pub fn new(seed: Option<u64>, phase: PhaseConfig, sequence: &SequenceConfig) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            phase,
            scale_epsilon: sequence.scale_epsilon,
        }
    }

    /// One perturbed, re-normalized variant of the input: a uniformly
    /// random transform kind followed by center+scale normalization.
    pub fn augment(&mut self, seq: &Sequence) -> Sequence {
        let kind = TransformKind::ALL[self.rng.gen_range(0..TransformKind::ALL.len())];
        self.apply(seq, kind).normalized(self.scale_epsilon)
    }

    /// Apply one specific transform without the final normalization pass.
    pub fn apply(&mut self, seq: &Sequence, kind: TransformKind) -> Sequence {
        match kind {
            TransformKind::Rotate => {
                let angle = self.rng.gen_range(-5.0f32..5.0);
                rotate(seq, angle)
            }
            TransformKind::Scale => {
                let factor = self.rng.gen_range(0.95f32..1.05);
                scale(seq, factor)
            }
            TransformKind::Noise => {
                let std = self.rng.gen_range(0.003f32..0.01);
                self.add_noise(seq, std)
            }
            TransformKind::TimeWarp => {
                let amplitude = self.rng.gen_range(0.05f32..0.10);
                self.time_warp(seq, amplitude)
            }
            TransformKind::TimeScale => {
                let factor = self.rng.gen_range(0.92f32..1.08);
                self.time_scale(seq, factor)
            }
            TransformKind::FrameDrop => self.frame_drop(seq, 2),
            TransformKind::PostImpactMask => {
                self.post_impact_mask(seq, 3, MaskMode::Noise, 0.006)
            }
            TransformKind::LocalizedNoise => self.localized_noise(seq, 0.006),
            TransformKind::ImpactRealign => self.impact_realign(seq, seq.midpoint()),
        }
    }

    fn gaussian(&mut self, std: f32) -> f32 {
        let z: f32 = self.rng.sample(StandardNormal);
        z * std
    }

    /// I.i.d. Gaussian noise on every coordinate.
    fn add_noise(&mut self, seq: &Sequence, std: f32) -> Sequence {
        let mut data = seq.data().clone();
        for v in data.iter_mut() {
            *v += self.gaussian(std);
        }
        Sequence::from_raw(data)
    }

    /// Cumulative random jitter on the time axis, resampled back by
    /// linear interpolation.
    fn time_warp(&mut self, seq: &Sequence, amplitude: f32) -> Sequence {
        let n = seq.frames();
        let mut cumulative = 0.0f32;
        let positions: Vec<f32> = (0..n)
            .map(|t| {
                cumulative += self.rng.gen_range(-amplitude..amplitude);
                t as f32 + cumulative
            })
            .collect();
        Sequence::from_raw(resample_rows(seq.data(), &positions))
    }

    /// Resample at a stretched or compressed rate, resample back to the
    /// original length, then re-align the impact frame to the midpoint so
    /// the phase structure survives the speed change.
    fn time_scale(&mut self, seq: &Sequence, factor: f32) -> Sequence {
        let n = seq.frames();
        if n <= 1 || (factor - 1.0).abs() < 1e-6 {
            return seq.clone();
        }

        let new_len = ((n as f32 * factor).round() as usize).max(2);
        let stretched = resample_rows(seq.data(), &linspace(n - 1, new_len));
        let restored = resample_rows(&stretched, &linspace(new_len - 1, n));
        self.impact_realign(&Sequence::from_raw(restored), n / 2)
    }

    /// Drop 1..=max_drops interior frames (biased toward post-impact),
    /// reinterpolate to the original length, then lightly smooth the
    /// interior with a 3-point average.
    fn frame_drop(&mut self, seq: &Sequence, max_drops: usize) -> Sequence {
        let n = seq.frames();
        if n <= 3 || max_drops == 0 {
            return seq.clone();
        }

        let impact = estimate_impact_index(seq, &self.phase);
        let num_drop = self.rng.gen_range(1..=max_drops);

        // Interior frames only; post-impact frames 1.5x more likely.
        let mut candidates: Vec<usize> = (1..n - 1).collect();
        let mut weights: Vec<f32> = candidates
            .iter()
            .map(|&i| if i > impact { 1.5 } else { 1.0 })
            .collect();

        let mut drops = Vec::with_capacity(num_drop);
        for _ in 0..num_drop.min(candidates.len()) {
            let total: f32 = weights.iter().sum();
            if total <= 0.0 {
                break;
            }
            let mut r = self.rng.gen_range(0.0..total);
            let mut chosen = candidates.len() - 1;
            for (k, &w) in weights.iter().enumerate() {
                if r < w {
                    chosen = k;
                    break;
                }
                r -= w;
            }
            drops.push(candidates.remove(chosen));
            weights.remove(chosen);
        }
        drops.sort_unstable();

        let kept_rows: Vec<usize> = (0..n).filter(|t| !drops.contains(t)).collect();
        let mut kept = Array2::zeros((kept_rows.len(), seq.features()));
        for (out_t, &src_t) in kept_rows.iter().enumerate() {
            kept.row_mut(out_t).assign(&seq.data().row(src_t));
        }

        let mut restored = resample_rows(&kept, &linspace(kept_rows.len() - 1, n));

        if n >= 5 {
            let before = restored.clone();
            for t in 1..n - 1 {
                for j in 0..restored.ncols() {
                    restored[[t, j]] =
                        (before[[t - 1, j]] + 2.0 * before[[t, j]] + before[[t + 1, j]]) / 4.0;
                }
            }
        }
        Sequence::from_raw(restored)
    }

    /// Suppress the short window right after the estimated impact frame,
    /// either with extra noise or by blending toward the window mean.
    fn post_impact_mask(
        &mut self,
        seq: &Sequence,
        window: usize,
        mode: MaskMode,
        noise_std: f32,
    ) -> Sequence {
        let n = seq.frames();
        let impact = estimate_impact_index(seq, &self.phase);
        let start = (impact + 1).min(n - 1);
        let end = (start + window.max(1)).min(n);
        let mut data = seq.data().clone();
        if start >= end {
            return Sequence::from_raw(data);
        }

        match mode {
            MaskMode::Noise => {
                for t in start..end {
                    for j in 0..data.ncols() {
                        data[[t, j]] += self.gaussian(noise_std);
                    }
                }
            }
            MaskMode::Blend => {
                let span = (end - start) as f32;
                let means: Vec<f32> = (0..data.ncols())
                    .map(|j| (start..end).map(|t| data[[t, j]]).sum::<f32>() / span)
                    .collect();
                let alpha = 0.5;
                for t in start..end {
                    for (j, &mean) in means.iter().enumerate() {
                        data[[t, j]] = alpha * data[[t, j]] + (1.0 - alpha) * mean;
                    }
                }
            }
        }
        Sequence::from_raw(data)
    }

    /// Per-joint noise scaled by the joint's mean radial distance from the
    /// clip centroid, so wrists and ankles wobble more than hips.
    fn localized_noise(&mut self, seq: &Sequence, base_std: f32) -> Sequence {
        let radii = seq.joint_radii();
        let weights = radius_weights(&radii);

        let mut data = seq.data().clone();
        let n = data.nrows();
        for (k, &w) in weights.iter().enumerate() {
            let std = base_std * w;
            for t in 0..n {
                data[[t, 2 * k]] += self.gaussian(std);
                data[[t, 2 * k + 1]] += self.gaussian(std);
            }
        }
        Sequence::from_raw(data)
    }

    /// Time-shift the whole sequence, edge-replicated, so the estimated
    /// impact frame lands on `target`.
    pub fn impact_realign(&mut self, seq: &Sequence, target: usize) -> Sequence {
        let n = seq.frames();
        let impact = estimate_impact_index(seq, &self.phase);
        let shift = target as i64 - impact as i64;
        if shift == 0 {
            return seq.clone();
        }

        let mut data = Array2::zeros((n, seq.features()));
        for t in 0..n {
            let src = (t as i64 - shift).clamp(0, n as i64 - 1) as usize;
            data.row_mut(t).assign(&seq.data().row(src));
        }
        Sequence::from_raw(data)
    }
}

/// Rotate all joints about the clip centroid.
fn rotate(seq: &Sequence, angle_degrees: f32) -> Sequence {
    let (cx, cy) = seq.centroid();
    let angle = angle_degrees.to_radians();
    let (sin, cos) = angle.sin_cos();

    let mut data = seq.data().clone();
    for mut row in data.rows_mut() {
        for j in (0..row.len()).step_by(2) {
            let x = row[j] - cx;
            let y = row[j + 1] - cy;
            row[j] = x * cos - y * sin + cx;
            row[j + 1] = x * sin + y * cos + cy;
        }
    }
    Sequence::from_raw(data)
}

/// Uniformly scale distances from the clip centroid.
fn scale(seq: &Sequence, factor: f32) -> Sequence {
    let (cx, cy) = seq.centroid();
    let mut data = seq.data().clone();
    for mut row in data.rows_mut() {
        for j in (0..row.len()).step_by(2) {
            row[j] = (row[j] - cx) * factor + cx;
            row[j + 1] = (row[j + 1] - cy) * factor + cy;
        }
    }
    Sequence::from_raw(data)
}

/// Map per-joint radii to noise weights in [0.8, 1.2].
fn radius_weights(radii: &[f32]) -> Vec<f32> {
    if radii.is_empty() {
        return Vec::new();
    }
    let r_min = radii.iter().cloned().fold(f32::INFINITY, f32::min);
    let r_max = radii.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if r_max - r_min < 1e-9 {
        return vec![1.0; radii.len()];
    }
    radii
        .iter()
        .map(|&r| 0.8 + 0.4 * (r - r_min) / (r_max - r_min))
        .collect()
}

/// `count` evenly spaced positions from 0.0 to `end` inclusive.
fn linspace(end: usize, count: usize) -> Vec<f32> {
    if count <= 1 {
        return vec![0.0];
    }
    let step = end as f32 / (count - 1) as f32;
    (0..count).map(|i| i as f32 * step).collect()
}

/// Sample rows of `data` at fractional frame positions (clamped to the
/// valid range) by linear interpolation between neighboring frames.
fn resample_rows(data: &Array2<f32>, positions: &[f32]) -> Array2<f32> {
    let n = data.nrows();
    let mut out = Array2::zeros((positions.len(), data.ncols()));
    for (t, &pos) in positions.iter().enumerate() {
        let pos = pos.clamp(0.0, (n - 1) as f32);
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(n - 1);
        let frac = pos - lo as f32;
        let row_lo = data.row(lo);
        let row_hi = data.row(hi);
        for j in 0..data.ncols() {
            out[[t, j]] = row_lo[j] + (row_hi[j] - row_lo[j]) * frac;
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
