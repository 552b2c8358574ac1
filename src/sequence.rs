// src/sequence.rs
//
// Fixed-length joint sequences and the centering/scale normalization
// convention shared by real and augmented data.
//
// A sequence is (frames, features) with features = 12 body joints * (x, y),
// even columns x, odd columns y. Classifier input units are exactly 48
// frames; shorter or longer track slices are fitted at the extraction
// boundary and nowhere else.

use crate::types::FEATURES_PER_FRAME;
use anyhow::{bail, Result};
use ndarray::{Array2, Axis};

#[derive(Debug, Clone)]
pub struct Sequence {
    data: Array2<f32>,
}

impl Sequence {
    /// Wrap a (frames, features) array. Rejects empty input and any
    /// feature count other than the 24 body-joint columns; a mismatch
    /// here means the caller fed face keypoints or a truncated row and
    /// must not reach the phase estimator or augmenter.
    pub fn new(data: Array2<f32>) -> Result<Self> {
        if data.nrows() == 0 {
            bail!("sequence has no frames");
        }
        if data.ncols() != FEATURES_PER_FRAME {
            bail!(
                "sequence has {} features per frame, expected {}",
                data.ncols(),
                FEATURES_PER_FRAME
            );
        }
        Ok(Self { data })
    }

    /// Internal constructor for transforms that preserve the validated
    /// shape by construction.
    pub(crate) fn from_raw(data: Array2<f32>) -> Self {
        Self { data }
    }

    pub fn frames(&self) -> usize {
        self.data.nrows()
    }

    pub fn features(&self) -> usize {
        self.data.ncols()
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn into_data(self) -> Array2<f32> {
        self.data
    }

    /// Midpoint frame index (integer division).
    pub fn midpoint(&self) -> usize {
        self.frames() / 2
    }

    /// Produce a sequence of exactly `target` frames:
    /// - already exact: unchanged copy
    /// - too long: centered window
    /// - too short: tail-padded by repeating the last frame
    pub fn fit_length(&self, target: usize) -> Sequence {
        let n = self.frames();
        if n == target {
            return self.clone();
        }

        if n > target {
            let start = (n - target) / 2;
            let window = self.data.slice(ndarray::s![start..start + target, ..]);
            return Sequence {
                data: window.to_owned(),
            };
        }

        let mut data = Array2::zeros((target, self.features()));
        for t in 0..target {
            let src = t.min(n - 1);
            data.row_mut(t).assign(&self.data.row(src));
        }
        Sequence { data }
    }

    /// Center the clip on its mean (x and y separately) and divide every
    /// coordinate by the standard deviation of all coordinates. The scale
    /// is floored at `eps`: a near-static clip is centered but not blown up.
    /// Idempotent after the first application.
    pub fn normalized(&self, eps: f32) -> Sequence {
        let mut data = self.data.clone();

        let (mut sum_x, mut sum_y) = (0.0f64, 0.0f64);
        let half = (data.len() / 2) as f64;
        for row in data.rows() {
            for j in (0..row.len()).step_by(2) {
                sum_x += row[j] as f64;
                sum_y += row[j + 1] as f64;
            }
        }
        let (cx, cy) = ((sum_x / half) as f32, (sum_y / half) as f32);

        for mut row in data.rows_mut() {
            for j in (0..row.len()).step_by(2) {
                row[j] -= cx;
                row[j + 1] -= cy;
            }
        }

        // Population standard deviation over every coordinate in the clip.
        let count = data.len() as f64;
        let mean: f64 = data.iter().map(|&v| v as f64).sum::<f64>() / count;
        let var: f64 = data
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / count;
        let mut scale = var.sqrt() as f32;
        if scale < eps {
            scale = 1.0;
        }

        data.mapv_inplace(|v| v / scale);
        Sequence { data }
    }

    /// Mean position over every joint in every frame of the clip.
    pub fn centroid(&self) -> (f32, f32) {
        let (mut cx, mut cy) = (0.0f32, 0.0f32);
        for row in self.data.rows() {
            for j in (0..row.len()).step_by(2) {
                cx += row[j];
                cy += row[j + 1];
            }
        }
        let total = (self.data.len() / 2) as f32;
        (cx / total, cy / total)
    }

    /// Per-joint mean radial distance from the clip centroid, one value
    /// per body joint. Distal joints (wrists, ankles) come out larger.
    pub fn joint_radii(&self) -> Vec<f32> {
        let n_joints = self.features() / 2;
        let frames = self.frames() as f32;
        let (cx, cy) = self.centroid();

        (0..n_joints)
            .map(|k| {
                let xs = self.data.index_axis(Axis(1), 2 * k);
                let ys = self.data.index_axis(Axis(1), 2 * k + 1);
                xs.iter()
                    .zip(ys.iter())
                    .map(|(&x, &y)| ((x - cx).powi(2) + (y - cy).powi(2)).sqrt())
                    .sum::<f32>()
                    / frames
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    pub fn ramp_sequence(frames: usize) -> Sequence {
        let data = Array2::from_shape_fn((frames, FEATURES_PER_FRAME), |(t, j)| {
            t as f32 * 2.0 + j as f32 * 0.5
        });
        Sequence::new(data).unwrap()
    }

    #[test]
    fn test_rejects_empty_and_wrong_width() {
        assert!(Sequence::new(Array2::zeros((0, FEATURES_PER_FRAME))).is_err());
        assert!(Sequence::new(Array2::zeros((10, 34))).is_err());
        assert!(Sequence::new(Array2::zeros((10, FEATURES_PER_FRAME))).is_ok());
    }

    #[test]
    fn test_fit_length_identity() {
        let seq = ramp_sequence(48);
        let fitted = seq.fit_length(48);
        assert_eq!(fitted.data(), seq.data());
    }

    #[test]
    fn test_fit_length_centered_truncation() {
        let seq = ramp_sequence(60);
        let fitted = seq.fit_length(48);
        assert_eq!(fitted.frames(), 48);
        // (60 - 48) / 2 = 6 frames trimmed from the head.
        assert_eq!(fitted.data().row(0), seq.data().row(6));
        assert_eq!(fitted.data().row(47), seq.data().row(53));
    }

    #[test]
    fn test_fit_length_tail_padding() {
        let seq = ramp_sequence(40);
        let fitted = seq.fit_length(48);
        assert_eq!(fitted.frames(), 48);
        assert_eq!(fitted.data().row(39), seq.data().row(39));
        // Frames 40..48 repeat the last real frame.
        for t in 40..48 {
            assert_eq!(fitted.data().row(t), seq.data().row(39));
        }
    }

    #[test]
    fn test_normalize_centers_and_unit_scales() {
        let seq = ramp_sequence(48);
        let norm = seq.normalized(1e-6);

        let mean: f32 = norm.data().iter().sum::<f32>() / norm.data().len() as f32;
        let var: f32 = norm.data().iter().map(|&v| (v - mean).powi(2)).sum::<f32>()
            / norm.data().len() as f32;
        assert!(var.sqrt() > 0.99 && var.sqrt() < 1.01, "std should be ~1");

        let (mut sx, mut sy) = (0.0f32, 0.0f32);
        for row in norm.data().rows() {
            for j in (0..row.len()).step_by(2) {
                sx += row[j];
                sy += row[j + 1];
            }
        }
        assert!(sx.abs() < 1e-2, "x centroid should be ~0, got {sx}");
        assert!(sy.abs() < 1e-2, "y centroid should be ~0, got {sy}");
    }

    #[test]
    fn test_normalize_idempotent() {
        let seq = ramp_sequence(48);
        let once = seq.normalized(1e-6);
        let twice = once.normalized(1e-6);
        for (a, b) in once.data().iter().zip(twice.data().iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_normalize_static_clip_keeps_scale() {
        // All joints identical in every frame: std is 0, the epsilon floor
        // must prevent a divide-by-zero blowup.
        let data = Array2::from_elem((48, FEATURES_PER_FRAME), 7.0);
        let seq = Sequence::new(data).unwrap();
        let norm = seq.normalized(1e-6);
        for &v in norm.data().iter() {
            assert!(v.abs() < 1e-5);
        }
    }

    #[test]
    fn test_joint_radii_distal_larger() {
        // Joint 0 pinned at the centroid area, joint 11 far out.
        let data = Array2::from_shape_fn((10, FEATURES_PER_FRAME), |(_, j)| {
            if j >= 22 {
                100.0
            } else {
                0.0
            }
        });
        let seq = Sequence::new(data).unwrap();
        let radii = seq.joint_radii();
        assert_eq!(radii.len(), 12);
        assert!(radii[11] > radii[0]);
    }
}
