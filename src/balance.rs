// src/balance.rs
//
// Phase-aware class balancing.
//
// Each subject's real sequences are partitioned into the three phase
// buckets, then synthesized sequences fill the per-bucket shortfalls
// until every bucket meets its share of the target (ratio 1:1:2 by
// default). The quota loop is bounded: it terminates when all buckets
// are satisfied, when no donor sequence exists anywhere, or at a hard
// iteration ceiling on pathological input.

use crate::augment::AugmentationEngine;
use crate::phase::{bucket_of, PhaseBucket};
use crate::sequence::Sequence;
use crate::types::{BalanceConfig, PhaseConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

/// Whether a pooled sequence came from a real clip or the augmenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Original,
    Synthesized,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "orig",
            Self::Synthesized => "aug",
        }
    }
}

/// One sequence with its provenance metadata, as consumed by the
/// downstream classifier trainer.
#[derive(Debug, Clone)]
pub struct PooledSequence {
    pub sequence: Sequence,
    pub origin: Origin,
    pub source_clip: String,
}

/// Fixed three-bucket counts. An explicit struct rather than a map keeps
/// the 1:1:2 ratio arithmetic total and statically complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketCounts {
    pub pre: usize,
    pub impact: usize,
    pub post: usize,
}

impl BucketCounts {
    pub fn get(&self, bucket: PhaseBucket) -> usize {
        match bucket {
            PhaseBucket::Pre => self.pre,
            PhaseBucket::Impact => self.impact,
            PhaseBucket::Post => self.post,
        }
    }

    pub fn bump(&mut self, bucket: PhaseBucket) {
        match bucket {
            PhaseBucket::Pre => self.pre += 1,
            PhaseBucket::Impact => self.impact += 1,
            PhaseBucket::Post => self.post += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pre + self.impact + self.post
    }
}

/// Desired per-bucket counts for a target size: floor(target * r / sum)
/// per bucket, remainder handed out post, then impact, then pre.
pub fn desired_counts(target: usize, config: &BalanceConfig) -> BucketCounts {
    let ratio_sum = config.ratio_pre + config.ratio_impact + config.ratio_post;
    if ratio_sum == 0 {
        return BucketCounts::default();
    }
    let mut desired = BucketCounts {
        pre: target * config.ratio_pre / ratio_sum,
        impact: target * config.ratio_impact / ratio_sum,
        post: target * config.ratio_post / ratio_sum,
    };
    let mut remainder = target - desired.total();
    for bucket in [PhaseBucket::Post, PhaseBucket::Impact, PhaseBucket::Pre] {
        if remainder == 0 {
            break;
        }
        desired.bump(bucket);
        remainder -= 1;
    }
    desired
}

/// Donor bucket order when the shortfall bucket has no real sequences.
const FALLBACK_ORDER: [PhaseBucket; 3] = [PhaseBucket::Post, PhaseBucket::Impact, PhaseBucket::Pre];

pub struct ClassBalancer {
    config: BalanceConfig,
    phase: PhaseConfig,
    rng: StdRng,
}

impl ClassBalancer {
    pub fn new(config: BalanceConfig, phase: PhaseConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { config, phase, rng }
    }

    /// Effective target size: the configured minimum or the largest real
    /// pool across subjects, whichever is bigger.
    pub fn target_per_class(&self, pool_sizes: &[usize]) -> usize {
        let largest = pool_sizes.iter().copied().max().unwrap_or(0);
        self.config.min_target_per_class.max(largest)
    }

    /// Balance one subject's pool to `target` sequences matching the
    /// configured phase ratio. Real sequences are all kept as seeds;
    /// synthesized ones fill bucket shortfalls. Returns fewer than
    /// `target` only when no donor material exists.
    pub fn balance_subject(
        &mut self,
        subject: &str,
        pool: &[PooledSequence],
        target: usize,
        engine: &mut AugmentationEngine,
    ) -> Vec<PooledSequence> {
        let desired = desired_counts(target, &self.config);

        // Partition real sequences by phase bucket. These partitions are
        // the donor lists for augmentation; synthesized output never
        // becomes a donor.
        let mut donors_pre: Vec<&PooledSequence> = Vec::new();
        let mut donors_impact: Vec<&PooledSequence> = Vec::new();
        let mut donors_post: Vec<&PooledSequence> = Vec::new();
        let mut counts = BucketCounts::default();
        let mut output: Vec<PooledSequence> = Vec::with_capacity(target);

        for item in pool {
            let bucket = bucket_of(&item.sequence, &self.phase);
            counts.bump(bucket);
            match bucket {
                PhaseBucket::Pre => donors_pre.push(item),
                PhaseBucket::Impact => donors_impact.push(item),
                PhaseBucket::Post => donors_post.push(item),
            }
            output.push(item.clone());
        }

        info!(
            "{}: {} real sequences (pre={}, impact={}, post={}), target {} (pre={}, impact={}, post={})",
            subject,
            pool.len(),
            counts.pre,
            counts.impact,
            counts.post,
            target,
            desired.pre,
            desired.impact,
            desired.post
        );

        let donors = |bucket: PhaseBucket| -> &Vec<&PooledSequence> {
            match bucket {
                PhaseBucket::Pre => &donors_pre,
                PhaseBucket::Impact => &donors_impact,
                PhaseBucket::Post => &donors_post,
            }
        };

        // Round-robin cursor per donor bucket.
        let mut cursors = BucketCounts::default();
        // Each synthesized sequence is credited to the bucket it was
        // produced for, so total shortfall strictly decreases and the loop
        // is bounded by the target; the cap is a guard on top of that.
        let iteration_cap = target.saturating_mul(4).max(16);
        let mut synthesized = 0usize;

        for _ in 0..iteration_cap {
            let shortfall = |bucket: PhaseBucket| {
                desired.get(bucket).saturating_sub(counts.get(bucket))
            };
            // Largest shortfall first; ties resolve pre, impact, post.
            let mut needy = PhaseBucket::Pre;
            let mut worst = 0usize;
            for bucket in PhaseBucket::ALL {
                let s = shortfall(bucket);
                if s > worst {
                    worst = s;
                    needy = bucket;
                }
            }
            if worst == 0 {
                break;
            }

            // Donor bucket: the needy one, or the fallback order when it
            // holds no real sequences.
            let mut donor_bucket = needy;
            if donors(donor_bucket).is_empty() {
                match FALLBACK_ORDER.iter().find(|b| !donors(**b).is_empty()) {
                    Some(bucket) => donor_bucket = *bucket,
                    None => {
                        warn!(
                            "{}: no donor sequences in any bucket, stopping at {} of {}",
                            subject,
                            output.len(),
                            target
                        );
                        break;
                    }
                }
            }

            let list = donors(donor_bucket);
            let cursor = cursors.get(donor_bucket) % list.len();
            let donor = list[cursor];
            cursors.bump(donor_bucket);

            let sequence = engine.augment(&donor.sequence);
            counts.bump(needy);
            synthesized += 1;
            debug!(
                "{}: synthesized for {} from {} ({} donor), measured bucket {}",
                subject,
                needy.as_str(),
                donor.source_clip,
                donor_bucket.as_str(),
                bucket_of(&sequence, &self.phase).as_str()
            );
            output.push(PooledSequence {
                sequence,
                origin: Origin::Synthesized,
                source_clip: donor.source_clip.clone(),
            });
        }

        if output.len() > target {
            let mut picked = rand::seq::index::sample(&mut self.rng, output.len(), target).into_vec();
            picked.sort_unstable();
            let mut kept = Vec::with_capacity(target);
            for (i, item) in output.into_iter().enumerate() {
                if picked.binary_search(&i).is_ok() {
                    kept.push(item);
                }
            }
            output = kept;
        }

        info!(
            "{}: balanced set of {} ({} synthesized)",
            subject,
            output.len(),
            synthesized
        );
        output
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SequenceConfig, FEATURES_PER_FRAME};
    use ndarray::Array2;

    fn engine() -> AugmentationEngine {
        AugmentationEngine::new(
            Some(7),
            PhaseConfig::default(),
            &SequenceConfig::default(),
        )
    }

    fn balancer() -> ClassBalancer {
        ClassBalancer::new(BalanceConfig::default(), PhaseConfig::default(), Some(7))
    }

    /// A normalized 48-frame sequence with its velocity burst at `burst`.
    fn pooled(burst: usize, clip: &str) -> PooledSequence {
        let data = Array2::from_shape_fn((48, FEATURES_PER_FRAME), |(t, j)| {
            let base = (t as f32 * 0.07 + j as f32 * 0.2).sin();
            if t > burst {
                base + 5.0
            } else {
                base
            }
        });
        PooledSequence {
            sequence: Sequence::new(data).unwrap().normalized(1e-6),
            origin: Origin::Original,
            source_clip: clip.to_string(),
        }
    }

    #[test]
    fn test_desired_counts_ratio_1_1_2() {
        let config = BalanceConfig::default();

        // 12 divides evenly: 3 / 3 / 6.
        let d = desired_counts(12, &config);
        assert_eq!((d.pre, d.impact, d.post), (3, 3, 6));

        // 18: floor gives 4/4/9, remainder 1 goes to post.
        let d = desired_counts(18, &config);
        assert_eq!((d.pre, d.impact, d.post), (4, 4, 10));
        assert_eq!(d.total(), 18);

        // 19: remainder 2 goes post then impact.
        let d = desired_counts(19, &config);
        assert_eq!((d.pre, d.impact, d.post), (4, 5, 10));
        assert_eq!(d.total(), 19);
    }

    #[test]
    fn test_target_per_class_floors_at_minimum() {
        let balancer = balancer();
        assert_eq!(balancer.target_per_class(&[3, 5, 2]), 18);
        assert_eq!(balancer.target_per_class(&[25, 5, 2]), 25);
        assert_eq!(balancer.target_per_class(&[]), 18);
    }

    #[test]
    fn test_real_sequences_all_seed_the_output() {
        let mut balancer = balancer();
        let mut engine = engine();
        let pool = vec![pooled(24, "a"), pooled(25, "b"), pooled(23, "c")];
        let out = balancer.balance_subject("subj", &pool, 12, &mut engine);

        let originals = out.iter().filter(|p| p.origin == Origin::Original).count();
        assert_eq!(originals, 3, "every real sequence must be kept");
    }

    #[test]
    fn test_all_pre_pool_synthesizes_remainder() {
        // Three real sequences, all bucketed pre; target 12 wants
        // pre=3, impact=3, post=6, so exactly 9 synthesized.
        let mut balancer = balancer();
        let mut engine = engine();
        let pool = vec![pooled(10, "a"), pooled(12, "b"), pooled(14, "c")];
        let config = PhaseConfig::default();
        for item in &pool {
            assert_eq!(bucket_of(&item.sequence, &config), PhaseBucket::Pre);
        }

        let out = balancer.balance_subject("subj", &pool, 12, &mut engine);
        let synthesized = out
            .iter()
            .filter(|p| p.origin == Origin::Synthesized)
            .count();
        assert_eq!(out.len(), 12);
        assert_eq!(synthesized, 9, "shortfall of 9 must be filled exactly");
        assert_eq!(out.len() - synthesized, 3, "all three real sequences kept");
    }

    #[test]
    fn test_empty_pool_returns_empty() {
        let mut balancer = balancer();
        let mut engine = engine();
        let out = balancer.balance_subject("subj", &[], 12, &mut engine);
        assert!(out.is_empty(), "no donors anywhere means early stop, not error");
    }

    #[test]
    fn test_oversized_pool_subsamples_to_target() {
        let mut balancer = balancer();
        let mut engine = engine();
        let pool: Vec<PooledSequence> = (0..20)
            .map(|i| pooled(10 + (i % 28), &format!("clip{i}")))
            .collect();
        let out = balancer.balance_subject("subj", &pool, 12, &mut engine);
        assert_eq!(out.len(), 12);
    }

    #[test]
    fn test_balanced_buckets_meet_desired_counts() {
        // One real sequence per bucket, target 12 (desired 3/3/6):
        // shortfalls are pre=2, impact=2, post=5, so 9 synthesized and
        // the set lands on the target exactly with no subsampling.
        let mut balancer = balancer();
        let mut engine = engine();
        let pool = vec![
            pooled(10, "pre_a"),
            pooled(24, "impact_a"),
            pooled(40, "post_a"),
        ];
        let config = PhaseConfig::default();
        assert_eq!(bucket_of(&pool[0].sequence, &config), PhaseBucket::Pre);
        assert_eq!(bucket_of(&pool[1].sequence, &config), PhaseBucket::Impact);
        assert_eq!(bucket_of(&pool[2].sequence, &config), PhaseBucket::Post);

        let out = balancer.balance_subject("subj", &pool, 12, &mut engine);
        assert_eq!(out.len(), 12);
        let synthesized = out
            .iter()
            .filter(|p| p.origin == Origin::Synthesized)
            .count();
        assert_eq!(synthesized, 9);
    }

    #[test]
    fn test_source_clip_propagates_to_synthesized() {
        let mut balancer = balancer();
        let mut engine = engine();
        let pool = vec![pooled(10, "only_clip")];
        let out = balancer.balance_subject("subj", &pool, 8, &mut engine);
        for item in &out {
            assert_eq!(item.source_clip, "only_clip");
        }
    }
}
