// src/main.rs

mod augment;
mod balance;
mod config;
mod io;
mod phase;
mod sequence;
mod tracker;
mod types;

use anyhow::Result;
use augment::AugmentationEngine;
use balance::ClassBalancer;
use phase::bucket_of;
use std::path::Path;
use tracker::IdentityTracker;
use tracing::{info, warn};
use types::Config;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("serve_pose_pipeline=info")
        .init();

    info!("🎾 Serve Pose Dataset Pipeline Starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;
    info!("✓ Configuration loaded");
    info!(
        "Tracker: gate={:.0}px, miss threshold={} frames; sequences {}x{}",
        config.tracker.distance_gate,
        config.tracker.max_missed_frames,
        config.sequence.length,
        types::FEATURES_PER_FRAME
    );

    run_tracking_stage(&config)?;
    run_balancing_stage(&config)?;

    info!("✓ Pipeline complete");
    Ok(())
}

/// Stage 1: turn per-frame detections into per-clip track tables and
/// movement summaries.
fn run_tracking_stage(config: &Config) -> Result<()> {
    let detections_root = Path::new(&config.io.detections_dir);
    if !detections_root.exists() {
        info!(
            "No detections directory at {}, skipping tracking stage",
            detections_root.display()
        );
        return Ok(());
    }

    let clip_dirs = io::find_clip_dirs(detections_root)?;
    if clip_dirs.is_empty() {
        warn!("No clips found under {}", detections_root.display());
        return Ok(());
    }

    let tracks_root = Path::new(&config.io.tracks_dir);

    for (idx, clip_dir) in clip_dirs.iter().enumerate() {
        let clip_name = clip_dir
            .strip_prefix(detections_root)
            .unwrap_or(clip_dir)
            .to_string_lossy()
            .to_string();
        info!(
            "Processing clip {}/{}: {}",
            idx + 1,
            clip_dirs.len(),
            clip_name
        );

        let frames = io::load_clip_frames(clip_dir)?;
        let mut tracker = IdentityTracker::new(config.tracker.clone());
        let mut rows = Vec::new();
        for frame in &frames {
            rows.extend(tracker.process_frame(frame));
        }

        let summaries = tracker.summaries();
        if summaries.is_empty() {
            warn!("{}: no people detected in {} frames", clip_name, frames.len());
            continue;
        }

        let out_dir = tracks_root.join(&clip_name);
        std::fs::create_dir_all(&out_dir)?;
        io::write_track_table(&out_dir.join("keypoints_with_tracks.csv"), &rows)?;
        io::write_movement_summary(&out_dir.join("movement_summary.csv"), &summaries)?;

        if let Some(most) = tracker.most_moved() {
            info!(
                "🏃 {}: track {} moved the most (total {:.2} over {} frames)",
                clip_name, most.track_id, most.total_movement, most.num_frames
            );
        }
    }
    Ok(())
}

/// Stage 2: load per-subject sequence pools, balance them to a common
/// target with phase-aware augmentation, and write the dataset.
fn run_balancing_stage(config: &Config) -> Result<()> {
    let subjects_root = Path::new(&config.io.subjects_dir);
    if !subjects_root.exists() {
        info!(
            "No subjects directory at {}, skipping balancing stage",
            subjects_root.display()
        );
        return Ok(());
    }

    let pools = io::load_subject_pools(
        subjects_root,
        config.sequence.length,
        config.sequence.scale_epsilon,
    )?;
    if pools.is_empty() {
        warn!("No subjects found under {}", subjects_root.display());
        return Ok(());
    }

    let mut engine = AugmentationEngine::new(config.seed, config.phase.clone(), &config.sequence);
    let mut balancer = ClassBalancer::new(
        config.balance.clone(),
        config.phase.clone(),
        config.seed.map(|s| s.wrapping_add(1)),
    );

    let pool_sizes: Vec<usize> = pools.iter().map(|(_, pool)| pool.len()).collect();
    let target = balancer.target_per_class(&pool_sizes);
    info!("Balancing target: {} sequences per subject", target);

    let dataset_root = Path::new(&config.io.dataset_dir);
    std::fs::create_dir_all(dataset_root)?;

    let mut manifest = Vec::new();
    for (subject, pool) in &pools {
        let balanced = balancer.balance_subject(subject, pool, target, &mut engine);
        if balanced.len() < target {
            warn!(
                "{}: only {} of {} sequences available",
                subject,
                balanced.len(),
                target
            );
        }
        let items: Vec<_> = balanced
            .into_iter()
            .map(|item| {
                let bucket = bucket_of(&item.sequence, &config.phase);
                (item, bucket)
            })
            .collect();
        manifest.extend(io::write_subject_dataset(dataset_root, subject, &items)?);
    }
    io::write_manifest(dataset_root, &manifest)?;
    info!(
        "✓ Balanced dataset written to {} ({} sequences)",
        dataset_root.display(),
        manifest.len()
    );
    Ok(())
}
