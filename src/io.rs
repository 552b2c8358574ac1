// src/io.rs
//
// Filesystem boundary of the pipeline.
//
// Input side: per-clip directories of per-frame detection JSON files
// (the pose-model boundary) and per-subject directories of extracted
// clip sequences. Output side: the per-clip track table and movement
// summary, and the balanced dataset with its manifest.

use crate::balance::PooledSequence;
use crate::phase::PhaseBucket;
use crate::sequence::Sequence;
use crate::tracker::{TrackRow, TrackSummary};
use crate::types::{Detection, FrameDetections, FEATURES_PER_FRAME, FIRST_BODY_JOINT};
use anyhow::{Context, Result};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directories under `root` that contain at least one per-frame detection
/// JSON file, sorted by path. Each one is treated as a clip.
pub fn find_clip_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut clips: BTreeMap<PathBuf, usize> = BTreeMap::new();

    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            if let Some(parent) = path.parent() {
                *clips.entry(parent.to_path_buf()).or_insert(0) += 1;
            }
        }
    }

    let dirs: Vec<PathBuf> = clips.into_keys().collect();
    info!("Found {} clip director(ies) under {}", dirs.len(), root.display());
    Ok(dirs)
}

/// Load one clip's frames, sorted by file name. Unreadable or
/// undecodable frame files are logged and skipped entirely; they do not
/// advance tracker state. Frame indices are positions in the readable
/// sorted order.
pub fn load_clip_frames(clip_dir: &Path) -> Result<Vec<FrameDetections>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(clip_dir)
        .with_context(|| format!("failed to read clip dir {}", clip_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut frames = Vec::with_capacity(paths.len());
    for path in paths {
        let frame_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        let detections: Vec<Detection> = match fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|text| serde_json::from_str(&text).map_err(anyhow::Error::from))
        {
            Ok(d) => d,
            Err(e) => {
                warn!("Skipping unreadable frame {}: {e:#}", path.display());
                continue;
            }
        };
        frames.push(FrameDetections {
            frame_index: frames.len(),
            frame_name,
            detections,
        });
    }
    Ok(frames)
}

fn keypoint_header() -> String {
    let mut header = String::from("frame_index,frame_name,track_id");
    for idx in FIRST_BODY_JOINT..FIRST_BODY_JOINT + FEATURES_PER_FRAME / 2 {
        header.push_str(&format!(",kpt_{idx}_x,kpt_{idx}_y"));
    }
    header
}

/// Per-clip keypoint table: one row per frame per track, body joints only.
pub fn write_track_table(path: &Path, rows: &[TrackRow]) -> Result<()> {
    let mut out = String::new();
    out.push_str(&keypoint_header());
    out.push('\n');
    for row in rows {
        out.push_str(&format!(
            "{},{},{}",
            row.frame_index, row.frame_name, row.track_id
        ));
        for joint in &row.joints {
            out.push_str(&format!(",{},{}", joint[0], joint[1]));
        }
        out.push('\n');
    }
    write_file(path, &out)
}

/// Per-clip movement summary: one row per track.
pub fn write_movement_summary(path: &Path, summaries: &[TrackSummary]) -> Result<()> {
    let mut out = String::from("track_id,total_movement,num_frames,first_frame,last_frame,active\n");
    for s in summaries {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            s.track_id, s.total_movement, s.num_frames, s.first_frame, s.last_frame, s.active
        ));
    }
    write_file(path, &out)
}

/// Load an extracted clip sequence from a `keypoints_with_tracks.csv`.
/// Rows whose frame name contains "(1)" are duplicate extractions and are
/// dropped. Returns Ok(None) when the remaining row count is not exactly
/// `expected_frames` (the clip was not cleanly extracted).
pub fn load_sequence_csv(path: &Path, expected_frames: usize) -> Result<Option<Sequence>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read sequence {}", path.display()))?;
    let mut lines = text.lines();
    let Some(header) = lines.next() else {
        return Ok(None);
    };

    // Column positions of the keypoint pairs, in header order.
    let kpt_cols: Vec<usize> = header
        .split(',')
        .enumerate()
        .filter(|(_, name)| name.starts_with("kpt_"))
        .map(|(i, _)| i)
        .collect();
    if kpt_cols.len() != FEATURES_PER_FRAME {
        warn!(
            "{}: {} keypoint columns, expected {}",
            path.display(),
            kpt_cols.len(),
            FEATURES_PER_FRAME
        );
        return Ok(None);
    }
    let name_col = header.split(',').position(|c| c == "frame_name");

    let mut rows: Vec<Vec<f32>> = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if let Some(nc) = name_col {
            if fields.get(nc).is_some_and(|name| name.contains("(1)")) {
                continue;
            }
        }
        let mut row = Vec::with_capacity(FEATURES_PER_FRAME);
        for &col in &kpt_cols {
            let value = fields
                .get(col)
                .and_then(|f| f.trim().parse::<f32>().ok())
                .with_context(|| format!("bad value in {} column {col}", path.display()))?;
            row.push(value);
        }
        rows.push(row);
    }

    if rows.len() != expected_frames {
        debug!(
            "{}: {} usable frames, expected {}, skipping",
            path.display(),
            rows.len(),
            expected_frames
        );
        return Ok(None);
    }

    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    let data = Array2::from_shape_vec((expected_frames, FEATURES_PER_FRAME), flat)
        .context("sequence rows did not form a rectangular array")?;
    Ok(Some(Sequence::new(data)?))
}

/// Load every subject's pool of real, normalized sequences from
/// `subjects_dir/<subject>/<clip>/keypoints_with_tracks.csv`. Subjects
/// are the immediate child directories; clips that do not yield a clean
/// `expected_frames`-frame sequence are skipped with a log line.
pub fn load_subject_pools(
    subjects_dir: &Path,
    expected_frames: usize,
    scale_epsilon: f32,
) -> Result<Vec<(String, Vec<PooledSequence>)>> {
    use crate::balance::Origin;

    let mut subjects: Vec<(String, Vec<PooledSequence>)> = Vec::new();
    let mut subject_dirs: Vec<PathBuf> = fs::read_dir(subjects_dir)
        .with_context(|| format!("failed to read subjects dir {}", subjects_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    subject_dirs.sort();

    for subject_dir in subject_dirs {
        let subject = subject_dir
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        let mut pool = Vec::new();

        let mut clip_dirs: Vec<PathBuf> = fs::read_dir(&subject_dir)
            .with_context(|| format!("failed to read {}", subject_dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        clip_dirs.sort();

        for clip_dir in clip_dirs {
            let csv = clip_dir.join("keypoints_with_tracks.csv");
            if !csv.exists() {
                continue;
            }
            let clip = clip_dir
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string();
            match load_sequence_csv(&csv, expected_frames)? {
                Some(seq) => pool.push(PooledSequence {
                    sequence: seq.normalized(scale_epsilon),
                    origin: Origin::Original,
                    source_clip: clip,
                }),
                None => debug!("{}: clip {} skipped", subject, clip),
            }
        }

        info!("{}: loaded {} real sequence(s)", subject, pool.len());
        subjects.push((subject, pool));
    }
    Ok(subjects)
}

/// Write one balanced subject: a CSV per sequence plus manifest rows.
/// Returns the manifest lines for this subject.
pub fn write_subject_dataset(
    dataset_dir: &Path,
    subject: &str,
    items: &[(PooledSequence, PhaseBucket)],
) -> Result<Vec<String>> {
    let subject_dir = dataset_dir.join(subject);
    fs::create_dir_all(&subject_dir)
        .with_context(|| format!("failed to create {}", subject_dir.display()))?;

    let mut manifest = Vec::with_capacity(items.len());
    for (i, (item, bucket)) in items.iter().enumerate() {
        let file_name = format!("{subject}_{i:03}.csv");
        let mut out = String::new();
        for row in item.sequence.data().rows() {
            let fields: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            out.push_str(&fields.join(","));
            out.push('\n');
        }
        write_file(&subject_dir.join(&file_name), &out)?;
        manifest.push(format!(
            "{subject},{file_name},{},{},{}",
            item.origin.as_str(),
            item.source_clip,
            bucket.as_str()
        ));
    }
    Ok(manifest)
}

/// The dataset-wide manifest: subject, file, origin, source clip, bucket.
pub fn write_manifest(dataset_dir: &Path, lines: &[String]) -> Result<()> {
    let mut out = String::from("subject,file,origin,source_clip,phase_bucket\n");
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    write_file(&dataset_dir.join("manifest.csv"), &out)
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    let mut file = fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackRow;
    use std::env;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("serve_pose_io_{tag}_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_keypoint_header_covers_joints_5_to_16() {
        let header = keypoint_header();
        assert!(header.starts_with("frame_index,frame_name,track_id,kpt_5_x,kpt_5_y"));
        assert!(header.ends_with("kpt_16_x,kpt_16_y"));
        assert_eq!(header.split(',').count(), 3 + FEATURES_PER_FRAME);
    }

    #[test]
    fn test_track_table_roundtrips_as_sequence() {
        let dir = temp_dir("table");
        let rows: Vec<TrackRow> = (0..48)
            .map(|t| TrackRow {
                frame_index: t,
                frame_name: format!("frame_{t:04}"),
                track_id: 0,
                joints: (0..12).map(|j| [t as f32 + j as f32, t as f32]).collect(),
            })
            .collect();
        let path = dir.join("keypoints_with_tracks.csv");
        write_track_table(&path, &rows).unwrap();

        let seq = load_sequence_csv(&path, 48).unwrap().expect("should load");
        assert_eq!(seq.frames(), 48);
        assert_eq!(seq.data()[[3, 0]], 3.0);
        assert_eq!(seq.data()[[3, 2]], 4.0);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_sequence_csv_drops_duplicate_frames() {
        let dir = temp_dir("dedup");
        let mut rows: Vec<TrackRow> = (0..48)
            .map(|t| TrackRow {
                frame_index: t,
                frame_name: format!("frame_{t:04}"),
                track_id: 0,
                joints: (0..12).map(|_| [1.0, 2.0]).collect(),
            })
            .collect();
        // A duplicate-extraction row: excluded by the "(1)" filter.
        rows.push(TrackRow {
            frame_index: 48,
            frame_name: "frame_0000 (1)".to_string(),
            track_id: 0,
            joints: (0..12).map(|_| [9.0, 9.0]).collect(),
        });
        let path = dir.join("keypoints_with_tracks.csv");
        write_track_table(&path, &rows).unwrap();

        let seq = load_sequence_csv(&path, 48).unwrap().expect("should load");
        assert_eq!(seq.frames(), 48);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_sequence_csv_wrong_length_is_skipped_not_error() {
        let dir = temp_dir("short");
        let rows: Vec<TrackRow> = (0..30)
            .map(|t| TrackRow {
                frame_index: t,
                frame_name: format!("frame_{t:04}"),
                track_id: 0,
                joints: (0..12).map(|_| [0.0, 0.0]).collect(),
            })
            .collect();
        let path = dir.join("keypoints_with_tracks.csv");
        write_track_table(&path, &rows).unwrap();

        assert!(load_sequence_csv(&path, 48).unwrap().is_none());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_unreadable_frame_skipped() {
        let dir = temp_dir("badframe");
        fs::write(dir.join("frame_0000.json"), "[]").unwrap();
        fs::write(dir.join("frame_0001.json"), "not json at all").unwrap();
        fs::write(
            dir.join("frame_0002.json"),
            r#"[{"keypoints": [[1.0, 2.0]], "bbox": [0.0, 0.0, 1.0, 1.0]}]"#,
        )
        .unwrap();

        let frames = load_clip_frames(&dir).unwrap();
        assert_eq!(frames.len(), 2, "corrupt frame must be skipped");
        assert_eq!(frames[0].detections.len(), 0);
        assert_eq!(frames[1].detections.len(), 1);
        fs::remove_dir_all(dir).ok();
    }
}
