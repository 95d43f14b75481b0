//! Recording filename scheme and retention pruning.
//!
//! Filenames are `YYYY-MM-DD-HH-MM-SS-µµµ-<tag>.mp4`; the timestamp prefix
//! is sortable, so lexicographic order is chronological order. The retention
//! sort uses the last `-` before `.mp4` as the split point between the
//! timestamp and the free-form tag, which is why `<tag>` must
//! not itself contain a `-`-delimited suffix that reads as a split point.
//!
//! Grounded on `delivery_monitor.rs`'s flat video-directory bookkeeping,
//! adapted from its per-file-metadata `HashMap` to a directory scan with
//! `walkdir`, since retention here has no persisted watch-list, just the
//! filesystem itself.

use chrono::Local;
use std::path::{Path, PathBuf};

/// Builds a sortable recording filename from the current wall-clock time
/// and a free-form tag.
pub fn new_filename(tag: &str) -> String {
    let now = Local::now();
    format!("{}-{:03}-{}.mp4", now.format("%Y-%m-%d-%H-%M-%S"), now.timestamp_subsec_millis(), tag)
}

/// The sortable timestamp prefix of a recording filename, i.e. everything
/// before the last `-`.
fn timestamp_prefix(filename: &str) -> &str {
    let stem = filename.strip_suffix(".mp4").unwrap_or(filename);
    match stem.rfind('-') {
        Some(idx) => &stem[..idx],
        None => stem,
    }
}

/// Lists `.mp4` recordings under `cache_path`, newest first by timestamp
/// prefix; backs the `/check_records` endpoint.
pub fn list_recordings(cache_path: &Path) -> std::io::Result<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    if !cache_path.exists() {
        return Ok(names);
    }
    for entry in walkdir::WalkDir::new(cache_path).min_depth(1).max_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_file() {
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".mp4") {
                    names.push(name.to_string());
                }
            }
        }
    }
    names.sort_by(|a, b| timestamp_prefix(b).cmp(timestamp_prefix(a)));
    Ok(names)
}

/// Deletes recordings older than `cache_days`. Runs at each session start,
/// i.e. before a fresh record-start opens a new encoder on an otherwise-idle
/// recorder.
pub fn prune_expired(cache_path: &Path, cache_days: u64) -> std::io::Result<Vec<String>> {
    let cutoff = Local::now() - chrono::Duration::days(cache_days as i64);
    let cutoff_prefix = cutoff.format("%Y-%m-%d-%H-%M-%S").to_string();

    let mut removed = Vec::new();
    for name in list_recordings(cache_path)? {
        if timestamp_prefix(&name) < cutoff_prefix.as_str() {
            let path = cache_path.join(&name);
            std::fs::remove_file(&path)?;
            removed.push(name);
        }
    }
    Ok(removed)
}

pub fn path_for(cache_path: &Path, filename: &str) -> PathBuf {
    cache_path.join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_prefix_splits_at_last_dash() {
        assert_eq!(
            timestamp_prefix("2026-07-28-10-30-00-123-car blocking.mp4"),
            "2026-07-28-10-30-00-123"
        );
    }

    #[test]
    fn list_recordings_is_sorted_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2026-01-01-00-00-00-000-a.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("2026-06-01-00-00-00-000-b.mp4"), b"x").unwrap();
        let names = list_recordings(dir.path()).unwrap();
        assert_eq!(names[0], "2026-06-01-00-00-00-000-b.mp4");
        assert_eq!(names[1], "2026-01-01-00-00-00-000-a.mp4");
    }

    #[test]
    fn prune_expired_deletes_only_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let old_name = "2000-01-01-00-00-00-000-old.mp4";
        std::fs::write(dir.path().join(old_name), b"x").unwrap();
        let fresh_name = new_filename("fresh");
        std::fs::write(dir.path().join(&fresh_name), b"x").unwrap();

        let removed = prune_expired(dir.path(), 30).unwrap();
        assert_eq!(removed, vec![old_name.to_string()]);
        assert!(!dir.path().join(old_name).exists());
        assert!(dir.path().join(&fresh_name).exists());
    }
}
