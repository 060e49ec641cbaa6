//! Age/count/size cleanup of the dump output directory.
//!
//! Applies age/count/size cleanup policies on a plain "now vs. last-run"
//! cadence check -- no separate thread or timer.

use std::path::Path;
use std::time::{Duration, SystemTime};

use eyre::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::util::fs::get_files_sorted_by_mtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    Disabled,
    ByAge,
    ByCount,
    BySize,
}

pub struct Housekeeper {
    cleanup_interval: Duration,
    last_run: Option<SystemTime>,
}

impl Housekeeper {
    pub fn new(cleanup_interval: Duration) -> Self {
        Housekeeper {
            cleanup_interval,
            last_run: None,
        }
    }

    /// Runs cleanup against `dir` if `cleanup_interval` has elapsed since the
    /// last run (or this is the first call). Takes `now` explicitly so tests
    /// can drive the cadence deterministically.
    pub fn maybe_run(
        &mut self,
        dir: &Path,
        policy: CleanupPolicy,
        max_age: Duration,
        max_count: usize,
        max_total_bytes: u64,
        now: SystemTime,
    ) -> Result<usize> {
        let due = match self.last_run {
            None => true,
            Some(last) => now.duration_since(last).unwrap_or(Duration::ZERO) >= self.cleanup_interval,
        };
        if !due {
            return Ok(0);
        }
        self.last_run = Some(now);
        run_cleanup(dir, policy, max_age, max_count, max_total_bytes, now)
    }
}

fn run_cleanup(
    dir: &Path,
    policy: CleanupPolicy,
    max_age: Duration,
    max_count: usize,
    max_total_bytes: u64,
    now: SystemTime,
) -> Result<usize> {
    if policy == CleanupPolicy::Disabled {
        return Ok(0);
    }

    // Oldest-first, matching `scan_log_files`'s ordering in the original
    // implementation. Only dump files are subject to cleanup -- anything
    // else a future writer drops into the output directory is left alone.
    let files: Vec<_> = get_files_sorted_by_mtime(dir)?
        .into_iter()
        .filter(|p| is_dump_file(p))
        .collect();
    let mut deleted = 0;

    match policy {
        CleanupPolicy::Disabled => unreachable!(),
        CleanupPolicy::ByAge => {
            for path in &files {
                let age = file_age(path, now);
                if age.map(|a| a > max_age).unwrap_or(false) {
                    delete_file(path, &mut deleted);
                }
            }
        }
        CleanupPolicy::ByCount => {
            // Oldest-first list: keep only the newest `max_count`, so delete
            // everything up to `len - max_count`.
            let excess = files.len().saturating_sub(max_count);
            for path in &files[..excess] {
                delete_file(path, &mut deleted);
            }
        }
        CleanupPolicy::BySize => {
            let mut total: u64 = files.iter().filter_map(|p| file_size(p)).sum();
            for path in &files {
                if total <= max_total_bytes {
                    break;
                }
                let size = file_size(path).unwrap_or(0);
                delete_file(path, &mut deleted);
                total = total.saturating_sub(size);
            }
        }
    }

    if deleted > 0 {
        info!("housekeeper removed {deleted} stale dump file(s) from {}", dir.display());
    }
    Ok(deleted)
}

/// Matches the `spike_*.json` naming convention dump files are written
/// under, equivalent to the original implementation's
/// `fnmatch(LOG_FILE_PATTERN, ...)` filter.
fn is_dump_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with("spike_") && name.ends_with(".json")
}

fn file_age(path: &Path, now: SystemTime) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    now.duration_since(modified).ok()
}

fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

fn delete_file(path: &Path, deleted: &mut usize) {
    match std::fs::remove_file(path) {
        Ok(()) => *deleted += 1,
        Err(e) => warn!("failed to delete {}: {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::time::{Duration, SystemTime};

    fn write_file(dir: &Path, name: &str, size: usize) {
        let mut f = File::create(dir.join(name)).unwrap();
        f.write_all(&vec![0u8; size]).unwrap();
    }

    #[test]
    fn by_count_keeps_only_the_newest_n() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            write_file(dir.path(), &format!("spike_{i}.json"), 10);
            std::thread::sleep(Duration::from_millis(5));
        }
        let deleted = run_cleanup(
            dir.path(),
            CleanupPolicy::ByCount,
            Duration::MAX,
            2,
            u64::MAX,
            SystemTime::now(),
        )
        .unwrap();
        assert_eq!(deleted, 3);
        let remaining: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn by_age_deletes_only_files_older_than_max_age() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "spike_old.json", 10);
        let old_time = SystemTime::now() + Duration::from_secs(3600);
        let deleted = run_cleanup(dir.path(), CleanupPolicy::ByAge, Duration::from_secs(60), 0, 0, old_time).unwrap();
        assert_eq!(deleted, 1);
    }

    #[test]
    fn by_age_keeps_files_within_max_age() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "spike_fresh.json", 10);
        let deleted = run_cleanup(
            dir.path(),
            CleanupPolicy::ByAge,
            Duration::from_secs(3600),
            0,
            0,
            SystemTime::now(),
        )
        .unwrap();
        assert_eq!(deleted, 0);
    }

    #[test]
    fn by_size_deletes_oldest_first_until_under_budget() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "spike_a.json", 100);
        std::thread::sleep(Duration::from_millis(5));
        write_file(dir.path(), "spike_b.json", 100);
        std::thread::sleep(Duration::from_millis(5));
        write_file(dir.path(), "spike_c.json", 100);

        let deleted = run_cleanup(dir.path(), CleanupPolicy::BySize, Duration::MAX, 0, 150, SystemTime::now()).unwrap();
        assert_eq!(deleted, 2);
        assert!(dir.path().join("spike_c.json").exists());
    }

    #[test]
    fn disabled_policy_never_deletes() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "spike_a.json", 10);
        let deleted = run_cleanup(dir.path(), CleanupPolicy::Disabled, Duration::ZERO, 0, 0, SystemTime::now()).unwrap();
        assert_eq!(deleted, 0);
    }

    #[test]
    fn maybe_run_respects_cadence() {
        let mut hk = Housekeeper::new(Duration::from_secs(60));
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "spike_a.json", 10);

        let t0 = SystemTime::now();
        let first = hk.maybe_run(dir.path(), CleanupPolicy::ByCount, Duration::MAX, 0, u64::MAX, t0).unwrap();
        assert_eq!(first, 1);

        write_file(dir.path(), "spike_b.json", 10);
        let t1 = t0 + Duration::from_secs(5);
        let second = hk.maybe_run(dir.path(), CleanupPolicy::ByCount, Duration::MAX, 0, u64::MAX, t1).unwrap();
        assert_eq!(second, 0, "cadence not yet elapsed, should skip");

        let t2 = t0 + Duration::from_secs(61);
        let third = hk.maybe_run(dir.path(), CleanupPolicy::ByCount, Duration::MAX, 0, u64::MAX, t2).unwrap();
        assert_eq!(third, 1);
    }

    #[test]
    fn non_dump_files_are_never_touched() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "README.md", 10);
        write_file(dir.path(), "spiketraced.log", 10);
        for i in 0..5 {
            write_file(dir.path(), &format!("spike_{i}.json"), 10);
            std::thread::sleep(Duration::from_millis(5));
        }

        // ByCount with a budget of 0 would delete every dump file, but the
        // two non-dump files must survive every policy untouched.
        let deleted = run_cleanup(dir.path(), CleanupPolicy::ByCount, Duration::MAX, 0, u64::MAX, SystemTime::now())
            .unwrap();
        assert_eq!(deleted, 5);
        assert!(dir.path().join("README.md").exists());
        assert!(dir.path().join("spiketraced.log").exists());
    }
}
