//! Stale artifact reclamation.
//!
//! The artifact cache records every output it decided should exist this
//! run. Whatever else is found under the managed directories is left over
//! from media that was deleted, re-rated below the cutoff, or regenerated
//! under a different name. This is the only component that deletes files,
//! and it runs strictly after all generation calls have populated the
//! kept set, so nothing in flight can be reclaimed.
//!
//! The safe default is a dry run: stale files are reported as warnings
//! and only removed when the caller passes `destructive = true`
//! (`--delete-stale` on the CLI).

use log::{info, warn};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Outcome counters for one reclamation pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReclaimSummary {
    /// Files deleted (destructive mode only).
    pub removed: u32,
    /// Stale files found but left in place.
    pub stale: u32,
}

impl fmt::Display for ReclaimSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.removed > 0 {
            write!(f, "{} stale artifacts removed", self.removed)
        } else if self.stale > 0 {
            write!(f, "{} stale artifacts found (use --delete-stale)", self.stale)
        } else {
            write!(f, "no stale artifacts")
        }
    }
}

/// Walk the managed directories and reclaim files not in the kept set.
pub fn reclaim(
    managed_dirs: &[PathBuf],
    kept: &BTreeSet<PathBuf>,
    destructive: bool,
) -> ReclaimSummary {
    let mut summary = ReclaimSummary::default();

    for dir in managed_dirs {
        if !dir.is_dir() {
            continue;
        }
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if kept.contains(path) {
                continue;
            }
            if destructive {
                reclaim_file(path, &mut summary);
            } else {
                warn!("artifact {} is no longer used", path.display());
                summary.stale += 1;
            }
        }
    }

    summary
}

fn reclaim_file(path: &Path, summary: &mut ReclaimSummary) {
    info!("removing stale artifact {}", path.display());
    match fs::remove_file(path) {
        Ok(()) => summary.removed += 1,
        Err(err) => warn!("cannot remove {}: {err}", path.display()),
    }
}
