//! Content-addressed artifact cache.
//!
//! Every derived file is generated through [`ArtifactCache::ensure`],
//! which guarantees:
//!
//! - **Idempotence**: if the output exists and its adjacent `.idx` record
//!   matches the op's cache key, the tool is not invoked again. Re-running
//!   against an unchanged catalog re-invokes nothing.
//! - **Invalidation by descriptor**: the cache key is the rendered command
//!   line (see [`Op::cache_key`]), so any parameter change — rotation,
//!   overlay icon, dimensions, tool flags — regenerates the output with no
//!   separate version field to keep in sync.
//! - **Reclaim tracking**: every call, hit or miss, registers the output
//!   and its `.idx` file in the run's kept set. Whatever is left on disk
//!   but not in that set is stale and belongs to the reclaimer.
//!
//! ## Failure semantics
//!
//! A failing tool is a warning, never an abort: the output is left absent
//! or stale and stays a cache miss until conditions change. A run killed
//! mid-generation leaves the `.idx` inconsistent with its output, which
//! the next run sees as a miss — self-healing at the cost of one wasted
//! regeneration.

use super::montage;
use super::ops::{Op, OpRunner};
use crate::config::{ToolsConfig, parse_size};
use crate::model::Media;
use log::{info, warn};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// What `ensure` did for an op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Output and index matched; nothing ran.
    UpToDate,
    /// The op ran (successfully or not) and the index was rewritten.
    Generated,
    /// The op's source file is missing; the slot is left absent.
    Skipped,
}

/// Cache hit/miss counters for a run.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: u32,
    pub generated: u32,
    pub skipped: u32,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.skipped > 0 {
            write!(
                f,
                "{} cached, {} generated, {} skipped",
                self.hits, self.generated, self.skipped
            )
        } else {
            write!(f, "{} cached, {} generated", self.hits, self.generated)
        }
    }
}

/// One instance per run; owns the kept set handed to the reclaimer.
pub struct ArtifactCache<'r> {
    dest_dir: PathBuf,
    tools: ToolsConfig,
    runner: &'r dyn OpRunner,
    kept: BTreeSet<PathBuf>,
    stats: CacheStats,
}

impl<'r> ArtifactCache<'r> {
    pub fn new(dest_dir: &Path, tools: ToolsConfig, runner: &'r dyn OpRunner) -> Self {
        Self {
            dest_dir: dest_dir.to_path_buf(),
            tools,
            runner,
            kept: BTreeSet::new(),
            stats: CacheStats::default(),
        }
    }

    /// Absolute path for an output-relative artifact path.
    pub fn abs(&self, relative: &str) -> PathBuf {
        self.dest_dir.join(relative)
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Artifact paths (outputs and index files) confirmed wanted this run.
    pub fn kept(&self) -> &BTreeSet<PathBuf> {
        &self.kept
    }

    /// Make sure the op's output exists and matches its descriptor.
    pub fn ensure(&mut self, op: &Op) -> EnsureOutcome {
        if let Some(source) = op.source()
            && !source.is_file()
        {
            warn!(
                "cannot find {} for {}",
                source.display(),
                op.output().display()
            );
            self.stats.skipped += 1;
            return EnsureOutcome::Skipped;
        }

        let output = op.output().to_path_buf();
        let idx = idx_path(&output);
        self.kept.insert(output.clone());
        self.kept.insert(idx.clone());

        let key = op.cache_key(&self.tools);
        if up_to_date(&output, &idx, &key) {
            self.stats.hits += 1;
            return EnsureOutcome::UpToDate;
        }

        if let Some(parent) = output.parent()
            && let Err(err) = fs::create_dir_all(parent)
        {
            warn!("cannot create {}: {err}", parent.display());
            self.stats.skipped += 1;
            return EnsureOutcome::Skipped;
        }

        info!("generating {}", output.display());
        if let Err(err) = self.runner.run(op) {
            warn!("generation failed for {}: {err}", output.display());
        }
        // The index is written regardless: a failed command left no output,
        // so the next run still sees a miss.
        if let Err(err) = fs::write(&idx, &key) {
            warn!("cannot write {}: {err}", idx.display());
        }
        self.stats.generated += 1;
        EnsureOutcome::Generated
    }

    /// Composite montage for an event, tag, or year.
    ///
    /// An empty candidate set still produces an explicit placeholder so
    /// pages never show a broken link.
    pub fn composite_thumbnail(
        &mut self,
        title: &str,
        candidates: &[&Media],
        output: PathBuf,
        size: &str,
    ) -> EnsureOutcome {
        let dims = parse_size(size).unwrap_or((360, 360));
        let props = montage::tile_props(candidates.len(), dims);
        let selected = montage::select_candidates(candidates, props.slots);

        let op = if selected.is_empty() {
            Op::Placeholder {
                output,
                size: size.to_string(),
            }
        } else {
            Op::Montage {
                tiles: selected.iter().map(|m| m.preview_source.clone()).collect(),
                candidate_ids: selected.iter().map(|m| m.media_id.clone()).collect(),
                output,
                tile: props.tile,
                cell: props.cell,
            }
        };

        let outcome = self.ensure(&op);
        if selected.is_empty() && outcome == EnsureOutcome::Generated {
            warn!("created empty thumbnail for {title}: no media");
        }
        outcome
    }

    /// Drop an output (and its index) so the next `ensure` regenerates it.
    ///
    /// Used when an upstream artifact changed underneath it, e.g. a
    /// re-applied transform invalidating the item's thumbnails.
    pub fn invalidate(&self, relative: &str) {
        let output = self.abs(relative);
        let _ = fs::remove_file(idx_path(&output));
        let _ = fs::remove_file(&output);
    }

    /// Total on-disk size of the given output-relative artifacts.
    pub fn artifacts_size(&self, relative_paths: &[&str]) -> u64 {
        relative_paths
            .iter()
            .filter_map(|rel| fs::metadata(self.abs(rel)).ok())
            .map(|meta| meta.len())
            .sum()
    }
}

/// Index record path: the output path with `.idx` appended.
fn idx_path(output: &Path) -> PathBuf {
    let mut os = output.as_os_str().to_os_string();
    os.push(".idx");
    PathBuf::from(os)
}

fn up_to_date(output: &Path, idx: &Path, key: &str) -> bool {
    if !output.is_file() {
        return false;
    }
    match fs::read_to_string(idx) {
        Ok(contents) => contents == key,
        Err(_) => false,
    }
}
