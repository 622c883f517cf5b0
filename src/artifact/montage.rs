//! Composite thumbnail layout and candidate selection.
//!
//! A composite thumbnail is a montage of member previews. Two pure pieces
//! of logic live here so they can be tested without running any tool:
//!
//! - **Tile layout**: pick the densest grid the candidate count can fill
//!   and size each cell to fit the configured thumbnail geometry.
//! - **Slot filling**: choose *which* members land in the grid. Higher
//!   rated media wins; within a rating the newest items come first; when a
//!   rating bucket overflows the remaining slots, every nth item is taken
//!   for temporal spread instead of a random sample. The result is fully
//!   deterministic for a given catalog state, so an unchanged library
//!   never regenerates a montage.

use crate::model::Media;
use std::collections::BTreeMap;

/// Frame width the montage tool draws around each cell, in pixels.
pub const COMPOSITE_FRAME_SIZE: u32 = 4;

/// Grid layouts by density: columns x rows.
const TILE_LAYOUTS: &[(u32, u32)] = &[(1, 1), (2, 1), (2, 2), (3, 3), (4, 4)];

/// Chosen montage grid for a candidate count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileProps {
    /// How many members fit in the grid.
    pub slots: usize,
    /// Columns x rows.
    pub tile: (u32, u32),
    /// Per-cell geometry after subtracting the frame, in pixels.
    pub cell: (u32, u32),
}

/// Pick the densest grid that `available` candidates can fully occupy.
pub fn tile_props(available: usize, thumb_size: (u32, u32)) -> TileProps {
    let mut idx = TILE_LAYOUTS.len() - 1;
    for (i, &(cols, rows)) in TILE_LAYOUTS.iter().enumerate() {
        let capacity = (cols * rows) as usize;
        if available == capacity {
            idx = i;
            break;
        }
        if available < capacity {
            idx = i.saturating_sub(1);
            break;
        }
    }

    let (cols, rows) = TILE_LAYOUTS[idx];
    let (width, height) = thumb_size;
    let cell = (
        width.saturating_sub(cols * COMPOSITE_FRAME_SIZE * 2).max(cols) / cols,
        height.saturating_sub(rows * COMPOSITE_FRAME_SIZE * 2).max(rows) / rows,
    );
    TileProps {
        slots: (cols * rows) as usize,
        tile: (cols, rows),
        cell,
    }
}

/// Fill the montage slots from the candidate list.
///
/// Candidates are bucketed by effective rating (rating plus the event
/// primary boost) from highest to lowest. Within a bucket, newest first.
/// A bucket larger than the remaining slots is subsampled at a stride of
/// `floor(n / remaining)` and truncated, trading completeness for a
/// representative spread over time.
pub fn select_candidates<'a>(candidates: &[&'a Media], slots: usize) -> Vec<&'a Media> {
    let mut by_rating: BTreeMap<u8, Vec<&Media>> = BTreeMap::new();
    for media in candidates {
        by_rating
            .entry(media.effective_rating())
            .or_default()
            .push(media);
    }

    let mut selected = Vec::new();
    let mut remaining = slots;
    for bucket in by_rating.values_mut().rev() {
        if remaining == 0 {
            break;
        }
        bucket.sort_by(|a, b| b.exposure_time.cmp(&a.exposure_time));

        if bucket.len() <= remaining {
            selected.extend(bucket.iter().copied());
            remaining -= bucket.len();
        } else {
            let stride = bucket.len() / remaining;
            let sampled: Vec<&Media> = bucket
                .iter()
                .step_by(stride)
                .take(remaining)
                .copied()
                .collect();
            remaining -= sampled.len();
            selected.extend(sampled);
        }
    }
    selected
}
