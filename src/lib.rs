//! # shotwell-gal
//!
//! A static site and data exporter for [Shotwell](https://shotwell-project.org/)
//! photo/video libraries. Your Shotwell database is the data source: events,
//! tags, ratings, and edits you curated there become a browsable artifact
//! tree plus machine-readable exports (JSON, CSV, GeoJSON) — one-directional,
//! read-and-render, on your own file server.
//!
//! # Architecture: One Aggregation Pass, Incremental Artifacts
//!
//! Each run re-reads the whole catalog (it is small — the pixels are not in
//! it) and rebuilds the in-memory view model from scratch:
//!
//! ```text
//! catalog rows → aggregate → view model → exports
//!                    ↓ ensure()
//!              artifact cache → thumbnails/, previews/, video/, ...
//!                    ↓ kept set
//!                 reclaimer
//! ```
//!
//! Artifact generation is the expensive part, so only it is incremental:
//! every derived file carries an `.idx` record of the exact command that
//! produced it, and an unchanged library re-runs without invoking a single
//! external tool. The cache's kept set then drives reclamation of files
//! whose media left the library.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`catalog`] | Read-only rusqlite bindings for the Shotwell schema |
//! | [`model`] | Media/Event/Tag/Year/Stats entities and the view model |
//! | [`metadata`] | exiv2 tag-dump parsing: camera, GPS, exposure, motion offsets |
//! | [`artifact`] | `Op` descriptors, the content-addressed cache, montage selection |
//! | [`aggregate`] | The aggregation pass: rows → hierarchy + stats + artifacts |
//! | [`reclaim`] | Stale artifact deletion driven by the cache's kept set |
//! | [`export`] | `media.json` / `media.js` / `media.csv` / `media.geojson` |
//! | [`config`] | `gallery.toml` loading and validation |
//!
//! # Design Decisions
//!
//! ## Command Lines As Cache Keys
//!
//! A derived file's cache key is the rendered argument vector of the tool
//! invocation that produces it (for montages, the ordered member list).
//! There is no version field to bump and no way for the key to drift from
//! the invocation: changing a flag, an overlay icon, or a dimension
//! regenerates exactly the affected outputs.
//!
//! ## External Tools Over Image Crates
//!
//! Generation shells out to ImageMagick, ffmpeg, and exiv2 rather than
//! linking codec crates. The workload is a periodic batch job; the tools
//! are universally packaged, battle-tested against weird camera files, and
//! the opaque-command model is what makes descriptor caching honest.
//!
//! ## Best-Effort Pipeline
//!
//! Nothing in the pipeline aborts a run except failure to open the catalog
//! itself. Missing source files, failed tool invocations, unparseable
//! metadata, and undated events are logged and worked around — a complete
//! site with a few gaps beats no site.
//!
//! ## Id-Based Relations
//!
//! Events, tags, and years reference media by synthetic id through the
//! view-model maps, and the tag tree is a `parent_id`/`child_ids` relation
//! resolved through the tag table. No back-pointers, no ownership cycles.

pub mod aggregate;
pub mod artifact;
pub mod catalog;
pub mod config;
pub mod export;
pub mod metadata;
pub mod model;
pub mod reclaim;

#[cfg(test)]
pub(crate) mod test_helpers;
