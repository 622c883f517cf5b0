//! Derived-artifact generation: thumbnails, montages, clips, renders.
//!
//! | Piece | Role |
//! |---|---|
//! | [`ops`] | `Op` sum type: each derived file as one command descriptor |
//! | [`cache`] | Idempotent `ensure()` with `.idx` records and the kept set |
//! | [`montage`] | Pure composite layout and candidate selection |
//!
//! The split keeps cache-key derivation and tool invocation in one place
//! (the op), the decision *whether* to run in another (the cache), and the
//! selection logic testable on its own.

pub mod cache;
pub mod montage;
pub mod ops;

pub use cache::{ArtifactCache, CacheStats, EnsureOutcome};
pub use montage::{COMPOSITE_FRAME_SIZE, TileProps, select_candidates, tile_props};
pub use ops::{ArtifactError, CommandRunner, NoopRunner, Op, OpRunner};
