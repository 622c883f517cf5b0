//! Core library entities shared across the pipeline stages.
//!
//! The aggregation pass builds these from catalog rows and hands them to the
//! export stage as a [`ViewModel`]. Relations between entities are id-based
//! and resolved through the `ViewModel` maps: events, tags, and year blocks
//! hold media ids rather than references, and the tag hierarchy is a pair of
//! `parent_id` / `child_ids` relations instead of back-pointers.
//!
//! Nothing here is mutated after the aggregation pass completes.

use chrono::{Local, TimeZone};
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("media {media_id} has rating {rating} outside 0-5")]
    RatingOutOfRange { media_id: String, rating: i64 },
}

/// Two-hex-character shard directory for a generated file's basename.
///
/// Bounds directory fan-out to 256 buckets regardless of library size.
pub fn dir_shard(basename: &str) -> String {
    let digest = Sha1::digest(basename.as_bytes());
    format!("{:02x}", digest[0])
}

/// Local-time four-digit year for an exposure timestamp.
///
/// `0` means the exposure time is unknown and belongs to no year.
pub fn year_string(exposure_time: i64) -> Option<String> {
    if exposure_time == 0 {
        return None;
    }
    Local
        .timestamp_opt(exposure_time, 0)
        .single()
        .map(|dt| dt.format("%Y").to_string())
}

/// Local-time ISO-8601 rendering of an epoch timestamp.
pub fn iso_local(timestamp: i64) -> String {
    Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Aggregate statistics attached to events, tags, years, and the library.
///
/// `total_filesize` counts each contributing item's full artifact set
/// (source file plus every generated derivative on disk), which is what
/// makes disk-usage reporting accurate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub num_photos: u64,
    pub num_videos: u64,
    pub num_events: u64,
    pub total_filesize: u64,
    pub min_date: Option<i64>,
    pub max_date: Option<i64>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Widen the date range to include `date`.
    pub fn add_date(&mut self, date: i64) {
        self.min_date = Some(match self.min_date {
            Some(min) => min.min(date),
            None => date,
        });
        self.max_date = Some(match self.max_date {
            Some(max) => max.max(date),
            None => date,
        });
    }

    /// Fold one media item's contribution into these stats.
    ///
    /// An exposure time of zero never contributes to the date range.
    pub fn fold_media(&mut self, media: &Media) {
        match media.kind {
            MediaKind::Photo | MediaKind::RawPhoto => self.num_photos += 1,
            MediaKind::Video => self.num_videos += 1,
        }
        self.total_filesize += media.filesize + media.artifacts_size;
        if media.exposure_time != 0 {
            self.add_date(media.exposure_time);
        }
    }

    /// Combine another stats block into this one.
    ///
    /// Dates fold elementwise: a `None` side absorbs the other's value.
    pub fn merge(&mut self, other: &Stats) {
        self.num_photos += other.num_photos;
        self.num_videos += other.num_videos;
        self.num_events += other.num_events;
        self.total_filesize += other.total_filesize;
        if let Some(date) = other.min_date {
            self.add_date(date);
        }
        if let Some(date) = other.max_date {
            self.add_date(date);
        }
    }
}

/// What kind of asset a media item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    RawPhoto,
    Video,
}

impl MediaKind {
    /// Stable synthetic id combining the type tag with the catalog row id.
    ///
    /// The fixed-width hex rendering keeps ids sortable and makes them safe
    /// as the cache-key basis for every derived artifact of the item.
    pub fn synthetic_id(self, row_id: i64) -> String {
        match self {
            MediaKind::Photo | MediaKind::RawPhoto => format!("thumb{row_id:016x}"),
            MediaKind::Video => format!("video-{row_id:016x}"),
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, MediaKind::Video)
    }

    pub fn label(self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::RawPhoto => "raw_photo",
            MediaKind::Video => "video",
        }
    }
}

/// Rotation derived from the catalog's EXIF orientation code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    None,
    Clockwise,
    UpsideDown,
    CounterClockwise,
}

impl Rotation {
    pub fn from_orientation(code: i64) -> Self {
        match code {
            6 => Rotation::Clockwise,
            3 => Rotation::UpsideDown,
            8 => Rotation::CounterClockwise,
            _ => Rotation::None,
        }
    }

    /// Degrees as passed to the image tool's `-rotate` argument.
    pub fn degrees(self) -> i32 {
        match self {
            Rotation::None => 0,
            Rotation::Clockwise => 90,
            Rotation::UpsideDown => 180,
            Rotation::CounterClockwise => -90,
        }
    }
}

/// Structured metadata extracted from a photo's embedded tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoMetadata {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub camera: Option<String>,
    /// Display-formatted summary entries (`f/1.7`, `1/125s`, `ISO800`, ...).
    pub exif: Vec<String>,
}

/// Generated thumbnail paths per size class, relative to the output root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThumbnailSet {
    pub small: String,
    pub medium: String,
    pub large: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regular: Option<String>,
}

impl ThumbnailSet {
    /// Thumbnail paths sharded under `thumbnails/<prefix>/<class>/<shard>/`.
    pub fn sharded(prefix: &str, basename: &str, with_regular: bool) -> Self {
        let shard = dir_shard(basename);
        let class_path =
            |class: &str| format!("thumbnails/{prefix}/{class}/{shard}/{basename}.png");
        Self {
            small: class_path("small"),
            medium: class_path("medium"),
            large: class_path("large"),
            regular: with_regular.then(|| class_path("regular")),
        }
    }

    /// Path for a size class by name (`small`, `medium`, `large`, `regular`).
    pub fn class(&self, name: &str) -> Option<&str> {
        match name {
            "small" => Some(&self.small),
            "medium" => Some(&self.medium),
            "large" => Some(&self.large),
            "regular" => self.regular.as_deref(),
            _ => None,
        }
    }

    /// Year thumbnails live directly under `thumbnails/year/<class>/`.
    ///
    /// There are at most a couple hundred years, so no shard is needed.
    pub fn for_year(year: &str) -> Self {
        let class_path = |class: &str| format!("thumbnails/year/{class}/{year}.png");
        Self {
            small: class_path("small"),
            medium: class_path("medium"),
            large: class_path("large"),
            regular: None,
        }
    }
}

/// Animated GIF previews per size class, for motion photos and videos.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreviewSet {
    pub small: String,
    pub medium: String,
    pub large: String,
    pub regular: String,
}

/// One photo or video asset from the catalog.
#[derive(Debug, Clone)]
pub struct Media {
    /// Catalog row id.
    pub id: i64,
    /// Synthetic id (`thumb%016x` / `video-%016x`).
    pub media_id: String,
    pub kind: MediaKind,
    pub event_id: i64,
    /// Link target relative to the media root.
    pub filename: String,
    /// Source image the item's own thumbnails are generated from (the
    /// photo file, its transformed variant, or the Shotwell thumbnail
    /// cache for videos).
    pub thumb_source: PathBuf,
    /// Small cached preview used as a composite montage tile.
    pub preview_source: PathBuf,
    pub title: Option<String>,
    pub comment: Option<String>,
    pub filesize: u64,
    /// Epoch seconds; `0` means unknown.
    pub exposure_time: i64,
    pub time_created: i64,
    pub rating: u8,
    /// Synthetic boost applied when the item is its event's primary media.
    pub extra_rating: u8,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub rotation: Rotation,
    /// Seconds, videos only.
    pub clip_duration: Option<f64>,
    pub fps: Option<f64>,
    pub metadata: PhotoMetadata,
    pub tags: BTreeSet<i64>,
    pub thumbnails: ThumbnailSet,
    /// Animated previews, for motion photos and videos.
    pub animated_preview: Option<PreviewSet>,
    /// Extracted embedded clip, motion photos only.
    pub motion_clip: Option<String>,
    /// Render height -> output path, videos only.
    pub video_renders: BTreeMap<u32, String>,
    /// Metadata sidecar dump, photos only.
    pub metadata_path: Option<String>,
    /// Combined on-disk size of this item's generated artifacts.
    pub artifacts_size: u64,
}

impl Media {
    /// Create a media shell for a catalog row, validating the rating range.
    pub fn new(kind: MediaKind, id: i64, event_id: i64, rating: i64) -> Result<Self, ModelError> {
        let media_id = kind.synthetic_id(id);
        if !(0..=5).contains(&rating) {
            return Err(ModelError::RatingOutOfRange { media_id, rating });
        }
        Ok(Self {
            id,
            media_id,
            kind,
            event_id,
            filename: String::new(),
            thumb_source: PathBuf::new(),
            preview_source: PathBuf::new(),
            title: None,
            comment: None,
            filesize: 0,
            exposure_time: 0,
            time_created: 0,
            rating: rating as u8,
            extra_rating: 0,
            width: None,
            height: None,
            rotation: Rotation::None,
            clip_duration: None,
            fps: None,
            metadata: PhotoMetadata::default(),
            tags: BTreeSet::new(),
            thumbnails: ThumbnailSet::default(),
            animated_preview: None,
            motion_clip: None,
            video_renders: BTreeMap::new(),
            metadata_path: None,
            artifacts_size: 0,
        })
    }

    /// Rating used for composite thumbnail candidate ordering.
    pub fn effective_rating(&self) -> u8 {
        self.rating + self.extra_rating
    }
}

/// Per-year slice of an event that spans multiple years.
#[derive(Debug, Clone, Default)]
pub struct EventYearBlock {
    pub stats: Stats,
    pub thumbnails: ThumbnailSet,
}

/// A named grouping of media sharing a catalog event id.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: i64,
    pub title: Option<String>,
    pub comment: Option<String>,
    /// Synthetic id of the event's representative media item.
    pub primary_media_id: Option<String>,
    /// Member media ids, sorted by exposure time ascending once finalized.
    pub media: Vec<String>,
    /// Canonical date: the maximum exposure time over all member rows,
    /// fetched independently of rating filters so sort order is stable
    /// across views.
    pub date: Option<i64>,
    pub stats: Stats,
    pub tags: BTreeSet<i64>,
    pub thumbnails: ThumbnailSet,
    /// Year -> per-year slice, for events spanning one or more years.
    pub years: BTreeMap<String, EventYearBlock>,
}

impl Event {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            title: None,
            comment: None,
            primary_media_id: None,
            media: Vec::new(),
            date: None,
            stats: Stats::new(),
            tags: BTreeSet::new(),
            thumbnails: ThumbnailSet::default(),
            years: BTreeMap::new(),
        }
    }

    /// Title with the fallback used everywhere an event is displayed.
    pub fn display_title(&self) -> String {
        match &self.title {
            Some(title) if !title.is_empty() => title.clone(),
            _ => format!("Unnamed {}", self.id),
        }
    }

    /// Widen the canonical date to include `date`.
    pub fn add_date(&mut self, date: i64) {
        self.date = Some(match self.date {
            Some(existing) => existing.max(date),
            None => date,
        });
    }
}

/// A slash-delimited hierarchical label (e.g. `/Places/WV`).
#[derive(Debug, Clone)]
pub struct Tag {
    pub id: i64,
    /// Raw catalog path (`/Places/WV`).
    pub name: String,
    /// Leaf title (`WV`).
    pub title: String,
    /// Pretty full path (`Places > WV`).
    pub full_title: String,
    pub parent_id: Option<i64>,
    pub child_ids: Vec<i64>,
    pub media: Vec<String>,
    pub stats: Stats,
    pub thumbnails: ThumbnailSet,
}

impl Tag {
    pub fn new(id: i64, name: &str) -> Self {
        let title = name.rsplit('/').next().unwrap_or(name).to_string();
        let full_title = name
            .strip_prefix('/')
            .unwrap_or(name)
            .replace('/', " > ");
        Self {
            id,
            name: name.to_string(),
            title,
            full_title,
            parent_id: None,
            child_ids: Vec::new(),
            media: Vec::new(),
            stats: Stats::new(),
            thumbnails: ThumbnailSet::default(),
        }
    }

    /// Catalog path of the parent tag, if the name has one.
    pub fn parent_name(&self) -> Option<&str> {
        let (parent, _) = self.name.rsplit_once('/')?;
        if parent.is_empty() { None } else { Some(parent) }
    }
}

/// Synthetic grouping bucket keyed by four-digit year.
#[derive(Debug, Clone)]
pub struct YearBlock {
    pub year: String,
    /// Events with at least one media item dated in this year,
    /// sorted by event date once finalized.
    pub event_ids: Vec<i64>,
    pub stats: Stats,
    pub tags: BTreeSet<i64>,
    pub thumbnails: ThumbnailSet,
}

impl YearBlock {
    pub fn new(year: &str) -> Self {
        Self {
            year: year.to_string(),
            event_ids: Vec::new(),
            stats: Stats::new(),
            tags: BTreeSet::new(),
            thumbnails: ThumbnailSet::for_year(year),
        }
    }
}

/// The fully-aggregated library view handed to the export stage.
#[derive(Debug, Default)]
pub struct ViewModel {
    pub media_by_id: BTreeMap<String, Media>,
    pub events_by_id: BTreeMap<i64, Event>,
    pub tags_by_id: BTreeMap<i64, Tag>,
    pub events_by_year: BTreeMap<String, YearBlock>,
    pub stats: Stats,
}
