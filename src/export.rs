//! Machine-readable exports from the finished view model.
//!
//! Four files land next to the artifact tree:
//!
//! - `media.json` — the whole library, tab-indented for inspection.
//! - `media.js` — the same JSON wrapped in a tiny accessor function, so
//!   search pages work from `file://` URIs where `fetch()` is blocked.
//! - `media.csv` — one row per media item, for spreadsheets and scripts.
//! - `media.geojson` — one Point feature per located item, for mapping
//!   tools.
//!
//! Entities without a single dated member (undated events, empty tags)
//! are skipped, matching what the browsable hierarchy shows.

use crate::config::GalleryConfig;
use crate::model::{Media, MediaKind, Stats, ThumbnailSet, ViewModel, iso_local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Write all four export files into `dest`.
pub fn write_exports(
    view: &ViewModel,
    config: &GalleryConfig,
    dest: &Path,
) -> Result<(), ExportError> {
    let export = build_export(view, config);

    write_json(&export, dest)?;
    write_js(&export, dest)?;

    let event_names: BTreeMap<i64, String> = view
        .events_by_id
        .iter()
        .map(|(id, event)| (*id, event.display_title()))
        .collect();
    let tag_names: BTreeMap<i64, String> = view
        .tags_by_id
        .iter()
        .map(|(id, tag)| (*id, tag.title.clone()))
        .collect();

    write_csv(&export, &event_names, &tag_names, dest)?;
    write_geojson(&export, &event_names, &tag_names, dest)?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct LibraryExport {
    pub title: String,
    pub version_label: String,
    pub media: Vec<MediaExport>,
    pub events: Vec<EventExport>,
    pub tags: Vec<TagExport>,
    pub years: Vec<YearExport>,
}

#[derive(Debug, Serialize)]
pub struct StatsExport {
    pub num_photos: u64,
    pub num_videos: u64,
    pub filesize: u64,
    pub min_date: String,
    pub max_date: String,
}

#[derive(Debug, Serialize)]
pub struct MediaExport {
    pub media_id: String,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub link: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub filesize: u64,
    pub artifact_filesize: u64,
    pub rating: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub megapixels: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exif: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_duration_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    pub time_created: String,
    pub exposure_time: String,
    pub event_id: i64,
    pub tags: Vec<i64>,
    pub thumbnail: ThumbnailSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion_photo: Option<MotionPhotoExport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_text: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub video_renders: BTreeMap<u32, String>,
}

#[derive(Debug, Serialize)]
pub struct MotionPhotoExport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mp4: Option<String>,
    pub small_gif: String,
    pub medium_gif: String,
    pub large_gif: String,
    pub reg_gif: String,
}

#[derive(Debug, Serialize)]
pub struct EventExport {
    pub id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub date: String,
    pub link: String,
    pub thumbnail: ThumbnailSet,
    #[serde(flatten)]
    pub stats: StatsExport,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub years: Vec<EventYearExport>,
}

#[derive(Debug, Serialize)]
pub struct EventYearExport {
    pub year: String,
    pub thumbnail: ThumbnailSet,
    #[serde(flatten)]
    pub stats: StatsExport,
}

#[derive(Debug, Serialize)]
pub struct TagExport {
    pub id: i64,
    pub title: String,
    pub full_title: String,
    pub link: String,
    pub parent_tag_id: Option<i64>,
    pub thumbnail: ThumbnailSet,
    #[serde(flatten)]
    pub stats: StatsExport,
}

#[derive(Debug, Serialize)]
pub struct YearExport {
    pub id: String,
    pub title: String,
    pub link: String,
    pub num_events: usize,
    pub thumbnail: ThumbnailSet,
    #[serde(flatten)]
    pub stats: StatsExport,
}

/// Assemble the export tree from the view model.
pub fn build_export(view: &ViewModel, config: &GalleryConfig) -> LibraryExport {
    let mut media = Vec::new();
    let mut events = Vec::new();

    for event in view.events_by_id.values() {
        let Some(stats) = stats_export(&event.stats) else {
            continue;
        };

        events.push(EventExport {
            id: event.id,
            title: event.display_title(),
            comment: event.comment.clone(),
            date: iso_local(event.date.unwrap_or(0)),
            link: format!("event/{}.html", event.id),
            thumbnail: event.thumbnails.clone(),
            stats,
            years: event_years(event),
        });

        for media_id in &event.media {
            if let Some(item) = view.media_by_id.get(media_id) {
                media.push(media_export(item));
            }
        }
    }

    let mut tags = Vec::new();
    for tag in view.tags_by_id.values() {
        let Some(stats) = stats_export(&tag.stats) else {
            continue;
        };
        tags.push(TagExport {
            id: tag.id,
            title: tag.title.clone(),
            full_title: tag.full_title.clone(),
            link: format!("tag/{}.html", tag.id),
            parent_tag_id: tag.parent_id,
            thumbnail: tag.thumbnails.clone(),
            stats,
        });
    }

    let mut years = Vec::new();
    for block in view.events_by_year.values() {
        let Some(stats) = stats_export(&block.stats) else {
            continue;
        };
        years.push(YearExport {
            id: block.year.clone(),
            title: block.year.clone(),
            link: format!("year/{}.html", block.year),
            num_events: block.event_ids.len(),
            thumbnail: block.thumbnails.clone(),
            stats,
        });
    }

    media.sort_by(|a, b| b.exposure_time.cmp(&a.exposure_time).then(a.id.cmp(&b.id)));
    events.sort_by(|a, b| b.date.cmp(&a.date).then(a.id.cmp(&b.id)));
    tags.sort_by(|a, b| a.full_title.cmp(&b.full_title));
    years.sort_by(|a, b| b.id.cmp(&a.id));

    LibraryExport {
        title: config.title.clone(),
        version_label: format!("shotwell-gal {}", env!("CARGO_PKG_VERSION")),
        media,
        events,
        tags,
        years,
    }
}

fn event_years(event: &crate::model::Event) -> Vec<EventYearExport> {
    if event.years.len() <= 1 {
        return Vec::new();
    }
    event
        .years
        .iter()
        .filter_map(|(year, block)| {
            Some(EventYearExport {
                year: year.clone(),
                thumbnail: block.thumbnails.clone(),
                stats: stats_export(&block.stats)?,
            })
        })
        .collect()
}

fn media_export(media: &Media) -> MediaExport {
    let megapixels = match (media.kind, media.width, media.height) {
        (MediaKind::Video, _, _) | (_, None, _) | (_, _, None) => None,
        (_, Some(w), Some(h)) => Some(round1(w as f64 * h as f64 / 1_000_000.0)),
    };
    let motion_photo = media.animated_preview.as_ref().map(|previews| {
        MotionPhotoExport {
            mp4: media.motion_clip.clone(),
            small_gif: previews.small.clone(),
            medium_gif: previews.medium.clone(),
            large_gif: previews.large.clone(),
            reg_gif: previews.regular.clone(),
        }
    });

    MediaExport {
        media_id: media.media_id.clone(),
        id: media.id,
        title: media.title.clone().filter(|t| !t.is_empty()),
        comment: media.comment.clone().filter(|c| !c.is_empty()),
        link: media.filename.clone(),
        kind: media.kind,
        filesize: media.filesize,
        artifact_filesize: media.artifacts_size,
        rating: media.rating,
        width: media.width,
        height: media.height,
        megapixels,
        camera: media.metadata.camera.clone(),
        exif: media.metadata.exif.clone(),
        fps: media.fps,
        clip_duration: media.clip_duration.map(humanize_seconds),
        clip_duration_secs: media.clip_duration.map(|d| d as u64),
        lat: media.metadata.lat.map(round6),
        lon: media.metadata.lon.map(round6),
        time_created: iso_or_empty(media.time_created),
        exposure_time: iso_or_empty(media.exposure_time),
        event_id: media.event_id,
        tags: media.tags.iter().copied().collect(),
        thumbnail: media.thumbnails.clone(),
        motion_photo,
        metadata_text: media.metadata_path.clone(),
        video_renders: media.video_renders.clone(),
    }
}

/// Stats for entities shown in exports; `None` for anything undated.
fn stats_export(stats: &Stats) -> Option<StatsExport> {
    let min_date = stats.min_date?;
    let max_date = stats.max_date?;
    Some(StatsExport {
        num_photos: stats.num_photos,
        num_videos: stats.num_videos,
        filesize: stats.total_filesize,
        min_date: iso_local(min_date),
        max_date: iso_local(max_date),
    })
}

/// Unknown timestamps (zero) render as empty rather than the epoch.
fn iso_or_empty(timestamp: i64) -> String {
    if timestamp == 0 {
        String::new()
    } else {
        iso_local(timestamp)
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Rough natural-language duration, in the largest sensible unit.
fn humanize_seconds(seconds: f64) -> String {
    let seconds = seconds.round() as u64;
    if seconds < 60 {
        plural(seconds, "second")
    } else if seconds < 3600 {
        plural(seconds / 60, "minute")
    } else {
        plural(seconds / 3600, "hour")
    }
}

fn plural(count: u64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit}")
    } else {
        format!("{count} {unit}s")
    }
}

// =========================================================================
// Writers
// =========================================================================

fn write_json(export: &LibraryExport, dest: &Path) -> Result<(), ExportError> {
    let file = File::create(dest.join("media.json"))?;
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(file, formatter);
    export.serialize(&mut serializer)?;
    Ok(())
}

/// Embedded-JavaScript variant of the JSON export, so the search page can
/// load the library from a `file://` URI where fetching JSON is blocked.
fn write_js(export: &LibraryExport, dest: &Path) -> Result<(), ExportError> {
    let compact = serde_json::to_string(export)?;
    let body = format!(
        "const _allMedia = {compact};\n\
         function getAllMediaViaJsFile() {{\n  return _allMedia;\n}}\n"
    );
    std::fs::write(dest.join("media.js"), body)?;
    Ok(())
}

/// Column set shared by the CSV and GeoJSON writers.
fn tabular_row(
    media: &MediaExport,
    event_names: &BTreeMap<i64, String>,
    tag_names: &BTreeMap<i64, String>,
) -> Vec<(&'static str, String)> {
    let opt_num = |v: Option<f64>| v.map(|n| n.to_string()).unwrap_or_default();
    vec![
        ("media_id", media.media_id.clone()),
        ("title", media.title.clone().unwrap_or_default()),
        ("comment", media.comment.clone().unwrap_or_default()),
        ("link", media.link.clone()),
        ("type", media.kind.label().to_string()),
        ("filesize", media.filesize.to_string()),
        (
            "width",
            media.width.map(|w| w.to_string()).unwrap_or_default(),
        ),
        (
            "height",
            media.height.map(|h| h.to_string()).unwrap_or_default(),
        ),
        ("camera", media.camera.clone().unwrap_or_default()),
        ("megapixels", opt_num(media.megapixels)),
        ("fps", opt_num(media.fps)),
        (
            "clip_duration",
            media.clip_duration.clone().unwrap_or_default(),
        ),
        (
            "clip_duration_secs",
            media
                .clip_duration_secs
                .map(|s| s.to_string())
                .unwrap_or_default(),
        ),
        ("rating", media.rating.to_string()),
        ("lat", opt_num(media.lat)),
        ("lon", opt_num(media.lon)),
        ("exif", media.exif.join(" ")),
        ("time_created", media.time_created.clone()),
        ("exposure_time", media.exposure_time.clone()),
        (
            "metadata_text",
            media.metadata_text.clone().unwrap_or_default(),
        ),
        ("thumbnail", media.thumbnail.large.clone()),
        ("event_id", media.event_id.to_string()),
        (
            "event_name",
            event_names
                .get(&media.event_id)
                .cloned()
                .unwrap_or_default(),
        ),
        (
            "tag_ids",
            media
                .tags
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        ),
        (
            "tags",
            media
                .tags
                .iter()
                .filter_map(|id| tag_names.get(id).cloned())
                .collect::<Vec<_>>()
                .join(", "),
        ),
    ]
}

fn write_csv(
    export: &LibraryExport,
    event_names: &BTreeMap<i64, String>,
    tag_names: &BTreeMap<i64, String>,
    dest: &Path,
) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_path(dest.join("media.csv"))?;

    let mut wrote_header = false;
    for media in &export.media {
        let row = tabular_row(media, event_names, tag_names);
        if !wrote_header {
            writer.write_record(row.iter().map(|(name, _)| *name))?;
            wrote_header = true;
        }
        writer.write_record(row.iter().map(|(_, value)| value.as_str()))?;
    }
    if !wrote_header {
        // Header even for an empty library
        let empty = media_export(&Media::new(MediaKind::Photo, 0, 0, 0).unwrap());
        let row = tabular_row(&empty, event_names, tag_names);
        writer.write_record(row.iter().map(|(name, _)| *name))?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct FeatureCollection {
    #[serde(rename = "type")]
    kind: &'static str,
    features: Vec<Feature>,
}

#[derive(Serialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
    geometry: Geometry,
    properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct Geometry {
    #[serde(rename = "type")]
    kind: &'static str,
    /// Longitude, latitude — GeoJSON axis order.
    coordinates: (f64, f64),
}

fn write_geojson(
    export: &LibraryExport,
    event_names: &BTreeMap<i64, String>,
    tag_names: &BTreeMap<i64, String>,
    dest: &Path,
) -> Result<(), ExportError> {
    let mut features = Vec::new();

    for media in &export.media {
        let (Some(lat), Some(lon)) = (media.lat, media.lon) else {
            continue;
        };

        let mut properties = serde_json::Map::new();
        for (name, value) in tabular_row(media, event_names, tag_names) {
            if name == "lat" || name == "lon" || value.is_empty() {
                continue;
            }
            properties.insert(name.to_string(), serde_json::Value::String(value));
        }

        features.push(Feature {
            kind: "Feature",
            geometry: Geometry {
                kind: "Point",
                coordinates: (lon, lat),
            },
            properties,
        });
    }

    let collection = FeatureCollection {
        kind: "FeatureCollection",
        features,
    };
    let file = File::create(dest.join("media.geojson"))?;
    serde_json::to_writer(file, &collection)?;
    Ok(())
}
