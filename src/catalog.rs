//! Shotwell catalog access.
//!
//! Read-only bindings for the subset of the Shotwell SQLite schema the
//! exporter consumes: photos, optional RAW backing rows, optional videos,
//! events, and tag membership.
//!
//! ## Optional tables
//!
//! Older libraries predate `BackingPhotoTable` and `VideoTable`. Both are
//! feature-detected through [`Catalog::table_exists`] before querying, so
//! their absence is not an error.
//!
//! ## Trashed rows
//!
//! Rows with `event_id = -1` are in Shotwell's trash and are excluded by
//! every query, as are photo rows below the configured minimum rating.
//! Develop-embedded photo rows (`develop_embedded_id != -1`) only appear
//! through the RAW join, never as regular photos.

use rusqlite::{Connection, OpenFlags};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog database not found: {0}")]
    NotFound(PathBuf),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// One photo row, regular or RAW-backed.
#[derive(Debug, Clone)]
pub struct PhotoRow {
    pub id: i64,
    pub event_id: i64,
    /// Developed image used as the thumbnail source. For RAW rows this is
    /// the backing JPEG; for regular rows the photo file itself.
    pub filename: String,
    /// Link target when it differs from `filename`: the RAW file itself.
    pub download_filename: Option<String>,
    pub title: Option<String>,
    pub comment: Option<String>,
    pub filesize: i64,
    pub exposure_time: i64,
    pub time_created: i64,
    pub rating: i64,
    pub width: i64,
    pub height: i64,
    pub orientation: i64,
    pub transformations: Option<String>,
}

impl PhotoRow {
    pub fn is_raw(&self) -> bool {
        self.download_filename.is_some()
    }
}

/// One video row.
#[derive(Debug, Clone)]
pub struct VideoRow {
    pub id: i64,
    pub event_id: i64,
    pub filename: String,
    pub title: Option<String>,
    pub comment: Option<String>,
    pub filesize: i64,
    pub exposure_time: i64,
    pub time_created: i64,
    pub rating: i64,
    pub clip_duration: f64,
}

/// One event row.
#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: i64,
    pub name: Option<String>,
    pub comment: Option<String>,
    /// Synthetic media id of the event's representative item.
    pub primary_source_id: Option<String>,
}

/// One tag row with its comma-joined member list.
#[derive(Debug, Clone)]
pub struct TagRow {
    pub id: i64,
    pub name: String,
    pub photo_id_list: String,
}

impl TagRow {
    /// Member media ids, with empty entries from trailing commas dropped.
    pub fn member_ids(&self) -> impl Iterator<Item = &str> {
        self.photo_id_list.split(',').filter(|id| !id.is_empty())
    }
}

/// Read-only handle on a Shotwell library database.
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Open the library database read-only.
    ///
    /// This is the one fatal error source in the pipeline: without a
    /// catalog there is nothing to export.
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        if !path.exists() {
            return Err(CatalogError::NotFound(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Feature probe for the optional tables.
    pub fn table_exists(&self, name: &str) -> Result<bool, CatalogError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count == 1)
    }

    /// Regular (non-RAW) photo rows, ordered by exposure time.
    pub fn photo_rows(&self, min_rating: u8) -> Result<Vec<PhotoRow>, CatalogError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_id, filename, title, comment, filesize, exposure_time, \
             time_created, rating, width, height, orientation, transformations \
             FROM PhotoTable \
             WHERE rating >= ?1 AND event_id != -1 AND develop_embedded_id = -1 \
             ORDER BY exposure_time",
        )?;
        let rows = stmt.query_map([min_rating], |row| {
            Ok(PhotoRow {
                id: row.get(0)?,
                event_id: row.get(1)?,
                filename: row.get(2)?,
                download_filename: None,
                title: row.get(3)?,
                comment: row.get(4)?,
                filesize: row.get(5)?,
                exposure_time: row.get(6)?,
                time_created: row.get(7)?,
                rating: row.get(8)?,
                width: row.get(9)?,
                height: row.get(10)?,
                orientation: row.get(11)?,
                transformations: row.get(12)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// RAW photo rows joined against their developed backing file.
    ///
    /// Callers must feature-probe `BackingPhotoTable` first.
    pub fn raw_photo_rows(&self, min_rating: u8) -> Result<Vec<PhotoRow>, CatalogError> {
        let mut stmt = self.conn.prepare(
            "SELECT PhotoTable.id, PhotoTable.event_id, BackingPhotoTable.filepath, \
             PhotoTable.filename, PhotoTable.title, PhotoTable.comment, PhotoTable.filesize, \
             PhotoTable.exposure_time, PhotoTable.time_created, PhotoTable.rating, \
             PhotoTable.width, PhotoTable.height, PhotoTable.orientation, \
             PhotoTable.transformations \
             FROM PhotoTable, BackingPhotoTable \
             WHERE PhotoTable.rating >= ?1 AND PhotoTable.event_id != -1 \
             AND PhotoTable.develop_embedded_id != -1 \
             AND BackingPhotoTable.id = PhotoTable.develop_embedded_id \
             ORDER BY PhotoTable.exposure_time",
        )?;
        let rows = stmt.query_map([min_rating], |row| {
            Ok(PhotoRow {
                id: row.get(0)?,
                event_id: row.get(1)?,
                filename: row.get(2)?,
                download_filename: row.get(3)?,
                title: row.get(4)?,
                comment: row.get(5)?,
                filesize: row.get(6)?,
                exposure_time: row.get(7)?,
                time_created: row.get(8)?,
                rating: row.get(9)?,
                width: row.get(10)?,
                height: row.get(11)?,
                orientation: row.get(12)?,
                transformations: row.get(13)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Video rows, ordered by exposure time.
    ///
    /// Callers must feature-probe `VideoTable` first.
    pub fn video_rows(&self, min_rating: u8) -> Result<Vec<VideoRow>, CatalogError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_id, filename, title, comment, filesize, exposure_time, \
             time_created, rating, clip_duration \
             FROM VideoTable \
             WHERE rating >= ?1 AND event_id != -1 \
             ORDER BY exposure_time",
        )?;
        let rows = stmt.query_map([min_rating], |row| {
            Ok(VideoRow {
                id: row.get(0)?,
                event_id: row.get(1)?,
                filename: row.get(2)?,
                title: row.get(3)?,
                comment: row.get(4)?,
                filesize: row.get(5)?,
                exposure_time: row.get(6)?,
                time_created: row.get(7)?,
                rating: row.get(8)?,
                clip_duration: row.get(9)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// All event rows.
    pub fn event_rows(&self) -> Result<Vec<EventRow>, CatalogError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, comment, primary_source_id FROM EventTable")?;
        let rows = stmt.query_map([], |row| {
            Ok(EventRow {
                id: row.get(0)?,
                name: row.get(1)?,
                comment: row.get(2)?,
                primary_source_id: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Maximum exposure time per event, over photo and video rows alike.
    ///
    /// Fetched without any rating filter so events sort identically no
    /// matter which media the current configuration keeps visible.
    pub fn event_max_dates(&self) -> Result<Vec<(i64, i64)>, CatalogError> {
        let mut dates = self.max_dates_from("PhotoTable")?;
        if self.table_exists("VideoTable")? {
            dates.extend(self.max_dates_from("VideoTable")?);
        }
        Ok(dates)
    }

    fn max_dates_from(&self, table: &str) -> Result<Vec<(i64, i64)>, CatalogError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT event_id, MAX(exposure_time) FROM {table} \
             WHERE event_id != -1 AND exposure_time != 0 \
             GROUP BY event_id"
        ))?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Non-empty tag rows in name order, so parents precede children.
    pub fn tag_rows(&self) -> Result<Vec<TagRow>, CatalogError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, photo_id_list FROM TagTable \
             WHERE photo_id_list IS NOT NULL AND photo_id_list != '' \
             ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TagRow {
                id: row.get(0)?,
                name: row.get(1)?,
                photo_id_list: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

/// Parse Shotwell's `transformations` key-file text into a flat
/// `section.key -> value` map.
///
/// The column holds GLib KeyFile syntax:
///
/// ```text
/// [crop]
/// left=10
/// top=20
///
/// [adjustments]
/// expansion={ 0, 130 }
/// ```
pub fn parse_transformations(text: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    let mut section = String::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = name.to_string();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let full_key = if section.is_empty() {
                key.trim().to_string()
            } else {
                format!("{}.{}", section, key.trim())
            };
            map.insert(full_key, value.trim().to_string());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::FixtureCatalog;
    use tempfile::TempDir;

    // =========================================================================
    // Opening
    // =========================================================================

    #[test]
    fn open_missing_database_fails() {
        let tmp = TempDir::new().unwrap();
        let result = Catalog::open(&tmp.path().join("nope.db"));
        assert!(matches!(result, Err(CatalogError::NotFound(_))));
    }

    #[test]
    fn table_probe_detects_optional_tables() {
        let tmp = TempDir::new().unwrap();
        let fixture = FixtureCatalog::new(tmp.path());
        let catalog = fixture.open();

        assert!(catalog.table_exists("PhotoTable").unwrap());
        assert!(!catalog.table_exists("VideoTable").unwrap());
        assert!(!catalog.table_exists("BackingPhotoTable").unwrap());

        fixture.add_video_table();
        assert!(catalog.table_exists("VideoTable").unwrap());
    }

    // =========================================================================
    // Photo queries
    // =========================================================================

    #[test]
    fn photo_rows_ordered_by_exposure() {
        let tmp = TempDir::new().unwrap();
        let fixture = FixtureCatalog::new(tmp.path());
        fixture.insert_photo(1, 10, "/pics/b.jpg", 2000, 3);
        fixture.insert_photo(2, 10, "/pics/a.jpg", 1000, 3);

        let rows = fixture.open().photo_rows(0).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, 2);
        assert_eq!(rows[1].id, 1);
        assert!(!rows[0].is_raw());
    }

    #[test]
    fn trashed_and_low_rated_rows_excluded() {
        let tmp = TempDir::new().unwrap();
        let fixture = FixtureCatalog::new(tmp.path());
        fixture.insert_photo(1, 10, "/pics/kept.jpg", 1000, 3);
        fixture.insert_photo(2, -1, "/pics/trashed.jpg", 1000, 3);
        fixture.insert_photo(3, 10, "/pics/low.jpg", 1000, 1);

        let rows = fixture.open().photo_rows(2).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);
    }

    #[test]
    fn develop_embedded_rows_excluded_from_regular_query() {
        let tmp = TempDir::new().unwrap();
        let fixture = FixtureCatalog::new(tmp.path());
        fixture.add_backing_table();
        fixture.insert_photo(1, 10, "/pics/plain.jpg", 1000, 0);
        fixture.insert_raw_photo(2, 10, "/pics/shot.cr2", "/develop/shot.jpg", 2000, 0);

        let catalog = fixture.open();
        let regular = catalog.photo_rows(0).unwrap();
        assert_eq!(regular.len(), 1);
        assert_eq!(regular[0].id, 1);

        let raw = catalog.raw_photo_rows(0).unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].id, 2);
        // Thumbnail source is the developed backing, link is the RAW file
        assert_eq!(raw[0].filename, "/develop/shot.jpg");
        assert_eq!(raw[0].download_filename.as_deref(), Some("/pics/shot.cr2"));
        assert!(raw[0].is_raw());
    }

    // =========================================================================
    // Video queries
    // =========================================================================

    #[test]
    fn video_rows_carry_clip_duration() {
        let tmp = TempDir::new().unwrap();
        let fixture = FixtureCatalog::new(tmp.path());
        fixture.add_video_table();
        fixture.insert_video(5, 10, "/vids/clip.mp4", 3000, 4, 12.5);

        let rows = fixture.open().video_rows(0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 5);
        assert_eq!(rows[0].clip_duration, 12.5);
    }

    // =========================================================================
    // Events and max dates
    // =========================================================================

    #[test]
    fn event_max_dates_cover_photos_and_videos() {
        let tmp = TempDir::new().unwrap();
        let fixture = FixtureCatalog::new(tmp.path());
        fixture.add_video_table();
        fixture.insert_event(10, Some("Trip"), None);
        fixture.insert_photo(1, 10, "/pics/a.jpg", 1000, 0);
        fixture.insert_photo(2, 10, "/pics/b.jpg", 5000, 0);
        fixture.insert_video(3, 10, "/vids/c.mp4", 9000, 0, 3.0);

        let dates = fixture.open().event_max_dates().unwrap();
        let photo_max = dates.iter().find(|(id, _)| *id == 10).unwrap();
        assert_eq!(photo_max.1, 5000);
        // Video table contributes its own row for the same event
        assert!(dates.iter().any(|&(id, date)| id == 10 && date == 9000));
    }

    #[test]
    fn max_dates_ignore_rating_filters() {
        let tmp = TempDir::new().unwrap();
        let fixture = FixtureCatalog::new(tmp.path());
        fixture.insert_photo(1, 10, "/pics/a.jpg", 7000, 0);

        // Even when the view excludes rating-0 media, dates are complete
        let dates = fixture.open().event_max_dates().unwrap();
        assert_eq!(dates, vec![(10, 7000)]);
    }

    // =========================================================================
    // Tags
    // =========================================================================

    #[test]
    fn tag_rows_sorted_by_name() {
        let tmp = TempDir::new().unwrap();
        let fixture = FixtureCatalog::new(tmp.path());
        fixture.insert_tag(2, "/Places/WV", "thumb0000000000000001,");
        fixture.insert_tag(1, "/Places", "thumb0000000000000001");
        fixture.insert_tag(3, "/Animals", "");

        let rows = fixture.open().tag_rows().unwrap();
        let names: Vec<&str> = rows.iter().map(|t| t.name.as_str()).collect();
        // Empty tag dropped, parents sort before children
        assert_eq!(names, vec!["/Places", "/Places/WV"]);
    }

    #[test]
    fn tag_member_ids_skip_empty_entries() {
        let row = TagRow {
            id: 1,
            name: "/Travel".to_string(),
            photo_id_list: "thumb0000000000000001,,video-0000000000000002,".to_string(),
        };
        let ids: Vec<&str> = row.member_ids().collect();
        assert_eq!(ids, vec!["thumb0000000000000001", "video-0000000000000002"]);
    }

    // =========================================================================
    // Transformations key-file parsing
    // =========================================================================

    #[test]
    fn parse_transformations_flattens_sections() {
        let text = "[crop]\nleft=10\ntop=20\nright=900\nbottom=700\n\n\
                    [adjustments]\nexpansion={ 0, 130 }\n";
        let map = parse_transformations(text);

        assert_eq!(map.get("crop.left").map(String::as_str), Some("10"));
        assert_eq!(map.get("crop.bottom").map(String::as_str), Some("700"));
        assert_eq!(
            map.get("adjustments.expansion").map(String::as_str),
            Some("{ 0, 130 }")
        );
    }

    #[test]
    fn parse_transformations_ignores_noise() {
        let map = parse_transformations("# comment\n\nnot a kv line\n[s]\nk=v\n");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("s.k").map(String::as_str), Some("v"));
    }
}
