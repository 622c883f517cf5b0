//! Shared test utilities for the shotwell-gal test suite.
//!
//! Provides a file-backed miniature Shotwell catalog with insert helpers,
//! so catalog and aggregation tests can build realistic libraries in a
//! couple of lines:
//!
//! ```rust
//! let tmp = TempDir::new().unwrap();
//! let fixture = FixtureCatalog::new(tmp.path());
//! fixture.insert_event(10, Some("Trip"), None);
//! fixture.insert_photo(1, 10, "/pics/dawn.jpg", 1622548800, 3);
//! let catalog = fixture.open();
//! ```

use crate::catalog::Catalog;
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};

/// Full control over a photo row. `Default` gives a plausible landscape
/// photo; tests override just the fields they care about.
pub struct PhotoSpec {
    pub id: i64,
    pub event_id: i64,
    pub filename: String,
    pub exposure_time: i64,
    pub rating: i64,
    pub filesize: i64,
    pub width: i64,
    pub height: i64,
    pub orientation: i64,
    pub title: Option<String>,
    pub comment: Option<String>,
    pub transformations: Option<String>,
}

impl Default for PhotoSpec {
    fn default() -> Self {
        Self {
            id: 1,
            event_id: 1,
            filename: "/pics/photo.jpg".to_string(),
            exposure_time: 0,
            rating: 0,
            filesize: 1000,
            width: 800,
            height: 600,
            orientation: 1,
            title: None,
            comment: None,
            transformations: None,
        }
    }
}

/// A writable Shotwell catalog living in a test temp directory.
pub struct FixtureCatalog {
    path: PathBuf,
}

impl FixtureCatalog {
    /// Create `photos.db` under `dir` with the base schema
    /// (photos, events, tags — the optional tables are opt-in).
    pub fn new(dir: &Path) -> Self {
        let path = dir.join("photos.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE PhotoTable ( \
                 id INTEGER PRIMARY KEY, filename TEXT, width INTEGER, height INTEGER, \
                 filesize INTEGER, exposure_time INTEGER, orientation INTEGER, \
                 event_id INTEGER, transformations TEXT, time_created INTEGER, \
                 rating INTEGER, title TEXT, comment TEXT, \
                 develop_embedded_id INTEGER DEFAULT -1); \
             CREATE TABLE EventTable ( \
                 id INTEGER PRIMARY KEY, name TEXT, comment TEXT, primary_source_id TEXT); \
             CREATE TABLE TagTable ( \
                 id INTEGER PRIMARY KEY, name TEXT, photo_id_list TEXT);",
        )
        .unwrap();
        Self { path }
    }

    /// Open the fixture through the production read-only entry point.
    pub fn open(&self) -> Catalog {
        Catalog::open(&self.path).unwrap()
    }

    fn conn(&self) -> Connection {
        Connection::open(&self.path).unwrap()
    }

    pub fn add_video_table(&self) {
        self.conn()
            .execute_batch(
                "CREATE TABLE VideoTable ( \
                     id INTEGER PRIMARY KEY, filename TEXT, clip_duration REAL, \
                     filesize INTEGER, exposure_time INTEGER, event_id INTEGER, \
                     time_created INTEGER, rating INTEGER, title TEXT, comment TEXT);",
            )
            .unwrap();
    }

    pub fn add_backing_table(&self) {
        self.conn()
            .execute_batch(
                "CREATE TABLE BackingPhotoTable (id INTEGER PRIMARY KEY, filepath TEXT);",
            )
            .unwrap();
    }

    /// Insert a photo with default size/metadata.
    pub fn insert_photo(&self, id: i64, event_id: i64, filename: &str, exposure: i64, rating: i64) {
        self.insert_photo_spec(&PhotoSpec {
            id,
            event_id,
            filename: filename.to_string(),
            exposure_time: exposure,
            rating,
            ..PhotoSpec::default()
        });
    }

    pub fn insert_photo_spec(&self, spec: &PhotoSpec) {
        self.conn()
            .execute(
                "INSERT INTO PhotoTable (id, event_id, filename, exposure_time, time_created, \
                 rating, filesize, width, height, orientation, title, comment, transformations, \
                 develop_embedded_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, -1)",
                params![
                    spec.id,
                    spec.event_id,
                    spec.filename,
                    spec.exposure_time,
                    spec.exposure_time,
                    spec.rating,
                    spec.filesize,
                    spec.width,
                    spec.height,
                    spec.orientation,
                    spec.title,
                    spec.comment,
                    spec.transformations,
                ],
            )
            .unwrap();
    }

    /// Insert a RAW photo: the PhotoTable row points at the RAW file and a
    /// BackingPhotoTable row carries the developed JPEG.
    pub fn insert_raw_photo(
        &self,
        id: i64,
        event_id: i64,
        raw_path: &str,
        develop_path: &str,
        exposure: i64,
        rating: i64,
    ) {
        let conn = self.conn();
        let backing_id = id + 10_000;
        conn.execute(
            "INSERT INTO BackingPhotoTable (id, filepath) VALUES (?1, ?2)",
            params![backing_id, develop_path],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO PhotoTable (id, event_id, filename, exposure_time, time_created, \
             rating, filesize, width, height, orientation, develop_embedded_id) \
             VALUES (?1, ?2, ?3, ?4, ?4, ?5, 2000, 800, 600, 1, ?6)",
            params![id, event_id, raw_path, exposure, rating, backing_id],
        )
        .unwrap();
    }

    pub fn insert_video(
        &self,
        id: i64,
        event_id: i64,
        filename: &str,
        exposure: i64,
        rating: i64,
        clip_duration: f64,
    ) {
        self.conn()
            .execute(
                "INSERT INTO VideoTable (id, event_id, filename, exposure_time, time_created, \
                 rating, filesize, clip_duration) \
                 VALUES (?1, ?2, ?3, ?4, ?4, ?5, 5000, ?6)",
                params![id, event_id, filename, exposure, rating, clip_duration],
            )
            .unwrap();
    }

    pub fn insert_event(&self, id: i64, name: Option<&str>, primary_source_id: Option<&str>) {
        self.conn()
            .execute(
                "INSERT INTO EventTable (id, name, primary_source_id) VALUES (?1, ?2, ?3)",
                params![id, name, primary_source_id],
            )
            .unwrap();
    }

    pub fn insert_tag(&self, id: i64, name: &str, photo_id_list: &str) {
        self.conn()
            .execute(
                "INSERT INTO TagTable (id, name, photo_id_list) VALUES (?1, ?2, ?3)",
                params![id, name, photo_id_list],
            )
            .unwrap();
    }
}
