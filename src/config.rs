//! Gallery configuration module.
//!
//! Handles loading and validating `gallery.toml`. Everything that is not a
//! per-invocation path (database, media directory, output directory — those
//! are CLI flags) lives here: thumbnail geometry, external tool commands,
//! video render settings, overlay icons, and library filtering rules.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! title = "Photos"              # Site title used in the exports
//!
//! [thumbnails]
//! small = "96x96"               # Square thumbnail size classes (WxH)
//! medium = "180x180"
//! large = "360x360"
//! regular_width = 512           # Width of the aspect-preserving thumbnail
//!
//! [tools]
//! magick = "convert"            # ImageMagick convert command
//! montage = "montage"           # ImageMagick montage command
//! ffmpeg = "ffmpeg"
//! ffprobe = "ffprobe"
//! exiv2 = "exiv2"
//!
//! [video]
//! transcode_heights = [480, 1080]  # Heights of the multi-resolution renders
//! preview_seconds = 8              # Length of the animated GIF previews
//!
//! [icons]
//! # Optional overlay badges composited onto the corner of thumbnails.
//! # panorama = "icons/panorama.png"
//! # play = "icons/play.png"
//! # raw = "icons/raw.png"
//!
//! [library]
//! min_rating = 0                # Ignore media rated below this (0-5)
//! tags_to_skip = []             # Tag paths excluded from the whole site
//!
//! [cameras]
//! # Camera name rewrites applied to the EXIF make/model string.
//! # "OLYMPUS IMAGING CORP. E-M5" = "Olympus E-M5"
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse — override just the values you want. Unknown keys
//! are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Gallery configuration loaded from `gallery.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GalleryConfig {
    /// Site title used in the machine-readable exports.
    pub title: String,
    /// Thumbnail size classes.
    pub thumbnails: ThumbnailsConfig,
    /// External tool command names.
    pub tools: ToolsConfig,
    /// Video render settings.
    pub video: VideoConfig,
    /// Overlay badge icons.
    pub icons: IconsConfig,
    /// Library filtering rules.
    pub library: LibraryConfig,
    /// Camera name rewrites keyed by the raw EXIF make/model string.
    pub cameras: BTreeMap<String, String>,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            title: "Photos".to_string(),
            thumbnails: ThumbnailsConfig::default(),
            tools: ToolsConfig::default(),
            video: VideoConfig::default(),
            icons: IconsConfig::default(),
            library: LibraryConfig::default(),
            cameras: BTreeMap::new(),
        }
    }
}

/// Square thumbnail size classes plus the aspect-preserving regular width.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailsConfig {
    pub small: String,
    pub medium: String,
    pub large: String,
    pub regular_width: u32,
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            small: "96x96".to_string(),
            medium: "180x180".to_string(),
            large: "360x360".to_string(),
            regular_width: 512,
        }
    }
}

/// External tool command names.
///
/// These are bare command names resolved through `$PATH` by default, but a
/// full path works too (e.g. `magick = "/opt/imagemagick/bin/convert"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub magick: String,
    pub montage: String,
    pub ffmpeg: String,
    pub ffprobe: String,
    pub exiv2: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            magick: "convert".to_string(),
            montage: "montage".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            exiv2: "exiv2".to_string(),
        }
    }
}

/// Video render settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VideoConfig {
    /// Heights of the multi-resolution renders. Empty disables transcoding.
    pub transcode_heights: Vec<u32>,
    /// Length of the animated GIF previews in seconds.
    pub preview_seconds: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            transcode_heights: vec![480, 1080],
            preview_seconds: 8,
        }
    }
}

/// Optional overlay badges composited onto the corner of thumbnails.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IconsConfig {
    pub panorama: Option<String>,
    pub play: Option<String>,
    pub raw: Option<String>,
}

/// Library filtering rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LibraryConfig {
    /// Ignore media rated below this (0-5).
    pub min_rating: u8,
    /// Tag paths excluded from the whole site (e.g. `/Private`).
    pub tags_to_skip: Vec<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            min_rating: 0,
            tags_to_skip: Vec::new(),
        }
    }
}

/// Load `gallery.toml` from the given path, or defaults if `None`.
pub fn load_config(path: Option<&Path>) -> Result<GalleryConfig, ConfigError> {
    let config = match path {
        Some(p) => {
            let content = fs::read_to_string(p)?;
            toml::from_str(&content)?
        }
        None => GalleryConfig::default(),
    };
    validate(&config)?;
    Ok(config)
}

/// Validate the thumbnail geometry and rating bounds.
fn validate(config: &GalleryConfig) -> Result<(), ConfigError> {
    for size in [
        &config.thumbnails.small,
        &config.thumbnails.medium,
        &config.thumbnails.large,
    ] {
        if parse_size(size).is_none() {
            return Err(ConfigError::Validation(format!(
                "thumbnail size '{size}' is not of the form WxH"
            )));
        }
    }
    if config.thumbnails.regular_width == 0 {
        return Err(ConfigError::Validation(
            "thumbnails.regular_width must be greater than zero".to_string(),
        ));
    }
    if config.library.min_rating > 5 {
        return Err(ConfigError::Validation(format!(
            "library.min_rating must be between 0 and 5, got {}",
            config.library.min_rating
        )));
    }
    Ok(())
}

/// Parse a `WxH` geometry string into `(width, height)`.
pub fn parse_size(size: &str) -> Option<(u32, u32)> {
    let (w, h) = size.split_once('x')?;
    let w = w.parse().ok()?;
    let h = h.parse().ok()?;
    if w == 0 || h == 0 {
        return None;
    }
    Some((w, h))
}

/// Return a stock `gallery.toml` with every option documented.
///
/// Printed by the `gen-config` subcommand so users can start from a
/// complete, commented file instead of reading docs.
pub fn stock_config_toml() -> &'static str {
    r##"# gallery.toml - shotwell-gal configuration
# All options are optional; the values below are the defaults.

# Site title used in the machine-readable exports.
title = "Photos"

[thumbnails]
# Square thumbnail size classes (WxH).
small = "96x96"
medium = "180x180"
large = "360x360"
# Width of the aspect-preserving regular thumbnail.
regular_width = 512

[tools]
# External commands, resolved through $PATH. Full paths work too.
magick = "convert"
montage = "montage"
ffmpeg = "ffmpeg"
ffprobe = "ffprobe"
exiv2 = "exiv2"

[video]
# Heights of the multi-resolution renders. Empty disables transcoding.
transcode_heights = [480, 1080]
# Length of the animated GIF previews in seconds.
preview_seconds = 8

[icons]
# Optional overlay badges composited onto the corner of thumbnails.
# panorama = "icons/panorama.png"
# play = "icons/play.png"
# raw = "icons/raw.png"

[library]
# Ignore media rated below this (0-5).
min_rating = 0
# Tag paths excluded from the whole site.
tags_to_skip = []

[cameras]
# Camera name rewrites applied to the EXIF make/model string.
# "OLYMPUS IMAGING CORP. E-M5" = "Olympus E-M5"
"##
}
