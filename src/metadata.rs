//! Embedded metadata extraction.
//!
//! Photos carry their structured metadata (camera, GPS, exposure settings)
//! in EXIF/XMP tags. The pipeline dumps those tags once per item with
//! `exiv2` into the item's metadata sidecar artifact, then parses the dump
//! here. Everything downstream of the dump is a pure function over a
//! `tag -> value` map, which keeps the parsing testable without image
//! files or external tools.
//!
//! ## Tag dump format
//!
//! `exiv2 -PEXkyct` prints one tag per line:
//!
//! ```text
//! Exif.Image.Make                              Ascii       6  Google
//! Exif.Photo.FNumber                           Rational    1  168/100
//! Exif.GPSInfo.GPSLatitude                     Rational    3  41/1 29/1 2424/100
//! ```
//!
//! Tag name, type, and count are whitespace-separated; the value is the
//! rest of the line and may itself contain whitespace (or be empty).
//!
//! ## Failure policy
//!
//! A malformed value (bad rational, unexpected GPS encoding) drops that
//! field from the result. Nothing in this module aborts a run.

use crate::model::PhotoMetadata;
use log::warn;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

/// Raw `tag -> value` map from an exiv2 dump.
pub type RawTags = BTreeMap<String, String>;

/// Known motion-photo offset tags, most recent naming scheme first.
///
/// Different camera firmware versions mangle the XMP namespace differently;
/// new device variants extend this list, the lookup never changes.
pub const MOTION_PHOTO_OFFSET_TAGS: &[&str] = &[
    "Xmp.GCamera.MotionPhotoOffset",
    "Xmp.GCamera.MicroVideoOffset",
];

/// Parse an exiv2 tag dump into a raw tag map.
pub fn parse_exiv2_dump(text: &str) -> RawTags {
    let mut tags = RawTags::new();
    for line in text.lines() {
        if let Some((tag, value)) = parse_tag_line(line) {
            tags.insert(tag.to_string(), value.to_string());
        }
    }
    tags
}

/// Split one dump line into `(tag, value)`.
///
/// The first three whitespace-separated tokens are tag/type/count; the
/// remainder of the line (however much whitespace it contains) is the
/// value. Lines with fewer than three tokens are ignored.
fn parse_tag_line(line: &str) -> Option<(&str, &str)> {
    let mut rest = line.trim();
    let mut tokens = [""; 3];
    for token in &mut tokens {
        rest = rest.trim_start();
        let end = rest
            .find(char::is_whitespace)
            .unwrap_or(rest.len());
        *token = &rest[..end];
        rest = &rest[end..];
    }
    if tokens.iter().any(|t| t.is_empty()) {
        return None;
    }
    Some((tokens[0], rest.trim()))
}

/// Read and parse a previously-dumped metadata sidecar file.
pub fn read_sidecar_tags(path: &Path) -> Option<RawTags> {
    let content = std::fs::read_to_string(path).ok()?;
    Some(parse_exiv2_dump(&content))
}

/// Byte offset (from end of file) of an embedded motion-photo clip.
pub fn motion_photo_offset(tags: &RawTags) -> Option<u64> {
    for tag in MOTION_PHOTO_OFFSET_TAGS {
        if let Some(value) = tags.get(*tag)
            && let Ok(offset) = value.trim().parse::<u64>()
            && offset > 0
        {
            return Some(offset);
        }
    }
    None
}

/// Frames per second of a video's first stream, via `ffprobe`.
///
/// Any probe failure is a warning and leaves the field unset.
pub fn probe_video_fps(ffprobe: &str, path: &Path) -> Option<f64> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=r_frame_rate",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output();
    let output = match output {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            warn!(
                "ffprobe failed for {}: exit {:?}",
                path.display(),
                output.status.code()
            );
            return None;
        }
        Err(err) => {
            warn!("cannot run {ffprobe} for {}: {err}", path.display());
            return None;
        }
    };
    let text = String::from_utf8_lossy(&output.stdout);
    let rate = parse_rational(text.trim())?;
    if rate > 0.0 { Some(rate) } else { None }
}

/// Parser from raw tag maps to normalized photo metadata.
pub struct MetadataParser {
    /// Camera name rewrites keyed by the merged make/model string.
    camera_rewrites: BTreeMap<String, String>,
}

impl MetadataParser {
    pub fn new(camera_rewrites: BTreeMap<String, String>) -> Self {
        Self { camera_rewrites }
    }

    /// Map a raw tag dump to `{camera, gps, aperture, shutter, iso, focal}`.
    ///
    /// The display summary is built in a fixed order: aperture, shutter,
    /// focal length, ISO.
    pub fn parse(&self, tags: &RawTags) -> PhotoMetadata {
        let mut metadata = PhotoMetadata::default();

        let lat = parse_gps_coordinate(tags, "Exif.GPSInfo.GPSLatitude", "Exif.GPSInfo.GPSLatitudeRef");
        let lon = parse_gps_coordinate(
            tags,
            "Exif.GPSInfo.GPSLongitude",
            "Exif.GPSInfo.GPSLongitudeRef",
        );
        if let (Some(lat), Some(lon)) = (lat, lon)
            && lat != 0.0
            && lon != 0.0
        {
            metadata.lat = Some(lat);
            metadata.lon = Some(lon);
        }

        if let Some(aperture) = aperture(tags) {
            metadata.exif.push(format!("f/{}", trim_float(aperture)));
        }
        if let Some(shutter) = shutter_speed(tags) {
            metadata.exif.push(shutter);
        }
        if let Some(focal) = focal_length(tags) {
            metadata.exif.push(format!("{}mm", trim_float(focal)));
        }
        if let Some(iso) = iso(tags) {
            metadata.exif.push(format!("ISO{iso}"));
        }

        if let Some(make) = tags.get("Exif.Image.Make") {
            let model = tags
                .get("Exif.Image.Model")
                .map(String::as_str)
                .unwrap_or("");
            metadata.camera = self.camera_make_model(make.trim(), model.trim());
        }

        metadata
    }

    /// Merge make and model into one camera name, dropping the redundant
    /// make prefix most vendors embed in the model string.
    pub fn camera_make_model(&self, make: &str, model: &str) -> Option<String> {
        let camera = if make.is_empty() {
            model.to_string()
        } else if model.is_empty() {
            make.to_string()
        } else if model.starts_with(make) {
            model.to_string()
        } else {
            format!("{make} {model}")
        };

        if camera.is_empty() {
            return None;
        }
        Some(
            self.camera_rewrites
                .get(&camera)
                .cloned()
                .unwrap_or(camera),
        )
    }
}

/// Parse one GPS coordinate with its hemisphere reference.
///
/// exiv2 emits either pretty degree notation (`41deg 29' 24.24"`) or a
/// rational triplet (`41/1 29/1 2424/100`), depending on the print flags
/// that produced the dump. Both are handled; `S`/`W` references negate.
fn parse_gps_coordinate(tags: &RawTags, coord_tag: &str, ref_tag: &str) -> Option<f64> {
    let coord = tags.get(coord_tag)?;
    let reference = tags.get(ref_tag)?;

    let decimal = if coord.contains("deg") {
        let numbers = extract_numbers(coord);
        match numbers.len() {
            n if n >= 3 => numbers[0] + numbers[1] / 60.0 + numbers[2] / 3600.0,
            1 => numbers[0],
            _ => return None,
        }
    } else {
        let parts: Vec<&str> = coord.split_whitespace().collect();
        if parts.len() == 3 {
            let degrees = parse_rational(parts[0])?;
            let minutes = parse_rational(parts[1])?;
            let seconds = parse_rational(parts[2])?;
            degrees + minutes / 60.0 + seconds / 3600.0
        } else {
            coord.trim().parse::<f64>().ok()?
        }
    };

    match reference.chars().next() {
        Some('S') | Some('W') => Some(-decimal),
        _ => Some(decimal),
    }
}

/// Runs of digits and dots in a string, as floats.
fn extract_numbers(text: &str) -> Vec<f64> {
    let mut numbers = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() || c == '.' {
            current.push(c);
        } else if !current.is_empty() {
            if let Ok(value) = current.parse() {
                numbers.push(value);
            }
            current.clear();
        }
    }
    if !current.is_empty()
        && let Ok(value) = current.parse()
    {
        numbers.push(value);
    }
    numbers
}

/// Parse `num/den` or a bare float. Zero denominators are malformed.
fn parse_rational(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Some((num, den)) = value.split_once('/') {
        let num: i64 = num.trim().parse().ok()?;
        let den: i64 = den.trim().parse().ok()?;
        if den == 0 {
            return None;
        }
        Some(num as f64 / den as f64)
    } else {
        value.parse().ok()
    }
}

/// Parse `num/den` keeping the fraction, for shutter formatting.
fn parse_fraction(value: &str) -> Option<(i64, i64)> {
    let (num, den) = value.trim().split_once('/')?;
    let num: i64 = num.trim().parse().ok()?;
    let den: i64 = den.trim().parse().ok()?;
    if den == 0 || num == 0 {
        return None;
    }
    Some((num, den))
}

fn aperture(tags: &RawTags) -> Option<f64> {
    if let Some(value) = tags.get("Exif.Photo.FNumber")
        && let Some(f) = parse_rational(value)
        && f > 0.0
    {
        return Some(f);
    }
    // APEX fallback: aperture = 2^(value/2)
    if let Some(value) = tags.get("Exif.Photo.ApertureValue")
        && let Some(apex) = parse_rational(value)
    {
        return Some(2.0_f64.powf(apex / 2.0));
    }
    None
}

fn shutter_speed(tags: &RawTags) -> Option<String> {
    if let Some(value) = tags.get("Exif.Photo.ExposureTime") {
        if let Some((num, den)) = parse_fraction(value) {
            return Some(format_shutter_fraction(num, den));
        }
        if let Some(seconds) = parse_rational(value) {
            return Some(format_shutter_seconds(seconds));
        }
    }
    // APEX fallback: exposure = 2^-value
    if let Some(value) = tags.get("Exif.Photo.ShutterSpeedValue")
        && let Some(apex) = parse_rational(value)
    {
        return Some(format_shutter_seconds(2.0_f64.powf(-apex)));
    }
    None
}

fn format_shutter_fraction(num: i64, den: i64) -> String {
    if den == 1 {
        format!("{num}s")
    } else {
        format!("1/{}s", (den as f64 / num as f64).round() as i64)
    }
}

fn format_shutter_seconds(seconds: f64) -> String {
    if seconds <= 0.0 {
        return "0s".to_string();
    }
    if seconds >= 1.0 {
        format!("{}s", seconds.round() as i64)
    } else {
        format!("1/{}s", (1.0 / seconds).round() as i64)
    }
}

fn focal_length(tags: &RawTags) -> Option<f64> {
    let value = tags.get("Exif.Photo.FocalLength")?;
    parse_rational(value).filter(|f| *f > 0.0)
}

fn iso(tags: &RawTags) -> Option<i64> {
    for tag in [
        "Exif.Photo.ISOSpeedRatings",
        "Exif.Photo.PhotographicSensitivity",
        "Exif.Image.ISOSpeedRatings",
    ] {
        if let Some(value) = tags.get(tag)
            && let Ok(iso) = value.trim().parse::<i64>()
        {
            return Some(iso);
        }
    }
    None
}

/// Format with two decimals, trailing zeros (and a bare dot) removed.
///
/// `1.68` stays `1.68`, `1.70` becomes `1.7`, `2.00` becomes `2`.
fn trim_float(value: f64) -> String {
    let formatted = format!("{value:.2}");
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(entries: &[(&str, &str)]) -> RawTags {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn parser() -> MetadataParser {
        MetadataParser::new(BTreeMap::new())
    }

    // =========================================================================
    // Tag dump parsing
    // =========================================================================

    #[test]
    fn parse_dump_basic() {
        let dump = "Exif.Image.Make                              Ascii       6  Google\n\
                    Exif.Image.Model                             Ascii      17  Pixel 9 Pro\n\
                    Exif.Photo.FNumber                           Rational    1  168/100\n\
                    Exif.Photo.ExposureTime                      Rational    1  1/125";
        let tags = parse_exiv2_dump(dump);

        assert_eq!(tags["Exif.Image.Make"], "Google");
        assert_eq!(tags["Exif.Image.Model"], "Pixel 9 Pro");
        assert_eq!(tags["Exif.Photo.FNumber"], "168/100");
        assert_eq!(tags["Exif.Photo.ExposureTime"], "1/125");
    }

    #[test]
    fn parse_dump_multi_token_values() {
        let dump =
            "Exif.GPSInfo.GPSLatitude                     Rational    3  41/1 29/1 2424/100";
        let tags = parse_exiv2_dump(dump);
        assert_eq!(tags["Exif.GPSInfo.GPSLatitude"], "41/1 29/1 2424/100");
    }

    #[test]
    fn parse_dump_empty_value_and_noise() {
        let dump = "Exif.Photo.UserComment                       Undefined   8\n\
                    garbage line\n\
                    \n\
                    Exif.Photo.ISOSpeedRatings                   Short       1  800";
        let tags = parse_exiv2_dump(dump);
        assert_eq!(tags["Exif.Photo.UserComment"], "");
        assert_eq!(tags["Exif.Photo.ISOSpeedRatings"], "800");
        assert_eq!(tags.len(), 2);
    }

    // =========================================================================
    // EXIF summary formatting
    // =========================================================================

    #[test]
    fn precise_rational_values_preserved() {
        let result = parser().parse(&tags(&[
            ("Exif.Photo.FNumber", "168/100"),
            ("Exif.Photo.ExposureTime", "1/125"),
            ("Exif.Photo.FocalLength", "202/100"),
            ("Exif.Photo.ISOSpeedRatings", "800"),
            ("Exif.Image.Make", "Google"),
            ("Exif.Image.Model", "Pixel 9 Pro"),
        ]));

        assert_eq!(result.exif, vec!["f/1.68", "1/125s", "2.02mm", "ISO800"]);
        assert_eq!(result.camera.as_deref(), Some("Google Pixel 9 Pro"));
    }

    #[test]
    fn trailing_zeros_removed() {
        let result = parser().parse(&tags(&[
            ("Exif.Photo.FNumber", "17/10"),
            ("Exif.Photo.ExposureTime", "1/125"),
            ("Exif.Photo.FocalLength", "2/1"),
            ("Exif.Photo.ISOSpeedRatings", "800"),
        ]));

        assert_eq!(result.exif, vec!["f/1.7", "1/125s", "2mm", "ISO800"]);
    }

    #[test]
    fn aperture_and_focal_only() {
        let result = parser().parse(&tags(&[
            ("Exif.Photo.FNumber", "28/10"),
            ("Exif.Photo.FocalLength", "50/10"),
        ]));
        assert_eq!(result.exif, vec!["f/2.8", "5mm"]);
    }

    #[test]
    fn apex_aperture_fallback() {
        // ApertureValue 5 -> 2^2.5 = 5.66
        let result = parser().parse(&tags(&[("Exif.Photo.ApertureValue", "5/1")]));
        assert_eq!(result.exif, vec!["f/5.66"]);
    }

    #[test]
    fn apex_shutter_fallback() {
        // ShutterSpeedValue 8 -> 2^-8 = 1/256
        let result = parser().parse(&tags(&[("Exif.Photo.ShutterSpeedValue", "8/1")]));
        assert_eq!(result.exif, vec!["1/256s"]);
    }

    #[test]
    fn whole_second_exposures() {
        let result = parser().parse(&tags(&[("Exif.Photo.ExposureTime", "2/1")]));
        assert_eq!(result.exif, vec!["2s"]);
    }

    #[test]
    fn malformed_rational_field_omitted() {
        let result = parser().parse(&tags(&[
            ("Exif.Photo.FNumber", "garbage"),
            ("Exif.Photo.ISOSpeedRatings", "800"),
        ]));
        assert_eq!(result.exif, vec!["ISO800"]);
    }

    #[test]
    fn zero_denominator_is_malformed() {
        assert_eq!(parse_rational("1/0"), None);
        let result = parser().parse(&tags(&[("Exif.Photo.FNumber", "28/0")]));
        assert!(result.exif.is_empty());
    }

    #[test]
    fn iso_tag_priority() {
        let result = parser().parse(&tags(&[
            ("Exif.Photo.PhotographicSensitivity", "400"),
            ("Exif.Image.ISOSpeedRatings", "100"),
        ]));
        assert_eq!(result.exif, vec!["ISO400"]);

        let result = parser().parse(&tags(&[("Exif.Image.ISOSpeedRatings", "100")]));
        assert_eq!(result.exif, vec!["ISO100"]);
    }

    // =========================================================================
    // GPS parsing
    // =========================================================================

    #[test]
    fn gps_rational_format() {
        let result = parser().parse(&tags(&[
            ("Exif.GPSInfo.GPSLatitude", "41/1 29/1 2424/100"),
            ("Exif.GPSInfo.GPSLatitudeRef", "North"),
            ("Exif.GPSInfo.GPSLongitude", "81/1 41/1 534/100"),
            ("Exif.GPSInfo.GPSLongitudeRef", "West"),
        ]));

        assert!((result.lat.unwrap() - 41.490067).abs() < 1e-5);
        assert!((result.lon.unwrap() + 81.684817).abs() < 1e-5);
    }

    #[test]
    fn gps_degree_format() {
        let result = parser().parse(&tags(&[
            ("Exif.GPSInfo.GPSLatitude", "41deg 29' 24.24\""),
            ("Exif.GPSInfo.GPSLatitudeRef", "North"),
            ("Exif.GPSInfo.GPSLongitude", "81deg 41' 5.34\""),
            ("Exif.GPSInfo.GPSLongitudeRef", "West"),
        ]));

        assert!((result.lat.unwrap() - 41.490067).abs() < 1e-5);
        assert!((result.lon.unwrap() + 81.684817).abs() < 1e-5);
    }

    #[test]
    fn gps_south_and_west_negate() {
        let result = parser().parse(&tags(&[
            ("Exif.GPSInfo.GPSLatitude", "41deg 29' 24.24\""),
            ("Exif.GPSInfo.GPSLatitudeRef", "S"),
            ("Exif.GPSInfo.GPSLongitude", "81deg 41' 5.34\""),
            ("Exif.GPSInfo.GPSLongitudeRef", "W"),
        ]));

        assert!(result.lat.unwrap() < 0.0);
        assert!(result.lon.unwrap() < 0.0);
    }

    #[test]
    fn gps_zero_island_dropped() {
        let result = parser().parse(&tags(&[
            ("Exif.GPSInfo.GPSLatitude", "0/1 0/1 0/1"),
            ("Exif.GPSInfo.GPSLatitudeRef", "North"),
            ("Exif.GPSInfo.GPSLongitude", "0/1 0/1 0/1"),
            ("Exif.GPSInfo.GPSLongitudeRef", "East"),
        ]));
        assert_eq!(result.lat, None);
        assert_eq!(result.lon, None);
    }

    #[test]
    fn gps_missing_ref_dropped() {
        let result = parser().parse(&tags(&[(
            "Exif.GPSInfo.GPSLatitude",
            "41/1 29/1 2424/100",
        )]));
        assert_eq!(result.lat, None);
    }

    // =========================================================================
    // Camera make/model
    // =========================================================================

    #[test]
    fn camera_make_model_merging() {
        let p = parser();
        let cases = [
            (("Canon", "Canon EOS 5D Mark IV"), "Canon EOS 5D Mark IV"),
            (("Apple", "iPhone 12 Pro"), "Apple iPhone 12 Pro"),
            (("Google", "Pixel 9 Pro"), "Google Pixel 9 Pro"),
            (("", "Pixel 9 Pro"), "Pixel 9 Pro"),
            (("Google", ""), "Google"),
        ];
        for ((make, model), expected) in cases {
            assert_eq!(p.camera_make_model(make, model).as_deref(), Some(expected));
        }
        assert_eq!(p.camera_make_model("", ""), None);
    }

    #[test]
    fn camera_rewrites_applied() {
        let rewrites = [(
            "OLYMPUS IMAGING CORP. E-M5".to_string(),
            "Olympus E-M5".to_string(),
        )]
        .into_iter()
        .collect();
        let p = MetadataParser::new(rewrites);

        let result = p.parse(&tags(&[
            ("Exif.Image.Make", "OLYMPUS IMAGING CORP."),
            ("Exif.Image.Model", "E-M5"),
        ]));
        assert_eq!(result.camera.as_deref(), Some("Olympus E-M5"));
    }

    // =========================================================================
    // Motion photo offsets
    // =========================================================================

    #[test]
    fn motion_offset_tag_priority() {
        let t = tags(&[
            ("Xmp.GCamera.MicroVideoOffset", "111"),
            ("Xmp.GCamera.MotionPhotoOffset", "222"),
        ]);
        assert_eq!(motion_photo_offset(&t), Some(222));
    }

    #[test]
    fn motion_offset_single_variant() {
        let t = tags(&[("Xmp.GCamera.MicroVideoOffset", "4096")]);
        assert_eq!(motion_photo_offset(&t), Some(4096));
    }

    #[test]
    fn motion_offset_rejects_bad_values() {
        assert_eq!(motion_photo_offset(&tags(&[])), None);
        assert_eq!(
            motion_photo_offset(&tags(&[("Xmp.GCamera.MicroVideoOffset", "0")])),
            None
        );
        assert_eq!(
            motion_photo_offset(&tags(&[("Xmp.GCamera.MicroVideoOffset", "x")])),
            None
        );
    }

    // =========================================================================
    // ffprobe
    // =========================================================================

    #[test]
    fn probe_with_missing_tool_is_none() {
        assert_eq!(
            probe_video_fps("definitely-not-ffprobe", Path::new("/nope.mp4")),
            None
        );
    }
}
