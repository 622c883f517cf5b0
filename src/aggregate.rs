//! Library aggregation: catalog rows to view model.
//!
//! This is the heart of the exporter. One pass over the catalog builds the
//! full in-memory hierarchy — media, events, tags, years — with aggregate
//! statistics folded bottom-up at every level, and drives the artifact
//! cache to realize every derived file each item needs.
//!
//! ## Pass structure
//!
//! 1. **Media**: photo rows, RAW-backed rows (if the schema has them),
//!    then video rows, each registered against its owning event.
//! 2. **Events**: titles, primary-media boosts, composite thumbnails,
//!    and the independent max-date query that fixes sort order.
//! 3. **Tags**: membership rows in name order (parents first), stats,
//!    back-references, composite thumbnails.
//! 4. **Years**: dated events bucketed into every year they span,
//!    per-year stats folded into year and global aggregates.
//! 5. **Year thumbnails** from representative candidates.
//!
//! ## Error policy
//!
//! Only catalog errors propagate. A missing source file, a failed tool, an
//! unparseable metadata field, or an undated event is logged and worked
//! around — a partial site beats no site.

use crate::artifact::{ArtifactCache, EnsureOutcome, Op};
use crate::catalog::{Catalog, CatalogError, PhotoRow, VideoRow, parse_transformations};
use crate::config::{GalleryConfig, parse_size};
use crate::metadata::{self, MetadataParser};
use crate::model::{
    Event, EventYearBlock, Media, MediaKind, PreviewSet, Rotation, Stats, ThumbnailSet, ViewModel,
    Tag, YearBlock, dir_shard, year_string,
};
use log::warn;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Events with at least this many primary-media candidates use only those
/// for the year montage; below it, all member media fill the grid.
const MIN_PRIMARY_CANDIDATES: usize = 10;

/// Build the full library view, generating artifacts along the way.
pub fn build_view(
    catalog: &Catalog,
    cache: &mut ArtifactCache<'_>,
    config: &GalleryConfig,
    media_root: &Path,
    shotwell_thumbs: &Path,
) -> Result<ViewModel, CatalogError> {
    let parser = MetadataParser::new(config.cameras.clone());
    let mut aggregator = Aggregator {
        catalog,
        cache,
        config,
        media_root,
        shotwell_thumbs,
        parser,
    };
    aggregator.run()
}

struct Aggregator<'a, 'r> {
    catalog: &'a Catalog,
    cache: &'a mut ArtifactCache<'r>,
    config: &'a GalleryConfig,
    media_root: &'a Path,
    shotwell_thumbs: &'a Path,
    parser: MetadataParser,
}

impl Aggregator<'_, '_> {
    fn run(&mut self) -> Result<ViewModel, CatalogError> {
        let mut view = ViewModel::default();
        self.fetch_media(&mut view)?;
        self.fetch_events(&mut view)?;
        self.fetch_tags(&mut view)?;
        self.build_years(&mut view);
        self.event_year_thumbnails(&mut view);
        self.year_thumbnails(&mut view);
        Ok(view)
    }

    // =====================================================================
    // Pass 1: media rows
    // =====================================================================

    fn fetch_media(&mut self, view: &mut ViewModel) -> Result<(), CatalogError> {
        let min_rating = self.config.library.min_rating;

        for row in self.catalog.photo_rows(min_rating)? {
            self.process_photo_row(view, &row);
        }
        if self.catalog.table_exists("BackingPhotoTable")? {
            for row in self.catalog.raw_photo_rows(min_rating)? {
                self.process_photo_row(view, &row);
            }
        }
        if self.catalog.table_exists("VideoTable")? {
            for row in self.catalog.video_rows(min_rating)? {
                self.process_video_row(view, &row);
            }
        }
        Ok(())
    }

    fn process_photo_row(&mut self, view: &mut ViewModel, row: &PhotoRow) {
        let config = self.config;
        let kind = if row.is_raw() {
            MediaKind::RawPhoto
        } else {
            MediaKind::Photo
        };
        let mut media = match Media::new(kind, row.id, row.event_id, row.rating) {
            Ok(media) => media,
            Err(err) => {
                warn!("skipping photo row: {err}");
                return;
            }
        };
        media.title = row.title.clone();
        media.comment = row.comment.clone();
        media.filesize = row.filesize.max(0) as u64;
        media.exposure_time = row.exposure_time;
        media.time_created = row.time_created;
        media.rotation = Rotation::from_orientation(row.orientation);
        media.width = u32::try_from(row.width).ok().filter(|w| *w > 0);
        media.height = u32::try_from(row.height).ok().filter(|h| *h > 0);

        // The link points at the RAW file when there is one; thumbnails
        // come from the developed image either way.
        let link_source = row.download_filename.as_deref().unwrap_or(&row.filename);
        media.filename = self.relative_media_path(link_source);
        let source_file = PathBuf::from(&row.filename);

        // Metadata sidecar doubles as the tag source for display metadata
        // and motion-photo detection.
        let metadata_rel = format!(
            "metadata/{}/{}.txt",
            dir_shard(&media.media_id),
            media.media_id
        );
        let dump_path = self.cache.abs(&metadata_rel);
        self.cache.ensure(&Op::MetadataDump {
            source: source_file.clone(),
            output: dump_path.clone(),
        });
        let raw_tags = metadata::read_sidecar_tags(&dump_path).unwrap_or_default();
        if dump_path.is_file() {
            media.metadata_path = Some(metadata_rel);
        }
        media.metadata = self.parser.parse(&raw_tags);
        let motion_offset = metadata::motion_photo_offset(&raw_tags);

        media.thumbnails = ThumbnailSet::sharded("media", &media.media_id, true);
        media.preview_source = self.shotwell_preview_path(&media.media_id);

        // Catalog edits are applied to the original before thumbnailing;
        // a re-applied transform makes the existing thumbnails stale.
        let mut transformed_rel = None;
        media.thumb_source = source_file.clone();
        if let Some(text) = &row.transformations
            && let Some((rel, path)) =
                self.apply_transformations(&media.media_id, &source_file, text, &media.thumbnails)
        {
            media.thumb_source = path;
            transformed_rel = Some(rel);
        }

        let overlay = if row.is_raw() {
            config.icons.raw.as_ref().map(PathBuf::from)
        } else if motion_offset.is_some() {
            config.icons.play.as_ref().map(PathBuf::from)
        } else if is_panorama(media.width, media.height) {
            config.icons.panorama.as_ref().map(PathBuf::from)
        } else {
            None
        };
        self.media_thumbnails(&media, overlay);

        if let Some(offset) = motion_offset {
            let shard = dir_shard(&media.media_id);
            let clip_rel = format!("motion/{shard}/{}.mp4", media.media_id);
            let clip_path = self.cache.abs(&clip_rel);
            self.cache.ensure(&Op::ExtractClip {
                source: source_file.clone(),
                output: clip_path.clone(),
                offset,
            });
            media.motion_clip = Some(clip_rel);
            media.animated_preview = Some(self.animated_previews(
                &media.media_id,
                &clip_path,
                config.video.preview_seconds,
            ));
        }

        media.artifacts_size = self.media_artifacts_size(&media, transformed_rel.as_deref());
        register_media(view, media);
    }

    fn process_video_row(&mut self, view: &mut ViewModel, row: &VideoRow) {
        let config = self.config;
        let mut media = match Media::new(MediaKind::Video, row.id, row.event_id, row.rating) {
            Ok(media) => media,
            Err(err) => {
                warn!("skipping video row: {err}");
                return;
            }
        };
        media.title = row.title.clone();
        media.comment = row.comment.clone();
        media.filesize = row.filesize.max(0) as u64;
        media.exposure_time = row.exposure_time;
        media.time_created = row.time_created;
        media.clip_duration = Some(row.clip_duration);
        media.filename = self.relative_media_path(&row.filename);

        let source = PathBuf::from(&row.filename);
        if source.is_file() {
            media.fps = metadata::probe_video_fps(&config.tools.ffprobe, &source);
        }

        // Videos have no usable frame on disk; Shotwell's own thumbnail
        // cache stands in as the image source.
        media.thumb_source = self.shotwell_preview_path(&media.media_id);
        media.preview_source = media.thumb_source.clone();
        media.thumbnails = ThumbnailSet::sharded("media", &media.media_id, true);

        let overlay = config.icons.play.as_ref().map(PathBuf::from);
        self.media_thumbnails(&media, overlay);

        media.animated_preview = Some(self.animated_previews(
            &media.media_id,
            &source,
            config.video.preview_seconds,
        ));

        let shard = dir_shard(&media.media_id);
        for &height in &config.video.transcode_heights {
            let rel = format!("video/{height}p/{shard}/{}.mp4", media.media_id);
            let output = self.cache.abs(&rel);
            self.cache.ensure(&Op::Transcode {
                source: source.clone(),
                output,
                height,
            });
            media.video_renders.insert(height, rel);
        }

        media.artifacts_size = self.media_artifacts_size(&media, None);
        register_media(view, media);
    }

    // =====================================================================
    // Pass 2: events
    // =====================================================================

    fn fetch_events(&mut self, view: &mut ViewModel) -> Result<(), CatalogError> {
        for row in self.catalog.event_rows()? {
            let event = view
                .events_by_id
                .entry(row.id)
                .or_insert_with(|| Event::new(row.id));
            event.title = row.name.clone();
            event.comment = row.comment.clone();
            event.primary_media_id = row.primary_source_id.clone();

            // Boost before any composite selection happens.
            if let Some(primary) = &row.primary_source_id
                && let Some(media) = view.media_by_id.get_mut(primary)
            {
                media.extra_rating = 1;
            }
        }

        let event_ids: Vec<i64> = view.events_by_id.keys().copied().collect();
        for id in event_ids {
            let (title, member_ids) = {
                let event = &view.events_by_id[&id];
                (event.display_title(), event.media.clone())
            };
            let thumbs = ThumbnailSet::sharded("event", &id.to_string(), false);
            let candidates: Vec<&Media> = member_ids
                .iter()
                .filter_map(|mid| view.media_by_id.get(mid))
                .collect();
            self.composite_classes(&title, &candidates, &thumbs);
            view.events_by_id.get_mut(&id).unwrap().thumbnails = thumbs;
        }

        for (event_id, date) in self.catalog.event_max_dates()? {
            if let Some(event) = view.events_by_id.get_mut(&event_id) {
                event.add_date(date);
            }
        }
        Ok(())
    }

    // =====================================================================
    // Pass 3: tags
    // =====================================================================

    fn fetch_tags(&mut self, view: &mut ViewModel) -> Result<(), CatalogError> {
        let mut tags_by_name: BTreeMap<String, i64> = BTreeMap::new();

        for row in self.catalog.tag_rows()? {
            if self.config.library.tags_to_skip.contains(&row.name) {
                continue;
            }

            let mut tag = Tag::new(row.id, &row.name);
            // Rows arrive in name order, so a parent is always linked
            // before any of its children shows up.
            if let Some(parent_name) = tag.parent_name()
                && let Some(&parent_id) = tags_by_name.get(parent_name)
            {
                tag.parent_id = Some(parent_id);
                if let Some(parent) = view.tags_by_id.get_mut(&parent_id) {
                    parent.child_ids.push(row.id);
                }
            }

            for member in row.member_ids() {
                let Some(media) = view.media_by_id.get_mut(member) else {
                    continue;
                };
                media.tags.insert(row.id);
                tag.media.push(media.media_id.clone());
                tag.stats.fold_media(media);

                let event_id = media.event_id;
                if let Some(event) = view.events_by_id.get_mut(&event_id) {
                    event.tags.insert(row.id);
                }
            }

            tag.thumbnails = ThumbnailSet::sharded("tag", &row.id.to_string(), false);
            let candidates: Vec<&Media> = tag
                .media
                .iter()
                .filter_map(|mid| view.media_by_id.get(mid))
                .collect();
            self.composite_classes(&tag.full_title, &candidates, &tag.thumbnails);

            tags_by_name.insert(row.name.clone(), row.id);
            view.tags_by_id.insert(row.id, tag);
        }
        Ok(())
    }

    // =====================================================================
    // Pass 4: years
    // =====================================================================

    fn build_years(&mut self, view: &mut ViewModel) {
        let event_ids: Vec<i64> = view.events_by_id.keys().copied().collect();
        let mut dated_events = 0u64;

        for id in &event_ids {
            let sorted = {
                let event = &view.events_by_id[id];
                let mut pairs: Vec<(i64, String)> = event
                    .media
                    .iter()
                    .map(|mid| {
                        let exposure = view
                            .media_by_id
                            .get(mid)
                            .map(|m| m.exposure_time)
                            .unwrap_or(0);
                        (exposure, mid.clone())
                    })
                    .collect();
                pairs.sort();
                pairs.into_iter().map(|(_, mid)| mid).collect::<Vec<_>>()
            };
            let per_year = {
                let mut per_year: BTreeMap<String, Stats> = BTreeMap::new();
                for mid in &sorted {
                    if let Some(media) = view.media_by_id.get(mid)
                        && let Some(year) = year_string(media.exposure_time)
                    {
                        per_year.entry(year).or_default().fold_media(media);
                    }
                }
                per_year
            };

            let event = view.events_by_id.get_mut(id).unwrap();
            event.media = sorted;
            if event.date.is_none() {
                warn!("ignoring event {} with no dated media", event.id);
                continue;
            }
            dated_events += 1;
            event.stats.num_events = 1;
            let event_tags: Vec<i64> = event.tags.iter().copied().collect();

            for (year, mut stats) in per_year {
                stats.num_events = 1;
                let block = view
                    .events_by_year
                    .entry(year.clone())
                    .or_insert_with(|| YearBlock::new(&year));
                block.event_ids.push(*id);
                block.stats.merge(&stats);
                block.tags.extend(event_tags.iter().copied());
                view.stats.merge(&stats);
                event.years.insert(year, EventYearBlock {
                    stats,
                    thumbnails: ThumbnailSet::default(),
                });
            }
        }

        // Multi-year events were merged once per spanned year above;
        // the event count is the distinct dated events.
        view.stats.num_events = dated_events;
    }

    /// A single-year event reuses its overall thumbnail for the year
    /// block; spanning events get one composite per year.
    fn event_year_thumbnails(&mut self, view: &mut ViewModel) {
        let event_ids: Vec<i64> = view.events_by_id.keys().copied().collect();
        for id in event_ids {
            let (title, years, overall) = {
                let event = &view.events_by_id[&id];
                (
                    event.display_title(),
                    event.years.keys().cloned().collect::<Vec<_>>(),
                    event.thumbnails.clone(),
                )
            };
            if years.is_empty() {
                continue;
            }
            if years.len() == 1 {
                let event = view.events_by_id.get_mut(&id).unwrap();
                event.years.get_mut(&years[0]).unwrap().thumbnails = overall;
                continue;
            }

            for year in years {
                let member_ids: Vec<String> = {
                    let event = &view.events_by_id[&id];
                    event
                        .media
                        .iter()
                        .filter(|mid| {
                            view.media_by_id
                                .get(*mid)
                                .and_then(|m| year_string(m.exposure_time))
                                .as_deref()
                                == Some(year.as_str())
                        })
                        .cloned()
                        .collect()
                };
                let thumbs = ThumbnailSet::sharded("event", &format!("{id}-{year}"), false);
                let candidates: Vec<&Media> = member_ids
                    .iter()
                    .filter_map(|mid| view.media_by_id.get(mid))
                    .collect();
                self.composite_classes(&format!("{title} ({year})"), &candidates, &thumbs);
                let event = view.events_by_id.get_mut(&id).unwrap();
                event.years.get_mut(&year).unwrap().thumbnails = thumbs;
            }
        }
    }

    // =====================================================================
    // Pass 5: year thumbnails
    // =====================================================================

    fn year_thumbnails(&mut self, view: &mut ViewModel) {
        let base = self.cache.abs("thumbnails/year");
        if let Err(err) = std::fs::create_dir_all(&base) {
            warn!("cannot create {}: {err}", base.display());
        }

        let years: Vec<String> = view.events_by_year.keys().cloned().collect();
        for year in years {
            let block = &view.events_by_year[&year];

            // Enough events: each contributes its representative image.
            // Otherwise all member media fill out the montage a bit more.
            let primaries: Vec<&Media> = block
                .event_ids
                .iter()
                .filter_map(|eid| view.events_by_id.get(eid))
                .filter_map(|event| event.primary_media_id.as_ref())
                .filter_map(|pid| view.media_by_id.get(pid))
                .collect();
            let candidates: Vec<&Media> = if primaries.len() >= MIN_PRIMARY_CANDIDATES {
                primaries
            } else {
                block
                    .event_ids
                    .iter()
                    .filter_map(|eid| view.events_by_id.get(eid))
                    .flat_map(|event| event.media.iter())
                    .filter_map(|mid| view.media_by_id.get(mid))
                    .collect()
            };

            let thumbs = ThumbnailSet::for_year(&year);
            self.composite_classes(&year, &candidates, &thumbs);
        }

        let dates: BTreeMap<i64, i64> = view
            .events_by_id
            .iter()
            .map(|(id, event)| (*id, event.date.unwrap_or(0)))
            .collect();
        for block in view.events_by_year.values_mut() {
            block
                .event_ids
                .sort_by_key(|id| (dates.get(id).copied().unwrap_or(0), *id));
        }
    }

    // =====================================================================
    // Artifact helpers
    // =====================================================================

    fn media_thumbnails(&mut self, media: &Media, overlay: Option<PathBuf>) {
        let config = self.config;
        for (class, size) in [
            ("small", config.thumbnails.small.as_str()),
            ("medium", config.thumbnails.medium.as_str()),
            ("large", config.thumbnails.large.as_str()),
        ] {
            let rel = media.thumbnails.class(class).unwrap();
            let output = self.cache.abs(rel);
            self.cache.ensure(&Op::Thumbnail {
                source: media.thumb_source.clone(),
                output,
                size: size.to_string(),
                rotation: media.rotation.degrees(),
                overlay: overlay.clone(),
            });
        }
        if let Some(rel) = media.thumbnails.regular.as_deref() {
            let output = self.cache.abs(rel);
            self.cache.ensure(&Op::Scaled {
                source: media.thumb_source.clone(),
                output,
                width: config.thumbnails.regular_width,
                rotation: media.rotation.degrees(),
            });
        }
    }

    fn composite_classes(&mut self, title: &str, candidates: &[&Media], thumbs: &ThumbnailSet) {
        let config = self.config;
        for (class, size) in [
            ("small", config.thumbnails.small.as_str()),
            ("medium", config.thumbnails.medium.as_str()),
            ("large", config.thumbnails.large.as_str()),
        ] {
            if let Some(rel) = thumbs.class(class) {
                let output = self.cache.abs(rel);
                self.cache
                    .composite_thumbnail(title, candidates, output, size);
            }
        }
    }

    fn animated_previews(&mut self, media_id: &str, source: &Path, seconds: u32) -> PreviewSet {
        let config = self.config;
        let shard = dir_shard(media_id);
        let mut set = PreviewSet::default();

        for (class, size) in [
            ("small", config.thumbnails.small.as_str()),
            ("medium", config.thumbnails.medium.as_str()),
            ("large", config.thumbnails.large.as_str()),
        ] {
            let (width, height) = parse_size(size).unwrap_or((360, 360));
            let rel = format!("previews/{class}/{shard}/{media_id}.gif");
            let output = self.cache.abs(&rel);
            self.cache.ensure(&Op::AnimatedPreview {
                source: source.to_path_buf(),
                output,
                width,
                height: Some(height),
                seconds,
            });
            match class {
                "small" => set.small = rel,
                "medium" => set.medium = rel,
                _ => set.large = rel,
            }
        }

        let rel = format!("previews/regular/{shard}/{media_id}.gif");
        let output = self.cache.abs(&rel);
        self.cache.ensure(&Op::AnimatedPreview {
            source: source.to_path_buf(),
            output,
            width: config.thumbnails.regular_width,
            height: None,
            seconds,
        });
        set.regular = rel;
        set
    }

    /// Apply the catalog's stored edits to the original image. Returns the
    /// transformed file when one applies; a regenerated transform also
    /// drops the item's thumbnails so they rebuild from the new pixels.
    fn apply_transformations(
        &mut self,
        media_id: &str,
        source: &Path,
        text: &str,
        thumbs: &ThumbnailSet,
    ) -> Option<(String, PathBuf)> {
        let map = parse_transformations(text);

        let straighten = map.get("straighten.angle").cloned();
        let crop = match (
            map.get("crop.left"),
            map.get("crop.top"),
            map.get("crop.right"),
            map.get("crop.bottom"),
        ) {
            (Some(left), Some(top), Some(right), Some(bottom)) => {
                match (
                    left.parse(),
                    top.parse(),
                    right.parse(),
                    bottom.parse(),
                ) {
                    (Ok(l), Ok(t), Ok(r), Ok(b)) => Some((l, t, r, b)),
                    _ => None,
                }
            }
            _ => None,
        };
        let levels = map
            .get("adjustments.expansion")
            .and_then(|value| parse_expansion(value));

        if straighten.is_none() && crop.is_none() && levels.is_none() {
            return None;
        }

        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("jpg");
        let rel = format!("transformed/{}/{media_id}.{ext}", dir_shard(media_id));
        let output = self.cache.abs(&rel);
        let outcome = self.cache.ensure(&Op::Transform {
            source: source.to_path_buf(),
            output: output.clone(),
            straighten,
            crop,
            levels,
        });

        match outcome {
            EnsureOutcome::Generated => {
                for class in ["small", "medium", "large", "regular"] {
                    if let Some(rel) = thumbs.class(class) {
                        self.cache.invalidate(rel);
                    }
                }
                Some((rel, output))
            }
            EnsureOutcome::UpToDate => Some((rel, output)),
            EnsureOutcome::Skipped => None,
        }
    }

    fn media_artifacts_size(&self, media: &Media, transformed_rel: Option<&str>) -> u64 {
        let mut rels: Vec<&str> = vec![
            &media.thumbnails.small,
            &media.thumbnails.medium,
            &media.thumbnails.large,
        ];
        rels.extend(media.thumbnails.regular.as_deref());
        rels.extend(media.metadata_path.as_deref());
        rels.extend(media.motion_clip.as_deref());
        if let Some(previews) = &media.animated_preview {
            rels.extend([
                previews.small.as_str(),
                previews.medium.as_str(),
                previews.large.as_str(),
                previews.regular.as_str(),
            ]);
        }
        rels.extend(media.video_renders.values().map(String::as_str));
        rels.extend(transformed_rel);
        self.cache.artifacts_size(&rels)
    }

    // =====================================================================
    // Path helpers
    // =====================================================================

    fn relative_media_path(&self, path: &str) -> String {
        Path::new(path)
            .strip_prefix(self.media_root)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| path.to_string())
    }

    /// Shotwell's own thumbnail cache keys by source id without an
    /// extension, so both variants are probed.
    fn shotwell_preview_path(&self, media_id: &str) -> PathBuf {
        let jpg = self.shotwell_thumbs.join(format!("{media_id}.jpg"));
        if jpg.exists() {
            jpg
        } else {
            self.shotwell_thumbs.join(format!("{media_id}.png"))
        }
    }
}

fn register_media(view: &mut ViewModel, media: Media) {
    let event = view
        .events_by_id
        .entry(media.event_id)
        .or_insert_with(|| Event::new(media.event_id));
    event.media.push(media.media_id.clone());
    event.stats.fold_media(&media);
    view.media_by_id.insert(media.media_id.clone(), media);
}

fn is_panorama(width: Option<u32>, height: Option<u32>) -> bool {
    match (width, height) {
        (Some(w), Some(h)) if h > 0 => w as f64 / h as f64 >= 2.0,
        _ => false,
    }
}

/// Parse Shotwell's `{ 0, 130 }` histogram expansion into level
/// percentages for the image tool.
fn parse_expansion(value: &str) -> Option<(f64, f64)> {
    let numbers: Vec<f64> = value
        .split(|c: char| !c.is_ascii_digit() && c != '.')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    if numbers.len() < 2 {
        return None;
    }
    Some((numbers[0] / 255.0 * 100.0, numbers[1] / 255.0 * 100.0))
}
