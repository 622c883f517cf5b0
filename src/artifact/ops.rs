//! Generation operations and their runners.
//!
//! Every derived file the pipeline produces is described by one [`Op`]
//! variant. An op knows two things: the exact external command that
//! realizes it, and its cache key. Both come from the same rendering, so
//! the descriptor the cache compares against can never drift out of sync
//! with the invocation — changing a flag, an icon, or a dimension changes
//! the key and invalidates the output.
//!
//! Two ops are not external commands at all: [`Op::ExtractClip`] is a
//! native tail-copy (motion-photo clips are literally the last N bytes of
//! the photo file), and [`Op::MetadataDump`] captures the tool's stdout
//! into the output file.
//!
//! The [`OpRunner`] trait separates describing work from doing it. The
//! production [`CommandRunner`] spawns processes; tests use a recording
//! mock; the `check` subcommand uses [`NoopRunner`].

use crate::config::ToolsConfig;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{command} exited with status {code:?}")]
    CommandFailed { command: String, code: Option<i32> },
    #[error("cannot run {command}: {source}")]
    CommandUnavailable {
        command: String,
        source: std::io::Error,
    },
    #[error("clip offset {offset} outside file of {filesize} bytes")]
    BadClipOffset { offset: u64, filesize: u64 },
}

/// The draw incantation that masks thumbnail corners round.
const ROUNDED_CORNER_DRAW: &str =
    "fill black polygon 0,0 0,15 15,0 fill white circle 15,15 15,0";

/// One derived-file generation operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Square thumbnail with rounded corners and an optional overlay badge.
    Thumbnail {
        source: PathBuf,
        output: PathBuf,
        /// ImageMagick geometry, e.g. `360x360`.
        size: String,
        /// Degrees, from the catalog orientation code.
        rotation: i32,
        overlay: Option<PathBuf>,
    },
    /// Aspect-preserving thumbnail at a fixed width.
    Scaled {
        source: PathBuf,
        output: PathBuf,
        width: u32,
        rotation: i32,
    },
    /// Composite montage built from several member previews.
    Montage {
        tiles: Vec<PathBuf>,
        /// Ordered member media ids — the montage's cache key.
        candidate_ids: Vec<String>,
        output: PathBuf,
        /// Columns x rows.
        tile: (u32, u32),
        /// Per-cell geometry in pixels.
        cell: (u32, u32),
    },
    /// Flat placeholder for a composite with no candidates.
    Placeholder { output: PathBuf, size: String },
    /// Crop/straighten/levels edits stored in the catalog, applied to the
    /// original image.
    Transform {
        source: PathBuf,
        output: PathBuf,
        straighten: Option<String>,
        /// left, top, right, bottom.
        crop: Option<(i64, i64, i64, i64)>,
        /// Black and white points as percentages.
        levels: Option<(f64, f64)>,
    },
    /// Copy the trailing `offset` bytes of `source` into a new container.
    ExtractClip {
        source: PathBuf,
        output: PathBuf,
        offset: u64,
    },
    /// Animated GIF preview of a clip.
    AnimatedPreview {
        source: PathBuf,
        output: PathBuf,
        width: u32,
        /// Cover-crop to `width x height` when set, else scale to width.
        height: Option<u32>,
        seconds: u32,
    },
    /// Multi-resolution video render at a fixed height.
    Transcode {
        source: PathBuf,
        output: PathBuf,
        height: u32,
    },
    /// exiv2 tag dump captured into the metadata sidecar.
    MetadataDump { source: PathBuf, output: PathBuf },
}

impl Op {
    pub fn output(&self) -> &Path {
        match self {
            Op::Thumbnail { output, .. }
            | Op::Scaled { output, .. }
            | Op::Montage { output, .. }
            | Op::Placeholder { output, .. }
            | Op::Transform { output, .. }
            | Op::ExtractClip { output, .. }
            | Op::AnimatedPreview { output, .. }
            | Op::Transcode { output, .. }
            | Op::MetadataDump { output, .. } => output,
        }
    }

    /// The single input file, for ops that have one.
    ///
    /// Montages and placeholders have no single source; a montage with a
    /// few missing tiles should still be attempted.
    pub fn source(&self) -> Option<&Path> {
        match self {
            Op::Thumbnail { source, .. }
            | Op::Scaled { source, .. }
            | Op::Transform { source, .. }
            | Op::ExtractClip { source, .. }
            | Op::AnimatedPreview { source, .. }
            | Op::Transcode { source, .. }
            | Op::MetadataDump { source, .. } => Some(source),
            Op::Montage { .. } | Op::Placeholder { .. } => None,
        }
    }

    /// Cache key: the rendered command line, except for montages where it
    /// is the ordered candidate id list (tile paths stay stable while the
    /// selection is what actually matters).
    pub fn cache_key(&self, tools: &ToolsConfig) -> String {
        match self {
            Op::Montage { candidate_ids, .. } => candidate_ids.join(","),
            _ => self.command(tools).join(" "),
        }
    }

    /// Render the operation as an argument vector.
    pub fn command(&self, tools: &ToolsConfig) -> Vec<String> {
        let path = |p: &Path| p.to_string_lossy().into_owned();
        match self {
            Op::Thumbnail {
                source,
                output,
                size,
                rotation,
                overlay,
            } => {
                let mut cmd = vec![
                    tools.magick.clone(),
                    path(source),
                    "-rotate".into(),
                    rotation.to_string(),
                    "-strip".into(),
                    "-thumbnail".into(),
                    format!("{size}^"),
                    "-gravity".into(),
                    "center".into(),
                    "-extent".into(),
                    size.clone(),
                ];
                if let Some(icon) = overlay {
                    cmd.extend([
                        path(icon),
                        "-gravity".into(),
                        "southeast".into(),
                        "-composite".into(),
                    ]);
                }
                // Rounded corners: build an alpha mask from the corner draw,
                // mirror it to all four corners, then copy it in.
                cmd.extend(
                    [
                        "(",
                        "+clone",
                        "-alpha",
                        "extract",
                        "-draw",
                        ROUNDED_CORNER_DRAW,
                        "(",
                        "+clone",
                        "-flip",
                        ")",
                        "-compose",
                        "Multiply",
                        "-composite",
                        "(",
                        "+clone",
                        "-flop",
                        ")",
                        "-compose",
                        "Multiply",
                        "-composite",
                        ")",
                        "-alpha",
                        "off",
                        "-compose",
                        "CopyOpacity",
                        "-composite",
                    ]
                    .map(String::from),
                );
                cmd.push(path(output));
                cmd
            }
            Op::Scaled {
                source,
                output,
                width,
                rotation,
            } => vec![
                tools.magick.clone(),
                path(source),
                "-rotate".into(),
                rotation.to_string(),
                "-strip".into(),
                "-thumbnail".into(),
                format!("{width}x"),
                path(output),
            ],
            Op::Montage {
                tiles,
                output,
                tile,
                cell,
                ..
            } => {
                let geometry = format!("{}x{}", cell.0, cell.1);
                let mut cmd = vec![tools.montage.clone()];
                for tile_path in tiles {
                    cmd.extend([
                        "(".into(),
                        path(tile_path),
                        "-thumbnail".into(),
                        format!("{geometry}^"),
                        "-gravity".into(),
                        "center".into(),
                        "-extent".into(),
                        geometry.clone(),
                        ")".into(),
                    ]);
                }
                cmd.extend([
                    "-geometry".into(),
                    format!("{geometry}+0+0"),
                    "-background".into(),
                    "white".into(),
                    "-tile".into(),
                    format!("{}x{}", tile.0, tile.1),
                    "-frame".into(),
                    super::montage::COMPOSITE_FRAME_SIZE.to_string(),
                    path(output),
                ]);
                cmd
            }
            Op::Placeholder { output, size } => vec![
                tools.magick.clone(),
                "-size".into(),
                size.clone(),
                "xc:lightgray".into(),
                path(output),
            ],
            Op::Transform {
                source,
                output,
                straighten,
                crop,
                levels,
            } => {
                let mut cmd = vec![tools.magick.clone(), path(source)];
                if let Some(angle) = straighten {
                    cmd.extend(["-distort".into(), "SRT".into(), angle.clone()]);
                }
                if let Some((left, top, right, bottom)) = crop {
                    cmd.extend([
                        "-crop".into(),
                        format!("{}x{}+{}+{}", right - left, bottom - top, left, top),
                    ]);
                }
                if let Some((black, white)) = levels {
                    cmd.extend(["-level".into(), format!("{black:.1}%,{white:.1}%")]);
                }
                cmd.push(path(output));
                cmd
            }
            Op::ExtractClip {
                source,
                output,
                offset,
            } => vec![
                "tail-extract".into(),
                path(source),
                offset.to_string(),
                path(output),
            ],
            Op::AnimatedPreview {
                source,
                output,
                width,
                height,
                seconds,
            } => {
                let filter = match height {
                    Some(h) => format!(
                        "fps=10,scale={width}:{h}:force_original_aspect_ratio=increase,\
                         crop={width}:{h}"
                    ),
                    None => format!("fps=10,scale={width}:-2"),
                };
                vec![
                    tools.ffmpeg.clone(),
                    "-y".into(),
                    "-v".into(),
                    "error".into(),
                    "-t".into(),
                    seconds.to_string(),
                    "-i".into(),
                    path(source),
                    "-vf".into(),
                    filter,
                    "-loop".into(),
                    "0".into(),
                    path(output),
                ]
            }
            Op::Transcode {
                source,
                output,
                height,
            } => vec![
                tools.ffmpeg.clone(),
                "-y".into(),
                "-v".into(),
                "error".into(),
                "-i".into(),
                path(source),
                "-vf".into(),
                format!("scale=-2:{height}"),
                "-c:v".into(),
                "libx264".into(),
                "-preset".into(),
                "veryfast".into(),
                "-crf".into(),
                "23".into(),
                "-c:a".into(),
                "aac".into(),
                "-movflags".into(),
                "+faststart".into(),
                path(output),
            ],
            Op::MetadataDump { source, output: _ } => vec![
                tools.exiv2.clone(),
                "-PEXkyct".into(),
                "pr".into(),
                path(source),
            ],
        }
    }
}

/// Executes generation operations.
pub trait OpRunner {
    fn run(&self, op: &Op) -> Result<(), ArtifactError>;
}

/// Production runner: spawns the external tool for each op.
pub struct CommandRunner {
    pub tools: ToolsConfig,
}

impl CommandRunner {
    pub fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }

    fn spawn(argv: &[String]) -> Result<std::process::Output, ArtifactError> {
        Command::new(&argv[0])
            .args(&argv[1..])
            .output()
            .map_err(|source| ArtifactError::CommandUnavailable {
                command: argv[0].clone(),
                source,
            })
    }
}

impl OpRunner for CommandRunner {
    fn run(&self, op: &Op) -> Result<(), ArtifactError> {
        match op {
            Op::ExtractClip {
                source,
                output,
                offset,
            } => extract_clip_tail(source, output, *offset),
            Op::MetadataDump { output, .. } => {
                let argv = op.command(&self.tools);
                let result = Self::spawn(&argv)?;
                if !result.status.success() {
                    return Err(ArtifactError::CommandFailed {
                        command: argv.join(" "),
                        code: result.status.code(),
                    });
                }
                fs::write(output, &result.stdout)?;
                Ok(())
            }
            _ => {
                let argv = op.command(&self.tools);
                let result = Self::spawn(&argv)?;
                if !result.status.success() {
                    return Err(ArtifactError::CommandFailed {
                        command: argv.join(" "),
                        code: result.status.code(),
                    });
                }
                Ok(())
            }
        }
    }
}

/// Runner that executes nothing, for dry runs (`check`).
pub struct NoopRunner;

impl OpRunner for NoopRunner {
    fn run(&self, _op: &Op) -> Result<(), ArtifactError> {
        Ok(())
    }
}

/// Copy the trailing `offset` bytes of `source` into `output`.
///
/// Motion photos append their clip to the still image; the offset comes
/// from the device's embedded metadata and counts from the end of file.
fn extract_clip_tail(source: &Path, output: &Path, offset: u64) -> Result<(), ArtifactError> {
    let filesize = fs::metadata(source)?.len();
    if offset == 0 || offset > filesize {
        return Err(ArtifactError::BadClipOffset { offset, filesize });
    }

    let mut input = fs::File::open(source)?;
    input.seek(SeekFrom::Start(filesize - offset))?;
    let mut clip = Vec::with_capacity(offset as usize);
    input.read_to_end(&mut clip)?;

    let mut out = fs::File::create(output)?;
    out.write_all(&clip)?;
    Ok(())
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Mock runner that records each op's cache key and creates the output
    /// file, so cache hit/miss behavior can be observed without tools.
    #[derive(Default)]
    pub struct RecordingRunner {
        pub executed: Mutex<Vec<String>>,
        pub tools: ToolsConfig,
    }

    impl RecordingRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn executed_keys(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }
    }

    impl OpRunner for RecordingRunner {
        fn run(&self, op: &Op) -> Result<(), ArtifactError> {
            self.executed
                .lock()
                .unwrap()
                .push(op.cache_key(&self.tools));
            fs::write(op.output(), b"artifact")?;
            Ok(())
        }
    }

    fn tools() -> ToolsConfig {
        ToolsConfig::default()
    }

    // =========================================================================
    // Command rendering
    // =========================================================================

    #[test]
    fn thumbnail_command_shape() {
        let op = Op::Thumbnail {
            source: "/pics/a.jpg".into(),
            output: "/out/a.png".into(),
            size: "360x360".to_string(),
            rotation: 90,
            overlay: None,
        };
        let cmd = op.command(&tools());

        assert_eq!(cmd[0], "convert");
        assert_eq!(cmd[1], "/pics/a.jpg");
        assert!(cmd.contains(&"-rotate".to_string()));
        assert!(cmd.contains(&"90".to_string()));
        assert!(cmd.contains(&"360x360^".to_string()));
        assert_eq!(cmd.last().unwrap(), "/out/a.png");
    }

    #[test]
    fn thumbnail_overlay_inserted_before_corner_mask() {
        let op = Op::Thumbnail {
            source: "/pics/a.jpg".into(),
            output: "/out/a.png".into(),
            size: "360x360".to_string(),
            rotation: 0,
            overlay: Some("/icons/play.png".into()),
        };
        let cmd = op.command(&tools());

        let icon_pos = cmd.iter().position(|a| a == "/icons/play.png").unwrap();
        let mask_pos = cmd.iter().position(|a| a == "(").unwrap();
        assert!(icon_pos < mask_pos);
        assert!(cmd.contains(&"southeast".to_string()));
    }

    #[test]
    fn montage_command_uses_cell_geometry() {
        let op = Op::Montage {
            tiles: vec!["/t/a.jpg".into(), "/t/b.jpg".into()],
            candidate_ids: vec!["thumb1".into(), "thumb2".into()],
            output: "/out/m.png".into(),
            tile: (2, 1),
            cell: (172, 172),
        };
        let cmd = op.command(&tools());

        assert_eq!(cmd[0], "montage");
        assert!(cmd.contains(&"172x172^".to_string()));
        assert!(cmd.contains(&"172x172+0+0".to_string()));
        assert!(cmd.contains(&"2x1".to_string()));
        assert!(cmd.contains(&"-frame".to_string()));
    }

    #[test]
    fn transform_command_composes_edits() {
        let op = Op::Transform {
            source: "/pics/a.jpg".into(),
            output: "/out/a.jpg".into(),
            straighten: Some("1.5".to_string()),
            crop: Some((10, 20, 910, 620)),
            levels: Some((0.0, 51.0)),
        };
        let cmd = op.command(&tools());

        assert!(cmd.contains(&"SRT".to_string()));
        assert!(cmd.contains(&"900x600+10+20".to_string()));
        assert!(cmd.contains(&"0.0%,51.0%".to_string()));
    }

    #[test]
    fn transcode_command_scales_to_height() {
        let op = Op::Transcode {
            source: "/vids/a.mp4".into(),
            output: "/out/a-480.mp4".into(),
            height: 480,
        };
        let cmd = op.command(&tools());
        assert_eq!(cmd[0], "ffmpeg");
        assert!(cmd.contains(&"scale=-2:480".to_string()));
    }

    #[test]
    fn animated_preview_cover_vs_width() {
        let cover = Op::AnimatedPreview {
            source: "/v.mp4".into(),
            output: "/o.gif".into(),
            width: 180,
            height: Some(180),
            seconds: 8,
        };
        assert!(
            cover
                .command(&tools())
                .iter()
                .any(|a| a.contains("crop=180:180"))
        );

        let fit = Op::AnimatedPreview {
            source: "/v.mp4".into(),
            output: "/o.gif".into(),
            width: 512,
            height: None,
            seconds: 8,
        };
        assert!(
            fit.command(&tools())
                .iter()
                .any(|a| a.contains("scale=512:-2"))
        );
    }

    // =========================================================================
    // Cache keys
    // =========================================================================

    #[test]
    fn cache_key_changes_with_parameters() {
        let thumbnail = |rotation: i32, overlay: Option<PathBuf>| Op::Thumbnail {
            source: "/pics/a.jpg".into(),
            output: "/out/a.png".into(),
            size: "360x360".to_string(),
            rotation,
            overlay,
        };
        let base = thumbnail(0, None);
        let rotated = thumbnail(90, None);
        let badged = thumbnail(0, Some("/icons/raw.png".into()));

        let t = tools();
        assert_ne!(base.cache_key(&t), rotated.cache_key(&t));
        assert_ne!(base.cache_key(&t), badged.cache_key(&t));
        assert_eq!(base.cache_key(&t), thumbnail(0, None).cache_key(&t));
    }

    #[test]
    fn montage_cache_key_is_candidate_list() {
        let op = Op::Montage {
            tiles: vec!["/t/a.jpg".into()],
            candidate_ids: vec!["thumb1".into(), "video-2".into()],
            output: "/out/m.png".into(),
            tile: (2, 1),
            cell: (100, 100),
        };
        assert_eq!(op.cache_key(&tools()), "thumb1,video-2");
    }

    // =========================================================================
    // Native tail extraction
    // =========================================================================

    #[test]
    fn extract_clip_copies_tail_bytes() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("motion.jpg");
        let output = tmp.path().join("clip.mp4");
        fs::write(&source, b"JPEGDATA-THEN-VIDEO").unwrap();

        extract_clip_tail(&source, &output, 10).unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"THEN-VIDEO");
    }

    #[test]
    fn extract_clip_rejects_bad_offsets() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("motion.jpg");
        fs::write(&source, b"short").unwrap();

        let result = extract_clip_tail(&source, &tmp.path().join("c.mp4"), 100);
        assert!(matches!(
            result,
            Err(ArtifactError::BadClipOffset {
                offset: 100,
                filesize: 5
            })
        ));
    }

    #[test]
    fn command_runner_reports_missing_tool() {
        let runner = CommandRunner::new(ToolsConfig {
            magick: "definitely-not-imagemagick".to_string(),
            ..ToolsConfig::default()
        });
        let op = Op::Placeholder {
            output: "/tmp/unused.png".into(),
            size: "10x10".to_string(),
        };
        assert!(matches!(
            runner.run(&op),
            Err(ArtifactError::CommandUnavailable { .. })
        ));
    }
}
