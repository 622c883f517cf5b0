use clap::{Parser, Subcommand};
use shotwell_gal::artifact::{ArtifactCache, CommandRunner, NoopRunner};
use shotwell_gal::{aggregate, catalog, config, export, reclaim};
use std::path::PathBuf;

/// Directories under the output root owned by the artifact cache.
///
/// The reclaimer walks exactly these; anything else in the output root
/// (the exports, user files) is never touched.
const MANAGED_DIRS: &[&str] = &[
    "thumbnails",
    "transformed",
    "motion",
    "previews",
    "video",
    "metadata",
];

#[derive(clap::Args)]
struct LibraryArgs {
    /// Path to the Shotwell photo.db
    #[arg(long)]
    database: PathBuf,

    /// Optional gallery.toml
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(clap::Args)]
struct BuildArgs {
    #[command(flatten)]
    library: LibraryArgs,

    /// Root directory of the original media files
    #[arg(long)]
    media_path: PathBuf,

    /// Shotwell's own thumbnail cache directory
    #[arg(long)]
    shotwell_thumbs: PathBuf,

    /// Output directory for artifacts and exports
    #[arg(long, default_value = "gallery")]
    output: PathBuf,

    /// Delete stale artifacts instead of only reporting them
    #[arg(long)]
    delete_stale: bool,
}

#[derive(Parser)]
#[command(name = "shotwell-gal")]
#[command(about = "Static site and data exporter for Shotwell libraries")]
#[command(long_about = "\
Static site and data exporter for Shotwell libraries

Reads your Shotwell database and produces a browsable artifact tree
(thumbnails, composite montages, motion-photo previews, video renders)
plus machine-readable exports:

  gallery/
  ├── media.json                   # Whole library, tab-indented
  ├── media.js                     # Same payload for file:// pages
  ├── media.csv                    # One row per media item
  ├── media.geojson                # One Point feature per located item
  ├── thumbnails/                  # media/event/tag/year, sharded
  ├── previews/                    # Animated GIF previews
  ├── motion/                      # Extracted motion-photo clips
  ├── video/                       # Multi-resolution renders
  ├── transformed/                 # Originals with catalog edits applied
  └── metadata/                    # exiv2 sidecar dumps

Artifact generation is incremental: unchanged items are never
regenerated, and --delete-stale reclaims files whose media left the
library. Requires ImageMagick, ffmpeg, and exiv2 on $PATH (configurable
via gallery.toml).

Shotwell itself is never written to; the database is opened read-only.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export the library: artifacts, exports, reclamation
    Build(BuildArgs),
    /// Read the catalog and print library stats without generating anything
    Check(LibraryArgs),
    /// Print a stock gallery.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Build(args) => build(args)?,
        Command::Check(args) => check(args)?,
        Command::GenConfig => print!("{}", config::stock_config_toml()),
    }
    Ok(())
}

fn build(args: BuildArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config(args.library.config.as_deref())?;
    let catalog = catalog::Catalog::open(&args.library.database)?;

    std::fs::create_dir_all(&args.output)?;
    let runner = CommandRunner::new(config.tools.clone());
    let mut cache = ArtifactCache::new(&args.output, config.tools.clone(), &runner);

    let view = aggregate::build_view(
        &catalog,
        &mut cache,
        &config,
        &args.media_path,
        &args.shotwell_thumbs,
    )?;
    println!("Cache: {}", cache.stats());

    export::write_exports(&view, &config, &args.output)?;

    let managed: Vec<PathBuf> = MANAGED_DIRS.iter().map(|d| args.output.join(d)).collect();
    let summary = reclaim::reclaim(&managed, cache.kept(), args.delete_stale);
    println!("Reclaim: {summary}");

    print_stats(&view);
    println!("Export complete: {}", args.output.display());
    Ok(())
}

fn check(args: LibraryArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config(args.config.as_deref())?;
    let catalog = catalog::Catalog::open(&args.database)?;

    // Aggregate against a throwaway destination with a runner that
    // executes nothing, so the catalog is fully validated without
    // touching any real output.
    let scratch = tempfile_dir()?;
    let runner = NoopRunner;
    let mut cache = ArtifactCache::new(&scratch, config.tools.clone(), &runner);
    let view = aggregate::build_view(
        &catalog,
        &mut cache,
        &config,
        std::path::Path::new("/"),
        std::path::Path::new("/"),
    )?;

    print_stats(&view);
    let _ = std::fs::remove_dir_all(&scratch);
    println!("Catalog is readable");
    Ok(())
}

fn print_stats(view: &shotwell_gal::model::ViewModel) {
    let stats = &view.stats;
    println!(
        "Library: {} photos, {} videos, {} events, {} tags, {} years",
        stats.num_photos,
        stats.num_videos,
        stats.num_events,
        view.tags_by_id.len(),
        view.events_by_year.len()
    );
}

/// A unique scratch directory under the system temp dir.
fn tempfile_dir() -> std::io::Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("shotwell-gal-check-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
