//! pagemill: batch CLI for scanned-page post-processing.
//!
//! Feeds a set of scans (or an existing project file) through the six
//! processing stages and writes cleaned pages into an output
//! directory. Per-stage override flags apply uniformly to every page
//! before the run, the way a project-wide default would.
//!
//! # Usage
//!
//! ```text
//! pagemill --output-dir out scans/*.png
//! pagemill --project book.pagemill --dpi 300 --color-mode bw
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use pagemill_pipeline::executor::{AggregateProgress, PageResult, ProgressListener};
use pagemill_pipeline::pages::{ImageFileInfo, PageView};
use pagemill_pipeline::project::{self, Project};
use pagemill_pipeline::settings::Relinker;
use pagemill_pipeline::stages::orientation::Rotation;
use pagemill_pipeline::stages::select_content::{self, ContentBox};
use pagemill_pipeline::stages::{deskew, output, page_layout, split};
use pagemill_pipeline::{
    ImageId, LayoutDirection, PageCatalog, PageId, PageSequence, StageIndex,
    StageSequence, run_batch,
};

/// Batch post-processing for scanned book and document pages.
///
/// Pages run through orientation, splitting, deskew, content
/// selection, layout and output in order. Every page is attempted even
/// if some fail; the exit code reports whether all of them succeeded.
#[derive(Parser)]
#[command(name = "pagemill", version)]
struct Cli {
    /// Source images (PNG, JPEG, BMP, TIFF). Ignored with --project.
    images: Vec<PathBuf>,

    /// Existing project file to process instead of raw images.
    #[arg(long, conflicts_with = "images")]
    project: Option<PathBuf>,

    /// Directory rendered pages are written into.
    ///
    /// Required without --project; with --project it overrides the
    /// directory stored in the file.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Reading order of two-page spreads.
    #[arg(long, value_enum, default_value_t = Direction::LeftToRight)]
    layout_direction: Direction,

    /// Last stage to run; earlier stages still run before it.
    #[arg(long, value_enum, default_value_t = Stage::Output)]
    last_stage: Stage,

    /// Rewrite a source path before processing (repeatable).
    #[arg(long = "relink", value_name = "OLD=NEW", value_parser = parse_relink)]
    relinks: Vec<(PathBuf, PathBuf)>,

    /// Save the resulting project (including everything computed
    /// during the run) to this file.
    #[arg(long)]
    save_project: Option<PathBuf>,

    /// Fixed page rotation in degrees (0, 90, 180, 270), applied to
    /// every page.
    #[arg(long, value_parser = parse_rotation)]
    rotation: Option<Rotation>,

    /// Force the split layout instead of auto-detecting it.
    #[arg(long, value_enum)]
    split_layout: Option<SplitLayout>,

    /// Fixed deskew angle in degrees; disables automatic estimation.
    #[arg(long)]
    deskew_angle: Option<f64>,

    /// Fixed content box as X,Y,WIDTH,HEIGHT in page pixels; disables
    /// automatic content detection.
    #[arg(long, value_name = "X,Y,W,H", value_parser = parse_content_box)]
    content_box: Option<ContentBox>,

    /// Uniform page margins in millimetres.
    #[arg(long)]
    margins: Option<f64>,

    /// Horizontal content alignment inside the page.
    #[arg(long, value_enum)]
    align_horizontal: Option<AlignH>,

    /// Vertical content alignment inside the page.
    #[arg(long, value_enum)]
    align_vertical: Option<AlignV>,

    /// Output resolution in dots per inch.
    #[arg(long)]
    dpi: Option<u32>,

    /// Output colour mode.
    #[arg(long, value_enum)]
    color_mode: Option<Color>,

    /// Binarization threshold bias; positive darkens.
    #[arg(long)]
    threshold: Option<i32>,

    /// Speck removal level in black-and-white mode.
    #[arg(long, value_enum)]
    despeckle: Option<Despeckle>,

    /// Distortion correction mode.
    #[arg(long, value_enum)]
    dewarping: Option<DewarpMode>,

    /// Perceived depth used by dewarping, in the 1.0..=3.0 range.
    #[arg(long)]
    depth_perception: Option<f64>,

    /// Let content margins keep the source colouring instead of
    /// forcing them white.
    #[arg(long)]
    no_white_margins: bool,

    /// Flatten uneven lighting before binarization.
    #[arg(long)]
    normalize_illumination: bool,

    /// Suppress per-page progress lines.
    #[arg(long, short)]
    quiet: bool,
}

/// Reading order selection.
#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    /// Left page first.
    LeftToRight,
    /// Right page first.
    RightToLeft,
}

/// Pipeline truncation point selection.
#[derive(Clone, Copy, ValueEnum)]
enum Stage {
    /// Orthogonal rotation only.
    Orientation,
    /// Through page splitting.
    Split,
    /// Through skew correction.
    Deskew,
    /// Through content selection.
    SelectContent,
    /// Through margin layout.
    PageLayout,
    /// The full pipeline, writing output files.
    Output,
}

impl From<Stage> for StageIndex {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Orientation => Self::Orientation,
            Stage::Split => Self::Split,
            Stage::Deskew => Self::Deskew,
            Stage::SelectContent => Self::SelectContent,
            Stage::PageLayout => Self::PageLayout,
            Stage::Output => Self::Output,
        }
    }
}

/// Split layout override selection.
#[derive(Clone, Copy, ValueEnum)]
enum SplitLayout {
    /// One logical page per scan.
    Single,
    /// Two-page spread per scan.
    Two,
}

/// Colour mode selection.
#[derive(Clone, Copy, ValueEnum)]
enum Color {
    /// Keep source colours.
    Color,
    /// Eight-bit grayscale.
    Grayscale,
    /// One-bit black and white.
    Bw,
}

/// Horizontal alignment selection.
#[derive(Clone, Copy, ValueEnum)]
enum AlignH {
    /// Pin content to the left edge.
    Left,
    /// Centre content horizontally.
    Center,
    /// Pin content to the right edge.
    Right,
}

/// Vertical alignment selection.
#[derive(Clone, Copy, ValueEnum)]
enum AlignV {
    /// Pin content to the top edge.
    Top,
    /// Centre content vertically.
    Center,
    /// Pin content to the bottom edge.
    Bottom,
}

/// Despeckle level selection.
#[derive(Clone, Copy, ValueEnum)]
enum Despeckle {
    /// No speck removal.
    Off,
    /// Remove single-pixel specks only.
    Cautious,
    /// Remove small speck clusters.
    Normal,
    /// Remove larger clusters; may eat fine detail.
    Aggressive,
}

/// Dewarping mode selection.
#[derive(Clone, Copy, ValueEnum)]
enum DewarpMode {
    /// No distortion correction.
    Off,
    /// Build a distortion model automatically.
    Auto,
}

fn parse_rotation(s: &str) -> Result<Rotation, String> {
    match s {
        "0" => Ok(Rotation::R0),
        "90" => Ok(Rotation::R90),
        "180" => Ok(Rotation::R180),
        "270" => Ok(Rotation::R270),
        other => Err(format!("invalid rotation {other:?}: expected 0, 90, 180 or 270")),
    }
}

fn parse_content_box(s: &str) -> Result<ContentBox, String> {
    let Some([x, y, w, h]) = split_four(s) else {
        return Err(format!("invalid content box {s:?}: expected X,Y,W,H"));
    };
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid content box component {v:?}: {e}"))
    };
    Ok(ContentBox {
        x: parse(x)?,
        y: parse(y)?,
        width: parse(w)?,
        height: parse(h)?,
    })
}

fn split_four(s: &str) -> Option<[&str; 4]> {
    let mut it = s.split(',');
    let parts = [it.next()?, it.next()?, it.next()?, it.next()?];
    it.next().is_none().then_some(parts)
}

fn parse_relink(s: &str) -> Result<(PathBuf, PathBuf), String> {
    s.split_once('=')
        .map(|(old, new)| (PathBuf::from(old), PathBuf::from(new)))
        .ok_or_else(|| format!("invalid relink rule {s:?}: expected OLD=NEW"))
}

/// Progress printer for long batches.
struct ConsoleProgress {
    quiet: bool,
}

impl ProgressListener for ConsoleProgress {
    fn page_started(&mut self, index: usize, total: usize, page: &PageId) {
        if !self.quiet {
            eprintln!("[{:>3}/{total}] {page}", index + 1);
        }
    }

    fn page_finished(&mut self, _index: usize, _total: usize, result: &PageResult) {
        match &result.status {
            pagemill_pipeline::PageStatus::Success => {}
            pagemill_pipeline::PageStatus::Failure(reason) => {
                eprintln!("  failed: {reason}");
            }
        }
    }

    fn progress(&mut self, progress: AggregateProgress) {
        if self.quiet {
            return;
        }
        let pct = (progress.fraction * 100.0).round();
        match progress.estimated_remaining {
            Some(eta) => eprintln!(
                "  {pct:>3}%  elapsed {:.1}s  remaining ~{:.1}s",
                progress.elapsed.as_secs_f64(),
                eta.as_secs_f64(),
            ),
            None => eprintln!("  {pct:>3}%  elapsed {:.1}s", progress.elapsed.as_secs_f64()),
        }
    }
}

/// Build a project from raw image paths, reading only the headers.
fn project_from_images(cli: &Cli) -> Result<Project, String> {
    if cli.images.is_empty() {
        return Err("no input images (or use --project)".to_owned());
    }
    let output_dir = cli
        .output_dir
        .clone()
        .ok_or_else(|| "--output-dir is required without --project".to_owned())?;

    let mut infos = Vec::with_capacity(cli.images.len());
    for path in &cli.images {
        let (width, height) = image::image_dimensions(path)
            .map_err(|e| format!("unable to read {}: {e}", path.display()))?;
        infos.push(ImageFileInfo {
            id: ImageId::new(path.clone()),
            width,
            height,
        });
    }

    let direction = match cli.layout_direction {
        Direction::LeftToRight => LayoutDirection::LeftToRight,
        Direction::RightToLeft => LayoutDirection::RightToLeft,
    };
    let catalog = PageCatalog::from_images(infos, direction);

    let mut naming = pagemill_pipeline::naming::OutputFileNameGenerator::default();
    for record in catalog.sources() {
        naming.register(record.image());
    }

    Ok(Project {
        catalog,
        stages: StageSequence::new(),
        naming,
        output_dir,
    })
}

fn load_project(cli: &Cli) -> Result<Project, String> {
    let Some(ref path) = cli.project else {
        return project_from_images(cli);
    };

    let mut relinker = Relinker::new();
    for (old, new) in &cli.relinks {
        relinker.add_rule(old.clone(), new.clone());
    }
    let mut loaded = project::read_with_relinker(path, &relinker)
        .map_err(|e| format!("{}: {e}", path.display()))?;
    if let Some(ref dir) = cli.output_dir {
        loaded.output_dir.clone_from(dir);
    }
    Ok(loaded)
}

/// Apply the per-stage override flags to every page before the run,
/// clearing any recorded dependency snapshots the override invalidates.
fn apply_overrides(cli: &Cli, stages: &mut StageSequence, pages: &PageSequence) {
    for info in pages {
        let page = info.id();

        if let Some(rotation) = cli.rotation {
            stages
                .orientation
                .settings
                .update(page, |p| p.rotation = rotation);
        }
        if let Some(layout) = cli.split_layout {
            stages.split.settings.update(page, |p| {
                p.layout = match layout {
                    SplitLayout::Single => split::LayoutKind::SinglePage,
                    SplitLayout::Two => split::LayoutKind::TwoPages,
                };
                p.resolved = None;
                p.deps = None;
            });
        }
        if let Some(angle) = cli.deskew_angle {
            stages.deskew.settings.update(page, |p| {
                p.mode = deskew::Mode::Manual;
                p.angle_deg = angle;
                p.deps = None;
            });
        }
        if let Some(content_box) = cli.content_box {
            stages.select_content.settings.update(page, |p| {
                p.mode = select_content::Mode::Manual;
                p.content_box = Some(content_box);
                p.deps = None;
            });
        }
        if cli.margins.is_some() || cli.align_horizontal.is_some() || cli.align_vertical.is_some() {
            stages.page_layout.settings.update(page, |p| {
                if let Some(mm) = cli.margins {
                    p.margins = page_layout::Margins::uniform(mm);
                }
                if let Some(h) = cli.align_horizontal {
                    p.alignment.horizontal = match h {
                        AlignH::Left => page_layout::HorizontalAlignment::Left,
                        AlignH::Center => page_layout::HorizontalAlignment::Center,
                        AlignH::Right => page_layout::HorizontalAlignment::Right,
                    };
                }
                if let Some(v) = cli.align_vertical {
                    p.alignment.vertical = match v {
                        AlignV::Top => page_layout::VerticalAlignment::Top,
                        AlignV::Center => page_layout::VerticalAlignment::Center,
                        AlignV::Bottom => page_layout::VerticalAlignment::Bottom,
                    };
                }
                p.deps = None;
            });
        }

        let output_touched = cli.dpi.is_some()
            || cli.color_mode.is_some()
            || cli.threshold.is_some()
            || cli.despeckle.is_some()
            || cli.dewarping.is_some()
            || cli.depth_perception.is_some()
            || cli.no_white_margins
            || cli.normalize_illumination;
        if output_touched {
            stages.output.settings.update(page, |p| {
                if let Some(dpi) = cli.dpi {
                    p.dpi = dpi;
                }
                if let Some(mode) = cli.color_mode {
                    p.color_mode = match mode {
                        Color::Color => output::ColorMode::Color,
                        Color::Grayscale => output::ColorMode::Grayscale,
                        Color::Bw => output::ColorMode::BlackAndWhite,
                    };
                }
                if let Some(threshold) = cli.threshold {
                    p.threshold_adjustment = threshold;
                }
                if let Some(level) = cli.despeckle {
                    p.despeckle = match level {
                        Despeckle::Off => output::DespeckleLevel::Off,
                        Despeckle::Cautious => output::DespeckleLevel::Cautious,
                        Despeckle::Normal => output::DespeckleLevel::Normal,
                        Despeckle::Aggressive => output::DespeckleLevel::Aggressive,
                    };
                }
                if let Some(mode) = cli.dewarping {
                    p.dewarping = match mode {
                        DewarpMode::Off => output::Dewarping::Off,
                        DewarpMode::Auto => output::Dewarping::Auto,
                    };
                }
                if let Some(depth) = cli.depth_perception {
                    p.depth_perception = depth.clamp(1.0, 3.0);
                }
                if cli.no_white_margins {
                    p.white_margins = false;
                }
                if cli.normalize_illumination {
                    p.normalize_illumination = true;
                }
                p.deps = None;
            });
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut loaded = match load_project(&cli) {
        Ok(p) => p,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let pages = loaded.catalog.to_page_sequence(PageView::Pages);
    apply_overrides(&cli, &mut loaded.stages, &pages);

    if !cli.quiet {
        eprintln!(
            "{} source image(s), {} page(s), output to {}",
            loaded.catalog.num_images(),
            pages.num_pages(),
            loaded.output_dir.display(),
        );
    }

    let catalog = loaded.catalog.clone();
    let mut ctx = loaded.into_context();
    let mut listener = ConsoleProgress { quiet: cli.quiet };
    let summary = run_batch(&mut ctx, &pages, cli.last_stage.into(), &mut listener);

    if let Some(ref path) = cli.save_project {
        let (stages, naming, output_dir) = ctx.into_parts();
        let saved = Project {
            catalog,
            stages,
            naming,
            output_dir,
        };
        if let Err(e) = project::write(&saved, path) {
            eprintln!("unable to save project to {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
        if !cli.quiet {
            eprintln!("project saved to {}", path.display());
        }
    }

    let failed = summary.failed();
    if summary.all_succeeded() {
        if !cli.quiet {
            eprintln!("done: {} page(s) processed", summary.succeeded());
        }
        ExitCode::SUCCESS
    } else {
        eprintln!(
            "done with errors: {} succeeded, {failed} failed, {} skipped",
            summary.succeeded(),
            summary.skipped,
        );
        ExitCode::FAILURE
    }
}
