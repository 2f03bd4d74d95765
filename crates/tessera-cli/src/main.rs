//! tessera: approximate an image with translucent shapes from the
//! command line.
//!
//! Decodes the input, runs the optimizer with one progress line per
//! step on stderr, and writes whichever outputs were asked for.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin tessera -- [OPTIONS] <IMAGE>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Parser, ValueEnum};
use tessera_approx::{Approximation, BackgroundFill, OptimizerConfig, Rgb, RunSummary, ShapeKind, StepReport};
use tracing_subscriber::EnvFilter;

/// Approximate an image with translucent geometric primitives.
#[derive(Parser, Debug)]
#[command(name = "tessera", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image: PathBuf,

    /// Longest side of the raster the search works on.
    #[arg(long, default_value_t = OptimizerConfig::DEFAULT_COMPUTE_RESOLUTION, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    compute_resolution: u32,

    /// Longest side of rendered output.
    #[arg(long, default_value_t = OptimizerConfig::DEFAULT_VIEW_RESOLUTION, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    view_resolution: u32,

    /// Number of shape placements to attempt.
    #[arg(long, default_value_t = OptimizerConfig::DEFAULT_TOTAL_STEPS, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    steps: u32,

    /// Random shapes scored per step.
    #[arg(long, default_value_t = OptimizerConfig::DEFAULT_TRIALS_PER_STEP, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    trials: u32,

    /// Starting opacity of every shape, in (0, 1].
    #[arg(long, default_value_t = OptimizerConfig::DEFAULT_BASE_ALPHA)]
    alpha: f32,

    /// Let refinement perturb opacity too.
    #[arg(long)]
    mutate_alpha: bool,

    /// Consecutive failed mutations before refinement gives up.
    #[arg(long, default_value_t = OptimizerConfig::DEFAULT_MAX_FAILED_MUTATIONS)]
    max_failed_mutations: u32,

    /// Shape variants to draw from, comma separated.
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = [Shape::Triangle, Shape::Rectangle, Shape::Polygon, Shape::Ellipse])]
    shapes: Vec<Shape>,

    /// Background: `auto` or a `#rrggbb` colour.
    #[arg(long, default_value = "auto", value_parser = parse_fill)]
    fill: BackgroundFill,

    /// Seed for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    /// Full optimizer config as a JSON string.
    ///
    /// When provided, all other optimizer flags are ignored.
    #[arg(long)]
    config_json: Option<String>,

    /// Write an SVG document.
    #[arg(long)]
    svg: Option<PathBuf>,

    /// Write a PNG rendered at the view resolution.
    #[arg(long)]
    png: Option<PathBuf>,

    /// Write the run summary and steps as JSON.
    #[arg(long)]
    json: Option<PathBuf>,

    /// More logging (-v debug, -vv trace). `RUST_LOG` wins.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// Shape variant selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Shape {
    Triangle,
    Rectangle,
    Polygon,
    Ellipse,
    Glyph,
}

impl From<Shape> for ShapeKind {
    fn from(shape: Shape) -> Self {
        match shape {
            Shape::Triangle => Self::Triangle,
            Shape::Rectangle => Self::Rectangle,
            Shape::Polygon => Self::Polygon,
            Shape::Ellipse => Self::Ellipse,
            Shape::Glyph => Self::Glyph,
        }
    }
}

fn parse_fill(s: &str) -> Result<BackgroundFill, String> {
    if s.eq_ignore_ascii_case("auto") {
        return Ok(BackgroundFill::Auto);
    }
    Rgb::from_hex(s).map(BackgroundFill::Fixed).map_err(|e| e.to_string())
}

/// Build an [`OptimizerConfig`] from CLI arguments.
///
/// `--config-json` replaces every individual optimizer flag.
fn config_from_cli(cli: &Cli) -> Result<OptimizerConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        OptimizerConfig {
            compute_resolution: cli.compute_resolution,
            view_resolution: cli.view_resolution,
            total_steps: cli.steps,
            trials_per_step: cli.trials,
            base_alpha: cli.alpha,
            mutate_alpha_enabled: cli.mutate_alpha,
            max_failed_mutations_per_step: cli.max_failed_mutations,
            enabled_shape_variants: cli.shapes.iter().copied().map(ShapeKind::from).collect(),
            background_fill: cli.fill,
            seed: cli.seed,
        }
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn progress(report: &StepReport, total: u32) {
    let mark = if report.applied { '+' } else { '.' };
    eprintln!(
        "[{:>4}/{total}] {mark} distance {:.6} (trial {:.6}, {} mutations)",
        report.index + 1,
        report.state_distance,
        report.trial_distance,
        report.climb.attempts,
    );
}

fn write_svg(path: &Path, approximation: &Approximation, cli: &Cli, config_json: &str) -> Result<(), String> {
    let title = cli.image.file_stem().and_then(|s| s.to_str()).unwrap_or("tessera");
    let metadata = tessera_export::SvgMetadata {
        title: Some(title),
        description: None,
        config_json: Some(config_json),
    };
    let svg = tessera_export::to_svg(approximation, &metadata);
    std::fs::write(path, &svg).map_err(|e| format!("Error writing SVG to {}: {e}", path.display()))?;
    eprintln!("SVG written to {} ({} bytes)", path.display(), svg.len());
    Ok(())
}

fn write_png(path: &Path, approximation: &Approximation) -> Result<(), String> {
    let view = tessera_approx::render_view(approximation);
    view.save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| format!("Error writing PNG to {}: {e}", path.display()))?;
    eprintln!("PNG written to {} ({}x{})", path.display(), view.width(), view.height());
    Ok(())
}

fn write_json(
    path: &Path,
    approximation: &Approximation,
    summary: &RunSummary,
    config: &OptimizerConfig,
) -> Result<(), String> {
    let doc = serde_json::json!({
        "config": config,
        "summary": summary,
        "dimensions": approximation.dimensions,
        "viewScale": approximation.view_scale,
        "background": approximation.background,
        "steps": approximation.steps,
    });
    let text = serde_json::to_string_pretty(&doc).map_err(|e| format!("Error serializing run: {e}"))?;
    std::fs::write(path, text).map_err(|e| format!("Error writing JSON to {}: {e}", path.display()))?;
    eprintln!("JSON written to {}", path.display());
    Ok(())
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = config_from_cli(cli)?;
    let config_json = serde_json::to_string(&config).map_err(|e| format!("Error serializing config: {e}"))?;

    let image_bytes =
        std::fs::read(&cli.image).map_err(|e| format!("Error reading {}: {e}", cli.image.display()))?;
    eprintln!("Image: {} ({} bytes)", cli.image.display(), image_bytes.len());
    tracing::info!(?config, "starting run");

    let total = config.total_steps;
    let (approximation, summary) =
        tessera_approx::approximate(&image_bytes, config.clone(), |report| progress(report, total))
            .map_err(|e| format!("Optimizer error: {e}"))?;
    eprintln!();
    eprintln!("{}", summary.report());

    if let Some(ref path) = cli.svg {
        write_svg(path, &approximation, cli, &config_json)?;
    }
    if let Some(ref path) = cli.png {
        write_png(path, &approximation)?;
    }
    if let Some(ref path) = cli.json {
        write_json(path, &approximation, &summary, &config)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}
