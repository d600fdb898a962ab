use std::{fs, path::PathBuf, sync::Arc, time::Duration};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use framecache::{
    CacheOptions, CancellationToken, ExtractionCoordinator, FrameCachedEvent, FrameObserver,
    utilities::{format_seek_seconds, frame_index_to_timestamp},
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  framecache frame input.mp4 --frame 240 --fps 24 --out frame.png\n  framecache prefetch input.mp4 --center 240 --radius 12 --fps 24 --progress --json\n  framecache completions zsh > _framecache";

#[derive(Debug, Parser)]
#[command(
    name = "framecache",
    version,
    about = "Extract and cache preview frames through an external FFmpeg decoder",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional output.
    #[arg(long)]
    verbose: bool,

    /// Show a progress bar where supported.
    #[arg(long)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long)]
    overwrite: bool,

    /// Decoder executable (defaults to `ffmpeg` or $FRAMECACHE_FFMPEG).
    #[arg(long)]
    decoder: Option<PathBuf>,

    /// Per-frame decoder timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Maximum number of decoders running at once.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Maximum number of cached frames.
    #[arg(long)]
    capacity: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract a single frame.
    #[command(
        about = "Extract one preview frame",
        after_help = "Examples:\n  framecache frame input.mp4 --frame 0 --fps 25 --out first.png\n  framecache frame input.mp4 --frame 900 --fps 30000/1001 --width 640 --height 360 --out f.jpg"
    )]
    Frame {
        /// Input media path.
        input: PathBuf,
        /// Zero-based frame index.
        #[arg(long)]
        frame: u64,
        /// Frame rate, as a number or a ratio such as 30000/1001.
        #[arg(long)]
        fps: String,
        /// Bounding box width (defaults to the preview width).
        #[arg(long)]
        width: Option<u32>,
        /// Bounding box height (defaults to the preview height).
        #[arg(long)]
        height: Option<u32>,
        /// Output image path.
        #[arg(long)]
        out: PathBuf,
    },

    /// Prefetch a window of frames around a position.
    #[command(
        about = "Prefetch frames around a position",
        after_help = "Examples:\n  framecache prefetch input.mp4 --center 240 --radius 12 --fps 24\n  framecache prefetch input.mp4 --center 240 --fps 24 --out frames --ext jpg --json"
    )]
    Prefetch {
        /// Input media path.
        input: PathBuf,
        /// Frame index at the middle of the window.
        #[arg(long)]
        center: u64,
        /// Frames to fetch on each side of the center.
        #[arg(long, default_value_t = 5)]
        radius: u64,
        /// Frame rate, as a number or a ratio such as 30000/1001.
        #[arg(long)]
        fps: String,
        /// Bounding box width (defaults to the preview width).
        #[arg(long)]
        width: Option<u32>,
        /// Bounding box height (defaults to the preview height).
        #[arg(long)]
        height: Option<u32>,
        /// Optional directory to write the fetched frames to.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Output image extension (png, jpg, jpeg, bmp, tiff).
        #[arg(long, default_value = "png")]
        ext: String,
        /// Print the report and cache statistics as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions.
    #[command(about = "Generate shell completion script")]
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

fn cache_options(global: &GlobalOptions) -> CacheOptions {
    let mut options = CacheOptions::new();

    if let Some(decoder) = &global.decoder {
        options = options.with_decoder_program(decoder.clone());
    }
    if let Some(timeout_ms) = global.timeout_ms {
        options = options.with_extraction_timeout(Duration::from_millis(timeout_ms));
    }
    if let Some(concurrency) = global.concurrency {
        options = options.with_max_concurrent_extractions(concurrency);
    }
    if let Some(capacity) = global.capacity {
        options = options.with_capacity(capacity);
    }

    options
}

/// Parse `25`, `29.97` or `30000/1001`.
fn parse_frame_rate(value: &str) -> Option<f64> {
    let value = value.trim();
    let rate = match value.split_once('/') {
        Some((numerator, denominator)) => {
            let numerator: f64 = numerator.trim().parse().ok()?;
            let denominator: f64 = denominator.trim().parse().ok()?;
            if denominator == 0.0 {
                return None;
            }
            numerator / denominator
        }
        None => value.parse().ok()?,
    };

    (rate.is_finite() && rate > 0.0).then_some(rate)
}

fn parse_image_extension(value: &str) -> Option<&'static str> {
    match value.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "png" => Some("png"),
        "jpg" | "jpeg" => Some("jpg"),
        "bmp" => Some("bmp"),
        "tif" | "tiff" => Some("tiff"),
        _ => None,
    }
}

/// Number of frames in `[center - radius, center + radius]`, clamped to `u64`.
fn window_len(center: u64, radius: u64) -> u64 {
    let first = center.saturating_sub(radius);
    let last = center.saturating_add(radius);
    (last - first).saturating_add(1)
}

struct ProgressObserver {
    bar: ProgressBar,
}

impl FrameObserver for ProgressObserver {
    fn on_frame_cached(&self, event: &FrameCachedEvent) {
        self.bar.inc(1);
        self.bar.set_message(format!("frame {}", event.frame_index()));
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let options = cache_options(&cli.global);

    match cli.command {
        Commands::Frame {
            input,
            frame,
            fps,
            width,
            height,
            out,
        } => {
            let frame_rate = parse_frame_rate(&fps).ok_or(format!("unsupported --fps: {fps}"))?;
            if out.exists() && !cli.global.overwrite {
                return Err(format!(
                    "output file already exists: {} (use --overwrite)",
                    out.display()
                )
                .into());
            }

            let (preview_width, preview_height) = options.preview_resolution();
            let coordinator = ExtractionCoordinator::new(options)?;
            let cancel = CancellationToken::new();

            let cached = coordinator
                .get_frame(
                    &input,
                    frame,
                    frame_rate,
                    width.unwrap_or(preview_width),
                    height.unwrap_or(preview_height),
                    &cancel,
                )
                .await?
                .ok_or(format!(
                    "could not extract frame {frame} from {}",
                    input.display()
                ))?;

            cached.image().save(&out)?;

            if cli.global.verbose {
                eprintln!(
                    "decoded {}x{} frame at {} with {}",
                    cached.width(),
                    cached.height(),
                    format_seek_seconds(frame_index_to_timestamp(frame, frame_rate)),
                    coordinator
                        .source()
                        .invoker()
                        .options()
                        .program
                        .to_string_lossy()
                );
            }

            println!(
                "{} {}",
                "success:".green().bold(),
                format!("Saved frame {frame} to {}", out.display()).green()
            );
        }
        Commands::Prefetch {
            input,
            center,
            radius,
            fps,
            width,
            height,
            out,
            ext,
            json,
        } => {
            let frame_rate = parse_frame_rate(&fps).ok_or(format!("unsupported --fps: {fps}"))?;
            let extension =
                parse_image_extension(&ext).ok_or(format!("unsupported --ext: {ext}"))?;

            let (preview_width, preview_height) = options.preview_resolution();
            let width = width.unwrap_or(preview_width);
            let height = height.unwrap_or(preview_height);
            let coordinator = ExtractionCoordinator::new(options)?;
            let cancel = CancellationToken::new();

            let progress_bar = if cli.global.progress {
                let bar = ProgressBar::new(window_len(center, radius));
                let style = ProgressStyle::with_template(
                    "{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}",
                )?;
                bar.set_style(style.progress_chars("##-"));
                coordinator.add_observer(Arc::new(ProgressObserver { bar: bar.clone() }));
                Some(bar)
            } else {
                None
            };

            let report = coordinator
                .prefetch(&input, center, frame_rate, radius, width, height, &cancel)
                .await?;

            if let Some(bar) = progress_bar {
                bar.finish_with_message("done");
            }

            let mut written = 0_u64;
            if let Some(directory) = &out {
                fs::create_dir_all(directory)?;
                for frame_index in center.saturating_sub(radius)..=center.saturating_add(radius) {
                    let output_path = directory.join(format!("frame_{frame_index:06}.{extension}"));
                    if output_path.exists() && !cli.global.overwrite {
                        return Err(format!(
                            "output file already exists: {} (use --overwrite)",
                            output_path.display()
                        )
                        .into());
                    }

                    let Some(frame) = coordinator
                        .get_frame(&input, frame_index, frame_rate, width, height, &cancel)
                        .await?
                    else {
                        continue;
                    };
                    frame.image().save(&output_path)?;
                    written += 1;

                    if cli.global.verbose {
                        eprintln!("saved frame {} -> {}", frame_index, output_path.display());
                    }
                }
            }

            let stats = coordinator.stats();
            if json {
                let payload = json!({
                    "input": input.display().to_string(),
                    "center": center,
                    "radius": radius,
                    "report": {
                        "already_cached": report.already_cached,
                        "requested": report.requested,
                        "loaded": report.loaded,
                        "failed": report.failed,
                        "cancelled": report.cancelled,
                    },
                    "written": written,
                    "stats": stats.to_json(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!(
                    "{} {}",
                    "success:".green().bold(),
                    format!(
                        "Prefetched {} of {} frame(s) around {center}",
                        report.loaded, report.requested
                    )
                    .green()
                );
                if report.failed > 0 {
                    println!(
                        "{} {}",
                        "warning:".yellow().bold(),
                        format!("{} frame(s) could not be extracted", report.failed).yellow()
                    );
                }
                if out.is_some() {
                    println!("Wrote {written} frame(s)");
                }
                println!(
                    "Cache: {}/{} frames, {} decoder run(s), hit rate {:.1}%",
                    stats.entries,
                    stats.capacity,
                    stats.extractions,
                    stats.hit_rate()
                );
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "framecache", &mut std::io::stdout());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
