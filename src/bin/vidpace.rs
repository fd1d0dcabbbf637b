use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use vidpace::{
    CodecFamily, FfmpegLogLevel, ImageSequenceSink, IngestProgress, NullSink, PipelineOptions,
    PixelFormat, ProgressCallback, Session, SourceDescriptor, Stats,
};

const CLI_AFTER_HELP: &str = "Examples:\n  vidpace inspect input.ts --json\n  vidpace play input.mp4 --out frames --every 25 --progress\n  vidpace play input.ts --codec h265 --interval-ms 35\n  vidpace completions zsh > _vidpace";

#[derive(Debug, Parser)]
#[command(
    name = "vidpace",
    version,
    about = "Classify keyframes in H.264/H.265 containers and play them back at a fixed cadence",
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
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress spinner during ingestion.
    #[arg(long, global = true)]
    progress: bool,

    /// FFmpeg log level (quiet, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Force the bitstream family instead of trusting the container (h264, h265).
    #[arg(long, global = true)]
    codec: Option<String>,

    /// Bytes of each packet scanned for keyframe markers.
    #[arg(long, global = true)]
    scan_limit: Option<usize>,
}

#[cfg(feature = "http")]
const INSPECT_EXAMPLES: &str =
    "Examples:\n  vidpace inspect input.ts\n  vidpace inspect https://cdn.example/clip.mp4 --json";
#[cfg(not(feature = "http"))]
const INSPECT_EXAMPLES: &str = "Examples:\n  vidpace inspect input.ts\n  vidpace inspect clip.mp4 --json\n\n\
     Remote URLs need a build with `--features http`.";

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest a container and print its statistics.
    #[command(
        about = "Print ingestion statistics",
        visible_alias = "stats",
        after_help = INSPECT_EXAMPLES
    )]
    Inspect {
        /// Input path or URL.
        input: String,

        /// Output statistics as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run the full pipeline: ingest, decode at a fixed cadence, and render.
    #[command(
        about = "Decode and pace a video",
        after_help = "Examples:\n  vidpace play input.ts\n  vidpace play input.mp4 --out frames --every 25 --pixel-format gray8"
    )]
    Play {
        /// Input path or URL.
        input: String,
        /// Write decoded frames into this directory.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Keep every Nth decoded frame when writing.
        #[arg(long, default_value_t = 1)]
        every: u64,
        /// Pacing interval in milliseconds.
        #[arg(long, default_value_t = 40)]
        interval_ms: u64,
        /// Decoded pixel format (rgb8, rgba8, gray8).
        #[arg(long, default_value = "rgb8")]
        pixel_format: String,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

fn parse_pixel_format(value: &str) -> Option<PixelFormat> {
    match value.to_ascii_lowercase().as_str() {
        "rgb8" | "rgb" => Some(PixelFormat::Rgb8),
        "rgba8" | "rgba" => Some(PixelFormat::Rgba8),
        "gray8" | "gray" | "grey" | "grayscale" => Some(PixelFormat::Gray8),
        _ => None,
    }
}

fn source_for(input: &str) -> SourceDescriptor {
    if input.contains("://") {
        SourceDescriptor::Remote {
            url: input.to_string(),
            size: None,
        }
    } else {
        SourceDescriptor::File(PathBuf::from(input))
    }
}

fn base_options(global: &GlobalOptions) -> Result<PipelineOptions, Box<dyn std::error::Error>> {
    let mut options = PipelineOptions::new();

    if let Some(tag) = &global.codec {
        let family = CodecFamily::from_tag(tag).ok_or(format!("unsupported --codec: {tag}"))?;
        options = options.with_forced_codec(family);
    }
    if let Some(limit) = global.scan_limit {
        options = options.with_keyframe_scan_limit(limit);
    }
    if global.progress {
        options = options.with_progress(Arc::new(TerminalProgress::new()?));
    }

    Ok(options)
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    let level = match &global.log_level {
        Some(level) => level.parse::<FfmpegLogLevel>()?,
        None if global.verbose => FfmpegLogLevel::Info,
        None => FfmpegLogLevel::Error,
    };
    vidpace::set_ffmpeg_log_level(level);
    Ok(())
}

/// Spinner fed by ingestion progress.
struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::with_template("{spinner:.green} {elapsed} {msg}")?);
        bar.enable_steady_tick(Duration::from_millis(100));
        Ok(Self { bar })
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &IngestProgress) {
        let message = format!(
            "{} packets, {} video, {} keyframes",
            info.stats.total_packets, info.stats.video_packets, info.stats.keyframes
        );
        if info.finished {
            self.bar.finish_with_message(message);
        } else {
            self.bar.set_message(message);
        }
    }
}

fn stats_json(stats: &Stats) -> serde_json::Value {
    json!({
        "codec_name": stats.codec_name,
        "codec_type": stats.codec_family.tag(),
        "width": stats.width,
        "height": stats.height,
        "total_packets": stats.total_packets,
        "video_packets": stats.video_packets,
        "keyframes": stats.keyframes,
        "keyframe_ratio": stats.keyframe_ratio_display(),
        "video_stream_index": stats.video_stream_index,
    })
}

fn print_stats(stats: &Stats) {
    println!("Codec: {} ({})", stats.codec_name, stats.codec_family);
    println!("Resolution: {}x{}", stats.width, stats.height);
    println!("Video stream: #{}", stats.video_stream_index);
    println!("Packets: {} total, {} video", stats.total_packets, stats.video_packets);
    println!(
        "Keyframes: {} ({}%)",
        stats.keyframes,
        stats.keyframe_ratio_display()
    );
}

fn finish_session(session: Session, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    if verbose {
        eprintln!(
            "description: {} bytes ({:?})",
            session.description().as_bytes().len(),
            session.description().origin()
        );
    }
    let report = session.wait()?;

    if report.timed_out {
        eprintln!(
            "{} {}",
            "warning:".yellow().bold(),
            "playback watchdog expired before the queue drained".yellow()
        );
    }
    println!(
        "{} {}",
        "success:".green().bold(),
        format!(
            "Played {} chunk(s), {} frame(s) rendered, {} skipped",
            report.emitted, report.decoded_frames, report.skipped
        )
        .green()
    );
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Inspect { input, json } => {
            let options = base_options(&cli.global)?;
            let stats = vidpace::inspect(source_for(&input), &options)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats_json(&stats))?);
            } else {
                print_stats(&stats);
            }
        }
        Commands::Play {
            input,
            out,
            every,
            interval_ms,
            pixel_format,
        } => {
            let pixel = parse_pixel_format(&pixel_format)
                .ok_or(format!("unsupported --pixel-format: {pixel_format}"))?;
            let options = base_options(&cli.global)?
                .with_target_interval(Duration::from_millis(interval_ms))
                .with_pixel_format(pixel);
            let source = source_for(&input);

            let session = match out {
                Some(directory) => {
                    let sink = ImageSequenceSink::new(&directory, every)?;
                    if cli.global.verbose {
                        eprintln!("writing every {every} frame(s) to {}", directory.display());
                    }
                    vidpace::run(source, sink, &options)?
                }
                None => vidpace::run(source, NullSink::new(), &options)?,
            };
            print_stats(session.stats());
            finish_session(session, cli.global.verbose)?;
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "vidpace", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, Commands, parse_pixel_format, source_for};
    use clap::{CommandFactory, Parser};
    use vidpace::{PixelFormat, SourceDescriptor};

    #[test]
    fn parse_pixel_format_aliases() {
        assert_eq!(parse_pixel_format("RGB"), Some(PixelFormat::Rgb8));
        assert_eq!(parse_pixel_format("rgba8"), Some(PixelFormat::Rgba8));
        assert_eq!(parse_pixel_format("grey"), Some(PixelFormat::Gray8));
        assert_eq!(parse_pixel_format("yuv420p"), None);
    }

    #[test]
    fn urls_become_remote_sources() {
        assert!(matches!(
            source_for("https://cdn.example/a.ts"),
            SourceDescriptor::Remote { size: None, .. }
        ));
        assert!(matches!(source_for("clip.mp4"), SourceDescriptor::File(_)));
    }

    #[test]
    fn inspect_help_matches_enabled_features() {
        let mut command = Cli::command();
        let help = command
            .find_subcommand_mut("inspect")
            .unwrap()
            .render_help()
            .to_string();
        if cfg!(feature = "http") {
            assert!(help.contains("https://cdn.example/clip.mp4"));
        } else {
            assert!(help.contains("--features http"));
            assert!(!help.contains("https://"));
        }
    }

    #[test]
    fn play_arguments_parse() {
        let cli = Cli::try_parse_from([
            "vidpace", "play", "in.ts", "--out", "frames", "--every", "5", "--codec", "h265",
        ])
        .unwrap();
        assert_eq!(cli.global.codec.as_deref(), Some("h265"));
        match cli.command {
            Commands::Play {
                every, interval_ms, ..
            } => {
                assert_eq!(every, 5);
                assert_eq!(interval_ms, 40);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
