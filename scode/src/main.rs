use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;
use tracing::{error, info};

mod cache;
mod config;
mod discover;
mod error;
mod media;
mod pipeline;
mod util;
mod wave;

use crate::config::{ConfigFile, EncoderConfig, LogLevel};
use crate::error::EncodeError;

/// scode — offline encoder for the content-addressed audio asset pipeline.
///
/// Walks a package tree of 48 kHz PCM sources, encodes each one to an
/// Opus-in-WebM (and optionally AAC-in-MP4) file named by content address,
/// and writes the `.atlas.json` document the runtime consumes.
#[derive(Parser, Debug)]
#[command(name = "scode", version)]
struct Args {
    /// Path to the configuration file.
    #[arg(long, default_value = "scodefig.jsonc", env = "SCODE_CONFIG")]
    config: String,

    /// Root of the package tree.
    #[arg(long)]
    indir: Option<PathBuf>,

    /// Destination directory for encoded files and the atlas.
    #[arg(long)]
    outdir: Option<PathBuf>,

    /// Default per-channel bitrate in kbps.
    #[arg(long)]
    bitrate: Option<u32>,

    /// Encode only these packages (repeatable).
    #[arg(long)]
    packages: Vec<String>,

    /// Also emit AAC-in-MP4 files.
    #[arg(long)]
    include_mp4: Option<bool>,

    /// Skip the confirmation prompt before re-encoding non-conforming sources.
    #[arg(long)]
    yes: Option<bool>,

    /// One of debug, perf, info, success, warn, error, silent.
    #[arg(long)]
    loglevel: Option<String>,

    /// Reuse the modification-date cache of source analyses.
    #[arg(long)]
    use_cache: Option<bool>,

    /// Path to the ffmpeg binary.
    #[arg(long, env = "SCODE_FFMPEG")]
    ffmpeg: Option<String>,
}

/// Config file first, CLI flags on top.
fn resolve_config(args: Args) -> Result<EncoderConfig, EncodeError> {
    let path = Path::new(&args.config);
    let mut config = EncoderConfig::default();
    if path.is_file() {
        config.apply_file(ConfigFile::load(path)?)?;
    } else if args.config != "scodefig.jsonc" {
        return Err(EncodeError::config(format!(
            "config file {} not found",
            path.display()
        )));
    }

    if let Some(indir) = args.indir {
        config.indir = indir;
    }
    if let Some(outdir) = args.outdir {
        config.outdir = outdir;
    }
    if let Some(bitrate) = args.bitrate {
        config.bitrate = bitrate.max(1);
    }
    if !args.packages.is_empty() {
        config.packages = args.packages;
    }
    if let Some(include_mp4) = args.include_mp4 {
        config.include_mp4 = include_mp4;
    }
    if let Some(yes) = args.yes {
        config.yes = yes;
    }
    if let Some(level) = args.loglevel {
        config.loglevel = LogLevel::parse(&level)
            .ok_or_else(|| EncodeError::config(format!("unknown loglevel {level:?}")))?;
    }
    if let Some(use_cache) = args.use_cache {
        config.use_cache = use_cache;
    }
    if let Some(ffmpeg) = args.ffmpeg {
        config.ffmpeg = ffmpeg;
    }
    Ok(config)
}

fn configure_logging(level: LogLevel) {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.env_filter()));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = match resolve_config(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };
    configure_logging(config.loglevel);

    if config.packages.is_empty() {
        info!("Encoding all packages under {}", config.indir.display());
    } else {
        info!("Encoding packages: {:?}", config.packages);
    }

    let started = Instant::now();
    match pipeline::run(config).await {
        Ok(stats) => {
            info!(
                "Done in {}: {} encoded, {} up to date, {} failed",
                util::format_duration(started.elapsed().as_millis()),
                stats.encoded,
                stats.skipped,
                stats.failed
            );
            if stats.failed > 0 {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}
