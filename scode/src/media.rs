//! External media tool invocations.
//!
//! The encoder treats ffmpeg as a collaborator with a narrow contract:
//! encode a WAV to Opus-in-WebM or AAC-in-MP4, re-materialize a source as
//! 48 kHz PCM in place, and (via ffprobe) report an output's duration for
//! sample-count reconciliation.

use std::fs;
use std::path::Path;
use std::process::Command;

use tracing::{debug, trace};

use crate::error::EncodeError;
use scode_core::decode::ffprobe_path;

/// Encode a source to Opus-in-WebM.
///
/// `bitrate_kbps` is per channel; the stream bitrate handed to the tool is
/// scaled by the channel count.
pub fn encode_opus(
    ffmpeg: &str,
    input: &Path,
    output: &Path,
    bitrate_kbps: u32,
    channels: u16,
) -> Result<(), EncodeError> {
    run(Command::new(ffmpeg)
        .arg("-i")
        .arg(input)
        .arg("-b:a")
        .arg(format!("{}k", bitrate_kbps * u32::from(channels)))
        .arg("-c:a")
        .arg("libopus")
        .arg("-ar")
        .arg("48000")
        .arg("-ac")
        .arg(channels.to_string())
        .arg("-map_metadata")
        .arg("-1")
        .arg("-y")
        .arg(output))
}

/// Encode a source to AAC-in-MP4 with the moov atom up front.
pub fn encode_aac(
    ffmpeg: &str,
    input: &Path,
    output: &Path,
    bitrate_kbps: u32,
    channels: u16,
) -> Result<(), EncodeError> {
    run(Command::new(ffmpeg)
        .arg("-i")
        .arg(input)
        .arg("-ar")
        .arg("48000")
        .arg("-ac")
        .arg(channels.to_string())
        .arg("-movflags")
        .arg("faststart")
        .arg("-b:a")
        .arg(format!("{}k", bitrate_kbps * u32::from(channels)))
        .arg("-c:a")
        .arg("aac")
        .arg("-map_metadata")
        .arg("-1")
        .arg("-y")
        .arg(output))
}

/// Rewrite a non-conforming source in place as 48 kHz 16-bit PCM.
///
/// Converts to a sibling file, then replaces the original. This mutates the
/// input tree, which is why the pipeline asks for confirmation first.
pub fn rematerialize_as_pcm(ffmpeg: &str, path: &Path) -> Result<(), EncodeError> {
    let converted = path.with_extension("pcm.wav");
    run(Command::new(ffmpeg)
        .arg("-i")
        .arg(path)
        .arg("-ar")
        .arg("48000")
        .arg("-c:a")
        .arg("pcm_s16le")
        .arg("-y")
        .arg(&converted))?;
    fs::remove_file(path)?;
    fs::rename(&converted, path)?;
    Ok(())
}

/// Frame count of a produced file per ffprobe, or `None` when the probe is
/// unavailable or the container carries no duration.
pub fn probe_frame_count(ffmpeg: &str, path: &Path, sample_rate: u32) -> Option<u64> {
    let ffprobe = ffprobe_path(ffmpeg);
    let output = Command::new(&ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("json")
        .arg(path)
        .output()
        .ok()?;
    if !output.status.success() {
        trace!(
            "{} failed on {}: {}",
            ffprobe,
            path.display(),
            String::from_utf8_lossy(&output.stderr)
        );
        return None;
    }
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
    let duration: f64 = value["format"]["duration"].as_str()?.parse().ok()?;
    Some((duration * f64::from(sample_rate)).round() as u64)
}

fn run(command: &mut Command) -> Result<(), EncodeError> {
    trace!("Running {:?}", command);
    let output = command.output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EncodeError::encode(stderr.trim().to_string()));
    }
    debug!("Media tool finished: {:?}", command.get_program());
    Ok(())
}
