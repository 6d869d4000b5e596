//! Audio decoding seam over the external media tool.
//!
//! The default implementation shells out to ffmpeg (temp file in, raw f32le
//! out) since the tool's high-level interface is file-oriented. Decoding is
//! CPU-bound, so it runs on the blocking pool.

use std::io::Write;
use std::path::Path;
use std::process::Command;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::SoundError;

/// Interleaved PCM frames decoded from a compressed container.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    /// Frames per channel.
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Decodes compressed audio bytes into PCM frames at the context sample rate.
#[async_trait]
pub trait AudioDecoder: Send + Sync {
    async fn decode(&self, file_name: &str, data: &[u8]) -> Result<DecodedAudio, SoundError>;
}

/// Decoder backed by the ffmpeg CLI.
pub struct FfmpegDecoder {
    ffmpeg: String,
    sample_rate: u32,
}

impl FfmpegDecoder {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_path("ffmpeg", sample_rate)
    }

    pub fn with_path(ffmpeg: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            sample_rate,
        }
    }
}

#[async_trait]
impl AudioDecoder for FfmpegDecoder {
    async fn decode(&self, file_name: &str, data: &[u8]) -> Result<DecodedAudio, SoundError> {
        let ffmpeg = self.ffmpeg.clone();
        let sample_rate = self.sample_rate;
        let data = data.to_vec();
        let name = file_name.to_string();
        tokio::task::spawn_blocking(move || {
            decode_with_ffmpeg(&ffmpeg, &data, sample_rate)
                .map_err(|e| SoundError::decode(&name, e))
        })
        .await
        .map_err(|e| SoundError::decode(file_name, e))?
    }
}

fn decode_with_ffmpeg(
    ffmpeg: &str,
    data: &[u8],
    sample_rate: u32,
) -> Result<DecodedAudio, String> {
    let mut input = NamedTempFile::new().map_err(|e| format!("temp file: {e}"))?;
    input
        .write_all(data)
        .map_err(|e| format!("temp write: {e}"))?;

    let channels = probe_channels(ffmpeg, input.path())?;

    let output = NamedTempFile::new().map_err(|e| format!("temp file: {e}"))?;
    let output_path = output
        .path()
        .to_str()
        .ok_or_else(|| "invalid temp path encoding".to_string())?;
    let input_path = input
        .path()
        .to_str()
        .ok_or_else(|| "invalid temp path encoding".to_string())?;

    let result = Command::new(ffmpeg)
        .args([
            "-i",
            input_path,
            "-f",
            "f32le",
            "-acodec",
            "pcm_f32le",
            "-ar",
            &sample_rate.to_string(),
            "-y",
            output_path,
        ])
        .output()
        .map_err(|e| format!("failed to run ffmpeg: {e}"))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(format!("ffmpeg decode failed: {stderr}"));
    }

    let raw = std::fs::read(output.path()).map_err(|e| format!("read decoded pcm: {e}"))?;
    let mut samples = Vec::with_capacity(raw.len() / 4);
    for chunk in raw.chunks_exact(4) {
        samples.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }

    debug!(
        "Decoded {} samples ({} frames) at {} Hz",
        samples.len(),
        samples.len() / channels.max(1) as usize,
        sample_rate
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Ask ffprobe for the stream's channel count.
fn probe_channels(ffmpeg: &str, path: &Path) -> Result<u16, String> {
    let ffprobe = ffprobe_path(ffmpeg);
    let path_str = path
        .to_str()
        .ok_or_else(|| "invalid temp path encoding".to_string())?;
    let result = Command::new(&ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "a:0",
            "-show_entries",
            "stream=channels",
            "-of",
            "json",
            path_str,
        ])
        .output()
        .map_err(|e| format!("failed to run {ffprobe}: {e}"))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(format!("ffprobe failed: {stderr}"));
    }

    let value: serde_json::Value = serde_json::from_slice(&result.stdout)
        .map_err(|e| format!("ffprobe output: {e}"))?;
    value["streams"][0]["channels"]
        .as_u64()
        .and_then(|c| u16::try_from(c).ok())
        .filter(|c| *c > 0)
        .ok_or_else(|| "no audio stream in probe output".to_string())
}

/// Derive the ffprobe binary path from the configured ffmpeg path.
pub fn ffprobe_path(ffmpeg: &str) -> String {
    let path = Path::new(ffmpeg);
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) if name.contains("ffmpeg") => path
            .with_file_name(name.replace("ffmpeg", "ffprobe"))
            .to_string_lossy()
            .into_owned(),
        _ => "ffprobe".to_string(),
    }
}
