//! Content-addressed file naming.
//!
//! Encoded assets are named `{bitrate}k.{channels}ch.{hash}` where `hash` is
//! the unsigned decimal XXH64 of the interleaved little-endian PCM samples at
//! the target channel count. The runtime recovers the channel count from the
//! `<n>ch` field when it has to allocate a placeholder buffer before the file
//! has been fetched, so the field layout must not change.

use std::fmt;
use std::hash::Hasher;

use twox_hash::XxHash64;

/// Extension of the primary (Opus) container.
pub const OPUS_EXTENSION: &str = ".webm";
/// Extension of the optional secondary (AAC) container.
pub const AAC_EXTENSION: &str = ".mp4";
/// Base name of the atlas document inside the output directory.
pub const ATLAS_FILE: &str = ".atlas.json";

/// A parsed content-addressed base name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileName {
    pub bitrate_kbps: u32,
    pub channels: u16,
    pub hash: u64,
}

impl FileName {
    pub fn new(bitrate_kbps: u32, channels: u16, hash: u64) -> Self {
        Self {
            bitrate_kbps,
            channels,
            hash,
        }
    }

    /// Derive the name for a PCM payload at the target channel count.
    pub fn from_pcm(bitrate_kbps: u32, channels: u16, samples: &[i16]) -> Self {
        Self::new(bitrate_kbps, channels, hash_pcm(samples))
    }

    /// Parse a base name of the form `96k.2ch.12345678901234567890`.
    pub fn parse(base: &str) -> Option<Self> {
        let mut parts = base.splitn(3, '.');
        let bitrate_kbps = parts.next()?.strip_suffix('k')?.parse().ok()?;
        let channels = parts.next()?.strip_suffix("ch")?.parse().ok()?;
        let hash = parts.next()?.parse().ok()?;
        Some(Self {
            bitrate_kbps,
            channels,
            hash,
        })
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}k.{}ch.{}", self.bitrate_kbps, self.channels, self.hash)
    }
}

/// Hash interleaved PCM samples as little-endian bytes.
///
/// XXH64 with seed 0: fast, and the same value on every platform and Rust
/// release, which keeps encoder output byte-identical across machines.
pub fn hash_pcm(samples: &[i16]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    for sample in samples {
        hasher.write(&sample.to_le_bytes());
    }
    hasher.finish()
}

/// Recover the channel count from a base name's `<n>ch` field.
///
/// Tolerates names that are not full content addresses; returns `None` when
/// no field carries the `ch` suffix.
pub fn channels_from_file_name(base: &str) -> Option<u16> {
    base.split('.')
        .find_map(|field| field.strip_suffix("ch").and_then(|n| n.parse().ok()))
}
