//! Mock collaborators for exercising the runtime without a media tool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::decode::{AudioDecoder, DecodedAudio};
use crate::error::SoundError;
use crate::fetch::AssetFetcher;

/// In-memory fetcher that records every requested location.
#[derive(Default)]
pub struct MockFetcher {
    files: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
    fetch_count: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, location: impl Into<String>, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(location.into(), bytes);
    }

    /// Make every fetch suspend, opening a window where loads are in flight.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetFetcher for MockFetcher {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, SoundError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(location.to_string());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.files
            .lock()
            .unwrap()
            .get(location)
            .cloned()
            .ok_or_else(|| SoundError::fetch(location, "not found"))
    }
}

/// Encode PCM into the raw container [`MockDecoder`] understands:
/// `[channels: u8][sample_rate: u32 LE][f32 LE interleaved samples...]`.
pub fn encode_raw(channels: u16, sample_rate: u32, samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + samples.len() * 4);
    out.push(channels as u8);
    out.extend_from_slice(&sample_rate.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Decoder for the [`encode_raw`] container. Truncated payloads fail, which
/// is how tests provoke decode errors.
#[derive(Default)]
pub struct MockDecoder;

#[async_trait]
impl AudioDecoder for MockDecoder {
    async fn decode(&self, file_name: &str, data: &[u8]) -> Result<DecodedAudio, SoundError> {
        if data.len() < 5 {
            return Err(SoundError::decode(file_name, "truncated payload"));
        }
        let channels = data[0] as u16;
        if channels == 0 {
            return Err(SoundError::decode(file_name, "zero channels"));
        }
        let sample_rate = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
        let mut samples = Vec::with_capacity((data.len() - 5) / 4);
        for chunk in data[5..].chunks_exact(4) {
            samples.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        Ok(DecodedAudio {
            samples,
            sample_rate,
            channels,
        })
    }
}
