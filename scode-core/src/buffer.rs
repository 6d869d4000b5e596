//! Shared audio buffers and the owning audio context.

use std::sync::Mutex;
use std::time::Duration;

use crate::decode::DecodedAudio;

/// Sample rate every encoded asset is normalized to.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Owns the output sample rate buffers are allocated against.
///
/// Destination routing is the caller's responsibility; the manager only needs
/// the rate to shape placeholder buffers before a file has been decoded.
#[derive(Debug)]
pub struct AudioContext {
    sample_rate: u32,
}

impl AudioContext {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Default for AudioContext {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

/// Planar PCM buffer shared between the cache and callers.
///
/// Dimensions are fixed at allocation; channel contents may be overwritten in
/// place when a placeholder's decode lands, so callers scheduling playback
/// must treat sample data as mutable until the buffer's `sound-loaded` event
/// has fired. Duration never changes.
pub struct AudioBuffer {
    sample_rate: u32,
    frame_count: usize,
    channels: Mutex<Vec<Vec<f32>>>,
}

impl AudioBuffer {
    /// Allocate a silent buffer of the given shape.
    pub fn silent(channel_count: u16, frame_count: usize, sample_rate: u32) -> Self {
        let channels = (0..channel_count.max(1))
            .map(|_| vec![0.0; frame_count])
            .collect();
        Self {
            sample_rate,
            frame_count,
            channels: Mutex::new(channels),
        }
    }

    /// Allocate from decoded PCM, sized by the atlas's authoritative frame
    /// count rather than the decoder's reported length.
    pub fn from_decoded(decoded: &DecodedAudio, frame_count: usize, sample_rate: u32) -> Self {
        let buffer = Self::silent(decoded.channels, frame_count, sample_rate);
        buffer.fill_from(decoded);
        buffer
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_count as f64 / self.sample_rate as f64)
    }

    /// Copy of one channel's samples.
    pub fn channel_data(&self, index: usize) -> Option<Vec<f32>> {
        self.channels.lock().unwrap().get(index).cloned()
    }

    /// Overwrite channel data in place with decoded PCM.
    ///
    /// Copies up to `min` of both frame counts and channel counts; the
    /// buffer's shape (and therefore its reported duration) does not change.
    pub fn fill_from(&self, decoded: &DecodedAudio) {
        let mut channels = self.channels.lock().unwrap();
        let frames = self.frame_count.min(decoded.frame_count());
        let channel_count = channels.len().min(decoded.channels as usize);
        let stride = decoded.channels as usize;
        for (ch, data) in channels.iter_mut().enumerate().take(channel_count) {
            for (i, slot) in data.iter_mut().enumerate().take(frames) {
                *slot = decoded.samples[i * stride + ch];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_shape() {
        let buffer = AudioBuffer::silent(2, 480, 48000);
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frame_count(), 480);
        assert_eq!(buffer.sample_rate(), 48000);
        assert!(buffer.channel_data(0).unwrap().iter().all(|&s| s == 0.0));
        assert_eq!(buffer.duration(), Duration::from_millis(10));
    }

    #[test]
    fn test_zero_channels_clamps_to_one() {
        let buffer = AudioBuffer::silent(0, 10, 48000);
        assert_eq!(buffer.channel_count(), 1);
    }

    #[test]
    fn test_fill_in_place_deinterleaves() {
        let buffer = AudioBuffer::silent(2, 3, 48000);
        let decoded = DecodedAudio {
            samples: vec![0.1, -0.1, 0.2, -0.2, 0.3, -0.3],
            sample_rate: 48000,
            channels: 2,
        };
        buffer.fill_from(&decoded);
        assert_eq!(buffer.channel_data(0).unwrap(), vec![0.1, 0.2, 0.3]);
        assert_eq!(buffer.channel_data(1).unwrap(), vec![-0.1, -0.2, -0.3]);
    }

    #[test]
    fn test_fill_clamps_to_buffer_shape() {
        // Shorter decode than allocation: the tail stays silent.
        let buffer = AudioBuffer::silent(1, 4, 48000);
        let decoded = DecodedAudio {
            samples: vec![0.5, 0.5],
            sample_rate: 48000,
            channels: 1,
        };
        buffer.fill_from(&decoded);
        assert_eq!(buffer.channel_data(0).unwrap(), vec![0.5, 0.5, 0.0, 0.0]);

        // More decoded channels than allocated: extras are dropped.
        let buffer = AudioBuffer::silent(1, 2, 48000);
        let decoded = DecodedAudio {
            samples: vec![0.1, 0.9, 0.2, 0.8],
            sample_rate: 48000,
            channels: 2,
        };
        buffer.fill_from(&decoded);
        assert_eq!(buffer.channel_data(0).unwrap(), vec![0.1, 0.2]);
    }

    #[test]
    fn test_from_decoded_uses_authoritative_frame_count() {
        // Decoder reported 5 frames but the atlas says 3.
        let decoded = DecodedAudio {
            samples: vec![0.1, 0.2, 0.3, 0.4, 0.5],
            sample_rate: 48000,
            channels: 1,
        };
        let buffer = AudioBuffer::from_decoded(&decoded, 3, 48000);
        assert_eq!(buffer.frame_count(), 3);
        assert_eq!(buffer.channel_data(0).unwrap(), vec![0.1, 0.2, 0.3]);
    }
}
