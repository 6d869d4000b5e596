//! RIFF/WAVE parsing for PCM sources.
//!
//! Header-only chunk walk plus PCM extraction at a target channel count.
//! Anything that is not integer PCM surfaces as [`WaveError::NotPcm`], which
//! is what routes a source into the re-materialization path.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WaveError {
    #[error("buffer too small for a RIFF header")]
    TooSmall,
    #[error("not a RIFF/WAVE file")]
    NotRiff,
    #[error("audio format {0} is not PCM")]
    NotPcm(u16),
    #[error("{0} chunk not found")]
    MissingChunk(&'static str),
    #[error("invalid wave data: {0}")]
    Invalid(&'static str),
}

/// Parsed header facts plus the location of the sample payload.
#[derive(Debug, Clone, Copy)]
pub struct WaveInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub block_align: u16,
    /// Frames per channel.
    pub frame_count: u64,
    data_offset: usize,
    data_len: usize,
}

impl WaveInfo {
    pub fn parse(buffer: &[u8]) -> Result<Self, WaveError> {
        if buffer.len() < 44 {
            return Err(WaveError::TooSmall);
        }
        if &buffer[0..4] != b"RIFF" || &buffer[8..12] != b"WAVE" {
            return Err(WaveError::NotRiff);
        }

        let mut fmt: Option<(u16, u32, u16, u16)> = None;
        let mut data: Option<(usize, usize)> = None;
        let mut pos = 12;
        while pos + 8 <= buffer.len() {
            let chunk_id = &buffer[pos..pos + 4];
            let chunk_size = u32::from_le_bytes([
                buffer[pos + 4],
                buffer[pos + 5],
                buffer[pos + 6],
                buffer[pos + 7],
            ]) as usize;
            let body = pos + 8;
            match chunk_id {
                b"fmt " => {
                    if body + 16 > buffer.len() {
                        return Err(WaveError::Invalid("fmt chunk truncated"));
                    }
                    let audio_format = u16::from_le_bytes([buffer[body], buffer[body + 1]]);
                    if audio_format != 1 {
                        return Err(WaveError::NotPcm(audio_format));
                    }
                    fmt = Some((
                        u16::from_le_bytes([buffer[body + 2], buffer[body + 3]]),
                        u32::from_le_bytes([
                            buffer[body + 4],
                            buffer[body + 5],
                            buffer[body + 6],
                            buffer[body + 7],
                        ]),
                        u16::from_le_bytes([buffer[body + 12], buffer[body + 13]]),
                        u16::from_le_bytes([buffer[body + 14], buffer[body + 15]]),
                    ));
                }
                b"data" => {
                    data = Some((body, chunk_size));
                    break;
                }
                _ => {}
            }
            // Chunks are word-aligned.
            pos = body + chunk_size + (chunk_size & 1);
        }

        let (channels, sample_rate, block_align, bits_per_sample) =
            fmt.ok_or(WaveError::MissingChunk("fmt "))?;
        let (data_offset, data_len) = data.ok_or(WaveError::MissingChunk("data"))?;
        if data_offset + data_len > buffer.len() {
            return Err(WaveError::Invalid("data chunk extends past the buffer"));
        }
        if channels == 0 {
            return Err(WaveError::Invalid("zero channels"));
        }
        if block_align == 0 {
            return Err(WaveError::Invalid("zero block align"));
        }
        let frame_count = (data_len / block_align as usize) as u64;
        if frame_count == 0 {
            return Err(WaveError::Invalid("no frames"));
        }
        if frame_count as usize * block_align as usize != data_len {
            return Err(WaveError::Invalid("data size is not a whole number of frames"));
        }

        Ok(Self {
            channels,
            sample_rate,
            bits_per_sample,
            block_align,
            frame_count,
            data_offset,
            data_len,
        })
    }

    /// Interleaved i16 samples at the target channel count.
    ///
    /// Stereo sources downmix to mono by averaging; mono sources duplicate
    /// into stereo. 24- and 32-bit samples are truncated to 16 bits, which
    /// is what the content address is defined over.
    pub fn samples_i16(&self, buffer: &[u8], target_channels: u16) -> Result<Vec<i16>, WaveError> {
        if !matches!(self.bits_per_sample, 16 | 24 | 32) {
            return Err(WaveError::Invalid("unsupported bits per sample"));
        }
        let bytes_per_sample = (self.bits_per_sample / 8) as usize;
        let data = &buffer[self.data_offset..self.data_offset + self.data_len];
        let source_channels = self.channels as usize;
        let frames = self.frame_count as usize;

        let mut out = Vec::with_capacity(frames * target_channels as usize);
        for frame in 0..frames {
            let base = frame * self.block_align as usize;
            let sample_at = |channel: usize| -> i16 {
                let off = base + channel * bytes_per_sample;
                match self.bits_per_sample {
                    16 => i16::from_le_bytes([data[off], data[off + 1]]),
                    24 => {
                        let value = ((data[off + 2] as i8 as i32) << 16)
                            | ((data[off + 1] as i32) << 8)
                            | data[off] as i32;
                        (value >> 8) as i16
                    }
                    32 => {
                        let value = i32::from_le_bytes([
                            data[off],
                            data[off + 1],
                            data[off + 2],
                            data[off + 3],
                        ]);
                        (value >> 16) as i16
                    }
                    _ => 0,
                }
            };
            match (source_channels, target_channels) {
                (s, t) if s == t as usize => {
                    for channel in 0..s {
                        out.push(sample_at(channel));
                    }
                }
                (2, 1) => {
                    let left = sample_at(0) as i32;
                    let right = sample_at(1) as i32;
                    out.push(((left + right) / 2) as i16);
                }
                (1, 2) => {
                    let mono = sample_at(0);
                    out.push(mono);
                    out.push(mono);
                }
                _ => return Err(WaveError::Invalid("unsupported channel mapping")),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a minimal 16-bit PCM WAV from interleaved samples.
    pub(crate) fn make_wav(channels: u16, sample_rate: u32, samples: &[i16]) -> Vec<u8> {
        make_wav_with_format(1, channels, sample_rate, 16, samples)
    }

    pub(crate) fn make_wav_with_format(
        audio_format: u16,
        channels: u16,
        sample_rate: u32,
        bits: u16,
        samples: &[i16],
    ) -> Vec<u8> {
        let block_align = channels * bits / 8;
        let byte_rate = sample_rate * block_align as u32;
        let data_len = samples.len() * 2;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len as u32).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&audio_format.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&byte_rate.to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&bits.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&(data_len as u32).to_le_bytes());
        for sample in samples {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_parse_minimal_wav() {
        let wav = make_wav(2, 48000, &[1, -1, 2, -2, 3, -3]);
        let info = WaveInfo::parse(&wav).unwrap();
        assert_eq!(info.channels, 2);
        assert_eq!(info.sample_rate, 48000);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(info.frame_count, 3);
    }

    #[test]
    fn test_non_pcm_format_is_flagged() {
        let wav = make_wav_with_format(3, 1, 48000, 16, &[0; 4]);
        assert!(matches!(WaveInfo::parse(&wav), Err(WaveError::NotPcm(3))));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(WaveInfo::parse(b"tiny"), Err(WaveError::TooSmall)));
        let mut wav = make_wav(1, 48000, &[0; 16]);
        wav[0] = b'X';
        assert!(matches!(WaveInfo::parse(&wav), Err(WaveError::NotRiff)));
    }

    #[test]
    fn test_skips_unknown_chunks() {
        // Splice a LIST chunk between fmt and data.
        let wav = make_wav(1, 48000, &[5, 6]);
        let mut spliced = wav[..36].to_vec();
        spliced.extend_from_slice(b"LIST");
        spliced.extend_from_slice(&4u32.to_le_bytes());
        spliced.extend_from_slice(b"INFO");
        spliced.extend_from_slice(&wav[36..]);
        // Patch the RIFF size.
        let riff_size = (spliced.len() - 8) as u32;
        spliced[4..8].copy_from_slice(&riff_size.to_le_bytes());

        let info = WaveInfo::parse(&spliced).unwrap();
        assert_eq!(info.frame_count, 2);
        assert_eq!(info.samples_i16(&spliced, 1).unwrap(), vec![5, 6]);
    }

    #[test]
    fn test_passthrough_extraction() {
        let wav = make_wav(2, 48000, &[10, -10, 20, -20]);
        let info = WaveInfo::parse(&wav).unwrap();
        assert_eq!(info.samples_i16(&wav, 2).unwrap(), vec![10, -10, 20, -20]);
    }

    #[test]
    fn test_downmix_averages() {
        let wav = make_wav(2, 48000, &[100, 200, -50, 50]);
        let info = WaveInfo::parse(&wav).unwrap();
        assert_eq!(info.samples_i16(&wav, 1).unwrap(), vec![150, 0]);
    }

    #[test]
    fn test_upmix_duplicates() {
        let wav = make_wav(1, 48000, &[7, 8]);
        let info = WaveInfo::parse(&wav).unwrap();
        assert_eq!(info.samples_i16(&wav, 2).unwrap(), vec![7, 7, 8, 8]);
    }
}
