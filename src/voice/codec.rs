//! PCM and transport encoding for the live stream
//!
//! Captured audio leaves as base64 text wrapping 16-bit little-endian PCM;
//! synthesized speech arrives the same way at [`OUTPUT_SAMPLE_RATE`].

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::{Error, Result};

/// Sample rate of synthesized speech sent by the live service
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Frames per resampler block
const RESAMPLE_CHUNK: usize = 1024;

/// Encode bytes for transport
#[must_use]
pub fn encode_transport(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode transport text back to bytes
///
/// # Errors
///
/// Returns `Error::Decode` if the text is not valid base64
pub fn decode_transport(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| Error::Decode(format!("invalid transport encoding: {e}")))
}

/// Convert float samples in `[-1.0, 1.0]` to 16-bit little-endian PCM bytes
#[must_use]
pub fn pcm16_from_f32(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decoded audio ready for the playback timeline
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved samples
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    /// Wrap interleaved samples
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels: channels.max(1),
        }
    }

    /// Interleaved samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count
    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel)
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    /// Duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Average all channels into one
    #[must_use]
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels == 1 {
            return self.samples.clone();
        }
        let channels = usize::from(self.channels);
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / f32::from(self.channels))
            .collect()
    }
}

/// Decode a 16-bit PCM payload into a playable buffer
///
/// The payload is read as little-endian samples at `output_rate` and
/// normalized to `[-1.0, 1.0)`. When `context_rate` differs the buffer is
/// resampled so it plays at the right speed on the output device.
///
/// # Errors
///
/// Returns `Error::Decode` for empty or truncated payloads
pub fn decode_playable(
    bytes: &[u8],
    context_rate: u32,
    output_rate: u32,
    channels: u16,
) -> Result<AudioBuffer> {
    if bytes.is_empty() {
        return Err(Error::Decode("empty audio payload".to_string()));
    }
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "odd byte count {} for 16-bit PCM",
            bytes.len()
        )));
    }
    if channels == 0 || output_rate == 0 || context_rate == 0 {
        return Err(Error::Decode("invalid audio format".to_string()));
    }

    let channel_count = usize::from(channels);
    let frame_bytes = 2 * channel_count;
    if bytes.len() % frame_bytes != 0 {
        return Err(Error::Decode(format!(
            "payload of {} bytes is not a whole number of {channels}-channel frames",
            bytes.len()
        )));
    }

    let samples: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();

    if context_rate == output_rate {
        return Ok(AudioBuffer::new(samples, output_rate, channels));
    }

    // Resample each channel separately, then re-interleave
    let resampled: Vec<Vec<f32>> = (0..channel_count)
        .map(|c| {
            let lane: Vec<f32> = samples
                .iter()
                .skip(c)
                .step_by(channel_count)
                .copied()
                .collect();
            resample(&lane, output_rate, context_rate)
        })
        .collect::<Result<_>>()?;

    let frames = resampled.first().map_or(0, Vec::len);
    let mut interleaved = Vec::with_capacity(frames * channel_count);
    for i in 0..frames {
        for lane in &resampled {
            interleaved.push(lane[i]);
        }
    }

    Ok(AudioBuffer::new(interleaved, context_rate, channels))
}

/// Resample a mono signal using rubato
///
/// The resampler's output delay is trimmed so consecutive fragments line up
/// without a gap, and the result has exactly `len * to / from` frames.
///
/// # Errors
///
/// Returns `Error::Audio` if the resampler cannot be built or fails
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let delay = resampler.output_delay();
    let expected =
        (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;

    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    let mut position = 0;

    // Feed zero padding past the end until the delayed tail is flushed out
    while output.len() < expected + delay {
        let needed = resampler.input_frames_next();
        let mut block = vec![0.0_f32; needed];
        if position < samples.len() {
            let end = (position + needed).min(samples.len());
            block[..end - position].copy_from_slice(&samples[position..end]);
        }
        position += needed;

        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    output.drain(..delay);
    output.truncate(expected);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_roundtrip() {
        let bytes: Vec<u8> = (0..=255).collect();
        let text = encode_transport(&bytes);
        assert_eq!(decode_transport(&text).unwrap(), bytes);

        assert_eq!(encode_transport(&[]), "");
        assert!(decode_transport("").unwrap().is_empty());
    }

    #[test]
    fn test_decode_transport_rejects_garbage() {
        assert!(matches!(decode_transport("not base64!!"), Err(Error::Decode(_))));
    }

    #[test]
    fn test_decode_playable_normalizes() {
        let mut bytes = Vec::new();
        for value in [0_i16, 16384, -32768, 32767] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        let buffer = decode_playable(&bytes, 24000, 24000, 1).unwrap();
        assert_eq!(buffer.frames(), 4);
        assert_eq!(buffer.sample_rate(), 24000);
        assert_eq!(buffer.samples()[0], 0.0);
        assert_eq!(buffer.samples()[1], 0.5);
        assert_eq!(buffer.samples()[2], -1.0);
        assert!(buffer.samples()[3] < 1.0);
    }

    #[test]
    fn test_decode_playable_rejects_malformed() {
        assert!(matches!(decode_playable(&[], 24000, 24000, 1), Err(Error::Decode(_))));
        assert!(matches!(
            decode_playable(&[1, 2, 3], 24000, 24000, 1),
            Err(Error::Decode(_))
        ));
        // Two bytes is one sample, not a whole stereo frame
        assert!(matches!(
            decode_playable(&[1, 2], 24000, 24000, 2),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_duration() {
        let buffer = AudioBuffer::new(vec![0.0; 12000], 24000, 1);
        assert!((buffer.duration() - 0.5).abs() < f64::EPSILON);

        let stereo = AudioBuffer::new(vec![0.0; 48000], 24000, 2);
        assert!((stereo.duration() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_decode_resamples_to_context_rate() {
        let bytes = pcm16_from_f32(&vec![0.25; 2400]);
        let buffer = decode_playable(&bytes, 48000, 24000, 1).unwrap();

        assert_eq!(buffer.sample_rate(), 48000);
        assert_eq!(buffer.frames(), 4800);
        assert!((buffer.duration() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_pcm16_clamps() {
        let bytes = pcm16_from_f32(&[2.0, -2.0, 0.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -32767);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), 0);
    }

    #[test]
    fn test_to_mono_averages() {
        let buffer = AudioBuffer::new(vec![1.0, 0.0, 0.5, 0.5], 24000, 2);
        assert_eq!(buffer.to_mono(), vec![0.5, 0.5]);
    }
}
