//! Audio capture from microphone

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig};

use super::codec::resample;
use crate::{Error, Result};

/// Sample rate sent to the live service (16kHz mono speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Captures audio from the default input device as 16kHz mono
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// Uses a native 16kHz mono config when the device has one; otherwise
    /// captures at the device default and converts on [`Self::take_buffer`].
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let native = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.sample_format() == SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            });

        let config = if let Some(range) = native {
            range.with_sample_rate(SampleRate(SAMPLE_RATE)).config()
        } else {
            let default = device
                .default_input_config()
                .map_err(|e| Error::Audio(e.to_string()))?;
            if default.sample_format() != SampleFormat::F32 {
                return Err(Error::Audio(format!(
                    "unsupported input sample format {:?}",
                    default.sample_format()
                )));
            }
            default.config()
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Take everything captured since the last call as 16kHz mono
    ///
    /// Returns an empty vector if conversion fails; the failed block is
    /// dropped rather than retried.
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        let raw = self
            .buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();

        match to_speech_format(&raw, self.config.channels, self.config.sample_rate.0) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::debug!(error = %e, "dropping capture block");
                Vec::new()
            }
        }
    }

    /// Number of raw samples waiting in the buffer
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.lock().map(|buf| buf.len()).unwrap_or_default()
    }

    /// Clear the audio buffer
    pub fn clear_buffer(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Device sample rate before conversion
    #[must_use]
    pub const fn device_sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

/// Downmix interleaved samples and resample them to [`SAMPLE_RATE`]
///
/// # Errors
///
/// Returns error if resampling fails
pub fn to_speech_format(samples: &[f32], channels: u16, sample_rate: u32) -> Result<Vec<f32>> {
    let mono: Vec<f32> = if channels <= 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(usize::from(channels))
            .map(|frame| frame.iter().sum::<f32>() / f32::from(channels))
            .collect()
    };

    resample(&mono, sample_rate, SAMPLE_RATE)
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
