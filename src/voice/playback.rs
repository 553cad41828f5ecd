//! Audio output driving the playback timeline
//!
//! `cpal` streams are not `Send`, so the stream lives on its own thread and
//! pulls from a [`Mixer`] that the session shares.

use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};

use super::Mixer;
use super::codec::OUTPUT_SAMPLE_RATE;
use crate::{Error, Result};

/// Block length rendered by the headless clock
const HEADLESS_BLOCK: Duration = Duration::from_millis(20);

/// Keeps the output device (or headless clock) running for a mixer
pub struct AudioPlayback {
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    mixer: Mixer,
    headless: bool,
}

impl AudioPlayback {
    /// Open the default output device
    ///
    /// Prefers the live service's 24kHz rate (mono, then stereo) and falls
    /// back to the device default; the returned mixer runs at whichever
    /// rate the device accepted.
    ///
    /// # Errors
    ///
    /// Returns error if no output device or stream can be opened
    pub fn start() -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<Mixer>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("zupiter-playback".to_string())
            .spawn(move || {
                let (stream, mixer) = match open_output_stream() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(mixer));

                // Park until the owner goes away
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::debug!("audio playback stopped");
            })
            .map_err(|e| Error::Audio(format!("failed to spawn playback thread: {e}")))?;

        let mixer = ready_rx
            .recv()
            .map_err(|_| Error::Audio("playback thread exited during setup".to_string()))??;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
            mixer,
            headless: false,
        })
    }

    /// Drive a mixer in real time without an output device
    ///
    /// Scheduled audio is rendered into a scratch buffer so the clock keeps
    /// moving and finished voices leave the active set.
    ///
    /// # Errors
    ///
    /// Returns error if the clock thread cannot be spawned
    pub fn headless(sample_rate: u32, channels: u16) -> Result<Self> {
        let mixer = Mixer::new(sample_rate, channels);
        let clock = mixer.clone();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let frames = (u128::from(sample_rate) * HEADLESS_BLOCK.as_millis() / 1000) as usize;
        let mut scratch = vec![0.0_f32; frames * usize::from(channels.max(1))];

        let thread = std::thread::Builder::new()
            .name("zupiter-headless-clock".to_string())
            .spawn(move || {
                while let Err(mpsc::RecvTimeoutError::Timeout) =
                    shutdown_rx.recv_timeout(HEADLESS_BLOCK)
                {
                    clock.render(&mut scratch);
                }
            })
            .map_err(|e| Error::Audio(format!("failed to spawn clock thread: {e}")))?;

        tracing::debug!(sample_rate, channels, "headless playback clock started");

        Ok(Self {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
            mixer,
            headless: true,
        })
    }

    /// Open the default output, or a headless clock when there is none
    ///
    /// # Errors
    ///
    /// Returns error if neither can be started
    pub fn start_or_headless() -> Result<Self> {
        match Self::start() {
            Ok(playback) => Ok(playback),
            Err(e) => {
                tracing::warn!(error = %e, "no audio output, using headless clock");
                Self::headless(OUTPUT_SAMPLE_RATE, 1)
            }
        }
    }

    /// Mixer fed to the output
    #[must_use]
    pub const fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    /// Whether audio is being discarded instead of played
    #[must_use]
    pub const fn is_headless(&self) -> bool {
        self.headless
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Build and start an output stream that renders from a fresh mixer
fn open_output_stream() -> Result<(cpal::Stream, Mixer)> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let config = select_output_config(&device)?;
    let mixer = Mixer::new(config.sample_rate.0, config.channels);
    let render = mixer.clone();

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| render.render(data),
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        "audio playback initialized"
    );

    Ok((stream, mixer))
}

/// Pick an f32 output config, preferring the service output rate
fn select_output_config(device: &cpal::Device) -> Result<StreamConfig> {
    let target = SampleRate(OUTPUT_SAMPLE_RATE);

    let preferred = [1_u16, 2].into_iter().find_map(|channels| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels
                && c.sample_format() == SampleFormat::F32
                && c.min_sample_rate() <= target
                && c.max_sample_rate() >= target
        })
    });

    if let Some(range) = preferred {
        return Ok(range.with_sample_rate(target).config());
    }

    let fallback = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?;
    if fallback.sample_format() != SampleFormat::F32 {
        return Err(Error::Audio(format!(
            "unsupported output sample format {:?}",
            fallback.sample_format()
        )));
    }

    tracing::debug!(
        sample_rate = fallback.sample_rate().0,
        "device lacks 24kHz output, playing at device rate"
    );
    Ok(fallback.config())
}
