//! Timeline mixer shared between the session and the output device
//!
//! The mixer owns the playback clock (frames rendered so far) and the set of
//! voices scheduled on it. The output callback advances the clock through
//! [`Mixer::render`]; the session schedules and stops voices from its own task.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Identifier of a scheduled voice
pub type VoiceId = u64;

/// A mono sample run placed at a fixed frame on the timeline
#[derive(Debug)]
struct Voice {
    id: VoiceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

#[derive(Debug)]
struct MixerState {
    sample_rate: u32,
    channels: u16,
    frames_rendered: u64,
    next_id: VoiceId,
    voices: Vec<Voice>,
}

/// Clonable handle to the playback timeline
#[derive(Debug, Clone)]
pub struct Mixer {
    state: Arc<Mutex<MixerState>>,
}

impl Mixer {
    /// Create a mixer for an output running at `sample_rate` with `channels`
    #[must_use]
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(MixerState {
                sample_rate,
                channels: channels.max(1),
                frames_rendered: 0,
                next_id: 1,
                voices: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MixerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Output sample rate
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    /// Output channel count
    #[must_use]
    pub fn channels(&self) -> u16 {
        self.lock().channels
    }

    /// Current playback clock in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn now(&self) -> f64 {
        let state = self.lock();
        state.frames_rendered as f64 / f64::from(state.sample_rate)
    }

    /// Place mono samples on the timeline at `start_at` seconds
    ///
    /// A start time already in the past begins at the current clock.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn schedule(&self, samples: Vec<f32>, start_at: f64) -> VoiceId {
        let mut state = self.lock();
        let requested = (start_at.max(0.0) * f64::from(state.sample_rate)).round() as u64;
        let start_frame = requested.max(state.frames_rendered);

        let id = state.next_id;
        state.next_id += 1;

        tracing::trace!(id, start_frame, frames = samples.len(), "voice scheduled");
        state.voices.push(Voice {
            id,
            start_frame,
            samples,
        });
        id
    }

    /// Stop a single voice; returns whether it was still active
    pub fn stop(&self, id: VoiceId) -> bool {
        let mut state = self.lock();
        let before = state.voices.len();
        state.voices.retain(|v| v.id != id);
        state.voices.len() != before
    }

    /// Stop every voice; returns how many were stopped
    pub fn stop_all(&self) -> usize {
        let mut state = self.lock();
        let stopped = state.voices.len();
        state.voices.clear();
        stopped
    }

    /// Whether a voice is scheduled or still playing
    #[must_use]
    pub fn is_active(&self, id: VoiceId) -> bool {
        self.lock().voices.iter().any(|v| v.id == id)
    }

    /// Number of scheduled or playing voices
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().voices.len()
    }

    /// Render the next block of interleaved output and advance the clock
    ///
    /// Voices that finish inside the block are removed from the active set.
    #[allow(clippy::cast_possible_truncation)]
    pub fn render(&self, out: &mut [f32]) {
        let mut state = self.lock();
        let channels = usize::from(state.channels);
        let frames = out.len() / channels;
        let block_start = state.frames_rendered;
        let block_end = block_start + frames as u64;

        out.fill(0.0);

        for voice in &state.voices {
            let from = voice.start_frame.max(block_start);
            let to = voice.end_frame().min(block_end);
            for frame in from..to {
                let sample = voice.samples[(frame - voice.start_frame) as usize];
                let offset = (frame - block_start) as usize * channels;
                for slot in &mut out[offset..offset + channels] {
                    *slot += sample;
                }
            }
        }

        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }

        state.frames_rendered = block_end;
        state.voices.retain(|v| v.end_frame() > block_end);
    }
}
