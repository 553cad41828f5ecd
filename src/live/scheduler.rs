//! Gapless playback scheduling
//!
//! Each fragment starts at `max(next_start, clock)` and pushes `next_start`
//! forward by its duration, so fragments arriving faster than real time play
//! back to back and slower ones never overlap.

use crate::voice::{AudioBuffer, Mixer, VoiceId};
use crate::{Error, Result};

/// Where a fragment landed on the timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledFragment {
    /// Voice playing the fragment
    pub id: VoiceId,
    /// Start time in seconds on the playback clock
    pub start: f64,
    /// Fragment duration in seconds
    pub duration: f64,
}

impl ScheduledFragment {
    /// End time in seconds
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Schedules decoded fragments onto a [`Mixer`]
#[derive(Debug)]
pub struct PlaybackScheduler {
    mixer: Mixer,
    next_start: f64,
}

impl PlaybackScheduler {
    /// Create a scheduler over `mixer`
    #[must_use]
    pub fn new(mixer: Mixer) -> Self {
        Self {
            mixer,
            next_start: 0.0,
        }
    }

    /// Schedule a decoded fragment
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if the buffer's rate differs from the mixer's
    pub fn schedule(&mut self, buffer: &AudioBuffer) -> Result<ScheduledFragment> {
        let rate = self.mixer.sample_rate();
        if buffer.sample_rate() != rate {
            return Err(Error::Audio(format!(
                "fragment at {}Hz cannot play on a {rate}Hz timeline",
                buffer.sample_rate()
            )));
        }

        let start = self.next_start.max(self.mixer.now());
        let duration = buffer.duration();
        let id = self.mixer.schedule(buffer.to_mono(), start);
        self.next_start = start + duration;

        Ok(ScheduledFragment {
            id,
            start,
            duration,
        })
    }

    /// Stop everything scheduled and rewind the next start offset
    ///
    /// Returns how many fragments were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.mixer.stop_all();
        self.next_start = 0.0;
        stopped
    }

    /// Start offset for the next fragment, before clamping to the clock
    #[must_use]
    pub const fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Fragments scheduled or still playing
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.mixer.active_count()
    }

    /// Underlying timeline
    #[must_use]
    pub const fn mixer(&self) -> &Mixer {
        &self.mixer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(frames: usize, rate: u32) -> AudioBuffer {
        AudioBuffer::new(vec![0.1; frames], rate, 1)
    }

    #[test]
    fn test_back_to_back_when_early() {
        let mut scheduler = PlaybackScheduler::new(Mixer::new(1000, 1));

        let a = scheduler.schedule(&fragment(500, 1000)).unwrap();
        let b = scheduler.schedule(&fragment(250, 1000)).unwrap();

        assert_eq!(a.start, 0.0);
        assert_eq!(b.start, 0.5);
        assert_eq!(scheduler.next_start(), 0.75);
        assert_eq!(scheduler.active_count(), 2);
    }

    #[test]
    fn test_waits_for_clock_when_late() {
        let mixer = Mixer::new(1000, 1);
        let mut scheduler = PlaybackScheduler::new(mixer.clone());

        scheduler.schedule(&fragment(100, 1000)).unwrap();

        // Clock runs past the end of the first fragment
        let mut out = vec![0.0; 300];
        mixer.render(&mut out);

        let late = scheduler.schedule(&fragment(100, 1000)).unwrap();
        assert!((late.start - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_interrupt_rewinds() {
        let mut scheduler = PlaybackScheduler::new(Mixer::new(1000, 1));
        scheduler.schedule(&fragment(500, 1000)).unwrap();
        scheduler.schedule(&fragment(500, 1000)).unwrap();

        assert_eq!(scheduler.interrupt(), 2);
        assert_eq!(scheduler.next_start(), 0.0);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_rate_mismatch_rejected() {
        let mut scheduler = PlaybackScheduler::new(Mixer::new(48000, 1));
        assert!(scheduler.schedule(&fragment(10, 24000)).is_err());
        assert_eq!(scheduler.next_start(), 0.0);
    }
}
