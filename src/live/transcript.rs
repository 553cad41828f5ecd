//! Turn-level transcript aggregation

use super::event::{LogEvent, Role};

/// Accumulates partial transcripts for the user and the assistant
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    input: String,
    output: String,
}

impl TranscriptAggregator {
    /// Create empty accumulators
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment of the user's speech
    pub fn push_input(&mut self, fragment: &str) {
        self.input.push_str(fragment);
    }

    /// Append a fragment of the assistant's speech
    pub fn push_output(&mut self, fragment: &str) {
        self.output.push_str(fragment);
    }

    /// Flush both accumulators at a turn boundary
    ///
    /// Input is flushed before output. An accumulator that is blank after
    /// trimming emits nothing and is left as is.
    pub fn complete_turn(&mut self) -> Vec<LogEvent> {
        let mut flushed = Vec::with_capacity(2);
        if let Some(text) = take_trimmed(&mut self.input) {
            flushed.push(LogEvent::new(Role::User, text));
        }
        if let Some(text) = take_trimmed(&mut self.output) {
            flushed.push(LogEvent::new(Role::Assistant, text));
        }
        flushed
    }

    /// Drop the in-progress assistant utterance without logging it
    pub fn abandon_output(&mut self) {
        self.output.clear();
    }

    /// Drop everything
    pub fn reset(&mut self) {
        self.input.clear();
        self.output.clear();
    }

    /// Pending user text
    #[must_use]
    pub fn pending_input(&self) -> &str {
        &self.input
    }

    /// Pending assistant text
    #[must_use]
    pub fn pending_output(&self) -> &str {
        &self.output
    }
}

fn take_trimmed(buffer: &mut String) -> Option<String> {
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return None;
    }
    let text = trimmed.to_string();
    buffer.clear();
    Some(text)
}
