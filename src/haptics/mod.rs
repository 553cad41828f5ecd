//! Haptic control codes
//!
//! The assistant embeds one of six `HAPTIC_n` tokens in its speech to drive
//! the glove. Codes are pulled out of finalized assistant utterances only and
//! forwarded to the [`ActuatorLink`].

pub mod serial;

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::live::{LogEvent, Role};
use crate::{Error, Result};

pub use serial::{
    ActuatorLink, LinkState, PortInfo, PortPicker, PromptPicker, SerialBackend, SystemSerial,
};

static CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"HAPTIC_[0-5]").expect("valid regex"));

/// Actuator command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ControlCode {
    /// `HAPTIC_0`: no vibration
    #[default]
    Rest,
    /// `HAPTIC_1`: long smooth vibration
    LongSmooth,
    /// `HAPTIC_2`: short pulse
    ShortPulse,
    /// `HAPTIC_3`: strong vibration
    Strong,
    /// `HAPTIC_4`: medium vibration
    Medium,
    /// `HAPTIC_5`: weak vibration
    Weak,
}

impl ControlCode {
    /// All codes in wire order
    pub const ALL: [Self; 6] = [
        Self::Rest,
        Self::LongSmooth,
        Self::ShortPulse,
        Self::Strong,
        Self::Medium,
        Self::Weak,
    ];

    /// Wire token
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rest => "HAPTIC_0",
            Self::LongSmooth => "HAPTIC_1",
            Self::ShortPulse => "HAPTIC_2",
            Self::Strong => "HAPTIC_3",
            Self::Medium => "HAPTIC_4",
            Self::Weak => "HAPTIC_5",
        }
    }

    /// Physical meaning
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Rest => "no vibration",
            Self::LongSmooth => "long smooth vibration",
            Self::ShortPulse => "short pulse",
            Self::Strong => "strong vibration",
            Self::Medium => "medium vibration",
            Self::Weak => "weak vibration",
        }
    }

    /// Whether the code asks for any vibration at all
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Rest)
    }
}

impl FromStr for ControlCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownCode(s.to_string()))
    }
}

impl std::fmt::Display for ControlCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split an assistant utterance into display text and its control code
///
/// The first code found is returned and every occurrence is removed from the
/// text, which is then trimmed. Text without a code is returned unchanged.
#[must_use]
pub fn extract_and_strip(text: &str) -> (String, Option<ControlCode>) {
    let Some(found) = CODE_PATTERN.find(text) else {
        return (text.to_string(), None);
    };
    let code = found.as_str().parse().ok();
    let stripped = CODE_PATTERN.replace_all(text, "");
    (stripped.trim().to_string(), code)
}

/// Applies control codes from finalized assistant events
#[derive(Debug, Default)]
pub struct HapticDispatcher {
    last: ControlCode,
}

impl HapticDispatcher {
    /// Create a dispatcher showing `HAPTIC_0`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Strip the code from an event and forward it to `link`
    ///
    /// Only assistant events are inspected. Returns the event to display and
    /// the code that was dispatched, if any.
    pub fn dispatch(
        &mut self,
        event: LogEvent,
        link: Option<&ActuatorLink>,
    ) -> (LogEvent, Option<ControlCode>) {
        if event.role != Role::Assistant {
            return (event, None);
        }

        let (text, code) = extract_and_strip(&event.text);
        let Some(code) = code else {
            return (event, None);
        };

        self.last = code;
        match link {
            Some(link) => link.write_line(code.as_str()),
            None => tracing::debug!(code = %code, "no actuator attached"),
        }
        (LogEvent::new(Role::Assistant, text), Some(code))
    }

    /// Most recently dispatched code
    #[must_use]
    pub const fn last(&self) -> ControlCode {
        self.last
    }
}
