//! Events flowing in and out of a live session

use serde::{Deserialize, Serialize};

/// Who a log-worthy event is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Connection lifecycle and errors
    System,
    /// Transcribed microphone speech
    User,
    /// Transcribed model speech
    Assistant,
}

impl Role {
    /// Lowercase role name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Event handed to the host for display and logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Attributed role
    pub role: Role,
    /// Event text
    pub text: String,
}

impl LogEvent {
    /// Create a log event
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    /// Shorthand for a system-role event
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }
}

/// Inbound event from the remote service, in transport delivery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Server accepted the session setup
    SetupComplete,
    /// Partial transcript of the user's speech
    PartialInput(String),
    /// Partial transcript of the model's speech
    PartialOutput(String),
    /// The current turn ended
    TurnComplete,
    /// Transport-encoded slice of synthesized speech
    AudioFragment(String),
    /// The user barged in; pending model audio must stop
    Interrupted,
    /// Transport or protocol error
    TransportError {
        /// Human-readable description
        message: String,
        /// Whether the connection can no longer be used
        fatal: bool,
    },
    /// The remote side closed the session
    TransportClosed {
        /// Close reason, if the server sent one
        reason: Option<String>,
    },
}

/// Outbound media blob, already encoded for the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    /// MIME type, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
    /// Base64 payload
    pub data: String,
}
