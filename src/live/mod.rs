//! Live multimodal session
//!
//! Streams microphone audio and video frames to the live service and turns
//! its responses into scheduled speech and turn-level transcript events.

mod engine;
mod event;
pub mod protocol;
mod scheduler;
mod transcript;
mod transport;

pub use engine::{SessionEngine, SessionHandle, SessionProfile, SessionState, SessionStats};
pub use event::{InboundEvent, LogEvent, MediaChunk, Role};
pub use protocol::{AUDIO_MIME, IMAGE_MIME, SessionSetup};
pub use scheduler::{PlaybackScheduler, ScheduledFragment};
pub use transcript::TranscriptAggregator;
pub use transport::{Connection, Transport, WebSocketTransport};
