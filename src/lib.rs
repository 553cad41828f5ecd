//! Zupiter Gateway - live vision, voice and haptic assistant
//!
//! This library provides the core functionality for Zupiter:
//! - Live multimodal sessions (microphone audio and video frames out,
//!   synthesized speech and transcripts in)
//! - Gapless scheduling of streamed speech with barge-in interruption
//! - Haptic control codes extracted from assistant speech and sent to a
//!   serial glove
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      Daemon                          │
//! │   Capture  │  Log history  │  Haptic dispatch        │
//! └─────┬───────────────▲───────────────────┬───────────┘
//!       │ audio/frames  │ log events        │ codes
//! ┌─────▼───────────────┴──────┐   ┌────────▼──────────┐
//! │       Session engine        │   │   Actuator link   │
//! │  Transcripts  │  Scheduler  │   │   (serial glove)  │
//! └─────┬───────────────┬──────┘   └───────────────────┘
//!       │               │
//! ┌─────▼──────┐  ┌─────▼──────┐
//! │ Live API   │  │   Mixer    │
//! │ (WebSocket)│  │ (speaker)  │
//! └────────────┘  └────────────┘
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod haptics;
pub mod history;
pub mod live;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use haptics::{ActuatorLink, ControlCode, HapticDispatcher, extract_and_strip};
pub use history::{LogEntry, LogHistory};
pub use live::{LogEvent, Role, SessionEngine, SessionHandle, SessionState};
