//! Live service wire messages
//!
//! Client messages are externally tagged JSON objects (`{"setup": ...}`,
//! `{"realtimeInput": ...}`); server messages carry optional sections that are
//! flattened into [`InboundEvent`]s.

use serde::{Deserialize, Serialize};

use super::event::{InboundEvent, MediaChunk};

/// MIME type of captured microphone audio
pub const AUDIO_MIME: &str = "audio/pcm;rate=16000";

/// MIME type of captured video frames
pub const IMAGE_MIME: &str = "image/jpeg";

/// Fixed parameters of one live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    /// Model identifier (without the `models/` prefix)
    pub model: String,
    /// Prebuilt synthesized voice
    pub voice: String,
    /// System instruction text
    pub system_instruction: String,
}

/// Message sent to the live service
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// First message on a new connection
    Setup(Setup),
    /// Streaming media input
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Build the setup message: audio responses with both transcriptions on
    #[must_use]
    pub fn setup(setup: &SessionSetup) -> Self {
        let model = if setup.model.starts_with("models/") {
            setup.model.clone()
        } else {
            format!("models/{}", setup.model)
        };

        Self::Setup(Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![Modality::Audio],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: setup.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: setup.system_instruction.clone(),
                }],
            },
            input_audio_transcription: TranscriptionConfig {},
            output_audio_transcription: TranscriptionConfig {},
        })
    }

    /// Wrap one media chunk
    #[must_use]
    pub fn media(chunk: MediaChunk) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![chunk],
        })
    }
}

/// Session setup payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    model: String,
    generation_config: GenerationConfig,
    system_instruction: Content,
    input_audio_transcription: TranscriptionConfig,
    output_audio_transcription: TranscriptionConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<Modality>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
enum Modality {
    Audio,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct TextPart {
    text: String,
}

/// Empty object enabling transcription
#[derive(Debug, Serialize)]
struct TranscriptionConfig {}

/// Realtime media payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    media_chunks: Vec<MediaChunk>,
}

/// Message received from the live service
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    go_away: Option<GoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    input_transcription: Option<Transcription>,
    #[serde(default)]
    output_transcription: Option<Transcription>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    model_turn: Option<ModelTurn>,
}

#[derive(Debug, Default, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAway {
    #[serde(default)]
    time_left: Option<String>,
}

impl ServerMessage {
    /// Parse a JSON frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame is not a valid server message
    pub fn parse(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Whether this message acknowledges the setup
    #[must_use]
    pub const fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Flatten into events, preserving the service's field order
    #[must_use]
    pub fn into_events(self) -> Vec<InboundEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(InboundEvent::SetupComplete);
        }

        if let Some(content) = self.server_content {
            if let Some(t) = content.input_transcription {
                if !t.text.is_empty() {
                    events.push(InboundEvent::PartialInput(t.text));
                }
            }
            if let Some(t) = content.output_transcription {
                if !t.text.is_empty() {
                    events.push(InboundEvent::PartialOutput(t.text));
                }
            }
            if content.turn_complete {
                events.push(InboundEvent::TurnComplete);
            }
            if let Some(turn) = content.model_turn {
                events.extend(
                    turn.parts
                        .into_iter()
                        .filter_map(|p| p.inline_data)
                        .filter(|d| {
                            !d.data.is_empty()
                                && d.mime_type.as_deref().is_none_or(|m| m.starts_with("audio/"))
                        })
                        .map(|d| InboundEvent::AudioFragment(d.data)),
                );
            }
            if content.interrupted {
                events.push(InboundEvent::Interrupted);
            }
        }

        if let Some(go_away) = self.go_away {
            let message = go_away.time_left.map_or_else(
                || "server is ending the session soon".to_string(),
                |left| format!("server is ending the session in {left}"),
            );
            events.push(InboundEvent::TransportError {
                message,
                fatal: false,
            });
        }

        events
    }
}
