//! Voice processing module
//!
//! Handles microphone capture, the PCM transport codec, and the playback
//! timeline that live-session audio is scheduled on.

mod capture;
pub mod codec;
mod mixer;
mod playback;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav, to_speech_format};
pub use codec::{
    AudioBuffer, OUTPUT_SAMPLE_RATE, decode_playable, decode_transport, encode_transport,
    pcm16_from_f32,
};
pub use mixer::{Mixer, VoiceId};
pub use playback::AudioPlayback;
