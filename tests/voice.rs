//! Voice pipeline integration tests
//!
//! Tests codec, timeline and scheduling without requiring audio hardware

use std::io::Cursor;
use std::time::{Duration, Instant};

use zupiter_gateway::live::PlaybackScheduler;
use zupiter_gateway::voice::{
    AudioBuffer, AudioPlayback, Mixer, OUTPUT_SAMPLE_RATE, SAMPLE_RATE, decode_playable,
    decode_transport, encode_transport, pcm16_from_f32, samples_to_wav, to_speech_format,
};

/// Generate sine wave audio samples
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn generate_sine_samples(rate: u32, frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / rate as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

fn constant(frames: usize) -> AudioBuffer {
    AudioBuffer::new(vec![0.5; frames], 1000, 1)
}

#[test]
fn test_transport_roundtrip_of_speech() {
    let samples = generate_sine_samples(SAMPLE_RATE, 440.0, 0.1, 0.5);
    let pcm = pcm16_from_f32(&samples);

    let text = encode_transport(&pcm);
    assert_eq!(decode_transport(&text).unwrap(), pcm);
}

#[test]
fn test_service_audio_decodes_at_output_rate() {
    let samples = generate_sine_samples(OUTPUT_SAMPLE_RATE, 220.0, 0.5, 0.5);
    let payload = encode_transport(&pcm16_from_f32(&samples));

    let bytes = decode_transport(&payload).unwrap();
    let buffer = decode_playable(&bytes, OUTPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, 1).unwrap();

    assert_eq!(buffer.frames(), samples.len());
    assert!((buffer.duration() - 0.5).abs() < 1e-9);
    for (decoded, original) in buffer.samples().iter().zip(&samples) {
        assert!((decoded - original).abs() < 1e-3);
    }
}

#[test]
fn test_service_audio_resampled_for_device() {
    let samples = generate_sine_samples(OUTPUT_SAMPLE_RATE, 220.0, 0.25, 0.5);
    let buffer =
        decode_playable(&pcm16_from_f32(&samples), 44100, OUTPUT_SAMPLE_RATE, 1).unwrap();

    assert_eq!(buffer.sample_rate(), 44100);
    assert!((buffer.duration() - 0.25).abs() < 1e-3);

    // Resampled speech still schedules on a device-rate timeline
    let mut scheduler = PlaybackScheduler::new(Mixer::new(44100, 2));
    let fragment = scheduler.schedule(&buffer).unwrap();
    assert!((fragment.duration - buffer.duration()).abs() < f64::EPSILON);
}

/// Fragments arriving no later than their predecessor's end play back to
/// back: the scheduled span is the sum of durations with no gap or overlap.
#[test]
fn test_gapless_under_jitter() {
    let mixer = Mixer::new(1000, 1);
    let mut scheduler = PlaybackScheduler::new(mixer.clone());

    let durations = [200_usize, 50, 300, 120];
    let gaps = [150_usize, 40, 250];
    let mut timeline = Vec::new();

    for (i, &frames) in durations.iter().enumerate() {
        scheduler.schedule(&constant(frames)).unwrap();
        if let Some(&gap) = gaps.get(i) {
            let mut block = vec![0.0; gap];
            mixer.render(&mut block);
            timeline.extend(block);
        }
    }

    let total: usize = durations.iter().sum();
    let mut tail = vec![0.0; total + 100 - timeline.len()];
    mixer.render(&mut tail);
    timeline.extend(tail);

    // Exactly one voice at every instant of the span, silence after
    assert!(timeline[..total].iter().all(|s| (*s - 0.5).abs() < 1e-6));
    assert!(timeline[total..].iter().all(|s| *s == 0.0));
    assert_eq!(mixer.active_count(), 0);
}

#[test]
fn test_late_fragment_waits_for_clock_not_offset() {
    let mixer = Mixer::new(1000, 1);
    let mut scheduler = PlaybackScheduler::new(mixer.clone());

    scheduler.schedule(&constant(100)).unwrap();
    let mut idle = vec![0.0; 400];
    mixer.render(&mut idle);

    let late = scheduler.schedule(&constant(100)).unwrap();
    assert!((late.start - 0.4).abs() < 1e-9);
    assert!((scheduler.next_start() - 0.5).abs() < 1e-9);
}

#[test]
fn test_interrupt_then_resume_from_clock() {
    let mixer = Mixer::new(1000, 1);
    let mut scheduler = PlaybackScheduler::new(mixer.clone());

    for _ in 0..3 {
        scheduler.schedule(&constant(500)).unwrap();
    }
    let mut played = vec![0.0; 100];
    mixer.render(&mut played);

    assert_eq!(scheduler.interrupt(), 3);
    assert_eq!(scheduler.next_start(), 0.0);

    let mut silence = vec![1.0; 50];
    mixer.render(&mut silence);
    assert!(silence.iter().all(|s| *s == 0.0));

    let resumed = scheduler.schedule(&constant(10)).unwrap();
    assert!((resumed.start - 0.15).abs() < 1e-9);
}

#[test]
fn test_stereo_capture_downmixed() {
    let left = generate_sine_samples(48000, 300.0, 0.1, 0.4);
    let interleaved: Vec<f32> = left.iter().flat_map(|s| [*s, *s]).collect();

    let speech = to_speech_format(&interleaved, 2, 48000).unwrap();
    assert_eq!(speech.len(), 1600);
}

#[test]
fn test_samples_to_wav() {
    let samples = generate_sine_samples(SAMPLE_RATE, 440.0, 0.1, 0.5);
    let wav_data = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    // Check WAV header magic
    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");

    // WAV should have reasonable size
    assert!(wav_data.len() > 44); // WAV header is 44 bytes
}

#[test]
fn test_wav_roundtrip() {
    let original_samples: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
    let wav_data = samples_to_wav(&original_samples, SAMPLE_RATE).unwrap();

    let mut reader = hound::WavReader::new(Cursor::new(wav_data)).unwrap();

    let spec = reader.spec();
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.channels, 1);

    let read_samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read_samples.len(), original_samples.len());
}

#[test]
fn test_headless_clock_drains_schedule() {
    let playback = AudioPlayback::headless(OUTPUT_SAMPLE_RATE, 1).unwrap();
    assert!(playback.is_headless());

    let mut scheduler = PlaybackScheduler::new(playback.mixer().clone());
    let tone = generate_sine_samples(OUTPUT_SAMPLE_RATE, 440.0, 0.1, 0.3);
    let buffer =
        decode_playable(&pcm16_from_f32(&tone), OUTPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, 1).unwrap();
    scheduler.schedule(&buffer).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while scheduler.active_count() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(scheduler.active_count(), 0);
    assert!(playback.mixer().now() >= 0.1);
}
