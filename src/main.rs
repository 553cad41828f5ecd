use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use zupiter_gateway::haptics::{
    ActuatorLink, ControlCode, PromptPicker, SerialBackend, SystemSerial,
};
use zupiter_gateway::live::PlaybackScheduler;
use zupiter_gateway::voice::{
    AudioCapture, AudioPlayback, OUTPUT_SAMPLE_RATE, SAMPLE_RATE, decode_playable,
    pcm16_from_f32, samples_to_wav,
};
use zupiter_gateway::{Config, Daemon};

/// Zupiter - vision, voice and haptic assistant
#[derive(Parser)]
#[command(name = "zupiter", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// System instruction file (replaces the built-in instruction)
    #[arg(long)]
    instruction_file: Option<PathBuf>,

    /// JPEG file streamed as the video feed
    #[arg(long)]
    frame: Option<PathBuf>,

    /// Serial port of the haptic glove (skips the selection prompt)
    #[arg(long)]
    port: Option<String>,

    /// Run without the haptic glove
    #[arg(long)]
    no_haptics: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Save the recording as a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output through the playback scheduler
    TestSpeaker,
    /// List serial ports
    ListPorts,
    /// Send one haptic code to the glove
    Haptic {
        /// Code to send (`HAPTIC_0` to `HAPTIC_5`)
        code: String,
        /// Line rate
        #[arg(short, long)]
        baud: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,zupiter_gateway=info",
        1 => "info,zupiter_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;

    // Flags override the environment and the config file
    if let Some(path) = &cli.instruction_file {
        config.live.system_instruction = zupiter_gateway::config::load_instruction(path)?;
    }
    if let Some(frame) = cli.frame {
        config.capture.frame_path = Some(frame);
    }
    if let Some(port) = cli.port {
        config.serial.port = Some(port);
    }
    if cli.no_haptics {
        config.serial.enabled = false;
    }

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, output } => test_mic(duration, output.as_deref()).await,
            Command::TestSpeaker => test_speaker().await,
            Command::ListPorts => list_ports(),
            Command::Haptic { code, baud } => send_haptic(&config, &code, baud).await,
        };
    }

    tracing::info!(
        model = %config.live.model,
        voice = %config.live.voice,
        haptics = config.serial.enabled,
        "starting zupiter"
    );
    tracing::debug!(?config, "loaded configuration");

    Daemon::new(config).run().await?;

    Ok(())
}

/// Record from the microphone, showing a level meter once per second
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, output: Option<&std::path::Path>) -> anyhow::Result<()> {
    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!(
        "Recording {duration}s from the default input ({} Hz device, sent at {SAMPLE_RATE} Hz)",
        capture.device_sample_rate()
    );

    let mut recording = Vec::new();
    let mut loudest = f32::NEG_INFINITY;
    for second in 1..=duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let block = capture.take_buffer();
        let level = level_dbfs(&block);
        loudest = loudest.max(level);
        println!("{second:>3}s {level:>6.1} dBFS |{:<40}|", meter(level));

        recording.extend(block);
    }

    capture.stop();

    if let Some(path) = output {
        std::fs::write(path, samples_to_wav(&recording, SAMPLE_RATE)?)?;
        println!("Wrote {} samples to {}", recording.len(), path.display());
    }

    if loudest < SILENCE_DBFS {
        println!("No signal above {SILENCE_DBFS} dBFS; check the default source with `pactl info`");
    }

    Ok(())
}

/// Level below which a block counts as silence
const SILENCE_DBFS: f32 = -60.0;

/// RMS level in dBFS, `-inf` for an empty or silent block
#[allow(clippy::cast_precision_loss)]
fn level_dbfs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return f32::NEG_INFINITY;
    }
    let mean_square = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    10.0 * mean_square.log10()
}

/// Bar scaled from `SILENCE_DBFS` to full scale
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn meter(level: f32) -> String {
    let filled = ((level - SILENCE_DBFS) / -SILENCE_DBFS * 40.0).clamp(0.0, 40.0) as usize;
    "#".repeat(filled)
}

/// Test speaker output with back-to-back tones
///
/// Tones go through the same decode and scheduling path as live replies, so
/// any gap between them is audible.
#[allow(clippy::cast_precision_loss, clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Playing four rising tones back to back; any gap is a scheduling fault");

    let playback = AudioPlayback::start_or_headless()?;
    let mixer = playback.mixer().clone();
    let mut scheduler = PlaybackScheduler::new(mixer.clone());

    for frequency in [330.0_f32, 392.0, 440.0, 523.0] {
        let samples: Vec<f32> = (0..OUTPUT_SAMPLE_RATE / 2)
            .map(|i| {
                let t = i as f32 / OUTPUT_SAMPLE_RATE as f32;
                (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
            })
            .collect();

        let pcm = pcm16_from_f32(&samples);
        let buffer = decode_playable(&pcm, mixer.sample_rate(), OUTPUT_SAMPLE_RATE, 1)?;
        let fragment = scheduler.schedule(&buffer)?;
        println!(
            "{frequency:>5} Hz at {:.2}s for {:.2}s",
            fragment.start, fragment.duration
        );
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while scheduler.active_count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if playback.is_headless() {
        println!("No output device found; tones ran on the headless clock");
    } else if scheduler.active_count() > 0 {
        println!("Playback did not drain; check the default sink with `pactl info`");
    }

    Ok(())
}

/// List serial ports
fn list_ports() -> anyhow::Result<()> {
    let ports = SystemSerial.available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

/// Send one haptic code
async fn send_haptic(config: &Config, code: &str, baud: Option<u32>) -> anyhow::Result<()> {
    let code: ControlCode = code.parse()?;

    let mut link = ActuatorLink::new(Arc::new(SystemSerial), Arc::new(PromptPicker));
    if let Some(port) = &config.serial.port {
        link = link.with_port(port.clone());
    }

    let port = link.request_device().await?;
    link.open(baud.unwrap_or(config.serial.baud_rate)).await?;
    link.write_line(code.as_str());
    link.close().await;

    println!("Sent {code} ({}) to {port}", code.description());
    Ok(())
}
