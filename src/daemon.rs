//! Daemon - the assistant host
//!
//! Wires microphone and frame capture into the live session, routes its log
//! events through haptic dispatch into the on-screen history, and owns the
//! glove link.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::haptics::{ActuatorLink, ControlCode, HapticDispatcher, PromptPicker, SystemSerial};
use crate::history::LogHistory;
use crate::live::{LogEvent, SessionEngine, SessionHandle, SessionState, WebSocketTransport};
use crate::voice::{AudioCapture, AudioPlayback};
use crate::{Config, Error, Result};

/// Microphone flush interval (100ms of audio per chunk)
const MIC_INTERVAL: Duration = Duration::from_millis(100);

/// The Zupiter daemon - runs one assistant session
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a new daemon instance
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the assistant until interrupted or the session ends
    ///
    /// # Errors
    ///
    /// Returns error if the session cannot be opened or fails
    #[allow(clippy::future_not_send, clippy::too_many_lines)]
    pub async fn run(mut self) -> Result<()> {
        let api_key = self.config.take_api_key()?;
        let transport = Arc::new(WebSocketTransport::new(
            &self.config.live.endpoint,
            api_key,
            self.config.live.outbound_queue,
        )?);

        let mut console = Console::new(self.config.history_limit);

        let playback = AudioPlayback::start_or_headless()?;
        if playback.is_headless() {
            console.record(
                LogEvent::system("Speaker unavailable, replies will be text only."),
                None,
            );
        }

        let mut link = if self.config.serial.enabled {
            open_actuator(&self.config, &mut console).await
        } else {
            None
        };

        let (session, mut events) = SessionEngine::spawn(
            transport,
            self.config.session_profile(),
            playback.mixer().clone(),
        );

        console.record(LogEvent::system("Connecting to live service..."), None);
        let connected = tokio::select! {
            result = session.connect(self.config.live.system_instruction.clone()) => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                session.disconnect().await;
                close_link(link.as_mut()).await;
                return Ok(());
            }
        };

        if let Err(e) = connected {
            console.drain(&mut events, link.as_ref());
            session.disconnect().await;
            close_link(link.as_mut()).await;
            return Err(e);
        }

        let mut capture = if self.config.capture.microphone {
            start_capture(&mut console)
        } else {
            None
        };

        let frame_path = self.config.capture.frame_path.clone();
        let mut frame_tick = tokio::time::interval(self.config.capture.frame_interval);
        frame_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut mic_tick = tokio::time::interval(MIC_INTERVAL);
        mic_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut state = session.subscribe_state();

        tracing::info!(
            microphone = capture.is_some(),
            frames = ?frame_path,
            haptics = link.is_some(),
            "assistant running"
        );

        let outcome = loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown requested");
                    break Ok(());
                }
                Some(event) = events.recv() => {
                    console.record(event, link.as_ref());
                }
                _ = mic_tick.tick(), if capture.is_some() => {
                    if let Some(capture) = capture.as_ref() {
                        stream_microphone(capture, &session);
                    }
                }
                _ = frame_tick.tick(), if frame_path.is_some() => {
                    if let Some(path) = frame_path.as_ref() {
                        stream_frame(path, &session).await;
                    }
                }
                changed = state.changed() => {
                    if changed.is_err() {
                        break Err(Error::Connection("session engine stopped".to_string()));
                    }
                    let current = *state.borrow_and_update();
                    match current {
                        SessionState::Failed => {
                            break Err(Error::Connection("live session failed".to_string()));
                        }
                        SessionState::Idle => break Ok(()),
                        _ => {}
                    }
                }
            }
        };

        if let Some(capture) = capture.as_mut() {
            capture.stop();
        }
        session.disconnect().await;
        console.drain(&mut events, link.as_ref());
        close_link(link.as_mut()).await;

        let stats = session.stats();
        tracing::info!(
            scheduled = stats.scheduled_fragments,
            dropped_fragments = stats.dropped_fragments,
            dropped_outbound = stats.dropped_outbound,
            last_haptic = %console.dispatcher.last(),
            "session ended"
        );

        outcome
    }
}

/// Terminal view of the session log
struct Console {
    history: LogHistory,
    dispatcher: HapticDispatcher,
}

impl Console {
    fn new(limit: usize) -> Self {
        Self {
            history: LogHistory::new(limit),
            dispatcher: HapticDispatcher::new(),
        }
    }

    fn record(&mut self, event: LogEvent, link: Option<&ActuatorLink>) {
        let open_link = link.filter(|link| link.is_open());
        let (event, code) = self.dispatcher.dispatch(event, open_link);
        let entry = self.history.push(event);
        println!("{entry}");

        if let Some(code) = code {
            if open_link.is_none() {
                local_feedback(code);
            }
        }
    }

    fn drain(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<LogEvent>,
        link: Option<&ActuatorLink>,
    ) {
        while let Ok(event) = events.try_recv() {
            self.record(event, link);
        }
    }
}

/// Stand-in for the glove when no link is open
fn local_feedback(code: ControlCode) {
    if code.is_active() {
        // Terminal bell
        print!("\x07");
        println!("           haptic: {code} ({})", code.description());
    }
}

async fn open_actuator(config: &Config, console: &mut Console) -> Option<ActuatorLink> {
    let mut link = ActuatorLink::new(Arc::new(SystemSerial), Arc::new(PromptPicker));
    if let Some(port) = &config.serial.port {
        link = link.with_port(port.clone());
    }

    let port = match link.request_device().await {
        Ok(port) => port,
        Err(Error::UserCancelled) => {
            console.record(LogEvent::system("Haptic glove skipped."), None);
            return None;
        }
        Err(e) => {
            console.record(LogEvent::system(format!("Haptic glove unavailable: {e}")), None);
            return None;
        }
    };

    match link.open(config.serial.baud_rate).await {
        Ok(()) => {
            console.record(LogEvent::system(format!("Haptic glove connected on {port}.")), None);
            Some(link)
        }
        Err(e) => {
            console.record(LogEvent::system(format!("Haptic glove failed: {e}")), None);
            None
        }
    }
}

async fn close_link(link: Option<&mut ActuatorLink>) {
    if let Some(link) = link {
        link.close().await;
    }
}

fn start_capture(console: &mut Console) -> Option<AudioCapture> {
    let started = AudioCapture::new().and_then(|mut capture| {
        capture.start()?;
        Ok(capture)
    });
    match started {
        Ok(capture) => Some(capture),
        Err(e) => {
            tracing::warn!(error = %e, "microphone unavailable");
            console.record(LogEvent::system(format!("Microphone unavailable: {e}")), None);
            None
        }
    }
}

fn stream_microphone(capture: &AudioCapture, session: &SessionHandle) {
    let samples = capture.take_buffer();
    if !samples.is_empty() {
        session.send_audio_chunk(samples);
    }
}

async fn stream_frame(path: &Path, session: &SessionHandle) {
    match tokio::fs::read(path).await {
        Ok(jpeg) if !jpeg.is_empty() => session.send_video_frame(jpeg),
        Ok(_) => tracing::debug!(path = %path.display(), "empty frame, skipping"),
        Err(e) => tracing::debug!(path = %path.display(), error = %e, "frame unreadable"),
    }
}
