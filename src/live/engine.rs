//! Live session engine
//!
//! The engine is a single task that owns the connection, the transcript
//! accumulators and the playback schedule. [`SessionHandle`]s talk to it over
//! a command queue and observe its state through a watch channel, so every
//! transition and every inbound event is applied in one place.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::event::{InboundEvent, LogEvent, MediaChunk};
use super::protocol::{AUDIO_MIME, IMAGE_MIME, SessionSetup};
use super::scheduler::PlaybackScheduler;
use super::transcript::TranscriptAggregator;
use super::transport::{Connection, Transport};
use crate::voice::{
    Mixer, OUTPUT_SAMPLE_RATE, decode_playable, decode_transport, encode_transport, pcm16_from_f32,
};
use crate::{Error, Result};

/// Capacity of the command queue between handles and the engine
const COMMAND_CAPACITY: usize = 256;

/// Lifecycle of a live session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No session
    Idle,
    /// Waiting for the service to accept the session
    Connecting,
    /// Streaming in both directions
    Active,
    /// Tearing down
    Closing,
    /// The session died; only a disconnect leaves this state
    Failed,
}

impl SessionState {
    /// Lowercase state name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model and voice used for every session the engine opens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProfile {
    /// Model identifier
    pub model: String,
    /// Prebuilt voice name
    pub voice: String,
}

/// Snapshot of session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Audio fragments placed on the playback timeline
    pub scheduled_fragments: u64,
    /// Audio fragments that failed to decode or schedule
    pub dropped_fragments: u64,
    /// Outbound chunks dropped because a queue was full
    pub dropped_outbound: u64,
}

#[derive(Debug, Default)]
struct Counters {
    scheduled_fragments: AtomicU64,
    dropped_fragments: AtomicU64,
    dropped_outbound: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            scheduled_fragments: self.scheduled_fragments.load(Ordering::Relaxed),
            dropped_fragments: self.dropped_fragments.load(Ordering::Relaxed),
            dropped_outbound: self.dropped_outbound.load(Ordering::Relaxed),
        }
    }
}

enum Command {
    Connect {
        system_instruction: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Audio(Vec<f32>),
    Video(Vec<u8>),
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running [`SessionEngine`]
///
/// The engine shuts down, closing any open session, once every handle is
/// dropped.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    counters: Arc<Counters>,
}

impl SessionHandle {
    /// Open a session with the given system instruction
    ///
    /// Resolves once the session is active or has failed.
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyActive` if a session is not idle,
    /// `Error::Connection` if opening fails or is cancelled by a disconnect
    pub async fn connect(&self, system_instruction: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect {
                system_instruction: system_instruction.into(),
                reply,
            })
            .await
            .map_err(|_| engine_gone())?;
        rx.await.map_err(|_| engine_gone())?
    }

    /// Stream a block of 16 kHz mono microphone samples
    ///
    /// Dropped silently unless the session is active.
    pub fn send_audio_chunk(&self, samples: Vec<f32>) {
        if self.state() == SessionState::Active {
            self.enqueue(Command::Audio(samples));
        }
    }

    /// Stream one JPEG frame
    ///
    /// Dropped silently unless the session is active.
    pub fn send_video_frame(&self, jpeg: Vec<u8>) {
        if self.state() == SessionState::Active {
            self.enqueue(Command::Video(jpeg));
        }
    }

    fn enqueue(&self, command: Command) {
        match self.commands.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.counters.dropped_outbound.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("session command queue full, dropping media");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Close the session, cancelling an in-flight connect
    ///
    /// Safe to call in any state and any number of times.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }
}

fn engine_gone() -> Error {
    Error::Connection("session engine stopped".to_string())
}

struct PendingOpen {
    task: JoinHandle<Result<Connection>>,
    reply: oneshot::Sender<Result<()>>,
}

/// The task that owns a live session
pub struct SessionEngine {
    transport: Arc<dyn Transport>,
    profile: SessionProfile,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    events: mpsc::UnboundedSender<LogEvent>,
    counters: Arc<Counters>,
    scheduler: PlaybackScheduler,
    transcript: TranscriptAggregator,
    connection: Option<Connection>,
    pending: Option<PendingOpen>,
    session_id: Option<Uuid>,
}

impl SessionEngine {
    /// Start an engine on the current runtime
    ///
    /// Returns the handle and the stream of log events for the host.
    #[must_use]
    pub fn spawn(
        transport: Arc<dyn Transport>,
        profile: SessionProfile,
        mixer: Mixer,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<LogEvent>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        let engine = Self {
            transport,
            profile,
            state: SessionState::Idle,
            state_tx,
            events: events_tx,
            counters: Arc::clone(&counters),
            scheduler: PlaybackScheduler::new(mixer),
            transcript: TranscriptAggregator::new(),
            connection: None,
            pending: None,
            session_id: None,
        };
        tokio::spawn(engine.run(commands_rx));

        let handle = SessionHandle {
            commands: commands_tx,
            state: state_rx,
            counters,
        };
        (handle, events_rx)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command).await;
                }
                (opened, reply) = wait_open(&mut self.pending) => {
                    self.on_opened(opened, reply);
                }
                event = next_event(&mut self.connection) => {
                    self.on_inbound(event);
                }
            }
        }

        self.teardown().await;
        tracing::debug!("session engine stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                system_instruction,
                reply,
            } => self.begin_connect(system_instruction, reply),
            Command::Audio(samples) => {
                if self.state == SessionState::Active {
                    self.forward(MediaChunk {
                        mime_type: AUDIO_MIME.to_string(),
                        data: encode_transport(&pcm16_from_f32(&samples)),
                    });
                }
            }
            Command::Video(jpeg) => {
                if self.state == SessionState::Active {
                    self.forward(MediaChunk {
                        mime_type: IMAGE_MIME.to_string(),
                        data: encode_transport(&jpeg),
                    });
                }
            }
            Command::Disconnect { reply } => {
                self.teardown().await;
                let _ = reply.send(());
            }
        }
    }

    fn begin_connect(&mut self, system_instruction: String, reply: oneshot::Sender<Result<()>>) {
        if self.state != SessionState::Idle {
            let _ = reply.send(Err(Error::AlreadyActive));
            return;
        }

        self.set_state(SessionState::Connecting);
        let setup = SessionSetup {
            model: self.profile.model.clone(),
            voice: self.profile.voice.clone(),
            system_instruction,
        };
        let transport = Arc::clone(&self.transport);
        let task = tokio::spawn(async move { transport.open(setup).await });
        self.pending = Some(PendingOpen { task, reply });
    }

    fn on_opened(&mut self, result: Result<Connection>, reply: Option<oneshot::Sender<Result<()>>>) {
        if self.state != SessionState::Connecting {
            // A disconnect got here first
            if let Ok(connection) = result {
                tokio::spawn(connection.close());
            }
            if let Some(reply) = reply {
                let _ = reply.send(Err(cancelled()));
            }
            return;
        }

        let outcome = match result {
            Ok(connection) => {
                let id = Uuid::new_v4();
                self.session_id = Some(id);
                self.connection = Some(connection);
                self.set_state(SessionState::Active);
                tracing::info!(session_id = %id, model = %self.profile.model, "live session open");
                self.emit(LogEvent::system("Live link online."));
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "live session failed to open");
                self.set_state(SessionState::Failed);
                self.emit(LogEvent::system(format!("Live link failed: {e}")));
                Err(e)
            }
        };

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }

    fn on_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::SetupComplete => tracing::trace!("duplicate setup acknowledgement"),
            InboundEvent::PartialInput(text) => self.transcript.push_input(&text),
            InboundEvent::PartialOutput(text) => self.transcript.push_output(&text),
            InboundEvent::TurnComplete => {
                for event in self.transcript.complete_turn() {
                    self.emit(event);
                }
            }
            InboundEvent::AudioFragment(payload) => self.play_fragment(&payload),
            InboundEvent::Interrupted => {
                let stopped = self.scheduler.interrupt();
                self.transcript.abandon_output();
                tracing::debug!(stopped, "model interrupted");
            }
            InboundEvent::TransportError { message, fatal } => {
                tracing::warn!(session_id = ?self.session_id, fatal, "live transport error: {message}");
                self.emit(LogEvent::system(format!("Live link error: {message}")));
                if fatal {
                    self.release();
                    self.set_state(SessionState::Failed);
                }
            }
            InboundEvent::TransportClosed { reason } => {
                tracing::info!(session_id = ?self.session_id, reason = ?reason, "live session closed by server");
                let text = reason.map_or_else(
                    || "Live link closed.".to_string(),
                    |reason| format!("Live link closed: {reason}"),
                );
                self.emit(LogEvent::system(text));
                self.release();
                self.set_state(SessionState::Idle);
            }
        }
    }

    fn play_fragment(&mut self, payload: &str) {
        let rate = self.scheduler.mixer().sample_rate();
        let scheduled = decode_transport(payload)
            .and_then(|bytes| decode_playable(&bytes, rate, OUTPUT_SAMPLE_RATE, 1))
            .and_then(|buffer| self.scheduler.schedule(&buffer));

        match scheduled {
            Ok(fragment) => {
                self.counters.scheduled_fragments.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(start = fragment.start, duration = fragment.duration, "fragment scheduled");
            }
            Err(e) => {
                self.counters.dropped_fragments.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(error = %e, "dropping audio fragment");
            }
        }
    }

    fn forward(&self, chunk: MediaChunk) {
        let Some(connection) = self.connection.as_ref() else {
            return;
        };
        match connection.try_send(chunk) {
            Ok(()) => {}
            Err(TrySendError::Full(chunk)) => {
                self.counters.dropped_outbound.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(mime = %chunk.mime_type, "outbound queue full, dropping chunk");
            }
            Err(TrySendError::Closed(_)) => tracing::trace!("outbound queue closed"),
        }
    }

    /// Let go of the connection after the remote side ended it
    fn release(&mut self) {
        if let Some(connection) = self.connection.take() {
            tokio::spawn(connection.close());
        }
        self.scheduler.interrupt();
        self.transcript.reset();
        self.session_id = None;
    }

    async fn teardown(&mut self) {
        if self.state == SessionState::Idle && self.connection.is_none() && self.pending.is_none() {
            return;
        }

        self.set_state(SessionState::Closing);

        if let Some(open) = self.pending.take() {
            open.task.abort();
            let _ = open.reply.send(Err(cancelled()));
            tracing::debug!("cancelled in-flight connect");
        }

        if let Some(connection) = self.connection.take() {
            connection.close().await;
            tracing::info!(session_id = ?self.session_id, "live session closed");
            self.emit(LogEvent::system("Live link closed."));
        }

        self.scheduler.interrupt();
        self.transcript.reset();
        self.session_id = None;
        self.set_state(SessionState::Idle);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "session state");
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn emit(&self, event: LogEvent) {
        let _ = self.events.send(event);
    }
}

fn cancelled() -> Error {
    Error::Connection("connect cancelled".to_string())
}

async fn wait_open(
    pending: &mut Option<PendingOpen>,
) -> (Result<Connection>, Option<oneshot::Sender<Result<()>>>) {
    let Some(open) = pending.as_mut() else {
        return std::future::pending().await;
    };
    let result = match (&mut open.task).await {
        Ok(result) => result,
        Err(e) => Err(Error::Connection(format!("connect task failed: {e}"))),
    };
    (result, pending.take().map(|open| open.reply))
}

async fn next_event(connection: &mut Option<Connection>) -> InboundEvent {
    match connection {
        Some(connection) => connection.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(SessionState::Idle.to_string(), "idle");
        assert_eq!(SessionState::Failed.as_str(), "failed");
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = Counters::default();
        counters.dropped_outbound.fetch_add(2, Ordering::Relaxed);
        counters.scheduled_fragments.fetch_add(1, Ordering::Relaxed);

        assert_eq!(
            counters.snapshot(),
            SessionStats {
                scheduled_fragments: 1,
                dropped_fragments: 0,
                dropped_outbound: 2,
            }
        );
    }
}
