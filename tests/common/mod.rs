//! Shared test utilities

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use zupiter_gateway::live::{
    Connection, InboundEvent, MediaChunk, SessionEngine, SessionHandle, SessionProfile,
    SessionSetup, Transport,
};
use zupiter_gateway::voice::{Mixer, OUTPUT_SAMPLE_RATE, encode_transport, pcm16_from_f32};
use zupiter_gateway::{Error, LogEvent, Result};

/// In-process stand-in for the live service
#[derive(Default)]
pub struct MockTransport {
    setups: Mutex<Vec<SessionSetup>>,
    sent: Arc<Mutex<Vec<MediaChunk>>>,
    inbound: Mutex<Option<mpsc::Sender<InboundEvent>>>,
    held: Mutex<Vec<mpsc::Receiver<MediaChunk>>>,
    fail: Option<String>,
    gate: Option<Arc<Notify>>,
    stalled: bool,
    lingering: bool,
    capacity: usize,
}

impl MockTransport {
    /// Accepts every session and records sent chunks
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            capacity: 64,
            ..Default::default()
        })
    }

    /// Refuses every session
    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            fail: Some(message.to_string()),
            capacity: 64,
            ..Default::default()
        })
    }

    /// Holds every open until the returned gate is notified
    pub fn gated() -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(Self {
            gate: Some(Arc::clone(&gate)),
            capacity: 64,
            ..Default::default()
        });
        (transport, gate)
    }

    /// Never drains its outbound queue of `capacity`
    pub fn stalled(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            stalled: true,
            capacity,
            ..Default::default()
        })
    }

    /// Connections whose sender never finishes, so closing waits out its timeout
    pub fn lingering() -> Arc<Self> {
        Arc::new(Self {
            lingering: true,
            capacity: 64,
            ..Default::default()
        })
    }

    /// Deliver an event on the current connection
    pub async fn push(&self, event: InboundEvent) {
        let sender = self.inbound.lock().unwrap().clone();
        sender
            .expect("no open connection")
            .send(event)
            .await
            .expect("engine dropped the connection");
    }

    /// End the current connection's inbound stream
    pub fn hang_up(&self) {
        self.inbound.lock().unwrap().take();
    }

    /// Chunks that reached the service
    pub fn sent(&self) -> Vec<MediaChunk> {
        self.sent.lock().unwrap().clone()
    }

    /// Setups received, one per open attempt
    pub fn setups(&self) -> Vec<SessionSetup> {
        self.setups.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, setup: SessionSetup) -> Result<Connection> {
        self.setups.lock().unwrap().push(setup);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(message) = &self.fail {
            return Err(Error::Connection(message.clone()));
        }

        let (out_tx, mut out_rx) = mpsc::channel(self.capacity);
        let (in_tx, in_rx) = mpsc::channel(64);
        *self.inbound.lock().unwrap() = Some(in_tx);

        if self.stalled {
            self.held.lock().unwrap().push(out_rx);
        } else {
            let sent = Arc::clone(&self.sent);
            tokio::spawn(async move {
                while let Some(chunk) = out_rx.recv().await {
                    sent.lock().unwrap().push(chunk);
                }
            });
        }

        let connection = Connection::new(out_tx, in_rx);
        if self.lingering {
            let sender = tokio::spawn(std::future::pending::<()>());
            let reader = tokio::spawn(std::future::pending::<()>());
            return Ok(connection.with_tasks(sender, reader));
        }
        Ok(connection)
    }
}

/// Profile used by every test session
pub fn profile() -> SessionProfile {
    SessionProfile {
        model: "gemini-live-test".to_string(),
        voice: "Zephyr".to_string(),
    }
}

/// Spawn an engine over `transport` with an unclocked 24kHz mixer
pub fn spawn_engine(
    transport: Arc<MockTransport>,
) -> (SessionHandle, mpsc::UnboundedReceiver<LogEvent>, Mixer) {
    let mixer = Mixer::new(OUTPUT_SAMPLE_RATE, 1);
    let (handle, events) = SessionEngine::spawn(transport, profile(), mixer.clone());
    (handle, events, mixer)
}

/// Base64 PCM fragment of `frames` samples at the service rate
pub fn speech_fragment(frames: usize) -> String {
    encode_transport(&pcm16_from_f32(&vec![0.25; frames]))
}

/// Wait for the next log event
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<LogEvent>) -> LogEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
