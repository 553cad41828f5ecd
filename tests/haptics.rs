//! Haptic dispatch integration tests
//!
//! Drives the dispatcher and actuator link against an in-memory serial port

use std::io::Write;
use std::sync::{Arc, Mutex};

use zupiter_gateway::haptics::{LinkState, PortInfo, PortPicker, SerialBackend};
use zupiter_gateway::{
    ActuatorLink, ControlCode, HapticDispatcher, LogEvent, LogHistory, Result, Role,
    extract_and_strip,
};

#[derive(Clone, Default)]
struct Wire(Arc<Mutex<Vec<u8>>>);

impl Wire {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for Wire {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct Glove(Wire);

impl SerialBackend for Glove {
    fn available_ports(&self) -> Result<Vec<PortInfo>> {
        Ok(vec![PortInfo {
            name: "/dev/ttyUSB0".to_string(),
            description: "CH340 serial".to_string(),
        }])
    }

    fn open(&self, _port: &str, _baud_rate: u32) -> Result<Box<dyn Write + Send>> {
        Ok(Box::new(self.0.clone()))
    }
}

struct Unprompted;

impl PortPicker for Unprompted {
    fn pick(&self, _ports: &[PortInfo]) -> Result<Option<String>> {
        panic!("preferred port should skip the prompt");
    }
}

async fn open_link(wire: &Wire) -> ActuatorLink {
    let mut link = ActuatorLink::new(Arc::new(Glove(wire.clone())), Arc::new(Unprompted))
        .with_port("/dev/ttyUSB0");
    link.request_device().await.unwrap();
    link.open(9600).await.unwrap();
    link
}

#[test]
fn test_documented_utterances() {
    assert_eq!(
        extract_and_strip("Obstacle ahead. HAPTIC_3"),
        ("Obstacle ahead.".to_string(), Some(ControlCode::Strong))
    );
    assert_eq!(
        extract_and_strip("HAPTIC_2 step down HAPTIC_2"),
        ("step down".to_string(), Some(ControlCode::ShortPulse))
    );
    assert_eq!(
        extract_and_strip("Path is clear."),
        ("Path is clear.".to_string(), None)
    );
}

#[tokio::test]
async fn test_assistant_turns_reach_glove_in_order() {
    let wire = Wire::default();
    let mut link = open_link(&wire).await;
    let mut dispatcher = HapticDispatcher::new();

    let turns = [
        LogEvent::new(Role::User, "what's in front of me HAPTIC_5"),
        LogEvent::new(Role::Assistant, "A door on your left. HAPTIC_4"),
        LogEvent::new(Role::Assistant, "Nothing close."),
        LogEvent::new(Role::Assistant, "HAPTIC_3 Stop, a car is crossing."),
    ];

    let mut shown = Vec::new();
    for event in turns {
        let (event, _) = dispatcher.dispatch(event, Some(&link));
        shown.push(event.text);
    }
    link.close().await;

    assert_eq!(wire.lines(), vec!["HAPTIC_4", "HAPTIC_3"]);
    assert_eq!(
        shown,
        vec![
            "what's in front of me HAPTIC_5",
            "A door on your left.",
            "Nothing close.",
            "Stop, a car is crossing.",
        ]
    );
    assert_eq!(dispatcher.last(), ControlCode::Strong);
    assert_eq!(link.state(), LinkState::Closed);
}

#[tokio::test]
async fn test_writes_after_close_are_dropped() {
    let wire = Wire::default();
    let mut link = open_link(&wire).await;
    link.close().await;

    let mut dispatcher = HapticDispatcher::new();
    let (_, code) = dispatcher.dispatch(LogEvent::new(Role::Assistant, "HAPTIC_1"), Some(&link));

    assert_eq!(code, Some(ControlCode::LongSmooth));
    assert!(wire.lines().is_empty());
}

#[test]
fn test_dispatch_without_link_still_strips() {
    let mut dispatcher = HapticDispatcher::new();
    let mut history = LogHistory::new(10);

    let (event, code) = dispatcher.dispatch(LogEvent::new(Role::Assistant, "Curb. HAPTIC_2"), None);
    let entry = history.push(event);

    assert_eq!(code, Some(ControlCode::ShortPulse));
    assert_eq!(entry.text, "Curb.");
    assert_eq!(entry.role, Role::Assistant);
}
