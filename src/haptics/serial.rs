//! Serial link to the haptic glove
//!
//! Lifecycle is `Unbound -> Requested -> Open -> Closed`. Lines are handed to
//! a single writer worker so concurrent writes never interleave.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{Error, Result};

/// Serial write timeout
const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Link lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// No device chosen
    Unbound,
    /// Device chosen, not yet opened
    Requested,
    /// Accepting writes
    Open,
    /// Released
    Closed,
}

/// A serial port visible to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// System path, e.g. `/dev/ttyACM0`
    pub name: String,
    /// Human-readable device description
    pub description: String,
}

impl std::fmt::Display for PortInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.description.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{} ({})", self.name, self.description)
        }
    }
}

/// Host serial capability
pub trait SerialBackend: Send + Sync + 'static {
    /// Enumerate ports
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceUnavailable` if ports cannot be enumerated
    fn available_ports(&self) -> Result<Vec<PortInfo>>;

    /// Open `port` at `baud_rate` for writing
    ///
    /// # Errors
    ///
    /// Returns `Error::OpenFailed` if the device refuses
    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn Write + Send>>;
}

/// Serial ports through the `serialport` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSerial;

impl SerialBackend for SystemSerial {
    fn available_ports(&self) -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports()
            .map_err(|e| Error::DeviceUnavailable(format!("cannot enumerate serial ports: {e}")))?;

        Ok(ports
            .into_iter()
            .map(|port| {
                let description = match port.port_type {
                    serialport::SerialPortType::UsbPort(usb) => usb
                        .product
                        .or(usb.manufacturer)
                        .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
                    serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                    serialport::SerialPortType::PciPort => "PCI".to_string(),
                    serialport::SerialPortType::Unknown => String::new(),
                };
                PortInfo {
                    name: port.port_name,
                    description,
                }
            })
            .collect())
    }

    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn Write + Send>> {
        let handle = serialport::new(port, baud_rate)
            .timeout(WRITE_TIMEOUT)
            .open()
            .map_err(|e| Error::OpenFailed(format!("{port} at {baud_rate} baud: {e}")))?;
        Ok(Box::new(PortWriter(handle)))
    }
}

struct PortWriter(Box<dyn serialport::SerialPort>);

impl Write for PortWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

/// Chooses a port from the enumerated list
pub trait PortPicker: Send + Sync + 'static {
    /// Pick a port name, or `None` if the user declined
    ///
    /// # Errors
    ///
    /// Returns error if the selection cannot be shown
    fn pick(&self, ports: &[PortInfo]) -> Result<Option<String>>;
}

/// Terminal selection prompt
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptPicker;

impl PortPicker for PromptPicker {
    fn pick(&self, ports: &[PortInfo]) -> Result<Option<String>> {
        let labels: Vec<String> = ports.iter().map(ToString::to_string).collect();
        let choice = dialoguer::Select::new()
            .with_prompt("Select the haptic glove port (Esc to skip)")
            .items(&labels)
            .default(0)
            .interact_opt()
            .map_err(|e| Error::DeviceUnavailable(format!("port prompt failed: {e}")))?;

        Ok(choice.and_then(|idx| ports.get(idx)).map(|port| port.name.clone()))
    }
}

/// Line-oriented link to one actuator
pub struct ActuatorLink {
    backend: Arc<dyn SerialBackend>,
    picker: Arc<dyn PortPicker>,
    preferred: Option<String>,
    state: LinkState,
    port: Option<String>,
    writer: Option<mpsc::UnboundedSender<String>>,
    worker: Option<JoinHandle<()>>,
}

impl ActuatorLink {
    /// Create an unbound link
    #[must_use]
    pub fn new(backend: Arc<dyn SerialBackend>, picker: Arc<dyn PortPicker>) -> Self {
        Self {
            backend,
            picker,
            preferred: None,
            state: LinkState::Unbound,
            port: None,
            writer: None,
            worker: None,
        }
    }

    /// Use `port` instead of asking the picker
    #[must_use]
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.preferred = Some(port.into());
        self
    }

    /// Choose the device to open
    ///
    /// May be called again after a cancellation. Returns the chosen port.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceUnavailable` if there is nothing to pick from,
    /// `Error::UserCancelled` if the user declines
    pub async fn request_device(&mut self) -> Result<String> {
        if self.state == LinkState::Open {
            if let Some(port) = &self.port {
                return Ok(port.clone());
            }
        }

        let port = match &self.preferred {
            Some(port) => port.clone(),
            None => {
                let backend = Arc::clone(&self.backend);
                let picker = Arc::clone(&self.picker);
                tokio::task::spawn_blocking(move || {
                    let ports = backend.available_ports()?;
                    if ports.is_empty() {
                        return Err(Error::DeviceUnavailable(
                            "no serial ports found".to_string(),
                        ));
                    }
                    picker.pick(&ports)?.ok_or(Error::UserCancelled)
                })
                .await
                .map_err(|e| Error::DeviceUnavailable(format!("port selection failed: {e}")))??
            }
        };

        tracing::debug!(port = %port, "actuator device requested");
        self.port = Some(port.clone());
        self.state = LinkState::Requested;
        Ok(port)
    }

    /// Open the requested device at `baud_rate`
    ///
    /// # Errors
    ///
    /// Returns `Error::NotRequested` without a prior `request_device`,
    /// `Error::OpenFailed` if the device refuses
    pub async fn open(&mut self, baud_rate: u32) -> Result<()> {
        match self.state {
            LinkState::Open => return Ok(()),
            LinkState::Requested => {}
            LinkState::Unbound | LinkState::Closed => return Err(Error::NotRequested),
        }
        let port = self.port.clone().ok_or(Error::NotRequested)?;

        let backend = Arc::clone(&self.backend);
        let name = port.clone();
        let device = tokio::task::spawn_blocking(move || backend.open(&name, baud_rate))
            .await
            .map_err(|e| Error::OpenFailed(e.to_string()))??;

        let (tx, rx) = mpsc::unbounded_channel();
        let worker_port = port.clone();
        self.worker = Some(tokio::task::spawn_blocking(move || {
            write_lines(device, rx, &worker_port);
        }));
        self.writer = Some(tx);
        self.state = LinkState::Open;

        tracing::info!(port = %port, baud_rate, "actuator link open");
        Ok(())
    }

    /// Write `text` followed by a newline
    ///
    /// Logs and returns if the link is not open; failures never propagate.
    pub fn write_line(&self, text: &str) {
        let Some(writer) = self.writer.as_ref().filter(|_| self.state == LinkState::Open) else {
            tracing::warn!(text, "actuator link not open, dropping write");
            return;
        };
        if writer.send(format!("{text}\n")).is_err() {
            let e = Error::Write("writer worker stopped".to_string());
            tracing::warn!(error = %e, "actuator write failed");
        }
    }

    /// Release the device, flushing queued lines
    ///
    /// Safe from any state.
    pub async fn close(&mut self) {
        self.writer.take();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::debug!(error = %e, "actuator writer ended abnormally");
            }
        }
        if self.state == LinkState::Open {
            tracing::info!(port = ?self.port, "actuator link closed");
        }
        self.port = None;
        self.state = LinkState::Closed;
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Chosen port, if any
    #[must_use]
    pub fn port_name(&self) -> Option<&str> {
        self.port.as_deref()
    }

    /// Whether writes reach the device
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }
}

fn write_lines(
    mut device: Box<dyn Write + Send>,
    mut lines: mpsc::UnboundedReceiver<String>,
    port: &str,
) {
    while let Some(line) = lines.blocking_recv() {
        match device.write_all(line.as_bytes()).and_then(|()| device.flush()) {
            Ok(()) => tracing::debug!(port, line = line.trim_end(), "sent to actuator"),
            Err(e) => {
                let e = Error::Write(e.to_string());
                tracing::warn!(port, error = %e, "actuator write failed");
            }
        }
    }
}
