//! Serial transport to the motor firmware
//!
//! Provides port enumeration, port opening, a line framer over any
//! byte stream, and an in-memory port pair used by the simulated
//! firmware and by tests.

use cablekit_core::{ConnectionError, Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

/// Trait for byte stream I/O over a firmware link
pub trait ReadWrite: Read + Write + Send {}
impl<T: Read + Write + Send> ReadWrite for T {}

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g. "/dev/ttyUSB0", "COM3")
    pub port_name: String,
    /// Human-readable description
    pub description: String,
}

/// List serial ports that look like a microcontroller link.
///
/// Filters to the device name patterns used by USB serial adapters:
/// COM* on Windows, /dev/ttyUSB* and /dev/ttyACM* on Linux,
/// /dev/cu.usbserial-* and /dev/cu.usbmodem* on macOS.
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("failed to enumerate serial ports: {}", e);
        Error::other(format!("failed to enumerate ports: {}", e))
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_controller_port(&port.port_name))
        .map(|port| SerialPortInfo {
            port_name: port.port_name.clone(),
            description: describe_port(port),
        })
        .collect())
}

fn is_controller_port(port_name: &str) -> bool {
    if port_name.starts_with("COM") && port_name[3..].chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if port_name.starts_with("/dev/ttyUSB") || port_name.starts_with("/dev/ttyACM") {
        return true;
    }
    if port_name.starts_with("/dev/cu.usbserial-") || port_name.starts_with("/dev/cu.usbmodem") {
        return true;
    }
    false
}

fn describe_port(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => format!(
            "USB {} {}",
            usb_info.manufacturer.as_deref().unwrap_or("Device"),
            usb_info.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Open a serial port configured for the firmware link.
///
/// 8 data bits, no parity, one stop bit, no flow control. The short
/// read timeout keeps the poll loop responsive; callers treat a timed
/// out read as "no data yet".
pub fn open_port(port: &str, baud_rate: u32) -> Result<Box<dyn ReadWrite>> {
    let builder = serialport::new(port, baud_rate)
        .timeout(Duration::from_millis(10))
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .flow_control(serialport::FlowControl::None);

    match builder.open_native() {
        Ok(opened) => Ok(Box::new(opened)),
        Err(e) => {
            tracing::warn!("failed to open serial port {}: {}", port, e);
            Err(ConnectionError::FailedToOpen {
                endpoint: port.to_string(),
                reason: e.to_string(),
            }
            .into())
        }
    }
}

/// Newline-delimited framer over a byte stream
///
/// Buffers partial reads until a `\n` arrives; a command split across
/// reads is delivered whole once the terminator shows up.
pub struct LineTransport {
    stream: Box<dyn ReadWrite>,
    pending: Vec<u8>,
}

impl LineTransport {
    /// Wrap a byte stream
    pub fn new(stream: Box<dyn ReadWrite>) -> Self {
        Self {
            stream,
            pending: Vec::new(),
        }
    }

    /// Drain every complete line currently available.
    ///
    /// A read that times out or would block simply ends the drain; any
    /// partial line stays buffered for the next poll. Returns an error
    /// only when the link itself failed.
    pub fn poll_lines(&mut self) -> Result<Vec<String>> {
        let mut buf = [0u8; 512];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    return Err(ConnectionError::ConnectionLost {
                        reason: "end of stream".to_string(),
                    }
                    .into());
                }
                Ok(n) => {
                    self.pending.extend_from_slice(&buf[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ConnectionError::IoError {
                        reason: e.to_string(),
                    }
                    .into());
                }
            }
        }

        let mut lines = Vec::new();
        while let Some(idx) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=idx).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    /// Write a single line, appending the terminator
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        self.stream
            .write_all(line.as_bytes())
            .and_then(|_| self.stream.write_all(b"\n"))
            .and_then(|_| self.stream.flush())
            .map_err(|e| {
                ConnectionError::IoError {
                    reason: e.to_string(),
                }
                .into()
            })
    }
}

#[derive(Default)]
struct MemoryPipe {
    data: VecDeque<u8>,
    closed: bool,
}

/// One end of an in-memory serial port pair
///
/// Reads behave like a real port with a timeout configured: an empty
/// buffer yields `ErrorKind::TimedOut` rather than `Ok(0)`, and `Ok(0)`
/// only after the peer is dropped.
pub struct MemoryPort {
    incoming: Arc<Mutex<MemoryPipe>>,
    outgoing: Arc<Mutex<MemoryPipe>>,
}

impl Read for MemoryPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = self.incoming.lock();
        if pipe.data.is_empty() {
            if pipe.closed {
                return Ok(0);
            }
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(pipe.data.len());
        for slot in buf.iter_mut().take(n) {
            *slot = pipe.data.pop_front().unwrap_or_default();
        }
        Ok(n)
    }
}

impl Write for MemoryPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = self.outgoing.lock();
        if pipe.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"));
        }
        pipe.data.extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MemoryPort {
    fn drop(&mut self) {
        self.incoming.lock().closed = true;
        self.outgoing.lock().closed = true;
    }
}

/// Create a connected pair of in-memory ports.
///
/// Bytes written to one end become readable on the other.
pub fn memory_pair() -> (MemoryPort, MemoryPort) {
    let a_to_b = Arc::new(Mutex::new(MemoryPipe::default()));
    let b_to_a = Arc::new(Mutex::new(MemoryPipe::default()));
    (
        MemoryPort {
            incoming: b_to_a.clone(),
            outgoing: a_to_b.clone(),
        },
        MemoryPort {
            incoming: a_to_b,
            outgoing: b_to_a,
        },
    )
}
