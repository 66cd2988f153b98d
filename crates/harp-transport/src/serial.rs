use crate::{encode_frame, FrameReader, HarpLink, HarpMessage, PortInfo, Result, TransportError};
use serialport::{SerialPort, SerialPortType};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Harp devices talk at 1 Mbaud.
pub const HARP_BAUD_RATE: u32 = 1_000_000;

/// Harp over a serial port (USB CDC on Cuttlefish boards).
pub struct SerialLink {
    port_path: String,
    port: Box<dyn SerialPort>,
    reader: FrameReader,
    deferred: VecDeque<HarpMessage>,
}

impl SerialLink {
    pub fn open_with(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(200))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => {
                    TransportError::InterfaceNotFound(path.to_string())
                }
                _ => TransportError::Io(e.to_string()),
            })?;
        tracing::info!(port = path, baud_rate, "opened harp serial link");
        Ok(SerialLink {
            port_path: path.to_string(),
            port,
            reader: FrameReader::new(),
            deferred: VecDeque::new(),
        })
    }

    pub fn path(&self) -> &str {
        &self.port_path
    }
}

impl HarpLink for SerialLink {
    fn open(path: &str) -> Result<Self>
    where
        Self: Sized,
    {
        Self::open_with(path, HARP_BAUD_RATE)
    }

    fn list() -> Result<Vec<PortInfo>> {
        let mut out = Vec::new();
        for p in serialport::available_ports().map_err(|e| TransportError::Io(e.to_string()))? {
            let driver = match p.port_type {
                SerialPortType::UsbPort(u) => match u.product {
                    Some(product) => format!("usb:{product}"),
                    None => "usb".to_string(),
                },
                _ => "serial".to_string(),
            };
            out.push(PortInfo {
                name: p.port_name,
                driver,
            });
        }
        Ok(out)
    }

    fn recv(&mut self, timeout_ms: Option<u64>) -> Result<HarpMessage> {
        if let Some(msg) = self.deferred.pop_front() {
            return Ok(msg);
        }
        let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        let mut buf = [0u8; 256];
        loop {
            if let Some(frame) = self.reader.next_frame() {
                match frame {
                    Ok(msg) => {
                        tracing::debug!(port = %self.port_path, %msg, "recv");
                        return Ok(msg);
                    }
                    Err(e) => {
                        tracing::warn!(
                            port = %self.port_path,
                            error = %e,
                            "dropping corrupt frame"
                        );
                        continue;
                    }
                }
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err(TransportError::Timeout);
                }
            }
            match self.port.read(&mut buf) {
                Ok(n) if n > 0 => self.reader.push(&buf[..n]),
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }

    fn defer_event(&mut self, msg: HarpMessage) {
        self.deferred.push_back(msg);
    }

    fn send(&mut self, msg: &HarpMessage) -> Result<()> {
        let bytes = encode_frame(msg)?;
        tracing::debug!(port = %self.port_path, %msg, "send");
        self.port
            .write_all(&bytes)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }
}
