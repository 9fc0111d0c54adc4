//! Serial port access.
//!
//! Opens board and adapter consoles through the `serialport` crate and
//! presents them as plain [`Read`]/[`Write`] byte streams. The core layers
//! assume a clean stream, so [`SerialStream`] restarts reads and writes that
//! were interrupted by a signal; `read_exact`/`write_all` already do this on
//! their own.

use std::io::{self, Read, Write};
use std::time::Duration;

use log::trace;
use serialport::{SerialPort, SerialPortType};

use crate::error::{Error, Result};

/// Read/write inactivity timeout applied to opened ports.
///
/// The control plane has no timeouts of its own; a stalled board surfaces as
/// an I/O error from here once nothing arrives for this long.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g. `/dev/ttyUSB0`, `COM3`).
    pub name: String,
    /// Baud rate; boards handled here all run 8N1 without flow control.
    pub baud: u32,
    /// Inactivity timeout for reads and writes.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Create a configuration with the default timeout.
    pub fn new(name: impl Into<String>, baud: u32) -> Self {
        Self {
            name: name.into(),
            baud,
            timeout: DEFAULT_TIMEOUT,
        }
    }

}

/// An opened serial port.
pub struct SerialStream {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialStream {
    /// The name the port was opened under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drop any bytes pending in the OS transmit and receive buffers.
    pub fn clear_buffers(&mut self) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }
}

impl Read for SerialStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.port.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                other => return other,
            }
        }
    }
}

impl Write for SerialStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match self.port.write(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                other => return other,
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.port)
    }
}

/// Open a serial port as 8N1 with no flow control.
pub fn open(config: &SerialConfig) -> Result<SerialStream> {
    let port = serialport::new(&config.name, config.baud)
        .timeout(config.timeout)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .open()?;
    trace!("opened {} at {} baud", config.name, config.baud);
    Ok(SerialStream {
        port,
        name: config.name.clone(),
    })
}

/// Description of one enumerated serial port.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor id, if the port is a USB device.
    pub vid: Option<u16>,
    /// USB product id, if the port is a USB device.
    pub pid: Option<u16>,
    /// Manufacturer string reported by the device.
    pub manufacturer: Option<String>,
    /// Product string reported by the device.
    pub product: Option<String>,
    /// Serial number reported by the device.
    pub serial_number: Option<String>,
}

/// List all serial ports known to the OS.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let (vid, pid, manufacturer, product, serial_number) = match &p.port_type {
                SerialPortType::UsbPort(usb) => (
                    Some(usb.vid),
                    Some(usb.pid),
                    usb.manufacturer.clone(),
                    usb.product.clone(),
                    usb.serial_number.clone(),
                ),
                _ => (None, None, None, None, None),
            };
            PortInfo {
                name: p.port_name,
                vid,
                pid,
                manufacturer,
                product,
                serial_number,
            }
        })
        .collect())
}

/// Find the single serial port backed by the given USB vendor/product pair.
///
/// `want_serial` further restricts the match to devices reporting exactly
/// that serial number (adapters bundled with dev kits often report an empty
/// one). Zero or several candidates is a [`Error::PortDiscovery`] failure:
/// guessing among boards is worse than asking the operator to pass `--port`.
pub fn find_usb_port(
    device: &'static str,
    vid: u16,
    pid: u16,
    want_serial: Option<&str>,
) -> Result<String> {
    let mut names: Vec<String> = list_ports()?
        .into_iter()
        .filter(|p| p.vid == Some(vid) && p.pid == Some(pid))
        .filter(|p| match want_serial {
            Some(want) => p.serial_number.as_deref().unwrap_or("") == want,
            None => true,
        })
        .map(|p| p.name)
        .collect();
    if names.len() != 1 {
        return Err(Error::PortDiscovery {
            device,
            found: names.len(),
        });
    }
    Ok(names.remove(0))
}

/// Pass-through wrapper that logs serial traffic at `trace!` level.
pub struct Traced<S> {
    inner: S,
}

impl<S> Traced<S> {
    /// Wrap a stream so its traffic shows up in the logs.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: Read> Read for Traced<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            trace!("<<< {}", preview(&buf[..n]));
        }
        Ok(n)
    }
}

impl<S: Write> Write for Traced<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if n > 0 {
            trace!(">>> {}", preview(&buf[..n]));
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Render a byte run with printable ASCII kept and the rest hex-escaped.
fn preview(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            0x20..=0x7E => out.push(b as char),
            b'\r' => out.push_str("\\r"),
            b'\n' => out.push_str("\\n"),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn list_ports_does_not_panic() {
        let _ = list_ports();
    }

    #[test]
    fn serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyUSB0", 115200);
        assert_eq!(config.name, "/dev/ttyUSB0");
        assert_eq!(config.baud, 115200);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn traced_stream_is_transparent() {
        let mut traced = Traced::new(Cursor::new(b"abc".to_vec()));
        let mut out = [0u8; 8];
        let n = traced.read(&mut out).unwrap();
        assert_eq!(&out[..n], b"abc");
    }

    #[test]
    fn preview_escapes_non_printable() {
        assert_eq!(preview(b"ok\r\n"), "ok\\r\\n");
        assert_eq!(preview(&[0x01, 0x43]), "\\x01C");
    }
}
