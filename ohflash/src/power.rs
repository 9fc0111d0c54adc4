//! Bus Pirate power control.
//!
//! A Bus Pirate v3 wired to the board's supply lets the tool power-cycle the
//! board without an operator present: in 1-WIRE mode the 5V and 3V3 pins can
//! source up to 150mA, enough for the supported dev kits. The adapter is
//! driven through its own text console using the same delimited-read engine
//! as the bootloader shell.

use std::io::{Read, Write};

use log::debug;

use crate::error::Result;
use crate::expect::ExpectEngine;
use crate::port::{self, SerialConfig, SerialStream};

/// FTDI FT232R, the converter on Bus Pirate v3 boards.
const BUS_PIRATE_VID: u16 = 0x0403;
const BUS_PIRATE_PID: u16 = 0x6001;

/// Find the serial port of the only Bus Pirate attached to the system.
pub fn find_bus_pirate() -> Result<String> {
    port::find_usb_port("bus pirate", BUS_PIRATE_VID, BUS_PIRATE_PID, None)
}

/// A Bus Pirate v3 acting as a programmable power supply.
pub struct BusPirate<S> {
    stream: ExpectEngine<S>,
}

impl BusPirate<SerialStream> {
    /// Open a Bus Pirate on the given serial port.
    pub fn open(port_name: &str) -> Result<Self> {
        let stream = port::open(&SerialConfig::new(port_name, 115200))?;
        Ok(Self::new(stream))
    }
}

impl<S: Read + Write> BusPirate<S> {
    /// Drive a Bus Pirate over an already-open stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream: ExpectEngine::new(stream),
        }
    }

    /// Reset the Bus Pirate and enter 1-WIRE mode.
    ///
    /// Only in this mode can the on-board supplies be switched.
    pub fn enter_psu_mode(&mut self) -> Result<()> {
        debug!("resetting bus pirate into 1-WIRE mode");
        self.stream.write_all(b"#\n")?;
        self.stream.flush()?;
        self.stream.discard_until(b"HiZ>")?;
        self.stream.write_all(b"m2\n")?;
        self.stream.flush()?;
        self.stream.discard_until(b"Ready\r\n")
    }

    /// Enable the on-board 5V and 3V3 supplies.
    pub fn enable_power(&mut self) -> Result<()> {
        debug!("enabling bus pirate power supplies");
        self.stream.write_all(b"W\n")?;
        self.stream.flush()?;
        self.stream.discard_until(b"1-WIRE>")
    }

    /// Disable the on-board 5V and 3V3 supplies.
    pub fn disable_power(&mut self) -> Result<()> {
        debug!("disabling bus pirate power supplies");
        self.stream.write_all(b"w\n")?;
        self.stream.flush()?;
        self.stream.discard_until(b"1-WIRE>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    struct FakeAdapter {
        input: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Read for FakeAdapter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for FakeAdapter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn pirate(input: &[u8]) -> BusPirate<FakeAdapter> {
        BusPirate::new(FakeAdapter {
            input: Cursor::new(input.to_vec()),
            written: Vec::new(),
        })
    }

    #[test]
    fn enter_psu_mode_walks_menu() {
        let input = b"Bus Pirate v3\r\nHiZ>1. HiZ\r\n2. 1-WIRE\r\nReady\r\n";
        let mut p = pirate(input);
        p.enter_psu_mode().unwrap();
        assert_eq!(p.stream.get_ref().written, b"#\nm2\n");
    }

    #[test]
    fn power_switching_waits_for_mode_prompt() {
        let input = b"POWER SUPPLIES ON\r\n1-WIRE>POWER SUPPLIES OFF\r\n1-WIRE>";
        let mut p = pirate(input);
        p.enable_power().unwrap();
        p.disable_power().unwrap();
        assert_eq!(p.stream.get_ref().written, b"W\nw\n");
    }
}
