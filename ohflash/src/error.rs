//! Error types for ohflash.

use std::io;
use thiserror::Error;

use crate::protocol::ymodem::ControlByte;

/// Result type for ohflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ohflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The stream ended before the operation completed.
    #[error("stream ended unexpectedly")]
    StreamEnded,

    /// The peer sent a control byte the state machine did not expect.
    #[error("protocol desync: expected {expected}, got {actual}")]
    Desync {
        /// What the state machine was waiting for.
        expected: &'static str,
        /// The control byte actually received.
        actual: ControlByte,
    },

    /// The receiver cancelled the transfer with CAN.
    #[error("transfer rejected by receiver")]
    TransferRejected,

    /// The retry budget ran out.
    #[error("too many failed attempts while {0}")]
    TooManyRetries(&'static str),

    /// The autoboot interrupt window was not seen on the console.
    #[error("cannot find autoboot message")]
    BootWindowMissed,

    /// The shell prompt could not be auto-detected.
    #[error("cannot auto-discover shell prompt")]
    PromptUndiscovered,

    /// Serial port discovery found no unique match.
    #[error("cannot find {device} serial port, found {found} candidates")]
    PortDiscovery {
        /// Human-readable name of the device being looked for.
        device: &'static str,
        /// How many candidate ports matched.
        found: usize,
    },
}
