//! Protocol implementations.

pub mod crc;
pub mod ymodem;

pub use ymodem::{BlockKind, ControlByte, Transfer};
