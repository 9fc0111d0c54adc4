//! # ohflash
//!
//! A library for flashing OpenHarmony development boards through the U-Boot
//! serial console.
//!
//! The host drives the bootloader's text shell over a serial link: it
//! interrupts autoboot, auto-discovers the shell prompt, stages firmware
//! images into device memory with the YMODEM-1K protocol and then issues the
//! board-specific commands that erase and program on-board flash.
//!
//! The crate provides:
//!
//! - Delimited stream reading ("expect" style) over unframed byte streams
//! - YMODEM-1K sending with CRC16-XMODEM framing
//! - A U-Boot shell driver with runtime prompt discovery
//! - Board definitions with partition maps and flash sequencing
//! - Bus Pirate power control for unattended flashing
//!
//! ## Example
//!
//! ```rust,no_run
//! use ohflash::{Assets, BoardKind, NullObserver, UbootConsole};
//!
//! fn main() -> ohflash::Result<()> {
//!     let board = BoardKind::Hi3518Ev300;
//!     let port = board.find_serial_port()?;
//!     let stream = board.open_serial_port(&port)?;
//!
//!     // Power-cycle the board now, then catch the boot window.
//!     let mut console = UbootConsole::new(stream);
//!     console.interrupt_boot()?;
//!     let mut shell = console.probe_prompt()?;
//!
//!     let assets = Assets {
//!         kernel: Some("OHOS_Image.bin".into()),
//!         ..Assets::default()
//!     };
//!     board.flash_assets(&mut shell, &assets, &mut NullObserver)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod expect;
pub mod port;
pub mod power;
pub mod progress;
pub mod protocol;
pub mod target;
pub mod uboot;

// Re-exports for convenience
pub use {
    error::{Error, Result},
    expect::ExpectEngine,
    port::{PortInfo, SerialConfig, SerialStream, Traced},
    power::BusPirate,
    progress::{NullObserver, Observer},
    protocol::ymodem::{BlockKind, ControlByte, Transfer},
    target::{Assets, BoardKind},
    uboot::{UbootConsole, UbootShell},
};
