//! Board support.
//!
//! Each supported board knows how to find its serial console, which
//! partitions live where in flash, and how to sequence the bootloader
//! commands that program them. The shell driver stays board-agnostic; this
//! module is the only place that talks in addresses and partition names.

pub mod hi3518ev300;

use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;

use crate::error::Result;
use crate::port::SerialStream;
use crate::progress::Observer;
use crate::uboot::UbootShell;

/// Image files to program; every slot is optional.
#[derive(Debug, Clone, Default)]
pub struct Assets {
    /// Bootloader image.
    pub bootloader: Option<PathBuf>,
    /// Kernel image.
    pub kernel: Option<PathBuf>,
    /// Root file system image.
    pub rootfs: Option<PathBuf>,
    /// User file system image.
    pub userfs: Option<PathBuf>,
}

impl Assets {
    /// Whether no image was selected at all.
    pub fn is_empty(&self) -> bool {
        self.bootloader.is_none()
            && self.kernel.is_none()
            && self.rootfs.is_none()
            && self.userfs.is_none()
    }
}

/// Supported development boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardKind {
    /// HiSilicon Hi3518EV300 IP-camera board.
    Hi3518Ev300,
}

impl BoardKind {
    /// Look a board up by its command-line name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "hi3518ev300" => Some(Self::Hi3518Ev300),
            _ => None,
        }
    }

    /// Names accepted by [`Self::from_name`].
    pub fn known_names() -> &'static [&'static str] {
        &["hi3518ev300"]
    }

    /// Find the serial port of this board's console adapter.
    pub fn find_serial_port(self) -> Result<String> {
        match self {
            Self::Hi3518Ev300 => hi3518ev300::find_serial_port(),
        }
    }

    /// Open the board console with the board's line settings.
    pub fn open_serial_port(self, port_name: &str) -> Result<SerialStream> {
        match self {
            Self::Hi3518Ev300 => hi3518ev300::open_serial_port(port_name),
        }
    }

    /// Program the given assets through an already-primed bootloader shell.
    pub fn flash_assets<S: Read + Write>(
        self,
        shell: &mut UbootShell<S>,
        assets: &Assets,
        observer: &mut dyn Observer,
    ) -> Result<()> {
        match self {
            Self::Hi3518Ev300 => hi3518ev300::flash_assets(shell, assets, observer),
        }
    }
}

impl fmt::Display for BoardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hi3518Ev300 => write!(f, "hi3518ev300"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_kind_from_name() {
        assert_eq!(
            BoardKind::from_name("hi3518ev300"),
            Some(BoardKind::Hi3518Ev300)
        );
        assert_eq!(
            BoardKind::from_name("HI3518EV300"),
            Some(BoardKind::Hi3518Ev300)
        );
        assert_eq!(BoardKind::from_name("unknown"), None);
    }

    #[test]
    fn every_known_name_resolves() {
        for name in BoardKind::known_names() {
            assert!(BoardKind::from_name(name).is_some());
        }
    }

    #[test]
    fn assets_emptiness() {
        assert!(Assets::default().is_empty());
        let assets = Assets {
            kernel: Some(PathBuf::from("kernel.bin")),
            ..Assets::default()
        };
        assert!(!assets.is_empty());
    }
}
