//! Hi3518EV300, a development board for IP cameras.
//!
//! The board boots from SPI NOR flash. Each image is staged to a scratch
//! region of DDR with `loady`, then programmed with `sf erase`/`sf write`.
//! Addresses and sizes below describe the stock OpenHarmony partition
//! layout.

use std::io::{Read, Write};
use std::path::Path;

use log::info;

use crate::error::Result;
use crate::port::{self, SerialConfig, SerialStream};
use crate::progress::Observer;
use crate::target::Assets;
use crate::uboot::UbootShell;

/// The dev kit ships a generic Prolific PL2303 USB-to-serial adapter with no
/// serial number programmed.
const ADAPTER_VID: u16 = 0x067B;
const ADAPTER_PID: u16 = 0x2303;

const CONSOLE_BAUD: u32 = 115200;

/// DDR scratch address images are staged to before programming.
const LOAD_ADDR: u64 = 0x41_000_000;

/// One flash partition: where it lives and how much to erase and write.
struct Partition {
    flash_addr: u64,
    erase_size: u64,
    write_size: u64,
}

const BOOTLOADER: Partition = Partition {
    flash_addr: 0x0,
    erase_size: 0x100_000,
    write_size: 0x40_000,
};

const KERNEL: Partition = Partition {
    flash_addr: 0x100_000,
    erase_size: 0x600_000,
    write_size: 0x3f0_000,
};

const ROOTFS: Partition = Partition {
    flash_addr: 0x700_000,
    erase_size: 0x800_000,
    write_size: 0x670_000,
};

const USERFS: Partition = Partition {
    flash_addr: 0xf00_000,
    erase_size: 0x100_000,
    write_size: 0x10_000,
};

/// Find the board console's serial port by its USB adapter.
pub fn find_serial_port() -> Result<String> {
    port::find_usb_port("hi3518ev300", ADAPTER_VID, ADAPTER_PID, Some(""))
}

/// Open the board console.
pub fn open_serial_port(port_name: &str) -> Result<SerialStream> {
    port::open(&SerialConfig::new(port_name, CONSOLE_BAUD))
}

/// Flash the given assets and reset the board.
///
/// The shell must already be primed (autoboot interrupted, prompt known).
pub fn flash_assets<S: Read + Write>(
    shell: &mut UbootShell<S>,
    assets: &Assets,
    observer: &mut dyn Observer,
) -> Result<()> {
    let version = shell.command("getinfo version")?;
    info!("u-boot version: {:?}", version.trim());
    shell.command("sf probe 0")?;

    flash_asset(shell, assets.bootloader.as_deref(), &BOOTLOADER, observer)?;
    flash_asset(shell, assets.kernel.as_deref(), &KERNEL, observer)?;
    flash_asset(shell, assets.rootfs.as_deref(), &ROOTFS, observer)?;
    flash_asset(shell, assets.userfs.as_deref(), &USERFS, observer)?;

    configure_uboot(shell)?;
    shell.reset()
}

/// Stage one image over YMODEM and program it into its partition.
fn flash_asset<S: Read + Write>(
    shell: &mut UbootShell<S>,
    asset: Option<&Path>,
    partition: &Partition,
    observer: &mut dyn Observer,
) -> Result<()> {
    // Assets are entirely optional.
    let Some(path) = asset else {
        return Ok(());
    };
    info!(
        "flashing {} to {:#x}",
        path.display(),
        partition.flash_addr
    );

    // Blank the scratch region so the unwritten tail of the last block is
    // well defined.
    shell.command(&format!(
        "mw.b {LOAD_ADDR:#x} 0xff {:#x}",
        partition.write_size
    ))?;
    shell.special_command(
        &format!("loady {LOAD_ADDR:#x}"),
        &format!(
            "## Ready for binary (ymodem) download to {LOAD_ADDR:#x} at {CONSOLE_BAUD} bps...\r\n"
        ),
    )?;
    shell.send_file(path, observer)?;
    shell.command(&format!(
        "sf erase {:#x} {:#x}",
        partition.flash_addr, partition.erase_size
    ))?;
    shell.command(&format!(
        "sf write {LOAD_ADDR:#x} {:#x} {:#x}",
        partition.flash_addr, partition.write_size
    ))?;
    Ok(())
}

/// Point u-boot at the freshly written kernel partition.
fn configure_uboot<S: Read + Write>(shell: &mut UbootShell<S>) -> Result<()> {
    const BOOT_LOAD_ADDR: u64 = 0x40_000_000;
    const BOOT_FLASH_ADDR: u64 = KERNEL.flash_addr;
    const BOOT_LOAD_SIZE: u64 = KERNEL.erase_size;

    let bootcmd = format!(
        "sf probe 0; sf read {BOOT_LOAD_ADDR:#x} {BOOT_FLASH_ADDR:#x} {BOOT_LOAD_SIZE:#x}; go {BOOT_LOAD_ADDR:#x}"
    );
    shell.set_env("bootcmd", &bootcmd)?;
    shell.set_env(
        "bootargs",
        "console=ttyAMA0,115200n8 root=flash fstype=jffs2 rw rootaddr=5M rootsize=7M",
    )?;
    shell.save_env()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_do_not_overlap() {
        let parts = [&BOOTLOADER, &KERNEL, &ROOTFS, &USERFS];
        for pair in parts.windows(2) {
            assert!(pair[0].flash_addr + pair[0].erase_size <= pair[1].flash_addr);
        }
    }

    #[test]
    fn write_fits_inside_erase() {
        for part in [&BOOTLOADER, &KERNEL, &ROOTFS, &USERFS] {
            assert!(part.write_size <= part.erase_size);
        }
    }
}
