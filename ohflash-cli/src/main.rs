//! ohflash CLI - flash OpenHarmony development boards over the U-Boot
//! serial console.
//!
//! ## Features
//!
//! - Stage and program bootloader/kernel/rootfs/userfs images
//! - Board console auto-detection by USB adapter
//! - Unattended power-cycling through an attached Bus Pirate
//! - Serial port listing with JSON output

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use env_logger::Env;
use log::debug;
use ohflash::port::SerialStream;
use ohflash::power::{self, BusPirate};
use ohflash::{Assets, BoardKind, Traced, UbootConsole};
use std::path::PathBuf;

mod progress;

use progress::BarObserver;

/// ohflash - program OpenHarmony development boards through u-boot.
///
/// Environment variables:
///   OHFLASH_PORT    - Default board console serial port
///   OHFLASH_BOARD   - Default board type
#[derive(Parser)]
#[command(name = "ohflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port of the board console (auto-detected if not specified).
    #[arg(short, long, global = true, env = "OHFLASH_PORT")]
    port: Option<String>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Flash firmware images to a board.
    Flash {
        /// Type of the board to program.
        #[arg(short, long, env = "OHFLASH_BOARD")]
        board: String,

        /// Bootloader image to use.
        #[arg(long)]
        bootloader: Option<PathBuf>,

        /// Kernel image to use.
        #[arg(long)]
        kernel: Option<PathBuf>,

        /// Root file system image to use.
        #[arg(long)]
        rootfs: Option<PathBuf>,

        /// User file system image to use.
        #[arg(long)]
        userfs: Option<PathBuf>,

        /// Do not look for a Bus Pirate; power-cycle the board by hand.
        #[arg(long)]
        no_power_cycle: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output the port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(None)
        .init();

    debug!(
        "ohflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match &cli.command {
        Commands::Flash {
            board,
            bootloader,
            kernel,
            rootfs,
            userfs,
            no_power_cycle,
        } => {
            let assets = Assets {
                bootloader: bootloader.clone(),
                kernel: kernel.clone(),
                rootfs: rootfs.clone(),
                userfs: userfs.clone(),
            };
            cmd_flash(&cli, board, &assets, *no_power_cycle)
        }
        Commands::ListPorts { json } => cmd_list_ports(*json),
    }
}

/// Flash command implementation.
fn cmd_flash(cli: &Cli, board_name: &str, assets: &Assets, no_power_cycle: bool) -> Result<()> {
    let Some(board) = BoardKind::from_name(board_name) else {
        bail!(
            "unsupported board type {board_name:?} (known: {})",
            BoardKind::known_names().join(", ")
        );
    };
    if assets.is_empty() {
        bail!("nothing to flash; pass at least one of --bootloader, --kernel, --rootfs, --userfs");
    }

    // A Bus Pirate on the supply rails lets us power-cycle the board into
    // its boot window without an operator present.
    let mut pirate = if no_power_cycle {
        None
    } else {
        find_power_control(cli)?
    };

    let port_name = match &cli.port {
        Some(name) => name.clone(),
        None => board
            .find_serial_port()
            .context("auto-detecting the board serial port")?,
    };
    let mut stream = board.open_serial_port(&port_name)?;
    // Drop stale console bytes from a previous boot before matching starts.
    stream.clear_buffers()?;
    if !cli.quiet {
        eprintln!(
            "{} using {} console on {}",
            style("→").cyan(),
            board,
            style(stream.name()).green()
        );
    }
    // Traffic shows up in the logs at -vvv.
    let mut console = UbootConsole::new(Traced::new(stream));

    if let Some(pirate) = pirate.as_mut() {
        if !cli.quiet {
            eprintln!("{} power-cycling the board", style("→").cyan());
        }
        pirate.disable_power()?;
        pirate.enable_power()?;
    } else if !cli.quiet {
        eprintln!(
            "{} power-cycle the board manually now",
            style("!").yellow().bold()
        );
    }

    console.interrupt_boot()?;
    let mut shell = console.probe_prompt()?;
    if !cli.quiet {
        eprintln!(
            "{} u-boot prompt is {:?}",
            style("✓").green(),
            String::from_utf8_lossy(shell.prompt())
        );
    }

    let mut observer = BarObserver::new(cli.quiet);
    board.flash_assets(&mut shell, assets, &mut observer)?;

    if !cli.quiet {
        eprintln!("{} flashing complete, board is resetting", style("✓").green().bold());
    }
    Ok(())
}

/// Look for a Bus Pirate and put it in PSU mode.
///
/// Not finding one is fine: the operator power-cycles by hand. Failing to
/// drive one we did find is an error.
fn find_power_control(cli: &Cli) -> Result<Option<BusPirate<SerialStream>>> {
    match power::find_bus_pirate() {
        Ok(port_name) => {
            if !cli.quiet {
                eprintln!(
                    "{} bus pirate on {}",
                    style("→").cyan(),
                    style(&port_name).green()
                );
            }
            let mut pirate = BusPirate::open(&port_name).context("opening the bus pirate")?;
            pirate
                .enter_psu_mode()
                .context("entering bus pirate PSU mode")?;
            Ok(Some(pirate))
        }
        Err(e) => {
            debug!("no bus pirate: {e}");
            if !cli.quiet {
                eprintln!(
                    "{} no bus pirate found, flashing will not be unattended",
                    style("!").yellow()
                );
            }
            Ok(None)
        }
    }
}

/// List ports command implementation.
fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = ohflash::port::list_ports()?;

    if json {
        let entries: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial": p.serial_number,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).unwrap_or_default()
        );
        return Ok(());
    }

    if ports.is_empty() {
        eprintln!("{}", style("no serial ports found").dim());
        return Ok(());
    }
    for port in &ports {
        let vid_pid = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" ({vid:04x}:{pid:04x})"),
            _ => String::new(),
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();
        eprintln!(
            "  {} {}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            vid_pid,
            product
        );
    }
    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_command_is_valid() {
        // Verifies that all derive macros produce a valid clap Command
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_flash_with_assets() {
        let cli = Cli::try_parse_from([
            "ohflash",
            "--port",
            "/dev/ttyUSB0",
            "flash",
            "--board",
            "hi3518ev300",
            "--kernel",
            "OHOS_Image.bin",
            "--rootfs",
            "rootfs.img",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        if let Commands::Flash {
            board,
            kernel,
            rootfs,
            bootloader,
            userfs,
            no_power_cycle,
        } = cli.command
        {
            assert_eq!(board, "hi3518ev300");
            assert_eq!(kernel.unwrap().to_str().unwrap(), "OHOS_Image.bin");
            assert_eq!(rootfs.unwrap().to_str().unwrap(), "rootfs.img");
            assert!(bootloader.is_none());
            assert!(userfs.is_none());
            assert!(!no_power_cycle);
        } else {
            panic!("expected flash command");
        }
    }

    #[test]
    fn parse_flash_requires_board() {
        let result = Cli::try_parse_from(["ohflash", "flash", "--kernel", "k.bin"]);
        assert!(result.is_err());
    }

    #[test]
    fn parse_flash_no_power_cycle() {
        let cli = Cli::try_parse_from([
            "ohflash",
            "flash",
            "--board",
            "hi3518ev300",
            "--kernel",
            "k.bin",
            "--no-power-cycle",
        ])
        .unwrap();
        if let Commands::Flash { no_power_cycle, .. } = cli.command {
            assert!(no_power_cycle);
        } else {
            panic!("expected flash command");
        }
    }

    #[test]
    fn parse_list_ports() {
        let cli = Cli::try_parse_from(["ohflash", "list-ports"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: false }));
    }

    #[test]
    fn parse_list_ports_json() {
        let cli = Cli::try_parse_from(["ohflash", "list-ports", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: true }));
    }

    #[test]
    fn parse_verbosity_and_quiet() {
        let cli = Cli::try_parse_from(["ohflash", "-vv", "--quiet", "list-ports"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
    }

    #[test]
    fn missing_subcommand_is_an_error() {
        assert!(Cli::try_parse_from(["ohflash"]).is_err());
    }
}
