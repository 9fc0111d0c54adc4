//! U-Boot shell driver.
//!
//! Drives the bootloader's text console over a serial stream: interrupts
//! autoboot, auto-discovers the prompt of the particular build, then runs
//! commands by writing a line and slicing the byte stream around the echoed
//! command and the next prompt.
//!
//! The prompt-first invariant is encoded in the types: [`UbootConsole`] is
//! the shell before prompt discovery and only knows how to interrupt boot
//! and probe; [`UbootShell`] is produced by a successful probe and is the
//! only type that can issue commands. Sending a command before the prompt is
//! known is therefore not expressible.

use std::io::{Read, Write};
use std::path::Path;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::expect::ExpectEngine;
use crate::progress::Observer;
use crate::protocol::ymodem::{BlockKind, Transfer};

/// Message printed by u-boot while the autoboot countdown runs.
const AUTOBOOT_SENTINEL: &[u8] = b"Hit any key to stop autoboot";

/// Attempts made to read a non-empty line during prompt discovery.
const PROBE_ATTEMPTS: usize = 3;

/// Retry budget handed to the file transfer session.
const TRANSFER_RETRY_BUDGET: u32 = 10;

/// A u-boot console whose prompt is not yet known.
pub struct UbootConsole<S> {
    stream: ExpectEngine<S>,
}

impl<S: Read + Write> UbootConsole<S> {
    /// Attach to the board's serial stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream: ExpectEngine::new(stream),
        }
    }

    /// Wait for the autoboot countdown and interrupt it with a newline.
    ///
    /// Fails with [`Error::BootWindowMissed`] when the stream ends before
    /// the countdown message is seen.
    pub fn interrupt_boot(&mut self) -> Result<()> {
        info!("waiting for the u-boot autoboot prompt");
        self.stream
            .discard_until(AUTOBOOT_SENTINEL)
            .map_err(|e| match e {
                Error::StreamEnded => Error::BootWindowMissed,
                other => other,
            })?;
        info!("interrupting the boot process");
        self.stream.write_all(b"\n")?;
        self.stream.flush()?;
        // u-boot is still printing the countdown; drain the rest of that
        // line before prompt detection starts.
        self.stream.discard_until(b"\n")?;
        Ok(())
    }

    /// Auto-discover the shell prompt.
    ///
    /// Sends a bare newline and takes the first non-empty line (with
    /// trailing `\r`/`\n` removed) as the prompt, trying up to three times.
    pub fn probe_prompt(mut self) -> Result<UbootShell<S>> {
        debug!("sending newline to see the u-boot prompt");
        for _ in 0..PROBE_ATTEMPTS {
            self.stream.write_all(b"\n")?;
            self.stream.flush()?;
            let line = self.stream.read_line()?;
            let prompt = trim_crlf(&line);
            if !prompt.is_empty() {
                info!(
                    "auto-discovered u-boot prompt as {:?}",
                    String::from_utf8_lossy(prompt)
                );
                return Ok(UbootShell {
                    stream: self.stream,
                    prompt: prompt.to_vec(),
                });
            }
        }
        Err(Error::PromptUndiscovered)
    }
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\r' || line[end - 1] == b'\n') {
        end -= 1;
    }
    &line[..end]
}

/// A u-boot shell with a discovered prompt, ready to run commands.
///
/// The prompt is constant for the lifetime of the shell; every command
/// re-synchronizes on it (or on an explicit sentinel for special commands).
pub struct UbootShell<S> {
    stream: ExpectEngine<S>,
    prompt: Vec<u8>,
}

impl<S: Read + Write> UbootShell<S> {
    /// The discovered prompt bytes.
    pub fn prompt(&self) -> &[u8] {
        &self.prompt
    }

    fn send_line(&mut self, text: &str) -> Result<()> {
        self.stream.write_all(text.as_bytes())?;
        self.stream.write_all(b"\n")?;
        self.stream.flush()?;
        Ok(())
    }

    /// The console echoes every command verbatim followed by `\r\n`.
    fn discard_echo(&mut self, cmd: &str) -> Result<()> {
        let mut echo = Vec::with_capacity(cmd.len() + 2);
        echo.extend_from_slice(cmd.as_bytes());
        echo.extend_from_slice(b"\r\n");
        self.stream.discard_until(&echo)
    }

    /// Run a command and capture its output.
    ///
    /// Returns everything between the echoed command and the next prompt,
    /// excluding the prompt itself.
    pub fn command(&mut self, cmd: &str) -> Result<String> {
        debug!("execute in u-boot: {cmd}");
        self.send_line(cmd)?;
        self.discard_echo(cmd)?;
        let output = self.stream.collect_until(&self.prompt)?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Run a command whose post-condition is a sentinel other than the
    /// prompt, such as a receive-mode banner or a reset message.
    pub fn special_command(&mut self, cmd: &str, wait_for: &str) -> Result<()> {
        debug!("execute in u-boot: {cmd}");
        self.send_line(cmd)?;
        self.discard_echo(cmd)?;
        self.stream.discard_until(wait_for.as_bytes())
    }

    /// Discard console output until the prompt re-appears.
    pub fn wait_for_prompt(&mut self) -> Result<()> {
        self.stream.discard_until(&self.prompt)
    }

    /// Set a u-boot environment variable.
    pub fn set_env(&mut self, key: &str, value: &str) -> Result<()> {
        let cmd = format!("setenv {key} \"{}\"", escape_env_value(value));
        self.command(&cmd)?;
        Ok(())
    }

    /// Write the u-boot environment to persistent storage.
    pub fn save_env(&mut self) -> Result<()> {
        self.command("saveenv")?;
        Ok(())
    }

    /// Reset the board.
    pub fn reset(&mut self) -> Result<()> {
        self.special_command("reset", "resetting ..")
    }

    /// Upload a file with the YMODEM protocol, then re-synchronize on the
    /// prompt.
    ///
    /// U-boot must already be in receive mode; use [`Self::special_command`]
    /// with the `loady` banner to enter it first.
    pub fn send_file<P: AsRef<Path>>(
        &mut self,
        path: P,
        observer: &mut dyn Observer,
    ) -> Result<()> {
        let transfer = Transfer::open(path)?
            .with_block_kind(BlockKind::Large)
            .with_retry_budget(TRANSFER_RETRY_BUDGET)
            .with_observer(observer);
        // The engine implements Read + Write and drains its own buffer
        // first, so the transfer sees every byte the shell has not consumed.
        transfer.send_to(&mut self.stream)?;
        self.wait_for_prompt()
    }

    /// Give up the shell and return the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

/// Backslash-escape characters that u-boot's hush shell would otherwise
/// interpret inside a double-quoted word.
fn escape_env_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    struct FakeConsole {
        input: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl FakeConsole {
        fn new(input: &[u8]) -> Self {
            Self {
                input: Cursor::new(input.to_vec()),
                written: Vec::new(),
            }
        }
    }

    impl Read for FakeConsole {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for FakeConsole {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn primed(input: &[u8], prompt: &[u8]) -> UbootShell<FakeConsole> {
        UbootShell {
            stream: ExpectEngine::new(FakeConsole::new(input)),
            prompt: prompt.to_vec(),
        }
    }

    #[test]
    fn interrupt_boot_sends_newline_after_sentinel() {
        let input = b"U-Boot 2020.01\r\nHit any key to stop autoboot:  2 \r\n";
        let mut console = UbootConsole::new(FakeConsole::new(input));
        console.interrupt_boot().unwrap();
        assert_eq!(console.stream.get_ref().written, b"\n");
    }

    #[test]
    fn interrupt_boot_window_missed() {
        let mut console = UbootConsole::new(FakeConsole::new(b"booting straight away\r\n"));
        assert!(matches!(
            console.interrupt_boot(),
            Err(Error::BootWindowMissed)
        ));
    }

    #[test]
    fn probe_prompt_skips_empty_lines() {
        let console = UbootConsole::new(FakeConsole::new(b"\r\n\r\nhisilicon # "));
        let shell = console.probe_prompt().unwrap();
        assert_eq!(shell.prompt(), b"hisilicon # ");
    }

    #[test]
    fn probe_prompt_takes_first_nonempty_line() {
        let console = UbootConsole::new(FakeConsole::new(b"hisilicon # \r\n"));
        let shell = console.probe_prompt().unwrap();
        assert_eq!(shell.prompt(), b"hisilicon # ");
    }

    #[test]
    fn probe_prompt_gives_up_after_three_empty_lines() {
        let console = UbootConsole::new(FakeConsole::new(b"\r\n\r\n\r\n\r\n"));
        assert!(matches!(
            console.probe_prompt(),
            Err(Error::PromptUndiscovered)
        ));
    }

    #[test]
    fn command_returns_output_between_echo_and_prompt() {
        let input = b"getinfo version\r\nU-Boot 2020.01\r\nhisilicon # ";
        let mut shell = primed(input, b"hisilicon # ");
        let output = shell.command("getinfo version").unwrap();
        assert_eq!(output, "U-Boot 2020.01\r\n");
        assert_eq!(shell.stream.get_ref().written, b"getinfo version\n");
    }

    #[test]
    fn command_with_empty_output() {
        let input = b"sf probe 0\r\nhisilicon # ";
        let mut shell = primed(input, b"hisilicon # ");
        assert_eq!(shell.command("sf probe 0").unwrap(), "");
    }

    #[test]
    fn special_command_waits_for_sentinel() {
        let input = b"reset\r\nsome noise\r\nresetting ..ok";
        let mut shell = primed(input, b"hisilicon # ");
        shell.reset().unwrap();
        // The sentinel was consumed, the rest is still on the stream.
        let mut rest = Vec::new();
        shell.stream.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"ok");
    }

    #[test]
    fn set_env_quotes_and_escapes_value() {
        let cmd = "setenv bootargs \"root=flash fstype=\\\"jffs2\\\" addr=\\$base\"";
        let mut input = Vec::new();
        input.extend_from_slice(cmd.as_bytes());
        input.extend_from_slice(b"\r\nhisilicon # ");
        let mut shell = primed(&input, b"hisilicon # ");
        shell
            .set_env("bootargs", "root=flash fstype=\"jffs2\" addr=$base")
            .unwrap();
        let mut expected = cmd.as_bytes().to_vec();
        expected.push(b'\n');
        assert_eq!(shell.stream.get_ref().written, expected);
    }

    #[test]
    fn save_env_runs_saveenv() {
        let input = b"saveenv\r\nSaving Environment to SPI Flash...\r\nhisilicon # ";
        let mut shell = primed(input, b"hisilicon # ");
        shell.save_env().unwrap();
        assert_eq!(shell.stream.get_ref().written, b"saveenv\n");
    }

    #[test]
    fn wait_for_prompt_discards_through_prompt() {
        let input = b"leftover transfer noise\r\nhisilicon # tail";
        let mut shell = primed(input, b"hisilicon # ");
        shell.wait_for_prompt().unwrap();
        let mut rest = Vec::new();
        shell.stream.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"tail");
    }

    #[test]
    fn escape_env_value_passthrough() {
        assert_eq!(escape_env_value("plain value"), "plain value");
        assert_eq!(escape_env_value("a\"b$c\\d"), "a\\\"b\\$c\\\\d");
    }
}
