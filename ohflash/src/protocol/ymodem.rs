//! YMODEM-1K sender used to upload images to the U-Boot `loady` command.
//!
//! The transfer is sender-initiated but peer-paced: the bootloader requests
//! each phase by sending `'C'` and acknowledges every framed block.
//!
//! ```text
//! Block format:
//! +---------+-----+------+------------------+-------+-------+
//! | SOH/STX | idx | ~idx | payload (128/1K) | crcHi | crcLo |
//! +---------+-----+------+------------------+-------+-------+
//! ```
//!
//! Block 0 carries file metadata (`basename NUL decimal-size`) and is padded
//! with 0x00; data blocks are padded with 0x1A. Both padding values were
//! confirmed by capturing USB traffic of a known-good flashing session.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::progress::Observer;
use crate::protocol::crc::crc16;

/// Control bytes of the transfer protocol.
pub mod control {
    /// Start of a small (128-byte) block.
    pub const SOH: u8 = 0x01;
    /// Start of a large (1024-byte) block.
    pub const STX: u8 = 0x02;
    /// End of transmission.
    pub const EOT: u8 = 0x04;
    /// Positive acknowledgement.
    pub const ACK: u8 = 0x06;
    /// Negative acknowledgement.
    pub const NAK: u8 = 0x15;
    /// Cancel; sent in pairs to abort a session.
    pub const CAN: u8 = 0x18;
    /// The receiver's request to begin a block or file (`'C'`).
    pub const POLL: u8 = 0x43;
}

/// Padding byte for the metadata and terminator blocks.
const INFO_PADDING: u8 = 0x00;

/// Padding byte for data blocks.
const DATA_PADDING: u8 = 0x1A;

/// Retry budget used when the caller does not choose one.
const DEFAULT_RETRY_BUDGET: u32 = 10;

/// A control byte with a readable rendering for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlByte(pub u8);

impl fmt::Display for ControlByte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            control::SOH => write!(f, "SOH"),
            control::STX => write!(f, "STX"),
            control::EOT => write!(f, "EOT"),
            control::ACK => write!(f, "ACK"),
            control::NAK => write!(f, "NAK"),
            control::CAN => write!(f, "CAN"),
            control::POLL => write!(f, "POLL"),
            other => write!(f, "{other:#04x}"),
        }
    }
}

/// Transfer block size selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockKind {
    /// 128-byte blocks framed with SOH.
    #[default]
    Small,
    /// 1024-byte blocks framed with STX.
    Large,
}

impl BlockKind {
    /// Payload size of a block of this kind.
    pub fn size(self) -> usize {
        match self {
            Self::Small => 128,
            Self::Large => 1024,
        }
    }

    fn start_byte(self) -> u8 {
        match self {
            Self::Small => control::SOH,
            Self::Large => control::STX,
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Small => write!(f, "small (128)"),
            Self::Large => write!(f, "large (1024)"),
        }
    }
}

/// Assemble one framed block of `kind.size() + 5` bytes.
///
/// The CRC covers the padded payload only; start byte, index and complement
/// are excluded.
fn build_block(kind: BlockKind, idx: u8, payload: &[u8], padding: u8) -> Vec<u8> {
    let block_size = kind.size();
    debug_assert!(payload.len() <= block_size);
    let mut frame = Vec::with_capacity(block_size + 5);
    frame.push(kind.start_byte());
    frame.push(idx);
    frame.push(!idx);
    frame.extend_from_slice(payload);
    frame.resize(3 + block_size, padding);
    let crc = crc16(&frame[3..3 + block_size]);
    frame.push((crc >> 8) as u8);
    frame.push((crc & 0xFF) as u8);
    frame
}

fn read_control_byte<S: Read>(stream: &mut S) -> Result<u8> {
    let mut buf = [0u8; 1];
    match stream.read_exact(&mut buf) {
        Ok(()) => {
            trace!("read control byte {}", ControlByte(buf[0]));
            Ok(buf[0])
        }
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::StreamEnded),
        Err(e) => Err(e.into()),
    }
}

fn write_control_byte<S: Write>(stream: &mut S, byte: u8) -> Result<()> {
    trace!("writing control byte {}", ControlByte(byte));
    stream.write_all(&[byte])?;
    stream.flush()?;
    Ok(())
}

fn expect_control<S: Read>(stream: &mut S, want: u8, expected: &'static str) -> Result<()> {
    let got = read_control_byte(stream)?;
    if got != want {
        return Err(Error::Desync {
            expected,
            actual: ControlByte(got),
        });
    }
    Ok(())
}

/// Read from `source` until `buf` is full or the source is exhausted.
fn read_chunk<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Sender side of one YMODEM file transfer.
///
/// A session is constructed for a single file, configured with the builder
/// methods and consumed by [`Transfer::send_to`]. The retry budget counts
/// allowable non-ACK responses across the whole session.
pub struct Transfer<'a, R> {
    source: R,
    file_name: String,
    file_size: u64,
    block_kind: BlockKind,
    retries: u32,
    bytes_sent: u64,
    observer: Option<&'a mut dyn Observer>,
}

impl Transfer<'static, File> {
    /// Create a transfer session for the file at `path`.
    ///
    /// The metadata block carries the basename only; directory components
    /// are stripped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Transfer::from_reader(file, file_name, file_size))
    }
}

impl<R: Read> Transfer<'static, R> {
    /// Create a transfer session over an arbitrary data source.
    ///
    /// `file_size` must match the number of bytes `source` will yield; it is
    /// announced to the receiver and drives the block count.
    pub fn from_reader(source: R, file_name: impl Into<String>, file_size: u64) -> Self {
        Self {
            source,
            file_name: file_name.into(),
            file_size,
            block_kind: BlockKind::default(),
            retries: DEFAULT_RETRY_BUDGET,
            bytes_sent: 0,
            observer: None,
        }
    }
}

impl<'a, R: Read> Transfer<'a, R> {
    /// Select the transfer block kind.
    #[must_use]
    pub fn with_block_kind(mut self, block_kind: BlockKind) -> Self {
        self.block_kind = block_kind;
        self
    }

    /// Set the session retry budget.
    #[must_use]
    pub fn with_retry_budget(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Attach an observer that is notified of transfer progress.
    #[must_use]
    pub fn with_observer<'b>(self, observer: &'b mut dyn Observer) -> Transfer<'b, R> {
        Transfer {
            source: self.source,
            file_name: self.file_name,
            file_size: self.file_size,
            block_kind: self.block_kind,
            retries: self.retries,
            bytes_sent: self.bytes_sent,
            observer: Some(observer),
        }
    }

    /// Run the transfer to completion against a bidirectional stream.
    ///
    /// On any failure the session writes `CAN CAN` to tell the receiver to
    /// abort, then surfaces the error unchanged.
    pub fn send_to<S: Read + Write>(mut self, stream: &mut S) -> Result<()> {
        debug!(
            "sending {:?} ({} bytes) in {} blocks",
            self.file_name, self.file_size, self.block_kind
        );
        let result = self.run(stream);
        if result.is_err() {
            let _ = stream.write_all(&[control::CAN, control::CAN]);
            let _ = stream.flush();
        }
        result
    }

    fn run<S: Read + Write>(&mut self, stream: &mut S) -> Result<()> {
        self.send_file_info(stream)?;
        self.send_file_data(stream)?;
        self.terminate(stream)
    }

    /// Block 0 payload: basename, NUL, then the size in decimal ASCII.
    fn info_payload(&self) -> Vec<u8> {
        let size = self.file_size.to_string();
        let mut payload = Vec::with_capacity(self.file_name.len() + 1 + size.len());
        payload.extend_from_slice(self.file_name.as_bytes());
        payload.push(0x00);
        payload.extend_from_slice(size.as_bytes());
        payload
    }

    fn spend_retry(&mut self, doing: &'static str) -> Result<()> {
        self.retries = self.retries.saturating_sub(1);
        if self.retries == 0 {
            return Err(Error::TooManyRetries(doing));
        }
        debug!("retrying: {doing} ({} attempts left)", self.retries);
        Ok(())
    }

    fn send_file_info<S: Read + Write>(&mut self, stream: &mut S) -> Result<()> {
        // The receiver requests the file by sending POLL.
        expect_control(stream, control::POLL, "initial POLL")?;

        let payload = self.info_payload();
        loop {
            // The metadata block is zero-padded, unlike data blocks.
            stream.write_all(&build_block(self.block_kind, 0, &payload, INFO_PADDING))?;
            stream.flush()?;
            match read_control_byte(stream)? {
                control::ACK => return Ok(()),
                control::NAK => self.spend_retry("sending file info")?,
                control::CAN => {
                    // The abort burst carries a few more CANs; drain them so
                    // they are not mistaken for shell output later.
                    let mut rest = [0u8; 3];
                    stream
                        .read_exact(&mut rest)
                        .map_err(|e| match e.kind() {
                            io::ErrorKind::UnexpectedEof => Error::StreamEnded,
                            _ => e.into(),
                        })?;
                    return Err(Error::TransferRejected);
                }
                other => {
                    return Err(Error::Desync {
                        expected: "ACK, NAK or CAN",
                        actual: ControlByte(other),
                    })
                }
            }
        }
    }

    fn send_file_data<S: Read + Write>(&mut self, stream: &mut S) -> Result<()> {
        // The receiver accepted the file; wait until it asks for data.
        expect_control(stream, control::POLL, "data POLL")?;

        let block_size = self.block_kind.size();
        let num_blocks = self.file_size.div_ceil(block_size as u64);
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.start(&self.file_name, self.file_size);
        }
        let mut chunk = vec![0u8; block_size];
        // Data blocks are 1-based; the index only has to keep incrementing
        // mod 256, it does not need to cover the whole file.
        let mut seq: u8 = 1;
        for _ in 0..num_blocks {
            let n = read_chunk(&mut self.source, &mut chunk)?;
            loop {
                stream.write_all(&build_block(self.block_kind, seq, &chunk[..n], DATA_PADDING))?;
                stream.flush()?;
                let response = read_control_byte(stream)?;
                if response == control::ACK {
                    break;
                }
                trace!("block {seq} not acknowledged: {}", ControlByte(response));
                self.spend_retry("sending file data")?;
            }
            seq = seq.wrapping_add(1);
            self.bytes_sent += n as u64;
            if let Some(observer) = self.observer.as_deref_mut() {
                observer.progress(self.bytes_sent, self.file_size);
            }
        }
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.finish();
        }
        Ok(())
    }

    fn terminate<S: Read + Write>(&mut self, stream: &mut S) -> Result<()> {
        write_control_byte(stream, control::EOT)?;
        expect_control(stream, control::ACK, "1st termination ACK")?;
        expect_control(stream, control::ACK, "2nd termination ACK")?;
        expect_control(stream, control::POLL, "termination POLL")?;
        // Empty block 0 closes the session.
        stream.write_all(&build_block(self.block_kind, 0, &[], INFO_PADDING))?;
        stream.flush()?;
        expect_control(stream, control::ACK, "final termination ACK")?;
        debug!("transfer of {:?} complete", self.file_name);
        Ok(())
    }
}
