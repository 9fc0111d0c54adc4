//! Pattern matching over an unframed byte stream.
//!
//! A serial console has no framing: the only way to know where a response
//! ends is to look for a literal sentinel such as the shell prompt. The
//! [`ExpectEngine`] slices an arbitrary byte stream by locating such
//! delimiters, collecting or discarding everything read before them.
//!
//! Matching is deliberately naive (no KMP). Delimiters are short and the
//! line rate of a UART dominates any matching cost.

use std::cmp;
use std::io::{self, Read, Write};

use crate::error::{Error, Result};

/// Size of the internal read-ahead buffer.
const CHUNK: usize = 4096;

/// Buffered reader that can locate literal delimiters in a byte stream.
///
/// The engine owns the stream. It also implements [`Read`] (draining its
/// internal buffer before touching the underlying stream) and [`Write`]
/// (pass-through), so a caller that temporarily needs raw access to the
/// stream, such as a file transfer, can go through the engine without losing
/// bytes that were already buffered.
pub struct ExpectEngine<S> {
    inner: S,
    buf: Vec<u8>,
    pos: usize,
}

impl<S> ExpectEngine<S> {
    /// Wrap a stream in a new expect engine.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            pos: 0,
        }
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Unwrap the engine, discarding any buffered bytes.
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Put the byte just read back at the head of the stream.
    ///
    /// Only valid immediately after a successful [`Self::read_byte`]; the
    /// byte is still in the buffer, so un-reading is a position rollback.
    fn unread_byte(&mut self) {
        debug_assert!(self.pos > 0);
        self.pos -= 1;
    }
}

impl<S: Read> ExpectEngine<S> {
    fn fill(&mut self) -> Result<()> {
        debug_assert_eq!(self.buffered(), 0);
        self.buf.resize(CHUNK, 0);
        self.pos = 0;
        match self.inner.read(&mut self.buf) {
            Ok(0) => {
                self.buf.clear();
                Err(Error::StreamEnded)
            }
            Ok(n) => {
                self.buf.truncate(n);
                Ok(())
            }
            Err(e) => {
                self.buf.clear();
                Err(e.into())
            }
        }
    }

    fn read_byte(&mut self) -> Result<u8> {
        if self.buffered() == 0 {
            self.fill()?;
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// Collect and return the bytes read before `delim` appears.
    ///
    /// `delim` itself is consumed from the stream but not included in the
    /// result: the returned buffer is exactly the bytes consumed with the
    /// trailing delimiter removed. Fails with [`Error::StreamEnded`] if the
    /// stream ends before the delimiter is seen.
    pub fn collect_until(&mut self, delim: &[u8]) -> Result<Vec<u8>> {
        debug_assert!(!delim.is_empty());
        let mut collected = Vec::new();
        let mut i = 0;
        while i < delim.len() {
            let b = self.read_byte()?;
            if delim[i] == b {
                i += 1;
            } else if i > 0 {
                // False start: the partially matched bytes were ordinary
                // data after all, and `b` may begin a fresh match.
                collected.extend_from_slice(&delim[..i]);
                i = 0;
                self.unread_byte();
            } else {
                collected.push(b);
            }
        }
        Ok(collected)
    }

    /// Skip the bytes read before `delim` appears, consuming `delim` too.
    pub fn discard_until(&mut self, delim: &[u8]) -> Result<()> {
        debug_assert!(!delim.is_empty());
        let mut i = 0;
        while i < delim.len() {
            let b = self.read_byte()?;
            if delim[i] == b {
                i += 1;
            } else if i > 0 {
                i = 0;
                self.unread_byte();
            }
        }
        Ok(())
    }

    /// Read one `\n`-terminated line, returning it without the `\n`.
    ///
    /// End of stream terminates the line as well, so a final unterminated
    /// line is still returned.
    pub fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            match self.read_byte() {
                Ok(b'\n') => return Ok(line),
                Ok(b) => line.push(b),
                Err(Error::StreamEnded) => return Ok(line),
                Err(e) => return Err(e),
            }
        }
    }
}

impl<S: Read> Read for ExpectEngine<S> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.buffered() > 0 {
            let n = cmp::min(out.len(), self.buffered());
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        self.inner.read(out)
    }
}

impl<S: Write> Write for ExpectEngine<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
