//! Growable byte buffer used by handlers to assemble requests and responses
//!
//! Capacity only grows until `release`; `clear` and `flush_to` reset the
//! length and keep the allocation for the next round.
//!
//! `Buffer` is both a `fmt::Write` and an `io::Write` sink. With both traits
//! imported, `write!` is ambiguous, so import only the one in use.

use std::fmt;
use std::io::{self, Read};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Guarantee room for `extra` more bytes without reallocating.
    pub fn ensure(&mut self, extra: usize) {
        let spare = self.data.capacity() - self.data.len();
        if spare < extra {
            self.data.reserve_exact(extra);
        }
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.ensure(bytes.len());
        self.data.extend_from_slice(bytes);
    }

    /// Append formatted text; usually reached through `write!`.
    pub fn append_fmt(&mut self, args: fmt::Arguments<'_>) {
        match args.as_str() {
            Some(s) => self.extend_from_slice(s.as_bytes()),
            None => self.extend_from_slice(fmt::format(args).as_bytes()),
        }
    }

    /// Append at most `max` bytes from one read of `source`.
    ///
    /// Returns the byte count, zero at end of input. A read interrupted by
    /// a deadline surfaces as `ErrorKind::Interrupted` with nothing appended.
    pub fn read_from<R>(&mut self, source: &mut R, max: usize) -> io::Result<usize>
    where
        R: Read + ?Sized,
    {
        self.ensure(max);
        let start = self.data.len();
        self.data.resize(start + max, 0);

        match source.read(&mut self.data[start..]) {
            Ok(n) => {
                self.data.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                self.data.truncate(start);
                Err(e)
            }
        }
    }

    /// Write every buffered byte to `dest` and reset the length to zero.
    pub fn flush_to<W: io::Write + ?Sized>(&mut self, dest: &mut W) -> io::Result<()> {
        dest.write_all(&self.data)?;
        self.data.clear();
        Ok(())
    }

    /// Length to zero, allocation kept.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Drop the allocation and return to the empty state.
    pub fn release(&mut self) {
        self.data = Vec::new();
    }
}

impl fmt::Write for Buffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

impl io::Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
