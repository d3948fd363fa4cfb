//! Handler-side view of the connection
//!
//! Inside a worker, stdin and stdout already are the connection. `Channel`
//! wraps private duplicates of both descriptors in plain `File`s, which do
//! no buffering of their own: every `write` goes straight to the socket and
//! there is nothing to flush.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;

#[derive(Debug)]
pub struct Channel {
    input: File,
    output: File,
}

impl Channel {
    /// Duplicate the worker's stdin and stdout.
    pub fn open() -> io::Result<Self> {
        let input = io::stdin().as_fd().try_clone_to_owned()?;
        let output = io::stdout().as_fd().try_clone_to_owned()?;
        Ok(Self {
            input: File::from(input),
            output: File::from(output),
        })
    }

    pub fn input(&mut self) -> &mut File {
        &mut self.input
    }

    pub fn output(&mut self) -> &mut File {
        &mut self.output
    }
}

impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for Channel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
