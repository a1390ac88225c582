use super::{PortDevice, Transfer};
use log::warn;
use std::io::{self, Write};

/// Line-buffered console on the guest's output port.
///
/// Bytes accumulate until the guest writes `\n`; the line is then written to
/// the host sink including the newline. The buffer holds at most
/// `capacity - 1` bytes. A byte that arrives while the buffer is full forces
/// the pending bytes out unchanged (no newline is added) and starts a new
/// buffer with that byte, so no guest output is lost and the host stream is
/// byte-for-byte what the guest wrote. A partial line still buffered when the
/// guest halts is written out as is by [`Console::flush_pending`].
pub struct Console<W> {
    line: Vec<u8>,
    capacity: usize,
    out: W,
    written: u64,
}

impl<W: Write> Console<W> {
    pub fn new(capacity: usize, out: W) -> Self {
        Self { line: Vec::with_capacity(capacity), capacity, out, written: 0 }
    }

    pub fn write_byte(&mut self, b: u8) -> io::Result<()> {
        self.written += 1;
        if b == b'\n' {
            return self.flush_line(b"\n");
        }
        if self.line.len() + 1 >= self.capacity {
            self.flush_line(b"")?;
        }
        self.line.push(b);
        Ok(())
    }

    fn flush_line(&mut self, end: &[u8]) -> io::Result<()> {
        self.out.write_all(&self.line)?;
        self.out.write_all(end)?;
        self.out.flush()?;
        self.line.clear();
        Ok(())
    }

    /// Write out a partial line, if any, without adding a newline.
    pub fn flush_pending(&mut self) -> io::Result<()> {
        if self.line.is_empty() {
            return Ok(());
        }
        self.flush_line(b"")
    }

    /// Bytes buffered since the last flush.
    pub fn pending(&self) -> &[u8] {
        &self.line
    }

    /// Total bytes the guest has written to the port.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn sink(&self) -> &W {
        &self.out
    }
}

impl<W: Write> PortDevice for Console<W> {
    fn port_in(&mut self, transfer: Transfer) -> u8 {
        warn!("console: unexpected {:?}", transfer);
        0
    }

    fn port_out(&mut self, transfer: Transfer, value: u8) -> io::Result<()> {
        match transfer {
            Transfer::DataOut => self.write_byte(value),
            other => {
                warn!("console: unexpected {:?}", other);
                Ok(())
            }
        }
    }
}
