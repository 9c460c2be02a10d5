//! Write adapter that counts bytes as they pass through; READDIR and
//! READDIRPLUS use it to stay inside the client's reply-size budget.

use std::io::{Result, Write};

pub struct WriteCounter<W: Write> {
    inner: W,
    count: usize,
}

impl<W: Write> WriteCounter<W> {
    pub fn new(inner: W) -> WriteCounter<W> {
        WriteCounter { inner, count: 0 }
    }

    pub fn bytes_written(&self) -> usize {
        self.count
    }
}

impl<W: Write> Write for WriteCounter<W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let written = self.inner.write(buf)?;
        self.count += written;
        Ok(written)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}
