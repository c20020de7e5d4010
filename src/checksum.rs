//! Pass-through writers that watch the bytes going by.

use std::io;
use std::io::prelude::*;

use adler2::Adler32;

/// Writer that keeps an Adler-32 checksum of everything written through it.
///
/// The checksum is advisory: we log it, but nothing reads it back.
pub struct Adler32Writer<W> {
    inner: W,
    hasher: Adler32,
}

impl<W> Adler32Writer<W> {
    pub fn new(inner: W) -> Adler32Writer<W> {
        Adler32Writer {
            inner,
            hasher: Adler32::new(),
        }
    }

    /// The checksum of all bytes the inner writer has accepted so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.checksum()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for Adler32Writer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.hasher.write_slice(&buf[..count]);
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writer that counts the bytes the inner writer has accepted,
/// so we know where each record lands in the archive.
pub(crate) struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W> CountingWriter<W> {
    pub fn new(inner: W) -> CountingWriter<W> {
        CountingWriter { inner, count: 0 }
    }

    pub fn position(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = self.inner.write(buf)?;
        self.count += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
