use shmpipe_mmap::SharedRegion;
use std::io::{self, Read, Write};

/// Read cursor over the payload of one received message.
///
/// Reads stop at the end of the payload declared in the header, so a
/// handler can never read into the next message.
pub struct PayloadReader<'a> {
    region: &'a SharedRegion,
    start: usize,
    len: usize,
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub(crate) fn new(region: &'a SharedRegion, start: usize, len: usize) -> Self {
        debug_assert!(start + len <= region.len());
        Self {
            region,
            start,
            len,
            pos: 0,
        }
    }

    /// Byte offset of the payload within the region.
    pub fn offset(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remaining(&self) -> usize {
        self.len - self.pos
    }
}

impl Read for PayloadReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        self.region.read_at(self.start + self.pos, &mut buf[..n])?;
        self.pos += n;
        Ok(n)
    }
}

/// Write cursor handed to the payload writer passed to `Source::send`.
///
/// Accepts at most the payload size declared in the header; writing more
/// fails with `WriteZero`.
pub struct PayloadWriter<'a> {
    region: &'a SharedRegion,
    start: usize,
    len: usize,
    pos: usize,
}

impl<'a> PayloadWriter<'a> {
    pub(crate) fn new(region: &'a SharedRegion, start: usize, len: usize) -> Self {
        debug_assert!(start + len <= region.len());
        Self {
            region,
            start,
            len,
            pos: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.len - self.pos
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl Write for PayloadWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !buf.is_empty() && self.remaining() == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("payload exceeds its declared size of {} bytes", self.len),
            ));
        }
        let n = buf.len().min(self.remaining());
        self.region.write_at(self.start + self.pos, &buf[..n])?;
        self.pos += n;
        Ok(n)
    }

    // Stores land directly in the shared mapping.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
