//! Chunk geometry and cursor arithmetic for the shared ring.
//!
//! The region is split into `number_of_chunks` equal chunks. A message
//! (header plus payload) always occupies a contiguous run of whole chunks;
//! it never wraps from the last chunk back to the first. This module holds
//! the arithmetic both ends use to agree on where each message lives.
//!
//! # Memory Layout
//!
//! ```text
//! chunk:   0          1          2          3
//!        ┌──────────┬──────────┬──────────┬──────────┐
//!        │ hdr|pay  │ hdr|payl │ oad      │ hdr(skip)│
//!        └──────────┴──────────┴──────────┴──────────┘
//!          1 chunk    2 chunks              1 chunk
//! ```

/// Geometry of one channel, fixed at construction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RingGeometry {
    chunk_size: usize,
    number_of_chunks: usize,
    header_size: usize,
}

impl RingGeometry {
    /// The caller has already validated `chunk_size >= header_size` and that
    /// neither count is zero (see `ChannelConfig::validate`).
    pub fn new(chunk_size: usize, number_of_chunks: usize, header_size: usize) -> Self {
        debug_assert!(chunk_size > 0 && number_of_chunks > 0);
        debug_assert!(chunk_size >= header_size);
        Self {
            chunk_size,
            number_of_chunks,
            header_size,
        }
    }

    #[inline(always)]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline(always)]
    pub fn number_of_chunks(&self) -> usize {
        self.number_of_chunks
    }

    #[inline(always)]
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    pub fn region_len(&self) -> usize {
        self.chunk_size * self.number_of_chunks
    }

    /// Number of chunks needed to hold a header plus `payload_size` bytes:
    /// `ceil((header_size + payload_size) / chunk_size)`.
    ///
    /// Returns `None` for a negative payload size.
    ///
    /// # Example
    ///
    /// ```text
    /// chunk_size = 16, header_size = 12
    ///
    /// payload  0 → 12 bytes → 1 chunk
    /// payload  4 → 16 bytes → 1 chunk
    /// payload  5 → 17 bytes → 2 chunks
    /// ```
    #[inline]
    pub fn chunks_needed_for(&self, payload_size: i32) -> Option<usize> {
        let payload = usize::try_from(payload_size).ok()?;
        Some((self.header_size + payload).div_ceil(self.chunk_size))
    }

    /// Byte offset of the first byte of chunk `index`.
    #[inline(always)]
    pub fn offset_of(&self, index: usize) -> usize {
        index * self.chunk_size
    }

    /// True if `span` chunks starting at `cursor` end at or before the end
    /// of the ring. If not, the writer must pad to the start first.
    #[inline(always)]
    pub fn fits_sequentially(&self, cursor: usize, span: usize) -> bool {
        cursor + span <= self.number_of_chunks
    }

    /// Cursor position after consuming `span` chunks at `cursor`.
    #[inline(always)]
    pub fn advance(&self, cursor: usize, span: usize) -> usize {
        (cursor + span) % self.number_of_chunks
    }
}
