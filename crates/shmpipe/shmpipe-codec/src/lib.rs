pub mod header;

pub use header::BasicHeader;
pub use zerocopy::{AsBytes, FromBytes, FromZeroes};

use std::marker::PhantomData;
use std::mem::size_of;

/// A fixed-size message header that travels in front of every payload.
///
/// The transport only needs the payload byte count and the skip flag; any
/// other fields are the caller's business. The zerocopy bounds pin the
/// binary layout at compile time: `AsBytes` rejects padding and `FromBytes`
/// rejects fields with invalid bit patterns (`bool`, enums, references), so
/// a header read back from shared memory is always a valid value. Store the
/// skip flag as a `u8`.
///
/// Both processes must be built with the same header type.
pub trait MessageHeader: AsBytes + FromBytes + Copy + Send + Sync + 'static {
    /// Number of payload bytes that follow the header.
    fn payload_size(&self) -> i32;

    /// Skip headers pad the ring up to its end; they carry no payload and are
    /// never delivered to the receiver.
    fn is_skip(&self) -> bool;

    /// A zero-payload header with the skip flag set.
    fn skip_marker() -> Self;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer of {available} bytes cannot hold a {needed}-byte header")]
    ShortBuffer { needed: usize, available: usize },
}

/// Exact, fixed-width (de)serialization of a [`MessageHeader`].
///
/// This is not a portable wire format: the bytes are the in-memory
/// representation of `H` on the host that wrote them.
#[derive(Debug, Clone, Copy)]
pub struct HeaderCodec<H> {
    _pd: PhantomData<fn() -> H>,
}

impl<H: MessageHeader> HeaderCodec<H> {
    pub const SIZE: usize = size_of::<H>();

    pub fn new() -> Self {
        Self { _pd: PhantomData }
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        Self::SIZE
    }

    /// Write `header` into the first `size()` bytes of `dst`.
    #[inline]
    pub fn encode(&self, header: &H, dst: &mut [u8]) -> Result<(), CodecError> {
        let available = dst.len();
        let dst = dst.get_mut(..Self::SIZE).ok_or(CodecError::ShortBuffer {
            needed: Self::SIZE,
            available,
        })?;
        dst.copy_from_slice(header.as_bytes());
        Ok(())
    }

    /// Read a header from the first `size()` bytes of `src`.
    #[inline]
    pub fn decode(&self, src: &[u8]) -> Result<H, CodecError> {
        src.get(..Self::SIZE)
            .and_then(H::read_from)
            .ok_or(CodecError::ShortBuffer {
                needed: Self::SIZE,
                available: src.len(),
            })
    }

    /// The encoded form of `header`, borrowed without copying.
    #[inline(always)]
    pub fn encoded<'h>(&self, header: &'h H) -> &'h [u8] {
        header.as_bytes()
    }

    /// Decode a header in place: `fill` must copy exactly `size()` bytes
    /// into the slice it is given.
    #[inline]
    pub fn decode_with<E>(&self, fill: impl FnOnce(&mut [u8]) -> Result<(), E>) -> Result<H, E> {
        let mut header = H::new_zeroed();
        fill(header.as_bytes_mut())?;
        Ok(header)
    }
}

impl<H: MessageHeader> Default for HeaderCodec<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_every_field() {
        let codec = HeaderCodec::<BasicHeader>::new();
        let header = BasicHeader {
            payload_size: 1234,
            message_id: 0xdead_beef,
            skip: 0,
            _reserved: [0; 3],
        };

        let mut buf = [0u8; 32];
        codec.encode(&header, &mut buf).unwrap();
        assert_eq!(codec.decode(&buf).unwrap(), header);
    }

    #[test]
    fn skip_marker_round_trips_as_skip() {
        let codec = HeaderCodec::<BasicHeader>::new();
        let mut buf = vec![0xffu8; codec.size()];
        codec.encode(&BasicHeader::skip_marker(), &mut buf).unwrap();

        let decoded = codec.decode(&buf).unwrap();
        assert!(decoded.is_skip());
        assert_eq!(decoded.payload_size(), 0);
    }

    #[test]
    fn short_buffers_are_rejected() {
        let codec = HeaderCodec::<BasicHeader>::new();
        let mut small = [0u8; 4];
        assert_eq!(
            codec.encode(&BasicHeader::default(), &mut small),
            Err(CodecError::ShortBuffer {
                needed: 12,
                available: 4
            })
        );
        assert!(codec.decode(&small).is_err());
    }

    #[test]
    fn in_place_decode_matches_slice_decode() {
        let codec = HeaderCodec::<BasicHeader>::new();
        let header = BasicHeader::new(3, 40);
        let bytes = codec.encoded(&header).to_vec();
        assert_eq!(bytes.len(), codec.size());

        let decoded = codec
            .decode_with(|dst| {
                dst.copy_from_slice(&bytes);
                Ok::<_, ()>(())
            })
            .unwrap();
        assert_eq!(decoded, codec.decode(&bytes).unwrap());
    }

    #[test]
    fn any_nonzero_skip_byte_reads_as_skip() {
        let codec = HeaderCodec::<BasicHeader>::new();
        let mut buf = [0u8; 12];
        buf[8] = 0x7f;
        assert!(codec.decode(&buf).unwrap().is_skip());
    }
}
