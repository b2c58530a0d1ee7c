use crate::MessageHeader;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// Ready-made header for callers that only need an id next to the payload.
// Small enough (12 bytes) to fit chunks as small as 16 bytes with room
// for payload.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, AsBytes, FromZeroes, FromBytes)]
pub struct BasicHeader {
    pub payload_size: i32,
    pub message_id: u32,
    /// Non-zero marks a skip header.
    pub skip: u8,
    pub _reserved: [u8; 3],
}

impl BasicHeader {
    pub fn new(message_id: u32, payload_size: i32) -> Self {
        Self {
            payload_size,
            message_id,
            ..Self::default()
        }
    }
}

impl MessageHeader for BasicHeader {
    #[inline]
    fn payload_size(&self) -> i32 {
        self.payload_size
    }

    #[inline]
    fn is_skip(&self) -> bool {
        self.skip != 0
    }

    fn skip_marker() -> Self {
        Self {
            skip: 1,
            ..Self::default()
        }
    }
}
