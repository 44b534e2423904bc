//! Record framing for segment log files.
//!
//! A stored record is a fixed 24-byte header followed by the opaque payload,
//! with no padding between records:
//!
//! ```text
//! [header 24][payload][header 24][payload]...
//!
//! header (big-endian):
//!   logical_offset: u64   global monotonic id of this record
//!   payload_size:   u64   payload length in bytes
//!   timestamp_ns:   u64   wall clock at append, nanoseconds since epoch
//! ```

/// Offset(8) + Size(8) + Timestamp(8) = 24 bytes
pub const HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordHeader {
    pub logical_offset: u64,
    pub payload_size: u64,
    pub timestamp_ns: u64,
}

impl RecordHeader {
    /// Encode into the first `HEADER_SIZE` bytes of `dst`.
    ///
    /// `dst` must be at least `HEADER_SIZE` bytes; shorter slices are a
    /// caller bug and panic.
    pub fn encode(&self, dst: &mut [u8]) {
        dst[0..8].copy_from_slice(&self.logical_offset.to_be_bytes());
        dst[8..16].copy_from_slice(&self.payload_size.to_be_bytes());
        dst[16..24].copy_from_slice(&self.timestamp_ns.to_be_bytes());
    }

    /// Decode from the first `HEADER_SIZE` bytes of `src`.
    ///
    /// `src` must be at least `HEADER_SIZE` bytes; callers guarantee length.
    pub fn decode(src: &[u8]) -> Self {
        Self {
            logical_offset: u64::from_be_bytes(src[0..8].try_into().unwrap()),
            payload_size: u64::from_be_bytes(src[8..16].try_into().unwrap()),
            timestamp_ns: u64::from_be_bytes(src[16..24].try_into().unwrap()),
        }
    }
}

/// A record read back out of a segment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub header: RecordHeader,
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = RecordHeader {
            logical_offset: 7_000_123,
            payload_size: 4096,
            timestamp_ns: 1_700_000_000_000_000_000,
        };

        let mut buf = [0u8; HEADER_SIZE];
        header.encode(&mut buf);
        assert_eq!(RecordHeader::decode(&buf), header);
    }

    #[test]
    fn header_layout_is_big_endian() {
        let header = RecordHeader {
            logical_offset: 1,
            payload_size: 2,
            timestamp_ns: 3,
        };

        let mut buf = [0u8; HEADER_SIZE];
        header.encode(&mut buf);

        assert_eq!(&buf[0..8], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(&buf[8..16], &[0, 0, 0, 0, 0, 0, 0, 2]);
        assert_eq!(&buf[16..24], &[0, 0, 0, 0, 0, 0, 0, 3]);
    }
}
