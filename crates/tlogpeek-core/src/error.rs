//! Error types for the core codec.

use thiserror::Error;

/// Convenience type alias for `Result<T, CodecError>`.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors produced while encoding or decoding a message block.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The block is shorter than its framing claims.
    #[error("truncated block: needed {needed} more bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    /// The block does not start with the expected magic word.
    #[error("bad magic: expected {expected:#010x}, found {found:#010x}")]
    BadMagic { expected: u32, found: u32 },

    /// The CRC32 trailer does not match the block contents.
    #[error("checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    /// A varint ran past 10 bytes or past the end of the block.
    #[error("malformed varint at offset {0}")]
    MalformedVarint(usize),

    /// An unknown message tag byte.
    #[error("unknown message tag {0:#04x}")]
    UnknownMessageTag(u8),

    /// Messages must be appended in strictly increasing
    /// `(version, subsequence)` order.
    #[error("out of order append: ({version}, {subsequence}) after ({last_version}, {last_subsequence})")]
    OutOfOrder {
        version: u64,
        subsequence: u32,
        last_version: u64,
        last_subsequence: u32,
    },
}
