//! Core data model and wire codec for tlogpeek.
//!
//! This crate defines the types shared by every tlogpeek component:
//!
//! 1. **Versioned messages**: `VersionSubsequenceMessage` - the fundamental
//!    unit a peek cursor yields, totally ordered by `(version, subsequence)`
//! 2. **Storage team identity**: `StorageTeamId` - the stable id of one
//!    remote mutation stream
//! 3. **Wire codec**: `MessageSerializer` / `MessageDeserializer` - the
//!    framed binary block a TLog server packs a peek reply into
//!
//! The codec is deliberately small: a magic word, a fixed header, varint
//! version groups, and a CRC32 trailer. Message payloads are `Bytes` slices
//! of the reply buffer, so decoding a block never copies payload data.

pub mod codec;
pub mod error;
pub mod message;
pub mod types;
pub mod varint;

pub use codec::{MessageDeserializer, MessageSerializer};
pub use error::{CodecError, Result};
pub use message::{Message, Mutation, VersionSubsequenceMessage};
pub use types::{LogPosition, StorageTeamId, Subsequence, Version};
