//! Message Data Structure
//!
//! This module defines `VersionSubsequenceMessage` - the fundamental unit
//! a peek cursor yields.
//!
//! ## Structure
//! Each record contains:
//! - **version**: the commit version the message belongs to
//! - **subsequence**: ordering counter within the version (starts at 1)
//! - **message**: the payload, a tagged union
//!
//! ## Message kinds
//! - `Mutation`: an opaque key/value mutation. Cursors order and surface
//!   mutations; they never interpret their contents.
//! - `EmptyVersion`: placeholder committed for versions in which a team
//!   received no mutations. The broadcast model relies on these for
//!   cross-team version alignment; strict-mutation consumers skip them.
//! - `SpanContext`: tracing span metadata attached to a version.
//! - `LogProtocol`: protocol version change marker.
//!
//! ## Design Decisions
//! - Uses `bytes::Bytes` for payloads so records are zero-copy views of the
//!   reply buffer they were decoded from
//! - Ordering between records is exposed through `position()` rather than
//!   an `Ord` impl, because records at the same position with different
//!   payloads are not equal

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::{LogPosition, Subsequence, Version};

/// An opaque key/value mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    pub key: Bytes,
    pub value: Bytes,
}

impl Mutation {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Estimate the size of this mutation in bytes.
    pub fn estimated_size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

/// Payload of one record in the mutation stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Mutation(Mutation),
    EmptyVersion,
    SpanContext(Bytes),
    LogProtocol(Bytes),
}

impl Message {
    pub fn is_empty_version(&self) -> bool {
        matches!(self, Message::EmptyVersion)
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, Message::Mutation(_))
    }
}

/// One record of the committed mutation stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSubsequenceMessage {
    pub version: Version,
    pub subsequence: Subsequence,
    pub message: Message,
}

impl VersionSubsequenceMessage {
    pub fn new(version: Version, subsequence: Subsequence, message: Message) -> Self {
        Self {
            version,
            subsequence,
            message,
        }
    }

    /// The record's point in the global `(version, subsequence)` order.
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.version, self.subsequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_estimated_size() {
        let m = Mutation::new(&b"key"[..], &b"value"[..]);
        assert_eq!(m.estimated_size(), 8);
    }

    #[test]
    fn test_is_empty_version() {
        assert!(Message::EmptyVersion.is_empty_version());
        assert!(!Message::Mutation(Mutation::new(&b"k"[..], &b"v"[..])).is_empty_version());
        assert!(!Message::SpanContext(Bytes::from_static(b"span")).is_empty_version());
    }

    #[test]
    fn test_position_matches_fields() {
        let vsm = VersionSubsequenceMessage::new(100, 3, Message::EmptyVersion);
        assert_eq!(vsm.position(), LogPosition::new(100, 3));
    }

    #[test]
    fn test_positions_sort_across_versions() {
        let a = VersionSubsequenceMessage::new(100, 9, Message::EmptyVersion);
        let b = VersionSubsequenceMessage::new(101, 1, Message::EmptyVersion);
        assert!(a.position() < b.position());
    }

    #[test]
    fn test_equality_includes_payload() {
        let a = VersionSubsequenceMessage::new(
            100,
            1,
            Message::Mutation(Mutation::new(&b"k"[..], &b"v1"[..])),
        );
        let b = VersionSubsequenceMessage::new(
            100,
            1,
            Message::Mutation(Mutation::new(&b"k"[..], &b"v2"[..])),
        );
        assert_eq!(a.position(), b.position());
        assert_ne!(a, b);
    }

    #[test]
    fn test_serde_roundtrip() {
        let vsm = VersionSubsequenceMessage::new(
            7,
            2,
            Message::Mutation(Mutation::new(&b"user"[..], &b"data"[..])),
        );
        let json = serde_json::to_string(&vsm).expect("serialize");
        let back: VersionSubsequenceMessage = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(vsm, back);
    }
}
