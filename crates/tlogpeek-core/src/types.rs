//! Identifiers and ordering primitives.
//!
//! Versions are commit identifiers assigned by the transaction system:
//! monotonic, dense, but not required to be contiguous. Subsequences order
//! records within a version and start at 1. A `LogPosition` pairs the two
//! and carries the total order every cursor preserves.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Monotonic commit identifier. Valid versions are positive.
pub type Version = u64;

/// Intra-version ordering counter, assigned by the proxy starting at 1.
pub type Subsequence = u32;

/// A point in the global mutation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct LogPosition {
    pub version: Version,
    pub subsequence: Subsequence,
}

impl LogPosition {
    /// Largest representable position, used as an open upper bound.
    pub const MAX: LogPosition = LogPosition {
        version: Version::MAX,
        subsequence: Subsequence::MAX,
    };

    pub fn new(version: Version, subsequence: Subsequence) -> Self {
        Self {
            version,
            subsequence,
        }
    }

    /// Position of the first record at `version`.
    pub fn version_start(version: Version) -> Self {
        Self {
            version,
            subsequence: 0,
        }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.version, self.subsequence)
    }
}

/// Stable opaque identifier of one remote mutation stream.
///
/// Unique within a cursor group. The id is 16 opaque bytes; we generate
/// random ones but accept any.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct StorageTeamId(Uuid);

impl StorageTeamId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for StorageTeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_ordering_is_lexicographic() {
        let a = LogPosition::new(100, 5);
        let b = LogPosition::new(100, 6);
        let c = LogPosition::new(101, 1);
        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
    }

    #[test]
    fn test_position_version_start_sorts_before_subsequence_one() {
        assert!(LogPosition::version_start(100) < LogPosition::new(100, 1));
    }

    #[test]
    fn test_position_max_is_upper_bound() {
        assert!(LogPosition::new(u64::MAX, u32::MAX - 1) < LogPosition::MAX);
    }

    #[test]
    fn test_team_id_roundtrips_through_bytes() {
        let id = StorageTeamId::random();
        let bytes = *id.as_bytes();
        assert_eq!(StorageTeamId::from_bytes(bytes), id);
    }

    #[test]
    fn test_team_id_random_is_unique() {
        assert_ne!(StorageTeamId::random(), StorageTeamId::random());
    }

    #[test]
    fn test_position_serde_roundtrip() {
        let pos = LogPosition::new(42, 7);
        let json = serde_json::to_string(&pos).expect("serialize");
        let back: LogPosition = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(pos, back);
    }
}
