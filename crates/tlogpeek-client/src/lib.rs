//! tlogpeek Client
//!
//! Streaming peek cursors over remote transaction-log (TLog) servers.
//!
//! A TLog serves each storage team's committed mutations as an unbounded,
//! versioned stream. This crate hides the network round-trips behind a
//! pull-style iterator while preserving exact global ordering by
//! `(version, subsequence)`:
//!
//! ```text
//! ┌──────────────────┐   next()   ┌──────────────────────────────┐
//! │ storage replayer │ ─────────> │ BroadcastTeamPeekCursor      │
//! └──────────────────┘            │  ├─ CursorContainer (heap)   │
//!                                 │  ├─ StorageTeamPeekCursor A ─┼──> TLog
//!                                 │  ├─ StorageTeamPeekCursor B ─┼──> TLog
//!                                 │  └─ StorageTeamPeekCursor C ─┼──> TLog
//!                                 └──────────────────────────────┘
//! ```
//!
//! ## Main Components
//!
//! - [`PeekCursor`]: the five-operation iteration protocol every cursor
//!   speaks (`has_remaining`, `get`, `next`, `reset`,
//!   `remote_more_available`)
//! - [`StorageTeamPeekCursor`]: single stream over one storage team
//! - [`BroadcastTeamPeekCursor`]: merges N team streams under the
//!   broadcast invariant, in ordered or unordered (team-grouped) flavor
//! - [`OrderedMutableTeamPeekCursor`]: ordered merge whose member set
//!   follows in-band team assignments
//! - [`ServerPeekCursor`]: latency-tracked cursor over one mutable
//!   endpoint, with optional request pipelining and slow-peer connection
//!   resets
//! - [`advance_to`]: seek any cursor forward to a `(version,
//!   subsequence)` target across local and remote data
//!
//! Transports implement [`TLogPeer`]; everything here is written against
//! that trait, so production RPC stacks and in-memory test fakes are
//! interchangeable.

pub mod broadcast;
pub mod config;
pub mod container;
pub mod cursor;
pub mod error;
pub mod mutable;
pub mod retry;
pub mod rpc;
pub mod server;
pub mod team;

pub use broadcast::{
    BroadcastTeamPeekCursor, OrderedBroadcastTeamPeekCursor, UnorderedBroadcastTeamPeekCursor,
};
pub use config::PeekConfig;
pub use container::{CursorContainer, OrderedCursorContainer, UnorderedCursorContainer};
pub use cursor::{advance_to, drain_buffered, CursorIter, PeekCursor};
pub use error::{PeekError, Result};
pub use mutable::{
    decode_team_assignment, encode_team_assignment, CursorFactory, OrderedMutableTeamPeekCursor,
    TEAM_ASSIGNMENT_KEY_PREFIX,
};
pub use retry::{BackoffPolicy, ExponentialBackoff};
pub use rpc::{FailureMonitor, PeekReply, PeekRequest, TLogPeer};
pub use server::ServerPeekCursor;
pub use team::StorageTeamPeekCursor;
