//! Error types for peek cursor operations.
//!
//! ## Error Handling Strategy
//!
//! - **Recovered locally**: `Timeout` (retry with backoff, surfaced as
//!   "not ready" once the budget runs out), `OperationObsolete` (pipeline
//!   cleared and re-issued)
//! - **Recovered by the broadcast layer**: `EndOfStream` from a member
//!   stream retires the team; the merged cursor keeps serving the rest
//! - **Propagated**: `EndOfStream` from a single-stream cursor or from a
//!   fully retired broadcast cursor
//! - **Fatal**: broken ordering invariants panic with a diagnostic rather
//!   than guessing past corrupt state

use thiserror::Error;
use tlogpeek_core::CodecError;

/// Convenience type alias for `Result<T, PeekError>`.
pub type Result<T> = std::result::Result<T, PeekError>;

/// Errors surfaced by peek cursors and the peek RPC contract.
#[derive(Debug, Error)]
pub enum PeekError {
    /// The remote stream is permanently closed for this team.
    ///
    /// A TLog raises this once its epoch for the team has ended. Broadcast
    /// cursors recover by retiring the team; single-stream cursors
    /// propagate it to the caller.
    #[error("end of stream")]
    EndOfStream,

    /// An RPC exceeded its deadline.
    ///
    /// Recovered by retry with exponential backoff. After the retry budget
    /// is exhausted the cursor reports "not ready" instead of failing.
    #[error("peek request timed out")]
    Timeout,

    /// A pipelined reply did not continue from the expected version.
    ///
    /// Raised by `ServerPeekCursor` when an in-flight pipeline no longer
    /// matches the cursor position. Recovered by discarding the pipeline
    /// and re-issuing from the current position.
    #[error("peek pipeline no longer matches cursor position")]
    OperationObsolete,

    /// The remote side dropped the request without replying.
    #[error("peer dropped the request")]
    BrokenPromise,

    /// A reply buffer failed to decode.
    #[error("reply decode failed: {0}")]
    Codec(#[from] CodecError),

    /// Internal error that shouldn't normally occur.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PeekError {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, PeekError::EndOfStream)
    }
}
