//! The Peek Cursor Protocol
//!
//! Every cursor in this crate speaks the same five-operation protocol:
//!
//! - `has_remaining` - is at least one record locally buffered and visible?
//! - `get` - borrow the head record
//! - `next` - advance past the head
//! - `reset` - rewind to the state left by the last successful refill
//! - `remote_more_available` - perform one round of remote fetch
//!
//! Only `remote_more_available` suspends. The other four operate purely on
//! buffered state, which is what makes `reset` free of network I/O: a
//! consumer can abort a partially applied batch and replay it from memory.
//!
//! `has_remaining` takes `&mut self` on purpose. A cursor configured to
//! hide empty-version records advances past them while answering, and that
//! skip is real state movement, not interior bookkeeping.
//!
//! ## Iteration façade
//!
//! `drain_buffered` adapts a cursor into a one-shot `Iterator` over the
//! locally buffered records. The iterator stops at the buffer's edge; it
//! never triggers a fetch. The usual consumption loop is:
//!
//! ```ignore
//! loop {
//!     match cursor.remote_more_available().await {
//!         Ok(true) => {
//!             for record in drain_buffered(&mut cursor) {
//!                 apply(record);
//!             }
//!         }
//!         Ok(false) => continue, // not ready yet, poll again
//!         Err(PeekError::EndOfStream) => break,
//!         Err(e) => return Err(e),
//!     }
//! }
//! ```

use async_trait::async_trait;

use tlogpeek_core::{Subsequence, Version, VersionSubsequenceMessage};

use crate::error::Result;

/// Uniform iteration protocol over a stream of versioned records.
///
/// Implementations: `StorageTeamPeekCursor`, the ordered and unordered
/// `BroadcastTeamPeekCursor` variants, `OrderedMutableTeamPeekCursor`,
/// and `ServerPeekCursor`.
#[async_trait]
pub trait PeekCursor {
    /// True iff at least one record is locally buffered and visible.
    fn has_remaining(&mut self) -> bool;

    /// Borrow the head record.
    ///
    /// # Panics
    ///
    /// Panics if no record remains; check `has_remaining` first.
    fn get(&self) -> &VersionSubsequenceMessage;

    /// Advance past the head record.
    ///
    /// # Panics
    ///
    /// Panics if no record remains; check `has_remaining` first.
    fn next(&mut self);

    /// Rewind to the state immediately after the most recent successful
    /// `remote_more_available`. Idempotent; never performs network I/O.
    fn reset(&mut self);

    /// Perform one round of remote fetch.
    ///
    /// Resolves `Ok(true)` if new data was loaded, `Ok(false)` if the
    /// fetch came back empty within the retry budget, and
    /// `Err(PeekError::EndOfStream)` once the remote side reports all
    /// upstream channels permanently closed.
    async fn remote_more_available(&mut self) -> Result<bool>;
}

/// One-shot forward iterator over a cursor's buffered records.
///
/// Bound to the cursor for its lifetime; positions are not stable across
/// `next`, so the iterator yields owned records.
pub struct CursorIter<'a, C: PeekCursor + ?Sized> {
    cursor: &'a mut C,
}

impl<C: PeekCursor + ?Sized> Iterator for CursorIter<'_, C> {
    type Item = VersionSubsequenceMessage;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.cursor.has_remaining() {
            return None;
        }
        let record = self.cursor.get().clone();
        self.cursor.next();
        Some(record)
    }
}

/// Iterate over everything the cursor has locally buffered.
pub fn drain_buffered<C: PeekCursor + ?Sized>(cursor: &mut C) -> CursorIter<'_, C> {
    CursorIter { cursor }
}

/// Advance `cursor` past every record below `(version, subsequence)`,
/// pulling remote data as needed.
///
/// On return the head is the first record at or after the target, except
/// when a fetch round reports no new data: the target is then in the
/// future and the cursor is left at its current position for the caller
/// to decide. `EndOfStream` propagates.
pub async fn advance_to<C: PeekCursor + ?Sized>(
    cursor: &mut C,
    version: Version,
    subsequence: Subsequence,
) -> Result<()> {
    loop {
        while cursor.has_remaining() {
            let head = cursor.get().position();
            if head.version > version {
                return Ok(());
            }
            if head.version == version && head.subsequence >= subsequence {
                return Ok(());
            }
            cursor.next();
        }

        // Local data consumed; the target may still be on the remote side.
        if !cursor.remote_more_available().await? {
            return Ok(());
        }
    }
}
