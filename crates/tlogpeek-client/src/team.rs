//! Single-Stream Cursor
//!
//! `StorageTeamPeekCursor` consumes the mutation stream of one storage
//! team. It keeps exactly one reply buffer at a time: iteration serves
//! records out of the current block, and `remote_more_available` swaps in
//! the next block from a TLog.
//!
//! ## Version bookkeeping
//!
//! The cursor tracks `last_version`, the highest version any reply has
//! covered. Each peek requests `last_version + 1` onward, so a reply that
//! carries no records (the stream is simply quiet) does not move the
//! cursor, while a non-empty reply advances `last_version` to the reply's
//! inclusive `end_version`.
//!
//! ## Empty versions
//!
//! In the broadcast model every committed version reaches every team, if
//! only as an `EmptyVersion` placeholder. A strict-mutation consumer never
//! wants to see those, so by default `has_remaining` silently steps over
//! them. The broadcast merge layer, which needs placeholders for
//! cross-team version alignment, constructs its members with
//! `report_empty_version = true`.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;
use uuid::Uuid;

use tlogpeek_core::{
    LogPosition, MessageDeserializer, StorageTeamId, Version, VersionSubsequenceMessage,
};

use crate::cursor::PeekCursor;
use crate::error::Result;
use crate::rpc::{PeekRequest, TLogPeer};

/// Streaming cursor over one storage team's committed mutations.
pub struct StorageTeamPeekCursor {
    team_id: StorageTeamId,
    peers: Vec<Arc<dyn TLogPeer>>,
    begin_version: Version,
    last_version: Version,
    max_known_version: Version,
    min_known_committed_version: Version,
    deserializer: MessageDeserializer,
    report_empty_version: bool,
    debug_id: Option<Uuid>,
}

impl StorageTeamPeekCursor {
    /// Cursor over a single endpoint, hiding empty-version records.
    pub fn new(begin_version: Version, team_id: StorageTeamId, peer: Arc<dyn TLogPeer>) -> Self {
        Self::with_peers(begin_version, team_id, vec![peer], false)
    }

    /// Cursor over a set of interchangeable endpoints for the same stream.
    ///
    /// # Panics
    ///
    /// Panics if `peers` is empty or `begin_version` is zero; versions
    /// are positive.
    pub fn with_peers(
        begin_version: Version,
        team_id: StorageTeamId,
        peers: Vec<Arc<dyn TLogPeer>>,
        report_empty_version: bool,
    ) -> Self {
        assert!(!peers.is_empty(), "cursor needs at least one endpoint");
        assert!(begin_version > 0, "versions are positive");
        Self {
            team_id,
            peers,
            begin_version,
            last_version: begin_version - 1,
            max_known_version: 0,
            min_known_committed_version: 0,
            deserializer: MessageDeserializer::empty(team_id),
            report_empty_version,
            debug_id: None,
        }
    }

    /// Attach a debug id forwarded on every peek request.
    pub fn with_debug_id(mut self, debug_id: Uuid) -> Self {
        self.debug_id = Some(debug_id);
        self
    }

    pub fn team_id(&self) -> StorageTeamId {
        self.team_id
    }

    pub fn begin_version(&self) -> Version {
        self.begin_version
    }

    /// Highest version any reply has covered so far.
    pub fn last_version(&self) -> Version {
        self.last_version
    }

    pub fn max_known_version(&self) -> Version {
        self.max_known_version
    }

    pub fn min_known_committed_version(&self) -> Version {
        self.min_known_committed_version
    }

    pub fn reports_empty_version(&self) -> bool {
        self.report_empty_version
    }

    /// Position of the head record, if one is buffered.
    ///
    /// Reflects the raw buffer; call `has_remaining` first when hidden
    /// empty-version records should already be skipped.
    pub fn head_position(&self) -> Option<LogPosition> {
        self.deserializer.peek().map(|record| record.position())
    }
}

#[async_trait]
impl PeekCursor for StorageTeamPeekCursor {
    fn has_remaining(&mut self) -> bool {
        if !self.report_empty_version {
            while let Some(record) = self.deserializer.peek() {
                if !record.message.is_empty_version() {
                    break;
                }
                self.deserializer.advance();
            }
        }
        self.deserializer.peek().is_some()
    }

    fn get(&self) -> &VersionSubsequenceMessage {
        self.deserializer
            .peek()
            .unwrap_or_else(|| panic!("get() on exhausted cursor for team {}", self.team_id))
    }

    fn next(&mut self) {
        assert!(
            self.deserializer.peek().is_some(),
            "next() on exhausted cursor for team {}",
            self.team_id
        );
        self.deserializer.advance();
    }

    fn reset(&mut self) {
        self.deserializer.rewind();
    }

    async fn remote_more_available(&mut self) -> Result<bool> {
        // Uniform random endpoint selection stands in for a load balancer.
        let peer = &self.peers[rand::thread_rng().gen_range(0..self.peers.len())];

        let mut request = PeekRequest::new(self.team_id, self.last_version + 1);
        request.debug_id = self.debug_id;

        let reply = peer.peek(request).await?;

        self.deserializer.reset(reply.data)?;
        if self.deserializer.is_empty() {
            // The stream is quiet, not closed. Nothing moves.
            return Ok(false);
        }

        self.max_known_version = reply.max_known_version;
        self.min_known_committed_version = reply.min_known_committed_version;
        self.last_version = reply.end_version;

        debug!(
            team = %self.team_id,
            end_version = reply.end_version,
            records = self.deserializer.remaining(),
            "peek reply loaded"
        );
        Ok(true)
    }
}
