//! Peek RPC Contract
//!
//! This module defines the client-side view of the peek protocol: the
//! request/reply shapes and the `TLogPeer` trait a transport implements.
//!
//! Cursors never talk to a socket directly. They hold `Arc<dyn TLogPeer>`
//! handles and issue `peek` calls through them, so the same cursor code
//! runs against a production transport, a simulator, or the in-memory
//! fake used by the test suite.
//!
//! A reply's `data` is an owned `Bytes` buffer; every record decoded from
//! it borrows that allocation, so the buffer outlives the iterator into it
//! for free.

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use tlogpeek_core::{StorageTeamId, Version};

use crate::error::Result;

/// A peek request for one storage team.
#[derive(Debug, Clone)]
pub struct PeekRequest {
    /// Optional id correlating log events across client and server.
    pub debug_id: Option<Uuid>,
    pub team_id: StorageTeamId,
    /// First version the reply may include.
    pub begin_version: Version,
    /// Last version the reply may include; `None` requests everything
    /// the server has.
    pub end_version: Option<Version>,
    /// Reply immediately with an empty block instead of blocking for data.
    pub return_if_blocked: bool,
    /// Restrict the reply to data already spilled to disk.
    pub only_spilled: bool,
}

impl PeekRequest {
    /// An unbounded peek starting at `begin_version`.
    pub fn new(team_id: StorageTeamId, begin_version: Version) -> Self {
        Self {
            debug_id: None,
            team_id,
            begin_version,
            end_version: None,
            return_if_blocked: false,
            only_spilled: false,
        }
    }
}

/// A peek reply.
#[derive(Debug, Clone)]
pub struct PeekReply {
    /// Serialized message block; decodes with `MessageDeserializer`.
    pub data: Bytes,
    /// First version the reply covers.
    pub begin_version: Version,
    /// Highest version the reply covers, inclusive. The next request
    /// should begin at `end_version + 1`.
    pub end_version: Version,
    /// Versions at or below this have been popped on the server and will
    /// never be peeked again.
    pub popped: Option<Version>,
    /// Highest version the server has seen for any team.
    pub max_known_version: Version,
    /// Lowest version the server knows to be committed everywhere.
    pub min_known_committed_version: Version,
    /// The reply was served from spilled data only.
    pub only_spilled: bool,
}

/// One remote TLog endpoint able to serve peeks.
#[async_trait]
pub trait TLogPeer: Send + Sync {
    /// Issue one peek and await the reply.
    ///
    /// Returns `PeekError::EndOfStream` once the server's epoch for the
    /// requested team has ended.
    async fn peek(&self, request: PeekRequest) -> Result<PeekReply>;

    /// Stable address of this endpoint, used for failure monitoring and
    /// log events.
    fn endpoint(&self) -> &str;

    /// Tear down the transport connection to this peer. The next request
    /// re-establishes it.
    fn reset_connection(&self);
}

/// Cluster-wide view of endpoint health.
#[async_trait]
pub trait FailureMonitor: Send + Sync {
    /// Resolves once the endpoint's failed state equals `failed`.
    async fn on_state_equal(&self, endpoint: &str, failed: bool);

    /// Current availability of the endpoint.
    fn is_available(&self, endpoint: &str) -> bool;
}
