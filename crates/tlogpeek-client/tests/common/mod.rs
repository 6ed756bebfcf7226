//! Shared integration-test fixture: an in-memory TLog.
//!
//! `FakeTLog` hosts the committed streams of any number of storage teams
//! and serves them through the real `TLogPeer` trait, in bounded version
//! windows so cursors are forced through multiple refills. Optional knobs
//! inject reply latency and end-of-stream behavior.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use tlogpeek_client::{PeekCursor, PeekError, PeekReply, PeekRequest, Result, TLogPeer};
use tlogpeek_core::{
    Message, MessageSerializer, Mutation, StorageTeamId, Subsequence, Version,
    VersionSubsequenceMessage,
};

type TeamLog = BTreeMap<Version, Vec<(Subsequence, Message)>>;

#[derive(Default)]
struct FakeTLogState {
    logs: HashMap<StorageTeamId, TeamLog>,
    /// Versions per reply; forces multiple peeks when small.
    max_versions_per_peek: usize,
    latency: Option<Duration>,
    /// Per team: peeks past this version report end of stream.
    end_of_stream_after: HashMap<StorageTeamId, Version>,
    /// Every request, in arrival order.
    requests: Vec<PeekRequest>,
    /// Parallel peek sessions: next begin version per debug id.
    sessions: HashMap<Uuid, Version>,
    popped: Option<Version>,
}

pub struct FakeTLog {
    endpoint: String,
    state: Mutex<FakeTLogState>,
    connection_resets: AtomicUsize,
}

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

impl FakeTLog {
    pub fn new() -> std::sync::Arc<Self> {
        init_tracing();
        std::sync::Arc::new(Self {
            endpoint: "faketlog:1".to_string(),
            state: Mutex::new(FakeTLogState {
                max_versions_per_peek: usize::MAX,
                ..Default::default()
            }),
            connection_resets: AtomicUsize::new(0),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeTLogState> {
        self.state.lock().expect("fake tlog lock")
    }

    pub fn commit(
        &self,
        team: StorageTeamId,
        version: Version,
        subsequence: Subsequence,
        message: Message,
    ) {
        self.lock()
            .logs
            .entry(team)
            .or_default()
            .entry(version)
            .or_default()
            .push((subsequence, message));
    }

    /// Commit `mutation_message(team, version, s)` for subsequences
    /// `first..first + count`.
    pub fn commit_mutations(
        &self,
        team: StorageTeamId,
        version: Version,
        first: Subsequence,
        count: u32,
    ) {
        for offset in 0..count {
            let subsequence = first + offset;
            self.commit(
                team,
                version,
                subsequence,
                mutation_message(team, version, subsequence),
            );
        }
    }

    pub fn commit_empty_version(&self, team: StorageTeamId, version: Version) {
        self.commit(team, version, 1, Message::EmptyVersion);
    }

    pub fn set_max_versions_per_peek(&self, versions: usize) {
        self.lock().max_versions_per_peek = versions;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    pub fn set_popped(&self, version: Version) {
        self.lock().popped = Some(version);
    }

    /// Peeks beginning past `version` answer with end of stream.
    pub fn end_stream_after(&self, team: StorageTeamId, version: Version) {
        self.lock().end_of_stream_after.insert(team, version);
    }

    pub fn requests_for(&self, team: StorageTeamId) -> Vec<PeekRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|request| request.team_id == team)
            .cloned()
            .collect()
    }

    pub fn request_count(&self, team: StorageTeamId) -> usize {
        self.requests_for(team).len()
    }

    pub fn connection_resets(&self) -> usize {
        self.connection_resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TLogPeer for FakeTLog {
    async fn peek(&self, request: PeekRequest) -> Result<PeekReply> {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        state.requests.push(request.clone());

        // Requests sharing a debug id form one peek session and receive
        // consecutive windows regardless of their begin version.
        let begin = match request.debug_id {
            Some(debug_id) => *state
                .sessions
                .entry(debug_id)
                .or_insert(request.begin_version),
            None => request.begin_version,
        };

        if let Some(&last) = state.end_of_stream_after.get(&request.team_id) {
            if begin > last {
                return Err(PeekError::EndOfStream);
            }
        }

        let window = state.max_versions_per_peek;
        let upper_bound = request.end_version.unwrap_or(Version::MAX);
        let log = state.logs.entry(request.team_id).or_default();

        let served: Vec<(Version, Vec<(Subsequence, Message)>)> = if begin > upper_bound {
            Vec::new()
        } else {
            log.range(begin..=upper_bound)
                .take(window)
                .map(|(version, items)| (*version, items.clone()))
                .collect()
        };

        let max_known_version = log.keys().next_back().copied().unwrap_or(0);

        let mut serializer = MessageSerializer::new(request.team_id);
        for (version, mut items) in served.clone() {
            items.sort_by_key(|(subsequence, _)| *subsequence);
            for (subsequence, message) in items {
                serializer
                    .append(version, subsequence, message)
                    .expect("fake tlog serializes in order");
            }
        }

        let end_version = served.last().map_or(begin.saturating_sub(1), |(v, _)| *v);
        if let Some(debug_id) = request.debug_id {
            state.sessions.insert(debug_id, end_version + 1);
        }

        Ok(PeekReply {
            data: serializer.finish(),
            begin_version: begin,
            end_version,
            popped: state.popped,
            max_known_version,
            min_known_committed_version: max_known_version,
            only_spilled: request.only_spilled,
        })
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn reset_connection(&self) {
        self.connection_resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Deterministic mutation payload so tests can predict exact records.
pub fn mutation_message(team: StorageTeamId, version: Version, subsequence: Subsequence) -> Message {
    Message::Mutation(Mutation::new(
        format!("{team}/{version}/{subsequence}"),
        format!("value-{version}-{subsequence}"),
    ))
}

pub fn expected_record(
    team: StorageTeamId,
    version: Version,
    subsequence: Subsequence,
) -> VersionSubsequenceMessage {
    VersionSubsequenceMessage::new(version, subsequence, mutation_message(team, version, subsequence))
}

/// Pull everything out of a cursor until the stream ends.
///
/// After every successful refill the batch is drained twice, with a
/// `reset()` in between, and both passes must match: restart idempotence
/// is verified on every batch as a side effect.
pub async fn drain_cursor<C: PeekCursor>(cursor: &mut C) -> Result<Vec<VersionSubsequenceMessage>> {
    let mut collected = Vec::new();

    for _ in 0..10_000 {
        match cursor.remote_more_available().await {
            Ok(true) => {
                let batch: Vec<_> = tlogpeek_client::drain_buffered(cursor).collect();
                cursor.reset();
                let replay: Vec<_> = tlogpeek_client::drain_buffered(cursor).collect();
                assert_eq!(batch, replay, "reset() must replay the batch identically");
                collected.extend(batch);
            }
            Ok(false) => continue,
            Err(PeekError::EndOfStream) => return Ok(collected),
            Err(other) => return Err(other),
        }
    }
    panic!("cursor did not reach end of stream");
}

/// Like `drain_cursor`, without the per-batch replay verification. For
/// cursors whose member set changes mid-batch, replay is not expected to
/// reproduce consumed records of dropped members.
pub async fn drain_cursor_no_replay<C: PeekCursor>(
    cursor: &mut C,
) -> Result<Vec<VersionSubsequenceMessage>> {
    let mut collected = Vec::new();
    for _ in 0..10_000 {
        match cursor.remote_more_available().await {
            Ok(true) => collected.extend(tlogpeek_client::drain_buffered(cursor)),
            Ok(false) => continue,
            Err(PeekError::EndOfStream) => return Ok(collected),
            Err(other) => return Err(other),
        }
    }
    panic!("cursor did not reach end of stream");
}

/// Keep mutations, drop placeholders and protocol records.
pub fn mutations_only(records: &[VersionSubsequenceMessage]) -> Vec<VersionSubsequenceMessage> {
    records
        .iter()
        .filter(|record| record.message.is_mutation())
        .cloned()
        .collect()
}

/// Assert records are strictly increasing by `(version, subsequence)`.
pub fn assert_strictly_ordered(records: &[VersionSubsequenceMessage]) {
    for pair in records.windows(2) {
        assert!(
            pair[0].position() < pair[1].position(),
            "records out of order: {} then {}",
            pair[0].position(),
            pair[1].position()
        );
    }
}
