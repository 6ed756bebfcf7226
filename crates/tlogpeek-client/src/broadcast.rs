//! Broadcast Merge Cursor
//!
//! `BroadcastTeamPeekCursor` merges N single-stream cursors whose teams
//! all receive the same version sequence (the broadcast model: every
//! committed version produces at least one record per team, if only an
//! `EmptyVersion` placeholder).
//!
//! ## The broadcast invariant
//!
//! At any consistent point, every non-retired member either holds records
//! at the shared `current_version` or is empty and waiting for a refill.
//! A member can never lag: if one cursor has version `v` buffered, any
//! other non-retired member holds `>= v` or nothing. The fill path asserts
//! this; a violation means the upstream feed broke its contract and there
//! is no safe way to continue.
//!
//! ## Consumption cycle
//!
//! ```text
//! has_remaining ──container empty──> try_fill_container
//!     │                                   │ some members empty
//!     │ all members share a version       ▼
//!     ▼                             remote_more_available
//!   get / next  (container drains)        │ one refill task per empty
//!     │                                   │ member, awaited in parallel
//!     └────────── container empty ────────┘
//! ```
//!
//! A refill only succeeds as a whole. If any member times out through its
//! retry budget the round reports "not ready" and nothing is consumed,
//! which is what keeps the invariant intact across partial failures.
//!
//! ## Restart snapshot
//!
//! Every successful refill arms a snapshot; the first `has_remaining`
//! afterwards captures `current_version` plus a copy of the container.
//! `reset` restores that state and rewinds the members, so a consumer can
//! abort a partially applied batch and replay it without any network I/O.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use tlogpeek_core::{StorageTeamId, Version, VersionSubsequenceMessage};

use crate::config::PeekConfig;
use crate::container::{CursorContainer, OrderedCursorContainer, UnorderedCursorContainer};
use crate::cursor::PeekCursor;
use crate::error::{PeekError, Result};
use crate::retry::{BackoffPolicy, ExponentialBackoff};
use crate::team::StorageTeamPeekCursor;

/// Broadcast merge over member cursors, globally ordered by
/// `(version, subsequence)`.
pub type OrderedBroadcastTeamPeekCursor = BroadcastTeamPeekCursor<OrderedCursorContainer>;

/// Broadcast merge with records of a version grouped by team instead of
/// globally sorted.
pub type UnorderedBroadcastTeamPeekCursor = BroadcastTeamPeekCursor<UnorderedCursorContainer>;

/// Outcome of refilling one member.
#[derive(Debug, Clone, Copy, Default)]
struct PeekOutcome {
    retrieved_data: bool,
    end_of_stream: bool,
}

/// State `reset` returns to: the moment right after the last successful
/// refill.
#[derive(Debug, Clone)]
struct RestartSnapshot<C> {
    version: Option<Version>,
    container: C,
    /// A refill succeeded but the post-fill state has not been captured
    /// yet; the next `has_remaining` does it.
    pending: bool,
}

impl<C: Default> Default for RestartSnapshot<C> {
    fn default() -> Self {
        Self {
            version: None,
            container: C::default(),
            pending: false,
        }
    }
}

/// Merges N storage-team cursors under the broadcast invariant.
pub struct BroadcastTeamPeekCursor<C: CursorContainer> {
    members: BTreeMap<StorageTeamId, StorageTeamPeekCursor>,
    container: C,
    /// Version shared by every member currently in the container.
    current_version: Option<Version>,
    /// Members whose buffer ran dry and need a remote refill.
    empty_teams: BTreeSet<StorageTeamId>,
    /// Members whose stream ended; retained until their buffer drains.
    retired_teams: BTreeSet<StorageTeamId>,
    max_known_version: Version,
    min_known_committed_version: Version,
    snapshot: RestartSnapshot<C>,
    retry_times: usize,
    backoff: BackoffPolicy,
}

impl<C: CursorContainer> BroadcastTeamPeekCursor<C> {
    pub fn new() -> Self {
        Self::with_config(&PeekConfig::default())
    }

    pub fn with_config(config: &PeekConfig) -> Self {
        Self {
            members: BTreeMap::new(),
            container: C::default(),
            current_version: None,
            empty_teams: BTreeSet::new(),
            retired_teams: BTreeSet::new(),
            max_known_version: 0,
            min_known_committed_version: 0,
            snapshot: RestartSnapshot::default(),
            retry_times: config.merge_cursor_retry_times,
            backoff: BackoffPolicy::with_base(config.merge_cursor_retry_delay),
        }
    }

    /// Add a member stream.
    ///
    /// # Panics
    ///
    /// Panics if the member hides empty-version records (alignment needs
    /// them) or if the team is already present.
    pub fn add_cursor(&mut self, cursor: StorageTeamPeekCursor) {
        assert!(
            cursor.reports_empty_version(),
            "broadcast members must report empty versions"
        );
        let team = cursor.team_id();
        assert!(
            !self.members.contains_key(&team),
            "team {team} already has a member cursor"
        );
        self.empty_teams.insert(team);
        self.members.insert(team, cursor);
    }

    /// Remove a member stream, returning its cursor if present.
    ///
    /// The restart snapshot forgets the member too: a `reset` after a
    /// removal replays the surviving members only.
    pub fn remove_cursor(&mut self, team: StorageTeamId) -> Option<StorageTeamPeekCursor> {
        self.container.erase(team);
        self.snapshot.container.erase(team);
        self.empty_teams.remove(&team);
        self.retired_teams.remove(&team);
        self.members.remove(&team)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn contains_team(&self, team: StorageTeamId) -> bool {
        self.members.contains_key(&team)
    }

    /// Ids of all member streams, in stable order.
    pub fn team_ids(&self) -> Vec<StorageTeamId> {
        self.members.keys().copied().collect()
    }

    pub fn is_retired(&self, team: StorageTeamId) -> bool {
        self.retired_teams.contains(&team)
    }

    /// Version shared by the members currently being consumed.
    pub fn current_version(&self) -> Option<Version> {
        self.current_version
    }

    pub fn max_known_version(&self) -> Version {
        self.max_known_version
    }

    pub fn min_known_committed_version(&self) -> Version {
        self.min_known_committed_version
    }

    /// Seed the container from member buffers.
    ///
    /// Precondition: the container is empty. Returns true if every
    /// non-retired member holds records at one shared version; false if
    /// refills are needed first (members recorded in `empty_teams`) or no
    /// data remains anywhere.
    fn try_fill_container(&mut self) -> bool {
        debug_assert!(self.container.is_empty());

        let prior_version = self.current_version;
        self.current_version = None;

        let mut member_count = 0usize;
        for (team, cursor) in self.members.iter_mut() {
            member_count += 1;
            if !cursor.has_remaining() {
                self.empty_teams.insert(*team);
                continue;
            }
            let head = cursor
                .head_position()
                .map(|pos| pos.version)
                .unwrap_or_default();
            match self.current_version {
                None => self.current_version = Some(head),
                Some(version) => assert!(
                    version == head,
                    "broadcast invariant broken: team {team} holds version {head} \
                     while the group is at {version}"
                ),
            }
        }

        // Members that are both empty and retired are fully drained; no
        // refill will ever come for them.
        let drained: BTreeSet<StorageTeamId> = self
            .empty_teams
            .intersection(&self.retired_teams)
            .copied()
            .collect();
        for team in &drained {
            self.empty_teams.remove(team);
        }

        if !self.empty_teams.is_empty() {
            // A lone empty member would reset current_version to nothing,
            // making any later member start from zero. Keep the prior
            // version alive instead.
            if member_count == 1 {
                self.current_version = prior_version;
            }
            return false;
        }

        if self.members.is_empty() || self.current_version.is_none() {
            return false;
        }

        for (team, cursor) in self.members.iter_mut() {
            if let Some(head) = cursor.head_position() {
                self.container.push(*team, head);
            }
        }
        true
    }

    fn front_cursor(&self) -> &StorageTeamPeekCursor {
        let team = self
            .container
            .front()
            .expect("container is empty; call has_remaining first");
        self.members
            .get(&team)
            .expect("container holds a team with no member cursor")
    }
}

impl<C: CursorContainer> Default for BroadcastTeamPeekCursor<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<C: CursorContainer + Send> PeekCursor for BroadcastTeamPeekCursor<C> {
    fn has_remaining(&mut self) -> bool {
        let mut filled = true;
        if self.container.is_empty() {
            filled = self.try_fill_container();
        }

        // A refill just succeeded: capture the replay point now that the
        // container reflects it.
        if self.snapshot.pending {
            self.snapshot.pending = false;
            self.snapshot.version = self.current_version;
            self.snapshot.container = self.container.clone();
        }

        filled
    }

    fn get(&self) -> &VersionSubsequenceMessage {
        self.front_cursor().get()
    }

    fn next(&mut self) {
        if self.container.is_empty() && !self.try_fill_container() {
            panic!("next() on broadcast cursor with no remaining data");
        }

        let team = self
            .container
            .front()
            .expect("fill succeeded with an empty container");
        let cursor = self
            .members
            .get_mut(&team)
            .expect("container holds a team with no member cursor");

        cursor.next();
        let keep = cursor
            .head_position()
            .filter(|pos| Some(pos.version) == self.current_version);
        self.container.advance_front(keep);
    }

    fn reset(&mut self) {
        // No snapshot version means either nothing was ever fetched or the
        // cursor is terminal; both leave nothing to replay.
        let Some(version) = self.snapshot.version else {
            return;
        };

        self.current_version = Some(version);
        self.container = self.snapshot.container.clone();
        // Empty members are re-discovered on the next fill; retirement is
        // a remote fact and stays.
        self.empty_teams.clear();

        for (team, cursor) in self.members.iter_mut() {
            if self.retired_teams.contains(team) {
                continue;
            }
            cursor.reset();
            // All replay data is local; skip back up to the snapshot
            // version without any RPC.
            while let Some(pos) = cursor.head_position() {
                if pos.version >= version {
                    break;
                }
                cursor.next();
            }
        }
    }

    async fn remote_more_available(&mut self) -> Result<bool> {
        // Retired members reaching this point are fully drained; the fill
        // reconciliation has already run.
        for team in std::mem::take(&mut self.retired_teams) {
            debug!(team = %team, "dropping drained retired member");
            self.container.erase(team);
            self.empty_teams.remove(&team);
            self.members.remove(&team);
        }

        if self.empty_teams.is_empty() {
            // Nothing to refill and nothing left to yield.
            return Err(PeekError::EndOfStream);
        }

        let retry_times = self.retry_times;
        let backoff = self.backoff.clone();
        let empty_teams = &self.empty_teams;
        let tasks: Vec<_> = self
            .members
            .iter_mut()
            .filter(|(team, _)| empty_teams.contains(*team))
            .map(|(team, cursor)| {
                let backoff = backoff.clone();
                async move {
                    (
                        *team,
                        peek_single_cursor(cursor, retry_times, backoff).await,
                    )
                }
            })
            .collect();
        let results = join_all(tasks).await;

        let mut participants = Vec::with_capacity(results.len());
        let mut all_ready = true;
        for (team, outcome) in results {
            participants.push(team);
            let outcome = outcome?;
            if outcome.end_of_stream {
                info!(team = %team, "member stream ended; retiring team");
                let newly_retired = self.retired_teams.insert(team);
                assert!(newly_retired, "team {team} retired twice");
                self.empty_teams.remove(&team);
            } else if outcome.retrieved_data {
                self.empty_teams.remove(&team);
            } else {
                warn!(team = %team, "member refill exhausted its retry budget");
                all_ready = false;
            }
        }

        if !all_ready {
            return Ok(false);
        }

        for team in participants {
            if let Some(cursor) = self.members.get(&team) {
                self.max_known_version = self.max_known_version.max(cursor.max_known_version());
                self.min_known_committed_version = self
                    .min_known_committed_version
                    .max(cursor.min_known_committed_version());
            }
        }

        self.snapshot.pending = true;
        Ok(true)
    }
}

/// Refill one member, retrying empty replies with exponential backoff.
///
/// Commits are expected to keep flowing in a healthy cluster, so an empty
/// reply is worth waiting out. The first reply that delivers data wins;
/// `EndOfStream` is final; a used-up budget reports neither.
async fn peek_single_cursor(
    cursor: &mut StorageTeamPeekCursor,
    retry_times: usize,
    policy: BackoffPolicy,
) -> Result<PeekOutcome> {
    let mut backoff = ExponentialBackoff::new(policy);

    for attempt in 0..retry_times {
        match cursor.remote_more_available().await {
            Ok(true) => {
                backoff.reset();
                return Ok(PeekOutcome {
                    retrieved_data: true,
                    end_of_stream: false,
                });
            }
            Ok(false) => {
                if attempt + 1 < retry_times {
                    backoff.wait().await;
                }
            }
            Err(PeekError::EndOfStream) => {
                return Ok(PeekOutcome {
                    retrieved_data: false,
                    end_of_stream: true,
                })
            }
            Err(other) => return Err(other),
        }
    }

    Ok(PeekOutcome::default())
}
