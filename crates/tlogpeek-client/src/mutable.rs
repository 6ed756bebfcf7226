//! Mutable-Team Merge Cursor
//!
//! A storage server's team membership is not fixed: data movement assigns
//! and unassigns teams while the server replays the log. Those changes
//! arrive in-band, as mutations on the server's *private* team, so the
//! replayer learns about them at exactly the right point in the version
//! order.
//!
//! `OrderedMutableTeamPeekCursor` wraps the ordered broadcast cursor and
//! reacts to team-assignment records as they are yielded:
//!
//! - teams no longer in the assignment are removed immediately, so the
//!   remainder of the assignment's version is already filtered by the new
//!   set;
//! - newly assigned teams get a member cursor from the caller-supplied
//!   factory, contributing from the version after the assignment (their
//!   stream is only peeked from there on).
//!
//! The private team itself is never removed. Assignment records are
//! yielded to the consumer like any other mutation.
//!
//! Membership changes are not rewound: a `reset` replays the last batch
//! through the member set as it stands, so records from a team removed
//! mid-batch do not reappear.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{info, warn};

use tlogpeek_core::{varint, CodecError, Message, StorageTeamId, Version, VersionSubsequenceMessage};

use crate::broadcast::OrderedBroadcastTeamPeekCursor;
use crate::config::PeekConfig;
use crate::cursor::PeekCursor;
use crate::error::Result;
use crate::team::StorageTeamPeekCursor;

/// Key prefix of team-assignment mutations in a private team stream.
pub const TEAM_ASSIGNMENT_KEY_PREFIX: &[u8] = b"\xff/serverTeams/";

/// Builds a member cursor for a newly assigned team, starting at the
/// given version. Cursors must report empty versions.
pub type CursorFactory = Box<dyn FnMut(StorageTeamId, Version) -> StorageTeamPeekCursor + Send>;

/// Encode a team assignment value: the full set of teams a storage server
/// is responsible for after the assignment.
pub fn encode_team_assignment(teams: &[StorageTeamId]) -> Bytes {
    let mut buf = BytesMut::new();
    varint::encode_u64(&mut buf, teams.len() as u64);
    for team in teams {
        buf.put_slice(team.as_bytes());
    }
    buf.freeze()
}

/// Decode a team assignment value.
pub fn decode_team_assignment(
    data: &[u8],
) -> std::result::Result<BTreeSet<StorageTeamId>, CodecError> {
    let mut pos = 0;
    let count = varint::decode_u64(data, &mut pos)?;
    let mut teams = BTreeSet::new();
    for _ in 0..count {
        let end = pos + 16;
        if data.len() < end {
            return Err(CodecError::Truncated {
                offset: pos,
                needed: end - data.len(),
            });
        }
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&data[pos..end]);
        teams.insert(StorageTeamId::from_bytes(bytes));
        pos = end;
    }
    Ok(teams)
}

/// Ordered broadcast cursor whose member set follows in-band team
/// assignments.
pub struct OrderedMutableTeamPeekCursor {
    inner: OrderedBroadcastTeamPeekCursor,
    private_team: StorageTeamId,
    factory: CursorFactory,
}

impl OrderedMutableTeamPeekCursor {
    /// Build a cursor over the private team plus any initially assigned
    /// teams, all starting at `begin_version`.
    pub fn new(
        private_team: StorageTeamId,
        begin_version: Version,
        initial_teams: &[StorageTeamId],
        mut factory: CursorFactory,
        config: &PeekConfig,
    ) -> Self {
        let mut inner = OrderedBroadcastTeamPeekCursor::with_config(config);
        inner.add_cursor(factory(private_team, begin_version));
        for &team in initial_teams {
            if team != private_team {
                inner.add_cursor(factory(team, begin_version));
            }
        }
        Self {
            inner,
            private_team,
            factory,
        }
    }

    pub fn private_team(&self) -> StorageTeamId {
        self.private_team
    }

    /// Teams currently contributing to the merge.
    pub fn team_ids(&self) -> Vec<StorageTeamId> {
        self.inner.team_ids()
    }

    /// Recognize a team-assignment record.
    fn assignment_of(record: &VersionSubsequenceMessage) -> Option<(Version, &Bytes)> {
        match &record.message {
            Message::Mutation(m) if m.key.starts_with(TEAM_ASSIGNMENT_KEY_PREFIX) => {
                Some((record.version, &m.value))
            }
            _ => None,
        }
    }

    fn apply_assignment(&mut self, version: Version, teams: BTreeSet<StorageTeamId>) {
        for team in self.inner.team_ids() {
            if team != self.private_team && !teams.contains(&team) {
                info!(team = %team, version, "team unassigned; dropping member");
                self.inner.remove_cursor(team);
            }
        }
        for team in teams {
            if !self.inner.contains_team(team) {
                info!(team = %team, from_version = version + 1, "team assigned; adding member");
                self.inner.add_cursor((self.factory)(team, version + 1));
            }
        }
    }
}

#[async_trait]
impl PeekCursor for OrderedMutableTeamPeekCursor {
    fn has_remaining(&mut self) -> bool {
        self.inner.has_remaining()
    }

    fn get(&self) -> &VersionSubsequenceMessage {
        self.inner.get()
    }

    fn next(&mut self) {
        let assignment = Self::assignment_of(self.inner.get())
            .map(|(version, value)| (version, decode_team_assignment(value)));

        self.inner.next();

        match assignment {
            Some((version, Ok(teams))) => self.apply_assignment(version, teams),
            Some((version, Err(error))) => {
                warn!(version, %error, "undecodable team assignment; keeping current members");
            }
            None => {}
        }
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    async fn remote_more_available(&mut self) -> Result<bool> {
        self.inner.remote_more_available().await
    }
}
