//! Cursor Containers
//!
//! A broadcast cursor tracks which of its members currently hold data at
//! `current_version` through a small container of `(head, team)` entries.
//! Two concrete containers share one interface:
//!
//! - `OrderedCursorContainer`: a binary min-heap keyed by the head
//!   `(version, subsequence)`. The merged output is globally sorted.
//! - `UnorderedCursorContainer`: a FIFO. A member stays at the front until
//!   it runs out of records for the current version, so subsequences
//!   within a version come out grouped by team.
//!
//! Entries are team ids plus cached head positions, never references into
//! the member map; the broadcast cursor owns its members and looks them up
//! by id. The container variant is chosen statically by the broadcast
//! cursor's type parameter.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use tlogpeek_core::{LogPosition, StorageTeamId};

/// Priority structure over member cursors, keyed by their head positions.
pub trait CursorContainer: Default + Clone {
    /// Add a member whose head is at `head`.
    fn push(&mut self, team: StorageTeamId, head: LogPosition);

    /// The member to consume from next.
    fn front(&self) -> Option<StorageTeamId>;

    /// Reposition the front member after one of its records was consumed.
    ///
    /// `new_head` is the member's next record at the current version, or
    /// `None` if the member left the version (exhausted its buffer or
    /// moved to a later version) and must wait for the next fill cycle.
    fn advance_front(&mut self, new_head: Option<LogPosition>);

    /// Drop a member wherever it sits. Team removal is rare, so O(n) is
    /// acceptable here.
    fn erase(&mut self, team: StorageTeamId);

    fn is_empty(&self) -> bool;

    fn len(&self) -> usize;
}

/// Min-heap container: global `(version, subsequence)` order across teams.
#[derive(Debug, Clone, Default)]
pub struct OrderedCursorContainer {
    heap: BinaryHeap<Reverse<(LogPosition, StorageTeamId)>>,
}

impl CursorContainer for OrderedCursorContainer {
    fn push(&mut self, team: StorageTeamId, head: LogPosition) {
        self.heap.push(Reverse((head, team)));
    }

    fn front(&self) -> Option<StorageTeamId> {
        self.heap.peek().map(|Reverse((_, team))| *team)
    }

    fn advance_front(&mut self, new_head: Option<LogPosition>) {
        let Some(Reverse((_, team))) = self.heap.pop() else {
            return;
        };
        if let Some(head) = new_head {
            self.heap.push(Reverse((head, team)));
        }
    }

    fn erase(&mut self, team: StorageTeamId) {
        let entries: Vec<_> = std::mem::take(&mut self.heap)
            .into_vec()
            .into_iter()
            .filter(|Reverse((_, t))| *t != team)
            .collect();
        self.heap = entries.into();
    }

    fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}

/// FIFO container: subsequences within a version grouped by team.
#[derive(Debug, Clone, Default)]
pub struct UnorderedCursorContainer {
    queue: VecDeque<StorageTeamId>,
}

impl CursorContainer for UnorderedCursorContainer {
    fn push(&mut self, team: StorageTeamId, _head: LogPosition) {
        self.queue.push_back(team);
    }

    fn front(&self) -> Option<StorageTeamId> {
        self.queue.front().copied()
    }

    fn advance_front(&mut self, new_head: Option<LogPosition>) {
        // The front member keeps serving until it leaves the version.
        if new_head.is_none() {
            self.queue.pop_front();
        }
    }

    fn erase(&mut self, team: StorageTeamId) {
        self.queue.retain(|t| *t != team);
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teams(n: usize) -> Vec<StorageTeamId> {
        let mut ids: Vec<_> = (0..n).map(|_| StorageTeamId::random()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_ordered_front_is_minimum_position() {
        let ids = teams(3);
        let mut container = OrderedCursorContainer::default();
        container.push(ids[0], LogPosition::new(100, 3));
        container.push(ids[1], LogPosition::new(100, 1));
        container.push(ids[2], LogPosition::new(100, 2));

        assert_eq!(container.front(), Some(ids[1]));
        assert_eq!(container.len(), 3);
    }

    #[test]
    fn test_ordered_advance_repositions_by_new_head() {
        let ids = teams(2);
        let mut container = OrderedCursorContainer::default();
        container.push(ids[0], LogPosition::new(100, 1));
        container.push(ids[1], LogPosition::new(100, 2));

        // Front member's next record is at subsequence 5, behind the other.
        assert_eq!(container.front(), Some(ids[0]));
        container.advance_front(Some(LogPosition::new(100, 5)));
        assert_eq!(container.front(), Some(ids[1]));

        container.advance_front(None);
        assert_eq!(container.front(), Some(ids[0]));
        assert_eq!(container.len(), 1);
    }

    #[test]
    fn test_ordered_erase_removes_team() {
        let ids = teams(3);
        let mut container = OrderedCursorContainer::default();
        container.push(ids[0], LogPosition::new(100, 1));
        container.push(ids[1], LogPosition::new(100, 2));
        container.push(ids[2], LogPosition::new(100, 3));

        container.erase(ids[0]);
        assert_eq!(container.len(), 2);
        assert_eq!(container.front(), Some(ids[1]));

        container.erase(ids[1]);
        container.erase(ids[2]);
        assert!(container.is_empty());
    }

    #[test]
    fn test_ordered_clone_is_independent() {
        let ids = teams(2);
        let mut container = OrderedCursorContainer::default();
        container.push(ids[0], LogPosition::new(100, 1));
        container.push(ids[1], LogPosition::new(100, 2));

        let snapshot = container.clone();
        container.advance_front(None);
        assert_eq!(container.len(), 1);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.front(), Some(ids[0]));
    }

    #[test]
    fn test_unordered_keeps_front_until_version_exhausted() {
        let ids = teams(2);
        let mut container = UnorderedCursorContainer::default();
        container.push(ids[0], LogPosition::new(100, 1));
        container.push(ids[1], LogPosition::new(100, 2));

        // Still has records at the current version: stays at the front.
        container.advance_front(Some(LogPosition::new(100, 3)));
        assert_eq!(container.front(), Some(ids[0]));

        // Left the version: popped.
        container.advance_front(None);
        assert_eq!(container.front(), Some(ids[1]));
    }

    #[test]
    fn test_unordered_erase_removes_anywhere() {
        let ids = teams(3);
        let mut container = UnorderedCursorContainer::default();
        for id in &ids {
            container.push(*id, LogPosition::new(100, 1));
        }

        container.erase(ids[1]);
        assert_eq!(container.len(), 2);
        assert_eq!(container.front(), Some(ids[0]));
        container.advance_front(None);
        assert_eq!(container.front(), Some(ids[2]));
    }

    #[test]
    fn test_advance_on_empty_container_is_noop() {
        let mut ordered = OrderedCursorContainer::default();
        ordered.advance_front(None);
        assert!(ordered.is_empty());

        let mut unordered = UnorderedCursorContainer::default();
        unordered.advance_front(None);
        assert!(unordered.is_empty());
    }
}
