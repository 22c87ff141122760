//! Transfer plans and resume tracking for shelf-sync.
//!
//! A session moves the items of a [`TransferPlan`] in order. Items are
//! committed when the peer acknowledges the batch that carried them; the
//! [`ResumeCursor`] tracks the contiguous committed prefix so an
//! interrupted session can restart at the first uncommitted item without
//! resending anything before it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which way an item moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// We push the item to the peer.
    Send,
    /// We fetch the item from the peer.
    Receive,
}

/// One step of a transfer plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedItem {
    /// Position in the plan.
    pub index: u32,
    /// Item id.
    pub item_id: String,
    /// Direction.
    pub direction: Direction,
}

/// Ordered list of items a session moves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPlan {
    items: Vec<PlannedItem>,
}

impl TransferPlan {
    /// Wrap planned items (indices must match positions).
    pub fn new(items: Vec<PlannedItem>) -> Self {
        debug_assert!(items.iter().enumerate().all(|(i, p)| p.index as usize == i));
        Self { items }
    }

    /// All items in order.
    pub fn items(&self) -> &[PlannedItem] {
        &self.items
    }

    /// Items from `start` onwards.
    pub fn remaining_from(&self, start: u32) -> &[PlannedItem] {
        self.items.get(start as usize..).unwrap_or(&[])
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing needs to move.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ids of items moving in `direction`, in plan order.
    pub fn ids(&self, direction: Direction) -> Vec<String> {
        self.items
            .iter()
            .filter(|p| p.direction == direction)
            .map(|p| p.item_id.clone())
            .collect()
    }
}

/// Tracks committed plan indices and the contiguous committed prefix.
///
/// Commits may arrive out of order (a batch is acknowledged after later
/// items were already attempted); only the contiguous prefix is safe to
/// skip on resume.
#[derive(Debug, Clone, Default)]
pub struct ResumeCursor {
    /// Committed indices above the contiguous prefix.
    committed: BTreeSet<u32>,
    /// Number of items committed without gaps from index 0.
    contiguous: u32,
}

impl ResumeCursor {
    /// Start with nothing committed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the first `next_index` items already committed.
    ///
    /// This is useful when resuming from a saved point.
    pub fn starting_at(next_index: u32) -> Self {
        Self {
            committed: BTreeSet::new(),
            contiguous: next_index,
        }
    }

    /// Mark one index committed.
    pub fn commit(&mut self, index: u32) {
        if index >= self.contiguous {
            self.committed.insert(index);
            self.update_contiguous();
        }
    }

    /// Mark every index in `indices` committed.
    pub fn commit_all(&mut self, indices: impl IntoIterator<Item = u32>) {
        for index in indices {
            self.commit(index);
        }
    }

    /// Whether `index` has been committed.
    pub fn is_committed(&self, index: u32) -> bool {
        index < self.contiguous || self.committed.contains(&index)
    }

    /// First index that is not part of the committed prefix.
    pub fn next_index(&self) -> u32 {
        self.contiguous
    }

    /// Whether commits exist beyond a gap.
    pub fn has_gaps(&self) -> bool {
        !self.committed.is_empty()
    }

    fn update_contiguous(&mut self) {
        while self.committed.remove(&self.contiguous) {
            self.contiguous += 1;
        }
    }
}

/// Where an interrupted session stopped.
///
/// Counters carry over so the resumed session reports totals for the
/// whole plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    /// The plan of the interrupted session.
    pub plan: TransferPlan,
    /// First uncommitted index.
    pub next_index: u32,
    /// Items completed before the interruption.
    pub completed_items: u32,
    /// Items failed before the interruption.
    pub failed_items: u32,
    /// Retries performed before the interruption.
    pub retry_count: u32,
    /// Full batches before the interruption.
    pub batch_count: u32,
    /// Payload bytes moved before the interruption.
    pub bytes_transferred: u64,
}

impl ResumePoint {
    /// Whether the point still has work left.
    pub fn has_remaining(&self) -> bool {
        (self.next_index as usize) < self.plan.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(n: u32) -> TransferPlan {
        TransferPlan::new(
            (0..n)
                .map(|i| PlannedItem {
                    index: i,
                    item_id: format!("item-{}", i),
                    direction: if i % 2 == 0 {
                        Direction::Send
                    } else {
                        Direction::Receive
                    },
                })
                .collect(),
        )
    }

    #[test]
    fn cursor_starts_at_zero() {
        let cursor = ResumeCursor::new();
        assert_eq!(cursor.next_index(), 0);
        assert!(!cursor.is_committed(0));
    }

    #[test]
    fn in_order_commits_advance() {
        let mut cursor = ResumeCursor::new();
        cursor.commit_all([0, 1, 2]);
        assert_eq!(cursor.next_index(), 3);
        assert!(!cursor.has_gaps());
    }

    #[test]
    fn gap_holds_back_the_prefix() {
        let mut cursor = ResumeCursor::new();
        cursor.commit(0);
        cursor.commit(2);
        assert_eq!(cursor.next_index(), 1);
        assert!(cursor.has_gaps());
        assert!(cursor.is_committed(2));

        cursor.commit(1);
        assert_eq!(cursor.next_index(), 3);
        assert!(!cursor.has_gaps());
    }

    #[test]
    fn duplicate_and_old_commits_are_idempotent() {
        let mut cursor = ResumeCursor::starting_at(5);
        cursor.commit(2);
        cursor.commit(5);
        cursor.commit(5);
        assert_eq!(cursor.next_index(), 6);
        assert!(cursor.is_committed(2));
    }

    #[test]
    fn plan_remaining_from_skips_prefix() {
        let p = plan(5);
        let rest: Vec<_> = p.remaining_from(3).iter().map(|i| i.index).collect();
        assert_eq!(rest, vec![3, 4]);
        assert!(p.remaining_from(9).is_empty());
    }

    #[test]
    fn plan_ids_by_direction() {
        let p = plan(4);
        assert_eq!(p.ids(Direction::Send), vec!["item-0", "item-2"]);
        assert_eq!(p.ids(Direction::Receive), vec!["item-1", "item-3"]);
    }

    #[test]
    fn resume_point_survives_serialization() {
        let point = ResumePoint {
            plan: plan(3),
            next_index: 2,
            completed_items: 2,
            failed_items: 0,
            retry_count: 1,
            batch_count: 0,
            bytes_transferred: 512,
        };
        let json = serde_json::to_string(&point).unwrap();
        let restored: ResumePoint = serde_json::from_str(&json).unwrap();
        assert_eq!(point, restored);
        assert!(restored.has_remaining());
    }
}
