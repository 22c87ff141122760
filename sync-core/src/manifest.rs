//! Manifest diffing.
//!
//! Compares the local manifest with the peer's by item id and version
//! (`last_modified` plus content hash) and splits the items into what to
//! send, what to receive and what conflicts. Conflicts are only detected
//! here; [`resolve_latest_wins`] is available to callers that want the
//! default tie-break, the engine never calls it.

use std::collections::{HashMap, HashSet};
use sync_types::{ManifestItem, SyncConflict};

use crate::resume::{Direction, PlannedItem, TransferPlan};

/// Result of comparing two manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    /// Items only we have, in local manifest order.
    pub to_send: Vec<ManifestItem>,
    /// Items only the peer has, in remote manifest order.
    pub to_receive: Vec<ManifestItem>,
    /// Items both hold in different versions.
    pub conflicts: Vec<SyncConflict>,
    /// Items both hold in the same version.
    pub unchanged: usize,
}

impl ManifestDiff {
    /// Number of items that will move.
    pub fn transfer_count(&self) -> usize {
        self.to_send.len() + self.to_receive.len()
    }

    /// Flatten into the ordered per-item plan: sends first, then receives.
    pub fn plan(&self) -> TransferPlan {
        let sends = self.to_send.iter().map(|i| (i, Direction::Send));
        let receives = self.to_receive.iter().map(|i| (i, Direction::Receive));
        let items = sends
            .chain(receives)
            .enumerate()
            .map(|(index, (item, direction))| PlannedItem {
                index: index as u32,
                item_id: item.item_id.clone(),
                direction,
            })
            .collect();
        TransferPlan::new(items)
    }
}

/// Compare two manifests.
///
/// If an id appears more than once in one manifest, the first entry wins.
pub fn diff_manifests(local: &[ManifestItem], remote: &[ManifestItem]) -> ManifestDiff {
    let local_by_id = index_by_id(local);
    let remote_by_id = index_by_id(remote);
    let mut diff = ManifestDiff::default();

    for item in first_occurrences(local) {
        match remote_by_id.get(item.item_id.as_str()) {
            None => diff.to_send.push(item.clone()),
            Some(theirs) if same_version(item, theirs) => diff.unchanged += 1,
            Some(theirs) => diff.conflicts.push(SyncConflict {
                item_id: item.item_id.clone(),
                local_version: item.clone(),
                remote_version: (*theirs).clone(),
            }),
        }
    }

    for item in first_occurrences(remote) {
        if !local_by_id.contains_key(item.item_id.as_str()) {
            diff.to_receive.push(item.clone());
        }
    }

    diff
}

fn same_version(a: &ManifestItem, b: &ManifestItem) -> bool {
    a.last_modified == b.last_modified && a.hash == b.hash
}

fn index_by_id(items: &[ManifestItem]) -> HashMap<&str, &ManifestItem> {
    let mut map = HashMap::with_capacity(items.len());
    for item in items {
        map.entry(item.item_id.as_str()).or_insert(item);
    }
    map
}

fn first_occurrences(items: &[ManifestItem]) -> Vec<&ManifestItem> {
    let mut seen = HashSet::with_capacity(items.len());
    let mut unique = Vec::with_capacity(items.len());
    for item in items {
        if seen.insert(item.item_id.as_str()) {
            unique.push(item);
        }
    }
    unique
}

/// Which side's version a caller chose for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep ours; nothing to transfer.
    KeepLocal,
    /// Take the peer's version.
    TakeRemote,
}

/// Default conflict policy: the most recently modified version wins.
///
/// Equal timestamps keep the local copy.
pub fn resolve_latest_wins(conflict: &SyncConflict) -> Resolution {
    if conflict.remote_version.last_modified > conflict.local_version.last_modified {
        Resolution::TakeRemote
    } else {
        Resolution::KeepLocal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::SyncItemType;

    fn item(id: &str, modified: u64) -> ManifestItem {
        ManifestItem {
            item_id: id.into(),
            item_type: SyncItemType::Book,
            hash: format!("{}-{}", id, modified),
            last_modified: modified,
        }
    }

    #[test]
    fn identical_manifests_have_nothing_to_do() {
        let items: Vec<_> = (0..5).map(|i| item(&format!("b{}", i), 10)).collect();
        let diff = diff_manifests(&items, &items);
        assert_eq!(diff.transfer_count(), 0);
        assert!(diff.conflicts.is_empty());
        assert_eq!(diff.unchanged, 5);
    }

    #[test]
    fn one_sided_items_are_scheduled() {
        let local = vec![item("a", 1), item("shared", 5)];
        let remote = vec![item("shared", 5), item("b", 2)];
        let diff = diff_manifests(&local, &remote);
        assert_eq!(diff.to_send, vec![item("a", 1)]);
        assert_eq!(diff.to_receive, vec![item("b", 2)]);
        assert!(diff.conflicts.is_empty());
    }

    #[test]
    fn diverging_timestamps_conflict() {
        let local = vec![item("x", 1)];
        let remote = vec![item("x", 2)];
        let diff = diff_manifests(&local, &remote);
        assert_eq!(diff.transfer_count(), 0);
        assert_eq!(diff.conflicts.len(), 1);
        assert_eq!(diff.conflicts[0].local_version.last_modified, 1);
        assert_eq!(diff.conflicts[0].remote_version.last_modified, 2);
    }

    #[test]
    fn diverging_content_with_same_timestamp_conflicts() {
        let local = vec![item("x", 1)];
        let mut theirs = item("x", 1);
        theirs.hash = "other".into();
        let diff = diff_manifests(&local, &[theirs]);
        assert_eq!(diff.conflicts.len(), 1);
    }

    #[test]
    fn empty_local_receives_everything() {
        let remote = vec![item("a", 1), item("b", 1)];
        let diff = diff_manifests(&[], &remote);
        assert_eq!(diff.to_receive.len(), 2);
        assert!(diff.to_send.is_empty());
    }

    #[test]
    fn duplicate_ids_use_first_entry() {
        let local = vec![item("a", 1), item("a", 9)];
        let diff = diff_manifests(&local, &[item("a", 1)]);
        assert_eq!(diff.unchanged, 1);
        assert!(diff.conflicts.is_empty());
        assert!(diff.to_send.is_empty());
    }

    #[test]
    fn plan_sends_before_receiving_in_manifest_order() {
        let local = vec![item("s2", 1), item("s1", 1)];
        let remote = vec![item("r1", 1)];
        let plan = diff_manifests(&local, &remote).plan();
        let order: Vec<_> = plan
            .items()
            .iter()
            .map(|p| (p.index, p.item_id.as_str(), p.direction))
            .collect();
        assert_eq!(
            order,
            vec![
                (0, "s2", Direction::Send),
                (1, "s1", Direction::Send),
                (2, "r1", Direction::Receive),
            ]
        );
    }

    #[test]
    fn latest_modification_wins() {
        let conflict = SyncConflict {
            item_id: "x".into(),
            local_version: item("x", 5),
            remote_version: item("x", 9),
        };
        assert_eq!(resolve_latest_wins(&conflict), Resolution::TakeRemote);

        let conflict = SyncConflict {
            item_id: "x".into(),
            local_version: item("x", 9),
            remote_version: item("x", 5),
        };
        assert_eq!(resolve_latest_wins(&conflict), Resolution::KeepLocal);
    }

    #[test]
    fn timestamp_tie_keeps_local() {
        let mut remote = item("x", 5);
        remote.hash = "different".into();
        let conflict = SyncConflict {
            item_id: "x".into(),
            local_version: item("x", 5),
            remote_version: remote,
        };
        assert_eq!(resolve_latest_wins(&conflict), Resolution::KeepLocal);
    }
}
