//! Memberships and group snapshots.

use std::collections::BTreeMap;

use tokio::sync::watch;

/// One registered presence in a group's namespace.
///
/// A membership is identified by the sequence number the coordination
/// service assigned at creation; sequence numbers only increase and are
/// never reused within a group path. Handles are cheap to clone and all
/// clones observe the same cancellation state.
///
/// Once a membership is cancelled or invalidated it is permanently dead;
/// re-joining the group produces a new membership with a new sequence.
#[derive(Clone)]
pub struct Membership {
    path: String,
    sequence: u64,
    cancelled: watch::Receiver<Option<bool>>,
}

impl Membership {
    pub(crate) fn new(
        path: String,
        sequence: u64,
        cancelled: watch::Receiver<Option<bool>>,
    ) -> Membership {
        Membership {
            path,
            sequence,
            cancelled,
        }
    }

    /// The service-assigned sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Full path of the backing entry.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Cancellation state: `None` while alive, `Some(true)` after a
    /// confirmed explicit cancel, `Some(false)` after invalidation
    /// (session loss, or the backing entry vanished).
    pub fn cancellation(&self) -> Option<bool> {
        *self.cancelled.borrow()
    }

    /// Wait until this membership is cancelled or invalidated.
    ///
    /// Resolves `true` for an explicit, confirmed cancel and `false` for
    /// invalidation. Resolves `false` if the owning group shuts down.
    pub async fn cancelled(&self) -> bool {
        let mut rx = self.cancelled.clone();
        loop {
            if let Some(explicit) = *rx.borrow_and_update() {
                return explicit;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }
}

impl PartialEq for Membership {
    fn eq(&self, other: &Membership) -> bool {
        self.path == other.path
    }
}

impl Eq for Membership {}

impl PartialOrd for Membership {
    fn partial_cmp(&self, other: &Membership) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Membership {
    fn cmp(&self, other: &Membership) -> std::cmp::Ordering {
        self.sequence.cmp(&other.sequence).then_with(|| self.path.cmp(&other.path))
    }
}

impl std::fmt::Debug for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Membership")
            .field("path", &self.path)
            .field("sequence", &self.sequence)
            .field("cancellation", &self.cancellation())
            .finish()
    }
}

impl std::fmt::Display for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

/// The group's current belief of which memberships exist.
///
/// Derived atomically from the latest children listing the service
/// delivered; never partially updated.
#[derive(Clone, Debug, Default)]
pub struct GroupSnapshot {
    members: BTreeMap<u64, Membership>,
}

impl GroupSnapshot {
    pub(crate) fn new(members: BTreeMap<u64, Membership>) -> GroupSnapshot {
        GroupSnapshot { members }
    }

    /// The leader: the membership with the minimum sequence number.
    pub fn leader(&self) -> Option<Membership> {
        self.members.values().next().cloned()
    }

    /// All memberships, ordered by sequence number.
    pub fn memberships(&self) -> Vec<Membership> {
        self.members.values().cloned().collect()
    }

    /// Whether a membership with this sequence number is present.
    pub fn contains_sequence(&self, sequence: u64) -> bool {
        self.members.contains_key(&sequence)
    }

    /// True when the group has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }
}

impl PartialEq for GroupSnapshot {
    fn eq(&self, other: &GroupSnapshot) -> bool {
        self.members.keys().eq(other.members.keys())
    }
}

impl Eq for GroupSnapshot {}

#[cfg(test)]
mod tests {
    use super::*;

    fn membership(sequence: u64) -> Membership {
        let (tx, rx) = watch::channel(None);
        std::mem::forget(tx);
        Membership::new(format!("/test/{sequence:010}"), sequence, rx)
    }

    #[test]
    fn leader_is_minimum_sequence() {
        let members: BTreeMap<u64, Membership> =
            [3, 1, 7].into_iter().map(|s| (s, membership(s))).collect();
        let snapshot = GroupSnapshot::new(members);
        assert_eq!(snapshot.leader().map(|m| m.sequence()), Some(1));
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn empty_snapshot_has_no_leader() {
        let snapshot = GroupSnapshot::default();
        assert!(snapshot.leader().is_none());
        assert!(snapshot.is_empty());
    }

    #[test]
    fn memberships_ordered_by_sequence() {
        let members: BTreeMap<u64, Membership> =
            [9, 2, 5].into_iter().map(|s| (s, membership(s))).collect();
        let snapshot = GroupSnapshot::new(members);
        let sequences: Vec<u64> = snapshot.memberships().iter().map(|m| m.sequence()).collect();
        assert_eq!(sequences, vec![2, 5, 9]);
    }

    #[test]
    fn snapshots_compare_by_member_set() {
        let a = GroupSnapshot::new([1, 2].into_iter().map(|s| (s, membership(s))).collect());
        let b = GroupSnapshot::new([1, 2].into_iter().map(|s| (s, membership(s))).collect());
        let c = GroupSnapshot::new([1].into_iter().map(|s| (s, membership(s))).collect());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn membership_equality_by_path() {
        let a = membership(4);
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, membership(5));
        assert!(membership(1) < membership(2));
    }
}
