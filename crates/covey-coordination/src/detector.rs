//! Leader detection over a group's membership snapshot.
//!
//! Who is leader is a pure function of the snapshot: the membership with
//! the minimum sequence number, or none when the group is empty. The
//! detector keeps no state of its own; it evaluates that function against
//! every snapshot the group publishes.

use covey_core::CoordinationError;
use tokio::sync::watch;
use tracing::debug;

use crate::group::Group;
use crate::types::GroupSnapshot;
use crate::types::Membership;

/// Derives the current leader from a [`Group`] and reports changes.
///
/// Detection is driven entirely by the group's watch-triggered snapshot
/// recomputations; no polling is involved. Any number of concurrent
/// `detect` calls share the same underlying feed, each evaluated against
/// its own `previous` value.
#[derive(Clone)]
pub struct LeaderDetector {
    snapshot: watch::Receiver<GroupSnapshot>,
}

impl LeaderDetector {
    /// Create a detector over the given group.
    pub fn new(group: &Group) -> LeaderDetector {
        LeaderDetector {
            snapshot: group.watch(),
        }
    }

    /// Resolve as soon as the group's leader differs from `previous`.
    ///
    /// Membership identity is its sequence number, so the transitions into
    /// and out of "no leader" both count as changes. If the leader already
    /// differs when called, this resolves on the next scheduling
    /// opportunity. Fails with `ConnectionLoss` only if the group itself
    /// has shut down.
    pub async fn detect(
        &self,
        previous: Option<Membership>,
    ) -> Result<Option<Membership>, CoordinationError> {
        let mut snapshot = self.snapshot.clone();
        loop {
            let leader = snapshot.borrow_and_update().leader();
            if !same_leader(leader.as_ref(), previous.as_ref()) {
                debug!(
                    previous = previous.as_ref().map(|m| m.sequence()),
                    current = leader.as_ref().map(|m| m.sequence()),
                    "leader changed"
                );
                return Ok(leader);
            }
            if snapshot.changed().await.is_err() {
                return Err(CoordinationError::ConnectionLoss);
            }
        }
    }
}

fn same_leader(current: Option<&Membership>, previous: Option<&Membership>) -> bool {
    match (current, previous) {
        (None, None) => true,
        (Some(a), Some(b)) => a.sequence() == b.sequence(),
        _ => false,
    }
}
