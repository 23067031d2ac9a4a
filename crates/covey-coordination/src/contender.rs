//! Leader contention: hold a membership in a group and learn when it is
//! lost.
//!
//! The contender runs a small state machine: idle until `contend` is
//! called, contending while the join is in flight, candidate once the
//! membership exists, and finished once the membership is withdrawn or
//! lost. Session-level disruption during the join is weathered by retrying
//! at the group's retry pacing; once candidacy is established, losing the
//! membership (expiration, partition past the session timeout, or
//! withdrawal) resolves the candidacy's `lost` signal.

use covey_core::CoordinationError;
use tokio::sync::Mutex;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::group::Group;
use crate::types::Membership;

/// An established candidacy: the held membership plus a resolvable
/// "candidacy lost" signal.
#[derive(Clone)]
pub struct Candidacy {
    membership: Membership,
    lost: watch::Receiver<bool>,
}

impl Candidacy {
    /// The membership this candidacy holds.
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Whether candidacy has already been lost.
    pub fn is_lost(&self) -> bool {
        *self.lost.borrow()
    }

    /// Wait until candidacy is lost: the membership was cancelled
    /// (withdrawal) or invalidated (session loss past recovery).
    pub async fn lost(&self) {
        let mut rx = self.lost.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// One contention attempt, shared between `contend` callers.
#[derive(Clone)]
struct Attempt {
    outcome: watch::Receiver<Option<Result<Membership, CoordinationError>>>,
    lost: watch::Receiver<bool>,
}

impl Attempt {
    /// True once the attempt can no longer produce or hold a candidacy.
    fn finished(&self) -> bool {
        *self.lost.borrow() || matches!(&*self.outcome.borrow(), Some(Err(_)))
    }

    async fn outcome(&self) -> Result<Membership, CoordinationError> {
        let mut rx = self.outcome.clone();
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return Err(CoordinationError::ConnectionLoss);
            }
        }
    }
}

/// Contends for leadership of a group on behalf of one candidate.
pub struct LeaderContender {
    group: Group,
    data: Vec<u8>,
    state: Mutex<Option<Attempt>>,
}

impl LeaderContender {
    /// Create a contender that will join `group` with `data` as its
    /// membership payload.
    pub fn new(group: &Group, data: impl Into<Vec<u8>>) -> LeaderContender {
        LeaderContender {
            group: group.clone(),
            data: data.into(),
            state: Mutex::new(None),
        }
    }

    /// Contend for leadership.
    ///
    /// Resolves with a [`Candidacy`] once the membership is established.
    /// Re-entrant: while an attempt is contending or holding candidacy,
    /// further calls observe that same attempt. Retryable join failures
    /// are absorbed by retrying after the group's retry interval;
    /// `NotAuthorized` is terminal for the attempt and never retried.
    pub async fn contend(&self) -> Result<Candidacy, CoordinationError> {
        let attempt = {
            let mut state = self.state.lock().await;
            match state.as_ref() {
                Some(attempt) if !attempt.finished() => attempt.clone(),
                _ => {
                    let attempt = self.spawn_attempt();
                    *state = Some(attempt.clone());
                    attempt
                }
            }
        };
        let membership = attempt.outcome().await?;
        Ok(Candidacy {
            membership,
            lost: attempt.lost,
        })
    }

    /// Withdraw from contention by cancelling the held membership.
    ///
    /// Returns `false` without any network interaction when there is
    /// nothing to withdraw (never contended, or candidacy already lost).
    /// A withdraw issued while the join is still in flight waits for it:
    /// cancellation is delayed until the membership exists, and the
    /// candidacy's `lost` signal resolves from that same cancel
    /// confirmation.
    pub async fn withdraw(&self) -> Result<bool, CoordinationError> {
        let attempt = {
            let state = self.state.lock().await;
            match state.as_ref() {
                None => return Ok(false),
                Some(attempt) => attempt.clone(),
            }
        };
        if *attempt.lost.borrow() {
            return Ok(false);
        }
        match attempt.outcome().await {
            Ok(membership) => {
                let withdrawn = self.group.cancel(&membership).await?;
                info!(path = %membership, withdrawn, "withdrew from contention");
                Ok(withdrawn)
            }
            Err(_) => Ok(false),
        }
    }

    fn spawn_attempt(&self) -> Attempt {
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let (lost_tx, lost_rx) = watch::channel(false);
        let group = self.group.clone();
        let data = self.data.clone();
        let retry_interval = group.retry_interval();
        tokio::spawn(async move {
            loop {
                match group.join(data.clone()).await {
                    Ok(membership) => {
                        debug!(path = %membership, "candidacy established");
                        let _ = outcome_tx.send(Some(Ok(membership.clone())));
                        let explicit = membership.cancelled().await;
                        debug!(path = %membership, explicit, "candidacy lost");
                        let _ = lost_tx.send(true);
                        return;
                    }
                    Err(error) if error.is_retryable() => {
                        debug!(%error, "join attempt failed, retrying");
                        tokio::time::sleep(retry_interval).await;
                    }
                    Err(error) => {
                        warn!(%error, "contention failed");
                        let _ = outcome_tx.send(Some(Err(error)));
                        let _ = lost_tx.send(true);
                        return;
                    }
                }
            }
        });
        Attempt {
            outcome: outcome_rx,
            lost: lost_rx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_finished_on_terminal_failure() {
        let (outcome_tx, outcome) = watch::channel(None);
        let (_lost_tx, lost) = watch::channel(false);
        let attempt = Attempt { outcome, lost };
        assert!(!attempt.finished());

        let _ = outcome_tx.send(Some(Err(CoordinationError::NotAuthorized {
            path: "/g".into(),
        })));
        assert!(attempt.finished());
    }

    #[test]
    fn attempt_finished_on_candidacy_loss() {
        let (_outcome_tx, outcome) = watch::channel(None);
        let (lost_tx, lost) = watch::channel(false);
        let attempt = Attempt { outcome, lost };
        assert!(!attempt.finished());

        let _ = lost_tx.send(true);
        assert!(attempt.finished());
    }
}
