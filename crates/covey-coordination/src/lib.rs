//! Distributed coordination building blocks over a hierarchical
//! coordination service.
//!
//! Three primitives, layered on the session contract from `covey-core`:
//!
//! - [`Group`] - membership under a namespace path, backed by ephemeral,
//!   sequential entries, resilient to session disruption
//! - [`LeaderDetector`] - derives the current leader (minimum sequence
//!   number) from a group and reports changes
//! - [`LeaderContender`] - candidacy lifecycle with transparent retry
//!   across transient session loss
//!
//! The group is the sole owner of its coordination session; detectors and
//! contenders issue requests into its serialized message stream rather
//! than touching shared state.
//!
//! ## Example
//!
//! ```ignore
//! use covey_coordination::{Group, GroupOptions, LeaderContender, LeaderDetector};
//!
//! let group = Group::new(connector, "/services/scheduler", GroupOptions::default());
//!
//! let contender = LeaderContender::new(&group, "host-1:5050");
//! let candidacy = contender.contend().await?;
//!
//! let detector = LeaderDetector::new(&group);
//! let leader = detector.detect(None).await?;
//!
//! // Candidacy survives session blips; `lost` resolves only when the
//! // membership is genuinely gone.
//! candidacy.lost().await;
//! ```

mod contender;
mod detector;
mod group;
mod types;

pub use contender::Candidacy;
pub use contender::LeaderContender;
pub use detector::LeaderDetector;
pub use group::DEFAULT_RETRY_INTERVAL;
pub use group::Group;
pub use group::GroupOptions;
pub use types::GroupSnapshot;
pub use types::Membership;
