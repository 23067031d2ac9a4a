//! Deterministic in-memory coordination service for tests.
//!
//! [`SimulatedCluster`] implements the `covey-core` session contract
//! entirely in memory: a hierarchical node table with ACL enforcement,
//! ephemeral and sequential entries, one-shot child watches, and session
//! lifecycle events. On top of the contract it exposes the fault controls
//! tests need:
//!
//! - [`SimulatedCluster::expire_session`] - server-side session expiry
//! - [`SimulatedCluster::shutdown_network`] / [`SimulatedCluster::start_network`] -
//!   partition and heal the whole service
//! - session-timeout negotiation bounds
//!
//! Combined with tokio's paused test clock, every recovery scenario in
//! `covey-coordination` runs deterministically with no wall-clock waits.

mod cluster;

pub use cluster::SimulatedCluster;

/// Install a test subscriber honoring `RUST_LOG`. Safe to call from every
/// test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
