//! Core contracts shared by the covey coordination primitives.
//!
//! This crate defines the boundary between the higher-level building blocks
//! (groups, leader detection, leader contention) and the coordination
//! service they are layered on:
//!
//! - [`CoordinationClient`] / [`Connector`] - the session contract consumed
//!   by `covey-coordination` and implemented by real service clients and by
//!   the in-memory cluster in `covey-testing`
//! - [`CoordinationError`] - the closed error taxonomy every service-specific
//!   failure collapses into
//! - [`Acl`] - the access-control presets used for namespace entries
//! - [`TimeProvider`] - injectable wall-clock reads for deterministic tests
//!
//! The contract is deliberately small: sessions, hierarchical entries with
//! ephemeral/sequential flags, child listings with one-shot watches, and an
//! asynchronous session-event stream. Everything else lives above it.

pub mod acl;
pub mod error;
pub mod path;
pub mod session;
pub mod time;

pub use acl::Acl;
pub use acl::Perms;
pub use error::CoordinationError;
pub use session::Connection;
pub use session::Connector;
pub use session::CoordinationClient;
pub use session::CreateFlags;
pub use session::Credentials;
pub use session::SessionEvent;
pub use session::SessionId;
pub use time::SimulatedTimeProvider;
pub use time::SystemTimeProvider;
pub use time::TimeProvider;
