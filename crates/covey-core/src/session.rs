//! The session contract with the coordination service.
//!
//! A [`Connector`] negotiates sessions; each session is a
//! [`CoordinationClient`] paired with an asynchronous [`SessionEvent`]
//! stream. The group layer owns exactly one session at a time and is the
//! only consumer of this contract.
//!
//! Watches follow the service's one-shot model: a `children(path, true)`
//! call arms a single notification for that path, delivered as
//! [`SessionEvent::ChildrenChanged`] on the event stream. The caller
//! re-arms by listing again.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::acl::Acl;
use crate::error::CoordinationError;

/// Identifier of one session epoch, assigned by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub i64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Asynchronous events delivered on a session's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session (re)established connectivity.
    Connected,
    /// Connectivity was lost; the session may still recover.
    Disconnected,
    /// The session is permanently dead; all its ephemerals are gone.
    Expired,
    /// The child set under `path` changed (one-shot watch delivery).
    ChildrenChanged {
        /// Parent path the watch was armed on.
        path: String,
    },
}

/// Flags controlling entry creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateFlags {
    /// Remove the entry automatically when the owning session ends.
    pub ephemeral: bool,
    /// Suffix the entry name with a monotonically increasing counter.
    pub sequential: bool,
}

impl CreateFlags {
    /// Both ephemeral and sequential, as group memberships are created.
    pub fn ephemeral_sequential() -> CreateFlags {
        CreateFlags {
            ephemeral: true,
            sequential: true,
        }
    }
}

/// Credentials for session authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Authentication scheme, e.g. `digest`.
    pub scheme: String,
    /// Scheme-specific identity, e.g. `user:password`.
    pub identity: String,
}

impl Credentials {
    /// Digest-scheme credentials.
    pub fn digest(identity: impl Into<String>) -> Credentials {
        Credentials {
            scheme: "digest".to_string(),
            identity: identity.into(),
        }
    }
}

/// One live session against the coordination service.
///
/// All operations are serialized by the caller; the contract makes no
/// concurrency guarantees beyond what the service itself provides.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Attach credentials to this session. Affects subsequent
    /// authorization checks and creator-ACL matching.
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), CoordinationError>;

    /// Create an entry, returning the path actually created (which differs
    /// from `path` for sequential entries).
    ///
    /// With `recursive`, missing ancestors are created first with a
    /// permissive ACL; the leaf itself still fails with `NodeExists` if
    /// present. A trailing `/` on `path` means an empty name prefix for
    /// sequential creation.
    async fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: Acl,
        flags: CreateFlags,
        recursive: bool,
    ) -> Result<String, CoordinationError>;

    /// Read an entry's data.
    async fn get(&self, path: &str) -> Result<Vec<u8>, CoordinationError>;

    /// Overwrite an entry's data. `version` of `-1` matches any version.
    async fn set(&self, path: &str, data: &[u8], version: i64) -> Result<(), CoordinationError>;

    /// Delete an entry. Fails with `NotEmpty` if it has children.
    async fn delete(&self, path: &str) -> Result<(), CoordinationError>;

    /// List direct children of `path`, optionally arming a one-shot watch.
    async fn children(&self, path: &str, watch: bool) -> Result<Vec<String>, CoordinationError>;

    /// Whether an entry exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool, CoordinationError>;

    /// This session's identifier.
    fn session_id(&self) -> SessionId;

    /// The negotiated session timeout.
    fn session_timeout(&self) -> Duration;
}

/// A freshly negotiated session: the client plus its event stream.
pub struct Connection {
    /// Handle for issuing requests on the session.
    pub client: Box<dyn CoordinationClient>,
    /// Stream of session-state and watch events.
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

/// Establishes sessions against a coordination service endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Negotiate a new session.
    ///
    /// The effective timeout is `requested_timeout` clamped into the
    /// service's advertised `[min, max]` bound.
    async fn connect(&self, requested_timeout: Duration) -> Result<Connection, CoordinationError>;
}

#[async_trait]
impl<T: Connector + ?Sized> Connector for std::sync::Arc<T> {
    async fn connect(&self, requested_timeout: Duration) -> Result<Connection, CoordinationError> {
        (**self).connect(requested_timeout).await
    }
}
