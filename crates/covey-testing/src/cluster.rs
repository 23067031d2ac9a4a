//! The simulated coordination service.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use covey_core::Acl;
use covey_core::Connection;
use covey_core::Connector;
use covey_core::CoordinationClient;
use covey_core::CoordinationError;
use covey_core::CreateFlags;
use covey_core::Credentials;
use covey_core::Perms;
use covey_core::SessionEvent;
use covey_core::SessionId;
use covey_core::SystemTimeProvider;
use covey_core::TimeProvider;
use covey_core::path;
use tokio::sync::mpsc;
use tracing::debug;

/// In-memory coordination service with fault-injection controls.
///
/// Cloneable via `Arc`; an `Arc<SimulatedCluster>` is a [`Connector`] and
/// can be handed straight to a `Group`.
pub struct SimulatedCluster {
    state: Arc<Mutex<ClusterState>>,
}

struct Node {
    data: Vec<u8>,
    acl: Acl,
    creator_session: i64,
    creator_identity: Option<String>,
    ephemeral: bool,
    /// Counter for sequential children; monotonic, never reused.
    next_sequence: u64,
    version: i64,
    modified_at_ms: u64,
}

struct SessionRecord {
    events: mpsc::UnboundedSender<SessionEvent>,
    identity: Option<String>,
}

struct ClusterState {
    nodes: BTreeMap<String, Node>,
    sessions: HashMap<i64, SessionRecord>,
    /// One-shot child watches: parent path -> watching session ids.
    watches: HashMap<String, Vec<i64>>,
    next_session_id: i64,
    min_session_timeout: Duration,
    max_session_timeout: Duration,
    network_up: bool,
    time: Arc<dyn TimeProvider>,
}

impl ClusterState {
    fn check_session(&self, session_id: i64) -> Result<(), CoordinationError> {
        if !self.network_up {
            return Err(CoordinationError::ConnectionLoss);
        }
        if !self.sessions.contains_key(&session_id) {
            return Err(CoordinationError::SessionExpired);
        }
        Ok(())
    }

    fn permits(&self, node: &Node, session_id: i64, perm: Perms) -> bool {
        if node.acl.everyone.contains(perm) {
            return true;
        }
        if !node.acl.creator.contains(perm) {
            return false;
        }
        if node.creator_session == session_id {
            return true;
        }
        let identity = self.sessions.get(&session_id).and_then(|r| r.identity.as_deref());
        match (&node.creator_identity, identity) {
            (Some(creator), Some(caller)) => creator == caller,
            _ => false,
        }
    }

    /// Deliver and clear the one-shot child watches on `parent`.
    fn fire_child_watches(&mut self, parent: &str) {
        let Some(watchers) = self.watches.remove(parent) else {
            return;
        };
        for session_id in watchers {
            if let Some(record) = self.sessions.get(&session_id) {
                let _ = record.events.send(SessionEvent::ChildrenChanged {
                    path: parent.to_string(),
                });
            }
        }
    }

    fn child_names(&self, parent: &str) -> Vec<String> {
        let prefix = if parent == "/" {
            "/".to_string()
        } else {
            format!("{parent}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| &key[prefix.len()..])
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .map(|name| name.to_string())
            .collect()
    }

    fn has_children(&self, parent: &str) -> bool {
        !self.child_names(parent).is_empty()
    }

    fn insert_node(&mut self, full: String, data: Vec<u8>, acl: Acl, session_id: i64, ephemeral: bool) {
        let identity = self.sessions.get(&session_id).and_then(|r| r.identity.clone());
        let now = self.time.now_unix_ms();
        self.nodes.insert(full, Node {
            data,
            acl,
            creator_session: session_id,
            creator_identity: identity,
            ephemeral,
            next_sequence: 0,
            version: 0,
            modified_at_ms: now,
        });
    }

    /// Server-side session end: drop the session, delete its ephemerals,
    /// notify watchers, and tell the session it expired.
    fn expire_session(&mut self, session_id: i64) {
        let Some(record) = self.sessions.remove(&session_id) else {
            return;
        };
        debug!(session_id, "expiring session");
        let ephemerals: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral && node.creator_session == session_id)
            .map(|(key, _)| key.clone())
            .collect();
        for full in ephemerals {
            self.nodes.remove(&full);
            if let Some((parent, _)) = path::split(&full) {
                let parent = parent.to_string();
                self.fire_child_watches(&parent);
            }
        }
        let _ = record.events.send(SessionEvent::Expired);
    }
}

impl SimulatedCluster {
    /// Create a cluster with the system clock for timestamp metadata.
    pub fn new() -> SimulatedCluster {
        SimulatedCluster::with_time_provider(Arc::new(SystemTimeProvider))
    }

    /// Create a cluster with an injected clock.
    pub fn with_time_provider(time: Arc<dyn TimeProvider>) -> SimulatedCluster {
        let mut nodes = BTreeMap::new();
        let now = time.now_unix_ms();
        nodes.insert("/".to_string(), Node {
            data: Vec::new(),
            acl: Acl::OPEN,
            creator_session: 0,
            creator_identity: None,
            ephemeral: false,
            next_sequence: 0,
            version: 0,
            modified_at_ms: now,
        });
        SimulatedCluster {
            state: Arc::new(Mutex::new(ClusterState {
                nodes,
                sessions: HashMap::new(),
                watches: HashMap::new(),
                next_session_id: 1,
                min_session_timeout: Duration::from_secs(4),
                max_session_timeout: Duration::from_secs(40),
                network_up: true,
                time,
            })),
        }
    }

    /// Lower bound for negotiated session timeouts.
    pub fn set_min_session_timeout(&self, timeout: Duration) {
        self.lock().min_session_timeout = timeout;
    }

    /// Upper bound for negotiated session timeouts.
    pub fn set_max_session_timeout(&self, timeout: Duration) {
        self.lock().max_session_timeout = timeout;
    }

    /// Currently advertised lower timeout bound.
    pub fn min_session_timeout(&self) -> Duration {
        self.lock().min_session_timeout
    }

    /// Currently advertised upper timeout bound.
    pub fn max_session_timeout(&self) -> Duration {
        self.lock().max_session_timeout
    }

    /// Expire a session server-side, as if its timeout had elapsed.
    pub fn expire_session(&self, session_id: SessionId) {
        self.lock().expire_session(session_id.0);
    }

    /// Partition the service from every client. In-flight and subsequent
    /// operations fail with `ConnectionLoss`; connects are refused.
    pub fn shutdown_network(&self) {
        let mut state = self.lock();
        state.network_up = false;
        for record in state.sessions.values() {
            let _ = record.events.send(SessionEvent::Disconnected);
        }
        debug!("network down");
    }

    /// Heal the partition. Every session orphaned by the outage is
    /// expired; memberships from before the partition are gone.
    pub fn start_network(&self) {
        let mut state = self.lock();
        state.network_up = true;
        let orphaned: Vec<i64> = state.sessions.keys().copied().collect();
        for session_id in orphaned {
            state.expire_session(session_id);
        }
        debug!("network restored");
    }

    /// Whether an entry exists, bypassing sessions. For test assertions.
    pub fn node_exists(&self, path: &str) -> bool {
        self.lock().nodes.contains_key(&path::normalize(path))
    }

    /// When an entry was last written, per the injected clock. For test
    /// assertions.
    pub fn node_modified_at_ms(&self, path: &str) -> Option<u64> {
        self.lock().nodes.get(&path::normalize(path)).map(|node| node.modified_at_ms)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClusterState> {
        // A poisoned lock means a test already panicked; propagate.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SimulatedCluster {
    fn default() -> SimulatedCluster {
        SimulatedCluster::new()
    }
}

#[async_trait]
impl Connector for SimulatedCluster {
    async fn connect(&self, requested_timeout: Duration) -> Result<Connection, CoordinationError> {
        let mut state = self.lock();
        if !state.network_up {
            return Err(CoordinationError::ConnectionLoss);
        }
        let timeout = requested_timeout.clamp(state.min_session_timeout, state.max_session_timeout);
        let session_id = state.next_session_id;
        state.next_session_id += 1;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = events_tx.send(SessionEvent::Connected);
        state.sessions.insert(session_id, SessionRecord {
            events: events_tx,
            identity: None,
        });
        debug!(session_id, timeout_ms = timeout.as_millis() as u64, "session established");
        Ok(Connection {
            client: Box::new(SimulatedSession {
                session_id,
                timeout,
                state: Arc::clone(&self.state),
            }),
            events: events_rx,
        })
    }
}

/// One client session against a [`SimulatedCluster`].
struct SimulatedSession {
    session_id: i64,
    timeout: Duration,
    state: Arc<Mutex<ClusterState>>,
}

impl SimulatedSession {
    fn lock(&self) -> std::sync::MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CoordinationClient for SimulatedSession {
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), CoordinationError> {
        let mut state = self.lock();
        state.check_session(self.session_id)?;
        if let Some(record) = state.sessions.get_mut(&self.session_id) {
            record.identity = Some(credentials.identity.clone());
        }
        Ok(())
    }

    async fn create(
        &self,
        target: &str,
        data: &[u8],
        acl: Acl,
        flags: CreateFlags,
        recursive: bool,
    ) -> Result<String, CoordinationError> {
        let mut state = self.lock();
        state.check_session(self.session_id)?;
        let Some((parent, leaf)) = path::split(target) else {
            return Err(CoordinationError::NodeExists { path: target.to_string() });
        };
        let parent = parent.to_string();
        let leaf = leaf.to_string();

        if state.nodes.contains_key(&parent) {
            // fall through to the leaf create
        } else if recursive {
            // Missing ancestors get a permissive ACL, the leaf keeps `acl`.
            let mut chain = path::ancestors(&parent);
            chain.push(parent.clone());
            for ancestor in chain {
                if !state.nodes.contains_key(&ancestor) {
                    state.insert_node(ancestor.clone(), Vec::new(), Acl::OPEN, self.session_id, false);
                    if let Some((grandparent, _)) = path::split(&ancestor) {
                        let grandparent = grandparent.to_string();
                        state.fire_child_watches(&grandparent);
                    }
                }
            }
        } else {
            return Err(CoordinationError::NoNode { path: parent });
        }

        // Existence is checked before permissions, matching the service.
        if !flags.sequential {
            let full = path::normalize(target);
            if state.nodes.contains_key(&full) {
                return Err(CoordinationError::NodeExists { path: full });
            }
        }

        let parent_node = match state.nodes.get(&parent) {
            Some(node) => node,
            None => return Err(CoordinationError::NoNode { path: parent }),
        };
        if !state.permits(parent_node, self.session_id, Perms::CREATE) {
            return Err(CoordinationError::NotAuthorized { path: target.to_string() });
        }

        let full = if flags.sequential {
            let sequence = match state.nodes.get_mut(&parent) {
                Some(node) => {
                    let sequence = node.next_sequence;
                    node.next_sequence += 1;
                    sequence
                }
                None => return Err(CoordinationError::NoNode { path: parent }),
            };
            path::join(&parent, &format!("{leaf}{sequence:010}"))
        } else {
            path::normalize(target)
        };

        state.insert_node(full.clone(), data.to_vec(), acl, self.session_id, flags.ephemeral);
        state.fire_child_watches(&parent);
        debug!(session_id = self.session_id, path = %full, "created node");
        Ok(full)
    }

    async fn get(&self, target: &str) -> Result<Vec<u8>, CoordinationError> {
        let state = self.lock();
        state.check_session(self.session_id)?;
        let Some(node) = state.nodes.get(target) else {
            return Err(CoordinationError::NoNode { path: target.to_string() });
        };
        if !state.permits(node, self.session_id, Perms::READ) {
            return Err(CoordinationError::NotAuthorized { path: target.to_string() });
        }
        Ok(node.data.clone())
    }

    async fn set(&self, target: &str, data: &[u8], version: i64) -> Result<(), CoordinationError> {
        let mut state = self.lock();
        state.check_session(self.session_id)?;
        let Some(node) = state.nodes.get(target) else {
            return Err(CoordinationError::NoNode { path: target.to_string() });
        };
        if !state.permits(node, self.session_id, Perms::WRITE) {
            return Err(CoordinationError::NotAuthorized { path: target.to_string() });
        }
        if version != -1 && version != node.version {
            // Version conflicts are outside the closed taxonomy; they
            // collapse into the retryable class.
            return Err(CoordinationError::ConnectionLoss);
        }
        let now = state.time.now_unix_ms();
        if let Some(node) = state.nodes.get_mut(target) {
            node.data = data.to_vec();
            node.version += 1;
            node.modified_at_ms = now;
        }
        Ok(())
    }

    async fn delete(&self, target: &str) -> Result<(), CoordinationError> {
        let mut state = self.lock();
        state.check_session(self.session_id)?;
        let Some(node) = state.nodes.get(target) else {
            return Err(CoordinationError::NoNode { path: target.to_string() });
        };
        if state.has_children(target) {
            return Err(CoordinationError::NotEmpty { path: target.to_string() });
        }
        if !state.permits(node, self.session_id, Perms::DELETE) {
            return Err(CoordinationError::NotAuthorized { path: target.to_string() });
        }
        state.nodes.remove(target);
        if let Some((parent, _)) = path::split(target) {
            let parent = parent.to_string();
            state.fire_child_watches(&parent);
        }
        debug!(session_id = self.session_id, path = %target, "deleted node");
        Ok(())
    }

    async fn children(&self, target: &str, watch: bool) -> Result<Vec<String>, CoordinationError> {
        let mut state = self.lock();
        state.check_session(self.session_id)?;
        let Some(node) = state.nodes.get(target) else {
            return Err(CoordinationError::NoNode { path: target.to_string() });
        };
        if !state.permits(node, self.session_id, Perms::READ) {
            return Err(CoordinationError::NotAuthorized { path: target.to_string() });
        }
        let names = state.child_names(target);
        if watch {
            state.watches.entry(target.to_string()).or_default().push(self.session_id);
        }
        Ok(names)
    }

    async fn exists(&self, target: &str) -> Result<bool, CoordinationError> {
        let state = self.lock();
        state.check_session(self.session_id)?;
        Ok(state.nodes.contains_key(target))
    }

    fn session_id(&self) -> SessionId {
        SessionId(self.session_id)
    }

    fn session_timeout(&self) -> Duration {
        self.timeout
    }
}

impl Drop for SimulatedSession {
    fn drop(&mut self) {
        let mut state = self.lock();
        if !state.network_up {
            // The server cannot see the client go away during a partition;
            // the session lingers until `start_network` expires it.
            return;
        }
        // Clean close: the session ends without an Expired notification.
        if state.sessions.remove(&self.session_id).is_some() {
            let ephemerals: Vec<String> = state
                .nodes
                .iter()
                .filter(|(_, node)| node.ephemeral && node.creator_session == self.session_id)
                .map(|(key, _)| key.clone())
                .collect();
            for full in ephemerals {
                state.nodes.remove(&full);
                if let Some((parent, _)) = path::split(&full) {
                    let parent = parent.to_string();
                    state.fire_child_watches(&parent);
                }
            }
        }
    }
}
