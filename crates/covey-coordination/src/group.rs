//! Group membership over a namespace path.
//!
//! A [`Group`] owns one session to the coordination service and maintains a
//! live snapshot of the ephemeral, sequential entries under its path. All
//! state lives in a single spawned task ([`GroupTask`]); joins, cancels,
//! watch deliveries, and recovery are messages serialized through that task,
//! so no two operations on the same group ever race on its state.
//!
//! Recovery model: transient disconnection keeps the session epoch alive
//! until the negotiated session timeout elapses. Session expiration, or a
//! disconnection that outlives the timeout, ends the epoch - every owned
//! membership is invalidated, the snapshot empties, and the task reconnects
//! with a fresh session at `retry_interval` pacing. Memberships are never
//! recreated automatically; callers re-join.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::time::Duration;

use covey_core::Acl;
use covey_core::Connection;
use covey_core::Connector;
use covey_core::CoordinationClient;
use covey_core::CoordinationError;
use covey_core::CreateFlags;
use covey_core::Credentials;
use covey_core::SessionEvent;
use covey_core::SessionId;
use covey_core::path;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio::time::sleep_until;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::types::GroupSnapshot;
use crate::types::Membership;

/// Default pause between reconnect attempts after a lost session epoch.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Deadline placeholder while no recovery timer is armed.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Tunables for a group's session and recovery behavior.
#[derive(Debug, Clone)]
pub struct GroupOptions {
    /// Requested session timeout; the service clamps it into its
    /// advertised bounds.
    pub session_timeout: Duration,
    /// Pause between reconnect attempts during recovery.
    pub retry_interval: Duration,
    /// Credentials attached to every session the group establishes.
    pub auth: Option<Credentials>,
}

impl Default for GroupOptions {
    fn default() -> GroupOptions {
        GroupOptions {
            session_timeout: Duration::from_secs(10),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            auth: None,
        }
    }
}

type JoinReply = oneshot::Sender<Result<Membership, CoordinationError>>;
type CancelReply = oneshot::Sender<Result<bool, CoordinationError>>;

enum Command {
    Join { data: Vec<u8>, reply: JoinReply },
    Cancel { membership: Membership, reply: CancelReply },
    Session { reply: oneshot::Sender<Option<SessionId>> },
}

/// Handle to a group's serialized task. Cheap to clone.
#[derive(Clone)]
pub struct Group {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<GroupSnapshot>,
    retry_interval: Duration,
}

impl Group {
    /// Create a group rooted at `group_path` (a trailing `/` is accepted
    /// and normalized away) and start its background task.
    pub fn new(connector: impl Connector + 'static, group_path: &str, options: GroupOptions) -> Group {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(GroupSnapshot::default());
        let retry_interval = options.retry_interval;
        let task = GroupTask {
            connector: Box::new(connector),
            group_path: path::normalize(group_path),
            options,
            commands: commands_rx,
            snapshot_tx,
            tracked: BTreeMap::new(),
            pending_joins: VecDeque::new(),
            pending_cancels: VecDeque::new(),
            conn: None,
            retry_at: Instant::now(),
        };
        tokio::spawn(task.run());
        Group {
            commands: commands_tx,
            snapshot: snapshot_rx,
            retry_interval,
        }
    }

    /// Join the group: create an ephemeral, sequential entry carrying
    /// `data`, with read for everyone and full control for the creator.
    ///
    /// Transient disconnection is absorbed by queueing the join until the
    /// session recovers. `NotAuthorized` surfaces immediately;
    /// `ConnectionLoss` surfaces only once a recovery epoch is abandoned.
    pub async fn join(&self, data: impl Into<Vec<u8>>) -> Result<Membership, CoordinationError> {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(Command::Join { data: data.into(), reply })
            .map_err(|_| CoordinationError::ConnectionLoss)?;
        result.await.map_err(|_| CoordinationError::ConnectionLoss)?
    }

    /// Cancel a membership by deleting its backing entry.
    ///
    /// Idempotent: returns `false` without contacting the service when the
    /// membership is already cancelled or invalidated, `true` once deletion
    /// is confirmed.
    pub async fn cancel(&self, membership: &Membership) -> Result<bool, CoordinationError> {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(Command::Cancel {
                membership: membership.clone(),
                reply,
            })
            .map_err(|_| CoordinationError::ConnectionLoss)?;
        result.await.map_err(|_| CoordinationError::ConnectionLoss)?
    }

    /// Current session identifier, if a session is established.
    pub async fn session(&self) -> Result<Option<SessionId>, CoordinationError> {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(Command::Session { reply })
            .map_err(|_| CoordinationError::ConnectionLoss)?;
        result.await.map_err(|_| CoordinationError::ConnectionLoss)
    }

    /// Subscribe to snapshot recomputations.
    ///
    /// The receiver always holds the latest snapshot; waiters are only
    /// woken when the member set actually changed.
    pub fn watch(&self) -> watch::Receiver<GroupSnapshot> {
        self.snapshot.clone()
    }

    /// The retry pacing this group (and contenders layered on it) uses.
    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }
}

/// A tracked member: the entry name plus the cancellation channel backing
/// every handle to it.
struct Tracked {
    name: String,
    notify: watch::Sender<Option<bool>>,
    handle: Membership,
}

struct Conn {
    client: Box<dyn CoordinationClient>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    /// Armed on disconnection: when it fires the epoch is abandoned.
    deadline: Option<Instant>,
}

enum Step {
    Command(Option<Command>),
    Event(Option<SessionEvent>),
    RecoveryDeadline,
    Reconnect,
}

struct GroupTask {
    connector: Box<dyn Connector>,
    group_path: String,
    options: GroupOptions,
    commands: mpsc::UnboundedReceiver<Command>,
    snapshot_tx: watch::Sender<GroupSnapshot>,
    tracked: BTreeMap<u64, Tracked>,
    pending_joins: VecDeque<(Vec<u8>, JoinReply)>,
    pending_cancels: VecDeque<(Membership, CancelReply)>,
    conn: Option<Conn>,
    retry_at: Instant,
}

impl GroupTask {
    async fn run(mut self) {
        loop {
            let step = if let Some(conn) = self.conn.as_mut() {
                let deadline = conn.deadline.unwrap_or_else(|| Instant::now() + FAR_FUTURE);
                tokio::select! {
                    event = conn.events.recv() => Step::Event(event),
                    command = self.commands.recv() => Step::Command(command),
                    _ = sleep_until(deadline) => Step::RecoveryDeadline,
                }
            } else {
                tokio::select! {
                    command = self.commands.recv() => Step::Command(command),
                    _ = sleep_until(self.retry_at) => Step::Reconnect,
                }
            };

            match step {
                Step::Command(None) => {
                    debug!(path = %self.group_path, "group handle dropped, shutting down");
                    return;
                }
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Event(Some(event)) => self.handle_event(event).await,
                Step::Event(None) => {
                    // Event stream gone means the session is dead.
                    warn!(path = %self.group_path, "session event stream closed");
                    self.abandon_epoch(true);
                }
                Step::RecoveryDeadline => {
                    if self.conn.as_ref().is_some_and(|c| c.deadline.is_some()) {
                        warn!(
                            path = %self.group_path,
                            "session recovery exceeded the negotiated timeout, abandoning epoch"
                        );
                        self.abandon_epoch(false);
                    }
                }
                Step::Reconnect => self.try_connect().await,
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Join { data, reply } => self.handle_join(data, reply).await,
            Command::Cancel { membership, reply } => self.handle_cancel(membership, reply).await,
            Command::Session { reply } => {
                let _ = reply.send(self.conn.as_ref().map(|c| c.client.session_id()));
            }
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                if let Some(conn) = self.conn.as_mut() {
                    conn.deadline = None;
                }
                info!(path = %self.group_path, "session reconnected within its timeout");
                if let Err(error) = self.refresh_snapshot().await {
                    debug!(path = %self.group_path, %error, "resync after reconnect failed");
                }
                self.flush_pending().await;
            }
            SessionEvent::Disconnected => {
                if let Some(conn) = self.conn.as_mut() {
                    let timeout = conn.client.session_timeout();
                    conn.deadline = Some(Instant::now() + timeout);
                    info!(
                        path = %self.group_path,
                        timeout_ms = timeout.as_millis() as u64,
                        "disconnected, awaiting session recovery"
                    );
                }
            }
            SessionEvent::Expired => {
                info!(path = %self.group_path, "session expired, invalidating memberships");
                self.abandon_epoch(true);
            }
            SessionEvent::ChildrenChanged { path } => {
                if path == self.group_path {
                    if let Err(error) = self.refresh_snapshot().await {
                        debug!(path = %self.group_path, %error, "listing after watch event failed");
                    }
                }
            }
        }
    }

    async fn handle_join(&mut self, data: Vec<u8>, reply: JoinReply) {
        if self.conn.is_none() {
            self.pending_joins.push_back((data, reply));
            return;
        }
        // Trailing slash: empty name prefix, the service appends the counter.
        let prefix = format!("{}/", self.group_path);
        let created = match self.conn.as_mut() {
            Some(conn) => {
                conn.client
                    .create(
                        &prefix,
                        &data,
                        Acl::EVERYONE_READ_CREATOR_ALL,
                        CreateFlags::ephemeral_sequential(),
                        true,
                    )
                    .await
            }
            None => Err(CoordinationError::ConnectionLoss),
        };
        match created {
            Ok(created_path) => {
                let parsed = path::split(&created_path)
                    .and_then(|(_, name)| path::sequence_suffix(name).map(|seq| (name.to_string(), seq)));
                let Some((name, sequence)) = parsed else {
                    warn!(path = %created_path, "created entry carries no sequence suffix");
                    let _ = reply.send(Err(CoordinationError::ConnectionLoss));
                    return;
                };
                debug!(path = %created_path, sequence, "joined group");
                let handle = self.track(sequence, &name).handle.clone();
                if let Err(error) = self.refresh_snapshot().await {
                    debug!(path = %self.group_path, %error, "listing after join failed");
                    self.publish_snapshot();
                }
                let _ = reply.send(Ok(handle));
            }
            Err(error) if error.is_retryable() => {
                debug!(path = %self.group_path, %error, "join interrupted, queued for retry");
                self.pending_joins.push_back((data, reply));
                self.arm_recovery_deadline();
            }
            Err(error) => {
                let _ = reply.send(Err(error));
            }
        }
    }

    async fn handle_cancel(&mut self, membership: Membership, reply: CancelReply) {
        if membership.cancellation().is_some() {
            let _ = reply.send(Ok(false));
            return;
        }
        // A membership from a different group path is never ours to delete.
        let parent = path::split(membership.path()).map(|(parent, _)| parent);
        if parent != Some(self.group_path.as_str()) {
            let _ = reply.send(Ok(false));
            return;
        }
        let Some(name) = self.tracked.get(&membership.sequence()).map(|t| t.name.clone()) else {
            let _ = reply.send(Ok(false));
            return;
        };
        if self.conn.is_none() {
            self.pending_cancels.push_back((membership, reply));
            return;
        }
        let target = path::join(&self.group_path, &name);
        let deleted = match self.conn.as_mut() {
            Some(conn) => conn.client.delete(&target).await,
            None => Err(CoordinationError::ConnectionLoss),
        };
        match deleted {
            Ok(()) => {
                debug!(path = %target, "membership cancelled");
                if let Some(tracked) = self.tracked.remove(&membership.sequence()) {
                    let _ = tracked.notify.send(Some(true));
                }
                if let Err(error) = self.refresh_snapshot().await {
                    debug!(path = %self.group_path, %error, "listing after cancel failed");
                    self.publish_snapshot();
                }
                let _ = reply.send(Ok(true));
            }
            Err(CoordinationError::NoNode { .. }) => {
                // Entry already gone; the membership was invalidated under us.
                if let Some(tracked) = self.tracked.remove(&membership.sequence()) {
                    let _ = tracked.notify.send(Some(false));
                }
                self.publish_snapshot();
                let _ = reply.send(Ok(false));
            }
            Err(error) if error.is_retryable() => {
                self.pending_cancels.push_back((membership, reply));
                self.arm_recovery_deadline();
            }
            Err(error) => {
                let _ = reply.send(Err(error));
            }
        }
    }

    /// Start the recovery clock if it is not already running. Covers
    /// op-level connectivity failures that arrive without a matching
    /// `Disconnected` event; without a deadline the queued operation
    /// would never flush.
    fn arm_recovery_deadline(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            if conn.deadline.is_none() {
                let timeout = conn.client.session_timeout();
                conn.deadline = Some(Instant::now() + timeout);
            }
        }
    }

    /// Give up the current session epoch: invalidate every membership,
    /// empty the snapshot, and schedule a reconnect.
    ///
    /// Queued joins survive expiration (they retry under the new session);
    /// they fail with `ConnectionLoss` when recovery itself gave up.
    fn abandon_epoch(&mut self, keep_pending_joins: bool) {
        self.conn = None;
        for (_, tracked) in std::mem::take(&mut self.tracked) {
            let _ = tracked.notify.send(Some(false));
        }
        self.publish_snapshot();
        for (_, reply) in self.pending_cancels.drain(..) {
            let _ = reply.send(Ok(false));
        }
        if !keep_pending_joins {
            for (_, reply) in self.pending_joins.drain(..) {
                let _ = reply.send(Err(CoordinationError::ConnectionLoss));
            }
        }
        self.retry_at = Instant::now() + self.options.retry_interval;
    }

    async fn try_connect(&mut self) {
        let connection = match self.connector.connect(self.options.session_timeout).await {
            Ok(connection) => connection,
            Err(error) => {
                debug!(path = %self.group_path, %error, "connect attempt failed");
                self.retry_at = Instant::now() + self.options.retry_interval;
                return;
            }
        };
        let Connection { client, events } = connection;
        let session_id = client.session_id();
        if let Some(credentials) = &self.options.auth {
            if let Err(error) = client.authenticate(credentials).await {
                warn!(%session_id, %error, "authentication failed, retrying with a fresh session");
                self.retry_at = Instant::now() + self.options.retry_interval;
                return;
            }
        }
        // The group path must exist before we can watch it.
        match client.create(&self.group_path, b"", Acl::OPEN, CreateFlags::default(), true).await {
            Ok(_) | Err(CoordinationError::NodeExists { .. }) => {}
            Err(error) => {
                warn!(path = %self.group_path, %error, "failed to establish group path");
                self.retry_at = Instant::now() + self.options.retry_interval;
                return;
            }
        }
        info!(path = %self.group_path, %session_id, "connected to coordination service");
        self.conn = Some(Conn {
            client,
            events,
            deadline: None,
        });
        if let Err(error) = self.refresh_snapshot().await {
            debug!(path = %self.group_path, %error, "initial listing failed");
        }
        self.flush_pending().await;
    }

    async fn flush_pending(&mut self) {
        let cancels: Vec<_> = self.pending_cancels.drain(..).collect();
        for (membership, reply) in cancels {
            self.handle_cancel(membership, reply).await;
        }
        let joins: Vec<_> = self.pending_joins.drain(..).collect();
        for (data, reply) in joins {
            self.handle_join(data, reply).await;
        }
    }

    /// Re-list the children, re-arming the watch, and reconcile the
    /// tracked members against the listing.
    async fn refresh_snapshot(&mut self) -> Result<(), CoordinationError> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(());
        };
        let children = conn.client.children(&self.group_path, true).await?;
        let mut live: BTreeMap<u64, String> = BTreeMap::new();
        for name in children {
            if let Some(sequence) = path::sequence_suffix(&name) {
                live.insert(sequence, name);
            }
        }
        let stale: Vec<u64> =
            self.tracked.keys().filter(|sequence| !live.contains_key(sequence)).copied().collect();
        for sequence in stale {
            if let Some(tracked) = self.tracked.remove(&sequence) {
                debug!(path = %self.group_path, sequence, "membership vanished from listing");
                let _ = tracked.notify.send(Some(false));
            }
        }
        for (sequence, name) in live {
            self.track(sequence, &name);
        }
        self.publish_snapshot();
        Ok(())
    }

    fn track(&mut self, sequence: u64, name: &str) -> &Tracked {
        let group_path = &self.group_path;
        self.tracked.entry(sequence).or_insert_with(|| {
            let full = path::join(group_path, name);
            let (notify, cancelled) = watch::channel(None);
            Tracked {
                name: name.to_string(),
                notify,
                handle: Membership::new(full, sequence, cancelled),
            }
        })
    }

    fn publish_snapshot(&self) {
        let members: BTreeMap<u64, Membership> =
            self.tracked.iter().map(|(sequence, tracked)| (*sequence, tracked.handle.clone())).collect();
        let snapshot = GroupSnapshot::new(members);
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
