//! The collaboration service facade.
//!
//! One explicitly constructed instance per process, owned by the
//! application's composition root and handed (or lent through a trait)
//! to whatever needs live updates. `initialize`/`disconnect` are its
//! only lifecycle hooks.

mod event_loop;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lotview_common::sync::{lock, read, write};
use lotview_common::CollabError;

use crate::config::CollabConfig;
use crate::conflict::RecordCache;
use crate::protocol::{
    now_iso, CollaborationUser, ConflictReport, LiveUpdate, UpdateKind, UserIdentity, UserStatus,
};
use crate::registry::{
    listener_subscription, next_sub_id, update_subscription, Listeners, Subscription, UpdateBucket,
    UpdateRegistry,
};
use crate::transport::{JoinSpec, Transport, TransportHandle};

pub(crate) type ConflictCallback = dyn Fn(&ConflictReport) + Send + Sync;
pub(crate) type PresenceCallback = dyn Fn(&[CollaborationUser]) + Send + Sync;

/// Shared state behind the service facade. Mutated only by the service's
/// own handlers; external code reads through the accessor methods or
/// receives pushed callbacks.
pub(crate) struct Inner {
    pub(crate) config: CollabConfig,
    pub(crate) cache: Arc<dyn RecordCache>,
    /// Local mirror of the current user's presence entry. The heartbeat
    /// refreshes peers from this without a round trip.
    pub(crate) session: RwLock<Option<CollaborationUser>>,
    /// Connected users, rebuilt wholesale from provider snapshots.
    pub(crate) presence: RwLock<HashMap<String, CollaborationUser>>,
    pub(crate) updates: Arc<Mutex<UpdateRegistry>>,
    pub(crate) conflict_subs: Arc<Mutex<Listeners<ConflictCallback>>>,
    pub(crate) presence_subs: Arc<Mutex<Listeners<PresenceCallback>>>,
    pub(crate) handle: RwLock<Option<TransportHandle>>,
    /// Topics this service opened and must close on disconnect.
    pub(crate) channels: Mutex<HashSet<String>>,
}

impl Inner {
    /// Presence entries as a stable, id-ordered list.
    pub(crate) fn presence_snapshot(&self) -> Vec<CollaborationUser> {
        let mut users: Vec<CollaborationUser> = read(&self.presence).values().cloned().collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    /// Push the current snapshot to every presence subscriber.
    pub(crate) fn notify_presence(&self) {
        let snapshot = self.presence_snapshot();
        let callbacks: Vec<Arc<PresenceCallback>> =
            lock(&self.presence_subs).iter().cloned().collect();
        for callback in callbacks {
            callback(&snapshot);
        }
    }

    pub(crate) fn notify_conflicts(&self, report: &ConflictReport) {
        let callbacks: Vec<Arc<ConflictCallback>> =
            lock(&self.conflict_subs).iter().cloned().collect();
        for callback in callbacks {
            callback(report);
        }
    }

    /// Re-announce the current user's presence state, refreshing
    /// `last_seen`. The single write path for liveness.
    pub(crate) async fn announce(&self) {
        let payload = {
            let mut session = write(&self.session);
            let Some(user) = session.as_mut() else {
                return;
            };
            user.last_seen = now_iso();
            serde_json::to_value(&*user).ok()
        };
        let handle = read(&self.handle).clone();
        if let (Some(handle), Some(payload)) = (handle, payload) {
            handle
                .presence_track(&self.config.presence_topic(), payload)
                .await;
        }
    }

    pub(crate) fn session_user_id(&self) -> Option<String> {
        read(&self.session).as_ref().map(|user| user.id.clone())
    }
}

/// Real-time collaboration service for the dealership console.
pub struct CollaborationService {
    inner: Arc<Inner>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CollaborationService {
    pub fn new(
        config: CollabConfig,
        transport: Box<dyn Transport>,
        cache: Arc<dyn RecordCache>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                cache,
                session: RwLock::new(None),
                presence: RwLock::new(HashMap::new()),
                updates: Arc::new(Mutex::new(UpdateRegistry::new())),
                conflict_subs: Arc::new(Mutex::new(Listeners::new())),
                presence_subs: Arc::new(Mutex::new(Listeners::new())),
                handle: RwLock::new(None),
                channels: Mutex::new(HashSet::new()),
            }),
            transport: Mutex::new(Some(transport)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start collaborating as `identity`: open the presence channel,
    /// subscribe to every watched table's change feed, and begin the
    /// liveness heartbeat.
    ///
    /// Errors only when the identity itself is structurally invalid;
    /// every runtime failure after that degrades with a log line instead
    /// of surfacing.
    pub async fn initialize(&self, identity: UserIdentity) -> Result<(), CollabError> {
        if identity.id.trim().is_empty() {
            return Err(CollabError::InvalidIdentity("missing id".into()));
        }

        let Some(transport) = lock(&self.transport).take() else {
            warn!("Collaboration service already initialized");
            return Ok(());
        };

        let user = CollaborationUser::from_identity(&identity);
        info!(user_id = %user.id, "Initializing collaboration service");
        *write(&self.inner.session) = Some(user.clone());
        write(&self.inner.presence).insert(user.id.clone(), user.clone());

        let (handle, event_rx) = transport.connect();
        *write(&self.inner.handle) = Some(handle.clone());

        // Presence channel; the announce happens once the join is
        // acknowledged (see the event loop).
        let presence_topic = self.inner.config.presence_topic();
        handle
            .join(&presence_topic, JoinSpec::Presence { key: user.id })
            .await;
        lock(&self.inner.channels).insert(presence_topic);

        // One change feed per watched table.
        for table in &self.inner.config.watched_tables {
            let topic = self.inner.config.feed_topic(table);
            handle
                .join(
                    &topic,
                    JoinSpec::TableFeed {
                        table: table.clone(),
                    },
                )
                .await;
            lock(&self.inner.channels).insert(topic);
        }

        let mut tasks = lock(&self.tasks);
        tasks.push(tokio::spawn(event_loop::run(
            Arc::clone(&self.inner),
            event_rx,
        )));
        tasks.push(tokio::spawn(heartbeat_loop(Arc::clone(&self.inner))));
        Ok(())
    }

    /// Stop collaborating: mark this user offline, stop the heartbeat,
    /// close every channel this service opened (best effort), and clear
    /// every registry. Safe to call more than once.
    pub async fn disconnect(&self) {
        if let Some(user) = write(&self.inner.session).as_mut() {
            user.status = UserStatus::Offline;
        }

        // Heartbeat and event loop stop before channel teardown so
        // nothing announces on a closing channel.
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }

        let handle = write(&self.inner.handle).take();
        if let Some(handle) = handle {
            let topics: Vec<String> = lock(&self.inner.channels).drain().collect();
            for topic in topics {
                // Individually best-effort; one failed teardown must not
                // stop the rest.
                handle.leave(&topic).await;
            }
            handle.disconnect().await;
        }

        *write(&self.inner.session) = None;
        write(&self.inner.presence).clear();
        lock(&self.inner.updates).clear();
        lock(&self.inner.conflict_subs).clear();
        lock(&self.inner.presence_subs).clear();
        info!("Collaboration service disconnected");
    }

    /// Register a callback for one update kind.
    pub fn subscribe<F>(&self, kind: UpdateKind, callback: F) -> Subscription
    where
        F: Fn(&LiveUpdate) + Send + Sync + 'static,
    {
        self.register(UpdateBucket::Kind(kind), callback)
    }

    /// Register a callback for every dispatched update.
    pub fn subscribe_all<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&LiveUpdate) + Send + Sync + 'static,
    {
        self.register(UpdateBucket::All, callback)
    }

    fn register<F>(&self, bucket: UpdateBucket, callback: F) -> Subscription
    where
        F: Fn(&LiveUpdate) + Send + Sync + 'static,
    {
        let id = next_sub_id();
        lock(&self.inner.updates).add(bucket, id, Arc::new(callback));
        update_subscription(&self.inner.updates, bucket, id)
    }

    /// Register a conflict callback.
    pub fn on_conflict<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConflictReport) + Send + Sync + 'static,
    {
        let id = next_sub_id();
        lock(&self.inner.conflict_subs).add(id, Arc::new(callback));
        listener_subscription(&self.inner.conflict_subs, id)
    }

    /// Register a presence callback. The callback is invoked immediately
    /// with the current snapshot so late subscribers are never stale.
    pub fn on_user_presence<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[CollaborationUser]) + Send + Sync + 'static,
    {
        let callback: Arc<PresenceCallback> = Arc::new(callback);
        callback(&self.inner.presence_snapshot());
        let id = next_sub_id();
        lock(&self.inner.presence_subs).add(id, Arc::clone(&callback));
        listener_subscription(&self.inner.presence_subs, id)
    }

    /// Publish an ad-hoc signal with no backing record to every other
    /// connected seat. The signals channel is opened lazily, once.
    pub async fn broadcast(&self, event: &str, data: Value) {
        let handle = read(&self.inner.handle).clone();
        let Some(handle) = handle else {
            warn!(event = %event, "Broadcast before initialize; dropped");
            return;
        };

        let topic = self.inner.config.signals_topic();
        let newly_opened = lock(&self.inner.channels).insert(topic.clone());
        if newly_opened {
            debug!(topic = %topic, "Opening signals channel");
            handle.join(&topic, JoinSpec::Signals).await;
        }

        let (user_id, user_name) = match read(&self.inner.session).as_ref() {
            Some(user) => (user.id.clone(), user.name.clone()),
            None => ("system".to_string(), "system".to_string()),
        };
        let mut envelope = match data {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        envelope.insert("user_id".to_string(), Value::String(user_id));
        envelope.insert("user_name".to_string(), Value::String(user_name));
        envelope.insert("timestamp".to_string(), Value::String(now_iso()));
        handle.broadcast(&topic, event, Value::Object(envelope)).await;
    }

    /// Record the page this user is now viewing. Local-only: peers see
    /// it on the next heartbeat tick.
    pub fn update_current_page(&self, page: &str) {
        if let Some(user) = write(&self.inner.session).as_mut() {
            user.current_page = page.to_string();
        }
    }

    /// Change this user's status and re-announce immediately rather than
    /// waiting for the next heartbeat tick.
    pub async fn update_status(&self, status: UserStatus) {
        if let Some(user) = write(&self.inner.session).as_mut() {
            user.status = status;
        }
        self.inner.announce().await;
    }

    /// Currently connected users. A synchronous read of the cached
    /// presence map; never touches the network.
    pub fn connected_users(&self) -> Vec<CollaborationUser> {
        self.inner.presence_snapshot()
    }

    /// Connected users whose last announced page is `page`.
    pub fn users_on_page(&self, page: &str) -> Vec<CollaborationUser> {
        self.inner
            .presence_snapshot()
            .into_iter()
            .filter(|user| user.current_page == page)
            .collect()
    }
}

/// Liveness heartbeat: re-announce the session's presence entry every
/// period, carrying the live `current_page` and a fresh `last_seen`.
async fn heartbeat_loop(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(inner.config.heartbeat_interval);
    // The first tick fires immediately; the announce at join-ack already
    // covers t=0.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        inner.announce().await;
    }
}
