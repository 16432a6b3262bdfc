//! Reconnecting hub subscriptions keyed by [`TopicKey`].
//!
//! Each key owns at most one live connection task. A failed connection is
//! dropped from the registry and a reconnect timer takes its place; when the
//! timer fires the key is subscribed again. Unsubscribing cancels whichever of
//! the two exists.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use shared::models::{ConversationId, MessageId, MessagePayload, UserId};
use shared::topics::TopicKey;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::credentials::{CredentialsCache, CredentialsProvider};
use crate::notifier::{Notification, Notifier};
use crate::sse::SseFrame;
use crate::state::{ConnectionEvent, ConnectionState};
use crate::store::ConversationStore;
use crate::transport::HubTransport;

/// Delay before a failed subscription is retried.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// How many notified message ids are remembered for de-duplication.
const NOTIFIED_CAPACITY: usize = 1024;

/// Tunables for a [`SubscriptionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Wait between a failed connection and the next attempt.
    pub reconnect_delay: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

#[derive(Debug)]
struct ConnectionEntry {
    generation: u64,
    state: ConnectionState,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct PendingReconnect {
    generation: u64,
    cancel: CancellationToken,
}

/// Most recently notified message ids, oldest evicted first.
#[derive(Debug)]
struct NotifiedIds {
    capacity: usize,
    order: VecDeque<MessageId>,
    seen: HashSet<MessageId>,
}

impl NotifiedIds {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Returns `false` if `id` is already remembered.
    fn insert(&mut self, id: MessageId) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.order.len()
    }
}

#[derive(Debug, Default)]
struct Registry {
    connections: HashMap<TopicKey, ConnectionEntry>,
    reconnects: HashMap<TopicKey, PendingReconnect>,
    /// Resume cursor per key, handed to the hub on reconnect.
    last_event_ids: HashMap<TopicKey, String>,
}

struct Inner {
    transport: Arc<dyn HubTransport>,
    credentials: CredentialsCache,
    store: Arc<ConversationStore>,
    notifier: Arc<dyn Notifier>,
    reconnect_delay: Duration,
    registry: Mutex<Registry>,
    notified: Mutex<NotifiedIds>,
    generations: AtomicU64,
    shutdown: CancellationToken,
}

/// Owns every hub subscription of one client.
///
/// Dropping the manager tears down all connections and pending reconnects.
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("reconnect_delay", &self.inner.reconnect_delay)
            .finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    /// Creates a manager with no subscriptions. Credentials are fetched
    /// lazily on the first connect and shared by every topic.
    pub fn new(
        transport: Arc<dyn HubTransport>,
        credentials: Arc<dyn CredentialsProvider>,
        store: Arc<ConversationStore>,
        notifier: Arc<dyn Notifier>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                credentials: CredentialsCache::new(credentials),
                store,
                notifier,
                reconnect_delay: config.reconnect_delay,
                registry: Mutex::new(Registry::default()),
                notified: Mutex::new(NotifiedIds::with_capacity(NOTIFIED_CAPACITY)),
                generations: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// The store incoming messages are written to.
    #[must_use]
    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.inner.store
    }

    /// Follows every message of one conversation.
    pub async fn subscribe_to_conversation(&self, conversation_id: ConversationId) {
        self.subscribe(TopicKey::Conversation(conversation_id)).await;
    }

    /// Follows messages addressed to `user_id`. Only this topic raises
    /// notifications.
    pub async fn subscribe_to_user_messages(&self, user_id: UserId) {
        self.subscribe(TopicKey::UserMessages(user_id)).await;
    }

    /// Opens a connection for `key` unless one exists or is waiting to
    /// reconnect.
    pub async fn subscribe(&self, key: TopicKey) {
        let mut registry = self.inner.registry.lock().await;
        if registry.connections.contains_key(&key) || registry.reconnects.contains_key(&key) {
            debug!(%key, "already subscribed");
            return;
        }
        self.inner.open(&mut registry, key, ConnectionState::Connecting);
    }

    /// See [`SubscriptionManager::unsubscribe`].
    pub async fn unsubscribe_from_conversation(&self, conversation_id: ConversationId) -> bool {
        self.unsubscribe(TopicKey::Conversation(conversation_id)).await
    }

    /// See [`SubscriptionManager::unsubscribe`].
    pub async fn unsubscribe_user_messages(&self, user_id: UserId) -> bool {
        self.unsubscribe(TopicKey::UserMessages(user_id)).await
    }

    /// Closes the connection or cancels the pending reconnect for `key`.
    /// Returns whether anything was subscribed.
    pub async fn unsubscribe(&self, key: TopicKey) -> bool {
        let mut registry = self.inner.registry.lock().await;
        let found = close_key(&mut registry, key);
        registry.last_event_ids.remove(&key);
        found
    }

    /// Closes every connection and pending reconnect and forgets resume
    /// cursors.
    pub async fn unsubscribe_all(&self) {
        let mut registry = self.inner.registry.lock().await;
        let keys: HashSet<TopicKey> = registry
            .connections
            .keys()
            .chain(registry.reconnects.keys())
            .copied()
            .collect();
        for key in keys {
            close_key(&mut registry, key);
        }
        registry.last_event_ids.clear();
    }

    /// `None` when `key` is not subscribed.
    pub async fn connection_state(&self, key: TopicKey) -> Option<ConnectionState> {
        let registry = self.inner.registry.lock().await;
        registry
            .connections
            .get(&key)
            .map(|entry| entry.state)
            .or_else(|| {
                registry
                    .reconnects
                    .contains_key(&key)
                    .then_some(ConnectionState::Reconnecting)
            })
    }

    /// Keys with a live connection task.
    pub async fn active_keys(&self) -> Vec<TopicKey> {
        self.inner
            .registry
            .lock()
            .await
            .connections
            .keys()
            .copied()
            .collect()
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

fn close_key(registry: &mut Registry, key: TopicKey) -> bool {
    let mut found = false;
    if let Some(entry) = registry.connections.remove(&key) {
        entry.cancel.cancel();
        debug!(%key, from = %entry.state, "subscription closed");
        found = true;
    }
    if let Some(pending) = registry.reconnects.remove(&key) {
        pending.cancel.cancel();
        debug!(%key, "pending reconnect cancelled");
        found = true;
    }
    found
}

impl Inner {
    fn open(self: &Arc<Self>, registry: &mut Registry, key: TopicKey, state: ConnectionState) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        registry.connections.insert(
            key,
            ConnectionEntry {
                generation,
                state,
                cancel: cancel.clone(),
            },
        );
        tokio::spawn(Arc::clone(self).run_connection(key, generation, cancel));
    }

    async fn run_connection(self: Arc<Self>, key: TopicKey, generation: u64, cancel: CancellationToken) {
        let reason = tokio::select! {
            () = cancel.cancelled() => return,
            reason = self.drive(key, generation) => reason,
        };
        self.handle_failure(key, generation, &reason).await;
    }

    /// Runs one connection until it fails, returning why.
    #[instrument(name = "subscription.connect", skip_all, fields(%key))]
    async fn drive(&self, key: TopicKey, generation: u64) -> String {
        let credentials = match self.credentials.get().await {
            Ok(credentials) => credentials,
            Err(err) => return format!("hub credentials unavailable: {err}"),
        };
        let last_event_id = self
            .registry
            .lock()
            .await
            .last_event_ids
            .get(&key)
            .cloned();

        let topic = key.topic();
        let connected = self
            .transport
            .connect(
                &credentials.hub_url,
                &topic,
                &credentials.token,
                last_event_id.as_deref(),
            )
            .await;
        let mut events = match connected {
            Ok(events) => events,
            Err(err) => {
                if err.rejects_credentials() {
                    self.credentials.invalidate(&credentials.token).await;
                }
                return err.to_string();
            }
        };

        self.transition(key, generation, ConnectionEvent::Opened).await;
        info!(topic = %topic, resumed = last_event_id.is_some(), "subscription open");

        loop {
            match events.next().await {
                Some(Ok(frame)) => self.dispatch(key, frame).await,
                Some(Err(err)) => return err.to_string(),
                None => return "hub closed the stream".to_string(),
            }
        }
    }

    async fn transition(&self, key: TopicKey, generation: u64, event: ConnectionEvent) {
        let mut registry = self.registry.lock().await;
        if let Some(entry) = registry
            .connections
            .get_mut(&key)
            .filter(|entry| entry.generation == generation)
        {
            match entry.state.apply(event) {
                Ok(next) => entry.state = next,
                Err(err) => warn!(%key, error = %err, "ignored connection event"),
            }
        }
    }

    async fn dispatch(&self, key: TopicKey, frame: SseFrame) {
        if let Some(id) = frame.id {
            self.registry.lock().await.last_event_ids.insert(key, id);
        }
        if frame.event != "message" {
            debug!(%key, event = %frame.event, "ignoring non-message event");
            return;
        }

        let payload = match serde_json::from_str::<MessagePayload>(&frame.data) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%key, error = %err, "dropping malformed hub event");
                return;
            }
        };

        let message_id = payload.id;
        let notification =
            matches!(key, TopicKey::UserMessages(_)).then(|| Notification::for_message(&payload));
        let is_new = self.store.add_message(payload).await;
        debug!(%key, message_id, is_new, "hub event received");

        if let Some(notification) = notification {
            self.maybe_notify(notification).await;
        }
    }

    async fn maybe_notify(&self, notification: Notification) {
        if !self.notifier.is_backgrounded() || !self.notifier.permission_granted() {
            return;
        }
        if self.notified.lock().await.insert(notification.message_id) {
            self.notifier.notify(notification);
        }
    }

    async fn handle_failure(self: Arc<Self>, key: TopicKey, generation: u64, reason: &str) {
        let mut registry = self.registry.lock().await;
        let Some(entry) = registry
            .connections
            .remove(&key)
            .filter(|entry| entry.generation == generation)
        else {
            return;
        };
        if let Err(err) = entry.state.apply(ConnectionEvent::Failed) {
            warn!(%key, error = %err, "unexpected failure transition");
        }

        warn!(
            %key,
            reason,
            delay_secs = self.reconnect_delay.as_secs(),
            "subscription failed; reconnect scheduled"
        );
        let cancel = self.shutdown.child_token();
        registry.reconnects.insert(
            key,
            PendingReconnect {
                generation,
                cancel: cancel.clone(),
            },
        );
        drop(registry);

        let inner = Arc::clone(&self);
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(inner.reconnect_delay) => inner.retry(key, generation).await,
            }
        });
    }

    async fn retry(self: Arc<Self>, key: TopicKey, generation: u64) {
        let mut registry = self.registry.lock().await;
        if registry
            .reconnects
            .get(&key)
            .is_none_or(|pending| pending.generation != generation)
        {
            return;
        }
        registry.reconnects.remove(&key);

        match ConnectionState::Reconnecting.apply(ConnectionEvent::RetryElapsed) {
            Ok(state) => {
                debug!(%key, "reconnecting");
                self.open(&mut registry, key, state);
            }
            Err(err) => warn!(%key, error = %err, "reconnect skipped"),
        }
    }
}
