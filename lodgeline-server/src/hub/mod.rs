//! Embedded single-node hub speaking the Mercure subscribe/publish wire shape.
//!
//! One broadcast channel carries every update; each subscription filters it by
//! its topic selectors. A bounded history ring backs `Last-Event-ID` replay.

mod handlers;

pub use handlers::{AUTHORIZATION_COOKIE, HubState, hub_router};

use std::collections::VecDeque;
use std::sync::Arc;

use shared::config::server::HubConfig;
use shared::topics::any_selector_matches;
use tokio::sync::{Mutex, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

/// Path the hub is mounted at, per the Mercure discovery convention.
pub const HUB_PATH: &str = "/.well-known/mercure";

/// `Last-Event-ID` value asking for the whole retained history.
pub const EARLIEST: &str = "earliest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubEvent {
    /// `urn:uuid:{v4}`.
    pub id: String,
    pub topics: Vec<String>,
    pub data: String,
}

impl HubEvent {
    /// Whether any of the event's topics is covered by `selectors`.
    #[must_use]
    pub fn matches(&self, selectors: &[String]) -> bool {
        self.topics
            .iter()
            .any(|topic| any_selector_matches(selectors, topic))
    }
}

#[derive(Debug)]
pub struct TopicHub {
    sender: broadcast::Sender<Arc<HubEvent>>,
    history: Mutex<VecDeque<Arc<HubEvent>>>,
    history_limit: usize,
}

impl TopicHub {
    #[must_use]
    pub fn new(channel_capacity: usize, history_limit: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            sender,
            history: Mutex::new(VecDeque::with_capacity(history_limit)),
            history_limit,
        }
    }

    #[must_use]
    pub fn from_config(config: &HubConfig) -> Self {
        Self::new(config.channel_capacity, config.history_limit)
    }

    /// Records and fans out an update, returning its id.
    pub async fn publish(&self, topics: Vec<String>, data: String) -> String {
        let event = Arc::new(HubEvent {
            id: format!("urn:uuid:{}", Uuid::new_v4()),
            topics,
            data,
        });

        let mut history = self.history.lock().await;
        if self.history_limit > 0 {
            history.push_back(Arc::clone(&event));
            while history.len() > self.history_limit {
                history.pop_front();
            }
        }
        let receivers = self.sender.send(Arc::clone(&event)).unwrap_or(0);
        debug!(event_id = %event.id, topics = ?event.topics, receivers, "hub update published");

        event.id.clone()
    }

    /// Opens a subscription for `selectors`.
    ///
    /// With a `last_event_id`, retained updates published after that id are
    /// replayed first; [`EARLIEST`] replays everything retained. An id that is
    /// no longer retained marks the subscription's cursor as stale and
    /// replays nothing.
    pub async fn subscribe(
        &self,
        selectors: Vec<String>,
        last_event_id: Option<&str>,
    ) -> Subscription {
        let history = self.history.lock().await;
        let receiver = self.sender.subscribe();

        let (backlog, stale_cursor) = match last_event_id {
            None => (Vec::new(), false),
            Some(EARLIEST) => (matching(history.iter(), &selectors), false),
            Some(last_id) => match history.iter().position(|event| event.id == last_id) {
                Some(index) => (matching(history.iter().skip(index + 1), &selectors), false),
                None => {
                    warn!(last_event_id = last_id, "last event id no longer retained");
                    (Vec::new(), true)
                }
            },
        };

        Subscription {
            backlog,
            receiver,
            selectors,
            stale_cursor,
        }
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn matching<'a>(
    events: impl Iterator<Item = &'a Arc<HubEvent>>,
    selectors: &[String],
) -> Vec<Arc<HubEvent>> {
    events
        .filter(|event| event.matches(selectors))
        .cloned()
        .collect()
}

/// One subscriber's view of the hub: a replay backlog plus the live feed.
#[derive(Debug)]
pub struct Subscription {
    backlog: Vec<Arc<HubEvent>>,
    receiver: broadcast::Receiver<Arc<HubEvent>>,
    selectors: Vec<String>,
    stale_cursor: bool,
}

impl Subscription {
    /// Whether the requested resume id had already been evicted, so updates
    /// in between were lost.
    #[must_use]
    pub fn stale_cursor(&self) -> bool {
        self.stale_cursor
    }

    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Replayed updates followed by live ones. The subscriber gauge counts
    /// the stream until it is dropped.
    pub fn into_stream(self) -> impl Stream<Item = Arc<HubEvent>> + Send + 'static {
        let Subscription {
            backlog,
            receiver,
            selectors,
            ..
        } = self;
        let guard = SubscriberGauge::register();

        let live = BroadcastStream::new(receiver).filter_map(move |item| match item {
            Ok(event) if event.matches(&selectors) => Some(event),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "hub subscriber lagged behind; updates dropped");
                None
            }
        });

        tokio_stream::iter(backlog).chain(live).map(move |event| {
            let _registered = &guard;
            event
        })
    }
}

#[derive(Debug)]
struct SubscriberGauge;

impl SubscriberGauge {
    fn register() -> Self {
        metrics::gauge!("lodgeline_hub_subscribers").increment(1.0);
        Self
    }
}

impl Drop for SubscriberGauge {
    fn drop(&mut self) {
        metrics::gauge!("lodgeline_hub_subscribers").decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn selectors(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    async fn next(stream: &mut (impl Stream<Item = Arc<HubEvent>> + Unpin)) -> Arc<HubEvent> {
        timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn live_updates_are_filtered_by_selector() {
        let hub = TopicHub::new(16, 16);
        let mut stream = Box::pin(
            hub.subscribe(selectors(&["conversation/5"]), None)
                .await
                .into_stream(),
        );

        hub.publish(selectors(&["conversation/6"]), "other".into()).await;
        let id = hub.publish(selectors(&["conversation/5"]), "mine".into()).await;

        let event = next(&mut stream).await;
        assert_eq!(event.id, id);
        assert_eq!(event.data, "mine");
        assert!(event.id.starts_with("urn:uuid:"));
    }

    #[tokio::test]
    async fn wildcard_selector_receives_every_conversation() {
        let hub = TopicHub::new(16, 16);
        let mut stream = Box::pin(
            hub.subscribe(selectors(&["conversation/*"]), None)
                .await
                .into_stream(),
        );

        hub.publish(selectors(&["user/2/messages"]), "personal".into()).await;
        hub.publish(selectors(&["conversation/1"]), "a".into()).await;
        hub.publish(selectors(&["conversation/2"]), "b".into()).await;

        assert_eq!(next(&mut stream).await.data, "a");
        assert_eq!(next(&mut stream).await.data, "b");
    }

    #[tokio::test]
    async fn replays_history_after_last_event_id() {
        let hub = TopicHub::new(16, 16);
        let first = hub.publish(selectors(&["conversation/5"]), "one".into()).await;
        hub.publish(selectors(&["conversation/9"]), "skip".into()).await;
        hub.publish(selectors(&["conversation/5"]), "two".into()).await;

        let subscription = hub
            .subscribe(selectors(&["conversation/5"]), Some(&first))
            .await;
        assert!(!subscription.stale_cursor());
        assert_eq!(subscription.backlog_len(), 1);

        let mut stream = Box::pin(subscription.into_stream());
        assert_eq!(next(&mut stream).await.data, "two");

        hub.publish(selectors(&["conversation/5"]), "three".into()).await;
        assert_eq!(next(&mut stream).await.data, "three");
    }

    #[tokio::test]
    async fn earliest_and_unknown_cursors() {
        let hub = TopicHub::new(16, 2);
        let evicted = hub.publish(selectors(&["t/1"]), "1".into()).await;
        hub.publish(selectors(&["t/1"]), "2".into()).await;
        hub.publish(selectors(&["t/1"]), "3".into()).await;

        let all = hub.subscribe(selectors(&["t/1"]), Some(EARLIEST)).await;
        assert_eq!(all.backlog_len(), 2);

        let stale = hub.subscribe(selectors(&["t/1"]), Some(&evicted)).await;
        assert!(stale.stale_cursor());
        assert_eq!(stale.backlog_len(), 0);

        let fresh = hub.subscribe(selectors(&["t/1"]), None).await;
        assert_eq!(fresh.backlog_len(), 0);
    }

    #[tokio::test]
    async fn dropping_stream_releases_receiver() {
        let hub = TopicHub::new(4, 4);
        let stream = hub.subscribe(selectors(&["*"]), None).await.into_stream();
        assert_eq!(hub.subscriber_count(), 1);

        drop(stream);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
