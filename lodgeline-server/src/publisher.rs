//! Fan-out of stored messages to the hub.
//!
//! Every message is published to its conversation topic and to the personal
//! topic of the recipient. Each publish is attempted independently and never
//! fails the caller: the message is already stored.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use shared::config::server::HubConfig;
use shared::models::{
    Conversation, ConversationPayload, Message, MessagePayload, ParticipantSummary, UserId,
    preview,
};
use shared::topics::{conversation_topic, recipient_of, user_topic};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::hub::TopicHub;
use crate::store::{MessageStore, StoreError, summary_or_placeholder};
use crate::tokens::{TokenError, TokenIssuer};

/// Why an update did not reach the hub.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The HTTP request to the remote hub failed.
    #[error("hub request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The hub answered with a non-success status.
    #[error("hub rejected update with status {0}")]
    Rejected(u16),
    #[error("publisher token unavailable: {0}")]
    Token(#[from] TokenError),
}

/// Delivers one update to one topic.
#[async_trait]
pub trait HubPublisher: Send + Sync {
    /// Sends `data` as a single update on `topic`.
    async fn publish(&self, topic: &str, data: &str) -> Result<(), PublishError>;
}

/// Publishes through a remote hub's HTTP publish endpoint.
#[derive(Debug, Clone)]
pub struct HttpHubPublisher {
    client: Client,
    url: String,
    tokens: Arc<TokenIssuer>,
    private: bool,
}

impl HttpHubPublisher {
    /// Targets the configured publish URL, signing each request with a
    /// fresh publisher token.
    pub fn new(config: &HubConfig, tokens: Arc<TokenIssuer>) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.publish_timeout_seconds.max(1)))
            .build()?;
        Ok(Self {
            client,
            url: config.effective_publish_url().to_string(),
            tokens,
            private: config.private_updates,
        })
    }
}

#[async_trait]
impl HubPublisher for HttpHubPublisher {
    async fn publish(&self, topic: &str, data: &str) -> Result<(), PublishError> {
        let token = self.tokens.issue_publisher_token()?;
        let mut form = vec![("topic", topic), ("data", data)];
        if self.private {
            form.push(("private", "on"));
        }

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(token.token)
            .form(&form)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(PublishError::Rejected(response.status().as_u16()))
        }
    }
}

/// Publishes straight into the in-process hub.
#[derive(Debug, Clone)]
pub struct EmbeddedHubPublisher {
    hub: Arc<TopicHub>,
}

impl EmbeddedHubPublisher {
    #[must_use]
    pub fn new(hub: Arc<TopicHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl HubPublisher for EmbeddedHubPublisher {
    async fn publish(&self, topic: &str, data: &str) -> Result<(), PublishError> {
        self.hub
            .publish(vec![topic.to_string()], data.to_string())
            .await;
        Ok(())
    }
}

/// Which of the two fan-out targets a topic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    /// `conversation/{id}`
    Conversation,
    /// `user/{id}/messages` of the participant who did not send.
    Recipient,
}

impl TopicKind {
    fn label(self) -> &'static str {
        match self {
            TopicKind::Conversation => "conversation",
            TopicKind::Recipient => "recipient",
        }
    }
}

/// Result of publishing to one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicOutcome {
    /// Concrete topic name, e.g. `conversation/5`.
    pub topic: String,
    pub kind: TopicKind,
    /// `None` when delivered.
    pub error: Option<String>,
}

impl TopicOutcome {
    #[must_use]
    pub fn delivered(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-topic result of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// The payload that was published, when it could be built.
    pub payload: Option<MessagePayload>,
    /// One entry per attempted topic, conversation topic first.
    pub outcomes: Vec<TopicOutcome>,
}

impl PublishReport {
    /// Whether at least one topic was attempted and every attempt succeeded.
    #[must_use]
    pub fn all_delivered(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(TopicOutcome::delivered)
    }

    /// Attempted topic names in order.
    #[must_use]
    pub fn topics(&self) -> Vec<&str> {
        self.outcomes.iter().map(|o| o.topic.as_str()).collect()
    }
}

/// Turns stored messages into hub updates.
pub struct EventPublisher {
    hub: Arc<dyn HubPublisher>,
    store: Arc<dyn MessageStore>,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher").finish_non_exhaustive()
    }
}

impl EventPublisher {
    /// Publishes through `hub`, reading participants and conversations
    /// from `store`.
    #[must_use]
    pub fn new(hub: Arc<dyn HubPublisher>, store: Arc<dyn MessageStore>) -> Self {
        Self { hub, store }
    }

    /// Serialized view of `message` with its conversation and participants.
    ///
    /// Fails only when the store does; unknown participants get placeholder
    /// summaries.
    pub async fn build_payload(
        &self,
        message: &Message,
    ) -> Result<(MessagePayload, Conversation), StoreError> {
        let conversation = self.store.get_conversation(message.conversation_id).await?;
        let client = self.summary(conversation.client_id).await?;
        let owner = self.summary(conversation.owner_id).await?;
        let sender = if message.sender_id == conversation.client_id {
            client.clone()
        } else {
            owner.clone()
        };

        let payload = MessagePayload {
            id: message.id,
            content: message.content.clone(),
            created_at: message.created_at,
            is_read: message.is_read,
            sender,
            conversation: ConversationPayload {
                id: conversation.id,
                client: client.clone(),
                owner: owner.clone(),
                created_at: conversation.created_at,
                updated_at: conversation.updated_at,
                last_message_preview: conversation.last_message_preview.clone(),
                has_new_messages: conversation.has_new_messages,
            },
            client,
            owner,
        };
        Ok((payload, conversation))
    }

    async fn summary(&self, user_id: UserId) -> Result<ParticipantSummary, StoreError> {
        let principal = self.store.find_principal(user_id).await?;
        Ok(summary_or_placeholder(principal, user_id))
    }

    /// Payload built from the stored message alone, with bare participant
    /// summaries. Used when the full payload cannot be loaded.
    #[must_use]
    pub fn detached_payload(message: &Message) -> MessagePayload {
        let client = summary_or_placeholder(None, message.client_id);
        let owner = summary_or_placeholder(None, message.owner_id);
        let sender = if message.sender_id == message.client_id {
            client.clone()
        } else {
            owner.clone()
        };
        MessagePayload {
            id: message.id,
            content: message.content.clone(),
            created_at: message.created_at,
            is_read: message.is_read,
            sender,
            conversation: ConversationPayload {
                id: message.conversation_id,
                client: client.clone(),
                owner: owner.clone(),
                created_at: message.created_at,
                updated_at: message.created_at,
                last_message_preview: Some(preview(&message.content)),
                has_new_messages: true,
            },
            client,
            owner,
        }
    }

    /// Builds the payload for `message` and fans it out.
    ///
    /// A payload that cannot be built is logged and yields an empty report
    /// without a payload.
    #[instrument(name = "publisher.publish_message_event", skip_all, fields(message_id = message.id))]
    pub async fn publish_message_event(&self, message: &Message) -> PublishReport {
        match self.build_payload(message).await {
            Ok((payload, conversation)) => {
                let mut report = self.publish_payload(message, &conversation, &payload).await;
                report.payload = Some(payload);
                report
            }
            Err(err) => {
                error!(error = %err, "failed to build message payload; nothing published");
                PublishReport::default()
            }
        }
    }

    /// Publishes an already built payload to the conversation topic and the
    /// recipient's personal topic.
    pub async fn publish_payload(
        &self,
        message: &Message,
        conversation: &Conversation,
        payload: &MessagePayload,
    ) -> PublishReport {
        let data = match serde_json::to_string(payload) {
            Ok(data) => data,
            Err(err) => {
                error!(error = %err, "failed to serialize message payload");
                return PublishReport::default();
            }
        };

        let mut targets = vec![(conversation_topic(conversation.id), TopicKind::Conversation)];
        match recipient_of(message, conversation) {
            Some(recipient) => targets.push((user_topic(recipient), TopicKind::Recipient)),
            None => warn!(
                sender_id = message.sender_id,
                conversation_id = conversation.id,
                "sender is not a participant; skipping recipient topic"
            ),
        }

        let mut report = PublishReport::default();
        for (topic, kind) in targets {
            let outcome = match self.hub.publish(&topic, &data).await {
                Ok(()) => {
                    info!(topic = %topic, kind = kind.label(), "message event published");
                    None
                }
                Err(err) => {
                    warn!(topic = %topic, kind = kind.label(), error = %err, "message event publish failed");
                    Some(err.to_string())
                }
            };
            metrics::counter!(
                "lodgeline_hub_publish_total",
                "topic_kind" => kind.label(),
                "outcome" => if outcome.is_none() { "delivered" } else { "failed" }
            )
            .increment(1);
            report.outcomes.push(TopicOutcome {
                topic,
                kind,
                error: outcome,
            });
        }
        report
    }
}
