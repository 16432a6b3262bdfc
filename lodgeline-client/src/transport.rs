use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt, stream};
use reqwest::{Client, StatusCode, header};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::sse::{SseDecoder, SseFrame};

/// Why a subscription could not be opened or kept open.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("hub rejected the subscription token")]
    Unauthorized,
    /// The token is valid but does not grant the topic, e.g. a conversation
    /// created after the token was issued.
    #[error("subscription token does not grant the topic")]
    Forbidden,
    #[error("hub refused the subscription with status {0}")]
    Status(u16),
    #[error("invalid hub url: {0}")]
    InvalidUrl(String),
    #[error("hub connection failed: {0}")]
    Connect(String),
    #[error("hub stream interrupted: {0}")]
    Stream(String),
}

/// Frames of one open subscription, in hub order. The stream ends when the
/// hub closes the connection.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SseFrame, TransportError>> + Send>>;

/// Opens streaming subscriptions against a hub.
#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Subscribes to `topic`, resuming after `last_event_id` when given.
    async fn connect(
        &self,
        hub_url: &str,
        topic: &str,
        token: &str,
        last_event_id: Option<&str>,
    ) -> Result<EventStream, TransportError>;
}

/// Subscribes over HTTP with `reqwest`, passing the token as the
/// `authorization` query parameter.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Subscribes with `client`, typically shared with the [`crate::ApiClient`].
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

pub(crate) fn subscribe_url(hub_url: &str, topic: &str, token: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(hub_url).map_err(|err| TransportError::InvalidUrl(err.to_string()))?;
    url.query_pairs_mut()
        .append_pair("topic", topic)
        .append_pair("authorization", token);
    Ok(url)
}

impl TransportError {
    /// Whether the hub refused the current token, so fresh credentials are
    /// needed before the next attempt.
    #[must_use]
    pub fn rejects_credentials(&self) -> bool {
        matches!(self, TransportError::Unauthorized | TransportError::Forbidden)
    }
}

#[async_trait]
impl HubTransport for ReqwestTransport {
    async fn connect(
        &self,
        hub_url: &str,
        topic: &str,
        token: &str,
        last_event_id: Option<&str>,
    ) -> Result<EventStream, TransportError> {
        let url = subscribe_url(hub_url, topic, token)?;
        let mut request = self
            .client
            .get(url)
            .header(header::ACCEPT, "text/event-stream");
        if let Some(id) = last_event_id {
            request = request.header("Last-Event-ID", id);
        }

        let response = request
            .send()
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED => return Err(TransportError::Unauthorized),
            StatusCode::FORBIDDEN => return Err(TransportError::Forbidden),
            status => return Err(TransportError::Status(status.as_u16())),
        }
        debug!(topic, "hub subscription established");

        let chunks = Box::pin(response.bytes_stream());
        let frames = stream::unfold(
            (chunks, SseDecoder::new(), VecDeque::new()),
            |(mut chunks, mut decoder, mut ready)| async move {
                loop {
                    if let Some(frame) = ready.pop_front() {
                        return Some((Ok(frame), (chunks, decoder, ready)));
                    }
                    match chunks.next().await {
                        Some(Ok(bytes)) => ready.extend(decoder.feed(&bytes)),
                        Some(Err(err)) => {
                            return Some((
                                Err(TransportError::Stream(err.to_string())),
                                (chunks, decoder, ready),
                            ));
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(Box::pin(frames))
    }
}
