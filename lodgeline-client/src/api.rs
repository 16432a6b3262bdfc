use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::models::{
    Conversation, ConversationDetail, ConversationId, CreateConversationRequest, HubCredentials,
    MessageId, MessagePayload, Role, SendMessageRequest, UserId,
};
use tracing::{debug, instrument};
use url::Url;

use crate::credentials::CredentialsProvider;
use crate::error::ClientError;

/// Header the server reads the acting user from unless configured otherwise.
pub const DEFAULT_PRINCIPAL_HEADER: &str = "x-authenticated-user";

/// REST client acting on behalf of one user.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base: Url,
    principal_header: String,
    user_id: UserId,
}

impl ApiClient {
    /// Builds a client for the server at `base_url`.
    ///
    /// # Errors
    /// Returns [`ClientError::Url`] when `base_url` does not parse.
    pub fn new(base_url: &str, user_id: UserId) -> Result<Self, ClientError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            base,
            principal_header: DEFAULT_PRINCIPAL_HEADER.to_string(),
            user_id,
        })
    }

    #[must_use]
    pub fn with_principal_header(mut self, header: impl Into<String>) -> Self {
        self.principal_header = header.into();
        self
    }

    #[must_use]
    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Underlying HTTP client, shared with the hub transport.
    #[must_use]
    pub fn http(&self) -> &Client {
        &self.http
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base.join(path)?)
    }

    fn authenticated(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(self.principal_header.as_str(), self.user_id.to_string())
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(ClientError::from_problem(status.as_u16(), &body));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    /// Finds or creates the conversation between a client and an owner.
    #[instrument(skip(self), fields(user_id = self.user_id))]
    pub async fn create_conversation(
        &self,
        client_id: UserId,
        owner_id: UserId,
    ) -> Result<Conversation, ClientError> {
        let request = self
            .http
            .post(self.endpoint("api/conversations")?)
            .json(&CreateConversationRequest {
                client_id,
                owner_id,
            });
        Self::decode(self.authenticated(request).send().await?).await
    }

    /// Sends `content` as the acting user. The server publishes it to the
    /// hub before answering.
    #[instrument(skip(self, content), fields(user_id = self.user_id))]
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<MessagePayload, ClientError> {
        let request = self
            .http
            .post(self.endpoint(&format!("api/conversations/{conversation_id}/messages"))?)
            .json(&SendMessageRequest {
                content: content.to_string(),
            });
        let payload: MessagePayload = Self::decode(self.authenticated(request).send().await?).await?;
        debug!(message_id = payload.id, "message sent");
        Ok(payload)
    }

    /// Opens a conversation, which marks the counterpart's messages read.
    #[instrument(skip(self), fields(user_id = self.user_id))]
    pub async fn open_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ConversationDetail, ClientError> {
        let request = self
            .http
            .get(self.endpoint(&format!("api/conversations/{conversation_id}"))?);
        Self::decode(self.authenticated(request).send().await?).await
    }

    /// Conversations of the user, most recently updated first. `None` lets
    /// the server pick the user's participant role.
    #[instrument(skip(self), fields(user_id = self.user_id))]
    pub async fn list_conversations(&self, role: Option<Role>) -> Result<Vec<Conversation>, ClientError> {
        let mut request = self.http.get(self.endpoint("api/conversations")?);
        if let Some(role) = role {
            request = request.query(&[("role", role.as_str())]);
        }
        Self::decode(self.authenticated(request).send().await?).await
    }

    /// Payload of one message the acting user can see.
    pub async fn get_message(&self, message_id: MessageId) -> Result<MessagePayload, ClientError> {
        let request = self
            .http
            .get(self.endpoint(&format!("api/messages/{message_id}"))?);
        Self::decode(self.authenticated(request).send().await?).await
    }

    /// Subscription token and hub URL for the user.
    pub async fn hub_credentials(&self) -> Result<HubCredentials, ClientError> {
        let request = self.http.get(self.endpoint("api/mercure-token")?);
        Self::decode(self.authenticated(request).send().await?).await
    }
}

#[async_trait]
impl CredentialsProvider for ApiClient {
    async fn hub_credentials(&self) -> Result<HubCredentials, ClientError> {
        ApiClient::hub_credentials(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_resolve_below_base_path() {
        let api = ApiClient::new("http://localhost:8080/lodgeline", 1).unwrap();
        assert_eq!(
            api.endpoint("api/conversations/3").unwrap().as_str(),
            "http://localhost:8080/lodgeline/api/conversations/3"
        );

        let api = ApiClient::new("http://localhost:8080", 1).unwrap();
        assert_eq!(
            api.endpoint("api/mercure-token").unwrap().as_str(),
            "http://localhost:8080/api/mercure-token"
        );
    }

    #[test]
    fn rejects_unparseable_base() {
        assert!(matches!(ApiClient::new("::", 1), Err(ClientError::Url(_))));
    }
}
