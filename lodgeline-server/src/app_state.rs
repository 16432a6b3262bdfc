use std::sync::Arc;

use shared::config::server::{Config, HubMode};

use crate::{
    hub::TopicHub,
    publisher::{EmbeddedHubPublisher, EventPublisher, HttpHubPublisher, HubPublisher, PublishError},
    store::MessageStore,
    tokens::TokenIssuer,
};

/// Shared handles every route works with.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn MessageStore>,
    pub tokens: Arc<TokenIssuer>,
    pub publisher: Arc<EventPublisher>,
    /// Present when the hub runs in-process.
    pub hub: Option<Arc<TopicHub>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("hub_mode", &self.config.hub.mode)
            .field("embedded_hub", &self.hub.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wires the token issuer and the publisher for the configured hub mode.
    ///
    /// # Errors
    /// Fails when the HTTP client for a remote hub cannot be built.
    pub fn new(config: Arc<Config>, store: Arc<dyn MessageStore>) -> Result<Self, PublishError> {
        let tokens = Arc::new(TokenIssuer::from_config(&config.hub));
        let (hub, hub_publisher): (Option<Arc<TopicHub>>, Arc<dyn HubPublisher>) =
            match config.hub.mode {
                HubMode::Embedded => {
                    let hub = Arc::new(TopicHub::from_config(&config.hub));
                    let publisher = Arc::new(EmbeddedHubPublisher::new(Arc::clone(&hub)));
                    (Some(hub), publisher)
                }
                HubMode::Remote => (
                    None,
                    Arc::new(HttpHubPublisher::new(&config.hub, Arc::clone(&tokens))?),
                ),
            };
        let publisher = Arc::new(EventPublisher::new(hub_publisher, Arc::clone(&store)));

        Ok(Self {
            config,
            store,
            tokens,
            publisher,
            hub,
        })
    }
}
