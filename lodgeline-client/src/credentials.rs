use std::sync::Arc;

use async_trait::async_trait;
use shared::models::HubCredentials;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::error::ClientError;

/// Source of the hub URL and subscription token.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn hub_credentials(&self) -> Result<HubCredentials, ClientError>;
}

/// Fetches credentials at most once until they are invalidated.
///
/// Concurrent callers share a single in-flight fetch.
pub(crate) struct CredentialsCache {
    provider: Arc<dyn CredentialsProvider>,
    cell: Mutex<Arc<OnceCell<HubCredentials>>>,
}

impl std::fmt::Debug for CredentialsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsCache").finish_non_exhaustive()
    }
}

impl CredentialsCache {
    pub(crate) fn new(provider: Arc<dyn CredentialsProvider>) -> Self {
        Self {
            provider,
            cell: Mutex::new(Arc::new(OnceCell::new())),
        }
    }

    pub(crate) async fn get(&self) -> Result<HubCredentials, ClientError> {
        let cell = Arc::clone(&*self.cell.lock().await);
        cell.get_or_try_init(|| async {
            debug!("fetching hub credentials");
            self.provider.hub_credentials().await
        })
        .await
        .cloned()
    }

    /// Drops the cached credentials if they still carry `stale_token`.
    pub(crate) async fn invalidate(&self, stale_token: &str) {
        let mut cell = self.cell.lock().await;
        if cell
            .get()
            .is_some_and(|credentials| credentials.token == stale_token)
        {
            debug!("hub credentials invalidated");
            *cell = Arc::new(OnceCell::new());
        }
    }
}
