//! Client side of Lodgeline messaging.
//!
//! [`ApiClient`] talks to the REST API; [`SubscriptionManager`] keeps one
//! reconnecting hub subscription per conversation or personal topic and feeds
//! a [`ConversationStore`].

pub mod api;
pub mod credentials;
pub mod error;
pub mod manager;
pub mod notifier;
pub mod sse;
pub mod state;
pub mod store;
pub mod transport;

pub use api::ApiClient;
pub use credentials::CredentialsProvider;
pub use error::ClientError;
pub use manager::{DEFAULT_RECONNECT_DELAY, ManagerConfig, SubscriptionManager};
pub use notifier::{Notification, Notifier, SilentNotifier};
pub use state::{ConnectionEvent, ConnectionState};
pub use store::ConversationStore;
pub use transport::{HubTransport, ReqwestTransport, TransportError};
