//! Client against a real server bound to a local port with the embedded hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use client::{
    ApiClient, ClientError, ConnectionState, ConversationStore, ManagerConfig, ReqwestTransport,
    SilentNotifier, SubscriptionManager,
};
use server::{
    app_state::AppState,
    server::{create_app_router, metrics_handle},
    store::InMemoryMessageStore,
};
use shared::config::server::{Config, StorageBackend};
use shared::models::{Principal, Role};
use shared::topics::TopicKey;
use tokio::net::TcpListener;

fn user(id: i64, name: &str, role: Role) -> Principal {
    Principal {
        id,
        display_name: name.into(),
        roles: vec![role],
    }
}

async fn spawn_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = Config::default();
    config.storage.backend = StorageBackend::Memory;
    config.hub.public_url = format!("http://{addr}/.well-known/mercure");
    config.hub.heartbeat_seconds = 1;

    let store = Arc::new(InMemoryMessageStore::with_users([
        user(1, "Ana", Role::Client),
        user(2, "Bruno", Role::Owner),
        user(3, "Carla", Role::Client),
    ]));
    let state = AppState::new(Arc::new(config), store).unwrap();
    let app = create_app_router(Arc::new(state), metrics_handle());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn subscriber_receives_messages_sent_over_rest() {
    let addr = spawn_server().await;
    let base = format!("http://{addr}");
    let ana = ApiClient::new(&base, 1).unwrap();
    let bruno = Arc::new(ApiClient::new(&base, 2).unwrap());

    let conversation = ana.create_conversation(1, 2).await.unwrap();

    let store = Arc::new(ConversationStore::new());
    let manager = SubscriptionManager::new(
        Arc::new(ReqwestTransport::new(bruno.http().clone())),
        bruno.clone(),
        store.clone(),
        Arc::new(SilentNotifier),
        ManagerConfig::default(),
    );
    manager.subscribe_to_user_messages(2).await;
    manager.subscribe_to_conversation(conversation.id).await;

    let user_key = TopicKey::UserMessages(2);
    let conversation_key = TopicKey::Conversation(conversation.id);
    wait_until(|| async {
        manager.connection_state(user_key).await == Some(ConnectionState::Open)
            && manager.connection_state(conversation_key).await == Some(ConnectionState::Open)
    })
    .await;

    let sent = ana
        .send_message(conversation.id, "Is the cabin free in June?")
        .await
        .unwrap();

    wait_until(|| async { !store.messages(conversation.id).await.is_empty() }).await;
    // Delivered on both topics, kept once.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let messages = store.messages(conversation.id).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, sent.id);
    assert_eq!(messages[0].sender.display_name, "Ana");
    assert!(store.has_unread(conversation.id).await);

    let detail = bruno.open_conversation(conversation.id).await.unwrap();
    assert!(detail.messages.iter().all(|message| message.is_read));

    manager.unsubscribe_all().await;
    assert!(manager.active_keys().await.is_empty());
}

#[tokio::test]
async fn api_errors_surface_problem_codes() {
    let addr = spawn_server().await;
    let base = format!("http://{addr}");
    let ana = ApiClient::new(&base, 1).unwrap();
    let carla = ApiClient::new(&base, 3).unwrap();

    let conversation = ana.create_conversation(1, 2).await.unwrap();
    let again = ana.create_conversation(1, 2).await.unwrap();
    assert_eq!(conversation.id, again.id);

    let err = carla.open_conversation(conversation.id).await.unwrap_err();
    assert_eq!(err.status(), Some(403));

    let err = ana.send_message(conversation.id, "   ").await.unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 400, ref code, .. } if code == "validation_failed"));

    let listed = ana.list_conversations(Some(Role::Client)).await.unwrap();
    assert_eq!(listed.len(), 1);

    let credentials = ana.hub_credentials().await.unwrap();
    assert_eq!(credentials.hub_url, format!("http://{addr}/.well-known/mercure"));
    assert_eq!(credentials.token.split('.').count(), 3);
}

#[tokio::test]
async fn conversation_started_after_token_fetch_still_opens() {
    let addr = spawn_server().await;
    let base = format!("http://{addr}");
    let ana = ApiClient::new(&base, 1).unwrap();
    let bruno = Arc::new(ApiClient::new(&base, 2).unwrap());

    let store = Arc::new(ConversationStore::new());
    let manager = SubscriptionManager::new(
        Arc::new(ReqwestTransport::new(bruno.http().clone())),
        bruno.clone(),
        store.clone(),
        Arc::new(SilentNotifier),
        ManagerConfig {
            reconnect_delay: Duration::from_millis(100),
        },
    );
    let user_key = TopicKey::UserMessages(2);
    manager.subscribe(user_key).await;
    wait_until(|| async { manager.connection_state(user_key).await == Some(ConnectionState::Open) })
        .await;

    // The cached token predates this conversation, so the hub refuses it
    // until a fresh one is fetched.
    let conversation = ana.create_conversation(1, 2).await.unwrap();
    let conversation_key = TopicKey::Conversation(conversation.id);
    manager.subscribe(conversation_key).await;
    wait_until(|| async {
        manager.connection_state(conversation_key).await == Some(ConnectionState::Open)
    })
    .await;

    let sent = ana.send_message(conversation.id, "Hola").await.unwrap();
    wait_until(|| async { !store.messages(conversation.id).await.is_empty() }).await;
    assert_eq!(store.messages(conversation.id).await[0].id, sent.id);

    manager.unsubscribe_all().await;
}
