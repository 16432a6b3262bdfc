//! Streams hub events for one user until Ctrl+C.

use std::sync::Arc;

use anyhow::{Context, Result};
use client::{
    ConversationStore, ManagerConfig, Notification, Notifier, ReqwestTransport,
    SubscriptionManager,
};
use shared::models::ConversationId;
use tracing::info;

use super::api::ClientArgs;

/// Prints notifications as they arrive. A terminal has no foreground
/// window to compete with, so it always counts as backgrounded.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn is_backgrounded(&self) -> bool {
        true
    }

    fn permission_granted(&self) -> bool {
        true
    }

    fn notify(&self, notification: Notification) {
        println!(
            "[{}] {}: {}",
            notification.route, notification.title, notification.body
        );
    }
}

pub async fn follow(args: &ClientArgs, conversations: &[ConversationId]) -> Result<()> {
    super::init_tracing();
    let api = Arc::new(args.api()?);
    let store = Arc::new(ConversationStore::new());
    let manager = SubscriptionManager::new(
        Arc::new(ReqwestTransport::new(api.http().clone())),
        api.clone(),
        store.clone(),
        Arc::new(ConsoleNotifier),
        ManagerConfig::default(),
    );

    manager.subscribe_to_user_messages(args.user).await;
    for conversation_id in conversations {
        manager.subscribe_to_conversation(*conversation_id).await;
    }
    info!(user_id = args.user, conversations = conversations.len(), "following");
    eprintln!("Following user {} (Ctrl+C to stop)", args.user);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    manager.unsubscribe_all().await;

    for conversation_id in conversations {
        let messages = store.messages(*conversation_id).await;
        eprintln!(
            "conversation {conversation_id}: {} message(s) received",
            messages.len()
        );
    }
    Ok(())
}
