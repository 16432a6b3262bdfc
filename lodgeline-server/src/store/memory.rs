use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shared::models::{
    Conversation, ConversationDetail, ConversationId, Message, MessageId, Principal, Role,
    Timestamp, UserId, preview,
};
use tokio::sync::RwLock;

use super::{
    MessageStore, StoreError, StoreResult, listing_role, require_participant, require_role,
    summary_or_placeholder, validate_content, validate_pair,
};

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<UserId, Principal>,
    conversations: BTreeMap<ConversationId, Conversation>,
    messages: BTreeMap<MessageId, Message>,
    next_conversation_id: ConversationId,
    next_message_id: MessageId,
    last_tick: Option<DateTime<Utc>>,
}

impl MemoryState {
    /// Wall-clock time, nudged forward so two writes never share an instant.
    fn tick(&mut self) -> Timestamp {
        let mut now = Utc::now();
        if let Some(last) = self.last_tick
            && now <= last
        {
            now = last + Duration::microseconds(1);
        }
        self.last_tick = Some(now);
        Timestamp(now)
    }

    fn conversation(&self, conversation_id: ConversationId) -> StoreResult<&Conversation> {
        self.conversations
            .get(&conversation_id)
            .ok_or_else(|| not_found(conversation_id))
    }
}

fn not_found(conversation_id: ConversationId) -> StoreError {
    StoreError::NotFound(format!("conversation {conversation_id} not found"))
}

/// Process-local store guarded by a single `RwLock`.
///
/// Every mutation runs under the write lock, so the find-or-create of a
/// conversation and the append-then-update of a message are atomic.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    state: RwLock<MemoryState>,
}

impl InMemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `users`.
    #[must_use]
    pub fn with_users(users: impl IntoIterator<Item = Principal>) -> Self {
        let state = MemoryState {
            users: users.into_iter().map(|user| (user.id, user)).collect(),
            ..MemoryState::default()
        };
        Self {
            state: RwLock::new(state),
        }
    }

    pub async fn insert_user(&self, principal: Principal) {
        self.state
            .write()
            .await
            .users
            .insert(principal.id, principal);
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn find_principal(&self, user_id: UserId) -> StoreResult<Option<Principal>> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn create_conversation(
        &self,
        client_id: UserId,
        owner_id: UserId,
    ) -> StoreResult<Conversation> {
        validate_pair(client_id, owner_id)?;
        let mut state = self.state.write().await;
        require_role(state.users.get(&client_id).cloned(), client_id, Role::Client)?;
        require_role(state.users.get(&owner_id).cloned(), owner_id, Role::Owner)?;

        if let Some(existing) = state
            .conversations
            .values()
            .find(|c| c.client_id == client_id && c.owner_id == owner_id)
        {
            return Ok(existing.clone());
        }

        state.next_conversation_id += 1;
        let now = state.tick();
        let conversation = Conversation {
            id: state.next_conversation_id,
            client_id,
            owner_id,
            created_at: now,
            updated_at: now,
            last_message_preview: None,
            has_new_messages: false,
        };
        state
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> StoreResult<Conversation> {
        self.state
            .read()
            .await
            .conversation(conversation_id)
            .cloned()
    }

    async fn get_conversation_detail(
        &self,
        conversation_id: ConversationId,
    ) -> StoreResult<ConversationDetail> {
        let state = self.state.read().await;
        let conversation = state.conversation(conversation_id)?.clone();
        let messages = state
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        let client = summary_or_placeholder(
            state.users.get(&conversation.client_id).cloned(),
            conversation.client_id,
        );
        let owner = summary_or_placeholder(
            state.users.get(&conversation.owner_id).cloned(),
            conversation.owner_id,
        );

        Ok(ConversationDetail {
            conversation,
            client,
            owner,
            messages,
        })
    }

    async fn find_message(&self, message_id: MessageId) -> StoreResult<Message> {
        self.state
            .read()
            .await
            .messages
            .get(&message_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id} not found")))
    }

    async fn append_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: &str,
    ) -> StoreResult<Message> {
        validate_content(content)?;
        let mut state = self.state.write().await;
        let conversation = state.conversation(conversation_id)?.clone();
        require_participant(&conversation, sender_id, "post to")?;

        state.next_message_id += 1;
        let now = state.tick();
        let message = Message {
            id: state.next_message_id,
            conversation_id,
            sender_id,
            client_id: conversation.client_id,
            owner_id: conversation.owner_id,
            content: content.to_string(),
            created_at: now,
            is_read: false,
        };
        state.messages.insert(message.id, message.clone());

        if let Some(stored) = state.conversations.get_mut(&conversation_id) {
            stored.updated_at = now;
            stored.last_message_preview = Some(preview(content));
            stored.has_new_messages = true;
        }
        Ok(message)
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
        reader_id: UserId,
    ) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let conversation = state.conversation(conversation_id)?.clone();
        require_participant(&conversation, reader_id, "read")?;

        let mut changed = 0_u64;
        for message in state.messages.values_mut().filter(|m| {
            m.conversation_id == conversation_id && m.sender_id != reader_id && !m.is_read
        }) {
            message.is_read = true;
            changed += 1;
        }

        if changed > 0
            && let Some(stored) = state.conversations.get_mut(&conversation_id)
        {
            stored.has_new_messages = false;
        }
        Ok(changed)
    }

    async fn list_conversations_for_user(
        &self,
        user_id: UserId,
        role: Role,
    ) -> StoreResult<Vec<Conversation>> {
        let role = listing_role(role)?;
        let state = self.state.read().await;
        let mut conversations: Vec<Conversation> = state
            .conversations
            .values()
            .filter(|c| match role {
                Role::Owner => c.owner_id == user_id,
                _ => c.client_id == user_id,
            })
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(conversations)
    }

    async fn conversation_ids_for_participant(
        &self,
        user_id: UserId,
    ) -> StoreResult<Vec<ConversationId>> {
        Ok(self
            .state
            .read()
            .await
            .conversations
            .values()
            .filter(|c| c.is_participant(user_id))
            .map(|c| c.id)
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn user(id: UserId, name: &str, roles: Vec<Role>) -> Principal {
        Principal {
            id,
            display_name: name.into(),
            roles,
        }
    }

    fn store() -> InMemoryMessageStore {
        InMemoryMessageStore::with_users([
            user(1, "Ana", vec![Role::Client]),
            user(2, "Bruno", vec![Role::Owner]),
            user(3, "Carla", vec![Role::Owner]),
            user(9, "Root", vec![Role::Admin]),
        ])
    }

    #[tokio::test]
    async fn create_conversation_is_idempotent_per_pair() {
        let store = store();

        let first = store.create_conversation(1, 2).await.unwrap();
        let second = store.create_conversation(1, 2).await.unwrap();
        let other = store.create_conversation(1, 3).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_ne!(first.id, other.id);
        assert!(!first.has_new_messages);
        assert!(first.last_message_preview.is_none());
    }

    #[tokio::test]
    async fn concurrent_creates_yield_one_conversation() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.create_conversation(1, 2).await.unwrap().id })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.conversation_ids_for_participant(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_conversation_checks_roles() {
        let store = store();

        assert!(matches!(
            store.create_conversation(2, 3).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.create_conversation(1, 42).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.create_conversation(1, 1).await,
            Err(StoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn append_updates_conversation_summary() {
        let store = store();
        let conversation = store.create_conversation(1, 2).await.unwrap();
        let long = "x".repeat(80);

        let message = store
            .append_message(conversation.id, 1, &long)
            .await
            .unwrap();
        let updated = store.get_conversation(conversation.id).await.unwrap();

        assert!(!message.is_read);
        assert_eq!(store.find_message(message.id).await.unwrap(), message);
        assert_eq!(message.client_id, 1);
        assert_eq!(message.owner_id, 2);
        assert!(updated.has_new_messages);
        assert_eq!(updated.updated_at, message.created_at);
        let preview = updated.last_message_preview.unwrap();
        assert_eq!(preview.chars().count(), 51);
        assert!(preview.ends_with('…'));
    }

    #[tokio::test]
    async fn append_rejects_blank_outsiders_and_unknown() {
        let store = store();
        let conversation = store.create_conversation(1, 2).await.unwrap();

        assert!(matches!(
            store.append_message(conversation.id, 1, "   ").await,
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.append_message(conversation.id, 3, "hi").await,
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            store.append_message(404, 1, "hi").await,
            Err(StoreError::NotFound(_))
        ));

        let detail = store.get_conversation_detail(conversation.id).await.unwrap();
        assert!(detail.messages.is_empty());
        assert!(!detail.conversation.has_new_messages);
    }

    #[tokio::test]
    async fn mark_read_only_touches_counterpart_messages() {
        let store = store();
        let conversation = store.create_conversation(1, 2).await.unwrap();
        store.append_message(conversation.id, 1, "one").await.unwrap();
        store.append_message(conversation.id, 1, "two").await.unwrap();
        store.append_message(conversation.id, 2, "reply").await.unwrap();

        assert_eq!(store.mark_conversation_read(conversation.id, 2).await.unwrap(), 2);
        let after = store.get_conversation_detail(conversation.id).await.unwrap();
        assert!(!after.conversation.has_new_messages);
        let unread: Vec<_> = after.messages.iter().filter(|m| !m.is_read).collect();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].sender_id, 2);

        assert_eq!(store.mark_conversation_read(conversation.id, 2).await.unwrap(), 0);
        assert!(matches!(
            store.mark_conversation_read(conversation.id, 3).await,
            Err(StoreError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn mark_read_with_nothing_unread_keeps_flag() {
        let store = store();
        let conversation = store.create_conversation(1, 2).await.unwrap();
        store.append_message(conversation.id, 1, "hello").await.unwrap();

        assert_eq!(store.mark_conversation_read(conversation.id, 1).await.unwrap(), 0);
        assert!(store.get_conversation(conversation.id).await.unwrap().has_new_messages);
    }

    #[tokio::test]
    async fn list_orders_by_recent_activity() {
        let store = store();
        let with_bruno = store.create_conversation(1, 2).await.unwrap();
        let with_carla = store.create_conversation(1, 3).await.unwrap();
        store.append_message(with_bruno.id, 1, "ping").await.unwrap();

        let listed = store.list_conversations_for_user(1, Role::Client).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![with_bruno.id, with_carla.id]);

        let owned = store.list_conversations_for_user(3, Role::Owner).await.unwrap();
        assert_eq!(owned.len(), 1);
        assert!(store.list_conversations_for_user(2, Role::Client).await.unwrap().is_empty());
        assert!(store.list_conversations_for_user(9, Role::Admin).await.is_err());
    }

    #[tokio::test]
    async fn detail_includes_participants_and_ordered_messages() {
        let store = store();
        let conversation = store.create_conversation(1, 2).await.unwrap();
        store.append_message(conversation.id, 1, "first").await.unwrap();
        store.append_message(conversation.id, 2, "second").await.unwrap();

        let detail = store.get_conversation_detail(conversation.id).await.unwrap();
        assert_eq!(detail.client.display_name, "Ana");
        assert_eq!(detail.owner.display_name, "Bruno");
        let contents: Vec<_> = detail.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
        assert!(detail.messages[0].created_at < detail.messages[1].created_at);
    }
}
