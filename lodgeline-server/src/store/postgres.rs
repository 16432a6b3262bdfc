use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{
    Conversation, ConversationDetail, ConversationId, Message, MessageId, Principal, Role,
    Timestamp, UserId, preview,
};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::instrument;

use super::{
    MessageStore, StoreError, StoreResult, listing_role, require_participant, require_role,
    summary_or_placeholder, validate_content, validate_pair,
};

const CONVERSATION_COLUMNS: &str =
    "id, client_id, owner_id, created_at, updated_at, last_message_preview, has_new_messages";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, client_id, owner_id, content, created_at, is_read";

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: i64,
    client_id: i64,
    owner_id: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_message_preview: Option<String>,
    has_new_messages: bool,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: row.id,
            client_id: row.client_id,
            owner_id: row.owner_id,
            created_at: Timestamp(row.created_at),
            updated_at: Timestamp(row.updated_at),
            last_message_preview: row.last_message_preview,
            has_new_messages: row.has_new_messages,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: i64,
    conversation_id: i64,
    sender_id: i64,
    client_id: i64,
    owner_id: i64,
    content: String,
    created_at: DateTime<Utc>,
    is_read: bool,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            client_id: row.client_id,
            owner_id: row.owner_id,
            content: row.content,
            created_at: Timestamp(row.created_at),
            is_read: row.is_read,
        }
    }
}

#[derive(Debug, FromRow)]
struct PrincipalRow {
    id: i64,
    display_name: String,
    roles: Vec<String>,
}

impl From<PrincipalRow> for Principal {
    fn from(row: PrincipalRow) -> Self {
        Self {
            id: row.id,
            display_name: row.display_name,
            roles: row
                .roles
                .iter()
                .filter_map(|role| Role::try_from(role.as_str()).ok())
                .collect(),
        }
    }
}

/// Postgres-backed store.
///
/// Schema and indexes come from the bootstrap scripts; the unique index on
/// `(client_id, owner_id)` is what keeps concurrent creates from producing
/// two conversations for one pair.
#[derive(Clone, Debug)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_conversation(
        tx: &mut Transaction<'_, Postgres>,
        conversation_id: ConversationId,
    ) -> StoreResult<Conversation> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(conversation_id)
            .fetch_optional(&mut **tx)
            .await?
            .map(Conversation::from)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id} not found")))
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    #[instrument(name = "store.find_principal", skip(self), err)]
    async fn find_principal(&self, user_id: UserId) -> StoreResult<Option<Principal>> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            "SELECT id, display_name, roles FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Principal::from))
    }

    #[instrument(name = "store.create_conversation", skip(self), err)]
    async fn create_conversation(
        &self,
        client_id: UserId,
        owner_id: UserId,
    ) -> StoreResult<Conversation> {
        validate_pair(client_id, owner_id)?;
        require_role(self.find_principal(client_id).await?, client_id, Role::Client)?;
        require_role(self.find_principal(owner_id).await?, owner_id, Role::Owner)?;

        let insert = format!(
            "INSERT INTO conversations (client_id, owner_id) VALUES ($1, $2) \
             ON CONFLICT (client_id, owner_id) DO NOTHING RETURNING {CONVERSATION_COLUMNS}"
        );
        if let Some(row) = sqlx::query_as::<_, ConversationRow>(&insert)
            .bind(client_id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(row.into());
        }

        let select = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE client_id = $1 AND owner_id = $2"
        );
        let row = sqlx::query_as::<_, ConversationRow>(&select)
            .bind(client_id)
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    #[instrument(name = "store.get_conversation", skip(self), err)]
    async fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> StoreResult<Conversation> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1");
        sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Conversation::from)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id} not found")))
    }

    #[instrument(name = "store.get_conversation_detail", skip(self), err)]
    async fn get_conversation_detail(
        &self,
        conversation_id: ConversationId,
    ) -> StoreResult<ConversationDetail> {
        let conversation = self.get_conversation(conversation_id).await?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 ORDER BY created_at, id"
        );
        let messages = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(conversation_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Message::from)
            .collect();
        let client = summary_or_placeholder(
            self.find_principal(conversation.client_id).await?,
            conversation.client_id,
        );
        let owner = summary_or_placeholder(
            self.find_principal(conversation.owner_id).await?,
            conversation.owner_id,
        );

        Ok(ConversationDetail {
            conversation,
            client,
            owner,
            messages,
        })
    }

    #[instrument(name = "store.find_message", skip(self), err)]
    async fn find_message(&self, message_id: MessageId) -> StoreResult<Message> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        sqlx::query_as::<_, MessageRow>(&sql)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Message::from)
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id} not found")))
    }

    #[instrument(name = "store.append_message", skip(self, content), err)]
    async fn append_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: &str,
    ) -> StoreResult<Message> {
        validate_content(content)?;
        let mut tx = self.pool.begin().await?;
        let conversation = Self::lock_conversation(&mut tx, conversation_id).await?;
        require_participant(&conversation, sender_id, "post to")?;

        let insert = format!(
            "INSERT INTO messages (conversation_id, sender_id, client_id, owner_id, content) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {MESSAGE_COLUMNS}"
        );
        let message: Message = sqlx::query_as::<_, MessageRow>(&insert)
            .bind(conversation_id)
            .bind(sender_id)
            .bind(conversation.client_id)
            .bind(conversation.owner_id)
            .bind(content)
            .fetch_one(&mut *tx)
            .await?
            .into();

        sqlx::query(
            "UPDATE conversations SET updated_at = $2, last_message_preview = $3, \
             has_new_messages = TRUE WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(message.created_at.0)
        .bind(preview(content))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(message)
    }

    #[instrument(name = "store.mark_conversation_read", skip(self), err)]
    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
        reader_id: UserId,
    ) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let conversation = Self::lock_conversation(&mut tx, conversation_id).await?;
        require_participant(&conversation, reader_id, "read")?;

        let changed = sqlx::query(
            "UPDATE messages SET is_read = TRUE \
             WHERE conversation_id = $1 AND sender_id <> $2 AND is_read = FALSE",
        )
        .bind(conversation_id)
        .bind(reader_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if changed > 0 {
            sqlx::query("UPDATE conversations SET has_new_messages = FALSE WHERE id = $1")
                .bind(conversation_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(changed)
    }

    #[instrument(name = "store.list_conversations_for_user", skip(self), err)]
    async fn list_conversations_for_user(
        &self,
        user_id: UserId,
        role: Role,
    ) -> StoreResult<Vec<Conversation>> {
        let column = match listing_role(role)? {
            Role::Owner => "owner_id",
            _ => "client_id",
        };
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE {column} = $1 \
             ORDER BY updated_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Conversation::from).collect())
    }

    #[instrument(name = "store.conversation_ids_for_participant", skip(self), err)]
    async fn conversation_ids_for_participant(
        &self,
        user_id: UserId,
    ) -> StoreResult<Vec<ConversationId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM conversations WHERE client_id = $1 OR owner_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
