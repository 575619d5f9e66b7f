use application::MessageStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChatMessage, ContentType, MessageContent, MessageId, MessageTarget, NewChatMessage,
    RepositoryError, RoomId, ThreadId, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => RepositoryError::Conflict,
        other => RepositoryError::storage(other.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    message_id: String,
    room_id: Option<String>,
    thread_id: Option<String>,
    sender_id: String,
    content_type: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for ChatMessage {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let room_id = value
            .room_id
            .map(RoomId::parse)
            .transpose()
            .map_err(|err| invalid_data(err.to_string()))?;
        let thread_id = value
            .thread_id
            .map(ThreadId::parse)
            .transpose()
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(ChatMessage {
            id: MessageId::parse(value.message_id).map_err(|err| invalid_data(err.to_string()))?,
            target: MessageTarget::from_parts(room_id, thread_id)
                .map_err(|err| invalid_data(err.to_string()))?,
            sender_id: UserId::parse(value.sender_id)
                .map_err(|err| invalid_data(err.to_string()))?,
            content: MessageContent::new(value.content)
                .map_err(|err| invalid_data(err.to_string()))?,
            content_type: value
                .content_type
                .parse::<ContentType>()
                .map_err(|err| invalid_data(err.to_string()))?,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ThreadRecord {
    user1_id: String,
    user2_id: String,
}

/// PostgreSQL 消息存储，id 由服务端生成，创建时间取数据库时钟。
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const MESSAGE_COLUMNS: &str =
    "message_id, room_id, thread_id, sender_id, content_type, content, created_at";

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn persist(&self, message: NewChatMessage) -> Result<ChatMessage, RepositoryError> {
        let id = MessageId::generate();
        let created_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO messages (message_id, room_id, thread_id, sender_id, content_type, content)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING created_at
            "#,
        )
        .bind(id.as_str())
        .bind(message.target.room_id().map(RoomId::as_str))
        .bind(message.target.thread_id().map(ThreadId::as_str))
        .bind(message.sender_id.as_str())
        .bind(message.content_type.as_str())
        .bind(message.content.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(message.into_persisted(id, created_at))
    }

    async fn list_room_members(&self, room_id: &RoomId) -> Result<Vec<UserId>, RepositoryError> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"SELECT user_id FROM room_members WHERE room_id = $1 ORDER BY joined_at"#,
        )
        .bind(room_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.into_iter()
            .map(|user_id| UserId::parse(user_id).map_err(|err| invalid_data(err.to_string())))
            .collect()
    }

    async fn list_thread_participants(
        &self,
        thread_id: &ThreadId,
    ) -> Result<[UserId; 2], RepositoryError> {
        let record = sqlx::query_as::<_, ThreadRecord>(
            r#"SELECT user1_id, user2_id FROM direct_message_threads WHERE thread_id = $1"#,
        )
        .bind(thread_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        let first = UserId::parse(record.user1_id).map_err(|err| invalid_data(err.to_string()))?;
        let second = UserId::parse(record.user2_id).map_err(|err| invalid_data(err.to_string()))?;
        Ok([first, second])
    }

    async fn list_room_messages(
        &self,
        room_id: &RoomId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE room_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        );
        let records = sqlx::query_as::<_, MessageRecord>(&query)
            .bind(room_id.as_str())
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        records.into_iter().map(ChatMessage::try_from).collect()
    }

    async fn list_thread_messages(
        &self,
        thread_id: &ThreadId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE thread_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        );
        let records = sqlx::query_as::<_, MessageRecord>(&query)
            .bind(thread_id.as_str())
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        records.into_iter().map(ChatMessage::try_from).collect()
    }
}
