//! PostgreSQL implementation of the persistence layer.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use super::{CasClaim, ChatStore};
use crate::config::GatewayConfig;
use crate::domain::{
    ChatSession, GuestProfile, Identity, Message, MessageId, MessageType, NotificationEvent,
    NotificationId, Role, SessionId, SessionStatus,
};
use crate::error::GatewayError;

type SessionRow = (
    Uuid,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

type MessageRow = (
    Uuid,
    Uuid,
    i64,
    String,
    String,
    String,
    String,
    DateTime<Utc>,
);

const SESSION_COLUMNS: &str =
    "id, status, guest, guest_name, guest_email, claimed_by, created_at, last_activity_at";

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects using the database settings in `config` and applies the
    /// bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PersistenceError`] if the database is
    /// unreachable or a migration fails.
    pub async fn connect(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;

        sqlx::migrate!()
            .run(&pool)
            .await
            .map_err(|e| GatewayError::PersistenceError(e.to_string()))?;

        tracing::info!("database migrations applied");
        Ok(Self::new(pool))
    }

    async fn fetch_session(&self, id: SessionId) -> Result<Option<ChatSession>, GatewayError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(session_from_row).transpose()
    }
}

fn db_error(e: sqlx::Error) -> GatewayError {
    GatewayError::PersistenceError(e.to_string())
}

fn session_from_row(row: SessionRow) -> Result<ChatSession, GatewayError> {
    let (id, status, guest, guest_name, guest_email, claimed_by, created_at, last_activity_at) =
        row;
    Ok(ChatSession {
        id: SessionId::from_uuid(id),
        status: status
            .parse::<SessionStatus>()
            .map_err(GatewayError::PersistenceError)?,
        guest: Identity::new(guest),
        guest_profile: GuestProfile {
            name: guest_name,
            email: guest_email,
        },
        claimed_by: claimed_by.map(Identity::new),
        created_at,
        last_activity_at,
    })
}

fn message_from_row(row: MessageRow) -> Result<Message, GatewayError> {
    let (id, session_id, sequence, sender, sender_role, content, message_type, created_at) = row;
    let message_type = match message_type.as_str() {
        "text" => MessageType::Text,
        "system" => MessageType::System,
        other => {
            return Err(GatewayError::PersistenceError(format!(
                "unknown message type: {other}"
            )));
        }
    };
    Ok(Message {
        id: MessageId::from_uuid(id),
        session_id: SessionId::from_uuid(session_id),
        sequence: u64::try_from(sequence)
            .map_err(|_| GatewayError::PersistenceError("negative sequence".to_string()))?,
        sender: Identity::new(sender),
        sender_role: sender_role
            .parse::<Role>()
            .map_err(GatewayError::PersistenceError)?,
        content,
        message_type,
        created_at,
    })
}

fn to_db_sequence(sequence: u64) -> Result<i64, GatewayError> {
    i64::try_from(sequence)
        .map_err(|_| GatewayError::PersistenceError("sequence out of range".to_string()))
}

#[async_trait]
impl ChatStore for PostgresStore {
    async fn create_session(
        &self,
        guest: &Identity,
        profile: &GuestProfile,
    ) -> Result<ChatSession, GatewayError> {
        let session = ChatSession::new(guest.clone(), profile.clone());
        sqlx::query(
            "INSERT INTO chat_sessions (id, status, guest, guest_name, guest_email, claimed_by, created_at, last_activity_at) \
             VALUES ($1, $2, $3, $4, $5, NULL, $6, $7)",
        )
        .bind(Uuid::from(session.id))
        .bind(session.status.as_str())
        .bind(session.guest.as_str())
        .bind(session.guest_profile.name.as_deref())
        .bind(session.guest_profile.email.as_deref())
        .bind(session.created_at)
        .bind(session.last_activity_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(session)
    }

    async fn load_session(&self, id: SessionId) -> Result<Option<ChatSession>, GatewayError> {
        self.fetch_session(id).await
    }

    async fn cas_claim(&self, id: SessionId, admin: &Identity) -> Result<CasClaim, GatewayError> {
        let won = sqlx::query_as::<_, SessionRow>(&format!(
            "UPDATE chat_sessions SET status = 'assigned', claimed_by = $2, last_activity_at = now() \
             WHERE id = $1 AND claimed_by IS NULL AND status = 'unassigned' \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(Uuid::from(id))
        .bind(admin.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        if let Some(row) = won {
            return session_from_row(row).map(CasClaim::Won);
        }

        self.fetch_session(id)
            .await?
            .map(CasClaim::Lost)
            .ok_or(GatewayError::SessionNotFound(id))
    }

    async fn close_session(&self, id: SessionId) -> Result<ChatSession, GatewayError> {
        sqlx::query(
            "UPDATE chat_sessions SET status = 'closed', last_activity_at = now() \
             WHERE id = $1 AND status <> 'closed'",
        )
        .bind(Uuid::from(id))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        self.fetch_session(id)
            .await?
            .ok_or(GatewayError::SessionNotFound(id))
    }

    async fn last_sequence(&self, id: SessionId) -> Result<u64, GatewayError> {
        let max = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(sequence) FROM chat_messages WHERE session_id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(max.and_then(|v| u64::try_from(v).ok()).unwrap_or(0))
    }

    async fn persist_message(&self, message: &Message) -> Result<(), GatewayError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query(
            "INSERT INTO chat_messages (id, session_id, sequence, sender, sender_role, content, message_type, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.session_id))
        .bind(to_db_sequence(message.sequence)?)
        .bind(message.sender.as_str())
        .bind(message.sender_role.as_str())
        .bind(&message.content)
        .bind(message.message_type.as_str())
        .bind(message.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        sqlx::query("UPDATE chat_sessions SET last_activity_at = $2 WHERE id = $1")
            .bind(Uuid::from(message.session_id))
            .bind(message.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)
    }

    async fn messages_after(
        &self,
        id: SessionId,
        after: u64,
        limit: u32,
    ) -> Result<Vec<Message>, GatewayError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, session_id, sequence, sender, sender_role, content, message_type, created_at \
             FROM chat_messages WHERE session_id = $1 AND sequence > $2 \
             ORDER BY sequence ASC LIMIT $3",
        )
        .bind(Uuid::from(id))
        .bind(to_db_sequence(after)?)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn list_unassigned(&self) -> Result<Vec<ChatSession>, GatewayError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions \
             WHERE status = 'unassigned' ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(session_from_row).collect()
    }

    async fn persist_notification(&self, event: &NotificationEvent) -> Result<(), GatewayError> {
        sqlx::query(
            "INSERT INTO notifications (id, user_id, kind, payload, created_at, read_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::from(event.id))
        .bind(event.user.as_str())
        .bind(&event.kind)
        .bind(&event.payload)
        .bind(event.created_at)
        .bind(event.read_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn unread_count(&self, user: &Identity) -> Result<u64, GatewayError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND read_at IS NULL",
        )
        .bind(user.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn mark_read(&self, user: &Identity, id: NotificationId) -> Result<bool, GatewayError> {
        let result = sqlx::query(
            "UPDATE notifications SET read_at = now() \
             WHERE id = $1 AND user_id = $2 AND read_at IS NULL",
        )
        .bind(Uuid::from(id))
        .bind(user.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }
}
