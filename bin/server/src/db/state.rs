//! Durable conversation state.

use super::store_error;
use async_trait::async_trait;
use skillgate_conversation::{ConversationKey, ConversationState, StateStorage, StoreError};
use sqlx::PgPool;
use sqlx::types::Json;

/// Conversation state in PostgreSQL, one JSONB document per conversation.
#[derive(Clone)]
pub struct PgStateStorage {
    pool: PgPool,
}

impl PgStateStorage {
    /// Creates a new storage.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStorage for PgStateStorage {
    async fn read(&self, key: &ConversationKey) -> Result<Option<ConversationState>, StoreError> {
        let row: Option<(Json<ConversationState>,)> = sqlx::query_as(
            r#"
            SELECT state
            FROM conversation_state
            WHERE conversation_key = $1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error(key.as_str(), e))?;

        Ok(row.map(|(state,)| state.0))
    }

    async fn write(
        &self,
        key: &ConversationKey,
        state: &ConversationState,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO conversation_state (conversation_key, state, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (conversation_key)
            DO UPDATE SET state = EXCLUDED.state, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(key.as_str())
        .bind(Json(state))
        .execute(&self.pool)
        .await
        .map_err(|e| store_error(key.as_str(), e))?;

        Ok(())
    }

    async fn delete(&self, key: &ConversationKey) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM conversation_state
            WHERE conversation_key = $1
            "#,
        )
        .bind(key.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| store_error(key.as_str(), e))?;

        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }
}
