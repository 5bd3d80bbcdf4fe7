//! Durable skill conversation id mappings.

use super::store_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skillgate_conversation::{
    ConversationKey, SkillConversationRecord, SkillConversationReference, SkillConversationStore,
    StoreError,
};
use skillgate_core::SkillConversationId;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

/// Row type for skill conversation queries.
#[derive(FromRow)]
struct SkillConversationRow {
    id: String,
    natural_key: String,
    reference: Json<SkillConversationReference>,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl SkillConversationRow {
    fn try_into_record(self) -> Result<SkillConversationRecord, StoreError> {
        let id = SkillConversationId::from_str(&self.id).map_err(|e| StoreError::Corrupt {
            key: self.id.clone(),
            reason: e.to_string(),
        })?;
        let reference = self.reference.0;

        Ok(SkillConversationRecord {
            id,
            natural_key: self.natural_key,
            conversation_key: reference.conversation_reference.key(),
            reference,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

/// Skill conversation store in PostgreSQL.
///
/// The unique index on `natural_key` makes concurrent upserts for the same
/// conversation and skill converge on one id across every host instance.
#[derive(Clone)]
pub struct PgSkillConversationStore {
    pool: PgPool,
}

impl PgSkillConversationStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SkillConversationStore for PgSkillConversationStore {
    async fn upsert(
        &self,
        candidate: SkillConversationRecord,
    ) -> Result<SkillConversationRecord, StoreError> {
        // An expired row is replaced by the candidate; a live one keeps its id.
        let row: SkillConversationRow = sqlx::query_as(
            r#"
            INSERT INTO skill_conversations
                (id, natural_key, conversation_key, reference, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (natural_key) DO UPDATE SET
                id = CASE WHEN skill_conversations.expires_at <= $5
                          THEN EXCLUDED.id ELSE skill_conversations.id END,
                created_at = CASE WHEN skill_conversations.expires_at <= $5
                          THEN EXCLUDED.created_at ELSE skill_conversations.created_at END,
                expires_at = CASE WHEN skill_conversations.expires_at <= $5
                          THEN EXCLUDED.expires_at ELSE skill_conversations.expires_at END,
                conversation_key = EXCLUDED.conversation_key,
                reference = EXCLUDED.reference
            RETURNING id, natural_key, reference, created_at, expires_at
            "#,
        )
        .bind(candidate.id.to_string())
        .bind(&candidate.natural_key)
        .bind(candidate.conversation_key.as_str())
        .bind(Json(&candidate.reference))
        .bind(candidate.created_at)
        .bind(candidate.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error(&candidate.natural_key, e))?;

        row.try_into_record()
    }

    async fn get(
        &self,
        id: SkillConversationId,
    ) -> Result<Option<SkillConversationRecord>, StoreError> {
        let key = id.to_string();
        let row: Option<SkillConversationRow> = sqlx::query_as(
            r#"
            SELECT id, natural_key, reference, created_at, expires_at
            FROM skill_conversations
            WHERE id = $1
            "#,
        )
        .bind(&key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error(&key, e))?;

        row.map(SkillConversationRow::try_into_record).transpose()
    }

    async fn delete(&self, id: SkillConversationId) -> Result<(), StoreError> {
        let key = id.to_string();
        sqlx::query(
            r#"
            DELETE FROM skill_conversations
            WHERE id = $1
            "#,
        )
        .bind(&key)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error(&key, e))?;

        Ok(())
    }

    async fn delete_for_conversation(
        &self,
        conversation_key: &ConversationKey,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM skill_conversations
            WHERE conversation_key = $1
            "#,
        )
        .bind(conversation_key.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| store_error(conversation_key.as_str(), e))?;

        Ok(result.rows_affected())
    }

    fn is_durable(&self) -> bool {
        true
    }
}
