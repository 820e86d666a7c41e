use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use landcost_core::domain::session::{QuoteDraft, SessionId};

use super::{format_timestamp, RepositoryError, SessionRepository};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn encode(draft: &QuoteDraft) -> Result<String, RepositoryError> {
    serde_json::to_string(draft).map_err(|e| RepositoryError::Decode(format!("encode draft: {e}")))
}

#[async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn load(&self, session_id: &SessionId) -> Result<Option<QuoteDraft>, RepositoryError> {
        let row = sqlx::query("SELECT version, draft_json FROM quote_sessions WHERE session_id = ?")
            .bind(&session_id.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let version: i64 = row.try_get("version")?;
        let draft_json: String = row.try_get("draft_json")?;
        let mut draft: QuoteDraft = serde_json::from_str(&draft_json).map_err(|e| {
            RepositoryError::Decode(format!("invalid draft for session `{}`: {e}", session_id.0))
        })?;
        // The column is authoritative; the JSON copy is written before the bump.
        draft.version = version;
        Ok(Some(draft))
    }

    async fn insert(&self, mut draft: QuoteDraft) -> Result<QuoteDraft, RepositoryError> {
        draft.version = 1;
        draft.updated_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO quote_sessions
                (session_id, version, stage, turn_count, draft_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO NOTHING
            "#,
        )
        .bind(&draft.session_id.0)
        .bind(draft.version)
        .bind(draft.stage.as_str())
        .bind(i64::from(draft.turn_count))
        .bind(encode(&draft)?)
        .bind(format_timestamp(draft.created_at))
        .bind(format_timestamp(draft.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::VersionConflict {
                session_id: draft.session_id.0.clone(),
                expected_version: 0,
            });
        }
        Ok(draft)
    }

    async fn save_if_version(&self, mut draft: QuoteDraft) -> Result<QuoteDraft, RepositoryError> {
        let expected_version = draft.version;
        draft.version = expected_version + 1;
        draft.updated_at = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE quote_sessions
            SET version = ?, stage = ?, turn_count = ?, draft_json = ?, updated_at = ?
            WHERE session_id = ? AND version = ?
            "#,
        )
        .bind(draft.version)
        .bind(draft.stage.as_str())
        .bind(i64::from(draft.turn_count))
        .bind(encode(&draft)?)
        .bind(format_timestamp(draft.updated_at))
        .bind(&draft.session_id.0)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::VersionConflict {
                session_id: draft.session_id.0.clone(),
                expected_version,
            });
        }
        Ok(draft)
    }
}
