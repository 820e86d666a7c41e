use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use landcost_core::domain::session::{QuoteDraft, SessionId};
use landcost_core::errors::ApplicationError;

pub mod memory;
pub mod session;
pub mod tariff_index;

pub use memory::{InMemorySessionRepository, InMemoryTariffIndex};
pub use session::SqlSessionRepository;
pub use tariff_index::SqlTariffIndex;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("session `{session_id}` changed since version {expected_version}")]
    VersionConflict { session_id: String, expected_version: i64 },
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::VersionConflict { session_id, expected_version } => {
                ApplicationError::VersionConflict { session_id, expected_version }
            }
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

/// Versioned store of quote drafts. Writes are compare-and-swap on `QuoteDraft::version`.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn load(&self, session_id: &SessionId) -> Result<Option<QuoteDraft>, RepositoryError>;

    /// Stores a new draft at version 1. Fails with `VersionConflict` if the session exists.
    async fn insert(&self, draft: QuoteDraft) -> Result<QuoteDraft, RepositoryError>;

    /// Stores `draft` only if the persisted version still equals `draft.version`; the stored
    /// copy is returned with the version incremented.
    async fn save_if_version(&self, draft: QuoteDraft) -> Result<QuoteDraft, RepositoryError>;
}

pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid timestamp in `{column}`: {e}")))
}
