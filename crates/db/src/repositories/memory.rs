use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use landcost_core::domain::session::{QuoteDraft, SessionId};
use landcost_core::domain::tariff::TariffCode;
use landcost_core::errors::ApplicationError;
use landcost_core::tariff::{IndexSearchOptions, TariffIndex, TariffIndexEntry};
use landcost_core::text;

use super::tariff_index::MIN_QUERY_TOKEN_LEN;
use super::{RepositoryError, SessionRepository};

/// Tariff index with the same matching rules as the SQLite one: every query token must
/// prefix a token of the label or breadcrumb.
#[derive(Default)]
pub struct InMemoryTariffIndex {
    entries: RwLock<HashMap<String, TariffIndexEntry>>,
}

impl InMemoryTariffIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl TariffIndex for InMemoryTariffIndex {
    async fn upsert(&self, entries: &[TariffIndexEntry]) -> Result<(), ApplicationError> {
        let now = Utc::now();
        let mut stored = self.entries.write().await;
        for entry in entries {
            let mut entry = entry.clone();
            entry.updated_at = now;
            stored.insert(entry.code.as_str().to_string(), entry);
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        options: &IndexSearchOptions,
    ) -> Result<Vec<TariffIndexEntry>, ApplicationError> {
        let query_tokens = text::tokens(query, MIN_QUERY_TOKEN_LEN);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }
        let stored = self.entries.read().await;
        let mut hits: Vec<TariffIndexEntry> = stored
            .values()
            .filter(|entry| {
                options.heading_filter.as_deref().map_or(true, |heading| entry.code.heading() == heading)
            })
            .filter(|entry| {
                let entry_tokens = text::tokens(&entry.searchable_text(), 1);
                query_tokens
                    .iter()
                    .all(|query_token| entry_tokens.iter().any(|token| token.starts_with(query_token.as_str())))
            })
            .cloned()
            .collect();
        hits.sort_by(|left, right| {
            right.updated_at.cmp(&left.updated_at).then_with(|| left.code.as_str().cmp(right.code.as_str()))
        });
        hits.truncate(options.limit.max(1));
        Ok(hits)
    }

    async fn get(&self, code: &TariffCode) -> Result<Option<TariffIndexEntry>, ApplicationError> {
        Ok(self.entries.read().await.get(code.as_str()).cloned())
    }
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    drafts: RwLock<HashMap<String, QuoteDraft>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn load(&self, session_id: &SessionId) -> Result<Option<QuoteDraft>, RepositoryError> {
        Ok(self.drafts.read().await.get(&session_id.0).cloned())
    }

    async fn insert(&self, mut draft: QuoteDraft) -> Result<QuoteDraft, RepositoryError> {
        let mut drafts = self.drafts.write().await;
        if drafts.contains_key(&draft.session_id.0) {
            return Err(RepositoryError::VersionConflict {
                session_id: draft.session_id.0.clone(),
                expected_version: 0,
            });
        }
        draft.version = 1;
        draft.updated_at = Utc::now();
        drafts.insert(draft.session_id.0.clone(), draft.clone());
        Ok(draft)
    }

    async fn save_if_version(&self, mut draft: QuoteDraft) -> Result<QuoteDraft, RepositoryError> {
        let mut drafts = self.drafts.write().await;
        let expected_version = draft.version;
        let current = drafts.get(&draft.session_id.0).map(|stored| stored.version);
        if current != Some(expected_version) {
            return Err(RepositoryError::VersionConflict {
                session_id: draft.session_id.0.clone(),
                expected_version,
            });
        }
        draft.version = expected_version + 1;
        draft.updated_at = Utc::now();
        drafts.insert(draft.session_id.0.clone(), draft.clone());
        Ok(draft)
    }
}
