//! Seams to tariff data: the local full-text index and the authoritative remote service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::tariff::{TariffCandidate, TariffCode, TariffDetail};
use crate::errors::ApplicationError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffIndexEntry {
    pub code: TariffCode,
    pub label: String,
    pub breadcrumb: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl TariffIndexEntry {
    pub fn new(code: TariffCode, label: impl Into<String>, breadcrumb: Vec<String>) -> Self {
        Self { code, label: label.into(), breadcrumb, updated_at: Utc::now() }
    }

    /// Text indexed for search: label followed by the breadcrumb path.
    pub fn searchable_text(&self) -> String {
        let mut text = self.label.clone();
        for part in &self.breadcrumb {
            text.push(' ');
            text.push_str(part);
        }
        text
    }
}

impl From<&TariffDetail> for TariffIndexEntry {
    fn from(detail: &TariffDetail) -> Self {
        Self::new(detail.code.clone(), detail.label.clone(), detail.breadcrumb.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexSearchOptions {
    pub limit: usize,
    /// Restricts hits to a four digit heading such as `8704`.
    pub heading_filter: Option<String>,
}

impl Default for IndexSearchOptions {
    fn default() -> Self {
        Self { limit: 8, heading_filter: None }
    }
}

/// Local searchable store of tariff codes. Never touches the network.
#[async_trait]
pub trait TariffIndex: Send + Sync {
    async fn upsert(&self, entries: &[TariffIndexEntry]) -> Result<(), ApplicationError>;
    async fn search(
        &self,
        query: &str,
        options: &IndexSearchOptions,
    ) -> Result<Vec<TariffIndexEntry>, ApplicationError>;
    async fn get(&self, code: &TariffCode) -> Result<Option<TariffIndexEntry>, ApplicationError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DetailOptions {
    pub bypass_cache: bool,
}

/// Authoritative tariff data. Failures surface as `None`/empty so callers degrade to
/// heuristics instead of failing the turn.
#[async_trait]
pub trait TariffDataSource: Send + Sync {
    async fn search_code(&self, free_text: &str, limit: usize) -> Vec<TariffCandidate>;
    async fn get_detail(&self, code: &TariffCode, options: DetailOptions) -> Option<TariffDetail>;
}

/// Data source used when no tariff service is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableTariffSource;

#[async_trait]
impl TariffDataSource for UnavailableTariffSource {
    async fn search_code(&self, _free_text: &str, _limit: usize) -> Vec<TariffCandidate> {
        Vec::new()
    }

    async fn get_detail(&self, _code: &TariffCode, _options: DetailOptions) -> Option<TariffDetail> {
        None
    }
}
