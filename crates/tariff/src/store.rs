//! On-disk state of the client: the authenticated session and the detail cache.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use landcost_core::domain::tariff::{DetailSource, TariffCode, TariffDetail};

use crate::error::TariffClientError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    /// Value for the `Cookie` request header.
    pub cookie: String,
    pub obtained_at: DateTime<Utc>,
}

/// Writes `bytes` to `path` through a temporary sibling and a rename, so readers never see
/// a partial file. Concurrent writers: last rename wins.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = path.file_name().and_then(|name| name.to_str()).unwrap_or("state");
    let temp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
    tokio::fs::write(&temp, bytes).await?;
    if let Err(error) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(error);
    }
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, std::io::Error> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error),
    }
}

#[derive(Clone, Debug)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(cache_dir: &Path) -> Self {
        Self { path: cache_dir.join("session.json") }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persisted session, if any. An unreadable file counts as no session.
    pub async fn load(&self) -> Option<AuthSession> {
        let bytes = read_optional(&self.path).await.ok()??;
        serde_json::from_slice(&bytes).ok()
    }

    pub async fn save(&self, session: &AuthSession) -> Result<(), TariffClientError> {
        let bytes = serde_json::to_vec_pretty(session)
            .map_err(|error| TariffClientError::InvalidPayload(error.to_string()))?;
        write_atomic(&self.path, &bytes).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), TariffClientError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CachedDetail {
    fetched_at: DateTime<Utc>,
    detail: TariffDetail,
}

/// Per-code JSON files under `<cache_dir>/details/`.
#[derive(Clone, Debug)]
pub struct DetailCache {
    dir: PathBuf,
    ttl: Duration,
}

impl DetailCache {
    pub fn new(cache_dir: &Path, ttl: Duration) -> Self {
        Self { dir: cache_dir.join("details"), ttl }
    }

    fn path_for(&self, code: &TariffCode) -> PathBuf {
        self.dir.join(format!("{}.json", code.as_str()))
    }

    /// Fresh cached detail, marked as served from cache. Expired and corrupt entries are
    /// misses.
    pub async fn get(&self, code: &TariffCode) -> Option<TariffDetail> {
        let bytes = read_optional(&self.path_for(code)).await.ok()??;
        let cached: CachedDetail = match serde_json::from_slice(&bytes) {
            Ok(cached) => cached,
            Err(error) => {
                tracing::warn!(
                    event_name = "tariff.cache.corrupt",
                    code = code.as_str(),
                    error = %error,
                    "ignoring corrupt cached detail"
                );
                return None;
            }
        };
        let age = Utc::now().signed_duration_since(cached.fetched_at);
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        if age > ttl || &cached.detail.code != code {
            return None;
        }
        let mut detail = cached.detail;
        detail.provenance.source = DetailSource::Cache;
        Some(detail)
    }

    pub async fn put(&self, detail: &TariffDetail) -> Result<(), TariffClientError> {
        let cached = CachedDetail { fetched_at: detail.provenance.fetched_at, detail: detail.clone() };
        let bytes = serde_json::to_vec_pretty(&cached)
            .map_err(|error| TariffClientError::InvalidPayload(error.to_string()))?;
        write_atomic(&self.path_for(&detail.code), &bytes).await?;
        Ok(())
    }
}
