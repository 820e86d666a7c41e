//! Authenticated client for the tariff data service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{COOKIE, LOCATION, SET_COOKIE};
use reqwest::{redirect, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, RwLock};

use landcost_core::config::TariffServiceConfig;
use landcost_core::domain::tariff::{DetailSource, TariffCandidate, TariffCode, TariffDetail};
use landcost_core::tariff::{DetailOptions, TariffDataSource, TariffIndex, TariffIndexEntry};

use crate::document::DocumentFetcher;
use crate::error::TariffClientError;
use crate::store::{AuthSession, DetailCache, SessionStore};
use crate::wire::{candidates_from_hits, WirePosition, WireSearchHit};

static PASSWORD_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<input[^>]*type\s*=\s*["']?password"#).expect("valid regex"));

enum Fetched {
    Body(String),
    Unauthenticated,
}

pub struct TariffClient {
    http: reqwest::Client,
    base_url: String,
    login_path: String,
    username: String,
    password: SecretString,
    request_timeout: Duration,
    session: RwLock<Option<AuthSession>>,
    login_lock: Mutex<()>,
    sessions: SessionStore,
    cache: DetailCache,
    documents: DocumentFetcher,
    index: Option<Arc<dyn TariffIndex>>,
}

impl TariffClient {
    pub fn from_config(config: &TariffServiceConfig) -> Result<Self, TariffClientError> {
        let base_url = config.base_url.as_deref().ok_or(TariffClientError::Disabled)?;
        let (Some(username), Some(password)) = (config.username.clone(), config.password.clone()) else {
            return Err(TariffClientError::MissingCredentials);
        };

        // Redirects are inspected by hand: a redirect to the login page means the session expired.
        let http = reqwest::Client::builder().redirect(redirect::Policy::none()).build()?;
        let documents = DocumentFetcher::new(
            http.clone(),
            Duration::from_secs(config.document_timeout_secs),
            config.document_retries,
            Duration::from_millis(config.document_backoff_ms),
            config.headless_browser.clone(),
        );

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            login_path: config.login_path.clone(),
            username,
            password,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            session: RwLock::new(None),
            login_lock: Mutex::new(()),
            sessions: SessionStore::new(&config.cache_dir),
            cache: DetailCache::new(
                &config.cache_dir,
                Duration::from_secs(u64::from(config.cache_ttl_days) * 24 * 60 * 60),
            ),
            documents,
            index: None,
        })
    }

    /// Search hits and fetched details are also written into `index`.
    pub fn with_index(mut self, index: Arc<dyn TariffIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn documents(&self) -> &DocumentFetcher {
        &self.documents
    }

    pub async fn search(&self, free_text: &str, limit: usize) -> Result<Vec<TariffCandidate>, TariffClientError> {
        let limit = limit.max(1);
        let url = format!("{}/api/search", self.base_url);
        let query = [("q", free_text.to_string()), ("limit", limit.to_string())];
        let hits: Vec<WireSearchHit> = self.get_json(&url, &query).await?;
        let candidates = candidates_from_hits(hits, limit);

        let entries: Vec<TariffIndexEntry> = candidates
            .iter()
            .filter_map(|candidate| {
                candidate
                    .label
                    .as_ref()
                    .map(|label| TariffIndexEntry::new(candidate.code.clone(), label.clone(), Vec::new()))
            })
            .collect();
        self.remember(&entries).await;

        tracing::debug!(
            event_name = "tariff.client.search",
            query = free_text,
            hits = candidates.len(),
            "tariff search completed"
        );
        Ok(candidates)
    }

    pub async fn detail(&self, code: &TariffCode, options: DetailOptions) -> Result<TariffDetail, TariffClientError> {
        if !options.bypass_cache {
            if let Some(cached) = self.cache.get(code).await {
                tracing::debug!(event_name = "tariff.client.cache_hit", code = code.as_str(), "detail served from cache");
                return Ok(cached);
            }
        }

        let url = format!("{}/api/positions/{}", self.base_url, code.as_str());
        let position: WirePosition = self.get_json(&url, &[]).await?;
        let document =
            position.internal_tax_document.as_deref().and_then(|raw| resolve_document_url(&self.base_url, raw));
        let has_inline_tiers = position.internal_tax.as_ref().is_some_and(|tax| !tax.tiers.is_empty());
        let mut detail = position.into_detail(DetailSource::Authoritative, Utc::now())?;
        if &detail.code != code {
            return Err(TariffClientError::InvalidPayload(format!(
                "requested {code} but service answered {}",
                detail.code
            )));
        }

        if detail.provenance.document_url.is_none() {
            detail.provenance.document_url = document.clone();
        }
        if !has_inline_tiers {
            if let Some(document_url) = document {
                let cookie = self.session.read().await.as_ref().map(|session| session.cookie.clone());
                match self.documents.fetch_schedule(&document_url, cookie.as_deref()).await {
                    Ok(schedule) => detail.internal_tax = Some(schedule),
                    Err(error) => tracing::warn!(
                        event_name = "tariff.client.document_failed",
                        code = code.as_str(),
                        url = %document_url,
                        error = %error,
                        "internal tax document could not be parsed"
                    ),
                }
            }
        }

        if let Err(error) = self.cache.put(&detail).await {
            tracing::warn!(event_name = "tariff.client.cache_write_failed", code = code.as_str(), error = %error, "detail not cached");
        }
        self.remember(&[TariffIndexEntry::from(&detail)]).await;
        Ok(detail)
    }

    async fn remember(&self, entries: &[TariffIndexEntry]) {
        let Some(index) = &self.index else {
            return;
        };
        if entries.is_empty() {
            return;
        }
        if let Err(error) = index.upsert(entries).await {
            tracing::warn!(event_name = "tariff.client.index_upsert_failed", error = %error, "local index not updated");
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, TariffClientError> {
        let session = self.current_session().await?;
        let body = match self.fetch(url, query, &session.cookie).await? {
            Fetched::Body(body) => body,
            Fetched::Unauthenticated => {
                let renewed = self.reauthenticate(&session.cookie).await?;
                tracing::info!(event_name = "tariff.client.reauthenticated", url, "session expired, logged in again");
                match self.fetch(url, query, &renewed.cookie).await? {
                    Fetched::Body(body) => body,
                    Fetched::Unauthenticated => return Err(TariffClientError::Unauthenticated),
                }
            }
        };
        serde_json::from_str(&body).map_err(|error| TariffClientError::InvalidPayload(error.to_string()))
    }

    async fn fetch(&self, url: &str, query: &[(&str, String)], cookie: &str) -> Result<Fetched, TariffClientError> {
        let response = self
            .http
            .get(url)
            .query(query)
            .header(COOKIE, cookie)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|error| self.map_transport(error))?;

        let status = response.status();
        if status.is_redirection() {
            let to_login = response
                .headers()
                .get(LOCATION)
                .and_then(|location| location.to_str().ok())
                .is_some_and(|location| location.contains(&self.login_path));
            if to_login {
                return Ok(Fetched::Unauthenticated);
            }
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(Fetched::Unauthenticated);
        }
        if !status.is_success() {
            return Err(TariffClientError::Status { status: status.as_u16(), url: url.to_string() });
        }

        let body = response.text().await.map_err(|error| self.map_transport(error))?;
        if PASSWORD_FIELD.is_match(&body) {
            return Ok(Fetched::Unauthenticated);
        }
        Ok(Fetched::Body(body))
    }

    async fn current_session(&self) -> Result<AuthSession, TariffClientError> {
        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }
        let _guard = self.login_lock.lock().await;
        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }
        if let Some(persisted) = self.sessions.load().await {
            *self.session.write().await = Some(persisted.clone());
            return Ok(persisted);
        }
        self.login().await
    }

    /// Logs in again unless another task already replaced `stale_cookie`.
    async fn reauthenticate(&self, stale_cookie: &str) -> Result<AuthSession, TariffClientError> {
        let _guard = self.login_lock.lock().await;
        if let Some(session) = self.session.read().await.clone() {
            if session.cookie != stale_cookie {
                return Ok(session);
            }
        }
        self.login().await
    }

    /// Caller holds `login_lock`.
    async fn login(&self) -> Result<AuthSession, TariffClientError> {
        let url = format!("{}{}", self.base_url, self.login_path);
        let response = self
            .http
            .post(&url)
            .form(&[("username", self.username.as_str()), ("password", self.password.expose_secret())])
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|error| self.map_transport(error))?;

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(TariffClientError::LoginFailed(format!("status {}", status.as_u16())));
        }
        let cookie = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .map(str::trim)
            .filter(|pair| pair.contains('='))
            .collect::<Vec<_>>()
            .join("; ");
        if cookie.is_empty() {
            return Err(TariffClientError::LoginFailed("no session cookie in response".to_string()));
        }

        let session = AuthSession { cookie, obtained_at: Utc::now() };
        if let Err(error) = self.sessions.save(&session).await {
            tracing::warn!(event_name = "tariff.client.session_persist_failed", error = %error, "session kept in memory only");
        }
        *self.session.write().await = Some(session.clone());
        tracing::info!(event_name = "tariff.client.logged_in", "tariff service session established");
        Ok(session)
    }

    fn map_transport(&self, error: reqwest::Error) -> TariffClientError {
        if error.is_timeout() {
            TariffClientError::Timeout(self.request_timeout.as_secs())
        } else {
            TariffClientError::Transport(error)
        }
    }
}

#[async_trait]
impl TariffDataSource for TariffClient {
    async fn search_code(&self, free_text: &str, limit: usize) -> Vec<TariffCandidate> {
        match self.search(free_text, limit).await {
            Ok(candidates) => candidates,
            Err(error) => {
                tracing::warn!(
                    event_name = "tariff.client.search_failed",
                    transient = error.is_transient(),
                    error = %error,
                    "tariff search unavailable"
                );
                Vec::new()
            }
        }
    }

    async fn get_detail(&self, code: &TariffCode, options: DetailOptions) -> Option<TariffDetail> {
        match self.detail(code, options).await {
            Ok(detail) => Some(detail),
            Err(error) => {
                tracing::warn!(
                    event_name = "tariff.client.detail_failed",
                    code = code.as_str(),
                    transient = error.is_transient(),
                    error = %error,
                    "tariff detail unavailable"
                );
                None
            }
        }
    }
}

/// Absolute http(s) URL of an internal-tax document. Relative references, as the service
/// sends for documents it hosts itself, resolve against the service base URL.
fn resolve_document_url(base_url: &str, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let base = reqwest::Url::parse(&format!("{base_url}/")).ok()?;
    let resolved = base.join(raw).ok()?;
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}
