//! Local-currency per USD exchange rate, cached with an explicit TTL.
//!
//! The rate is only used to place CIF values into the local-currency internal-tax tiers and
//! to convert prices declared in local currency. When no source answers, callers get
//! [`FALLBACK_LOCAL_PER_USD`] (or the configured override) flagged as a fallback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// Local currency units per USD used when no source has ever answered.
pub const FALLBACK_LOCAL_PER_USD: Decimal = Decimal::from_parts(1_200, 0, 0, false, 0);

pub const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Error)]
pub enum FxError {
    #[error("exchange rate source unavailable: {0}")]
    Unavailable(String),
    #[error("exchange rate payload invalid: {0}")]
    InvalidPayload(String),
}

#[async_trait]
pub trait ExchangeRateSource: Send + Sync {
    fn name(&self) -> &str;
    async fn local_per_usd(&self) -> Result<Decimal, FxError>;
}

#[derive(Clone, Debug)]
pub struct FixedRateSource {
    rate: Decimal,
}

impl FixedRateSource {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }
}

#[async_trait]
impl ExchangeRateSource for FixedRateSource {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn local_per_usd(&self) -> Result<Decimal, FxError> {
        Ok(self.rate)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateOrigin {
    Live,
    Cached,
    Stale,
    Fallback,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub local_per_usd: Decimal,
    pub origin: RateOrigin,
}

impl ExchangeRate {
    pub fn is_assumed(&self) -> bool {
        matches!(self.origin, RateOrigin::Fallback | RateOrigin::Stale)
    }
}

struct CachedRate {
    rate: Decimal,
    fetched_at: Instant,
}

pub struct ExchangeRateCache {
    source: Arc<dyn ExchangeRateSource>,
    ttl: Duration,
    fallback: Decimal,
    state: Mutex<Option<CachedRate>>,
}

impl ExchangeRateCache {
    pub fn new(source: Arc<dyn ExchangeRateSource>, ttl: Duration, fallback: Decimal) -> Self {
        Self { source, ttl, fallback, state: Mutex::new(None) }
    }

    pub fn fixed(rate: Decimal) -> Self {
        Self::new(Arc::new(FixedRateSource::new(rate)), DEFAULT_TTL, rate)
    }

    /// Cached rate while fresh, otherwise a refresh.
    pub async fn get(&self) -> ExchangeRate {
        {
            let state = self.state.lock().await;
            if let Some(cached) = state.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return ExchangeRate { local_per_usd: cached.rate, origin: RateOrigin::Cached };
                }
            }
        }
        self.refresh().await
    }

    /// Queries the source unconditionally. Failures keep the previous value (as stale) or
    /// fall back to the configured constant.
    pub async fn refresh(&self) -> ExchangeRate {
        let mut state = self.state.lock().await;
        match self.source.local_per_usd().await {
            Ok(rate) if rate > Decimal::ZERO => {
                *state = Some(CachedRate { rate, fetched_at: Instant::now() });
                tracing::debug!(
                    event_name = "fx.rate.refreshed",
                    source = self.source.name(),
                    rate = %rate,
                    "exchange rate refreshed"
                );
                ExchangeRate { local_per_usd: rate, origin: RateOrigin::Live }
            }
            outcome => {
                let reason = match outcome {
                    Ok(rate) => format!("non-positive rate {rate}"),
                    Err(error) => error.to_string(),
                };
                tracing::warn!(
                    event_name = "fx.rate.degraded",
                    source = self.source.name(),
                    reason = %reason,
                    "exchange rate source failed"
                );
                match state.as_ref() {
                    Some(cached) => {
                        ExchangeRate { local_per_usd: cached.rate, origin: RateOrigin::Stale }
                    }
                    None => ExchangeRate { local_per_usd: self.fallback, origin: RateOrigin::Fallback },
                }
            }
        }
    }
}
