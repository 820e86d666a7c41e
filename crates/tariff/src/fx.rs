//! Exchange-rate source backed by a JSON HTTP endpoint.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use landcost_core::config::FxConfig;
use landcost_core::fx::{ExchangeRateSource, FxError};

/// Reads the local-per-USD rate at `pointer` (RFC 6901) of the document served at `url`.
/// Numbers and numeric strings are both accepted.
#[derive(Clone, Debug)]
pub struct HttpJsonRateSource {
    http: reqwest::Client,
    url: String,
    pointer: String,
    timeout: Duration,
}

impl HttpJsonRateSource {
    pub fn new(url: impl Into<String>, pointer: impl Into<String>, timeout: Duration) -> Self {
        Self { http: reqwest::Client::new(), url: url.into(), pointer: pointer.into(), timeout }
    }

    /// `None` unless both the URL and the pointer are configured.
    pub fn from_config(config: &FxConfig) -> Option<Self> {
        let url = config.url.clone()?;
        let pointer = config.json_pointer.clone()?;
        Some(Self::new(url, pointer, Duration::from_secs(config.timeout_secs)))
    }
}

pub fn rate_at_pointer(document: &Value, pointer: &str) -> Result<Decimal, FxError> {
    let value = document
        .pointer(pointer)
        .ok_or_else(|| FxError::InvalidPayload(format!("nothing at `{pointer}`")))?;
    let rate = match value {
        Value::Number(number) => number.to_string().parse::<Decimal>().ok(),
        Value::String(text) => text.trim().parse::<Decimal>().ok(),
        _ => None,
    }
    .ok_or_else(|| FxError::InvalidPayload(format!("value at `{pointer}` is not a number")))?;
    if rate <= Decimal::ZERO {
        return Err(FxError::InvalidPayload(format!("non-positive rate {rate}")));
    }
    Ok(rate)
}

#[async_trait]
impl ExchangeRateSource for HttpJsonRateSource {
    fn name(&self) -> &str {
        "http_json"
    }

    async fn local_per_usd(&self) -> Result<Decimal, FxError> {
        let response = self
            .http
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| FxError::Unavailable(error.to_string()))?;
        if !response.status().is_success() {
            return Err(FxError::Unavailable(format!("status {}", response.status().as_u16())));
        }
        let document: Value =
            response.json().await.map_err(|error| FxError::InvalidPayload(error.to_string()))?;
        rate_at_pointer(&document, &self.pointer)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::rate_at_pointer;

    #[test]
    fn reads_numbers_and_numeric_strings() {
        let document = json!({"rates": {"ARS": 1425.5, "BRL": "5.10", "bad": -1, "text": "n/a"}});
        assert_eq!(rate_at_pointer(&document, "/rates/ARS").expect("ars"), Decimal::new(14255, 1));
        assert_eq!(rate_at_pointer(&document, "/rates/BRL").expect("brl"), Decimal::new(510, 2));
        assert!(rate_at_pointer(&document, "/rates/bad").is_err());
        assert!(rate_at_pointer(&document, "/rates/text").is_err());
        assert!(rate_at_pointer(&document, "/rates/missing").is_err());
    }
}
