//! External collaborators of the dialogue: product resolution and lead capture.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use landcost_core::domain::session::{Currency, PriceHint, PriceKind, ProductSnapshot, QuoteDraft};
use landcost_core::errors::ApplicationError;

use crate::extraction;
use crate::signals;

static TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));
static META: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<meta\s[^>]*>").expect("valid regex"));
static META_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)\b(?:property|name)\s*=\s*["']([^"']+)["']"#).expect("valid regex"));
static META_CONTENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)\bcontent\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex"));

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("nothing to resolve")]
    Empty,
    #[error("product page request failed: {0}")]
    Transport(String),
    #[error("product page returned HTTP {0}")]
    Status(u16),
}

/// Normalizes a link or free text into a product snapshot. Partial data is fine.
#[async_trait]
pub trait ProductResolver: Send + Sync {
    async fn resolve(&self, input: &str) -> Result<ProductSnapshot, ResolveError>;
}

/// Uses the user's own words as the product title.
#[derive(Clone, Debug, Default)]
pub struct PlainTextResolver;

#[async_trait]
impl ProductResolver for PlainTextResolver {
    async fn resolve(&self, input: &str) -> Result<ProductSnapshot, ResolveError> {
        let title = extraction::product_phrase(input);
        if title.is_empty() {
            return Err(ResolveError::Empty);
        }
        Ok(ProductSnapshot { title, origin: extraction::origin_country(input), ..ProductSnapshot::default() })
    }
}

/// Reads `<title>`, OpenGraph and `product:price:*` meta tags from a product page.
pub struct HttpProductResolver {
    http: reqwest::Client,
    retries: u32,
    backoff: Duration,
}

impl HttpProductResolver {
    pub fn new(timeout: Duration, retries: u32, backoff: Duration) -> Result<Self, ResolveError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("landcost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| ResolveError::Transport(error.to_string()))?;
        Ok(Self { http, retries, backoff })
    }

    async fn fetch_once(&self, url: &str) -> Result<String, ResolveError> {
        let response =
            self.http.get(url).send().await.map_err(|error| ResolveError::Transport(error.to_string()))?;
        if !response.status().is_success() {
            return Err(ResolveError::Status(response.status().as_u16()));
        }
        response.text().await.map_err(|error| ResolveError::Transport(error.to_string()))
    }

    async fn fetch(&self, url: &str) -> Result<String, ResolveError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(error) if attempt < self.retries => {
                    attempt += 1;
                    tracing::debug!(event_name = "product.resolve.retry", attempt, error = %error, "retrying product page");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

impl Default for HttpProductResolver {
    fn default() -> Self {
        Self {
            http: reqwest::Client::new(),
            retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

#[async_trait]
impl ProductResolver for HttpProductResolver {
    async fn resolve(&self, input: &str) -> Result<ProductSnapshot, ResolveError> {
        let url = signals::contains_link(input).ok_or(ResolveError::Empty)?;
        let html = self.fetch(url).await?;
        let mut snapshot = snapshot_from_html(&html);
        snapshot.source_link = Some(url.to_string());
        if snapshot.title.is_empty() {
            snapshot.title = extraction::product_phrase(input);
        }
        tracing::info!(
            event_name = "product.resolve.completed",
            has_price = snapshot.price.is_some(),
            images = snapshot.images.len(),
            "product page resolved"
        );
        Ok(snapshot)
    }
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn meta_tags(html: &str) -> Vec<(String, String)> {
    META.find_iter(html)
        .filter_map(|tag| {
            let key = META_KEY.captures(tag.as_str())?.get(1)?.as_str().to_ascii_lowercase();
            let content = META_CONTENT.captures(tag.as_str())?;
            let value = content.get(1).or_else(|| content.get(2))?.as_str();
            Some((key, decode_entities(value)))
        })
        .collect()
}

/// Snapshot from page markup; missing tags leave fields empty.
pub fn snapshot_from_html(html: &str) -> ProductSnapshot {
    let tags = meta_tags(html);
    let first = |keys: &[&str]| {
        keys.iter().find_map(|key| {
            tags.iter().find(|(name, value)| name == key && !value.is_empty()).map(|(_, value)| value.clone())
        })
    };

    let title = first(&["og:title", "twitter:title"])
        .or_else(|| TITLE.captures(html).and_then(|captures| captures.get(1)).map(|title| decode_entities(title.as_str())))
        .unwrap_or_default();
    let description = first(&["og:description", "description", "twitter:description"]).unwrap_or_default();
    let images = tags
        .iter()
        .filter(|(name, value)| name == "og:image" && !value.is_empty())
        .map(|(_, value)| value.clone())
        .collect();

    let amount = first(&["product:price:amount", "og:price:amount"]).and_then(|raw| extraction::parse_amount(&raw));
    let currency = first(&["product:price:currency", "og:price:currency"])
        .and_then(|code| Currency::from_code(&code))
        .unwrap_or(Currency::Usd);
    let price = amount.map(|amount| PriceHint { kind: PriceKind::Fixed, min: amount, max: amount, currency, unit: None });

    ProductSnapshot { title, description, source_link: None, origin: None, price, images }
}

/// Links go to the page resolver when one is configured, everything else is plain text.
pub struct DefaultProductResolver {
    plain: PlainTextResolver,
    http: Option<Arc<dyn ProductResolver>>,
}

impl DefaultProductResolver {
    pub fn new(http: Option<Arc<dyn ProductResolver>>) -> Self {
        Self { plain: PlainTextResolver, http }
    }
}

impl Default for DefaultProductResolver {
    fn default() -> Self {
        Self::new(Some(Arc::new(HttpProductResolver::default())))
    }
}

#[async_trait]
impl ProductResolver for DefaultProductResolver {
    async fn resolve(&self, input: &str) -> Result<ProductSnapshot, ResolveError> {
        match (&self.http, signals::contains_link(input)) {
            (Some(http), Some(_)) => match http.resolve(input).await {
                Ok(snapshot) => Ok(snapshot),
                Err(error) => {
                    tracing::warn!(event_name = "product.resolve.failed", error = %error, "falling back to plain text");
                    let mut snapshot = self.plain.resolve(input).await?;
                    snapshot.source_link = signals::contains_link(input).map(str::to_string);
                    Ok(snapshot)
                }
            },
            _ => self.plain.resolve(input).await,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadReceipt {
    pub reference: String,
    pub captured_at: DateTime<Utc>,
}

/// Hand-off of an accepted offer to whoever follows up with the customer.
#[async_trait]
pub trait LeadCapture: Send + Sync {
    async fn capture(&self, draft: &QuoteDraft) -> Result<LeadReceipt, ApplicationError>;
}

/// Records the lead in the log and nothing else.
#[derive(Clone, Debug, Default)]
pub struct LoggingLeadCapture;

#[async_trait]
impl LeadCapture for LoggingLeadCapture {
    async fn capture(&self, draft: &QuoteDraft) -> Result<LeadReceipt, ApplicationError> {
        let receipt = LeadReceipt { reference: uuid::Uuid::new_v4().to_string(), captured_at: Utc::now() };
        tracing::info!(
            event_name = "lead.captured",
            session_id = %draft.session_id,
            reference = %receipt.reference,
            tariff_code = draft.tariff_code.as_ref().map(|code| code.as_str()).unwrap_or("-"),
            "lead handed off"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use landcost_core::domain::session::Currency;
    use rust_decimal::Decimal;

    use super::{snapshot_from_html, PlainTextResolver, ProductResolver, ResolveError};

    #[test]
    fn reads_open_graph_and_price_tags() {
        let html = r#"<html><head><title>Fallback</title>
            <meta property="og:title" content="Autoelevador eléctrico 3T &amp; cargador">
            <meta name='description' content='Batería de litio'>
            <meta property="og:image" content="https://cdn.example.com/a.jpg">
            <meta property="product:price:amount" content="4.180,00">
            <meta property="product:price:currency" content="USD">
        </head></html>"#;
        let snapshot = snapshot_from_html(html);
        assert_eq!(snapshot.title, "Autoelevador eléctrico 3T & cargador");
        assert_eq!(snapshot.description, "Batería de litio");
        assert_eq!(snapshot.images, vec!["https://cdn.example.com/a.jpg"]);
        let price = snapshot.price.expect("price");
        assert_eq!(price.min, Decimal::new(4_180, 0));
        assert_eq!(price.currency, Currency::Usd);
    }

    #[test]
    fn title_tag_is_the_fallback() {
        let snapshot = snapshot_from_html("<title>\n Hormigonera 350 L </title>");
        assert_eq!(snapshot.title, "Hormigonera 350 L");
        assert!(snapshot.price.is_none());
    }

    #[tokio::test]
    async fn plain_text_keeps_the_product_phrase() {
        let snapshot = PlainTextResolver.resolve("quiero importar un ascensor desde China").await.expect("snapshot");
        assert_eq!(snapshot.title, "ascensor desde China");
        assert_eq!(snapshot.origin.as_deref(), Some("China"));
        assert!(matches!(PlainTextResolver.resolve("USD 500").await, Err(ResolveError::Empty)));
    }
}
