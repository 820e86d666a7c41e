//! Secondary internal-tax documents: fetching, markup stripping and tier extraction.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::COOKIE;
use rust_decimal::Decimal;
use tokio::process::Command;

use landcost_core::domain::tariff::InternalTaxSchedule;
use landcost_core::text;

use crate::error::TariffClientError;

static SCRIPT_OR_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("valid regex"));
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

const AMOUNT: &str = r"\$\s*([0-9][0-9.,]*)";
const RATE: &str = r"\s*:?\s*([0-9]+(?:[.,][0-9]+)?)\s*%";

static BETWEEN_TIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"mas de {AMOUNT}\s*y hasta {AMOUNT}{RATE}")).expect("valid regex")
});
static UP_TO_TIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"hasta {AMOUNT}{RATE}")).expect("valid regex"));
static ABOVE_TIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"mas de {AMOUNT}{RATE}")).expect("valid regex"));

/// Plain text of an HTML document with scripts, styles and tags removed.
pub fn strip_markup(html: &str) -> String {
    let without_code = SCRIPT_OR_STYLE.replace_all(html, " ");
    let without_tags = TAG.replace_all(&without_code, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&#36;", "$")
        .replace("&amp;", "&")
        .replace("&aacute;", "á")
        .replace("&eacute;", "é")
        .replace("&iacute;", "í")
        .replace("&oacute;", "ó")
        .replace("&uacute;", "ú");
    WHITESPACE.replace_all(&decoded, " ").trim().to_string()
}

/// Local-currency amount as written in the documents: `10.000.000`, `10.000.000,50`,
/// `1,5` or `2500`.
fn parse_amount(raw: &str) -> Option<Decimal> {
    let raw = raw.trim_end_matches(['.', ',']);
    let normalized = if raw.contains(',') {
        raw.replace('.', "").replace(',', ".")
    } else if raw.matches('.').count() > 1
        || raw.rsplit_once('.').is_some_and(|(_, tail)| tail.len() == 3)
    {
        raw.replace('.', "")
    } else {
        raw.to_string()
    };
    normalized.parse::<Decimal>().ok()
}

/// One tier line as written. `stated_lower` is the `más de $X` amount when the line has one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DocumentBand {
    pub stated_lower: Option<Decimal>,
    pub upper_inclusive: Option<Decimal>,
    pub rate_pct: Decimal,
}

/// Tier lines found in document text, deduplicated by upper bound.
pub fn parse_tier_bands(document_text: &str) -> Vec<DocumentBand> {
    let mut remaining = text::normalize(document_text);
    let mut bands = Vec::new();

    for captures in BETWEEN_TIER.captures_iter(&remaining) {
        if let (Some(lower), Some(upper), Some(rate)) =
            (parse_amount(&captures[1]), parse_amount(&captures[2]), parse_amount(&captures[3]))
        {
            bands.push(DocumentBand { stated_lower: Some(lower), upper_inclusive: Some(upper), rate_pct: rate });
        }
    }
    remaining = BETWEEN_TIER.replace_all(&remaining, " ").into_owned();

    for captures in UP_TO_TIER.captures_iter(&remaining) {
        if let (Some(upper), Some(rate)) = (parse_amount(&captures[1]), parse_amount(&captures[2])) {
            bands.push(DocumentBand { stated_lower: None, upper_inclusive: Some(upper), rate_pct: rate });
        }
    }
    remaining = UP_TO_TIER.replace_all(&remaining, " ").into_owned();

    for captures in ABOVE_TIER.captures_iter(&remaining) {
        if let Some(rate) = parse_amount(&captures[2]) {
            bands.push(DocumentBand { stated_lower: parse_amount(&captures[1]), upper_inclusive: None, rate_pct: rate });
        }
    }

    let mut unique: Vec<DocumentBand> = Vec::new();
    for band in bands {
        if !unique.iter().any(|kept| kept.upper_inclusive == band.upper_inclusive) {
            unique.push(band);
        }
    }
    unique
}

/// Validated schedule from document text. Every stated `más de $X` must continue the
/// previous tier's upper bound, and the document must close with an open-ended tier.
pub fn parse_schedule(document_text: &str) -> Result<InternalTaxSchedule, TariffClientError> {
    let bands = parse_tier_bands(document_text);
    if bands.is_empty() {
        return Err(TariffClientError::Document("no tier found in document".to_string()));
    }
    let schedule = InternalTaxSchedule::from_bands(
        bands.iter().map(|band| (band.upper_inclusive, band.rate_pct)).collect(),
    )
    .map_err(|error| TariffClientError::Document(error.to_string()))?;

    for band in &bands {
        let Some(stated) = band.stated_lower else {
            continue;
        };
        let tier = schedule.tiers().iter().find(|tier| tier.upper_inclusive == band.upper_inclusive);
        if let Some(tier) = tier.filter(|tier| tier.lower_exclusive != stated) {
            return Err(TariffClientError::Document(format!(
                "tier above {stated} does not continue the previous bound {}",
                tier.lower_exclusive
            )));
        }
    }
    Ok(schedule)
}

#[derive(Clone, Debug)]
pub struct DocumentFetcher {
    http: reqwest::Client,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
    browser: Option<PathBuf>,
}

impl DocumentFetcher {
    pub fn new(
        http: reqwest::Client,
        timeout: Duration,
        retries: u32,
        backoff: Duration,
        configured_browser: Option<PathBuf>,
    ) -> Self {
        Self { http, timeout, retries, backoff, browser: configured_browser.or_else(find_headless_browser) }
    }

    pub fn browser(&self) -> Option<&Path> {
        self.browser.as_deref()
    }

    /// Fetches `url` and parses its tiers. Each strategy is retried with linear backoff;
    /// the headless browser is only tried once the plain request is exhausted.
    pub async fn fetch_schedule(
        &self,
        url: &str,
        cookie: Option<&str>,
    ) -> Result<InternalTaxSchedule, TariffClientError> {
        let mut last_error = match self.with_retries(|| self.fetch_plain(url, cookie)).await {
            Ok(schedule) => return Ok(schedule),
            Err(error) => error,
        };

        if let Some(browser) = &self.browser {
            tracing::info!(
                event_name = "tariff.document.browser_fallback",
                url,
                error = %last_error,
                "plain fetch failed, rendering document with headless browser"
            );
            match self.with_retries(|| self.fetch_rendered(browser, url)).await {
                Ok(schedule) => return Ok(schedule),
                Err(error) => last_error = error,
            }
        }
        Err(last_error)
    }

    async fn with_retries<F, Fut>(&self, mut attempt_fn: F) -> Result<InternalTaxSchedule, TariffClientError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<InternalTaxSchedule, TariffClientError>>,
    {
        let attempts = self.retries + 1;
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Ok(schedule) => return Ok(schedule),
                Err(error) if attempt >= attempts => return Err(error),
                Err(error) => {
                    tracing::debug!(event_name = "tariff.document.retry", attempt, error = %error, "document attempt failed");
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_plain(&self, url: &str, cookie: Option<&str>) -> Result<InternalTaxSchedule, TariffClientError> {
        let mut request = self.http.get(url).timeout(self.timeout);
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        let response = request.send().await.map_err(|error| self.map_transport(error))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TariffClientError::Status { status: status.as_u16(), url: url.to_string() });
        }
        let body = response.text().await.map_err(|error| self.map_transport(error))?;
        parse_schedule(&strip_markup(&body))
    }

    async fn fetch_rendered(&self, browser: &Path, url: &str) -> Result<InternalTaxSchedule, TariffClientError> {
        let output = Command::new(browser)
            .args(["--headless", "--disable-gpu", "--no-sandbox", "--dump-dom", url])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| TariffClientError::Timeout(self.timeout.as_secs()))??;
        if !output.status.success() {
            return Err(TariffClientError::Document(format!("headless browser exited with {}", output.status)));
        }
        parse_schedule(&strip_markup(&String::from_utf8_lossy(&output.stdout)))
    }

    fn map_transport(&self, error: reqwest::Error) -> TariffClientError {
        if error.is_timeout() {
            TariffClientError::Timeout(self.timeout.as_secs())
        } else {
            TariffClientError::Transport(error)
        }
    }
}

fn find_headless_browser() -> Option<PathBuf> {
    ["chromium", "chromium-browser", "google-chrome", "google-chrome-stable"]
        .into_iter()
        .find_map(|name| which::which(name).ok())
}
