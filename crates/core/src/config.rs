use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::ClassificationThresholds;
use crate::fx::FALLBACK_LOCAL_PER_USD;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub tariff_service: TariffServiceConfig,
    pub llm: LlmConfig,
    pub fx: FxConfig,
    pub landed_cost: LandedCostConfig,
    pub classification: ClassificationConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Authenticated tariff data service. Disabled when `base_url` is unset.
#[derive(Clone, Debug)]
pub struct TariffServiceConfig {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub login_path: String,
    pub cache_dir: PathBuf,
    pub cache_ttl_days: u32,
    pub request_timeout_secs: u64,
    pub document_timeout_secs: u64,
    pub document_retries: u32,
    pub document_backoff_ms: u64,
    pub headless_browser: Option<PathBuf>,
}

impl TariffServiceConfig {
    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct FxConfig {
    pub source: FxSourceKind,
    pub fixed_local_per_usd: Decimal,
    pub url: Option<String>,
    pub json_pointer: Option<String>,
    pub ttl_secs: u64,
    pub fallback_local_per_usd: Decimal,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LandedCostConfig {
    pub insurance_pct: Decimal,
    pub default_unit_price_min: Decimal,
    pub default_unit_price_max: Decimal,
}

#[derive(Clone, Debug)]
pub struct ClassificationConfig {
    pub short_query_min_score: f64,
    pub long_query_min_score: f64,
    pub dominance_margin: f64,
    pub max_candidates: usize,
    pub enrich_detail_limit: usize,
    pub rules_path: Option<PathBuf>,
}

impl ClassificationConfig {
    pub fn thresholds(&self) -> ClassificationThresholds {
        ClassificationThresholds {
            short_query_min_score: self.short_query_min_score,
            long_query_min_score: self.long_query_min_score,
            dominance_margin: self.dominance_margin,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Ollama,
    Disabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FxSourceKind {
    Fixed,
    Http,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub tariff_base_url: Option<String>,
    pub tariff_username: Option<String>,
    pub tariff_password: Option<String>,
    pub tariff_cache_dir: Option<PathBuf>,
    pub rules_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("landcost"))
        .unwrap_or_else(|| PathBuf::from(".landcost-cache"))
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://landcost.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            tariff_service: TariffServiceConfig {
                base_url: None,
                username: None,
                password: None,
                login_path: "/login".to_string(),
                cache_dir: default_cache_dir(),
                cache_ttl_days: 30,
                request_timeout_secs: 25,
                document_timeout_secs: 40,
                document_retries: 2,
                document_backoff_ms: 500,
                headless_browser: None,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 18,
            },
            fx: FxConfig {
                source: FxSourceKind::Fixed,
                fixed_local_per_usd: FALLBACK_LOCAL_PER_USD,
                url: None,
                json_pointer: None,
                ttl_secs: 6 * 60 * 60,
                fallback_local_per_usd: FALLBACK_LOCAL_PER_USD,
                timeout_secs: 10,
            },
            landed_cost: LandedCostConfig {
                insurance_pct: Decimal::ONE,
                default_unit_price_min: Decimal::new(500, 0),
                default_unit_price_max: Decimal::new(2_500, 0),
            },
            classification: ClassificationConfig {
                short_query_min_score: ClassificationThresholds::default().short_query_min_score,
                long_query_min_score: ClassificationThresholds::default().long_query_min_score,
                dominance_margin: ClassificationThresholds::default().dominance_margin,
                max_candidates: 8,
                enrich_detail_limit: 3,
                rules_path: None,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected ollama|disabled)"
            ))),
        }
    }
}

impl std::str::FromStr for FxSourceKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "http" => Ok(Self::Http),
            other => Err(ConfigError::Validation(format!(
                "unsupported fx source `{other}` (expected fixed|http)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("landcost.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(tariff) = patch.tariff_service {
            if let Some(base_url) = tariff.base_url {
                self.tariff_service.base_url = Some(base_url);
            }
            if let Some(username) = tariff.username {
                self.tariff_service.username = Some(username);
            }
            if let Some(password) = tariff.password {
                self.tariff_service.password = Some(secret_value(password));
            }
            if let Some(login_path) = tariff.login_path {
                self.tariff_service.login_path = login_path;
            }
            if let Some(cache_dir) = tariff.cache_dir {
                self.tariff_service.cache_dir = cache_dir;
            }
            if let Some(cache_ttl_days) = tariff.cache_ttl_days {
                self.tariff_service.cache_ttl_days = cache_ttl_days;
            }
            if let Some(request_timeout_secs) = tariff.request_timeout_secs {
                self.tariff_service.request_timeout_secs = request_timeout_secs;
            }
            if let Some(document_timeout_secs) = tariff.document_timeout_secs {
                self.tariff_service.document_timeout_secs = document_timeout_secs;
            }
            if let Some(document_retries) = tariff.document_retries {
                self.tariff_service.document_retries = document_retries;
            }
            if let Some(document_backoff_ms) = tariff.document_backoff_ms {
                self.tariff_service.document_backoff_ms = document_backoff_ms;
            }
            if let Some(headless_browser) = tariff.headless_browser {
                self.tariff_service.headless_browser = Some(headless_browser);
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(fx) = patch.fx {
            if let Some(source) = fx.source {
                self.fx.source = source;
            }
            if let Some(rate) = fx.fixed_local_per_usd {
                self.fx.fixed_local_per_usd = rate;
            }
            if let Some(url) = fx.url {
                self.fx.url = Some(url);
            }
            if let Some(json_pointer) = fx.json_pointer {
                self.fx.json_pointer = Some(json_pointer);
            }
            if let Some(ttl_secs) = fx.ttl_secs {
                self.fx.ttl_secs = ttl_secs;
            }
            if let Some(fallback) = fx.fallback_local_per_usd {
                self.fx.fallback_local_per_usd = fallback;
            }
            if let Some(timeout_secs) = fx.timeout_secs {
                self.fx.timeout_secs = timeout_secs;
            }
        }

        if let Some(landed) = patch.landed_cost {
            if let Some(insurance_pct) = landed.insurance_pct {
                self.landed_cost.insurance_pct = insurance_pct;
            }
            if let Some(min) = landed.default_unit_price_min {
                self.landed_cost.default_unit_price_min = min;
            }
            if let Some(max) = landed.default_unit_price_max {
                self.landed_cost.default_unit_price_max = max;
            }
        }

        if let Some(classification) = patch.classification {
            if let Some(value) = classification.short_query_min_score {
                self.classification.short_query_min_score = value;
            }
            if let Some(value) = classification.long_query_min_score {
                self.classification.long_query_min_score = value;
            }
            if let Some(value) = classification.dominance_margin {
                self.classification.dominance_margin = value;
            }
            if let Some(value) = classification.max_candidates {
                self.classification.max_candidates = value;
            }
            if let Some(value) = classification.enrich_detail_limit {
                self.classification.enrich_detail_limit = value;
            }
            if let Some(rules_path) = classification.rules_path {
                self.classification.rules_path = Some(rules_path);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LANDCOST_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LANDCOST_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("LANDCOST_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LANDCOST_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("LANDCOST_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LANDCOST_TARIFF_BASE_URL") {
            self.tariff_service.base_url = Some(value);
        }
        if let Some(value) = read_env("LANDCOST_TARIFF_USERNAME") {
            self.tariff_service.username = Some(value);
        }
        if let Some(value) = read_env("LANDCOST_TARIFF_PASSWORD") {
            self.tariff_service.password = Some(secret_value(value));
        }
        if let Some(value) = read_env("LANDCOST_TARIFF_CACHE_DIR") {
            self.tariff_service.cache_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("LANDCOST_TARIFF_CACHE_TTL_DAYS") {
            self.tariff_service.cache_ttl_days =
                parse_u32("LANDCOST_TARIFF_CACHE_TTL_DAYS", &value)?;
        }
        if let Some(value) = read_env("LANDCOST_TARIFF_TIMEOUT_SECS") {
            self.tariff_service.request_timeout_secs =
                parse_u64("LANDCOST_TARIFF_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("LANDCOST_TARIFF_HEADLESS_BROWSER") {
            self.tariff_service.headless_browser = Some(PathBuf::from(value));
        }

        if let Some(value) = read_env("LANDCOST_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("LANDCOST_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("LANDCOST_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("LANDCOST_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("LANDCOST_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LANDCOST_FX_SOURCE") {
            self.fx.source = value.parse()?;
        }
        if let Some(value) = read_env("LANDCOST_FX_FIXED_RATE") {
            self.fx.fixed_local_per_usd = parse_decimal("LANDCOST_FX_FIXED_RATE", &value)?;
        }
        if let Some(value) = read_env("LANDCOST_FX_URL") {
            self.fx.url = Some(value);
        }
        if let Some(value) = read_env("LANDCOST_FX_JSON_POINTER") {
            self.fx.json_pointer = Some(value);
        }
        if let Some(value) = read_env("LANDCOST_FX_TTL_SECS") {
            self.fx.ttl_secs = parse_u64("LANDCOST_FX_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("LANDCOST_LANDED_COST_INSURANCE_PCT") {
            self.landed_cost.insurance_pct =
                parse_decimal("LANDCOST_LANDED_COST_INSURANCE_PCT", &value)?;
        }

        if let Some(value) = read_env("LANDCOST_CLASSIFICATION_RULES_PATH") {
            self.classification.rules_path = Some(PathBuf::from(value));
        }

        if let Some(value) = read_env("LANDCOST_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LANDCOST_SERVER_PORT") {
            self.server.port = parse_u16("LANDCOST_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("LANDCOST_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("LANDCOST_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("LANDCOST_LOGGING_LEVEL").or_else(|| read_env("LANDCOST_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LANDCOST_LOGGING_FORMAT").or_else(|| read_env("LANDCOST_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(base_url) = overrides.tariff_base_url {
            self.tariff_service.base_url = Some(base_url);
        }
        if let Some(username) = overrides.tariff_username {
            self.tariff_service.username = Some(username);
        }
        if let Some(password) = overrides.tariff_password {
            self.tariff_service.password = Some(secret_value(password));
        }
        if let Some(cache_dir) = overrides.tariff_cache_dir {
            self.tariff_service.cache_dir = cache_dir;
        }
        if let Some(rules_path) = overrides.rules_path {
            self.classification.rules_path = Some(rules_path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_tariff_service(&self.tariff_service)?;
        validate_llm(&self.llm)?;
        validate_fx(&self.fx)?;
        validate_landed_cost(&self.landed_cost)?;
        validate_classification(&self.classification)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// Explicit path if it exists, otherwise the first of `landcost.toml` and `config/landcost.toml` found.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("landcost.toml"), PathBuf::from("config/landcost.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::Validation(format!("{key} must start with http:// or https://")));
    }
    Ok(())
}

fn validate_tariff_service(tariff: &TariffServiceConfig) -> Result<(), ConfigError> {
    if let Some(base_url) = &tariff.base_url {
        validate_http_url("tariff_service.base_url", base_url)?;

        let username_missing =
            tariff.username.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
        if username_missing {
            return Err(ConfigError::Validation(
                "tariff_service.username is required when tariff_service.base_url is set (env: LANDCOST_TARIFF_USERNAME)".to_string(),
            ));
        }
        let password_missing = tariff
            .password
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if password_missing {
            return Err(ConfigError::Validation(
                "tariff_service.password is required when tariff_service.base_url is set (env: LANDCOST_TARIFF_PASSWORD)".to_string(),
            ));
        }
    }

    if !tariff.login_path.starts_with('/') {
        return Err(ConfigError::Validation(
            "tariff_service.login_path must start with `/`".to_string(),
        ));
    }
    if tariff.cache_ttl_days == 0 {
        return Err(ConfigError::Validation(
            "tariff_service.cache_ttl_days must be greater than zero".to_string(),
        ));
    }
    for (key, value) in [
        ("tariff_service.request_timeout_secs", tariff.request_timeout_secs),
        ("tariff_service.document_timeout_secs", tariff.document_timeout_secs),
    ] {
        if value == 0 || value > 300 {
            return Err(ConfigError::Validation(format!("{key} must be in range 1..=300")));
        }
    }
    if tariff.document_retries > 5 {
        return Err(ConfigError::Validation(
            "tariff_service.document_retries must be at most 5".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.provider == LlmProvider::Ollama {
        let missing = llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.base_url is required for ollama provider (set llm.provider = \"disabled\" to run without it)".to_string(),
            ));
        }
        if llm.model.trim().is_empty() {
            return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
        }
    }

    Ok(())
}

fn validate_fx(fx: &FxConfig) -> Result<(), ConfigError> {
    if fx.fallback_local_per_usd <= Decimal::ZERO || fx.fixed_local_per_usd <= Decimal::ZERO {
        return Err(ConfigError::Validation(
            "fx.fixed_local_per_usd and fx.fallback_local_per_usd must be positive".to_string(),
        ));
    }
    if fx.ttl_secs == 0 {
        return Err(ConfigError::Validation("fx.ttl_secs must be greater than zero".to_string()));
    }
    if fx.timeout_secs == 0 || fx.timeout_secs > 300 {
        return Err(ConfigError::Validation("fx.timeout_secs must be in range 1..=300".to_string()));
    }
    if fx.source == FxSourceKind::Http {
        let Some(url) = &fx.url else {
            return Err(ConfigError::Validation(
                "fx.url is required when fx.source = \"http\"".to_string(),
            ));
        };
        validate_http_url("fx.url", url)?;
        let pointer_ok = fx.json_pointer.as_ref().is_some_and(|pointer| pointer.starts_with('/'));
        if !pointer_ok {
            return Err(ConfigError::Validation(
                "fx.json_pointer must be a JSON pointer such as `/rates/ARS` when fx.source = \"http\""
                    .to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_landed_cost(landed: &LandedCostConfig) -> Result<(), ConfigError> {
    if landed.insurance_pct < Decimal::ZERO || landed.insurance_pct > Decimal::TEN {
        return Err(ConfigError::Validation(
            "landed_cost.insurance_pct must be in range 0..=10".to_string(),
        ));
    }
    if landed.default_unit_price_min <= Decimal::ZERO
        || landed.default_unit_price_min > landed.default_unit_price_max
    {
        return Err(ConfigError::Validation(
            "landed_cost.default_unit_price_min must be positive and not exceed default_unit_price_max"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_classification(classification: &ClassificationConfig) -> Result<(), ConfigError> {
    for (key, value) in [
        ("classification.short_query_min_score", classification.short_query_min_score),
        ("classification.long_query_min_score", classification.long_query_min_score),
    ] {
        if !(value > 0.0 && value <= 1.0) {
            return Err(ConfigError::Validation(format!("{key} must be in range (0, 1]")));
        }
    }
    if !(0.0..1.0).contains(&classification.dominance_margin) {
        return Err(ConfigError::Validation(
            "classification.dominance_margin must be in range [0, 1)".to_string(),
        ));
    }
    if classification.max_candidates == 0 || classification.max_candidates > 8 {
        return Err(ConfigError::Validation(
            "classification.max_candidates must be in range 1..=8".to_string(),
        ));
    }
    if let Some(path) = &classification.rules_path {
        if !path.exists() {
            return Err(ConfigError::Validation(format!(
                "classification.rules_path `{}` does not exist",
                path.display()
            )));
        }
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    value.trim().parse::<Decimal>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    tariff_service: Option<TariffServicePatch>,
    llm: Option<LlmPatch>,
    fx: Option<FxPatch>,
    landed_cost: Option<LandedCostPatch>,
    classification: Option<ClassificationPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TariffServicePatch {
    base_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    login_path: Option<String>,
    cache_dir: Option<PathBuf>,
    cache_ttl_days: Option<u32>,
    request_timeout_secs: Option<u64>,
    document_timeout_secs: Option<u64>,
    document_retries: Option<u32>,
    document_backoff_ms: Option<u64>,
    headless_browser: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FxPatch {
    source: Option<FxSourceKind>,
    fixed_local_per_usd: Option<Decimal>,
    url: Option<String>,
    json_pointer: Option<String>,
    ttl_secs: Option<u64>,
    fallback_local_per_usd: Option<Decimal>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LandedCostPatch {
    insurance_pct: Option<Decimal>,
    default_unit_price_min: Option<Decimal>,
    default_unit_price_max: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct ClassificationPatch {
    short_query_min_score: Option<f64>,
    long_query_min_score: Option<f64>,
    dominance_margin: Option<f64>,
    max_candidates: Option<usize>,
    enrich_detail_limit: Option<usize>,
    rules_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
