use std::env;
use std::fs;
use std::path::Path;

use landcost_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::CommandResult;

struct Field {
    key: &'static str,
    env_key: Option<&'static str>,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_key: Option<&'static str>, value: impl Into<String>) -> Self {
        Self { key, env_key, value: value.into() }
    }
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("config", "config_validation", format!("config validation failed: {error}"), 2)
        }
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = config_file_path.as_deref().and_then(load_config_file_doc);

    let mut lines = vec!["effective config (source precedence: overrides > env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(field.key, field.env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let tariff = &config.tariff_service;
    let password = tariff.password.as_ref().map(|secret| redact(secret.expose_secret())).unwrap_or_else(unset);

    vec![
        Field::new("database.url", Some("LANDCOST_DATABASE_URL"), config.database.url.clone()),
        Field::new(
            "database.max_connections",
            Some("LANDCOST_DATABASE_MAX_CONNECTIONS"),
            config.database.max_connections.to_string(),
        ),
        Field::new("database.timeout_secs", Some("LANDCOST_DATABASE_TIMEOUT_SECS"), config.database.timeout_secs.to_string()),
        Field::new("tariff_service.base_url", Some("LANDCOST_TARIFF_BASE_URL"), tariff.base_url.clone().unwrap_or_else(unset)),
        Field::new("tariff_service.username", Some("LANDCOST_TARIFF_USERNAME"), tariff.username.clone().unwrap_or_else(unset)),
        Field::new("tariff_service.password", Some("LANDCOST_TARIFF_PASSWORD"), password),
        Field::new("tariff_service.cache_dir", Some("LANDCOST_TARIFF_CACHE_DIR"), tariff.cache_dir.display().to_string()),
        Field::new("tariff_service.cache_ttl_days", Some("LANDCOST_TARIFF_CACHE_TTL_DAYS"), tariff.cache_ttl_days.to_string()),
        Field::new(
            "tariff_service.request_timeout_secs",
            Some("LANDCOST_TARIFF_TIMEOUT_SECS"),
            tariff.request_timeout_secs.to_string(),
        ),
        Field::new(
            "tariff_service.headless_browser",
            Some("LANDCOST_TARIFF_HEADLESS_BROWSER"),
            tariff.headless_browser.as_ref().map(|path| path.display().to_string()).unwrap_or_else(unset),
        ),
        Field::new("llm.provider", Some("LANDCOST_LLM_PROVIDER"), format!("{:?}", config.llm.provider)),
        Field::new("llm.base_url", Some("LANDCOST_LLM_BASE_URL"), config.llm.base_url.clone().unwrap_or_else(unset)),
        Field::new("llm.model", Some("LANDCOST_LLM_MODEL"), config.llm.model.clone()),
        Field::new("llm.timeout_secs", Some("LANDCOST_LLM_TIMEOUT_SECS"), config.llm.timeout_secs.to_string()),
        Field::new("fx.source", Some("LANDCOST_FX_SOURCE"), format!("{:?}", config.fx.source)),
        Field::new("fx.fixed_local_per_usd", Some("LANDCOST_FX_FIXED_RATE"), config.fx.fixed_local_per_usd.to_string()),
        Field::new("fx.url", Some("LANDCOST_FX_URL"), config.fx.url.clone().unwrap_or_else(unset)),
        Field::new("fx.json_pointer", Some("LANDCOST_FX_JSON_POINTER"), config.fx.json_pointer.clone().unwrap_or_else(unset)),
        Field::new("fx.ttl_secs", Some("LANDCOST_FX_TTL_SECS"), config.fx.ttl_secs.to_string()),
        Field::new(
            "landed_cost.insurance_pct",
            Some("LANDCOST_LANDED_COST_INSURANCE_PCT"),
            config.landed_cost.insurance_pct.to_string(),
        ),
        Field::new(
            "classification.short_query_min_score",
            None,
            config.classification.short_query_min_score.to_string(),
        ),
        Field::new("classification.long_query_min_score", None, config.classification.long_query_min_score.to_string()),
        Field::new("classification.dominance_margin", None, config.classification.dominance_margin.to_string()),
        Field::new(
            "classification.rules_path",
            Some("LANDCOST_CLASSIFICATION_RULES_PATH"),
            config
                .classification
                .rules_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<embedded>".to_string()),
        ),
        Field::new("server.bind_address", Some("LANDCOST_SERVER_BIND_ADDRESS"), config.server.bind_address.clone()),
        Field::new("server.port", Some("LANDCOST_SERVER_PORT"), config.server.port.to_string()),
        Field::new(
            "server.graceful_shutdown_secs",
            Some("LANDCOST_SERVER_GRACEFUL_SHUTDOWN_SECS"),
            config.server.graceful_shutdown_secs.to_string(),
        ),
        Field::new("logging.level", Some("LANDCOST_LOGGING_LEVEL"), config.logging.level.clone()),
        Field::new("logging.format", Some("LANDCOST_LOGGING_FORMAT"), format!("{:?}", config.logging.format)),
    ]
}

fn unset() -> String {
    "<unset>".to_string()
}

fn load_config_file_doc(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path =
                config_file_path.map(|path| path.display().to_string()).unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact(secret: &str) -> String {
    if secret.trim().is_empty() {
        "<empty>".to_string()
    } else {
        "<redacted>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact};

    #[test]
    fn nested_keys_are_found_in_the_file_document() {
        let doc: toml::Value = "[tariff_service]\nbase_url = \"https://tariffs.example.com\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "tariff_service.base_url"));
        assert!(!contains_path(&doc, "tariff_service.password"));
        assert!(!contains_path(&doc, "fx.url"));
    }

    #[test]
    fn secrets_never_render_their_value() {
        assert_eq!(redact("pw-secret-value"), "<redacted>");
        assert_eq!(redact("  "), "<empty>");
    }
}
