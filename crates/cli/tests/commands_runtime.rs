use std::env;
use std::sync::{Mutex, OnceLock};

use landcost_cli::commands::quote::QuoteOptions;
use landcost_cli::commands::{classify, config, doctor, index, migrate, quote};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("LANDCOST_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or_default().contains("schema at versions"));
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_env() {
    with_env(&[("LANDCOST_LOG_FORMAT", "xml")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn index_seed_is_idempotent_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("landcost.db").display());

    with_env(&[("LANDCOST_DATABASE_URL", url.as_str())], || {
        let first = index::seed();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "index_seed");
        assert!(first_payload["message"].as_str().unwrap_or_default().contains("8428"));

        let second = index::seed();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        assert_eq!(first_payload["message"], parse_payload(&second.output)["message"]);
    });
}

#[test]
fn index_search_finds_seeded_entries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("landcost.db").display());

    with_env(&[("LANDCOST_DATABASE_URL", url.as_str())], || {
        assert_eq!(index::seed().exit_code, 0);

        let result = index::search("hormigoneras", 5);
        assert_eq!(result.exit_code, 0);
        let payload = parse_payload(&result.output);
        let entries = payload["data"].as_array().expect("entries");
        assert!(entries.iter().any(|entry| entry["code"] == "8474.31.00"));
    });
}

#[test]
fn doctor_passes_after_migrate_and_seed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("landcost.db").display());

    with_env(&[("LANDCOST_DATABASE_URL", url.as_str()), ("LANDCOST_LLM_PROVIDER", "disabled")], || {
        let before = doctor::run(true);
        let report: Value = serde_json::from_str(&before.output).expect("doctor json");
        assert_eq!(before.exit_code, 6);
        assert_eq!(check_status(&report, "database_connectivity"), "pass");
        assert_eq!(check_status(&report, "tariff_index"), "fail");

        assert_eq!(index::seed().exit_code, 0);

        let after = doctor::run(true);
        let report: Value = serde_json::from_str(&after.output).expect("doctor json");
        assert_eq!(after.exit_code, 0, "unexpected doctor report: {}", after.output);
        assert_eq!(report["overall_status"], "pass");
        assert_eq!(check_status(&report, "tariff_service"), "skipped");
        assert_eq!(check_status(&report, "llm"), "skipped");
    });
}

#[test]
fn config_redacts_tariff_password_and_attributes_env() {
    with_env(
        &[
            ("LANDCOST_TARIFF_BASE_URL", "https://tariffs.example.com"),
            ("LANDCOST_TARIFF_USERNAME", "broker"),
            ("LANDCOST_TARIFF_PASSWORD", "pw-secret-value"),
        ],
        || {
            let result = config::run();
            assert_eq!(result.exit_code, 0);
            assert!(!result.output.contains("pw-secret-value"));
            assert!(result
                .output
                .contains("- tariff_service.password = <redacted> (source: env (LANDCOST_TARIFF_PASSWORD))"));
            assert!(result.output.contains("- server.port = 8080 (source: default)"));
        },
    );
}

#[test]
fn classify_resolves_a_seeded_product() {
    with_env(&[("LANDCOST_DATABASE_URL", "sqlite::memory:"), ("LANDCOST_LLM_PROVIDER", "disabled")], || {
        let result = classify::run("ascensor");
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "classify");
        assert_eq!(payload["data"]["best_code"], "8428.10.00");
    });
}

#[test]
fn scripted_quote_reaches_a_breakdown() {
    with_env(&[("LANDCOST_DATABASE_URL", "sqlite::memory:"), ("LANDCOST_LLM_PROVIDER", "disabled")], || {
        let result = quote::run(QuoteOptions {
            session: Some("cli-test".to_string()),
            messages: vec!["quiero importar un ascensor".to_string(), "USD 500".to_string(), "10".to_string()],
            script: None,
        });
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        let turns = payload["data"].as_array().expect("transcript");
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0]["reply"]["stage"], "awaiting_price");
        assert_eq!(turns[1]["reply"]["stage"], "awaiting_quantity");
        assert_eq!(turns[2]["reply"]["stage"], "quoted");
        assert_eq!(turns[2]["reply"]["breakdown"]["quantity"], 10);
    });
}

#[test]
fn quote_reports_missing_script_file() {
    with_env(&[("LANDCOST_DATABASE_URL", "sqlite::memory:")], || {
        let result = quote::run(QuoteOptions {
            script: Some("/nonexistent/landcost-script.txt".into()),
            ..QuoteOptions::default()
        });
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "script_read");
    });
}

fn check_status<'a>(report: &'a Value, name: &str) -> &'a str {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .and_then(|check| check["status"].as_str())
        .unwrap_or("missing")
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "LANDCOST_DATABASE_URL",
        "LANDCOST_DATABASE_MAX_CONNECTIONS",
        "LANDCOST_DATABASE_TIMEOUT_SECS",
        "LANDCOST_TARIFF_BASE_URL",
        "LANDCOST_TARIFF_USERNAME",
        "LANDCOST_TARIFF_PASSWORD",
        "LANDCOST_TARIFF_CACHE_DIR",
        "LANDCOST_TARIFF_CACHE_TTL_DAYS",
        "LANDCOST_TARIFF_TIMEOUT_SECS",
        "LANDCOST_TARIFF_HEADLESS_BROWSER",
        "LANDCOST_LLM_PROVIDER",
        "LANDCOST_LLM_BASE_URL",
        "LANDCOST_LLM_MODEL",
        "LANDCOST_LLM_TIMEOUT_SECS",
        "LANDCOST_FX_SOURCE",
        "LANDCOST_FX_FIXED_RATE",
        "LANDCOST_FX_URL",
        "LANDCOST_FX_JSON_POINTER",
        "LANDCOST_FX_TTL_SECS",
        "LANDCOST_LANDED_COST_INSURANCE_PCT",
        "LANDCOST_CLASSIFICATION_RULES_PATH",
        "LANDCOST_SERVER_BIND_ADDRESS",
        "LANDCOST_SERVER_PORT",
        "LANDCOST_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "LANDCOST_LOGGING_LEVEL",
        "LANDCOST_LOGGING_FORMAT",
        "LANDCOST_LOG_LEVEL",
        "LANDCOST_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> = keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
