use landcost_core::classify::RuleTable;
use landcost_core::config::{AppConfig, FxSourceKind, LlmProvider, LoadOptions};
use landcost_db::{connect_with_config, SqlTariffIndex};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

/// Exit code 0 unless a check failed; skipped optional services do not fail the report.
pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Fail { 6 } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
            )
        })
    } else {
        render_human(&report)
    };
    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.extend(check_storage(&config));
            checks.push(check_rules(&config));
            checks.push(check_tariff_service(&config));
            checks.push(check_llm(&config));
            checks.push(check_fx(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in ["database_connectivity", "tariff_index", "classification_rules", "tariff_service", "llm", "fx"] {
                checks.push(DoctorCheck::skipped(name, "skipped because configuration did not load"));
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_storage(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::fail("database_connectivity", format!("failed to initialize async runtime: {error}")),
                DoctorCheck::skipped("tariff_index", "skipped because the database was not reachable"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail("database_connectivity", format!("failed to connect to database: {error}")),
                    DoctorCheck::skipped("tariff_index", "skipped because the database was not reachable"),
                ];
            }
        };
        let connectivity = DoctorCheck::pass("database_connectivity", format!("connected using `{}`", config.database.url));

        let index = match SqlTariffIndex::new(pool.clone()).count().await {
            Ok(0) => DoctorCheck::fail("tariff_index", "tariff index is empty (run `landcost index seed`)"),
            Ok(count) => DoctorCheck::pass("tariff_index", format!("{count} entries indexed")),
            Err(error) => DoctorCheck::fail(
                "tariff_index",
                format!("tariff index unavailable (run `landcost migrate`): {error}"),
            ),
        };
        pool.close().await;
        vec![connectivity, index]
    })
}

fn check_rules(config: &AppConfig) -> DoctorCheck {
    match RuleTable::load(config.classification.rules_path.as_deref()) {
        Ok(rules) => {
            let origin = match &config.classification.rules_path {
                Some(path) => path.display().to_string(),
                None => "embedded".to_string(),
            };
            DoctorCheck::pass("classification_rules", format!("{} heading rules from {origin}", rules.headings().len()))
        }
        Err(error) => DoctorCheck::fail("classification_rules", error.to_string()),
    }
}

fn check_tariff_service(config: &AppConfig) -> DoctorCheck {
    match &config.tariff_service.base_url {
        Some(base_url) => DoctorCheck::pass(
            "tariff_service",
            format!(
                "configured at `{base_url}`, detail cache in `{}`",
                config.tariff_service.cache_dir.display()
            ),
        ),
        None => DoctorCheck::skipped("tariff_service", "not configured; quotes use reference rates"),
    }
}

fn check_llm(config: &AppConfig) -> DoctorCheck {
    match config.llm.provider {
        LlmProvider::Disabled => {
            DoctorCheck::skipped("llm", "disabled; classification uses the local index and rules only")
        }
        LlmProvider::Ollama => DoctorCheck::pass(
            "llm",
            format!(
                "ollama model `{}` at `{}` (not contacted)",
                config.llm.model,
                config.llm.base_url.as_deref().unwrap_or("<unset>")
            ),
        ),
    }
}

fn check_fx(config: &AppConfig) -> DoctorCheck {
    match config.fx.source {
        FxSourceKind::Fixed => {
            DoctorCheck::pass("fx", format!("fixed rate {} local per USD", config.fx.fixed_local_per_usd))
        }
        FxSourceKind::Http => DoctorCheck::pass(
            "fx",
            format!(
                "http source `{}`, fallback {} local per USD",
                config.fx.url.as_deref().unwrap_or("<unset>"),
                config.fx.fallback_local_per_usd
            ),
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
