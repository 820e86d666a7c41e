pub mod classify;
pub mod config;
pub mod doctor;
pub mod index;
pub mod migrate;
pub mod quote;

use landcost_core::config::{AppConfig, LoadOptions};
use landcost_db::{connect_with_config, migrations, DbPool};
use landcost_server::bootstrap::BootstrapError;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Runtime;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(command: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(command: &str, error_class: &str, message: impl Into<String>, exit_code: u8) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub(crate) fn from_bootstrap(command: &str, error: BootstrapError) -> Self {
        let (error_class, exit_code) = match &error {
            BootstrapError::Config(_) | BootstrapError::Rules(_) | BootstrapError::TariffClient(_) => {
                ("config_validation", 2)
            }
            BootstrapError::DatabaseConnect(_) => ("db_connectivity", 4),
            BootstrapError::Migration(_) => ("migration", 5),
            BootstrapError::Seed(_) => ("seed_execution", 5),
        };
        Self::failure(command, error_class, error.to_string(), exit_code)
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config(command: &str) -> Result<AppConfig, CommandResult> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(command, "config_validation", format!("configuration issue: {error}"), 2)
    })
}

pub(crate) fn runtime(command: &str) -> Result<Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(command, "runtime_init", format!("failed to initialize async runtime: {error}"), 3)
    })
}

/// Connects and applies pending migrations, the preamble of every index command.
pub(crate) async fn migrated_pool(config: &AppConfig) -> Result<DbPool, (&'static str, String, u8)> {
    let pool = connect_with_config(&config.database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;
    Ok(pool)
}

pub fn init_logging() {
    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        landcost_server::logging::init(&config.logging);
    }
}
