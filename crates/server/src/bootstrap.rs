use std::sync::Arc;
use std::time::Duration;

use landcost_agent::llm::semantic_classifier_from_config;
use landcost_agent::runtime::AgentRuntime;
use landcost_agent::tools::{DefaultProductResolver, LoggingLeadCapture};
use landcost_agent::DialogueEngine;
use landcost_core::classify::{ClassificationService, ClassificationSettings, RuleTable, RuleTableError};
use landcost_core::config::{AppConfig, ConfigError, FxConfig, FxSourceKind, LoadOptions};
use landcost_core::errors::ApplicationError;
use landcost_core::fx::{ExchangeRateCache, FixedRateSource};
use landcost_core::landed::{LandedCostEngine, LandedCostSettings};
use landcost_core::tariff::{TariffDataSource, UnavailableTariffSource};
use landcost_db::{connect_with_config, migrations, DbPool, SqlSessionRepository, SqlTariffIndex, TariffSeedDataset};
use landcost_tariff::{HttpJsonRateSource, TariffClient, TariffClientError};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub index: Arc<SqlTariffIndex>,
    pub classifier: Arc<ClassificationService>,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("tariff index seeding failed: {0}")]
    Seed(#[source] ApplicationError),
    #[error("classification rules could not be loaded: {0}")]
    Rules(#[from] RuleTableError),
    #[error("tariff service client could not be built: {0}")]
    TariffClient(#[from] TariffClientError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");

    let db_pool = connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let index = Arc::new(SqlTariffIndex::new(db_pool.clone()));
    seed_if_empty(&index).await?;

    let tariff_source = tariff_source(&config, index.clone())?;
    let rules = RuleTable::load(config.classification.rules_path.as_deref())?;
    let classifier = Arc::new(ClassificationService::new(
        index.clone(),
        tariff_source.clone(),
        semantic_classifier_from_config(&config.llm),
        rules,
        ClassificationSettings::from(&config.classification),
    ));

    let landed = Arc::new(LandedCostEngine::new(
        LandedCostSettings::from(&config.landed_cost),
        Arc::new(exchange_rates(&config.fx)),
    ));
    let dialogue = DialogueEngine::new(
        classifier.clone(),
        landed,
        tariff_source,
        Arc::new(DefaultProductResolver::default()),
        Arc::new(LoggingLeadCapture),
    );
    let sessions = Arc::new(SqlSessionRepository::new(db_pool.clone()));
    let runtime = Arc::new(AgentRuntime::new(sessions, dialogue));

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        tariff_service = config.tariff_service.is_enabled(),
        llm_provider = ?config.llm.provider,
        fx_source = ?config.fx.source,
        "application assembled"
    );

    Ok(Application { config, db_pool, index, classifier, runtime })
}

/// Loads the bundled tariff entries into an empty index so classification works offline.
async fn seed_if_empty(index: &Arc<SqlTariffIndex>) -> Result<(), BootstrapError> {
    let count = index.count().await.map_err(|error| BootstrapError::Seed(error.into()))?;
    if count > 0 {
        return Ok(());
    }
    let seeded = TariffSeedDataset::load(index.as_ref()).await.map_err(BootstrapError::Seed)?;
    info!(
        event_name = "system.bootstrap.index_seeded",
        correlation_id = "bootstrap",
        entries = seeded.entries_loaded,
        "empty tariff index seeded"
    );
    Ok(())
}

fn tariff_source(
    config: &AppConfig,
    index: Arc<SqlTariffIndex>,
) -> Result<Arc<dyn TariffDataSource>, TariffClientError> {
    if !config.tariff_service.is_enabled() {
        info!(
            event_name = "system.bootstrap.tariff_service_disabled",
            correlation_id = "bootstrap",
            "tariff service not configured; quotes use reference rates"
        );
        return Ok(Arc::new(UnavailableTariffSource));
    }
    let client = TariffClient::from_config(&config.tariff_service)?.with_index(index);
    Ok(Arc::new(client))
}

fn exchange_rates(config: &FxConfig) -> ExchangeRateCache {
    let ttl = Duration::from_secs(config.ttl_secs);
    let fixed = || {
        ExchangeRateCache::new(
            Arc::new(FixedRateSource::new(config.fixed_local_per_usd)),
            ttl,
            config.fallback_local_per_usd,
        )
    };
    match config.source {
        FxSourceKind::Fixed => fixed(),
        FxSourceKind::Http => match HttpJsonRateSource::from_config(config) {
            Some(source) => ExchangeRateCache::new(Arc::new(source), ttl, config.fallback_local_per_usd),
            None => {
                warn!(
                    event_name = "system.bootstrap.fx_source_incomplete",
                    correlation_id = "bootstrap",
                    "fx source `http` needs url and json_pointer; using the fixed rate"
                );
                fixed()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use landcost_agent::turn::TurnRequest;
    use landcost_core::config::{ConfigOverrides, LlmProvider, LoadOptions};
    use landcost_core::flows::FlowState;

    use crate::bootstrap::bootstrap;

    fn in_memory(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                llm_provider: Some(LlmProvider::Disabled),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_when_tariff_credentials_are_missing() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                tariff_base_url: Some("https://tariffs.example.com".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("tariff_service.username"));
    }

    #[tokio::test]
    async fn bootstrap_seeds_the_index_and_serves_a_turn() {
        let app = bootstrap(in_memory("sqlite::memory:")).await.expect("bootstrap should succeed");

        let (tables,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('quote_sessions', 'tariff_index')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("tables");
        assert_eq!(tables, 2);
        assert!(app.index.count().await.expect("count") > 0);

        let reply = app.runtime.handle_turn(TurnRequest::new("boot-1", "quiero importar un ascensor")).await;
        assert_eq!(reply.stage, FlowState::AwaitingPrice);
        assert!(reply.assistant_text.contains("8428.10.00"));

        app.db_pool.close().await;
    }
}
