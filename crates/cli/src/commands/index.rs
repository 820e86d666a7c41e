use landcost_core::tariff::{IndexSearchOptions, TariffIndex};
use landcost_db::{SqlTariffIndex, TariffSeedDataset};
use serde_json::json;

use crate::commands::{load_config, migrated_pool, runtime, CommandResult};

type Failure = (&'static str, String, u8);

/// Local full-text search; never reaches the tariff service.
pub fn search(query: &str, limit: usize) -> CommandResult {
    let config = match load_config("index_search") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("index_search") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let index = SqlTariffIndex::new(pool.clone());
        let options = IndexSearchOptions { limit: limit.max(1), heading_filter: None };
        let hits = index.search(query, &options).await.map_err(|error| ("index_search", error.to_string(), 5u8));
        pool.close().await;
        hits
    });

    match result {
        Ok(hits) => {
            let message = format!("{} entries match `{}`", hits.len(), query.trim());
            let entries = hits
                .iter()
                .map(|entry| json!({ "code": entry.code.as_str(), "label": entry.label, "breadcrumb": entry.breadcrumb }))
                .collect::<Vec<_>>();
            CommandResult::success_with_data("index_search", message, Some(json!(entries)))
        }
        Err((error_class, message, exit_code)) => CommandResult::failure("index_search", error_class, message, exit_code),
    }
}

/// Loads the bundled entries; re-running upserts the same rows.
pub fn seed() -> CommandResult {
    let config = match load_config("index_seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("index_seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let index = SqlTariffIndex::new(pool.clone());

        let outcome = async {
            let seeded = TariffSeedDataset::load(&index)
                .await
                .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
            let verification = TariffSeedDataset::verify(&index)
                .await
                .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
            if !verification.is_complete() {
                return Err(("seed_verification", verification_message(&verification.missing_codes), 6u8));
            }
            Ok::<_, Failure>((seeded.entries_loaded, verification.headings))
        }
        .await;

        pool.close().await;
        outcome
    });

    match result {
        Ok((entries_loaded, headings)) => CommandResult::success(
            "index_seed",
            format!("loaded {entries_loaded} tariff entries across headings {}", headings.join(", ")),
        ),
        Err((error_class, message, exit_code)) => CommandResult::failure("index_seed", error_class, message, exit_code),
    }
}

fn verification_message(missing_codes: &[String]) -> String {
    if missing_codes.is_empty() {
        "Some seed entries failed to load".to_string()
    } else {
        format!("Seed verification failed for codes: {}", missing_codes.join(", "))
    }
}
