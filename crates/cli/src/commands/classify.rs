use landcost_server::bootstrap::bootstrap_with_config;

use crate::commands::{load_config, runtime, CommandResult};

/// Classifies `text` with the same pipeline the dialogue uses.
pub fn run(text: &str) -> CommandResult {
    execute(text).unwrap_or_else(|failure| failure)
}

fn execute(text: &str) -> Result<CommandResult, CommandResult> {
    if text.trim().is_empty() {
        return Err(CommandResult::failure("classify", "invalid_input", "product description is empty", 2));
    }
    let config = load_config("classify")?;
    let runtime = runtime("classify")?;

    runtime.block_on(async {
        let app = bootstrap_with_config(config)
            .await
            .map_err(|error| CommandResult::from_bootstrap("classify", error))?;
        let result = app.classifier.classify(text).await;
        app.db_pool.close().await;

        let message = match (&result.best_code, result.ambiguous) {
            (Some(code), _) => format!("classified as {code} (confidence {:.2})", result.confidence),
            (None, true) => format!("ambiguous across {} candidates", result.candidates.len()),
            (None, false) => "no confident classification; reference rates apply".to_string(),
        };
        let data = serde_json::to_value(&result).map_err(|error| {
            CommandResult::failure("classify", "serialization", error.to_string(), 1)
        })?;
        Ok(CommandResult::success_with_data("classify", message, Some(data)))
    })
}
