use landcost_db::migrations;

use crate::commands::{load_config, migrated_pool, runtime, CommandResult};

pub fn run() -> CommandResult {
    execute().unwrap_or_else(|failure| failure)
}

fn execute() -> Result<CommandResult, CommandResult> {
    let config = load_config("migrate")?;
    let runtime = runtime("migrate")?;

    let applied = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let applied = migrations::applied_versions(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(applied)
    });

    match applied {
        Ok(versions) => {
            let listed = versions.iter().map(i64::to_string).collect::<Vec<_>>().join(", ");
            Ok(CommandResult::success("migrate", format!("schema at versions [{listed}]")))
        }
        Err((error_class, message, exit_code)) => Err(CommandResult::failure("migrate", error_class, message, exit_code)),
    }
}
