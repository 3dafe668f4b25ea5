use guardquote_db::{SettingsRepository, SqlSettingsRepository};

use crate::commands::{load_config, open_database, runtime, CommandResult};

/// Stores the rate catalog from `quotes.catalog_path`, or the built-in defaults. An existing
/// catalog is kept unless `force` is set.
pub fn run(force: bool) -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let catalog = match config.quotes.seed_catalog() {
        Ok(catalog) => catalog,
        Err(error) => {
            return CommandResult::failure("seed", "catalog_validation", error.to_string(), 5);
        }
    };
    let source = config
        .quotes
        .catalog_path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "built-in defaults".to_string());
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let settings = SqlSettingsRepository::new(pool.clone());

        let existing = settings
            .load_rate_catalog()
            .await
            .map_err(|error| ("catalog_load", error.to_string(), 5u8))?;
        let outcome = if existing.is_some() && !force {
            SeedOutcome::Kept
        } else {
            settings
                .save_rate_catalog(&catalog)
                .await
                .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
            if existing.is_some() {
                SeedOutcome::Replaced
            } else {
                SeedOutcome::Seeded
            }
        };

        pool.close().await;
        Ok(outcome)
    });

    match result {
        Ok(SeedOutcome::Seeded) => {
            CommandResult::success("seed", format!("seeded rate catalog from {source}"))
        }
        Ok(SeedOutcome::Replaced) => {
            CommandResult::success("seed", format!("replaced rate catalog from {source}"))
        }
        Ok(SeedOutcome::Kept) => CommandResult::success(
            "seed",
            "rate catalog already present; pass --force to replace it",
        ),
        Err(failure) => CommandResult::from_step("seed", failure),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeedOutcome {
    Seeded,
    Replaced,
    Kept,
}
