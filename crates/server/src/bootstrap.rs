use std::sync::Arc;

use guardquote_core::config::{AppConfig, ConfigError, LoadOptions};
use guardquote_core::notify::EmailError;
use guardquote_db::{
    connect_with_config, migrations, DbPool, RepositoryError, SettingsRepository,
    SqlAuditRepository, SqlQuoteRepository, SqlSettingsRepository,
};
use thiserror::Error;
use tracing::info;

use crate::email::{dispatcher_from_config, QuoteMailer};
use crate::quotes::QuoteService;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub quote_service: Arc<QuoteService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("rate catalog seeding failed: {0}")]
    CatalogSeed(String),
    #[error("email setup failed: {0}")]
    Email(#[from] EmailError),
}

impl From<RepositoryError> for BootstrapError {
    fn from(error: RepositoryError) -> Self {
        Self::CatalogSeed(error.to_string())
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
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

    let settings = Arc::new(SqlSettingsRepository::new(db_pool.clone()));
    if settings.load_rate_catalog().await?.is_none() {
        let catalog = config
            .quotes
            .seed_catalog()
            .map_err(|error| BootstrapError::CatalogSeed(error.to_string()))?;
        settings.save_rate_catalog(&catalog).await?;
        info!(
            event_name = "system.bootstrap.catalog_seeded",
            correlation_id = "bootstrap",
            source = config
                .quotes
                .catalog_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "defaults".to_string()),
            "rate catalog seeded"
        );
    }

    let dispatcher = dispatcher_from_config(&config.email)?;
    info!(
        event_name = "system.bootstrap.email_ready",
        correlation_id = "bootstrap",
        provider = dispatcher.provider(),
        "email dispatcher initialized"
    );

    let mut quote_service = QuoteService::new(
        Arc::new(SqlQuoteRepository::new(db_pool.clone())),
        settings,
        Arc::new(SqlAuditRepository::new(db_pool.clone())),
        dispatcher,
        QuoteMailer::from_config(&config.email)?,
    );
    if config.email.notify_on_quote_created {
        if let Some(admin_email) = &config.email.admin_email {
            quote_service = quote_service.with_admin_notifications(admin_email.clone());
        }
    }

    Ok(Application { config, db_pool, quote_service: Arc::new(quote_service) })
}
