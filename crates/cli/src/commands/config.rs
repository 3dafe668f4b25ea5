use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use guardquote_core::config::AppConfig;
use secrecy::ExposeSecret;
use serde::Serialize;
use toml::Value;

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Serialize)]
struct ConfigField {
    key: &'static str,
    value: String,
    source: String,
}

pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields = effective_values(&config)
        .into_iter()
        .map(|(key, value, env_keys)| ConfigField {
            key,
            value,
            source: field_source(
                key,
                env_keys,
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        })
        .collect::<Vec<_>>();

    match serde_json::to_value(&fields) {
        Ok(data) => CommandResult::success_with_data(
            "config",
            "effective config (source precedence: env > file > default)",
            Some(data),
        ),
        Err(error) => CommandResult::failure("config", "serialization", error.to_string(), 3),
    }
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, &'static [&'static str])> {
    let api_key = config
        .email
        .api_key
        .as_ref()
        .map(|key| redact_key(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    vec![
        entry("database.url", config.database.url.clone(), &["GUARDQUOTE_DATABASE_URL"]),
        entry(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["GUARDQUOTE_DATABASE_MAX_CONNECTIONS"],
        ),
        entry(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["GUARDQUOTE_DATABASE_TIMEOUT_SECS"],
        ),
        entry(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["GUARDQUOTE_SERVER_BIND_ADDRESS"],
        ),
        entry("server.port", config.server.port.to_string(), &["GUARDQUOTE_SERVER_PORT"]),
        entry(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["GUARDQUOTE_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        entry(
            "email.provider",
            config.email.provider.as_str().to_string(),
            &["GUARDQUOTE_EMAIL_PROVIDER"],
        ),
        entry("email.api_key", api_key, &["GUARDQUOTE_EMAIL_API_KEY"]),
        entry(
            "email.from_address",
            config.email.from_address.clone(),
            &["GUARDQUOTE_EMAIL_FROM_ADDRESS"],
        ),
        entry(
            "email.company_name",
            config.email.company_name.clone(),
            &["GUARDQUOTE_EMAIL_COMPANY_NAME"],
        ),
        entry(
            "email.admin_email",
            unset_or(config.email.admin_email.as_deref()),
            &["GUARDQUOTE_EMAIL_ADMIN_EMAIL"],
        ),
        entry(
            "email.notify_on_quote_created",
            config.email.notify_on_quote_created.to_string(),
            &["GUARDQUOTE_EMAIL_NOTIFY_ON_QUOTE_CREATED"],
        ),
        entry("email.domain", unset_or(config.email.domain.as_deref()), &["GUARDQUOTE_EMAIL_DOMAIN"]),
        entry(
            "email.base_url",
            unset_or(config.email.base_url.as_deref()),
            &["GUARDQUOTE_EMAIL_BASE_URL"],
        ),
        entry(
            "email.timeout_secs",
            config.email.timeout_secs.to_string(),
            &["GUARDQUOTE_EMAIL_TIMEOUT_SECS"],
        ),
        entry(
            "quotes.catalog_path",
            config
                .quotes
                .catalog_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<built-in defaults>".to_string()),
            &["GUARDQUOTE_QUOTES_CATALOG_PATH"],
        ),
        entry(
            "logging.level",
            config.logging.level.clone(),
            &["GUARDQUOTE_LOGGING_LEVEL", "GUARDQUOTE_LOG_LEVEL"],
        ),
        entry(
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["GUARDQUOTE_LOGGING_FORMAT", "GUARDQUOTE_LOG_FORMAT"],
        ),
    ]
}

fn entry(
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
) -> (&'static str, String, &'static [&'static str]) {
    (key, value, env_keys)
}

fn unset_or(value: Option<&str>) -> String {
    value.unwrap_or("<unset>").to_string()
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("guardquote.toml"), PathBuf::from("config/guardquote.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
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

/// Keeps a provider prefix such as `re_` or `SG.` so operators can tell keys apart.
fn redact_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    let prefix_end = trimmed.find(['_', '.', '-']).filter(|index| *index <= 4);
    match prefix_end {
        Some(index) => format!("{}***", &trimmed[..=index]),
        None => "<redacted>".to_string(),
    }
}
