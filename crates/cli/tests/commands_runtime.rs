use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use chrono::Utc;
use guardquote_core::cpq::builder::ServiceDetails;
use guardquote_core::cpq::catalog::RateCatalog;
use guardquote_core::cpq::pricing::{PersonnelSelection, PricingRequest};
use guardquote_core::cpq::{CpqRuntime, DeterministicCpqRuntime, DraftQuoteInput};
use guardquote_core::domain::quote::ClientDetails;
use guardquote_core::domain::service::{AddonId, ServiceId};
use guardquote_cli::commands::{config, migrate, price, quotes, seed};
use guardquote_db::{connect, migrations, QuoteRepository, SqlQuoteRepository};
use rust_decimal::Decimal;
use serde_json::Value;
use tempfile::TempDir;

const PRICING_REQUEST: &str = r#"{
    "service_id": "event-security",
    "duration_hours": "8",
    "personnel": [
        { "position_id": "agent", "count": 10 },
        { "position_id": "safety-supervisor", "count": 2 }
    ],
    "addons": ["radio"],
    "client_state": "ca"
}"#;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("GUARDQUOTE_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_without_email_api_key() {
    with_env(
        &[("GUARDQUOTE_DATABASE_URL", "sqlite::memory:"), ("GUARDQUOTE_EMAIL_PROVIDER", "sendgrid")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn seed_keeps_an_existing_catalog_unless_forced() {
    let dir = TempDir::new().expect("tempdir");
    let url = database_url(dir.path());

    with_env(&[("GUARDQUOTE_DATABASE_URL", url.as_str())], || {
        let first = parse_payload(&seed::run(false).output);
        assert_eq!(first["status"], "ok");
        assert_eq!(first["message"], "seeded rate catalog from built-in defaults");

        let second = parse_payload(&seed::run(false).output);
        assert_eq!(second["status"], "ok");
        assert_eq!(second["message"], "rate catalog already present; pass --force to replace it");

        let forced = parse_payload(&seed::run(true).output);
        assert_eq!(forced["status"], "ok");
        assert_eq!(forced["message"], "replaced rate catalog from built-in defaults");
    });
}

#[test]
fn seed_rejects_an_invalid_catalog_file() {
    let dir = TempDir::new().expect("tempdir");
    let catalog_path = dir.path().join("catalog.toml");
    let mut catalog = RateCatalog::default();
    catalog.validity_days = 0;
    fs::write(&catalog_path, toml::to_string(&catalog).expect("serialize")).expect("write");
    let catalog_path = catalog_path.display().to_string();

    with_env(
        &[
            ("GUARDQUOTE_DATABASE_URL", "sqlite::memory:"),
            ("GUARDQUOTE_QUOTES_CATALOG_PATH", catalog_path.as_str()),
        ],
        || {
            let result = seed::run(false);
            assert_eq!(result.exit_code, 5);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "seed");
            assert_eq!(payload["error_class"], "catalog_validation");
        },
    );
}

#[test]
fn price_itemizes_a_request_against_the_default_catalog() {
    let dir = TempDir::new().expect("tempdir");
    let request_path = dir.path().join("request.json");
    fs::write(&request_path, PRICING_REQUEST).expect("write request");

    with_env(&[("GUARDQUOTE_DATABASE_URL", "sqlite::memory:")], || {
        let result = price::run(&request_path);
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "price");
        assert_eq!(payload["data"]["display"]["subtotal"], "$3,605.00");
        assert_eq!(payload["data"]["display"]["total"], "$3,866.36");
        assert_eq!(payload["data"]["breakdown"]["tax_source"], "state");
        assert_eq!(payload["data"]["breakdown"]["personnel_lines"].as_array().map(Vec::len), Some(2));

        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.starts_with("Event Security for "), "unexpected message: {message}");
        assert!(message.ends_with("total $3,866.36"), "unexpected message: {message}");
    });
}

#[test]
fn price_reports_unknown_positions_as_pricing_failures() {
    let dir = TempDir::new().expect("tempdir");
    let request_path = dir.path().join("request.json");
    fs::write(&request_path, PRICING_REQUEST.replace("safety-supervisor", "sniper"))
        .expect("write request");

    with_env(&[("GUARDQUOTE_DATABASE_URL", "sqlite::memory:")], || {
        let result = price::run(&request_path);
        assert_eq!(result.exit_code, 6);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "pricing");
    });
}

#[test]
fn price_rejects_unreadable_request_files() {
    let dir = TempDir::new().expect("tempdir");
    let request_path = dir.path().join("request.json");
    fs::write(&request_path, "{ not json").expect("write request");

    with_env(&[("GUARDQUOTE_DATABASE_URL", "sqlite::memory:")], || {
        let malformed = price::run(&request_path);
        assert_eq!(malformed.exit_code, 2);
        assert_eq!(parse_payload(&malformed.output)["error_class"], "invalid_request");

        let missing = price::run(&dir.path().join("missing.json"));
        assert_eq!(missing.exit_code, 2);
        assert_eq!(parse_payload(&missing.output)["error_class"], "invalid_request");
    });
}

#[test]
fn quotes_lists_filters_and_searches_stored_quotes() {
    let dir = TempDir::new().expect("tempdir");
    let url = database_url(dir.path());
    store_sample_quote(&url);

    with_env(&[("GUARDQUOTE_DATABASE_URL", url.as_str())], || {
        let all = parse_payload(&quotes::run(None, None).output);
        assert_eq!(all["status"], "ok");
        assert_eq!(all["message"], "1 quote");
        assert_eq!(all["data"][0]["client"], "Summit Events");
        assert_eq!(all["data"][0]["service"], "Event Security");
        assert_eq!(all["data"][0]["status"], "draft");
        assert_eq!(all["data"][0]["total"], "$3,866.36");

        let by_service = parse_payload(&quotes::run(Some("draft"), Some("event sec")).output);
        assert_eq!(by_service["message"], "1 quote");

        let sent_only = parse_payload(&quotes::run(Some("sent"), None).output);
        assert_eq!(sent_only["message"], "0 quotes");

        let no_match = parse_payload(&quotes::run(None, Some("acme")).output);
        assert_eq!(no_match["message"], "0 quotes");
    });
}

#[test]
fn quotes_rejects_unknown_status_filters() {
    with_env(&[("GUARDQUOTE_DATABASE_URL", "sqlite::memory:")], || {
        let result = quotes::run(Some("archived"), None);
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "invalid_filter");
    });
}

#[test]
fn config_reports_sources_and_redacts_the_email_key() {
    with_env(
        &[
            ("GUARDQUOTE_DATABASE_URL", "sqlite::memory:"),
            ("GUARDQUOTE_EMAIL_PROVIDER", "resend"),
            ("GUARDQUOTE_EMAIL_API_KEY", "re_live_0123456789"),
        ],
        || {
            let result = config::run();
            assert_eq!(result.exit_code, 0);
            assert!(!result.output.contains("0123456789"), "api key leaked: {}", result.output);

            let payload = parse_payload(&result.output);
            let fields = payload["data"].as_array().cloned().unwrap_or_default();
            let field = |key: &str| {
                fields.iter().find(|field| field["key"] == key).cloned().unwrap_or(Value::Null)
            };

            assert_eq!(field("email.api_key")["value"], "re_***");
            assert_eq!(field("email.api_key")["source"], "env (GUARDQUOTE_EMAIL_API_KEY)");
            assert_eq!(field("email.provider")["value"], "resend");
            assert_eq!(field("server.port")["source"], "default");
            assert_eq!(field("logging.format")["value"], "compact");
        },
    );
}

fn store_sample_quote(url: &str) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime should build");

    runtime.block_on(async {
        let pool = connect(url).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let catalog = RateCatalog::default();
        let request = PricingRequest {
            service_id: ServiceId::new("event-security"),
            duration_hours: Decimal::from(8),
            personnel: vec![
                PersonnelSelection::new("agent", 10),
                PersonnelSelection::new("safety-supervisor", 2),
            ],
            addons: vec![AddonId::new("radio")],
            client_state: "CA".to_string(),
            tax_rate_override: None,
        };
        let draft = DeterministicCpqRuntime::default()
            .draft_quote(DraftQuoteInput {
                catalog: &catalog,
                request: &request,
                client: ClientDetails {
                    name: "Summit Events".to_string(),
                    email: "events@summit.test".to_string(),
                    phone: "555-0100".to_string(),
                    state: "CA".to_string(),
                },
                service: ServiceDetails::default(),
                sequence: 1,
                created_at: Utc::now(),
            })
            .expect("draft");

        SqlQuoteRepository::new(pool.clone()).insert(draft.quote).await.expect("insert");
        pool.close().await;
    });
}

fn database_url(dir: &Path) -> String {
    format!("sqlite://{}", dir.join("guardquote.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "GUARDQUOTE_DATABASE_URL",
        "GUARDQUOTE_DATABASE_MAX_CONNECTIONS",
        "GUARDQUOTE_DATABASE_TIMEOUT_SECS",
        "GUARDQUOTE_SERVER_BIND_ADDRESS",
        "GUARDQUOTE_SERVER_PORT",
        "GUARDQUOTE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "GUARDQUOTE_EMAIL_PROVIDER",
        "GUARDQUOTE_EMAIL_API_KEY",
        "GUARDQUOTE_EMAIL_FROM_ADDRESS",
        "GUARDQUOTE_EMAIL_COMPANY_NAME",
        "GUARDQUOTE_EMAIL_ADMIN_EMAIL",
        "GUARDQUOTE_EMAIL_NOTIFY_ON_QUOTE_CREATED",
        "GUARDQUOTE_EMAIL_DOMAIN",
        "GUARDQUOTE_EMAIL_BASE_URL",
        "GUARDQUOTE_EMAIL_TIMEOUT_SECS",
        "GUARDQUOTE_QUOTES_CATALOG_PATH",
        "GUARDQUOTE_LOGGING_LEVEL",
        "GUARDQUOTE_LOGGING_FORMAT",
        "GUARDQUOTE_LOG_LEVEL",
        "GUARDQUOTE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

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
