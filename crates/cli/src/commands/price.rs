use std::fs;
use std::path::Path;

use guardquote_core::cpq::pricing::{format_usd, PricingRequest};
use guardquote_core::cpq::{CpqRuntime, DeterministicCpqRuntime};
use serde_json::json;

use crate::commands::{
    load_config, open_database, runtime, stored_or_seed_catalog, CommandResult,
};

/// Prices a JSON `PricingRequest` file against the stored catalog without creating a quote.
pub fn run(request_path: &Path) -> CommandResult {
    let request = match read_request(request_path) {
        Ok(request) => request,
        Err(message) => return CommandResult::failure("price", "invalid_request", message, 2),
    };
    let config = match load_config("price") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("price") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let catalog = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let catalog = stored_or_seed_catalog(&config, &pool).await;
        pool.close().await;
        catalog
    });
    let catalog = match catalog {
        Ok(catalog) => catalog,
        Err(failure) => return CommandResult::from_step("price", failure),
    };

    let breakdown = match DeterministicCpqRuntime::default().preview(&catalog, &request) {
        Ok(breakdown) => breakdown,
        Err(error) => return CommandResult::failure("price", "pricing", error.to_string(), 6),
    };

    let message = format!(
        "{} for {}: subtotal {}, tax {}, total {}",
        catalog.service_name(&breakdown.service_id),
        request_path.display(),
        format_usd(breakdown.subtotal),
        format_usd(breakdown.tax_amount),
        format_usd(breakdown.total),
    );
    let data = json!({
        "breakdown": breakdown,
        "display": {
            "subtotal": format_usd(breakdown.subtotal),
            "tax_amount": format_usd(breakdown.tax_amount),
            "total": format_usd(breakdown.total),
        },
    });
    CommandResult::success_with_data("price", message, Some(data))
}

fn read_request(path: &Path) -> Result<PricingRequest, String> {
    let raw = fs::read_to_string(path)
        .map_err(|error| format!("could not read `{}`: {error}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|error| format!("could not parse `{}`: {error}", path.display()))
}
