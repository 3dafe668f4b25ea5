use chrono::Utc;
use guardquote_core::cpq::board::{filter_by_status, search, StatusFilter};
use guardquote_core::cpq::pricing::format_usd;
use guardquote_db::{QuoteRepository, SqlQuoteRepository};
use serde::Serialize;

use crate::commands::{
    load_config, open_database, runtime, stored_or_seed_catalog, CommandResult,
};

#[derive(Debug, Serialize)]
struct QuoteRow {
    quote_number: String,
    client: String,
    service: String,
    status: String,
    total: String,
    valid_until: String,
}

/// Lists stored quotes, newest first, with the same status filter and search as the board.
pub fn run(status: Option<&str>, term: Option<&str>) -> CommandResult {
    let filter = match status.unwrap_or_default().parse::<StatusFilter>() {
        Ok(filter) => filter,
        Err(error) => return CommandResult::failure("quotes", "invalid_filter", error.to_string(), 2),
    };
    let config = match load_config("quotes") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("quotes") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let loaded = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let catalog = stored_or_seed_catalog(&config, &pool).await;
        let quotes = SqlQuoteRepository::new(pool.clone())
            .list()
            .await
            .map_err(|error| ("quote_load", error.to_string(), 4u8));
        pool.close().await;
        Ok((catalog?, quotes?))
    });
    let (catalog, quotes) = match loaded {
        Ok(loaded) => loaded,
        Err(failure) => return CommandResult::from_step("quotes", failure),
    };

    let today = Utc::now().date_naive();
    let matching = filter_by_status(&quotes, filter, today);
    let matching = search(&matching, &catalog, term.unwrap_or_default());
    let rows = matching
        .iter()
        .map(|quote| QuoteRow {
            quote_number: quote.quote_number.to_string(),
            client: quote.client.name.clone(),
            service: catalog.service_name(&quote.service_id).to_string(),
            status: quote.effective_status(today).to_string(),
            total: format_usd(quote.pricing.total),
            valid_until: quote.valid_until.to_string(),
        })
        .collect::<Vec<_>>();

    let message = match rows.len() {
        1 => "1 quote".to_string(),
        count => format!("{count} quotes"),
    };
    match serde_json::to_value(&rows) {
        Ok(data) => CommandResult::success_with_data("quotes", message, Some(data)),
        Err(error) => CommandResult::failure("quotes", "serialization", error.to_string(), 3),
    }
}
