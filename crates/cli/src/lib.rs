pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "guardquote",
    about = "GuardQuote operator CLI",
    long_about = "Apply migrations, seed the rate catalog, inspect configuration, price requests offline, and list stored quotes.",
    after_help = "Examples:\n  guardquote migrate\n  guardquote seed --force\n  guardquote price --request event.json\n  guardquote quotes --status sent --search summit"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Store the configured or built-in rate catalog if none is stored yet")]
    Seed {
        #[arg(long, help = "Replace an existing stored catalog")]
        force: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Price a JSON pricing request against the stored catalog without saving")]
    Price {
        #[arg(long, value_name = "FILE", help = "Path to a JSON pricing request")]
        request: PathBuf,
    },
    #[command(about = "List stored quotes with optional status filter and free-text search")]
    Quotes {
        #[arg(long, help = "all, draft, sent, accepted, declined or expired")]
        status: Option<String>,
        #[arg(long, help = "Match quote number, client name, client email or service name")]
        search: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { force } => commands::seed::run(force),
        Command::Config => commands::config::run(),
        Command::Price { request } => commands::price::run(&request),
        Command::Quotes { status, search } => {
            commands::quotes::run(status.as_deref(), search.as_deref())
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
