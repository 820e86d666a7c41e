pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "landcost",
    about = "Landcost operator CLI",
    long_about = "Inspect readiness and configuration, manage the local tariff index, classify products and run quote dialogues.",
    after_help = "Examples:\n  landcost doctor --json\n  landcost classify \"autoelevador eléctrico 3T\"\n  landcost index search hormigonera\n  landcost quote --say \"quiero importar un ascensor\" --say \"USD 500\" --say \"10 unidades\""
)]
pub struct Cli {
    /// Emit structured logs to stderr using the configured level and format.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Validate config, database, tariff index and external service readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Inspect effective configuration values with source attribution and redaction")]
    Config,
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Classify a product description into a tariff code")]
    Classify {
        #[arg(required = true, num_args = 1.., help = "Product description")]
        text: Vec<String>,
    },
    #[command(about = "Search or seed the local tariff index")]
    Index {
        #[command(subcommand)]
        command: IndexCommand,
    },
    #[command(about = "Run a quote dialogue, interactively or from scripted messages")]
    Quote {
        #[arg(long, help = "Session id to continue; a new one is generated when omitted")]
        session: Option<String>,
        #[arg(long = "say", help = "Scripted user message; repeat for several turns")]
        messages: Vec<String>,
        #[arg(long, help = "File with one user message per line")]
        script: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
enum IndexCommand {
    #[command(about = "Full-text search over the local tariff index")]
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        #[arg(long, default_value_t = 8)]
        limit: usize,
    },
    #[command(about = "Load the bundled tariff entries into the local index")]
    Seed,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    if cli.verbose {
        commands::init_logging();
    }

    let result = match cli.command {
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Config => commands::config::run(),
        Command::Migrate => commands::migrate::run(),
        Command::Classify { text } => commands::classify::run(&text.join(" ")),
        Command::Index { command: IndexCommand::Search { query, limit } } => {
            commands::index::search(&query.join(" "), limit)
        }
        Command::Index { command: IndexCommand::Seed } => commands::index::seed(),
        Command::Quote { session, messages, script } => {
            commands::quote::run(commands::quote::QuoteOptions { session, messages, script })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
