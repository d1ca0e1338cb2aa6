pub mod commands;

use clap::{Parser, Subcommand};
use commands::orders::OrderQuery;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "poflow",
    about = "poflow operator CLI",
    long_about = "Operate the purchase-order engine: migrations, config inspection, order listings, and smoke validation.",
    after_help = "Examples:\n  poflow migrate\n  poflow config\n  poflow orders --site modesto\n  poflow orders --id <po-id>\n  poflow smoke"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Run end-to-end readiness checks with per-check timing details")]
    Smoke,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "List purchase orders awaiting approval, every order of one site, or one order")]
    Orders {
        #[arg(long, help = "List all orders owned by this site instead of pending ones")]
        site: Option<String>,
        #[arg(long, conflicts_with = "site", help = "Show a single order by id")]
        id: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Smoke => commands::smoke::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Orders { site, id } => {
            let query = match (id.as_deref(), site.as_deref()) {
                (Some(id), _) => OrderQuery::Id(id),
                (None, Some(site)) => OrderQuery::Site(site),
                (None, None) => OrderQuery::Pending,
            };
            commands::orders::run(query)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
