pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "cartwatch",
    about = "Cartwatch operator CLI",
    long_about = "Operate the cart abandonment and scoring pipeline: migrations, demo data, \
                  ad-hoc job runs, and diagnostics.",
    after_help = "Examples:\n  cartwatch doctor --json\n  cartwatch detect\n  cartwatch score --user user-42\n  cartwatch summary"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo dataset (users, carts, abandonment history)")]
    Seed,
    #[command(about = "Run one abandonment detection sweep now")]
    Detect,
    #[command(about = "Run one reminder marking sweep now")]
    Remind,
    #[command(about = "Recompute engagement scores (all users, or one with --user)")]
    Score {
        #[arg(long, help = "Recompute a single user instead of the full batch")]
        user: Option<String>,
    },
    #[command(about = "Print the analytics rollup: score bands, averages, recovery rate")]
    Summary,
    #[command(about = "Inspect effective configuration values")]
    Config,
    #[command(about = "Validate configuration and database readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Detect => commands::detect::run(),
        Command::Remind => commands::remind::run(),
        Command::Score { user } => commands::score::run(user),
        Command::Summary => commands::summary::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
