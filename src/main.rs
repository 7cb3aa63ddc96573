//! chaff binary entry point.

use anyhow::Result;
use clap::{Parser, Subcommand};

use chaff_runtime::cli;

#[derive(Parser)]
#[command(name = "chaff", version, about = "Decoy browsing traffic daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Suppress non-essential output.
    #[arg(long, global = true)]
    quiet: bool,

    /// Emit machine-readable JSON where supported.
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon in the foreground.
    Start,
    /// Stop the running daemon.
    Stop,
    /// Stop and start the daemon in one step.
    Restart,
    /// Show scheduler, session pool, and discovery state.
    Status,
    /// Show traffic counters.
    Stats {
        /// Zero the counters before showing them.
        #[arg(long)]
        reset: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The output helpers read these so every subcommand sees the same flags.
    if cli.quiet {
        std::env::set_var("CHAFF_QUIET", "1");
    }
    if cli.json {
        std::env::set_var("CHAFF_JSON", "1");
    }
    if cli.no_color {
        std::env::set_var("CHAFF_NO_COLOR", "1");
    }

    match cli.command {
        Command::Start => cli::start::run().await,
        Command::Stop => cli::stop::run().await,
        Command::Restart => cli::restart_cmd::run().await,
        Command::Status => cli::status::run().await,
        Command::Stats { reset } => cli::stats_cmd::run(reset).await,
    }
}
