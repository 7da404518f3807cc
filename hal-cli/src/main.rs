use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod context;

#[derive(Parser)]
#[command(name = "hal", about = "Autonomous coding agents on disposable VMs")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task and wait for it to finish
    Run(commands::run::RunArgs),
    /// Inspect or repair the VM pool
    Pool(commands::pool::PoolArgs),
    /// List and inspect tasks
    Tasks(commands::tasks::TasksArgs),
    /// Tail a task's log
    Logs(commands::logs::LogsArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Pool(args) => commands::pool::run(args).await,
        Commands::Tasks(args) => commands::tasks::run(args).await,
        Commands::Logs(args) => commands::logs::run(args).await,
    }
}
