//! `hal logs` - tail a task's log file
//!
//! Tails stop at the done sentinel; detaching a tail never affects
//! the remote agent.

use std::io::Write;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;
use hal_core::LogTail;

use crate::context::open_orchestrator;

#[derive(Args)]
pub struct LogsArgs {
    /// Task id or slug
    pub task: String,

    /// Keep following until the task finishes
    #[arg(short, long)]
    pub follow: bool,
}

pub async fn run(args: LogsArgs) -> Result<()> {
    let orchestrator = open_orchestrator()?;
    let Some(task) = orchestrator.tasks().resolve(&args.task)? else {
        bail!("no task matches '{}'", args.task);
    };

    let path = hal_paths::data_dir()
        .join("logs")
        .join(format!("{}.log", task.id));
    let mut tail = LogTail::new(path);
    let mut stdout = std::io::stdout();

    loop {
        while let Some(chunk) = tail.read_next()? {
            stdout.write_all(&chunk)?;
            stdout.flush()?;
        }
        if tail.is_finished() || !args.follow {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    Ok(())
}
