//! `hal run` - submit a task and wait for its terminal state

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use hal_core::store::TaskStatus;
use hal_core::ExecOptions;

use crate::context::open_orchestrator;

#[derive(Args)]
pub struct RunArgs {
    /// Repository to clone onto the VM
    pub repo_url: String,

    /// Instructions for the agent
    pub context: String,

    /// Built-in agent to use (claude, codex)
    #[arg(long)]
    pub agent: Option<String>,

    /// Feature branch name (default: hal/<task-id>)
    #[arg(long)]
    pub branch: Option<String>,

    /// Skip looking for a pull request afterwards
    #[arg(long)]
    pub no_pr: bool,

    /// Run the agent twice: plan, reset, execute
    #[arg(long)]
    pub plan_first: bool,

    /// Agent wall-clock budget in seconds
    #[arg(long)]
    pub timeout_s: Option<u64>,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let orchestrator = open_orchestrator()?;
    let opts = ExecOptions {
        agent: args.agent,
        branch: args.branch,
        no_pr: args.no_pr,
        plan_first: args.plan_first,
        timeout: args.timeout_s.map(Duration::from_secs),
    };

    let task = orchestrator
        .run_task(&args.repo_url, &args.context, opts)
        .await?;

    println!("task {} ({})", task.slug, task.id);
    println!("status: {}", task.status);
    if let Some(result) = &task.result {
        println!("result: {result}");
    }
    if let Some(pr_url) = &task.pr_url {
        println!("pr: {pr_url}");
    }
    if task.status != TaskStatus::Completed {
        std::process::exit(1);
    }
    Ok(())
}
