//! `hal tasks` - list and inspect tasks

use anyhow::{bail, Result};
use clap::{Args, Subcommand};

use super::format_ts;
use crate::context::open_orchestrator;

#[derive(Args)]
pub struct TasksArgs {
    #[command(subcommand)]
    command: TasksCommand,
}

#[derive(Subcommand)]
enum TasksCommand {
    /// List recent tasks
    List {
        /// Show at most this many
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one task by id or slug
    Show { task: String },
}

pub async fn run(args: TasksArgs) -> Result<()> {
    let orchestrator = open_orchestrator()?;
    match args.command {
        TasksCommand::List { limit } => {
            let tasks = orchestrator.tasks().list(Some(limit))?;
            if tasks.is_empty() {
                println!("no tasks");
                return Ok(());
            }
            println!(
                "{:<16} {:<10} {:<10} {:<20} {}",
                "SLUG", "STATUS", "VM", "CREATED", "RESULT"
            );
            for task in tasks {
                println!(
                    "{:<16} {:<10} {:<10} {:<20} {}",
                    task.slug,
                    task.status.to_string(),
                    task.vm_id
                        .as_deref()
                        .map(|v| &v[..v.len().min(8)])
                        .unwrap_or("-"),
                    format_ts(task.created_at),
                    task.result.as_deref().unwrap_or("-"),
                );
            }
        }
        TasksCommand::Show { task } => {
            let Some(task) = orchestrator.tasks().resolve(&task)? else {
                bail!("no task matches '{task}'");
            };
            println!("id:        {}", task.id);
            println!("slug:      {}", task.slug);
            println!("repo:      {}", task.repo_url);
            println!("status:    {}", task.status);
            println!("context:   {}", task.context);
            if let Some(vm_id) = &task.vm_id {
                println!("vm:        {vm_id}");
            }
            if let Some(branch) = &task.branch {
                println!("branch:    {branch}");
            }
            if let Some(result) = &task.result {
                println!("result:    {result}");
            }
            if let Some(exit_code) = task.exit_code {
                println!("exit code: {exit_code}");
            }
            if let Some(pr_url) = &task.pr_url {
                println!("pr:        {pr_url}");
            }
            println!("created:   {}", format_ts(task.created_at));
            if let Some(started) = task.started_at {
                println!("started:   {}", format_ts(started));
            }
            if let Some(completed) = task.completed_at {
                println!("completed: {}", format_ts(completed));
            }
        }
    }
    Ok(())
}
