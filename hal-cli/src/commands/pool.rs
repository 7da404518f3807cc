//! `hal pool` - inspect or repair the VM pool

use anyhow::Result;
use clap::{Args, Subcommand};

use super::format_ts;
use crate::context::open_orchestrator;

#[derive(Args)]
pub struct PoolArgs {
    #[command(subcommand)]
    command: PoolCommand,
}

#[derive(Subcommand)]
enum PoolCommand {
    /// Show every VM the store knows about
    Status,
    /// Reconcile against providers and recover in-flight tasks
    Sync,
}

pub async fn run(args: PoolArgs) -> Result<()> {
    let orchestrator = open_orchestrator()?;
    match args.command {
        PoolCommand::Status => {
            let vms = orchestrator.pool().list_vms()?;
            if vms.is_empty() {
                println!("no VMs");
                return Ok(());
            }
            println!(
                "{:<12} {:<10} {:<13} {:<16} {:<10} {}",
                "ID", "SLOT", "STATUS", "IP", "TASK", "UPDATED"
            );
            for vm in vms {
                println!(
                    "{:<12} {:<10} {:<13} {:<16} {:<10} {}",
                    vm.short_id(),
                    vm.provider,
                    vm.status.to_string(),
                    vm.ip.as_deref().unwrap_or("-"),
                    vm.task_id
                        .as_deref()
                        .map(|t| &t[..t.len().min(8)])
                        .unwrap_or("-"),
                    format_ts(vm.updated_at),
                );
            }
        }
        PoolCommand::Sync => {
            let report = orchestrator.recover().await?;
            println!(
                "reconciled: {} updated, {} destroyed; tasks: {} failed, {} resumed",
                report.reconcile.updated,
                report.reconcile.destroyed,
                report.failed,
                report.resumed
            );
        }
    }
    Ok(())
}
