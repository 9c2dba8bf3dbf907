use std::path::PathBuf;

use aer_config::LaunchDescription;
use aer_launch::{LaunchPlan, Supervisor, DEFAULT_PROGRAM};
use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::args::LaunchArgs;
use crate::stop_signal;

pub async fn run_launch(args: LaunchArgs) -> Result<()> {
    let description = LaunchDescription::load(&args.config)
        .with_context(|| format!("failed to load launch description {}", args.config))?;
    let plan = LaunchPlan::from_description(&description, default_program())?;

    if args.dry_run {
        for process in plan.processes() {
            println!("{}", process.command_line());
        }
        return Ok(());
    }

    info!(config = %args.config, processes = plan.processes().len(), "launching");
    let mut supervisor = Supervisor::launch(&plan).await?;

    // Exits after launch are reported, not restarted; only a stop signal ends the launch.
    let stop = stop_signal();
    tokio::pin!(stop);
    loop {
        tokio::select! {
            signal = &mut stop => {
                signal?;
                info!("stop requested, shutting down");
                break;
            }
            Some(record) = supervisor.wait_any() => {
                warn!(
                    instance = %record.instance,
                    outcome = ?record.outcome,
                    remaining = supervisor.len(),
                    "process exited"
                );
            }
        }
    }

    for record in supervisor.shutdown().await {
        info!(instance = %record.instance, outcome = ?record.outcome, "stopped");
    }
    Ok(())
}

/// The running executable, so launched roles match the launcher build.
fn default_program() -> PathBuf {
    std::env::current_exe().unwrap_or_else(|_| PathBuf::from(DEFAULT_PROGRAM))
}
