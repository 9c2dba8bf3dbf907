use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::{LaunchError, LaunchPlan, ProcessDescriptor};

const EXIT_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exit code, `None` when the process ended by signal.
    Exited(Option<i32>),
    /// Ignored the stop request and was killed.
    Killed,
    /// Still running after the stop timeout.
    Unresponsive,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExitRecord {
    pub instance: String,
    pub outcome: StopOutcome,
}

struct RunningProcess {
    descriptor: ProcessDescriptor,
    child: Child,
}

/// Owns the child processes of one launch.
pub struct Supervisor {
    running: Vec<RunningProcess>,
    stop_timeout: Duration,
}

impl Supervisor {
    /// Starts every process in plan order. Nothing is left running on failure.
    pub async fn launch(plan: &LaunchPlan) -> Result<Self, LaunchError> {
        let mut running = Vec::with_capacity(plan.processes().len());
        for descriptor in plan.processes() {
            match start_process(descriptor, plan.startup_grace()).await {
                Ok(child) => {
                    info!(
                        instance = %descriptor.instance,
                        role = %descriptor.kind,
                        pid = child.id().unwrap_or_default(),
                        "process started"
                    );
                    running.push(RunningProcess {
                        descriptor: descriptor.clone(),
                        child,
                    });
                }
                Err(reason) => {
                    error!(instance = %descriptor.instance, %reason, "process failed to start");
                    let teardown = stop_all(&mut running, plan.stop_timeout()).await;
                    return Err(LaunchError::Spawn {
                        instance: descriptor.instance.clone(),
                        reason,
                        teardown,
                    });
                }
            }
        }

        Ok(Self {
            running,
            stop_timeout: plan.stop_timeout(),
        })
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    pub fn instances(&self) -> Vec<&str> {
        self.running
            .iter()
            .map(|process| process.descriptor.instance.as_str())
            .collect()
    }

    /// Resolves when a process exits on its own and stops tracking it.
    pub async fn wait_any(&mut self) -> Option<ExitRecord> {
        if self.running.is_empty() {
            return None;
        }
        loop {
            for index in 0..self.running.len() {
                let outcome = match self.running[index].child.try_wait() {
                    Ok(None) => continue,
                    Ok(Some(status)) => StopOutcome::Exited(status.code()),
                    Err(err) => StopOutcome::Failed(err.to_string()),
                };
                let process = self.running.remove(index);
                warn!(instance = %process.descriptor.instance, ?outcome, "process exited");
                return Some(ExitRecord {
                    instance: process.descriptor.instance,
                    outcome,
                });
            }
            sleep(EXIT_POLL).await;
        }
    }

    /// Stops every process in reverse start order.
    pub async fn shutdown(mut self) -> Vec<ExitRecord> {
        stop_all(&mut self.running, self.stop_timeout).await
    }
}

async fn start_process(
    descriptor: &ProcessDescriptor,
    startup_grace: Duration,
) -> Result<Child, String> {
    let mut command = Command::new(&descriptor.program);
    command
        .args(&descriptor.args)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    debug!(command = %descriptor.command_line(), "spawning");

    let mut child = command
        .spawn()
        .map_err(|err| format!("{}: {err}", descriptor.program.display()))?;
    sleep(startup_grace).await;
    match child.try_wait() {
        Ok(None) => Ok(child),
        Ok(Some(status)) => Err(format!("exited during startup ({status})")),
        Err(err) => Err(err.to_string()),
    }
}

async fn stop_all(running: &mut Vec<RunningProcess>, stop_timeout: Duration) -> Vec<ExitRecord> {
    let mut records = Vec::with_capacity(running.len());
    while let Some(mut process) = running.pop() {
        let outcome = stop_process(&mut process.child, stop_timeout).await;
        info!(instance = %process.descriptor.instance, ?outcome, "process stopped");
        records.push(ExitRecord {
            instance: process.descriptor.instance,
            outcome,
        });
    }
    records
}

async fn stop_process(child: &mut Child, stop_timeout: Duration) -> StopOutcome {
    match child.try_wait() {
        Ok(Some(status)) => return StopOutcome::Exited(status.code()),
        Ok(None) => {}
        Err(err) => return StopOutcome::Failed(err.to_string()),
    }
    request_terminate(child).await;
    match timeout(stop_timeout, child.wait()).await {
        Ok(Ok(status)) => return StopOutcome::Exited(status.code()),
        Ok(Err(err)) => return StopOutcome::Failed(err.to_string()),
        Err(_) => warn!(pid = child.id().unwrap_or_default(), "stop timeout elapsed, killing"),
    }
    if let Err(err) = child.start_kill() {
        return StopOutcome::Failed(err.to_string());
    }
    match timeout(stop_timeout, child.wait()).await {
        Ok(Ok(_)) => StopOutcome::Killed,
        Ok(Err(err)) => StopOutcome::Failed(err.to_string()),
        Err(_) => StopOutcome::Unresponsive,
    }
}

/// Asks the child to stop gracefully so savers can flush.
#[cfg(unix)]
async fn request_terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let sent = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if !matches!(sent, Ok(status) if status.success()) {
        debug!(pid, "kill -TERM unavailable, killing");
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
async fn request_terminate(child: &mut Child) {
    let _ = child.start_kill();
}
