mod plan;
mod supervisor;

use aer_config::ConfigError;
use thiserror::Error;

pub use plan::{LaunchPlan, ProcessDescriptor, DEFAULT_PROGRAM};
pub use supervisor::{ExitRecord, StopOutcome, Supervisor};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to start {instance}: {reason}")]
    Spawn {
        instance: String,
        reason: String,
        /// Processes stopped while rolling back, in stop order.
        teardown: Vec<ExitRecord>,
    },
}
