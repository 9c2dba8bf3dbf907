use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use aer_config::{LaunchDescription, RoleKind};

use crate::LaunchError;

/// Role program used when neither the launcher nor the role names one.
pub const DEFAULT_PROGRAM: &str = "aercomm";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessDescriptor {
    pub instance: String,
    pub kind: RoleKind,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ProcessDescriptor {
    /// Printable command line; arguments with whitespace are quoted.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                let _ = write!(line, " {arg:?}");
            } else {
                let _ = write!(line, " {arg}");
            }
        }
        line
    }
}

/// Ordered processes of one launch, hub first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchPlan {
    processes: Vec<ProcessDescriptor>,
    startup_grace: Duration,
    stop_timeout: Duration,
}

impl LaunchPlan {
    pub fn new(
        processes: Vec<ProcessDescriptor>,
        startup_grace: Duration,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            processes,
            startup_grace,
            stop_timeout,
        }
    }

    pub fn from_description(
        description: &LaunchDescription,
        default_program: impl Into<PathBuf>,
    ) -> Result<Self, LaunchError> {
        let launcher = description.launcher();
        let role_program = if launcher.program.trim().is_empty() {
            default_program.into()
        } else {
            PathBuf::from(launcher.program.trim())
        };

        let processes = description
            .roles()
            .iter()
            .map(|role| {
                let flags = role.render_flags();
                let (program, args) = match role.program() {
                    Some(custom) => (PathBuf::from(custom), flags),
                    None => {
                        let mut args = vec![role.kind().subcommand().to_string()];
                        args.extend(flags);
                        (role_program.clone(), args)
                    }
                };
                ProcessDescriptor {
                    instance: role.name().to_string(),
                    kind: role.kind(),
                    program,
                    args,
                }
            })
            .collect();

        Ok(Self::new(
            processes,
            launcher.startup_grace_duration()?,
            launcher.stop_timeout_duration()?,
        ))
    }

    pub fn processes(&self) -> &[ProcessDescriptor] {
        &self.processes
    }

    pub fn startup_grace(&self) -> Duration {
        self.startup_grace
    }

    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }
}
