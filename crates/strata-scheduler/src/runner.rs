//! What it means to execute an operation.

use crate::operation::OperationContext;
use crate::{Result, SchedulerError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::process::Command;
use tracing::{debug, info};

/// Executes a single operation.
///
/// Returning an error marks the operation as failed; its consumers are
/// skipped and unrelated operations continue.
#[async_trait]
pub trait OperationRunner: Send + Sync {
    /// Run the operation described by `context`.
    ///
    /// # Errors
    /// Returns [`SchedulerError::OperationFailed`] or any other error describing why the operation failed.
    async fn run(&self, context: &OperationContext) -> Result<()>;
}

/// Runs a shell command per phase in the project folder.
///
/// Phases without a command succeed without doing anything.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    commands: HashMap<String, String>,
}

impl CommandRunner {
    /// Create a runner with no commands.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `command` for `phase`.
    #[must_use]
    pub fn with_command(mut self, phase: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.insert(phase.into(), command.into());
        self
    }

    fn shell(command: &str) -> Command {
        if cfg!(windows) {
            let mut shell = Command::new("cmd");
            shell.arg("/C").arg(command);
            shell
        } else {
            let mut shell = Command::new("sh");
            shell.arg("-c").arg(command);
            shell
        }
    }
}

#[async_trait]
impl OperationRunner for CommandRunner {
    async fn run(&self, context: &OperationContext) -> Result<()> {
        let Some(command) = self.commands.get(&context.phase) else {
            debug!(operation = %context.name, "no command for phase");
            return Ok(());
        };

        info!(operation = %context.name, command = %command, "running");
        let output = Self::shell(command)
            .current_dir(&context.working_directory)
            .envs(&context.environment)
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(SchedulerError::OperationFailed {
                operation: context.name.clone(),
                message: format!(
                    "`{command}` exited with {}: {}",
                    output.status,
                    stderr.trim()
                ),
            })
        }
    }
}
