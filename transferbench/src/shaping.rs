//! Applies and removes bandwidth limits on targets through external commands.
//!
//! The scenario controller only talks to the [`Shaper`] capability, so tests can substitute the
//! process-based [`CommandShaper`] with a fake.

use std::fmt::Debug;
use std::process::Output;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

use crate::config::{NetworkScenario, TestTarget};

/// Errors from applying or removing a bandwidth limit.
#[derive(Debug, Error)]
pub enum ShapingError {
    /// The shaping command could not be started.
    #[error("failed to run `{command}`: {cause}")]
    Spawn {
        command: String,
        #[source]
        cause: std::io::Error,
    },

    /// The shaping command exited unsuccessfully.
    #[error("`{command}` exited with {status}: {output}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        output: String,
    },
}

/// Result type for shaping operations.
pub type ShapingResult<T = ()> = Result<T, ShapingError>;

/// The capability of constraining the network of a target.
#[async_trait::async_trait]
pub trait Shaper: Debug + Send + Sync {
    /// Applies the bandwidth limit of `scenario` to `target`.
    ///
    /// Any previous limit on the target is cleared first, making this idempotent against
    /// leftovers from a prior run. Unlimited scenarios succeed without side effects.
    async fn apply(&self, target: &TestTarget, scenario: &NetworkScenario) -> ShapingResult;

    /// Removes any bandwidth limit from `target`.
    async fn remove(&self, target: &TestTarget) -> ShapingResult;
}

/// A [`Shaper`] invoking external executables.
///
/// Limits are applied with `<bandwidthCommand> <container> <bandwidth>` and removed with
/// `<stop_command> <container>`. Both operations wait for `settle` afterwards so that the
/// network reaches a steady state before it is measured.
#[derive(Debug, Clone)]
pub struct CommandShaper {
    stop_command: String,
    settle: Duration,
}

impl CommandShaper {
    pub fn new(stop_command: impl Into<String>, settle: Duration) -> Self {
        Self {
            stop_command: stop_command.into(),
            settle,
        }
    }

    async fn run(program: &str, args: &[&str]) -> ShapingResult<Output> {
        let command = format!("{program} {}", args.join(" "));
        tracing::debug!(%command, "running shaping command");

        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|cause| ShapingError::Spawn {
                command: command.clone(),
                cause,
            })?;

        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            if text.is_empty() {
                text = String::from_utf8_lossy(&output.stdout).trim().to_owned();
            }
            return Err(ShapingError::Failed {
                command,
                status: output.status,
                output: text,
            });
        }

        Ok(output)
    }

    async fn stop(&self, target: &TestTarget) -> ShapingResult {
        Self::run(&self.stop_command, &[target.container.as_str()]).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Shaper for CommandShaper {
    async fn apply(&self, target: &TestTarget, scenario: &NetworkScenario) -> ShapingResult {
        let Some(limit) = scenario.bandwidth.as_limit() else {
            tracing::info!(scenario = %scenario.name, "no bandwidth limit");
            return Ok(());
        };

        if let Err(err) = self.stop(target).await {
            tracing::debug!(
                error = &err as &dyn std::error::Error,
                "clearing previous limit failed"
            );
        }

        Self::run(&scenario.bandwidth_command, &[target.container.as_str(), limit]).await?;
        tracing::info!(container = %target.container, limit, "applied bandwidth limit");

        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    async fn remove(&self, target: &TestTarget) -> ShapingResult {
        let result = self.stop(target).await;
        if result.is_ok() {
            tracing::info!(container = %target.container, "removed bandwidth limit");
        }

        tokio::time::sleep(self.settle).await;
        result
    }
}
