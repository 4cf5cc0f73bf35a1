//! Switching the attached display on and off by running configured commands

use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::info;

use crate::config::DisplayConfig;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DisplayAction {
    On,
    Off,
}

#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("no command configured for display {0}")]
    NotConfigured(DisplayAction),

    #[error("failed to run '{command}': {error}")]
    Spawn {
        command: String,
        #[source]
        error: std::io::Error,
    },

    #[error("'{0}' did not finish within {1:?}")]
    Timeout(String, Duration),

    #[error("'{command}' exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

pub struct Display {
    config: DisplayConfig,
    timeout: Duration,
}

impl Display {
    pub fn new(config: DisplayConfig) -> Self {
        Self {
            config,
            timeout: COMMAND_TIMEOUT,
        }
    }

    pub async fn set(&self, action: DisplayAction) -> Result<(), DisplayError> {
        let argv = match action {
            DisplayAction::On => self.config.on_command.as_deref(),
            DisplayAction::Off => self.config.off_command.as_deref(),
        };
        let Some((program, args)) = argv.and_then(|argv| argv.split_first()) else {
            return Err(DisplayError::NotConfigured(action));
        };
        let command = argv.unwrap_or_default().join(" ");

        let child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| DisplayError::Timeout(command.clone(), self.timeout))?
            .map_err(|error| DisplayError::Spawn {
                command: command.clone(),
                error,
            })?;

        if !output.status.success() {
            return Err(DisplayError::Failed {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!("Display turned {}", action);
        Ok(())
    }
}
