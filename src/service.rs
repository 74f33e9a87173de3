use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::process::{ProcessRunner, command_line};

pub const SERVICE_MANAGER: &str = "systemctl";

/// What an operator sees after a service action, whatever the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReport {
    pub service: String,
    pub command: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Stdout followed by stderr.
    pub output: String,
}

/// Drives `<mode>-quick@<interface>` through systemd and queries the
/// tunnel driver with `<mode> show`.
#[derive(Clone)]
pub struct ServiceController {
    runner: Arc<dyn ProcessRunner>,
    mode: String,
    interface: String,
    config_path: PathBuf,
}

impl ServiceController {
    pub fn new(settings: &Settings, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            mode: settings.mode.clone(),
            interface: settings.interface.clone(),
            config_path: settings.server_config_path(),
        }
    }

    pub fn unit_name(&self) -> String {
        format!("{}-quick@{}", self.mode, self.interface)
    }

    /// Enables and starts the unit. The server config must already exist.
    pub async fn start(&self) -> Result<CommandReport> {
        if !self.config_path.is_file() {
            tracing::warn!(path = %self.config_path.display(), "refusing to start without server config");
            return Err(Error::ConfigMissing {
                path: self.config_path.clone(),
            });
        }
        let unit = self.unit_name();
        self.systemctl(&["enable", "--now", &unit]).await
    }

    pub async fn stop(&self) -> Result<CommandReport> {
        let unit = self.unit_name();
        self.systemctl(&["disable", "--now", &unit]).await
    }

    pub async fn restart(&self) -> Result<CommandReport> {
        let unit = self.unit_name();
        self.systemctl(&["restart", &unit]).await
    }

    /// An inactive unit makes `systemctl status` exit non-zero; that is
    /// reported with `success == false`, not as an error.
    pub async fn status(&self) -> Result<CommandReport> {
        let unit = self.unit_name();
        self.invoke(SERVICE_MANAGER, &["status", &unit]).await
    }

    /// Live peer and handshake state straight from the tunnel driver.
    pub async fn show(&self) -> Result<CommandReport> {
        let report = self.invoke(&self.mode, &["show"]).await?;
        into_result(report)
    }

    async fn systemctl(&self, args: &[&str]) -> Result<CommandReport> {
        let report = self.invoke(SERVICE_MANAGER, args).await?;
        into_result(report)
    }

    async fn invoke(&self, program: &str, args: &[&str]) -> Result<CommandReport> {
        let command = command_line(program, args);
        let output = self.runner.run(program, args, None).await.map_err(|err| {
            err.into_error(|reason| Error::ServiceCommand {
                command: command.clone(),
                reason,
                output: String::new(),
            })
        })?;

        tracing::info!(
            service = %self.unit_name(),
            %command,
            success = output.success,
            "service command finished"
        );
        Ok(CommandReport {
            service: self.unit_name(),
            command,
            success: output.success,
            exit_code: output.code,
            output: output.combined(),
        })
    }
}

fn into_result(report: CommandReport) -> Result<CommandReport> {
    if report.success {
        return Ok(report);
    }
    let reason = match report.exit_code {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    };
    Err(Error::ServiceCommand {
        command: report.command,
        reason,
        output: report.output,
    })
}
