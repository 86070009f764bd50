//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use tackle_plugins::PluginError;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("invalid {flag} argument: {reason}")]
    InvalidJsonArgument { flag: &'static str, reason: String },
    #[error("{0}")]
    Plugin(#[from] PluginError),
    #[error("failed to serialise command output: {0}")]
    SerialiseOutput(serde_json::Error),
    #[error("failed to write command output: {0}")]
    WriteOutput(io::Error),
}

impl AppError {
    /// Status code reported alongside pipeline failures.
    pub(crate) const fn status(&self) -> u16 {
        match self {
            Self::Plugin(error) => error.http_status(),
            Self::CliUsage(_) | Self::InvalidJsonArgument { .. } => 400,
            Self::LoadConfiguration(_)
            | Self::Telemetry(_)
            | Self::SerialiseOutput(_)
            | Self::WriteOutput(_) => 500,
        }
    }
}
