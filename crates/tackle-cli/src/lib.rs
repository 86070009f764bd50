//! Command-line interface for the Tackle plugin host.
//!
//! The runtime splits configuration flags from the command line, loads
//! [`tackle_config::Config`], installs telemetry, opens a
//! [`tackle_plugins::host::PluginHost`], and prints each command's result as
//! a single JSON document on stdout. Failures are reported on stderr as
//! `{"error": ..., "status": ...}` with a non-zero exit code.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use serde_json::{Value, json};
use tracing::warn;

use tackle_plugins::host::PluginHost;

mod commands;
mod config;
mod errors;
pub mod telemetry;

use commands::{CliCommand, run_command};
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
use config::{host_settings, split_config_arguments};
pub(crate) use errors::AppError;

const CLI_TARGET: &str = "tackle_cli";

/// Register, build, inspect, and run Tackle plugins.
#[derive(Debug, Parser)]
#[command(name = "tackle", version, about)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

/// Runs the CLI using the provided arguments and IO handles.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, &OrthoConfigLoader)
}

pub(crate) fn run_with_loader<I, W, E, L>(
    args: I,
    stdout: &mut W,
    stderr: &mut E,
    loader: &L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let arguments: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&arguments);

    let result = Cli::try_parse_from(&split.command_arguments)
        .map_err(AppError::CliUsage)
        .and_then(|cli| {
            let config = loader.load(&split.config_arguments)?;
            telemetry::initialise(&config)?;
            let host = PluginHost::open(&host_settings(&config))?;
            let output = run_command(cli.command, &host)?;
            write_document(stdout, &output.body)?;
            Ok(if output.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        });

    match result {
        Ok(exit_code) => exit_code,
        Err(AppError::CliUsage(error)) if !error.use_stderr() => {
            write_or_warn(stdout, &error.render().to_string());
            ExitCode::SUCCESS
        }
        Err(AppError::CliUsage(error)) => {
            write_or_warn(stderr, &error.render().to_string());
            ExitCode::from(2)
        }
        Err(error) => {
            let report = json!({ "error": error.to_string(), "status": error.status() });
            write_or_warn(stderr, &format!("{report}\n"));
            ExitCode::FAILURE
        }
    }
}

fn write_document<W: Write>(stdout: &mut W, body: &Value) -> Result<(), AppError> {
    let text = serde_json::to_string_pretty(body).map_err(AppError::SerialiseOutput)?;
    writeln!(stdout, "{text}").map_err(AppError::WriteOutput)?;
    stdout.flush().map_err(AppError::WriteOutput)
}

fn write_or_warn<W: Write>(sink: &mut W, text: &str) {
    if let Err(error) = sink.write_all(text.as_bytes()) {
        warn!(target: CLI_TARGET, %error, "failed to write diagnostics");
    }
}

#[cfg(test)]
mod tests;
