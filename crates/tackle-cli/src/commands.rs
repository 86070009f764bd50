//! Pipeline commands and their JSON output.

use std::path::PathBuf;

use clap::Subcommand;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use tackle_plugins::Invocation;
use tackle_plugins::dispatch::ExecuteRequest;
use tackle_plugins::host::PluginHost;

use crate::errors::AppError;

const COMMAND_TARGET: &str = "tackle_cli::commands";

/// Subcommands exposed by the `tackle` binary.
#[derive(Debug, Subcommand)]
pub(crate) enum CliCommand {
    /// Normalise and register the plugin repository at PATH.
    Register {
        /// Plugin repository containing `plugin.yaml`.
        repo: PathBuf,
    },
    /// Run a plugin's declared build command.
    Build {
        /// Plugin identifier.
        id: String,
        /// Exact version; defaults to the latest.
        #[arg(long)]
        version: Option<String>,
    },
    /// List registered plugins.
    List,
    /// Render a plugin's invocation template.
    Render {
        /// Plugin identifier.
        id: String,
        /// Exact version; defaults to the latest.
        #[arg(long)]
        version: Option<String>,
        /// Template props as a JSON object.
        #[arg(long, default_value = "{}")]
        props: String,
    },
    /// Check an invocation against the registered contract.
    Verify {
        /// Tool identifier.
        tool_id: String,
        /// Tool version.
        tool_version: String,
        /// Invocation arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
        /// Invocation identifier.
        #[arg(long, default_value = "cli")]
        invocation_id: String,
        /// Trace identifier recorded in the audit log.
        #[arg(long)]
        trace_id: Option<String>,
        /// Caller recorded on the invocation.
        #[arg(long)]
        caller: Option<String>,
    },
    /// Execute a registered plugin.
    Execute {
        /// Plugin identifier.
        id: String,
        /// Exact version; defaults to the latest.
        #[arg(long)]
        version: Option<String>,
        /// Plugin input as JSON.
        #[arg(long, default_value = "{}")]
        input: String,
        /// Session identifier to use instead of a generated one.
        #[arg(long)]
        session_id: Option<String>,
        /// Caller passed to the plugin.
        #[arg(long)]
        caller: Option<String>,
    },
}

/// JSON document produced by a command and whether it reports success.
#[derive(Debug)]
pub(crate) struct CommandOutput {
    pub(crate) body: Value,
    pub(crate) success: bool,
}

impl CommandOutput {
    fn from_serialize(value: &impl Serialize, success: bool) -> Result<Self, AppError> {
        let body = serde_json::to_value(value).map_err(AppError::SerialiseOutput)?;
        Ok(Self { body, success })
    }
}

/// Runs `command` against `host`.
pub(crate) fn run_command(
    command: CliCommand,
    host: &PluginHost,
) -> Result<CommandOutput, AppError> {
    debug!(target: COMMAND_TARGET, ?command, "running command");
    match command {
        CliCommand::Register { repo } => {
            CommandOutput::from_serialize(&host.register(&repo)?, true)
        }
        CliCommand::Build { id, version } => {
            CommandOutput::from_serialize(&host.build(&id, version.as_deref())?, true)
        }
        CliCommand::List => {
            let tools: Vec<Value> = host
                .list()?
                .iter()
                .map(|artifact| {
                    let contract = artifact.contract();
                    json!({
                        "id": contract.id(),
                        "version": contract.version(),
                        "name": contract.plugin().name(),
                        "runtime": contract.runtime().kind().as_str(),
                        "contentHash": artifact.content_hash(),
                    })
                })
                .collect();
            Ok(CommandOutput {
                body: json!({ "plugins": tools }),
                success: true,
            })
        }
        CliCommand::Render { id, version, props } => {
            let values = parse_object("--props", &props)?;
            let outcome = host.render(&id, version.as_deref(), &values)?;
            let success = outcome.rendered().is_some();
            CommandOutput::from_serialize(&outcome, success)
        }
        CliCommand::Verify {
            tool_id,
            tool_version,
            args,
            invocation_id,
            trace_id,
            caller,
        } => {
            let arguments = Value::Object(parse_object("--args", &args)?);
            let mut invocation = Invocation::new(tool_id, tool_version, invocation_id, arguments)?;
            if let Some(caller_id) = caller {
                invocation = invocation.with_caller(caller_id);
            }
            let trace = trace_id.unwrap_or_else(|| invocation.invocation_id().to_owned());
            let verdict = host.verify(&invocation, &trace);
            let approved = verdict.approved();
            CommandOutput::from_serialize(&verdict, approved)
        }
        CliCommand::Execute {
            id,
            version,
            input,
            session_id,
            caller,
        } => {
            let mut request = ExecuteRequest::new(id, parse_json("--input", &input)?);
            if let Some(exact) = version {
                request = request.with_version(exact);
            }
            if let Some(session) = session_id {
                request = request.with_session_id(session);
            }
            if let Some(caller_id) = caller {
                request = request.with_caller(caller_id);
            }
            let result = host.execute(&request)?;
            let success = result.is_ok();
            CommandOutput::from_serialize(&result, success)
        }
    }
}

fn parse_json(flag: &'static str, text: &str) -> Result<Value, AppError> {
    serde_json::from_str(text).map_err(|error| AppError::InvalidJsonArgument {
        flag,
        reason: error.to_string(),
    })
}

fn parse_object(flag: &'static str, text: &str) -> Result<Map<String, Value>, AppError> {
    match parse_json(flag, text)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::InvalidJsonArgument {
            flag,
            reason: format!("expected a JSON object, found {other}"),
        }),
    }
}
