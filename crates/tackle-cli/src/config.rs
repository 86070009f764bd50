//! Configuration loading helpers for the Tackle CLI.
//!
//! Configuration flags must precede the subcommand. They are split off and
//! handed to `ortho_config`, while the remaining tokens go to the command
//! parser.

use std::ffi::{OsStr, OsString};

use ortho_config::OrthoConfig;
use tackle_config::Config;
use tackle_plugins::dispatch::DispatchSettings;
use tackle_plugins::host::HostSettings;

use crate::errors::AppError;

/// CLI flags recognised by the configuration loader.
///
/// Keep in sync with the fields of [`Config`].
pub(crate) const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--registry-dir",
    "--discovery-path",
    "--log-filter",
    "--log-format",
    "--require-signatures",
    "--trusted-signers",
    "--auto-build",
    "--nodejs-interpreter",
    "--python-interpreter",
    "--container-program",
    "--shell",
    "--interpreter-timeout-secs",
    "--container-timeout-secs",
    "--http-timeout-secs",
    "--script-budget-ms",
    "--build-timeout-secs",
    "--max-concurrent-per-plugin",
];

/// Boolean flags that never consume a following value.
const SWITCH_FLAGS: &[&str] = &["--require-signatures", "--auto-build"];

pub(crate) trait ConfigLoader {
    /// Loads configuration from the filtered argument list.
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

pub(crate) struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Skip,
}

fn process_config_flag(argument: &OsStr) -> FlagAction {
    let argument_text = argument.to_string_lossy();
    if !argument_text.starts_with("--") {
        return FlagAction::Skip;
    }
    let (flag, has_inline_value) = match argument_text.split_once('=') {
        Some((name, _)) => (name, true),
        None => (&*argument_text, false),
    };
    if CONFIG_CLI_FLAGS.contains(&flag) {
        return FlagAction::Include {
            needs_value: !has_inline_value && !SWITCH_FLAGS.contains(&flag),
        };
    }
    FlagAction::Skip
}

/// Configuration arguments and the remaining command tokens.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ConfigArgumentSplit {
    pub(crate) config_arguments: Vec<OsString>,
    pub(crate) command_arguments: Vec<OsString>,
}

/// Splits leading configuration flags from the command tokens.
///
/// The program name is kept at the head of both lists so each can be handed
/// to its own parser.
pub(crate) fn split_config_arguments(args: &[OsString]) -> ConfigArgumentSplit {
    let Some((program, rest)) = args.split_first() else {
        return ConfigArgumentSplit::default();
    };

    let mut config_arguments = vec![program.clone()];
    let mut tokens = rest.iter().peekable();
    while let Some(argument) = tokens.peek() {
        let FlagAction::Include { needs_value } = process_config_flag(argument) else {
            break;
        };
        config_arguments.extend(tokens.next().cloned());
        if needs_value {
            config_arguments.extend(tokens.next().cloned());
        }
    }

    let mut command_arguments = vec![program.clone()];
    command_arguments.extend(tokens.cloned());
    ConfigArgumentSplit {
        config_arguments,
        command_arguments,
    }
}

/// Maps the loaded configuration onto host settings.
pub(crate) fn host_settings(config: &Config) -> HostSettings {
    HostSettings {
        require_signatures: config.require_signatures,
        trusted_signers: config.trusted_signers.clone(),
        auto_build: config.auto_build,
        shell: config.shell.clone(),
        build_timeout: config.build_timeout(),
        dispatch: DispatchSettings {
            nodejs_interpreter: config.nodejs_interpreter.clone(),
            python_interpreter: config.python_interpreter.clone(),
            container_program: config.container_program.clone(),
            interpreter_timeout: config.interpreter_timeout(),
            container_timeout: config.container_timeout(),
            http_timeout: config.http_timeout(),
            script_budget: config.script_budget(),
            max_concurrent_per_plugin: config.max_concurrent_per_plugin,
        },
        ..HostSettings::new(
            config.registry_dir().as_std_path(),
            config.discovery_path().as_std_path(),
        )
    }
}
