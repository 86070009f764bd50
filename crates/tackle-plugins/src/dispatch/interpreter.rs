//! Direct interpreter backend for `nodejs`, `python`, and `binary` runtimes.

use std::process::Command;
use std::time::Duration;

use super::permissions::profile_for;
use super::{Backend, BackendKind, ExecutionContext, ExecutionFailure, ExecutionResult};
use crate::contract::RuntimeKind;
use crate::process::run_captured;

/// Spawns the plugin entrypoint in its repository with input JSON on stdin.
#[derive(Debug, Clone)]
pub(crate) struct InterpreterBackend {
    nodejs: String,
    python: String,
    timeout: Duration,
}

impl InterpreterBackend {
    pub(crate) fn new(
        nodejs: impl Into<String>,
        python: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            nodejs: nodejs.into(),
            python: python.into(),
            timeout,
        }
    }

    fn command(&self, context: &ExecutionContext<'_>) -> Result<Command, ExecutionFailure> {
        let runtime = context.contract().runtime();
        let entry = context.repo_path().join(runtime.entrypoint());
        let mut command = match runtime.kind() {
            RuntimeKind::Nodejs => {
                let mut node = Command::new(&self.nodejs);
                node.arg(&entry);
                node
            }
            RuntimeKind::Python => {
                let mut python = Command::new(&self.python);
                python.arg(&entry);
                python
            }
            RuntimeKind::Binary => Command::new(&entry),
            other @ (RuntimeKind::Docker | RuntimeKind::Http) => {
                return Err(ExecutionFailure::Misconfigured(format!(
                    "runtime '{other}' needs an adapter to run"
                )));
            }
        };
        command.current_dir(context.repo_path());
        profile_for(context.contract().permissions()).apply_environment(&mut command);
        Ok(command)
    }
}

impl Backend for InterpreterBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Interpreter
    }

    fn describe(&self, context: &ExecutionContext<'_>) -> Option<String> {
        let command = self.command(context).ok()?;
        let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
        parts.extend(command.get_args().map(|arg| arg.to_string_lossy().into_owned()));
        Some(parts.join(" "))
    }

    fn execute(&self, context: &ExecutionContext<'_>) -> Result<ExecutionResult, ExecutionFailure> {
        let command = self.command(context)?;
        let timeout = context.timeout_or(self.timeout);
        let stdin = serde_json::to_vec(context.input())?;
        let output = run_captured(command, stdin, timeout, context.cancel())?;
        Ok(ExecutionResult::from_exit(
            BackendKind::Interpreter,
            output.exit_code,
            output.stdout,
            output.stderr,
        ))
    }
}
