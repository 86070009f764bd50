//! Containerised backend.
//!
//! The plugin repository is bind-mounted at `/app`; the input is written to a
//! temporary JSON file inside it which the container pipes into the
//! entrypoint. The temporary file is removed when the handle drops, on every
//! exit path.

use std::io::Write;
use std::process::Command;
use std::time::Duration;

use tempfile::NamedTempFile;

use super::permissions::profile_for;
use super::{Backend, BackendKind, ExecutionContext, ExecutionFailure, ExecutionResult};
use crate::contract::Adapter;
use crate::process::run_captured;

/// Mount point of the plugin repository inside the container.
pub(crate) const MOUNT_POINT: &str = "/app";

const INPUT_PREFIX: &str = ".tackle_input";

#[derive(Debug, Clone)]
pub(crate) struct ContainerBackend {
    program: String,
    timeout: Duration,
}

impl ContainerBackend {
    pub(crate) fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn arguments(
        context: &ExecutionContext<'_>,
        input_name: &str,
    ) -> Result<Vec<String>, ExecutionFailure> {
        let runtime = context.contract().runtime();
        let Some(Adapter::Docker { image }) = runtime.adapter() else {
            return Err(ExecutionFailure::Misconfigured(String::from(
                "container execution requires a docker adapter with an image",
            )));
        };
        let profile = profile_for(context.contract().permissions());

        let mut args = vec![String::from("run"), String::from("--rm")];
        args.extend(profile.container_args(context.repo_path(), MOUNT_POINT));
        args.extend([
            String::from("-w"),
            String::from(MOUNT_POINT),
            image.clone(),
            String::from("sh"),
            String::from("-c"),
            format!(
                "cat {} | {}",
                shell_quote(input_name),
                shell_quote(&format!("{MOUNT_POINT}/{}", runtime.entrypoint()))
            ),
        ]);
        Ok(args)
    }

    fn write_input(context: &ExecutionContext<'_>) -> Result<NamedTempFile, ExecutionFailure> {
        let repo = context.repo_path();
        let mut file = tempfile::Builder::new()
            .prefix(INPUT_PREFIX)
            .suffix(".json")
            .tempfile_in(repo)
            .map_err(|error| ExecutionFailure::io(repo, error))?;
        let encoded = serde_json::to_vec(context.input())?;
        file.write_all(&encoded)
            .and_then(|()| file.as_file().sync_all())
            .map_err(|error| ExecutionFailure::io(file.path(), error))?;
        Ok(file)
    }
}

/// Quotes `text` as a single POSIX shell word.
fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

impl Backend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    fn describe(&self, context: &ExecutionContext<'_>) -> Option<String> {
        match context.contract().runtime().adapter() {
            Some(Adapter::Docker { image }) => Some(format!("{} run {image}", self.program)),
            _ => None,
        }
    }

    fn execute(&self, context: &ExecutionContext<'_>) -> Result<ExecutionResult, ExecutionFailure> {
        let input = Self::write_input(context)?;
        let input_name = input
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let args = Self::arguments(context, &input_name)?;

        let mut command = Command::new(&self.program);
        command.args(&args).current_dir(context.repo_path());
        let timeout = context.timeout_or(self.timeout);
        let outcome = run_captured(command, Vec::new(), timeout, context.cancel());

        if let Err(error) = input.close() {
            tracing::warn!(
                target: super::DISPATCH_TARGET,
                %error,
                "failed to remove container input file"
            );
        }
        let output = outcome?;
        Ok(ExecutionResult::from_exit(
            BackendKind::Container,
            output.exit_code,
            output.stdout,
            output.stderr,
        ))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::shell_quote;

    #[rstest]
    #[case::plain("/app/run.sh", "'/app/run.sh'")]
    #[case::metacharacters("/app/run.sh; rm -rf /", "'/app/run.sh; rm -rf /'")]
    #[case::embedded_quote("/app/it's.sh", r"'/app/it'\''s.sh'")]
    fn shell_words_are_single_quoted(#[case] text: &str, #[case] expected: &str) {
        assert_eq!(shell_quote(text), expected);
    }
}
