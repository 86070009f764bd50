//! In-process sandboxed backend for trusted `nodejs` handlers.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tackle_sandbox::{ScriptGlobals, ScriptLimits, ScriptSandbox};

use super::{
    Backend, BackendKind, ExecutionContext, ExecutionFailure, ExecutionResult, ExecutionStatus,
};

pub(crate) struct ScriptBackend {
    sandbox: Arc<dyn ScriptSandbox>,
    budget: Duration,
}

impl ScriptBackend {
    pub(crate) fn new(sandbox: Arc<dyn ScriptSandbox>, budget: Duration) -> Self {
        Self { sandbox, budget }
    }
}

impl std::fmt::Debug for ScriptBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptBackend")
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl Backend for ScriptBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Script
    }

    fn describe(&self, context: &ExecutionContext<'_>) -> Option<String> {
        Some(context.contract().runtime().entrypoint().to_owned())
    }

    fn execute(&self, context: &ExecutionContext<'_>) -> Result<ExecutionResult, ExecutionFailure> {
        let path = context
            .repo_path()
            .join(context.contract().runtime().entrypoint());
        let code = fs::read_to_string(&path).map_err(|error| ExecutionFailure::io(&path, error))?;

        let globals = ScriptGlobals::new(
            context.input().clone(),
            json!({
                "caller": context.caller(),
                "sessionId": context.session_id(),
                "pluginId": context.contract().id(),
            }),
        );
        let budget = context
            .contract()
            .runtime()
            .timeout_secs()
            .map_or(self.budget, Duration::from_secs);
        let outcome = self.sandbox.run(&code, &globals, &ScriptLimits::new(budget))?;

        Ok(ExecutionResult::new(BackendKind::Script, ExecutionStatus::Ok, 0)
            .with_output(outcome.output().clone())
            .with_stdout(outcome.logs().join("\n")))
    }
}
