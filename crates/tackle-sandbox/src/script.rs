//! In-process script execution backed by an embedded QuickJS engine.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rquickjs::{Context, Ctx, Function, Object, Runtime, Value};
use tracing::debug;

use crate::error::SandboxError;

const SCRIPT_TARGET: &str = "tackle_sandbox::script";

/// Default heap ceiling for a single handler invocation.
const DEFAULT_MEMORY_LIMIT_BYTES: usize = 32 * 1024 * 1024;

/// Values exposed to a handler as the `input` and `context` globals.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptGlobals {
    input: serde_json::Value,
    context: serde_json::Value,
}

impl ScriptGlobals {
    /// Creates a globals bundle from the invocation input and caller context.
    #[must_use]
    pub const fn new(input: serde_json::Value, context: serde_json::Value) -> Self {
        Self { input, context }
    }

    /// Returns the invocation input.
    #[must_use]
    pub const fn input(&self) -> &serde_json::Value {
        &self.input
    }

    /// Returns the caller context.
    #[must_use]
    pub const fn context(&self) -> &serde_json::Value {
        &self.context
    }
}

/// Resource limits applied to a handler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLimits {
    budget: Duration,
    memory_limit_bytes: usize,
}

impl ScriptLimits {
    /// Creates limits with the given execution budget and the default heap cap.
    #[must_use]
    pub const fn new(budget: Duration) -> Self {
        Self {
            budget,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
        }
    }

    /// Overrides the heap ceiling.
    #[must_use]
    pub const fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    /// Returns the execution budget.
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }

    /// Returns the heap ceiling in bytes.
    #[must_use]
    pub const fn memory_limit_bytes(&self) -> usize {
        self.memory_limit_bytes
    }

    fn budget_ms(&self) -> u64 {
        u64::try_from(self.budget.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Result of a successful handler run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptOutcome {
    output: serde_json::Value,
    logs: Vec<String>,
    elapsed: Duration,
}

impl ScriptOutcome {
    /// Returns the value returned by the handler, or `null` for `undefined`.
    #[must_use]
    pub const fn output(&self) -> &serde_json::Value {
        &self.output
    }

    /// Returns the lines passed to the `log` global, in call order.
    #[must_use]
    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    /// Returns the wall-clock time spent running the handler.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// Capability to run handler code in isolation.
///
/// Implementations evaluate `code` as a CommonJS-style module whose
/// `module.exports` is either a function or an object exposing exactly one
/// function. That entry point is called with `(input, context)` and its
/// return value is converted back to JSON.
pub trait ScriptSandbox: Send + Sync {
    /// Runs the handler.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::BudgetExceeded`] when the handler is
    /// interrupted, [`SandboxError::MissingEntryPoint`] or
    /// [`SandboxError::AmbiguousEntryPoint`] when the module shape is wrong,
    /// and [`SandboxError::Script`] when the handler throws.
    fn run(
        &self,
        code: &str,
        globals: &ScriptGlobals,
        limits: &ScriptLimits,
    ) -> Result<ScriptOutcome, SandboxError>;
}

/// QuickJS-backed [`ScriptSandbox`].
///
/// Every run gets a fresh runtime and context, so no state leaks between
/// invocations. The context carries only the ECMAScript intrinsics plus the
/// injected globals.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuickJsSandbox;

impl ScriptSandbox for QuickJsSandbox {
    fn run(
        &self,
        code: &str,
        globals: &ScriptGlobals,
        limits: &ScriptLimits,
    ) -> Result<ScriptOutcome, SandboxError> {
        let started = Instant::now();
        let deadline = started + limits.budget();

        let runtime = Runtime::new().map_err(engine_error)?;
        runtime.set_memory_limit(limits.memory_limit_bytes());
        runtime.set_interrupt_handler(Some(Box::new(move || Instant::now() >= deadline)));
        let context = Context::full(&runtime).map_err(engine_error)?;

        let logs = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&logs);
        let result = context.with(|ctx| evaluate(&ctx, code, globals, sink));
        let elapsed = started.elapsed();

        let output = match result {
            Ok(output) => output,
            Err(SandboxError::Script { .. } | SandboxError::Engine { .. })
                if Instant::now() >= deadline =>
            {
                debug!(
                    target: SCRIPT_TARGET,
                    budget_ms = limits.budget_ms(),
                    "handler interrupted"
                );
                return Err(SandboxError::BudgetExceeded {
                    budget_ms: limits.budget_ms(),
                });
            }
            Err(error) => return Err(error),
        };

        let lines = logs.lock().map(|lines| lines.clone()).unwrap_or_default();
        debug!(
            target: SCRIPT_TARGET,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            log_lines = lines.len(),
            "handler completed"
        );
        Ok(ScriptOutcome {
            output,
            logs: lines,
            elapsed,
        })
    }
}

fn evaluate(
    ctx: &Ctx<'_>,
    code: &str,
    globals: &ScriptGlobals,
    logs: Arc<Mutex<Vec<String>>>,
) -> Result<serde_json::Value, SandboxError> {
    let fail = |error| describe_error(ctx, error);
    let scope = ctx.globals();

    let input = to_js(ctx, globals.input())?;
    let context = to_js(ctx, globals.context())?;
    scope.set("input", input.clone()).map_err(fail)?;
    scope.set("context", context.clone()).map_err(fail)?;

    let log = Function::new(ctx.clone(), move |message: String| {
        if let Ok(mut lines) = logs.lock() {
            lines.push(message);
        }
    })
    .map_err(fail)?;
    scope.set("log", log).map_err(fail)?;

    let module = Object::new(ctx.clone()).map_err(fail)?;
    let exports = Object::new(ctx.clone()).map_err(fail)?;
    module.set("exports", exports.clone()).map_err(fail)?;
    scope.set("module", module.clone()).map_err(fail)?;
    scope.set("exports", exports).map_err(fail)?;

    ctx.eval::<(), _>(code).map_err(fail)?;
    let exported: Value<'_> = module.get("exports").map_err(fail)?;
    let entry = entry_point(ctx, &exported)?;

    let mut returned: Value<'_> = entry.call((input, context)).map_err(fail)?;
    if let Some(promise) = returned.as_promise() {
        returned = promise.finish().map_err(fail)?;
    }
    to_json(ctx, returned)
}

fn entry_point<'js>(ctx: &Ctx<'js>, exported: &Value<'js>) -> Result<Function<'js>, SandboxError> {
    if let Some(function) = exported.as_function() {
        return Ok(function.clone());
    }
    let Some(object) = exported.as_object() else {
        return Err(SandboxError::MissingEntryPoint);
    };

    let mut callables = Vec::new();
    for key in object.keys::<String>() {
        let name = key.map_err(|error| describe_error(ctx, error))?;
        let value: Value<'js> = object
            .get(name.as_str())
            .map_err(|error| describe_error(ctx, error))?;
        if let Some(function) = value.as_function() {
            callables.push(function.clone());
        }
    }

    match callables.len() {
        0 => Err(SandboxError::MissingEntryPoint),
        1 => callables.pop().ok_or(SandboxError::MissingEntryPoint),
        count => Err(SandboxError::AmbiguousEntryPoint { count }),
    }
}

fn to_js<'js>(ctx: &Ctx<'js>, value: &serde_json::Value) -> Result<Value<'js>, SandboxError> {
    let encoded = serde_json::to_string(value)?;
    ctx.json_parse(encoded)
        .map_err(|error| describe_error(ctx, error))
}

fn to_json<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Result<serde_json::Value, SandboxError> {
    let encoded = ctx
        .json_stringify(value)
        .map_err(|error| describe_error(ctx, error))?;
    let Some(js_text) = encoded else {
        return Ok(serde_json::Value::Null);
    };
    let text = js_text
        .to_string()
        .map_err(|error| describe_error(ctx, error))?;
    Ok(serde_json::from_str(&text)?)
}

fn describe_error(ctx: &Ctx<'_>, error: rquickjs::Error) -> SandboxError {
    if !error.is_exception() {
        return engine_error(error);
    }
    let thrown = ctx.catch();
    let message = thrown
        .as_exception()
        .and_then(rquickjs::Exception::message)
        .or_else(|| thrown.as_string().and_then(|text| text.to_string().ok()))
        .unwrap_or_else(|| String::from("uncaught exception"));
    SandboxError::Script { message }
}

fn engine_error(error: rquickjs::Error) -> SandboxError {
    SandboxError::Engine {
        message: error.to_string(),
    }
}
