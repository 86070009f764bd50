//! Domain errors raised by the sandbox wrapper.

use thiserror::Error;

/// Errors raised while preparing or running sandboxed code.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The script engine could not be initialised or rejected an operation.
    #[error("script engine failure: {message}")]
    Engine {
        /// Engine-reported description.
        message: String,
    },

    /// The handler module exported no callable entry point.
    #[error("handler must export a single callable entry point, found none")]
    MissingEntryPoint,

    /// The handler module exported more than one callable.
    #[error("handler must export a single callable entry point, found {count}")]
    AmbiguousEntryPoint {
        /// Number of callables exported.
        count: usize,
    },

    /// The handler exceeded its execution budget and was interrupted.
    #[error("handler exceeded its execution budget of {budget_ms}ms")]
    BudgetExceeded {
        /// Configured budget in milliseconds.
        budget_ms: u64,
    },

    /// The handler threw while loading or running.
    #[error("handler raised an exception: {message}")]
    Script {
        /// Message carried by the thrown value.
        message: String,
    },

    /// Values crossing the sandbox boundary could not be converted.
    #[error("failed to convert value across the sandbox boundary: {0}")]
    Conversion(#[from] serde_json::Error),
}
