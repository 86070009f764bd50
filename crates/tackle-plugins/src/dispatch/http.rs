//! Remote HTTP adapter backend.

use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::json;
use tracing::debug;
use url::Url;

use super::{
    Backend, BackendKind, DISPATCH_TARGET, ExecutionContext, ExecutionFailure, ExecutionResult,
    ExecutionStatus, FailureKind,
};
use crate::audit::AuditEvent;
use crate::contract::Adapter;

#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    timeout: Duration,
}

impl HttpBackend {
    pub(crate) const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Builds `<host>/invoke`, defaulting the scheme to `http`.
pub(crate) fn invoke_url(host: &str) -> Result<Url, ExecutionFailure> {
    let base = host.trim_end_matches('/');
    let with_scheme = if base.starts_with("http://") || base.starts_with("https://") {
        format!("{base}/invoke")
    } else {
        format!("http://{base}/invoke")
    };
    Url::parse(&with_scheme).map_err(|error| ExecutionFailure::Transport {
        url: with_scheme.clone(),
        message: error.to_string(),
    })
}

fn target(context: &ExecutionContext<'_>) -> Result<Url, ExecutionFailure> {
    match context.contract().runtime().adapter() {
        Some(Adapter::Http { host }) => invoke_url(host),
        _ => Err(ExecutionFailure::Misconfigured(String::from(
            "http execution requires an http adapter with a host",
        ))),
    }
}

impl Backend for HttpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    fn describe(&self, context: &ExecutionContext<'_>) -> Option<String> {
        target(context).ok().map(String::from)
    }

    fn execute(&self, context: &ExecutionContext<'_>) -> Result<ExecutionResult, ExecutionFailure> {
        let url = target(context)?;
        let timeout = context.timeout_or(self.timeout);
        let classify = |error: reqwest::Error| {
            if error.is_timeout() {
                ExecutionFailure::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    stdout: String::new(),
                    stderr: error.to_string(),
                }
            } else {
                ExecutionFailure::Transport {
                    url: url.to_string(),
                    message: error.to_string(),
                }
            }
        };

        let client = Client::builder().timeout(timeout).build().map_err(classify)?;
        let response = client
            .post(url.clone())
            .json(&json!({ "input": context.input() }))
            .send()
            .map_err(classify)?;

        let status = response.status();
        let body = response.text().map_err(classify)?;
        debug!(
            target: DISPATCH_TARGET,
            url = %url,
            status = status.as_u16(),
            body_bytes = body.len(),
            "http adapter responded"
        );
        context.record(&AuditEvent::ExecuteAdapterHttp {
            session_id: context.session_id().to_owned(),
            url: url.to_string(),
            status: status.as_u16(),
        });

        let (state, failure) = if status.is_success() {
            (ExecutionStatus::Ok, None)
        } else {
            (ExecutionStatus::Error, Some(FailureKind::Exit))
        };
        let mut result =
            ExecutionResult::new(BackendKind::Http, state, i32::from(status.as_u16()));
        if let Ok(parsed) = serde_json::from_str(body.trim()) {
            result = result.with_output(parsed);
        }
        if let Some(kind) = failure {
            result = result.with_failure(kind);
        }
        Ok(result.with_stdout(body))
    }
}
