//! Pre-execution verification of invocations.
//!
//! The [`Verifier`] answers one question before anything runs: should this
//! invocation be allowed to proceed? Checks are ordered and short-circuit:
//!
//! 0. the invocation itself must be well formed (identifier patterns, a
//!    non-empty invocation id, an RFC 3339 timestamp);
//! 1. the requested `tool_id@tool_version` must be registered;
//! 2. every name in the input schema's `required` list must be present;
//! 3. a pluggable [`PlausibilityPolicy`] gets the final say.
//!
//! Verification is read-only and never fails: registry faults are reported as
//! a denial with zero confidence.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::contract::PluginContract;
use crate::error::PluginError;
use crate::invocation::Invocation;
use crate::registry::ArtifactRegistry;

const VERIFIER_TARGET: &str = "tackle_plugins::verifier";

const MALFORMED_CONFIDENCE: f64 = 0.0;
const NOT_FOUND_CONFIDENCE: f64 = 0.1;
const MISSING_ARGS_CONFIDENCE: f64 = 0.3;
const EMPTY_ARGS_CONFIDENCE: f64 = 0.2;
const PLAUSIBLE_CONFIDENCE: f64 = 0.8;
const FAULT_CONFIDENCE: f64 = 0.0;

/// Outcome of a plausibility assessment.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    approved: bool,
    reason: String,
    confidence: f64,
}

impl PolicyDecision {
    /// Approves with the given reason and confidence.
    #[must_use]
    pub fn approve(reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            approved: true,
            reason: reason.into(),
            confidence,
        }
    }

    /// Denies with the given reason and confidence.
    #[must_use]
    pub fn deny(reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            approved: false,
            reason: reason.into(),
            confidence,
        }
    }
}

/// Final verification gate applied after the structural checks pass.
#[cfg_attr(test, mockall::automock)]
pub trait PlausibilityPolicy: Send + Sync {
    /// Assesses whether `invocation` is a plausible use of `contract`.
    fn assess(&self, invocation: &Invocation, contract: &PluginContract) -> PolicyDecision;
}

/// Default policy: approve any invocation carrying at least one argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonEmptyArgsPolicy;

impl PlausibilityPolicy for NonEmptyArgsPolicy {
    fn assess(&self, invocation: &Invocation, _contract: &PluginContract) -> PolicyDecision {
        if invocation.args().is_empty() {
            PolicyDecision::deny("No arguments provided", EMPTY_ARGS_CONFIDENCE)
        } else {
            PolicyDecision::approve("Args validation passed", PLAUSIBLE_CONFIDENCE)
        }
    }
}

/// Verification result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    approved: bool,
    reason: String,
    confidence_score: f64,
    trace_id: String,
}

impl Verdict {
    fn from_decision(decision: PolicyDecision, trace_id: &str) -> Self {
        Self {
            approved: decision.approved,
            reason: decision.reason,
            confidence_score: decision.confidence,
            trace_id: trace_id.to_owned(),
        }
    }

    /// Returns true when the invocation may proceed.
    #[must_use]
    pub const fn approved(&self) -> bool {
        self.approved
    }

    /// Returns the explanation.
    #[must_use]
    pub const fn reason(&self) -> &str {
        self.reason.as_str()
    }

    /// Returns the confidence in the decision, between 0 and 1.
    #[must_use]
    pub const fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    /// Returns the caller-supplied trace identifier.
    #[must_use]
    pub const fn trace_id(&self) -> &str {
        self.trace_id.as_str()
    }
}

/// Checks invocations against the registry.
#[derive(Clone)]
pub struct Verifier {
    registry: ArtifactRegistry,
    policy: Arc<dyn PlausibilityPolicy>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Verifier {
    /// Creates a verifier using the default [`NonEmptyArgsPolicy`].
    #[must_use]
    pub fn new(registry: ArtifactRegistry) -> Self {
        Self::with_policy(registry, Arc::new(NonEmptyArgsPolicy))
    }

    /// Creates a verifier with a custom plausibility policy.
    #[must_use]
    pub fn with_policy(registry: ArtifactRegistry, policy: Arc<dyn PlausibilityPolicy>) -> Self {
        Self { registry, policy }
    }

    /// Verifies `invocation`, tagging the verdict with `trace_id`.
    #[must_use]
    pub fn verify(&self, invocation: &Invocation, trace_id: &str) -> Verdict {
        let decision = self.decide(invocation);
        debug!(
            target: VERIFIER_TARGET,
            plugin = invocation.tool_id(),
            version = invocation.tool_version(),
            trace_id,
            approved = decision.approved,
            "invocation verified"
        );
        Verdict::from_decision(decision, trace_id)
    }

    fn decide(&self, invocation: &Invocation) -> PolicyDecision {
        if let Err(error) = invocation.validate() {
            return PolicyDecision::deny(
                format!("Malformed invocation: {error}"),
                MALFORMED_CONFIDENCE,
            );
        }

        let artifact = match self
            .registry
            .get(invocation.tool_id(), Some(invocation.tool_version()))
        {
            Ok(artifact) => artifact,
            Err(PluginError::NotFound { .. }) => {
                return PolicyDecision::deny(
                    format!(
                        "Tool {}@{} not found in registry",
                        invocation.tool_id(),
                        invocation.tool_version()
                    ),
                    NOT_FOUND_CONFIDENCE,
                );
            }
            Err(error) => {
                return PolicyDecision::deny(
                    format!("Verification error: {error}"),
                    FAULT_CONFIDENCE,
                );
            }
        };

        let contract = artifact.contract();
        let missing: Vec<&str> = contract
            .io()
            .required_inputs()
            .into_iter()
            .filter(|name| !invocation.args().contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return PolicyDecision::deny(
                format!("Missing required arguments: {}", missing.join(", ")),
                MISSING_ARGS_CONFIDENCE,
            );
        }

        self.policy.assess(invocation, contract)
    }
}
