//! Caller requests to run a registered tool.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::PluginError;
use crate::manifest::{ID_PATTERN, VERSION_PATTERN, validate_against};

/// A request to invoke `tool_id@tool_version` with `args`.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use tackle_plugins::Invocation;
///
/// let invocation = Invocation::new("echo", "1.0.0", "inv-1", json!({ "text": "hi" }))
///     .expect("args are an object");
/// invocation.validate().expect("invocation is well formed");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    tool_id: String,
    tool_version: String,
    invocation_id: String,
    args: Map<String, Value>,
    timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    caller_id: Option<String>,
}

impl Invocation {
    /// Creates an invocation stamped with the current UTC time.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Validation`] if `args` is not a JSON object.
    pub fn new(
        tool_id: impl Into<String>,
        tool_version: impl Into<String>,
        invocation_id: impl Into<String>,
        args: Value,
    ) -> Result<Self, PluginError> {
        let Value::Object(map) = args else {
            return Err(PluginError::invalid("invocation args must be a JSON object"));
        };
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|error| {
                PluginError::invalid(format!("timestamp formatting failed: {error}"))
            })?;
        Ok(Self {
            tool_id: tool_id.into(),
            tool_version: tool_version.into(),
            invocation_id: invocation_id.into(),
            args: map,
            timestamp,
            caller_id: None,
        })
    }

    /// Records the caller.
    #[must_use]
    pub fn with_caller(mut self, caller_id: impl Into<String>) -> Self {
        self.caller_id = Some(caller_id.into());
        self
    }

    /// Overrides the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Checks identifier patterns, the invocation id, and the timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Validation`] listing every violation.
    pub fn validate(&self) -> Result<(), PluginError> {
        let schema = json!({
            "type": "object",
            "required": ["tool_id", "tool_version", "invocation_id", "args", "timestamp"],
            "properties": {
                "tool_id": { "type": "string", "pattern": ID_PATTERN },
                "tool_version": { "type": "string", "pattern": VERSION_PATTERN },
                "invocation_id": { "type": "string", "minLength": 1 },
                "args": { "type": "object" },
                "timestamp": { "type": "string" },
                "caller_id": { "type": "string" }
            }
        });
        let encoded = serde_json::to_value(self)?;
        let mut violations = match validate_against(&schema, &encoded, "invocation") {
            Ok(()) => Vec::new(),
            Err(PluginError::Validation { violations }) => violations,
            Err(other) => return Err(other),
        };
        if OffsetDateTime::parse(&self.timestamp, &Rfc3339).is_err() {
            violations.push(format!(
                "invocation: timestamp '{}' is not an RFC 3339 date-time",
                self.timestamp
            ));
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(PluginError::Validation { violations })
        }
    }

    /// Returns the tool identifier.
    #[must_use]
    pub const fn tool_id(&self) -> &str {
        self.tool_id.as_str()
    }

    /// Returns the tool version.
    #[must_use]
    pub const fn tool_version(&self) -> &str {
        self.tool_version.as_str()
    }

    /// Returns the invocation identifier.
    #[must_use]
    pub const fn invocation_id(&self) -> &str {
        self.invocation_id.as_str()
    }

    /// Returns the arguments.
    #[must_use]
    pub const fn args(&self) -> &Map<String, Value> {
        &self.args
    }

    /// Returns the request timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> &str {
        self.timestamp.as_str()
    }

    /// Returns the caller identifier, if any.
    #[must_use]
    pub fn caller_id(&self) -> Option<&str> {
        self.caller_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn fresh_invocation_is_valid() {
        let invocation = Invocation::new("echo", "1.0.0", "inv-1", json!({}))
            .expect("object args")
            .with_caller("cli");
        invocation.validate().expect("valid");
        assert_eq!(invocation.caller_id(), Some("cli"));
    }

    #[test]
    fn non_object_args_are_rejected() {
        let error = Invocation::new("echo", "1.0.0", "inv-1", json!([1])).expect_err("array args");
        assert!(error.to_string().contains("JSON object"), "{error}");
    }

    #[test]
    fn every_violation_is_collected() {
        let invocation = Invocation::new("Echo!", "v1", "", json!({}))
            .expect("object args")
            .with_timestamp("yesterday");
        let Err(PluginError::Validation { violations }) = invocation.validate() else {
            panic!("expected validation failure");
        };
        assert_eq!(violations.len(), 4, "violations: {violations:?}");
    }

    #[rstest]
    #[case::utc("2024-05-01T12:00:00Z")]
    #[case::offset("2024-05-01T12:00:00.250+02:00")]
    fn rfc3339_timestamps_are_accepted(#[case] timestamp: &str) {
        let invocation = Invocation::new("echo", "1.0.0", "inv-1", json!({}))
            .expect("object args")
            .with_timestamp(timestamp);
        invocation.validate().expect("valid");
    }

    #[test]
    fn deserialises_snake_case_wire_form() {
        let invocation: Invocation = serde_json::from_value(json!({
            "tool_id": "echo",
            "tool_version": "1.0.0",
            "invocation_id": "inv-9",
            "args": { "text": "hi" },
            "timestamp": "2024-05-01T12:00:00Z"
        }))
        .expect("decode");
        assert_eq!(invocation.args()["text"], json!("hi"));
        assert!(invocation.caller_id().is_none());
    }
}
