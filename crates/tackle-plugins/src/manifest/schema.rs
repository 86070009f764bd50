//! JSON Schemas applied to manifests and caller-supplied documents.

use serde_json::{Value, json};

use crate::error::PluginError;

/// Pattern plugin identifiers must match.
pub(crate) const ID_PATTERN: &str = "^[a-z0-9-]+$";

/// Pattern plugin versions must match.
pub(crate) const VERSION_PATTERN: &str = "^[0-9]+\\.[0-9]+\\.[0-9]+$";

/// Structural schema for `plugin.yaml`.
pub(crate) fn manifest_schema() -> Value {
    json!({
        "type": "object",
        "required": ["plugin", "runtime", "contract"],
        "properties": {
            "plugin": {
                "type": "object",
                "required": ["id", "version", "name"],
                "properties": {
                    "id": { "type": "string", "pattern": ID_PATTERN },
                    "version": { "type": "string", "pattern": VERSION_PATTERN },
                    "name": { "type": "string", "minLength": 1 },
                    "author": { "type": "string" },
                    "description": { "type": "string" }
                }
            },
            "runtime": {
                "type": "object",
                "required": ["type", "entrypoint"],
                "properties": {
                    "type": { "enum": ["nodejs", "python", "docker", "binary", "http"] },
                    "entrypoint": { "type": "string", "minLength": 1 },
                    "language": { "type": "string" },
                    "buildCommand": { "type": "string", "minLength": 1 },
                    "build": { "type": "string", "minLength": 1 },
                    "adapter": {
                        "type": "object",
                        "required": ["type"],
                        "properties": {
                            "type": { "enum": ["http", "docker"] },
                            "host": { "type": "string", "minLength": 1 },
                            "image": { "type": "string", "minLength": 1 }
                        }
                    },
                    "inProcess": { "type": "boolean" },
                    "timeoutSecs": { "type": "integer", "minimum": 1 }
                }
            },
            "contract": {
                "type": "object",
                "required": ["input", "output"],
                "properties": {
                    "input": { "type": "object" },
                    "output": { "type": "object" }
                }
            },
            "ui": { "type": ["object", "null"] },
            "metadata": { "type": ["object", "null"] },
            "permissions": {
                "type": "object",
                "properties": {
                    "network": { "type": "boolean" },
                    "filesystem": { "enum": ["read", "write", "none"] },
                    "env": { "type": "boolean" },
                    "ai": { "type": "boolean" }
                }
            },
            "template": {
                "type": "object",
                "required": ["allowedPlaceholders"],
                "properties": {
                    "body": { "type": "string" },
                    "path": { "type": "string", "minLength": 1 },
                    "allowedPlaceholders": {
                        "type": "array",
                        "items": { "type": "string", "pattern": "^[A-Za-z0-9_]+$" }
                    },
                    "propsSchema": { "type": "object" }
                }
            },
            "signature": { "type": "string" },
            "signer": { "type": "string" }
        }
    })
}

/// Validates `instance` against `schema`, collecting every violation.
///
/// `label` prefixes each violation so callers can tell which document failed.
///
/// # Errors
///
/// Returns [`PluginError::Validation`] if the schema does not compile or the
/// instance violates it.
pub(crate) fn validate_against(
    schema: &Value,
    instance: &Value,
    label: &str,
) -> Result<(), PluginError> {
    let validator = jsonschema::validator_for(schema).map_err(|error| {
        PluginError::invalid(format!("{label} schema is not a valid JSON Schema: {error}"))
    })?;
    let violations: Vec<String> = validator
        .iter_errors(instance)
        .map(|error| format!("{label}: {error}"))
        .collect();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(PluginError::Validation { violations })
    }
}

/// Returns a violation when `schema` does not compile as a JSON Schema.
pub(crate) fn compile_violation(schema: &Value, label: &str) -> Option<String> {
    jsonschema::validator_for(schema)
        .err()
        .map(|error| format!("{label} is not a valid JSON Schema: {error}"))
}
