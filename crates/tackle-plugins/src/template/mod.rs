//! Invocation template rendering.
//!
//! Templates are JSON documents containing `${{NAME}}` placeholders. Rendering
//! first checks every placeholder against an explicit allow-list, then checks
//! that a value was supplied for each, and only then substitutes. A
//! placeholder inside a JSON string literal receives the escaped string
//! content; a placeholder in value position receives the full JSON encoding
//! of the prop. The rendered text must parse as JSON.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Upper bound on template and rendered sizes in bytes.
pub const MAX_TEMPLATE_BYTES: usize = 1024 * 1024;

static PLACEHOLDER: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"\$\{\{([^}]+)\}\}"));

/// Errors raised while rendering a template.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template text exceeds [`MAX_TEMPLATE_BYTES`].
    #[error("template too large: {size} bytes exceeds {MAX_TEMPLATE_BYTES}")]
    TemplateTooLarge {
        /// Template size in bytes.
        size: usize,
    },

    /// A placeholder is absent from the allow-list.
    #[error("placeholder {{{{{name}}}}} is not allowed")]
    PlaceholderNotAllowed {
        /// Offending placeholder name.
        name: String,
    },

    /// An allowed placeholder has no supplied value.
    #[error("missing value for placeholder: {name}")]
    MissingValue {
        /// Placeholder name.
        name: String,
    },

    /// Substitution produced text that does not parse as JSON.
    #[error("rendered template is not valid JSON")]
    InvalidJson,

    /// The rendered text exceeds [`MAX_TEMPLATE_BYTES`].
    ///
    /// Rendering stops as soon as the limit is crossed.
    #[error("rendered JSON too large: {size} bytes exceeds {MAX_TEMPLATE_BYTES}")]
    OutputTooLarge {
        /// Bytes rendered when the limit was crossed.
        size: usize,
    },

    /// Props failed the template's props schema.
    #[error("invalid props: {}", .violations.join(", "))]
    InvalidProps {
        /// Individual schema violations.
        violations: Vec<String>,
    },

    /// The placeholder pattern failed to compile.
    #[error("placeholder pattern unavailable: {message}")]
    Pattern {
        /// Regex engine error.
        message: String,
    },
}

/// Successful render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedTemplate {
    rendered_json: String,
    used_placeholders: Vec<String>,
}

impl RenderedTemplate {
    /// Returns the rendered JSON text.
    #[must_use]
    pub const fn rendered_json(&self) -> &str {
        self.rendered_json.as_str()
    }

    /// Returns the substituted placeholder names in first-use order.
    #[must_use]
    pub fn used_placeholders(&self) -> &[String] {
        &self.used_placeholders
    }

    /// Parses the rendered text.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::InvalidJson`]; rendering already guarantees
    /// validity so this only fails if the value was constructed elsewhere.
    pub fn to_value(&self) -> Result<Value, TemplateError> {
        serde_json::from_str(&self.rendered_json).map_err(|_| TemplateError::InvalidJson)
    }
}

/// Result-or-error value returned by [`safe_render`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RenderOutcome {
    /// Rendering succeeded.
    #[serde(rename = "result")]
    Rendered(RenderedTemplate),
    /// Rendering failed; the message describes why.
    #[serde(rename = "error")]
    Failed(String),
}

impl RenderOutcome {
    /// Returns the rendered template, if any.
    #[must_use]
    pub const fn rendered(&self) -> Option<&RenderedTemplate> {
        match self {
            Self::Rendered(rendered) => Some(rendered),
            Self::Failed(_) => None,
        }
    }

    /// Returns the failure message, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Rendered(_) => None,
            Self::Failed(message) => Some(message.as_str()),
        }
    }
}

/// Renders `template` with `props`, permitting only `allowed` placeholders.
///
/// # Errors
///
/// Returns [`TemplateError::PlaceholderNotAllowed`] before any substitution if
/// the template names a placeholder outside `allowed`,
/// [`TemplateError::MissingValue`] if a prop is absent,
/// [`TemplateError::InvalidJson`] if the result does not parse, and a size
/// error when either side exceeds [`MAX_TEMPLATE_BYTES`].
///
/// # Example
///
/// ```
/// use serde_json::{json, Map, Value};
/// use tackle_plugins::template::render;
///
/// let props: Map<String, Value> =
///     serde_json::from_value(json!({ "Q": "cats", "N": 3 })).expect("object");
/// let rendered = render(
///     r#"{"q":"${{Q}}","n":${{N}}}"#,
///     &props,
///     &["Q".to_owned(), "N".to_owned()],
/// )
/// .expect("renders");
/// assert_eq!(rendered.rendered_json(), r#"{"q":"cats","n":3}"#);
/// ```
pub fn render(
    template: &str,
    props: &Map<String, Value>,
    allowed: &[String],
) -> Result<RenderedTemplate, TemplateError> {
    if template.len() > MAX_TEMPLATE_BYTES {
        return Err(TemplateError::TemplateTooLarge {
            size: template.len(),
        });
    }
    let pattern = PLACEHOLDER.as_ref().map_err(|error| TemplateError::Pattern {
        message: error.to_string(),
    })?;

    let mut names: Vec<String> = Vec::new();
    for captures in pattern.captures_iter(template) {
        if let Some(name) = captures.get(1).map(|m| m.as_str().trim().to_owned()) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    if let Some(name) = names.iter().find(|name| !allowed.contains(name)) {
        return Err(TemplateError::PlaceholderNotAllowed { name: name.clone() });
    }
    if let Some(name) = names.iter().find(|name| !props.contains_key(name.as_str())) {
        return Err(TemplateError::MissingValue { name: name.clone() });
    }

    let mut rendered = String::with_capacity(template.len());
    let mut lexer = JsonLexer::default();
    let mut cursor = 0;
    for captures in pattern.captures_iter(template) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let preceding = template.get(cursor..whole.start()).unwrap_or_default();
        lexer.advance(preceding);
        push_bounded(&mut rendered, preceding)?;
        if let Some(value) = props.get(name.as_str().trim()) {
            push_bounded(&mut rendered, &encode(value, lexer.in_string))?;
        }
        cursor = whole.end();
    }
    push_bounded(&mut rendered, template.get(cursor..).unwrap_or_default())?;

    if serde_json::from_str::<Value>(&rendered).is_err() {
        return Err(TemplateError::InvalidJson);
    }
    Ok(RenderedTemplate {
        rendered_json: rendered,
        used_placeholders: names,
    })
}

fn push_bounded(rendered: &mut String, text: &str) -> Result<(), TemplateError> {
    let size = rendered.len().saturating_add(text.len());
    if size > MAX_TEMPLATE_BYTES {
        return Err(TemplateError::OutputTooLarge { size });
    }
    rendered.push_str(text);
    Ok(())
}

/// Validates props against `schema` and renders, capturing any failure.
#[must_use]
pub fn safe_render(
    template: &str,
    props: &Map<String, Value>,
    allowed: &[String],
    schema: Option<&Value>,
) -> RenderOutcome {
    let attempt = schema
        .map_or(Ok(()), |props_schema| validate_props(props, props_schema))
        .and_then(|()| render(template, props, allowed));
    match attempt {
        Ok(rendered) => RenderOutcome::Rendered(rendered),
        Err(error) => RenderOutcome::Failed(error.to_string()),
    }
}

/// Validates props against a JSON Schema.
///
/// # Errors
///
/// Returns [`TemplateError::InvalidProps`] listing every violation, including
/// a schema that fails to compile.
pub fn validate_props(props: &Map<String, Value>, schema: &Value) -> Result<(), TemplateError> {
    let validator = jsonschema::validator_for(schema).map_err(|error| TemplateError::InvalidProps {
        violations: vec![format!("schema compilation failed: {error}")],
    })?;
    let instance = Value::Object(props.clone());
    let violations: Vec<String> = validator
        .iter_errors(&instance)
        .map(|error| error.to_string())
        .collect();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(TemplateError::InvalidProps { violations })
    }
}

/// Encodes a prop for its syntactic position.
fn encode(value: &Value, in_string: bool) -> String {
    if !in_string {
        return value.to_string();
    }
    let text = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    let quoted = Value::String(text).to_string();
    quoted
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or_default()
        .to_owned()
}

/// Tracks whether the scan position sits inside a JSON string literal.
#[derive(Debug, Default)]
struct JsonLexer {
    in_string: bool,
    escaped: bool,
}

impl JsonLexer {
    fn advance(&mut self, segment: &str) {
        for c in segment.chars() {
            if self.escaped {
                self.escaped = false;
            } else if self.in_string && c == '\\' {
                self.escaped = true;
            } else if c == '"' {
                self.in_string = !self.in_string;
            }
        }
    }
}

#[cfg(test)]
mod tests;
