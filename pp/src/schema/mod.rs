//! Structured output contracts
//!
//! A stage may name an output schema. Its agent is then asked for a value
//! matching the schema, and the answer must pass the schema's validator
//! before the pipeline moves on. Validators are looked up by name in a
//! [`SchemaRegistry`], so new contracts plug in without touching the runner.

mod plan;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::llm::OutputSchema;

pub use plan::{Milestone, PROJECT_PLAN_SCHEMA, ProjectPlan, ProjectPlanSchema, TaskEstimate};

/// Path used when the violation concerns the whole value
pub const ROOT_PATH: &str = "$";

/// A structured answer that does not conform to its schema
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{path}: {violation}")]
pub struct SchemaValidationError {
    /// Field path, e.g. `milestones[0].tasks[1]`
    pub path: String,
    pub violation: Violation,
}

impl SchemaValidationError {
    pub fn new(path: impl Into<String>, violation: Violation) -> Self {
        Self {
            path: path.into(),
            violation,
        }
    }
}

/// What was wrong at a field path
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Violation {
    #[error("output is not valid JSON: {0}")]
    NotJson(String),

    #[error("required field is missing")]
    Missing,

    #[error("expected {expected}, found {found}")]
    WrongType { expected: &'static str, found: &'static str },

    #[error("must be greater than zero, got {0}")]
    NotPositive(f64),

    #[error("duplicate task name {0:?}")]
    DuplicateTaskName(String),

    #[error("references unknown task {0:?}")]
    DanglingReference(String),
}

/// Validation hook attachable to any stage
pub trait OutputValidator: Send + Sync {
    /// Name used in crew configuration (`output-schema: project-plan`)
    fn name(&self) -> &str;

    /// One-line description sent to the provider with the schema
    fn description(&self) -> &str;

    /// JSON Schema document describing the expected value
    fn json_schema(&self) -> serde_json::Value;

    /// Check a decoded value, including any cross-field rules
    fn validate(&self, value: &serde_json::Value) -> Result<(), SchemaValidationError>;

    /// Decode a raw answer and validate it
    fn parse(&self, raw: &str) -> Result<serde_json::Value, SchemaValidationError> {
        debug!(schema = %self.name(), raw_len = raw.len(), "OutputValidator::parse: called");
        let value = extract_json(raw)?;
        self.validate(&value)?;
        Ok(value)
    }

    /// Provider-facing form of the schema
    fn output_schema(&self) -> OutputSchema {
        OutputSchema::new(self.name().replace('-', "_"), self.description(), self.json_schema())
    }
}

/// Validators by name
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    validators: HashMap<String, Arc<dyn OutputValidator>>,
}

impl SchemaRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in contract
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ProjectPlanSchema));
        registry
    }

    /// Add or replace a validator under its own name
    pub fn register(&mut self, validator: Arc<dyn OutputValidator>) {
        debug!(name = %validator.name(), "SchemaRegistry::register: called");
        self.validators.insert(validator.name().to_string(), validator);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn OutputValidator>> {
        self.validators.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry").field("validators", &self.names()).finish()
    }
}

/// Pull a JSON value out of a model answer
///
/// Accepts bare JSON, JSON inside a Markdown code fence, or JSON preceded
/// and followed by prose.
pub fn extract_json(raw: &str) -> Result<serde_json::Value, SchemaValidationError> {
    let trimmed = raw.trim();
    let candidate = strip_code_fence(trimmed).unwrap_or(trimmed);

    match serde_json::from_str(candidate) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            debug!(error = %first_err, "extract_json: direct parse failed, scanning for object");
            let start = candidate.find('{');
            let end = candidate.rfind('}');
            match (start, end) {
                (Some(start), Some(end)) if start < end => serde_json::from_str(&candidate[start..=end])
                    .map_err(|e| SchemaValidationError::new(ROOT_PATH, Violation::NotJson(e.to_string()))),
                _ => Err(SchemaValidationError::new(
                    ROOT_PATH,
                    Violation::NotJson(first_err.to_string()),
                )),
            }
        }
    }
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    let body_start = rest.find('\n')? + 1;
    let body = &rest[body_start..];
    let body_end = body.rfind("```")?;
    Some(body[..body_end].trim())
}

/// JSON type name for error messages
pub(crate) fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
