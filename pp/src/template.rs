//! Stage instruction templates
//!
//! Instructions reference input variables as `{name}`. Doubled braces
//! (`{{` and `}}`) render as literal braces. A placeholder whose variable is
//! absent is an error, never left in the output.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use thiserror::Error;
use tracing::debug;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid"));

/// Template rendering errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("missing template variable(s): {}", .missing.join(", "))]
    MissingVariables { missing: Vec<String> },
}

/// Variable names referenced by a template, in first-use order, without repeats
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        if let Some(name) = caps.get(1)
            && !names.iter().any(|n| n == name.as_str())
        {
            names.push(name.as_str().to_string());
        }
    }
    names
}

/// Variables a template needs that `vars` does not provide
pub fn missing_variables(template: &str, vars: &HashMap<String, String>) -> Vec<String> {
    placeholders(template)
        .into_iter()
        .filter(|name| !vars.contains_key(name))
        .collect()
}

/// Substitute every placeholder, failing if any variable is absent
pub fn render(template: &str, vars: &HashMap<String, String>) -> Result<String, TemplateError> {
    debug!(template_len = template.len(), var_count = vars.len(), "render: called");
    let missing = missing_variables(template, vars);
    if !missing.is_empty() {
        debug!(?missing, "render: missing variables");
        return Err(TemplateError::MissingVariables { missing });
    }

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| match caps.get(1) {
        Some(name) => vars[name.as_str()].clone(),
        None if &caps[0] == "{{" => "{".to_string(),
        None => "}".to_string(),
    });

    Ok(rendered.into_owned())
}
