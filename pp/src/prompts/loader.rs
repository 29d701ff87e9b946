//! Prompt Loader
//!
//! Loads prompt templates from an override directory or falls back to
//! embedded defaults, then renders them with Handlebars in strict mode.

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;

/// Context for the `agent-system` template
#[derive(Debug, Clone, Serialize)]
pub struct AgentPromptContext<'a> {
    pub role: &'a str,
    pub goal: &'a str,
    pub backstory: &'a str,
}

/// Context for the `stage-task` template
#[derive(Debug, Clone, Serialize)]
pub struct TaskPromptContext<'a> {
    pub instruction: &'a str,
    pub expected_output: &'a str,
    /// Present when the stage requires structured output
    pub schema_name: Option<&'a str>,
}

/// Context for the `repair` template
#[derive(Debug, Clone, Serialize)]
pub struct RepairPromptContext<'a> {
    pub schema_name: &'a str,
    pub path: &'a str,
    pub violation: String,
}

/// Loads and renders prompt templates
///
/// All templates are read and compiled up front, so a broken override is
/// reported at startup rather than in the middle of a run.
pub struct PromptLoader {
    hbs: Handlebars<'static>,
}

impl PromptLoader {
    /// Create a loader, preferring `{dir}/{name}.pmt` over the embedded template
    pub fn new(override_dir: Option<&Path>) -> Result<Self> {
        debug!(?override_dir, "PromptLoader::new: called");
        let mut hbs = Handlebars::new();
        hbs.set_strict_mode(true);
        hbs.register_escape_fn(handlebars::no_escape);

        for name in embedded::NAMES {
            let source = Self::load_template(name, override_dir)?;
            hbs.register_template_string(name, source)
                .map_err(|e| eyre!("Failed to compile prompt template {}: {}", name, e))?;
        }

        Ok(Self { hbs })
    }

    /// Create a loader that only uses embedded prompts
    pub fn embedded_only() -> Result<Self> {
        Self::new(None)
    }

    /// Override file if present, embedded text otherwise
    fn load_template(name: &str, override_dir: Option<&Path>) -> Result<String> {
        if let Some(dir) = override_dir {
            let path: PathBuf = dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!(?path, "PromptLoader::load_template: found override");
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("Failed to read prompt {}: {}", path.display(), e));
            }
            debug!(?path, "PromptLoader::load_template: no override");
        }

        embedded::get_embedded(name)
            .map(str::to_string)
            .ok_or_else(|| eyre!("Prompt template not found: {}", name))
    }

    /// Render a registered template with the given context
    pub fn render<T: Serialize>(&self, template_name: &str, context: &T) -> Result<String> {
        debug!(%template_name, "PromptLoader::render: called");
        self.hbs
            .render(template_name, context)
            .map(|s| s.trim_end().to_string())
            .map_err(|e| eyre!("Failed to render template {}: {}", template_name, e))
    }

    pub fn agent_system(&self, context: &AgentPromptContext<'_>) -> Result<String> {
        self.render("agent-system", context)
    }

    pub fn stage_task(&self, context: &TaskPromptContext<'_>) -> Result<String> {
        self.render("stage-task", context)
    }

    pub fn repair(&self, context: &RepairPromptContext<'_>) -> Result<String> {
        self.render("repair", context)
    }
}

impl std::fmt::Debug for PromptLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptLoader").finish_non_exhaustive()
    }
}
