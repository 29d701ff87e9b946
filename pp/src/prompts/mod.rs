//! Prompt Template System
//!
//! Loads and renders `.pmt` (prompt template) files that turn role
//! descriptors and stage definitions into LLM messages.
//!
//! Template loading chain:
//! 1. `{prompts.dir}/{name}.pmt` (configured override)
//! 2. Embedded fallback in code
//!
//! Templates use Handlebars syntax. These are separate from stage
//! instruction templates, which use `{variable}` placeholders (see
//! [`crate::template`]).

pub mod embedded;
mod loader;

pub use loader::{AgentPromptContext, PromptLoader, RepairPromptContext, TaskPromptContext};
