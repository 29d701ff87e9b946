//! projectplanner - Multi-Agent Project Planning
//!
//! Turns a free-text project description into a structured project plan by
//! running a short pipeline of specialized LLM agents. Each agent consumes
//! the work of the agents before it; the final agent's answer must satisfy a
//! strict schema (tasks with estimates, milestones that reference tasks).
//!
//! # Core Concepts
//!
//! - **Roles**: persona, goal and backstory that shape an agent's system prompt
//! - **Stages**: instruction templates run strictly in order, each assigned to a role
//! - **Context threading**: every stage sees all earlier instructions and answers
//! - **Validated output**: a stage may name a schema its answer must pass
//! - **Usage accounting**: token counts summed per run and priced per million
//!
//! # Modules
//!
//! - [`llm`] - LLM client trait with Anthropic and OpenAI implementations
//! - [`prompts`] - Handlebars prompt templates for agents
//! - [`template`] - `{variable}` substitution for stage instructions
//! - [`schema`] - Output validators and the project plan contract
//! - [`crew`] - Role and stage definitions loaded from YAML
//! - [`agent`] - A role bound to an LLM client
//! - [`pipeline`] - Sequential stage runner
//! - [`cost`] - Usage to dollars
//! - [`planner`] - Planning facade producing a typed [`ProjectPlan`]
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod agent;
pub mod cli;
pub mod config;
pub mod cost;
pub mod crew;
pub mod llm;
pub mod pipeline;
pub mod planner;
pub mod prompts;
pub mod schema;
pub mod template;

// Re-export commonly used types
pub use agent::{Agent, ContextEntry, ExecutionCause, ExecutionError};
pub use config::{Config, LlmConfig};
pub use cost::{CostError, DEFAULT_RATE_PER_MILLION, estimate_cost, format_cost};
pub use crew::{ConfigError, Crew, RoleBook, RoleDescriptor, Stage, StageDefinition};
pub use llm::{
    AnthropicClient, CompletionRequest, CompletionResponse, LlmClient, LlmError, OpenAIClient, TokenUsage,
    create_client,
};
pub use pipeline::{
    FailureKind, Pipeline, PipelineFailure, PipelineRun, RunOutput, RunPolicy, RunState, StageOutput, UsageMetrics,
};
pub use planner::{PlanInputs, PlanOutcome, ProjectPlanner};
pub use prompts::PromptLoader;
pub use schema::{
    Milestone, OutputValidator, ProjectPlan, SchemaRegistry, SchemaValidationError, TaskEstimate, Violation,
};
pub use template::TemplateError;
