//! Multi-stage agent pipeline
//!
//! Stages run strictly in order. Each stage's instruction is rendered from
//! the run inputs, handed to the stage's agent together with every earlier
//! stage's instruction and answer, and, when the stage names an output
//! schema, validated before the next stage starts. Token usage from every
//! call is summed into the run's [`UsageMetrics`].

mod error;
mod runner;
mod usage;

pub use error::{FailureKind, PipelineFailure};
pub use runner::{Pipeline, PipelineRun, RunOutput, RunPolicy, RunState, StageOutput};
pub use usage::UsageMetrics;

pub use crate::agent::ContextEntry;
pub use crate::crew::StageDefinition;
