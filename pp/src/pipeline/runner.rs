//! Pipeline runner
//!
//! A [`Pipeline`] holds what every run shares: the crew, the LLM client and
//! the prompt set, all read-only behind `Arc`. Each submission gets its own
//! [`PipelineRun`], which owns the growing context, the usage
//! counters and its state. Runs never share mutable state, so any number of
//! them may be driven concurrently against one pipeline.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{FailureKind, PipelineFailure, UsageMetrics};
use crate::agent::{Agent, AgentCall, ContextEntry};
use crate::crew::{Crew, Stage};
use crate::llm::{LlmClient, Message};
use crate::prompts::PromptLoader;
use crate::template::{self, TemplateError};

/// Per-run limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPolicy {
    /// Extra attempts a structured stage gets after its answer fails validation
    pub max_repair_attempts: u32,

    /// Response token cap for every agent call
    pub max_tokens: u32,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            max_repair_attempts: 0,
            max_tokens: 8192,
        }
    }
}

/// Lifecycle of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running { stage: String },
    Succeeded,
    Failed,
}

/// What one stage produced
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub stage: String,
    pub instruction: String,
    pub output: String,
    /// Validated value, for stages with an output schema
    pub structured: Option<Value>,
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    pub run_id: Uuid,
    /// Final stage's raw answer
    pub output: String,
    /// Final stage's validated value, when it has an output schema
    pub structured: Option<Value>,
    pub usage: UsageMetrics,
    /// Every stage's output, in execution order
    pub stages: Vec<StageOutput>,
}

/// Shared, immutable pipeline configuration
#[derive(Clone)]
pub struct Pipeline {
    crew: Arc<Crew>,
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLoader>,
    policy: RunPolicy,
}

impl Pipeline {
    pub fn new(crew: Arc<Crew>, llm: Arc<dyn LlmClient>, prompts: Arc<PromptLoader>, policy: RunPolicy) -> Self {
        debug!(stages = crew.stages().len(), ?policy, "Pipeline::new: called");
        Self {
            crew,
            llm,
            prompts,
            policy,
        }
    }

    pub fn crew(&self) -> &Crew {
        &self.crew
    }

    pub fn policy(&self) -> RunPolicy {
        self.policy
    }

    /// Fresh run for one submission
    pub fn new_run(&self) -> PipelineRun {
        let run_id = Uuid::now_v7();
        debug!(%run_id, "Pipeline::new_run: called");
        PipelineRun {
            run_id,
            crew: self.crew.clone(),
            llm: self.llm.clone(),
            prompts: self.prompts.clone(),
            policy: self.policy,
            context: Vec::new(),
            stages: Vec::new(),
            usage: UsageMetrics::default(),
            state: RunState::Pending,
        }
    }

    /// Create a run and execute it to completion
    pub async fn run(&self, inputs: &HashMap<String, String>) -> Result<RunOutput, PipelineFailure> {
        self.new_run().run(inputs).await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("crew", &self.crew)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// One execution of the pipeline; single use
pub struct PipelineRun {
    run_id: Uuid,
    crew: Arc<Crew>,
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLoader>,
    policy: RunPolicy,
    context: Vec<ContextEntry>,
    stages: Vec<StageOutput>,
    usage: UsageMetrics,
    state: RunState,
}

impl PipelineRun {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Usage accumulated so far
    pub fn usage(&self) -> UsageMetrics {
        self.usage
    }

    /// Execute every stage in order
    ///
    /// All stage templates are checked against `inputs` before any agent is
    /// called. Once this returns, the run is inert: calling it again fails
    /// with [`FailureKind::Inert`].
    pub async fn run(&mut self, inputs: &HashMap<String, String>) -> Result<RunOutput, PipelineFailure> {
        debug!(run_id = %self.run_id, input_count = inputs.len(), "PipelineRun::run: called");
        if self.state != RunState::Pending {
            debug!(run_id = %self.run_id, state = ?self.state, "PipelineRun::run: run is not pending");
            return Err(PipelineFailure {
                run_id: self.run_id,
                kind: FailureKind::Inert,
                stage: None,
                usage: UsageMetrics::default(),
            });
        }

        let crew = self.crew.clone();
        if let Err((stage, err)) = check_inputs(crew.stages(), inputs) {
            warn!(run_id = %self.run_id, %stage, error = %err, "PipelineRun::run: input check failed");
            return Err(self.fail(FailureKind::Template(err), Some(stage)));
        }

        info!(run_id = %self.run_id, stages = crew.stages().len(), "Pipeline run started");

        for stage in crew.stages() {
            self.state = RunState::Running {
                stage: stage.name().to_string(),
            };
            info!(run_id = %self.run_id, stage = %stage.name(), "Stage started");

            let instruction = match template::render(&stage.definition.description_template, inputs) {
                Ok(instruction) => instruction,
                Err(err) => return Err(self.fail(err.into(), Some(stage.name().to_string()))),
            };

            let output = match self.execute_stage(stage, instruction).await {
                Ok(output) => output,
                Err(kind) => {
                    warn!(run_id = %self.run_id, stage = %stage.name(), error = %kind, "Stage failed");
                    return Err(self.fail(kind, Some(stage.name().to_string())));
                }
            };

            info!(
                run_id = %self.run_id,
                stage = %stage.name(),
                prompt_tokens = self.usage.prompt_tokens,
                completion_tokens = self.usage.completion_tokens,
                "Stage completed"
            );
            self.context.push(ContextEntry {
                stage: output.stage.clone(),
                instruction: output.instruction.clone(),
                output: output.output.clone(),
            });
            self.stages.push(output);
        }

        self.state = RunState::Succeeded;
        let (output, structured) = self
            .stages
            .last()
            .map(|s| (s.output.clone(), s.structured.clone()))
            .unwrap_or_default();

        info!(
            run_id = %self.run_id,
            total_tokens = self.usage.total_tokens(),
            requests = self.usage.successful_requests,
            "Pipeline run succeeded"
        );
        Ok(RunOutput {
            run_id: self.run_id,
            output,
            structured,
            usage: self.usage,
            stages: self.stages.clone(),
        })
    }

    /// Execute the run unless `cancel` completes first
    ///
    /// On cancellation the in-flight agent call is dropped and the failure
    /// carries the usage of every call that finished.
    pub async fn run_until<F>(&mut self, inputs: &HashMap<String, String>, cancel: F) -> Result<RunOutput, PipelineFailure>
    where
        F: Future<Output = ()>,
    {
        debug!(run_id = %self.run_id, "PipelineRun::run_until: called");
        let outcome = {
            let run = self.run(inputs);
            tokio::pin!(run);
            tokio::select! {
                biased;
                _ = cancel => None,
                result = &mut run => Some(result),
            }
        };

        match outcome {
            Some(result) => result,
            None => {
                let stage = match &self.state {
                    RunState::Running { stage } => Some(stage.clone()),
                    _ => None,
                };
                warn!(run_id = %self.run_id, ?stage, "Pipeline run cancelled");
                Err(self.fail(FailureKind::Cancelled, stage))
            }
        }
    }

    /// One stage, including repair attempts for structured output
    async fn execute_stage(&mut self, stage: &Stage, instruction: String) -> Result<StageOutput, FailureKind> {
        debug!(run_id = %self.run_id, stage = %stage.name(), "PipelineRun::execute_stage: called");
        let agent = Agent::new(
            stage.definition.agent.clone(),
            stage.role.clone(),
            self.llm.clone(),
            self.prompts.clone(),
            self.policy.max_tokens,
        );
        let schema = stage.validator.as_deref();
        let mut followups: Vec<Message> = Vec::new();
        let mut attempt = 0;

        loop {
            let call = AgentCall {
                stage: stage.name(),
                instruction: &instruction,
                expected_output: &stage.definition.expected_output,
                context: &self.context,
                schema,
                followups: &followups,
            };
            let raw = agent.invoke(&call, &mut self.usage).await?;

            let Some(validator) = schema else {
                debug!(stage = %stage.name(), "PipelineRun::execute_stage: unstructured stage");
                return Ok(StageOutput {
                    stage: stage.name().to_string(),
                    instruction,
                    output: raw,
                    structured: None,
                });
            };

            match validator.parse(&raw) {
                Ok(value) => {
                    debug!(stage = %stage.name(), attempt, "PipelineRun::execute_stage: output validated");
                    return Ok(StageOutput {
                        stage: stage.name().to_string(),
                        instruction,
                        output: raw,
                        structured: Some(value),
                    });
                }
                Err(err) if attempt < self.policy.max_repair_attempts => {
                    attempt += 1;
                    warn!(
                        run_id = %self.run_id,
                        stage = %stage.name(),
                        attempt,
                        max = self.policy.max_repair_attempts,
                        error = %err,
                        "Structured output rejected, asking for a repair"
                    );
                    let note = agent.repair_message(stage.name(), validator, &err)?;
                    followups.push(Message::assistant(raw));
                    followups.push(note);
                }
                Err(err) => return Err(FailureKind::Schema(err)),
            }
        }
    }

    fn fail(&mut self, kind: FailureKind, stage: Option<String>) -> PipelineFailure {
        self.state = RunState::Failed;
        PipelineFailure {
            run_id: self.run_id,
            kind,
            stage,
            usage: self.usage,
        }
    }
}

impl std::fmt::Debug for PipelineRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRun")
            .field("run_id", &self.run_id)
            .field("state", &self.state)
            .field("usage", &self.usage)
            .field("completed_stages", &self.stages.len())
            .finish_non_exhaustive()
    }
}

/// Every stage's placeholders must be satisfiable before anything runs
///
/// Reports the first stage with a gap and every variable missing across all
/// stages.
fn check_inputs(stages: &[Stage], inputs: &HashMap<String, String>) -> Result<(), (String, TemplateError)> {
    let mut first_stage: Option<&str> = None;
    let mut missing: Vec<String> = Vec::new();

    for stage in stages {
        let gaps = template::missing_variables(&stage.definition.description_template, inputs);
        if !gaps.is_empty() && first_stage.is_none() {
            first_stage = Some(stage.name());
        }
        for name in gaps {
            if !missing.contains(&name) {
                missing.push(name);
            }
        }
    }

    match first_stage {
        Some(stage) => Err((stage.to_string(), TemplateError::MissingVariables { missing })),
        None => Ok(()),
    }
}
