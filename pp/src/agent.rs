//! Agent: a role descriptor bound to an LLM client
//!
//! An agent turns one stage call into a single completion request. Its
//! system prompt comes from the role; earlier stages are replayed as
//! instruction/answer message pairs so each stage sees the work before it.
//! Agents never retry; a failed call is reported with the stage name.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::crew::RoleDescriptor;
use crate::llm::{CompletionRequest, LlmClient, LlmError, Message, StopReason};
use crate::pipeline::UsageMetrics;
use crate::prompts::{AgentPromptContext, PromptLoader, RepairPromptContext, TaskPromptContext};
use crate::schema::{OutputValidator, SchemaValidationError};

/// An agent call that did not produce an answer
#[derive(Debug, Error)]
#[error("{cause}")]
pub struct ExecutionError {
    pub stage: String,
    pub cause: ExecutionCause,
}

impl ExecutionError {
    pub fn new(stage: impl Into<String>, cause: ExecutionCause) -> Self {
        Self {
            stage: stage.into(),
            cause,
        }
    }

    /// Whether a later attempt could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(&self.cause, ExecutionCause::Llm(e) if e.is_retryable())
    }

    /// Provider-requested wait before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match &self.cause {
            ExecutionCause::Llm(e) => e.retry_after(),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutionCause {
    #[error("LLM request failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Model returned an empty answer")]
    EmptyResponse,

    #[error("Structured answer was cut off at the {max_tokens} token limit")]
    Truncated { max_tokens: u32 },

    #[error("Prompt rendering failed: {0}")]
    Prompt(String),
}

/// Output of a completed stage, replayed to later stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    pub stage: String,
    pub instruction: String,
    pub output: String,
}

/// Everything one agent invocation needs
#[derive(Clone, Copy)]
pub struct AgentCall<'a> {
    pub stage: &'a str,
    pub instruction: &'a str,
    pub expected_output: &'a str,
    pub context: &'a [ContextEntry],
    pub schema: Option<&'a dyn OutputValidator>,
    /// Rejected answers and repair notes from earlier attempts at this stage
    pub followups: &'a [Message],
}

/// A role bound to a client and prompt set
pub struct Agent {
    key: String,
    role: Arc<RoleDescriptor>,
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptLoader>,
    max_tokens: u32,
}

impl Agent {
    pub fn new(
        key: impl Into<String>,
        role: Arc<RoleDescriptor>,
        llm: Arc<dyn LlmClient>,
        prompts: Arc<PromptLoader>,
        max_tokens: u32,
    ) -> Self {
        Self {
            key: key.into(),
            role,
            llm,
            prompts,
            max_tokens,
        }
    }

    /// Role key this agent was built from
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn role(&self) -> &RoleDescriptor {
        &self.role
    }

    /// Assemble the completion request for a call
    pub fn build_request(&self, call: &AgentCall<'_>) -> Result<CompletionRequest, ExecutionError> {
        debug!(agent = %self.key, stage = %call.stage, context = call.context.len(), "Agent::build_request: called");
        let prompt_err = |e: eyre::Report| ExecutionError::new(call.stage, ExecutionCause::Prompt(e.to_string()));

        let system_prompt = self
            .prompts
            .agent_system(&AgentPromptContext {
                role: &self.role.role,
                goal: &self.role.goal,
                backstory: &self.role.backstory,
            })
            .map_err(prompt_err)?;

        let task = self
            .prompts
            .stage_task(&TaskPromptContext {
                instruction: call.instruction,
                expected_output: call.expected_output,
                schema_name: call.schema.map(|s| s.name()),
            })
            .map_err(prompt_err)?;

        let mut messages = Vec::with_capacity(call.context.len() * 2 + 1 + call.followups.len());
        for entry in call.context {
            messages.push(Message::user(entry.instruction.clone()));
            messages.push(Message::assistant(entry.output.clone()));
        }
        messages.push(Message::user(task));
        messages.extend(call.followups.iter().cloned());

        Ok(CompletionRequest {
            system_prompt,
            messages,
            max_tokens: self.max_tokens,
            output_schema: call.schema.map(|s| s.output_schema()),
        })
    }

    /// Run one call, adding its token usage to `usage` on success
    pub async fn invoke(&self, call: &AgentCall<'_>, usage: &mut UsageMetrics) -> Result<String, ExecutionError> {
        debug!(agent = %self.key, stage = %call.stage, "Agent::invoke: called");
        let request = self.build_request(call)?;

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| ExecutionError::new(call.stage, ExecutionCause::Llm(e)))?;

        usage.add(&response.usage);
        debug!(
            stage = %call.stage,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Agent::invoke: response received"
        );

        if call.schema.is_some() && response.stop_reason == StopReason::MaxTokens {
            debug!(stage = %call.stage, max_tokens = self.max_tokens, "Agent::invoke: structured answer truncated");
            return Err(ExecutionError::new(
                call.stage,
                ExecutionCause::Truncated {
                    max_tokens: self.max_tokens,
                },
            ));
        }

        match response.content {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => {
                debug!(stage = %call.stage, "Agent::invoke: empty response");
                Err(ExecutionError::new(call.stage, ExecutionCause::EmptyResponse))
            }
        }
    }

    /// Message asking the model to fix a rejected structured answer
    pub fn repair_message(
        &self,
        stage: &str,
        schema: &dyn OutputValidator,
        error: &SchemaValidationError,
    ) -> Result<Message, ExecutionError> {
        debug!(agent = %self.key, %stage, path = %error.path, "Agent::repair_message: called");
        self.prompts
            .repair(&RepairPromptContext {
                schema_name: schema.name(),
                path: &error.path,
                violation: error.violation.to_string(),
            })
            .map(Message::user)
            .map_err(|e| ExecutionError::new(stage, ExecutionCause::Prompt(e.to_string())))
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("key", &self.key)
            .field("role", &self.role.role)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::mock::MockLlmClient;
    use crate::llm::{CompletionResponse, Role, TokenUsage};
    use crate::schema::{ProjectPlanSchema, Violation};

    fn agent(llm: Arc<dyn LlmClient>) -> Agent {
        let role = Arc::new(RoleDescriptor {
            role: "Estimation Expert".to_string(),
            goal: "Provide accurate time and resource estimates for tasks".to_string(),
            backstory: "Senior technical lead".to_string(),
        });
        let prompts = Arc::new(PromptLoader::embedded_only().unwrap());
        Agent::new("estimation_agent", role, llm, prompts, 1024)
    }

    fn call<'a>(context: &'a [ContextEntry], schema: Option<&'a dyn OutputValidator>) -> AgentCall<'a> {
        AgentCall {
            stage: "time_resource_estimation",
            instruction: "Estimate each task",
            expected_output: "Detailed estimates",
            context,
            schema,
            followups: &[],
        }
    }

    #[tokio::test]
    async fn test_invoke_records_usage() {
        let mock = Arc::new(MockLlmClient::new(vec![CompletionResponse::text(
            "Task A: 4h",
            TokenUsage::new(120, 30),
        )]));
        let agent = agent(mock.clone());
        let mut usage = UsageMetrics::default();

        let out = agent.invoke(&call(&[], None), &mut usage).await.unwrap();

        assert_eq!(out, "Task A: 4h");
        assert_eq!(usage.prompt_tokens, 120);
        assert_eq!(usage.completion_tokens, 30);
        assert_eq!(usage.successful_requests, 1);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invoke_llm_error_carries_stage() {
        let mock = Arc::new(MockLlmClient::scripted(vec![Err(LlmError::ApiError {
            status: 500,
            message: "boom".to_string(),
        })]));
        let agent = agent(mock);
        let mut usage = UsageMetrics::default();

        let err = agent.invoke(&call(&[], None), &mut usage).await.unwrap_err();

        assert_eq!(err.stage, "time_resource_estimation");
        assert!(matches!(err.cause, ExecutionCause::Llm(_)));
        assert!(err.is_retryable());
        assert_eq!(usage, UsageMetrics::default());
    }

    #[tokio::test]
    async fn test_invoke_empty_answer() {
        let mock = Arc::new(MockLlmClient::new(vec![CompletionResponse::text(
            "   ",
            TokenUsage::new(10, 1),
        )]));
        let agent = agent(mock);
        let mut usage = UsageMetrics::default();

        let err = agent.invoke(&call(&[], None), &mut usage).await.unwrap_err();
        assert!(matches!(err.cause, ExecutionCause::EmptyResponse));
        assert!(!err.is_retryable());
        // The request itself succeeded and was billed
        assert_eq!(usage.successful_requests, 1);
    }

    #[tokio::test]
    async fn test_invoke_truncated_structured_answer() {
        let cut_off = CompletionResponse {
            stop_reason: StopReason::MaxTokens,
            ..CompletionResponse::text(r#"{"tasks": [{"task_name": "A", "estimated"#, TokenUsage::new(200, 1024))
        };
        let mock = Arc::new(MockLlmClient::new(vec![cut_off]));
        let agent = agent(mock);
        let schema = ProjectPlanSchema;
        let mut usage = UsageMetrics::default();

        let err = agent.invoke(&call(&[], Some(&schema)), &mut usage).await.unwrap_err();

        assert_eq!(err.stage, "time_resource_estimation");
        assert!(matches!(err.cause, ExecutionCause::Truncated { max_tokens: 1024 }));
        assert!(!err.is_retryable());
        assert_eq!(usage.completion_tokens, 1024);
        assert_eq!(usage.successful_requests, 1);
    }

    #[tokio::test]
    async fn test_invoke_truncated_text_answer_is_kept() {
        let cut_off = CompletionResponse {
            stop_reason: StopReason::MaxTokens,
            ..CompletionResponse::text("Task A: 4h\nTask B:", TokenUsage::new(20, 8))
        };
        let agent = agent(Arc::new(MockLlmClient::new(vec![cut_off])));
        let mut usage = UsageMetrics::default();

        let out = agent.invoke(&call(&[], None), &mut usage).await.unwrap();
        assert!(out.starts_with("Task A: 4h"));
    }

    #[test]
    fn test_retry_after_from_rate_limit() {
        let err = ExecutionError::new(
            "task_breakdown",
            ExecutionCause::Llm(LlmError::RateLimited {
                retry_after: Duration::from_secs(30),
            }),
        );
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(
            ExecutionError::new("task_breakdown", ExecutionCause::EmptyResponse).retry_after(),
            None
        );
    }

    #[test]
    fn test_build_request_threads_context() {
        let agent = agent(Arc::new(MockLlmClient::new(vec![])));
        let context = vec![ContextEntry {
            stage: "task_breakdown".to_string(),
            instruction: "Break down the Website project".to_string(),
            output: "1. Design mockups".to_string(),
        }];

        let request = agent.build_request(&call(&context, None)).unwrap();

        assert!(request.system_prompt.starts_with("You are Estimation Expert."));
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].role, Role::User);
        assert_eq!(request.messages[0].content, "Break down the Website project");
        assert_eq!(request.messages[1].role, Role::Assistant);
        assert_eq!(request.messages[1].content, "1. Design mockups");
        assert!(request.messages[2].content.contains("Current Task: Estimate each task"));
        assert!(request.output_schema.is_none());
        assert_eq!(request.max_tokens, 1024);
    }

    #[test]
    fn test_build_request_with_schema() {
        let agent = agent(Arc::new(MockLlmClient::new(vec![])));
        let schema = ProjectPlanSchema;

        let request = agent.build_request(&call(&[], Some(&schema))).unwrap();

        let output_schema = request.output_schema.unwrap();
        assert_eq!(output_schema.name, "project_plan");
        assert!(request.messages[0].content.contains("`project-plan` schema"));
    }

    #[test]
    fn test_repair_message() {
        let agent = agent(Arc::new(MockLlmClient::new(vec![])));
        let error = SchemaValidationError::new("milestones", Violation::Missing);

        let message = agent
            .repair_message("resource_allocation", &ProjectPlanSchema, &error)
            .unwrap();

        assert_eq!(message.role, Role::User);
        assert!(message.content.contains("`milestones`: required field is missing"));
    }
}
