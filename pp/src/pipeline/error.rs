//! Pipeline failure types

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use super::UsageMetrics;
use crate::agent::ExecutionError;
use crate::schema::SchemaValidationError;
use crate::template::TemplateError;

/// Why a run stopped
#[derive(Debug, Error)]
pub enum FailureKind {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Schema validation failed at {0}")]
    Schema(#[from] SchemaValidationError),

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Run has already been executed")]
    Inert,
}

/// A failed run, with the usage it accrued before stopping
#[derive(Debug, Error)]
pub struct PipelineFailure {
    pub run_id: Uuid,
    pub kind: FailureKind,
    /// Stage that was executing, if any had started
    pub stage: Option<String>,
    /// Partial usage up to the failure
    pub usage: UsageMetrics,
}

impl std::fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.stage {
            Some(stage) => write!(f, "Stage '{}': {}", stage, self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl PipelineFailure {
    /// Whether submitting the same inputs again could succeed
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            FailureKind::Execution(e) => e.is_retryable(),
            FailureKind::Cancelled => true,
            FailureKind::Template(_) | FailureKind::Schema(_) | FailureKind::Inert => false,
        }
    }

    /// How long the provider asked callers to wait, for rate-limited runs
    pub fn retry_after(&self) -> Option<Duration> {
        match &self.kind {
            FailureKind::Execution(e) => e.retry_after(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ExecutionCause;
    use crate::llm::LlmError;
    use crate::schema::Violation;

    fn failure(kind: FailureKind, stage: Option<&str>) -> PipelineFailure {
        PipelineFailure {
            run_id: Uuid::now_v7(),
            kind,
            stage: stage.map(str::to_string),
            usage: UsageMetrics::default(),
        }
    }

    #[test]
    fn test_display_with_stage() {
        let f = failure(
            FailureKind::Schema(SchemaValidationError::new("milestones", Violation::Missing)),
            Some("resource_allocation"),
        );
        assert_eq!(
            f.to_string(),
            "Stage 'resource_allocation': Schema validation failed at milestones: required field is missing"
        );
    }

    #[test]
    fn test_display_without_stage() {
        let f = failure(FailureKind::Inert, None);
        assert_eq!(f.to_string(), "Run has already been executed");
    }

    #[test]
    fn test_is_retryable() {
        let rate_limited = ExecutionError::new(
            "s",
            ExecutionCause::Llm(LlmError::RateLimited {
                retry_after: Duration::from_secs(1),
            }),
        );
        let rate_limited = failure(FailureKind::Execution(rate_limited), Some("s"));
        assert!(rate_limited.is_retryable());
        assert_eq!(rate_limited.retry_after(), Some(Duration::from_secs(1)));
        assert_eq!(failure(FailureKind::Cancelled, None).retry_after(), None);
        assert!(failure(FailureKind::Cancelled, None).is_retryable());
        assert!(!failure(FailureKind::Inert, None).is_retryable());
        assert!(
            !failure(
                FailureKind::Template(TemplateError::MissingVariables {
                    missing: vec!["industry".to_string()]
                }),
                None
            )
            .is_retryable()
        );
    }
}
