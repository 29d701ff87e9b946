//! Token accounting for a single run

use serde::{Deserialize, Serialize};

use crate::llm::TokenUsage;

/// Token totals for one run
///
/// Only ever grows: each successful agent call adds its reported counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub successful_requests: u64,
}

impl UsageMetrics {
    /// Record one successful request
    pub fn add(&mut self, usage: &TokenUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(usage.input_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(usage.output_tokens);
        self.successful_requests = self.successful_requests.saturating_add(1);
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}
