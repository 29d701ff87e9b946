//! Cost estimation from token usage

use thiserror::Error;
use tracing::debug;

use crate::pipeline::UsageMetrics;

/// Dollars per million tokens used when no rate is configured
pub const DEFAULT_RATE_PER_MILLION: f64 = 0.150;

const TOKENS_PER_MILLION: f64 = 1_000_000.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CostError {
    #[error("Invalid rate {0}: must be a finite, non-negative number")]
    InvalidRate(f64),
}

/// Estimated dollars for a run: `rate * (prompt + completion) / 1_000_000`
///
/// Prompt and completion tokens are billed at the same rate.
pub fn estimate_cost(usage: &UsageMetrics, rate_per_million: f64) -> Result<f64, CostError> {
    debug!(total_tokens = usage.total_tokens(), %rate_per_million, "estimate_cost: called");
    if !rate_per_million.is_finite() || rate_per_million < 0.0 {
        return Err(CostError::InvalidRate(rate_per_million));
    }
    Ok(rate_per_million * usage.total_tokens() as f64 / TOKENS_PER_MILLION)
}

/// Dollar amount with four decimals, e.g. `$0.0012`
pub fn format_cost(cost: f64) -> String {
    format!("${:.4}", cost)
}
