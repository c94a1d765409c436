//! Token and cost accounting for LLM calls.

use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(mut self, other: TokenUsage) -> TokenUsage {
        self += other;
        self
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.requests = self.requests.saturating_add(rhs.requests);
        self.input_tokens = self.input_tokens.saturating_add(rhs.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(rhs.output_tokens);
    }
}

/// Wall-clock seconds spent in each pipeline layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerTimings {
    pub document_parse_seconds: f64,
    pub structuring_seconds: f64,
    pub validation_seconds: f64,
    pub explanation_seconds: f64,
}

/// Cost summary attached to every successful parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub llm_retries: u32,
    pub pages_processed: usize,
    pub timings: LayerTimings,
    #[serde(default)]
    pub parser_engine: Option<String>,
    #[serde(default)]
    pub parser_init_seconds: Option<f64>,
    #[serde(default)]
    pub parser_extract_seconds: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_adds_componentwise() {
        let first = TokenUsage {
            requests: 1,
            input_tokens: 100,
            output_tokens: 40,
        };
        let second = TokenUsage {
            requests: 2,
            input_tokens: 50,
            output_tokens: 10,
        };

        let combined = first + second;
        assert_eq!(combined.requests, 3);
        assert_eq!(combined.input_tokens, 150);
        assert_eq!(combined.output_tokens, 50);
        assert_eq!(combined.total_tokens(), 200);
    }
}
