//! Reasoner capability (§6.4): prompt → text, with token usage metering.

use crate::error::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Default)]
pub struct ReasonerOutput {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[async_trait]
pub trait Reasoner: Send + Sync {
    /// `effort` is passed through to the vendor (e.g. "low"/"medium"/"high").
    /// `reasoning_summary` requests an inline reasoning trace when supported.
    async fn complete(
        &self,
        prompt: &str,
        effort: &str,
        reasoning_summary: bool,
    ) -> Result<ReasonerOutput>;
}
