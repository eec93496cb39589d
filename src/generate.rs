//! Code generation adapter.
//!
//! Thin client for an OpenAI-compatible chat-completions service. The
//! engine sends one prompt per artifact and gets text back; everything else
//! (prompt wording, retries) belongs to the caller. Errors surface the
//! service's own `error` field so failures are diagnosable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GenerationError;

/// Request body for the chat-completions endpoint.
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Error envelope returned by the service on non-200 responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: serde_json::Value,
}

/// Seam for the completion service, mockable in tests.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Real client speaking the chat-completions wire format.
pub struct CompletionClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl CompletionClient {
    pub fn new(base_url: &str, model: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl ArtifactGenerator for CompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = CompletionRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            stream: false,
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = match resp.json::<ApiErrorBody>().await {
                Ok(body) if !body.error.is_null() => body.error.to_string(),
                _ => "no error detail in response body".to_string(),
            };
            return Err(GenerationError::Api {
                status: status.as_u16(),
                detail,
            });
        }

        let completion: CompletionResponse = resp.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(GenerationError::EmptyCompletion)?;

        Ok(content)
    }
}

/// Strip a Markdown code fence wrapping a generated artifact.
///
/// Completion services routinely wrap output in ```` ```json ... ``` ````
/// even when asked not to; downstream parsers need the bare payload.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the language tag on the opening fence line, if any.
    match body.split_once('\n') {
        Some((first_line, remainder)) if !first_line.trim().contains(' ') => remainder.trim(),
        _ => body.trim(),
    }
}
