//! Language-model client
//!
//! Talks to any OpenAI-compatible chat-completions endpoint (Groq by
//! default). One request per turn: fixed system instruction, the user's
//! utterance, a token ceiling, and a sampling temperature.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::voice::Generator;
use crate::{Error, Result};

/// Default chat-completions endpoint base
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Default model
pub const DEFAULT_MODEL: &str = "llama-3.1-70b-versatile";

/// Default token ceiling for spoken replies
pub const DEFAULT_MAX_TOKENS: u32 = 200;

/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Chat-completions request
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

/// A message in the request
#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Chat-completions response
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Error envelope returned by OpenAI-compatible endpoints
#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<serde_json::Value>,
}

/// Generates replies to user utterances
pub struct ChatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    system_prompt: String,
    max_tokens: u32,
    temperature: f32,
}

impl ChatClient {
    /// Create a new chat client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, model: String, system_prompt: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "API key required for chat completions".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model,
            system_prompt,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        })
    }

    /// Use a different endpoint base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Override the sampling parameters
    #[must_use]
    pub const fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    /// Request a reply for the user's utterance
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContentPolicy`] when the endpoint rejects the topic,
    /// [`Error::Llm`] for any other failure
    pub async fn complete(&self, user_text: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_text,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat request failed");
                Error::Llm(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(classify_api_error(status.as_u16(), &body));
        }

        let result: ChatResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse chat response");
            Error::Llm(e.to_string())
        })?;

        let choice = result
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Llm("empty chat response".to_string()))?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(Error::ContentPolicy("reply was filtered".to_string()));
        }

        let text = choice
            .message
            .content
            .unwrap_or_default()
            .trim()
            .to_string();
        if text.is_empty() {
            return Err(Error::Llm("empty reply text".to_string()));
        }

        tracing::debug!(reply_len = text.len(), "chat completion received");
        Ok(text)
    }
}

/// Map a non-success chat API response to an error
///
/// Content-policy rejections get their own class so the caller can speak the
/// topic-redirect fallback.
fn classify_api_error(status: u16, body: &str) -> Error {
    let envelope: Option<ApiErrorBody> = serde_json::from_str::<ApiErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error);

    let message = envelope
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| body.to_string());

    let haystack = format!(
        "{} {} {}",
        envelope.as_ref().and_then(|e| e.kind.as_deref()).unwrap_or(""),
        envelope
            .as_ref()
            .and_then(|e| e.code.as_ref())
            .map(std::string::ToString::to_string)
            .unwrap_or_default(),
        message
    )
    .to_lowercase();

    if haystack.contains("content_filter")
        || haystack.contains("content_policy")
        || haystack.contains("moderation")
        || haystack.contains("flagged")
    {
        Error::ContentPolicy(message)
    } else {
        Error::Llm(format!("chat API error {status}: {message}"))
    }
}

#[async_trait]
impl Generator for ChatClient {
    async fn generate(&self, text: &str) -> Result<String> {
        self.complete(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_generic_error() {
        let err = classify_api_error(500, r#"{"error":{"message":"boom","type":"server_error"}}"#);
        assert!(matches!(err, Error::Llm(_)));
    }

    #[test]
    fn test_classify_content_policy_by_type() {
        let err = classify_api_error(
            400,
            r#"{"error":{"message":"request blocked","type":"content_policy_violation"}}"#,
        );
        assert!(err.is_content_policy());
    }

    #[test]
    fn test_classify_content_policy_by_code() {
        let err = classify_api_error(
            400,
            r#"{"error":{"message":"nope","code":"content_filter"}}"#,
        );
        assert!(err.is_content_policy());
    }

    #[test]
    fn test_classify_moderation_flag_in_message() {
        let err = classify_api_error(
            400,
            r#"{"error":{"message":"input was flagged by moderation"}}"#,
        );
        assert!(err.is_content_policy());
    }

    #[test]
    fn test_classify_unparseable_body() {
        let err = classify_api_error(502, "bad gateway");
        assert!(matches!(err, Error::Llm(_)));
    }
}
