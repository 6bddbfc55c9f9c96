use crate::{
    config::CompletionConfig,
    error::{FluxError, Result},
    models::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage},
};
use serde_json::Value;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const REGENERATE_TEMPERATURE: f32 = 0.9;

/// Rewrites free-form scene descriptions into generation prompts through an
/// OpenAI-compatible chat completion endpoint.
#[derive(Clone)]
pub struct TextClient {
    http: reqwest::Client,
    config: CompletionConfig,
}

impl TextClient {
    pub fn new(config: CompletionConfig, http: reqwest::Client) -> Self {
        Self { http, config }
    }

    pub fn build_request(&self, text: &str, regenerate: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.config.model().to_string(),
            messages: vec![
                ChatMessage::system(self.config.prompt_template()),
                ChatMessage::user(text),
            ],
            // a hotter sample keeps repeated attempts from converging
            temperature: if regenerate {
                REGENERATE_TEMPERATURE
            } else {
                DEFAULT_TEMPERATURE
            },
        }
    }

    pub async fn optimize(&self, text: &str, regenerate: bool) -> Result<String> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| {
            FluxError::ConfigError(
                "OpenAI API key is not configured. Set OPENAI_API_KEY in the environment.".into(),
            )
        })?;

        let endpoint = format!("{}/chat/completions", self.config.api_url());
        let request = self.build_request(text, regenerate);
        log::info!(
            "Optimizing prompt with model: {} (temperature {})",
            request.model,
            request.temperature
        );

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| FluxError::UpstreamError {
                status: None,
                message: format!("Completion request failed: {}", e),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| FluxError::UpstreamError {
            status: Some(status.as_u16()),
            message: format!("Completion response unreadable: {}", e),
        })?;

        if !status.is_success() {
            log::error!("Completion backend returned {}: {}", status, body);
            return Err(FluxError::UpstreamError {
                status: Some(status.as_u16()),
                message: upstream_message(&body),
            });
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| FluxError::UpstreamError {
                status: Some(status.as_u16()),
                message: format!("Malformed completion response: {}", e),
            })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| FluxError::UpstreamError {
                status: Some(status.as_u16()),
                message: "Completion response contained no content".into(),
            })
    }
}

/// Backend error text: `error.message`, a plain `error` string, or a
/// generic fallback.
fn upstream_message(body: &str) -> String {
    let error = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("error").cloned());

    match error {
        Some(Value::Object(object)) => match object.get("message").and_then(Value::as_str) {
            Some(message) => format!("OpenAI API error: {}", message),
            None => format!("OpenAI API error: {}", Value::Object(object)),
        },
        Some(Value::String(message)) => format!("OpenAI API error: {}", message),
        _ => "Error while optimizing the prompt".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> TextClient {
        TextClient::new(
            CompletionConfig::new().with_prompt_template("SYSTEM"),
            reqwest::Client::new(),
        )
    }

    #[test]
    fn test_temperature_depends_on_regenerate() {
        assert_eq!(client().build_request("cat", false).temperature, 0.7);
        assert_eq!(client().build_request("cat", true).temperature, 0.9);
    }

    #[test]
    fn test_messages_order() {
        let request = client().build_request("a nurse in wwii", false);
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(
            request.messages,
            vec![ChatMessage::system("SYSTEM"), ChatMessage::user("a nurse in wwii")]
        );
    }

    #[test]
    fn test_upstream_message_variants() {
        assert_eq!(
            upstream_message(r#"{"error":{"message":"Invalid API key"}}"#),
            "OpenAI API error: Invalid API key"
        );
        assert_eq!(
            upstream_message(r#"{"error":"quota exceeded"}"#),
            "OpenAI API error: quota exceeded"
        );
        assert_eq!(upstream_message("<html>"), "Error while optimizing the prompt");
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let err = client().optimize("cat", false).await.unwrap_err();
        assert!(matches!(err, FluxError::ConfigError(_)));
    }
}
