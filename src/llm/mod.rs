//! LLM clients
//!
//! Both backends speak a structured tool-calling protocol and reduce every
//! reply to a [`ModelResponse`].

mod mistral;
mod ollama;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::config::{Config, Provider};
use crate::error::ModelProtocolError;
use crate::prompts;
use crate::tools::ToolDefinition;

pub use mistral::MistralClient;
pub use ollama::OllamaClient;
pub use types::{call_names, Message, ModelResponse, Role, ToolCall, ToolOutcome, ToolResult};

/// A conversational model that can request tool calls
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model name, for logs and diagnostics
    fn model(&self) -> &str;

    /// Send the transcript and tool catalog, get back an answer or tool calls
    async fn converse(
        &self,
        transcript: &[Message],
        tools: &[&ToolDefinition],
    ) -> Result<ModelResponse, ModelProtocolError>;

    /// Models the endpoint can serve
    async fn list_models(&self) -> Result<Vec<String>, ModelProtocolError>;
}

/// Build the client for the configured provider
pub fn from_config(config: &Config) -> Result<Arc<dyn ModelClient>> {
    let prompt = prompts::system_prompt(config.orchestrator.tool_access);
    Ok(match config.provider {
        Provider::Ollama => Arc::new(OllamaClient::new(&config.ollama)?.with_system_prompt(prompt)),
        Provider::Mistral => Arc::new(MistralClient::new(&config.mistral)?.with_system_prompt(prompt)),
    })
}

/// Whether `name` is among the models an endpoint reports
///
/// Names match exactly; an untagged name also matches its `:latest` tag, as
/// Ollama lists `llama3.2` under `llama3.2:latest`.
pub fn has_model(models: &[String], name: &str) -> bool {
    models
        .iter()
        .any(|m| m == name || (!name.contains(':') && m.strip_suffix(":latest") == Some(name)))
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> ModelProtocolError {
    if e.is_timeout() {
        ModelProtocolError::Timeout(timeout)
    } else if e.is_decode() {
        ModelProtocolError::Malformed(e.to_string())
    } else {
        ModelProtocolError::Transport(e.to_string())
    }
}

/// Fail on non-success statuses, keeping the server's error text
async fn check_status(
    response: reqwest::Response,
    timeout: Duration,
) -> Result<reqwest::Response, ModelProtocolError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response
        .text()
        .await
        .map_err(|e| transport_error(e, timeout))?;
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| api_error_message(&v))
        .unwrap_or(text);
    Err(ModelProtocolError::Http {
        status: status.as_u16(),
        message,
    })
}

/// `{"error": "..."}`, `{"error": {"message": "..."}}` or `{"message": "..."}`
fn api_error_message(body: &Value) -> Option<String> {
    let error = body.get("error");
    error
        .and_then(Value::as_str)
        .or_else(|| error.and_then(|e| e.get("message")).and_then(Value::as_str))
        .or_else(|| body.get("message").and_then(Value::as_str))
        .map(str::to_string)
}

/// Decode tool arguments that may arrive as an object or as JSON text
fn parse_arguments(tool: &str, raw: Value) -> Result<Value, ModelProtocolError> {
    match raw {
        Value::String(s) if s.trim().is_empty() => Ok(Value::Object(Default::default())),
        Value::String(s) => serde_json::from_str(&s).map_err(|e| {
            ModelProtocolError::Malformed(format!("arguments for `{}` are not valid JSON: {}", tool, e))
        }),
        Value::Null => Ok(Value::Object(Default::default())),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments("t", json!({"a": 1})).unwrap(), json!({"a": 1}));
        assert_eq!(parse_arguments("t", json!("{\"a\": 1}")).unwrap(), json!({"a": 1}));
        assert_eq!(parse_arguments("t", json!("")).unwrap(), json!({}));
        assert_eq!(parse_arguments("t", Value::Null).unwrap(), json!({}));
        assert!(matches!(
            parse_arguments("t", json!("{oops")),
            Err(ModelProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_has_model() {
        let models = vec![
            "llama3.2:latest".to_string(),
            "qwen2.5:7b".to_string(),
            "mistral-large-latest".to_string(),
        ];
        assert!(has_model(&models, "llama3.2"));
        assert!(has_model(&models, "llama3.2:latest"));
        assert!(has_model(&models, "qwen2.5:7b"));
        assert!(has_model(&models, "mistral-large-latest"));
        assert!(!has_model(&models, "qwen2.5"));
        assert!(!has_model(&models, "llama3.2:1b"));
        assert!(!has_model(&models, "mistral-large"));
        assert!(!has_model(&[], "llama3.2"));
    }

    #[test]
    fn test_from_config_picks_provider() {
        let mut config = Config::default();
        assert_eq!(from_config(&config).unwrap().model(), "llama3.2");
        config.provider = Provider::Mistral;
        config.mistral.api_key = Some("k".into());
        assert_eq!(from_config(&config).unwrap().model(), config.mistral.model);
    }
}
