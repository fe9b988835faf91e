//! Mistral chat completions client (OpenAI-compatible wire format)

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::types::{call_names, Message, ModelResponse, Role, ToolCall};
use super::{check_status, parse_arguments, transport_error, ModelClient};
use crate::config::MistralConfig;
use crate::error::ModelProtocolError;
use crate::prompts::SYSTEM_PROMPT;
use crate::tools::ToolDefinition;

/// Mistral API client
pub struct MistralClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    system_prompt: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    /// JSON text on the wire; some deployments send an object instead
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireToolSpec<'a>,
}

#[derive(Debug, Serialize)]
struct WireToolSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl MistralClient {
    pub fn new(config: &MistralConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().unwrap_or_default(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
            system_prompt: SYSTEM_PROMPT.to_string(),
        })
    }

    /// Set the system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Build headers for API requests
    fn headers(&self) -> Result<HeaderMap, ModelProtocolError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|_| ModelProtocolError::Transport("invalid API key".to_string()))?,
        );
        Ok(headers)
    }

    fn wire_messages(&self, transcript: &[Message]) -> Vec<WireMessage> {
        let names = call_names(transcript);
        let mut messages = vec![WireMessage {
            role: "system".to_string(),
            content: Some(self.system_prompt.clone()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }];
        messages.extend(transcript.iter().map(|m| match m.role {
            Role::User => WireMessage {
                role: "user".to_string(),
                content: Some(m.text().to_string()),
                tool_calls: Vec::new(),
                tool_call_id: None,
                name: None,
            },
            Role::Assistant => WireMessage {
                role: "assistant".to_string(),
                content: Some(m.text().to_string()),
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: Some(c.id.clone()),
                        kind: function_kind(),
                        function: WireFunction {
                            name: c.name.clone(),
                            arguments: Value::String(c.arguments.to_string()),
                        },
                    })
                    .collect(),
                tool_call_id: None,
                name: None,
            },
            Role::Tool => WireMessage {
                role: "tool".to_string(),
                content: Some(m.text().to_string()),
                tool_calls: Vec::new(),
                tool_call_id: m.tool_call_id.clone(),
                name: m
                    .tool_call_id
                    .as_deref()
                    .and_then(|id| names.get(id))
                    .map(|name| name.to_string()),
            },
        }));
        messages
    }
}

fn into_response(message: WireMessage) -> Result<ModelResponse, ModelProtocolError> {
    if !message.tool_calls.is_empty() {
        let calls = message
            .tool_calls
            .into_iter()
            .map(|c| {
                let id = c.id.filter(|id| !id.is_empty()).ok_or_else(|| {
                    ModelProtocolError::Malformed(format!("tool call `{}` has no id", c.function.name))
                })?;
                let arguments = parse_arguments(&c.function.name, c.function.arguments)?;
                Ok(ToolCall::new(id, c.function.name, arguments))
            })
            .collect::<Result<Vec<_>, ModelProtocolError>>()?;
        return Ok(ModelResponse::ToolCallRequest(calls));
    }

    match message.content.as_deref().map(str::trim) {
        Some(content) if !content.is_empty() => Ok(ModelResponse::FinalAnswer(content.to_string())),
        _ => Err(ModelProtocolError::Empty),
    }
}

#[async_trait]
impl ModelClient for MistralClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn converse(
        &self,
        transcript: &[Message],
        tools: &[&ToolDefinition],
    ) -> Result<ModelResponse, ModelProtocolError> {
        let request = ChatRequest {
            model: &self.model,
            messages: self.wire_messages(transcript),
            tools: tools
                .iter()
                .map(|t| WireTool {
                    kind: "function",
                    function: WireToolSpec {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.parameters,
                    },
                })
                .collect(),
            tool_choice: (!tools.is_empty()).then_some("auto"),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!(
            "Mistral: chat model={} messages={} tools={}",
            self.model,
            request.messages.len(),
            request.tools.len()
        );

        let response = self
            .http_client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        let response = check_status(response, self.timeout).await?;
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| ModelProtocolError::Malformed(format!("chat response: {}", e)))?;

        let choice = parsed.choices.into_iter().next().ok_or(ModelProtocolError::Empty)?;
        into_response(choice.message)
    }

    async fn list_models(&self) -> Result<Vec<String>, ModelProtocolError> {
        let response = self
            .http_client
            .get(format!("{}/v1/models", self.base_url))
            .headers(self.headers()?)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        let response = check_status(response, self.timeout).await?;
        let list: ModelList = response
            .json()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}
