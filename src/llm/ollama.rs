//! Ollama chat client
//!
//! Uses the native `/api/chat` endpoint with `tools`. Ollama does not assign
//! tool call ids, so the client issues its own.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::types::{call_names, Message, ModelResponse, Role, ToolCall};
use super::{check_status, parse_arguments, transport_error, ModelClient};
use crate::config::OllamaConfig;
use crate::error::ModelProtocolError;
use crate::prompts::SYSTEM_PROMPT;
use crate::tools::ToolDefinition;

/// Ollama API client
pub struct OllamaClient {
    http_client: reqwest::Client,
    host: String,
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
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunction {
    name: String,
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
    message: Option<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Tool call written into the message text instead of `tool_calls`
#[derive(Debug, Deserialize)]
struct ContentToolCall {
    tool: String,
    #[serde(default, alias = "arguments")]
    parameters: Value,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            host: config.host.trim_end_matches('/').to_string(),
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

    fn wire_messages(&self, transcript: &[Message]) -> Vec<WireMessage> {
        let names = call_names(transcript);
        let mut messages = vec![WireMessage {
            role: "system".to_string(),
            content: self.system_prompt.clone(),
            tool_calls: Vec::new(),
            tool_name: None,
        }];
        messages.extend(transcript.iter().map(|m| WireMessage {
            role: match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            }
            .to_string(),
            content: m.text().to_string(),
            tool_calls: m
                .tool_calls
                .iter()
                .map(|c| WireToolCall {
                    function: WireFunction {
                        name: c.name.clone(),
                        arguments: c.arguments.clone(),
                    },
                })
                .collect(),
            tool_name: m
                .tool_call_id
                .as_deref()
                .and_then(|id| names.get(id))
                .map(|name| name.to_string()),
        }));
        messages
    }
}

fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Strip a surrounding markdown code fence, if any
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    // Drop the language tag on the opening line
    match inner.split_once('\n') {
        Some((tag, rest)) if !tag.trim_start().starts_with('{') => rest.trim(),
        _ => inner.trim(),
    }
}

fn content_tool_call(text: &str) -> Option<ToolCall> {
    let candidate = strip_fence(text);
    if !candidate.starts_with('{') {
        return None;
    }
    let call: ContentToolCall = serde_json::from_str(candidate).ok()?;
    Some(ToolCall::new(new_call_id(), call.tool, call.parameters))
}

fn into_response(message: WireMessage) -> Result<ModelResponse, ModelProtocolError> {
    if !message.tool_calls.is_empty() {
        let calls = message
            .tool_calls
            .into_iter()
            .map(|c| {
                let arguments = parse_arguments(&c.function.name, c.function.arguments)?;
                Ok(ToolCall::new(new_call_id(), c.function.name, arguments))
            })
            .collect::<Result<Vec<_>, ModelProtocolError>>()?;
        return Ok(ModelResponse::ToolCallRequest(calls));
    }

    let content = message.content.trim();
    if content.is_empty() {
        return Err(ModelProtocolError::Empty);
    }
    if let Some(call) = content_tool_call(content) {
        debug!("Ollama: tool call `{}` parsed from message content", call.name);
        return Ok(ModelResponse::ToolCallRequest(vec![call]));
    }
    Ok(ModelResponse::FinalAnswer(content.to_string()))
}

#[async_trait]
impl ModelClient for OllamaClient {
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
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        debug!(
            "Ollama: chat model={} messages={} tools={}",
            self.model,
            request.messages.len(),
            request.tools.len()
        );

        let response = self
            .http_client
            .post(format!("{}/api/chat", self.host))
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

        into_response(parsed.message.ok_or(ModelProtocolError::Empty)?)
    }

    async fn list_models(&self) -> Result<Vec<String>, ModelProtocolError> {
        let response = self
            .http_client
            .get(format!("{}/api/tags", self.host))
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        let response = check_status(response, self.timeout).await?;
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}
