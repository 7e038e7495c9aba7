use super::http::{read_body, send_checked};
use super::streaming::SseStream;
use super::{error::ProviderError, ChatStream, LlmProvider, ProviderKind, ToolCapableProvider};
use crate::capability::classifier;
use crate::models::{
    ChatMessage, StopReason, ToolCall, ToolDefinition, ToolUseMessage, ToolUseRequest, ToolUseResponse,
    VendorPayload,
};
use crate::providers::error::ToolsNotSupportedError;
use async_trait::async_trait;
use futures::future;
use futures::stream::{Stream, StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI Chat Completions request format
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAiTool<'a>>,
}

/// Tool definition
#[derive(Debug, Serialize)]
struct OpenAiTool<'a> {
    r#type: &'static str, // "function"
    function: OpenAiFunctionDef<'a>,
}

/// Function definition; `parameters` is the neutral `input_schema` under its wire name
#[derive(Debug, Serialize)]
struct OpenAiFunctionDef<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

impl<'a> From<&'a ToolDefinition> for OpenAiTool<'a> {
    fn from(tool: &'a ToolDefinition) -> Self {
        Self {
            r#type: "function",
            function: OpenAiFunctionDef {
                name: &tool.name,
                description: &tool.description,
                parameters: &tool.input_schema,
            },
        }
    }
}

/// OpenAI Streaming Chunk
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: WireDelta,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>, // DeepSeek/vLLM style
}

/// One streamed increment, reduced to the fields adapters act on.
/// Tool-call fragments are dropped: tool rounds never stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamDelta {
    pub content: Option<String>,
    pub reasoning: Option<String>,
}

impl From<WireDelta> for StreamDelta {
    fn from(delta: WireDelta) -> Self {
        let non_empty = |s: Option<String>| s.filter(|s| !s.is_empty());
        Self {
            content: non_empty(delta.content),
            reasoning: non_empty(delta.reasoning_content).or_else(|| non_empty(delta.reasoning)),
        }
    }
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta, ProviderError>> + Send>>;

/// Render a vendor `error` member (object with message, or bare string)
fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

/// Parse one SSE data payload into a delta
fn parse_stream_chunk(data: &str) -> Result<Option<StreamDelta>, ProviderError> {
    if data.trim().is_empty() {
        return Ok(None);
    }

    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::warn!("Failed to parse OpenAI chunk: {} - Data: {}", e, data);
            return Ok(None);
        }
    };

    if let Some(error) = chunk.error {
        return Err(ProviderError::StreamError(error_message(&error)));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .map(|choice| StreamDelta::from(choice.delta))
        .filter(|delta| delta.content.is_some() || delta.reasoning.is_some()))
}

/// Flatten assistant `content` (string or array of parts) into text
fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

/// Coerce `function.arguments` into an argument map.
///
/// OpenAI sends a JSON-encoded string; some compatible servers send the object
/// directly.
fn coerce_arguments(name: &str, arguments: Option<&Value>) -> Map<String, Value> {
    let parsed = match arguments {
        None | Some(Value::Null) => return Map::new(),
        Some(Value::String(s)) if s.trim().is_empty() => return Map::new(),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Unparsable arguments for tool '{}': {} - {}", name, e, s);
                return Map::new();
            }
        },
        Some(other) => other.clone(),
    };

    match parsed {
        Value::Object(map) => map,
        other => {
            tracing::warn!("Non-object arguments for tool '{}': {}", name, other);
            Map::new()
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

/// Validate one vendor tool call into the neutral shape.
///
/// A call without an id or function name means the model does not really speak
/// the tool protocol, so it is reported as a capability failure.
fn parse_tool_call(raw: &Value) -> Result<ToolCall, ToolsNotSupportedError> {
    let id = non_empty_str(raw.get("id"))
        .ok_or_else(|| ToolsNotSupportedError::malformed_tool_call(format!("tool call without id: {}", raw)))?;
    let function = raw.get("function");
    let name = non_empty_str(function.and_then(|f| f.get("name"))).ok_or_else(|| {
        ToolsNotSupportedError::malformed_tool_call(format!("tool call without function name: {}", raw))
    })?;

    Ok(ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        input: coerce_arguments(name, function.and_then(|f| f.get("arguments"))),
    })
}

/// Validate the `tool_calls` member of an assistant message.
///
/// Absent or `null` means no calls; anything other than an array is a
/// capability failure, like a malformed entry.
fn parse_tool_calls(message: &Value) -> Result<Vec<ToolCall>, ToolsNotSupportedError> {
    match message.get("tool_calls") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(calls)) => calls.iter().map(parse_tool_call).collect(),
        Some(other) => Err(ToolsNotSupportedError::malformed_tool_call(format!(
            "tool_calls is not an array: {}",
            other
        ))),
    }
}

/// Generic client for the Chat Completions wire format.
///
/// Used directly by the hosted OpenAI adapter and wrapped by the local adapter
/// with a different base URL.
pub struct OpenAiCompatibleClient {
    provider: ProviderKind,
    /// Base URL including the `/v1` segment
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    max_tokens: Option<u32>,
    client: Client,
}

impl OpenAiCompatibleClient {
    pub fn new(
        provider: ProviderKind,
        base_url: String,
        api_key: Option<SecretString>,
        model: String,
        max_tokens: Option<u32>,
    ) -> Self {
        Self {
            provider,
            base_url,
            api_key,
            model,
            max_tokens,
            client: Client::new(),
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn label(&self) -> &'static str {
        self.provider.as_str()
    }

    fn post(&self, body: &ChatCompletionRequest<'_>) -> RequestBuilder {
        let mut req_builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json");

        if let Some(ref api_key) = self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key.expose_secret()));
        }

        req_builder.json(body)
    }

    fn chat_request<'a>(&'a self, messages: &[ChatMessage], system_prompt: &str, stream: bool) -> ChatCompletionRequest<'a> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            wire.push(json!({"role": "system", "content": system_prompt}));
        }
        wire.extend(
            messages
                .iter()
                .map(|m| json!({"role": m.role.as_str(), "content": m.content})),
        );

        ChatCompletionRequest {
            model: &self.model,
            messages: wire,
            max_tokens: self.max_tokens,
            stream,
            tools: Vec::new(),
        }
    }

    /// Translate a neutral tool conversation into wire messages.
    ///
    /// Assistant turns are replayed verbatim so the vendor sees its own
    /// `tool_calls` array again.
    fn tool_messages(&self, request: &ToolUseRequest) -> Result<Vec<Value>, ProviderError> {
        let mut wire = Vec::with_capacity(request.messages.len() + 1);
        if !request.system_prompt.is_empty() {
            wire.push(json!({"role": "system", "content": request.system_prompt}));
        }

        for message in &request.messages {
            match message {
                ToolUseMessage::User { content } => {
                    wire.push(json!({"role": "user", "content": content}));
                }
                ToolUseMessage::Assistant { raw_message } => {
                    if raw_message.provider() != self.provider {
                        return Err(ProviderError::InvalidConversation(format!(
                            "assistant turn from '{}' cannot be replayed to '{}'",
                            raw_message.provider(),
                            self.provider
                        )));
                    }
                    wire.push(raw_message.message().clone());
                }
                ToolUseMessage::Tool { tool_call_id, content } => {
                    wire.push(json!({"role": "tool", "tool_call_id": tool_call_id, "content": content}));
                }
            }
        }

        Ok(wire)
    }

    /// Send a non-streaming request and return the first choice's message and finish reason
    async fn send_complete(
        &self,
        body: &ChatCompletionRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<(Value, Option<String>), ProviderError> {
        let response = send_checked(self.post(body), self.label(), cancel).await?;
        let response_text = read_body(response, cancel).await?;
        tracing::debug!("{} provider response body: {}", self.label(), response_text);

        let mut parsed: Value = serde_json::from_str(&response_text).map_err(|e| {
            tracing::error!("Failed to parse {} response: {}", self.label(), e);
            tracing::error!("Response body was: {}", response_text);
            e
        })?;

        if let Some(error) = parsed.get("error").filter(|e| !e.is_null()) {
            return Err(ProviderError::InvalidResponse(format!(
                "{} error: {}",
                self.label(),
                error_message(error)
            )));
        }

        let choice = parsed
            .pointer_mut("/choices/0")
            .map(Value::take)
            .ok_or_else(|| ProviderError::InvalidResponse(format!("{} response has no choices", self.label())))?;

        let finish_reason = choice.get("finish_reason").and_then(Value::as_str).map(str::to_string);
        let message = choice
            .get("message")
            .cloned()
            .ok_or_else(|| ProviderError::InvalidResponse(format!("{} choice has no message", self.label())))?;

        Ok((message, finish_reason))
    }

    /// Start a streaming completion and yield its content/reasoning deltas
    pub async fn stream_deltas(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<DeltaStream, ProviderError> {
        let body = self.chat_request(messages, system_prompt, true);
        let response = send_checked(self.post(&body), self.label(), cancel).await?;

        let cancel = cancel.clone();
        let stream = SseStream::new(response.bytes_stream())
            .map_err(ProviderError::HttpError)
            .try_take_while(|event| future::ready(Ok(!event.is_done())))
            .try_filter_map(|event| future::ready(parse_stream_chunk(&event.data)))
            .take_until(async move { cancel.cancelled().await });

        Ok(Box::pin(stream))
    }

    /// Single shot plain completion
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        let body = self.chat_request(messages, system_prompt, false);
        let (message, _) = self.send_complete(&body, cancel).await?;
        Ok(content_text(message.get("content")))
    }

    /// One non-streaming tool-enabled round
    pub async fn tool_round(
        &self,
        request: &ToolUseRequest,
        cancel: &CancellationToken,
    ) -> Result<ToolUseResponse, ProviderError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: self.tool_messages(request)?,
            max_tokens: self.max_tokens,
            stream: false,
            tools: request.tools.iter().map(OpenAiTool::from).collect(),
        };

        let (message, finish_reason) = self.send_complete(&body, cancel).await.map_err(classifier::classify)?;

        let tool_calls = parse_tool_calls(&message)?;

        let stop_reason = StopReason::from_finish_reason(finish_reason.as_deref());
        tracing::debug!(
            "{} tool round finished: finish_reason={:?}, tool_calls={}",
            self.label(),
            finish_reason,
            tool_calls.len()
        );

        Ok(ToolUseResponse::new(
            stop_reason,
            content_text(message.get("content")),
            tool_calls,
            VendorPayload::new(self.provider, message),
        ))
    }
}

/// Hosted OpenAI Chat Completions adapter
pub struct OpenAiProvider {
    client: OpenAiCompatibleClient,
}

impl OpenAiProvider {
    pub fn new(api_key: SecretString, model: String, base_url: Option<String>, max_tokens: Option<u32>) -> Self {
        let base_url = base_url
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());

        Self {
            client: OpenAiCompatibleClient::new(ProviderKind::OpenAi, base_url, Some(api_key), model, max_tokens),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        self.client.model()
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<ChatStream, ProviderError> {
        let deltas = self.client.stream_deltas(messages, system_prompt, cancel).await?;
        Ok(Box::pin(deltas.try_filter_map(|delta| future::ready(Ok(delta.content)))))
    }

    async fn chat_complete(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        self.client.complete(messages, system_prompt, cancel).await
    }

    fn as_tool_capable(&self) -> Option<&dyn ToolCapableProvider> {
        Some(self)
    }
}

#[async_trait]
impl ToolCapableProvider for OpenAiProvider {
    async fn create_tool_use_message(
        &self,
        request: &ToolUseRequest,
        cancel: &CancellationToken,
    ) -> Result<ToolUseResponse, ProviderError> {
        self.client.tool_round(request, cancel).await
    }
}
