use super::http::{read_body, send_checked};
use super::streaming::{SseEvent, SseStream};
use super::{error::ProviderError, ChatStream, LlmProvider, ProviderKind};
use crate::models::ChatMessage;
use async_trait::async_trait;
use futures::future;
use futures::stream::{StreamExt, TryStreamExt};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic requires max_tokens on every request
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API request format
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

/// Streaming event payloads we care about; everything else is ignored
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamPayload {
    ContentBlockDelta { delta: StreamDelta },
    Error { error: StreamErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    #[serde(default)]
    message: String,
}

/// Anthropic Messages API adapter. Plain chat only; tool use is not offered here.
pub struct AnthropicProvider {
    api_key: SecretString,
    base_url: String,
    model: String,
    max_tokens: u32,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(api_key: SecretString, model: String, base_url: Option<String>, max_tokens: Option<u32>) -> Self {
        let base_url = base_url
            .map(|url| trim_base_url(&url))
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string());

        Self {
            api_key,
            base_url,
            model,
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            client: Client::new(),
        }
    }

    fn request(&self, messages: &[ChatMessage], system_prompt: &str, stream: bool) -> reqwest::RequestBuilder {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: (!system_prompt.is_empty()).then_some(system_prompt),
            messages,
            stream,
        };

        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
    }
}

/// Drop trailing slashes and `/v1` segments; the adapter appends `/v1/messages` itself
fn trim_base_url(url: &str) -> String {
    let mut url = url.trim();
    loop {
        let without_slash = url.trim_end_matches('/');
        let stripped = match without_slash.strip_suffix("/v1") {
            // "https://v1" names a host, not a path segment
            Some(rest) if !rest.ends_with('/') => rest,
            _ => without_slash,
        };
        if stripped == url {
            return url.to_string();
        }
        url = stripped;
    }
}

/// Extract the text increment (if any) carried by one streaming event
fn text_delta(event: &SseEvent) -> Result<Option<String>, ProviderError> {
    if event.data.trim().is_empty() {
        return Ok(None);
    }

    match serde_json::from_str::<StreamPayload>(&event.data) {
        Ok(StreamPayload::ContentBlockDelta {
            delta: StreamDelta::TextDelta { text },
        }) => Ok((!text.is_empty()).then_some(text)),
        Ok(StreamPayload::Error { error }) => Err(ProviderError::StreamError(error.message)),
        Ok(_) => Ok(None),
        Err(e) => {
            tracing::warn!("Failed to parse Anthropic stream event: {} - Data: {}", e, event.data);
            Ok(None)
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<ChatStream, ProviderError> {
        let response = send_checked(self.request(messages, system_prompt, true), "anthropic", cancel).await?;

        let cancel = cancel.clone();
        let stream = SseStream::new(response.bytes_stream())
            .map_err(ProviderError::HttpError)
            .try_filter_map(|event| future::ready(text_delta(&event)))
            .take_until(async move { cancel.cancelled().await });

        Ok(Box::pin(stream))
    }

    async fn chat_complete(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        let response = send_checked(self.request(messages, system_prompt, false), "anthropic", cancel).await?;
        let response_text = read_body(response, cancel).await?;
        tracing::debug!("anthropic provider response body: {}", response_text);

        let parsed: MessagesResponse = serde_json::from_str(&response_text).map_err(|e| {
            tracing::error!("Failed to parse anthropic response: {}", e);
            e
        })?;

        Ok(parsed
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}
