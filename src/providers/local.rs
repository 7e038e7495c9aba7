//! Local OpenAI-compatible model server (Ollama).
//!
//! Chat goes through the server's `/v1` OpenAI-compatible surface; model
//! listing and health checks use the native `/api/tags` endpoint.

use super::openai::{OpenAiCompatibleClient, StreamDelta};
use super::{error::ProviderError, ChatStream, LlmProvider, ProviderKind, ToolCapableProvider};
use crate::capability::CapabilityKey;
use crate::models::{ChatMessage, ToolUseRequest, ToolUseResponse};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const DEFAULT_LOCAL_ENDPOINT: &str = "http://localhost:11434";

/// Upper bound for introspection calls against the local server
pub const INTROSPECTION_TIMEOUT: Duration = Duration::from_secs(5);

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Normalize a local server URL to `scheme://host[:port][/path]`.
///
/// Surrounding whitespace, trailing slashes and any trailing `/v1` segments are
/// removed so the OpenAI-compatible suffix can be appended exactly once. Only
/// `http` and `https` are accepted.
pub fn normalize_endpoint(raw: &str) -> Result<String, ProviderError> {
    let invalid = |reason: &str| ProviderError::ConfigError(format!("Invalid endpoint '{}': {}", raw, reason));

    let trimmed = raw.trim();
    let (scheme, rest) = trimmed
        .split_once("://")
        .ok_or_else(|| invalid("missing http:// or https:// scheme"))?;
    let scheme = scheme.to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(invalid("scheme must be http or https"));
    }

    let mut rest = rest;
    loop {
        let without_slash = rest.trim_end_matches('/');
        let stripped = without_slash.strip_suffix("/v1").unwrap_or(without_slash);
        if stripped == rest {
            break;
        }
        rest = stripped;
    }

    if rest.is_empty() {
        return Err(invalid("missing host"));
    }

    let endpoint = format!("{}://{}", scheme, rest);
    let parsed = Url::parse(&endpoint).map_err(|e| invalid(&e.to_string()))?;
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }

    Ok(endpoint)
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

fn introspection_client() -> Client {
    Client::builder()
        .timeout(INTROSPECTION_TIMEOUT)
        .connect_timeout(INTROSPECTION_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        })
}

async fn fetch_tags(client: &Client, endpoint: &str) -> Result<Vec<String>, ProviderError> {
    let response = client
        .get(format!("{}/api/tags", endpoint))
        .send()
        .await?
        .error_for_status()?;
    let tags: TagsResponse = response.json().await?;
    Ok(tags.models.into_iter().map(|m| m.name).collect())
}

/// List models installed on a local server. Any failure yields an empty list.
pub async fn list_local_models(endpoint: &str) -> Vec<String> {
    let endpoint = match normalize_endpoint(endpoint) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            tracing::debug!("Not listing models: {}", e);
            return Vec::new();
        }
    };

    match fetch_tags(&introspection_client(), &endpoint).await {
        Ok(models) => models,
        Err(e) => {
            tracing::debug!("Failed to list models at {}: {}", endpoint, e);
            Vec::new()
        }
    }
}

/// Check that a local server answers its native API. Any failure yields `false`.
pub async fn test_local_connection(endpoint: &str) -> bool {
    let Ok(endpoint) = normalize_endpoint(endpoint) else {
        return false;
    };

    match introspection_client()
        .get(format!("{}/api/tags", endpoint))
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!("Connection test to {} failed: {}", endpoint, e);
            false
        }
    }
}

#[derive(Debug, Default)]
enum Phase {
    /// Nothing forwarded yet; holds content that may still open a `<think>` block
    #[default]
    Start,
    /// Model is streaming the separate reasoning field
    Reasoning,
    /// Inside an inline `<think>` block
    InlineThinking,
    Content,
}

/// Suppresses the reasoning phase some local models emit before their answer,
/// either as a separate `reasoning` delta field or as a leading inline
/// `<think>...</think>` block in the content.
#[derive(Debug, Default)]
struct ReasoningPhaseFilter {
    phase: Phase,
    buffer: String,
}

impl ReasoningPhaseFilter {
    fn accept(&mut self, delta: StreamDelta) -> Option<String> {
        let Some(content) = delta.content else {
            if delta.reasoning.is_some() && matches!(self.phase, Phase::Start) && self.buffer.is_empty() {
                tracing::debug!("Local model entered reasoning phase");
                self.phase = Phase::Reasoning;
            }
            return None;
        };

        match self.phase {
            Phase::Content => Some(content),
            Phase::Start | Phase::Reasoning => {
                if matches!(self.phase, Phase::Reasoning) {
                    tracing::debug!("Local model left reasoning phase");
                }
                self.buffer.push_str(&content);
                let head = self.buffer.trim_start();

                if let Some(after) = head.strip_prefix(THINK_OPEN) {
                    let after = after.to_string();
                    self.phase = Phase::InlineThinking;
                    self.buffer = after;
                    self.close_inline_block()
                } else if THINK_OPEN.starts_with(head) {
                    // Could still become "<think>"; wait for more
                    self.phase = Phase::Start;
                    None
                } else {
                    self.phase = Phase::Content;
                    Some(std::mem::take(&mut self.buffer))
                }
            }
            Phase::InlineThinking => {
                self.buffer.push_str(&content);
                self.close_inline_block()
            }
        }
    }

    /// Release whatever is still held when the stream ends. Text buffered while
    /// waiting to rule out a `<think>` tag is a real reply; an unclosed think
    /// block is dropped.
    fn finish(&mut self) -> Option<String> {
        match self.phase {
            Phase::Start | Phase::Reasoning if !self.buffer.is_empty() => {
                self.phase = Phase::Content;
                Some(std::mem::take(&mut self.buffer))
            }
            Phase::InlineThinking => {
                tracing::debug!("Local model stream ended inside a think block");
                self.buffer.clear();
                None
            }
            _ => None,
        }
    }

    fn close_inline_block(&mut self) -> Option<String> {
        let end = self.buffer.find(THINK_CLOSE)?;
        let rest = self.buffer[end + THINK_CLOSE.len()..].trim_start().to_string();
        self.buffer.clear();
        self.phase = Phase::Content;
        (!rest.is_empty()).then_some(rest)
    }
}

/// Ollama adapter: delegates the wire protocol to an [`OpenAiCompatibleClient`]
/// and adds streaming filtering plus native introspection.
pub struct LocalProvider {
    client: OpenAiCompatibleClient,
    endpoint: String,
}

impl LocalProvider {
    pub fn new(endpoint: Option<&str>, model: String, max_tokens: Option<u32>) -> Result<Self, ProviderError> {
        let endpoint = normalize_endpoint(endpoint.unwrap_or(DEFAULT_LOCAL_ENDPOINT))?;
        let client = OpenAiCompatibleClient::new(
            ProviderKind::Ollama,
            format!("{}/v1", endpoint),
            None,
            model,
            max_tokens,
        );

        Ok(Self { client, endpoint })
    }

    /// Normalized server URL (without `/v1`)
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn list_models(&self) -> Vec<String> {
        list_local_models(&self.endpoint).await
    }

    pub async fn test_connection(&self) -> bool {
        test_local_connection(&self.endpoint).await
    }
}

#[async_trait]
impl LlmProvider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn model(&self) -> &str {
        self.client.model()
    }

    fn capability_key(&self) -> CapabilityKey {
        CapabilityKey::local(ProviderKind::Ollama, self.client.model(), &self.endpoint)
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<ChatStream, ProviderError> {
        let deltas = self.client.stream_deltas(messages, system_prompt, cancel).await?;
        let state = Some((deltas, ReasoningPhaseFilter::default()));

        Ok(Box::pin(stream::unfold(state, |state| async move {
            let (mut deltas, mut filter) = state?;
            loop {
                match deltas.next().await {
                    Some(Ok(delta)) => {
                        if let Some(text) = filter.accept(delta) {
                            return Some((Ok(text), Some((deltas, filter))));
                        }
                    }
                    Some(Err(e)) => return Some((Err(e), Some((deltas, filter)))),
                    None => return filter.finish().map(|text| (Ok(text), None)),
                }
            }
        })))
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
impl ToolCapableProvider for LocalProvider {
    async fn create_tool_use_message(
        &self,
        request: &ToolUseRequest,
        cancel: &CancellationToken,
    ) -> Result<ToolUseResponse, ProviderError> {
        self.client.tool_round(request, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn content(text: &str) -> StreamDelta {
        StreamDelta {
            content: Some(text.to_string()),
            reasoning: None,
        }
    }

    fn reasoning(text: &str) -> StreamDelta {
        StreamDelta {
            content: None,
            reasoning: Some(text.to_string()),
        }
    }

    fn run(deltas: Vec<StreamDelta>) -> String {
        let mut filter = ReasoningPhaseFilter::default();
        let mut out: String = deltas.into_iter().filter_map(|d| filter.accept(d)).collect();
        out.extend(filter.finish());
        out
    }

    #[test]
    fn test_normalize_strips_suffixes() {
        assert_eq!(normalize_endpoint("http://localhost:11434").unwrap(), "http://localhost:11434");
        assert_eq!(normalize_endpoint(" http://localhost:11434/ ").unwrap(), "http://localhost:11434");
        assert_eq!(normalize_endpoint("http://localhost:11434/v1").unwrap(), "http://localhost:11434");
        assert_eq!(normalize_endpoint("http://localhost:11434/v1//").unwrap(), "http://localhost:11434");
        assert_eq!(normalize_endpoint("https://gpu.lan/ollama/v1/v1").unwrap(), "https://gpu.lan/ollama");
        assert_eq!(normalize_endpoint("HTTP://box:8080").unwrap(), "http://box:8080");
        // A host literally named v1 is not a path suffix
        assert_eq!(normalize_endpoint("http://v1").unwrap(), "http://v1");
    }

    #[test]
    fn test_normalize_rejects_bad_schemes() {
        for bad in ["localhost:11434", "ftp://host", "file:///tmp/x", "ws://host:1", "http://", "http:///v1", ""] {
            assert!(normalize_endpoint(bad).is_err(), "accepted {}", bad);
        }
    }

    #[test]
    fn test_default_endpoint_and_key() {
        let provider = LocalProvider::new(None, "llama3.2".to_string(), None).unwrap();
        assert_eq!(provider.endpoint(), DEFAULT_LOCAL_ENDPOINT);
        assert_eq!(provider.client.base_url(), "http://localhost:11434/v1");
        assert_eq!(
            provider.capability_key().as_str(),
            "ollama:llama3.2:http://localhost:11434"
        );
        assert!(provider.as_tool_capable().is_some());
    }

    #[test]
    fn test_reasoning_field_suppressed() {
        let out = run(vec![reasoning("Let me"), reasoning(" think"), content("Hello"), content(" world")]);
        assert_eq!(out, "Hello world");
    }

    #[test]
    fn test_inline_think_block_suppressed() {
        let out = run(vec![
            content("<thi"),
            content("nk>plan the"),
            content(" answer</th"),
            content("ink>\n\nThe answer"),
            content(" is 4"),
        ]);
        assert_eq!(out, "The answer is 4");
    }

    #[test]
    fn test_short_reply_flushed_at_end() {
        assert_eq!(run(vec![content("<")]), "<");
        assert_eq!(run(vec![content("<th")]), "<th");
        assert_eq!(run(vec![reasoning("hmm"), content("\n")]), "\n");

        let mut filter = ReasoningPhaseFilter::default();
        assert_eq!(filter.accept(content(" ")), None);
        assert_eq!(filter.finish().as_deref(), Some(" "));
        assert_eq!(filter.finish(), None);
    }

    #[test]
    fn test_unclosed_think_block_dropped_at_end() {
        assert_eq!(run(vec![content("<think>still planning")]), "");
        assert_eq!(run(vec![]), "");
    }

    #[test]
    fn test_plain_content_untouched() {
        let out = run(vec![content("<b>bold</b>"), content(" and <think> later")]);
        assert_eq!(out, "<b>bold</b> and <think> later");
    }

    #[tokio::test]
    async fn test_unreachable_server_degrades() {
        // Nothing listens on port 9 locally
        assert!(!test_local_connection("http://127.0.0.1:9").await);
        assert!(list_local_models("http://127.0.0.1:9").await.is_empty());
        assert!(list_local_models("not a url").await.is_empty());
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(
            url in "(http|https|HTTP)://[a-z][a-z0-9]{0,9}(:[0-9]{2,4})?(/[a-z0-9]{1,5}){0,2}(/v1){0,2}/{0,3}"
        ) {
            let once = normalize_endpoint(&url).unwrap();
            prop_assert_eq!(normalize_endpoint(&once).unwrap(), once.clone());
            prop_assert!(!once.ends_with('/'));
            prop_assert!(!once.ends_with("/v1"));
        }

        #[test]
        fn prop_non_http_schemes_rejected(url in "(ftp|file|ws|wss|gopher)://[a-z0-9]{1,10}(/v1)?") {
            prop_assert!(normalize_endpoint(&url).is_err());
        }
    }
}
