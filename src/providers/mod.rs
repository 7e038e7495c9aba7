pub mod anthropic;
pub mod error;
pub mod factory;
pub mod http;
pub mod local;
pub mod openai;
pub mod streaming;

use crate::capability::CapabilityKey;
use crate::models::{ChatMessage, ToolUseRequest, ToolUseResponse};
use async_trait::async_trait;
use error::ProviderError;
use futures::stream::Stream;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::pin::Pin;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

/// Lazily produced text increments of a streaming chat reply
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Supported vendor protocol families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Anthropic, ProviderKind::OpenAi, ProviderKind::Ollama];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Ollama => "ollama",
        }
    }

    /// Locally hosted vendors need no credential and key capabilities by endpoint
    pub fn is_local(&self) -> bool {
        matches!(self, ProviderKind::Ollama)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAi),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(ProviderError::ConfigError(format!("Unknown provider type: {}", other))),
        }
    }
}

/// Base provider contract: plain chat, streaming and single shot
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Model identifier sent to the vendor
    fn model(&self) -> &str;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Key under which tool-calling capability is cached for this provider
    fn capability_key(&self) -> CapabilityKey {
        CapabilityKey::hosted(self.kind(), self.model())
    }

    /// Stream a single chat round as text increments.
    ///
    /// Firing `cancel` ends the stream and drops the underlying response body.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<ChatStream, ProviderError>;

    /// Non-streaming single shot completion
    async fn chat_complete(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError>;

    /// Access the tool-use extension when this adapter implements it
    fn as_tool_capable(&self) -> Option<&dyn ToolCapableProvider> {
        None
    }
}

/// Tool-use extension. Tool rounds are always non-streaming.
#[async_trait]
pub trait ToolCapableProvider: LlmProvider {
    fn supports_tools(&self) -> bool {
        true
    }

    async fn create_tool_use_message(
        &self,
        request: &ToolUseRequest,
        cancel: &CancellationToken,
    ) -> Result<ToolUseResponse, ProviderError>;
}

/// Serialize SecretString for storage
fn serialize_optional_secret<S>(secret: &Option<SecretString>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match secret {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}

/// Deserialize SecretString from storage
fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.map(SecretString::new))
}

/// Provider configuration record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    pub model: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_optional_secret",
        deserialize_with = "deserialize_optional_secret"
    )]
    pub api_key: Option<SecretString>,
    /// Local server URL, or base URL override for hosted vendors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ProviderConfig {
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            api_key: None,
            endpoint: None,
            max_tokens: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(api_key.into()));
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

// Re-export provider implementations
pub use anthropic::AnthropicProvider;
pub use factory::create_provider;
pub use local::LocalProvider;
pub use openai::{OpenAiCompatibleClient, OpenAiProvider};
