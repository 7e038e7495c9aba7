use super::{error::ProviderError, AnthropicProvider, LlmProvider, LocalProvider, OpenAiProvider, ProviderConfig, ProviderKind};
use secrecy::{ExposeSecret, SecretString};

/// Longest model identifier accepted from configuration
pub const MAX_MODEL_NAME_LEN: usize = 128;

const ANTHROPIC_MODELS: &[&str] = &[
    "claude-sonnet-4-20250514",
    "claude-opus-4-20250514",
    "claude-3-7-sonnet-20250219",
    "claude-3-5-haiku-20241022",
];

const OPENAI_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4.1", "gpt-4.1-mini", "o3-mini"];

const OLLAMA_MODELS: &[&str] = &["llama3.2", "llama3.1", "qwen2.5", "mistral", "gemma2"];

/// Curated model names offered for a vendor. The first entry is the default.
///
/// Local servers can run anything; use
/// [`list_local_models`](super::local::list_local_models) for what is installed.
pub fn known_models(kind: ProviderKind) -> &'static [&'static str] {
    match kind {
        ProviderKind::Anthropic => ANTHROPIC_MODELS,
        ProviderKind::OpenAi => OPENAI_MODELS,
        ProviderKind::Ollama => OLLAMA_MODELS,
    }
}

pub fn default_model(kind: ProviderKind) -> &'static str {
    known_models(kind)[0]
}

/// Trim and bound-check a model identifier
pub fn validate_model_name(model: &str) -> Result<String, ProviderError> {
    let model = model.trim();
    if model.is_empty() {
        return Err(ProviderError::ConfigError("Model name must not be empty".to_string()));
    }
    if model.chars().count() > MAX_MODEL_NAME_LEN {
        return Err(ProviderError::ConfigError(format!(
            "Model name exceeds {} characters",
            MAX_MODEL_NAME_LEN
        )));
    }
    Ok(model.to_string())
}

fn required_api_key(config: &ProviderConfig) -> Result<SecretString, ProviderError> {
    match &config.api_key {
        Some(key) if !key.expose_secret().trim().is_empty() => {
            Ok(SecretString::new(key.expose_secret().trim().to_string()))
        }
        _ => Err(ProviderError::ConfigError(format!(
            "API key required for provider '{}'",
            config.provider
        ))),
    }
}

fn hosted_base_url(config: &ProviderConfig) -> Option<String> {
    config
        .endpoint
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

/// Build the adapter described by `config`
pub fn create_provider(config: &ProviderConfig) -> Result<Box<dyn LlmProvider>, ProviderError> {
    let model = validate_model_name(&config.model)?;

    let provider: Box<dyn LlmProvider> = match config.provider {
        ProviderKind::Anthropic => Box::new(AnthropicProvider::new(
            required_api_key(config)?,
            model,
            hosted_base_url(config),
            config.max_tokens,
        )),
        ProviderKind::OpenAi => Box::new(OpenAiProvider::new(
            required_api_key(config)?,
            model,
            hosted_base_url(config),
            config.max_tokens,
        )),
        ProviderKind::Ollama => Box::new(LocalProvider::new(
            config.endpoint.as_deref(),
            model,
            config.max_tokens,
        )?),
    };

    tracing::debug!("Created {} provider for model {}", provider.name(), provider.model());
    Ok(provider)
}
