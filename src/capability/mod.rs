//! Runtime discovery of tool-calling support.
//!
//! Vendors do not reliably advertise whether a model honors tool definitions, so
//! support is learned from observed tool rounds and remembered per
//! [`CapabilityKey`] for the lifetime of the process.

pub mod classifier;

use crate::models::ToolUseResponse;
use crate::providers::error::ProviderError;
use crate::providers::{LlmProvider, ProviderKind};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

/// Observed tool-calling capability of one provider/model(/endpoint)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityState {
    /// Never attempted
    #[default]
    Unknown,
    Supported,
    NotSupported,
    /// Attempted, but the model produced no tool call
    NotObserved,
}

impl CapabilityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityState::Unknown => "unknown",
            CapabilityState::Supported => "supported",
            CapabilityState::NotSupported => "not_supported",
            CapabilityState::NotObserved => "not_observed",
        }
    }
}

impl std::fmt::Display for CapabilityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache key: `provider:model`, or `provider:model:endpoint` for local vendors
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CapabilityKey(String);

impl CapabilityKey {
    pub fn hosted(provider: ProviderKind, model: &str) -> Self {
        Self(format!("{}:{}", provider, model))
    }

    pub fn local(provider: ProviderKind, model: &str, endpoint: &str) -> Self {
        Self(format!("{}:{}:{}", provider, model, endpoint))
    }

    /// Derive the key for a provider/model pair, adding the endpoint for local vendors
    pub fn derive(provider: ProviderKind, model: &str, endpoint: Option<&str>) -> Self {
        match endpoint {
            Some(endpoint) if provider.is_local() => Self::local(provider, model, endpoint),
            _ => Self::hosted(provider, model),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CapabilityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CapabilityEntry {
    pub state: CapabilityState,
    /// Number of ambiguous rounds seen for this key
    pub not_observed_count: u32,
}

/// Process-wide registry of tool-calling capability.
///
/// Cloning shares the same underlying map. Nothing is persisted; each key is an
/// independent slot and the last write wins.
#[derive(Debug, Clone, Default)]
pub struct CapabilityCache {
    entries: Arc<DashMap<CapabilityKey, CapabilityEntry>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, key: &CapabilityKey) -> CapabilityState {
        self.entries.get(key).map(|e| e.state).unwrap_or_default()
    }

    pub fn not_observed_count(&self, key: &CapabilityKey) -> u32 {
        self.entries.get(key).map(|e| e.not_observed_count).unwrap_or(0)
    }

    pub fn set_state(&self, key: &CapabilityKey, state: CapabilityState) {
        self.entries.entry(key.clone()).or_default().state = state;
    }

    pub fn mark_supported(&self, key: &CapabilityKey) {
        tracing::debug!("Tool capability for {}: supported", key);
        self.set_state(key, CapabilityState::Supported);
    }

    pub fn mark_not_supported(&self, key: &CapabilityKey) {
        tracing::info!("Tool capability for {}: not supported", key);
        self.set_state(key, CapabilityState::NotSupported);
    }

    /// Record an ambiguous round. A key already known to support tools keeps
    /// that state; only the counter moves.
    pub fn mark_not_observed(&self, key: &CapabilityKey) {
        let mut entry = self.entries.entry(key.clone()).or_default();
        entry.not_observed_count = entry.not_observed_count.saturating_add(1);
        if entry.state != CapabilityState::Supported {
            entry.state = CapabilityState::NotObserved;
        }
        tracing::debug!(
            "Tool capability for {}: {} (not observed {} time(s))",
            key,
            entry.state,
            entry.not_observed_count
        );
    }

    /// Update the cache from the outcome of a tool-enabled round.
    ///
    /// Errors other than [`ProviderError::ToolsNotSupported`] say nothing about
    /// capability and leave the entry untouched.
    pub fn record_outcome(&self, key: &CapabilityKey, outcome: &Result<ToolUseResponse, ProviderError>) {
        match outcome {
            Ok(response) if !response.tool_calls.is_empty() => self.mark_supported(key),
            Ok(_) => self.mark_not_observed(key),
            Err(ProviderError::ToolsNotSupported(_)) => self.mark_not_supported(key),
            Err(_) => {}
        }
    }

    /// Copy of all entries, sorted by key
    pub fn snapshot(&self) -> Vec<(CapabilityKey, CapabilityEntry)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Caller options for [`should_use_tools`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolAttemptOptions {
    /// Retry a tool round even after an ambiguous outcome
    pub force_tool_attempt: bool,
}

/// Decide whether the next turn should pass tool definitions.
///
/// Pure over the cache; recording outcomes is left to the caller.
pub fn should_use_tools(
    provider: &dyn LlmProvider,
    cache: &CapabilityCache,
    key: &CapabilityKey,
    options: ToolAttemptOptions,
) -> bool {
    if provider.as_tool_capable().map_or(true, |p| !p.supports_tools()) {
        return false;
    }

    decide(cache.state(key), options)
}

fn decide(state: CapabilityState, options: ToolAttemptOptions) -> bool {
    match state {
        CapabilityState::Unknown | CapabilityState::Supported => true,
        CapabilityState::NotSupported => false,
        CapabilityState::NotObserved => options.force_tool_attempt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StopReason, ToolCall, VendorPayload};
    use crate::providers::error::ToolsNotSupportedError;
    use proptest::prelude::*;
    use serde_json::{json, Map};

    fn key() -> CapabilityKey {
        CapabilityKey::hosted(ProviderKind::OpenAi, "gpt-4o")
    }

    fn response(calls: usize) -> ToolUseResponse {
        let tool_calls = (0..calls)
            .map(|i| ToolCall {
                id: format!("call_{}", i),
                name: "lookup".to_string(),
                input: Map::new(),
            })
            .collect();
        ToolUseResponse::new(
            StopReason::from_finish_reason(Some("tool_calls")),
            String::new(),
            tool_calls,
            VendorPayload::new(ProviderKind::OpenAi, json!({"role": "assistant"})),
        )
    }

    #[test]
    fn test_key_format() {
        assert_eq!(key().as_str(), "openai:gpt-4o");
        let local = CapabilityKey::derive(ProviderKind::Ollama, "llama3.2", Some("http://localhost:11434"));
        assert_eq!(local.as_str(), "ollama:llama3.2:http://localhost:11434");
        // Hosted vendors ignore endpoint overrides
        let hosted = CapabilityKey::derive(ProviderKind::Anthropic, "m", Some("https://proxy"));
        assert_eq!(hosted.as_str(), "anthropic:m");
    }

    #[test]
    fn test_decision_truth_table() {
        let plain = ToolAttemptOptions::default();
        let forced = ToolAttemptOptions { force_tool_attempt: true };
        let cases = [
            (CapabilityState::Unknown, true, true),
            (CapabilityState::Supported, true, true),
            (CapabilityState::NotSupported, false, false),
            (CapabilityState::NotObserved, false, true),
        ];
        for (state, without_force, with_force) in cases {
            assert_eq!(decide(state, plain), without_force, "{} without force", state);
            assert_eq!(decide(state, forced), with_force, "{} with force", state);
        }
    }

    #[test]
    fn test_unknown_by_default() {
        let cache = CapabilityCache::new();
        assert_eq!(cache.state(&key()), CapabilityState::Unknown);
        assert_eq!(cache.not_observed_count(&key()), 0);
    }

    #[test]
    fn test_record_outcome_transitions() {
        let cache = CapabilityCache::new();
        let key = key();

        cache.record_outcome(&key, &Ok(response(0)));
        assert_eq!(cache.state(&key), CapabilityState::NotObserved);
        assert_eq!(cache.not_observed_count(&key), 1);

        cache.record_outcome(&key, &Ok(response(1)));
        assert_eq!(cache.state(&key), CapabilityState::Supported);

        // Ambiguous round after a confirmed one does not downgrade
        cache.record_outcome(&key, &Ok(response(0)));
        assert_eq!(cache.state(&key), CapabilityState::Supported);
        assert_eq!(cache.not_observed_count(&key), 2);

        cache.record_outcome(&key, &Err(ProviderError::Cancelled));
        assert_eq!(cache.state(&key), CapabilityState::Supported);

        let err = ProviderError::from(ToolsNotSupportedError::rejected("no tools"));
        cache.record_outcome(&key, &Err(err));
        assert_eq!(cache.state(&key), CapabilityState::NotSupported);
    }

    #[test]
    fn test_clones_share_state() {
        let cache = CapabilityCache::new();
        let other = cache.clone();
        other.mark_supported(&key());
        assert_eq!(cache.state(&key()), CapabilityState::Supported);
        assert_eq!(cache.snapshot().len(), 1);
        cache.clear();
        assert_eq!(other.state(&key()), CapabilityState::Unknown);
    }

    #[test]
    fn test_concurrent_writers() {
        let cache = CapabilityCache::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        cache.mark_not_observed(&key());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.not_observed_count(&key()), 800);
    }

    proptest! {
        #[test]
        fn prop_local_keys_are_endpoint_sensitive(
            model in "[a-z0-9.:-]{1,20}",
            a in "http://[a-z]{1,10}:[0-9]{2,5}",
            b in "http://[a-z]{1,10}:[0-9]{2,5}",
        ) {
            let ka = CapabilityKey::derive(ProviderKind::Ollama, &model, Some(&a));
            let kb = CapabilityKey::derive(ProviderKind::Ollama, &model, Some(&b));
            prop_assert_eq!(ka == kb, a == b);
        }

        #[test]
        fn prop_hosted_keys_are_stable(model in "[a-zA-Z0-9.-]{1,40}") {
            for kind in [ProviderKind::Anthropic, ProviderKind::OpenAi] {
                prop_assert_eq!(
                    CapabilityKey::derive(kind, &model, None),
                    CapabilityKey::derive(kind, &model, None)
                );
            }
        }
    }
}
