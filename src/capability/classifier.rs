//! Recognize "tools not supported" failures in opaque vendor error text.
//!
//! Vendors return no structured code for this condition, so matching on the
//! message is the only signal available. The pattern list reflects error text
//! observed from OpenAI, Ollama and common OpenAI-compatible servers and is
//! expected to grow.

use crate::providers::error::{ProviderError, ToolsNotSupportedError};
use once_cell::sync::Lazy;
use regex::RegexSet;

static TOOLS_NOT_SUPPORTED_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)tools? (?:use |calling |calls )?(?:is |are )?not supported",
        r"(?i)does not support (?:tools|tool use|tool calling|function calling|functions)",
        r"(?i)(?:function|tool) calling is not (?:supported|enabled|available)",
        r"(?i)invalid tool",
        r"(?i)unknown field:? .?tools",
        r"(?i)unrecognized request arguments? supplied:? .*tools",
        r"(?i)unsupported parameter:? .?tools",
        r"(?i)extra(?: inputs are)? not permitted.*tools",
    ])
    .expect("tool classifier patterns are valid")
});

/// True when `message` looks like a vendor refusing tool definitions
pub fn matches_tools_not_supported(message: &str) -> bool {
    TOOLS_NOT_SUPPORTED_PATTERNS.is_match(message)
}

/// Return the typed signal for `err` when it means tools are unsupported.
///
/// An error that is already typed is returned unchanged. Unrelated failures
/// (timeouts, rate limits, auth) yield `None`.
pub fn maybe_wrap_tools_not_supported(err: &ProviderError) -> Option<ToolsNotSupportedError> {
    match err {
        ProviderError::ToolsNotSupported(typed) => Some(typed.clone()),
        ProviderError::Cancelled | ProviderError::ConfigError(_) | ProviderError::AuthError(_) => None,
        other => {
            let message = other.to_string();
            matches_tools_not_supported(&message).then(|| ToolsNotSupportedError::rejected(message))
        }
    }
}

/// Convert `err` into [`ProviderError::ToolsNotSupported`] when it matches,
/// otherwise hand it back untouched.
pub fn classify(err: ProviderError) -> ProviderError {
    match maybe_wrap_tools_not_supported(&err) {
        Some(typed) if !err.is_tools_not_supported() => {
            tracing::debug!("Classified provider error as tools-not-supported: {}", typed.message);
            ProviderError::ToolsNotSupported(typed)
        }
        _ => err,
    }
}
