//! Message tracing for debugging
//!
//! Appends tool rounds (request, response, error) to a JSONL file.

use crate::cli::TracingConfig;
use crate::models::{ToolUseRequest, ToolUseResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

/// Message tracer that writes to JSONL file
pub struct MessageTracer {
    config: TracingConfig,
    file: Option<Mutex<File>>,
}

#[derive(Serialize)]
struct RequestTrace<'a> {
    ts: DateTime<Utc>,
    dir: &'static str,
    id: &'a str,
    provider: &'a str,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    tools: Vec<&'a str>,
    messages: serde_json::Value,
}

#[derive(Serialize)]
struct ResponseTrace<'a> {
    ts: DateTime<Utc>,
    dir: &'static str,
    id: &'a str,
    latency_ms: u64,
    stop_reason: &'static str,
    text: &'a str,
    tool_calls: serde_json::Value,
}

#[derive(Serialize)]
struct ErrorTrace<'a> {
    ts: DateTime<Utc>,
    dir: &'static str,
    id: &'a str,
    latency_ms: u64,
    error: String,
}

impl MessageTracer {
    pub fn new(config: TracingConfig) -> Self {
        if !config.enabled {
            return Self { config, file: None };
        }

        let path = expand_tilde(&config.path);

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::error!("Failed to create tracing directory: {}", e);
                return Self { config, file: None };
            }
        }

        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                tracing::info!("Message tracing enabled: {}", path.display());
                Self {
                    config,
                    file: Some(Mutex::new(file)),
                }
            }
            Err(e) => {
                tracing::error!("Failed to open trace file: {}", e);
                Self { config, file: None }
            }
        }
    }

    /// Short correlation id, empty when tracing is off
    pub fn new_trace_id(&self) -> String {
        if self.file.is_some() {
            Uuid::new_v4().to_string()[..8].to_string()
        } else {
            String::new()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    pub fn trace_request(&self, id: &str, provider: &str, model: &str, request: &ToolUseRequest) {
        let Some(ref file_mutex) = self.file else {
            return;
        };

        let system = if self.config.omit_system_prompt || request.system_prompt.is_empty() {
            None
        } else {
            Some(request.system_prompt.as_str())
        };

        let trace = RequestTrace {
            ts: Utc::now(),
            dir: "req",
            id,
            provider,
            model,
            system,
            tools: request.tools.iter().map(|t| t.name.as_str()).collect(),
            messages: serde_json::to_value(&request.messages).unwrap_or_default(),
        };

        self.write_trace(&trace, file_mutex);
    }

    pub fn trace_response(&self, id: &str, response: &ToolUseResponse, latency_ms: u64) {
        let Some(ref file_mutex) = self.file else {
            return;
        };

        let trace = ResponseTrace {
            ts: Utc::now(),
            dir: "res",
            id,
            latency_ms,
            stop_reason: response.stop_reason.as_str(),
            text: &response.text_content,
            tool_calls: serde_json::to_value(&response.tool_calls).unwrap_or_default(),
        };

        self.write_trace(&trace, file_mutex);
    }

    pub fn trace_error(&self, id: &str, error: &dyn std::fmt::Display, latency_ms: u64) {
        let Some(ref file_mutex) = self.file else {
            return;
        };

        let trace = ErrorTrace {
            ts: Utc::now(),
            dir: "err",
            id,
            latency_ms,
            error: error.to_string(),
        };

        self.write_trace(&trace, file_mutex);
    }

    fn write_trace<T: Serialize>(&self, trace: &T, file_mutex: &Mutex<File>) {
        let Ok(json) = serde_json::to_string(trace) else {
            return;
        };

        if let Ok(mut file) = file_mutex.lock() {
            if let Err(e) = writeln!(file, "{}", json) {
                tracing::warn!("Failed to write trace entry: {}", e);
            }
        }
    }
}

/// Expand ~ to home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
