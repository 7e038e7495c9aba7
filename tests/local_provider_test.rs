use futures::StreamExt;
use mockito::Server;
use provider_mux::capability::CapabilityKey;
use provider_mux::models::{ChatMessage, StopReason, ToolDefinition, ToolUseMessage, ToolUseRequest};
use provider_mux::providers::local::list_local_models;
use provider_mux::providers::{create_provider, LlmProvider, LocalProvider, ProviderConfig, ProviderKind};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn sse(chunks: &[&str]) -> String {
    chunks.iter().map(|chunk| format!("data: {}\n\n", chunk)).collect()
}

#[tokio::test]
async fn test_list_models_and_ping() {
    let mut server = Server::new_async().await;
    let tags = server
        .mock("GET", "/api/tags")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"models": [
                {"name": "llama3.2:latest", "size": 2019393189},
                {"name": "qwen2.5:7b", "size": 4683087332u64}
            ]})
            .to_string(),
        )
        .expect(2)
        .create_async()
        .await;

    // An endpoint given with the OpenAI-compatible suffix is normalized back
    let provider = LocalProvider::new(Some(&format!("{}/v1/", server.url())), "llama3.2".to_string(), None).unwrap();
    assert_eq!(provider.endpoint(), server.url());

    assert_eq!(provider.list_models().await, vec!["llama3.2:latest", "qwen2.5:7b"]);
    assert!(provider.test_connection().await);
    tags.assert_async().await;
}

#[tokio::test]
async fn test_introspection_degrades_on_failure() {
    let mut server = Server::new_async().await;
    let _tags = server
        .mock("GET", "/api/tags")
        .with_status(500)
        .with_body("internal error")
        .create_async()
        .await;

    let provider = LocalProvider::new(Some(&server.url()), "llama3.2".to_string(), None).unwrap();
    assert!(provider.list_models().await.is_empty());
    assert!(!provider.test_connection().await);

    let _garbage = server
        .mock("GET", "/api/tags")
        .with_status(200)
        .with_body("not json")
        .create_async()
        .await;
    assert!(list_local_models(&server.url()).await.is_empty());

    let refused = LocalProvider::new(Some("http://127.0.0.1:1"), "llama3.2".to_string(), None).unwrap();
    assert!(refused.list_models().await.is_empty());
    assert!(!refused.test_connection().await);
}

#[tokio::test]
async fn test_reasoning_phase_not_leaked() {
    let mut server = Server::new_async().await;
    let _chat = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(sse(&[
            r#"{"choices":[{"delta":{"role":"assistant","content":"","reasoning":"The user wants"}}]}"#,
            r#"{"choices":[{"delta":{"content":"","reasoning":" a greeting."}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hi"}}]}"#,
            r#"{"choices":[{"delta":{"content":" there!"}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ]))
        .create_async()
        .await;

    let provider = create_provider(
        &ProviderConfig::new(ProviderKind::Ollama, "qwen3").with_endpoint(server.url()),
    )
    .unwrap();
    let stream = provider
        .chat(&[ChatMessage::user("Say hi")], "", &CancellationToken::new())
        .await
        .unwrap();
    let text: String = stream.map(|chunk| chunk.unwrap()).collect::<Vec<_>>().await.concat();

    assert_eq!(text, "Hi there!");
}

#[tokio::test]
async fn test_inline_think_block_not_leaked() {
    let mut server = Server::new_async().await;
    let _chat = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(sse(&[
            r#"{"choices":[{"delta":{"content":"<think>"}}]}"#,
            r#"{"choices":[{"delta":{"content":"short plan"}}]}"#,
            r#"{"choices":[{"delta":{"content":"</think>\n\n"}}]}"#,
            r#"{"choices":[{"delta":{"content":"Four."}}]}"#,
            "[DONE]",
        ]))
        .create_async()
        .await;

    let provider = LocalProvider::new(Some(&server.url()), "deepseek-r1".to_string(), None).unwrap();
    let stream = provider
        .chat(&[ChatMessage::user("2+2?")], "", &CancellationToken::new())
        .await
        .unwrap();
    let text: String = stream.map(|chunk| chunk.unwrap()).collect::<Vec<_>>().await.concat();

    assert_eq!(text, "Four.");
}

#[tokio::test]
async fn test_short_reply_survives_stream_end() {
    let mut server = Server::new_async().await;
    let _chat = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(sse(&[r#"{"choices":[{"delta":{"content":"<"}}]}"#, "[DONE]"]))
        .create_async()
        .await;

    let provider = LocalProvider::new(Some(&server.url()), "llama3.2".to_string(), None).unwrap();
    let stream = provider
        .chat(&[ChatMessage::user("Which is smaller, < or >?")], "", &CancellationToken::new())
        .await
        .unwrap();
    let text: String = stream.map(|chunk| chunk.unwrap()).collect::<Vec<_>>().await.concat();

    assert_eq!(text, "<");
}

#[tokio::test]
async fn test_local_tool_round_accepts_object_arguments() {
    let mut server = Server::new_async().await;
    let _chat = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", mockito::Matcher::Missing)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "choices": [{
                    "finish_reason": "tool_calls",
                    "message": {
                        "role": "assistant",
                        "content": "",
                        "tool_calls": [{
                            "id": "call_0",
                            "type": "function",
                            "function": {"name": "add", "arguments": {"a": 2, "b": 2}}
                        }]
                    }
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let provider = LocalProvider::new(Some(&server.url()), "llama3.1".to_string(), None).unwrap();
    let request = ToolUseRequest {
        messages: vec![ToolUseMessage::user("What is 2+2?")],
        system_prompt: String::new(),
        tools: vec![ToolDefinition {
            name: "add".to_string(),
            description: "Add two numbers".to_string(),
            input_schema: json!({"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "number"}}}),
        }],
    };

    let response = provider
        .as_tool_capable()
        .unwrap()
        .create_tool_use_message(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.stop_reason, StopReason::ToolUse);
    assert_eq!(response.tool_calls[0].input["a"], 2);
    assert_eq!(response.tool_calls[0].input["b"], 2);
    assert_eq!(response.raw_assistant_message.provider(), ProviderKind::Ollama);
}

#[test]
fn test_capability_key_tracks_endpoint() {
    let a = LocalProvider::new(Some("http://gpu-a:11434"), "llama3.2".to_string(), None).unwrap();
    let b = LocalProvider::new(Some("http://gpu-b:11434/v1"), "llama3.2".to_string(), None).unwrap();
    let a_again = LocalProvider::new(Some("http://gpu-a:11434/"), "llama3.2".to_string(), None).unwrap();

    assert_ne!(a.capability_key(), b.capability_key());
    assert_eq!(a.capability_key(), a_again.capability_key());
    assert_eq!(
        b.capability_key(),
        CapabilityKey::derive(ProviderKind::Ollama, "llama3.2", Some("http://gpu-b:11434"))
    );
}

#[test]
fn test_factory_names_match_provider() {
    let configs = [
        ProviderConfig::new(ProviderKind::Anthropic, "claude-3-5-haiku-20241022").with_api_key("sk-ant"),
        ProviderConfig::new(ProviderKind::OpenAi, "gpt-4o-mini").with_api_key("sk"),
        ProviderConfig::new(ProviderKind::Ollama, "mistral"),
    ];
    for config in &configs {
        let provider = create_provider(config).unwrap();
        assert_eq!(provider.name(), config.provider.as_str());
        assert_eq!(provider.kind(), config.provider);
    }

    for kind in [ProviderKind::Anthropic, ProviderKind::OpenAi] {
        assert!(create_provider(&ProviderConfig::new(kind, "any-model")).is_err());
    }
}
