//! Integration tests for Continuity

use continuity::agent::{ToolResult, QUERY_CONTINUITY, UPDATE_CONTINUITY};
use continuity::continuity::JsonlArchive;
use continuity::{
    ArchiveSink, ChatClient, ContinuityAgent, ContinuityConfig, ContinuityDocument,
    ContinuityError, ContinuityStore, Entry, TimeRange,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Write a pre-existing document with `n` entries, like an externally created file
async fn write_document(dir: &Path, n: usize) -> ContinuityConfig {
    let document_path = dir.join("alliance-schema.json");
    let entries: Vec<Entry> = (0..n)
        .map(|i| Entry {
            timestamp: format!("2026-03-{:02}T12:00:00Z", i + 1),
            emotional_tone: format!("tone-{i}"),
            key_understandings: vec![format!("insight {i}")],
            open_threads: vec![],
            preferred_interaction_notes: String::new(),
        })
        .collect();
    let raw = json!({
        "summary": "",
        "entries": entries,
        "participants": [
            {"model": "grok-4", "role": "ally", "last_active": "2026-03-01T12:00:00Z"},
            {"model": "human", "role": "user", "last_active": "2026-03-01T12:00:00Z"}
        ],
        "estimated_tokens": 0,
        "alliance_name": "north star"
    });
    tokio::fs::write(&document_path, serde_json::to_string_pretty(&raw).unwrap())
        .await
        .unwrap();

    ContinuityConfig::new(document_path).with_lock_timeout(Duration::from_millis(200))
}

fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "type": "function",
        "function": {"name": name, "arguments": arguments.to_string()}
    })
}

fn agent_for(server: &MockServer, config: ContinuityConfig) -> ContinuityAgent {
    let config = config
        .with_base_url(server.uri())
        .with_request_timeout(Duration::from_secs(5));
    let client = ChatClient::new(&config, "test-key").unwrap();
    ContinuityAgent::new(client, ContinuityStore::from_config(&config))
}

#[tokio::test]
async fn test_exchange_dispatches_tool_calls_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_document(temp_dir.path(), 10).await;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": "I'll remember that.",
                "tool_calls": [
                    tool_call("1", UPDATE_CONTINUITY, json!({"emotional_tone": "warm, curious"})),
                    tool_call("2", QUERY_CONTINUITY, json!({"query": "tone-0", "time_range": "archived"})),
                    tool_call("3", UPDATE_CONTINUITY, json!({"new_understandings": ["no tone"]}))
                ]
            }}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let agent = agent_for(&server, config.clone());
    let outcome = agent.exchange("Thanks for listening today").await.unwrap();

    assert_eq!(outcome.content, "I'll remember that.");
    assert_eq!(outcome.tool_outcomes.len(), 3);
    assert!(outcome.tool_outcomes[0].is_success());
    match &outcome.tool_outcomes[1].result {
        ToolResult::Matches {
            time_range,
            entries,
        } => {
            assert_eq!(*time_range, TimeRange::Archived);
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].emotional_tone, "tone-0");
        }
        other => panic!("Expected Matches, got {:?}", other),
    }
    assert!(!outcome.tool_outcomes[2].is_success());

    // The system message carried the (empty) summary of the pre-existing file
    let requests = server.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(sent["messages"][0]["content"]
        .as_str()
        .unwrap()
        .starts_with("Shared context: "));

    let store = agent.store();
    let (summary, doc) = store.load().await.unwrap();
    assert_eq!(doc.entries.len(), 10);
    assert_eq!(doc.entries[9].emotional_tone, "warm, curious");
    assert!(doc.entries[9].key_understandings.is_empty());
    assert!(summary.contains("Tone: warm, curious"));
    assert!(summary.contains("0 understandings"));
    assert_eq!(doc.extra.get("alliance_name"), Some(&json!("north star")));

    let archive = JsonlArchive::new(config.archive_path());
    assert_eq!(archive.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_exchange_without_tool_calls_leaves_document_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_document(temp_dir.path(), 3).await;
    let before = tokio::fs::read_to_string(&config.document_path).await.unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "<think>nothing to record</think>Hello!"}}]
        })))
        .mount(&server)
        .await;

    let outcome = agent_for(&server, config.clone())
        .exchange("hi")
        .await
        .unwrap();
    assert_eq!(outcome.content, "Hello!");
    assert!(outcome.tool_outcomes.is_empty());

    let after = tokio::fs::read_to_string(&config.document_path).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_service_failure_commits_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_document(temp_dir.path(), 2).await;
    let before = tokio::fs::read_to_string(&config.document_path).await.unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "bad request"}
        })))
        .mount(&server)
        .await;

    let err = agent_for(&server, config.clone())
        .exchange("hi")
        .await
        .unwrap_err();
    assert!(matches!(err, ContinuityError::ExternalService(_)));

    let after = tokio::fs::read_to_string(&config.document_path).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_missing_document_aborts_before_api_call() {
    let temp_dir = TempDir::new().unwrap();
    let config = ContinuityConfig::new(temp_dir.path().join("absent.json"));

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = agent_for(&server, config).exchange("hi").await.unwrap_err();
    assert!(matches!(err, ContinuityError::Storage(_)));
}

#[tokio::test]
async fn test_store_round_trip_with_jsonl_archive() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_document(temp_dir.path(), 10).await;
    let store = ContinuityStore::from_config(&config);

    let (_, mut doc) = store.load().await.unwrap();
    store
        .append(Entry::new("eleventh"), &mut doc, false)
        .await
        .unwrap();

    let (_, reloaded) = store.load().await.unwrap();
    let archived = store.archive().entries().await.unwrap();
    assert_eq!(reloaded.entries.len(), 10);
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].emotional_tone, "tone-0");
    assert_eq!(reloaded.entries.len() + archived.len(), 11);
    assert_eq!(reloaded, doc);

    // grok-4 was the active model and is touched; the human is left alone
    assert_ne!(
        reloaded.participant("grok-4").unwrap().last_active,
        "2026-03-01T12:00:00Z"
    );
    assert_eq!(
        reloaded.participant("human").unwrap().last_active,
        "2026-03-01T12:00:00Z"
    );
}

#[tokio::test]
async fn test_lock_held_by_other_writer_fails_update() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_document(temp_dir.path(), 1).await;
    let store = ContinuityStore::from_config(&config);
    let _held = store.lock().await.unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "ok", "tool_calls": [
                tool_call("1", UPDATE_CONTINUITY, json!({"emotional_tone": "eager"}))
            ]}}]
        })))
        .mount(&server)
        .await;

    let err = agent_for(&server, config.clone())
        .exchange("hi")
        .await
        .unwrap_err();
    assert!(matches!(err, ContinuityError::Storage(_)));

    let doc: ContinuityDocument =
        serde_json::from_str(&tokio::fs::read_to_string(&config.document_path).await.unwrap())
            .unwrap();
    assert_eq!(doc.entries.len(), 1);
}
