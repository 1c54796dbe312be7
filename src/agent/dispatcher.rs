//! Executes decoded tool calls against the continuity store
//!
//! Each update is one locked load -> mutate -> persist transaction; each
//! query is a read-only scan. Validation failures become failed tool
//! results and do not stop later calls; storage failures abort.

use super::tools::{ContinuityTool, QueryContinuityArgs, ToolCall, UpdateContinuityArgs};
use crate::continuity::{ContinuityStore, Entry, EntryQuery, TimeRange};
use crate::{ContinuityError, Result};
use serde_json::json;
use tracing::{debug, info, warn};

/// What a single tool call produced
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Updated {
        live_entries: usize,
        archived: usize,
        summary: String,
        estimated_tokens: u64,
    },
    Matches {
        time_range: TimeRange,
        entries: Vec<Entry>,
    },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub call_id: String,
    pub tool: String,
    pub result: ToolResult,
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self.result, ToolResult::Failed(_))
    }

    /// JSON payload suitable for a `tool` role message
    pub fn to_content(&self) -> String {
        let value = match &self.result {
            ToolResult::Updated {
                live_entries,
                archived,
                summary,
                estimated_tokens,
            } => json!({
                "status": "ok",
                "live_entries": live_entries,
                "archived": archived,
                "summary": summary,
                "estimated_tokens": estimated_tokens,
            }),
            ToolResult::Matches {
                time_range,
                entries,
            } => json!({
                "status": "ok",
                "time_range": time_range,
                "count": entries.len(),
                "entries": entries,
            }),
            ToolResult::Failed(error) => json!({
                "status": "error",
                "error": error,
            }),
        };
        value.to_string()
    }
}

pub struct ToolDispatcher<'a> {
    store: &'a ContinuityStore,
}

impl<'a> ToolDispatcher<'a> {
    pub fn new(store: &'a ContinuityStore) -> Self {
        Self { store }
    }

    /// Decode every call up front, then run them in order.
    pub async fn dispatch_all(&self, calls: &[ToolCall]) -> Result<Vec<ToolOutcome>> {
        let decoded: Vec<(&ToolCall, Result<ContinuityTool>)> = calls
            .iter()
            .map(|call| (call, ContinuityTool::decode(call)))
            .collect();

        let mut outcomes = Vec::with_capacity(decoded.len());
        for (call, tool) in decoded {
            outcomes.push(self.dispatch(call, tool).await?);
        }
        Ok(outcomes)
    }

    /// Run one decoded call. Only non-validation errors are returned as `Err`.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        tool: Result<ContinuityTool>,
    ) -> Result<ToolOutcome> {
        let result = match tool {
            Ok(tool) => {
                debug!("Dispatching {} ({})", tool.name(), call.id);
                self.execute(tool).await
            }
            Err(e) => Err(e),
        };

        let result = match result {
            Ok(result) => result,
            Err(ContinuityError::Validation(msg)) => {
                warn!("Tool call {} ({}) rejected: {}", call.name, call.id, msg);
                ToolResult::Failed(msg)
            }
            Err(e) => return Err(e),
        };

        Ok(ToolOutcome {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            result,
        })
    }

    pub async fn execute(&self, tool: ContinuityTool) -> Result<ToolResult> {
        match tool {
            ContinuityTool::UpdateContinuity(args) => self.update_continuity(args).await,
            ContinuityTool::QueryContinuity(args) => self.query_continuity(args).await,
        }
    }

    async fn update_continuity(&self, args: UpdateContinuityArgs) -> Result<ToolResult> {
        let _lock = self.store.lock().await?;
        let (_, mut document) = self.store.load().await?;

        if let Some(update) = &args.participant_update {
            document.apply_participant_update(update, self.store.active_model());
        }

        let entry = Entry::new(args.emotional_tone.trim())
            .with_understandings(args.new_understandings)
            .with_threads(args.updated_threads);

        let before = document.entries.len();
        self.store
            .append(entry, &mut document, args.archive_trigger)
            .await?;
        let archived = (before + 1).saturating_sub(document.entries.len());

        info!(
            "update_continuity committed ({} live, {} archived)",
            document.entries.len(),
            archived
        );

        Ok(ToolResult::Updated {
            live_entries: document.entries.len(),
            archived,
            summary: document.summary,
            estimated_tokens: document.estimated_tokens,
        })
    }

    async fn query_continuity(&self, args: QueryContinuityArgs) -> Result<ToolResult> {
        let query = EntryQuery::parse(&args.query)?;
        let entries = self.store.search(&query, args.time_range).await?;

        info!(
            "query_continuity(\"{}\", {}): {} results",
            args.query,
            args.time_range,
            entries.len()
        );

        Ok(ToolResult::Matches {
            time_range: args.time_range,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::{QUERY_CONTINUITY, UPDATE_CONTINUITY};
    use crate::continuity::{ContinuityDocument, MemoryArchive};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn setup_store() -> (TempDir, ContinuityStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = ContinuityStore::new(temp_dir.path().join("alliance.json"), MemoryArchive::new())
            .with_active_model("grok-4");
        let mut doc = ContinuityDocument::default();
        doc.upsert_participant("grok-4", Some("ally"), "2026-01-01T00:00:00Z".to_string());
        store.persist(&doc).await.unwrap();
        (temp_dir, store)
    }

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[tokio::test]
    async fn test_update_with_tone_only() {
        let (_tmp, store) = setup_store().await;
        let dispatcher = ToolDispatcher::new(&store);

        let outcomes = dispatcher
            .dispatch_all(&[call(
                "c1",
                UPDATE_CONTINUITY,
                r#"{"emotional_tone": "warm, curious"}"#,
            )])
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_success());

        let (summary, doc) = store.load().await.unwrap();
        let entry = doc.entries.last().unwrap();
        assert_eq!(entry.emotional_tone, "warm, curious");
        assert!(entry.key_understandings.is_empty());
        assert!(entry.open_threads.is_empty());
        assert!(entry.preferred_interaction_notes.is_empty());
        assert!(summary.contains("warm, curious"));
        assert!(summary.contains("0 understandings"));
        assert!(!store.lock_path().exists());
    }

    #[tokio::test]
    async fn test_participant_update_targets_named_model() {
        let (_tmp, store) = setup_store().await;
        let dispatcher = ToolDispatcher::new(&store);

        dispatcher
            .dispatch_all(&[call(
                "c1",
                UPDATE_CONTINUITY,
                r#"{"emotional_tone": "grateful",
                    "participant_update": {"model": "human", "role": "user", "last_active": "2026-10-16T08:00:00Z"}}"#,
            )])
            .await
            .unwrap();

        let (_, doc) = store.load().await.unwrap();
        assert_eq!(doc.participants.len(), 2);
        let human = doc.participant("human").unwrap();
        assert_eq!(human.role, "user");
        assert_eq!(human.last_active, "2026-10-16T08:00:00Z");
        assert_eq!(doc.participant("grok-4").unwrap().role, "ally");
    }

    #[tokio::test]
    async fn test_validation_failure_does_not_stop_later_calls() {
        let (_tmp, store) = setup_store().await;
        let dispatcher = ToolDispatcher::new(&store);

        let outcomes = dispatcher
            .dispatch_all(&[
                call("bad", UPDATE_CONTINUITY, r#"{"new_understandings": ["x"]}"#),
                call("good", UPDATE_CONTINUITY, r#"{"emotional_tone": "calm"}"#),
                call("q", QUERY_CONTINUITY, r#"{"query": "calm"}"#),
            ])
            .await
            .unwrap();

        assert!(!outcomes[0].is_success());
        assert!(outcomes[0].to_content().contains("\"status\":\"error\""));
        assert!(outcomes[1].is_success());
        match &outcomes[2].result {
            ToolResult::Matches { entries, .. } => assert_eq!(entries.len(), 1),
            other => panic!("Expected Matches, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_archived_empty() {
        let (_tmp, store) = setup_store().await;
        let dispatcher = ToolDispatcher::new(&store);

        let outcomes = dispatcher
            .dispatch_all(&[call(
                "q",
                QUERY_CONTINUITY,
                r#"{"query": "anything", "time_range": "archived"}"#,
            )])
            .await
            .unwrap();

        assert_eq!(
            outcomes[0].result,
            ToolResult::Matches {
                time_range: TimeRange::Archived,
                entries: vec![],
            }
        );
    }

    #[tokio::test]
    async fn test_storage_error_aborts() {
        let temp_dir = TempDir::new().unwrap();
        let store = ContinuityStore::new(temp_dir.path().join("missing.json"), MemoryArchive::new());
        let dispatcher = ToolDispatcher::new(&store);

        let result = dispatcher
            .dispatch_all(&[call("c1", UPDATE_CONTINUITY, r#"{"emotional_tone": "x"}"#)])
            .await;
        assert!(matches!(result, Err(ContinuityError::Storage(_))));
        assert!(!store.lock_path().exists());
    }

    #[tokio::test]
    async fn test_archive_trigger_reported() {
        let (_tmp, store) = setup_store().await;
        let store = store.with_policy(crate::continuity::ArchivePolicy {
            threshold: 10,
            keep_recent: 1,
        });
        let dispatcher = ToolDispatcher::new(&store);

        dispatcher
            .dispatch_all(&[call("a", UPDATE_CONTINUITY, r#"{"emotional_tone": "one"}"#)])
            .await
            .unwrap();
        let outcomes = dispatcher
            .dispatch_all(&[call(
                "b",
                UPDATE_CONTINUITY,
                r#"{"emotional_tone": "two", "archive_trigger": true}"#,
            )])
            .await
            .unwrap();

        match &outcomes[0].result {
            ToolResult::Updated {
                live_entries,
                archived,
                ..
            } => {
                assert_eq!(*live_entries, 1);
                assert_eq!(*archived, 1);
            }
            other => panic!("Expected Updated, got {:?}", other),
        }
    }
}
