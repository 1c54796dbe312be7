//! Continuity agent
//!
//! One exchange = read the summary, call the chat-completion API with the
//! continuity tools, run whatever tool calls come back (in order), and hand
//! the assistant's text to the caller.

mod client;
mod dispatcher;
mod tools;

pub use client::{strip_think_tags, ChatClient, ChatReply};
pub use dispatcher::{ToolDispatcher, ToolOutcome, ToolResult};
pub use tools::{
    tool_definitions, ContinuityTool, QueryContinuityArgs, ToolCall, UpdateContinuityArgs,
    QUERY_CONTINUITY, UPDATE_CONTINUITY,
};

use crate::continuity::ContinuityStore;
use crate::{ContinuityConfig, Result};
use tracing::info;

/// Result of one user exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeOutcome {
    /// Assistant plain-text content
    pub content: String,
    /// One outcome per tool call, in response order
    pub tool_outcomes: Vec<ToolOutcome>,
}

/// System message carrying the current shared summary
pub fn system_prompt(summary: &str) -> String {
    format!("Shared context: {summary}. Respond as an empathetic ally.")
}

pub struct ContinuityAgent {
    client: ChatClient,
    store: ContinuityStore,
}

impl ContinuityAgent {
    pub fn new(client: ChatClient, store: ContinuityStore) -> Self {
        Self { client, store }
    }

    /// Agent wired from config; the API key comes from the environment.
    pub fn from_config(config: &ContinuityConfig) -> Result<Self> {
        let client = ChatClient::from_config(config)?;
        let store = ContinuityStore::from_config(config);
        Ok(Self::new(client, store))
    }

    pub fn store(&self) -> &ContinuityStore {
        &self.store
    }

    pub fn client(&self) -> &ChatClient {
        &self.client
    }

    /// Run one exchange. If the API call fails, nothing has been mutated.
    /// Storage failures during tool dispatch abort the exchange.
    pub async fn exchange(&self, user_message: &str) -> Result<ExchangeOutcome> {
        let (summary, _) = self.store.load().await?;
        let reply = self
            .client
            .complete(&system_prompt(&summary), user_message)
            .await?;

        let tool_outcomes = ToolDispatcher::new(&self.store)
            .dispatch_all(&reply.tool_calls)
            .await?;

        info!(
            "Exchange complete: {} tool calls, {} failed",
            tool_outcomes.len(),
            tool_outcomes.iter().filter(|o| !o.is_success()).count()
        );

        Ok(ExchangeOutcome {
            content: reply.content,
            tool_outcomes,
        })
    }
}
