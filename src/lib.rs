//! Continuity - persisted shared memory for chat-completion conversations
//!
//! Keeps a small JSON "continuity" document (summary, entries, participants)
//! and exposes it to a chat-completion model through two tools:
//! - `update_continuity` appends an entry and re-derives summary/token estimate
//! - `query_continuity` searches live and archived entries

pub mod agent;
pub mod config;
pub mod continuity;

pub use agent::{ChatClient, ContinuityAgent, ExchangeOutcome, ToolDispatcher};
pub use continuity::{
    ArchivePolicy, ArchiveSink, ContinuityDocument, ContinuityStore, Entry, EntryQuery,
    Participant, TimeRange,
};

use std::path::PathBuf;
use std::time::Duration;

/// Default document location, relative to the working directory
pub const DEFAULT_DOCUMENT_PATH: &str = "continuity/alliance-schema.json";
pub const DEFAULT_MODEL: &str = "grok-4";
pub const DEFAULT_BASE_URL: &str = "https://api.x.ai/v1";
pub const DEFAULT_API_KEY_ENV: &str = "XAI_API_KEY";

/// Configuration for Continuity
#[derive(Debug, Clone)]
pub struct ContinuityConfig {
    /// Path to the continuity document
    pub document_path: PathBuf,

    /// Archive sink location; defaults to `<document>.archive.jsonl`
    pub archive_path: Option<PathBuf>,

    /// Entries left in the live document after archival
    pub keep_recent: usize,

    /// Archival fires once the live entry count exceeds this
    pub archive_threshold: usize,

    /// Chat model, also the participant key touched on every update
    pub model: String,

    /// OpenAI-compatible API base URL
    pub base_url: String,

    /// Name of the environment variable holding the API key
    pub api_key_env: String,

    /// Timeout for a single chat-completion request
    pub request_timeout: Duration,

    /// How long to wait for the document lock before giving up
    pub lock_timeout: Duration,
}

impl ContinuityConfig {
    pub fn new(document_path: PathBuf) -> Self {
        Self {
            document_path,
            archive_path: None,
            keep_recent: 10,
            archive_threshold: 10,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            request_timeout: Duration::from_secs(60),
            lock_timeout: Duration::from_secs(2),
        }
    }

    /// Resolved archive sink path
    pub fn archive_path(&self) -> PathBuf {
        self.archive_path
            .clone()
            .unwrap_or_else(|| self.document_path.with_extension("archive.jsonl"))
    }

    pub fn with_document_path(mut self, path: PathBuf) -> Self {
        self.document_path = path;
        self
    }

    pub fn with_archive_path(mut self, path: PathBuf) -> Self {
        self.archive_path = Some(path);
        self
    }

    pub fn with_keep_recent(mut self, keep_recent: usize) -> Self {
        self.keep_recent = keep_recent;
        self
    }

    pub fn with_archive_threshold(mut self, threshold: usize) -> Self {
        self.archive_threshold = threshold;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key_env(mut self, env: impl Into<String>) -> Self {
        self.api_key_env = env.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Archive policy derived from the configured bounds
    pub fn archive_policy(&self) -> ArchivePolicy {
        ArchivePolicy {
            threshold: self.archive_threshold,
            keep_recent: self.keep_recent,
        }
    }
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self::new(PathBuf::from(DEFAULT_DOCUMENT_PATH))
    }
}

/// Result type for Continuity operations
pub type Result<T> = std::result::Result<T, ContinuityError>;

/// Errors that can occur in Continuity
#[derive(Debug, thiserror::Error)]
pub enum ContinuityError {
    /// Backing document or archive unreadable, corrupt, unwritable, or locked
    #[error("Storage error: {0}")]
    Storage(String),

    /// Tool arguments missing or malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Chat-completion call failed, timed out, or returned garbage
    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl ContinuityError {
    pub(crate) fn storage(action: &str, path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{} {}: {}", action, path.display(), err))
    }
}
