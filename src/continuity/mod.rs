//! Continuity document lifecycle
//!
//! Loading, appending, summarizing, size estimation and archival of the
//! shared-memory document.

mod archive;
mod document;
mod query;
mod store;
mod summarizer;
mod tokens;

pub use archive::{ArchiveSink, JsonlArchive, MemoryArchive};
pub use document::{
    now_timestamp, ContinuityDocument, Entry, Participant, ParticipantUpdate,
    DEFAULT_PARTICIPANT_ROLE,
};
pub(crate) use document::null_as_default;
pub use query::{EntryQuery, TimeRange};
pub use store::{ArchivePolicy, ContinuityStore, StoreLock};
pub use summarizer::{RuleSummarizer, Summarizer};
pub use tokens::estimate_tokens;
