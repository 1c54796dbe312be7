//! Summary derivation from the latest entry
//!
//! `Summarizer` is the seam for a model-backed digest; the store only needs
//! `entries -> String`.

use super::Entry;

pub trait Summarizer: Send + Sync {
    /// Digest of `entries`. Empty input yields an empty string.
    fn summarize(&self, entries: &[Entry]) -> String;
}

/// Fixed-template summary built from the most recent entry only
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleSummarizer;

impl Summarizer for RuleSummarizer {
    fn summarize(&self, entries: &[Entry]) -> String {
        let Some(latest) = entries.last() else {
            return String::new();
        };

        let count = latest.key_understandings.len();
        let top_understanding = latest
            .key_understandings
            .first()
            .map(String::as_str)
            .unwrap_or("");
        let top_thread = latest.open_threads.first().map(String::as_str).unwrap_or("");

        format!(
            "Alliance active. Tone: {}. {} understandings, e.g., {}. Open: {}.",
            latest.emotional_tone, count, top_understanding, top_thread
        )
    }
}
