//! Archive sink for entries evicted from the live document
//!
//! The default sink is a JSON Lines file next to the document: one entry per
//! line, append-only, in chronological order.

use super::{Entry, EntryQuery};
use crate::{ContinuityError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[async_trait]
pub trait ArchiveSink: Send + Sync {
    /// Durably append `entries`, preserving their order.
    async fn append(&self, entries: &[Entry]) -> Result<()>;

    /// Every archived entry, oldest first.
    async fn entries(&self) -> Result<Vec<Entry>>;

    /// Archived entries matching `query`, oldest first.
    async fn search(&self, query: &EntryQuery) -> Result<Vec<Entry>> {
        let mut entries = self.entries().await?;
        entries.retain(|e| query.matches(e));
        Ok(entries)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries().await?.len())
    }
}

/// JSONL file archive
#[derive(Debug, Clone)]
pub struct JsonlArchive {
    path: PathBuf,
}

impl JsonlArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ArchiveSink for JsonlArchive {
    async fn append(&self, entries: &[Entry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut buf = String::new();
        for entry in entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| ContinuityError::storage("serialize entry for", &self.path, e))?;
            buf.push_str(&line);
            buf.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ContinuityError::storage("create", parent, e))?;
            }
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| ContinuityError::storage("open", &self.path, e))?;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| ContinuityError::storage("append to", &self.path, e))?;
        file.flush()
            .await
            .map_err(|e| ContinuityError::storage("flush", &self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| ContinuityError::storage("sync", &self.path, e))?;

        debug!("Archived {} entries to {}", entries.len(), self.path.display());
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<Entry>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ContinuityError::storage("read", &self.path, e)),
        };

        let mut entries = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Entry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    "Skipping unreadable archive line {} in {}: {}",
                    idx + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(entries)
    }
}

/// In-memory archive (no persistence)
#[derive(Debug, Default)]
pub struct MemoryArchive {
    entries: Mutex<Vec<Entry>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArchiveSink for MemoryArchive {
    async fn append(&self, entries: &[Entry]) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| ContinuityError::Storage("archive mutex poisoned".to_string()))?
            .extend_from_slice(entries);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<Entry>> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| ContinuityError::Storage("archive mutex poisoned".to_string()))?
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty_archive() {
        let temp_dir = TempDir::new().unwrap();
        let archive = JsonlArchive::new(temp_dir.path().join("none.archive.jsonl"));
        assert!(archive.entries().await.unwrap().is_empty());
        assert_eq!(archive.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_preserves_order_across_calls() {
        let temp_dir = TempDir::new().unwrap();
        let archive = JsonlArchive::new(temp_dir.path().join("nested/doc.archive.jsonl"));

        archive
            .append(&[Entry::new("first"), Entry::new("second")])
            .await
            .unwrap();
        archive.append(&[Entry::new("third")]).await.unwrap();

        let tones: Vec<String> = archive
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.emotional_tone)
            .collect();
        assert_eq!(tones, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_corrupt_lines_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("doc.archive.jsonl");
        let good = serde_json::to_string(&Entry::new("kept")).unwrap();
        tokio::fs::write(&path, format!("{{not json\n{}\n\n", good))
            .await
            .unwrap();

        let entries = JsonlArchive::new(&path).entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].emotional_tone, "kept");
    }

    #[tokio::test]
    async fn test_search_filters() {
        let archive = MemoryArchive::new();
        archive
            .append(&[
                Entry::new("calm").with_threads(vec!["garden project".into()]),
                Entry::new("busy"),
            ])
            .await
            .unwrap();

        let hits = archive
            .search(&EntryQuery::parse("garden").unwrap())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].emotional_tone, "calm");
    }
}
