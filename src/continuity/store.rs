//! Continuity store: load / append / archive / persist
//!
//! The document is an explicit value: callers `load()` it, hand it to
//! `append()`, and the store persists the whole thing back. Writes go to a
//! sibling temp file which is then renamed over the document, so readers
//! never observe a partial document. Cross-process writers serialize through
//! `lock()`.

use super::archive::{ArchiveSink, JsonlArchive};
use super::document::now_timestamp;
use super::summarizer::{RuleSummarizer, Summarizer};
use super::tokens::estimate_tokens;
use super::{ContinuityDocument, Entry, EntryQuery, TimeRange};
use crate::{ContinuityConfig, ContinuityError, Result, DEFAULT_MODEL};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// When to archive and how much to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchivePolicy {
    /// Archive once the live entry count exceeds this
    pub threshold: usize,
    /// Most recent entries left in the live document
    pub keep_recent: usize,
}

impl Default for ArchivePolicy {
    fn default() -> Self {
        Self {
            threshold: 10,
            keep_recent: 10,
        }
    }
}

impl ArchivePolicy {
    pub fn should_archive(&self, live_entries: usize, trigger: bool) -> bool {
        trigger || live_entries > self.threshold
    }

    /// Number of oldest entries to evict from a live list of `live_entries`
    pub fn evict_count(&self, live_entries: usize) -> usize {
        live_entries.saturating_sub(self.keep_recent)
    }
}

/// Held while a load -> mutate -> persist transaction runs. Dropping it
/// removes the lock file.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl Drop for StoreLock {
    // Synchronous remove: Drop cannot await.
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

pub struct ContinuityStore {
    document_path: PathBuf,
    archive: Box<dyn ArchiveSink>,
    summarizer: Box<dyn Summarizer>,
    policy: ArchivePolicy,
    active_model: String,
    lock_timeout: Duration,
}

impl std::fmt::Debug for ContinuityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuityStore")
            .field("document_path", &self.document_path)
            .field("policy", &self.policy)
            .field("active_model", &self.active_model)
            .finish_non_exhaustive()
    }
}

impl ContinuityStore {
    pub fn new(document_path: impl Into<PathBuf>, archive: impl ArchiveSink + 'static) -> Self {
        Self {
            document_path: document_path.into(),
            archive: Box::new(archive),
            summarizer: Box::new(RuleSummarizer),
            policy: ArchivePolicy::default(),
            active_model: DEFAULT_MODEL.to_string(),
            lock_timeout: Duration::from_secs(2),
        }
    }

    /// Store backed by the configured document and JSONL archive
    pub fn from_config(config: &ContinuityConfig) -> Self {
        Self::new(
            config.document_path.clone(),
            JsonlArchive::new(config.archive_path()),
        )
        .with_policy(config.archive_policy())
        .with_active_model(config.model.clone())
        .with_lock_timeout(config.lock_timeout)
    }

    pub fn with_summarizer(mut self, summarizer: impl Summarizer + 'static) -> Self {
        self.summarizer = Box::new(summarizer);
        self
    }

    pub fn with_policy(mut self, policy: ArchivePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Participant touched on every append
    pub fn with_active_model(mut self, model: impl Into<String>) -> Self {
        self.active_model = model.into();
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn document_path(&self) -> &Path {
        &self.document_path
    }

    pub fn active_model(&self) -> &str {
        &self.active_model
    }

    pub fn policy(&self) -> ArchivePolicy {
        self.policy
    }

    pub fn archive(&self) -> &dyn ArchiveSink {
        self.archive.as_ref()
    }

    fn sibling_path(&self, suffix: &str) -> PathBuf {
        let mut name = self.document_path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.sibling_path(".lock")
    }

    /// Read the document. Fails if it is missing, unreadable, or malformed;
    /// the store never creates one.
    pub async fn load(&self) -> Result<(String, ContinuityDocument)> {
        let path = &self.document_path;
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ContinuityError::storage("read", path, e))?;
        let document: ContinuityDocument = serde_json::from_str(&content)
            .map_err(|e| ContinuityError::storage("parse", path, e))?;

        debug!(
            "Loaded {} ({} entries, {} participants)",
            path.display(),
            document.entries.len(),
            document.participants.len()
        );
        Ok((document.summary.clone(), document))
    }

    /// Append an entry, re-derive summary and token estimate, archive if the
    /// policy says so, and persist.
    ///
    /// On error nothing is committed to the document file, but `document`
    /// may already hold the attempted mutation.
    pub async fn append(
        &self,
        entry: Entry,
        document: &mut ContinuityDocument,
        archive_trigger: bool,
    ) -> Result<()> {
        document.entries.push(entry);
        document.summary = self.summarizer.summarize(&document.entries);
        document.upsert_participant(&self.active_model, None, now_timestamp());

        let mut archived = 0;
        if self
            .policy
            .should_archive(document.entries.len(), archive_trigger)
        {
            archived = self.archive_overflow(document).await?;
        }

        self.refresh_derived(document);
        self.persist(document).await?;

        info!(
            "Appended entry to {} ({} live, {} archived, ~{} tokens)",
            self.document_path.display(),
            document.entries.len(),
            archived,
            document.estimated_tokens
        );
        Ok(())
    }

    /// Archive down to the keep bound without appending. Returns how many
    /// entries moved; persists only if something moved.
    pub async fn archive_now(&self, document: &mut ContinuityDocument) -> Result<usize> {
        let moved = self.archive_overflow(document).await?;
        if moved > 0 {
            self.refresh_derived(document);
            self.persist(document).await?;
            info!("Archived {} entries from {}", moved, self.document_path.display());
        }
        Ok(moved)
    }

    /// Move the oldest entries beyond the keep bound into the archive sink.
    /// The sink is written before the document, so entries left behind by a
    /// failed document write are already archived; those are skipped on the
    /// next eviction.
    async fn archive_overflow(&self, document: &mut ContinuityDocument) -> Result<usize> {
        let evict = self.policy.evict_count(document.entries.len());
        if evict == 0 {
            return Ok(0);
        }

        let archived = self.archive.entries().await?;
        let fresh: Vec<Entry> = document.entries[..evict]
            .iter()
            .filter(|entry| !archived.contains(entry))
            .cloned()
            .collect();
        if fresh.len() < evict {
            debug!(
                "Skipping {} entries already in the archive",
                evict - fresh.len()
            );
        }
        if !fresh.is_empty() {
            self.archive.append(&fresh).await?;
        }

        document.entries.drain(..evict);
        Ok(evict)
    }

    fn refresh_derived(&self, document: &mut ContinuityDocument) {
        if !document.entries.is_empty() {
            document.summary = self.summarizer.summarize(&document.entries);
        }
        document.estimated_tokens = estimate_tokens(document);
    }

    /// Overwrite the document atomically (temp file + rename).
    pub async fn persist(&self, document: &ContinuityDocument) -> Result<()> {
        let path = &self.document_path;
        let content = serde_json::to_string_pretty(document)
            .map_err(|e| ContinuityError::storage("serialize", path, e))?;

        let tmp = self.sibling_path(".tmp");
        if let Err(e) = write_atomic(path, &tmp, content.as_bytes()).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(ContinuityError::storage("write", path, e));
        }
        Ok(())
    }

    /// Scan entries for `query` within `range`, most recent first.
    pub async fn search(&self, query: &EntryQuery, range: TimeRange) -> Result<Vec<Entry>> {
        let mut results = Vec::new();

        if range.includes_archive() {
            results.extend(self.archive.search(query).await?);
        }

        if range.includes_live() {
            let (_, document) = self.load().await?;
            for entry in document.entries {
                if query.matches(&entry) && !results.contains(&entry) {
                    results.push(entry);
                }
            }
        }

        results.reverse();
        debug!("Query in {} scope matched {} entries", range, results.len());
        Ok(results)
    }

    /// Acquire the single-writer lock, waiting up to the lock timeout.
    pub async fn lock(&self) -> Result<StoreLock> {
        let lock_path = self.lock_path();
        let deadline = Instant::now() + self.lock_timeout;

        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await
            {
                Ok(mut file) => {
                    let stamp = format!("pid={} time={}\n", std::process::id(), now_timestamp());
                    if let Err(e) = file.write_all(stamp.as_bytes()).await {
                        warn!("Failed to stamp lock {}: {}", lock_path.display(), e);
                    }
                    debug!("Acquired lock {}", lock_path.display());
                    return Ok(StoreLock { path: lock_path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        let holder = fs::read_to_string(&lock_path).await.unwrap_or_default();
                        return Err(ContinuityError::Storage(format!(
                            "document locked: {} ({})",
                            lock_path.display(),
                            holder.trim()
                        )));
                    }
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(ContinuityError::storage("create lock", &lock_path, e)),
            }
        }
    }

    /// Remove a stale lock left by a crashed process. Returns whether one existed.
    pub async fn force_unlock(&self) -> Result<bool> {
        let lock_path = self.lock_path();
        match fs::remove_file(&lock_path).await {
            Ok(()) => {
                warn!("Removed stale lock {}", lock_path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ContinuityError::storage("remove lock", &lock_path, e)),
        }
    }
}

async fn write_atomic(path: &Path, tmp: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(tmp, path).await
}
