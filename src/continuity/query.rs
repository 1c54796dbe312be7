//! Keyword matching over entries

use super::Entry;
use crate::{ContinuityError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which entries a query scans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    /// Live document only
    #[default]
    Recent,
    /// Archive and live document
    All,
    /// Archive sink only
    Archived,
}

impl TimeRange {
    pub fn includes_live(self) -> bool {
        matches!(self, Self::Recent | Self::All)
    }

    pub fn includes_archive(self) -> bool {
        matches!(self, Self::Archived | Self::All)
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recent => write!(f, "recent"),
            Self::All => write!(f, "all"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl FromStr for TimeRange {
    type Err = ContinuityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recent" => Ok(Self::Recent),
            "all" => Ok(Self::All),
            "archived" => Ok(Self::Archived),
            other => Err(ContinuityError::Validation(format!(
                "invalid time_range: {other} (expected recent, all or archived)"
            ))),
        }
    }
}

/// Case-insensitive query; every whitespace-separated term must appear
/// somewhere in the entry's text fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryQuery {
    terms: Vec<String>,
}

impl EntryQuery {
    pub fn parse(query: &str) -> Result<Self> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        if terms.is_empty() {
            return Err(ContinuityError::Validation(
                "query cannot be empty".to_string(),
            ));
        }
        Ok(Self { terms })
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        let text = entry.search_text();
        self.terms.iter().all(|term| text.contains(term.as_str()))
    }
}
