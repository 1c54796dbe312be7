//! Continuity document types

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Role given to a participant inserted without one
pub const DEFAULT_PARTICIPANT_ROLE: &str = "assistant";

/// Current UTC time as RFC 3339 with a `Z` suffix
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Treat an explicit JSON `null` the same as an absent field
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One recorded update: tone, insights and open threads at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub timestamp: String,
    pub emotional_tone: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub key_understandings: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub open_threads: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub preferred_interaction_notes: String,
}

impl Entry {
    /// New entry stamped with the current time
    pub fn new(emotional_tone: impl Into<String>) -> Self {
        Self {
            timestamp: now_timestamp(),
            emotional_tone: emotional_tone.into(),
            key_understandings: Vec::new(),
            open_threads: Vec::new(),
            preferred_interaction_notes: String::new(),
        }
    }

    pub fn with_understandings(mut self, understandings: Vec<String>) -> Self {
        self.key_understandings = understandings;
        self
    }

    pub fn with_threads(mut self, threads: Vec<String>) -> Self {
        self.open_threads = threads;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.preferred_interaction_notes = notes.into();
        self
    }

    /// All searchable text, lowercased
    pub(crate) fn search_text(&self) -> String {
        let mut text = self.emotional_tone.to_lowercase();
        for part in self
            .key_understandings
            .iter()
            .chain(self.open_threads.iter())
            .chain(std::iter::once(&self.preferred_interaction_notes))
        {
            text.push('\n');
            text.push_str(&part.to_lowercase());
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub model: String,
    pub role: String,
    pub last_active: String,
}

/// Partial participant record carried by an `update_continuity` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ParticipantUpdate {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub last_active: Option<String>,
}

/// The persisted shared-memory record.
///
/// `summary` and `estimated_tokens` are derived from `entries`; only the
/// store recomputes them. Unknown top-level keys in the file are kept in
/// `extra` and written back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuityDocument {
    #[serde(default)]
    pub summary: String,

    pub entries: Vec<Entry>,

    pub participants: Vec<Participant>,

    #[serde(default)]
    pub estimated_tokens: u64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContinuityDocument {
    pub fn participant(&self, model: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.model == model)
    }

    /// Update-or-insert a participant keyed by `model`
    pub fn upsert_participant(&mut self, model: &str, role: Option<&str>, last_active: String) {
        if let Some(existing) = self.participants.iter_mut().find(|p| p.model == model) {
            existing.last_active = last_active;
            if let Some(role) = role {
                existing.role = role.to_string();
            }
            return;
        }

        self.participants.push(Participant {
            model: model.to_string(),
            role: role.unwrap_or(DEFAULT_PARTICIPANT_ROLE).to_string(),
            last_active,
        });
    }

    /// Apply a tool-supplied participant update. Without a model the update
    /// targets `default_model`; without a timestamp it uses now.
    pub fn apply_participant_update(&mut self, update: &ParticipantUpdate, default_model: &str) {
        let model = update
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(default_model);
        let last_active = update
            .last_active
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(now_timestamp);
        self.upsert_participant(model, update.role.as_deref(), last_active);
    }
}
