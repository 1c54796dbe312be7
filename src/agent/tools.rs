//! Tool definitions offered to the model, and typed decoding of its calls

use crate::continuity::{null_as_default, ParticipantUpdate, TimeRange};
use crate::{ContinuityError, Result};
use serde::Deserialize;
use serde_json::{json, Value};

pub const UPDATE_CONTINUITY: &str = "update_continuity";
pub const QUERY_CONTINUITY: &str = "query_continuity";

/// A raw tool call as it appears in a chat-completion response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments string
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpdateContinuityArgs {
    pub emotional_tone: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub new_understandings: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub updated_threads: Vec<String>,
    #[serde(default)]
    pub participant_update: Option<ParticipantUpdate>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub archive_trigger: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueryContinuityArgs {
    pub query: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub time_range: TimeRange,
}

/// The closed set of tools this crate understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuityTool {
    UpdateContinuity(UpdateContinuityArgs),
    QueryContinuity(QueryContinuityArgs),
}

impl ContinuityTool {
    /// Decode a call by name. Unknown tools, bad JSON and missing or blank
    /// required arguments are validation errors.
    pub fn decode(call: &ToolCall) -> Result<Self> {
        let raw = if call.arguments.trim().is_empty() {
            "{}"
        } else {
            call.arguments.as_str()
        };

        match call.name.as_str() {
            UPDATE_CONTINUITY => {
                let args: UpdateContinuityArgs = parse_args(&call.name, raw)?;
                if args.emotional_tone.trim().is_empty() {
                    return Err(ContinuityError::Validation(
                        "emotional_tone cannot be empty".to_string(),
                    ));
                }
                Ok(Self::UpdateContinuity(args))
            }
            QUERY_CONTINUITY => {
                let args: QueryContinuityArgs = parse_args(&call.name, raw)?;
                if args.query.trim().is_empty() {
                    return Err(ContinuityError::Validation(
                        "query cannot be empty".to_string(),
                    ));
                }
                Ok(Self::QueryContinuity(args))
            }
            other => Err(ContinuityError::Validation(format!("unknown tool: {other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateContinuity(_) => UPDATE_CONTINUITY,
            Self::QueryContinuity(_) => QUERY_CONTINUITY,
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(tool: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| ContinuityError::Validation(format!("{tool} arguments: {e}")))
}

/// Tool declarations in chat-completions `tools` format
pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "function": {
                "name": UPDATE_CONTINUITY,
                "description": "Record new insights, emotional shifts, or thread updates to our shared alliance memory.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "emotional_tone": {
                            "type": "string",
                            "description": "1-5 descriptors of current relational feel"
                        },
                        "new_understandings": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "Insights to add to shared knowledge"
                        },
                        "updated_threads": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "Modified or new open threads"
                        },
                        "participant_update": {
                            "type": "object",
                            "description": "Optional updates to participants",
                            "properties": {
                                "model": {"type": "string"},
                                "role": {"type": "string"},
                                "last_active": {"type": "string"}
                            }
                        },
                        "archive_trigger": {
                            "type": "boolean",
                            "default": false,
                            "description": "Request archival of old entries"
                        }
                    },
                    "required": ["emotional_tone"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": QUERY_CONTINUITY,
                "description": "Search alliance history for specific concepts or past exchanges.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Keywords to look for"
                        },
                        "time_range": {
                            "type": "string",
                            "enum": ["recent", "all", "archived"],
                            "default": "recent"
                        }
                    },
                    "required": ["query"]
                }
            }
        }),
    ]
}
