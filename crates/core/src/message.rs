//! Conversation, turn, and content-segment domain types.
//!
//! These are the value objects that flow through a run:
//! user turn → model turn (segments) → tool-result turns → next model turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::ConversationError;
use crate::tool::ToolResult;

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

/// One finished unit of assistant (or user) output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentSegment {
    Text {
        value: String,
    },
    /// A fully parsed tool request. Never built from a partial buffer.
    ToolInvocation {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
}

impl ContentSegment {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text {
            value: value.into(),
        }
    }

    pub fn tool_invocation(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self::ToolInvocation {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A single conversation entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Position in the conversation; strictly increasing.
    pub ordinal: u64,

    pub role: Role,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<ContentSegment>,

    /// Set only on `Role::Tool` turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,

    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Concatenated text of all text segments.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                ContentSegment::Text { value } => Some(value.as_str()),
                ContentSegment::ToolInvocation { .. } => None,
            })
            .collect()
    }

    /// Tool invocations requested in this turn, in order.
    pub fn invocations(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.segments.iter().filter_map(|s| match s {
            ContentSegment::ToolInvocation {
                id,
                name,
                arguments,
            } => Some((id.as_str(), name.as_str(), arguments)),
            ContentSegment::Text { .. } => None,
        })
    }
}

/// An ordered sequence of turns with shared context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,

    pub turns: Vec<Turn>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        Self::with_id(ConversationId::new())
    }

    pub fn with_id(id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            id,
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a conversation from persisted turns.
    pub fn from_turns(id: ConversationId, turns: Vec<Turn>) -> Self {
        let mut conv = Self::with_id(id);
        if let Some(first) = turns.first() {
            conv.created_at = first.timestamp;
        }
        conv.turns = turns;
        conv
    }

    fn next_ordinal(&self) -> u64 {
        self.turns.last().map(|t| t.ordinal + 1).unwrap_or(0)
    }

    fn push(&mut self, role: Role, segments: Vec<ContentSegment>, tool_result: Option<ToolResult>) {
        let now = Utc::now();
        self.updated_at = now;
        self.turns.push(Turn {
            ordinal: self.next_ordinal(),
            role,
            segments,
            tool_result,
            timestamp: now,
        });
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(Role::User, vec![ContentSegment::text(text)], None);
    }

    pub fn push_assistant(&mut self, segments: Vec<ContentSegment>) {
        self.push(Role::Assistant, segments, None);
    }

    /// Append a tool-result turn.
    ///
    /// The result must answer an invocation of a preceding assistant turn
    /// that has not been answered yet.
    pub fn push_tool_result(&mut self, result: ToolResult) -> Result<(), ConversationError> {
        let answered: HashSet<&str> = self
            .turns
            .iter()
            .filter_map(|t| t.tool_result.as_ref())
            .map(|r| r.invocation_id.as_str())
            .collect();
        if answered.contains(result.invocation_id.as_str()) {
            return Err(ConversationError::DuplicateResult(result.invocation_id));
        }

        let requested = self
            .turns
            .iter()
            .filter(|t| t.role == Role::Assistant)
            .flat_map(|t| t.invocations())
            .any(|(id, _, _)| id == result.invocation_id);
        if !requested {
            return Err(ConversationError::UnknownInvocation(result.invocation_id));
        }

        self.push(Role::Tool, Vec::new(), Some(result));
        Ok(())
    }

    /// Invocation ids that still lack a tool-result turn.
    pub fn pending_invocations(&self) -> Vec<&str> {
        let answered: HashSet<&str> = self
            .turns
            .iter()
            .filter_map(|t| t.tool_result.as_ref())
            .map(|r| r.invocation_id.as_str())
            .collect();
        self.turns
            .iter()
            .filter(|t| t.role == Role::Assistant)
            .flat_map(|t| t.invocations())
            .map(|(id, _, _)| id)
            .filter(|id| !answered.contains(id))
            .collect()
    }

    /// Text of the most recent user turn, if any.
    pub fn last_user_text(&self) -> Option<String> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(Turn::text)
    }

    /// Rough token estimate (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.turns
            .iter()
            .map(|t| {
                let result_len = t
                    .tool_result
                    .as_ref()
                    .map(|r| r.content_for_model().len())
                    .unwrap_or(0);
                (t.text().len() + result_len) / 4
            })
            .sum()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
