//! Conversation and memory classification types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Message role in a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// What kind of thing a memory entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Conversation,
    Preference,
    Rule,
    Fact,
    Action,
    Error,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Conversation => "conversation",
            MemoryKind::Preference => "preference",
            MemoryKind::Rule => "rule",
            MemoryKind::Fact => "fact",
            MemoryKind::Action => "action",
            MemoryKind::Error => "error",
        }
    }

    /// Semantic-store collection backing this kind. Errors share the
    /// conversations collection.
    pub fn collection(&self) -> &'static str {
        match self {
            MemoryKind::Conversation | MemoryKind::Error => "conversations",
            MemoryKind::Preference => "preferences",
            MemoryKind::Rule => "rules",
            MemoryKind::Fact => "facts",
            MemoryKind::Action => "actions",
        }
    }

    pub const ALL: [MemoryKind; 6] = [
        MemoryKind::Conversation,
        MemoryKind::Preference,
        MemoryKind::Rule,
        MemoryKind::Fact,
        MemoryKind::Action,
        MemoryKind::Error,
    ];
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(MemoryKind::Conversation),
            "preference" => Ok(MemoryKind::Preference),
            "rule" => Ok(MemoryKind::Rule),
            "fact" => Ok(MemoryKind::Fact),
            "action" => Ok(MemoryKind::Action),
            "error" => Ok(MemoryKind::Error),
            other => Err(format!("unknown memory kind: {other}")),
        }
    }
}

/// Retention tier for a memory entry. Ordering is significant:
/// low < medium < high < critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    Medium,
    High,
    Critical,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Low => "low",
            Importance::Medium => "medium",
            Importance::High => "high",
            Importance::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Importance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Importance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Importance::Low),
            "medium" => Ok(Importance::Medium),
            "high" => Ok(Importance::High),
            "critical" => Ok(Importance::Critical),
            other => Err(format!("unknown importance: {other}")),
        }
    }
}

/// A single stored memory entry, as returned from either tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Store-assigned identifier.
    pub id: String,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub kind: MemoryKind,
    pub importance: Importance,
    pub created_at: DateTime<Utc>,
    /// None for critical entries, which never expire.
    pub expires_at: Option<DateTime<Utc>>,
    /// Similarity score when the entry came from a semantic search.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Context assembled from memory for prompting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryContext {
    pub recent_history: Vec<MemoryEntry>,
    pub relevant_memories: Vec<MemoryEntry>,
    pub user_rules: Vec<MemoryEntry>,
    pub relevant_rules: Vec<MemoryEntry>,
    /// Set when the memory tier was unreachable and the context is degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
