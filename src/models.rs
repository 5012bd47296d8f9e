//! Core data models used throughout the hub agent.
//!
//! These types represent the conversation records, source map entries, and
//! routing / context values that flow through a single turn.

use serde::{Deserialize, Serialize};

/// A row read from a table: ordered cell text.
pub type Row = Vec<String>;

/// Speaker of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse a persisted role cell. `model` is accepted as an assistant alias.
    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" | "model" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a session's message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// `YYYY-MM-DD HH:MM:SS`; empty for messages not yet persisted.
    #[serde(default)]
    pub timestamp: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: String::new(),
        }
    }
}

/// A raw persisted conversation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationRecord {
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: String,
}

impl ConversationRecord {
    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
            timestamp: self.timestamp.clone(),
        }
    }
}

/// A distinct session with its most recent activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub last_timestamp: String,
}

/// One row of the source map: where a project's data for a category lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceMapEntry {
    pub project_name: String,
    pub category: String,
    /// Opaque locator passed to the tabular store (usually a sheet URL).
    pub document_reference: String,
    /// Remaining columns flattened as `Column: value; ...` for the router prompt.
    pub description: String,
}

impl SourceMapEntry {
    /// Provenance label for blocks gathered from this entry.
    pub fn label(&self) -> String {
        match (self.project_name.is_empty(), self.category.is_empty()) {
            (false, false) => format!("{} - {}", self.project_name, self.category),
            (false, true) => self.project_name.clone(),
            (true, false) => self.category.clone(),
            (true, true) => self.document_reference.clone(),
        }
    }
}

/// Where a query should be answered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reference", rename_all = "snake_case")]
pub enum RouteTarget {
    Document(String),
    InternalTasks,
    NoMatch,
}

/// Which routing tier produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingTier {
    Lexical,
    Model,
}

/// The router's answer for one query. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub target: RouteTarget,
    pub category: String,
    pub reason: String,
    pub tier: RoutingTier,
}

/// A document to gather, with the label its blocks carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatherTarget {
    pub document_reference: String,
    pub label: String,
}

impl GatherTarget {
    pub fn new(document_reference: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            document_reference: document_reference.into(),
            label: label.into(),
        }
    }
}

impl From<&SourceMapEntry> for GatherTarget {
    fn from(entry: &SourceMapEntry) -> Self {
        GatherTarget::new(entry.document_reference.clone(), entry.label())
    }
}

/// Content of a [`ContextBlock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockBody {
    Rows(Vec<Row>),
    /// The document could not be read; carries the error text.
    Error(String),
}

/// One labeled slice of grounding data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBlock {
    pub label: String,
    /// `None` for document-level error blocks.
    pub table: Option<String>,
    pub body: BlockBody,
}

impl ContextBlock {
    pub fn is_error(&self) -> bool {
        matches!(self.body, BlockBody::Error(_))
    }

    /// Render the block in its prompt form.
    pub fn render(&self) -> String {
        match &self.body {
            BlockBody::Rows(rows) => {
                let mut out = format!(
                    "--- DATA FROM '{}' (Tab: {}) ---\n",
                    self.label,
                    self.table.as_deref().unwrap_or("")
                );
                for row in rows {
                    out.push_str(&render_row(row));
                    out.push('\n');
                }
                out
            }
            BlockBody::Error(msg) => format!("Error reading {}: {}\n", self.label, msg),
        }
    }
}

pub fn render_row(row: &[String]) -> String {
    row.join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_is_lenient() {
        assert_eq!(Role::parse(" User "), Some(Role::User));
        assert_eq!(Role::parse("model"), Some(Role::Assistant));
        assert_eq!(Role::parse("system"), None);
    }

    #[test]
    fn entry_label_fallbacks() {
        let mut e = SourceMapEntry {
            project_name: "Tudor House".into(),
            category: "Pricing".into(),
            document_reference: "ref-1".into(),
            description: String::new(),
        };
        assert_eq!(e.label(), "Tudor House - Pricing");
        e.category.clear();
        assert_eq!(e.label(), "Tudor House");
        e.project_name.clear();
        assert_eq!(e.label(), "ref-1");
    }

    #[test]
    fn block_render_formats() {
        let block = ContextBlock {
            label: "Tudor House - Pricing".into(),
            table: Some("Quotes".into()),
            body: BlockBody::Rows(vec![
                vec!["Item".into(), "Cost".into()],
                vec!["Door".into(), "120".into()],
            ]),
        };
        assert_eq!(
            block.render(),
            "--- DATA FROM 'Tudor House - Pricing' (Tab: Quotes) ---\nItem | Cost\nDoor | 120\n"
        );

        let err = ContextBlock {
            label: "Broken".into(),
            table: None,
            body: BlockBody::Error("permission denied".into()),
        };
        assert_eq!(err.render(), "Error reading Broken: permission denied\n");
    }
}
