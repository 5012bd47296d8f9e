//! Prompt builders for routing and answer synthesis.

use serde_json::json;

use crate::models::{Message, SourceMapEntry};

/// Routing target meaning "use the internal task document".
pub const INTERNAL_TASKS_SENTINEL: &str = "INTERNAL_TASKS";
/// Routing target meaning "nothing fits".
pub const NO_MATCH_SENTINEL: &str = "None";

const HISTORY_LINE_CHARS: usize = 1_000;

/// Messages of the last `turns` exchanges, oldest first. One exchange is a
/// user message and its reply.
pub fn recent(history: &[Message], turns: usize) -> &[Message] {
    &history[history.len().saturating_sub(turns.saturating_mul(2))..]
}

fn render_history(history: &[Message]) -> String {
    if history.is_empty() {
        return "(none)\n".to_string();
    }
    let mut out = String::new();
    for m in history {
        let content: String = m.content.chars().take(HISTORY_LINE_CHARS).collect();
        out.push_str(&format!("{}: {}\n", m.role, content));
    }
    out
}

/// Serialize the source map for the router.
pub fn source_map_json(entries: &[SourceMapEntry]) -> String {
    let rows: Vec<_> = entries
        .iter()
        .map(|e| {
            json!({
                "project": e.project_name,
                "category": e.category,
                "link": e.document_reference,
                "description": e.description,
            })
        })
        .collect();
    serde_json::to_string(&rows).unwrap_or_else(|_| "[]".to_string())
}

/// Classification request for tier-2 routing.
pub fn routing_prompt(
    query: &str,
    history: &[Message],
    entries: &[SourceMapEntry],
    offer_internal_tasks: bool,
) -> String {
    let mut options = String::from("- a \"link\" value copied exactly from the source map\n");
    if offer_internal_tasks {
        options.push_str(&format!(
            "- \"{}\" for questions about staff tasks, assignments, or to-do items\n",
            INTERNAL_TASKS_SENTINEL
        ));
    }
    options.push_str(&format!("- \"{}\" if nothing fits\n", NO_MATCH_SENTINEL));

    format!(
        "You are a routing assistant for a project data hub. \
Choose the single data source that best answers the user's question.\n\n\
RECENT CONVERSATION:\n{history}\n\
USER QUESTION: \"{query}\"\n\n\
SOURCE MAP (JSON):\n{map}\n\n\
Valid targets:\n{options}\n\
Respond with JSON only, no prose:\n\
{{\"target\": \"...\", \"reason\": \"...\", \"category\": \"...\"}}\n",
        history = render_history(history),
        query = query,
        map = source_map_json(entries),
        options = options,
    )
}

/// Grounded answer request.
pub fn answer_prompt(query: &str, history: &[Message], context: &str) -> String {
    format!(
        "You are the project hub assistant. Answer the question using only the data below. \
If the data does not contain the answer, say so plainly.\n\n\
RECENT CONVERSATION:\n{history}\n\
QUESTION: \"{query}\"\n\n\
DATA:\n{context}\n",
        history = render_history(history),
        query = query,
        context = context,
    )
}
