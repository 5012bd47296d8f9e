//! Session lifecycle.
//!
//! A [`SessionContext`] is the active session's identifier plus its message
//! log. It is an explicit value: [`run_turn`] takes it by `&mut` and nothing
//! about the active session lives in globals. [`SessionController`] owns one
//! context for interactive front-ends (the CLI REPL); the HTTP server
//! rebuilds a context from storage on every request instead.
//!
//! Persistence order per turn: the user message is appended before any model
//! call, the assistant message after the reply exists. Append failures become
//! warnings on the reply, never errors.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::conversation::coerce_session_id;
use crate::error::Result;
use crate::models::{Message, Role, RoutingDecision, SessionSummary};
use crate::pipeline::HubAssistant;

/// Reply for an empty submission. Nothing is persisted for it.
pub const EMPTY_QUERY_REPLY: &str = "Please type a question.";

/// The active session: identifier plus in-memory message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionContext {
    pub session_id: String,
    pub messages: Vec<Message>,
}

impl SessionContext {
    /// A new session with a random identifier and an empty log.
    pub fn fresh() -> Self {
        Self {
            session_id: new_session_id(),
            messages: Vec::new(),
        }
    }

    /// Rebuild a session's context from the conversation store.
    pub async fn load(assistant: &HubAssistant, session_id: &str) -> Self {
        let session_id = coerce_session_id(session_id);
        let messages = assistant.conversations().load_session(&session_id).await;
        Self {
            session_id,
            messages,
        }
    }
}

pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// What a front-end shows for one submitted query.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub session_id: String,
    #[serde(rename = "reply")]
    pub answer: String,
    /// How the query was routed; `None` if routing failed.
    pub routing: Option<RoutingDecision>,
    /// Persistence problems that did not block the answer.
    pub warnings: Vec<String>,
}

/// Process one query against `ctx`, persisting both sides of the turn.
pub async fn run_turn(assistant: &HubAssistant, ctx: &mut SessionContext, query: &str) -> TurnReply {
    let query = query.trim();
    if query.is_empty() {
        return TurnReply {
            session_id: ctx.session_id.clone(),
            answer: EMPTY_QUERY_REPLY.to_string(),
            routing: None,
            warnings: Vec::new(),
        };
    }
    let conversations = assistant.conversations();
    let mut warnings = Vec::new();

    let history = ctx.messages.clone();
    ctx.messages.push(Message::new(Role::User, query));
    if let Err(e) = conversations.append(&ctx.session_id, Role::User, query).await {
        warnings.push(format!("Your message was not saved to history: {}", e));
    }

    let outcome = assistant.answer(&history, query).await;

    ctx.messages.push(Message::new(Role::Assistant, outcome.answer.as_str()));
    if let Err(e) = conversations
        .append(&ctx.session_id, Role::Assistant, &outcome.answer)
        .await
    {
        warnings.push(format!("The reply was not saved to history: {}", e));
    }

    TurnReply {
        session_id: ctx.session_id.clone(),
        answer: outcome.answer,
        routing: outcome.decision,
        warnings,
    }
}

/// Owns the active session for an interactive front-end.
pub struct SessionController {
    assistant: Arc<HubAssistant>,
    context: SessionContext,
}

impl SessionController {
    /// Start with a fresh session.
    pub fn new(assistant: Arc<HubAssistant>) -> Self {
        Self {
            assistant,
            context: SessionContext::fresh(),
        }
    }

    /// Start with the most recently active stored session, or a fresh one
    /// when there is no history.
    pub async fn resume_latest(assistant: Arc<HubAssistant>) -> Self {
        let mut controller = Self::new(assistant);
        let latest = controller
            .assistant
            .conversations()
            .list_sessions(Some(1))
            .await
            .into_iter()
            .next();
        if let Some(summary) = latest {
            controller.resume_session(&summary.session_id).await;
        }
        controller
    }

    pub fn session_id(&self) -> &str {
        &self.context.session_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.context.messages
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn assistant(&self) -> &HubAssistant {
        &self.assistant
    }

    /// Supersede the active session with a fresh one.
    pub fn new_session(&mut self) -> &str {
        self.context = SessionContext::fresh();
        info!(session = %self.context.session_id, "new session");
        &self.context.session_id
    }

    /// Make `session_id` active and reload its log. Returns the message count.
    pub async fn resume_session(&mut self, session_id: &str) -> usize {
        self.context = SessionContext::load(&self.assistant, session_id).await;
        info!(session = %self.context.session_id, messages = self.context.messages.len(), "resumed session");
        self.context.messages.len()
    }

    pub async fn submit(&mut self, query: &str) -> TurnReply {
        run_turn(&self.assistant, &mut self.context, query).await
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let limit = self.assistant.config().sessions.list_limit;
        self.assistant.conversations().list_sessions(Some(limit)).await
    }

    /// Delete one stored session. Deleting the active one starts a new session.
    pub async fn delete_session(&mut self, session_id: &str) -> Result<usize> {
        let removed = self.assistant.conversations().delete_session(session_id).await?;
        if coerce_session_id(session_id) == self.context.session_id {
            self.new_session();
        }
        Ok(removed)
    }

    /// Erase every stored session and start fresh.
    pub async fn wipe_all_history(&mut self) -> Result<()> {
        self.assistant.conversations().wipe_all().await?;
        self.new_session();
        Ok(())
    }
}
