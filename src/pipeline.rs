//! The per-turn answer pipeline: route, gather, synthesize.
//!
//! [`HubAssistant`] owns the shared, session-independent collaborators (the
//! tabular store, the model, the cached source map) and turns one question
//! plus its prior history into one reply. Every failure is converted to a
//! plain-text reply here; nothing escapes a turn.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::assembler::ContextAssembler;
use crate::config::{Config, StoreBackend, StoreConfig};
use crate::conversation::ConversationStore;
use crate::error::{HubError, Result};
use crate::llm::{create_model, CompletionModel};
use crate::models::{Message, RoutingDecision, SourceMapEntry};
use crate::prompts;
use crate::router::{Router, RoutingOutcome};
use crate::source_map::SourceMap;
use crate::store::memory::InMemoryTabularStore;
use crate::store::sheets::SheetsStore;
use crate::store::timed::TimedStore;
use crate::store::TabularStore;

/// Reply when routing finds nothing relevant.
pub const NO_MATCH_REPLY: &str =
    "I couldn't find a relevant sheet for that question. Try naming the project or the kind of data you need.";

/// Reply when every gathered document failed to open.
pub const DATA_UNAVAILABLE_REPLY: &str =
    "I found the right sheet but couldn't open the data. Check that it exists and is shared with the assistant.";

/// Result of answering one question.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub answer: String,
    /// `None` when routing itself failed.
    pub decision: Option<RoutingDecision>,
    /// The error behind a fallback reply, if any.
    pub failure: Option<HubError>,
}

impl TurnOutcome {
    fn failed(err: HubError, decision: Option<RoutingDecision>) -> Self {
        Self {
            answer: err.user_message(),
            decision,
            failure: Some(err),
        }
    }
}

pub struct HubAssistant {
    config: Config,
    model: Arc<dyn CompletionModel>,
    conversations: ConversationStore,
    source_map: SourceMap,
    router: Router,
    assembler: ContextAssembler,
}

impl HubAssistant {
    pub fn new(config: Config, store: Arc<dyn TabularStore>, model: Arc<dyn CompletionModel>) -> Self {
        Self {
            conversations: ConversationStore::new(store.clone(), &config.memory),
            source_map: SourceMap::new(store.clone(), &config.source_map),
            router: Router::new(model.clone(), &config),
            assembler: ContextAssembler::new(store, &config.context),
            model,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Current source map entries (cached).
    pub async fn sources(&self) -> Arc<Vec<SourceMapEntry>> {
        self.source_map.load().await
    }

    /// Route without gathering or answering.
    pub async fn route(&self, query: &str, history: &[Message]) -> Result<RoutingOutcome> {
        let entries = self.source_map.load().await;
        self.router.route(query, history, &entries).await
    }

    /// Answer `query` given the messages that preceded it.
    ///
    /// Makes at most two model calls: one for routing (skipped on a lexical
    /// match) and one for synthesis (skipped on no match or unreadable data).
    pub async fn answer(&self, history: &[Message], query: &str) -> TurnOutcome {
        let outcome = match self.route(query, history).await {
            Ok(o) => o,
            Err(e) => {
                warn!(error = %e, "routing failed");
                return TurnOutcome::failed(e, None);
            }
        };
        let decision = outcome.decision;
        info!(route = ?decision.target, tier = ?decision.tier, category = %decision.category, "routed");

        if outcome.targets.is_empty() {
            return TurnOutcome {
                answer: NO_MATCH_REPLY.to_string(),
                decision: Some(decision),
                failure: None,
            };
        }

        let context = self.assembler.gather(&outcome.targets).await;
        if context.all_errors() {
            return TurnOutcome {
                answer: format!("{}\n\n{}", DATA_UNAVAILABLE_REPLY, context.text().trim_end()),
                decision: Some(decision),
                failure: None,
            };
        }
        debug!(
            blocks = context.blocks.len(),
            errors = context.error_count(),
            omitted = context.omitted,
            "context assembled"
        );

        let prompt = prompts::answer_prompt(
            query,
            prompts::recent(history, self.config.context.recent_context_turns),
            &context.text(),
        );
        match self.model.complete(&prompt).await {
            Ok(answer) => TurnOutcome {
                answer: answer.trim().to_string(),
                decision: Some(decision),
                failure: None,
            },
            Err(e) => {
                warn!(error = %e, "answer synthesis failed");
                TurnOutcome::failed(e, Some(decision))
            }
        }
    }
}

/// Build the configured store backend, bounded by the store timeout.
pub fn build_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn TabularStore>> {
    let inner: Arc<dyn TabularStore> = match config.backend {
        StoreBackend::Sheets => Arc::new(SheetsStore::new(config)?),
        StoreBackend::Memory => match &config.seed_path {
            Some(path) => Arc::new(
                InMemoryTabularStore::from_seed_file(path)
                    .with_context(|| "Failed to load memory store seed")?,
            ),
            None => Arc::new(InMemoryTabularStore::new()),
        },
    };
    Ok(Arc::new(TimedStore::new(
        inner,
        Duration::from_secs(config.timeout_secs),
    )))
}

/// Build a ready assistant from configuration.
pub fn build_assistant(config: &Config) -> anyhow::Result<HubAssistant> {
    let store = build_store(&config.store)?;
    let model = create_model(&config.model)?;
    Ok(HubAssistant::new(config.clone(), store, model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RouteTarget, Row};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies from a fixed script, in order.
    struct ScriptedModel {
        replies: Mutex<Vec<Result<String>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            })
        }
        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl CompletionModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, _prompt: &str) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(HubError::ModelUnavailable("script exhausted".into()));
            }
            replies.remove(0)
        }
    }

    fn table(rows: &[&[&str]]) -> Vec<Row> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn store() -> Arc<InMemoryTabularStore> {
        let store = Arc::new(InMemoryTabularStore::new());
        store.add_table(
            "master",
            "AI_LINKS",
            table(&[
                &["Project Name", "Category", "Raw Link"],
                &["Tudor House", "Pricing", "th-price"],
            ]),
        );
        store.add_table("th-price", "Prices", table(&[&["Item", "Cost"], &["Door", "400"]]));
        store
    }

    #[tokio::test]
    async fn lexical_route_makes_one_model_call() {
        let model = ScriptedModel::new(vec![Ok("A door costs 400.".into())]);
        let hub = HubAssistant::new(Config::minimal(), store(), model.clone());
        let out = hub.answer(&[], "Tudor House door price?").await;
        assert_eq!(out.answer, "A door costs 400.");
        assert_eq!(model.calls(), 1);
        assert!(out.failure.is_none());
    }

    #[tokio::test]
    async fn unparseable_route_is_a_fallback_reply() {
        let model = ScriptedModel::new(vec![Ok("I think the pricing sheet".into())]);
        let hub = HubAssistant::new(Config::minimal(), store(), model.clone());
        let out = hub.answer(&[], "how much is a door").await;
        assert!(matches!(out.failure, Some(HubError::RoutingParse(_))));
        assert_eq!(out.answer, HubError::RoutingParse(String::new()).user_message());
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn unreadable_target_skips_synthesis() {
        let store = store();
        store.fail_document("th-price", HubError::NotFound("th-price".into()));
        let model = ScriptedModel::new(vec![]);
        let hub = HubAssistant::new(Config::minimal(), store, model.clone());
        let out = hub.answer(&[], "Tudor House prices").await;
        assert!(out.answer.starts_with(DATA_UNAVAILABLE_REPLY));
        assert!(out.answer.contains("Error reading Tudor House - Pricing"));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn synthesis_failure_keeps_decision() {
        let model = ScriptedModel::new(vec![Err(HubError::ModelUnavailable("quota".into()))]);
        let hub = HubAssistant::new(Config::minimal(), store(), model);
        let out = hub.answer(&[], "Tudor House?").await;
        assert!(out.answer.contains("quota"));
        assert_eq!(
            out.decision.map(|d| d.target),
            Some(RouteTarget::Document("th-price".into()))
        );
    }

    #[test]
    fn memory_backend_builds_without_credentials() {
        let hub = build_assistant(&Config::minimal()).unwrap();
        assert_eq!(hub.model_name(), "disabled");
    }
}
