//! Two-tier query routing.
//!
//! **Tier 1 (lexical):** if a project name from the source map appears in the
//! question, route to every entry of that project plus the cross-cutting
//! resource. No model call.
//!
//! **Tier 2 (model):** otherwise ask the model to classify the question
//! against the serialized source map, the recent conversation, and the
//! sentinel options. The reply must be a JSON object, optionally wrapped in
//! a markdown code fence:
//!
//! ```json
//! {"target": "<link> | INTERNAL_TASKS | None", "reason": "...", "category": "..."}
//! ```
//!
//! `url` and `link` are accepted as aliases of `target`. One model call per
//! query at most; nothing is retried.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Config, InternalTasksConfig};
use crate::error::{HubError, Result};
use crate::llm::CompletionModel;
use crate::matcher;
use crate::models::{GatherTarget, Message, RouteTarget, RoutingDecision, RoutingTier, SourceMapEntry};
use crate::prompts::{self, INTERNAL_TASKS_SENTINEL};
use crate::source_map;

/// A routing decision plus the documents it resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingOutcome {
    pub decision: RoutingDecision,
    /// Empty exactly when the decision is [`RouteTarget::NoMatch`].
    pub targets: Vec<GatherTarget>,
}

impl RoutingOutcome {
    fn no_match(reason: impl Into<String>, tier: RoutingTier) -> Self {
        Self {
            decision: RoutingDecision {
                target: RouteTarget::NoMatch,
                category: String::new(),
                reason: reason.into(),
                tier,
            },
            targets: Vec::new(),
        }
    }
}

pub struct Router {
    model: Arc<dyn CompletionModel>,
    internal_tasks: Option<InternalTasksConfig>,
    cross_cutting_project: Option<String>,
    recent_turns: usize,
}

impl Router {
    pub fn new(model: Arc<dyn CompletionModel>, config: &Config) -> Self {
        Self {
            model,
            internal_tasks: config.internal_tasks.clone(),
            cross_cutting_project: config
                .source_map
                .cross_cutting_project
                .as_ref()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            recent_turns: config.context.recent_context_turns,
        }
    }

    /// Route `query`. `history` holds the messages before this query.
    ///
    /// # Errors
    ///
    /// [`HubError::RoutingParse`] when the model's reply is not a valid
    /// decision; model transport errors as returned by the backend.
    pub async fn route(
        &self,
        query: &str,
        history: &[Message],
        entries: &[SourceMapEntry],
    ) -> Result<RoutingOutcome> {
        if let Some(outcome) = self.route_lexical(query, entries) {
            return Ok(outcome);
        }
        if entries.is_empty() && self.internal_tasks.is_none() {
            return Ok(RoutingOutcome::no_match(
                "source map is empty",
                RoutingTier::Lexical,
            ));
        }
        self.route_with_model(query, history, entries).await
    }

    /// Tier 1 only.
    pub fn route_lexical(&self, query: &str, entries: &[SourceMapEntry]) -> Option<RoutingOutcome> {
        let project = matcher::identify(query, entries)?;
        let targets =
            source_map::project_targets(entries, &project, self.cross_cutting_project.as_deref());
        let first = targets.first()?.document_reference.clone();
        let categories: Vec<&str> = source_map::entries_for_project(entries, &project)
            .into_iter()
            .map(|e| e.category.as_str())
            .filter(|c| !c.is_empty())
            .collect();
        debug!(project = %project, targets = targets.len(), "lexical route");
        Some(RoutingOutcome {
            decision: RoutingDecision {
                target: RouteTarget::Document(first),
                category: categories.join(", "),
                reason: format!("Matched project name '{}' in the question", project),
                tier: RoutingTier::Lexical,
            },
            targets,
        })
    }

    async fn route_with_model(
        &self,
        query: &str,
        history: &[Message],
        entries: &[SourceMapEntry],
    ) -> Result<RoutingOutcome> {
        let prompt = prompts::routing_prompt(
            query,
            prompts::recent(history, self.recent_turns),
            entries,
            self.internal_tasks.is_some(),
        );
        let reply = self.model.complete(&prompt).await?;
        let parsed = parse_decision(&reply)?;
        debug!(route = ?parsed.target, "model route");
        Ok(self.resolve(parsed, entries))
    }

    /// Turn a parsed decision into gather targets.
    ///
    /// Only documents listed in the source map (or the internal task
    /// document) are ever opened; any other link is a no-match.
    fn resolve(&self, parsed: ParsedDecision, entries: &[SourceMapEntry]) -> RoutingOutcome {
        let ParsedDecision {
            mut target,
            mut category,
            reason,
        } = parsed;
        if let RouteTarget::Document(reference) = &target {
            let is_internal = self
                .internal_tasks
                .as_ref()
                .map(|i| i.document.trim() == reference.trim())
                .unwrap_or(false);
            if is_internal {
                target = RouteTarget::InternalTasks;
            }
        }
        let targets = match &target {
            RouteTarget::NoMatch => Vec::new(),
            RouteTarget::InternalTasks => match &self.internal_tasks {
                Some(internal) => {
                    if category.is_empty() {
                        category = internal.label.clone();
                    }
                    vec![GatherTarget::new(internal.document.clone(), internal.label.clone())]
                }
                None => {
                    return RoutingOutcome::no_match(
                        "internal task data is not configured",
                        RoutingTier::Model,
                    )
                }
            },
            RouteTarget::Document(reference) => {
                let entry = entries
                    .iter()
                    .find(|e| e.document_reference.trim() == reference.trim());
                match entry {
                    Some(e) => {
                        if category.is_empty() {
                            category = e.category.clone();
                        }
                        vec![GatherTarget::new(e.document_reference.trim(), e.label())]
                    }
                    None => {
                        warn!(route = %reference, "model chose a link outside the source map");
                        return RoutingOutcome::no_match(
                            "the chosen link is not in the source map",
                            RoutingTier::Model,
                        );
                    }
                }
            }
        };
        RoutingOutcome {
            decision: RoutingDecision {
                target,
                category,
                reason,
                tier: RoutingTier::Model,
            },
            targets,
        }
    }
}

/// A decision as read from model text, before resolution against the map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDecision {
    pub target: RouteTarget,
    pub category: String,
    pub reason: String,
}

/// Remove a surrounding markdown code fence (with optional language tag).
pub fn strip_code_fences(text: &str) -> &str {
    let mut t = text.trim();
    if let Some(rest) = t.strip_prefix("```") {
        t = match rest.find('\n') {
            Some(i) => &rest[i + 1..],
            None => rest.trim_start_matches("json"),
        };
    }
    if let Some(rest) = t.trim_end().strip_suffix("```") {
        t = rest;
    }
    t.trim()
}

/// Parse a routing reply into a decision.
pub fn parse_decision(text: &str) -> Result<ParsedDecision> {
    let body = strip_code_fences(text);
    let value: Value =
        serde_json::from_str(body).map_err(|e| HubError::RoutingParse(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| HubError::RoutingParse("expected a JSON object".to_string()))?;

    let raw_target = ["target", "url", "link"]
        .iter()
        .find_map(|k| obj.get(*k))
        .ok_or_else(|| HubError::RoutingParse("missing 'target' field".to_string()))?;
    let target = match raw_target {
        Value::Null => RouteTarget::NoMatch,
        Value::String(s) => classify_target(s),
        other => {
            return Err(HubError::RoutingParse(format!(
                "'target' must be a string, got {}",
                other
            )))
        }
    };

    let text_field = |k: &str| {
        obj.get(k)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };
    Ok(ParsedDecision {
        target,
        category: text_field("category"),
        reason: text_field("reason"),
    })
}

fn classify_target(raw: &str) -> RouteTarget {
    let t = raw.trim();
    if t.is_empty() || t.eq_ignore_ascii_case("none") || t.eq_ignore_ascii_case("null") {
        RouteTarget::NoMatch
    } else if t.eq_ignore_ascii_case(INTERNAL_TASKS_SENTINEL) {
        RouteTarget::InternalTasks
    } else {
        RouteTarget::Document(t.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CannedModel {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedModel {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }
        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionModel for CannedModel {
        fn model_name(&self) -> &str {
            "canned"
        }
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn entry(project: &str, category: &str, link: &str) -> SourceMapEntry {
        SourceMapEntry {
            project_name: project.into(),
            category: category.into(),
            document_reference: link.into(),
            description: String::new(),
        }
    }

    fn config() -> Config {
        let mut cfg = Config::minimal();
        cfg.source_map.cross_cutting_project = Some("Inventory".into());
        cfg.internal_tasks = Some(InternalTasksConfig {
            document: "tasks".into(),
            label: "Internal Tasks".into(),
        });
        cfg
    }

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn parses_fenced_no_match_with_url_alias() {
        let d = parse_decision("```json\n{\"url\":\"None\",\"reason\":\"no match\"}\n```").unwrap();
        assert_eq!(d.target, RouteTarget::NoMatch);
        assert_eq!(d.reason, "no match");
    }

    #[test]
    fn parses_sentinels_and_documents() {
        let d = parse_decision(r#"{"target":"internal_tasks"}"#).unwrap();
        assert_eq!(d.target, RouteTarget::InternalTasks);
        let d = parse_decision(r#"{"target":" doc-9 ","category":"Pricing"}"#).unwrap();
        assert_eq!(d.target, RouteTarget::Document("doc-9".into()));
        assert_eq!(d.category, "Pricing");
        let d = parse_decision(r#"{"target":null}"#).unwrap();
        assert_eq!(d.target, RouteTarget::NoMatch);
    }

    #[test]
    fn rejects_malformed_replies() {
        for bad in ["Sure! The answer is doc-1", "[1,2]", r#"{"reason":"x"}"#, r#"{"target":5}"#] {
            assert!(
                matches!(parse_decision(bad), Err(HubError::RoutingParse(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[tokio::test]
    async fn lexical_match_skips_model() {
        let model = CannedModel::new("unused");
        let router = Router::new(model.clone(), &config());
        let entries = vec![
            entry("Tudor House", "Manufacturing", "th-mfg"),
            entry("Tudor House", "Pricing", "th-price"),
            entry("Inventory", "Stock", "inv"),
        ];
        let out = router
            .route("Quote for Tudor House doors?", &[], &entries)
            .await
            .unwrap();
        assert_eq!(model.calls(), 0);
        assert_eq!(out.decision.tier, RoutingTier::Lexical);
        assert_eq!(out.decision.category, "Manufacturing, Pricing");
        let labels: Vec<_> = out.targets.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Tudor House - Manufacturing", "Tudor House - Pricing", "Inventory - Stock"]
        );
    }

    #[tokio::test]
    async fn model_route_to_internal_tasks() {
        let model = CannedModel::new(r#"{"target":"INTERNAL_TASKS","reason":"staff question"}"#);
        let router = Router::new(model.clone(), &config());
        let entries = vec![entry("Tudor House", "Pricing", "th-price")];
        let history = vec![
            Message::new(crate::models::Role::User, "earlier question"),
            Message::new(crate::models::Role::Assistant, "earlier answer"),
        ];
        let out = router
            .route("What tasks does Alice have?", &history, &entries)
            .await
            .unwrap();
        assert_eq!(out.decision.target, RouteTarget::InternalTasks);
        assert_eq!(out.targets, vec![GatherTarget::new("tasks", "Internal Tasks")]);
        let prompt = model.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("earlier answer"));
        assert!(prompt.contains("th-price"));
    }

    #[tokio::test]
    async fn model_document_route_is_labeled_from_map() {
        let model = CannedModel::new(r#"{"target":"th-price","reason":"pricing"}"#);
        let router = Router::new(model, &config());
        let entries = vec![entry("Tudor House", "Pricing", "th-price")];
        let out = router.route("how much is a door", &[], &entries).await.unwrap();
        assert_eq!(out.decision.category, "Pricing");
        assert_eq!(out.targets[0].label, "Tudor House - Pricing");
    }

    #[tokio::test]
    async fn links_outside_the_map_are_not_gathered() {
        let entries = vec![entry("Tudor House", "Pricing", "th-price")];
        for link in ["hallucinated-doc", "memory"] {
            let reply = format!(r#"{{"target":"{}","category":"History"}}"#, link);
            let router = Router::new(CannedModel::new(&reply), &config());
            let out = router.route("show me everything", &[], &entries).await.unwrap();
            assert_eq!(out.decision.target, RouteTarget::NoMatch, "{}", link);
            assert!(out.targets.is_empty());
        }
    }

    #[tokio::test]
    async fn internal_document_link_routes_to_internal_tasks() {
        let model = CannedModel::new(r#"{"target":"tasks"}"#);
        let router = Router::new(model, &config());
        let out = router.route("open tasks?", &[], &[]).await.unwrap();
        assert_eq!(out.decision.target, RouteTarget::InternalTasks);
        assert_eq!(out.targets, vec![GatherTarget::new("tasks", "Internal Tasks")]);
    }

    #[tokio::test]
    async fn routing_prompt_sees_last_three_exchanges() {
        let model = CannedModel::new(r#"{"target":"None"}"#);
        let router = Router::new(model.clone(), &config());
        let entries = vec![entry("Tudor House", "Pricing", "th-price")];
        let history: Vec<Message> = (0..8)
            .map(|i| {
                let role = if i % 2 == 0 {
                    crate::models::Role::User
                } else {
                    crate::models::Role::Assistant
                };
                Message::new(role, format!("message-{}", i))
            })
            .collect();
        router.route("and then?", &history, &entries).await.unwrap();
        let prompt = model.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("message-2"));
        assert!(prompt.contains("message-7"));
        assert!(!prompt.contains("message-1"));
    }

    #[tokio::test]
    async fn internal_tasks_without_config_is_no_match() {
        let model = CannedModel::new(r#"{"target":"INTERNAL_TASKS"}"#);
        let router = Router::new(model, &Config::minimal());
        let entries = vec![entry("Tudor House", "Pricing", "th-price")];
        let out = router.route("tasks?", &[], &entries).await.unwrap();
        assert_eq!(out.decision.target, RouteTarget::NoMatch);
        assert!(out.targets.is_empty());
    }

    #[tokio::test]
    async fn empty_map_without_internal_tasks_skips_model() {
        let model = CannedModel::new("unused");
        let router = Router::new(model.clone(), &Config::minimal());
        let out = router.route("anything", &[], &[]).await.unwrap();
        assert_eq!(out.decision.target, RouteTarget::NoMatch);
        assert_eq!(model.calls(), 0);
    }
}
