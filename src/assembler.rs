//! Context assembly: fetch, bound, and label grounding data.
//!
//! For each gather target the assembler opens the document, walks its tables
//! in order, skips excluded table names, and reads up to
//! `max_rows_per_table` rows from each. Blocks come out in target-then-table
//! order.
//!
//! A failure anywhere inside one document replaces that document's blocks
//! with a single inline error block. Other documents are unaffected.
//!
//! # Budget
//!
//! The concatenated text is capped at `max_context_chars`. The first block
//! that would overflow is cut at a row boundary, every later row block is
//! dropped, and a trailer line records how many were omitted. Error blocks
//! are short and always kept.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ContextConfig;
use crate::error::Result;
use crate::models::{BlockBody, ContextBlock, GatherTarget};
use crate::store::{TableRef, TabularStore};

/// The bounded grounding context for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledContext {
    pub blocks: Vec<ContextBlock>,
    /// Row blocks dropped by the character budget.
    pub omitted: usize,
    /// Whether the budget cut anything at all.
    pub truncated: bool,
}

impl AssembledContext {
    /// Every block is an error block (and there is at least one).
    pub fn all_errors(&self) -> bool {
        !self.blocks.is_empty() && self.blocks.iter().all(ContextBlock::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_error()).count()
    }

    /// The grounding text handed to the model.
    pub fn text(&self) -> String {
        let mut out: String = self
            .blocks
            .iter()
            .map(|b| b.render() + "\n")
            .collect();
        if self.truncated {
            out.push_str(&truncation_trailer(self.omitted));
        }
        out
    }
}

pub fn truncation_trailer(omitted: usize) -> String {
    format!("--- CONTEXT TRUNCATED: {} block(s) omitted ---\n", omitted)
}

pub struct ContextAssembler {
    store: Arc<dyn TabularStore>,
    max_rows: usize,
    excluded: Vec<String>,
    max_chars: usize,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn TabularStore>, config: &ContextConfig) -> Self {
        Self {
            store,
            max_rows: config.max_rows_per_table,
            excluded: config
                .excluded_table_names
                .iter()
                .map(|n| n.trim().to_lowercase())
                .collect(),
            max_chars: config.max_context_chars,
        }
    }

    pub fn is_excluded(&self, table: &str) -> bool {
        let name = table.trim().to_lowercase();
        self.excluded.iter().any(|e| *e == name)
    }

    /// Gather every target, then apply the character budget.
    pub async fn gather(&self, targets: &[GatherTarget]) -> AssembledContext {
        let mut blocks = Vec::new();
        for target in targets {
            match self.read_document(target).await {
                Ok(doc_blocks) => {
                    debug!(label = %target.label, tables = doc_blocks.len(), "gathered document");
                    blocks.extend(doc_blocks);
                }
                Err(e) => {
                    warn!(label = %target.label, reference = %target.document_reference, error = %e, "document read failed");
                    blocks.push(ContextBlock {
                        label: target.label.clone(),
                        table: None,
                        body: BlockBody::Error(e.to_string()),
                    });
                }
            }
        }
        apply_budget(blocks, self.max_chars)
    }

    async fn read_document(&self, target: &GatherTarget) -> Result<Vec<ContextBlock>> {
        let handle = self.store.open_document(&target.document_reference).await?;
        let tables = self.store.list_tables(&handle).await?;
        let mut blocks = Vec::new();
        for table in tables {
            if self.is_excluded(&table) {
                debug!(table = %table, "skipping excluded table");
                continue;
            }
            let rows = self
                .store
                .read_all_rows(&handle, &TableRef::Name(table.clone()), Some(self.max_rows))
                .await?;
            blocks.push(ContextBlock {
                label: target.label.clone(),
                table: Some(table),
                body: BlockBody::Rows(rows),
            });
        }
        Ok(blocks)
    }
}

fn rendered_len(block: &ContextBlock) -> usize {
    block.render().chars().count() + 1
}

/// Keep blocks in order until `max_chars` is reached.
pub fn apply_budget(blocks: Vec<ContextBlock>, max_chars: usize) -> AssembledContext {
    let mut ctx = AssembledContext::default();
    let mut used = 0usize;

    for block in blocks {
        if block.is_error() {
            used += rendered_len(&block);
            ctx.blocks.push(block);
            continue;
        }
        if ctx.truncated {
            ctx.omitted += 1;
            continue;
        }
        let len = rendered_len(&block);
        if used + len <= max_chars {
            used += len;
            ctx.blocks.push(block);
            continue;
        }

        ctx.truncated = true;
        match cut_to_fit(block, max_chars.saturating_sub(used)) {
            Some(partial) => {
                used += rendered_len(&partial);
                ctx.blocks.push(partial);
            }
            None => ctx.omitted += 1,
        }
    }
    ctx
}

/// The longest row prefix of `block` whose rendering fits in `room`.
/// `None` when not even one row fits.
fn cut_to_fit(block: ContextBlock, room: usize) -> Option<ContextBlock> {
    let ContextBlock { label, table, body } = block;
    let rows = match body {
        BlockBody::Rows(rows) => rows,
        BlockBody::Error(_) => return None,
    };
    let mut kept = ContextBlock {
        label,
        table,
        body: BlockBody::Rows(Vec::new()),
    };
    let mut len = rendered_len(&kept);
    for row in rows {
        let row_len = crate::models::render_row(&row).chars().count() + 1;
        if len + row_len > room {
            break;
        }
        len += row_len;
        if let BlockBody::Rows(r) = &mut kept.body {
            r.push(row);
        }
    }
    match &kept.body {
        BlockBody::Rows(r) if !r.is_empty() => Some(kept),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HubError;
    use crate::models::Row;
    use crate::store::memory::InMemoryTabularStore;

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| vec![format!("item{}", i), format!("{}", i * 10)])
            .collect()
    }

    fn config() -> ContextConfig {
        ContextConfig {
            max_rows_per_table: 2,
            ..ContextConfig::default()
        }
    }

    #[tokio::test]
    async fn gathers_in_target_then_table_order() {
        let store = Arc::new(InMemoryTabularStore::new());
        store.add_table("a", "Main", rows(5));
        store.add_table("a", "Instructions", rows(1));
        store.add_table("a", "Extra", rows(1));
        store.add_table("b", "Stock", rows(1));
        let asm = ContextAssembler::new(store, &config());

        let ctx = asm
            .gather(&[GatherTarget::new("a", "A"), GatherTarget::new("b", "B")])
            .await;
        let tables: Vec<_> = ctx
            .blocks
            .iter()
            .map(|b| format!("{}/{}", b.label, b.table.as_deref().unwrap_or("")))
            .collect();
        assert_eq!(tables, vec!["A/Main", "A/Extra", "B/Stock"]);
        assert_eq!(ctx.blocks[0].body, BlockBody::Rows(rows(2)));
        assert!(ctx.text().starts_with("--- DATA FROM 'A' (Tab: Main) ---\nitem0 | 0\nitem1 | 10\n"));
        assert!(!ctx.truncated);
    }

    #[tokio::test]
    async fn failed_document_becomes_inline_error() {
        let store = Arc::new(InMemoryTabularStore::new());
        store.add_table("good", "Main", rows(1));
        store.add_table("bad", "Main", rows(1));
        store.fail_document("bad", HubError::PermissionDenied("no access".into()));
        let asm = ContextAssembler::new(store, &config());

        let ctx = asm
            .gather(&[GatherTarget::new("bad", "Bad"), GatherTarget::new("good", "Good")])
            .await;
        assert_eq!(ctx.blocks.len(), 2);
        assert!(ctx.blocks[0].is_error());
        assert!(!ctx.blocks[1].is_error());
        assert!(ctx.text().contains("Error reading Bad: permission denied"));
        assert!(!ctx.all_errors());
        assert_eq!(ctx.error_count(), 1);
    }

    #[test]
    fn exclusion_is_case_insensitive() {
        let asm = ContextAssembler::new(Arc::new(InMemoryTabularStore::new()), &config());
        assert!(asm.is_excluded(" admin "));
        assert!(!asm.is_excluded("Administration"));
    }

    fn block(label: &str, n: usize) -> ContextBlock {
        ContextBlock {
            label: label.into(),
            table: Some("T".into()),
            body: BlockBody::Rows(rows(n)),
        }
    }

    #[test]
    fn budget_cuts_at_row_boundary_and_drops_the_rest() {
        let first = block("A", 3);
        let room = rendered_len(&first) + rendered_len(&block("B", 1));
        let ctx = apply_budget(vec![first.clone(), block("B", 3), block("C", 3)], room);
        assert!(ctx.truncated);
        assert_eq!(ctx.omitted, 1);
        assert_eq!(ctx.blocks[0], first);
        assert_eq!(ctx.blocks[1].body, BlockBody::Rows(rows(1)));
        assert!(ctx.text().ends_with(&truncation_trailer(1)));
    }

    #[test]
    fn budget_keeps_error_blocks() {
        let err = ContextBlock {
            label: "X".into(),
            table: None,
            body: BlockBody::Error("gone".into()),
        };
        let ctx = apply_budget(vec![block("A", 50), err.clone()], 10);
        assert_eq!(ctx.blocks, vec![err]);
        assert_eq!(ctx.omitted, 1);
        assert!(ctx.all_errors());
    }

    #[test]
    fn budget_untouched_when_it_fits() {
        let ctx = apply_budget(vec![block("A", 2), block("B", 2)], 100_000);
        assert_eq!(ctx.blocks.len(), 2);
        assert!(!ctx.truncated);
        assert!(!ctx.text().contains("TRUNCATED"));
    }
}
