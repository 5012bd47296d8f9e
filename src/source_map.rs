//! The source map: which document holds which project's data.
//!
//! Loaded wholesale from one table (default `AI_LINKS`) whose header row
//! includes `Project Name`, `Category`, and `Raw Link`. Every other column is
//! free text handed to the model-assisted router as description.
//!
//! Project names are not unique: one project usually has several entries,
//! one per category. Lookups always return every matching entry.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::SourceMapConfig;
use crate::error::Result;
use crate::models::{GatherTarget, SourceMapEntry};
use crate::store::{Record, TableRef, TabularStore};

pub const PROJECT_COLUMN: &str = "Project Name";
pub const CATEGORY_COLUMN: &str = "Category";
pub const LINK_COLUMN: &str = "Raw Link";

/// A single cached value with a fetch time, expired by age only.
pub struct TtlCache<T> {
    ttl: Duration,
    slot: Mutex<Option<(T, Instant)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub fn get(&self) -> Option<T> {
        self.get_at(Instant::now())
    }

    /// The cached value if it was fetched less than `ttl` before `now`.
    pub fn get_at(&self, now: Instant) -> Option<T> {
        let slot = self.slot.lock().unwrap();
        match &*slot {
            Some((value, fetched_at)) if now.saturating_duration_since(*fetched_at) < self.ttl => {
                Some(value.clone())
            }
            _ => None,
        }
    }

    pub fn put(&self, value: T) {
        self.put_at(value, Instant::now());
    }

    pub fn put_at(&self, value: T, fetched_at: Instant) {
        *self.slot.lock().unwrap() = Some((value, fetched_at));
    }
}

/// Loader for the source map table, with a time-to-live cache.
pub struct SourceMap {
    store: Arc<dyn TabularStore>,
    document: String,
    table: String,
    cross_cutting_project: Option<String>,
    cache: TtlCache<Arc<Vec<SourceMapEntry>>>,
}

impl SourceMap {
    pub fn new(store: Arc<dyn TabularStore>, config: &SourceMapConfig) -> Self {
        Self {
            store,
            document: config.document.clone(),
            table: config.table.clone(),
            cross_cutting_project: config
                .cross_cutting_project
                .as_ref()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            cache: TtlCache::new(config.cache_ttl()),
        }
    }

    pub fn cross_cutting_project(&self) -> Option<&str> {
        self.cross_cutting_project.as_deref()
    }

    /// Read the table, bypassing the cache.
    pub async fn try_load(&self) -> Result<Vec<SourceMapEntry>> {
        let handle = self.store.open_document(&self.document).await?;
        let records = self
            .store
            .read_records(&handle, &TableRef::Name(self.table.clone()))
            .await?;
        Ok(parse_entries(&records))
    }

    /// All entries, served from cache while fresh.
    ///
    /// Storage failures yield an empty map (and are not cached), so routing
    /// degrades to "no match" instead of failing.
    pub async fn load(&self) -> Arc<Vec<SourceMapEntry>> {
        if let Some(entries) = self.cache.get() {
            return entries;
        }
        match self.try_load().await {
            Ok(entries) => {
                debug!(count = entries.len(), "source map loaded");
                let entries = Arc::new(entries);
                self.cache.put(entries.clone());
                entries
            }
            Err(e) => {
                warn!(error = %e, document = %self.document, "source map unavailable");
                Arc::new(Vec::new())
            }
        }
    }
}

/// Build entries from header-keyed records. Rows without a link are skipped.
pub fn parse_entries(records: &[Record]) -> Vec<SourceMapEntry> {
    records
        .iter()
        .filter_map(|rec| {
            let field = |name: &str| rec.get(name).map(|v| v.trim().to_string()).unwrap_or_default();
            let link = field(LINK_COLUMN);
            if link.is_empty() {
                debug!(?rec, "source map row has no link");
                return None;
            }
            let description = rec
                .iter()
                .filter(|(k, v)| {
                    !v.trim().is_empty()
                        && ![PROJECT_COLUMN, CATEGORY_COLUMN, LINK_COLUMN].contains(&k.as_str())
                })
                .map(|(k, v)| format!("{}: {}", k, v.trim()))
                .collect::<Vec<_>>()
                .join("; ");
            Some(SourceMapEntry {
                project_name: field(PROJECT_COLUMN),
                category: field(CATEGORY_COLUMN),
                document_reference: link,
                description,
            })
        })
        .collect()
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Every entry whose project name equals `project`, in map order.
pub fn entries_for_project<'a>(
    entries: &'a [SourceMapEntry],
    project: &str,
) -> Vec<&'a SourceMapEntry> {
    entries
        .iter()
        .filter(|e| same_name(&e.project_name, project))
        .collect()
}

/// Gather targets for a resolved project: all of its entries, then the
/// cross-cutting project's entries (unless the project is that resource).
pub fn project_targets(
    entries: &[SourceMapEntry],
    project: &str,
    cross_cutting: Option<&str>,
) -> Vec<GatherTarget> {
    let mut targets: Vec<GatherTarget> = entries_for_project(entries, project)
        .into_iter()
        .map(GatherTarget::from)
        .collect();
    if let Some(shared) = cross_cutting.filter(|s| !same_name(s, project)) {
        targets.extend(
            entries_for_project(entries, shared)
                .into_iter()
                .map(GatherTarget::from),
        );
    }
    targets
}
