//! In-memory [`TabularStore`] implementation for tests and offline demos.
//!
//! Documents live in a `HashMap` behind `std::sync::RwLock`. Individual
//! documents can be made to fail on open or on write, and open/append/clear
//! calls are counted so tests can assert which round-trips a turn made.
//!
//! `overwrite_rows` drops the blanked rows instead of keeping empty ones;
//! readers skip blank rows either way.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{HubError, Result};
use crate::models::Row;

use super::{DocumentHandle, TableRef, TabularStore};

struct StoredTable {
    name: String,
    rows: Vec<Row>,
}

struct StoredDocument {
    title: String,
    tables: Vec<StoredTable>,
}

/// Seed file shape for `backend = "memory"`.
#[derive(Debug, Deserialize)]
pub struct SeedFile {
    pub documents: Vec<SeedDocument>,
}

#[derive(Debug, Deserialize)]
pub struct SeedDocument {
    pub reference: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tables: Vec<SeedTable>,
}

#[derive(Debug, Deserialize)]
pub struct SeedTable {
    pub name: String,
    #[serde(default)]
    pub rows: Vec<Row>,
}

/// In-memory spreadsheet backend.
pub struct InMemoryTabularStore {
    docs: RwLock<HashMap<String, StoredDocument>>,
    failures: RwLock<HashMap<String, HubError>>,
    write_failures: RwLock<HashMap<String, HubError>>,
    opens: AtomicUsize,
    appends: AtomicUsize,
    clears: AtomicUsize,
}

impl InMemoryTabularStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            write_failures: RwLock::new(HashMap::new()),
            opens: AtomicUsize::new(0),
            appends: AtomicUsize::new(0),
            clears: AtomicUsize::new(0),
        }
    }

    /// Load documents from a JSON seed file.
    pub fn from_seed_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
        let seed: SeedFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse seed file: {}", path.display()))?;
        let store = Self::new();
        for doc in seed.documents {
            let title = doc.title.unwrap_or_else(|| doc.reference.clone());
            store.add_document(&doc.reference, &title);
            for table in doc.tables {
                store.add_table(&doc.reference, &table.name, table.rows);
            }
        }
        Ok(store)
    }

    /// Create (or reset) an empty document.
    pub fn add_document(&self, reference: &str, title: &str) {
        self.docs.write().unwrap().insert(
            reference.to_string(),
            StoredDocument {
                title: title.to_string(),
                tables: Vec::new(),
            },
        );
    }

    /// Add a table to a document, creating the document if needed.
    pub fn add_table(&self, reference: &str, name: &str, rows: Vec<Row>) {
        let mut docs = self.docs.write().unwrap();
        let doc = docs
            .entry(reference.to_string())
            .or_insert_with(|| StoredDocument {
                title: reference.to_string(),
                tables: Vec::new(),
            });
        doc.tables.push(StoredTable {
            name: name.to_string(),
            rows,
        });
    }

    /// Make every future open of `reference` fail with `err`.
    pub fn fail_document(&self, reference: &str, err: HubError) {
        self.failures
            .write()
            .unwrap()
            .insert(reference.to_string(), err);
    }

    /// Make every future write to `reference` fail with `err`. Opens and
    /// reads still succeed.
    pub fn fail_writes(&self, reference: &str, err: HubError) {
        self.write_failures
            .write()
            .unwrap()
            .insert(reference.to_string(), err);
    }

    fn check_writable(&self, handle: &DocumentHandle) -> Result<()> {
        match self.write_failures.read().unwrap().get(&handle.reference) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Snapshot of a table's rows.
    pub fn rows(&self, reference: &str, table: &str) -> Option<Vec<Row>> {
        let docs = self.docs.read().unwrap();
        docs.get(reference)?
            .tables
            .iter()
            .find(|t| t.name == table)
            .map(|t| t.rows.clone())
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn append_count(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    fn with_table<T>(
        &self,
        handle: &DocumentHandle,
        table: &TableRef,
        f: impl FnOnce(&mut StoredTable) -> T,
    ) -> Result<T> {
        let mut docs = self.docs.write().unwrap();
        let doc = docs
            .get_mut(&handle.reference)
            .ok_or_else(|| HubError::NotFound(handle.reference.clone()))?;
        let names: Vec<String> = doc.tables.iter().map(|t| t.name.clone()).collect();
        let name = table.resolve(&names)?;
        let stored = doc
            .tables
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| HubError::NotFound(format!("table '{}'", name)))?;
        Ok(f(stored))
    }
}

impl Default for InMemoryTabularStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TabularStore for InMemoryTabularStore {
    async fn open_document(&self, reference: &str) -> Result<DocumentHandle> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.read().unwrap().get(reference) {
            return Err(err.clone());
        }
        let docs = self.docs.read().unwrap();
        let doc = docs
            .get(reference)
            .ok_or_else(|| HubError::NotFound(reference.to_string()))?;
        Ok(DocumentHandle {
            reference: reference.to_string(),
            id: reference.to_string(),
            title: doc.title.clone(),
            tables: doc.tables.iter().map(|t| t.name.clone()).collect(),
        })
    }

    async fn list_tables(&self, handle: &DocumentHandle) -> Result<Vec<String>> {
        let docs = self.docs.read().unwrap();
        let doc = docs
            .get(&handle.reference)
            .ok_or_else(|| HubError::NotFound(handle.reference.clone()))?;
        Ok(doc.tables.iter().map(|t| t.name.clone()).collect())
    }

    async fn read_all_rows(
        &self,
        handle: &DocumentHandle,
        table: &TableRef,
        max_rows: Option<usize>,
    ) -> Result<Vec<Row>> {
        self.with_table(handle, table, |t| {
            let cap = max_rows.unwrap_or(t.rows.len());
            t.rows.iter().take(cap).cloned().collect()
        })
    }

    async fn append_row(
        &self,
        handle: &DocumentHandle,
        table: &TableRef,
        row: &[String],
    ) -> Result<()> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        self.check_writable(handle)?;
        self.with_table(handle, table, |t| t.rows.push(row.to_vec()))
    }

    async fn overwrite_rows(
        &self,
        handle: &DocumentHandle,
        table: &TableRef,
        rows: &[Row],
        blank_through: usize,
    ) -> Result<()> {
        self.check_writable(handle)?;
        self.with_table(handle, table, |t| {
            let keep_from = blank_through.max(rows.len()).min(t.rows.len());
            let tail = t.rows.split_off(keep_from);
            t.rows = rows.to_vec();
            t.rows.extend(tail);
        })
    }

    async fn clear_table(&self, handle: &DocumentHandle, table: &TableRef) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.check_writable(handle)?;
        self.with_table(handle, table, |t| t.rows.clear())
    }
}
