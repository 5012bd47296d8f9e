//! Tabular storage abstraction.
//!
//! The [`TabularStore`] trait is the only way the rest of the crate touches
//! spreadsheet data: open a document by reference, list its tables, read
//! rows (optionally capped), read header-keyed records, append a row,
//! overwrite a table's leading rows in one write, and clear a table.
//!
//! # Implementations
//!
//! | Type | Backend |
//! |------|---------|
//! | [`sheets::SheetsStore`] | Google Sheets API v4 over HTTPS |
//! | [`memory::InMemoryTabularStore`] | Process memory (tests, offline demos) |
//! | [`timed::TimedStore`] | Decorator adding a per-call deadline |
//!
//! Implementations must be `Send + Sync` so one store can be shared by every
//! session a server handles.

pub mod memory;
pub mod sheets;
pub mod timed;

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use async_trait::async_trait;

use crate::error::{HubError, Result};
use crate::models::Row;

/// A header-keyed row, as produced by [`TabularStore::read_records`].
pub type Record = BTreeMap<String, String>;

/// An opened document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHandle {
    /// The reference the caller opened (URL or id).
    pub reference: String,
    /// Backend document id.
    pub id: String,
    pub title: String,
    /// Table names in document order, as of open time.
    pub tables: Vec<String>,
}

/// Addresses a table by ordinal position or name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRef {
    Index(usize),
    Name(String),
}

impl TableRef {
    pub fn name(name: impl Into<String>) -> Self {
        TableRef::Name(name.into())
    }

    /// Resolve to a concrete table name within `tables`.
    pub fn resolve(&self, tables: &[String]) -> Result<String> {
        match self {
            TableRef::Index(i) => tables
                .get(*i)
                .cloned()
                .ok_or_else(|| HubError::NotFound(format!("table #{}", i))),
            TableRef::Name(n) => tables
                .iter()
                .find(|t| *t == n)
                .cloned()
                .ok_or_else(|| HubError::NotFound(format!("table '{}'", n))),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableRef::Index(i) => write!(f, "#{}", i),
            TableRef::Name(n) => f.write_str(n),
        }
    }
}

/// Abstract spreadsheet backend.
///
/// Every method is a network round-trip for real backends. None of them
/// retries; callers decide how to degrade.
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Open a document. Fails with [`HubError::NotFound`] or
    /// [`HubError::PermissionDenied`] for bad or inaccessible references.
    async fn open_document(&self, reference: &str) -> Result<DocumentHandle>;

    /// Table names in document order.
    async fn list_tables(&self, handle: &DocumentHandle) -> Result<Vec<String>>;

    /// All rows of a table, silently truncated to `max_rows` when given.
    async fn read_all_rows(
        &self,
        handle: &DocumentHandle,
        table: &TableRef,
        max_rows: Option<usize>,
    ) -> Result<Vec<Row>>;

    /// Rows keyed by the first row's headers.
    ///
    /// Fails with [`HubError::Schema`] when the header row is absent, blank,
    /// or has duplicate names.
    async fn read_records(&self, handle: &DocumentHandle, table: &TableRef) -> Result<Vec<Record>> {
        let rows = self.read_all_rows(handle, table, None).await?;
        records_from_rows(&rows)
    }

    async fn append_row(&self, handle: &DocumentHandle, table: &TableRef, row: &[String])
        -> Result<()>;

    /// Replace the table's leading rows with `rows` in a single write.
    ///
    /// Existing rows up to `blank_through` that `rows` does not cover are
    /// blanked. Rows past `blank_through` are left alone, so a row appended
    /// after the caller last read the table survives.
    async fn overwrite_rows(
        &self,
        handle: &DocumentHandle,
        table: &TableRef,
        rows: &[Row],
        blank_through: usize,
    ) -> Result<()>;

    /// Remove every row, header included.
    async fn clear_table(&self, handle: &DocumentHandle, table: &TableRef) -> Result<()>;
}

/// Convert raw rows to records using the first row as headers.
pub fn records_from_rows(rows: &[Row]) -> Result<Vec<Record>> {
    let header = rows
        .first()
        .ok_or_else(|| HubError::Schema("table has no header row".to_string()))?;
    let header: Vec<String> = header.iter().map(|h| h.trim().to_string()).collect();
    if header.iter().all(|h| h.is_empty()) {
        return Err(HubError::Schema("header row is blank".to_string()));
    }
    let mut seen = HashSet::new();
    for h in header.iter().filter(|h| !h.is_empty()) {
        if !seen.insert(h.as_str()) {
            return Err(HubError::Schema(format!("duplicate header '{}'", h)));
        }
    }

    let records = rows[1..]
        .iter()
        .filter(|row| row.iter().any(|c| !c.trim().is_empty()))
        .map(|row| {
            header
                .iter()
                .enumerate()
                .filter(|(_, h)| !h.is_empty())
                .map(|(i, h)| (h.clone(), row.get(i).cloned().unwrap_or_default()))
                .collect::<Record>()
        })
        .collect();
    Ok(records)
}

/// Append `header` if the table's first cell is empty.
///
/// Safe to call before every append. Returns whether the header was written.
pub async fn ensure_header(
    store: &dyn TabularStore,
    handle: &DocumentHandle,
    table: &TableRef,
    header: &[String],
) -> Result<bool> {
    let first = store.read_all_rows(handle, table, Some(1)).await?;
    let has_header = first
        .first()
        .and_then(|row| row.first())
        .map(|cell| !cell.trim().is_empty())
        .unwrap_or(false);
    if has_header {
        return Ok(false);
    }
    store.append_row(handle, table, header).await?;
    Ok(true)
}

/// Clear a table and immediately re-insert its header row.
pub async fn clear_and_reseed(
    store: &dyn TabularStore,
    handle: &DocumentHandle,
    table: &TableRef,
    header: &[String],
) -> Result<()> {
    store.clear_table(handle, table).await?;
    store.append_row(handle, table, header).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Row {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn records_use_first_row_as_header() {
        let rows = vec![
            row(&["Project Name", "Category", "Raw Link"]),
            row(&["Tudor House", "Pricing", "ref-1"]),
            row(&["", "", ""]),
            row(&["Inventory"]),
        ];
        let records = records_from_rows(&rows).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["Category"], "Pricing");
        assert_eq!(records[1]["Project Name"], "Inventory");
        assert_eq!(records[1]["Raw Link"], "");
    }

    #[test]
    fn records_reject_missing_or_bad_headers() {
        assert!(matches!(records_from_rows(&[]), Err(HubError::Schema(_))));
        assert!(matches!(
            records_from_rows(&[row(&["", " "])]),
            Err(HubError::Schema(_))
        ));
        assert!(matches!(
            records_from_rows(&[row(&["Role", "Role"])]),
            Err(HubError::Schema(_))
        ));
    }

    #[test]
    fn table_ref_resolution() {
        let tables = vec!["Sheet1".to_string(), "Admin".to_string()];
        assert_eq!(TableRef::Index(1).resolve(&tables).unwrap(), "Admin");
        assert_eq!(TableRef::name("Sheet1").resolve(&tables).unwrap(), "Sheet1");
        assert!(matches!(
            TableRef::Index(5).resolve(&tables),
            Err(HubError::NotFound(_))
        ));
    }
}
