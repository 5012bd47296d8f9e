//! Per-call deadline decorator for any [`TabularStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{with_deadline, Result};
use crate::models::Row;

use super::{DocumentHandle, Record, TableRef, TabularStore};

/// Wraps a store so that no call can hang past `limit`.
pub struct TimedStore {
    inner: Arc<dyn TabularStore>,
    limit: Duration,
}

impl TimedStore {
    pub fn new(inner: Arc<dyn TabularStore>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl TabularStore for TimedStore {
    async fn open_document(&self, reference: &str) -> Result<DocumentHandle> {
        with_deadline("open document", self.limit, self.inner.open_document(reference)).await
    }

    async fn list_tables(&self, handle: &DocumentHandle) -> Result<Vec<String>> {
        with_deadline("list tables", self.limit, self.inner.list_tables(handle)).await
    }

    async fn read_all_rows(
        &self,
        handle: &DocumentHandle,
        table: &TableRef,
        max_rows: Option<usize>,
    ) -> Result<Vec<Row>> {
        with_deadline(
            "read rows",
            self.limit,
            self.inner.read_all_rows(handle, table, max_rows),
        )
        .await
    }

    async fn read_records(&self, handle: &DocumentHandle, table: &TableRef) -> Result<Vec<Record>> {
        with_deadline("read records", self.limit, self.inner.read_records(handle, table)).await
    }

    async fn append_row(
        &self,
        handle: &DocumentHandle,
        table: &TableRef,
        row: &[String],
    ) -> Result<()> {
        with_deadline("append row", self.limit, self.inner.append_row(handle, table, row)).await
    }

    async fn overwrite_rows(
        &self,
        handle: &DocumentHandle,
        table: &TableRef,
        rows: &[Row],
        blank_through: usize,
    ) -> Result<()> {
        with_deadline(
            "overwrite rows",
            self.limit,
            self.inner.overwrite_rows(handle, table, rows, blank_through),
        )
        .await
    }

    async fn clear_table(&self, handle: &DocumentHandle, table: &TableRef) -> Result<()> {
        with_deadline("clear table", self.limit, self.inner.clear_table(handle, table)).await
    }
}
