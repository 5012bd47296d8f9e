//! Conversation history persisted in a table.
//!
//! Each message is one row. Two layouts are supported, chosen per store by
//! `[memory].schema`:
//!
//! | Schema | Columns |
//! |--------|---------|
//! | `sessioned` | `Session_ID, Role, Content, Timestamp` |
//! | `single` | `Role, Content, Timestamp` |
//!
//! History is ancillary to answering a question, so nothing here fails the
//! caller: reads degrade to empty results and writes log their failure and
//! hand it back for the caller to report.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{HistorySchema, MemoryConfig};
use crate::error::{HubError, Result};
use crate::models::{ConversationRecord, Message, Role, Row, SessionSummary};
use crate::store::{clear_and_reseed, ensure_header, DocumentHandle, TableRef, TabularStore};

pub const SESSION_COLUMN: &str = "Session_ID";
pub const ROLE_COLUMN: &str = "Role";
pub const CONTENT_COLUMN: &str = "Content";
pub const TIMESTAMP_COLUMN: &str = "Timestamp";

/// Session id reported for every record of a `single` schema store.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Sorts lexically in chronological order at second granularity.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Normalize a session id read from or written to the store.
///
/// Backends may hand back numeric-looking ids as numbers (`1234` or
/// `1234.0`). Both sides of every comparison go through this.
pub fn coerce_session_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(int_part) = trimmed.strip_suffix(".0") {
        if !int_part.is_empty() && int_part.chars().all(|c| c.is_ascii_digit()) {
            return int_part.to_string();
        }
    }
    trimmed.to_string()
}

pub fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Conversation records on top of a [`TabularStore`] table.
pub struct ConversationStore {
    store: Arc<dyn TabularStore>,
    document: String,
    table: TableRef,
    schema: HistorySchema,
}

impl ConversationStore {
    pub fn new(store: Arc<dyn TabularStore>, config: &MemoryConfig) -> Self {
        Self {
            store,
            document: config.document.clone(),
            table: config.table_ref(),
            schema: config.schema,
        }
    }

    pub fn schema(&self) -> HistorySchema {
        self.schema
    }

    /// Canonical header row for this store's schema.
    pub fn header(&self) -> Vec<String> {
        let cols: &[&str] = match self.schema {
            HistorySchema::Sessioned => {
                &[SESSION_COLUMN, ROLE_COLUMN, CONTENT_COLUMN, TIMESTAMP_COLUMN]
            }
            HistorySchema::Single => &[ROLE_COLUMN, CONTENT_COLUMN, TIMESTAMP_COLUMN],
        };
        cols.iter().map(|c| c.to_string()).collect()
    }

    async fn open(&self) -> Result<DocumentHandle> {
        self.store.open_document(&self.document).await
    }

    /// Every record in store order.
    pub async fn try_load_all(&self) -> Result<Vec<ConversationRecord>> {
        let handle = self.open().await?;
        let records = self.store.read_records(&handle, &self.table).await?;
        let mut out = Vec::with_capacity(records.len());
        for rec in records {
            let role = match rec.get(ROLE_COLUMN).and_then(|r| Role::parse(r)) {
                Some(r) => r,
                None => {
                    debug!(?rec, "skipping history row with unknown role");
                    continue;
                }
            };
            let session_id = match self.schema {
                HistorySchema::Sessioned => {
                    let raw = rec.get(SESSION_COLUMN).ok_or_else(|| {
                        HubError::Schema(format!("missing {} column", SESSION_COLUMN))
                    })?;
                    coerce_session_id(raw)
                }
                HistorySchema::Single => DEFAULT_SESSION_ID.to_string(),
            };
            out.push(ConversationRecord {
                session_id,
                role,
                content: rec.get(CONTENT_COLUMN).cloned().unwrap_or_default(),
                timestamp: rec.get(TIMESTAMP_COLUMN).cloned().unwrap_or_default(),
            });
        }
        Ok(out)
    }

    /// Every record, or an empty list when the table is missing, empty, or
    /// malformed.
    pub async fn load_all(&self) -> Vec<ConversationRecord> {
        match self.try_load_all().await {
            Ok(records) => records,
            Err(HubError::Schema(msg)) => {
                debug!(reason = %msg, "history table has no usable header yet");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, document = %self.document, "history unavailable, treating as empty");
                Vec::new()
            }
        }
    }

    /// Messages for one session in conversation order.
    pub async fn load_session(&self, session_id: &str) -> Vec<Message> {
        let wanted = coerce_session_id(session_id);
        self.load_all()
            .await
            .into_iter()
            .filter(|r| self.schema == HistorySchema::Single || r.session_id == wanted)
            .map(|r| r.to_message())
            .collect()
    }

    /// Append one message with a fresh timestamp.
    ///
    /// Writes the header row first when the table is empty. Failures are
    /// logged and returned; callers must not abort the turn on them.
    pub async fn append(&self, session_id: &str, role: Role, content: &str) -> Result<()> {
        let res = self.try_append(session_id, role, content).await;
        if let Err(e) = &res {
            warn!(error = %e, session = session_id, role = %role, "failed to persist message");
        }
        res
    }

    async fn try_append(&self, session_id: &str, role: Role, content: &str) -> Result<()> {
        let handle = self.open().await?;
        ensure_header(self.store.as_ref(), &handle, &self.table, &self.header()).await?;
        let timestamp = now_timestamp();
        let row = match self.schema {
            HistorySchema::Sessioned => vec![
                coerce_session_id(session_id),
                role.as_str().to_string(),
                content.to_string(),
                timestamp,
            ],
            HistorySchema::Single => {
                vec![role.as_str().to_string(), content.to_string(), timestamp]
            }
        };
        self.store.append_row(&handle, &self.table, &row).await
    }

    /// Distinct sessions, most recent first, capped at `limit` when given.
    pub async fn list_sessions(&self, limit: Option<usize>) -> Vec<SessionSummary> {
        summarize_sessions(&self.load_all().await, limit)
    }

    /// Erase all history and re-seed the header row.
    pub async fn wipe_all(&self) -> Result<()> {
        let res = async {
            let handle = self.open().await?;
            clear_and_reseed(self.store.as_ref(), &handle, &self.table, &self.header()).await
        }
        .await;
        if let Err(e) = &res {
            warn!(error = %e, "failed to wipe history");
        }
        res
    }

    /// Remove one session's rows, keeping every other session intact.
    ///
    /// The surviving rows go back in a single overwrite, so a failed write
    /// leaves the table as it was. With the `single` schema this is the same
    /// as [`wipe_all`](Self::wipe_all). Returns the number of rows removed.
    pub async fn delete_session(&self, session_id: &str) -> Result<usize> {
        if self.schema == HistorySchema::Single {
            let removed = self.load_all().await.len();
            self.wipe_all().await?;
            return Ok(removed);
        }
        let res = self.try_delete_session(session_id).await;
        if let Err(e) = &res {
            warn!(error = %e, session = session_id, "failed to delete session");
        }
        res
    }

    async fn try_delete_session(&self, session_id: &str) -> Result<usize> {
        let wanted = coerce_session_id(session_id);
        let handle = self.open().await?;
        let rows = self.store.read_all_rows(&handle, &self.table, None).await?;
        let data = rows.get(1..).unwrap_or_default();
        let mut kept: Vec<Row> = Vec::with_capacity(rows.len());
        kept.push(self.header());
        kept.extend(
            data.iter()
                .filter(|row| {
                    row.first()
                        .map(|id| coerce_session_id(id) != wanted)
                        .unwrap_or(true)
                })
                .cloned(),
        );
        let removed = data.len() + 1 - kept.len();
        if removed == 0 {
            return Ok(0);
        }
        self.store
            .overwrite_rows(&handle, &self.table, &kept, rows.len())
            .await?;
        Ok(removed)
    }
}

/// Deduplicate records by session, keeping each session's latest timestamp,
/// sorted newest first.
pub fn summarize_sessions(
    records: &[ConversationRecord],
    limit: Option<usize>,
) -> Vec<SessionSummary> {
    let mut latest: HashMap<&str, &str> = HashMap::new();
    for rec in records.iter().filter(|r| !r.session_id.is_empty()) {
        let entry = latest.entry(rec.session_id.as_str()).or_insert("");
        if rec.timestamp.as_str() > *entry {
            *entry = rec.timestamp.as_str();
        }
    }
    let mut sessions: Vec<SessionSummary> = latest
        .into_iter()
        .map(|(id, ts)| SessionSummary {
            session_id: id.to_string(),
            last_timestamp: ts.to_string(),
        })
        .collect();
    sessions.sort_by(|a, b| {
        b.last_timestamp
            .cmp(&a.last_timestamp)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    if let Some(n) = limit {
        sessions.truncate(n);
    }
    sessions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryTabularStore;

    fn sessioned(store: Arc<InMemoryTabularStore>) -> ConversationStore {
        let cfg = MemoryConfig {
            document: "memory".into(),
            table: None,
            schema: HistorySchema::Sessioned,
        };
        ConversationStore::new(store, &cfg)
    }

    fn rec(id: &str, ts: &str) -> ConversationRecord {
        ConversationRecord {
            session_id: id.into(),
            role: Role::User,
            content: "x".into(),
            timestamp: ts.into(),
        }
    }

    #[test]
    fn coercion_strips_float_suffix() {
        assert_eq!(coerce_session_id(" 12345.0 "), "12345");
        assert_eq!(coerce_session_id("12345"), "12345");
        assert_eq!(coerce_session_id("v1.0"), "v1.0");
        assert_eq!(coerce_session_id("abc-def"), "abc-def");
    }

    #[test]
    fn summaries_sort_newest_first() {
        let records = vec![
            rec("a", "2024-01-01 10:00:00"),
            rec("b", "2024-01-02 09:00:00"),
            rec("a", "2024-01-03 08:00:00"),
            rec("", "2024-01-04 08:00:00"),
            rec("c", "2023-12-31 23:59:59"),
        ];
        let sessions = summarize_sessions(&records, None);
        let ids: Vec<_> = sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(sessions[0].last_timestamp, "2024-01-03 08:00:00");
        assert_eq!(summarize_sessions(&records, Some(2)).len(), 2);
    }

    #[tokio::test]
    async fn missing_document_reads_as_empty() {
        let store = Arc::new(InMemoryTabularStore::new());
        let conv = sessioned(store);
        assert!(conv.load_all().await.is_empty());
        assert!(conv.list_sessions(Some(10)).await.is_empty());
    }

    #[tokio::test]
    async fn append_bootstraps_header_once() {
        let store = Arc::new(InMemoryTabularStore::new());
        store.add_table("memory", "Sheet1", Vec::new());
        let conv = sessioned(store.clone());
        conv.append("s1", Role::User, "hello").await.unwrap();
        conv.append("s1", Role::Assistant, "hi").await.unwrap();
        let rows = store.rows("memory", "Sheet1").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], conv.header());
        assert_eq!(rows[1][0], "s1");
        assert_eq!(rows[2][1], "assistant");
    }

    #[tokio::test]
    async fn numeric_ids_survive_mixed_types() {
        let store = Arc::new(InMemoryTabularStore::new());
        store.add_table(
            "memory",
            "Sheet1",
            vec![
                vec![
                    "Session_ID".into(),
                    "Role".into(),
                    "Content".into(),
                    "Timestamp".into(),
                ],
                vec![
                    "42.0".into(),
                    "user".into(),
                    "stored as number".into(),
                    "2024-01-01 00:00:00".into(),
                ],
            ],
        );
        let conv = sessioned(store);
        let msgs = conv.load_session("42").await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "stored as number");
    }

    #[tokio::test]
    async fn delete_session_keeps_others() {
        let store = Arc::new(InMemoryTabularStore::new());
        store.add_table("memory", "Sheet1", Vec::new());
        let conv = sessioned(store.clone());
        conv.append("a", Role::User, "one").await.unwrap();
        conv.append("b", Role::User, "two").await.unwrap();
        conv.append("a", Role::Assistant, "three").await.unwrap();
        assert_eq!(conv.delete_session("a").await.unwrap(), 2);
        assert!(conv.load_session("a").await.is_empty());
        assert_eq!(conv.load_session("b").await.len(), 1);
        assert_eq!(store.rows("memory", "Sheet1").unwrap()[0], conv.header());
    }

    #[tokio::test]
    async fn delete_session_is_one_write() {
        let store = Arc::new(InMemoryTabularStore::new());
        store.add_table("memory", "Sheet1", Vec::new());
        let conv = sessioned(store.clone());
        conv.append("keep", Role::User, "q").await.unwrap();
        conv.append("drop", Role::User, "q").await.unwrap();
        conv.append("keep", Role::Assistant, "a").await.unwrap();
        let (appends, clears) = (store.append_count(), store.clear_count());

        assert_eq!(conv.delete_session("drop").await.unwrap(), 1);
        assert_eq!(store.append_count(), appends);
        assert_eq!(store.clear_count(), clears);
        assert_eq!(conv.load_session("keep").await.len(), 2);
        assert_eq!(store.rows("memory", "Sheet1").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_delete_loses_no_history() {
        let store = Arc::new(InMemoryTabularStore::new());
        store.add_table("memory", "Sheet1", Vec::new());
        let conv = sessioned(store.clone());
        conv.append("keep", Role::User, "q").await.unwrap();
        conv.append("keep", Role::Assistant, "a").await.unwrap();
        conv.append("drop", Role::User, "q").await.unwrap();
        let before = store.rows("memory", "Sheet1").unwrap();

        store.fail_writes("memory", HubError::StoreUnavailable("quota".into()));
        assert!(matches!(
            conv.delete_session("drop").await,
            Err(HubError::StoreUnavailable(_))
        ));
        assert_eq!(store.rows("memory", "Sheet1").unwrap(), before);
        assert_eq!(conv.load_session("keep").await.len(), 2);
        assert_eq!(conv.load_session("drop").await.len(), 1);
    }

    #[tokio::test]
    async fn single_schema_ignores_session_ids() {
        let store = Arc::new(InMemoryTabularStore::new());
        store.add_table("memory", "Sheet1", Vec::new());
        let cfg = MemoryConfig {
            document: "memory".into(),
            table: None,
            schema: HistorySchema::Single,
        };
        let conv = ConversationStore::new(store.clone(), &cfg);
        conv.append("anything", Role::User, "hello").await.unwrap();
        assert_eq!(store.rows("memory", "Sheet1").unwrap()[0].len(), 3);
        assert_eq!(conv.load_session("other").await.len(), 1);
        let sessions = conv.list_sessions(None).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, DEFAULT_SESSION_ID);
    }
}
