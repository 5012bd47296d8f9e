//! Google Sheets backend for [`TabularStore`].
//!
//! Talks to the Sheets API v4 over HTTPS with a bearer token read from the
//! environment (`[store].token_env`, default `GOOGLE_SHEETS_TOKEN`). Minting
//! that token from a service account is left to the deployment.
//!
//! # Endpoints used
//!
//! | Operation | Request |
//! |-----------|---------|
//! | open / list tables | `GET /v4/spreadsheets/{id}?fields=...` |
//! | read rows | `GET /v4/spreadsheets/{id}/values/{range}` |
//! | append row | `POST .../values/{range}:append?valueInputOption=RAW` |
//! | overwrite rows | `PUT .../values/{range}?valueInputOption=RAW` |
//! | clear table | `POST .../values/{range}:clear` |
//!
//! # Status mapping
//!
//! - 404 → [`HubError::NotFound`]
//! - 401 / 403 → [`HubError::PermissionDenied`]
//! - client timeout → [`HubError::Timeout`]
//! - anything else → [`HubError::StoreUnavailable`]

use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::config::StoreConfig;
use crate::error::{HubError, Result};
use crate::models::Row;

use super::{DocumentHandle, TableRef, TabularStore};

/// Sheets API client.
pub struct SheetsStore {
    client: reqwest::Client,
    api_base: Url,
    token: String,
    timeout_secs: u64,
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    properties: Option<SpreadsheetProperties>,
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SpreadsheetProperties {
    #[serde(default)]
    title: String,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl SheetsStore {
    /// Build a client from `[store]` configuration.
    ///
    /// # Errors
    ///
    /// Fails if the token environment variable is unset or `api_base` is
    /// not a valid URL.
    pub fn new(config: &StoreConfig) -> anyhow::Result<Self> {
        let token = match std::env::var(&config.token_env) {
            Ok(t) if !t.trim().is_empty() => t,
            _ => bail!("{} environment variable not set", config.token_env),
        };
        let api_base = Url::parse(&config.api_base)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base,
            token,
            timeout_secs: config.timeout_secs,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| HubError::StoreUnavailable("api_base cannot be a base URL".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let resp = req
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| self.transport_error(e, what))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status, what, &body))
    }

    fn transport_error(&self, e: reqwest::Error, what: &str) -> HubError {
        if e.is_timeout() {
            HubError::Timeout {
                operation: what.to_string(),
                secs: self.timeout_secs,
            }
        } else {
            HubError::StoreUnavailable(format!("{}: {}", what, e))
        }
    }

    fn table_name(&self, handle: &DocumentHandle, table: &TableRef) -> Result<String> {
        table.resolve(&handle.tables)
    }
}

#[async_trait]
impl TabularStore for SheetsStore {
    async fn open_document(&self, reference: &str) -> Result<DocumentHandle> {
        let id = spreadsheet_id(reference);
        if id.is_empty() {
            return Err(HubError::NotFound(format!("empty reference '{}'", reference)));
        }
        let mut url = self.url(&["v4", "spreadsheets", &id])?;
        url.query_pairs_mut()
            .append_pair("fields", "properties.title,sheets.properties.title");
        let what = format!("open {}", id);
        let resp = self.send(self.client.get(url), &what).await?;
        let meta: SpreadsheetMeta = resp
            .json()
            .await
            .map_err(|e| HubError::StoreUnavailable(format!("{}: bad metadata: {}", what, e)))?;
        Ok(DocumentHandle {
            reference: reference.to_string(),
            id,
            title: meta.properties.map(|p| p.title).unwrap_or_default(),
            tables: meta.sheets.into_iter().map(|s| s.properties.title).collect(),
        })
    }

    async fn list_tables(&self, handle: &DocumentHandle) -> Result<Vec<String>> {
        Ok(handle.tables.clone())
    }

    async fn read_all_rows(
        &self,
        handle: &DocumentHandle,
        table: &TableRef,
        max_rows: Option<usize>,
    ) -> Result<Vec<Row>> {
        let name = self.table_name(handle, table)?;
        let range = match max_rows {
            Some(0) => return Ok(Vec::new()),
            Some(n) => format!("{}!1:{}", quote_sheet(&name), n),
            None => quote_sheet(&name),
        };
        let url = self.url(&["v4", "spreadsheets", &handle.id, "values", &range])?;
        let what = format!("read {} / {}", handle.id, name);
        let resp = self.send(self.client.get(url), &what).await?;
        let body: ValueRange = resp
            .json()
            .await
            .map_err(|e| HubError::StoreUnavailable(format!("{}: bad values: {}", what, e)))?;
        let mut rows: Vec<Row> = body
            .values
            .iter()
            .map(|r| r.iter().map(cell_text).collect())
            .collect();
        if let Some(n) = max_rows {
            rows.truncate(n);
        }
        Ok(rows)
    }

    async fn append_row(
        &self,
        handle: &DocumentHandle,
        table: &TableRef,
        row: &[String],
    ) -> Result<()> {
        let name = self.table_name(handle, table)?;
        let segment = format!("{}:append", quote_sheet(&name));
        let mut url = self.url(&["v4", "spreadsheets", &handle.id, "values", &segment])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let body = serde_json::json!({ "values": [row] });
        let what = format!("append {} / {}", handle.id, name);
        self.send(self.client.post(url).json(&body), &what).await?;
        Ok(())
    }

    async fn overwrite_rows(
        &self,
        handle: &DocumentHandle,
        table: &TableRef,
        rows: &[Row],
        blank_through: usize,
    ) -> Result<()> {
        let name = self.table_name(handle, table)?;
        let range = quote_sheet(&name);
        let mut url = self.url(&["v4", "spreadsheets", &handle.id, "values", &range])?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = serde_json::json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": padded_grid(rows, blank_through),
        });
        let what = format!("overwrite {} / {}", handle.id, name);
        self.send(self.client.put(url).json(&body), &what).await?;
        Ok(())
    }

    async fn clear_table(&self, handle: &DocumentHandle, table: &TableRef) -> Result<()> {
        let name = self.table_name(handle, table)?;
        let segment = format!("{}:clear", quote_sheet(&name));
        let url = self.url(&["v4", "spreadsheets", &handle.id, "values", &segment])?;
        let what = format!("clear {} / {}", handle.id, name);
        self.send(self.client.post(url).json(&serde_json::json!({})), &what)
            .await?;
        Ok(())
    }
}

fn status_error(status: StatusCode, what: &str, body: &str) -> HubError {
    let detail = format!("{} ({}): {}", what, status, truncate(body, 200));
    match status {
        StatusCode::NOT_FOUND => HubError::NotFound(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => HubError::PermissionDenied(detail),
        _ => HubError::StoreUnavailable(detail),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Extract the spreadsheet id from a sheet URL, or return the trimmed
/// reference unchanged when it is already a bare id.
pub fn spreadsheet_id(reference: &str) -> String {
    let reference = reference.trim();
    match reference.split_once("/spreadsheets/d/") {
        Some((_, rest)) => rest
            .split(|c| c == '/' || c == '?' || c == '#')
            .next()
            .unwrap_or_default()
            .to_string(),
        None => reference.to_string(),
    }
}

/// `rows` padded to a rectangle at least `height` rows tall.
///
/// The API leaves cells outside the written values untouched, so every
/// stale cell must be covered by an explicit empty string.
fn padded_grid(rows: &[Row], height: usize) -> Vec<Row> {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);
    (0..rows.len().max(height))
        .map(|i| {
            let mut row = rows.get(i).cloned().unwrap_or_default();
            row.resize(width, String::new());
            row
        })
        .collect()
}

/// A1-notation sheet name: single-quoted with embedded quotes doubled.
fn quote_sheet(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

/// Render a Sheets cell value as text.
///
/// Whole-number floats lose their `.0` so ids read back as numbers compare
/// equal to the strings that were written.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_id_from_urls() {
        assert_eq!(
            spreadsheet_id("https://docs.google.com/spreadsheets/d/1abcDEF_x/edit#gid=0"),
            "1abcDEF_x"
        );
        assert_eq!(
            spreadsheet_id("https://docs.google.com/spreadsheets/d/1abc?usp=sharing"),
            "1abc"
        );
        assert_eq!(spreadsheet_id("  1abc  "), "1abc");
    }

    #[test]
    fn quotes_sheet_names() {
        assert_eq!(quote_sheet("Sheet1"), "'Sheet1'");
        assert_eq!(quote_sheet("Bob's Tab"), "'Bob''s Tab'");
    }

    #[test]
    fn overwrite_grid_blanks_stale_rows() {
        let rows = vec![
            vec!["Session_ID".to_string(), "Role".to_string()],
            vec!["b".to_string()],
        ];
        let grid = padded_grid(&rows, 4);
        assert_eq!(grid.len(), 4);
        assert_eq!(grid[1], vec!["b".to_string(), String::new()]);
        assert_eq!(grid[3], vec![String::new(), String::new()]);
        assert_eq!(padded_grid(&rows, 0).len(), 2);
    }

    #[test]
    fn cell_coercion() {
        assert_eq!(cell_text(&json!("abc")), "abc");
        assert_eq!(cell_text(&json!(42)), "42");
        assert_eq!(cell_text(&json!(42.0)), "42");
        assert_eq!(cell_text(&json!(1.5)), "1.5");
        assert_eq!(cell_text(&json!(true)), "TRUE");
        assert_eq!(cell_text(&Value::Null), "");
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "open x", ""),
            HubError::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "open x", ""),
            HubError::PermissionDenied(_)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "open x", ""),
            HubError::StoreUnavailable(_)
        ));
    }

    #[test]
    fn url_building_encodes_ranges() {
        std::env::set_var("HUB_TEST_SHEETS_TOKEN", "t");
        let cfg = StoreConfig {
            token_env: "HUB_TEST_SHEETS_TOKEN".to_string(),
            ..StoreConfig::default()
        };
        let store = SheetsStore::new(&cfg).unwrap();
        let url = store
            .url(&["v4", "spreadsheets", "abc", "values", "'My Tab'!1:5"])
            .unwrap();
        assert!(url.as_str().starts_with("https://sheets.googleapis.com/v4/spreadsheets/abc/values/"));
        assert!(url.as_str().contains("My%20Tab"));
    }
}
