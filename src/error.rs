//! Error taxonomy for a single conversation turn.
//!
//! Every failure inside the routing / context pipeline is one of these
//! variants. Nothing escapes a turn: [`crate::pipeline`] converts each error
//! into a plain-text assistant reply via [`HubError::user_message`].
//!
//! "No matching source" is deliberately absent here. It is a valid routing
//! outcome ([`crate::models::RouteTarget::NoMatch`]), not a failure.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HubError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// Document open / read / write failed for a transport or backend reason.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The document reference or table does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The document exists but the credentials cannot access it.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Header row missing, blank, or duplicated when reading records.
    #[error("schema error: {0}")]
    Schema(String),

    /// Routing completion was not valid structured data.
    #[error("could not parse routing decision: {0}")]
    RoutingParse(String),

    /// The completion backend failed (network, quota, bad response).
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// An external call exceeded its deadline.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },
}

impl HubError {
    /// Whether asking the same question again might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HubError::StoreUnavailable(_) | HubError::ModelUnavailable(_) | HubError::Timeout { .. }
        )
    }

    /// The assistant-style reply shown to the user when a turn fails.
    pub fn user_message(&self) -> String {
        match self {
            HubError::RoutingParse(_) => {
                "I couldn't work out which sheet answers that. Please try rephrasing the question."
                    .to_string()
            }
            HubError::ModelUnavailable(msg) => format!(
                "The language model is unavailable right now ({}). Please try again.",
                msg
            ),
            HubError::Timeout { operation, secs } => format!(
                "The request timed out ({} took longer than {}s). Please try again.",
                operation, secs
            ),
            HubError::NotFound(msg) | HubError::PermissionDenied(msg) => format!(
                "I couldn't open a sheet: {}. Check the link and sharing permissions.",
                msg
            ),
            HubError::StoreUnavailable(msg) | HubError::Schema(msg) => {
                format!("System error while reading the sheets: {}", msg)
            }
        }
    }
}

/// Run `fut` with a deadline, mapping expiry to [`HubError::Timeout`].
pub async fn with_deadline<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(HubError::Timeout {
            operation: operation.to_string(),
            secs: limit.as_secs(),
        }),
    }
}
