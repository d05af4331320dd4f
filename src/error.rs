use thiserror::Error;

/// Failures the engine distinguishes.
///
/// Only `SourceFetch` aborts a pass. `DetailFetch` and `MalformedRecord` are
/// absorbed where they occur and surface in logs only.
#[derive(Debug, Error)]
pub enum OverviewError {
    #[error("fetching {endpoint} failed: {message}")]
    SourceFetch { endpoint: &'static str, message: String },

    #[error("course detail {reference} failed: {message}")]
    DetailFetch { reference: String, message: String },

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("cache store: {0}")]
    Store(String),
}

impl OverviewError {
    pub fn source_fetch(endpoint: &'static str, err: anyhow::Error) -> Self {
        OverviewError::SourceFetch {
            endpoint,
            message: format!("{:#}", err),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, OverviewError::SourceFetch { .. })
    }
}

impl From<rusqlite::Error> for OverviewError {
    fn from(err: rusqlite::Error) -> Self {
        OverviewError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for OverviewError {
    fn from(err: serde_json::Error) -> Self {
        OverviewError::Store(err.to_string())
    }
}
