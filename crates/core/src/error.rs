use thiserror::Error;

/// Failures raised by a [`crate::Warehouse`] while executing a statement.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Connection(String),

    #[error("unable to decode row: {0}")]
    Decode(String),

    #[error("query job {0} did not complete")]
    Incomplete(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Please enter a valid search query.")]
    EmptyQuery,

    #[error("Invalid query or URI.")]
    InvalidDetailInput,

    #[error("{0} not available")]
    NotReady(String),

    #[error("{operation} failed: {source}")]
    Failed {
        operation: &'static str,
        #[source]
        source: WarehouseError,
    },

    #[error("Error during query classification: {0}")]
    Classification(#[source] WarehouseError),
}

impl SearchError {
    pub(crate) fn failed(operation: &'static str) -> impl FnOnce(WarehouseError) -> Self {
        move |source| Self::Failed { operation, source }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("invalid {field} identifier: {value:?}")]
    InvalidIdentifier { field: &'static str, value: String },

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

pub type Result<T, E = SearchError> = std::result::Result<T, E>;
