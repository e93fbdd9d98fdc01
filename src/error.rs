use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

use crate::domain::SourceId;

#[derive(Debug, Error, Diagnostic)]
pub enum DataError {
    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("unknown source in config: {0}")]
    UnknownSource(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("failed to fetch {source_id}: {error}")]
    Fetch {
        source_id: SourceId,
        #[source]
        error: FetchError,
    },

    #[error("{feed} feed is missing mandatory column `{column}`")]
    MissingColumn { feed: SourceId, column: String },

    #[error("{feed} feed is malformed: {message}")]
    Malformed { feed: SourceId, message: String },

    #[error("state code `{0}` has no entry in the state code map")]
    UnknownStateCode(String),

    #[error("invalid reference data in {path}: {message}")]
    Reference { path: String, message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("a refresh is already in progress")]
    RefreshInProgress,

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Transport-level failure kinds surfaced by a feed download.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("server returned status {status}")]
    InvalidUrl { status: u16 },

    #[error("unable to connect: {0}")]
    ConnectionFailure(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    UnknownTransport(String),
}

impl FetchError {
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return FetchError::InvalidUrl {
                status: status.as_u16(),
            };
        }
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else if err.is_connect() {
            FetchError::ConnectionFailure(err.to_string())
        } else {
            FetchError::UnknownTransport(err.to_string())
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("storage filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown table: {0}")]
    UnknownTable(String),
}
