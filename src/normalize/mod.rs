//! Turns raw feed payloads into the three canonical relations.

pub mod global;
pub mod india_daily;
pub mod india_total;

use crate::domain::SourceId;
use crate::error::DataError;

pub(crate) fn malformed(feed: SourceId, message: impl Into<String>) -> DataError {
    DataError::Malformed {
        feed,
        message: message.into(),
    }
}

pub(crate) fn missing_column(feed: SourceId, column: &str) -> DataError {
    DataError::MissingColumn {
        feed,
        column: column.to_string(),
    }
}
