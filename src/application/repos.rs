//! Repository traits describing content sources.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::pagination::{Page, PaginationError};

/// Largest page the hosted repository will serve.
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("resource not found")]
    NotFound,
    #[error("repository rejected cursor `{cursor}`")]
    InvalidCursor { cursor: String },
    #[error("repository response could not be decoded: {0}")]
    Decode(String),
    #[error(transparent)]
    Pagination(#[from] PaginationError),
}

impl RepoError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }
}

/// A document exactly as the repository delivered it.
///
/// Records stay untyped until normalization so that one bad document cannot
/// fail a whole page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(serde_json::Value);

impl RawRecord {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn uid(&self) -> Option<&str> {
        self.0.get("uid").and_then(serde_json::Value::as_str)
    }
}

/// Restricts a query to documents of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeFilter {
    pub document_type: String,
}

impl TypeFilter {
    pub fn new(document_type: impl Into<String>) -> Self {
        Self {
            document_type: document_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// Document fields to include. Empty means the repository default.
    pub fields: Vec<String>,
    pub page_size: u32,
    /// Continuation token from a previous page, `None` for the first page.
    pub cursor: Option<String>,
}

impl QueryOptions {
    pub fn first_page(fields: &[&str], page_size: u32) -> Self {
        Self {
            fields: fields.iter().map(|field| (*field).to_string()).collect(),
            page_size,
            cursor: None,
        }
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }
}

#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Fetch one page of documents matching `filter`.
    ///
    /// Implementations must clamp `options.page_size` to `max_page_size`.
    async fn query(
        &self,
        filter: &TypeFilter,
        options: &QueryOptions,
    ) -> Result<Page<RawRecord>, RepoError>;

    async fn get_by_uid(&self, document_type: &str, uid: &str) -> Result<RawRecord, RepoError>;

    fn max_page_size(&self) -> u32 {
        DEFAULT_MAX_PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn raw_record_exposes_uid_only_when_it_is_a_string() {
        assert_eq!(RawRecord::new(json!({"uid": "hello"})).uid(), Some("hello"));
        assert_eq!(RawRecord::new(json!({"uid": 7})).uid(), None);
        assert_eq!(RawRecord::new(json!({"id": "X1"})).uid(), None);
    }

    #[test]
    fn query_options_carry_fields_and_cursor() {
        let options =
            QueryOptions::first_page(&["title", "author"], 5).with_cursor(Some("2".to_string()));
        assert_eq!(options.fields, vec!["title", "author"]);
        assert_eq!(options.page_size, 5);
        assert_eq!(options.cursor.as_deref(), Some("2"));
    }
}
