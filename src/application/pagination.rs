//! Shared cursor pagination helpers.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One page of an ordered sequence.
///
/// `next_cursor` is `None` on the last page. `total_count` is the size of the
/// whole sequence as reported when the page was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub results: Vec<T>,
    pub next_cursor: Option<String>,
    pub total_count: u64,
}

impl<T> Page<T> {
    /// Build a page. A total smaller than the page itself is raised to the
    /// number of results so the page never claims fewer items than it holds.
    pub fn new(results: Vec<T>, next_cursor: Option<String>, total_count: u64) -> Self {
        let total_count = total_count.max(results.len() as u64);
        Self {
            results,
            next_cursor,
            total_count,
        }
    }

    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            next_cursor: None,
            total_count: 0,
        }
    }

    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            results: self.results.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
            total_count: self.total_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ListingCursorPayload {
    #[serde(rename = "r")]
    repository: String,
}

/// Opaque cursor handed to listing clients.
///
/// Wraps the repository's own continuation token so the public API never
/// exposes repository URLs or internals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingCursor {
    repository: String,
}

impl ListingCursor {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
        }
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn encode(&self) -> String {
        let payload = ListingCursorPayload {
            repository: self.repository.clone(),
        };
        let json = serde_json::to_vec(&payload)
            .expect("serializing listing cursor payload should succeed");
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(value: &str) -> Result<Self, PaginationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|_| PaginationError::InvalidCursor)?;
        let payload: ListingCursorPayload =
            serde_json::from_slice(&bytes).map_err(|_| PaginationError::InvalidCursor)?;
        if payload.repository.is_empty() {
            return Err(PaginationError::InvalidCursor);
        }
        Ok(Self {
            repository: payload.repository,
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaginationError {
    #[error("invalid cursor")]
    InvalidCursor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_cursor_survives_encoding() {
        let cursor = ListingCursor::new("3");
        let decoded = ListingCursor::decode(&cursor.encode()).expect("decode");
        assert_eq!(decoded.repository(), "3");
    }

    #[test]
    fn rejects_tampered_cursors() {
        assert_eq!(
            ListingCursor::decode("not base64!"),
            Err(PaginationError::InvalidCursor)
        );
        let empty = URL_SAFE_NO_PAD.encode(br#"{"r":""}"#);
        assert_eq!(
            ListingCursor::decode(&empty),
            Err(PaginationError::InvalidCursor)
        );
        let wrong_shape = URL_SAFE_NO_PAD.encode(br#"{"page":2}"#);
        assert_eq!(
            ListingCursor::decode(&wrong_shape),
            Err(PaginationError::InvalidCursor)
        );
    }

    #[test]
    fn page_total_never_undercounts_results() {
        let page = Page::new(vec![1, 2, 3], None, 1);
        assert_eq!(page.total_count, 3);
        assert!(page.is_last());
    }

    #[test]
    fn page_serializes_in_camel_case() {
        let page = Page::new(vec!["a"], Some("c".to_string()), 4);
        let json = serde_json::to_value(&page).expect("serialize");
        assert_eq!(json["nextCursor"], "c");
        assert_eq!(json["totalCount"], 4);
    }
}
