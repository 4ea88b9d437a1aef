use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::application::load_more::PageSource;
use crate::application::normalize::normalize_summaries;
use crate::application::pagination::{ListingCursor, Page};
use crate::application::repos::{ContentRepository, QueryOptions, RepoError, TypeFilter};
use crate::domain::posts::PostSummary;

/// Fields a listing card needs; everything else stays on the repository side.
const SUMMARY_FIELDS: [&str; 3] = ["title", "subtitle", "author"];

pub const DEFAULT_LISTING_PAGE_SIZE: u32 = 5;

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("listing endpoint failed: {0}")]
    Remote(String),
}

/// A listing page plus the number of records dropped while normalizing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    #[serde(flatten)]
    pub page: Page<PostSummary>,
    #[serde(default)]
    pub malformed_count: usize,
}

#[derive(Clone)]
pub struct ListingService {
    repo: Arc<dyn ContentRepository>,
    filter: TypeFilter,
    page_size: u32,
}

impl ListingService {
    pub fn new(repo: Arc<dyn ContentRepository>, filter: TypeFilter, page_size: u32) -> Self {
        let page_size = page_size.clamp(1, repo.max_page_size().max(1));
        Self {
            repo,
            filter,
            page_size,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub async fn first_page(&self) -> Result<ListingPage, ListingError> {
        self.load(None).await
    }

    /// Load the page a previously issued cursor points at.
    pub async fn page_at(&self, cursor: &str) -> Result<ListingPage, ListingError> {
        let cursor = ListingCursor::decode(cursor)
            .map_err(|err| ListingError::InvalidCursor(err.to_string()))?;
        self.load(Some(cursor.repository().to_string())).await
    }

    async fn load(&self, repository_cursor: Option<String>) -> Result<ListingPage, ListingError> {
        let options = QueryOptions::first_page(&SUMMARY_FIELDS, self.page_size)
            .with_cursor(repository_cursor);
        let page = self
            .repo
            .query(&self.filter, &options)
            .await
            .map_err(|err| match err {
                RepoError::InvalidCursor { cursor } => ListingError::InvalidCursor(cursor),
                other => ListingError::Repo(other),
            })?;

        let batch = normalize_summaries(&page.results);
        let next_cursor = page
            .next_cursor
            .map(|cursor| ListingCursor::new(cursor).encode());

        debug!(
            target = "spacetraveling::listing",
            returned = batch.items.len(),
            malformed = batch.malformed,
            total = page.total_count,
            has_more = next_cursor.is_some(),
            "listing page loaded"
        );

        Ok(ListingPage {
            page: Page::new(batch.items, next_cursor, page.total_count),
            malformed_count: batch.malformed,
        })
    }
}

#[async_trait]
impl PageSource for ListingService {
    async fn fetch_page(&self, cursor: &str) -> Result<Page<PostSummary>, ListingError> {
        Ok(self.page_at(cursor).await?.page)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::InMemoryRepository;

    fn service(repo: InMemoryRepository, page_size: u32) -> ListingService {
        ListingService::new(Arc::new(repo), TypeFilter::new("posts"), page_size)
    }

    #[tokio::test]
    async fn walks_the_whole_sequence_with_cursors() {
        let repo = InMemoryRepository::with_posts(["a", "b", "c", "d", "e", "f", "g"]);
        let listing = service(repo, 3);

        let first = listing.first_page().await.expect("first page");
        assert_eq!(first.page.total_count, 7);
        assert_eq!(first.page.results.len(), 3);

        let mut ids: Vec<String> = first.page.results.iter().map(|p| p.id.clone()).collect();
        let mut cursor = first.page.next_cursor.clone();
        while let Some(next) = cursor {
            let page = listing.page_at(&next).await.expect("next page");
            ids.extend(page.page.results.iter().map(|p| p.id.clone()));
            cursor = page.page.next_cursor;
        }

        assert_eq!(ids, vec!["a", "b", "c", "d", "e", "f", "g"]);
    }

    #[tokio::test]
    async fn counts_malformed_records_without_failing() {
        let repo = InMemoryRepository::with_posts(["a", "b"]);
        repo.push_raw(json!({"uid": "broken", "data": {"title": "No author"}}));
        let listing = service(repo, 10);

        let page = listing.first_page().await.expect("page");
        assert_eq!(page.page.results.len(), 2);
        assert_eq!(page.malformed_count, 1);
        assert_eq!(page.page.total_count, 3);
    }

    #[tokio::test]
    async fn rejects_foreign_cursors() {
        let listing = service(InMemoryRepository::with_posts(["a"]), 1);
        let err = listing.page_at("garbage").await.expect_err("invalid cursor");
        assert!(matches!(err, ListingError::InvalidCursor(_)));
    }

    #[tokio::test]
    async fn surfaces_repository_outages() {
        let repo = InMemoryRepository::with_posts(["a"]);
        repo.fail_queries("upstream down");
        let err = service(repo, 1).first_page().await.expect_err("outage");
        assert!(matches!(err, ListingError::Repo(RepoError::Unavailable(_))));
    }

    #[tokio::test]
    async fn empty_repository_yields_terminal_empty_page() {
        let page = service(InMemoryRepository::default(), 5)
            .first_page()
            .await
            .expect("page");
        assert!(page.page.results.is_empty());
        assert_eq!(page.page.total_count, 0);
        assert!(page.page.next_cursor.is_none());
    }

    #[test]
    fn page_size_is_clamped_to_repository_maximum() {
        let listing = service(InMemoryRepository::default(), 1_000);
        assert_eq!(listing.page_size(), 100);
        let listing = service(InMemoryRepository::default(), 0);
        assert_eq!(listing.page_size(), 1);
    }

    #[test]
    fn listing_page_json_flattens_the_page() {
        let page = ListingPage {
            page: Page::new(Vec::new(), Some("abc".to_string()), 0),
            malformed_count: 2,
        };
        let json = serde_json::to_value(&page).expect("serialize");
        assert_eq!(json["nextCursor"], "abc");
        assert_eq!(json["malformedCount"], 2);
        assert!(json["results"].as_array().is_some());
    }
}
