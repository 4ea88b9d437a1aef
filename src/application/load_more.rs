//! Client-side "load more" pagination over listing pages.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::application::listing::ListingError;
use crate::application::pagination::Page;
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::posts::PostSummary;

pub const LOAD_MORE_LABEL: &str = "Carregar mais posts";
pub const NO_MORE_LABEL: &str = "No more posts...";

/// Anything that can resolve a listing cursor into the next page.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, cursor: &str) -> Result<Page<PostSummary>, ListingError>;
}

#[async_trait]
impl<S: PageSource + ?Sized> PageSource for Arc<S> {
    async fn fetch_page(&self, cursor: &str) -> Result<Page<PostSummary>, ListingError> {
        (**self).fetch_page(cursor).await
    }
}

/// State of the "load more" control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadMoreAffordance {
    pub enabled: bool,
    pub label: &'static str,
}

/// Posts loaded so far and where to continue from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationState {
    loaded: Vec<PostSummary>,
    cursor: Option<String>,
    total_count: u64,
}

impl PaginationState {
    /// Seed state from the server-rendered first page.
    ///
    /// `total_count` is fixed here and never revised by later pages.
    pub fn from_first_page(page: Page<PostSummary>) -> Self {
        let mut seen = HashSet::new();
        let loaded = page
            .results
            .into_iter()
            .filter(|post| seen.insert(post.id.clone()))
            .collect();
        Self {
            loaded,
            cursor: page.next_cursor,
            total_count: page.total_count,
        }
    }

    pub fn loaded(&self) -> &[PostSummary] {
        &self.loaded
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn is_terminal(&self) -> bool {
        self.cursor.is_none() || self.loaded.len() as u64 >= self.total_count
    }

    pub fn affordance(&self) -> LoadMoreAffordance {
        if self.is_terminal() {
            LoadMoreAffordance {
                enabled: false,
                label: NO_MORE_LABEL,
            }
        } else {
            LoadMoreAffordance {
                enabled: true,
                label: LOAD_MORE_LABEL,
            }
        }
    }

    /// Append a fetched page, skipping posts already loaded.
    fn append(&self, fetched_with: &str, page: Page<PostSummary>) -> Self {
        let mut seen: HashSet<String> = self.loaded.iter().map(|post| post.id.clone()).collect();
        let mut loaded = self.loaded.clone();
        let before = loaded.len();
        loaded.extend(
            page.results
                .into_iter()
                .filter(|post| seen.insert(post.id.clone())),
        );

        let mut cursor = page.next_cursor;
        if cursor.as_deref() == Some(fetched_with) && loaded.len() == before {
            warn!(
                target = "spacetraveling::load_more",
                cursor = fetched_with,
                "listing returned its own cursor without new posts; stopping"
            );
            cursor = None;
        }

        Self {
            loaded,
            cursor,
            total_count: self.total_count,
        }
    }
}

/// Drives "load more" for one listing session.
///
/// Loads are serialized: a call made while another is in flight waits for it
/// and then re-checks the terminal condition, so no page is fetched twice.
pub struct PaginationController<S> {
    source: S,
    state: RwLock<Arc<PaginationState>>,
    loading: Mutex<()>,
}

impl<S: PageSource> PaginationController<S> {
    pub fn new(source: S, first_page: Page<PostSummary>) -> Self {
        Self {
            source,
            state: RwLock::new(Arc::new(PaginationState::from_first_page(first_page))),
            loading: Mutex::new(()),
        }
    }

    /// Current snapshot. Cheap to call and never blocks on a pending load.
    pub fn state(&self) -> Arc<PaginationState> {
        rw_read(&self.state, "application::load_more", "state").clone()
    }

    /// Fetch and append the next page.
    ///
    /// In a terminal state this returns the current snapshot without fetching.
    /// On failure the state is left exactly as it was.
    pub async fn load_more(&self) -> Result<Arc<PaginationState>, ListingError> {
        let _turn = self.loading.lock().await;

        let current = self.state();
        if current.is_terminal() {
            return Ok(current);
        }
        let Some(cursor) = current.cursor().map(str::to_owned) else {
            return Ok(current);
        };

        let page = self.source.fetch_page(&cursor).await?;
        let next = Arc::new(current.append(&cursor, page));
        debug!(
            target = "spacetraveling::load_more",
            loaded = next.loaded().len(),
            total = next.total_count(),
            terminal = next.is_terminal(),
            "appended listing page"
        );

        *rw_write(&self.state, "application::load_more", "load_more") = Arc::clone(&next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::application::repos::RepoError;

    fn post(id: &str) -> PostSummary {
        PostSummary {
            id: id.to_string(),
            title: format!("Title {id}"),
            subtitle: String::new(),
            author: "Ana".to_string(),
            published_at: None,
        }
    }

    fn page(ids: &[&str], next: Option<&str>, total: u64) -> Page<PostSummary> {
        Page::new(
            ids.iter().map(|id| post(id)).collect(),
            next.map(str::to_string),
            total,
        )
    }

    #[derive(Default)]
    struct ScriptedSource {
        pages: HashMap<String, Page<PostSummary>>,
        failing: HashSet<String>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn with_page(mut self, cursor: &str, page: Page<PostSummary>) -> Self {
            self.pages.insert(cursor.to_string(), page);
            self
        }

        fn failing_on(mut self, cursor: &str) -> Self {
            self.failing.insert(cursor.to_string());
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageSource for ScriptedSource {
        async fn fetch_page(&self, cursor: &str) -> Result<Page<PostSummary>, ListingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.failing.contains(cursor) {
                return Err(ListingError::Repo(RepoError::unavailable("network down")));
            }
            self.pages
                .get(cursor)
                .cloned()
                .ok_or_else(|| ListingError::InvalidCursor(cursor.to_string()))
        }
    }

    fn ids(state: &PaginationState) -> Vec<&str> {
        state.loaded().iter().map(|post| post.id.as_str()).collect()
    }

    #[tokio::test]
    async fn loads_pages_until_the_sequence_is_exhausted() {
        let source = ScriptedSource::default()
            .with_page("c1", page(&["c", "d"], Some("c2"), 5))
            .with_page("c2", page(&["e"], None, 5));
        let controller = PaginationController::new(source, page(&["a", "b"], Some("c1"), 5));

        assert_eq!(controller.state().affordance().label, LOAD_MORE_LABEL);

        let state = controller.load_more().await.expect("second page");
        assert_eq!(ids(&state), vec!["a", "b", "c", "d"]);
        assert!(!state.is_terminal());

        let state = controller.load_more().await.expect("third page");
        assert_eq!(ids(&state), vec!["a", "b", "c", "d", "e"]);
        assert!(state.is_terminal());
        assert_eq!(
            state.affordance(),
            LoadMoreAffordance {
                enabled: false,
                label: NO_MORE_LABEL
            }
        );
    }

    #[tokio::test]
    async fn terminal_state_does_not_fetch() {
        let controller =
            PaginationController::new(ScriptedSource::default(), page(&["a"], None, 1));
        let before = controller.state();

        let after = controller.load_more().await.expect("noop");
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(controller.source.calls(), 0);
    }

    #[tokio::test]
    async fn reaching_the_total_is_terminal_even_with_a_cursor() {
        let controller =
            PaginationController::new(ScriptedSource::default(), page(&["a", "b"], Some("c1"), 2));
        assert!(controller.state().is_terminal());
        controller.load_more().await.expect("noop");
        assert_eq!(controller.source.calls(), 0);
    }

    #[tokio::test]
    async fn failed_load_leaves_state_untouched() {
        let source = ScriptedSource::default().failing_on("c1");
        let controller = PaginationController::new(source, page(&["a"], Some("c1"), 3));
        let before = controller.state();

        let err = controller.load_more().await.expect_err("failure");
        assert!(matches!(err, ListingError::Repo(_)));

        let after = controller.state();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.cursor(), Some("c1"));
        assert!(after.affordance().enabled);
    }

    #[tokio::test]
    async fn concurrent_loads_fetch_each_page_once() {
        let source = ScriptedSource::default().with_page("c1", page(&["b"], None, 2));
        let controller = PaginationController::new(source, page(&["a"], Some("c1"), 2));

        let (first, second) = tokio::join!(controller.load_more(), controller.load_more());
        first.expect("first");
        second.expect("second");

        assert_eq!(controller.source.calls(), 1);
        assert_eq!(ids(&controller.state()), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn duplicate_posts_are_appended_once() {
        let source = ScriptedSource::default().with_page("c1", page(&["b", "a", "c"], None, 3));
        let controller = PaginationController::new(source, page(&["a", "b", "b"], Some("c1"), 3));
        assert_eq!(ids(&controller.state()), vec!["a", "b"]);

        let state = controller.load_more().await.expect("load");
        assert_eq!(ids(&state), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn total_count_is_fixed_by_the_first_page() {
        let source = ScriptedSource::default().with_page("c1", page(&["b"], Some("c2"), 10));
        let controller = PaginationController::new(source, page(&["a"], Some("c1"), 3));
        let state = controller.load_more().await.expect("load");
        assert_eq!(state.total_count(), 3);
    }

    #[tokio::test]
    async fn self_referencing_cursor_without_progress_terminates() {
        let source = ScriptedSource::default().with_page("c1", page(&["a"], Some("c1"), 5));
        let controller = PaginationController::new(source, page(&["a"], Some("c1"), 5));
        let state = controller.load_more().await.expect("load");
        assert!(state.is_terminal());
    }
}
