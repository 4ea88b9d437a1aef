//! Time-based regeneration of generated detail pages.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use metrics::counter;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::paths::{PathResolution, StaticPathSet};
use crate::application::render::{PageRenderer, RenderError, report_unrenderable};
use crate::cache::lock::{mutex_lock, rw_read, rw_write};
use crate::cache::{GeneratedPage, PageStore};

pub const DEFAULT_REVALIDATE_WINDOW: Duration = Duration::from_secs(86_400);

const SOURCE: &str = "application::revalidate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevalidationPolicy {
    window: Duration,
}

impl Default for RevalidationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_REVALIDATE_WINDOW)
    }
}

impl RevalidationPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// A page is stale once it is strictly older than the window.
    pub fn is_stale(&self, generated_at: OffsetDateTime, now: OffsetDateTime) -> bool {
        now - generated_at > self.window
    }

    /// `Cache-Control` value for responses carrying a generated page.
    pub fn cache_control(&self) -> String {
        format!(
            "public, s-maxage={}, stale-while-revalidate",
            self.window.as_secs()
        )
    }
}

/// Outcome of serving a detail request.
#[derive(Debug)]
pub enum Served {
    Fresh(GeneratedPage),
    /// The stored page, returned as-is while a newer one is produced.
    /// `regeneration` is `None` when another request already started it.
    Stale {
        page: GeneratedPage,
        regeneration: Option<JoinHandle<()>>,
    },
    NotFound,
}

impl Served {
    pub fn page(&self) -> Option<&GeneratedPage> {
        match self {
            Served::Fresh(page) | Served::Stale { page, .. } => Some(page),
            Served::NotFound => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Served::Fresh(_) => "fresh",
            Served::Stale { .. } => "stale",
            Served::NotFound => "not_found",
        }
    }
}

/// Result of rendering the planned paths ahead of serving.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmReport {
    pub warmed: usize,
    /// Planned ids with no renderable page; they now resolve like unplanned ids.
    pub skipped: Vec<String>,
}

/// Serves detail pages from the store and keeps them within the window.
pub struct RevalidatingPages {
    store: PageStore,
    renderer: Arc<dyn PageRenderer>,
    policy: RevalidationPolicy,
    paths: RwLock<StaticPathSet>,
    regenerating: Mutex<HashSet<String>>,
}

impl RevalidatingPages {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        policy: RevalidationPolicy,
        paths: StaticPathSet,
    ) -> Self {
        Self {
            store: PageStore::new(),
            renderer,
            policy,
            paths: RwLock::new(paths),
            regenerating: Mutex::new(HashSet::new()),
        }
    }

    pub fn policy(&self) -> RevalidationPolicy {
        self.policy
    }

    pub fn resolve(&self, uid: &str) -> PathResolution {
        rw_read(&self.paths, SOURCE, "resolve").resolve(uid)
    }

    pub fn cached(&self, uid: &str) -> Option<GeneratedPage> {
        self.store.get(uid)
    }

    /// Store a page generated elsewhere, such as during a site build.
    pub fn seed(&self, page: GeneratedPage) {
        self.store.put_if_newer(page);
    }

    /// Render every planned path.
    ///
    /// Posts that are gone or fail projection are skipped and removed from
    /// the planned set. Any other failure aborts the warm-up.
    pub async fn warm<'a>(
        &self,
        uids: impl IntoIterator<Item = &'a str>,
        now: OffsetDateTime,
    ) -> Result<WarmReport, RenderError> {
        let mut report = WarmReport::default();
        for uid in uids {
            match self.renderer.render(uid).await {
                Ok(html) => {
                    self.store.put(GeneratedPage::new(uid, html, now));
                    report.warmed += 1;
                }
                Err(err) if err.is_unrenderable() => {
                    report_unrenderable(uid, &err);
                    rw_write(&self.paths, SOURCE, "warm").remove(uid);
                    report.skipped.push(uid.to_string());
                }
                Err(err) => return Err(err),
            }
        }
        info!(
            target = "spacetraveling::revalidate",
            warmed = report.warmed,
            skipped = report.skipped.len(),
            "detail pages warmed"
        );
        Ok(report)
    }

    pub async fn serve(self: &Arc<Self>, uid: &str) -> Result<Served, RenderError> {
        self.serve_at(uid, OffsetDateTime::now_utc()).await
    }

    /// Serve `uid` as of `now`.
    ///
    /// Fresh pages are returned directly. Stale pages are returned unchanged
    /// and one background regeneration is started for them; a failed
    /// regeneration keeps the stale page. Ids outside the planned set render
    /// on demand only when the fallback policy allows it.
    pub async fn serve_at(
        self: &Arc<Self>,
        uid: &str,
        now: OffsetDateTime,
    ) -> Result<Served, RenderError> {
        if self.resolve(uid) == PathResolution::NotFound {
            counter!("spacetraveling_page_cache_miss_total").increment(1);
            return Ok(Served::NotFound);
        }

        if let Some(page) = self.store.get(uid) {
            if !self.policy.is_stale(page.generated_at, now) {
                counter!("spacetraveling_page_cache_hit_total").increment(1);
                return Ok(Served::Fresh(page));
            }
            counter!("spacetraveling_page_cache_stale_total").increment(1);
            let regeneration = self.spawn_regeneration(uid);
            return Ok(Served::Stale { page, regeneration });
        }

        counter!("spacetraveling_page_cache_miss_total").increment(1);
        match self.renderer.render(uid).await {
            Ok(html) => {
                let page = GeneratedPage::new(uid, html, now);
                self.store.put_if_newer(page.clone());
                debug!(
                    target = "spacetraveling::revalidate",
                    uid,
                    "detail page generated on demand"
                );
                Ok(Served::Fresh(page))
            }
            Err(RenderError::NotFound { .. }) => Ok(Served::NotFound),
            Err(err @ RenderError::Malformed { .. }) => {
                report_unrenderable(uid, &err);
                Ok(Served::NotFound)
            }
            Err(err) => Err(err),
        }
    }

    fn spawn_regeneration(self: &Arc<Self>, uid: &str) -> Option<JoinHandle<()>> {
        let claim = RegenerationClaim::acquire(self, uid)?;

        Some(tokio::spawn(async move {
            let RegenerationClaim { pages: this, uid } = &claim;
            match this.renderer.render(uid).await {
                Ok(html) => {
                    this.store
                        .put(GeneratedPage::new(uid.as_str(), html, OffsetDateTime::now_utc()));
                    info!(
                        target = "spacetraveling::revalidate",
                        uid = %uid,
                        "detail page regenerated"
                    );
                }
                Err(err) => {
                    counter!("spacetraveling_page_regeneration_failures_total").increment(1);
                    warn!(
                        target = "spacetraveling::revalidate",
                        uid = %uid,
                        error = %err,
                        "regeneration failed; keeping previous page"
                    );
                }
            }
        }))
    }
}

/// One in-flight regeneration of `uid`, released when dropped, including
/// when the task panics or is cancelled.
struct RegenerationClaim {
    pages: Arc<RevalidatingPages>,
    uid: String,
}

impl RegenerationClaim {
    fn acquire(pages: &Arc<RevalidatingPages>, uid: &str) -> Option<Self> {
        mutex_lock(&pages.regenerating, SOURCE, "claim")
            .insert(uid.to_string())
            .then(|| Self {
                pages: Arc::clone(pages),
                uid: uid.to_string(),
            })
    }
}

impl Drop for RegenerationClaim {
    fn drop(&mut self) {
        mutex_lock(&self.pages.regenerating, SOURCE, "release").remove(&self.uid);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use time::Duration as TimeDuration;

    use super::*;
    use crate::application::paths::FallbackPolicy;
    use crate::application::repos::RepoError;
    use crate::domain::error::DomainError;

    #[derive(Default)]
    struct CountingRenderer {
        renders: AtomicUsize,
        failing: AtomicBool,
        panicking: AtomicBool,
    }

    #[async_trait]
    impl PageRenderer for CountingRenderer {
        async fn render(&self, uid: &str) -> Result<String, RenderError> {
            let n = self.renders.fetch_add(1, Ordering::SeqCst) + 1;
            if self.panicking.load(Ordering::SeqCst) {
                panic!("renderer blew up on {uid}");
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(RenderError::Repo(RepoError::unavailable("offline")));
            }
            if uid == "deleted" {
                return Err(RenderError::NotFound {
                    uid: uid.to_string(),
                });
            }
            if uid == "broken" {
                return Err(RenderError::Malformed {
                    uid: uid.to_string(),
                    error: DomainError::MissingField { field: "author" },
                });
            }
            Ok(format!("<h1>{uid} v{n}</h1>"))
        }
    }

    fn pages(
        renderer: Arc<CountingRenderer>,
        ids: &[&str],
        fallback: FallbackPolicy,
    ) -> Arc<RevalidatingPages> {
        Arc::new(RevalidatingPages::new(
            renderer,
            RevalidationPolicy::default(),
            StaticPathSet::new(ids.iter().map(|id| id.to_string()), fallback),
        ))
    }

    fn html(served: &Served) -> String {
        served
            .page()
            .map(|page| page.html.to_string())
            .unwrap_or_default()
    }

    #[test]
    fn staleness_is_strictly_older_than_the_window() {
        let policy = RevalidationPolicy::new(Duration::from_secs(60));
        let now = OffsetDateTime::now_utc();
        assert!(!policy.is_stale(now - TimeDuration::seconds(60), now));
        assert!(policy.is_stale(now - TimeDuration::seconds(61), now));
        assert!(!policy.is_stale(now + TimeDuration::seconds(5), now));
        assert_eq!(
            policy.cache_control(),
            "public, s-maxage=60, stale-while-revalidate"
        );
    }

    #[tokio::test]
    async fn fresh_pages_are_served_without_rendering() {
        let renderer = Arc::new(CountingRenderer::default());
        let pages = pages(Arc::clone(&renderer), &["a"], FallbackPolicy::NotFound);
        let now = OffsetDateTime::now_utc();
        pages.warm(["a"], now).await.expect("warm");

        let served = pages
            .serve_at("a", now + TimeDuration::hours(1))
            .await
            .expect("serve");
        assert!(matches!(served, Served::Fresh(_)));
        assert_eq!(html(&served), "<h1>a v1</h1>");
        assert_eq!(renderer.renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_page_is_served_then_replaced() {
        let renderer = Arc::new(CountingRenderer::default());
        let pages = pages(Arc::clone(&renderer), &["a"], FallbackPolicy::NotFound);
        let now = OffsetDateTime::now_utc();
        pages.seed(GeneratedPage::new("a", "<h1>old</h1>", now - TimeDuration::hours(25)));

        let served = pages.serve_at("a", now).await.expect("serve");
        assert_eq!(html(&served), "<h1>old</h1>");
        let Served::Stale {
            regeneration: Some(handle),
            ..
        } = served
        else {
            panic!("expected a stale page with a regeneration task");
        };
        handle.await.expect("regeneration task");

        let served = pages.serve_at("a", OffsetDateTime::now_utc()).await.expect("serve");
        assert!(matches!(served, Served::Fresh(_)));
        assert_eq!(html(&served), "<h1>a v1</h1>");
    }

    #[tokio::test]
    async fn failed_regeneration_keeps_the_stale_page() {
        let renderer = Arc::new(CountingRenderer::default());
        renderer.failing.store(true, Ordering::SeqCst);
        let pages = pages(Arc::clone(&renderer), &["a"], FallbackPolicy::NotFound);
        let now = OffsetDateTime::now_utc();
        pages.seed(GeneratedPage::new("a", "<h1>old</h1>", now - TimeDuration::days(2)));

        if let Served::Stale {
            regeneration: Some(handle),
            ..
        } = pages.serve_at("a", now).await.expect("serve")
        {
            handle.await.expect("regeneration task");
        } else {
            panic!("expected a stale page with a regeneration task");
        }

        let served = pages.serve_at("a", now).await.expect("serve");
        assert_eq!(html(&served), "<h1>old</h1>");
        assert!(matches!(served, Served::Stale { .. }));
    }

    #[tokio::test]
    async fn regeneration_is_started_once_while_in_flight() {
        let renderer = Arc::new(CountingRenderer::default());
        let pages = pages(Arc::clone(&renderer), &["a"], FallbackPolicy::NotFound);
        let now = OffsetDateTime::now_utc();
        pages.seed(GeneratedPage::new("a", "<h1>old</h1>", now - TimeDuration::days(2)));

        // Hold the claim as if a regeneration were already running.
        mutex_lock(&pages.regenerating, SOURCE, "test").insert("a".to_string());
        let served = pages.serve_at("a", now).await.expect("serve");
        assert!(matches!(
            served,
            Served::Stale {
                regeneration: None,
                ..
            }
        ));
        assert_eq!(renderer.renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_ids_follow_the_fallback_policy() {
        let renderer = Arc::new(CountingRenderer::default());
        let strict = pages(Arc::clone(&renderer), &["a"], FallbackPolicy::NotFound);
        assert!(matches!(
            strict.serve("b").await.expect("serve"),
            Served::NotFound
        ));
        assert_eq!(renderer.renders.load(Ordering::SeqCst), 0);

        let lenient = pages(Arc::clone(&renderer), &["a"], FallbackPolicy::RenderThenCache);
        let served = lenient.serve("b").await.expect("serve");
        assert_eq!(html(&served), "<h1>b v1</h1>");
        assert!(lenient.cached("b").is_some());

        assert!(matches!(
            lenient.serve("deleted").await.expect("serve"),
            Served::NotFound
        ));
        assert!(lenient.cached("deleted").is_none());
    }

    #[tokio::test]
    async fn warm_skips_posts_without_a_renderable_page() {
        let renderer = Arc::new(CountingRenderer::default());
        let pages = pages(
            Arc::clone(&renderer),
            &["a", "broken", "deleted", "b"],
            FallbackPolicy::NotFound,
        );

        let report = pages
            .warm(["a", "broken", "deleted", "b"], OffsetDateTime::now_utc())
            .await
            .expect("warm");
        assert_eq!(report.warmed, 2);
        assert_eq!(report.skipped, vec!["broken", "deleted"]);

        assert!(pages.cached("b").is_some());
        assert_eq!(pages.resolve("broken"), PathResolution::NotFound);
        assert!(matches!(
            pages.serve("broken").await.expect("serve"),
            Served::NotFound
        ));
        assert_eq!(renderer.renders.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn malformed_posts_are_not_found_on_demand() {
        let renderer = Arc::new(CountingRenderer::default());
        let pages = pages(renderer, &[], FallbackPolicy::RenderThenCache);
        assert!(matches!(
            pages.serve("broken").await.expect("serve"),
            Served::NotFound
        ));
        assert!(pages.cached("broken").is_none());
    }

    #[tokio::test]
    async fn warm_aborts_when_the_repository_is_down() {
        let renderer = Arc::new(CountingRenderer::default());
        renderer.failing.store(true, Ordering::SeqCst);
        let pages = pages(renderer, &["a", "b"], FallbackPolicy::NotFound);
        let err = pages
            .warm(["a", "b"], OffsetDateTime::now_utc())
            .await
            .expect_err("warm failure");
        assert!(matches!(err, RenderError::Repo(_)));
        assert!(pages.cached("a").is_none());
        assert_eq!(pages.resolve("a"), PathResolution::Prerendered);
    }

    #[tokio::test]
    async fn panicking_regeneration_releases_its_claim() {
        let renderer = Arc::new(CountingRenderer::default());
        renderer.panicking.store(true, Ordering::SeqCst);
        let pages = pages(Arc::clone(&renderer), &["a"], FallbackPolicy::NotFound);
        let now = OffsetDateTime::now_utc();
        pages.seed(GeneratedPage::new("a", "<h1>old</h1>", now - TimeDuration::days(2)));

        let Served::Stale {
            regeneration: Some(handle),
            ..
        } = pages.serve_at("a", now).await.expect("serve")
        else {
            panic!("expected a stale page with a regeneration task");
        };
        assert!(handle.await.expect_err("task panics").is_panic());
        assert!(!mutex_lock(&pages.regenerating, SOURCE, "test").contains("a"));

        renderer.panicking.store(false, Ordering::SeqCst);
        let Served::Stale {
            regeneration: Some(handle),
            ..
        } = pages.serve_at("a", now).await.expect("serve")
        else {
            panic!("expected the regeneration to be retried");
        };
        handle.await.expect("regeneration task");
        assert_eq!(
            pages.cached("a").map(|page| page.html.to_string()).as_deref(),
            Some("<h1>a v2</h1>")
        );
    }
}
