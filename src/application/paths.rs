//! Planning which detail pages are generated ahead of time.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::application::repos::{ContentRepository, QueryOptions, RepoError, TypeFilter};

/// What happens when a detail page outside the planned set is requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    #[default]
    NotFound,
    RenderThenCache,
}

impl FallbackPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackPolicy::NotFound => "not_found",
            FallbackPolicy::RenderThenCache => "render_then_cache",
        }
    }
}

impl fmt::Display for FallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown fallback policy `{0}` (expected `not_found` or `render_then_cache`)")]
pub struct UnknownFallbackPolicy(pub String);

impl FromStr for FallbackPolicy {
    type Err = UnknownFallbackPolicy;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "not_found" | "none" | "false" => Ok(FallbackPolicy::NotFound),
            "render_then_cache" | "blocking" => Ok(FallbackPolicy::RenderThenCache),
            _ => Err(UnknownFallbackPolicy(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticPathPlan {
    /// Post ids in the order the repository returned them, without duplicates.
    pub paths: Vec<String>,
    pub fallback: FallbackPolicy,
    /// Records that had no usable id.
    #[serde(skip)]
    pub skipped: usize,
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("repository returned cursor `{cursor}` more than once")]
    CursorCycle { cursor: String },
}

/// Ids usable as a single path segment and as a file name.
pub fn is_path_safe(uid: &str) -> bool {
    !uid.is_empty()
        && uid != "."
        && uid != ".."
        && uid
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}

pub struct StaticPathPlanner {
    repo: Arc<dyn ContentRepository>,
    filter: TypeFilter,
    fallback: FallbackPolicy,
}

impl StaticPathPlanner {
    pub fn new(
        repo: Arc<dyn ContentRepository>,
        filter: TypeFilter,
        fallback: FallbackPolicy,
    ) -> Self {
        Self {
            repo,
            filter,
            fallback,
        }
    }

    /// Enumerate every post id across all repository pages.
    ///
    /// Any repository failure aborts the plan; a partial path set is never
    /// returned.
    pub async fn plan_paths(&self) -> Result<StaticPathPlan, PlanError> {
        let page_size = self.repo.max_page_size();
        let mut seen_ids = HashSet::new();
        let mut seen_cursors = HashSet::new();
        let mut paths = Vec::new();
        let mut skipped = 0;
        let mut pages = 0;
        let mut cursor = None;

        loop {
            let options = QueryOptions::first_page(&[], page_size).with_cursor(cursor.take());
            let page = self.repo.query(&self.filter, &options).await?;
            pages += 1;

            for record in &page.results {
                match record.uid() {
                    Some(uid) if is_path_safe(uid) => {
                        if seen_ids.insert(uid.to_string()) {
                            paths.push(uid.to_string());
                        }
                    }
                    other => {
                        skipped += 1;
                        warn!(
                            target = "spacetraveling::paths",
                            uid = other.unwrap_or("<none>"),
                            "skipping record without a usable id"
                        );
                    }
                }
            }

            match page.next_cursor {
                None => break,
                Some(next) => {
                    if !seen_cursors.insert(next.clone()) {
                        return Err(PlanError::CursorCycle { cursor: next });
                    }
                    cursor = Some(next);
                }
            }
        }

        info!(
            target = "spacetraveling::paths",
            paths = paths.len(),
            skipped,
            pages,
            fallback = %self.fallback,
            "static paths planned"
        );

        Ok(StaticPathPlan {
            paths,
            fallback: self.fallback,
            skipped,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathResolution {
    Prerendered,
    RenderOnDemand,
    NotFound,
}

/// Lookup view of a plan, used when serving detail requests.
#[derive(Debug, Clone, Default)]
pub struct StaticPathSet {
    ids: HashSet<String>,
    fallback: FallbackPolicy,
}

impl StaticPathSet {
    pub fn new(ids: impl IntoIterator<Item = String>, fallback: FallbackPolicy) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            fallback,
        }
    }

    pub fn fallback(&self) -> FallbackPolicy {
        self.fallback
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.ids.contains(uid)
    }

    /// Stop treating `uid` as pre-rendered.
    pub fn remove(&mut self, uid: &str) -> bool {
        self.ids.remove(uid)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn resolve(&self, uid: &str) -> PathResolution {
        if self.ids.contains(uid) {
            PathResolution::Prerendered
        } else if self.fallback == FallbackPolicy::RenderThenCache && is_path_safe(uid) {
            PathResolution::RenderOnDemand
        } else {
            PathResolution::NotFound
        }
    }
}

impl From<&StaticPathPlan> for StaticPathSet {
    fn from(plan: &StaticPathPlan) -> Self {
        Self::new(plan.paths.iter().cloned(), plan.fallback)
    }
}
