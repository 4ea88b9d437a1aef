//! Detail page rendering.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tracing::warn;

use crate::application::normalize::to_detail;
use crate::application::repos::{ContentRepository, RepoError};
use crate::domain::error::DomainError;
use crate::domain::posts::PostDetail;
use crate::domain::reading_time::estimate_minutes;
use crate::presentation::views::{PostTemplate, PostView, TemplateRenderError, render_to_string};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("post `{uid}` not found")]
    NotFound { uid: String },
    #[error("post `{uid}` could not be projected")]
    Malformed {
        uid: String,
        #[source]
        error: DomainError,
    },
    #[error(transparent)]
    Repo(RepoError),
    #[error(transparent)]
    Template(#[from] TemplateRenderError),
}

impl RenderError {
    /// The post itself cannot become a page. Outages and template failures
    /// are not included.
    pub fn is_unrenderable(&self) -> bool {
        matches!(self, RenderError::NotFound { .. } | RenderError::Malformed { .. })
    }
}

/// Log a post left without a detail page; malformed ones are also counted.
pub(crate) fn report_unrenderable(uid: &str, err: &RenderError) {
    if matches!(err, RenderError::Malformed { .. }) {
        counter!("spacetraveling_malformed_records_total").increment(1);
    }
    warn!(
        target = "spacetraveling::render",
        uid,
        error = %err,
        "Skipping post without a renderable page"
    );
}

/// Produces the full HTML of one detail page.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, uid: &str) -> Result<String, RenderError>;
}

#[derive(Clone)]
pub struct PostPageRenderer {
    repo: Arc<dyn ContentRepository>,
    document_type: String,
}

impl PostPageRenderer {
    pub fn new(repo: Arc<dyn ContentRepository>, document_type: impl Into<String>) -> Self {
        Self {
            repo,
            document_type: document_type.into(),
        }
    }

    pub async fn load(&self, uid: &str) -> Result<PostDetail, RenderError> {
        let record = self
            .repo
            .get_by_uid(&self.document_type, uid)
            .await
            .map_err(|err| match err {
                RepoError::NotFound => RenderError::NotFound {
                    uid: uid.to_string(),
                },
                other => RenderError::Repo(other),
            })?;

        to_detail(&record).map_err(|error| RenderError::Malformed {
            uid: uid.to_string(),
            error,
        })
    }
}

#[async_trait]
impl PageRenderer for PostPageRenderer {
    async fn render(&self, uid: &str) -> Result<String, RenderError> {
        let detail = self.load(uid).await?;
        let minutes = estimate_minutes(&detail.content);
        let template = PostTemplate::new(PostView::from_detail(&detail, minutes));
        Ok(render_to_string(
            &template,
            "application::render::PostPageRenderer::render",
        )?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::InMemoryRepository;

    fn renderer(repo: InMemoryRepository) -> PostPageRenderer {
        PostPageRenderer::new(Arc::new(repo), "posts")
    }

    #[tokio::test]
    async fn renders_a_known_post() {
        let html = renderer(InMemoryRepository::with_posts(["hello"]))
            .render("hello")
            .await
            .expect("render");
        assert!(html.contains("Post hello"));
        assert!(html.contains("1 min"));
    }

    #[tokio::test]
    async fn unknown_post_is_not_found() {
        let err = renderer(InMemoryRepository::with_posts(["hello"]))
            .render("missing")
            .await
            .expect_err("not found");
        assert!(matches!(err, RenderError::NotFound { uid } if uid == "missing"));
    }

    #[tokio::test]
    async fn malformed_post_is_reported_with_its_cause() {
        let repo = InMemoryRepository::default();
        repo.push_raw(json!({"uid": "bad", "data": {"title": "Bad"}}));
        let err = renderer(repo).render("bad").await.expect_err("malformed");
        assert!(matches!(
            err,
            RenderError::Malformed { error: DomainError::MissingField { field: "author" }, .. }
        ));
        assert!(err.is_unrenderable());
    }

    #[tokio::test]
    async fn repository_outage_is_not_a_missing_post() {
        let repo = InMemoryRepository::with_posts(["hello"]);
        repo.fail_lookups("connection reset");
        let err = renderer(repo).render("hello").await.expect_err("outage");
        assert!(matches!(err, RenderError::Repo(RepoError::Unavailable(_))));
        assert!(!err.is_unrenderable());
    }
}
