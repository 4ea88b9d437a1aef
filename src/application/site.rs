//! Ahead-of-time generation of the whole site into a directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::fs;
use tracing::{info, warn};

use crate::application::listing::{ListingError, ListingService};
use crate::application::paths::{FallbackPolicy, PlanError, StaticPathPlanner};
use crate::application::render::{PageRenderer, RenderError, report_unrenderable};
use crate::application::revalidate::RevalidationPolicy;
use crate::presentation::views::{
    IndexTemplate, IndexView, TemplateRenderError, render_to_string,
};

pub const INDEX_FILE: &str = "index.html";
pub const LISTING_FILE: &str = "posts.json";
pub const MANIFEST_FILE: &str = "paths.json";
pub const POST_DIR: &str = "post";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("planning static paths failed: {0}")]
    Plan(#[from] PlanError),
    #[error("loading the first listing page failed: {0}")]
    Listing(#[from] ListingError),
    #[error("rendering a detail page failed: {0}")]
    Render(#[from] RenderError),
    #[error(transparent)]
    Template(#[from] TemplateRenderError),
    #[error("writing `{path}` failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing build output failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Written next to the pages so a server can pick up the same plan.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildManifest<'a> {
    pub paths: &'a [String],
    /// Planned ids left without a page because the post is gone or malformed.
    pub unrendered: &'a [String],
    pub fallback: FallbackPolicy,
    pub revalidate_seconds: u64,
    pub generated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub output_dir: PathBuf,
    pub pages: usize,
    pub listed: usize,
    pub malformed: usize,
    pub skipped_paths: usize,
    pub unrendered: Vec<String>,
}

/// A file of the generated site, relative to the output directory.
struct Artifact {
    path: PathBuf,
    contents: Vec<u8>,
}

impl Artifact {
    fn new(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

pub struct SiteBuilder {
    listing: ListingService,
    planner: StaticPathPlanner,
    renderer: Arc<dyn PageRenderer>,
    policy: RevalidationPolicy,
}

impl SiteBuilder {
    pub fn new(
        listing: ListingService,
        planner: StaticPathPlanner,
        renderer: Arc<dyn PageRenderer>,
        policy: RevalidationPolicy,
    ) -> Self {
        Self {
            listing,
            planner,
            renderer,
            policy,
        }
    }

    /// Generate the site into `output_dir`.
    ///
    /// Every page is rendered before anything is written. Posts that are gone
    /// or malformed are left out and reported. A repository outage or a write
    /// failure aborts the build and leaves no files behind.
    pub async fn build(&self, output_dir: &Path) -> Result<BuildReport, BuildError> {
        let plan = self.planner.plan_paths().await?;
        let listing = self.listing.first_page().await?;

        let index = render_to_string(
            &IndexTemplate::new(IndexView::from_listing(&listing)),
            "application::site::SiteBuilder::build",
        )?;
        let mut artifacts = vec![
            Artifact::new(INDEX_FILE, index),
            Artifact::new(LISTING_FILE, serde_json::to_vec_pretty(&listing)?),
        ];

        let mut rendered = Vec::with_capacity(plan.paths.len());
        let mut unrendered = Vec::new();
        for uid in &plan.paths {
            match self.renderer.render(uid).await {
                Ok(html) => {
                    artifacts.push(Artifact::new(
                        Path::new(POST_DIR).join(format!("{uid}.html")),
                        html,
                    ));
                    rendered.push(uid.clone());
                }
                Err(err) if err.is_unrenderable() => {
                    report_unrenderable(uid, &err);
                    unrendered.push(uid.clone());
                }
                Err(err) => return Err(err.into()),
            }
        }

        let manifest = BuildManifest {
            paths: &rendered,
            unrendered: &unrendered,
            fallback: plan.fallback,
            revalidate_seconds: self.policy.window().as_secs(),
            generated_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        };
        artifacts.push(Artifact::new(
            MANIFEST_FILE,
            serde_json::to_vec_pretty(&manifest)?,
        ));

        write_site(output_dir, &artifacts).await?;

        let report = BuildReport {
            output_dir: output_dir.to_path_buf(),
            pages: rendered.len(),
            listed: listing.page.results.len(),
            malformed: listing.malformed_count,
            skipped_paths: plan.skipped,
            unrendered,
        };
        info!(
            target = "spacetraveling::site",
            output = %report.output_dir.display(),
            pages = report.pages,
            listed = report.listed,
            malformed = report.malformed,
            skipped = report.skipped_paths,
            unrendered = report.unrendered.len(),
            "site build finished"
        );
        Ok(report)
    }
}

/// Write all artifacts, removing what this call created if any write fails.
async fn write_site(output_dir: &Path, artifacts: &[Artifact]) -> Result<(), BuildError> {
    let mut created = Vec::new();
    let mut written = Vec::new();
    let result = write_artifacts(output_dir, artifacts, &mut created, &mut written).await;
    if result.is_err() {
        discard(&written, &created).await;
    }
    result
}

async fn write_artifacts(
    output_dir: &Path,
    artifacts: &[Artifact],
    created: &mut Vec<PathBuf>,
    written: &mut Vec<PathBuf>,
) -> Result<(), BuildError> {
    for dir in [output_dir.to_path_buf(), output_dir.join(POST_DIR)] {
        let exists = fs::try_exists(&dir)
            .await
            .map_err(|source| io_error(&dir, source))?;
        if !exists {
            fs::create_dir_all(&dir)
                .await
                .map_err(|source| io_error(&dir, source))?;
            created.push(dir);
        }
    }

    for artifact in artifacts {
        let path = output_dir.join(&artifact.path);
        written.push(path.clone());
        fs::write(&path, &artifact.contents)
            .await
            .map_err(|source| io_error(&path, source))?;
    }
    Ok(())
}

async fn discard(written: &[PathBuf], created: &[PathBuf]) {
    for path in written {
        match fs::remove_file(path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                target = "spacetraveling::site",
                path = %path.display(),
                error = %err,
                "failed to remove partial build output"
            ),
        }
    }
    for dir in created.iter().rev() {
        if let Err(err) = fs::remove_dir(dir).await {
            warn!(
                target = "spacetraveling::site",
                path = %dir.display(),
                error = %err,
                "failed to remove build directory"
            );
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> BuildError {
    BuildError::Io {
        path: path.to_path_buf(),
        source,
    }
}
