use crate::application::error::{ErrorReport, HttpError};
use crate::application::listing::ListingPage;
use crate::application::load_more::PaginationState;
use crate::domain::posts::{PostDetail, PostSummary};
use crate::domain::reading_time::minutes_label;
use crate::domain::rich_text;
use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

pub const SITE_NAME: &str = "spacetraveling";

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

/// Render a template into a string, tagging failures with their call site.
pub fn render_to_string<T: Template>(
    template: &T,
    source: &'static str,
) -> Result<String, TemplateRenderError> {
    template
        .render()
        .map_err(|err| TemplateRenderError::new(source, "Template rendering failed", err))
}

pub fn render_not_found_response() -> Response {
    let mut response = match render_to_string(
        &NotFoundTemplate {
            site_name: SITE_NAME,
        },
        "presentation::views::render_not_found_response",
    ) {
        Ok(html) => (StatusCode::NOT_FOUND, Html(html)).into_response(),
        Err(err) => return HttpError::from(err).into_response(),
    };
    ErrorReport::from_message(
        "presentation::views::render_not_found_response",
        StatusCode::NOT_FOUND,
        "Resource not found",
    )
    .attach(&mut response);
    response
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostCardView {
    pub href: String,
    pub title: String,
    pub subtitle: String,
    pub author: String,
    pub published: String,
}

impl From<&PostSummary> for PostCardView {
    fn from(post: &PostSummary) -> Self {
        Self {
            href: format!("/post/{}", post.id),
            title: post.title.clone(),
            subtitle: post.subtitle.clone(),
            author: post.author.clone(),
            published: post
                .published_at
                .map(|date| date.to_string())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexView {
    pub posts: Vec<PostCardView>,
    /// Empty when there is nothing left to load.
    pub next_cursor: String,
    pub total_count: u64,
    pub load_more_enabled: bool,
    pub load_more_label: &'static str,
}

impl IndexView {
    /// The home page shows exactly the first listing page and seeds the
    /// "load more" control from it.
    pub fn from_listing(listing: &ListingPage) -> Self {
        let state = PaginationState::from_first_page(listing.page.clone());
        let affordance = state.affordance();
        Self {
            posts: state.loaded().iter().map(PostCardView::from).collect(),
            next_cursor: if affordance.enabled {
                state.cursor().unwrap_or_default().to_string()
            } else {
                String::new()
            },
            total_count: state.total_count(),
            load_more_enabled: affordance.enabled,
            load_more_label: affordance.label,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SectionView {
    pub heading: String,
    pub body_html: String,
}

#[derive(Debug, Clone)]
pub struct PostView {
    pub title: String,
    pub author: String,
    pub published: String,
    pub reading_time: String,
    pub banner_url: String,
    pub sections: Vec<SectionView>,
}

impl PostView {
    pub fn from_detail(detail: &PostDetail, reading_minutes: u32) -> Self {
        Self {
            title: detail.title.clone(),
            author: detail.author.clone(),
            published: detail
                .published_at
                .map(|date| date.to_string())
                .unwrap_or_default(),
            reading_time: minutes_label(reading_minutes),
            banner_url: detail.banner_url.clone(),
            sections: detail
                .content
                .iter()
                .map(|block| SectionView {
                    heading: block.heading.clone(),
                    body_html: rich_text::as_html(&block.body),
                })
                .collect(),
        }
    }
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub site_name: &'static str,
    pub view: IndexView,
}

impl IndexTemplate {
    pub fn new(view: IndexView) -> Self {
        Self {
            site_name: SITE_NAME,
            view,
        }
    }
}

#[derive(Template)]
#[template(path = "post.html")]
pub struct PostTemplate {
    pub site_name: &'static str,
    pub view: PostView,
}

impl PostTemplate {
    pub fn new(view: PostView) -> Self {
        Self {
            site_name: SITE_NAME,
            view,
        }
    }
}

#[derive(Template)]
#[template(path = "not_found.html")]
pub struct NotFoundTemplate {
    pub site_name: &'static str,
}
