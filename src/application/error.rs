use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{
        listing::ListingError, paths::PlanError, render::RenderError, repos::RepoError,
        site::BuildError,
    },
    domain::error::DomainError,
    infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            status,
            public_message,
            report: ErrorReport::from_message(source, status, detail),
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        Self {
            status,
            public_message,
            report: ErrorReport::from_error(source, status, error),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

fn repo_error_to_http(source: &'static str, err: &RepoError) -> HttpError {
    match err {
        RepoError::NotFound => HttpError::from_error(
            source,
            StatusCode::NOT_FOUND,
            "Resource not found",
            err,
        ),
        RepoError::InvalidCursor { .. } | RepoError::Pagination(_) => HttpError::from_error(
            source,
            StatusCode::BAD_REQUEST,
            "Invalid cursor",
            err,
        ),
        RepoError::Unavailable(_) | RepoError::Decode(_) => HttpError::from_error(
            source,
            StatusCode::BAD_GATEWAY,
            "Content repository unavailable",
            err,
        ),
    }
}

impl From<ListingError> for HttpError {
    fn from(error: ListingError) -> Self {
        const SOURCE: &str = "infra::http::listing_error_to_http_error";
        match error {
            ListingError::InvalidCursor(cursor) => HttpError::new(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid cursor",
                format!("Cursor `{cursor}` could not be decoded"),
            ),
            ListingError::Repo(err) => repo_error_to_http(SOURCE, &err),
            ListingError::Remote(_) => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_GATEWAY,
                "Listing unavailable",
                &error,
            ),
        }
    }
}

impl From<RenderError> for HttpError {
    fn from(error: RenderError) -> Self {
        const SOURCE: &str = "infra::http::render_error_to_http_error";
        match error {
            RenderError::NotFound { .. } => HttpError::from_error(
                SOURCE,
                StatusCode::NOT_FOUND,
                "Post not found",
                &error,
            ),
            RenderError::Repo(err) => repo_error_to_http(SOURCE, &err),
            RenderError::Template(err) => err.into(),
            RenderError::Malformed { .. } => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                &error,
            ),
        }
    }
}

/// Failures that end a command. Reported once by `main` and turned into the
/// process exit status.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Listing(#[from] ListingError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Short label for the failing stage, used in logs and on stderr.
    pub fn stage(&self) -> &'static str {
        match self {
            AppError::Domain(_) => "domain",
            AppError::Infra(InfraError::Configuration { .. }) | AppError::Validation(_) => {
                "configuration"
            }
            AppError::Infra(_) => "infrastructure",
            AppError::Listing(_) => "listing",
            AppError::Plan(_) => "path planning",
            AppError::Render(_) => "rendering",
            AppError::Build(_) => "site build",
            AppError::Unexpected(_) => "unexpected",
        }
    }
}
