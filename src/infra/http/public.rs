use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header::CACHE_CONTROL},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

use crate::{
    application::{
        error::HttpError,
        listing::ListingService,
        revalidate::RevalidatingPages,
    },
    presentation::views::{IndexTemplate, IndexView, render_not_found_response, render_to_string},
};

use super::middleware::{RouteOutcome, trace_requests};

#[derive(Clone)]
pub struct HttpState {
    pub listing: Arc<ListingService>,
    pub pages: Arc<RevalidatingPages>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/posts", get(list_posts))
        .route("/post/{uid}", get(post_detail))
        .route("/_health", get(health))
        .fallback(fallback)
        .with_state(state)
        .layer(middleware::from_fn(trace_requests))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CursorQuery {
    cursor: Option<String>,
}

async fn index(State(state): State<HttpState>) -> Result<Response, HttpError> {
    let listing = state.listing.first_page().await?;
    let html = render_to_string(
        &IndexTemplate::new(IndexView::from_listing(&listing)),
        "infra::http::public::index",
    )?;
    Ok(Html(html).into_response())
}

async fn list_posts(
    State(state): State<HttpState>,
    Query(query): Query<CursorQuery>,
) -> Result<Response, HttpError> {
    let cursor = query.cursor.filter(|cursor| !cursor.is_empty());
    let page = match cursor.as_deref() {
        Some(cursor) => state.listing.page_at(cursor).await?,
        None => state.listing.first_page().await?,
    };
    let outcome = RouteOutcome::Listing {
        cursor,
        results: page.page.results.len(),
        malformed: page.malformed_count,
    };
    let mut response = Json(page).into_response();
    response.extensions_mut().insert(outcome);
    Ok(response)
}

async fn post_detail(
    State(state): State<HttpState>,
    Path(uid): Path<String>,
) -> Result<Response, HttpError> {
    let served = state.pages.serve(&uid).await?;
    let mut response = match served.page() {
        Some(page) => {
            let mut response = Html(page.html.to_string()).into_response();
            if let Ok(value) = HeaderValue::from_str(&state.pages.policy().cache_control()) {
                response.headers_mut().insert(CACHE_CONTROL, value);
            }
            response
        }
        None => render_not_found_response(),
    };
    response.extensions_mut().insert(RouteOutcome::Detail {
        uid,
        served: served.label(),
    });
    Ok(response)
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn fallback() -> Response {
    render_not_found_response()
}
