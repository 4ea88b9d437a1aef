use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const MAX_REQUEST_ID_LEN: usize = 64;

#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: String,
}

/// What a handler served, attached to the response for the access log.
#[derive(Clone, Debug)]
pub enum RouteOutcome {
    Listing {
        cursor: Option<String>,
        results: usize,
        malformed: usize,
    },
    Detail {
        uid: String,
        served: &'static str,
    },
}

impl RouteOutcome {
    fn uid(&self) -> Option<&str> {
        match self {
            RouteOutcome::Detail { uid, .. } => Some(uid.as_str()),
            RouteOutcome::Listing { .. } => None,
        }
    }

    fn cursor(&self) -> Option<&str> {
        match self {
            RouteOutcome::Listing { cursor, .. } => cursor.as_deref(),
            RouteOutcome::Detail { .. } => None,
        }
    }

    fn served(&self) -> Option<&'static str> {
        match self {
            RouteOutcome::Detail { served, .. } => Some(*served),
            RouteOutcome::Listing { .. } => None,
        }
    }

    fn malformed(&self) -> Option<usize> {
        match self {
            RouteOutcome::Listing { malformed, .. } => Some(*malformed),
            RouteOutcome::Detail { .. } => None,
        }
    }

    fn results(&self) -> Option<usize> {
        match self {
            RouteOutcome::Listing { results, .. } => Some(*results),
            RouteOutcome::Detail { .. } => None,
        }
    }
}

/// Reuse a caller's request id when it is short and printable.
fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get(&REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| {
            !id.is_empty()
                && id.len() <= MAX_REQUEST_ID_LEN
                && id
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
        })
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Tag the request with an id, echo it back and log the outcome.
///
/// Failures are logged with the attached [`ErrorReport`]: 5xx as errors and
/// 4xx as warnings. Everything else goes to debug.
pub async fn trace_requests(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from(request.headers());
    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
    });

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let mut response = next.run(request).await;
    let elapsed_ms = start.elapsed().as_millis();
    let status = response.status();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    let outcome = response.extensions_mut().remove::<RouteOutcome>();
    let uid = outcome.as_ref().and_then(RouteOutcome::uid);
    let cursor = outcome.as_ref().and_then(RouteOutcome::cursor);
    let served = outcome.as_ref().and_then(RouteOutcome::served);
    let results = outcome.as_ref().and_then(RouteOutcome::results);
    let malformed = outcome.as_ref().and_then(RouteOutcome::malformed);

    if !status.is_client_error() && !status.is_server_error() {
        debug!(
            target = "spacetraveling::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            uid,
            cursor,
            served,
            results,
            malformed,
            request_id = %request_id,
            "request served",
        );
        return response;
    }

    let (source, messages) = match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) => (report.source, report.messages),
        None => ("handler", Vec::new()),
    };
    let detail = messages.first().map(String::as_str).unwrap_or("none");

    if status.is_server_error() {
        error!(
            target = "spacetraveling::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            uid,
            cursor,
            source,
            detail,
            chain = ?messages,
            request_id = %request_id,
            "request failed",
        );
    } else {
        warn!(
            target = "spacetraveling::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            uid,
            cursor,
            served,
            source,
            detail,
            request_id = %request_id,
            "request rejected",
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(id: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_str(id).expect("header"));
        headers
    }

    #[test]
    fn caller_request_id_is_kept_when_printable() {
        assert_eq!(request_id_from(&headers("edge-42.a_b")), "edge-42.a_b");
    }

    #[test]
    fn unusable_request_ids_are_replaced() {
        let long = "x".repeat(65);
        for id in ["", "has space", long.as_str()] {
            let generated = request_id_from(&headers(id));
            assert_ne!(generated, id);
            assert!(Uuid::parse_str(&generated).is_ok());
        }
        assert!(Uuid::parse_str(&request_id_from(&HeaderMap::new())).is_ok());
    }

    #[test]
    fn outcome_fields_follow_the_route() {
        let detail = RouteOutcome::Detail {
            uid: "hooks".to_string(),
            served: "stale",
        };
        assert_eq!(detail.uid(), Some("hooks"));
        assert_eq!(detail.served(), Some("stale"));
        assert_eq!(detail.cursor(), None);

        let listing = RouteOutcome::Listing {
            cursor: Some("abc".to_string()),
            results: 2,
            malformed: 1,
        };
        assert_eq!(listing.cursor(), Some("abc"));
        assert_eq!(listing.malformed(), Some(1));
        assert_eq!(listing.uid(), None);
    }
}
