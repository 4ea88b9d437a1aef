//! Content repository backed by the Prismic REST v2 API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::application::pagination::Page;
use crate::application::repos::{
    ContentRepository, QueryOptions, RawRecord, RepoError, TypeFilter,
};
use crate::config::RepositorySettings;

use super::error::InfraError;

const SEARCH_PATH: [&str; 2] = ["documents", "search"];
/// Newest first, as the index and the listing endpoint present posts.
const LISTING_ORDERING: &str = "[document.first_publication_date desc]";

#[derive(Debug, Deserialize)]
struct ApiRoot {
    refs: Vec<ApiRef>,
}

#[derive(Debug, Deserialize)]
struct ApiRef {
    #[serde(rename = "ref")]
    reference: String,
    #[serde(rename = "isMasterRef", default)]
    is_master_ref: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    page: u32,
    #[serde(default)]
    total_results_size: u64,
    next_page: Option<String>,
    #[serde(default)]
    results: Vec<Value>,
}

impl SearchResponse {
    /// The cursor handed out is the next page number, never the `next_page` URL.
    fn into_page(self) -> Page<RawRecord> {
        let next_cursor = self
            .next_page
            .filter(|url| !url.is_empty())
            .map(|_| (self.page + 1).to_string());
        Page::new(
            self.results.into_iter().map(RawRecord::new).collect(),
            next_cursor,
            self.total_results_size,
        )
    }
}

#[derive(Clone)]
pub struct PrismicRepository {
    client: Client,
    endpoint: Url,
    search_url: Url,
    access_token: Option<String>,
    max_page_size: u32,
}

impl PrismicRepository {
    pub fn new(settings: &RepositorySettings) -> Result<Self, InfraError> {
        let endpoint = settings
            .endpoint
            .clone()
            .ok_or_else(|| InfraError::configuration("repository endpoint is not configured"))?;
        Self::with_endpoint(
            endpoint,
            settings.access_token.clone(),
            settings.max_page_size.get(),
            settings.timeout,
        )
    }

    pub fn with_endpoint(
        endpoint: Url,
        access_token: Option<String>,
        max_page_size: u32,
        timeout: Duration,
    ) -> Result<Self, InfraError> {
        let search_url = search_url(&endpoint)?;
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::http(err.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            search_url,
            access_token,
            max_page_size,
        })
    }

    async fn master_ref(&self) -> Result<String, RepoError> {
        let mut url = self.endpoint.clone();
        if let Some(token) = self.access_token.as_deref() {
            url.query_pairs_mut().append_pair("access_token", token);
        }
        let root: ApiRoot = self.get_json(url).await?;
        root.refs
            .into_iter()
            .find(|api_ref| api_ref.is_master_ref)
            .map(|api_ref| api_ref.reference)
            .ok_or_else(|| RepoError::decode("repository exposes no master ref"))
    }

    async fn search(&self, params: &[(&str, String)]) -> Result<SearchResponse, RepoError> {
        let master = self.master_ref().await?;
        let url = self.search_request_url(&master, params);
        debug!(target = "spacetraveling::prismic", url = %redact(&url), "searching documents");
        self.get_json(url).await
    }

    fn search_request_url(&self, master_ref: &str, params: &[(&str, String)]) -> Url {
        let mut url = self.search_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("ref", master_ref);
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
            if let Some(token) = self.access_token.as_deref() {
                pairs.append_pair("access_token", token);
            }
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, RepoError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| RepoError::unavailable(err.without_url().to_string()))?;
        Self::handle(response).await
    }

    async fn handle<T: DeserializeOwned>(response: Response) -> Result<T, RepoError> {
        let status = response.status();
        if !status.is_success() {
            return Err(RepoError::unavailable(format!(
                "repository responded with status {status}"
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| RepoError::unavailable(err.without_url().to_string()))?;
        serde_json::from_slice(&bytes).map_err(|err| RepoError::decode(err.to_string()))
    }
}

#[async_trait]
impl ContentRepository for PrismicRepository {
    async fn query(
        &self,
        filter: &TypeFilter,
        options: &QueryOptions,
    ) -> Result<Page<RawRecord>, RepoError> {
        let params = listing_params(filter, options, self.max_page_size)?;
        Ok(self.search(&params).await?.into_page())
    }

    async fn get_by_uid(&self, document_type: &str, uid: &str) -> Result<RawRecord, RepoError> {
        let params = [
            ("q", uid_predicate(document_type, uid)),
            ("pageSize", "1".to_string()),
        ];
        self.search(&params)
            .await?
            .results
            .into_iter()
            .next()
            .map(RawRecord::new)
            .ok_or(RepoError::NotFound)
    }

    fn max_page_size(&self) -> u32 {
        self.max_page_size
    }
}

fn user_agent() -> &'static str {
    concat!("spacetraveling/", env!("CARGO_PKG_VERSION"))
}

fn search_url(endpoint: &Url) -> Result<Url, InfraError> {
    let mut url = endpoint.clone();
    url.set_query(None);
    url.path_segments_mut()
        .map_err(|()| InfraError::configuration("repository endpoint is not a base URL"))?
        .pop_if_empty()
        .extend(SEARCH_PATH);
    Ok(url)
}

fn parse_page_cursor(cursor: Option<&str>) -> Result<u32, RepoError> {
    match cursor {
        None => Ok(1),
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|page| *page >= 1)
            .ok_or_else(|| RepoError::InvalidCursor {
                cursor: raw.to_string(),
            }),
    }
}

fn listing_params(
    filter: &TypeFilter,
    options: &QueryOptions,
    max_page_size: u32,
) -> Result<Vec<(&'static str, String)>, RepoError> {
    let page_number = parse_page_cursor(options.cursor.as_deref())?;
    let page_size = options.page_size.clamp(1, max_page_size);

    let mut params = vec![
        ("q", type_predicate(&filter.document_type)),
        ("orderings", LISTING_ORDERING.to_string()),
        ("pageSize", page_size.to_string()),
        ("page", page_number.to_string()),
    ];
    if let Some(fetch) = fetch_param(&filter.document_type, &options.fields) {
        params.push(("fetch", fetch));
    }
    Ok(params)
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn type_predicate(document_type: &str) -> String {
    format!("[[at(document.type,\"{}\")]]", escape(document_type))
}

fn uid_predicate(document_type: &str, uid: &str) -> String {
    format!(
        "[[at(my.{}.uid,\"{}\")]]",
        escape(document_type),
        escape(uid)
    )
}

fn fetch_param(document_type: &str, fields: &[String]) -> Option<String> {
    if fields.is_empty() {
        return None;
    }
    Some(
        fields
            .iter()
            .map(|field| format!("{document_type}.{field}"))
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn redact(url: &Url) -> Url {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == "access_token" {
                "***".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted
}
