//! HTTP client for a running site's listing endpoint.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};

use crate::application::listing::{ListingError, ListingPage};
use crate::application::load_more::PageSource;
use crate::application::pagination::Page;
use crate::domain::posts::PostSummary;

use super::error::InfraError;

const LISTING_PATH: &str = "api/posts";

#[derive(Clone, Debug)]
pub struct ListingClient {
    client: Client,
    listing_url: Url,
}

impl ListingClient {
    pub fn new(site: &str) -> Result<Self, InfraError> {
        let base = Url::parse(site)
            .and_then(|url| url.join("/"))
            .map_err(|err| InfraError::configuration(format!("invalid site URL `{site}`: {err}")))?;
        let listing_url = base
            .join(LISTING_PATH)
            .map_err(|err| InfraError::configuration(err.to_string()))?;
        let client = Client::builder()
            .user_agent(concat!("spacetraveling-browse/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| InfraError::http(err.to_string()))?;
        Ok(Self {
            client,
            listing_url,
        })
    }

    pub async fn first_page(&self) -> Result<ListingPage, ListingError> {
        self.fetch(None).await
    }

    fn page_url(&self, cursor: Option<&str>) -> Url {
        let mut url = self.listing_url.clone();
        if let Some(cursor) = cursor {
            url.query_pairs_mut().append_pair("cursor", cursor);
        }
        url
    }

    async fn fetch(&self, cursor: Option<&str>) -> Result<ListingPage, ListingError> {
        let response = self
            .client
            .get(self.page_url(cursor))
            .send()
            .await
            .map_err(|err| ListingError::Remote(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            return Err(ListingError::InvalidCursor(
                cursor.unwrap_or_default().to_string(),
            ));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ListingError::Remote(format!("status {status} body {text}")));
        }

        response
            .json::<ListingPage>()
            .await
            .map_err(|err| ListingError::Remote(err.to_string()))
    }
}

#[async_trait]
impl PageSource for ListingClient {
    async fn fetch_page(&self, cursor: &str) -> Result<Page<PostSummary>, ListingError> {
        Ok(self.fetch(Some(cursor)).await?.page)
    }
}
