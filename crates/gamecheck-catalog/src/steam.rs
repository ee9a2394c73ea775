//! Steam community app search provider.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderValue};
use reqwest::{Client, Request, Url};
use serde::Deserialize;

use crate::traits::{CatalogError, CatalogProvider, SearchResult};
use gamecheck_core::config::CatalogConfig;

/// Steam community search provider.
pub struct SteamCatalog {
    client: Client,
    search_url: Url,
    accept_language: HeaderValue,
}

impl SteamCatalog {
    /// Create a new Steam provider.
    ///
    /// # Errors
    ///
    /// Returns error if the search URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let search_url = Url::parse(&config.search_url)
            .map_err(|e| CatalogError::Config(format!("Invalid search URL: {e}")))?;
        if search_url.cannot_be_a_base() {
            return Err(CatalogError::Config(format!(
                "Search URL cannot take a path: {search_url}"
            )));
        }

        let accept_language = HeaderValue::from_str(&config.accept_language)
            .map_err(|e| CatalogError::Config(format!("Invalid Accept-Language: {e}")))?;

        let client = Client::builder().user_agent(&config.user_agent).build()?;

        Ok(Self {
            client,
            search_url,
            accept_language,
        })
    }

    /// URL for a query; the query becomes a single percent-encoded segment.
    fn url_for(&self, query: &str) -> Url {
        let mut url = self.search_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(query);
        }
        url
    }

    fn request_for(&self, query: &str) -> Result<Request, CatalogError> {
        Ok(self
            .client
            .get(self.url_for(query))
            .header(ACCEPT, "application/json")
            .header(ACCEPT_LANGUAGE, self.accept_language.clone())
            .build()?)
    }
}

#[async_trait]
impl CatalogProvider for SteamCatalog {
    fn name(&self) -> &str {
        "steam"
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, CatalogError> {
        let request = self.request_for(query)?;
        let response = self.client.execute(request).await?;

        if !response.status().is_success() {
            return Err(CatalogError::Status {
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await?;
        parse_search_payload(&body)
    }
}

/// Raw search hit as returned by Steam.
#[derive(Debug, Deserialize)]
struct RawApp {
    appid: serde_json::Value,
    #[serde(default)]
    name: String,
    #[serde(default)]
    icon: String,
}

/// Decode a search payload, skipping hits without a numeric app ID.
fn parse_search_payload(body: &[u8]) -> Result<Vec<SearchResult>, CatalogError> {
    let raw: Vec<RawApp> = serde_json::from_slice(body)?;

    Ok(raw
        .into_iter()
        .filter_map(|app| {
            let app_id = match &app.appid {
                serde_json::Value::String(s) => s.trim().parse().ok(),
                serde_json::Value::Number(n) => n.as_u64(),
                _ => None,
            }?;
            Some(SearchResult {
                app_id,
                name: app.name,
                icon: app.icon,
            })
        })
        .collect())
}
