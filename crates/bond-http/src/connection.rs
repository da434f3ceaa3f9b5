// # API Connection
//
// Authenticated HTTP access to the management server. Every request
// carries basic auth. Raw calls return non-success statuses to the caller;
// the JSON helpers turn them into `Error::HttpStatus`.

use std::time::Duration;

use bond_core::traits::HttpResponse;
use bond_core::{BondConfig, Error, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::de::DeserializeOwned;

use crate::dto::Collection;

/// Default HTTP timeout for API requests (30 seconds)
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const JSON: &str = "application/json";

/// Authenticated access to the management server REST API
///
/// Cheap to clone: clones share the underlying connection pool.
///
/// # Security
///
/// The Debug implementation does NOT expose the password.
#[derive(Clone)]
pub struct ApiConnection {
    base: String,
    user: String,
    /// ⚠️ NEVER log this value
    password: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for ApiConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConnection")
            .field("base", &self.base)
            .field("user", &self.user)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

impl ApiConnection {
    /// Create a connection
    ///
    /// `base` is the API root, e.g. `https://m.example.com/api`.
    pub fn new(
        base: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        Self::with_timeout(base, user, password, DEFAULT_HTTP_TIMEOUT)
    }

    /// Create a connection with a custom request timeout
    pub fn with_timeout(
        base: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base = base.into();
        if base.trim().is_empty() {
            return Err(Error::config("API base URL cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            user: user.into(),
            password: password.into(),
            client,
        })
    }

    /// Create a connection from the client configuration
    pub fn from_config(config: &BondConfig) -> Result<Self> {
        Self::new(&config.server, &config.user, &config.password)
    }

    /// API root without a trailing slash
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Absolute URL for `path`
    ///
    /// Absolute hrefs (as found in links) are returned unchanged.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base, path.trim_start_matches('/'))
        }
    }

    /// GET `url` as JSON, returning status and body
    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.get_as(url, JSON).await
    }

    /// GET `url` accepting `media_type`
    pub async fn get_as(&self, url: &str, media_type: &str) -> Result<HttpResponse> {
        tracing::trace!("GET {}", url);
        let response = self
            .client
            .get(url)
            .basic_auth(&self.user, Some(&self.password))
            .header(ACCEPT, media_type)
            .send()
            .await
            .map_err(|e| Error::http(format!("GET {} failed: {}", url, e)))?;
        Self::read(url, response).await
    }

    /// PUT a JSON `body` to `url`
    pub async fn put(&self, url: &str, body: &str) -> Result<HttpResponse> {
        tracing::trace!("PUT {}", url);
        let response = self
            .client
            .put(url)
            .basic_auth(&self.user, Some(&self.password))
            .header(ACCEPT, JSON)
            .header(CONTENT_TYPE, JSON)
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| Error::http(format!("PUT {} failed: {}", url, e)))?;
        Self::read(url, response).await
    }

    /// GET `url` and decode a successful JSON body
    ///
    /// A non-success status is returned as `Error::HttpStatus`.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.get(url).await?;
        if !response.is_success() {
            return Err(Error::http_status(
                format!("Request failed: {}", response.body.trim()),
                url,
                response.status,
            ));
        }
        serde_json::from_str(&response.body)
            .map_err(|e| Error::http(format!("Failed to parse response from {}: {}", url, e)))
    }

    /// Every element of a paginated collection, following `next` links
    pub async fn get_all<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url.to_string());

        while let Some(page_url) = next.take() {
            let page: Collection<T> = self.get_json(&page_url).await?;
            next = page
                .next()
                .map(|href| self.url(href))
                .filter(|href| *href != page_url);
            items.extend(page.collection);
        }
        Ok(items)
    }

    async fn read(url: &str, response: reqwest::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("Failed to read response from {}: {}", url, e)))?;
        Ok(HttpResponse::new(status, body))
    }
}
