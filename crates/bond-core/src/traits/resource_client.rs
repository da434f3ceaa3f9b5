// # Resource Client Trait
//
// Authenticated access to remote entities for the write-back path and the
// startup version check. Non-success statuses are returned, not raised:
// callers decide how each status is reported.

use async_trait::async_trait;

/// Status and body of a remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body (may be empty)
    pub body: String,
}

impl HttpResponse {
    /// Create a response
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for resource client implementations
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// GET the entity at `link`
    ///
    /// `Err` only for transport failures.
    async fn fetch_entity(&self, link: &str) -> Result<HttpResponse, crate::Error>;

    /// PUT `body` to the entity at `link`
    async fn write_entity(&self, link: &str, body: &str) -> Result<HttpResponse, crate::Error>;

    /// API version reported by the server
    async fn api_version(&self) -> Result<String, crate::Error>;
}
