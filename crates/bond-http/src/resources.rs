// # Resource Client
//
// Raw fetch and write of entity documents.

use async_trait::async_trait;
use bond_core::traits::{HttpResponse, ResourceClient};
use bond_core::{Error, Result};

use crate::connection::ApiConnection;

const VERSION_PATH: &str = "version";
const TEXT: &str = "text/plain";

/// `ResourceClient` over the REST API
///
/// Returns status and body as received; callers decide what a non-success
/// status means.
#[derive(Debug, Clone)]
pub struct HttpResourceClient {
    conn: ApiConnection,
}

impl HttpResourceClient {
    pub fn new(conn: ApiConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ResourceClient for HttpResourceClient {
    async fn fetch_entity(&self, link: &str) -> Result<HttpResponse> {
        self.conn.get(&self.conn.url(link)).await
    }

    async fn write_entity(&self, link: &str, body: &str) -> Result<HttpResponse> {
        self.conn.put(&self.conn.url(link), body).await
    }

    async fn api_version(&self) -> Result<String> {
        let url = self.conn.url(VERSION_PATH);
        let response = self.conn.get_as(&url, TEXT).await?;
        if !response.is_success() {
            return Err(Error::http_status(
                "Failed to retrieve the API version",
                url,
                response.status,
            ));
        }
        Ok(response.body.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::CannedServer;

    #[tokio::test]
    async fn test_api_version_is_trimmed() {
        let server = CannedServer::start().await;
        server.route("GET /api/version", 200, "4.2\n".to_string());
        let client = HttpResourceClient::new(ApiConnection::new(server.base(), "u", "p").unwrap());

        assert_eq!(client.api_version().await.unwrap(), "4.2");
    }

    #[tokio::test]
    async fn test_api_version_failure_is_an_error() {
        let server = CannedServer::start().await;
        server.route("GET /api/version", 503, String::new());
        let client = HttpResourceClient::new(ApiConnection::new(server.base(), "u", "p").unwrap());

        assert!(matches!(
            client.api_version().await,
            Err(Error::HttpStatus { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_returns_non_success_status() {
        let server = CannedServer::start().await;
        let client = HttpResourceClient::new(ApiConnection::new(server.base(), "u", "p").unwrap());

        let response = client.fetch_entity("/cloud/vms/9/metadata").await.unwrap();
        assert_eq!(response.status, 404);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_write_sends_body() {
        let server = CannedServer::start().await;
        server.route("PUT /api/cloud/vms/1/metadata", 200, "{}".to_string());
        let client = HttpResourceClient::new(ApiConnection::new(server.base(), "u", "p").unwrap());

        let body = r#"{"metadata":{"metadata":{}}}"#;
        let response = client
            .write_entity("/cloud/vms/1/metadata", body)
            .await
            .unwrap();

        assert!(response.is_success());
        let hits = server.hits();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "PUT /api/cloud/vms/1/metadata");
        assert_eq!(hits[0].1, body);
    }
}
