use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use super::entry::{Request, Response};
use crate::error::NetworkError;

/// HTTP request timeout in seconds.
/// Asset fetches are small; anything slower than this is treated as offline.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Anything that can resolve a request against the site's origin.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// Network access over HTTP, resolving request paths against a fixed origin.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpNetwork {
    client: Client,
    origin: Url,
}

impl HttpNetwork {
    pub fn new(origin: &str) -> Result<Self, NetworkError> {
        let origin = Url::parse(origin).map_err(|e| NetworkError::InvalidUrl {
            url: origin.to_string(),
            reason: e.to_string(),
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, origin })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Requests never leave the origin, even for scheme-relative paths like `//host/x`
    fn resolve(&self, path: &str) -> Result<Url, NetworkError> {
        let url = self.origin.join(path).map_err(|e| NetworkError::InvalidUrl {
            url: path.to_string(),
            reason: e.to_string(),
        })?;
        if url.origin() != self.origin.origin() {
            return Err(NetworkError::InvalidUrl {
                url: path.to_string(),
                reason: format!("outside origin {}", self.origin.origin().ascii_serialization()),
            });
        }
        Ok(url)
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let url = self.resolve(&request.path)?;
        debug!(method = %request.method, url = %url, "Network fetch");

        let response = self
            .client
            .request(request.method.clone(), url)
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
