//! reqwest-backed [`Network`] implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, trace};
use url::Url;

use crate::{NetError, Network, Request, Response, ResponseKind};

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Timeout applied by the transport itself.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: "webchordr-sw/0.1".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Fetches requests over HTTP and tags each response relative to `origin`.
pub struct HttpNetwork {
    client: Client,
    origin: Url,
    config: LoaderConfig,
}

impl HttpNetwork {
    /// Create a network for the worker scope `origin`.
    pub fn new(origin: Url, config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(origin = %origin, "HttpNetwork initialized");

        Ok(Self {
            client,
            origin,
            config,
        })
    }

    /// The origin responses are compared against.
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn kind_for(&self, requested: &Url, received: &Url) -> ResponseKind {
        if received.origin() != self.origin.origin() {
            ResponseKind::Opaque
        } else if requested != received {
            ResponseKind::Redirect
        } else {
            ResponseKind::Basic
        }
    }

    fn map_error(&self, error: reqwest::Error) -> NetError {
        if error.is_timeout() {
            NetError::Timeout(self.config.default_timeout)
        } else if error.is_builder() {
            NetError::InvalidUrl(error.to_string())
        } else {
            NetError::Http(error)
        }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }

        let response = req_builder.send().await.map_err(|e| self.map_error(e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let kind = self.kind_for(&request.url, &url);

        let body = response.bytes().await.map_err(|e| self.map_error(e))?;

        trace!(
            url = %url,
            status = %status,
            kind = ?kind,
            body_len = body.len(),
            "Response received"
        );

        let mut response = Response::new(url, status, kind, body);
        response.headers = headers;

        Ok(response)
    }
}
