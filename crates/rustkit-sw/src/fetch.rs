//! Network access.
//!
//! Strategies never talk to the network directly; they go through a
//! [`Fetcher`]. [`NetworkFetcher`] is the reqwest-backed implementation.

use async_trait::async_trait;
use http::header::{HeaderValue, CACHE_CONTROL, PRAGMA};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::config::NetworkConfig;
use crate::error::{Result, SwError};
use crate::http::{CacheMode, CredentialsMode, Request, Response, ResponseType};
use crate::integrity;

/// Something that can take a request to the network.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a request. Transport failures are `SwError::Network`.
    async fn fetch(&self, request: Request) -> Result<Response>;
}

/// Fetcher backed by a reqwest client.
pub struct NetworkFetcher {
    client: Client,
    /// Separate client without a cookie store for `credentials: omit`.
    anonymous: Client,
}

impl NetworkFetcher {
    /// Create a new fetcher.
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let build = |cookies: bool| {
            Client::builder()
                .user_agent(&config.user_agent)
                .timeout(Duration::from_millis(config.timeout_ms))
                .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
                .cookie_store(cookies)
                .build()
                .map_err(|e| SwError::Config(e.to_string()))
        };
        Ok(Self {
            client: build(true)?,
            anonymous: build(false)?,
        })
    }
}

#[async_trait]
impl Fetcher for NetworkFetcher {
    async fn fetch(&self, request: Request) -> Result<Response> {
        debug!(url = %request.url, method = %request.method, "Fetching from network");

        let client = match request.credentials {
            CredentialsMode::Omit => &self.anonymous,
            _ => &self.client,
        };
        let mut req_builder = client.request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        // There is no HTTP cache on this path; forward the intent upstream.
        if matches!(
            request.cache,
            CacheMode::Reload | CacheMode::NoCache | CacheMode::NoStore
        ) {
            req_builder = req_builder
                .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
                .header(PRAGMA, HeaderValue::from_static("no-cache"));
        }

        if let Some(body) = request.body.clone() {
            req_builder = req_builder.body(body);
        }

        let response = req_builder
            .send()
            .await
            .map_err(|e| SwError::network(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let final_url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| SwError::network(e.to_string()))?;

        if let Some(expected) = &request.integrity {
            if !integrity::verify(expected, &body) {
                warn!(url = %request.url, "Subresource integrity check failed");
                return Err(SwError::network(format!(
                    "integrity check failed for {}",
                    request.url
                )));
            }
        }

        trace!(
            url = %final_url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        let same_origin = final_url.origin() == request.url.origin();
        Ok(Response {
            redirected: final_url != request.url,
            url: Some(final_url),
            status: status.as_u16(),
            headers,
            body,
            response_type: if same_origin {
                ResponseType::Basic
            } else {
                ResponseType::Cors
            },
        })
    }
}
