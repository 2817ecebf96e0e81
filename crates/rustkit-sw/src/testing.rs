//! Test doubles for the network and cache storage.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::cache::{Cache, CacheQueryOptions, CacheStorage, MemoryCacheStorage};
use crate::error::{Result, SwError};
use crate::fetch::Fetcher;
use crate::http::{Request, Response};
use crate::scope::WorkerScope;

/// Script location used by [`test_scope`].
pub const TEST_LOCATION: &str = "https://example.com/sw.js";

#[derive(Clone)]
enum StubReply {
    Respond(Response),
    Fail(String),
    Delay(Duration, Response),
}

/// Fetcher answering from a table of canned replies keyed by URL.
///
/// Unknown URLs fail with a network error. Every request is recorded.
#[derive(Default)]
pub struct StubFetcher {
    replies: Mutex<HashMap<String, StubReply>>,
    requests: Mutex<Vec<Request>>,
}

impl StubFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url: &str, response: Response) {
        self.replies
            .lock()
            .insert(url.to_string(), StubReply::Respond(response));
    }

    /// Respond with `200 OK` and `body`.
    pub fn respond_ok(&self, url: &str, body: &'static str) {
        self.respond(url, Response::ok_with(body));
    }

    pub fn fail(&self, url: &str, message: &str) {
        self.replies
            .lock()
            .insert(url.to_string(), StubReply::Fail(message.to_string()));
    }

    /// Respond after `delay`.
    pub fn delay(&self, url: &str, delay: Duration, response: Response) {
        self.replies
            .lock()
            .insert(url.to_string(), StubReply::Delay(delay, response));
    }

    /// All requests seen so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.as_str() == url)
            .count()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: Request) -> Result<Response> {
        let url = request.url.clone();
        self.requests.lock().push(request);
        let reply = self.replies.lock().get(url.as_str()).cloned();
        let response = match reply {
            Some(StubReply::Respond(response)) => response,
            Some(StubReply::Delay(delay, response)) => {
                tokio::time::sleep(delay).await;
                response
            }
            Some(StubReply::Fail(message)) => return Err(SwError::Network(message)),
            None => return Err(SwError::Network(format!("no stub for {url}"))),
        };
        Ok(match response.url {
            Some(_) => response,
            None => response.with_url(url),
        })
    }
}

/// Cache storage whose caches are always empty and fail every write.
pub struct FailingCacheStorage {
    error: SwError,
}

impl FailingCacheStorage {
    pub fn new(error: SwError) -> Arc<Self> {
        Arc::new(Self { error })
    }
}

struct FailingCache {
    name: String,
    error: SwError,
}

#[async_trait]
impl Cache for FailingCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(
        &self,
        _request: &Request,
        _options: &CacheQueryOptions,
    ) -> Result<Option<Response>> {
        Ok(None)
    }

    async fn put(&self, _request: &Request, _response: Response) -> Result<()> {
        Err(self.error.clone())
    }

    async fn delete(&self, _request: &Request, _options: &CacheQueryOptions) -> Result<bool> {
        Ok(false)
    }

    async fn keys(
        &self,
        _request: Option<&Request>,
        _options: &CacheQueryOptions,
    ) -> Result<Vec<Request>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl CacheStorage for FailingCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>> {
        Ok(Arc::new(FailingCache {
            name: name.to_string(),
            error: self.error.clone(),
        }))
    }

    async fn has(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    async fn delete(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// A scope at [`TEST_LOCATION`] backed by in-memory caches and `fetcher`.
pub fn test_scope(fetcher: Arc<StubFetcher>) -> (WorkerScope, Arc<MemoryCacheStorage>) {
    let caches = Arc::new(MemoryCacheStorage::new());
    let scope = WorkerScope::new(test_location(), caches.clone(), fetcher);
    (scope, caches)
}

/// Parse the test location.
pub fn test_location() -> Url {
    Url::parse(TEST_LOCATION).expect("test location is a valid URL")
}

/// Resolve `path` against the test location.
pub fn test_url(path: &str) -> Url {
    test_location().join(path).expect("test path resolves")
}
