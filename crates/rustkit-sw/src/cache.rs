//! Cache API: named caches of request/response pairs.
//!
//! ```text
//! CacheStorage (caches)
//!     └── Cache
//!             └── Request → Response
//! ```
//!
//! The engine only talks to the [`CacheStorage`] and [`Cache`] traits.
//! [`MemoryCacheStorage`] is the in-process implementation.

use async_trait::async_trait;
use http::Method;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;
use url::Url;

use crate::error::{Result, SwError};
use crate::http::{Request, Response};

/// Query parameter carrying a precache revision inside a cache key.
pub const REVISION_SEARCH_PARAM: &str = "__SW_REVISION__";

/// Options controlling how a stored request is matched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheQueryOptions {
    /// Ignore the query string when comparing URLs.
    pub ignore_search: bool,
    /// Match regardless of request method.
    pub ignore_method: bool,
    /// Ignore `Vary` headers on stored responses.
    pub ignore_vary: bool,
    /// Restrict a storage-wide lookup to one cache.
    pub cache_name: Option<String>,
}

impl CacheQueryOptions {
    /// Same options, restricted to `cache_name`.
    pub fn in_cache(&self, cache_name: &str) -> Self {
        Self {
            cache_name: Some(cache_name.to_string()),
            ..self.clone()
        }
    }
}

/// A named cache.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Cache name.
    fn name(&self) -> &str;

    /// Find the first stored response matching `request`.
    async fn match_request(
        &self,
        request: &Request,
        options: &CacheQueryOptions,
    ) -> Result<Option<Response>>;

    /// Store `response` under `request`, replacing an existing entry.
    async fn put(&self, request: &Request, response: Response) -> Result<()>;

    /// Delete every entry matching `request`.
    async fn delete(&self, request: &Request, options: &CacheQueryOptions) -> Result<bool>;

    /// Stored requests, optionally only those matching `request`.
    async fn keys(
        &self,
        request: Option<&Request>,
        options: &CacheQueryOptions,
    ) -> Result<Vec<Request>>;
}

/// Cache storage (the `caches` global).
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache, creating it if it doesn't exist.
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>>;

    /// Check if a cache exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Delete a cache.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// All cache names, in creation order.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Match across caches in creation order, or in `options.cache_name` only.
    async fn match_request(
        &self,
        request: &Request,
        options: &CacheQueryOptions,
    ) -> Result<Option<Response>> {
        if let Some(name) = &options.cache_name {
            if !self.has(name).await? {
                return Ok(None);
            }
            return self.open(name).await?.match_request(request, options).await;
        }
        for name in self.keys().await? {
            let response = self.open(&name).await?.match_request(request, options).await?;
            if response.is_some() {
                return Ok(response);
            }
        }
        Ok(None)
    }
}

/// Whether a stored request satisfies a query.
pub fn request_matches(stored: &Request, query: &Request, options: &CacheQueryOptions) -> bool {
    if !options.ignore_method && query.method != Method::GET && query.method != Method::HEAD {
        return false;
    }
    let mut a = stored.url.clone();
    let mut b = query.url.clone();
    a.set_fragment(None);
    b.set_fragment(None);
    if options.ignore_search {
        a.set_query(None);
        b.set_query(None);
    }
    a == b
}

/// Remove the named query parameters from `url`.
///
/// The URL is returned unchanged when none of the parameters is present.
pub fn strip_params(url: &Url, params: &[&str]) -> Url {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !pairs.iter().any(|(k, _)| params.contains(&k.as_str())) {
        return url.clone();
    }
    let kept: Vec<_> = pairs
        .into_iter()
        .filter(|(k, _)| !params.contains(&k.as_str()))
        .collect();
    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}

/// Match `request` in `cache`, ignoring the given query parameters on both
/// the lookup and the stored keys.
pub async fn cache_match_ignore_params(
    cache: &dyn Cache,
    request: &Request,
    ignore_params: &[&str],
    options: &CacheQueryOptions,
) -> Result<Option<Response>> {
    let stripped_url = strip_params(&request.url, ignore_params);
    if stripped_url == request.url {
        return cache.match_request(request, options).await;
    }

    let keys_options = CacheQueryOptions {
        ignore_search: true,
        ..options.clone()
    };
    for key in cache.keys(Some(request), &keys_options).await? {
        if strip_params(&key.url, ignore_params) == stripped_url {
            return cache.match_request(&key, options).await;
        }
    }
    Ok(None)
}

// ==================== In-memory implementation ====================

#[derive(Debug, Default)]
struct QuotaState {
    limit: Option<usize>,
    used: usize,
}

/// An in-memory cache.
///
/// Once its storage deletes it, a cache still held elsewhere keeps working
/// but no longer counts against the storage quota.
pub struct MemoryCache {
    name: String,
    entries: Mutex<Vec<(Request, Response)>>,
    quota: Arc<Mutex<QuotaState>>,
    /// Set under the `entries` lock when the storage drops this cache.
    detached: AtomicBool,
}

impl MemoryCache {
    fn new(name: &str, quota: Arc<Mutex<QuotaState>>) -> Self {
        Self {
            name: name.to_string(),
            entries: Mutex::new(Vec::new()),
            quota,
            detached: AtomicBool::new(false),
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop charging this cache to the shared quota and return the bytes
    /// it held.
    fn detach(&self) -> usize {
        let entries = self.entries.lock();
        if self.detached.swap(true, Ordering::SeqCst) {
            return 0;
        }
        entries.iter().map(|(_, r)| r.body.len()).sum()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(
        &self,
        request: &Request,
        options: &CacheQueryOptions,
    ) -> Result<Option<Response>> {
        let entries = self.entries.lock();
        Ok(entries
            .iter()
            .find(|(stored, _)| request_matches(stored, request, options))
            .map(|(_, response)| response.clone()))
    }

    async fn put(&self, request: &Request, response: Response) -> Result<()> {
        if request.method != Method::GET {
            return Err(SwError::NonGetRequest {
                url: request.url.to_string(),
                method: request.method.clone(),
            });
        }
        let mut key = request.clone();
        key.url.set_fragment(None);

        let mut entries = self.entries.lock();
        let existing = entries
            .iter()
            .position(|(stored, _)| stored.url == key.url && stored.method == key.method);
        let replaced = existing.map(|i| entries[i].1.body.len()).unwrap_or(0);

        if !self.detached.load(Ordering::SeqCst) {
            let mut quota = self.quota.lock();
            let used = quota.used - replaced + response.body.len();
            if let Some(limit) = quota.limit {
                if used > limit {
                    return Err(SwError::QuotaExceeded(format!(
                        "storing {} needs {} bytes, quota is {}",
                        key.url, used, limit
                    )));
                }
            }
            quota.used = used;
        }

        trace!(cache = %self.name, url = %key.url, "Cache put");
        match existing {
            Some(i) => entries[i] = (key, response),
            None => entries.push((key, response)),
        }
        Ok(())
    }

    async fn delete(&self, request: &Request, options: &CacheQueryOptions) -> Result<bool> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        let mut freed = 0;
        entries.retain(|(stored, response)| {
            let hit = request_matches(stored, request, options);
            if hit {
                freed += response.body.len();
            }
            !hit
        });
        if !self.detached.load(Ordering::SeqCst) {
            let mut quota = self.quota.lock();
            quota.used = quota.used.saturating_sub(freed);
        }
        Ok(entries.len() != before)
    }

    async fn keys(
        &self,
        request: Option<&Request>,
        options: &CacheQueryOptions,
    ) -> Result<Vec<Request>> {
        let entries = self.entries.lock();
        Ok(entries
            .iter()
            .filter(|(stored, _)| request.map_or(true, |q| request_matches(stored, q, options)))
            .map(|(stored, _)| stored.clone())
            .collect())
    }
}

/// In-memory cache storage with an optional byte quota shared by all caches.
#[derive(Default)]
pub struct MemoryCacheStorage {
    caches: Mutex<Vec<Arc<MemoryCache>>>,
    quota: Arc<Mutex<QuotaState>>,
}

impl MemoryCacheStorage {
    /// Create new, unbounded cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create cache storage that rejects writes beyond `bytes` of response bodies.
    pub fn with_quota(bytes: usize) -> Self {
        let storage = Self::default();
        storage.quota.lock().limit = Some(bytes);
        storage
    }

    /// Bytes of response bodies currently stored.
    pub fn usage(&self) -> usize {
        self.quota.lock().used
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<Arc<MemoryCache>> {
        self.caches.lock().iter().find(|c| c.name == name).cloned()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn Cache>> {
        let mut caches = self.caches.lock();
        if let Some(cache) = caches.iter().find(|c| c.name == name) {
            return Ok(cache.clone());
        }
        let cache = Arc::new(MemoryCache::new(name, self.quota.clone()));
        caches.push(cache.clone());
        Ok(cache)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.caches.lock().iter().any(|c| c.name == name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut caches = self.caches.lock();
        let Some(index) = caches.iter().position(|c| c.name == name) else {
            return Ok(false);
        };
        let removed = caches.remove(index);
        let freed = removed.detach();
        let mut quota = self.quota.lock();
        quota.used = quota.used.saturating_sub(freed);
        Ok(true)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.caches.lock().iter().map(|c| c.name.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_cache_put_and_match() {
        let storage = MemoryCacheStorage::new();
        let cache = storage.open("v1").await.unwrap();

        cache
            .put(&request("https://example.com/style.css"), Response::ok_with("body{}"))
            .await
            .unwrap();

        let options = CacheQueryOptions::default();
        assert!(cache
            .match_request(&request("https://example.com/style.css"), &options)
            .await
            .unwrap()
            .is_some());
        assert!(cache
            .match_request(&request("https://example.com/other.css"), &options)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cache_match_ignores_fragment_and_optionally_search() {
        let storage = MemoryCacheStorage::new();
        let cache = storage.open("v1").await.unwrap();
        cache
            .put(&request("https://example.com/a?v=1"), Response::ok_with("a"))
            .await
            .unwrap();

        let exact = CacheQueryOptions::default();
        assert!(cache
            .match_request(&request("https://example.com/a?v=1#top"), &exact)
            .await
            .unwrap()
            .is_some());
        assert!(cache
            .match_request(&request("https://example.com/a"), &exact)
            .await
            .unwrap()
            .is_none());

        let ignore_search = CacheQueryOptions {
            ignore_search: true,
            ..Default::default()
        };
        assert!(cache
            .match_request(&request("https://example.com/a?v=2"), &ignore_search)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_cache_delete_and_keys() {
        let storage = MemoryCacheStorage::new();
        let cache = storage.open("test").await.unwrap();
        let options = CacheQueryOptions::default();
        cache.put(&request("https://example.com/a.js"), Response::ok_with("a")).await.unwrap();
        cache.put(&request("https://example.com/b.js"), Response::ok_with("b")).await.unwrap();

        let keys = cache.keys(None, &options).await.unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].url.as_str(), "https://example.com/a.js");

        assert!(cache.delete(&request("https://example.com/a.js"), &options).await.unwrap());
        assert!(!cache.delete(&request("https://example.com/a.js"), &options).await.unwrap());
        assert_eq!(cache.keys(None, &options).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cache_storage() {
        let storage = MemoryCacheStorage::new();

        assert!(!storage.has("v1").await.unwrap());
        storage.open("v1").await.unwrap();
        assert!(storage.has("v1").await.unwrap());

        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.has("v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_storage_match_respects_cache_name() {
        let storage = MemoryCacheStorage::new();
        let a = storage.open("a").await.unwrap();
        storage.open("b").await.unwrap();
        a.put(&request("https://example.com/x"), Response::ok_with("x")).await.unwrap();

        let any = CacheQueryOptions::default();
        assert!(storage.match_request(&request("https://example.com/x"), &any).await.unwrap().is_some());
        let only_b = any.in_cache("b");
        assert!(storage.match_request(&request("https://example.com/x"), &only_b).await.unwrap().is_none());
        let missing = any.in_cache("nope");
        assert!(storage.match_request(&request("https://example.com/x"), &missing).await.unwrap().is_none());
        assert!(!storage.has("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_quota_exceeded() {
        let storage = MemoryCacheStorage::with_quota(8);
        let cache = storage.open("small").await.unwrap();

        cache.put(&request("https://example.com/a"), Response::ok_with("12345")).await.unwrap();
        let err = cache
            .put(&request("https://example.com/b"), Response::ok_with("123456"))
            .await
            .unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(storage.usage(), 5);

        // Replacing an entry only counts the difference.
        cache.put(&request("https://example.com/a"), Response::ok_with("12345678")).await.unwrap();
        assert_eq!(storage.usage(), 8);
    }

    #[tokio::test]
    async fn test_handle_outliving_deleted_cache_leaves_quota_alone() {
        let storage = MemoryCacheStorage::with_quota(16);
        let old = storage.open("old").await.unwrap();
        let a = request("https://example.com/a");
        old.put(&a, Response::ok_with("0123456789")).await.unwrap();
        assert_eq!(storage.usage(), 10);

        assert!(storage.delete("old").await.unwrap());
        assert_eq!(storage.usage(), 0);

        let options = CacheQueryOptions::default();
        assert!(old.delete(&a, &options).await.unwrap());
        old.put(&request("https://example.com/b"), Response::ok_with("0123456789"))
            .await
            .unwrap();
        assert_eq!(storage.usage(), 0);

        let current = storage.open("old").await.unwrap();
        current
            .put(&request("https://example.com/c"), Response::ok_with("0123456789abcdef"))
            .await
            .unwrap();
        assert_eq!(storage.usage(), 16);
    }

    #[tokio::test]
    async fn test_put_rejects_non_get() {
        let storage = MemoryCacheStorage::new();
        let cache = storage.open("v1").await.unwrap();
        let post = Request::new(Method::POST, Url::parse("https://example.com/api").unwrap());
        let err = cache.put(&post, Response::ok_with("")).await.unwrap_err();
        assert!(matches!(err, SwError::NonGetRequest { .. }));
    }

    #[test]
    fn test_strip_params() {
        let url = Url::parse("https://example.com/a?__SW_REVISION__=1&v=2").unwrap();
        assert_eq!(
            strip_params(&url, &[REVISION_SEARCH_PARAM]).as_str(),
            "https://example.com/a?v=2"
        );
        let only = Url::parse("https://example.com/a?__SW_REVISION__=1").unwrap();
        assert_eq!(strip_params(&only, &[REVISION_SEARCH_PARAM]).as_str(), "https://example.com/a");
        let untouched = Url::parse("https://example.com/a?x=1").unwrap();
        assert_eq!(strip_params(&untouched, &[REVISION_SEARCH_PARAM]), untouched);
    }

    #[tokio::test]
    async fn test_cache_match_ignore_params() {
        let storage = MemoryCacheStorage::new();
        let cache = storage.open("v1").await.unwrap();
        cache
            .put(&request("https://example.com/a?__SW_REVISION__=1"), Response::ok_with("old"))
            .await
            .unwrap();

        let found = cache_match_ignore_params(
            cache.as_ref(),
            &request("https://example.com/a?__SW_REVISION__=2"),
            &[REVISION_SEARCH_PARAM],
            &CacheQueryOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(found.unwrap().body, "old");
    }
}
