//! The worker's global scope: location, cache storage, network, cache names.

use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::cache::{CacheStorage, MemoryCacheStorage};
use crate::config::{CacheNameDetails, WorkerConfig};
use crate::error::Result;
use crate::fetch::{Fetcher, NetworkFetcher};

/// Resolved cache names for one worker scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
    prefix: String,
    suffix: String,
    precache: String,
    runtime: String,
}

impl CacheNames {
    /// Resolve names from `details`, using `location` as the default suffix.
    pub fn new(details: &CacheNameDetails, location: &Url) -> Self {
        Self {
            prefix: details.prefix.clone(),
            suffix: details
                .suffix
                .clone()
                .unwrap_or_else(|| scope_of(location).to_string()),
            precache: details.precache.clone(),
            runtime: details.runtime.clone(),
        }
    }

    fn create(&self, name: &str) -> String {
        [self.prefix.as_str(), name, self.suffix.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("-")
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Name of the precache.
    pub fn precache(&self) -> String {
        self.create(&self.precache)
    }

    /// Name of the default runtime cache.
    pub fn runtime(&self) -> String {
        self.create(&self.runtime)
    }

    /// `user` if given, else the precache name.
    pub fn precache_or(&self, user: Option<&str>) -> String {
        user.map(str::to_string).unwrap_or_else(|| self.precache())
    }

    /// `user` if given, else the runtime cache name.
    pub fn runtime_or(&self, user: Option<&str>) -> String {
        user.map(str::to_string).unwrap_or_else(|| self.runtime())
    }
}

/// Directory of the worker script, which is the default registration scope.
fn scope_of(location: &Url) -> Url {
    location.join("./").unwrap_or_else(|_| location.clone())
}

struct ScopeInner {
    location: Url,
    caches: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    cache_names: CacheNames,
}

/// Handle to the worker's globals. Cheap to clone.
#[derive(Clone)]
pub struct WorkerScope {
    inner: Arc<ScopeInner>,
}

impl WorkerScope {
    /// Create a scope with default cache names.
    pub fn new(location: Url, caches: Arc<dyn CacheStorage>, fetcher: Arc<dyn Fetcher>) -> Self {
        let cache_names = CacheNames::new(&CacheNameDetails::default(), &location);
        Self {
            inner: Arc::new(ScopeInner {
                location,
                caches,
                fetcher,
                cache_names,
            }),
        }
    }

    /// Same scope with different cache name details.
    pub fn with_cache_names(&self, details: &CacheNameDetails) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                location: self.inner.location.clone(),
                caches: self.inner.caches.clone(),
                fetcher: self.inner.fetcher.clone(),
                cache_names: CacheNames::new(details, &self.inner.location),
            }),
        }
    }

    /// Build a scope backed by in-memory caches and the network.
    pub fn from_config(config: &WorkerConfig) -> Result<Self> {
        let location = config.location()?;
        let fetcher = NetworkFetcher::new(&config.network)?;
        Ok(Self::new(location, Arc::new(MemoryCacheStorage::new()), Arc::new(fetcher))
            .with_cache_names(&config.cache_names))
    }

    /// URL of the worker script.
    pub fn location(&self) -> &Url {
        &self.inner.location
    }

    /// Registration scope (directory of the script).
    pub fn scope(&self) -> Url {
        scope_of(&self.inner.location)
    }

    pub fn caches(&self) -> &Arc<dyn CacheStorage> {
        &self.inner.caches
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.inner.fetcher
    }

    pub fn cache_names(&self) -> &CacheNames {
        &self.inner.cache_names
    }

    /// Resolve a possibly relative URL against the worker location.
    pub fn resolve(&self, url: &str) -> Result<Url> {
        Ok(self.inner.location.join(url)?)
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.inner.location.origin()
    }
}

impl fmt::Debug for WorkerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerScope")
            .field("location", &self.inner.location.as_str())
            .field("cache_names", &self.inner.cache_names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cache_names() {
        let location = Url::parse("https://example.com/app/sw.js").unwrap();
        let names = CacheNames::new(&CacheNameDetails::default(), &location);
        assert_eq!(names.precache(), "rustkit-precache-https://example.com/app/");
        assert_eq!(names.runtime(), "rustkit-runtime-https://example.com/app/");
        assert_eq!(names.precache_or(Some("mine")), "mine");
    }

    #[test]
    fn test_empty_parts_are_skipped() {
        let location = Url::parse("https://example.com/sw.js").unwrap();
        let details = CacheNameDetails {
            prefix: String::new(),
            suffix: Some(String::new()),
            ..Default::default()
        };
        let names = CacheNames::new(&details, &location);
        assert_eq!(names.precache(), "precache");
    }

    #[test]
    fn test_scope_from_config() {
        let config = WorkerConfig::from_json_str(
            r#"{"location": "https://example.com/static/sw.js", "cache_names": {"suffix": "v2"}}"#,
        )
        .unwrap();
        let scope = WorkerScope::from_config(&config).unwrap();
        assert_eq!(scope.scope().as_str(), "https://example.com/static/");
        assert_eq!(scope.cache_names().runtime(), "rustkit-runtime-v2");
        assert_eq!(
            scope.resolve("/index.html").unwrap().as_str(),
            "https://example.com/index.html"
        );
        assert!(scope.is_same_origin(&Url::parse("https://example.com/x").unwrap()));
        assert!(!scope.is_same_origin(&Url::parse("https://cdn.example.com/x").unwrap()));
    }
}
