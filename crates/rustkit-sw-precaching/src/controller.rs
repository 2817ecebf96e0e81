//! The precache controller: manifest bookkeeping plus the install and
//! activate steps of a worker version.

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use rustkit_sw::event::wait_until;
use rustkit_sw::strategies::plugin::same_plugin;
use rustkit_sw::strategies::StrategyPlugin;
use rustkit_sw::{
    handler_fn, CacheMode, CacheQueryOptions, CredentialsMode, ExtendableEvent, HandlerOptions,
    Request, Response, Result, RouteHandler, RouteHandlerOptions, RouteParams, Strategy, SwError,
    WorkerScope,
};

use crate::cache_key::{create_cache_key, CacheKey};
use crate::manifest::PrecacheEntry;
use crate::plugins::{PrecacheCacheKeyPlugin, PrecacheInstallReportPlugin};
use crate::strategy::{PrecacheStrategy, PrecacheStrategyOptions};

/// Route param carrying the cache key of a precached request.
pub(crate) const CACHE_KEY_PARAM: &str = "cacheKey";
/// Route param carrying the manifest integrity of a precached request.
pub(crate) const INTEGRITY_PARAM: &str = "integrity";

/// URL, cache key and integrity lookups for the current manifest.
#[derive(Debug, Default)]
pub(crate) struct ManifestIndex {
    urls_to_cache_keys: IndexMap<String, String>,
    urls_to_cache_modes: HashMap<String, CacheMode>,
    cache_keys_to_integrities: HashMap<String, String>,
}

impl ManifestIndex {
    pub(crate) fn cache_key_for(&self, url: &str) -> Option<&str> {
        self.urls_to_cache_keys.get(url).map(String::as_str)
    }

    pub(crate) fn integrity_for(&self, cache_key: &str) -> Option<&str> {
        self.cache_keys_to_integrities
            .get(cache_key)
            .map(String::as_str)
    }
}

pub(crate) type SharedManifest = Arc<RwLock<ManifestIndex>>;

/// URLs written and skipped by one install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallResult {
    pub updated_urls: Vec<String>,
    pub not_updated_urls: Vec<String>,
}

/// Cache keys removed by one activate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    pub deleted_urls: Vec<String>,
}

/// Construction options for [`PrecacheController`].
#[derive(Clone)]
pub struct PrecacheControllerOptions {
    /// Defaults to the scope's precache name.
    pub cache_name: Option<String>,
    pub plugins: Vec<Arc<dyn StrategyPlugin>>,
    /// Serve precache misses from the network outside of install.
    pub fallback_to_network: bool,
}

impl Default for PrecacheControllerOptions {
    fn default() -> Self {
        Self {
            cache_name: None,
            plugins: Vec::new(),
            fallback_to_network: true,
        }
    }
}

/// Owns the precache manifest and the strategy that fills and serves it.
pub struct PrecacheController {
    scope: WorkerScope,
    strategy: Arc<PrecacheStrategy>,
    manifest: SharedManifest,
}

impl PrecacheController {
    pub fn new(scope: &WorkerScope, options: PrecacheControllerOptions) -> Arc<Self> {
        let manifest = SharedManifest::default();

        let mut plugins = options.plugins;
        plugins.push(Arc::new(PrecacheCacheKeyPlugin::new(Arc::clone(&manifest))));

        let strategy = PrecacheStrategy::new(
            scope,
            PrecacheStrategyOptions {
                cache_name: options.cache_name,
                plugins,
                fallback_to_network: options.fallback_to_network,
                ..Default::default()
            },
        );

        Arc::new(Self {
            scope: scope.clone(),
            strategy: Arc::new(strategy),
            manifest,
        })
    }

    pub fn scope(&self) -> &WorkerScope {
        &self.scope
    }

    /// The strategy serving precached responses.
    pub fn strategy(&self) -> &Arc<PrecacheStrategy> {
        &self.strategy
    }

    /// Add entries to the manifest.
    ///
    /// Adding the same entry twice is a no-op. Fails if a URL maps to two
    /// different cache keys, or a cache key to two different integrities.
    pub fn add_to_cache_list(&self, entries: impl IntoIterator<Item = PrecacheEntry>) -> Result<()> {
        let location = self.scope.location();
        let mut unrevisioned = Vec::new();
        let mut manifest = self.manifest.write();

        for entry in entries {
            if entry.revision().is_none() {
                unrevisioned.push(entry.url().to_string());
            }

            let CacheKey { cache_key, url } = create_cache_key(&entry, location)?;
            let (url, cache_key) = (url.to_string(), cache_key.to_string());
            let cache_mode = if entry.revision().is_some() {
                CacheMode::Reload
            } else {
                CacheMode::Default
            };

            if let Some(existing) = manifest.urls_to_cache_keys.get(&url) {
                if *existing != cache_key {
                    return Err(SwError::ConflictingEntries {
                        first: existing.clone(),
                        second: cache_key,
                    });
                }
            }

            if let Some(integrity) = entry.integrity() {
                if let Some(existing) = manifest.cache_keys_to_integrities.get(&cache_key) {
                    if existing != integrity {
                        return Err(SwError::ConflictingIntegrities { url });
                    }
                }
                manifest
                    .cache_keys_to_integrities
                    .insert(cache_key.clone(), integrity.to_string());
            }

            manifest.urls_to_cache_keys.insert(url.clone(), cache_key);
            manifest.urls_to_cache_modes.insert(url, cache_mode);
        }
        drop(manifest);

        if !unrevisioned.is_empty() {
            warn!(
                count = unrevisioned.len(),
                urls = ?unrevisioned,
                "Precaching entries without revision info; their URLs must be versioned to be updated"
            );
        }
        Ok(())
    }

    /// Add entries to the manifest. The host calls [`install`](Self::install)
    /// and [`activate`](Self::activate) from its lifecycle events.
    pub fn precache(&self, entries: impl IntoIterator<Item = PrecacheEntry>) -> Result<()> {
        self.add_to_cache_list(entries)
    }

    /// Fetch and cache every manifest entry that is not cached yet.
    ///
    /// Entries are processed one at a time; the first failure aborts the
    /// install.
    pub async fn install(self: &Arc<Self>, event: &ExtendableEvent) -> Result<InstallResult> {
        let this = Arc::clone(self);
        let install_event = event.clone();
        wait_until(event, async move { this.precache_entries(&install_event).await }).await
    }

    async fn precache_entries(&self, event: &ExtendableEvent) -> Result<InstallResult> {
        let report = Arc::new(PrecacheInstallReportPlugin::new());
        let report_plugin: Arc<dyn StrategyPlugin> = report.clone();
        self.strategy.core().add_plugin(Arc::clone(&report_plugin));

        let result = self.fetch_entries(event).await;

        self.strategy
            .core()
            .with_plugins_mut(|plugins| plugins.retain(|p| !same_plugin(p, &report_plugin)));
        result?;

        let report = report.take_report();
        info!(
            updated = report.updated_urls.len(),
            not_updated = report.not_updated_urls.len(),
            cache_name = %self.strategy.core().cache_name(),
            "Precache install complete"
        );
        Ok(report)
    }

    async fn fetch_entries(&self, event: &ExtendableEvent) -> Result<()> {
        let entries: Vec<(String, String, Option<String>, CacheMode)> = {
            let manifest = self.manifest.read();
            manifest
                .urls_to_cache_keys
                .iter()
                .map(|(url, cache_key)| {
                    (
                        url.clone(),
                        cache_key.clone(),
                        manifest.integrity_for(cache_key).map(str::to_string),
                        manifest
                            .urls_to_cache_modes
                            .get(url)
                            .copied()
                            .unwrap_or_default(),
                    )
                })
                .collect()
        };

        for (url, cache_key, integrity, cache_mode) in entries {
            let request = Request::get(Url::parse(&url)?)
                .integrity(integrity)
                .cache_mode(cache_mode)
                .credentials(CredentialsMode::SameOrigin);
            let options = HandlerOptions::new(request, event.clone())
                .with_params(cache_key_params(cache_key));

            let (response, done) = self.strategy.handle_all(options).await;
            let done = done.await;
            response?;
            done?;
        }
        Ok(())
    }

    /// Delete cached entries whose key is not in the current manifest.
    pub async fn activate(self: &Arc<Self>, event: &ExtendableEvent) -> Result<CleanupResult> {
        let this = Arc::clone(self);
        wait_until(event, async move { this.delete_stale_entries().await }).await
    }

    async fn delete_stale_entries(&self) -> Result<CleanupResult> {
        let cache_name = self.strategy.core().cache_name();
        let cache = self.scope.caches().open(cache_name).await?;
        let expected: HashSet<String> = self
            .manifest
            .read()
            .urls_to_cache_keys
            .values()
            .cloned()
            .collect();

        let options = CacheQueryOptions::default();
        let mut deleted_urls = Vec::new();
        for request in cache.keys(None, &options).await? {
            if !expected.contains(request.url.as_str()) {
                cache.delete(&request, &options).await?;
                deleted_urls.push(request.url.to_string());
            }
        }

        info!(deleted = deleted_urls.len(), cache_name = %cache_name, "Precache cleanup complete");
        Ok(CleanupResult { deleted_urls })
    }

    /// Manifest URLs mapped to their cache keys, in manifest order.
    pub fn get_urls_to_cache_keys(&self) -> IndexMap<String, String> {
        self.manifest.read().urls_to_cache_keys.clone()
    }

    pub fn get_cached_urls(&self) -> Vec<String> {
        self.manifest.read().urls_to_cache_keys.keys().cloned().collect()
    }

    /// Cache key of `url`, resolved against the worker location.
    pub fn get_cache_key_for_url(&self, url: &str) -> Option<String> {
        let url = self.scope.resolve(url).ok()?;
        self.manifest
            .read()
            .cache_key_for(url.as_str())
            .map(str::to_string)
    }

    pub fn get_integrity_for_cache_key(&self, cache_key: &str) -> Option<String> {
        self.manifest
            .read()
            .integrity_for(cache_key)
            .map(str::to_string)
    }

    /// Look up the cached response of a precached URL.
    ///
    /// `Ok(None)` means the URL is precached but not installed yet.
    pub async fn match_precache(&self, url: &str) -> Result<Option<Response>> {
        let cache_key = self
            .get_cache_key_for_url(url)
            .ok_or_else(|| SwError::NotPrecached {
                url: url.to_string(),
            })?;
        let cache = self
            .scope
            .caches()
            .open(self.strategy.core().cache_name())
            .await?;
        cache
            .match_request(
                &Request::get(Url::parse(&cache_key)?),
                &CacheQueryOptions::default(),
            )
            .await
    }

    /// A route handler that always answers with the precached `url`,
    /// whatever request it is routed.
    pub fn create_handler_bound_to_url(&self, url: &str) -> Result<Arc<dyn RouteHandler>> {
        let cache_key = self
            .get_cache_key_for_url(url)
            .ok_or_else(|| SwError::NotPrecached {
                url: url.to_string(),
            })?;
        let url = self.scope.resolve(url)?;
        let strategy = Arc::clone(&self.strategy);
        debug!(url = %url, cache_key = %cache_key, "Created handler bound to precached URL");

        Ok(handler_fn(move |options: RouteHandlerOptions| {
            let strategy = Arc::clone(&strategy);
            let mut params = match options.params {
                Some(RouteParams::Object(object)) => object,
                _ => Map::new(),
            };
            params
                .entry(CACHE_KEY_PARAM)
                .or_insert_with(|| Value::String(cache_key.clone()));
            let handler_options = HandlerOptions::new(Request::get(url.clone()), options.event)
                .with_params(RouteParams::Object(params));
            async move { strategy.handle(handler_options).await }
        }))
    }

    /// Append plugins to the precache strategy.
    pub fn add_plugins(&self, plugins: impl IntoIterator<Item = Arc<dyn StrategyPlugin>>) {
        for plugin in plugins {
            self.strategy.core().add_plugin(plugin);
        }
    }

    pub(crate) fn manifest(&self) -> &SharedManifest {
        &self.manifest
    }
}

impl fmt::Debug for PrecacheController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrecacheController")
            .field("cache_name", &self.strategy.core().cache_name())
            .field("entries", &self.manifest.read().urls_to_cache_keys.len())
            .finish()
    }
}

fn cache_key_params(cache_key: String) -> RouteParams {
    let mut object = Map::new();
    object.insert(CACHE_KEY_PARAM.to_string(), Value::String(cache_key));
    RouteParams::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustkit_sw::testing::{test_scope, test_url, StubFetcher};
    use rustkit_sw::Router;

    async fn keys_of(scope: &WorkerScope, cache_name: &str) -> Vec<String> {
        let cache = scope.caches().open(cache_name).await.unwrap();
        cache
            .keys(None, &CacheQueryOptions::default())
            .await
            .unwrap()
            .into_iter()
            .map(|request| request.url.to_string())
            .collect()
    }

    #[test]
    fn test_add_to_cache_list_is_idempotent() {
        let (scope, _) = test_scope(StubFetcher::new());
        let controller = PrecacheController::new(&scope, PrecacheControllerOptions::default());
        let entry = PrecacheEntry::revisioned("/index.html", "1");

        controller.add_to_cache_list([entry.clone()]).unwrap();
        controller.add_to_cache_list([entry]).unwrap();

        assert_eq!(controller.get_cached_urls(), vec!["https://example.com/index.html"]);
        assert_eq!(
            controller.get_cache_key_for_url("/index.html").as_deref(),
            Some("https://example.com/index.html?__SW_REVISION__=1")
        );
    }

    #[test]
    fn test_conflicting_revisions_fail() {
        let (scope, _) = test_scope(StubFetcher::new());
        let controller = PrecacheController::new(&scope, PrecacheControllerOptions::default());
        controller
            .add_to_cache_list([PrecacheEntry::revisioned("/a", "1")])
            .unwrap();

        let err = controller
            .add_to_cache_list([PrecacheEntry::revisioned("/a", "2")])
            .unwrap_err();
        assert_eq!(
            err,
            SwError::ConflictingEntries {
                first: "https://example.com/a?__SW_REVISION__=1".into(),
                second: "https://example.com/a?__SW_REVISION__=2".into(),
            }
        );
    }

    #[test]
    fn test_conflicting_integrities_fail() {
        let (scope, _) = test_scope(StubFetcher::new());
        let controller = PrecacheController::new(&scope, PrecacheControllerOptions::default());
        controller
            .add_to_cache_list([PrecacheEntry::revisioned("/a", "1").with_integrity("sha256-x")])
            .unwrap();

        let err = controller
            .add_to_cache_list([PrecacheEntry::revisioned("/a", "1").with_integrity("sha256-y")])
            .unwrap_err();
        assert!(matches!(err, SwError::ConflictingIntegrities { .. }));
        assert_eq!(
            controller
                .get_integrity_for_cache_key("https://example.com/a?__SW_REVISION__=1")
                .as_deref(),
            Some("sha256-x")
        );
    }

    #[tokio::test]
    async fn test_install_requests_use_cache_mode_and_integrity() {
        let fetcher = StubFetcher::new();
        fetcher.respond_ok("https://example.com/app.js", "js");
        fetcher.respond_ok("https://example.com/lib.4f2a.js", "lib");
        let (scope, _) = test_scope(fetcher.clone());
        let controller = PrecacheController::new(&scope, PrecacheControllerOptions::default());
        controller
            .add_to_cache_list([
                PrecacheEntry::revisioned("/app.js", "1").with_integrity("sha256-abc"),
                PrecacheEntry::from("/lib.4f2a.js"),
            ])
            .unwrap();

        controller.install(&ExtendableEvent::install()).await.unwrap();

        let requests = fetcher.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].url.as_str(), "https://example.com/app.js");
        assert_eq!(requests[0].cache, CacheMode::Reload);
        assert_eq!(requests[0].integrity.as_deref(), Some("sha256-abc"));
        assert_eq!(requests[0].credentials, CredentialsMode::SameOrigin);
        assert_eq!(requests[1].cache, CacheMode::Default);
        assert_eq!(requests[1].integrity, None);
    }

    #[tokio::test]
    async fn test_install_activate_round_trip() {
        let fetcher = StubFetcher::new();
        for path in ["a", "b", "c", "d"] {
            fetcher.respond_ok(&format!("https://example.com/{path}"), "body");
        }
        let (scope, _) = test_scope(fetcher.clone());
        let cache_name = scope.cache_names().precache();

        let v1 = PrecacheController::new(&scope, PrecacheControllerOptions::default());
        v1.add_to_cache_list([PrecacheEntry::revisioned("/a", "1"), PrecacheEntry::revisioned("/b", "1")])
            .unwrap();
        let installed = v1.install(&ExtendableEvent::install()).await.unwrap();
        assert_eq!(
            installed.updated_urls,
            vec!["https://example.com/a", "https://example.com/b"]
        );
        let cleaned = v1.activate(&ExtendableEvent::activate()).await.unwrap();
        assert!(cleaned.deleted_urls.is_empty());
        assert_eq!(
            keys_of(&scope, &cache_name).await,
            vec![
                "https://example.com/a?__SW_REVISION__=1",
                "https://example.com/b?__SW_REVISION__=1"
            ]
        );

        let v2 = PrecacheController::new(&scope, PrecacheControllerOptions::default());
        v2.add_to_cache_list([PrecacheEntry::revisioned("/c", "1"), PrecacheEntry::revisioned("/d", "1")])
            .unwrap();
        v2.install(&ExtendableEvent::install()).await.unwrap();
        let cleaned = v2.activate(&ExtendableEvent::activate()).await.unwrap();
        assert_eq!(
            cleaned.deleted_urls,
            vec![
                "https://example.com/a?__SW_REVISION__=1",
                "https://example.com/b?__SW_REVISION__=1"
            ]
        );
        assert_eq!(
            keys_of(&scope, &cache_name).await,
            vec![
                "https://example.com/c?__SW_REVISION__=1",
                "https://example.com/d?__SW_REVISION__=1"
            ]
        );
    }

    #[tokio::test]
    async fn test_second_install_reports_not_updated() {
        let fetcher = StubFetcher::new();
        fetcher.respond_ok("https://example.com/a", "a");
        let (scope, _) = test_scope(fetcher.clone());
        let controller = PrecacheController::new(&scope, PrecacheControllerOptions::default());
        controller
            .add_to_cache_list([PrecacheEntry::revisioned("/a", "1")])
            .unwrap();

        controller.install(&ExtendableEvent::install()).await.unwrap();
        let second = controller.install(&ExtendableEvent::install()).await.unwrap();

        assert!(second.updated_urls.is_empty());
        assert_eq!(second.not_updated_urls, vec!["https://example.com/a"]);
        assert_eq!(fetcher.request_count("https://example.com/a"), 1);
        // The report plugin does not outlive the install.
        assert_eq!(controller.strategy().core().plugins().len(), 3);
    }

    #[tokio::test]
    async fn test_non_success_response_fails_install() {
        let fetcher = StubFetcher::new();
        fetcher.respond(
            "https://example.com/missing",
            Response::new(http::StatusCode::NOT_FOUND, "nope"),
        );
        let (scope, _) = test_scope(fetcher);
        let controller = PrecacheController::new(&scope, PrecacheControllerOptions::default());
        controller
            .add_to_cache_list([PrecacheEntry::revisioned("/missing", "1")])
            .unwrap();

        let event = ExtendableEvent::install();
        let err = controller.install(&event).await.unwrap_err();
        assert_eq!(
            err,
            SwError::BadPrecachingResponse {
                url: "https://example.com/missing".into(),
                status: 404,
            }
        );
        assert!(event.settled().await.is_err());
        assert!(keys_of(&scope, &scope.cache_names().precache()).await.is_empty());
    }

    #[tokio::test]
    async fn test_revision_update_replaces_cached_entry() {
        let fetcher = StubFetcher::new();
        fetcher.respond_ok("https://example.com/x", "one");
        let (scope, _) = test_scope(fetcher.clone());
        let cache_name = scope.cache_names().precache();

        let v1 = PrecacheController::new(&scope, PrecacheControllerOptions::default());
        v1.add_to_cache_list([PrecacheEntry::revisioned("/x", "1")]).unwrap();
        v1.install(&ExtendableEvent::install()).await.unwrap();
        v1.activate(&ExtendableEvent::activate()).await.unwrap();

        let router = Router::for_scope(&scope);
        router.register_route(crate::route::PrecacheRoute::new(&v1, Default::default()));
        let response = router
            .handle_request(Request::get(test_url("/x")), &ExtendableEvent::fetch())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.text().unwrap(), "one");
        assert_eq!(fetcher.request_count("https://example.com/x"), 1);

        fetcher.respond_ok("https://example.com/x", "two");
        let v2 = PrecacheController::new(&scope, PrecacheControllerOptions::default());
        v2.add_to_cache_list([PrecacheEntry::revisioned("/x", "2")]).unwrap();
        v2.install(&ExtendableEvent::install()).await.unwrap();
        let cleaned = v2.activate(&ExtendableEvent::activate()).await.unwrap();
        assert_eq!(cleaned.deleted_urls, vec!["https://example.com/x?__SW_REVISION__=1"]);
        assert_eq!(
            keys_of(&scope, &cache_name).await,
            vec!["https://example.com/x?__SW_REVISION__=2"]
        );

        let router = Router::for_scope(&scope);
        router.register_route(crate::route::PrecacheRoute::new(&v2, Default::default()));
        let response = router
            .handle_request(Request::get(test_url("/x")), &ExtendableEvent::fetch())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.text().unwrap(), "two");
    }

    #[tokio::test]
    async fn test_match_precache() {
        let fetcher = StubFetcher::new();
        fetcher.respond_ok("https://example.com/offline.html", "offline");
        let (scope, _) = test_scope(fetcher);
        let controller = PrecacheController::new(&scope, PrecacheControllerOptions::default());
        controller
            .add_to_cache_list([PrecacheEntry::revisioned("/offline.html", "1")])
            .unwrap();

        assert_eq!(controller.match_precache("/offline.html").await.unwrap(), None);
        controller.install(&ExtendableEvent::install()).await.unwrap();

        let cached = controller.match_precache("/offline.html").await.unwrap().unwrap();
        assert_eq!(cached.text().unwrap(), "offline");
        assert_eq!(
            controller.match_precache("/unknown").await.unwrap_err(),
            SwError::NotPrecached {
                url: "/unknown".into()
            }
        );
    }

    #[tokio::test]
    async fn test_handler_bound_to_url() {
        let fetcher = StubFetcher::new();
        fetcher.respond_ok("https://example.com/shell.html", "shell");
        let (scope, _) = test_scope(fetcher.clone());
        let controller = PrecacheController::new(&scope, PrecacheControllerOptions::default());
        controller
            .add_to_cache_list([PrecacheEntry::revisioned("/shell.html", "1")])
            .unwrap();
        controller.install(&ExtendableEvent::install()).await.unwrap();

        assert!(matches!(
            controller.create_handler_bound_to_url("/other.html"),
            Err(SwError::NotPrecached { .. })
        ));

        let handler = controller.create_handler_bound_to_url("/shell.html").unwrap();
        let request = Request::navigate(test_url("/inbox/42"));
        let response = handler
            .respond(RouteHandlerOptions {
                url: request.url.clone(),
                request,
                event: ExtendableEvent::fetch(),
                params: None,
            })
            .await
            .unwrap();
        assert_eq!(response.text().unwrap(), "shell");
        assert_eq!(fetcher.request_count("https://example.com/shell.html"), 1);
    }
}
