//! The strategy behind precached responses.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use rustkit_sw::http::copy_response;
use rustkit_sw::strategies::plugin::{same_plugin, CacheWillUpdateParams};
use rustkit_sw::strategies::{PluginCallback, StrategyCore, StrategyPlugin};
use rustkit_sw::{
    CacheQueryOptions, FetchOptions, Request, RequestMode, Response, Result, Strategy,
    StrategyHandler, StrategyOptions, SwError, WorkerScope,
};

use crate::controller::INTEGRITY_PARAM;

/// Caches only successful (2xx) responses during install.
struct PrecacheCacheabilityPlugin;

#[async_trait]
impl StrategyPlugin for PrecacheCacheabilityPlugin {
    fn implements(&self, callback: PluginCallback) -> bool {
        callback == PluginCallback::CacheWillUpdate
    }

    async fn cache_will_update(&self, params: CacheWillUpdateParams) -> Result<Option<Response>> {
        let response = params.response;
        Ok(response.ok().then_some(response))
    }
}

/// Stores redirected responses as fresh copies, since a response flagged as
/// redirected cannot answer a navigation.
struct CopyRedirectedCacheableResponsesPlugin;

#[async_trait]
impl StrategyPlugin for CopyRedirectedCacheableResponsesPlugin {
    fn implements(&self, callback: PluginCallback) -> bool {
        callback == PluginCallback::CacheWillUpdate
    }

    async fn cache_will_update(&self, params: CacheWillUpdateParams) -> Result<Option<Response>> {
        let response = params.response;
        if response.redirected {
            debug!(url = %params.request.url, "Copying redirected response before caching");
            return Ok(Some(copy_response(&response)));
        }
        Ok(Some(response))
    }
}

/// Construction options for [`PrecacheStrategy`].
#[derive(Clone)]
pub struct PrecacheStrategyOptions {
    /// Defaults to the scope's precache name.
    pub cache_name: Option<String>,
    pub plugins: Vec<Arc<dyn StrategyPlugin>>,
    pub fetch_options: Option<FetchOptions>,
    pub match_options: CacheQueryOptions,
    /// Go to the network for precache misses outside of install.
    pub fallback_to_network: bool,
}

impl Default for PrecacheStrategyOptions {
    fn default() -> Self {
        Self {
            cache_name: None,
            plugins: Vec::new(),
            fetch_options: None,
            match_options: CacheQueryOptions::default(),
            fallback_to_network: true,
        }
    }
}

/// Cache-only for precached URLs, except that install fills the cache and,
/// optionally, misses at runtime go to the network.
pub struct PrecacheStrategy {
    core: Arc<StrategyCore>,
    fallback_to_network: bool,
    default_cacheability: Arc<dyn StrategyPlugin>,
    copy_redirected: Arc<dyn StrategyPlugin>,
}

impl PrecacheStrategy {
    pub fn new(scope: &WorkerScope, options: PrecacheStrategyOptions) -> Self {
        let copy_redirected: Arc<dyn StrategyPlugin> =
            Arc::new(CopyRedirectedCacheableResponsesPlugin);

        let mut plugins = options.plugins;
        plugins.push(Arc::clone(&copy_redirected));

        let cache_name = scope
            .cache_names()
            .precache_or(options.cache_name.as_deref());
        let core = StrategyCore::new(
            scope,
            StrategyOptions {
                cache_name: Some(cache_name),
                plugins,
                fetch_options: options.fetch_options,
                match_options: options.match_options,
            },
        );

        Self {
            core,
            fallback_to_network: options.fallback_to_network,
            default_cacheability: Arc::new(PrecacheCacheabilityPlugin),
            copy_redirected,
        }
    }

    async fn handle_install(
        &self,
        request: &Request,
        handler: &Arc<StrategyHandler>,
    ) -> Result<Response> {
        self.use_default_cacheability_plugin_if_needed();

        let response = handler.fetch(request).await?;
        let was_cached = handler.cache_put(request, response.clone()).await?;
        if !was_cached {
            return Err(SwError::BadPrecachingResponse {
                url: request.url.to_string(),
                status: response.status,
            });
        }
        Ok(response)
    }

    async fn handle_fetch(
        &self,
        request: &Request,
        handler: &Arc<StrategyHandler>,
    ) -> Result<Response> {
        if !self.fallback_to_network {
            return Err(SwError::NotPrecached {
                url: request.url.to_string(),
            });
        }
        warn!(url = %request.url, cache_name = %self.core.cache_name(), "Precache miss, falling back to the network");

        let integrity_in_manifest = handler
            .params()
            .and_then(|params| params.get_str(INTEGRITY_PARAM))
            .map(str::to_string);
        let integrity_in_request = request.integrity.clone();
        let no_integrity_conflict = integrity_in_request
            .as_ref()
            .map_or(true, |integrity| Some(integrity) == integrity_in_manifest.as_ref());
        let no_cors = request.mode == RequestMode::NoCors;

        let mut outgoing = request.clone();
        outgoing.integrity = if no_cors {
            None
        } else {
            integrity_in_request.or_else(|| integrity_in_manifest.clone())
        };
        let response = handler.fetch(&outgoing).await?;

        if integrity_in_manifest.is_some() && no_integrity_conflict && !no_cors {
            self.use_default_cacheability_plugin_if_needed();
            let was_cached = handler.cache_put(request, response.clone()).await?;
            debug!(url = %request.url, was_cached, "Repaired precache entry from the network");
        }
        Ok(response)
    }

    /// Keep exactly one cacheability decision in the plugin list: add the
    /// default when nothing else decides, drop it once a custom plugin does.
    ///
    /// The list can change between installs, so this runs before each one.
    fn use_default_cacheability_plugin_if_needed(&self) {
        self.core.with_plugins_mut(|plugins| {
            let mut default_index = None;
            let mut deciders = 0;
            for (index, plugin) in plugins.iter().enumerate() {
                if same_plugin(plugin, &self.copy_redirected) {
                    continue;
                }
                if same_plugin(plugin, &self.default_cacheability) {
                    default_index = Some(index);
                }
                if plugin.implements(PluginCallback::CacheWillUpdate) {
                    deciders += 1;
                }
            }

            if deciders == 0 {
                plugins.push(Arc::clone(&self.default_cacheability));
            } else if deciders > 1 {
                if let Some(index) = default_index {
                    plugins.remove(index);
                }
            }
        });
    }
}

#[async_trait]
impl Strategy for PrecacheStrategy {
    fn core(&self) -> &Arc<StrategyCore> {
        &self.core
    }

    async fn handle_request(
        &self,
        request: &Request,
        handler: &Arc<StrategyHandler>,
    ) -> Result<Response> {
        if let Some(cached) = handler.cache_match(request).await? {
            return Ok(cached);
        }

        if handler.event().is_install() {
            return self.handle_install(request, handler).await;
        }
        self.handle_fetch(request, handler).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use rustkit_sw::testing::{test_scope, test_url, StubFetcher};
    use rustkit_sw::strategies::CacheableResponsePlugin;
    use rustkit_sw::{CacheStorage, ExtendableEvent, HandlerOptions, RouteParams};
    use serde_json::json;

    fn count_default(strategy: &PrecacheStrategy) -> usize {
        strategy
            .core()
            .plugins()
            .iter()
            .filter(|p| same_plugin(p, &strategy.default_cacheability))
            .count()
    }

    fn integrity_params(integrity: &str) -> RouteParams {
        let serde_json::Value::Object(object) = json!({ "integrity": integrity }) else {
            unreachable!()
        };
        RouteParams::Object(object)
    }

    #[test]
    fn test_cacheability_reconciliation() {
        let (scope, _) = test_scope(StubFetcher::new());
        let strategy = PrecacheStrategy::new(&scope, PrecacheStrategyOptions::default());

        // Only the redirect copier: the default is injected once.
        strategy.use_default_cacheability_plugin_if_needed();
        strategy.use_default_cacheability_plugin_if_needed();
        assert_eq!(count_default(&strategy), 1);
        assert_eq!(strategy.core().plugins().len(), 2);

        // A custom decider supersedes the default.
        let custom: Arc<dyn StrategyPlugin> = Arc::new(CacheableResponsePlugin::statuses([200]));
        strategy.core().add_plugin(Arc::clone(&custom));
        strategy.use_default_cacheability_plugin_if_needed();
        assert_eq!(count_default(&strategy), 0);
        assert_eq!(strategy.core().plugins().len(), 2);

        // Exactly one custom decider is left alone.
        strategy.use_default_cacheability_plugin_if_needed();
        assert_eq!(count_default(&strategy), 0);

        // Two custom deciders without the default stay untouched.
        strategy
            .core()
            .add_plugin(Arc::new(CacheableResponsePlugin::statuses([0, 200])));
        strategy.use_default_cacheability_plugin_if_needed();
        assert_eq!(strategy.core().plugins().len(), 3);
    }

    #[tokio::test]
    async fn test_custom_cacheability_allows_opaque_precache() {
        let fetcher = StubFetcher::new();
        fetcher.respond("https://example.com/font.woff2", Response::opaque());
        let (scope, _) = test_scope(fetcher);
        let strategy = PrecacheStrategy::new(
            &scope,
            PrecacheStrategyOptions {
                plugins: vec![Arc::new(CacheableResponsePlugin::statuses([0, 200]))],
                ..Default::default()
            },
        );

        let response = strategy
            .handle(HandlerOptions::new(
                Request::get(test_url("/font.woff2")),
                ExtendableEvent::install(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status, 0);
        assert_eq!(count_default(&strategy), 0);
    }

    #[tokio::test]
    async fn test_redirected_response_is_copied() {
        let fetcher = StubFetcher::new();
        let mut redirected = Response::ok_with("landing");
        redirected.redirected = true;
        fetcher.respond("https://example.com/start", redirected);
        let (scope, caches) = test_scope(fetcher);
        let strategy = PrecacheStrategy::new(&scope, PrecacheStrategyOptions::default());

        strategy
            .handle(HandlerOptions::new(
                Request::get(test_url("/start")),
                ExtendableEvent::install(),
            ))
            .await
            .unwrap();

        let cached = caches
            .match_request(&Request::get(test_url("/start")), &CacheQueryOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert!(!cached.redirected);
        assert_eq!(cached.text().unwrap(), "landing");
    }

    #[tokio::test]
    async fn test_install_rejects_error_status() {
        let fetcher = StubFetcher::new();
        fetcher.respond(
            "https://example.com/broken",
            Response::new(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
        );
        let (scope, caches) = test_scope(fetcher);
        let strategy = PrecacheStrategy::new(&scope, PrecacheStrategyOptions::default());

        let err = strategy
            .handle(HandlerOptions::new(
                Request::get(test_url("/broken")),
                ExtendableEvent::install(),
            ))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SwError::BadPrecachingResponse {
                url: "https://example.com/broken".into(),
                status: 500
            }
        );
        assert!(caches
            .get(&scope.cache_names().precache())
            .map_or(true, |cache| cache.is_empty()));
    }

    #[tokio::test]
    async fn test_runtime_miss_without_network_fallback() {
        let fetcher = StubFetcher::new();
        fetcher.respond_ok("https://example.com/a", "a");
        let (scope, _) = test_scope(fetcher.clone());
        let strategy = PrecacheStrategy::new(
            &scope,
            PrecacheStrategyOptions {
                fallback_to_network: false,
                ..Default::default()
            },
        );

        let err = strategy
            .handle(HandlerOptions::new(
                Request::get(test_url("/a")),
                ExtendableEvent::fetch(),
            ))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SwError::NotPrecached {
                url: "https://example.com/a".into()
            }
        );
        assert_eq!(fetcher.request_count("https://example.com/a"), 0);
    }

    #[tokio::test]
    async fn test_runtime_miss_with_manifest_integrity_repairs_cache() {
        let fetcher = StubFetcher::new();
        fetcher.respond_ok("https://example.com/app.js", "js");
        let (scope, caches) = test_scope(fetcher.clone());
        let strategy = PrecacheStrategy::new(&scope, PrecacheStrategyOptions::default());

        let response = strategy
            .handle(
                HandlerOptions::new(Request::get(test_url("/app.js")), ExtendableEvent::fetch())
                    .with_params(integrity_params("sha256-abc")),
            )
            .await
            .unwrap();
        assert_eq!(response.text().unwrap(), "js");
        assert_eq!(
            fetcher.requests()[0].integrity.as_deref(),
            Some("sha256-abc")
        );
        assert!(caches
            .get(&scope.cache_names().precache())
            .is_some_and(|cache| cache.len() == 1));
    }

    #[tokio::test]
    async fn test_runtime_miss_without_integrity_is_not_cached() {
        let fetcher = StubFetcher::new();
        fetcher.respond_ok("https://example.com/app.js", "js");
        let (scope, caches) = test_scope(fetcher);
        let strategy = PrecacheStrategy::new(&scope, PrecacheStrategyOptions::default());

        strategy
            .handle(HandlerOptions::new(
                Request::get(test_url("/app.js")),
                ExtendableEvent::fetch(),
            ))
            .await
            .unwrap();
        assert!(caches
            .get(&scope.cache_names().precache())
            .map_or(true, |cache| cache.is_empty()));
    }
}
