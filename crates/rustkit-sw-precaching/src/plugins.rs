//! Plugins the precache controller installs on its strategy, plus a
//! fallback plugin for runtime strategies.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};
use url::Url;

use rustkit_sw::strategies::plugin::{
    CacheKeyWillBeUsedParams, CachedResponseWillBeUsedParams, HandlerDidErrorParams,
    HandlerWillStartParams,
};
use rustkit_sw::strategies::{PluginCallback, StrategyPlugin};
use rustkit_sw::{Request, Response, Result, SwError};

use crate::controller::{InstallResult, PrecacheController, SharedManifest, CACHE_KEY_PARAM};

/// Rewrites requests for precached URLs to their revisioned cache key.
///
/// A `cacheKey` route param wins over the manifest lookup.
pub struct PrecacheCacheKeyPlugin {
    manifest: SharedManifest,
}

impl PrecacheCacheKeyPlugin {
    pub(crate) fn new(manifest: SharedManifest) -> Self {
        Self { manifest }
    }
}

#[async_trait]
impl StrategyPlugin for PrecacheCacheKeyPlugin {
    fn implements(&self, callback: PluginCallback) -> bool {
        callback == PluginCallback::CacheKeyWillBeUsed
    }

    async fn cache_key_will_be_used(&self, params: CacheKeyWillBeUsedParams) -> Result<Request> {
        let cache_key = params
            .params
            .as_ref()
            .and_then(|p| p.get_str(CACHE_KEY_PARAM))
            .map(str::to_string)
            .or_else(|| {
                self.manifest
                    .read()
                    .cache_key_for(params.request.url.as_str())
                    .map(str::to_string)
            });

        match cache_key {
            Some(key) => Ok(params.request.with_url(Url::parse(&key)?)),
            None => Ok(params.request),
        }
    }
}

#[derive(Clone)]
struct OriginalRequest(Url);

/// Records which URLs an install wrote and which were already cached.
#[derive(Default)]
pub struct PrecacheInstallReportPlugin {
    report: Mutex<InstallResult>,
}

impl PrecacheInstallReportPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the collected report, leaving an empty one behind.
    pub fn take_report(&self) -> InstallResult {
        std::mem::take(&mut *self.report.lock())
    }
}

#[async_trait]
impl StrategyPlugin for PrecacheInstallReportPlugin {
    fn implements(&self, callback: PluginCallback) -> bool {
        matches!(
            callback,
            PluginCallback::HandlerWillStart | PluginCallback::CachedResponseWillBeUsed
        )
    }

    async fn handler_will_start(&self, params: HandlerWillStartParams) -> Result<()> {
        params.state.insert(OriginalRequest(params.request.url));
        Ok(())
    }

    async fn cached_response_will_be_used(
        &self,
        params: CachedResponseWillBeUsedParams,
    ) -> Result<Option<Response>> {
        if params.event.is_install() {
            if let Some(OriginalRequest(url)) = params.state.get::<OriginalRequest>() {
                let mut report = self.report.lock();
                if params.cached_response.is_some() {
                    trace!(url = %url, "Already precached");
                    report.not_updated_urls.push(url.to_string());
                } else {
                    report.updated_urls.push(url.to_string());
                }
            }
        }
        Ok(params.cached_response)
    }
}

/// Responds with a precached page when the strategy it is attached to
/// fails, e.g. an offline page for navigations.
pub struct PrecacheFallbackPlugin {
    fallback_url: String,
    controller: Arc<PrecacheController>,
}

impl PrecacheFallbackPlugin {
    pub fn new(fallback_url: impl Into<String>, controller: Arc<PrecacheController>) -> Self {
        Self {
            fallback_url: fallback_url.into(),
            controller,
        }
    }
}

#[async_trait]
impl StrategyPlugin for PrecacheFallbackPlugin {
    fn implements(&self, callback: PluginCallback) -> bool {
        callback == PluginCallback::HandlerDidError
    }

    async fn handler_did_error(&self, params: HandlerDidErrorParams) -> Result<Option<Response>> {
        debug!(url = %params.request.url, fallback = %self.fallback_url, "Serving precached fallback");
        match self.controller.match_precache(&self.fallback_url).await {
            Err(SwError::NotPrecached { .. }) => Ok(None),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustkit_sw::testing::{test_scope, test_url, StubFetcher};
    use rustkit_sw::{ExtendableEvent, HandlerOptions, NetworkOnly, Strategy, StrategyOptions};

    use crate::controller::PrecacheControllerOptions;
    use crate::manifest::PrecacheEntry;

    #[tokio::test]
    async fn test_fallback_plugin_serves_precached_page() {
        let fetcher = StubFetcher::new();
        fetcher.respond_ok("https://example.com/offline.html", "offline");
        fetcher.fail("https://example.com/page", "offline");
        let (scope, _) = test_scope(fetcher.clone());

        let controller = PrecacheController::new(&scope, PrecacheControllerOptions::default());
        controller
            .add_to_cache_list([PrecacheEntry::revisioned("/offline.html", "1")])
            .unwrap();
        controller.install(&ExtendableEvent::install()).await.unwrap();

        let strategy = NetworkOnly::new(
            &scope,
            StrategyOptions::new().plugin(Arc::new(PrecacheFallbackPlugin::new(
                "/offline.html",
                controller.clone(),
            ))),
        );
        let response = strategy
            .handle(HandlerOptions::new(
                Request::get(test_url("/page")),
                ExtendableEvent::fetch(),
            ))
            .await
            .unwrap();
        assert_eq!(response.text().unwrap(), "offline");
    }

    #[tokio::test]
    async fn test_fallback_plugin_without_precached_page_keeps_error() {
        let fetcher = StubFetcher::new();
        fetcher.fail("https://example.com/page", "offline");
        let (scope, _) = test_scope(fetcher);

        let controller = PrecacheController::new(&scope, PrecacheControllerOptions::default());
        let strategy = NetworkOnly::new(
            &scope,
            StrategyOptions::new().plugin(Arc::new(PrecacheFallbackPlugin::new(
                "/offline.html",
                controller,
            ))),
        );
        let err = strategy
            .handle(HandlerOptions::new(
                Request::get(test_url("/page")),
                ExtendableEvent::fetch(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, SwError::NoResponse { .. }), "got {err:?}");
    }
}
