//! Per-request execution context.

use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use super::plugin::{
    plugin_id, CacheDidUpdateParams, CacheKeyMode, CacheKeyWillBeUsedParams,
    CacheWillUpdateParams, CachedResponseWillBeUsedParams, FetchDidFailParams,
    FetchDidSucceedParams, HandlerDidCompleteParams, HandlerDidErrorParams,
    HandlerDidRespondParams, HandlerWillRespondParams, HandlerWillStartParams, PluginCallback,
    PluginState, RequestWillFetchParams, StrategyPlugin,
};
use super::strategy::StrategyCore;
use crate::cache::{cache_match_ignore_params, REVISION_SEARCH_PARAM};
use crate::error::{Result, SwError};
use crate::event::{spawn_tracked, Completion, EventKind, ExtendableEvent};
use crate::http::{Request, Response};
use crate::quota::execute_quota_error_callbacks;
use crate::routing::{RouteHandlerOptions, RouteParams};

/// Input of one strategy invocation.
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    pub request: Request,
    pub event: ExtendableEvent,
    pub params: Option<RouteParams>,
}

impl HandlerOptions {
    pub fn new(request: Request, event: ExtendableEvent) -> Self {
        Self {
            request,
            event,
            params: None,
        }
    }

    pub fn with_params(mut self, params: RouteParams) -> Self {
        self.params = Some(params);
        self
    }
}

impl From<RouteHandlerOptions> for HandlerOptions {
    fn from(options: RouteHandlerOptions) -> Self {
        Self {
            request: options.request,
            event: options.event,
            params: options.params,
        }
    }
}

/// Runs the plugin pipeline for a single request and tracks the background
/// work it starts.
///
/// Created by [`Strategy::handle_all`](super::Strategy::handle_all); one
/// instance never outlives the request it was created for.
pub struct StrategyHandler {
    request: Request,
    url: Url,
    event: ExtendableEvent,
    params: Option<RouteParams>,
    core: Arc<StrategyCore>,
    cache_keys: Mutex<HashMap<(String, CacheKeyMode), Request>>,
    extend_lifetime: Mutex<VecDeque<Completion>>,
    plugin_states: Mutex<HashMap<usize, PluginState>>,
    handler_done: Mutex<Option<oneshot::Sender<()>>>,
}

impl StrategyHandler {
    /// Create a handler and keep `options.event` alive until it is destroyed.
    pub fn new(core: Arc<StrategyCore>, options: HandlerOptions) -> Arc<Self> {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        options.event.extend_lifetime(
            async move {
                let _ = done_rx.await;
                Ok(())
            }
            .boxed()
            .shared(),
        );

        Arc::new(Self {
            url: options.request.url.clone(),
            request: options.request,
            event: options.event,
            params: options.params,
            core,
            cache_keys: Mutex::new(HashMap::new()),
            extend_lifetime: Mutex::new(VecDeque::new()),
            plugin_states: Mutex::new(HashMap::new()),
            handler_done: Mutex::new(Some(done_tx)),
        })
    }

    /// The request this handler was created for.
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn event(&self) -> &ExtendableEvent {
        &self.event
    }

    pub fn params(&self) -> Option<&RouteParams> {
        self.params.as_ref()
    }

    pub fn core(&self) -> &Arc<StrategyCore> {
        &self.core
    }

    /// Fetch `input` from the network, running the fetch plugins.
    ///
    /// On failure every `fetch_did_fail` plugin runs and the network error
    /// is returned. A `fetch_did_fail` plugin that itself fails is logged
    /// and skipped; its error never replaces the network error.
    pub async fn fetch(&self, input: &Request) -> Result<Response> {
        if input.is_navigation() && self.event.kind() == EventKind::Fetch {
            if let Some(preloaded) = self.event.preload_response() {
                debug!(url = %input.url, "Using navigation preload response");
                return Ok(preloaded);
            }
        }

        // Only keep a pristine copy when someone will look at it.
        let original_request = self
            .has_callback(PluginCallback::FetchDidFail)
            .then(|| input.clone());

        let mut request = input.clone();
        for (plugin, state) in self.iterate_callbacks(PluginCallback::RequestWillFetch) {
            request = plugin
                .request_will_fetch(RequestWillFetchParams {
                    request,
                    event: self.event.clone(),
                    state,
                })
                .await
                .map_err(|err| SwError::PluginRequestWillFetch(err.to_string()))?;
        }

        let outgoing = match self.core.fetch_options() {
            Some(options) if !request.is_navigation() => options.apply(request.clone()),
            _ => request.clone(),
        };

        let fetched: Result<Response> = async {
            let mut response = self.core.scope().fetcher().fetch(outgoing).await?;
            trace!(url = %request.url, status = response.status, "Network request returned");
            for (plugin, state) in self.iterate_callbacks(PluginCallback::FetchDidSucceed) {
                response = plugin
                    .fetch_did_succeed(FetchDidSucceedParams {
                        request: request.clone(),
                        response,
                        event: self.event.clone(),
                        state,
                    })
                    .await?;
            }
            Ok(response)
        }
        .await;

        if let (Err(error), Some(original_request)) = (&fetched, original_request) {
            for (plugin, state) in self.iterate_callbacks(PluginCallback::FetchDidFail) {
                let result = plugin
                    .fetch_did_fail(FetchDidFailParams {
                        original_request: original_request.clone(),
                        request: request.clone(),
                        error: error.clone(),
                        event: self.event.clone(),
                        state,
                    })
                    .await;
                if let Err(err) = result {
                    warn!(
                        url = %request.url,
                        network_error = %error,
                        error = %err,
                        "fetchDidFail plugin failed"
                    );
                }
            }
        }
        fetched
    }

    /// Fetch `input` and write a copy of the response to the cache in the
    /// background.
    pub async fn fetch_and_cache_put(self: &Arc<Self>, input: &Request) -> Result<Response> {
        let response = self.fetch(input).await?;

        let handler = Arc::clone(self);
        let request = input.clone();
        let copy = response.clone();
        self.wait_until(async move {
            handler.cache_put(&request, copy).await.map(|_| ())
        });

        Ok(response)
    }

    /// Look `key` up in the strategy's cache, running the cache-read plugins.
    pub async fn cache_match(&self, key: &Request) -> Result<Option<Response>> {
        let effective = self.get_cache_key(key, CacheKeyMode::Read).await?;
        let cache_name = self.core.cache_name().to_string();
        let match_options = self.core.match_options().in_cache(&cache_name);

        let mut cached = self
            .core
            .scope()
            .caches()
            .match_request(&effective, &match_options)
            .await?;
        if cached.is_some() {
            debug!(url = %effective.url, cache_name = %cache_name, "Found cached response");
        } else {
            debug!(url = %effective.url, cache_name = %cache_name, "No cached response");
        }

        for (plugin, state) in self.iterate_callbacks(PluginCallback::CachedResponseWillBeUsed) {
            cached = plugin
                .cached_response_will_be_used(CachedResponseWillBeUsedParams {
                    cache_name: cache_name.clone(),
                    match_options: match_options.clone(),
                    request: effective.clone(),
                    cached_response: cached,
                    event: self.event.clone(),
                    state,
                })
                .await?;
        }
        Ok(cached)
    }

    /// Write `response` to the strategy's cache under `key`.
    ///
    /// Returns `Ok(false)` when a plugin (or the default status check)
    /// rejected the response.
    pub async fn cache_put(
        &self,
        key: &Request,
        response: impl Into<Option<Response>> + Send,
    ) -> Result<bool> {
        let response = response.into();
        // Let pending cache reads go first.
        tokio::task::yield_now().await;

        let effective = self.get_cache_key(key, CacheKeyMode::Write).await?;
        if effective.method != http::Method::GET {
            return Err(SwError::NonGetRequest {
                url: effective.url.to_string(),
                method: effective.method.clone(),
            });
        }
        let Some(response) = response else {
            return Err(SwError::CachePutWithNoResponse {
                url: effective.url.to_string(),
            });
        };

        let Some(to_cache) = self.ensure_response_safe_to_cache(response).await? else {
            debug!(url = %effective.url, "Response will not be cached");
            return Ok(false);
        };

        let cache_name = self.core.cache_name().to_string();
        let cache = self.core.scope().caches().open(&cache_name).await?;

        let has_cache_update_callback = self.has_callback(PluginCallback::CacheDidUpdate);
        let old_response = if has_cache_update_callback {
            cache_match_ignore_params(
                cache.as_ref(),
                &effective,
                &[REVISION_SEARCH_PARAM],
                self.core.match_options(),
            )
            .await?
        } else {
            None
        };

        debug!(url = %effective.url, cache_name = %cache_name, "Updating cache");
        if let Err(err) = cache.put(&effective, to_cache.clone()).await {
            if err.is_quota_exceeded() {
                warn!(url = %effective.url, cache_name = %cache_name, "Cache quota exceeded");
                execute_quota_error_callbacks().await;
            }
            return Err(err);
        }

        for (plugin, state) in self.iterate_callbacks(PluginCallback::CacheDidUpdate) {
            plugin
                .cache_did_update(CacheDidUpdateParams {
                    cache_name: cache_name.clone(),
                    request: effective.clone(),
                    old_response: old_response.clone(),
                    new_response: to_cache.clone(),
                    event: self.event.clone(),
                    state,
                })
                .await?;
        }
        Ok(true)
    }

    /// Resolve the key actually used for `request`, memoised per URL and
    /// mode for the lifetime of this handler.
    pub async fn get_cache_key(&self, request: &Request, mode: CacheKeyMode) -> Result<Request> {
        let memo_key = (request.url.to_string(), mode);
        if let Some(known) = self.cache_keys.lock().get(&memo_key) {
            return Ok(known.clone());
        }

        let mut effective = request.clone();
        for (plugin, state) in self.iterate_callbacks(PluginCallback::CacheKeyWillBeUsed) {
            effective = plugin
                .cache_key_will_be_used(CacheKeyWillBeUsedParams {
                    request: effective,
                    mode,
                    params: self.params.clone(),
                    event: self.event.clone(),
                    state,
                })
                .await?;
        }
        trace!(url = %request.url, key = %effective.url, ?mode, "Resolved cache key");

        self.cache_keys.lock().insert(memo_key, effective.clone());
        Ok(effective)
    }

    /// Whether any plugin of the strategy implements `callback`.
    pub fn has_callback(&self, callback: PluginCallback) -> bool {
        self.core
            .plugins()
            .iter()
            .any(|plugin| plugin.implements(callback))
    }

    /// Plugins implementing `callback`, in registration order, each paired
    /// with its state for this handler.
    pub fn iterate_callbacks(
        &self,
        callback: PluginCallback,
    ) -> Vec<(Arc<dyn StrategyPlugin>, PluginState)> {
        self.core
            .plugins()
            .into_iter()
            .filter(|plugin| plugin.implements(callback))
            .map(|plugin| {
                let state = self.plugin_state(&plugin);
                (plugin, state)
            })
            .collect()
    }

    fn plugin_state(&self, plugin: &Arc<dyn StrategyPlugin>) -> PluginState {
        self.plugin_states
            .lock()
            .entry(plugin_id(plugin))
            .or_default()
            .clone()
    }

    /// Run `future` in the background, tracked both by this handler and by
    /// the event.
    pub fn wait_until<T, F>(&self, future: F) -> JoinHandle<Result<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (completion, handle) = spawn_tracked(future);
        self.extend_lifetime.lock().push_back(completion.clone());
        self.event.extend_lifetime(completion);
        handle
    }

    /// Wait for all background work, including work added while waiting.
    pub async fn done_waiting(&self) -> Result<()> {
        let mut first_error = None;
        loop {
            let next = self.extend_lifetime.lock().pop_front();
            let Some(completion) = next else { break };
            if let Err(err) = completion.await {
                warn!(url = %self.url, error = %err, "Background work failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Release the event. Idempotent.
    pub fn destroy(&self) {
        if let Some(done) = self.handler_done.lock().take() {
            let _ = done.send(());
        }
    }

    async fn ensure_response_safe_to_cache(&self, response: Response) -> Result<Option<Response>> {
        let mut candidate = Some(response);
        let mut plugins_used = false;
        for (plugin, state) in self.iterate_callbacks(PluginCallback::CacheWillUpdate) {
            let Some(response) = candidate.take() else { break };
            plugins_used = true;
            candidate = plugin
                .cache_will_update(CacheWillUpdateParams {
                    request: self.request.clone(),
                    response,
                    event: self.event.clone(),
                    state,
                })
                .await
                .map_err(|err| SwError::PluginCacheWillUpdate(err.to_string()))?;
            if candidate.is_none() {
                break;
            }
        }

        if !plugins_used {
            candidate = candidate.filter(|response| response.status == 200);
        }
        Ok(candidate)
    }

    pub(crate) async fn run_handler_will_start(&self) -> Result<()> {
        for (plugin, state) in self.iterate_callbacks(PluginCallback::HandlerWillStart) {
            plugin
                .handler_will_start(HandlerWillStartParams {
                    request: self.request.clone(),
                    event: self.event.clone(),
                    state,
                })
                .await?;
        }
        Ok(())
    }

    pub(crate) async fn run_handler_did_error(&self, error: &SwError) -> Result<Option<Response>> {
        for (plugin, state) in self.iterate_callbacks(PluginCallback::HandlerDidError) {
            let fallback = plugin
                .handler_did_error(HandlerDidErrorParams {
                    request: self.request.clone(),
                    error: error.clone(),
                    event: self.event.clone(),
                    state,
                })
                .await?;
            if fallback.is_some() {
                return Ok(fallback);
            }
        }
        Ok(None)
    }

    pub(crate) async fn run_handler_will_respond(&self, mut response: Response) -> Result<Response> {
        for (plugin, state) in self.iterate_callbacks(PluginCallback::HandlerWillRespond) {
            response = plugin
                .handler_will_respond(HandlerWillRespondParams {
                    request: self.request.clone(),
                    response,
                    event: self.event.clone(),
                    state,
                })
                .await?;
        }
        Ok(response)
    }

    pub(crate) async fn run_handler_did_respond(&self, response: Option<&Response>) -> Result<()> {
        for (plugin, state) in self.iterate_callbacks(PluginCallback::HandlerDidRespond) {
            plugin
                .handler_did_respond(HandlerDidRespondParams {
                    request: self.request.clone(),
                    response: response.cloned(),
                    event: self.event.clone(),
                    state,
                })
                .await?;
        }
        Ok(())
    }

    pub(crate) async fn run_handler_did_complete(
        &self,
        response: Option<&Response>,
        error: Option<&SwError>,
    ) -> Result<()> {
        for (plugin, state) in self.iterate_callbacks(PluginCallback::HandlerDidComplete) {
            plugin
                .handler_did_complete(HandlerDidCompleteParams {
                    request: self.request.clone(),
                    response: response.cloned(),
                    error: error.cloned(),
                    event: self.event.clone(),
                    state,
                })
                .await?;
        }
        Ok(())
    }
}

impl fmt::Debug for StrategyHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyHandler")
            .field("url", &self.url.as_str())
            .field("cache_name", &self.core.cache_name())
            .field("pending", &self.extend_lifetime.lock().len())
            .finish()
    }
}
