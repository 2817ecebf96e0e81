//! The strategy abstraction shared by every caching policy.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::handler::{HandlerOptions, StrategyHandler};
use super::plugin::StrategyPlugin;
use crate::cache::CacheQueryOptions;
use crate::error::{Result, SwError};
use crate::event::{spawn_tracked, Completion};
use crate::http::{FetchOptions, Request, Response};
use crate::routing::{RouteHandler, RouteHandlerOptions};
use crate::scope::WorkerScope;

/// Construction options common to all strategies.
#[derive(Clone, Default)]
pub struct StrategyOptions {
    /// Cache to use; defaults to the scope's runtime cache name.
    pub cache_name: Option<String>,
    pub plugins: Vec<Arc<dyn StrategyPlugin>>,
    /// Applied to non-navigation network requests.
    pub fetch_options: Option<FetchOptions>,
    pub match_options: CacheQueryOptions,
}

impl StrategyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = Some(name.into());
        self
    }

    pub fn plugin(mut self, plugin: Arc<dyn StrategyPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn fetch_options(mut self, options: FetchOptions) -> Self {
        self.fetch_options = Some(options);
        self
    }

    pub fn match_options(mut self, options: CacheQueryOptions) -> Self {
        self.match_options = options;
        self
    }
}

impl fmt::Debug for StrategyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyOptions")
            .field("cache_name", &self.cache_name)
            .field("plugins", &self.plugins.len())
            .field("fetch_options", &self.fetch_options)
            .field("match_options", &self.match_options)
            .finish()
    }
}

/// Configuration shared by every handler a strategy creates.
///
/// The plugin list stays mutable after construction; handlers read it at
/// each pipeline stage.
pub struct StrategyCore {
    scope: WorkerScope,
    cache_name: String,
    plugins: RwLock<Vec<Arc<dyn StrategyPlugin>>>,
    fetch_options: Option<FetchOptions>,
    match_options: CacheQueryOptions,
}

impl StrategyCore {
    pub fn new(scope: &WorkerScope, options: StrategyOptions) -> Arc<Self> {
        let cache_name = scope
            .cache_names()
            .runtime_or(options.cache_name.as_deref());
        Arc::new(Self {
            scope: scope.clone(),
            cache_name,
            plugins: RwLock::new(options.plugins),
            fetch_options: options.fetch_options,
            match_options: options.match_options,
        })
    }

    pub fn scope(&self) -> &WorkerScope {
        &self.scope
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn match_options(&self) -> &CacheQueryOptions {
        &self.match_options
    }

    pub fn fetch_options(&self) -> Option<&FetchOptions> {
        self.fetch_options.as_ref()
    }

    /// Snapshot of the current plugins, in registration order.
    pub fn plugins(&self) -> Vec<Arc<dyn StrategyPlugin>> {
        self.plugins.read().clone()
    }

    pub fn add_plugin(&self, plugin: Arc<dyn StrategyPlugin>) {
        self.plugins.write().push(plugin);
    }

    /// Edit the plugin list in place.
    pub fn with_plugins_mut<R>(&self, f: impl FnOnce(&mut Vec<Arc<dyn StrategyPlugin>>) -> R) -> R {
        f(&mut self.plugins.write())
    }
}

impl fmt::Debug for StrategyCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyCore")
            .field("cache_name", &self.cache_name)
            .field("plugins", &self.plugins.read().len())
            .finish()
    }
}

/// A caching policy applied to one request at a time.
///
/// Implementors provide [`handle_request`](Strategy::handle_request); the
/// provided methods wrap it with the handler lifecycle callbacks.
#[async_trait]
pub trait Strategy: Send + Sync + 'static {
    fn core(&self) -> &Arc<StrategyCore>;

    /// Produce a response for `request` using `handler`.
    async fn handle_request(
        &self,
        request: &Request,
        handler: &Arc<StrategyHandler>,
    ) -> Result<Response>;

    /// Handle a request and wait for all background work it started.
    async fn handle(&self, options: HandlerOptions) -> Result<Response> {
        let (response, done) = self.handle_all(options).await;
        let done = done.await;
        let response = response?;
        done?;
        Ok(response)
    }

    /// Handle a request, returning the response together with a completion
    /// for the background work it started.
    async fn handle_all(&self, options: HandlerOptions) -> (Result<Response>, Completion) {
        let request = options.request.clone();
        let handler = StrategyHandler::new(Arc::clone(self.core()), options);

        let response = get_response(self, &handler, &request).await;

        let background = {
            let handler = Arc::clone(&handler);
            let response = response.clone();
            async move { await_complete(handler, response).await }
        };
        let (done, _) = spawn_tracked(background);
        (response, done)
    }
}

async fn get_response<S: Strategy + ?Sized>(
    strategy: &S,
    handler: &Arc<StrategyHandler>,
    request: &Request,
) -> Result<Response> {
    handler.run_handler_will_start().await?;

    let produced = match strategy.handle_request(request, handler).await {
        Ok(response) if response.is_error() => {
            Err(SwError::no_response(request.url.as_str(), None))
        }
        other => other,
    };

    let response = match produced {
        Ok(response) => response,
        Err(error) => match handler.run_handler_did_error(&error).await? {
            Some(fallback) => {
                warn!(url = %request.url, error = %error, "Strategy failed, responding with handlerDidError fallback");
                fallback
            }
            None => return Err(error),
        },
    };

    handler.run_handler_will_respond(response).await
}

async fn await_complete(handler: Arc<StrategyHandler>, response: Result<Response>) -> Result<()> {
    let response = response.ok();

    let mut error = None;
    if let Err(err) = handler.run_handler_did_respond(response.as_ref()).await {
        error = Some(err);
    } else if let Err(err) = handler.done_waiting().await {
        error = Some(err);
    }

    let completed = handler
        .run_handler_did_complete(response.as_ref(), error.as_ref())
        .await;
    handler.destroy();
    debug!(url = %handler.url(), "Strategy handler complete");

    match error {
        Some(err) => Err(err),
        None => completed,
    }
}

/// Every strategy can be used directly as a route handler. The response is
/// returned right away; background work is handed to the event.
#[async_trait]
impl<S: Strategy> RouteHandler for S {
    async fn respond(&self, options: RouteHandlerOptions) -> Result<Response> {
        let event = options.event.clone();
        let (response, done) = self.handle_all(options.into()).await;
        event.extend_lifetime(done);
        response
    }
}
