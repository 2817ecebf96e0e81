use futures::future::join_all;
use futures::FutureExt;
use http::Method;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use url::Url;

use super::message::CacheUrlsMessage;
use super::route::{Route, RouteCapture};
use super::{MatchContext, RouteHandler, RouteHandlerOptions, RouteParams};
use crate::error::{Result, SwError};
use crate::event::{ExtendableEvent, FetchEvent, MessageEvent};
use crate::http::{Request, Response};
use crate::scope::WorkerScope;

#[derive(Default)]
struct RouterState {
    routes: HashMap<Method, Vec<Arc<Route>>>,
    default_handlers: HashMap<Method, Arc<dyn RouteHandler>>,
    catch_handler: Option<Arc<dyn RouteHandler>>,
}

/// Dispatches requests to routes.
///
/// Routes are tried in registration order and the first match wins.
/// Registering the same route twice keeps both entries.
pub struct Router {
    location: Url,
    state: RwLock<RouterState>,
}

impl Router {
    /// Create a router for a worker served from `location`.
    pub fn new(location: Url) -> Self {
        Self {
            location,
            state: RwLock::new(RouterState::default()),
        }
    }

    pub fn for_scope(scope: &WorkerScope) -> Self {
        Self::new(scope.location().clone())
    }

    /// Registered routes, per method.
    pub fn routes(&self) -> HashMap<Method, Vec<Arc<Route>>> {
        self.state.read().routes.clone()
    }

    /// Append `route` to its method's list.
    pub fn register_route(&self, route: impl Into<Arc<Route>>) -> Arc<Route> {
        let route = route.into();
        let mut state = self.state.write();
        let routes = state.routes.entry(route.method().clone()).or_default();
        routes.push(route.clone());
        debug!(method = %route.method(), count = routes.len(), "Registered route");
        route
    }

    /// Build a route from a path, regex or predicate and register it.
    pub fn register_capture(
        &self,
        capture: impl Into<RouteCapture>,
        handler: Arc<dyn RouteHandler>,
        method: Method,
    ) -> Result<Arc<Route>> {
        let route = capture
            .into()
            .into_route(handler, &self.location)?
            .with_method(method);
        Ok(self.register_route(route))
    }

    /// Remove this exact route instance.
    pub fn unregister_route(&self, route: &Arc<Route>) -> Result<()> {
        let mut state = self.state.write();
        let method = route.method();
        let routes = match state.routes.get_mut(method) {
            Some(routes) if !routes.is_empty() => routes,
            _ => return Err(SwError::NoRoutesForMethod(method.clone())),
        };
        let index = routes
            .iter()
            .position(|registered| Arc::ptr_eq(registered, route))
            .ok_or_else(|| SwError::RouteNotFound(method.clone()))?;
        routes.remove(index);
        debug!(method = %method, remaining = routes.len(), "Unregistered route");
        Ok(())
    }

    /// Handler for requests of `method` that no route matches.
    pub fn set_default_handler(&self, handler: Arc<dyn RouteHandler>, method: Method) {
        self.state.write().default_handlers.insert(method, handler);
    }

    /// Handler tried when a route's handler (and its own catch handler) fails.
    pub fn set_catch_handler(&self, handler: Arc<dyn RouteHandler>) {
        self.state.write().catch_handler = Some(handler);
    }

    /// First route for the request's method whose predicate matches.
    pub fn find_matching_route(
        &self,
        ctx: &MatchContext<'_>,
    ) -> Option<(Arc<Route>, Option<RouteParams>)> {
        let routes = self
            .state
            .read()
            .routes
            .get(&ctx.request.method)
            .cloned()
            .unwrap_or_default();
        for route in routes {
            let result = route.matches(ctx);
            if result.is_match() {
                return Some((route, result.into_params()));
            }
        }
        None
    }

    /// Route `request`.
    ///
    /// Returns `None` when the request is not routable (non-http scheme) or
    /// neither a route nor a default handler applies.
    pub async fn handle_request(
        &self,
        request: Request,
        event: &ExtendableEvent,
    ) -> Option<Result<Response>> {
        let url = request.url.clone();
        if !url.scheme().starts_with("http") {
            trace!(url = %url, "Not routing non-http request");
            return None;
        }

        let same_origin = url.origin() == self.location.origin();
        let ctx = MatchContext {
            url: &url,
            request: &request,
            same_origin,
            event,
        };
        let matched = self.find_matching_route(&ctx);

        let (handler, route_catch, params) = match matched {
            Some((route, params)) => {
                debug!(url = %url, method = %request.method, "Found matching route");
                (route.handler().clone(), route.catch_handler().cloned(), params)
            }
            None => {
                let default = self
                    .state
                    .read()
                    .default_handlers
                    .get(&request.method)
                    .cloned();
                match default {
                    Some(handler) => {
                        debug!(url = %url, "No route matched, using default handler");
                        (handler, None, None)
                    }
                    None => {
                        debug!(url = %url, method = %request.method, "No route for request");
                        return None;
                    }
                }
            }
        };

        let options = RouteHandlerOptions {
            url,
            request,
            event: event.clone(),
            params,
        };
        let error = match run_handler(&handler, options.clone()).await {
            Ok(response) => return Some(Ok(response)),
            Err(error) => error,
        };

        if let Some(catch_handler) = route_catch {
            match run_handler(&catch_handler, options.clone()).await {
                Ok(response) => return Some(Ok(response)),
                Err(catch_error) => {
                    warn!(url = %options.url, error = %catch_error, "Route catch handler failed");
                }
            }
        }

        let global_catch = self.state.read().catch_handler.clone();
        if let Some(catch_handler) = global_catch {
            let catch_options = RouteHandlerOptions {
                params: None,
                ..options.clone()
            };
            match run_handler(&catch_handler, catch_options).await {
                Ok(response) => return Some(Ok(response)),
                Err(catch_error) => {
                    warn!(url = %options.url, error = %catch_error, "Router catch handler failed");
                }
            }
        }

        Some(Err(error))
    }

    /// Route an intercepted request.
    pub async fn handle_fetch(&self, fetch: &FetchEvent) -> Option<Result<Response>> {
        self.handle_request(fetch.request.clone(), &fetch.event).await
    }

    /// Handle a control message.
    ///
    /// For `CACHE_URLS`, routes every listed URL, waits until all of them and
    /// their background work settled, acknowledges on the reply channel and
    /// returns `Ok(true)`. Other messages are ignored with `Ok(false)`.
    pub async fn handle_message(&self, message: MessageEvent) -> Result<bool> {
        let Some(cache_urls) = CacheUrlsMessage::parse(&message.data)? else {
            return Ok(false);
        };
        debug!(count = cache_urls.urls_to_cache.len(), "Caching URLs from the page");

        let mut requests = Vec::with_capacity(cache_urls.urls_to_cache.len());
        for entry in &cache_urls.urls_to_cache {
            let url = self.location.join(entry.url())?;
            let request = match entry.options() {
                Some(options) => Request::from_options(url, options)?,
                None => Request::get(url),
            };
            requests.push(request);
        }

        let event = &message.event;
        let results = join_all(
            requests
                .into_iter()
                .map(|request| self.handle_request(request, event)),
        )
        .await;
        let settled = event.settled().await;

        let first_error = results
            .into_iter()
            .flatten()
            .find_map(|result| result.err())
            .or(settled.err());
        if let Some(error) = first_error {
            warn!(error = %error, "Caching URLs failed");
            return Err(error);
        }

        if let Some(reply) = message.reply {
            let _ = reply.send(true);
        }
        Ok(true)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Router")
            .field("location", &self.location.as_str())
            .field(
                "routes",
                &state.routes.iter().map(|(m, r)| (m.clone(), r.len())).collect::<Vec<_>>(),
            )
            .field("default_handlers", &state.default_handlers.len())
            .field("catch_handler", &state.catch_handler.is_some())
            .finish()
    }
}

/// Run a handler, turning a panic into an error.
async fn run_handler(
    handler: &Arc<dyn RouteHandler>,
    options: RouteHandlerOptions,
) -> Result<Response> {
    match AssertUnwindSafe(handler.respond(options)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(SwError::HandlerPanicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
