//! Strategy plugins: optional callbacks consulted at each pipeline stage.
//!
//! A plugin declares the callbacks it takes part in through
//! [`StrategyPlugin::implements`]. Callbacks it does not implement are
//! skipped entirely, so "no plugin listens" is distinguishable from "a
//! plugin listens and returns its input unchanged".

use async_trait::async_trait;
use http::Extensions;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::cache::CacheQueryOptions;
use crate::error::{Result, SwError};
use crate::event::ExtendableEvent;
use crate::http::{Request, Response};
use crate::routing::RouteParams;

/// Pipeline stages a plugin can hook into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginCallback {
    CacheKeyWillBeUsed,
    RequestWillFetch,
    FetchDidSucceed,
    FetchDidFail,
    CachedResponseWillBeUsed,
    CacheWillUpdate,
    CacheDidUpdate,
    HandlerWillStart,
    HandlerWillRespond,
    HandlerDidRespond,
    HandlerDidComplete,
    HandlerDidError,
}

impl PluginCallback {
    pub fn name(&self) -> &'static str {
        match self {
            PluginCallback::CacheKeyWillBeUsed => "cacheKeyWillBeUsed",
            PluginCallback::RequestWillFetch => "requestWillFetch",
            PluginCallback::FetchDidSucceed => "fetchDidSucceed",
            PluginCallback::FetchDidFail => "fetchDidFail",
            PluginCallback::CachedResponseWillBeUsed => "cachedResponseWillBeUsed",
            PluginCallback::CacheWillUpdate => "cacheWillUpdate",
            PluginCallback::CacheDidUpdate => "cacheDidUpdate",
            PluginCallback::HandlerWillStart => "handlerWillStart",
            PluginCallback::HandlerWillRespond => "handlerWillRespond",
            PluginCallback::HandlerDidRespond => "handlerDidRespond",
            PluginCallback::HandlerDidComplete => "handlerDidComplete",
            PluginCallback::HandlerDidError => "handlerDidError",
        }
    }
}

impl fmt::Display for PluginCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a cache key is resolved for a lookup or for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKeyMode {
    Read,
    Write,
}

/// Per-plugin state that lives as long as one strategy handler.
///
/// Lets a plugin correlate, e.g., `handler_will_start` with a later
/// `cached_response_will_be_used` for the same request.
#[derive(Clone, Default)]
pub struct PluginState(Arc<Mutex<Extensions>>);

impl PluginState {
    pub fn insert<T: Clone + Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.0.lock().insert(value)
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.0.lock().get::<T>().cloned()
    }

    pub fn remove<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.0.lock().remove::<T>()
    }
}

impl fmt::Debug for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginState").finish_non_exhaustive()
    }
}

pub struct CacheKeyWillBeUsedParams {
    pub request: Request,
    pub mode: CacheKeyMode,
    pub params: Option<RouteParams>,
    pub event: ExtendableEvent,
    pub state: PluginState,
}

pub struct RequestWillFetchParams {
    pub request: Request,
    pub event: ExtendableEvent,
    pub state: PluginState,
}

pub struct FetchDidSucceedParams {
    pub request: Request,
    pub response: Response,
    pub event: ExtendableEvent,
    pub state: PluginState,
}

pub struct FetchDidFailParams {
    /// The request before any `request_will_fetch` transformation.
    pub original_request: Request,
    /// The request that was actually sent.
    pub request: Request,
    pub error: SwError,
    pub event: ExtendableEvent,
    pub state: PluginState,
}

pub struct CachedResponseWillBeUsedParams {
    pub cache_name: String,
    pub match_options: CacheQueryOptions,
    pub request: Request,
    pub cached_response: Option<Response>,
    pub event: ExtendableEvent,
    pub state: PluginState,
}

pub struct CacheWillUpdateParams {
    pub request: Request,
    pub response: Response,
    pub event: ExtendableEvent,
    pub state: PluginState,
}

pub struct CacheDidUpdateParams {
    pub cache_name: String,
    pub request: Request,
    pub old_response: Option<Response>,
    pub new_response: Response,
    pub event: ExtendableEvent,
    pub state: PluginState,
}

pub struct HandlerWillStartParams {
    pub request: Request,
    pub event: ExtendableEvent,
    pub state: PluginState,
}

pub struct HandlerWillRespondParams {
    pub request: Request,
    pub response: Response,
    pub event: ExtendableEvent,
    pub state: PluginState,
}

pub struct HandlerDidRespondParams {
    pub request: Request,
    pub response: Option<Response>,
    pub event: ExtendableEvent,
    pub state: PluginState,
}

pub struct HandlerDidCompleteParams {
    pub request: Request,
    pub response: Option<Response>,
    pub error: Option<SwError>,
    pub event: ExtendableEvent,
    pub state: PluginState,
}

pub struct HandlerDidErrorParams {
    pub request: Request,
    pub error: SwError,
    pub event: ExtendableEvent,
    pub state: PluginState,
}

/// A set of optional strategy callbacks.
///
/// Transforming callbacks receive the previous plugin's output as input.
/// Returning `None` from a vetoing callback (`cached_response_will_be_used`,
/// `cache_will_update`) rejects the candidate response.
#[async_trait]
pub trait StrategyPlugin: Send + Sync {
    /// Whether this plugin takes part in `callback`.
    fn implements(&self, callback: PluginCallback) -> bool;

    async fn cache_key_will_be_used(&self, params: CacheKeyWillBeUsedParams) -> Result<Request> {
        Ok(params.request)
    }

    async fn request_will_fetch(&self, params: RequestWillFetchParams) -> Result<Request> {
        Ok(params.request)
    }

    async fn fetch_did_succeed(&self, params: FetchDidSucceedParams) -> Result<Response> {
        Ok(params.response)
    }

    async fn fetch_did_fail(&self, _params: FetchDidFailParams) -> Result<()> {
        Ok(())
    }

    async fn cached_response_will_be_used(
        &self,
        params: CachedResponseWillBeUsedParams,
    ) -> Result<Option<Response>> {
        Ok(params.cached_response)
    }

    async fn cache_will_update(&self, params: CacheWillUpdateParams) -> Result<Option<Response>> {
        Ok(Some(params.response))
    }

    async fn cache_did_update(&self, _params: CacheDidUpdateParams) -> Result<()> {
        Ok(())
    }

    async fn handler_will_start(&self, _params: HandlerWillStartParams) -> Result<()> {
        Ok(())
    }

    async fn handler_will_respond(&self, params: HandlerWillRespondParams) -> Result<Response> {
        Ok(params.response)
    }

    async fn handler_did_respond(&self, _params: HandlerDidRespondParams) -> Result<()> {
        Ok(())
    }

    async fn handler_did_complete(&self, _params: HandlerDidCompleteParams) -> Result<()> {
        Ok(())
    }

    /// Offer a fallback response after the strategy failed.
    async fn handler_did_error(&self, _params: HandlerDidErrorParams) -> Result<Option<Response>> {
        Ok(None)
    }
}

/// Identity of a plugin instance.
pub fn plugin_id(plugin: &Arc<dyn StrategyPlugin>) -> usize {
    Arc::as_ptr(plugin) as *const () as usize
}

/// Whether two handles point at the same plugin instance.
pub fn same_plugin(a: &Arc<dyn StrategyPlugin>, b: &Arc<dyn StrategyPlugin>) -> bool {
    plugin_id(a) == plugin_id(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl StrategyPlugin for Noop {
        fn implements(&self, _callback: PluginCallback) -> bool {
            false
        }
    }

    #[test]
    fn test_plugin_identity() {
        let a: Arc<dyn StrategyPlugin> = Arc::new(Noop);
        let b: Arc<dyn StrategyPlugin> = Arc::new(Noop);
        assert!(same_plugin(&a, &a.clone()));
        assert!(!same_plugin(&a, &b));
    }

    #[test]
    fn test_plugin_state_is_shared_between_clones() {
        #[derive(Clone, Debug, PartialEq)]
        struct Seen(&'static str);

        let state = PluginState::default();
        let other = state.clone();
        state.insert(Seen("first"));
        assert_eq!(other.get::<Seen>(), Some(Seen("first")));
        assert_eq!(other.remove::<Seen>(), Some(Seen("first")));
        assert!(state.get::<Seen>().is_none());
    }

    #[test]
    fn test_callback_names() {
        assert_eq!(PluginCallback::CacheWillUpdate.to_string(), "cacheWillUpdate");
        assert_eq!(PluginCallback::HandlerDidError.name(), "handlerDidError");
    }
}
