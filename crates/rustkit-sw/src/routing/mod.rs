//! Request routing.
//!
//! A [`Router`] keeps an ordered list of [`Route`]s per method. The first
//! route whose predicate matches handles the request; otherwise the
//! method's default handler does, if one is set.

mod message;
mod route;
mod router;

pub use message::{CacheUrlEntry, CacheUrlsMessage, CACHE_URLS_MESSAGE_TYPE};
pub use route::{MatchCallback, NavigationRouteOptions, Route, RouteCapture};
pub use router::Router;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use url::Url;

use crate::error::Result;
use crate::event::ExtendableEvent;
use crate::http::{Request, Response};

/// What a route predicate sees.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub url: &'a Url,
    pub request: &'a Request,
    /// Whether `url` has the worker's origin.
    pub same_origin: bool,
    pub event: &'a ExtendableEvent,
}

/// Outcome of a route predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    No,
    Yes,
    Captures(Vec<String>),
    Object(Map<String, Value>),
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        !matches!(self, MatchResult::No)
    }

    /// Params handed to the handler. `Yes`, empty captures and empty objects
    /// carry none.
    pub fn into_params(self) -> Option<RouteParams> {
        match self {
            MatchResult::Captures(captures) if !captures.is_empty() => {
                Some(RouteParams::Captures(captures))
            }
            MatchResult::Object(object) if !object.is_empty() => Some(RouteParams::Object(object)),
            _ => None,
        }
    }
}

impl From<bool> for MatchResult {
    fn from(matched: bool) -> Self {
        if matched {
            MatchResult::Yes
        } else {
            MatchResult::No
        }
    }
}

/// Non-empty match data passed to a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteParams {
    Captures(Vec<String>),
    Object(Map<String, Value>),
}

impl RouteParams {
    /// String value of `key` in object params.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self {
            RouteParams::Object(object) => object.get(key).and_then(Value::as_str),
            RouteParams::Captures(_) => None,
        }
    }

    pub fn captures(&self) -> Option<&[String]> {
        match self {
            RouteParams::Captures(captures) => Some(captures),
            RouteParams::Object(_) => None,
        }
    }
}

/// Input of a route handler.
#[derive(Debug, Clone)]
pub struct RouteHandlerOptions {
    pub url: Url,
    pub request: Request,
    pub event: ExtendableEvent,
    pub params: Option<RouteParams>,
}

/// Something that turns a routed request into a response.
///
/// Every [`Strategy`](crate::strategies::Strategy) is a route handler.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn respond(&self, options: RouteHandlerOptions) -> Result<Response>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> RouteHandler for FnHandler<F>
where
    F: Fn(RouteHandlerOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    async fn respond(&self, options: RouteHandlerOptions) -> Result<Response> {
        (self.0)(options).await
    }
}

/// Wrap an async closure as a route handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn RouteHandler>
where
    F: Fn(RouteHandlerOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
