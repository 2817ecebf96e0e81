use http::Method;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::{MatchContext, MatchResult, RouteHandler};
use crate::error::Result;
use crate::http::RequestMode;

/// Route predicate. Must not have side effects.
pub type MatchCallback = Arc<dyn Fn(&MatchContext<'_>) -> MatchResult + Send + Sync>;

/// A predicate paired with a handler, for one request method.
///
/// Build with the `with_*` methods, then hand it to a
/// [`Router`](super::Router); a registered route is never modified.
pub struct Route {
    matcher: MatchCallback,
    handler: Arc<dyn RouteHandler>,
    method: Method,
    catch_handler: Option<Arc<dyn RouteHandler>>,
}

impl Route {
    /// A GET route.
    pub fn new<M>(matcher: M, handler: Arc<dyn RouteHandler>) -> Self
    where
        M: Fn(&MatchContext<'_>) -> MatchResult + Send + Sync + 'static,
    {
        Self::from_callback(Arc::new(matcher), handler)
    }

    fn from_callback(matcher: MatchCallback, handler: Arc<dyn RouteHandler>) -> Self {
        Self {
            matcher,
            handler,
            method: Method::GET,
            catch_handler: None,
        }
    }

    /// Match the full URL against `regex`; capture groups become params.
    ///
    /// Cross-origin URLs only match when the match starts at the beginning
    /// of the URL, so `/api/` does not accidentally match third-party hosts.
    pub fn regex(regex: Regex, handler: Arc<dyn RouteHandler>) -> Self {
        Self::new(
            move |ctx: &MatchContext<'_>| {
                let href = ctx.url.as_str();
                let Some(captures) = regex.captures(href) else {
                    return MatchResult::No;
                };
                let start = captures.get(0).map_or(0, |m| m.start());
                if !ctx.same_origin && start != 0 {
                    debug!(
                        url = %href,
                        pattern = %regex,
                        "Cross-origin URL matched mid-string, ignoring"
                    );
                    return MatchResult::No;
                }
                MatchResult::Captures(
                    captures
                        .iter()
                        .skip(1)
                        .map(|group| group.map_or_else(String::new, |m| m.as_str().to_string()))
                        .collect(),
                )
            },
            handler,
        )
    }

    /// Match navigation requests whose path and query pass the allow and
    /// deny lists.
    pub fn navigation(handler: Arc<dyn RouteHandler>, options: NavigationRouteOptions) -> Self {
        Self::new(
            move |ctx: &MatchContext<'_>| {
                if ctx.request.mode != RequestMode::Navigate {
                    return MatchResult::No;
                }
                let target = match ctx.url.query() {
                    Some(query) if !query.is_empty() => format!("{}?{}", ctx.url.path(), query),
                    _ => ctx.url.path().to_string(),
                };
                if options.denylist.iter().any(|re| re.is_match(&target)) {
                    debug!(path = %target, "Navigation denied");
                    return MatchResult::No;
                }
                let allowed = match &options.allowlist {
                    Some(allowlist) => allowlist.iter().any(|re| re.is_match(&target)),
                    None => true,
                };
                allowed.into()
            },
            handler,
        )
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Handler tried when this route's handler fails.
    pub fn with_catch_handler(mut self, handler: Arc<dyn RouteHandler>) -> Self {
        self.catch_handler = Some(handler);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn handler(&self) -> &Arc<dyn RouteHandler> {
        &self.handler
    }

    pub fn catch_handler(&self) -> Option<&Arc<dyn RouteHandler>> {
        self.catch_handler.as_ref()
    }

    pub fn matches(&self, ctx: &MatchContext<'_>) -> MatchResult {
        (self.matcher)(ctx)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("catch_handler", &self.catch_handler.is_some())
            .finish_non_exhaustive()
    }
}

/// Filters for [`Route::navigation`], tested against path plus query.
#[derive(Debug, Clone, Default)]
pub struct NavigationRouteOptions {
    /// `None` allows every navigation not denied.
    pub allowlist: Option<Vec<Regex>>,
    /// Checked first; any match rejects the navigation.
    pub denylist: Vec<Regex>,
}

/// The shapes accepted by [`Router::register_capture`](super::Router::register_capture).
pub enum RouteCapture {
    /// A URL, resolved against the worker location and compared exactly.
    Path(String),
    Regex(Regex),
    Matcher(MatchCallback),
}

impl RouteCapture {
    pub fn matcher<M>(matcher: M) -> Self
    where
        M: Fn(&MatchContext<'_>) -> MatchResult + Send + Sync + 'static,
    {
        RouteCapture::Matcher(Arc::new(matcher))
    }

    pub(crate) fn into_route(self, handler: Arc<dyn RouteHandler>, location: &Url) -> Result<Route> {
        Ok(match self {
            RouteCapture::Path(path) => {
                let capture_url = location.join(&path)?;
                if path.contains('*') {
                    warn!(
                        capture = %path,
                        "Route captures are matched literally; use a regex for wildcards"
                    );
                }
                Route::new(
                    move |ctx: &MatchContext<'_>| (ctx.url.as_str() == capture_url.as_str()).into(),
                    handler,
                )
            }
            RouteCapture::Regex(regex) => Route::regex(regex, handler),
            RouteCapture::Matcher(matcher) => Route::from_callback(matcher, handler),
        })
    }
}

impl From<&str> for RouteCapture {
    fn from(path: &str) -> Self {
        RouteCapture::Path(path.to_string())
    }
}

impl From<String> for RouteCapture {
    fn from(path: String) -> Self {
        RouteCapture::Path(path)
    }
}

impl From<Regex> for RouteCapture {
    fn from(regex: Regex) -> Self {
        RouteCapture::Regex(regex)
    }
}
