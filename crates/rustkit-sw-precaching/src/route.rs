//! Routing requests to precached responses.

use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::trace;
use url::Url;

use rustkit_sw::{MatchContext, MatchResult, Result, Route, RouteHandler, Router};

use crate::controller::{PrecacheController, CACHE_KEY_PARAM, INTEGRITY_PARAM};
use crate::manifest::PrecacheEntry;

/// Extra URLs to try for a request, after the built-in variations.
pub type UrlManipulation = Arc<dyn Fn(&Url) -> Vec<Url> + Send + Sync>;

/// How request URLs are mapped onto manifest URLs.
#[derive(Clone)]
pub struct PrecacheRouteOptions {
    /// Query parameters whose names match any of these are ignored.
    pub ignore_url_parameters_matching: Vec<Regex>,
    /// Appended to URLs ending in `/`.
    pub directory_index: Option<String>,
    /// Also try the URL with `.html` appended.
    pub clean_urls: bool,
    pub url_manipulation: Option<UrlManipulation>,
}

impl Default for PrecacheRouteOptions {
    fn default() -> Self {
        Self {
            ignore_url_parameters_matching: ["^utm_", "^fbclid$"]
                .into_iter()
                .filter_map(|pattern| Regex::new(pattern).ok())
                .collect(),
            directory_index: Some("index.html".to_string()),
            clean_urls: true,
            url_manipulation: None,
        }
    }
}

impl fmt::Debug for PrecacheRouteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrecacheRouteOptions")
            .field(
                "ignore_url_parameters_matching",
                &self
                    .ignore_url_parameters_matching
                    .iter()
                    .map(Regex::as_str)
                    .collect::<Vec<_>>(),
            )
            .field("directory_index", &self.directory_index)
            .field("clean_urls", &self.clean_urls)
            .field("url_manipulation", &self.url_manipulation.is_some())
            .finish()
    }
}

/// Candidate manifest URLs for `url`, most specific first.
///
/// In order: the URL without its fragment, the URL without ignored query
/// parameters, the directory index, the `.html` clean URL, then whatever
/// `url_manipulation` returns.
pub fn generate_url_variations(url: &Url, options: &PrecacheRouteOptions) -> Vec<Url> {
    let mut variations = Vec::new();

    let mut original = url.clone();
    original.set_fragment(None);
    variations.push(original.clone());

    let stripped = remove_ignored_search_params(&original, &options.ignore_url_parameters_matching);
    variations.push(stripped.clone());

    if let Some(index) = &options.directory_index {
        if stripped.path().ends_with('/') {
            let mut directory = stripped.clone();
            directory.set_path(&format!("{}{index}", stripped.path()));
            variations.push(directory);
        }
    }

    if options.clean_urls {
        let mut clean = stripped.clone();
        clean.set_path(&format!("{}.html", stripped.path()));
        variations.push(clean);
    }

    if let Some(manipulate) = &options.url_manipulation {
        variations.extend(manipulate(&original));
    }

    variations
}

fn remove_ignored_search_params(url: &Url, ignore: &[Regex]) -> Url {
    let mut stripped = url.clone();
    if url.query().is_none() {
        return stripped;
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !ignore.iter().any(|re| re.is_match(name)))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}

/// A route answering requests for precached URLs from the precache.
///
/// The match passes `cacheKey` (and `integrity`, when the manifest has one)
/// to the controller's strategy.
pub struct PrecacheRoute {
    route: Route,
}

impl PrecacheRoute {
    pub fn new(controller: &Arc<PrecacheController>, options: PrecacheRouteOptions) -> Self {
        let lookup = Arc::clone(controller);
        let matcher = move |ctx: &MatchContext<'_>| {
            let manifest = lookup.manifest().read();
            for candidate in generate_url_variations(ctx.url, &options) {
                let Some(cache_key) = manifest.cache_key_for(candidate.as_str()) else {
                    continue;
                };
                trace!(url = %ctx.url, matched = %candidate, "Precache route matched");

                let mut params = Map::new();
                params.insert(CACHE_KEY_PARAM.to_string(), Value::String(cache_key.to_string()));
                if let Some(integrity) = manifest.integrity_for(cache_key) {
                    params.insert(INTEGRITY_PARAM.to_string(), Value::String(integrity.to_string()));
                }
                return MatchResult::Object(params);
            }
            MatchResult::No
        };

        let handler: Arc<dyn RouteHandler> = controller.strategy().clone();
        Self {
            route: Route::new(matcher, handler),
        }
    }

    pub fn into_route(self) -> Route {
        self.route
    }
}

impl From<PrecacheRoute> for Arc<Route> {
    fn from(route: PrecacheRoute) -> Self {
        Arc::new(route.route)
    }
}

/// Add `entries` to the controller's manifest and serve them through a
/// [`PrecacheRoute`] registered on `router`.
pub fn precache_and_route(
    controller: &Arc<PrecacheController>,
    router: &Router,
    entries: impl IntoIterator<Item = PrecacheEntry>,
    options: PrecacheRouteOptions,
) -> Result<Arc<Route>> {
    controller.precache(entries)?;
    Ok(router.register_route(PrecacheRoute::new(controller, options)))
}
