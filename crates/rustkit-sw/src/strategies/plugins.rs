//! Reusable cacheability plugins.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::plugin::{CacheWillUpdateParams, PluginCallback, StrategyPlugin};
use crate::error::{Result, SwError};
use crate::http::Response;

/// Caches responses with status 200, plus opaque responses (status 0).
///
/// Installed by default on strategies that talk to the network when the
/// caller supplied no `cache_will_update` plugin.
#[derive(Debug, Default)]
pub struct CacheOkAndOpaquePlugin;

#[async_trait]
impl StrategyPlugin for CacheOkAndOpaquePlugin {
    fn implements(&self, callback: PluginCallback) -> bool {
        callback == PluginCallback::CacheWillUpdate
    }

    async fn cache_will_update(&self, params: CacheWillUpdateParams) -> Result<Option<Response>> {
        let response = params.response;
        Ok(matches!(response.status, 0 | 200).then_some(response))
    }
}

/// Prepend [`CacheOkAndOpaquePlugin`] unless some plugin already decides
/// cacheability.
pub(crate) fn with_default_cacheability(
    mut plugins: Vec<Arc<dyn StrategyPlugin>>,
) -> Vec<Arc<dyn StrategyPlugin>> {
    if !plugins
        .iter()
        .any(|p| p.implements(PluginCallback::CacheWillUpdate))
    {
        plugins.insert(0, Arc::new(CacheOkAndOpaquePlugin));
    }
    plugins
}

/// Caches a response only if it has one of the given statuses and/or one of
/// the given header values.
#[derive(Debug, Clone)]
pub struct CacheableResponsePlugin {
    statuses: Option<Vec<u16>>,
    headers: Option<HashMap<String, String>>,
}

impl CacheableResponsePlugin {
    /// At least one of `statuses` or `headers` must be given.
    pub fn new(
        statuses: Option<Vec<u16>>,
        headers: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        if statuses.is_none() && headers.is_none() {
            return Err(SwError::Config(
                "CacheableResponsePlugin needs statuses or headers".to_string(),
            ));
        }
        Ok(Self { statuses, headers })
    }

    /// Cache only responses with one of `statuses`.
    pub fn statuses(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            statuses: Some(statuses.into_iter().collect()),
            headers: None,
        }
    }

    pub fn is_response_cacheable(&self, response: &Response) -> bool {
        let mut cacheable = true;
        if let Some(statuses) = &self.statuses {
            cacheable = statuses.contains(&response.status);
        }
        if let (Some(headers), true) = (&self.headers, cacheable) {
            cacheable = headers
                .iter()
                .any(|(name, value)| response.header(name) == Some(value.as_str()));
        }
        if !cacheable {
            debug!(status = response.status, "Response is not cacheable");
        }
        cacheable
    }
}

#[async_trait]
impl StrategyPlugin for CacheableResponsePlugin {
    fn implements(&self, callback: PluginCallback) -> bool {
        callback == PluginCallback::CacheWillUpdate
    }

    async fn cache_will_update(&self, params: CacheWillUpdateParams) -> Result<Option<Response>> {
        let response = params.response;
        Ok(self.is_response_cacheable(&response).then_some(response))
    }
}
