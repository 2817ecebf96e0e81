use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::handler::StrategyHandler;
use super::plugins::with_default_cacheability;
use super::strategy::{Strategy, StrategyCore, StrategyOptions};
use crate::error::{Result, SwError};
use crate::http::{Request, Response};
use crate::scope::WorkerScope;

/// Serve from the cache immediately and refresh the cache from the network
/// in the background. Waits for the network only on a cache miss.
#[derive(Debug, Clone)]
pub struct StaleWhileRevalidate {
    core: Arc<StrategyCore>,
}

impl StaleWhileRevalidate {
    pub fn new(scope: &WorkerScope, mut options: StrategyOptions) -> Self {
        options.plugins = with_default_cacheability(options.plugins);
        Self {
            core: StrategyCore::new(scope, options),
        }
    }
}

#[async_trait]
impl Strategy for StaleWhileRevalidate {
    fn core(&self) -> &Arc<StrategyCore> {
        &self.core
    }

    async fn handle_request(
        &self,
        request: &Request,
        handler: &Arc<StrategyHandler>,
    ) -> Result<Response> {
        // A failed refresh must not fail the event.
        let revalidate = {
            let background = Arc::clone(handler);
            let request = request.clone();
            handler.wait_until(async move { Ok(background.fetch_and_cache_put(&request).await) })
        };

        if let Some(cached) = handler.cache_match(request).await? {
            debug!(url = %request.url, "Serving cached response, revalidating in background");
            return Ok(cached);
        }

        revalidate
            .await?
            .and_then(|fetched| fetched)
            .map_err(|err| SwError::no_response(request.url.as_str(), Some(err)))
    }
}
