use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::handler::StrategyHandler;
use super::plugins::with_default_cacheability;
use super::strategy::{Strategy, StrategyCore, StrategyOptions};
use crate::error::{Result, SwError};
use crate::http::{Request, Response};
use crate::scope::WorkerScope;

/// Prefer the network; fall back to the cache when it fails or, with a
/// timeout configured, when it is too slow.
#[derive(Debug, Clone)]
pub struct NetworkFirst {
    core: Arc<StrategyCore>,
    network_timeout: Option<Duration>,
}

impl NetworkFirst {
    pub fn new(scope: &WorkerScope, mut options: StrategyOptions) -> Self {
        options.plugins = with_default_cacheability(options.plugins);
        Self {
            core: StrategyCore::new(scope, options),
            network_timeout: None,
        }
    }

    /// Answer from the cache if the network has not responded after `timeout`.
    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = Some(timeout);
        self
    }
}

/// Network response, else cached response. The inner error means neither
/// source produced one.
async fn network_then_cache(
    handler: Arc<StrategyHandler>,
    request: Request,
) -> Result<std::result::Result<Response, SwError>> {
    let error = match handler.fetch_and_cache_put(&request).await {
        Ok(response) => return Ok(Ok(response)),
        Err(err) => err,
    };
    debug!(url = %request.url, error = %error, "Network failed, falling back to cache");
    Ok(match handler.cache_match(&request).await? {
        Some(cached) => Ok(cached),
        None => Err(SwError::no_response(request.url.as_str(), Some(error))),
    })
}

#[async_trait]
impl Strategy for NetworkFirst {
    fn core(&self) -> &Arc<StrategyCore> {
        &self.core
    }

    async fn handle_request(
        &self,
        request: &Request,
        handler: &Arc<StrategyHandler>,
    ) -> Result<Response> {
        let mut network =
            handler.wait_until(network_then_cache(Arc::clone(handler), request.clone()));

        let Some(timeout) = self.network_timeout else {
            return network.await??;
        };

        tokio::select! {
            joined = &mut network => joined??,
            _ = tokio::time::sleep(timeout) => {
                debug!(url = %request.url, ?timeout, "Network timed out, trying cache");
                match handler.cache_match(request).await? {
                    Some(cached) => Ok(cached),
                    None => network.await??,
                }
            }
        }
    }
}
