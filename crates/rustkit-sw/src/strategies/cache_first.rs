use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::handler::StrategyHandler;
use super::strategy::{Strategy, StrategyCore, StrategyOptions};
use crate::error::{Result, SwError};
use crate::http::{Request, Response};
use crate::scope::WorkerScope;

/// Serve from the cache; on a miss, go to the network and cache the result.
#[derive(Debug, Clone)]
pub struct CacheFirst {
    core: Arc<StrategyCore>,
}

impl CacheFirst {
    pub fn new(scope: &WorkerScope, options: StrategyOptions) -> Self {
        Self {
            core: StrategyCore::new(scope, options),
        }
    }
}

#[async_trait]
impl Strategy for CacheFirst {
    fn core(&self) -> &Arc<StrategyCore> {
        &self.core
    }

    async fn handle_request(
        &self,
        request: &Request,
        handler: &Arc<StrategyHandler>,
    ) -> Result<Response> {
        if let Some(cached) = handler.cache_match(request).await? {
            return Ok(cached);
        }
        debug!(url = %request.url, cache_name = %self.core.cache_name(), "Cache miss, fetching");
        handler
            .fetch_and_cache_put(request)
            .await
            .map_err(|err| SwError::no_response(request.url.as_str(), Some(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ExtendableEvent;
    use crate::strategies::HandlerOptions;
    use crate::testing::{test_scope, test_url, StubFetcher};

    #[tokio::test]
    async fn test_cache_first_fetches_once_then_serves_cache() {
        let fetcher = StubFetcher::new();
        fetcher.respond_ok("https://example.com/logo.png", "png");
        let (scope, _) = test_scope(fetcher.clone());
        let strategy = CacheFirst::new(&scope, StrategyOptions::default());

        for _ in 0..2 {
            let options = HandlerOptions::new(
                Request::get(test_url("/logo.png")),
                ExtendableEvent::fetch(),
            );
            let response = strategy.handle(options).await.unwrap();
            assert_eq!(response.text().unwrap(), "png");
        }
        assert_eq!(fetcher.request_count("https://example.com/logo.png"), 1);
    }

    #[tokio::test]
    async fn test_cache_first_miss_and_network_failure() {
        let fetcher = StubFetcher::new();
        let (scope, _) = test_scope(fetcher);
        let strategy = CacheFirst::new(&scope, StrategyOptions::default());

        let options = HandlerOptions::new(Request::get(test_url("/gone")), ExtendableEvent::fetch());
        match strategy.handle(options).await {
            Err(SwError::NoResponse { cause: Some(cause), .. }) => {
                assert!(matches!(*cause, SwError::Network(_)))
            }
            other => panic!("expected NoResponse, got {other:?}"),
        }
    }
}
