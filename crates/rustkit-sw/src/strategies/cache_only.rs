use async_trait::async_trait;
use std::sync::Arc;

use super::handler::StrategyHandler;
use super::strategy::{Strategy, StrategyCore, StrategyOptions};
use crate::error::{Result, SwError};
use crate::http::{Request, Response};
use crate::scope::WorkerScope;

/// Serve from the cache only.
#[derive(Debug, Clone)]
pub struct CacheOnly {
    core: Arc<StrategyCore>,
}

impl CacheOnly {
    pub fn new(scope: &WorkerScope, options: StrategyOptions) -> Self {
        Self {
            core: StrategyCore::new(scope, options),
        }
    }
}

#[async_trait]
impl Strategy for CacheOnly {
    fn core(&self) -> &Arc<StrategyCore> {
        &self.core
    }

    async fn handle_request(
        &self,
        request: &Request,
        handler: &Arc<StrategyHandler>,
    ) -> Result<Response> {
        handler
            .cache_match(request)
            .await?
            .ok_or_else(|| SwError::no_response(request.url.as_str(), None))
    }
}
