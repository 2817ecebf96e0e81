use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::handler::StrategyHandler;
use super::strategy::{Strategy, StrategyCore, StrategyOptions};
use crate::error::{Result, SwError};
use crate::http::{Request, Response};
use crate::scope::WorkerScope;

/// Always go to the network.
#[derive(Debug, Clone)]
pub struct NetworkOnly {
    core: Arc<StrategyCore>,
    network_timeout: Option<Duration>,
}

impl NetworkOnly {
    pub fn new(scope: &WorkerScope, options: StrategyOptions) -> Self {
        Self {
            core: StrategyCore::new(scope, options),
            network_timeout: None,
        }
    }

    /// Fail when the network takes longer than `timeout`.
    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Strategy for NetworkOnly {
    fn core(&self) -> &Arc<StrategyCore> {
        &self.core
    }

    async fn handle_request(
        &self,
        request: &Request,
        handler: &Arc<StrategyHandler>,
    ) -> Result<Response> {
        let fetched = match self.network_timeout {
            Some(timeout) => tokio::time::timeout(timeout, handler.fetch(request))
                .await
                .unwrap_or(Err(SwError::Timeout(timeout))),
            None => handler.fetch(request).await,
        };
        fetched.map_err(|err| SwError::no_response(request.url.as_str(), Some(err)))
    }
}
