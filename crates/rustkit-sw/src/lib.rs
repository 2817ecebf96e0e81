//! # RustKit Service Workers
//!
//! Request interception and caching-strategy engine for RustKit service
//! workers.
//!
//! ## Features
//!
//! - **Routing**: first-match routes per method, default and catch handlers
//! - **Strategies**: cache-first, network-first, stale-while-revalidate, ...
//! - **Plugins**: ordered callbacks at every cache and network step
//! - **Cache API**: `caches.open()`, `cache.match()`, `cache.put()`
//! - **Lifecycle**: extendable install, activate, fetch and message events
//!
//! ## Architecture
//!
//! ```text
//! FetchEvent / MessageEvent
//!     │
//!     └── Router
//!             ├── Route (predicate → handler), first match wins
//!             ├── default handler (per method)
//!             └── catch handler
//!
//! Strategy (CacheFirst, NetworkFirst, ...)
//!     └── StrategyHandler (one per request)
//!             ├── plugins → CacheStorage → Cache
//!             └── plugins → Fetcher → network
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod fetch;
pub mod http;
pub mod integrity;
pub mod logging;
pub mod quota;
pub mod routing;
pub mod scope;
pub mod strategies;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use cache::{Cache, CacheQueryOptions, CacheStorage, MemoryCache, MemoryCacheStorage};
pub use config::{CacheNameDetails, LogSettings, NetworkConfig, WorkerConfig};
pub use error::{Result, SwError};
pub use event::{Completion, EventKind, ExtendableEvent, FetchEvent, MessageEvent};
pub use fetch::{Fetcher, NetworkFetcher};
pub use self::http::{CacheMode, CredentialsMode, FetchOptions, Request, RequestMode, Response};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use quota::{execute_quota_error_callbacks, register_quota_error_callback};
pub use routing::{
    handler_fn, MatchContext, MatchResult, Route, RouteHandler, RouteHandlerOptions, RouteParams,
    Router,
};
pub use scope::{CacheNames, WorkerScope};
pub use strategies::{
    CacheFirst, CacheOnly, HandlerOptions, NetworkFirst, NetworkOnly, StaleWhileRevalidate,
    Strategy, StrategyHandler, StrategyOptions, StrategyPlugin,
};
