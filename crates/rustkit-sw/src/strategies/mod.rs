//! Caching strategies and the plugin pipeline they run.
//!
//! ```text
//! Strategy::handle_all
//!     └── StrategyHandler (one per request)
//!             ├── cache_match   cacheKeyWillBeUsed → cache → cachedResponseWillBeUsed
//!             ├── fetch         requestWillFetch → network → fetchDidSucceed | fetchDidFail
//!             └── cache_put     cacheKeyWillBeUsed → cacheWillUpdate → cache → cacheDidUpdate
//! ```

mod cache_first;
mod cache_only;
mod handler;
mod network_first;
mod network_only;
pub mod plugin;
mod plugins;
mod stale_while_revalidate;
mod strategy;

pub use cache_first::CacheFirst;
pub use cache_only::CacheOnly;
pub use handler::{HandlerOptions, StrategyHandler};
pub use network_first::NetworkFirst;
pub use network_only::NetworkOnly;
pub use plugin::{CacheKeyMode, PluginCallback, PluginState, StrategyPlugin};
pub use plugins::{CacheOkAndOpaquePlugin, CacheableResponsePlugin};
pub use stale_while_revalidate::StaleWhileRevalidate;
pub use strategy::{Strategy, StrategyCore, StrategyOptions};
