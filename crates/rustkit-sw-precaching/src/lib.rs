//! # RustKit Precaching
//!
//! Versioned precaching for RustKit service workers, built on the
//! `rustkit-sw` strategy engine.
//!
//! ## Features
//!
//! - **Manifest**: URLs with optional revision and integrity
//! - **Install**: sequential fetch of every entry into the precache
//! - **Activate**: removal of entries from previous manifests
//! - **Routing**: URL variations (directory index, clean URLs, ignored params)
//!
//! ## Lifecycle
//!
//! ```text
//! add_to_cache_list(entries)   url → cache key (revision in the query)
//! install(event)               PrecacheStrategy per entry, in order
//! activate(event)              delete keys not in the manifest
//! fetch(event)                 PrecacheRoute → PrecacheStrategy → cache
//! ```

mod cache_key;
mod cleanup;
mod controller;
mod manifest;
mod plugins;
mod route;
mod strategy;

pub use cache_key::{create_cache_key, CacheKey};
pub use cleanup::{cleanup_outdated_caches, delete_outdated_caches, PRECACHE_NAME_MARKER};
pub use controller::{
    CleanupResult, InstallResult, PrecacheController, PrecacheControllerOptions,
};
pub use manifest::{PrecacheEntry, PrecacheManifest};
pub use plugins::{PrecacheCacheKeyPlugin, PrecacheFallbackPlugin, PrecacheInstallReportPlugin};
pub use route::{
    generate_url_variations, precache_and_route, PrecacheRoute, PrecacheRouteOptions,
    UrlManipulation,
};
pub use strategy::{PrecacheStrategy, PrecacheStrategyOptions};
