//! Error types for the service worker engine.

use http::Method;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for service worker operations.
pub type Result<T> = std::result::Result<T, SwError>;

/// Errors that can occur while routing, running strategies or precaching.
///
/// Payloads are plain strings so the error can be cloned into every
/// listener of a shared background completion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SwError {
    // ---- configuration ----
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("No routes registered for method {0}")]
    NoRoutesForMethod(Method),

    #[error("Route is not registered for method {0}")]
    RouteNotFound(Method),

    #[error("Conflicting precache entries: {first} and {second} map the same URL to different cache keys")]
    ConflictingEntries { first: String, second: String },

    #[error("Conflicting integrity values for precache entry {url}")]
    ConflictingIntegrities { url: String },

    // ---- pipeline stages ----
    #[error("A requestWillFetch plugin failed: {0}")]
    PluginRequestWillFetch(String),

    #[error("A cacheWillUpdate plugin failed: {0}")]
    PluginCacheWillUpdate(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Attempted to cache {url} without a response")]
    CachePutWithNoResponse { url: String },

    #[error("Unable to cache {url}: {method} requests cannot be cached")]
    NonGetRequest { url: String, method: Method },

    // ---- transport ----
    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    // ---- storage ----
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // ---- not found ----
    #[error("No response could be produced for {url}{}", .cause.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    NoResponse {
        url: String,
        cause: Option<Box<SwError>>,
    },

    #[error("{url} is not in the precache manifest")]
    NotPrecached { url: String },

    #[error("Precaching {url} failed: response with status {status} is not cacheable")]
    BadPrecachingResponse { url: String, status: u16 },

    // ---- everything else ----
    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SwError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a plugin error.
    pub fn plugin(message: impl Into<String>) -> Self {
        Self::Plugin(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a no-response error for a URL.
    pub fn no_response(url: impl Into<String>, cause: Option<SwError>) -> Self {
        Self::NoResponse {
            url: url.into(),
            cause: cause.map(Box::new),
        }
    }

    /// Whether this is a storage quota failure.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, SwError::QuotaExceeded(_))
    }

    /// Get the error category, as used in log fields.
    pub fn category(&self) -> &'static str {
        match self {
            SwError::InvalidUrl(_)
            | SwError::Config(_)
            | SwError::NoRoutesForMethod(_)
            | SwError::RouteNotFound(_)
            | SwError::ConflictingEntries { .. }
            | SwError::ConflictingIntegrities { .. } => "config",
            SwError::PluginRequestWillFetch(_)
            | SwError::PluginCacheWillUpdate(_)
            | SwError::Plugin(_)
            | SwError::CachePutWithNoResponse { .. }
            | SwError::NonGetRequest { .. } => "pipeline",
            SwError::Network(_) | SwError::Timeout(_) => "transport",
            SwError::QuotaExceeded(_) | SwError::Storage(_) => "storage",
            SwError::NoResponse { .. }
            | SwError::NotPrecached { .. }
            | SwError::BadPrecachingResponse { .. } => "not_found",
            SwError::HandlerPanicked(_) | SwError::Internal(_) => "internal",
        }
    }
}

impl From<url::ParseError> for SwError {
    fn from(err: url::ParseError) -> Self {
        SwError::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for SwError {
    fn from(err: serde_json::Error) -> Self {
        SwError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SwError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            SwError::HandlerPanicked(err.to_string())
        } else {
            SwError::Internal(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(SwError::network("offline").category(), "transport");
        assert_eq!(SwError::QuotaExceeded("full".into()).category(), "storage");
        assert_eq!(
            SwError::NotPrecached { url: "/x".into() }.category(),
            "not_found"
        );
        assert_eq!(SwError::RouteNotFound(Method::GET).category(), "config");
    }

    #[test]
    fn test_no_response_message_includes_cause() {
        let err = SwError::no_response("https://example.com/a", Some(SwError::network("offline")));
        let message = err.to_string();
        assert!(message.contains("https://example.com/a"));
        assert!(message.contains("offline"));

        let bare = SwError::no_response("https://example.com/a", None);
        assert_eq!(
            bare.to_string(),
            "No response could be produced for https://example.com/a"
        );
    }

    #[test]
    fn test_quota_detection() {
        assert!(SwError::QuotaExceeded("x".into()).is_quota_exceeded());
        assert!(!SwError::storage("x").is_quota_exceeded());
    }
}
