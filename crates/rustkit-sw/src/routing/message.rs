//! The `CACHE_URLS` control message.
//!
//! A page that loaded resources before the worker took control can post
//! `{ "type": "CACHE_URLS", "payload": { "urlsToCache": [...] } }`; each
//! entry is routed like a regular request so matching routes cache it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::http::RequestOptions;

pub const CACHE_URLS_MESSAGE_TYPE: &str = "CACHE_URLS";

/// One URL to warm, optionally with request options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheUrlEntry {
    Url(String),
    WithOptions(String, RequestOptions),
}

impl CacheUrlEntry {
    pub fn url(&self) -> &str {
        match self {
            CacheUrlEntry::Url(url) | CacheUrlEntry::WithOptions(url, _) => url,
        }
    }

    pub fn options(&self) -> Option<&RequestOptions> {
        match self {
            CacheUrlEntry::Url(_) => None,
            CacheUrlEntry::WithOptions(_, options) => Some(options),
        }
    }
}

impl From<String> for CacheUrlEntry {
    fn from(url: String) -> Self {
        CacheUrlEntry::Url(url)
    }
}

impl From<&str> for CacheUrlEntry {
    fn from(url: &str) -> Self {
        CacheUrlEntry::Url(url.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    urls_to_cache: Vec<CacheUrlEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    payload: Payload,
}

/// A decoded `CACHE_URLS` message.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheUrlsMessage {
    pub urls_to_cache: Vec<CacheUrlEntry>,
}

impl CacheUrlsMessage {
    pub fn new(urls_to_cache: Vec<CacheUrlEntry>) -> Self {
        Self { urls_to_cache }
    }

    /// Decode `data`. Messages of another type yield `Ok(None)`; a
    /// `CACHE_URLS` message with a malformed payload is an error.
    pub fn parse(data: &Value) -> Result<Option<Self>> {
        if data.get("type").and_then(Value::as_str) != Some(CACHE_URLS_MESSAGE_TYPE) {
            return Ok(None);
        }
        let envelope: Envelope = serde_json::from_value(data.clone())?;
        Ok(Some(Self {
            urls_to_cache: envelope.payload.urls_to_cache,
        }))
    }

    /// Encode as the page would post it.
    pub fn to_value(&self) -> Value {
        let envelope = Envelope {
            kind: CACHE_URLS_MESSAGE_TYPE.to_string(),
            payload: Payload {
                urls_to_cache: self.urls_to_cache.clone(),
            },
        };
        serde_json::to_value(envelope).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SwError;
    use serde_json::json;

    #[test]
    fn test_parse_cache_urls() {
        let data = json!({
            "type": "CACHE_URLS",
            "payload": {
                "urlsToCache": [
                    "/styles.css",
                    ["/api/data", {"mode": "no-cors", "headers": {"x-id": "1"}}]
                ]
            }
        });
        let message = CacheUrlsMessage::parse(&data).unwrap().unwrap();
        assert_eq!(message.urls_to_cache.len(), 2);
        assert_eq!(message.urls_to_cache[0], CacheUrlEntry::Url("/styles.css".into()));
        assert_eq!(message.urls_to_cache[1].url(), "/api/data");
        let options = message.urls_to_cache[1].options().unwrap();
        assert_eq!(options.headers.get("x-id").map(String::as_str), Some("1"));

        assert_eq!(CacheUrlsMessage::parse(&message.to_value()).unwrap(), Some(message));
    }

    #[test]
    fn test_other_messages_are_ignored() {
        assert_eq!(CacheUrlsMessage::parse(&json!({"type": "SKIP_WAITING"})).unwrap(), None);
        assert_eq!(CacheUrlsMessage::parse(&json!("hello")).unwrap(), None);
    }

    #[test]
    fn test_malformed_payload_is_config_error() {
        let err = CacheUrlsMessage::parse(&json!({"type": "CACHE_URLS", "payload": {}})).unwrap_err();
        assert!(matches!(err, SwError::Config(_)));
    }
}
