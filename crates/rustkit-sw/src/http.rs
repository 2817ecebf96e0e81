//! Request and response values flowing through routes, strategies and caches.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use crate::error::{Result, SwError};

/// Request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Top-level or frame navigation.
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

/// HTTP cache mode for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    #[default]
    Default,
    NoStore,
    /// Bypass any HTTP cache on the way to the network.
    Reload,
    NoCache,
    ForceCache,
    OnlyIfCached,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::Default => "default",
            CacheMode::NoStore => "no-store",
            CacheMode::Reload => "reload",
            CacheMode::NoCache => "no-cache",
            CacheMode::ForceCache => "force-cache",
            CacheMode::OnlyIfCached => "only-if-cached",
        }
    }
}

/// Credentials mode for requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialsMode {
    /// Never send cookies.
    Omit,
    /// Send cookies only for same-origin requests.
    #[default]
    SameOrigin,
    /// Always send cookies.
    Include,
}

/// An outgoing request as seen by the interception layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
    pub cache: CacheMode,
    pub credentials: CredentialsMode,
    /// Subresource integrity metadata, e.g. `sha256-...`.
    pub integrity: Option<String>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a request with an explicit method.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::default(),
            cache: CacheMode::default(),
            credentials: CredentialsMode::default(),
            integrity: None,
        }
    }

    /// Parse `url` against `base` and create a GET request.
    pub fn parse(url: &str, base: &Url) -> Result<Self> {
        Ok(Self::get(base.join(url)?))
    }

    /// Create a navigation request.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).mode(RequestMode::Navigate)
    }

    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn cache_mode(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    pub fn credentials(mut self, credentials: CredentialsMode) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn integrity(mut self, integrity: Option<String>) -> Self {
        self.integrity = integrity;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// A copy of this request pointing at another URL, keeping only its headers.
    pub fn with_url(&self, url: Url) -> Self {
        let mut request = Self::get(url);
        request.headers = self.headers.clone();
        request
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Build a request from a URL plus the options carried by a cache-warming message.
    pub fn from_options(url: Url, options: &RequestOptions) -> Result<Self> {
        let method = match options.method.as_deref() {
            Some(m) => Method::from_bytes(m.as_bytes())
                .map_err(|e| SwError::Config(format!("invalid method {m}: {e}")))?,
            None => Method::GET,
        };
        let mut request = Self::new(method, url);
        if let Some(mode) = options.mode {
            request.mode = mode;
        }
        if let Some(cache) = options.cache {
            request.cache = cache;
        }
        if let Some(credentials) = options.credentials {
            request.credentials = credentials;
        }
        request.integrity = options.integrity.clone();
        for (name, value) in &options.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                request.headers.insert(n, v);
            }
        }
        Ok(request)
    }
}

/// Request options as they appear on the wire (`RequestInit`-like).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
    pub mode: Option<RequestMode>,
    pub cache: Option<CacheMode>,
    pub credentials: Option<CredentialsMode>,
    pub integrity: Option<String>,
}

/// Options a strategy applies to every non-navigation network request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    pub headers: HeaderMap,
    pub mode: Option<RequestMode>,
    pub cache: Option<CacheMode>,
    pub credentials: Option<CredentialsMode>,
}

impl FetchOptions {
    /// Apply these options on top of a request.
    pub fn apply(&self, mut request: Request) -> Request {
        for (name, value) in self.headers.iter() {
            request.headers.insert(name.clone(), value.clone());
        }
        if let Some(mode) = self.mode {
            request.mode = mode;
        }
        if let Some(cache) = self.cache {
            request.cache = cache;
        }
        if let Some(credentials) = self.credentials {
            request.credentials = credentials;
        }
        request
    }
}

/// Response type, mirroring what the host reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    #[default]
    Basic,
    Cors,
    Default,
    /// Network error placeholder.
    Error,
    /// Cross-origin no-cors response; status is always 0.
    Opaque,
    OpaqueRedirect,
}

/// A response produced by the network, a cache, or a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub url: Option<Url>,
    /// Raw status; opaque and error responses carry 0.
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Whether the response is the result of following a redirect.
    pub redirected: bool,
    pub response_type: ResponseType,
}

impl Response {
    /// Create a response with a status and body.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url: None,
            status: status.as_u16(),
            headers: HeaderMap::new(),
            body: body.into(),
            redirected: false,
            response_type: ResponseType::Basic,
        }
    }

    /// A 200 response with a body.
    pub fn ok_with(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    /// A network error response.
    pub fn error() -> Self {
        Self {
            url: None,
            status: 0,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            redirected: false,
            response_type: ResponseType::Error,
        }
    }

    /// An opaque (no-cors) response.
    pub fn opaque() -> Self {
        Self {
            response_type: ResponseType::Opaque,
            ..Self::error()
        }
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_content_type(self, content_type: &'static str) -> Self {
        self.with_header(CONTENT_TYPE, HeaderValue::from_static(content_type))
    }

    /// Check if the response was successful (2xx).
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Typed status, if the raw value is a valid HTTP status.
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.status).ok()
    }

    pub fn is_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> std::result::Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.body.to_vec())
    }
}

/// Copy a response into a fresh one that no longer reports `redirected`.
///
/// A redirected response cannot be used to satisfy a navigation, so
/// precached redirects are stored through this copy.
pub fn copy_response(response: &Response) -> Response {
    Response {
        url: None,
        status: response.status,
        headers: response.headers.clone(),
        body: response.body.clone(),
        redirected: false,
        response_type: ResponseType::Default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com/app.js").unwrap();
        let request = Request::get(url.clone())
            .cache_mode(CacheMode::Reload)
            .integrity(Some("sha256-abc".into()));

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.cache, CacheMode::Reload);
        assert_eq!(request.integrity.as_deref(), Some("sha256-abc"));
        assert!(!request.is_navigation());
    }

    #[test]
    fn test_fetch_options_apply() {
        let mut headers = HeaderMap::new();
        headers.insert("x-sw", HeaderValue::from_static("1"));
        let options = FetchOptions {
            headers,
            credentials: Some(CredentialsMode::Include),
            ..Default::default()
        };
        let request = options.apply(Request::get(Url::parse("https://example.com/").unwrap()));
        assert_eq!(request.credentials, CredentialsMode::Include);
        assert_eq!(request.headers.get("x-sw").unwrap(), "1");
    }

    #[test]
    fn test_request_from_options() {
        let options: RequestOptions =
            serde_json::from_str(r#"{"mode":"no-cors","cache":"reload","headers":{"accept":"text/css"}}"#)
                .unwrap();
        let request =
            Request::from_options(Url::parse("https://cdn.example.com/a.css").unwrap(), &options)
                .unwrap();
        assert_eq!(request.mode, RequestMode::NoCors);
        assert_eq!(request.cache, CacheMode::Reload);
        assert_eq!(request.headers.get("accept").unwrap(), "text/css");
    }

    #[test]
    fn test_copy_response_clears_redirected() {
        let mut response = Response::ok_with("hello");
        response.redirected = true;
        let copy = copy_response(&response);
        assert!(!copy.redirected);
        assert_eq!(copy.body, response.body);
        assert_eq!(copy.status, 200);
    }

    #[test]
    fn test_opaque_status_is_zero() {
        assert_eq!(Response::opaque().status, 0);
        assert!(Response::opaque().status_code().is_none());
        assert_eq!(Response::ok_with("").status_code(), Some(StatusCode::OK));
        assert!(!Response::new(StatusCode::NOT_FOUND, "").ok());
    }
}
