//! HTTP client handed to platforms
//!
//! A thin wrapper over [`reqwest::Client`] that reads every response fully,
//! runs registered [`ResponseHook`]s on it, optionally sends a fixed
//! credential `Cookie` header and can be closed at the end of a fetch cycle.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE, USER_AGENT};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::trace;

use crate::utils::error::FetchError;

/// Default User-Agent sent when the config does not provide one
pub const DEFAULT_USER_AGENT: &str = concat!("herald/", env!("CARGO_PKG_VERSION"));

/// Connection settings shared by every client of the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub user_agent: String,
    pub proxy: Option<String>,
    pub timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// A fully read response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub method: Method,
    pub url: String,
    pub request_headers: HeaderMap,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn error_for_status(&self) -> Result<(), FetchError> {
        if self.is_success() {
            Ok(())
        } else {
            Err(FetchError::Status {
                status: self.status.as_u16(),
                url: self.url.clone(),
            })
        }
    }
}

/// Called after every response a client receives
#[async_trait]
pub trait ResponseHook: Send + Sync {
    async fn on_response(&self, response: &HttpResponse);
}

/// Closable HTTP client with response hooks
pub struct HttpClient {
    inner: reqwest::Client,
    cookie_header: Option<HeaderValue>,
    hooks: RwLock<Vec<Arc<dyn ResponseHook>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("has_cookie", &self.cookie_header.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl HttpClient {
    /// Build a client without credentials
    pub fn new(settings: &HttpSettings) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        let user_agent = HeaderValue::from_str(&settings.user_agent)
            .map_err(|e| FetchError::Decode(format!("invalid user agent: {e}")))?;
        headers.insert(USER_AGENT, user_agent);

        let mut builder = reqwest::Client::builder()
            .timeout(settings.timeout)
            .gzip(true)
            .cookie_store(true)
            .default_headers(headers);

        if let Some(proxy) = &settings.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            inner: builder.build()?,
            cookie_header: None,
            hooks: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Build a client that sends the cookies of a JSON object on every request
    pub fn with_cookies(settings: &HttpSettings, content: &str) -> Result<Self, FetchError> {
        let mut client = Self::new(settings)?;
        let header = cookie_header(content)?;
        if !header.is_empty() {
            client.cookie_header = Some(
                HeaderValue::from_str(&header)
                    .map_err(|e| FetchError::Decode(format!("invalid cookie value: {e}")))?,
            );
        }
        Ok(client)
    }

    pub fn add_hook(&self, hook: Arc<dyn ResponseHook>) {
        self.hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(hook);
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.inner.get(url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.inner.post(url)
    }

    /// Send a request built from [`get`](Self::get) or [`post`](Self::post)
    pub async fn send(&self, request: RequestBuilder) -> Result<HttpResponse, FetchError> {
        if self.is_closed() {
            return Err(FetchError::ClientClosed);
        }

        let request = match &self.cookie_header {
            Some(cookie) => request.header(COOKIE, cookie.clone()),
            None => request,
        };
        let request = request.build()?;
        let method = request.method().clone();
        let url = request.url().to_string();
        let request_headers = request.headers().clone();

        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout(url.clone())
            } else {
                FetchError::Http(e)
            }
        };

        let response = self.inner.execute(request).await.map_err(classify)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(classify)?.to_vec();

        trace!(method = %method, url = %url, status = status.as_u16(), "HTTP response");

        let response = HttpResponse {
            method,
            url,
            request_headers,
            status,
            headers,
            body,
        };

        let hooks = self
            .hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for hook in hooks {
            hook.on_response(&response).await;
        }

        Ok(response)
    }

    /// GET a URL and return the body as text, failing on non-success status
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.send(self.get(url)).await?;
        response.error_for_status()?;
        Ok(response.text())
    }

    /// GET a URL and deserialize its JSON body, failing on non-success status
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let response = self.send(self.get(url)).await?;
        response.error_for_status()?;
        response.json()
    }

    /// Release the client. A second close fails with `ClientClosed`.
    pub fn close(&self) -> Result<(), FetchError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(FetchError::ClientClosed);
        }
        self.hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Turn a JSON object of cookies into a `Cookie` header value
pub fn cookie_header(content: &str) -> Result<String, FetchError> {
    let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(content)
        .map_err(|e| FetchError::Decode(format!("cookie content is not a JSON object: {e}")))?;

    Ok(map
        .iter()
        .map(|(name, value)| match value {
            serde_json::Value::String(s) => format!("{name}={s}"),
            other => format!("{name}={other}"),
        })
        .collect::<Vec<_>>()
        .join("; "))
}
