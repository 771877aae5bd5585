// API client module: the Beeminder endpoint layout and a small blocking
// HTTP transport. The transport sits behind a trait so the submitter can be
// driven by a scripted fake in tests.

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Public Beeminder API root.
pub const DEFAULT_BASE_URL: &str = "https://www.beeminder.com/api/v1";

/// Environment variable overriding [`DEFAULT_BASE_URL`].
pub const BASE_URL_ENV_VAR: &str = "BEEMINDER_BASE_URL";

/// Base URL from `BEEMINDER_BASE_URL`, or the public API.
pub fn base_url_from_env() -> String {
    std::env::var(BASE_URL_ENV_VAR)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.into())
}

/// Datapoint creation endpoint for a user's goal. Names are used as-is.
pub fn datapoints_url(base_url: &str, username: &str, goal_name: &str) -> String {
    format!(
        "{}/users/{}/goals/{}/datapoints.json",
        base_url.trim_end_matches('/'),
        username,
        goal_name
    )
}

/// Status and body text of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Server-requested wait from a `Retry-After` header, if any.
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        HttpResponse {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failures below the HTTP layer, i.e. no status code was received.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

/// Something that can POST a JSON document and hand back the response.
pub trait Transport {
    fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, TransportError> {
        (**self).post_json(url, body, timeout)
    }
}

/// Parse `Retry-After` as delta-seconds or an HTTP date relative to `now`.
/// Dates in the past yield a zero wait.
pub fn parse_retry_after(value: &str, now: chrono::DateTime<chrono::Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&chrono::Utc) - now;
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    parse_retry_after(value, chrono::Utc::now())
}

/// Transport backed by a reqwest blocking client. The client is reused for
/// every attempt of a run so connections can be kept alive between retries.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("beeminder-add/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(ReqwestTransport { client })
    }
}

impl Transport for ReqwestTransport {
    fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let res = self
            .client
            .post(url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .timeout(timeout)
            .json(body)
            .send()
            .map_err(classify)?;

        let status = res.status().as_u16();
        let retry_after = retry_after_header(res.headers());
        let body = match res.text() {
            Ok(txt) => txt,
            Err(e) if e.is_timeout() => return Err(TransportError::Timeout),
            Err(e) => {
                return Err(TransportError::Other(format!(
                    "HTTP {status} but reading the response body failed: {e}"
                )))
            }
        };
        Ok(HttpResponse {
            status,
            body,
            retry_after,
        })
    }
}

// A connect timeout reports both flags; it is treated as a connection
// failure since nothing reached the server.
fn classify(err: reqwest::Error) -> TransportError {
    if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Other(err.to_string())
    }
}
