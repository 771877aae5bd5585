// Submitter: turns one finished session into one Beeminder datapoint and
// POSTs it, retrying transient failures according to a `RetryPolicy`.

use crate::api::{self, HttpResponse, Transport, TransportError};
use crate::config::{ConfigError, GoalCredentials};
use crate::retry::RetryPolicy;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Parsed JSON body returned by the service on success.
pub type ServerAck = serde_json::Value;

/// Every datapoint increments the goal by exactly this much.
pub const DATAPOINT_VALUE: f64 = 1.0;

/// Joins the configured comment and the caller's note.
pub const COMMENT_SEPARATOR: &str = " | ";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not reach {endpoint} after {attempts} attempt(s): {cause} (unsent comment: {comment:?})")]
    ConnectionFailed {
        endpoint: String,
        attempts: u32,
        cause: String,
        comment: String,
    },

    #[error("request to {endpoint} timed out after {}s", .timeout.as_secs_f64())]
    Timeout { endpoint: String, timeout: Duration },

    #[error("HTTP {status} from {endpoint}: {body}")]
    HttpError {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("{0}")]
    Unknown(String),
}

impl SubmissionError {
    /// Short label used in the one-line diagnostic.
    pub fn kind(&self) -> &'static str {
        match self {
            SubmissionError::Config(_) => "config",
            SubmissionError::ConnectionFailed { .. } => "connection",
            SubmissionError::Timeout { .. } => "timeout",
            SubmissionError::HttpError { .. } => "http",
            SubmissionError::Unknown(_) => "unknown",
        }
    }
}

/// One observation for the goal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Datapoint {
    pub timestamp: i64,
    pub value: f64,
    pub comment: String,
}

impl Datapoint {
    pub fn new(timestamp: i64, base_comment: &str, extra_note: Option<&str>) -> Self {
        Datapoint {
            timestamp,
            value: DATAPOINT_VALUE,
            comment: compose_comment(base_comment, extra_note),
        }
    }
}

/// `base` alone, or `base | note` when a non-empty note is given.
pub fn compose_comment(base: &str, extra_note: Option<&str>) -> String {
    match extra_note.filter(|n| !n.is_empty()) {
        Some(note) => format!("{base}{COMMENT_SEPARATOR}{note}"),
        None => base.to_string(),
    }
}

/// Wire body: the token travels in the JSON next to the datapoint fields.
#[derive(Serialize)]
struct Payload<'a> {
    auth_token: &'a str,
    #[serde(flatten)]
    datapoint: &'a Datapoint,
}

pub struct Submitter<T: Transport> {
    credentials: GoalCredentials,
    transport: T,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
    sleeper: Box<dyn Fn(Duration)>,
}

impl<T: Transport> Submitter<T> {
    pub fn new(credentials: GoalCredentials, transport: T) -> Self {
        Submitter {
            credentials,
            transport,
            base_url: api::DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            sleeper: Box::new(std::thread::sleep),
        }
    }

    /// Load credentials from `path`, then build a submitter. The transport
    /// is not used when loading fails.
    pub fn from_config_file(path: &Path, transport: T) -> Result<Self, SubmissionError> {
        let credentials = GoalCredentials::load(path)?;
        Ok(Self::new(credentials, transport))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the function used to wait between attempts.
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn credentials(&self) -> &GoalCredentials {
        &self.credentials
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn endpoint(&self) -> String {
        api::datapoints_url(
            &self.base_url,
            &self.credentials.username,
            &self.credentials.goal_name,
        )
    }

    /// Post one `+1` datapoint timestamped now.
    pub fn submit(&self, extra_note: Option<&str>) -> Result<ServerAck, SubmissionError> {
        let timestamp = chrono::Utc::now().timestamp();
        let datapoint = Datapoint::new(timestamp, &self.credentials.base_comment, extra_note);
        self.submit_datapoint(&datapoint)
    }

    /// Post an already-built datapoint.
    pub fn submit_datapoint(&self, datapoint: &Datapoint) -> Result<ServerAck, SubmissionError> {
        let endpoint = self.endpoint();
        let body = serde_json::to_value(Payload {
            auth_token: &self.credentials.auth_token,
            datapoint,
        })
        .map_err(|e| SubmissionError::Unknown(format!("failed to encode payload: {e}")))?;

        debug!(
            %endpoint,
            timestamp = datapoint.timestamp,
            comment = %datapoint.comment,
            "submitting datapoint"
        );

        let response = self.post_with_retry(&endpoint, &body, &datapoint.comment)?;
        let ack: ServerAck = serde_json::from_str(&response.body).map_err(|e| {
            SubmissionError::Unknown(format!(
                "HTTP {} from {endpoint} with unparsable body: {e}",
                response.status
            ))
        })?;
        info!(%endpoint, status = response.status, "datapoint accepted");
        Ok(ack)
    }

    fn post_with_retry(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
        comment: &str,
    ) -> Result<HttpResponse, SubmissionError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            debug!(attempt = attempts, max = self.retry.max_attempts, "POST");

            let outcome = self.transport.post_json(endpoint, body, self.timeout);
            let mut retry_after = None;
            let retry_reason = match outcome {
                Ok(res) if res.is_success() => return Ok(res),
                Ok(res) => {
                    if !self.retry.is_retryable_status(res.status)
                        || !self.retry.allows_another(attempts)
                    {
                        return Err(SubmissionError::HttpError {
                            endpoint: endpoint.to_string(),
                            status: res.status,
                            body: res.body,
                        });
                    }
                    retry_after = res.retry_after;
                    format!("HTTP {}", res.status)
                }
                Err(TransportError::Connect(cause)) => {
                    if !self.retry.allows_another(attempts) {
                        return Err(SubmissionError::ConnectionFailed {
                            endpoint: endpoint.to_string(),
                            attempts,
                            cause,
                            comment: comment.to_string(),
                        });
                    }
                    cause
                }
                // The server may already have recorded the datapoint.
                Err(TransportError::Timeout) => {
                    return Err(SubmissionError::Timeout {
                        endpoint: endpoint.to_string(),
                        timeout: self.timeout,
                    });
                }
                Err(TransportError::Other(msg)) => return Err(SubmissionError::Unknown(msg)),
            };

            let delay = self.retry.delay_before(attempts, retry_after);
            warn!(
                attempt = attempts,
                reason = %retry_reason,
                delay_ms = delay.as_millis() as u64,
                "retrying datapoint POST"
            );
            (self.sleeper)(delay);
        }
    }
}
