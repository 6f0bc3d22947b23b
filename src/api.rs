use async_trait::async_trait;
use log::{debug, warn};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

use crate::error::{Error, PollError};
use crate::monitor::RawMonitor;

pub const DEFAULT_ENDPOINT: &str = "https://api.uptimerobot.com/v2/getMonitors";

const USER_AGENT: &str = concat!("uptime-notifier/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const RATE_LIMIT_MARKER: &str = "Rate limit exceeded, retry in";

static RATE_LIMIT_WAIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"retry in (\d+) seconds").expect("rate limit pattern is a valid regex")
});

/// Source of monitor data. The scheduler only talks to the API through this.
#[async_trait]
pub trait MonitorApi: Send + Sync {
    /// Issues exactly one request. Implementations never retry.
    async fn fetch(&self, api_key: &str) -> Result<Vec<RawMonitor>, PollError>;
}

/// UptimeRobot v2 client.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    endpoint: Url,
}

impl ApiClient {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new() -> Result<Self, Error> {
        Self::with_endpoint(Url::parse(DEFAULT_ENDPOINT)?)
    }

    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn with_endpoint(endpoint: Url) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl MonitorApi for ApiClient {
    async fn fetch(&self, api_key: &str) -> Result<Vec<RawMonitor>, PollError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .form(&[("api_key", api_key)])
            .send()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;

        classify_response(status, &body)
    }
}

#[derive(Debug, Deserialize)]
struct GetMonitorsResponse {
    stat: Option<String>,
    error: Option<ApiErrorBody>,
    monitors: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

/// Turns a fully read response into monitors or the reason there are none.
///
/// The rate-limit reply is plaintext and is checked before the HTTP status,
/// since it arrives with a non-200 status.
///
/// # Errors
///
/// Returns the [`PollError`] matching the first check the response fails.
pub fn classify_response(status: StatusCode, body: &[u8]) -> Result<Vec<RawMonitor>, PollError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| PollError::Transport(format!("response body is not text: {e}")))?;

    if text.trim().is_empty() {
        return Err(PollError::Transport("empty response body".to_string()));
    }

    if let Some(wait_secs) = rate_limit_wait(text) {
        warn!("Rate limit exceeded, API asks to wait {wait_secs} seconds");
        return Err(PollError::RateLimited { wait_secs });
    }

    let response: GetMonitorsResponse = serde_json::from_str(text).map_err(|e| {
        debug!("Unparseable response body: {}", preview(text));
        PollError::Malformed(format!("invalid JSON: {e}"))
    })?;

    if status != StatusCode::OK {
        return Err(PollError::Transport(format!("HTTP {status}")));
    }

    if response.stat.as_deref() != Some("ok") {
        let message = response
            .error
            .and_then(|e| e.message)
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(PollError::Malformed(format!("API error: {message}")));
    }

    match response.monitors {
        Some(monitors @ serde_json::Value::Array(_)) => serde_json::from_value(monitors)
            .map_err(|e| PollError::Malformed(format!("invalid monitor entry: {e}"))),
        Some(_) => Err(PollError::Malformed("monitors is not a list".to_string())),
        None => Err(PollError::Malformed("monitors field missing".to_string())),
    }
}

fn rate_limit_wait(text: &str) -> Option<u64> {
    if !text.contains(RATE_LIMIT_MARKER) {
        return None;
    }
    RATE_LIMIT_WAIT
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 100;
    match text.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
