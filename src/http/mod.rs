//! Proxy-rotating, retrying HTTP primitive shared by every scan loop and the
//! liveness checker.
//!
//! Each attempt picks a fresh egress identity from the [`ProxyPool`]. Statuses
//! in the retry set and transport failures back off exponentially with jitter;
//! statuses in the skip set fail immediately.

mod error;
mod proxy;

pub use error::{Failure, HttpError};
pub use proxy::ProxyPool;

use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::ScoutConfig;

pub const DEFAULT_RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];
pub const DEFAULT_SKIP_STATUSES: [u16; 2] = [404, 410];
const STATUS_PROBE_TIMEOUT: Duration = Duration::from_secs(20);

/// Retry and timeout settings applied to every request unless overridden.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub max_jitter: Duration,
    pub timeout: Duration,
    pub retry_statuses: Vec<u16>,
    pub skip_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            max_jitter: Duration::from_millis(500),
            timeout: Duration::from_secs(15),
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
            skip_statuses: DEFAULT_SKIP_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ScoutConfig) -> Self {
        Self {
            max_retries: config.http_max_retries,
            backoff_base: config.http_backoff_base,
            timeout: config.http_timeout,
            ..Self::default()
        }
    }

    fn is_retryable(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status.as_u16())
    }

    fn is_skip(&self, status: StatusCode) -> bool {
        self.skip_statuses.contains(&status.as_u16())
    }

    /// `base * 2^(attempt-1)` plus uniform jitter in `[0, max_jitter)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.backoff_base.saturating_mul(1u32 << exponent);
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}

/// Per-call knobs. Anything left unset falls back to the client's [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub params: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Build a header map from static `(name, value)` pairs, skipping invalid entries.
pub fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
    pairs
        .iter()
        .filter_map(|(name, value)| {
            let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
            let value = HeaderValue::from_str(value).ok()?;
            Some((name, value))
        })
        .collect()
}

#[derive(Clone)]
pub struct HttpClient {
    proxies: ProxyPool,
    policy: RetryPolicy,
}

impl HttpClient {
    pub fn new(proxies: ProxyPool, policy: RetryPolicy) -> Self {
        Self { proxies, policy }
    }

    pub fn from_config(config: &ScoutConfig) -> Result<Self, HttpError> {
        let proxies = ProxyPool::from_urls(&config.proxies.urls())?;
        Ok(Self::new(proxies, RetryPolicy::from_config(config)))
    }

    /// Direct connection with the given policy, no proxies.
    pub fn direct(policy: RetryPolicy) -> Result<Self, HttpError> {
        Ok(Self::new(ProxyPool::direct()?, policy))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Number of distinct egress identities (1 for a direct connection).
    pub fn identities(&self) -> usize {
        self.proxies.len()
    }

    pub async fn request(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Response, HttpError> {
        let attempts = options.max_retries.unwrap_or(self.policy.max_retries).max(1);
        let timeout = options.timeout.unwrap_or(self.policy.timeout);
        let mut last = Failure::NoAttempt;

        for attempt in 1..=attempts {
            let mut builder = self
                .proxies
                .pick()
                .request(method.clone(), url)
                .headers(options.headers.clone())
                .timeout(timeout);
            if !options.params.is_empty() {
                builder = builder.query(&options.params);
            }
            if let Some(body) = &options.body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if self.policy.is_retryable(status) {
                        warn!(
                            target: "http",
                            %method, url, status = status.as_u16(), attempt, attempts,
                            "retryable status"
                        );
                        last = Failure::Status(status);
                    } else if self.policy.is_skip(status) {
                        debug!(target: "http", url, status = status.as_u16(), "resource gone");
                        return Err(HttpError::Terminal {
                            status,
                            url: url.to_string(),
                        });
                    } else if !status.is_success() {
                        return Err(HttpError::Status {
                            status,
                            url: url.to_string(),
                        });
                    } else {
                        return Ok(response);
                    }
                }
                Err(err) => {
                    warn!(
                        target: "http",
                        %method, url, error = %err, attempt, attempts,
                        "request failed"
                    );
                    last = Failure::Transport(err);
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.policy.backoff_delay(attempt)).await;
            }
        }

        Err(HttpError::RetriesExhausted {
            url: url.to_string(),
            attempts,
            last,
        })
    }

    pub async fn get(&self, url: &str, options: &RequestOptions) -> Result<Response, HttpError> {
        self.request(Method::GET, url, options).await
    }

    pub async fn get_text(&self, url: &str, options: &RequestOptions) -> Result<String, HttpError> {
        let response = self.get(url, options).await?;
        response.text().await.map_err(HttpError::Body)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<T, HttpError> {
        let body = self.get_text(url, options).await?;
        serde_json::from_str(&body).map_err(|source| HttpError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// Single status-only probe: one attempt, no retries, random identity.
    pub async fn fetch_status(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<StatusCode, HttpError> {
        let response = self
            .proxies
            .pick()
            .get(url)
            .headers(headers.clone())
            .timeout(STATUS_PROBE_TIMEOUT)
            .send()
            .await
            .map_err(HttpError::Transport)?;
        Ok(response.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::matchers::request;
    use httptest::responders::{json_encoded, status_code};
    use httptest::{cycle, Expectation, Server};
    use serde_json::json;
    use std::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            backoff_base: Duration::from_millis(50),
            max_jitter: Duration::ZERO,
            timeout: Duration::from_secs(5),
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn retries_through_transient_failures() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/flaky"))
                .times(3)
                .respond_with(cycle![
                    status_code(503),
                    status_code(503),
                    status_code(200).body("ok"),
                ]),
        );

        let client = HttpClient::direct(fast_policy()).unwrap();
        let started = Instant::now();
        let body = client
            .get_text(&server.url_str("/flaky"), &RequestOptions::new().max_retries(3))
            .await
            .unwrap();

        assert_eq!(body, "ok");
        // two sleeps: 50ms + 100ms
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn gone_status_fails_without_retry() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/gone"))
                .times(1)
                .respond_with(status_code(404)),
        );

        let client = HttpClient::direct(fast_policy()).unwrap();
        let started = Instant::now();
        let err = client
            .get(&server.url_str("/gone"), &RequestOptions::new())
            .await
            .unwrap_err();

        assert!(err.is_terminal());
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn other_client_errors_are_not_retried() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/forbidden"))
                .times(1)
                .respond_with(status_code(403)),
        );

        let client = HttpClient::direct(fast_policy()).unwrap();
        let err = client
            .get(&server.url_str("/forbidden"), &RequestOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, HttpError::Status { status, .. } if status == StatusCode::FORBIDDEN));
        assert!(!err.is_terminal());
    }

    #[tokio::test]
    async fn exhausting_retries_reports_last_status() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/busy"))
                .times(2)
                .respond_with(status_code(429)),
        );

        let client = HttpClient::direct(fast_policy()).unwrap();
        let err = client
            .get(&server.url_str("/busy"), &RequestOptions::new().max_retries(2))
            .await
            .unwrap_err();

        match err {
            HttpError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 2);
                assert!(matches!(last, Failure::Status(s) if s == StatusCode::TOO_MANY_REQUESTS));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn transport_errors_are_retried_then_surface() {
        let client = HttpClient::direct(fast_policy()).unwrap();
        let err = client
            .get("http://127.0.0.1:1/unreachable", &RequestOptions::new().max_retries(2))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            HttpError::RetriesExhausted { last: Failure::Transport(_), attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn get_json_sends_query_and_headers() {
        let server = Server::run();
        server.expect(
            Expectation::matching(httptest::all_of![
                request::method_path("GET", "/api"),
                request::query(httptest::matchers::url_decoded(httptest::matchers::contains((
                    "limit", "50"
                )))),
                request::headers(httptest::matchers::contains(("x-client", "DESKTOP"))),
            ])
            .respond_with(json_encoded(json!({"data": [1, 2, 3]}))),
        );

        let client = HttpClient::direct(fast_policy()).unwrap();
        let options = RequestOptions::new()
            .param("limit", 50)
            .headers(header_map(&[("x-client", "DESKTOP")]));
        let payload: serde_json::Value = client
            .get_json(&server.url_str("/api"), &options)
            .await
            .unwrap();

        assert_eq!(payload["data"], json!([1, 2, 3]));
    }

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy {
            backoff_base: Duration::from_secs(1),
            max_jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(4));

        let jittered = RetryPolicy::default().backoff_delay(1);
        assert!(jittered >= Duration::from_secs(1));
        assert!(jittered < Duration::from_millis(1500));
    }

    #[test]
    fn header_map_lowercases_and_skips_invalid() {
        let headers = header_map(&[("User-Agent", "scout"), ("bad header", "x")]);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["user-agent"], "scout");
    }
}
