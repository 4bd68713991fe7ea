//! Blocking HTTP access with the retry-until-success policy used for the
//! public NCBI and UCSC endpoints.

use crate::error::{DesignError, DesignResult, ErrorCode};
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str) -> DesignResult<HttpResponse>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> DesignResult<Self> {
        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_str(user_agent).map_err(|e| {
            DesignError::invalid_input(format!("Invalid user agent '{user_agent}': {e}"))
        })?;
        headers.insert(USER_AGENT, agent);
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| {
                DesignError::new(ErrorCode::Service, format!("Could not build HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str) -> DesignResult<HttpResponse> {
        let response = self.client.get(url).send().map_err(|e| {
            DesignError::new(ErrorCode::Service, format!("Request to '{url}' failed: {e}"))
        })?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|e| {
            DesignError::new(
                ErrorCode::Service,
                format!("Could not read response body from '{url}': {e}"),
            )
        })?;
        Ok(HttpResponse { status, body })
    }
}

/// Builds `base?k=v&...` with form encoding.
pub fn build_url(base: &str, params: &[(&str, String)]) -> DesignResult<String> {
    reqwest::Url::parse_with_params(base, params)
        .map(String::from)
        .map_err(|e| DesignError::invalid_input(format!("Invalid URL '{base}': {e}")))
}

/// Retry schedule for throttled or failing requests.
///
/// `max_attempts: None` retries forever with a uniformly random pause in
/// `[min_backoff_ms, max_backoff_ms]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            min_backoff_ms: 250,
            max_backoff_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            min_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    pub fn exhausted(&self, attempts_made: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts_made >= max)
    }

    pub fn backoff(&self) -> Duration {
        let lo = self.min_backoff_ms.min(self.max_backoff_ms);
        let hi = self.min_backoff_ms.max(self.max_backoff_ms);
        if hi == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }

    fn pause(&self) {
        let delay = self.backoff();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

/// What a response parser wants the retry loop to do next.
pub enum Attempt<T> {
    Done(T),
    Retry(String),
    Fail(DesignError),
}

#[derive(Clone)]
pub struct RetryingClient {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GETs `url` until `parse` accepts a 200 body or the policy gives up.
    pub fn fetch<T>(
        &self,
        url: &str,
        what: &str,
        mut parse: impl FnMut(&str) -> Attempt<T>,
    ) -> DesignResult<T> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            debug!(url = %url, attempts, "GET {what}");
            let failure = match self.transport.get(url) {
                Ok(response) if response.is_success() => match parse(&response.body) {
                    Attempt::Done(value) => return Ok(value),
                    Attempt::Fail(err) => return Err(err),
                    Attempt::Retry(reason) => {
                        DesignError::new(ErrorCode::Service, format!("{what}: {reason}"))
                    }
                },
                Ok(response) if response.status == 429 => DesignError::new(
                    ErrorCode::Throttled,
                    format!("{what}: API rate limit exceeded (HTTP 429)"),
                ),
                Ok(response) => DesignError::new(
                    ErrorCode::Service,
                    format!("{what}: HTTP {}", response.status),
                ),
                Err(err) => err,
            };
            if self.policy.exhausted(attempts) {
                return Err(failure);
            }
            warn!(attempts, "{}; retrying", failure.message);
            self.policy.pause();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedTransport;
    use super::*;

    fn client(transport: Arc<ScriptedTransport>, attempts: u32) -> RetryingClient {
        RetryingClient::new(transport, RetryPolicy::immediate(attempts))
    }

    #[test]
    fn test_retries_throttled_then_succeeds() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond("esearch", 429, "slow down")
                .respond("esearch", 429, "slow down")
                .respond("esearch", 200, "7157"),
        );
        let value = client(transport.clone(), 5)
            .fetch("https://example.org/esearch", "gene search", |body| {
                Attempt::Done(body.to_string())
            })
            .unwrap();
        assert_eq!(value, "7157");
        assert_eq!(transport.count("esearch"), 3);
    }

    #[test]
    fn test_gives_up_with_throttled_code_when_capped() {
        let transport = Arc::new(ScriptedTransport::new().respond("esummary", 429, ""));
        let err = client(transport.clone(), 4)
            .fetch("https://example.org/esummary", "gene summary", |_| {
                Attempt::Done(())
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Throttled);
        assert_eq!(transport.count("esummary"), 4);
    }

    #[test]
    fn test_malformed_body_is_retried_like_transient_error() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond("efetch", 200, "{}")
                .respond("efetch", 200, "{\"count\":\"1\"}"),
        );
        let value = client(transport, 3)
            .fetch("https://example.org/efetch", "fetch", |body| {
                if body.contains("count") {
                    Attempt::Done(body.len())
                } else {
                    Attempt::Retry("response lacks count".to_string())
                }
            })
            .unwrap();
        assert_eq!(value, 13);
    }

    #[test]
    fn test_fail_stops_immediately() {
        let transport = Arc::new(ScriptedTransport::new().respond("x", 200, "bad"));
        let err = client(transport.clone(), 10)
            .fetch("https://example.org/x", "x", |_| -> Attempt<()> {
                Attempt::Fail(DesignError::not_found("nothing"))
            })
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(transport.count("/x"), 1);
    }

    #[test]
    fn test_build_url_encodes_query_terms() {
        let url = build_url(
            "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi",
            &[
                ("db", "gene".to_string()),
                ("term", "\"TP53\"[Gene Name] AND Homo sapiens[Organism]".to_string()),
            ],
        )
        .unwrap();
        assert!(url.starts_with("https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi?db=gene&term="));
        assert!(url.contains("%22TP53%22%5BGene+Name%5D+AND+Homo+sapiens%5BOrganism%5D"));
    }

    #[test]
    fn test_default_backoff_stays_in_window() {
        let policy = RetryPolicy::default();
        for _ in 0..20 {
            let delay = policy.backoff();
            assert!(delay >= Duration::from_millis(250));
            assert!(delay <= Duration::from_millis(500));
        }
        assert!(!policy.exhausted(1_000_000));
        assert_eq!(RetryPolicy::immediate(2).backoff(), Duration::ZERO);
    }
}
