//! HTTP endpoint checker
//!
//! ## Config
//!
//! | key | required | default |
//! |---|---|---|
//! | `url` | yes | |
//! | `expected_status` | no | `200` |
//! | `expected_body` | no | exact match |
//! | `expected_body_pattern` | no | regex match |
//! | `method` | no | `GET` |
//! | `timeout` | no | `30` seconds |

use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Method, Url};
use tracing::{instrument, trace};

use crate::alarm::ConfigMap;
use crate::signal::Signal;

use super::config::{optional_int, optional_str, required_str};
use super::{CheckContext, Sentinel, SentinelError};

const DEFAULT_EXPECTED_STATUS: u16 = 200;

const DEFAULT_TIMEOUT_SECS: i64 = 30;

/// Longest response body echoed back in a signal message
const MAX_BODY_IN_MESSAGE: usize = 256;

#[derive(Debug, Clone)]
struct EndpointSettings {
    url: Url,
    method: Method,
    expected_status: u16,
    expected_body: Option<String>,
    body_pattern: Option<Regex>,
    timeout: Duration,
}

pub struct EndpointChecker {
    client: reqwest::Client,
    settings: Option<EndpointSettings>,
}

impl EndpointChecker {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Use a preconfigured HTTP client (proxies, TLS roots, test servers)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            settings: None,
        }
    }

    /// Compare a response against the expectations
    ///
    /// Returns the reason the response is unhealthy, if any.
    fn evaluate(settings: &EndpointSettings, status: u16, body: &str) -> Option<String> {
        if status != settings.expected_status {
            return Some(format!(
                "expected status {}, got {}",
                settings.expected_status, status
            ));
        }

        if let Some(expected) = &settings.expected_body {
            if body != expected {
                return Some(format!(
                    "expected body {}, got {}",
                    expected,
                    truncate(body, MAX_BODY_IN_MESSAGE)
                ));
            }
        }

        if let Some(pattern) = &settings.body_pattern {
            if !pattern.is_match(body) {
                return Some(format!("body does not match pattern {}", pattern.as_str()));
            }
        }

        None
    }
}

impl Default for EndpointChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sentinel for EndpointChecker {
    fn configure(&mut self, config: &ConfigMap) -> Result<(), SentinelError> {
        let url = required_str(config, "url")?;
        let url = Url::parse(&url)
            .map_err(|e| SentinelError::InvalidConfig(format!("invalid url '{url}': {e}")))?;

        let expected_status = optional_int(config, "expected_status", DEFAULT_EXPECTED_STATUS.into())?;
        let expected_status = u16::try_from(expected_status)
            .ok()
            .filter(|status| (100..=599).contains(status))
            .ok_or_else(|| SentinelError::invalid("expected_status", "an HTTP status code"))?;

        let method = match optional_str(config, "method")? {
            None => Method::GET,
            Some(method) => match method.to_uppercase().as_str() {
                "GET" => Method::GET,
                "HEAD" => Method::HEAD,
                "POST" => Method::POST,
                _ => return Err(SentinelError::invalid("method", "one of GET, HEAD, POST")),
            },
        };

        let body_pattern = optional_str(config, "expected_body_pattern")?
            .map(|pattern| {
                Regex::new(&pattern).map_err(|e| {
                    SentinelError::InvalidConfig(format!("invalid body pattern '{pattern}': {e}"))
                })
            })
            .transpose()?;

        let timeout = optional_int(config, "timeout", DEFAULT_TIMEOUT_SECS)?;
        let timeout = u64::try_from(timeout)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| SentinelError::invalid("timeout", "a positive number of seconds"))?;

        self.settings = Some(EndpointSettings {
            url,
            method,
            expected_status,
            expected_body: optional_str(config, "expected_body")?,
            body_pattern,
            timeout,
        });

        Ok(())
    }

    #[instrument(skip(self, ctx))]
    async fn check(&self, ctx: &CheckContext, alarm_id: &str) -> Result<Signal, SentinelError> {
        let settings = self.settings.as_ref().ok_or(SentinelError::NotConfigured)?;

        trace!("checking endpoint {}", settings.url);

        let timeout = ctx.bound(settings.timeout);
        let start = Instant::now();
        let response = self
            .client
            .request(settings.method.clone(), settings.url.clone())
            .timeout(timeout)
            .send()
            .await;
        let elapsed_ms = start.elapsed().as_millis();

        let response = match response {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Ok(Signal::unhealthy(
                    alarm_id,
                    format!("check timed out after {}s", timeout.as_secs()),
                ));
            }
            Err(e) => {
                return Ok(Signal::unhealthy(
                    alarm_id,
                    format!("error checking endpoint: {}", error_chain(&e)),
                ));
            }
        };

        let status = response.status().as_u16();

        let needs_body = settings.expected_body.is_some() || settings.body_pattern.is_some();
        let body = if needs_body && settings.method != Method::HEAD {
            match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    return Ok(Signal::unhealthy(
                        alarm_id,
                        format!("error reading response body: {e}"),
                    ));
                }
            }
        } else {
            String::new()
        };

        let signal = match Self::evaluate(settings, status, &body) {
            Some(reason) => Signal::unhealthy(alarm_id, reason),
            None => Signal::healthy(alarm_id, format!("responded status {status} in {elapsed_ms}ms")),
        };

        Ok(signal)
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Display an error together with its sources (reqwest hides the DNS/connect cause)
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
