//! HTTP probe implementation.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, UPGRADE_INSECURE_REQUESTS};
use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::{Duration, Instant};

use super::{truncate, CheckResult, Health, HttpThresholds, Outcome, ProbeError, ProbeSettings};
use crate::registry::Target;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Build the shared client used by every HTTP probe.
///
/// Sends a browser-like header set, since many sites answer bare clients
/// with 403, and follows redirects.
pub fn build_http_client(timeout: Duration) -> Result<Client, ProbeError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .redirect(Policy::limited(10))
        .timeout(timeout)
        .build()
        .map_err(|e| ProbeError::Config(e.to_string()))
}

/// Run an HTTP probe against a target.
pub async fn run_http_probe(client: &Client, target: &Target, settings: &ProbeSettings) -> CheckResult {
    let start = Instant::now();

    match fetch(client, &target.address, settings.http_timeout).await {
        Ok(status) => {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            let (health, message) = classify_http(status, elapsed_ms, &settings.http);
            CheckResult::new(target, health, Outcome::Status(status), Some(elapsed_ms), message)
        }
        Err(ProbeError::Timeout(timeout)) => CheckResult::new(
            target,
            Health::Down,
            Outcome::Timeout,
            Some(start.elapsed().as_millis() as u64),
            format!("Connection timeout ({}s)", timeout.as_secs()),
        ),
        Err(ProbeError::Connect(_)) => CheckResult::new(
            target,
            Health::Down,
            Outcome::ConnectionError,
            Some(start.elapsed().as_millis() as u64),
            "Connection failed".to_string(),
        ),
        // The request was never sent
        Err(ProbeError::Config(e)) => CheckResult::unknown_error(target, &e),
        Err(e) => CheckResult::new(
            target,
            Health::Down,
            Outcome::Error,
            Some(start.elapsed().as_millis() as u64),
            format!("Unknown error: {}", truncate(&e.to_string(), 50)),
        ),
    }
}

/// Issue the GET and read the full body. Returns the final status code.
async fn fetch(client: &Client, address: &str, timeout: Duration) -> Result<u16, ProbeError> {
    let url = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("https://{}", address)
    };

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| map_reqwest_error(e, timeout))?;

    let status = response.status().as_u16();

    // Read the full body to measure complete transfer time
    let _body = response
        .bytes()
        .await
        .map_err(|e| map_reqwest_error(e, timeout))?;

    Ok(status)
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout(timeout)
    } else if e.is_connect() {
        ProbeError::Connect(e.to_string())
    } else if e.is_builder() {
        ProbeError::Config(e.to_string())
    } else {
        ProbeError::Network(e.to_string())
    }
}

/// Classify a completed HTTP response. The first matching rule wins.
pub fn classify_http(status: u16, elapsed_ms: u64, thresholds: &HttpThresholds) -> (Health, String) {
    if status >= 500 {
        (Health::Down, format!("Server error (HTTP {})", status))
    } else if status == 429 {
        (Health::Degraded, "Rate limited".to_string())
    } else if (400..500).contains(&status) && status != 403 {
        (Health::Degraded, format!("Client error (HTTP {})", status))
    } else if elapsed_ms > thresholds.down_ms {
        (Health::Down, format!("Very slow response ({} ms)", elapsed_ms))
    } else if elapsed_ms > thresholds.degraded_ms {
        (Health::Degraded, format!("Slow response ({} ms)", elapsed_ms))
    } else if status == 403 {
        // Many sites answer automated clients with 403
        let health = if elapsed_ms < thresholds.forbidden_fast_ms {
            Health::Operational
        } else {
            Health::Degraded
        };
        (health, format!("Access restricted (HTTP 403) - {} ms", elapsed_ms))
    } else {
        (Health::Operational, format!("OK - {} ms", elapsed_ms))
    }
}
