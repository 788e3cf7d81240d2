//! Probe module for website monitoring.
//!
//! One probe is an HTTP GET plus, for https targets, an independent
//! certificate expiry lookup. Network failures never escape a probe: they
//! become a DOWN outcome.

mod http;
mod ssl;

pub use http::*;
pub use ssl::*;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::db::Status;

/// Default per-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// User agent sent with every probe request.
pub const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; sitewatch/",
    env!("CARGO_PKG_VERSION"),
    "; website monitor)"
);

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result of probing one target.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub status: Status,
    /// Seconds until the response, or until the failure.
    pub response_time: Option<f64>,
    pub status_code: Option<u16>,
    pub ssl_expiry_days: Option<i64>,
}

impl ProbeOutcome {
    /// Outcome of a probe that failed after `elapsed`.
    pub fn down(elapsed: Duration) -> Self {
        Self {
            status: Status::Down,
            response_time: Some(elapsed.as_secs_f64()),
            status_code: None,
            ssl_expiry_days: None,
        }
    }
}

/// Something that can check a target URL.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;
}

/// Production probe: HTTP GET plus certificate expiry.
pub struct HttpProbe {
    client: reqwest::Client,
    ssl: SslChecker,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        Ok(Self {
            client: build_client(timeout)?,
            ssl: SslChecker::new()?,
            timeout,
        })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        let url = normalize_url(url);
        let host = https_host(&url);

        let http = run_http_probe(&self.client, &url, self.timeout);
        let ssl = async {
            match host {
                Some(host) => match self.ssl.expiry_days(&host, 443, self.timeout).await {
                    Ok(days) => Some(days),
                    Err(e) => {
                        tracing::debug!(host = %host, "certificate check failed: {}", e);
                        None
                    }
                },
                None => None,
            }
        };

        let (mut outcome, ssl_expiry_days) = tokio::join!(http, ssl);
        outcome.ssl_expiry_days = ssl_expiry_days;
        outcome
    }
}

/// Prefix `https://` when the URL carries no scheme.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// UP iff the final status code is in [200, 400).
pub fn classify(status_code: u16) -> Status {
    if (200..400).contains(&status_code) {
        Status::Up
    } else {
        Status::Down
    }
}

/// Hostname to inspect for a certificate, only for https URLs.
fn https_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if parsed.scheme() != "https" {
        return None;
    }
    parsed.host_str().map(|h| h.to_string())
}
