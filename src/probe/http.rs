//! HTTP probe implementation.

use std::time::{Duration, Instant};

use super::{classify, ProbeError, ProbeOutcome, USER_AGENT};

/// Maximum redirects followed before the probe gives up.
const MAX_REDIRECTS: usize = 10;

/// Build the shared client used by every HTTP probe.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, ProbeError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .map_err(|e| ProbeError::Config(e.to_string()))
}

/// Run an HTTP GET against the given (already normalized) URL.
///
/// Never fails: errors are logged and reported as DOWN with the elapsed
/// time until the failure.
pub async fn run_http_probe(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> ProbeOutcome {
    let start = Instant::now();

    match send_request(client, url, timeout).await {
        Ok(status_code) => ProbeOutcome {
            status: classify(status_code),
            response_time: Some(start.elapsed().as_secs_f64()),
            status_code: Some(status_code),
            ssl_expiry_days: None,
        },
        Err(e) => {
            tracing::debug!(url = %url, "HTTP probe failed: {}", e);
            ProbeOutcome::down(start.elapsed())
        }
    }
}

async fn send_request(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<u16, ProbeError> {
    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Network(e.to_string())
        }
    };

    let response = client.get(url).send().await.map_err(map_err)?;
    let status_code = response.status().as_u16();

    // Read the full body to measure complete transfer time
    response.bytes().await.map_err(map_err)?;

    Ok(status_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Status;
    use crate::testing::serve;
    use axum::{http::StatusCode, response::Redirect, routing::get, Router};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_http_probe_invalid_url() {
        let timeout = Duration::from_millis(100);
        let client = build_client(timeout).unwrap();
        let outcome = run_http_probe(&client, "http://256.256.256.256", timeout).await;
        assert_eq!(outcome.status, Status::Down);
        assert_eq!(outcome.status_code, None);
        assert!(outcome.response_time.is_some());
    }

    #[tokio::test]
    async fn test_http_probe_status_codes() {
        let base = serve(
            Router::new()
                .route("/ok", get(|| async { "fine" }))
                .route("/fail", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
                .route("/missing", get(|| async { StatusCode::NOT_FOUND })),
        )
        .await;
        let client = build_client(TIMEOUT).unwrap();

        let ok = run_http_probe(&client, &format!("{}/ok", base), TIMEOUT).await;
        assert_eq!(ok.status, Status::Up);
        assert_eq!(ok.status_code, Some(200));

        let fail = run_http_probe(&client, &format!("{}/fail", base), TIMEOUT).await;
        assert_eq!(fail.status, Status::Down);
        assert_eq!(fail.status_code, Some(500));

        let missing = run_http_probe(&client, &format!("{}/missing", base), TIMEOUT).await;
        assert_eq!(missing.status, Status::Down);
        assert_eq!(missing.status_code, Some(404));
    }

    #[tokio::test]
    async fn test_http_probe_follows_redirects() {
        let base = serve(
            Router::new()
                .route("/old", get(|| async { Redirect::temporary("/new") }))
                .route("/new", get(|| async { "moved" })),
        )
        .await;
        let client = build_client(TIMEOUT).unwrap();

        let outcome = run_http_probe(&client, &format!("{}/old", base), TIMEOUT).await;
        assert_eq!(outcome.status, Status::Up);
        assert_eq!(outcome.status_code, Some(200));
    }

    #[tokio::test]
    async fn test_http_probe_timeout_reports_elapsed() {
        let base = serve(Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;
        let timeout = Duration::from_millis(300);
        let client = build_client(timeout).unwrap();

        let err = send_request(&client, &format!("{}/slow", base), timeout)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(d) if d == timeout));

        let outcome = run_http_probe(&client, &format!("{}/slow", base), timeout).await;
        assert_eq!(outcome.status, Status::Down);
        assert_eq!(outcome.status_code, None);
        let elapsed = outcome.response_time.unwrap();
        assert!(elapsed >= 0.25 && elapsed < 3.0, "elapsed {}", elapsed);
    }
}
