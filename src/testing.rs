//! Shared test doubles.

use async_trait::async_trait;
use axum::Router;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::alert::{Alert, AlertError, Notifier};
use crate::db::Status;
use crate::probe::{Probe, ProbeOutcome};

/// Serve a router on an ephemeral local port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Probe that answers from a per-URL script. Unscripted URLs are UP.
#[derive(Default)]
pub struct ScriptedProbe {
    statuses: Mutex<HashMap<String, Status>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProbe {
    pub fn set_status(&self, url: &str, status: Status) {
        self.statuses.lock().unwrap().insert(url.to_string(), status);
    }

    pub fn set_delay(&self, url: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(url.to_string(), delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.lock().unwrap().get(url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let status = self
            .statuses
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(Status::Up);

        ProbeOutcome {
            status,
            response_time: Some(0.05),
            status_code: (status == Status::Up).then_some(200),
            ssl_expiry_days: None,
        }
    }
}

/// Notifier that remembers every alert it was given.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Alert>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Alert> {
        self.sent.lock().unwrap().clone()
    }

    /// Wait until at least `count` alerts arrived or the timeout passes.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Alert> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.sent.lock().unwrap().len() < count && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        self.sent.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

/// Notifier whose relay is always unreachable.
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send(&self, _alert: &Alert) -> Result<(), AlertError> {
        Err(AlertError::Transport("connection refused".to_string()))
    }
}
