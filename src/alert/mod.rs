//! Alert dispatch for status transitions.
//!
//! Dispatch is fire-and-forget: every notification runs on its own task
//! and failures are logged, never returned to the check cycle.

mod email;

pub use email::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::db::{Status, TransitionEvent};

/// Alert error types.
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("invalid address: {0}")]
    Address(String),
    #[error("failed to build message: {0}")]
    Build(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// A status change worth telling someone about.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub target_name: String,
    pub url: String,
    pub old_status: Status,
    pub new_status: Status,
    pub changed_at: DateTime<Utc>,
}

impl Alert {
    pub fn from_transition(event: &TransitionEvent, url: &str) -> Self {
        Self {
            target_name: event.target_name.clone(),
            url: url.to_string(),
            old_status: event.old_status,
            new_status: event.new_status,
            changed_at: event.changed_at,
        }
    }

    pub fn subject(&self) -> String {
        format!(
            "[sitewatch] {} is {} (was {})",
            self.target_name, self.new_status, self.old_status
        )
    }

    pub fn body(&self) -> String {
        format!(
            "Website: {}\nURL: {}\nStatus changed: {} -> {}\nTime: {}\n",
            self.target_name,
            self.url,
            self.old_status,
            self.new_status,
            self.changed_at.format("%Y-%m-%d %H:%M:%S UTC"),
        )
    }
}

/// A channel that delivers alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Hands alerts to the configured notifier without blocking the caller.
#[derive(Clone, Default)]
pub struct AlertDispatcher {
    notifier: Option<Arc<dyn Notifier>>,
}

impl AlertDispatcher {
    pub fn new(notifier: Option<Arc<dyn Notifier>>) -> Self {
        Self { notifier }
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.notifier.is_some()
    }

    /// Dispatch one alert in the background.
    ///
    /// Returns `None` when no channel is configured.
    pub fn notify(&self, alert: Alert) -> Option<JoinHandle<()>> {
        let Some(notifier) = self.notifier.clone() else {
            tracing::debug!(target_name = %alert.target_name, "alerting disabled, dropping alert");
            return None;
        };

        Some(tokio::spawn(async move {
            match notifier.send(&alert).await {
                Ok(()) => tracing::info!(
                    target_name = %alert.target_name,
                    "alert sent: {} -> {}",
                    alert.old_status,
                    alert.new_status
                ),
                Err(e) => tracing::warn!(
                    target_name = %alert.target_name,
                    "failed to send alert: {}",
                    e
                ),
            }
        }))
    }
}
