//! Retention sweeper for cleaning up old observations.

use crate::config::ServerConfig;
use crate::db::{DbError, Store};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// How long history is kept and how often it is swept.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub retention_days: i64,
    pub sweep_interval: Duration,
    /// Transitions are an audit trail and are kept unless this is set.
    pub prune_transitions: bool,
}

impl From<&ServerConfig> for RetentionPolicy {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            retention_days: cfg.retention_days,
            sweep_interval: cfg.sweep_interval(),
            prune_transitions: cfg.prune_transitions,
        }
    }
}

impl RetentionPolicy {
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - ChronoDuration::days(self.retention_days)
    }
}

/// Rows removed by one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub observations_removed: usize,
    pub transitions_removed: usize,
}

/// Deletes history older than the retention window on its own cadence.
pub struct RetentionSweeper {
    store: Arc<Store>,
    policy: RetentionPolicy,
    stop_tx: broadcast::Sender<()>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<Store>, policy: RetentionPolicy) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            store,
            policy,
            stop_tx,
        }
    }

    /// Start the sweeper background task.
    pub fn start(&self) {
        let store = self.store.clone();
        let policy = self.policy.clone();
        let mut rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(policy.sweep_interval);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        if let Err(e) = sweep(&store, &policy, Utc::now()) {
                            tracing::error!("RetentionSweeper: sweep failed: {}", e);
                        }
                    }
                }
            }
        });
    }

    /// Stop the sweeper.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }

    pub fn sweep_now(&self) -> Result<SweepReport, DbError> {
        sweep(&self.store, &self.policy, Utc::now())
    }
}

fn sweep(
    store: &Store,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<SweepReport, DbError> {
    let cutoff = policy.cutoff(now);
    let mut report = SweepReport {
        observations_removed: store.delete_observations_before(cutoff)?,
        ..Default::default()
    };

    if policy.prune_transitions {
        report.transitions_removed = store.delete_transitions_before(cutoff)?;
    }

    tracing::info!(
        "RetentionSweeper: removed {} observations and {} transitions older than {}",
        report.observations_removed,
        report.transitions_removed,
        cutoff.format("%Y-%m-%d %H:%M:%S")
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Status, Target};
    use crate::probe::ProbeOutcome;
    use crate::transition::TransitionDetector;
    use tempfile::NamedTempFile;

    fn policy(prune_transitions: bool) -> RetentionPolicy {
        RetentionPolicy {
            retention_days: 30,
            sweep_interval: Duration::from_secs(3600),
            prune_transitions,
        }
    }

    fn seeded_store() -> (NamedTempFile, Arc<Store>, DateTime<Utc>) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        store
            .add_target(&Target {
                name: "A".to_string(),
                url: "a.example.com".to_string(),
            })
            .unwrap();

        let detector = TransitionDetector::default();
        let now = Utc::now();
        let checks = [
            (now - ChronoDuration::days(45), Status::Up),
            (now - ChronoDuration::days(40), Status::Down),
            (now - ChronoDuration::days(10), Status::Up),
            (now - ChronoDuration::hours(1), Status::Up),
        ];
        for (at, status) in checks {
            let outcome = ProbeOutcome {
                status,
                response_time: Some(0.1),
                status_code: None,
                ssl_expiry_days: None,
            };
            store.commit_check("A", &outcome, at, &detector).unwrap();
        }
        (tmp, store, now)
    }

    #[test]
    fn test_sweep_removes_only_expired_observations() {
        let (_tmp, store, now) = seeded_store();

        let report = sweep(&store, &policy(false), now).unwrap();
        assert_eq!(report.observations_removed, 2);
        assert_eq!(report.transitions_removed, 0);

        let remaining = store.history("A", now - ChronoDuration::days(365), 100).unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining
            .iter()
            .all(|o| o.checked_at >= now - ChronoDuration::days(30)));

        // Audit trail survives by default.
        let events = store
            .recent_transitions(now - ChronoDuration::days(365), 100)
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_sweep_can_prune_transitions() {
        let (_tmp, store, now) = seeded_store();

        let report = sweep(&store, &policy(true), now).unwrap();
        assert_eq!(report.transitions_removed, 1);

        let events = store
            .recent_transitions(now - ChronoDuration::days(365), 100)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].new_status, Status::Up);
    }

    #[tokio::test]
    async fn test_sweep_now() {
        let (_tmp, store, _) = seeded_store();
        let sweeper = RetentionSweeper::new(store, policy(false));
        let report = tokio_test::assert_ok!(sweeper.sweep_now());
        assert_eq!(report.observations_removed, 2);
        assert_eq!(tokio_test::assert_ok!(sweeper.sweep_now()), SweepReport::default());
    }
}
