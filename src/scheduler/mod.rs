//! Scheduler module: periodic check cycles and retention sweeps.
//!
//! A cycle snapshots the registry, probes every target concurrently
//! (bounded by a semaphore, each probe capped by a deadline), waits for
//! all of them, then commits the results one target at a time. At most
//! one cycle is in flight; a tick that arrives while a cycle is running
//! is dropped.

mod retention;

pub use retention::*;

use crate::alert::{Alert, AlertDispatcher};
use crate::config::ServerConfig;
use crate::db::{CurrentState, DbError, Store, Target};
use crate::probe::{Probe, ProbeOutcome};
use crate::transition::TransitionDetector;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinSet;

/// Tunables for the check cycle.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub check_interval: Duration,
    pub probe_timeout: Duration,
    pub max_concurrent_probes: usize,
    pub retention: RetentionPolicy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for SchedulerSettings {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            check_interval: cfg.check_interval(),
            probe_timeout: cfg.probe_timeout(),
            max_concurrent_probes: cfg.max_concurrent_probes,
            retention: RetentionPolicy::from(cfg),
        }
    }
}

/// Counters for one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub targets: usize,
    pub committed: usize,
    pub failed: usize,
    pub transitions: usize,
}

/// What happened when a cycle was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was already running.
    Skipped,
}

/// The main scheduler that orchestrates probe execution.
pub struct Scheduler {
    store: Arc<Store>,
    probe: Arc<dyn Probe>,
    dispatcher: AlertDispatcher,
    detector: TransitionDetector,
    settings: SchedulerSettings,
    cycle_gate: Mutex<()>,
    retention: Arc<RetentionSweeper>,
    stop_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(
        store: Arc<Store>,
        probe: Arc<dyn Probe>,
        dispatcher: AlertDispatcher,
        detector: TransitionDetector,
        settings: SchedulerSettings,
    ) -> Self {
        let retention = Arc::new(RetentionSweeper::new(store.clone(), settings.retention.clone()));
        let (stop_tx, _) = broadcast::channel(1);

        Self {
            store,
            probe,
            dispatcher,
            detector,
            settings,
            cycle_gate: Mutex::new(()),
            retention,
            stop_tx,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Start the periodic cycle loop and the retention sweeper.
    ///
    /// The first cycle runs immediately.
    pub fn start(self: &Arc<Self>) {
        let scheduler = self.clone();
        let mut stop_rx = self.stop_tx.subscribe();

        tracing::info!(
            "Starting scheduler: interval {:?}, probe timeout {:?}, concurrency {}",
            self.settings.check_interval,
            self.settings.probe_timeout,
            self.settings.max_concurrent_probes
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.settings.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = interval.tick() => {
                        scheduler.run_cycle().await;
                    }
                }
            }

            tracing::info!("Scheduler stopped");
        });

        self.retention.start();
    }

    /// Stop the cycle loop and the retention sweeper.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
        self.retention.stop();
    }

    // --- Registry ---

    /// Register a target. It is probed on the next cycle.
    pub fn add_target(&self, name: &str, url: &str) -> Result<CurrentState, DbError> {
        let target = Target {
            name: name.trim().to_string(),
            url: url.trim().to_string(),
        };
        let state = self.store.add_target(&target)?;
        tracing::info!(target_name = %target.name, "Scheduler: added target {}", target.url);
        Ok(state)
    }

    /// Remove a target with its history and transitions.
    pub fn remove_target(&self, name: &str) -> Result<bool, DbError> {
        self.store.delete_target(name)?;
        tracing::info!(target_name = %name, "Scheduler: removed target");
        Ok(true)
    }

    // --- Checks ---

    /// Probe and commit one target outside the regular cycle.
    ///
    /// Waits for a running cycle to finish first, so a forced check never
    /// interleaves with a cycle's commits.
    pub async fn check_now(&self, name: &str) -> Result<CurrentState, DbError> {
        let _guard = self.cycle_gate.lock().await;
        let state = self.store.get_state(name)?;
        let target = state.target();

        let (outcome, checked_at) =
            probe_with_deadline(self.probe.clone(), &target.url, self.settings.probe_timeout).await;

        self.commit(&target, &outcome, checked_at).map(|(state, _)| state)
    }

    /// Apply the retention policy immediately.
    pub fn sweep_now(&self) -> Result<SweepReport, DbError> {
        self.retention.sweep_now()
    }

    /// Run a full cycle now unless one is already in flight.
    pub async fn check_all_now(&self) -> CycleOutcome {
        self.run_cycle().await
    }

    /// One full pass over the registry.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Ok(_guard) = self.cycle_gate.try_lock() else {
            tracing::warn!("Skipping check cycle: previous cycle still running");
            return CycleOutcome::Skipped;
        };

        let started = Instant::now();
        let targets = match self.store.list_targets() {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("Scheduler: failed to read targets: {}", e);
                return CycleOutcome::Completed(CycleReport::default());
            }
        };

        let mut report = CycleReport {
            targets: targets.len(),
            ..Default::default()
        };
        if targets.is_empty() {
            tracing::debug!("No targets to check");
            return CycleOutcome::Completed(report);
        }

        let results = self.fan_out(targets).await;
        report.failed += report.targets - results.len();

        for (target, outcome, checked_at) in results {
            match self.commit(&target, &outcome, checked_at) {
                Ok((_, transitioned)) => {
                    report.committed += 1;
                    if transitioned {
                        report.transitions += 1;
                    }
                }
                Err(DbError::NotFound(_)) => {
                    tracing::debug!(
                        target_name = %target.name,
                        "target removed during cycle, dropping result"
                    );
                }
                Err(DbError::Stale(_)) => {
                    tracing::debug!(target_name = %target.name, "newer check already recorded");
                }
                Err(_) => report.failed += 1,
            }
        }

        tracing::info!(
            "Check cycle finished in {:?}: {} targets, {} committed, {} failed, {} transitions",
            started.elapsed(),
            report.targets,
            report.committed,
            report.failed,
            report.transitions
        );

        CycleOutcome::Completed(report)
    }

    /// Probe every target concurrently and wait for all of them.
    async fn fan_out(&self, targets: Vec<Target>) -> Vec<(Target, ProbeOutcome, DateTime<Utc>)> {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_probes));
        let mut tasks = JoinSet::new();

        for target in targets {
            let semaphore = semaphore.clone();
            let probe = self.probe.clone();
            let timeout = self.settings.probe_timeout;

            tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                let (outcome, checked_at) = probe_with_deadline(probe, &target.url, timeout).await;
                (target, outcome, checked_at)
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!("Probe task failed: {}", e),
            }
        }
        results
    }

    /// Commit one outcome and dispatch an alert on transition.
    fn commit(
        &self,
        target: &Target,
        outcome: &ProbeOutcome,
        checked_at: DateTime<Utc>,
    ) -> Result<(CurrentState, bool), DbError> {
        let commit = self
            .store
            .commit_check(&target.name, outcome, checked_at, &self.detector)
            .inspect_err(|e| {
                if !matches!(e, DbError::NotFound(_) | DbError::Stale(_)) {
                    tracing::error!(target_name = %target.name, "failed to record check: {}", e);
                }
            })?;

        let transitioned = commit.transition.is_some();
        if let Some(event) = &commit.transition {
            tracing::info!(
                target_name = %event.target_name,
                "status changed: {} -> {}",
                event.old_status,
                event.new_status
            );
            self.dispatcher.notify(Alert::from_transition(event, &commit.state.url));
        }

        Ok((commit.state, transitioned))
    }
}

/// Run one probe, treating a blown deadline as a DOWN outcome.
async fn probe_with_deadline(
    probe: Arc<dyn Probe>,
    url: &str,
    timeout: Duration,
) -> (ProbeOutcome, DateTime<Utc>) {
    let start = Instant::now();
    let outcome = match tokio::time::timeout(timeout, probe.probe(url)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::debug!(url = %url, "probe exceeded deadline of {:?}", timeout);
            ProbeOutcome::down(start.elapsed())
        }
    };
    (outcome, Utc::now())
}
