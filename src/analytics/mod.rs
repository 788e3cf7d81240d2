//! Read-side analytics over the observation history.
//!
//! Every query degrades to an empty or zeroed result when the store
//! fails; analytics must never be able to disturb the check cycle.

mod trend;

pub use trend::*;

use crate::db::{CurrentState, DbError, Observation, Status, Store};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_WINDOW_HOURS: u32 = 24;
pub const MAX_WINDOW_HOURS: u32 = 168;

/// Number of recent observations included in complete analytics.
const COMPLETE_HISTORY_LIMIT: u32 = 10;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("window must be between 1 and {max} hours, got {0}", max = MAX_WINDOW_HOURS)]
pub struct InvalidWindow(pub i64);

/// A look-back window in whole hours, within [1, 168].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window(u32);

impl Window {
    pub fn hours(hours: i64) -> Result<Self, InvalidWindow> {
        if (1..=MAX_WINDOW_HOURS as i64).contains(&hours) {
            Ok(Self(hours as u32))
        } else {
            Err(InvalidWindow(hours))
        }
    }

    pub fn as_hours(&self) -> u32 {
        self.0
    }

    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - ChronoDuration::hours(self.0 as i64)
    }
}

impl Default for Window {
    fn default() -> Self {
        Self(DEFAULT_WINDOW_HOURS)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UptimeStats {
    pub total_checks: u64,
    pub up_checks: u64,
    pub down_checks: u64,
    pub uptime_percentage: f64,
}

impl UptimeStats {
    pub fn from_counts(total_checks: u64, up_checks: u64) -> Self {
        if total_checks == 0 {
            return Self::default();
        }
        Self {
            total_checks,
            up_checks,
            down_checks: total_checks.saturating_sub(up_checks),
            uptime_percentage: round_to(up_checks as f64 / total_checks as f64 * 100.0, 2),
        }
    }
}

/// Response time statistics in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseTimeStats {
    pub avg_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    pub p95_response_time: f64,
    pub measurements: usize,
}

impl ResponseTimeStats {
    pub fn from_samples(mut samples: Vec<f64>) -> Self {
        samples.retain(|s| s.is_finite());
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_by(|a, b| a.total_cmp(b));

        let n = samples.len();
        let sum: f64 = samples.iter().sum();
        // Nearest-rank percentile.
        let rank = ((0.95 * n as f64).ceil() as usize).clamp(1, n);

        Self {
            avg_response_time: round_to(sum / n as f64, 3),
            min_response_time: round_to(samples[0], 3),
            max_response_time: round_to(samples[n - 1], 3),
            p95_response_time: round_to(samples[rank - 1], 3),
            measurements: n,
        }
    }
}

/// One dashboard row: current state joined with 24h analytics.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    #[serde(flatten)]
    pub state: CurrentState,
    pub traffic_info: &'static str,
    pub uptime: UptimeStats,
    pub response_time: ResponseTimeStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalUptime {
    pub uptime_percentage: f64,
    /// Targets with at least one check in the window.
    pub targets_counted: usize,
    pub window_hours: u32,
}

/// Everything the per-target analytics page needs in one call.
#[derive(Debug, Clone, Serialize)]
pub struct TargetAnalytics {
    pub target_name: String,
    pub window_hours: u32,
    pub uptime_analytics: UptimeStats,
    pub response_time_analytics: ResponseTimeStats,
    pub hourly_trends: Vec<HourlyBucket>,
    pub history: Vec<Observation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_websites: usize,
    pub websites_up: usize,
    pub websites_down: usize,
    pub websites_checking: usize,
    /// Mean latest response time over UP targets.
    pub average_response_time: f64,
}

/// Human-readable load estimate from the latest response time.
pub fn traffic_info(status: Status, response_time: Option<f64>) -> &'static str {
    match (status, response_time) {
        (Status::Checking, _) => "Awaiting First Check",
        (Status::Down, _) | (Status::Up, None) => "Server Down or Unreachable",
        (Status::Up, Some(t)) if t < 0.5 => "Fast Response (Low Traffic)",
        (Status::Up, Some(t)) if t < 1.5 => "Good Response (Normal Traffic)",
        (Status::Up, Some(t)) if t < 3.0 => "Slow Response (High Traffic)",
        (Status::Up, Some(_)) => "Very Slow (Heavy Traffic or Server Issues)",
    }
}

/// Analytics engine over the store.
#[derive(Clone)]
pub struct Analytics {
    store: Arc<Store>,
}

impl Analytics {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn uptime(&self, name: &str, window: Window) -> UptimeStats {
        self.uptime_at(name, window, Utc::now())
    }

    fn uptime_at(&self, name: &str, window: Window, now: DateTime<Utc>) -> UptimeStats {
        let (total, up) = degrade(self.store.count_checks(name, window.since(now)), "uptime");
        UptimeStats::from_counts(total, up)
    }

    pub fn response_time_stats(&self, name: &str, window: Window) -> ResponseTimeStats {
        self.response_time_stats_at(name, window, Utc::now())
    }

    fn response_time_stats_at(
        &self,
        name: &str,
        window: Window,
        now: DateTime<Utc>,
    ) -> ResponseTimeStats {
        let samples = degrade(self.store.response_times(name, window.since(now)), "response times");
        ResponseTimeStats::from_samples(samples)
    }

    pub fn hourly_trend(&self, name: &str, window: Window) -> Vec<HourlyBucket> {
        let observations = degrade(
            self.store.observations_since(name, window.since(Utc::now())),
            "hourly trend",
        );
        bucket_by_local_hour(&observations)
    }

    /// Current state of every target with its 24h uptime and latency.
    pub fn summary(&self) -> Vec<SummaryRow> {
        let now = Utc::now();
        let window = Window::default();

        degrade(self.store.list_states(), "summary")
            .into_iter()
            .map(|state| SummaryRow {
                traffic_info: traffic_info(state.status, state.last_response_time),
                uptime: self.uptime_at(&state.name, window, now),
                response_time: self.response_time_stats_at(&state.name, window, now),
                state,
            })
            .collect()
    }

    /// Unweighted mean of per-target uptime over targets with checks.
    pub fn global_uptime(&self, window: Window) -> GlobalUptime {
        let now = Utc::now();
        let targets = degrade(self.store.list_targets(), "global uptime");

        let percentages: Vec<f64> = targets
            .iter()
            .filter_map(|t| {
                let (total, up) =
                    degrade(self.store.count_checks(&t.name, window.since(now)), "global uptime");
                (total > 0).then(|| up as f64 / total as f64 * 100.0)
            })
            .collect();

        if percentages.is_empty() {
            return GlobalUptime {
                window_hours: window.as_hours(),
                ..Default::default()
            };
        }

        GlobalUptime {
            uptime_percentage: round_to(
                percentages.iter().sum::<f64>() / percentages.len() as f64,
                2,
            ),
            targets_counted: percentages.len(),
            window_hours: window.as_hours(),
        }
    }

    /// Uptime, latency, trend and the latest observations for one target.
    pub fn complete(&self, name: &str, window: Window) -> TargetAnalytics {
        let now = Utc::now();
        let since = window.since(now);
        let observations = degrade(
            self.store.observations_since(name, since),
            "complete analytics",
        );
        let history = degrade(
            self.store.history(name, since, COMPLETE_HISTORY_LIMIT),
            "complete analytics",
        );

        TargetAnalytics {
            target_name: name.to_string(),
            window_hours: window.as_hours(),
            uptime_analytics: self.uptime_at(name, window, now),
            response_time_analytics: self.response_time_stats_at(name, window, now),
            hourly_trends: bucket_by_local_hour(&observations),
            history,
        }
    }

    /// Counters over the current states.
    pub fn dashboard_stats(&self) -> DashboardStats {
        let states = degrade(self.store.list_states(), "dashboard stats");
        dashboard_stats(&states)
    }
}

fn dashboard_stats(states: &[CurrentState]) -> DashboardStats {
    let count = |status: Status| states.iter().filter(|s| s.status == status).count();
    let up_times: Vec<f64> = states
        .iter()
        .filter(|s| s.status == Status::Up)
        .filter_map(|s| s.last_response_time)
        .collect();

    let average_response_time = if up_times.is_empty() {
        0.0
    } else {
        round_to(up_times.iter().sum::<f64>() / up_times.len() as f64, 3)
    };

    DashboardStats {
        total_websites: states.len(),
        websites_up: count(Status::Up),
        websites_down: count(Status::Down),
        websites_checking: count(Status::Checking),
        average_response_time,
    }
}

fn degrade<T: Default>(result: Result<T, DbError>, what: &str) -> T {
    result.unwrap_or_else(|e| {
        tracing::warn!("analytics query failed ({}): {}", what, e);
        T::default()
    })
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
