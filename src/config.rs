//! Configuration module for sitewatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::probe::DEFAULT_PROBE_TIMEOUT;

/// SMTP settings for alert mail.
#[derive(Debug, Clone, PartialEq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub to: String,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "sitewatch.db")
    pub db_path: String,
    /// Minutes between check cycles (default: 2)
    pub check_interval_minutes: u64,
    /// Days of observation history to keep (default: 30)
    pub retention_days: i64,
    /// Hours between retention sweeps (default: 24)
    pub sweep_interval_hours: u64,
    /// Also age out transition events (default: false)
    pub prune_transitions: bool,
    /// Record a transition for the first check after registration (default: false)
    pub alert_on_first_check: bool,
    /// Probes allowed in flight at once within a cycle (default: 32)
    pub max_concurrent_probes: usize,
    /// Per-probe timeout in seconds (default: 10)
    pub probe_timeout_secs: u64,
    /// Alert channel; `None` disables alerting
    pub smtp: Option<SmtpConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "sitewatch.db".to_string(),
            check_interval_minutes: 2,
            retention_days: 30,
            sweep_interval_hours: 24,
            prune_transitions: false,
            alert_on_first_check: false,
            max_concurrent_probes: 32,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT.as_secs(),
            smtp: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SITEWATCH_HTTP_PORT`
    /// - `SITEWATCH_DB_PATH`
    /// - `SITEWATCH_CHECK_INTERVAL_MINUTES`
    /// - `SITEWATCH_RETENTION_DAYS`
    /// - `SITEWATCH_SWEEP_INTERVAL_HOURS`
    /// - `SITEWATCH_PRUNE_TRANSITIONS`
    /// - `SITEWATCH_ALERT_ON_FIRST_CHECK`
    /// - `SITEWATCH_MAX_CONCURRENT_PROBES`
    /// - `SITEWATCH_PROBE_TIMEOUT_SECS`
    /// - `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD`,
    ///   `ALERT_EMAIL_FROM`, `ALERT_EMAIL_TO`
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        set_parsed(&lookup, "SITEWATCH_HTTP_PORT", &mut cfg.http_port);
        if let Some(db_path) = lookup("SITEWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }
        set_parsed(&lookup, "SITEWATCH_CHECK_INTERVAL_MINUTES", &mut cfg.check_interval_minutes);
        set_parsed(&lookup, "SITEWATCH_RETENTION_DAYS", &mut cfg.retention_days);
        set_parsed(&lookup, "SITEWATCH_SWEEP_INTERVAL_HOURS", &mut cfg.sweep_interval_hours);
        set_parsed(&lookup, "SITEWATCH_PRUNE_TRANSITIONS", &mut cfg.prune_transitions);
        set_parsed(&lookup, "SITEWATCH_ALERT_ON_FIRST_CHECK", &mut cfg.alert_on_first_check);
        set_parsed(&lookup, "SITEWATCH_MAX_CONCURRENT_PROBES", &mut cfg.max_concurrent_probes);
        set_parsed(&lookup, "SITEWATCH_PROBE_TIMEOUT_SECS", &mut cfg.probe_timeout_secs);

        // Zero would stall the scheduler or disable every probe.
        cfg.check_interval_minutes = cfg.check_interval_minutes.max(1);
        cfg.sweep_interval_hours = cfg.sweep_interval_hours.max(1);
        cfg.max_concurrent_probes = cfg.max_concurrent_probes.max(1);
        cfg.probe_timeout_secs = cfg.probe_timeout_secs.max(1);
        cfg.retention_days = cfg.retention_days.max(1);

        cfg.smtp = smtp_from_lookup(&lookup);
        cfg
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_minutes * 60)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_hours * 3600)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn set_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!("ignoring invalid value for {}: {:?}", key, raw),
        }
    }
}

/// All of host, credentials and both addresses must be present.
fn smtp_from_lookup<F>(lookup: &F) -> Option<SmtpConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let mut port: u16 = 587;
    set_parsed(lookup, "SMTP_PORT", &mut port);

    Some(SmtpConfig {
        host: non_empty("SMTP_HOST")?,
        port,
        username: non_empty("SMTP_USERNAME")?,
        password: non_empty("SMTP_PASSWORD")?,
        from: non_empty("ALERT_EMAIL_FROM")?,
        to: non_empty("ALERT_EMAIL_TO")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "sitewatch.db");
        assert_eq!(cfg.check_interval(), Duration::from_secs(120));
        assert_eq!(cfg.retention_days, 30);
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(86_400));
        assert_eq!(cfg.probe_timeout(), Duration::from_secs(10));
        assert!(!cfg.prune_transitions);
        assert!(!cfg.alert_on_first_check);
        assert!(cfg.smtp.is_none());
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let cfg = ServerConfig::from_lookup(lookup(&[
            ("SITEWATCH_HTTP_PORT", "9000"),
            ("SITEWATCH_CHECK_INTERVAL_MINUTES", "5"),
            ("SITEWATCH_RETENTION_DAYS", "not-a-number"),
            ("SITEWATCH_PRUNE_TRANSITIONS", "true"),
            ("SITEWATCH_MAX_CONCURRENT_PROBES", "0"),
        ]));
        assert_eq!(cfg.http_port, 9000);
        assert_eq!(cfg.check_interval_minutes, 5);
        assert_eq!(cfg.retention_days, 30);
        assert!(cfg.prune_transitions);
        assert_eq!(cfg.max_concurrent_probes, 1);
    }

    #[test]
    fn test_smtp_requires_all_fields() {
        let partial = ServerConfig::from_lookup(lookup(&[
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_USERNAME", "user"),
        ]));
        assert!(partial.smtp.is_none());

        let full = ServerConfig::from_lookup(lookup(&[
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_PORT", "2525"),
            ("SMTP_USERNAME", "user"),
            ("SMTP_PASSWORD", "pass"),
            ("ALERT_EMAIL_FROM", "monitor@example.com"),
            ("ALERT_EMAIL_TO", "ops@example.com"),
        ]));
        let smtp = full.smtp.unwrap();
        assert_eq!(smtp.port, 2525);
        assert_eq!(smtp.host, "smtp.example.com");
    }
}
