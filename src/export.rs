//! CSV export of observation history.

use chrono::Utc;
use thiserror::Error;

use crate::analytics::Window;
use crate::db::{DbError, Store};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to flush CSV output: {0}")]
    Flush(String),
}

pub const CSV_HEADER: [&str; 4] = ["timestamp", "status", "response_time", "status_code"];

/// Render a target's observations in the window as CSV, oldest first.
pub fn export_csv(store: &Store, name: &str, window: Window) -> Result<Vec<u8>, ExportError> {
    // Distinguish an unknown target from an empty history.
    store.get_state(name)?;
    let observations = store.observations_since(name, window.since(Utc::now()))?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;

    for obs in &observations {
        writer.write_record([
            obs.checked_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            obs.status.to_string(),
            obs.response_time.map(|t| format!("{:.3}", t)).unwrap_or_default(),
            obs.status_code.map(|c| c.to_string()).unwrap_or_default(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| ExportError::Flush(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Status, Target};
    use crate::probe::ProbeOutcome;
    use crate::transition::TransitionDetector;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tempfile::NamedTempFile;

    #[test]
    fn test_export_csv() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        store
            .add_target(&Target {
                name: "A".to_string(),
                url: "a.example.com".to_string(),
            })
            .unwrap();

        let detector = TransitionDetector::default();
        let recent = Utc::now() - ChronoDuration::minutes(30);
        let recent = Utc.timestamp_opt(recent.timestamp(), 0).unwrap();
        store
            .commit_check(
                "A",
                &ProbeOutcome {
                    status: Status::Up,
                    response_time: Some(0.12345),
                    status_code: Some(200),
                    ssl_expiry_days: Some(60),
                },
                recent,
                &detector,
            )
            .unwrap();
        store
            .commit_check(
                "A",
                &ProbeOutcome {
                    status: Status::Down,
                    response_time: Some(10.0),
                    status_code: None,
                    ssl_expiry_days: None,
                },
                recent + ChronoDuration::minutes(2),
                &detector,
            )
            .unwrap();

        let bytes = export_csv(&store, "A", Window::default()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp,status,response_time,status_code");
        assert_eq!(
            lines[1],
            format!("{},UP,0.123,200", recent.format("%Y-%m-%d %H:%M:%S"))
        );
        assert!(lines[2].ends_with(",DOWN,10.000,"));
    }

    #[test]
    fn test_export_unknown_target() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let err = export_csv(&store, "nope", Window::default()).unwrap_err();
        assert!(matches!(err, ExportError::Db(DbError::NotFound(_))));
    }
}
