//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use crate::probe::ProbeOutcome;
use crate::transition::TransitionDetector;

mod embedded {
    refinery::embed_migrations!("migrations");
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("target '{0}' not found")]
    NotFound(String),
    #[error("target '{0}' already exists")]
    AlreadyExists(String),
    #[error("target '{0}' already has a newer check")]
    Stale(String),
    #[error("database lock poisoned")]
    LockPoisoned,
}

/// Thread-safe database store.
///
/// Every multi-statement write runs in one transaction while holding the
/// connection lock, so a cascade delete can never interleave with the
/// commit of a check for the same target.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the store at the given path and apply migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let mut conn = Connection::open(path)?;
        embedded::migrations::runner()
            .run(&mut conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    // --- Targets / current state ---

    /// Register a target; its state starts as CHECKING.
    pub fn add_target(&self, target: &Target) -> Result<CurrentState, DbError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM targets WHERE name = ?1",
                params![target.name],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(DbError::AlreadyExists(target.name.clone()));
        }

        tx.execute(
            "INSERT INTO targets (name, url, status, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                target.name,
                target.url,
                Status::Checking.as_str(),
                format_db_time(Utc::now()),
            ],
        )?;
        tx.commit()?;

        Ok(CurrentState::checking(target))
    }

    /// Get the current state of one target.
    pub fn get_state(&self, name: &str) -> Result<CurrentState, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT name, url, status, last_checked, last_response_time, last_status_code,
                    ssl_expiry_days
             FROM targets WHERE name = ?1",
            params![name],
            state_from_row,
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound(name.to_string()))
    }

    /// Get the current state of every target, ordered by name.
    pub fn list_states(&self) -> Result<Vec<CurrentState>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, url, status, last_checked, last_response_time, last_status_code,
                    ssl_expiry_days
             FROM targets ORDER BY name ASC",
        )?;

        let states = stmt
            .query_map([], state_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(states)
    }

    /// Snapshot of the registry.
    pub fn list_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name, url FROM targets ORDER BY name ASC")?;

        let targets = stmt
            .query_map([], |row| {
                Ok(Target {
                    name: row.get(0)?,
                    url: row.get(1)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(targets)
    }

    /// Delete a target together with its observations and transitions.
    pub fn delete_target(&self, name: &str) -> Result<(), DbError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let removed = tx.execute("DELETE FROM targets WHERE name = ?1", params![name])?;
        if removed == 0 {
            return Err(DbError::NotFound(name.to_string()));
        }
        tx.execute("DELETE FROM observations WHERE target_name = ?1", params![name])?;
        tx.execute("DELETE FROM transitions WHERE target_name = ?1", params![name])?;
        tx.commit()?;

        Ok(())
    }

    // --- Check commit ---

    /// Record one probe outcome for a target.
    ///
    /// Compares against the stored status, overwrites the current state,
    /// appends the observation and, if the detector fires, the transition.
    /// All of it becomes visible atomically. An outcome older than the
    /// stored `last_checked` is rejected with `Stale` and changes nothing.
    pub fn commit_check(
        &self,
        name: &str,
        outcome: &ProbeOutcome,
        checked_at: DateTime<Utc>,
        detector: &TransitionDetector,
    ) -> Result<CheckCommit, DbError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing: Option<(String, Status, Option<String>)> = tx
            .query_row(
                "SELECT url, status, last_checked FROM targets WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, status_column(row, 1)?, row.get(2)?)),
            )
            .optional()?;
        let (url, old_status, last_checked) =
            existing.ok_or_else(|| DbError::NotFound(name.to_string()))?;

        if last_checked.as_deref().and_then(parse_db_time) > Some(checked_at) {
            return Err(DbError::Stale(name.to_string()));
        }

        let transition = detector.detect(name, old_status, outcome.status, checked_at);
        let checked_at_str = format_db_time(checked_at);

        tx.execute(
            "UPDATE targets SET status = ?1, last_checked = ?2, last_response_time = ?3,
             last_status_code = ?4, ssl_expiry_days = ?5 WHERE name = ?6",
            params![
                outcome.status.as_str(),
                checked_at_str,
                outcome.response_time,
                outcome.status_code,
                outcome.ssl_expiry_days,
                name,
            ],
        )?;

        tx.execute(
            "INSERT INTO observations
                (target_name, url, status, response_time, status_code, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                name,
                url,
                outcome.status.as_str(),
                outcome.response_time,
                outcome.status_code,
                checked_at_str,
            ],
        )?;

        if let Some(event) = &transition {
            tx.execute(
                "INSERT INTO transitions (target_name, old_status, new_status, changed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    event.target_name,
                    event.old_status.as_str(),
                    event.new_status.as_str(),
                    format_db_time(event.changed_at),
                ],
            )?;
        }

        tx.commit()?;

        let state = CurrentState {
            name: name.to_string(),
            url: url.clone(),
            status: outcome.status,
            last_checked: Some(checked_at),
            last_response_time: outcome.response_time,
            last_status_code: outcome.status_code,
            ssl_expiry_days: outcome.ssl_expiry_days,
        };
        let observation = Observation {
            target_name: name.to_string(),
            url,
            status: outcome.status,
            response_time: outcome.response_time,
            status_code: outcome.status_code,
            checked_at,
        };

        Ok(CheckCommit {
            state,
            observation,
            transition,
        })
    }

    // --- Observations ---

    /// Observations for a target since a cutoff, newest first.
    pub fn history(
        &self,
        name: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Observation>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT target_name, url, status, response_time, status_code, checked_at
             FROM observations WHERE target_name = ?1 AND checked_at >= ?2
             ORDER BY checked_at DESC, id DESC LIMIT ?3",
        )?;

        let results = stmt
            .query_map(
                params![name, format_db_time(since), limit],
                observation_from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(results)
    }

    /// Observations for a target since a cutoff, oldest first.
    pub fn observations_since(
        &self,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Observation>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT target_name, url, status, response_time, status_code, checked_at
             FROM observations WHERE target_name = ?1 AND checked_at >= ?2
             ORDER BY checked_at ASC, id ASC",
        )?;

        let results = stmt
            .query_map(params![name, format_db_time(since)], observation_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(results)
    }

    /// Total and UP observation counts for a target since a cutoff.
    pub fn count_checks(&self, name: &str, since: DateTime<Utc>) -> Result<(u64, u64), DbError> {
        let conn = self.conn()?;
        let counts = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'UP' THEN 1 ELSE 0 END), 0)
             FROM observations WHERE target_name = ?1 AND checked_at >= ?2",
            params![name, format_db_time(since)],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;

        Ok((counts.0.max(0) as u64, counts.1.max(0) as u64))
    }

    /// Non-null response times for a target since a cutoff.
    pub fn response_times(&self, name: &str, since: DateTime<Utc>) -> Result<Vec<f64>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT response_time FROM observations
             WHERE target_name = ?1 AND checked_at >= ?2 AND response_time IS NOT NULL",
        )?;

        let times = stmt
            .query_map(params![name, format_db_time(since)], |row| row.get(0))?
            .collect::<SqlResult<Vec<f64>>>()?;

        Ok(times)
    }

    /// Delete observations checked before the cutoff. Returns rows removed.
    pub fn delete_observations_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM observations WHERE checked_at < ?1",
            params![format_db_time(cutoff)],
        )?;
        Ok(removed)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    // --- Transitions ---

    /// Transitions across all targets since a cutoff, newest first.
    pub fn recent_transitions(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TransitionEvent>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT target_name, old_status, new_status, changed_at
             FROM transitions WHERE changed_at >= ?1
             ORDER BY changed_at DESC, id DESC LIMIT ?2",
        )?;

        let events = stmt
            .query_map(params![format_db_time(since), limit], |row| {
                Ok(TransitionEvent {
                    target_name: row.get(0)?,
                    old_status: status_column(row, 1)?,
                    new_status: status_column(row, 2)?,
                    changed_at: time_column(row, 3)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(events)
    }

    /// Delete transitions recorded before the cutoff. Returns rows removed.
    pub fn delete_transitions_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM transitions WHERE changed_at < ?1",
            params![format_db_time(cutoff)],
        )?;
        Ok(removed)
    }
}

fn state_from_row(row: &Row<'_>) -> SqlResult<CurrentState> {
    let last_checked: Option<String> = row.get(3)?;
    Ok(CurrentState {
        name: row.get(0)?,
        url: row.get(1)?,
        status: status_column(row, 2)?,
        last_checked: last_checked.as_deref().and_then(parse_db_time),
        last_response_time: row.get(4)?,
        last_status_code: row.get(5)?,
        ssl_expiry_days: row.get(6)?,
    })
}

fn observation_from_row(row: &Row<'_>) -> SqlResult<Observation> {
    Ok(Observation {
        target_name: row.get(0)?,
        url: row.get(1)?,
        status: status_column(row, 2)?,
        response_time: row.get(3)?,
        status_code: row.get(4)?,
        checked_at: time_column(row, 5)?,
    })
}

fn status_column(row: &Row<'_>, idx: usize) -> SqlResult<Status> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
    })
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_db_time(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp: {}", raw).into(),
        )
    })
}

/// Format a timestamp so that text ordering matches time ordering.
fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
