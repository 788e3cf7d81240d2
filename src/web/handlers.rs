//! HTTP request handlers.

use super::AppState;
use crate::analytics::{InvalidWindow, Window};
use crate::db::DbError;
use crate::export::{export_csv, ExportError};

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_HISTORY_LIMIT: u32 = 100;
const MAX_HISTORY_LIMIT: u32 = 1000;
const DEFAULT_ALERT_LIMIT: u32 = 50;

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced to API clients.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(_) => ApiError::NotFound(e.to_string()),
            DbError::AlreadyExists(_) | DbError::Stale(_) => ApiError::Conflict(e.to_string()),
            other => {
                tracing::error!("store error: {}", other);
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<InvalidWindow> for ApiError {
    fn from(e: InvalidWindow) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<ExportError> for ApiError {
    fn from(e: ExportError) -> Self {
        match e {
            ExportError::Db(db) => db.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub hours: Option<i64>,
}

impl WindowQuery {
    fn window(&self) -> Result<Window, InvalidWindow> {
        self.hours.map_or(Ok(Window::default()), Window::hours)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub hours: Option<i64>,
    pub limit: Option<u32>,
}

impl ListQuery {
    fn window(&self) -> Result<Window, InvalidWindow> {
        self.hours.map_or(Ok(Window::default()), Window::hours)
    }

    fn limit(&self, default: u32) -> u32 {
        self.limit.unwrap_or(default).clamp(1, MAX_HISTORY_LIMIT)
    }
}

#[derive(Debug, Deserialize)]
pub struct AddWebsiteRequest {
    pub name: String,
    pub url: String,
}

// ============================================================================
// Registry
// ============================================================================

pub async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn handle_list_websites(State(state): State<AppState>) -> ApiResult {
    let states = state.scheduler.store().list_states()?;
    Ok(Json(states).into_response())
}

pub async fn handle_add_website(
    State(state): State<AppState>,
    Json(req): Json<AddWebsiteRequest>,
) -> ApiResult {
    if req.name.trim().is_empty() || req.url.trim().is_empty() {
        return Err(ApiError::BadRequest("name and url are required".to_string()));
    }

    let created = state.scheduler.add_target(&req.name, &req.url)?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

pub async fn handle_delete_website(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult {
    let deleted = state.scheduler.remove_target(&name)?;
    Ok(Json(json!({ "deleted": deleted, "name": name })).into_response())
}

pub async fn handle_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let window = query.window()?;
    let store = state.scheduler.store();
    store.get_state(&name)?;

    let history = store.history(
        &name,
        window.since(Utc::now()),
        query.limit(DEFAULT_HISTORY_LIMIT),
    )?;
    Ok(Json(history).into_response())
}

pub async fn handle_export(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<WindowQuery>,
) -> ApiResult {
    let window = query.window()?;
    let body = export_csv(state.scheduler.store(), &name, window)?;
    let disposition = format!(
        "attachment; filename=\"{}_{}h.csv\"",
        name.replace(|c: char| !c.is_ascii_alphanumeric(), "_"),
        window.as_hours()
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

// ============================================================================
// Checks
// ============================================================================

pub async fn handle_check_one(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult {
    let updated = state.scheduler.check_now(&name).await?;
    Ok(Json(updated).into_response())
}

pub async fn handle_check_all(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.check_all_now().await)
}

// ============================================================================
// Analytics
// ============================================================================

pub async fn handle_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.analytics.dashboard_stats())
}

pub async fn handle_summary(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.analytics.summary())
}

pub async fn handle_global_uptime(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> ApiResult {
    Ok(Json(state.analytics.global_uptime(query.window()?)).into_response())
}

pub async fn handle_uptime(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<WindowQuery>,
) -> ApiResult {
    Ok(Json(state.analytics.uptime(&name, query.window()?)).into_response())
}

pub async fn handle_response_time(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<WindowQuery>,
) -> ApiResult {
    Ok(Json(state.analytics.response_time_stats(&name, query.window()?)).into_response())
}

pub async fn handle_trend(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<WindowQuery>,
) -> ApiResult {
    Ok(Json(state.analytics.hourly_trend(&name, query.window()?)).into_response())
}

pub async fn handle_complete(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<WindowQuery>,
) -> ApiResult {
    Ok(Json(state.analytics.complete(&name, query.window()?)).into_response())
}

// ============================================================================
// Alerts and maintenance
// ============================================================================

pub async fn handle_alerts(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let window = query.window()?;
    let events = state
        .scheduler
        .store()
        .recent_transitions(window.since(Utc::now()), query.limit(DEFAULT_ALERT_LIMIT))?;
    Ok(Json(events).into_response())
}

pub async fn handle_sweep(State(state): State<AppState>) -> ApiResult {
    let report = state.scheduler.sweep_now()?;
    Ok(Json(report).into_response())
}

#[cfg(test)]
mod tests {
    use super::super::router;
    use super::*;
    use crate::alert::AlertDispatcher;
    use crate::analytics::Analytics;
    use crate::db::Store;
    use crate::scheduler::{Scheduler, SchedulerSettings};
    use crate::testing::{serve, ScriptedProbe};
    use crate::transition::TransitionDetector;
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    async fn start_api() -> (NamedTempFile, String, reqwest::Client) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            Arc::new(ScriptedProbe::default()),
            AlertDispatcher::disabled(),
            TransitionDetector::default(),
            SchedulerSettings::default(),
        ));
        let base = serve(router(AppState {
            scheduler,
            analytics: Analytics::new(store),
        }))
        .await;
        (tmp, base, reqwest::Client::new())
    }

    #[tokio::test]
    async fn test_register_check_and_remove() {
        let (_tmp, base, client) = start_api().await;

        let created = client
            .post(format!("{}/api/websites", base))
            .json(&json!({ "name": "A", "url": "a.example.com" }))
            .send()
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let body: Value = created.json().await.unwrap();
        assert_eq!(body["status"], "CHECKING");

        let duplicate = client
            .post(format!("{}/api/websites", base))
            .json(&json!({ "name": "A", "url": "a.example.com" }))
            .send()
            .await
            .unwrap();
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);

        let checked: Value = client
            .get(format!("{}/api/check/A", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(checked["status"], "UP");
        assert_eq!(checked["last_status_code"], 200);

        let history: Value = client
            .get(format!("{}/api/websites/A/history?hours=1", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(history.as_array().unwrap().len(), 1);

        let deleted = client
            .delete(format!("{}/api/websites/A", base))
            .send()
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::OK);

        let gone = client
            .get(format!("{}/api/websites/A/history", base))
            .send()
            .await
            .unwrap();
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);

        let missing = client
            .delete(format!("{}/api/websites/A", base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_window_validation() {
        let (_tmp, base, client) = start_api().await;

        for hours in ["0", "169"] {
            let resp = client
                .get(format!("{}/api/analytics/A/uptime?hours={}", base, hours))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }

        let ok: Value = client
            .get(format!("{}/api/analytics/A/uptime?hours=168", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(ok["total_checks"], 0);
        assert_eq!(ok["uptime_percentage"], 0.0);
    }

    #[tokio::test]
    async fn test_check_all_and_export() {
        let (_tmp, base, client) = start_api().await;
        for name in ["A", "B"] {
            client
                .post(format!("{}/api/websites", base))
                .json(&json!({ "name": name, "url": format!("{}.example.com", name) }))
                .send()
                .await
                .unwrap();
        }

        let cycle: Value = client
            .post(format!("{}/api/check-all", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(cycle["result"], "completed");
        assert_eq!(cycle["committed"], 2);

        let stats: Value = client
            .get(format!("{}/api/stats", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats["total_websites"], 2);
        assert_eq!(stats["websites_up"], 2);

        let export = client
            .get(format!("{}/api/websites/A/export?hours=1", base))
            .send()
            .await
            .unwrap();
        assert_eq!(export.status(), StatusCode::OK);
        assert_eq!(export.headers()[header::CONTENT_TYPE], "text/csv");
        let text = export.text().await.unwrap();
        assert!(text.starts_with("timestamp,status,response_time,status_code"));
        assert_eq!(text.lines().count(), 2);

        let summary: Value = client
            .get(format!("{}/api/analytics/summary", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(summary.as_array().unwrap().len(), 2);
        assert_eq!(summary[0]["name"], "A");
        assert_eq!(summary[0]["uptime"]["uptime_percentage"], 100.0);
    }
}
