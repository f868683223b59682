//! Route handlers for the job/run/dashboard surface.
//!
//! Each handler validates at the boundary, calls into the Store or
//! Scheduler, and wraps the result in the `{status, data}` / `{error, code}`
//! response envelopes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::store::{IntSet, NewJob, NewRun, NotifyOn, Schedule, TriggerType, UpdateJob};
use crate::validator;

use super::{error_response, ApiSuccess, AppState};

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "taskflow" }))
}

// ── Job DTOs ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    pub description: Option<String>,
    pub script: String,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: i32,
    #[serde(default)]
    pub retry_count: i32,
    #[serde(default)]
    pub retry_delay_secs: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub notify_on: String,
    #[serde(default)]
    pub notify_recipients: Vec<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_working_dir() -> String {
    "/tmp".to_string()
}
fn default_timeout_secs() -> i32 {
    3600
}
fn default_enabled() -> bool {
    true
}
fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateJobRequest {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub script: Option<String>,
    pub working_dir: Option<String>,
    pub timeout_secs: Option<i32>,
    pub retry_count: Option<i32>,
    pub retry_delay_secs: Option<i32>,
    pub enabled: Option<bool>,
    pub notify_on: Option<String>,
    pub notify_recipients: Option<Vec<String>>,
    pub timezone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleRequest {
    #[serde(default)]
    pub years: Vec<i32>,
    #[serde(default)]
    pub months: Vec<i32>,
    #[serde(default)]
    pub days: Vec<i32>,
    #[serde(default)]
    pub weekdays: Vec<i32>,
    #[serde(default)]
    pub hours: Vec<i32>,
    #[serde(default)]
    pub minutes: Vec<i32>,
}

impl From<ScheduleRequest> for Schedule {
    fn from(r: ScheduleRequest) -> Self {
        Schedule {
            years: IntSet(r.years),
            months: IntSet(r.months),
            days: IntSet(r.days),
            weekdays: IntSet(r.weekdays),
            hours: IntSet(r.hours),
            minutes: IntSet(r.minutes),
        }
    }
}

impl From<Schedule> for ScheduleRequest {
    fn from(s: Schedule) -> Self {
        ScheduleRequest {
            years: s.years.0,
            months: s.months.0,
            days: s.days.0,
            weekdays: s.weekdays.0,
            hours: s.hours.0,
            minutes: s.minutes.0,
        }
    }
}

// ── Jobs ─────────────────────────────────────────────────────────────────

pub async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_jobs() {
        Ok(jobs) => (StatusCode::OK, Json(ApiSuccess::new(jobs))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> impl IntoResponse {
    let notify_on = match NotifyOn::parse(&req.notify_on) {
        Ok(n) => n,
        Err(e) => {
            return error_response(crate::error::TaskflowError::Validation(e)).into_response();
        }
    };

    let new_job = NewJob {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        description: req.description,
        script: req.script,
        working_dir: req.working_dir,
        timeout_secs: req.timeout_secs,
        retry_count: req.retry_count,
        retry_delay_secs: req.retry_delay_secs,
        enabled: req.enabled,
        notify_on,
        notify_recipients: req.notify_recipients,
        timezone: req.timezone,
        created_by: None,
    };

    if let Err(e) = validator::validate_new_job(&new_job) {
        return error_response(e).into_response();
    }

    match state.store.create_job(new_job) {
        Ok(job) => (StatusCode::CREATED, Json(ApiSuccess::new(job))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

pub async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get_job(&id) {
        Ok(Some(job)) => (StatusCode::OK, Json(ApiSuccess::new(job))).into_response(),
        Ok(None) => {
            error_response(crate::error::TaskflowError::NotFound(format!("job '{id}'"))).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

pub async fn update_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateJobRequest>,
) -> impl IntoResponse {
    let notify_on = match req.notify_on {
        Some(raw) => match NotifyOn::parse(&raw) {
            Ok(n) => Some(n),
            Err(e) => {
                return error_response(crate::error::TaskflowError::Validation(e)).into_response();
            }
        },
        None => None,
    };

    let update = UpdateJob {
        name: req.name,
        description: req.description,
        script: req.script,
        working_dir: req.working_dir,
        timeout_secs: req.timeout_secs,
        retry_count: req.retry_count,
        retry_delay_secs: req.retry_delay_secs,
        enabled: req.enabled,
        notify_on,
        notify_recipients: req.notify_recipients,
        timezone: req.timezone,
    };

    if let Err(e) = validator::validate_update_job(&update) {
        return error_response(e).into_response();
    }

    match state.store.update_job(&id, update) {
        Ok(job) => (StatusCode::OK, Json(ApiSuccess::new(job))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

pub async fn delete_job(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.delete_job(&id) {
        Ok(true) => (StatusCode::OK, Json(ApiSuccess::new(json!({ "deleted": true })))).into_response(),
        Ok(false) => {
            error_response(crate::error::TaskflowError::NotFound(format!("job '{id}'"))).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

/// `POST /api/jobs/{id}/run` — manual trigger. Creates a Run row then
/// enqueues it, bypassing the calendar predicate (§4.2 Enqueue, §4.4).
pub async fn run_job(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let job = match state.store.get_job(&id) {
        Ok(Some(job)) => job,
        Ok(None) => {
            return error_response(crate::error::TaskflowError::NotFound(format!("job '{id}'")))
                .into_response();
        }
        Err(e) => return error_response(e).into_response(),
    };

    let run = match state.store.create_run(NewRun {
        id: Uuid::new_v4().to_string(),
        job_id: job.id.clone(),
        trigger_type: TriggerType::Manual,
    }) {
        Ok(run) => run,
        Err(e) => return error_response(e).into_response(),
    };

    let run_for_response = run.clone();
    if let Err(e) = state.scheduler.enqueue(job, run).await {
        return error_response(e).into_response();
    }

    (StatusCode::ACCEPTED, Json(ApiSuccess::new(run_for_response))).into_response()
}

pub async fn get_schedule(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get_schedule(&id) {
        Ok(schedule) => {
            (StatusCode::OK, Json(ApiSuccess::new(ScheduleRequest::from(schedule)))).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

pub async fn put_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ScheduleRequest>,
) -> impl IntoResponse {
    let schedule: Schedule = req.into();
    if let Err(e) = validator::validate_schedule(&schedule) {
        return error_response(e).into_response();
    }
    match state.store.upsert_schedule(&id, &schedule) {
        Ok(()) => (StatusCode::OK, Json(ApiSuccess::new(ScheduleRequest::from(schedule)))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

// ── Runs ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub limit: Option<i64>,
    pub job_id: Option<String>,
}

const DEFAULT_RUN_LIST_LIMIT: i64 = 50;

pub async fn list_runs(
    State(state): State<AppState>,
    Query(q): Query<ListRunsQuery>,
) -> impl IntoResponse {
    let limit = q.limit.unwrap_or(DEFAULT_RUN_LIST_LIMIT);
    let result = match q.job_id {
        Some(job_id) => state.store.list_runs_for_job(&job_id, limit),
        None => state.store.list_runs(limit),
    };
    match result {
        Ok(runs) => (StatusCode::OK, Json(ApiSuccess::new(runs))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

pub async fn get_run(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get_run(&id) {
        Ok(Some(run)) => (StatusCode::OK, Json(ApiSuccess::new(run))).into_response(),
        Ok(None) => {
            error_response(crate::error::TaskflowError::NotFound(format!("run '{id}'"))).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

pub async fn get_run_logs(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.list_logs_for_run(&id) {
        Ok(logs) => (StatusCode::OK, Json(ApiSuccess::new(logs))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

// ── Dashboard ────────────────────────────────────────────────────────────

pub async fn dashboard_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.dashboard_stats() {
        Ok(stats) => (StatusCode::OK, Json(ApiSuccess::new(stats))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}
