//! Thin HTTP/WS surface realizing the collaborator contracts well enough to
//! drive the core end-to-end. Full auth/account/email/UI are out of scope;
//! this module exists to exercise the Store, Scheduler and Log Hub through
//! the shape of requests a production gateway would receive.

pub mod auth;
pub mod daemon;
pub mod routes;
pub mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::config::AppConfig;
use crate::error::TaskflowError;
use crate::log_hub::LogHub;
use crate::scheduler::Scheduler;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub scheduler: Arc<Scheduler>,
    pub hub: LogHub,
    pub config: Arc<AppConfig>,
    pub token_path: PathBuf,
}

/// `{status:"success", data:...}` success envelope (§6).
#[derive(Debug, Serialize)]
pub struct ApiSuccess<T: Serialize> {
    pub status: &'static str,
    pub data: T,
}

impl<T: Serialize> ApiSuccess<T> {
    pub fn new(data: T) -> Self {
        Self {
            status: "success",
            data,
        }
    }
}

/// `{error, code}` error envelope (§6).
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: &'static str,
}

/// Maps a [`TaskflowError`] to the HTTP status code and symbolic `code` in
/// §6/§7's error envelope.
pub fn error_response(err: TaskflowError) -> (axum::http::StatusCode, axum::Json<ApiError>) {
    use axum::http::StatusCode;
    let (status, code) = match &err {
        TaskflowError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
        TaskflowError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        TaskflowError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        TaskflowError::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
        TaskflowError::Unauthorized => (StatusCode::FORBIDDEN, "unauthorized"),
        TaskflowError::StorageTransient(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "storage_transient")
        }
    };
    (
        status,
        axum::Json(ApiError {
            error: err.to_string(),
            code,
        }),
    )
}
