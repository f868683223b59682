//! Bearer-token gate standing in for a full account/JWT system: a token
//! generated once, persisted with owner-only permissions, and checked on
//! every protected request.

use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use super::AppState;

pub fn default_token_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".taskflow")
        .join("daemon.token")
}

/// Load the token at `path`, generating and persisting a fresh one with
/// `0o600` permissions on Unix if it doesn't yet exist.
pub fn load_or_create_token(path: &Path) -> Result<String, String> {
    if path.exists() {
        return std::fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .map_err(|e| format!("failed to read token file: {e}"));
    }

    let token = Uuid::new_v4().to_string().replace('-', "");

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("failed to create token dir: {e}"))?;
    }
    std::fs::write(path, &token).map_err(|e| format!("failed to write token: {e}"))?;

    #[cfg(unix)]
    {
        let mut perms = std::fs::metadata(path)
            .map_err(|e| format!("failed to read token metadata: {e}"))?
            .permissions();
        perms.set_mode(0o600);
        std::fs::set_permissions(path, perms)
            .map_err(|e| format!("failed to set token permissions: {e}"))?;
    }

    log::info!("gateway: bearer token written to {}", path.display());
    Ok(token)
}

/// Axum middleware: validates the `Authorization: Bearer <token>` header
/// against the token on disk.
pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let expected = match load_or_create_token(&state.token_path) {
        Ok(t) => t,
        Err(e) => {
            log::error!("gateway: auth middleware failed to load token: {e}");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let provided = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    match provided {
        Some(token) if token == expected => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
