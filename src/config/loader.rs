//! TOML configuration loading, env-var overrides, and atomic saves.
//!
//! # Loading order
//! 1. Parse `~/.taskflow/config.toml` (or the path in `TASKFLOW_CONFIG`)
//! 2. Apply `TASKFLOW_*` environment variable overrides
//! 3. Fall back to [`AppConfig::default`] if the file is missing
//!
//! # Atomic save
//! Writes to `<path>.tmp` then renames over `<path>` so a crash mid-write
//! never leaves a truncated config file behind.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use super::schema::AppConfig;

pub fn default_config_path() -> Result<PathBuf, String> {
    dirs::home_dir()
        .map(|h| h.join(".taskflow").join("config.toml"))
        .ok_or_else(|| "could not determine home directory".to_string())
}

pub fn load_config(path: &Path) -> Result<AppConfig, String> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AppConfig>(&content)
            .map_err(|e| format!("failed to parse config at {path:?}: {e}"))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => return Err(format!("failed to read config at {path:?}: {e}")),
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config from the default path (or `TASKFLOW_CONFIG`), falling back to
/// defaults on any error.
pub fn load_default_config() -> AppConfig {
    let path = env::var("TASKFLOW_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml")));

    load_config(&path).unwrap_or_default()
}

/// Apply `TASKFLOW_*` environment variable overrides to `config`.
///
/// Supported overrides:
/// - `TASKFLOW_LISTEN_ADDR`
/// - `TASKFLOW_DATABASE_PATH`
/// - `TASKFLOW_JWT_SECRET`
/// - `TASKFLOW_LOG_LEVEL`
/// - `TASKFLOW_LOG_DIR`
/// - `TASKFLOW_ALLOWED_ORIGINS` (comma separated)
/// - `TASKFLOW_RETENTION_DAYS`
fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = env::var("TASKFLOW_LISTEN_ADDR") {
        config.listen_addr = v;
    }
    if let Ok(v) = env::var("TASKFLOW_DATABASE_PATH") {
        config.database_path = v;
    }
    if let Ok(v) = env::var("TASKFLOW_JWT_SECRET") {
        config.jwt_secret = Some(v);
    }
    if let Ok(v) = env::var("TASKFLOW_LOG_LEVEL") {
        config.log_level = v;
    }
    if let Ok(v) = env::var("TASKFLOW_LOG_DIR") {
        config.log_dir = Some(v);
    }
    if let Ok(v) = env::var("TASKFLOW_ALLOWED_ORIGINS") {
        config.allowed_origins = v.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Ok(v) = env::var("TASKFLOW_RETENTION_DAYS") {
        if let Ok(days) = v.parse::<i64>() {
            config.retention_days = days;
        }
    }
}

/// Persist `config` to `path`, writing through a temp file and renaming over
/// the destination so a crash never leaves a partially-written file.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create config dir: {e}"))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    let serialized =
        toml::to_string_pretty(config).map_err(|e| format!("failed to serialize config: {e}"))?;
    fs::write(&tmp_path, serialized).map_err(|e| format!("failed to write temp config: {e}"))?;
    fs::rename(&tmp_path, path).map_err(|e| format!("failed to rename temp config: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let config = load_config(&path).expect("load should not error on missing file");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let mut config = AppConfig::default();
        config.retention_days = 7;
        config.listen_addr = "0.0.0.0:9090".to_string();

        save_config(&path, &config).expect("save should succeed");
        let loaded = load_config(&path).expect("load should succeed");
        assert_eq!(loaded, config);
    }

    #[test]
    fn env_override_wins_over_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        save_config(&path, &AppConfig::default()).expect("save");

        env::set_var("TASKFLOW_RETENTION_DAYS", "99");
        let loaded = load_config(&path).expect("load");
        env::remove_var("TASKFLOW_RETENTION_DAYS");

        assert_eq!(loaded.retention_days, 99);
    }
}
