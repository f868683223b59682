//! Declarative shape of the application config file.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub listen_addr: String,
    pub database_path: String,
    pub database_max_connections: u32,
    /// Required at gateway startup; a collaborator contract for the
    /// out-of-core auth system, not validated further here.
    pub jwt_secret: Option<String>,
    pub log_level: String,
    pub log_dir: Option<String>,
    /// `["*"]` disables the WS origin check.
    pub allowed_origins: Vec<String>,
    pub retention_days: i64,
    pub smtp: Option<SmtpConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            database_path: default_database_path(),
            database_max_connections: 5,
            jwt_secret: None,
            log_level: "info".to_string(),
            log_dir: None,
            allowed_origins: vec!["*".to_string()],
            retention_days: 30,
            smtp: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub from_address: String,
}

fn default_database_path() -> String {
    dirs::home_dir()
        .map(|h| h.join(".taskflow").join("taskflow.db"))
        .and_then(|p| p.to_str().map(str::to_string))
        .unwrap_or_else(|| "taskflow.db".to_string())
}
