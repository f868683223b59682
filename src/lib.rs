//! Core execution engine of a self-hosted task scheduler: a tick-driven
//! scheduler, a FIFO execution queue, a subprocess executor with timeout and
//! log streaming, and a publish-subscribe log hub, sitting on a run-history
//! store.

pub mod config;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod log_hub;
pub mod matcher;
pub mod queue;
pub mod retention;
pub mod scheduler;
pub mod store;
pub mod validator;

use std::sync::Arc;

use config::AppConfig;
use error::Result;
use executor::Executor;
use log_hub::LogHub;
use queue::{Queue, QueueHandler};
use retention::Retention;
use scheduler::Scheduler;
use store::Store;

/// Installs a `tracing-subscriber` `fmt` layer bridged from the `log` facade
/// via `tracing-log`, writing to stdout and, when `config.log_dir` is set,
/// to a daily-rotated file through `tracing-appender`.
pub fn init_logging(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let guard = if let Some(dir) = &config.log_dir {
        let file_appender = tracing_appender::rolling::daily(dir, "taskflow.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        fmt()
            .with_env_filter(filter)
            .with_writer(non_blocking.and(std::io::stdout))
            .init();
        Some(guard)
    } else {
        fmt().with_env_filter(filter).init();
        None
    };

    if let Err(e) = tracing_log::LogTracer::init() {
        log::warn!("failed to bridge `log` into `tracing`: {e}");
    }

    guard
}

/// Process-level singletons wiring the Store to the Scheduler, Queue,
/// Executor, Log Hub and Retention loop (§9 "Global state": explicit
/// Start/Stop, no ambient globals beyond these).
pub struct Engine {
    pub store: Arc<Store>,
    pub scheduler: Arc<Scheduler>,
    pub hub: LogHub,
    pub retention: Arc<Retention>,
    pub config: Arc<AppConfig>,
}

impl Engine {
    pub fn new(config: AppConfig) -> Result<Self> {
        let config = Arc::new(config);
        let store = Store::init(
            std::path::Path::new(&config.database_path),
            config.database_max_connections,
        )?;
        let hub = LogHub::start();
        let queue = Arc::new(Queue::new());
        let scheduler = Scheduler::new(store.clone(), queue);
        let retention = Retention::new(store.clone(), config.retention_days);

        Ok(Self {
            store,
            scheduler,
            hub,
            retention,
            config,
        })
    }

    /// Starts the Scheduler (which in turn starts the Queue's worker bound
    /// to the Executor) and the Retention loop.
    pub async fn start(&self) -> Result<()> {
        let executor: Arc<dyn QueueHandler> = Executor::new(self.store.clone(), self.hub.clone());
        self.scheduler.start(executor).await?;
        self.retention.start()?;
        Ok(())
    }

    pub fn stop(&self) {
        self.scheduler.stop();
        self.retention.stop();
    }

    /// Serves the gateway's HTTP/WS surface; blocks until shutdown.
    pub async fn serve_gateway(&self) -> std::result::Result<(), String> {
        gateway::daemon::serve(
            self.store.clone(),
            self.scheduler.clone(),
            self.hub.clone(),
            self.config.clone(),
        )
        .await
    }
}
