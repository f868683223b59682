//! Connection pool setup.
//!
//! SQLite is single-writer; every pooled connection is tuned for that via a
//! `r2d2::CustomizeConnection` that sets WAL mode and a generous busy
//! timeout on connect, rather than relying on callers to remember to do so.

use std::path::Path;

use diesel::connection::SimpleConnection;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

/// Minimum busy timeout enforced regardless of config, per the single-writer
/// shared-resource policy.
const MIN_BUSY_TIMEOUT_MS: u32 = 5_000;

#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA journal_mode = WAL; PRAGMA busy_timeout = {MIN_BUSY_TIMEOUT_MS}; PRAGMA foreign_keys = ON;"
        ))
        .map_err(|e| r2d2::Error::QueryError(e))
    }
}

/// Build a pooled connection to the SQLite database at `path`, apply
/// `PRAGMA`s on every acquired connection, and run pending migrations.
pub fn init(path: &Path, max_connections: u32) -> Result<DbPool, String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("failed to create db dir: {e}"))?;
    }
    let db_url = path.to_string_lossy().to_string();

    let manager = ConnectionManager::<SqliteConnection>::new(&db_url);
    let pool = r2d2::Pool::builder()
        .max_size(max_connections)
        .connection_customizer(Box::new(SqlitePragmas))
        .build(manager)
        .map_err(|e| format!("failed to build connection pool: {e}"))?;

    let mut conn = pool
        .get()
        .map_err(|e| format!("failed to get connection for migrations: {e}"))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| format!("migration failure: {e}"))?;

    Ok(pool)
}

/// Build an in-memory pool for tests. A single connection is kept alive in
/// the pool so every checkout shares the same `:memory:` database (each
/// fresh `:memory:` connection would otherwise be a distinct empty DB). Uses
/// the same `SqlitePragmas` customizer as `init()` so `PRAGMA foreign_keys`
/// is ON here too — without it, SQLite's cascade deletes on the `schedules`,
/// `runs`, `logs` and `metrics` foreign keys are silently unenforced and
/// tests asserting cascade behavior would pass against a DB that isn't
/// actually cascading.
#[cfg(test)]
pub fn init_in_memory() -> DbPool {
    let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
    let pool = r2d2::Pool::builder()
        .max_size(1)
        .connection_customizer(Box::new(SqlitePragmas))
        .build(manager)
        .expect("building in-memory pool should not fail");
    let mut conn = pool.get().expect("checkout should succeed");
    conn.run_pending_migrations(MIGRATIONS)
        .expect("migrations should succeed on a fresh in-memory db");
    pool
}
