//! Diesel connection pool management for SQLite.
//!
//! SQLite operations use sync Diesel with r2d2 connection pooling, wrapped in
//! spawn_blocking so request handlers never block the runtime.

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use std::time::Duration;

/// Diesel error type alias.
pub type DieselError = diesel::result::Error;

/// r2d2 pool error type alias.
pub type R2D2Error = diesel::r2d2::PoolError;

/// Connection pool for SQLite using r2d2.
pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

/// Applies [`init_connection_pragmas`] to every connection the pool opens.
#[derive(Debug, Clone, Copy)]
struct PragmaCustomizer;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        init_connection_pragmas(conn).map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Create a Diesel connection pool from a database URL.
///
/// Accepts `sqlite:path`, `sqlite://path` or a bare path.
pub fn create_diesel_pool_from_url(database_url: &str) -> Result<SqlitePool, R2D2Error> {
    let url = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);

    let manager = ConnectionManager::<SqliteConnection>::new(url);

    Pool::builder()
        .max_size(10)
        .connection_timeout(Duration::from_secs(30))
        .connection_customizer(Box::new(PragmaCustomizer))
        .build(manager)
}

/// Initialize SQLite pragmas for a connection.
pub fn init_connection_pragmas(conn: &mut SqliteConnection) -> Result<(), DieselError> {
    conn.batch_execute(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
}

/// Run a blocking Diesel operation asynchronously.
///
/// # Example
/// ```ignore
/// let rows = run_blocking(pool.clone(), |conn| {
///     images::table.load::<ImageRecord>(conn)
/// }).await?;
/// ```
pub async fn run_blocking<F, T>(pool: SqlitePool, f: F) -> Result<T, DieselError>
where
    F: FnOnce(&mut SqliteConnection) -> Result<T, DieselError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|e| {
            DieselError::DatabaseError(
                diesel::result::DatabaseErrorKind::Unknown,
                Box::new(e.to_string()),
            )
        })?;
        f(&mut conn)
    })
    .await
    .map_err(|e| {
        DieselError::DatabaseError(
            diesel::result::DatabaseErrorKind::Unknown,
            Box::new(e.to_string()),
        )
    })?
}
