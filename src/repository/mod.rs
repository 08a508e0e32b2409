//! Relational persistence for images and their transcriptions.
//!
//! Uses sync Diesel on SQLite with an r2d2 pool; every call hops onto the
//! blocking thread pool through [`diesel_pool::run_blocking`].

pub mod diesel_image;
pub mod diesel_models;
pub mod diesel_pool;
pub mod migrations;

pub use diesel_image::DieselImageRepository;
pub use diesel_pool::{create_diesel_pool_from_url, SqlitePool};

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

/// Errors returned by repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A write that must produce a row reported none.
    #[error("Insert into {0} returned no row")]
    MissingRow(&'static str),
}

impl RepositoryError {
    /// True when the database rejected a row whose foreign key has no parent.
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(
            self,
            RepositoryError::Database(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::ForeignKeyViolation,
                _
            ))
        )
    }
}

/// Open the database at `database_url` and bring its schema up to date.
pub async fn open_database(database_url: &str) -> Result<DieselImageRepository, RepositoryError> {
    let pool = create_diesel_pool_from_url(database_url)?;
    migrations::run_migrations(&pool).await?;
    tracing::info!(database = %database_url, "Database ready");
    Ok(DieselImageRepository::new(pool))
}

/// Format a timestamp for storage.
///
/// Fixed-width microsecond RFC 3339 in UTC, so string order is time order.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, falling back to the epoch on malformed input.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            tracing::warn!(value = %s, "Unparseable timestamp in database");
            DateTime::<Utc>::UNIX_EPOCH
        })
}

/// Parse an optional stored timestamp.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_datetime(&s))
}
