//! Schema setup for the SQLite database.
//!
//! Every statement is idempotent, so this runs on each startup.

use diesel::prelude::*;

use super::diesel_pool::{run_blocking, DieselError, SqlitePool};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        filename TEXT NOT NULL,
        s3_key TEXT NOT NULL,
        s3_bucket TEXT NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS extracted_text (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        image_id INTEGER NOT NULL REFERENCES images(id),
        text_content TEXT NOT NULL,
        extracted_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_images_created_at ON images(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_extracted_text_image_id ON extracted_text(image_id)",
];

/// Create the `images` and `extracted_text` tables if they do not exist.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DieselError> {
    run_blocking(pool.clone(), |conn| {
        conn.transaction::<_, DieselError, _>(|conn| {
            for statement in SCHEMA {
                diesel::sql_query(*statement).execute(conn)?;
            }
            Ok(())
        })
    })
    .await?;

    tracing::debug!(statements = SCHEMA.len(), "Database schema is up to date");
    Ok(())
}
