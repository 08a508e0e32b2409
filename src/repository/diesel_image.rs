//! Diesel-based image repository for SQLite.
//!
//! Owns the `images` and `extracted_text` tables. Whether an image still
//! needs transcription is never stored; it is recomputed with a left join
//! against `extracted_text` every time it is asked for.

use chrono::Utc;
use diesel::prelude::*;

use super::diesel_models::{ExtractedTextRecord, ImageRecord, NewExtractedText, NewImage};
use super::diesel_pool::{run_blocking, DieselError, SqlitePool};
use super::{format_datetime, parse_datetime, parse_datetime_opt, RepositoryError};
use crate::models::{ExtractedText, Image, ImageWithText, SearchHit, Stats, UnprocessedImage};
use crate::schema::{extracted_text, images};

/// Convert a database record to a domain model.
impl From<ImageRecord> for Image {
    fn from(record: ImageRecord) -> Self {
        Image {
            id: record.id,
            filename: record.filename,
            storage_key: record.s3_key,
            storage_container: record.s3_bucket,
            created_at: parse_datetime(&record.created_at),
        }
    }
}

impl From<ExtractedTextRecord> for ExtractedText {
    fn from(record: ExtractedTextRecord) -> Self {
        ExtractedText {
            id: record.id,
            image_id: record.image_id,
            text_content: record.text_content,
            extracted_at: parse_datetime(&record.extracted_at),
        }
    }
}

/// Diesel-based image repository with compile-time query checking.
#[derive(Clone)]
pub struct DieselImageRepository {
    pool: SqlitePool,
}

impl DieselImageRepository {
    /// Create a new Diesel image repository with an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an image record and return its generated id.
    pub async fn insert_image(
        &self,
        filename: &str,
        storage_key: &str,
        container: &str,
    ) -> Result<i32, RepositoryError> {
        let filename = filename.to_string();
        let storage_key = storage_key.to_string();
        let container = container.to_string();
        let created_at = format_datetime(&Utc::now());
        let pool = self.pool.clone();

        let inserted = run_blocking(pool, move |conn| {
            conn.transaction::<_, DieselError, _>(|conn| {
                let rows = diesel::insert_into(images::table)
                    .values(&NewImage {
                        filename: &filename,
                        s3_key: &storage_key,
                        s3_bucket: &container,
                        created_at: &created_at,
                    })
                    .execute(conn)?;
                if rows == 0 {
                    return Ok(None);
                }

                diesel::sql_query("SELECT last_insert_rowid()")
                    .get_result::<LastInsertRowId>(conn)
                    .map(|r| Some(r.id))
            })
        })
        .await?;

        let id = inserted.ok_or(RepositoryError::MissingRow("images"))?;
        i32::try_from(id).map_err(|_| RepositoryError::MissingRow("images"))
    }

    /// Insert the transcription for an image.
    ///
    /// Does not check whether the image already has text; the foreign key
    /// still rejects ids that do not exist.
    pub async fn insert_extracted_text(
        &self,
        image_id: i32,
        text: &str,
    ) -> Result<(), RepositoryError> {
        let text = text.to_string();
        let extracted_at = format_datetime(&Utc::now());
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            diesel::insert_into(extracted_text::table)
                .values(&NewExtractedText {
                    image_id,
                    text_content: &text,
                    extracted_at: &extracted_at,
                })
                .execute(conn)?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Images without any extracted text, oldest first.
    pub async fn list_unprocessed(&self) -> Result<Vec<UnprocessedImage>, RepositoryError> {
        let pool = self.pool.clone();

        let records = run_blocking(pool, move |conn| {
            images::table
                .left_join(extracted_text::table)
                .filter(extracted_text::id.is_null())
                .order((images::created_at.asc(), images::id.asc()))
                .select(ImageRecord::as_select())
                .load::<ImageRecord>(conn)
        })
        .await?;

        Ok(records
            .into_iter()
            .map(|r| UnprocessedImage::from(Image::from(r)))
            .collect())
    }

    /// Total and processed image counts from one aggregate query.
    pub async fn get_stats(&self) -> Result<Stats, RepositoryError> {
        let pool = self.pool.clone();

        let row = run_blocking(pool, move |conn| {
            diesel::sql_query(
                "SELECT COUNT(DISTINCT i.id) AS total_images, \
                        COUNT(DISTINCT et.image_id) AS processed_images \
                 FROM images i \
                 LEFT JOIN extracted_text et ON i.id = et.image_id",
            )
            .get_result::<StatsRow>(conn)
        })
        .await?;

        Ok(Stats {
            total_images: row.total_images.max(0) as u64,
            processed_images: row.processed_images.max(0) as u64,
        })
    }

    /// Every image with its text (if any), newest first.
    pub async fn list_all_with_text(&self) -> Result<Vec<ImageWithText>, RepositoryError> {
        let pool = self.pool.clone();

        let rows = run_blocking(pool, move |conn| {
            images::table
                .left_join(extracted_text::table)
                .order((images::created_at.desc(), images::id.desc()))
                .select((
                    ImageRecord::as_select(),
                    extracted_text::text_content.nullable(),
                    extracted_text::extracted_at.nullable(),
                ))
                .load::<(ImageRecord, Option<String>, Option<String>)>(conn)
        })
        .await?;

        Ok(rows
            .into_iter()
            .map(|(record, text_content, extracted_at)| ImageWithText {
                image: Image::from(record),
                text_content,
                extracted_at: parse_datetime_opt(extracted_at),
            })
            .collect())
    }

    /// Delete an image and its extracted text.
    ///
    /// Returns whether an image row was removed; a missing id is not an error.
    pub async fn delete_image(&self, id: i32) -> Result<bool, RepositoryError> {
        let pool = self.pool.clone();

        let deleted = run_blocking(pool, move |conn| {
            conn.transaction::<_, DieselError, _>(|conn| {
                // Text rows reference the image, so they go first
                diesel::delete(extracted_text::table.filter(extracted_text::image_id.eq(id)))
                    .execute(conn)?;

                let rows = diesel::delete(images::table.find(id)).execute(conn)?;
                Ok(rows > 0)
            })
        })
        .await?;

        Ok(deleted)
    }

    /// Get an image by id.
    pub async fn get_image(&self, id: i32) -> Result<Option<Image>, RepositoryError> {
        let pool = self.pool.clone();

        let record = run_blocking(pool, move |conn| {
            images::table
                .find(id)
                .select(ImageRecord::as_select())
                .first::<ImageRecord>(conn)
                .optional()
        })
        .await?;

        Ok(record.map(Image::from))
    }

    /// All transcriptions recorded for an image, oldest first.
    pub async fn texts_for_image(&self, image_id: i32) -> Result<Vec<ExtractedText>, RepositoryError> {
        let pool = self.pool.clone();

        let records = run_blocking(pool, move |conn| {
            extracted_text::table
                .filter(extracted_text::image_id.eq(image_id))
                .order((extracted_text::extracted_at.asc(), extracted_text::id.asc()))
                .select(ExtractedTextRecord::as_select())
                .load::<ExtractedTextRecord>(conn)
        })
        .await?;

        Ok(records.into_iter().map(ExtractedText::from).collect())
    }

    /// Case-insensitive substring search over transcriptions, newest first.
    pub async fn search_text(&self, query: &str) -> Result<Vec<SearchHit>, RepositoryError> {
        let pattern = format!("%{}%", escape_like(query));
        let pool = self.pool.clone();

        let rows = run_blocking(pool, move |conn| {
            images::table
                .inner_join(extracted_text::table)
                .filter(extracted_text::text_content.like(pattern).escape('\\'))
                .order((extracted_text::extracted_at.desc(), extracted_text::id.desc()))
                .select((
                    images::id,
                    images::filename,
                    images::s3_key,
                    extracted_text::text_content,
                    extracted_text::extracted_at,
                ))
                .load::<(i32, String, String, String, String)>(conn)
        })
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, filename, storage_key, text_content, extracted_at)| SearchHit {
                id,
                filename,
                storage_key,
                text_content,
                extracted_at: parse_datetime(&extracted_at),
            })
            .collect())
    }

    /// Distinct storage keys referenced by image rows in `container`.
    pub async fn list_storage_keys(&self, container: &str) -> Result<Vec<String>, RepositoryError> {
        let container = container.to_string();
        let pool = self.pool.clone();

        let keys = run_blocking(pool, move |conn| {
            images::table
                .filter(images::s3_bucket.eq(&container))
                .select(images::s3_key)
                .distinct()
                .order(images::s3_key.asc())
                .load::<String>(conn)
        })
        .await?;

        Ok(keys)
    }
}

/// Escape LIKE wildcards so user input matches literally.
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(diesel::QueryableByName)]
struct StatsRow {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    total_images: i64,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    processed_images: i64,
}

#[derive(diesel::QueryableByName)]
struct LastInsertRowId {
    #[diesel(sql_type = diesel::sql_types::BigInt, column_name = "last_insert_rowid()")]
    id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::diesel_pool::create_diesel_pool_from_url;
    use crate::repository::migrations::run_migrations;
    use tempfile::tempdir;

    async fn setup_test_db() -> (DieselImageRepository, SqlitePool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db_url = format!("{}", db_path.display());

        let pool = create_diesel_pool_from_url(&db_url).unwrap();
        run_migrations(&pool).await.unwrap();

        (DieselImageRepository::new(pool.clone()), pool, dir)
    }

    async fn insert_with_timestamp(pool: &SqlitePool, filename: &str, created_at: &str) -> i32 {
        let filename = filename.to_string();
        let created_at = created_at.to_string();
        run_blocking(pool.clone(), move |conn| {
            diesel::insert_into(images::table)
                .values(&NewImage {
                    filename: &filename,
                    s3_key: &format!("images/{filename}"),
                    s3_bucket: "test-bucket",
                    created_at: &created_at,
                })
                .execute(conn)?;
            diesel::sql_query("SELECT last_insert_rowid()")
                .get_result::<LastInsertRowId>(conn)
                .map(|r| r.id as i32)
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_image_crud() {
        let (repo, _pool, _dir) = setup_test_db().await;

        let id = repo
            .insert_image("cat.png", "images/cat.png", "test-bucket")
            .await
            .unwrap();
        assert_eq!(id, 1);

        let image = repo.get_image(id).await.unwrap().unwrap();
        assert_eq!(image.filename, "cat.png");
        assert_eq!(image.storage_key, "images/cat.png");
        assert_eq!(image.storage_container, "test-bucket");

        assert!(repo.delete_image(id).await.unwrap());
        assert!(repo.get_image(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unprocessed_queue_is_oldest_first() {
        let (repo, pool, _dir) = setup_test_db().await;

        // Inserted out of chronological order on purpose
        let newer = insert_with_timestamp(&pool, "newer.png", "2024-03-01T00:00:00.000000Z").await;
        let older = insert_with_timestamp(&pool, "older.png", "2024-01-01T00:00:00.000000Z").await;
        let middle = insert_with_timestamp(&pool, "middle.png", "2024-02-01T00:00:00.000000Z").await;

        let queue: Vec<i32> = repo
            .list_unprocessed()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(queue, vec![older, middle, newer]);

        repo.insert_extracted_text(middle, "hello").await.unwrap();
        let queue: Vec<i32> = repo
            .list_unprocessed()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(queue, vec![older, newer]);
    }

    #[tokio::test]
    async fn test_empty_queue_is_not_an_error() {
        let (repo, _pool, _dir) = setup_test_db().await;
        assert!(repo.list_unprocessed().await.unwrap().is_empty());
        assert_eq!(repo.get_stats().await.unwrap(), Stats::default());
    }

    #[tokio::test]
    async fn test_stats_count_distinct_images() {
        let (repo, _pool, _dir) = setup_test_db().await;

        let a = repo.insert_image("a.png", "images/a.png", "b").await.unwrap();
        let _b = repo.insert_image("b.png", "images/b.png", "b").await.unwrap();

        // Duplicate submissions are possible and must not inflate the count
        repo.insert_extracted_text(a, "first").await.unwrap();
        repo.insert_extracted_text(a, "second").await.unwrap();

        let stats = repo.get_stats().await.unwrap();
        assert_eq!(stats.total_images, 2);
        assert_eq!(stats.processed_images, 1);
        assert_eq!(repo.texts_for_image(a).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_removes_text_and_is_idempotent() {
        let (repo, _pool, _dir) = setup_test_db().await;

        let id = repo.insert_image("a.png", "images/a.png", "b").await.unwrap();
        repo.insert_extracted_text(id, "some text").await.unwrap();

        assert!(repo.delete_image(id).await.unwrap());
        assert!(repo.texts_for_image(id).await.unwrap().is_empty());

        // Second delete affects nothing and still succeeds
        assert!(!repo.delete_image(id).await.unwrap());
        assert!(!repo.delete_image(9999).await.unwrap());
        assert_eq!(repo.get_stats().await.unwrap(), Stats::default());
    }

    #[tokio::test]
    async fn test_text_for_unknown_image_violates_foreign_key() {
        let (repo, _pool, _dir) = setup_test_db().await;

        let err = repo.insert_extracted_text(42, "orphan").await.unwrap_err();
        assert!(err.is_foreign_key_violation());
    }

    #[tokio::test]
    async fn test_list_all_with_text_newest_first() {
        let (repo, pool, _dir) = setup_test_db().await;

        let old = insert_with_timestamp(&pool, "old.png", "2024-01-01T00:00:00.000000Z").await;
        let new = insert_with_timestamp(&pool, "new.png", "2024-06-01T00:00:00.000000Z").await;
        repo.insert_extracted_text(old, "old text").await.unwrap();

        let all = repo.list_all_with_text().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].image.id, new);
        assert!(!all[0].is_processed());
        assert_eq!(all[1].image.id, old);
        assert_eq!(all[1].text_content.as_deref(), Some("old text"));
        assert!(all[1].extracted_at.is_some());
    }

    #[tokio::test]
    async fn test_search_text() {
        let (repo, _pool, _dir) = setup_test_db().await;

        let a = repo.insert_image("a.png", "images/a.png", "b").await.unwrap();
        let b = repo.insert_image("b.png", "images/b.png", "b").await.unwrap();
        repo.insert_extracted_text(a, "Hello World").await.unwrap();
        repo.insert_extracted_text(b, "100% off_sale").await.unwrap();

        let hits = repo.search_text("hello").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a);
        assert_eq!(hits[0].storage_key, "images/a.png");

        // Wildcards in the query match literally
        assert_eq!(repo.search_text("%").await.unwrap().len(), 1);
        assert_eq!(repo.search_text("f_s").await.unwrap().len(), 1);
        assert!(repo.search_text("o_W").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_storage_keys_is_distinct() {
        let (repo, _pool, _dir) = setup_test_db().await;

        repo.insert_image("a.png", "images/a.png", "b").await.unwrap();
        repo.insert_image("a.png", "images/a.png", "b").await.unwrap();
        repo.insert_image("c.png", "images/c.png", "b").await.unwrap();
        repo.insert_image("d.png", "images/d.png", "other").await.unwrap();

        let keys = repo.list_storage_keys("b").await.unwrap();
        assert_eq!(keys, vec!["images/a.png".to_string(), "images/c.png".to_string()]);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
