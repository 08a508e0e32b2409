//! Annotation workflow: upload, queue, transcribe.
//!
//! An upload goes to object storage first and is then recorded in the
//! database. Operators are handed the oldest image without text until the
//! queue is empty. The two upload writes are not atomic; [`reconcile`]
//! reports any drift between them instead of compensating automatically.
//!
//! [`reconcile`]: AnnotationService::reconcile

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use super::filename::{has_allowed_extension, sanitize_filename, storage_key, KEY_PREFIX};
use crate::models::{
    Image, ImageWithText, QueueState, Stats, UnprocessedImage, ALLOWED_EXTENSIONS,
};
use crate::repository::{DieselImageRepository, RepositoryError};
use crate::storage::{ObjectStoreGateway, StorageError};

/// Which half of an upload failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    /// Nothing was written.
    Storage,
    /// The object was written but no row records it.
    Database,
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStage::Storage => f.write_str("object storage"),
            UploadStage::Database => f.write_str("database"),
        }
    }
}

/// Errors surfaced by the annotation workflow.
#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error("Invalid file type for {filename}. Allowed types: {}", ALLOWED_EXTENSIONS.join(", "))]
    InvalidFileType { filename: String },

    #[error("Please enter some text")]
    EmptyText,

    #[error("Please enter a search term")]
    EmptyQuery,

    #[error("Error uploading {filename} ({stage}): {reason}")]
    UploadFailed {
        filename: String,
        stage: UploadStage,
        reason: String,
    },

    /// The database accepted an insert but produced no row.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Image {0} not found")]
    NotFound(i32),

    #[error(transparent)]
    Repository(RepositoryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<RepositoryError> for AnnotateError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::MissingRow(_) => AnnotateError::Persistence(err.to_string()),
            other => AnnotateError::Repository(other),
        }
    }
}

/// A file received from the upload form.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Bytes,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

/// An image that made it into storage and the database.
#[derive(Debug, Clone, Serialize)]
pub struct UploadedImage {
    pub id: i32,
    pub filename: String,
    pub storage_key: String,
    pub url: String,
}

/// Outcome of a multi-file upload.
#[derive(Debug, Default)]
pub struct UploadReport {
    pub uploaded: Vec<UploadedImage>,
    pub errors: Vec<AnnotateError>,
}

impl UploadReport {
    /// Id of the first image accepted, where annotation should start.
    pub fn first_id(&self) -> Option<i32> {
        self.uploaded.first().map(|u| u.id)
    }
}

/// Everything the annotation page shows for one image.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotationTarget {
    pub image: Image,
    pub url: String,
    pub stats: Stats,
}

/// Catalog row: an image, its text and where to fetch it.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub entry: ImageWithText,
    pub url: String,
}

/// Search result in the shape consumed by the search API.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: i32,
    pub filename: String,
    pub image_url: String,
    pub text_content: String,
    pub extracted_at: DateTime<Utc>,
}

/// Drift between object storage and the database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Objects in storage that no image row references.
    pub orphaned_objects: Vec<String>,
    /// Image rows whose object is absent from storage.
    pub missing_objects: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_objects.is_empty() && self.missing_objects.is_empty()
    }
}

/// Drives the upload → annotate → done workflow.
#[derive(Clone)]
pub struct AnnotationService {
    images: DieselImageRepository,
    storage: Arc<ObjectStoreGateway>,
}

impl AnnotationService {
    pub fn new(images: DieselImageRepository, storage: Arc<ObjectStoreGateway>) -> Self {
        Self { images, storage }
    }

    pub fn storage(&self) -> &ObjectStoreGateway {
        &self.storage
    }

    pub fn images(&self) -> &DieselImageRepository {
        &self.images
    }

    /// Validate, store and record one uploaded image.
    pub async fn accept_upload(&self, file: UploadedFile) -> Result<UploadedImage, AnnotateError> {
        if !has_allowed_extension(&file.filename) {
            warn!(filename = %file.filename, "Rejected upload with disallowed extension");
            return Err(AnnotateError::InvalidFileType {
                filename: file.filename,
            });
        }

        let filename = sanitize_filename(&file.filename);
        let key = storage_key(&filename);
        info!(original = %file.filename, cleaned = %filename, key = %key, "Processing upload");

        let url = self
            .storage
            .upload(file.bytes, &key)
            .await
            .map_err(|e| {
                error!(filename = %file.filename, error = %e, "Object storage write failed");
                AnnotateError::UploadFailed {
                    filename: file.filename.clone(),
                    stage: UploadStage::Storage,
                    reason: e.to_string(),
                }
            })?;

        let id = self
            .images
            .insert_image(&filename, &key, self.storage.container())
            .await
            .map_err(|e| {
                // The object stays behind; `reconcile` lists it as orphaned
                error!(
                    filename = %file.filename,
                    key = %key,
                    error = %e,
                    "Database insert failed after object was stored"
                );
                match e {
                    RepositoryError::MissingRow(_) => AnnotateError::from(e),
                    other => AnnotateError::UploadFailed {
                        filename: file.filename.clone(),
                        stage: UploadStage::Database,
                        reason: other.to_string(),
                    },
                }
            })?;

        info!(image_id = id, key = %key, "Saved image record");
        Ok(UploadedImage {
            id,
            filename,
            storage_key: key,
            url,
        })
    }

    /// Accept several files, collecting per-file failures.
    ///
    /// Files with an empty name (an untouched form input) are skipped.
    pub async fn accept_uploads(&self, files: Vec<UploadedFile>) -> UploadReport {
        let mut report = UploadReport::default();
        for file in files.into_iter().filter(|f| !f.filename.is_empty()) {
            match self.accept_upload(file).await {
                Ok(uploaded) => report.uploaded.push(uploaded),
                Err(e) => report.errors.push(e),
            }
        }
        info!(
            uploaded = report.uploaded.len(),
            failed = report.errors.len(),
            "Upload batch finished"
        );
        report
    }

    /// Oldest image still waiting for text.
    pub async fn next_for_annotation(&self) -> Result<Option<UnprocessedImage>, AnnotateError> {
        let queue = self.images.list_unprocessed().await?;
        Ok(queue.into_iter().next())
    }

    /// Image, URL and progress for the annotation page.
    pub async fn annotation_target(&self, image_id: i32) -> Result<AnnotationTarget, AnnotateError> {
        let image = self
            .images
            .get_image(image_id)
            .await?
            .ok_or(AnnotateError::NotFound(image_id))?;
        let url = self.storage.fetch_url(&image.storage_key);
        let stats = self.images.get_stats().await?;

        Ok(AnnotationTarget { image, url, stats })
    }

    /// Record an operator's transcription.
    ///
    /// Returns whether unprocessed images remain afterwards.
    pub async fn submit_text(&self, image_id: i32, text: &str) -> Result<bool, AnnotateError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AnnotateError::EmptyText);
        }

        self.images
            .insert_extracted_text(image_id, text)
            .await
            .map_err(|e| {
                if e.is_foreign_key_violation() {
                    AnnotateError::NotFound(image_id)
                } else {
                    AnnotateError::from(e)
                }
            })?;
        info!(image_id, chars = text.chars().count(), "Saved extracted text");

        let has_more = !self.images.list_unprocessed().await?.is_empty();
        Ok(has_more)
    }

    /// Delete an image and its text. Unknown ids succeed as a no-op.
    pub async fn delete_image(&self, image_id: i32) -> Result<bool, AnnotateError> {
        let deleted = self.images.delete_image(image_id).await?;
        if deleted {
            info!(image_id, "Deleted image");
        } else {
            info!(image_id, "Delete requested for unknown image");
        }
        Ok(deleted)
    }

    pub async fn stats(&self) -> Result<Stats, AnnotateError> {
        Ok(self.images.get_stats().await?)
    }

    /// Where the workflow stands right now.
    pub async fn queue_state(&self) -> Result<QueueState, AnnotateError> {
        let stats = self.images.get_stats().await?;
        Ok(QueueState::from_stats(&stats))
    }

    /// All images with their text and fetch URLs, newest first.
    pub async fn catalog(&self) -> Result<Vec<CatalogEntry>, AnnotateError> {
        let entries = self.images.list_all_with_text().await?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let url = self.storage.fetch_url(&entry.image.storage_key);
                CatalogEntry { entry, url }
            })
            .collect())
    }

    /// Search transcriptions for a substring.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, AnnotateError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AnnotateError::EmptyQuery);
        }

        let hits = self.images.search_text(query).await?;
        Ok(hits
            .into_iter()
            .map(|hit| SearchResult {
                image_url: self.storage.fetch_url(&hit.storage_key),
                id: hit.id,
                filename: hit.filename,
                text_content: hit.text_content,
                extracted_at: hit.extracted_at,
            })
            .collect())
    }

    /// Compare stored objects with recorded keys. Reports only, never deletes.
    pub async fn reconcile(&self) -> Result<ReconcileReport, AnnotateError> {
        let stored: BTreeSet<String> = self
            .storage
            .list_keys(KEY_PREFIX)
            .await?
            .into_iter()
            .collect();
        let recorded: BTreeSet<String> = self
            .images
            .list_storage_keys(self.storage.container())
            .await?
            .into_iter()
            .collect();

        let report = ReconcileReport {
            orphaned_objects: stored.difference(&recorded).cloned().collect(),
            missing_objects: recorded.difference(&stored).cloned().collect(),
        };

        if report.is_clean() {
            info!(objects = stored.len(), "Storage and database agree");
        } else {
            warn!(
                orphaned = report.orphaned_objects.len(),
                missing = report.missing_objects.len(),
                "Storage and database have drifted"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::diesel_pool::run_blocking;
    use crate::repository::{create_diesel_pool_from_url, migrations::run_migrations, SqlitePool};
    use diesel::connection::SimpleConnection;
    use tempfile::tempdir;

    async fn setup_with_pool(
        storage: ObjectStoreGateway,
    ) -> (AnnotationService, SqlitePool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_url = format!("sqlite:{}", dir.path().join("test.db").display());
        let pool = create_diesel_pool_from_url(&db_url).unwrap();
        run_migrations(&pool).await.unwrap();

        storage.ensure_container().await.unwrap();

        let service = AnnotationService::new(
            DieselImageRepository::new(pool.clone()),
            Arc::new(storage),
        );
        (service, pool, dir)
    }

    async fn setup_service() -> (AnnotationService, tempfile::TempDir) {
        let storage = ObjectStoreGateway::in_memory("test-bucket", "http://localhost:4566");
        let (service, _pool, dir) = setup_with_pool(storage).await;
        (service, dir)
    }

    async fn exec(pool: &SqlitePool, sql: &'static str) {
        run_blocking(pool.clone(), move |conn| conn.batch_execute(sql))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upload_sanitizes_and_records() {
        let (service, _dir) = setup_service().await;

        let uploaded = service
            .accept_upload(UploadedFile::new("My Photo.JPG", &b"jpeg"[..]))
            .await
            .unwrap();

        assert_eq!(uploaded.filename, "My_Photo.jpg");
        assert_eq!(uploaded.storage_key, "images/My_Photo.jpg");

        let target = service.annotation_target(uploaded.id).await.unwrap();
        assert!(target.url.contains("images/My_Photo.jpg"));
        assert_eq!(
            target.url,
            "http://localhost:4566/test-bucket/images/My_Photo.jpg"
        );
        assert_eq!(target.stats.total_images, 1);
    }

    #[tokio::test]
    async fn test_invalid_extension_writes_nothing() {
        let (service, _dir) = setup_service().await;

        let err = service
            .accept_upload(UploadedFile::new("malware.exe", &b"MZ"[..]))
            .await
            .unwrap_err();
        assert!(matches!(err, AnnotateError::InvalidFileType { .. }));

        assert!(service.storage().list_keys(KEY_PREFIX).await.unwrap().is_empty());
        assert_eq!(service.stats().await.unwrap().total_images, 0);
    }

    #[tokio::test]
    async fn test_empty_text_inserts_nothing() {
        let (service, _dir) = setup_service().await;
        let id = service
            .accept_upload(UploadedFile::new("a.png", &b"png"[..]))
            .await
            .unwrap()
            .id;

        for text in ["", "   ", "\n\t "] {
            let err = service.submit_text(id, text).await.unwrap_err();
            assert!(matches!(err, AnnotateError::EmptyText));
        }
        assert!(service.images().texts_for_image(id).await.unwrap().is_empty());
        assert_eq!(service.stats().await.unwrap().processed_images, 0);
    }

    #[tokio::test]
    async fn test_submit_for_unknown_image_is_not_found() {
        let (service, _dir) = setup_service().await;

        let err = service.submit_text(77, "hello").await.unwrap_err();
        assert!(matches!(err, AnnotateError::NotFound(77)));
        assert!(matches!(
            service.annotation_target(77).await.unwrap_err(),
            AnnotateError::NotFound(77)
        ));
    }

    #[tokio::test]
    async fn test_queue_state_transitions() {
        let (service, _dir) = setup_service().await;
        assert_eq!(service.queue_state().await.unwrap(), QueueState::NoImages);
        assert!(service.next_for_annotation().await.unwrap().is_none());

        let a = service
            .accept_upload(UploadedFile::new("a.png", &b"a"[..]))
            .await
            .unwrap()
            .id;
        let b = service
            .accept_upload(UploadedFile::new("b.gif", &b"b"[..]))
            .await
            .unwrap()
            .id;
        assert_eq!(service.queue_state().await.unwrap(), QueueState::HasUnprocessed);
        assert_eq!(service.next_for_annotation().await.unwrap().unwrap().id, a);

        assert!(service.submit_text(a, "first").await.unwrap());
        assert_eq!(service.queue_state().await.unwrap(), QueueState::HasUnprocessed);
        assert_eq!(service.next_for_annotation().await.unwrap().unwrap().id, b);

        assert!(!service.submit_text(b, " second ").await.unwrap());
        assert_eq!(service.queue_state().await.unwrap(), QueueState::AllProcessed);
        assert_eq!(service.images().texts_for_image(b).await.unwrap()[0].text_content, "second");

        service
            .accept_upload(UploadedFile::new("c.bmp", &b"c"[..]))
            .await
            .unwrap();
        assert_eq!(service.queue_state().await.unwrap(), QueueState::HasUnprocessed);
    }

    #[tokio::test]
    async fn test_accept_uploads_collects_errors() {
        let (service, _dir) = setup_service().await;

        let report = service
            .accept_uploads(vec![
                UploadedFile::new("", &b""[..]),
                UploadedFile::new("notes.txt", &b"text"[..]),
                UploadedFile::new("scan.tiff", &b"tiff"[..]),
                UploadedFile::new("photo.jpeg", &b"jpeg"[..]),
            ])
            .await;

        assert_eq!(report.uploaded.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            report.errors[0],
            AnnotateError::InvalidFileType { ref filename } if filename == "notes.txt"
        ));
        assert_eq!(report.first_id(), Some(report.uploaded[0].id));
    }

    #[tokio::test]
    async fn test_search_returns_image_urls() {
        let (service, _dir) = setup_service().await;
        let id = service
            .accept_upload(UploadedFile::new("menu.png", &b"png"[..]))
            .await
            .unwrap()
            .id;
        service.submit_text(id, "Soup of the day").await.unwrap();

        let results = service.search("soup").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].filename, "menu.png");
        assert_eq!(
            results[0].image_url,
            "http://localhost:4566/test-bucket/images/menu.png"
        );

        assert!(matches!(
            service.search("  ").await.unwrap_err(),
            AnnotateError::EmptyQuery
        ));
    }

    #[tokio::test]
    async fn test_reconcile_reports_drift() {
        let (service, _dir) = setup_service().await;
        let id = service
            .accept_upload(UploadedFile::new("kept.png", &b"png"[..]))
            .await
            .unwrap()
            .id;
        assert!(service.reconcile().await.unwrap().is_clean());

        // Object written without a row, as after a failed database insert
        service
            .storage()
            .upload(Bytes::from_static(b"stray"), "images/stray.png")
            .await
            .unwrap();
        // Row without an object
        service
            .images()
            .insert_image("ghost.png", "images/ghost.png", "test-bucket")
            .await
            .unwrap();

        let report = service.reconcile().await.unwrap();
        assert_eq!(report.orphaned_objects, vec!["images/stray.png".to_string()]);
        assert_eq!(report.missing_objects, vec!["images/ghost.png".to_string()]);

        // Deleting a row does not touch storage
        service.delete_image(id).await.unwrap();
        let report = service.reconcile().await.unwrap();
        assert!(report.orphaned_objects.contains(&"images/kept.png".to_string()));
    }

    #[tokio::test]
    async fn test_database_failure_leaves_orphaned_object() {
        let storage = ObjectStoreGateway::in_memory("test-bucket", "http://localhost:4566");
        let (service, pool, _dir) = setup_with_pool(storage).await;

        exec(&pool, "DROP TABLE extracted_text; DROP TABLE images;").await;

        let err = service
            .accept_upload(UploadedFile::new("a.png", &b"png"[..]))
            .await
            .unwrap_err();
        match err {
            AnnotateError::UploadFailed {
                ref filename,
                stage,
                ..
            } => {
                assert_eq!(filename, "a.png");
                assert_eq!(stage, UploadStage::Database);
            }
            other => panic!("expected database-stage failure, got {other:?}"),
        }

        // The object write is not undone
        assert_eq!(
            service.storage().list_keys("images").await.unwrap(),
            vec!["images/a.png"]
        );

        run_migrations(&pool).await.unwrap();
        let report = service.reconcile().await.unwrap();
        assert_eq!(report.orphaned_objects, vec!["images/a.png".to_string()]);
        assert!(report.missing_objects.is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_writes_no_row() {
        let root = tempdir().unwrap();
        let storage =
            ObjectStoreGateway::local(root.path().to_path_buf(), "scans", "/storage").unwrap();
        let (service, _pool, _dir) = setup_with_pool(storage).await;

        // A plain file where the key directory should be makes every write fail
        std::fs::write(root.path().join("scans").join("images"), b"").unwrap();

        let err = service
            .accept_upload(UploadedFile::new("b.jpg", &b"jpg"[..]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AnnotateError::UploadFailed {
                stage: UploadStage::Storage,
                ..
            }
        ));
        assert_eq!(service.stats().await.unwrap(), Stats::default());
    }

    #[tokio::test]
    async fn test_insert_without_row_is_persistence_error() {
        let storage = ObjectStoreGateway::in_memory("test-bucket", "http://localhost:4566");
        let (service, pool, _dir) = setup_with_pool(storage).await;

        exec(
            &pool,
            "CREATE TRIGGER swallow_images BEFORE INSERT ON images
             BEGIN SELECT RAISE(IGNORE); END;",
        )
        .await;

        let err = service
            .accept_upload(UploadedFile::new("c.gif", &b"gif"[..]))
            .await
            .unwrap_err();
        assert!(matches!(err, AnnotateError::Persistence(_)));
        assert_eq!(service.stats().await.unwrap().total_images, 0);
    }
}
