//! Object storage gateway for uploaded images.
//!
//! Wraps an [`object_store::ObjectStore`] for one container (bucket) and
//! composes the public URLs browsers use to fetch images. Three backends
//! are supported:
//! - S3-compatible endpoints (AWS, LocalStack, MinIO)
//! - a directory on local disk, served by the web server under `/storage`
//! - process memory, for tests and demos, served under `/storage` as well

mod provision;

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{StorageBackendKind, StorageSettings};

/// Errors that can occur talking to object storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Invalid object key {key:?}: {source}")]
    InvalidKey {
        key: String,
        #[source]
        source: object_store::path::Error,
    },

    #[error("Failed to provision container {container}: {reason}")]
    Provision { container: String, reason: String },

    #[error("Invalid endpoint URL {0:?}")]
    InvalidEndpoint(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// True when the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ObjectStore(object_store::Error::NotFound { .. })
        )
    }
}

enum Backend {
    S3 {
        client: AmazonS3,
        http: reqwest::Client,
    },
    /// Objects live under `{root}/{container}/`.
    Local { root: PathBuf },
    Memory,
}

impl Backend {
    fn kind(&self) -> StorageBackendKind {
        match self {
            Backend::S3 { .. } => StorageBackendKind::S3,
            Backend::Local { .. } => StorageBackendKind::Local,
            Backend::Memory => StorageBackendKind::Memory,
        }
    }
}

/// Stores and addresses image objects inside a single container.
pub struct ObjectStoreGateway {
    store: Arc<dyn ObjectStore>,
    backend: Backend,
    container: String,
    endpoint_url: String,
    public_base_url: String,
}

impl std::fmt::Debug for ObjectStoreGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreGateway")
            .field("backend", &self.backend.kind())
            .field("container", &self.container)
            .field("endpoint_url", &self.endpoint_url)
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

/// URL prefix the web server serves local and in-memory objects under.
pub const STORAGE_ROUTE: &str = "/storage";

impl ObjectStoreGateway {
    /// Build the gateway described by the storage settings.
    pub fn from_settings(settings: &StorageSettings) -> Result<Self, StorageError> {
        match settings.backend {
            StorageBackendKind::S3 => Self::s3(settings),
            StorageBackendKind::Local => Self::local(
                settings.local_root.clone(),
                &settings.bucket,
                STORAGE_ROUTE,
            ),
            StorageBackendKind::Memory => Ok(Self::in_memory(&settings.bucket, STORAGE_ROUTE)),
        }
    }

    /// Gateway for an S3-compatible endpoint using path-style requests.
    pub fn s3(settings: &StorageSettings) -> Result<Self, StorageError> {
        url::Url::parse(&settings.endpoint_url)
            .map_err(|_| StorageError::InvalidEndpoint(settings.endpoint_url.clone()))?;

        let client = AmazonS3Builder::new()
            .with_endpoint(&settings.endpoint_url)
            .with_region(&settings.region)
            .with_bucket_name(&settings.bucket)
            .with_access_key_id(&settings.access_key_id)
            .with_secret_access_key(&settings.secret_access_key)
            .with_allow_http(true)
            .with_virtual_hosted_style_request(false)
            .build()?;

        Ok(Self {
            store: Arc::new(client.clone()),
            backend: Backend::S3 {
                client,
                http: reqwest::Client::new(),
            },
            container: settings.bucket.clone(),
            endpoint_url: trim_base(&settings.endpoint_url),
            public_base_url: trim_base(&settings.public_endpoint_url),
        })
    }

    /// Gateway storing objects on local disk under `root/container`.
    ///
    /// `root` is created if missing; the container directory is left to
    /// [`ensure_container`](Self::ensure_container).
    pub fn local(
        root: PathBuf,
        container: &str,
        public_base_url: &str,
    ) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&root)?;
        let store = LocalFileSystem::new_with_prefix(&root)?;
        let base = trim_base(public_base_url);

        Ok(Self {
            store: Arc::new(store),
            backend: Backend::Local { root },
            container: container.to_string(),
            endpoint_url: base.clone(),
            public_base_url: base,
        })
    }

    /// Gateway keeping objects in process memory.
    pub fn in_memory(container: &str, public_base_url: &str) -> Self {
        let base = trim_base(public_base_url);
        Self {
            store: Arc::new(InMemory::new()),
            backend: Backend::Memory,
            container: container.to_string(),
            endpoint_url: base.clone(),
            public_base_url: base,
        }
    }

    /// Name of the bucket/container objects are written to.
    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn backend_kind(&self) -> StorageBackendKind {
        self.backend.kind()
    }

    /// Directory served for the local backend, if that is the backend in use.
    pub fn local_root(&self) -> Option<&std::path::Path> {
        match &self.backend {
            Backend::Local { root } => Some(root),
            _ => None,
        }
    }

    /// Make sure the container exists, creating it when it does not.
    pub async fn ensure_container(&self) -> Result<(), StorageError> {
        match &self.backend {
            Backend::S3 { client, http } => {
                provision::ensure_bucket(client, http, &self.container).await
            }
            Backend::Local { root } => {
                let dir = root.join(&self.container);
                tokio::fs::create_dir_all(&dir).await?;
                debug!(path = %dir.display(), "Local container ready");
                Ok(())
            }
            Backend::Memory => Ok(()),
        }
    }

    /// Write `bytes` at `key`, replacing any existing object.
    ///
    /// Returns the object's URL on the internal endpoint.
    pub async fn upload(&self, bytes: Bytes, key: &str) -> Result<String, StorageError> {
        let location = self.object_path(key)?;
        let size = bytes.len();

        let mut opts = PutOptions::default();
        // The local backend rejects object attributes
        if !matches!(self.backend, Backend::Local { .. }) {
            let content_type = mime_guess::from_path(key).first_or_octet_stream();
            let mut attributes = Attributes::new();
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
            opts.attributes = attributes;
        }

        self.store
            .put_opts(&location, PutPayload::from(bytes), opts)
            .await?;

        info!(key = %key, container = %self.container, size, "Uploaded object");
        Ok(format!("{}/{}/{}", self.endpoint_url, self.container, key))
    }

    /// Public URL for `key`. Pure string composition; the object may not exist.
    pub fn fetch_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, self.container, key)
    }

    /// Every object key under `prefix`, relative to the container.
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let location = self.object_path(prefix)?;
        let metas: Vec<_> = self.store.list(Some(&location)).try_collect().await?;

        let container_prefix = format!("{}/", self.container);
        let mut keys: Vec<String> = metas
            .into_iter()
            .map(|meta| {
                let key = meta.location.to_string();
                match self.backend {
                    Backend::Local { .. } => key
                        .strip_prefix(&container_prefix)
                        .map(str::to_string)
                        .unwrap_or(key),
                    _ => key,
                }
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Read an object back. The web server uses this to serve in-memory objects.
    pub async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let location = self.object_path(key)?;
        let result = self.store.get(&location).await?;
        Ok(result.bytes().await?)
    }

    fn object_path(&self, key: &str) -> Result<ObjectPath, StorageError> {
        let full = match self.backend {
            Backend::Local { .. } => format!("{}/{}", self.container, key),
            _ => key.to_string(),
        };
        ObjectPath::parse(&full).map_err(|source| StorageError::InvalidKey {
            key: key.to_string(),
            source,
        })
    }
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
