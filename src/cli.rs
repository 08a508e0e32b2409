//! Command-line interface.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use imagetext::config::{load_settings, Settings, StorageBackendKind};
use imagetext::repository::open_database;
use imagetext::server;
use imagetext::services::AnnotationService;
use imagetext::storage::ObjectStoreGateway;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

/// Settings that may be given on the command line or in the environment.
#[derive(Args, Debug, Default)]
pub struct Overrides {
    /// Data directory holding the database and local storage
    #[arg(long, global = true, env = "IMAGETEXT_TARGET")]
    pub target: Option<PathBuf>,

    #[arg(long, global = true, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Storage backend: s3, local or memory
    #[arg(long, global = true, env = "STORAGE_BACKEND")]
    pub storage_backend: Option<StorageBackendKind>,

    /// Endpoint the server talks to
    #[arg(long, global = true, env = "AWS_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    /// Endpoint used in URLs handed to browsers
    #[arg(long, global = true, env = "AWS_PUBLIC_ENDPOINT_URL")]
    pub public_endpoint_url: Option<String>,

    #[arg(long, global = true, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: Option<String>,

    #[arg(long, global = true, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    #[arg(long, global = true, env = "AWS_DEFAULT_REGION")]
    pub region: Option<String>,

    #[arg(long, global = true, env = "S3_BUCKET_NAME")]
    pub bucket: Option<String>,
}

impl Overrides {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(ref target) = self.target {
            settings.set_data_dir(target.clone());
        }
        if let Some(ref url) = self.database_url {
            settings.database_url = url.clone();
        }

        let storage = &mut settings.storage;
        if let Some(backend) = self.storage_backend {
            storage.backend = backend;
        }
        if let Some(ref endpoint) = self.endpoint_url {
            storage.endpoint_url = endpoint.clone();
        }
        if let Some(ref public) = self.public_endpoint_url {
            storage.public_endpoint_url = public.clone();
        }
        if let Some(ref key) = self.access_key_id {
            storage.access_key_id = key.clone();
        }
        if let Some(ref secret) = self.secret_access_key {
            storage.secret_access_key = secret.clone();
        }
        if let Some(ref region) = self.region {
            storage.region = region.clone();
        }
        if let Some(ref bucket) = self.bucket {
            storage.bucket = bucket.clone();
        }
    }
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "lower")]
pub enum Command {
    /// Run the web interface
    Serve {
        #[arg(long, env = "HOST")]
        host: Option<String>,
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,
    },
    /// Create the database schema and the storage container
    Init,
    /// Print progress counters
    Stats {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Compare stored objects with database rows without changing either
    Reconcile,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let mut settings = load_settings().await;
        self.overrides.apply(&mut settings);
        settings.ensure_directories()?;

        match self.command {
            Command::Serve { host, port } => {
                let host = host.unwrap_or_else(|| settings.host.clone());
                let port = port.unwrap_or(settings.port);
                server::serve(&settings, &host, port).await
            }
            Command::Init => init(&settings).await,
            Command::Stats { json } => stats(&settings, json).await,
            Command::Reconcile => reconcile(&settings).await,
        }
    }
}

async fn init(settings: &Settings) -> anyhow::Result<()> {
    open_database(&settings.database_url).await?;
    let gateway = ObjectStoreGateway::from_settings(&settings.storage)?;
    gateway.ensure_container().await?;

    println!("Database:  {}", settings.database_url);
    println!(
        "Storage:   {} ({})",
        gateway.container(),
        gateway.backend_kind()
    );
    Ok(())
}

async fn stats(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let images = open_database(&settings.database_url).await?;
    let stats = images.get_stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Total images:     {}", stats.total_images);
        println!("Processed images: {}", stats.processed_images);
        println!(
            "Remaining:        {} ({}% complete)",
            stats.remaining(),
            stats.percent_complete()
        );
    }
    Ok(())
}

async fn reconcile(settings: &Settings) -> anyhow::Result<()> {
    if settings.storage.backend == StorageBackendKind::Memory {
        anyhow::bail!("the memory backend holds nothing to reconcile outside a running server");
    }

    let images = open_database(&settings.database_url).await?;
    let gateway = ObjectStoreGateway::from_settings(&settings.storage)?;
    let service = AnnotationService::new(images, Arc::new(gateway));

    let report = service.reconcile().await?;
    if report.is_clean() {
        println!("Storage and database agree.");
        return Ok(());
    }

    if !report.orphaned_objects.is_empty() {
        println!("Objects without a database row:");
        for key in &report.orphaned_objects {
            println!("  {}", key);
        }
    }
    if !report.missing_objects.is_empty() {
        println!("Database rows whose object is missing:");
        for key in &report.missing_objects {
            println!("  {}", key);
        }
    }
    Ok(())
}
