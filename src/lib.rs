//! imagetext: a manual image transcription workflow.
//!
//! Images are uploaded to object storage, queued, and annotated by a human
//! operator; the typed text is stored alongside each image in SQLite.

pub mod config;
pub mod models;
pub mod repository;
pub mod schema;
pub mod server;
pub mod services;
pub mod storage;
