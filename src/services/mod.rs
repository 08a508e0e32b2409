//! Service layer for imagetext business logic.
//!
//! This module contains the annotation workflow separated from transport
//! concerns. Services are used by the web server and the CLI.

pub mod annotate;
pub mod filename;

pub use annotate::{
    AnnotateError, AnnotationService, AnnotationTarget, CatalogEntry, ReconcileReport,
    SearchResult, UploadReport, UploadStage, UploadedFile, UploadedImage,
};
