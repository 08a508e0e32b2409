//! Domain models shared by the repository, services and web layers.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Extensions accepted for upload, compared case-insensitively.
pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tiff"];

/// An uploaded image as recorded in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    pub id: i32,
    pub filename: String,
    /// Object key inside the storage container.
    pub storage_key: String,
    /// Bucket/container the object was written to.
    pub storage_container: String,
    pub created_at: DateTime<Utc>,
}

/// Queue entry for an image that has no extracted text yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnprocessedImage {
    pub id: i32,
    pub filename: String,
    pub storage_key: String,
    pub storage_container: String,
}

impl From<Image> for UnprocessedImage {
    fn from(image: Image) -> Self {
        UnprocessedImage {
            id: image.id,
            filename: image.filename,
            storage_key: image.storage_key,
            storage_container: image.storage_container,
        }
    }
}

/// A transcription typed in by an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedText {
    pub id: i32,
    pub image_id: i32,
    pub text_content: String,
    pub extracted_at: DateTime<Utc>,
}

/// An image joined with its transcription, if one exists.
#[derive(Debug, Clone, Serialize)]
pub struct ImageWithText {
    pub image: Image,
    pub text_content: Option<String>,
    pub extracted_at: Option<DateTime<Utc>>,
}

impl ImageWithText {
    pub fn is_processed(&self) -> bool {
        self.text_content.is_some()
    }
}

/// A transcription matching a text search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: i32,
    pub filename: String,
    pub storage_key: String,
    pub text_content: String,
    pub extracted_at: DateTime<Utc>,
}

/// Processing statistics computed in a single aggregate query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_images: u64,
    pub processed_images: u64,
}

impl Stats {
    pub fn remaining(&self) -> u64 {
        self.total_images.saturating_sub(self.processed_images)
    }

    /// Completion percentage, 0 when there are no images.
    pub fn percent_complete(&self) -> u8 {
        if self.total_images == 0 {
            return 0;
        }
        ((self.processed_images * 100) / self.total_images).min(100) as u8
    }
}

/// Annotation queue state, always derived from the current statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    NoImages,
    HasUnprocessed,
    AllProcessed,
}

impl QueueState {
    pub fn from_stats(stats: &Stats) -> Self {
        if stats.total_images == 0 {
            QueueState::NoImages
        } else if stats.processed_images < stats.total_images {
            QueueState::HasUnprocessed
        } else {
            QueueState::AllProcessed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::NoImages => "no_images",
            QueueState::HasUnprocessed => "has_unprocessed",
            QueueState::AllProcessed => "all_processed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_state_from_stats() {
        let empty = Stats::default();
        assert_eq!(QueueState::from_stats(&empty), QueueState::NoImages);

        let pending = Stats {
            total_images: 3,
            processed_images: 1,
        };
        assert_eq!(QueueState::from_stats(&pending), QueueState::HasUnprocessed);
        assert_eq!(pending.remaining(), 2);
        assert_eq!(pending.percent_complete(), 33);

        let done = Stats {
            total_images: 2,
            processed_images: 2,
        };
        assert_eq!(QueueState::from_stats(&done), QueueState::AllProcessed);
        assert_eq!(done.percent_complete(), 100);
    }
}
