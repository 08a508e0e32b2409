//! Diesel ORM models for database tables.

use diesel::prelude::*;

use crate::schema;

/// Image record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::images)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ImageRecord {
    pub id: i32,
    pub filename: String,
    pub s3_key: String,
    pub s3_bucket: String,
    pub created_at: String,
}

/// New image for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::images)]
pub struct NewImage<'a> {
    pub filename: &'a str,
    pub s3_key: &'a str,
    pub s3_bucket: &'a str,
    pub created_at: &'a str,
}

/// Extracted text record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::extracted_text)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ExtractedTextRecord {
    pub id: i32,
    pub image_id: i32,
    pub text_content: String,
    pub extracted_at: String,
}

/// New extracted text for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::extracted_text)]
pub struct NewExtractedText<'a> {
    pub image_id: i32,
    pub text_content: &'a str,
    pub extracted_at: &'a str,
}
