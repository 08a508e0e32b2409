//! Bucket provisioning for S3-compatible endpoints.
//!
//! `object_store` has no bucket management API, so existence checks and
//! bucket creation are sent as presigned `HEAD`/`PUT` requests against the
//! bucket root.

use std::time::Duration;

use object_store::aws::AmazonS3;
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use reqwest::{Method, StatusCode};
use tracing::{debug, info};

use super::StorageError;

const SIGNATURE_TTL: Duration = Duration::from_secs(300);

/// Create `bucket` if a `HEAD` on it reports 404.
pub(super) async fn ensure_bucket(
    client: &AmazonS3,
    http: &reqwest::Client,
    bucket: &str,
) -> Result<(), StorageError> {
    let root = ObjectPath::from("");

    let head_url = client.signed_url(Method::HEAD, &root, SIGNATURE_TTL).await?;
    let status = http.head(head_url).send().await?.status();

    if status.is_success() {
        debug!(bucket = %bucket, "Bucket exists");
        return Ok(());
    }
    if status != StatusCode::NOT_FOUND {
        return Err(provision_error(bucket, status, "checking bucket"));
    }

    info!(bucket = %bucket, "Bucket does not exist. Creating it.");
    let put_url = client.signed_url(Method::PUT, &root, SIGNATURE_TTL).await?;
    let status = http.put(put_url).send().await?.status();

    // 409 means another process created it first
    if status.is_success() || status == StatusCode::CONFLICT {
        info!(bucket = %bucket, "Bucket ready");
        Ok(())
    } else {
        Err(provision_error(bucket, status, "creating bucket"))
    }
}

fn provision_error(bucket: &str, status: StatusCode, action: &str) -> StorageError {
    StorageError::Provision {
        container: bucket.to_string(),
        reason: format!("{action} returned HTTP {status}"),
    }
}
