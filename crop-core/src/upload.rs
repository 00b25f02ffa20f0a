//! Uploading packages and the rewritten template to the asset bucket.
//!
//! Package uploads are independent (disjoint keys) and run on a bounded
//! pool of concurrent requests. Results are gathered only after every upload
//! has finished, into an [`UploadOutcome`] holding both the published
//! locations and the per-file failures; the pipeline treats any failure as
//! fatal, but callers that can accept a partial publish may inspect it.

use std::path::Path;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::assets::{AssetKeyMap, AssetPlan, StorageRef};
use crate::contract::{ObjectStore, PutObject};
use crate::error::{PublishError, Result};
use crate::retry::{with_retry, RetryPolicy};
use crate::template::Template;

pub const ZIP_CONTENT_TYPE: &str = "application/zip";
pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy)]
pub struct UploadOptions {
    /// Maximum number of package uploads in flight.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct UploadFailure {
    pub filename: String,
    pub error: PublishError,
}

#[derive(Debug, Default)]
pub struct UploadOutcome {
    pub uploaded: AssetKeyMap,
    pub failures: Vec<UploadFailure>,
}

impl UploadOutcome {
    /// All-or-nothing view: the first failure (by filename) aborts.
    pub fn into_result(mut self) -> Result<AssetKeyMap> {
        if self.failures.is_empty() {
            return Ok(self.uploaded);
        }
        self.failures.sort_by(|a, b| a.filename.cmp(&b.filename));
        Err(self.failures.remove(0).error)
    }
}

/// Upload every planned package from `build_dir` to `bucket`.
pub async fn upload_assets<S>(
    store: &S,
    build_dir: &Path,
    bucket: &str,
    plan: &AssetPlan,
    options: &UploadOptions,
) -> UploadOutcome
where
    S: ObjectStore + ?Sized,
{
    info!(bucket, assets = plan.len(), concurrency = options.concurrency, "Uploading build assets");

    let results: Vec<(String, Result<StorageRef>)> = stream::iter(plan.iter())
        .map(|(filename, key)| async move {
            let result = upload_one(store, build_dir, bucket, filename, key, &options.retry).await;
            (filename.clone(), result)
        })
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;

    let mut outcome = UploadOutcome::default();
    for (filename, result) in results {
        match result {
            Ok(location) => {
                outcome.uploaded.insert(filename, location);
            }
            Err(error) => {
                error!(file = %filename, error = %error, "Asset upload failed");
                outcome.failures.push(UploadFailure { filename, error });
            }
        }
    }

    info!(
        bucket,
        uploaded = outcome.uploaded.len(),
        failed = outcome.failures.len(),
        "Asset upload finished"
    );
    outcome
}

async fn upload_one<S>(
    store: &S,
    build_dir: &Path,
    bucket: &str,
    filename: &str,
    key: &str,
    retry: &RetryPolicy,
) -> Result<StorageRef>
where
    S: ObjectStore + ?Sized,
{
    let path = build_dir.join(filename);
    debug!(path = %path.display(), key, bucket, "Uploading asset");
    let body = tokio::fs::read(&path)
        .await
        .map_err(|e| PublishError::io(&path, e))?;

    let request = PutObject {
        bucket: bucket.to_string(),
        key: key.to_string(),
        content_type: ZIP_CONTENT_TYPE.to_string(),
        public_read: true,
        body,
    };
    let output = with_retry(retry, "put_object", || store.put_object(request.clone())).await?;

    debug!(file = filename, key, version = ?output.version_id, "Asset uploaded");
    Ok(StorageRef::new(key, output.version_id))
}

/// Where the template was published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedTemplate {
    pub bucket: String,
    pub location: StorageRef,
    pub url: String,
}

pub fn template_key(prefix: &str, version: &str) -> String {
    format!("{prefix}template-{version}.json")
}

/// Public HTTPS URL of an object, pinned to its version when there is one.
pub fn object_url(bucket: &str, location: &StorageRef) -> String {
    let base = format!("https://{bucket}.s3.amazonaws.com/{}", location.key());
    match location.version() {
        Some(version) => format!("{base}?versionId={version}"),
        None => base,
    }
}

/// Serialize `template` canonically and upload it under
/// `{prefix}template-{version}.json`.
///
/// The key depends only on the version label: publishing the same version
/// twice overwrites the earlier template (last writer wins).
pub async fn upload_template<S>(
    store: &S,
    template: &Template,
    bucket: &str,
    prefix: &str,
    version: &str,
    retry: &RetryPolicy,
) -> Result<PublishedTemplate>
where
    S: ObjectStore + ?Sized,
{
    let key = template_key(prefix, version);
    let body = template.to_canonical_json()?.into_bytes();
    debug!(key = %key, bucket, bytes = body.len(), "Uploading template");

    let request = PutObject {
        bucket: bucket.to_string(),
        key: key.clone(),
        content_type: JSON_CONTENT_TYPE.to_string(),
        public_read: true,
        body,
    };
    let output = with_retry(retry, "put_object", || store.put_object(request.clone())).await?;

    let location = StorageRef::new(key, output.version_id);
    let url = object_url(bucket, &location);
    info!(url = %url, version_id = ?location.version(), "Template uploaded");
    Ok(PublishedTemplate {
        bucket: bucket.to_string(),
        location,
        url,
    })
}
