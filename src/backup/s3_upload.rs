// pgvault/src/backup/s3_upload.rs
use std::future::Future;
use std::path::Path;

use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, TryStreamExt, stream};
use s3::config::Region;
use s3::error::DisplayErrorContext;
use s3::primitives::{ByteStream, Length};
use s3::types::{CompletedMultipartUpload, CompletedPart};
use tracing::{info, warn};

use crate::backup::db_dump::DumpFile;
use crate::config::RemoteConfig;
use crate::errors::{BackupError, Result};
use crate::utils::format_mb;

/// Files larger than this go through a multi-part upload.
pub const MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;
pub const PART_SIZE: u64 = 100 * 1024 * 1024;
const MAX_CONCURRENT_PARTS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Object storage operations the backup run needs.
pub trait RemoteStore {
    fn upload(&self, path: &Path, key: &str) -> impl Future<Output = Result<()>>;
    fn list(&self, prefix: &str) -> impl Future<Output = Result<Vec<RemoteObject>>>;
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>>;
}

/// Result of trying to mirror a dump to remote storage.
#[derive(Debug)]
pub enum UploadOutcome {
    Uploaded { key: String },
    NotConfigured,
    Failed { error: BackupError },
}

impl UploadOutcome {
    pub fn key(&self) -> Option<&str> {
        match self {
            UploadOutcome::Uploaded { key } => Some(key),
            _ => None,
        }
    }
}

/// `prefix/file_name`, or just the file name when no prefix is set.
pub fn remote_key(prefix: &str, file_name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{}/{}", prefix, file_name)
    }
}

/// Uploads the dump if a remote is configured. Never fails the run.
pub async fn upload_backup<R: RemoteStore>(remote: Option<&R>, prefix: &str, dump: &DumpFile) -> UploadOutcome {
    let Some(remote) = remote else {
        info!("R2 not configured, skipping upload");
        return UploadOutcome::NotConfigured;
    };

    let key = remote_key(prefix, &dump.file_name);
    info!("Uploading {} ({}) to {}", dump.file_name, format_mb(dump.size), key);

    match remote.upload(&dump.path, &key).await {
        Ok(()) => {
            info!("Upload done: {}", key);
            UploadOutcome::Uploaded { key }
        }
        Err(error) => {
            warn!("Upload failed: {}", error);
            UploadOutcome::Failed { error }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PartRange {
    number: i32,
    offset: u64,
    length: u64,
}

/// Files strictly larger than the threshold go through multi-part upload.
fn needs_multipart(size: u64) -> bool {
    size > MULTIPART_THRESHOLD
}

fn plan_parts(size: u64, part_size: u64) -> Vec<PartRange> {
    let mut parts = Vec::new();
    let mut offset = 0;
    let mut number = 1;
    while offset < size {
        let length = part_size.min(size - offset);
        parts.push(PartRange { number, offset, length });
        offset += length;
        number += 1;
    }
    parts
}

fn remote_error<E>(action: &str, key: &str, err: E) -> BackupError
where
    E: std::error::Error,
{
    BackupError::Remote(format!("{} {}: {}", action, key, DisplayErrorContext(err)))
}

/// S3-compatible store (Cloudflare R2) bound to one bucket.
pub struct S3Store {
    client: s3::Client,
    bucket: String,
}

impl S3Store {
    pub async fn connect(remote_config: &RemoteConfig) -> Self {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(remote_config.endpoint_url())
            .region(Region::new("auto"))
            .credentials_provider(s3::config::Credentials::new(
                &remote_config.access_key_id,
                &remote_config.secret_access_key,
                None, // session_token
                None, // expiry
                "Static",
            ))
            .load()
            .await;

        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        S3Store {
            client: s3::Client::from_conf(s3_config),
            bucket: remote_config.bucket_name.clone(),
        }
    }

    async fn put_single(&self, path: &Path, key: &str) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| remote_error("read", &path.display().to_string(), e))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| remote_error("put", key, e))?;
        Ok(())
    }

    async fn put_multipart(&self, path: &Path, key: &str, size: u64) -> Result<()> {
        info!("Multipart upload ({})", format_mb(size));

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| remote_error("create multipart upload", key, e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| BackupError::Remote(format!("no upload id returned for {}", key)))?
            .to_string();

        let result = self.upload_parts_and_complete(path, key, &upload_id, size).await;
        if result.is_err() {
            if let Err(e) = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .send()
                .await
            {
                warn!("Failed to abort multipart upload {}: {}", upload_id, DisplayErrorContext(e));
            }
        }
        result
    }

    async fn upload_parts_and_complete(&self, path: &Path, key: &str, upload_id: &str, size: u64) -> Result<()> {
        let mut parts: Vec<CompletedPart> = stream::iter(plan_parts(size, PART_SIZE))
            .map(|part| self.upload_part(path, key, upload_id, part))
            .buffer_unordered(MAX_CONCURRENT_PARTS)
            .try_collect()
            .await?;
        parts.sort_by_key(|part| part.part_number());

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
            .send()
            .await
            .map_err(|e| remote_error("complete multipart upload", key, e))?;
        Ok(())
    }

    async fn upload_part(&self, path: &Path, key: &str, upload_id: &str, part: PartRange) -> Result<CompletedPart> {
        let body = ByteStream::read_from()
            .path(path)
            .offset(part.offset)
            .length(Length::Exact(part.length))
            .build()
            .await
            .map_err(|e| remote_error("read part of", &path.display().to_string(), e))?;

        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part.number)
            .body(body)
            .send()
            .await
            .map_err(|e| remote_error(&format!("upload part {} of", part.number), key, e))?;

        Ok(CompletedPart::builder()
            .set_e_tag(output.e_tag().map(str::to_string))
            .part_number(part.number)
            .build())
    }
}

impl RemoteStore for S3Store {
    async fn upload(&self, path: &Path, key: &str) -> Result<()> {
        let size = tokio::fs::metadata(path).await?.len();
        if needs_multipart(size) {
            self.put_multipart(path, key, size).await
        } else {
            self.put_single(path, key).await
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| remote_error("list", prefix, e))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                objects.push(RemoteObject {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object
                        .last_modified()
                        .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
                });
            }
        }
        Ok(objects)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| remote_error("delete", key, e))?;
        Ok(())
    }
}
