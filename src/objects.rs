//! Mirrors objects written to the source bucket into the destination blob
//! container.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::{timeout_at, Instant};

use crate::blob_store::BlobStore;
use crate::capability::{base_name, decode_object_key};
use crate::error::{ReplicationError, Result};
use crate::invocation::{InvocationResponse, STATUS_OK};
use crate::source::ObjectSource;

pub const CONFIRMATION: &str = "Object replicated";

/// A bucket write notification. Each record names one written object.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ObjectNotification {
    #[serde(rename = "Records", default)]
    pub records: Vec<ObjectRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ObjectRecord {
    pub s3: ObjectEntity,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ObjectEntity {
    pub bucket: BucketRef,
    pub object: ObjectRef,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BucketRef {
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ObjectRef {
    /// Percent-encoded, exactly as the notification delivers it
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// What to copy where, for a single invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTransfer {
    pub bucket: String,
    /// Decoded key, as the source store knows it
    pub key: String,
    /// Name of the destination blob
    pub file_name: String,
}

impl ObjectTransfer {
    pub fn new(bucket: &str, raw_key: &str) -> Result<Self> {
        let key = decode_object_key(raw_key)?;
        let file_name = base_name(&key).to_string();
        if file_name.is_empty() {
            return Err(ReplicationError::InvalidNotification(format!(
                "object key {key} has no file name"
            )));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            key,
            file_name,
        })
    }

    /// Staging files are named after a digest of the full source path, so
    /// objects sharing a file name never share a staging file.
    fn staging_prefix(&self) -> String {
        let digest = Sha256::digest(format!("{}/{}", self.bucket, self.key).as_bytes());
        format!("{digest:x}-")
    }
}

#[derive(Clone, Debug)]
pub struct ObjectReplicator {
    source: Arc<dyn ObjectSource>,
    blobs: BlobStore,
    staging_dir: PathBuf,
    deadline: Duration,
}

impl ObjectReplicator {
    #[tracing::instrument(skip(source, blobs))]
    pub fn new(source: Arc<dyn ObjectSource>, blobs: BlobStore, staging_dir: PathBuf) -> Self {
        Self {
            source,
            blobs,
            staging_dir,
            deadline: Duration::from_secs(300),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Replicate every object named by the notification, in order, all within
    /// one deadline. The first failure ends the invocation; the error says
    /// whether to retry it.
    #[tracing::instrument(skip_all, fields(records = notification.records.len()), err)]
    pub async fn replicate_notification(
        &self,
        notification: &ObjectNotification,
    ) -> Result<InvocationResponse> {
        if notification.records.is_empty() {
            return Err(ReplicationError::InvalidNotification(
                "notification has no records".into(),
            ));
        }

        let deadline = Instant::now() + self.deadline;
        let mut response = None;
        for record in &notification.records {
            response = Some(
                self.replicate_until(&record.s3.bucket.name, &record.s3.object.key, deadline)
                    .await?,
            );
        }
        response.ok_or_else(|| ReplicationError::InvalidNotification("no records".into()))
    }

    /// Copy one object, `raw_key` as delivered by the notification
    pub async fn replicate(&self, bucket: &str, raw_key: &str) -> Result<InvocationResponse> {
        self.replicate_until(bucket, raw_key, Instant::now() + self.deadline)
            .await
    }

    #[tracing::instrument(skip(self, deadline), err)]
    async fn replicate_until(
        &self,
        bucket: &str,
        raw_key: &str,
        deadline: Instant,
    ) -> Result<InvocationResponse> {
        let transfer = ObjectTransfer::new(bucket, raw_key)?;

        timeout_at(deadline, self.transfer(&transfer))
            .await
            .map_err(|_| ReplicationError::DeadlineExceeded)??;

        Ok(InvocationResponse::new(STATUS_OK, CONFIRMATION))
    }

    /// Download into a staging file, then upload from it. The staging file is
    /// removed when `staged` drops, on success and failure alike.
    async fn transfer(&self, transfer: &ObjectTransfer) -> Result<()> {
        tracing::info!(bucket = %transfer.bucket, key = %transfer.key, "Replicating object");

        let staged = tempfile::Builder::new()
            .prefix(&transfer.staging_prefix())
            .suffix(".part")
            .tempfile_in(&self.staging_dir)?;

        let length = self.download(transfer, &staged).await?;
        tracing::debug!(length, path = %staged.path().display(), "Object staged");

        let upload = File::from_std(staged.reopen()?);
        self.blobs
            .put_block_blob(&transfer.file_name, upload, length)
            .await
    }

    async fn download(&self, transfer: &ObjectTransfer, staged: &NamedTempFile) -> Result<u64> {
        let mut body = self.source.open(&transfer.bucket, &transfer.key).await?;
        let mut file = File::from_std(staged.reopen()?);
        let length = tokio::io::copy(&mut body, &mut file).await?;
        file.flush().await?;
        Ok(length)
    }
}
