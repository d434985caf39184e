use reqwest::header::CONTENT_LENGTH;
use reqwest::Body;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::capability::CapabilityUrl;
use crate::error::{ReplicationError, Result};

/// Uploads files to the destination blob container through its capability URL
#[derive(Clone, Debug)]
pub struct BlobStore {
    http: reqwest::Client,
    capability_url: CapabilityUrl,
}

impl BlobStore {
    pub fn new(http: reqwest::Client, capability_url: CapabilityUrl) -> Self {
        Self {
            http,
            capability_url,
        }
    }

    /// Stream `file` into a block blob named `file_name`. The body is read in
    /// chunks, never buffered whole.
    #[tracing::instrument(skip(self, file), err)]
    pub async fn put_block_blob(&self, file_name: &str, file: File, length: u64) -> Result<()> {
        let response = self
            .http
            .put(self.capability_url.blob_url(file_name))
            .header("x-ms-blob-type", "BlockBlob")
            .header(CONTENT_LENGTH, length)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(%status, "Blob written");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ReplicationError::RemoteRejection { status, body })
    }
}
