use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::DocumentStoreConfig;
use crate::document::Document;
use crate::error::{ReplicationError, Result};
use crate::signer::{authorization_token, http_date};

pub const API_VERSION: &str = "2018-12-31";

/// Writes documents to the target document store's REST API, signing every
/// request with the account master key.
#[derive(Clone, Debug)]
pub struct DocumentStore {
    http: reqwest::Client,
    config: DocumentStoreConfig,
    max_retries: usize,
}

impl DocumentStore {
    pub fn new(http: reqwest::Client, config: DocumentStoreConfig) -> Self {
        Self {
            http,
            config,
            max_retries: 3,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Create (or upsert) one document. Throttling, server errors and network
    /// failures are retried with backoff, each attempt signed with a fresh date.
    #[tracing::instrument(skip(self, document), err)]
    pub async fn write_document(&self, id: &str, document: &Document) -> Result<()> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(50)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.max_retries);

        RetryIf::spawn(
            strategy,
            || self.post_document(id, document),
            |error: &ReplicationError| error.is_retryable(),
        )
        .await
    }

    async fn post_document(&self, id: &str, document: &Document) -> Result<()> {
        let resource_path = self.config.resource_path();
        let date = http_date(Utc::now());
        let token = authorization_token(
            "POST",
            "docs",
            &resource_path,
            &date,
            &self.config.master_key,
        )?;

        let mut request = self
            .http
            .post(format!("{}/{}/docs", self.config.endpoint, resource_path))
            .header("Authorization", token)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .header(CONTENT_TYPE, "application/json")
            .header("x-ms-documentdb-partitionkey", partition_key_header(id));

        if self.config.upsert {
            request = request.header("x-ms-documentdb-is-upsert", "True");
        }

        let response = request.json(document).send().await?;
        let status = response.status();

        if status.is_success() {
            tracing::debug!(%status, "Document accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(%status, "Document store rejected write");
        Err(ReplicationError::RemoteRejection { status, body })
    }
}

/// The partition key as a one-element JSON array, with every non-ASCII
/// character written as `\uXXXX` UTF-16 escapes so the header stays ASCII.
fn partition_key_header(id: &str) -> String {
    let json = JsonValue::from(vec![id]).to_string();
    let mut header = String::with_capacity(json.len());
    let mut units = [0u16; 2];
    for c in json.chars() {
        if c.is_ascii() {
            header.push(c);
        } else {
            for unit in c.encode_utf16(&mut units) {
                header.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    header
}
