//! Read access to the source object store.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::Client;
use std::fmt::Debug;
use std::pin::Pin;
use tokio::io::AsyncRead;

use crate::error::{ReplicationError, Result};

/// A readable object body
pub type ObjectBody = Pin<Box<dyn AsyncRead + Send>>;

/// Where replicated objects are read from. Injected so tests can substitute
/// an in-memory store.
#[async_trait]
pub trait ObjectSource: Debug + Send + Sync {
    async fn open(&self, bucket: &str, key: &str) -> Result<ObjectBody>;
}

/// Reads objects from S3 with an explicitly constructed client
#[derive(Clone)]
pub struct S3ObjectSource {
    client: Client,
}

impl Debug for S3ObjectSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectSource").finish()
    }
}

impl S3ObjectSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn from_env() -> Self {
        let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(Client::new(&sdk_config))
    }
}

#[async_trait]
impl ObjectSource for S3ObjectSource {
    #[tracing::instrument(skip(self), err)]
    async fn open(&self, bucket: &str, key: &str) -> Result<ObjectBody> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(get_object_error)?;

        Ok(Box::pin(output.body.into_async_read()))
    }
}

fn get_object_error(error: SdkError<GetObjectError, HttpResponse>) -> ReplicationError {
    let transient = match &error {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(service) => {
            let status = service.raw().status();
            status.is_server_error() || status.as_u16() == 429
        }
        _ => false,
    };

    ReplicationError::object_source(DisplayErrorContext(&error).to_string(), transient)
}
