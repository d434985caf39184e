use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised while replicating a record or an object to the target cloud.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The master key is not valid base64
    #[error("master key is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    /// An attribute carries a type tag with no document representation
    #[error("attribute `{attribute}` has unsupported type `{tag}`")]
    UnsupportedAttributeType { attribute: String, tag: String },

    /// An attribute value does not have the shape its type tag calls for
    #[error("attribute `{attribute}` is malformed: {reason}")]
    MalformedAttribute { attribute: String, reason: String },

    /// A number attribute could not be read as a finite float
    #[error("attribute `{attribute}` is not a valid number: {value}")]
    InvalidNumber { attribute: String, value: String },

    #[error("document has no string `id` attribute")]
    MissingId,

    /// Connectivity failure or timeout talking to a remote store
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The remote store answered with a non-success status
    #[error("remote store rejected the request with {status}: {body}")]
    RemoteRejection { status: StatusCode, body: String },

    /// The source object store could not deliver the object
    #[error("source object store error: {message}")]
    Source { message: String, transient: bool },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid capability URL: {0}")]
    InvalidCapabilityUrl(String),

    #[error("invalid notification: {0}")]
    InvalidNotification(String),

    #[error("invocation deadline exceeded")]
    DeadlineExceeded,
}

/// What the invoking trigger should do with a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient failure, delivering the same event again may succeed
    Retry,
    /// Retrying the same event cannot succeed
    Discard,
}

impl ReplicationError {
    pub fn object_source(message: impl Into<String>, transient: bool) -> Self {
        Self::Source {
            message: message.into(),
            transient,
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Network(_) | Self::Io(_) | Self::DeadlineExceeded => Disposition::Retry,
            Self::RemoteRejection { status, .. } if is_transient_status(*status) => {
                Disposition::Retry
            }
            Self::Source {
                transient: true, ..
            } => Disposition::Retry,
            _ => Disposition::Discard,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.disposition() == Disposition::Retry
    }
}

/// Statuses a remote store uses for throttling and temporary unavailability
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

pub type Result<T> = std::result::Result<T, ReplicationError>;
