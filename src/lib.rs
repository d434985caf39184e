//! Mirrors table change streams and bucket writes from one cloud into a
//! document store and a blob container on another.
//!
//! Records are signed with a master-key HMAC token built by [`signer`]; blobs
//! are written through a pre-authorized [`capability::CapabilityUrl`].

pub mod blob_store;
pub mod capability;
pub mod change;
pub mod config;
pub mod document;
pub mod document_store;
pub mod error;
pub mod invocation;
pub mod objects;
pub mod records;
pub mod server;
pub mod signer;
pub mod source;

pub use error::{Disposition, ReplicationError, Result};
pub use invocation::InvocationResponse;
pub use objects::ObjectReplicator;
pub use records::{RecordReplicator, ReplicationOutcome};
