use anyhow::{Context, Result};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::capability::CapabilityUrl;

pub const DEFAULT_DATABASE_ID: &str = "ReplicaDB";
pub const DEFAULT_CONTAINER_ID: &str = "TablaUsuariosReplica";

/// Where and how documents are written to the target document store
#[derive(Clone)]
pub struct DocumentStoreConfig {
    pub endpoint: String,
    pub master_key: String,
    pub database_id: String,
    pub container_id: String,
    /// Overwrite existing documents instead of failing on conflicts
    pub upsert: bool,
}

impl DocumentStoreConfig {
    pub fn new(endpoint: &str, master_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            master_key: master_key.into(),
            database_id: DEFAULT_DATABASE_ID.to_string(),
            container_id: DEFAULT_CONTAINER_ID.to_string(),
            upsert: true,
        }
    }

    /// `dbs/{database}/colls/{container}`, used in both the URL and the signature
    pub fn resource_path(&self) -> String {
        format!("dbs/{}/colls/{}", self.database_id, self.container_id)
    }
}

impl fmt::Debug for DocumentStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStoreConfig")
            .field("endpoint", &self.endpoint)
            .field("master_key", &"<redacted>")
            .field("database_id", &self.database_id)
            .field("container_id", &self.container_id)
            .field("upsert", &self.upsert)
            .finish()
    }
}

/// Process-wide settings, resolved once at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub document_store: DocumentStoreConfig,
    pub capability_url: CapabilityUrl,
    pub http_timeout: Duration,
    pub invocation_deadline: Duration,
    pub max_retries: usize,
    pub batch_concurrency: usize,
    pub staging_dir: PathBuf,
    pub port: u16,
}

impl Config {
    #[tracing::instrument(err)]
    pub fn from_env() -> Result<Self> {
        let endpoint = required("COSMOS_ENDPOINT")?;
        let master_key = required("COSMOS_KEY")?;

        let mut document_store = DocumentStoreConfig::new(&endpoint, master_key);
        document_store.database_id = optional("COSMOS_DATABASE_ID", DEFAULT_DATABASE_ID.to_string())?;
        document_store.container_id =
            optional("COSMOS_CONTAINER_ID", DEFAULT_CONTAINER_ID.to_string())?;
        document_store.upsert = flag("COSMOS_UPSERT", true)?;

        let capability_url = CapabilityUrl::parse(&required("AZURE_SAS_URL")?)
            .context("AZURE_SAS_URL is not a usable capability URL")?;

        let staging_dir = env::var("STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir());

        Ok(Self {
            document_store,
            capability_url,
            http_timeout: Duration::from_secs(optional("HTTP_TIMEOUT_SECS", 30)?),
            invocation_deadline: Duration::from_secs(optional("INVOCATION_DEADLINE_SECS", 300)?),
            max_retries: optional("MAX_RETRIES", 3)?,
            batch_concurrency: optional::<usize>("BATCH_CONCURRENCY", 8)?.max(1),
            staging_dir,
            port: optional("PORT", 8080)?,
        })
    }

    /// The shared outbound HTTP client, with the request timeout applied
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.http_timeout)
            .build()
            .context("Could not build HTTP client")
    }
}

fn required(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("{name} is required"))
}

fn optional<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("{name} has an invalid value")),
        Err(_) => Ok(default),
    }
}

/// Booleans in any case, also as `1`/`0` and `yes`/`no`
fn flag(name: &str, default: bool) -> Result<bool> {
    let value = match env::var(name) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };

    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => anyhow::bail!("{name} has an invalid value, expected true or false"),
    }
}
