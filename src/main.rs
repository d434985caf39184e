use anyhow::{Context, Result};
use axum::Server;
use std::net::SocketAddr;
use std::sync::Arc;

use cloudmirror::blob_store::BlobStore;
use cloudmirror::config::Config;
use cloudmirror::document_store::DocumentStore;
use cloudmirror::server::{router, AppState};
use cloudmirror::source::S3ObjectSource;
use cloudmirror::{ObjectReplicator, RecordReplicator};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
            .finish(),
    )
    .context("Could not install tracing subscriber")?;

    let config = Config::from_env()?;
    let http = config.http_client()?;

    // Clients are built once here and handed to each pipeline
    let records = RecordReplicator::new(
        DocumentStore::new(http.clone(), config.document_store.clone())
            .with_max_retries(config.max_retries),
    )
    .with_concurrency(config.batch_concurrency)
    .with_deadline(config.invocation_deadline);

    let objects = ObjectReplicator::new(
        Arc::new(S3ObjectSource::from_env().await),
        BlobStore::new(http, config.capability_url.clone()),
        config.staging_dir.clone(),
    )
    .with_deadline(config.invocation_deadline);

    let app = router(Arc::new(AppState { records, objects }));

    tracing::info!(port = config.port, "Serving invocations");

    Server::bind(&SocketAddr::from(([0, 0, 0, 0], config.port)))
        .serve(app.into_make_service())
        .await
        .context("Failed to start server")?;

    Ok(())
}
