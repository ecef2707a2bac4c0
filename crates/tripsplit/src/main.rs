use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::error;
use tracing_subscriber::EnvFilter;
use tripsplit_bucket::S3ObjectStorage;
use tripsplit_core::{
    ConnectionConfig, HttpTableSource, Relay, RelaySettings, Reporter, RunEvent, TracingReporter,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    dotenvy::dotenv().ok();

    let reporter: Arc<dyn Reporter> = Arc::new(TracingReporter);

    // Every failure ends up in the log; the exit status is always 0.
    if let Err(err) = run(reporter).await {
        error!("relay could not start: {err:#}");
    }
    Ok(())
}

async fn run(reporter: Arc<dyn Reporter>) -> Result<()> {
    let config = ConnectionConfig::load_default().with_context(|| {
        format!(
            "failed to load connection config from {}",
            ConnectionConfig::default_path().display()
        )
    })?;

    let storage = S3ObjectStorage::new(config.to_s3_config())
        .await
        .context("failed to configure object storage client")?;
    reporter.report(&RunEvent::Connected {
        endpoint: config.endpoint_url(),
    });

    let relay = Relay::new(
        Arc::new(storage),
        Arc::new(HttpTableSource::new()),
        reporter,
        RelaySettings::default(),
    );

    // Aborts are already reported by the relay.
    relay.run().await.ok();
    Ok(())
}
