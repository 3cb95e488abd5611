//! funnel - upload local files and directories to S3

use anyhow::Context;
use clap::Parser;
use funnel::cli::Cli;
use funnel::metrics::server::MetricsServer;
use funnel::pipeline::{validate_request, Pipeline, PipelineError};
use funnel::s3::S3Store;
use funnel::upload::FileUploader;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = cli.load_config()?;
    funnel::logging::init_subscriber(&config.logging)?;

    info!("Starting funnel v{}", funnel::VERSION);

    validate_request(&cli.paths, &config.upload)?;

    let mut metrics_server = if config.metrics.enabled {
        let mut server = MetricsServer::from_config(&config.metrics);
        server
            .start()
            .await
            .context("failed to start metrics server")?;
        Some(server)
    } else {
        None
    };

    let store = S3Store::new(&config.s3)
        .await
        .context("failed to configure S3 client")?;
    let uploader = Arc::new(FileUploader::new(Arc::new(store), config.s3.bucket.clone()));
    let pipeline = Pipeline::new(config.upload.clone(), uploader)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, stopping");
                    cancel.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
            }
        }
    });

    let result = pipeline.run(&cli.paths, cancel).await;

    if let Some(server) = metrics_server.as_mut() {
        server.shutdown().await;
    }

    match result {
        Ok(_) | Err(PipelineError::Cancelled) => Ok(()),
        Err(e) => {
            error!(error = %e, "Upload run failed");
            Err(e.into())
        }
    }
}
