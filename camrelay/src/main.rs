use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use camrelay::api::{ApiServer, ApiServerConfig, AppState};
use camrelay::config::StreamConfig;
use camrelay::logging::init_logging;
use camrelay::registry::StreamRegistry;
use camrelay::transcoder::{FfmpegTranscoder, Transcoder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = StreamConfig::from_env_or_default().context("invalid stream configuration")?;
    config.validate().context("invalid stream configuration")?;

    let (logging_config, _guard) =
        init_logging(&config.log_dir).context("failed to initialize logging")?;

    let cancel = CancellationToken::new();
    logging_config.start_retention_cleanup(cancel.child_token());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        media_dir = %config.media_dir.display(),
        "Starting camrelay"
    );

    let transcoder = FfmpegTranscoder::with_config((&config).into());
    match transcoder.version() {
        Some(version) => info!(%version, "Transcoder available"),
        None => warn!(
            binary = %config.ffmpeg_path,
            "Transcoder binary not found; streams cannot start until it is installed"
        ),
    }

    let registry = Arc::new(StreamRegistry::new(config, Arc::new(transcoder)));
    match registry.store().purge_orphans().await {
        Ok(0) => {}
        Ok(removed) => info!(removed, "Removed leftover stream artifacts"),
        Err(e) => warn!(error = %e, "Failed to purge leftover stream artifacts"),
    }
    let sweep = registry.start_idle_sweep(cancel.child_token());

    let state = AppState::new(registry.clone()).with_logging_config(logging_config);
    let server = ApiServer::with_state(ApiServerConfig::from_env_or_default(), state);
    let server_token = server.cancel_token();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        server_token.cancel();
    });

    let result = server.run().await;

    cancel.cancel();
    let _ = sweep.await;
    registry.shutdown().await;
    info!("camrelay stopped");

    result.context("API server failed")
}
