//! `facsimile serve`: run the REST API.

use crate::cli::{launch_renderer, output, warn_if_no_providers};
use crate::config::RuntimeConfig;
use crate::pipeline::Pipeline;
use crate::rest::{self, AppState};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// Start the server and block until Ctrl-C.
pub async fn run(host: &str, port: u16, config: RuntimeConfig) -> Result<()> {
    warn_if_no_providers(&config);
    let renderer = launch_renderer(&config).await;
    let pipeline = Arc::new(Pipeline::from_config(&config, Arc::clone(&renderer)));
    let state = AppState { pipeline };

    info!("starting Facsimile v{}", env!("CARGO_PKG_VERSION"));
    output::status(&format!(
        "Facsimile v{} listening on http://{host}:{port}",
        env!("CARGO_PKG_VERSION")
    ));

    let result = tokio::select! {
        r = rest::start(host, port, state) => r,
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            Ok(())
        }
    };

    let _ = renderer.shutdown().await;
    result
}
