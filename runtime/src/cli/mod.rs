//! CLI subcommand implementations for the facsimile binary.

pub mod capture_cmd;
pub mod clone_cmd;
pub mod doctor;
pub mod output;
pub mod refine_cmd;
pub mod serve;

use crate::capture::probe::random_user_agent;
use crate::config::RuntimeConfig;
use crate::renderer::chromium::{BrowserOptions, ChromiumRenderer};
use crate::renderer::{NoopRenderer, Renderer};
use std::sync::Arc;
use tracing::{info, warn};

/// Launch Chromium, or fall back to a renderer that fails captures with a
/// clear error. Refinement keeps working without a browser.
pub async fn launch_renderer(config: &RuntimeConfig) -> Arc<dyn Renderer> {
    let options = BrowserOptions {
        chromium_path: config.chromium_path.clone(),
        viewport: config.capture.viewport,
        user_agent: random_user_agent().to_string(),
        no_sandbox: config.no_sandbox,
    };
    match ChromiumRenderer::launch(&options).await {
        Ok(renderer) => {
            info!("Chromium renderer initialized");
            Arc::new(renderer)
        }
        Err(e) => {
            warn!("Failed to initialize Chromium: {e:#}");
            warn!("captures will fail until a browser is available");
            Arc::new(NoopRenderer)
        }
    }
}

/// Warn when generation will always fall back.
pub fn warn_if_no_providers(config: &RuntimeConfig) {
    if config.providers.is_empty() {
        warn!("no provider API keys set; results will use the deterministic fallback");
        output::status(
            "No provider keys found (ANTHROPIC_API_KEY, GEMINI_API_KEY, OPENAI_API_KEY); using the deterministic fallback.",
        );
    }
}
