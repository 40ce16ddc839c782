//! `facsimile clone <url>`: capture a page and write a static clone.

use crate::cli::{launch_renderer, output, warn_if_no_providers};
use crate::config::RuntimeConfig;
use crate::pipeline::Pipeline;
use anyhow::{Context, Result};
use facsimile::{CloneResult, Provenance};
use std::path::Path;
use std::time::Instant;

/// Run the clone command.
pub async fn run(url: &str, out: Option<&Path>, config: RuntimeConfig) -> Result<()> {
    warn_if_no_providers(&config);
    let renderer = launch_renderer(&config).await;
    let pipeline = Pipeline::from_config(&config, renderer.clone());

    output::status(&format!("Cloning {url}..."));
    let started = Instant::now();
    let result = pipeline.clone_url(url).await;
    let _ = renderer.shutdown().await;
    let result = result?;

    if let Some(path) = out {
        std::fs::write(path, &result.html)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    if output::is_json() {
        output::print_json(&result);
        return Ok(());
    }

    if out.is_none() {
        println!("{}", result.html);
    }
    if !output::is_quiet() {
        summarize(&result, out, started.elapsed().as_millis());
    }
    Ok(())
}

fn summarize(result: &CloneResult, out: Option<&Path>, elapsed_ms: u128) {
    let source = match (&result.provenance, &result.provider) {
        (Provenance::Generated, Some(provider)) => format!("generated by {provider}"),
        (Provenance::Generated, None) => "generated".to_string(),
        (Provenance::Fallback, _) => "deterministic fallback".to_string(),
    };
    eprintln!(
        "  Done in {elapsed_ms}ms: {source}, score {:.2}, {} attempt(s), {} asset(s)",
        result.score,
        result.attempts,
        result.images.len()
    );
    if let Some(path) = out {
        eprintln!("  Wrote {} ({} bytes)", path.display(), result.html.len());
    }
}
