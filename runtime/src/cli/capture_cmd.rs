//! `facsimile capture <url>`: print the visual manifest of a live page.

use crate::capture::{CaptureEngine, PageCapture};
use crate::cli::{launch_renderer, output};
use crate::config::RuntimeConfig;
use anyhow::Result;
use facsimile::VisualManifest;
use std::sync::Arc;

/// Run the capture command.
pub async fn run(url: &str, config: RuntimeConfig) -> Result<()> {
    let renderer = launch_renderer(&config).await;
    let engine = CaptureEngine::new(Arc::clone(&renderer), config.capture.clone());

    output::status(&format!("Capturing {url}..."));
    let manifest = engine.capture(url).await;
    let _ = renderer.shutdown().await;
    let manifest = manifest?;

    if output::is_json() || output::is_quiet() {
        output::print_json(&manifest);
    } else {
        print_summary(&manifest);
    }
    Ok(())
}

fn print_summary(manifest: &VisualManifest) {
    let meta = manifest.metadata();
    println!("URL:        {}", manifest.final_url());
    println!("Title:      {}", meta.title.as_deref().unwrap_or("(none)"));
    println!(
        "Viewport:   {}x{}",
        manifest.viewport().width,
        manifest.viewport().height
    );
    println!("Nodes:      {}", manifest.nodes().len());
    println!("Sheets:     {}", manifest.stylesheets().len());
    println!("Variables:  {}", meta.css_variables.len());
    println!("Assets:     {}", manifest.assets().len());
    for asset in manifest.assets().iter().take(20) {
        let tag = if asset.is_decorative() { " (decorative)" } else { "" };
        println!("  {:<10} {}{tag}", asset.kind().to_string(), asset.url());
    }
    if manifest.assets().len() > 20 {
        println!("  ... {} more", manifest.assets().len() - 20);
    }
}
