//! `facsimile refine`: apply an instruction to an existing clone.

use crate::cli::{output, warn_if_no_providers};
use crate::config::RuntimeConfig;
use crate::pipeline::Pipeline;
use crate::renderer::NoopRenderer;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

/// Run the refine command. No browser is needed.
pub async fn run(
    html_path: &Path,
    instruction: &str,
    out: Option<&Path>,
    config: RuntimeConfig,
) -> Result<()> {
    let html = std::fs::read_to_string(html_path)
        .with_context(|| format!("failed to read {}", html_path.display()))?;
    warn_if_no_providers(&config);
    let pipeline = Pipeline::from_config(&config, Arc::new(NoopRenderer));

    output::status(&format!("Refining {}...", html_path.display()));
    let result = pipeline.refine(&html, instruction).await?;

    if let Some(path) = out {
        std::fs::write(path, &result.html)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    if output::is_json() {
        output::print_json(&result);
    } else if out.is_none() {
        println!("{}", result.html);
    } else {
        output::status(&format!(
            "Wrote {} ({:?}, score {:.2})",
            out.map(|p| p.display().to_string()).unwrap_or_default(),
            result.provenance,
            result.score
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refine_without_providers_writes_sanitized_copy() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clone.html");
        let out = dir.path().join("refined.html");
        std::fs::write(&input, "<html><body onload=\"x()\"><h1>Acme</h1></body></html>").unwrap();

        run(&input, "make it blue", Some(&out), RuntimeConfig::default())
            .await
            .unwrap();

        let written = std::fs::read_to_string(&out).unwrap();
        assert!(written.starts_with("<!DOCTYPE html>"));
        assert!(written.contains("<h1>Acme</h1>"));
        assert!(!written.contains("onload"));
    }

    #[tokio::test]
    async fn test_missing_input_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(
            &dir.path().join("missing.html"),
            "anything",
            None,
            RuntimeConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
