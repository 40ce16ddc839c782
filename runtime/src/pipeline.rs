//! End-to-end clone pipeline.
//!
//! Capture → consolidate → assemble → generate/validate, strictly in
//! sequence. Capture- and consolidation-phase errors end the request.
//! Generation failures never do: when the orchestrator gives up (or the
//! deadline passes) the deterministic fallback document is returned.

use crate::capture::{CaptureEngine, PageCapture};
use crate::config::RuntimeConfig;
use crate::orchestrator::Orchestrator;
use crate::providers::build_providers;
use crate::renderer::Renderer;
use facsimile::{
    assemble, assemble_refinement, consolidate, finalize_document, render_document,
    AssemblerConfig, CloneError, CloneResult, GenerationRequest, Provenance, Validator,
    VisualManifest,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct Pipeline {
    capture: Arc<dyn PageCapture>,
    orchestrator: Orchestrator,
    assembler: AssemblerConfig,
    deadline: Duration,
}

impl Pipeline {
    pub fn new(
        capture: Arc<dyn PageCapture>,
        orchestrator: Orchestrator,
        assembler: AssemblerConfig,
        deadline: Duration,
    ) -> Self {
        Self {
            capture,
            orchestrator,
            assembler,
            deadline,
        }
    }

    /// Wire a browser-backed pipeline from configuration.
    pub fn from_config(config: &RuntimeConfig, renderer: Arc<dyn Renderer>) -> Self {
        let capture = Arc::new(CaptureEngine::new(renderer, config.capture.clone()));
        let providers = build_providers(&config.providers, config.generation.call_timeout);
        let orchestrator = Orchestrator::new(
            providers,
            config.retry,
            Validator::new(config.validator.clone()),
        )
        .with_call_timeout(config.generation.call_timeout)
        .with_fan_out(config.generation.fan_out);
        Self::new(
            capture,
            orchestrator,
            config.assembler.clone(),
            config.generation.deadline,
        )
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Capture only; the manifest is returned for diagnostics.
    pub async fn capture_manifest(&self, url: &str) -> Result<VisualManifest, CloneError> {
        self.capture.capture(url).await
    }

    /// Clone a live page.
    pub async fn clone_url(&self, url: &str) -> Result<CloneResult, CloneError> {
        let manifest = self.capture.capture(url).await?;
        self.clone_manifest(&manifest).await
    }

    /// Clone from an already captured manifest.
    pub async fn clone_manifest(&self, manifest: &VisualManifest) -> Result<CloneResult, CloneError> {
        let bundle = consolidate(manifest)?;
        let request = assemble(&bundle, &self.assembler)?;
        let truncation = request.truncation();
        if !truncation.is_lossless() {
            info!(
                original_chars = truncation.original_chars,
                final_chars = truncation.final_chars,
                dropped_assets = truncation.dropped_decorative_assets,
                collapsed = truncation.collapsed_subtrees,
                "payload truncated to budget"
            );
        }

        let images = bundle.asset_urls();
        match self.generate(&request).await {
            Ok(result) => Ok(CloneResult { images, ..result }),
            Err(attempts) => {
                let html = finalize_document(&render_document(&bundle));
                let score = self
                    .orchestrator
                    .validator()
                    .validate(&html, bundle.assets())
                    .score;
                Ok(CloneResult {
                    html,
                    provenance: Provenance::Fallback,
                    score,
                    images,
                    provider: None,
                    attempts,
                })
            }
        }
    }

    /// Apply an instruction to an existing document.
    ///
    /// Falls back to the sanitized input document when no provider
    /// produces an acceptable edit.
    pub async fn refine(&self, html: &str, instruction: &str) -> Result<CloneResult, CloneError> {
        let request = assemble_refinement(html, instruction, &self.assembler)?;
        let images = request.assets().iter().map(|a| a.url().to_string()).collect();
        match self.generate(&request).await {
            Ok(result) => Ok(CloneResult { images, ..result }),
            Err(attempts) => {
                let html = finalize_document(html);
                let score = self.orchestrator.validator().validate(&html, &[]).score;
                Ok(CloneResult {
                    html,
                    provenance: Provenance::Fallback,
                    score,
                    images,
                    provider: None,
                    attempts,
                })
            }
        }
    }

    /// Run the orchestrator under the outer deadline. `Err` carries the
    /// number of attempts made before giving up.
    async fn generate(&self, request: &GenerationRequest) -> Result<CloneResult, u32> {
        let deadline = Instant::now() + self.deadline;
        let outcome = tokio::time::timeout_at(deadline, self.orchestrator.generate(request, deadline)).await;
        match outcome {
            Ok(Ok(accepted)) => {
                debug!(
                    provider = %accepted.candidate.provider,
                    attempts = accepted.attempts,
                    "generated artifact accepted"
                );
                Ok(CloneResult {
                    html: finalize_document(&accepted.candidate.content),
                    provenance: Provenance::Generated,
                    score: accepted.verdict.score,
                    images: Vec::new(),
                    provider: Some(accepted.candidate.provider),
                    attempts: accepted.attempts,
                })
            }
            Ok(Err(e)) => {
                warn!(error = %e, "generation failed; returning deterministic fallback");
                Err(match e {
                    CloneError::GenerationExhausted { attempts, .. } => attempts,
                    _ => 0,
                })
            }
            Err(_) => {
                warn!("generation deadline exceeded; returning deterministic fallback");
                Err(0)
            }
        }
    }
}
