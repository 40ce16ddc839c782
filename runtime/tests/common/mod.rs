//! Shared stubs for integration tests: a canned page capture and scripted
//! providers, so the pipeline runs without a browser or network.

#![allow(dead_code)]

use async_trait::async_trait;
use facsimile::{
    AssemblerConfig, AssetKind, AssetRef, CaptureLimits, CloneError, ManifestBuilder, NodeDraft,
    ProviderErrorKind, RetryPolicy, Validator, Viewport, VisualManifest,
};
use facsimile_runtime::capture::PageCapture;
use facsimile_runtime::orchestrator::Orchestrator;
use facsimile_runtime::pipeline::Pipeline;
use facsimile_runtime::providers::{Prompt, Provider, ProviderError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn landing_page() -> VisualManifest {
    let mut b = ManifestBuilder::new(
        "https://acme.test",
        "https://acme.test/",
        Viewport::default(),
        CaptureLimits::default(),
    );
    b.add_stylesheet("body { margin: 0; font-family: Inter, sans-serif; }".to_string());
    let root = b
        .add_root(
            NodeDraft::new("body")
                .with_geometry(1280.0, 2000.0)
                .with_style("background-color", "rgb(250, 250, 250)"),
        )
        .unwrap();
    let h1 = b
        .add_child(
            root,
            NodeDraft::new("h1")
                .with_geometry(600.0, 48.0)
                .with_style("font-size", "40px"),
        )
        .unwrap();
    b.add_text(h1, "Acme keeps every team in sync");
    let p = b
        .add_child(root, NodeDraft::new("p").with_geometry(600.0, 80.0))
        .unwrap();
    b.add_text(p, "Plan, ship and review work in one place.");
    let hero = AssetRef::absolute("https://acme.test/hero.png", AssetKind::Image).unwrap();
    b.add_child(
        root,
        NodeDraft::new("img")
            .with_geometry(600.0, 320.0)
            .with_attribute("src", hero.url())
            .with_attribute("alt", "Product screenshot")
            .with_asset(hero.clone()),
    );
    b.build().unwrap()
}

pub fn blank_page() -> VisualManifest {
    let mut b = ManifestBuilder::new(
        "https://spa.test",
        "https://spa.test/",
        Viewport::default(),
        CaptureLimits::default(),
    );
    let root = b
        .add_root(NodeDraft::new("body").with_geometry(1280.0, 800.0))
        .unwrap();
    b.add_child(root, NodeDraft::new("div"));
    b.build().unwrap()
}

/// Capture stub that returns a fixed manifest, or an error.
pub struct StubCapture {
    pub outcome: Result<VisualManifest, CloneError>,
}

#[async_trait]
impl PageCapture for StubCapture {
    async fn capture(&self, url: &str) -> Result<VisualManifest, CloneError> {
        if url.trim().is_empty() {
            return Err(CloneError::InvalidInput("url must not be empty".into()));
        }
        self.outcome.clone()
    }
}

pub enum Behavior {
    Reply(String),
    Fail(ProviderErrorKind),
    Hang,
}

pub struct StubProvider {
    id: String,
    behavior: Behavior,
    calls: AtomicUsize,
}

impl StubProvider {
    pub fn new(id: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn identity(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, _prompt: &Prompt) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Reply(text) => Ok(text.clone()),
            Behavior::Fail(kind) => Err(ProviderError::new(*kind, "stubbed failure")),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
        }
    }
}

pub fn generated_document() -> String {
    let sections: String = (0..10)
        .map(|i| format!("<section><h2>Feature {i}</h2><p>Acme keeps every team in sync across projects.</p></section>"))
        .collect();
    format!(
        "```html\n<!DOCTYPE html><html><head><title>Acme</title></head><body><h1>Acme keeps every team in sync</h1><img src=\"https://acme.test/hero.png\" alt=\"\">{sections}<script>track()</script></body></html>\n```"
    )
}

pub fn pipeline(
    capture: StubCapture,
    providers: Vec<Arc<StubProvider>>,
    deadline: Duration,
) -> Pipeline {
    let providers = providers
        .into_iter()
        .map(|p| p as Arc<dyn Provider>)
        .collect();
    let policy = RetryPolicy {
        backoff_base: Duration::ZERO,
        backoff_cap: Duration::ZERO,
        ..RetryPolicy::default()
    };
    let orchestrator = Orchestrator::new(providers, policy, Validator::default())
        .with_call_timeout(Duration::from_secs(5));
    Pipeline::new(
        Arc::new(capture),
        orchestrator,
        AssemblerConfig::default(),
        deadline,
    )
}
