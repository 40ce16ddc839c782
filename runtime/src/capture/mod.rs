//! Capture Engine: render a live page and extract its visual manifest.
//!
//! Flow per request: normalize the URL, optionally probe it over plain
//! HTTP, open a tab, navigate (one retry on non-timeout failure), scroll
//! and settle, run the extraction script, check for challenge pages, and
//! assemble the manifest. The whole render runs under a hard timeout and
//! the tab is held by a [`TabGuard`] so it is closed on every exit path.

pub mod extract;
pub mod probe;
pub mod session;

use crate::renderer::{NavigationTimeout, RenderContext, Renderer};
use async_trait::async_trait;
use facsimile::{CaptureLimits, CloneError, Viewport, VisualManifest};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

pub use extract::{build_manifest, extraction_script, parse_capture, RawCapture};
pub use probe::Prober;
pub use session::TabGuard;

const SCROLL_STEP_PX: u32 = 800;
const SCROLL_PAUSE: Duration = Duration::from_millis(100);
const MAX_SCROLL_STEPS: u32 = 60;
const SETTLE_POLL: Duration = Duration::from_millis(250);

/// Anything that can turn a URL into a manifest.
#[async_trait]
pub trait PageCapture: Send + Sync {
    async fn capture(&self, url: &str) -> Result<VisualManifest, CloneError>;
}

/// Capture tunables.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub navigation_timeout: Duration,
    pub settle_timeout: Duration,
    /// Ceiling for the whole render, from tab creation to extraction.
    pub hard_timeout: Duration,
    pub viewport: Viewport,
    pub limits: CaptureLimits,
    /// Issue a plain HTTP probe before spending a browser tab.
    pub probe: bool,
    pub probe_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            settle_timeout: Duration::from_secs(10),
            hard_timeout: Duration::from_secs(55),
            viewport: Viewport::default(),
            limits: CaptureLimits::default(),
            probe: true,
            probe_timeout: Duration::from_secs(15),
        }
    }
}

/// Normalize user input into a capturable URL.
///
/// A bare host gains `https://`. Only `http` and `https` targets are
/// accepted.
pub fn normalize_url(input: &str) -> Result<Url, CloneError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CloneError::InvalidInput("url must not be empty".into()));
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let invalid = |reason: String| CloneError::Navigation {
        url: trimmed.to_string(),
        reason,
    };
    let url = Url::parse(&candidate).map_err(|e| invalid(format!("invalid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(invalid("URL has no host".into()));
    }
    Ok(url)
}

/// Browser-backed [`PageCapture`].
pub struct CaptureEngine {
    renderer: Arc<dyn Renderer>,
    prober: Option<Prober>,
    config: CaptureConfig,
}

impl CaptureEngine {
    pub fn new(renderer: Arc<dyn Renderer>, config: CaptureConfig) -> Self {
        let prober = config.probe.then(|| Prober::new(config.probe_timeout));
        Self {
            renderer,
            prober,
            config,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn renderer(&self) -> &Arc<dyn Renderer> {
        &self.renderer
    }

    async fn render(&self, target: &Url) -> Result<VisualManifest, CloneError> {
        let context = self
            .renderer
            .new_context()
            .await
            .map_err(|e| CloneError::Navigation {
                url: target.to_string(),
                reason: format!("{e:#}"),
            })?;
        let mut tab = TabGuard::new(context);
        let result = match tab.context_mut() {
            Some(ctx) => self.render_in(ctx, target).await,
            None => Err(CloneError::Navigation {
                url: target.to_string(),
                reason: "tab closed before navigation".into(),
            }),
        };
        tab.close().await;
        result
    }

    async fn render_in(
        &self,
        ctx: &mut dyn RenderContext,
        target: &Url,
    ) -> Result<VisualManifest, CloneError> {
        let url = target.as_str();
        let nav_ms = self.config.navigation_timeout.as_millis() as u64;

        let nav = match ctx.navigate(url, nav_ms).await {
            Ok(nav) => nav,
            Err(e) if e.downcast_ref::<NavigationTimeout>().is_some() => {
                return Err(CloneError::RenderTimeout {
                    url: url.to_string(),
                    timeout_ms: nav_ms,
                })
            }
            Err(e) => {
                warn!(url, "navigation failed, retrying once: {e:#}");
                ctx.navigate(url, nav_ms)
                    .await
                    .map_err(|e| classify_navigation(url, nav_ms, e))?
            }
        };
        debug!(url, final_url = %nav.final_url, load_ms = nav.load_time_ms, "navigated");

        scroll_through(ctx).await;
        settle(ctx, self.config.settle_timeout).await;

        let script = extraction_script(&self.config.limits);
        let value = ctx
            .execute_js(&script)
            .await
            .map_err(|e| CloneError::Navigation {
                url: url.to_string(),
                reason: format!("extraction failed: {e:#}"),
            })?;
        let raw = parse_capture(&value).map_err(|e| match e {
            CloneError::Navigation { reason, .. } => CloneError::Navigation {
                url: url.to_string(),
                reason,
            },
            other => other,
        })?;

        if let Some(marker) = probe::challenge_marker(&raw.probe_text) {
            return Err(CloneError::Blocked {
                url: url.to_string(),
                signal: format!("challenge page ({marker})"),
            });
        }

        build_manifest(raw, url, self.config.viewport, self.config.limits)
    }
}

#[async_trait]
impl PageCapture for CaptureEngine {
    async fn capture(&self, url: &str) -> Result<VisualManifest, CloneError> {
        let target = normalize_url(url)?;
        let started = Instant::now();

        if let Some(prober) = &self.prober {
            let report = prober.check(&target).await?;
            debug!(status = report.status, final_url = %report.final_url, "probe passed");
        }

        let hard = self.config.hard_timeout;
        let manifest = match tokio::time::timeout(hard, self.render(&target)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CloneError::RenderTimeout {
                    url: target.to_string(),
                    timeout_ms: hard.as_millis() as u64,
                })
            }
        };

        info!(
            url = %target,
            nodes = manifest.nodes().len(),
            assets = manifest.assets().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "capture complete"
        );
        Ok(manifest)
    }
}

fn classify_navigation(url: &str, nav_ms: u64, e: anyhow::Error) -> CloneError {
    if e.downcast_ref::<NavigationTimeout>().is_some() {
        CloneError::RenderTimeout {
            url: url.to_string(),
            timeout_ms: nav_ms,
        }
    } else {
        CloneError::Navigation {
            url: url.to_string(),
            reason: format!("{e:#}"),
        }
    }
}

/// Scroll to the bottom in steps so lazy content loads, then return to top.
async fn scroll_through(ctx: &mut dyn RenderContext) {
    let step = format!(
        "(() => {{ window.scrollBy(0, {SCROLL_STEP_PX}); \
         const h = document.body ? document.body.scrollHeight : 0; \
         return window.scrollY + window.innerHeight >= h; }})()"
    );
    for _ in 0..MAX_SCROLL_STEPS {
        match ctx.execute_js(&step).await {
            Ok(serde_json::Value::Bool(true)) => break,
            Ok(_) => tokio::time::sleep(SCROLL_PAUSE).await,
            Err(e) => {
                debug!("scroll step failed: {e:#}");
                break;
            }
        }
    }
    let _ = ctx.execute_js("window.scrollTo(0, 0)").await;
}

/// Poll readiness and element count until two consecutive samples agree.
async fn settle(ctx: &mut dyn RenderContext, timeout: Duration) {
    const SAMPLE: &str = "document.readyState + ':' + document.getElementsByTagName('*').length";
    let deadline = Instant::now() + timeout;
    let mut previous: Option<String> = None;
    while Instant::now() < deadline {
        let sample = match ctx.execute_js(SAMPLE).await {
            Ok(serde_json::Value::String(s)) => s,
            Ok(_) => return,
            Err(e) => {
                debug!("settle probe failed: {e:#}");
                return;
            }
        };
        if sample.starts_with("complete:") && previous.as_deref() == Some(sample.as_str()) {
            debug!(sample, "DOM settled");
            return;
        }
        previous = Some(sample);
        tokio::time::sleep(SETTLE_POLL).await;
    }
    debug!("settle timeout elapsed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::NavigationResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Nav {
        Ok,
        Timeout,
        Fail,
        FailOnce,
        Hang,
    }

    #[derive(Clone)]
    struct FakeRenderer {
        nav: Nav,
        page: String,
        closed: Arc<AtomicUsize>,
        navigations: Arc<AtomicUsize>,
    }

    impl FakeRenderer {
        fn new(nav: Nav, page: serde_json::Value) -> Self {
            Self {
                nav,
                page: page.to_string(),
                closed: Arc::new(AtomicUsize::new(0)),
                navigations: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    struct FakeContext {
        renderer: FakeRenderer,
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn new_context(&self) -> anyhow::Result<Box<dyn RenderContext>> {
            Ok(Box::new(FakeContext {
                renderer: self.clone(),
            }))
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn active_contexts(&self) -> usize {
            0
        }
    }

    #[async_trait]
    impl RenderContext for FakeContext {
        async fn navigate(&mut self, url: &str, timeout_ms: u64) -> anyhow::Result<NavigationResult> {
            let n = self.renderer.navigations.fetch_add(1, Ordering::SeqCst);
            match self.renderer.nav {
                Nav::Ok => {}
                Nav::FailOnce if n > 0 => {}
                Nav::Timeout => return Err(NavigationTimeout(timeout_ms).into()),
                Nav::Fail | Nav::FailOnce => anyhow::bail!("net::ERR_NAME_NOT_RESOLVED"),
                Nav::Hang => tokio::time::sleep(Duration::from_secs(3600)).await,
            }
            Ok(NavigationResult {
                final_url: url.to_string(),
                load_time_ms: 5,
            })
        }

        async fn execute_js(&self, script: &str) -> anyhow::Result<serde_json::Value> {
            if script.contains("MAX_DEPTH") {
                return Ok(serde_json::Value::String(self.renderer.page.clone()));
            }
            if script.contains("scrollBy") {
                return Ok(serde_json::Value::Bool(true));
            }
            if script.contains("readyState") {
                return Ok(serde_json::Value::String("complete:42".into()));
            }
            Ok(serde_json::Value::Null)
        }

        async fn close(self: Box<Self>) -> anyhow::Result<()> {
            self.renderer.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn page(probe_text: &str) -> serde_json::Value {
        serde_json::json!({
            "final_url": "https://example.com/",
            "base_url": "https://example.com/",
            "title": "Example",
            "items": [
                {"k": "element", "parent": null, "tag": "body", "rect": [0, 0, 1280, 900],
                 "style": {"background-color": "rgb(250, 250, 250)"}},
                {"k": "element", "parent": 0, "tag": "h1", "rect": [0, 0, 500, 40]},
                {"k": "text", "parent": 1, "text": "Example Domain"},
                {"k": "element", "parent": 0, "tag": "img", "rect": [0, 0, 300, 200],
                 "attrs": {"src": "/hero.png"}}
            ],
            "probe_text": probe_text
        })
    }

    fn config() -> CaptureConfig {
        CaptureConfig {
            navigation_timeout: Duration::from_millis(200),
            settle_timeout: Duration::from_millis(600),
            hard_timeout: Duration::from_secs(5),
            probe: false,
            ..CaptureConfig::default()
        }
    }

    fn engine(renderer: &FakeRenderer, config: CaptureConfig) -> CaptureEngine {
        CaptureEngine::new(Arc::new(renderer.clone()), config)
    }

    async fn wait_closed(closed: &AtomicUsize) -> usize {
        for _ in 0..100 {
            if closed.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        closed.load(Ordering::SeqCst)
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.com").unwrap().as_str(), "https://example.com/");
        assert_eq!(
            normalize_url("  http://example.com/a?b=1 ").unwrap().as_str(),
            "http://example.com/a?b=1"
        );
        assert_eq!(normalize_url("localhost:8080/x").unwrap().as_str(), "https://localhost:8080/x");
        assert_eq!(normalize_url("ftp://example.com").unwrap_err().code(), "E_NAVIGATION");
        assert_eq!(normalize_url("https://").unwrap_err().code(), "E_NAVIGATION");
        assert_eq!(normalize_url("   ").unwrap_err().code(), "E_INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_capture_builds_manifest_and_closes_tab() {
        let renderer = FakeRenderer::new(Nav::Ok, page("Example Domain"));
        let manifest = engine(&renderer, config()).capture("example.com").await.unwrap();
        assert_eq!(manifest.source_url(), "https://example.com/");
        assert_eq!(manifest.nodes().len(), 3);
        assert_eq!(manifest.assets()[0].url(), "https://example.com/hero.png");
        assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_navigation_timeout_is_render_timeout() {
        let renderer = FakeRenderer::new(Nav::Timeout, page(""));
        let err = engine(&renderer, config()).capture("https://example.com").await.unwrap_err();
        assert!(matches!(err, CloneError::RenderTimeout { timeout_ms: 200, .. }));
        assert_eq!(renderer.navigations.load(Ordering::SeqCst), 1);
        assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_navigation_failure_retried_once() {
        let renderer = FakeRenderer::new(Nav::Fail, page(""));
        let err = engine(&renderer, config()).capture("https://example.com").await.unwrap_err();
        assert_eq!(err.code(), "E_NAVIGATION");
        assert_eq!(renderer.navigations.load(Ordering::SeqCst), 2);
        assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);

        let flaky = FakeRenderer::new(Nav::FailOnce, page("Example Domain"));
        assert!(engine(&flaky, config()).capture("https://example.com").await.is_ok());
        assert_eq!(flaky.navigations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_challenge_page_is_blocked() {
        let renderer = FakeRenderer::new(Nav::Ok, page("Just a moment...\nVerify you are human"));
        let err = engine(&renderer, config()).capture("https://example.com").await.unwrap_err();
        assert!(matches!(err, CloneError::Blocked { .. }));
        assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hard_timeout_releases_tab() {
        let renderer = FakeRenderer::new(Nav::Hang, page(""));
        let cfg = CaptureConfig {
            navigation_timeout: Duration::from_secs(3600),
            hard_timeout: Duration::from_millis(50),
            ..config()
        };
        let err = engine(&renderer, cfg).capture("https://example.com").await.unwrap_err();
        assert!(matches!(err, CloneError::RenderTimeout { timeout_ms: 50, .. }));
        assert_eq!(wait_closed(&renderer.closed).await, 1);
    }

    #[tokio::test]
    async fn test_missing_browser_is_navigation_error() {
        let engine = CaptureEngine::new(Arc::new(crate::renderer::NoopRenderer), config());
        let err = engine.capture("https://example.com").await.unwrap_err();
        assert_eq!(err.code(), "E_NAVIGATION");
        assert!(err.to_string().contains("browser not available"));
    }
}
