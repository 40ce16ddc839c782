//! Chromium-based renderer using chromiumoxide.

use super::{NavigationResult, NavigationTimeout, RenderContext, Renderer};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::page::Page;
use facsimile::Viewport;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. FACSIMILE_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("FACSIMILE_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.facsimile/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".facsimile/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".facsimile/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".facsimile/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".facsimile/chromium/chrome-linux64/chrome"),
                home.join(".facsimile/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS locations
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Launch options for a headless browser.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub chromium_path: Option<PathBuf>,
    pub viewport: Viewport,
    pub user_agent: String,
    /// Launch without the Chromium sandbox. Only for containers that
    /// cannot provide the namespaces the sandbox needs.
    pub no_sandbox: bool,
}

/// Command-line switches passed to Chromium.
pub fn launch_args(options: &BrowserOptions) -> Vec<String> {
    let mut args: Vec<String> = [
        "--headless=new",
        "--disable-gpu",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--disable-background-networking",
        "--disable-blink-features=AutomationControlled",
        "--hide-scrollbars",
        "--mute-audio",
    ]
    .iter()
    .map(|a| a.to_string())
    .collect();
    if options.no_sandbox {
        args.push("--no-sandbox".to_string());
    }
    args.push(format!("--user-agent={}", options.user_agent));
    args
}

/// Chromium-based renderer.
///
/// Every context is a fresh incognito-style browser context, so cookies,
/// storage and cache never carry from one capture to the next.
pub struct ChromiumRenderer {
    browser: Arc<Browser>,
    profile_dir: PathBuf,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch a headless Chromium instance with a throwaway profile.
    pub async fn launch(options: &BrowserOptions) -> Result<Self> {
        let chrome_path = match &options.chromium_path {
            Some(path) => path.clone(),
            None => find_chromium()
                .context("Chromium not found. Set FACSIMILE_CHROMIUM_PATH or install Chrome.")?,
        };
        let profile_dir =
            std::env::temp_dir().join(format!("facsimile-profile-{}", uuid::Uuid::new_v4()));

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .user_data_dir(&profile_dir)
            .window_size(options.viewport.width, options.viewport.height)
            .viewport(None::<chromiumoxide::handler::viewport::Viewport>);
        for arg in launch_args(options) {
            builder = builder.arg(arg);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;
        if options.no_sandbox {
            warn!("launching Chromium without its sandbox");
        }

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // Spawn the handler task
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            profile_dir,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let context_id = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .context("failed to create browser context")?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("invalid target params: {e}"))?;
        let page = match self.browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                dispose_context(&self.browser, context_id).await;
                return Err(e).context("failed to create new page");
            }
        };

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumContext {
            page,
            browser: Arc::clone(&self.browser),
            context_id,
            active_count: Arc::clone(&self.active_count),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        // Browser process exits when ChromiumRenderer is dropped
        if let Err(e) = std::fs::remove_dir_all(&self.profile_dir) {
            debug!("could not remove profile dir {}: {e}", self.profile_dir.display());
        }
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

async fn dispose_context(browser: &Browser, context_id: BrowserContextId) {
    if let Err(e) = browser
        .execute(DisposeBrowserContextParams::new(context_id))
        .await
    {
        debug!("could not dispose browser context: {e}");
    }
}

/// A single page in its own browser context.
pub struct ChromiumContext {
    page: Page,
    browser: Arc<Browser>,
    context_id: BrowserContextId,
    active_count: Arc<AtomicUsize>,
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(timeout_ms),
            self.page.goto(url),
        )
        .await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_response)) => {
                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => Err(NavigationTimeout(timeout_ms).into()),
        }
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;

        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = self.page.close().await;
        dispose_context(&self.browser, self.context_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> BrowserOptions {
        BrowserOptions {
            chromium_path: None,
            viewport: Viewport::default(),
            user_agent: crate::capture::probe::USER_AGENTS[0].to_string(),
            no_sandbox: false,
        }
    }

    #[test]
    fn test_sandbox_kept_unless_disabled() {
        let args = launch_args(&options());
        assert!(!args.iter().any(|a| a == "--no-sandbox"));
        assert!(args.iter().any(|a| a == "--headless=new"));
        assert_eq!(
            args.last().map(String::as_str),
            Some(format!("--user-agent={}", crate::capture::probe::USER_AGENTS[0]).as_str())
        );

        let unsandboxed = launch_args(&BrowserOptions {
            no_sandbox: true,
            ..options()
        });
        assert_eq!(unsandboxed.iter().filter(|a| *a == "--no-sandbox").count(), 1);
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_navigate_and_execute_js() {
        let renderer = ChromiumRenderer::launch(&options())
            .await
            .expect("failed to create renderer");
        let mut ctx = renderer
            .new_context()
            .await
            .expect("failed to create context");

        let nav = ctx
            .navigate("data:text/html,<h1>Hello</h1><p>World</p>", 10000)
            .await
            .expect("navigation failed");
        assert!(nav.load_time_ms < 10000);

        let result = ctx
            .execute_js("document.querySelector('h1').textContent")
            .await
            .expect("JS execution failed");
        assert_eq!(result.as_str().unwrap(), "Hello");

        let width = ctx
            .execute_js("window.innerWidth")
            .await
            .expect("JS execution failed");
        assert_eq!(width.as_u64(), Some(1280));

        ctx.close().await.expect("close failed");
        assert_eq!(renderer.active_contexts(), 0);

        renderer.shutdown().await.expect("shutdown failed");
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_contexts_do_not_share_cookies_or_storage() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html><body><p>origin</p></body></html>"),
            )
            .mount(&server)
            .await;
        let url = format!("{}/", server.uri());

        let renderer = ChromiumRenderer::launch(&options())
            .await
            .expect("failed to create renderer");

        let mut first = renderer.new_context().await.expect("first context");
        first.navigate(&url, 10000).await.expect("first navigation");
        first
            .execute_js(
                "document.cookie = 'visited=1; max-age=3600'; \
                 localStorage.setItem('visited', '1'); document.cookie",
            )
            .await
            .expect("seed state");

        let state_js = "JSON.stringify([document.cookie, localStorage.getItem('visited')])";
        let mut second = renderer.new_context().await.expect("second context");
        second.navigate(&url, 10000).await.expect("second navigation");
        let seen = second.execute_js(state_js).await.expect("read state");
        assert_eq!(seen.as_str(), Some(r#"["",null]"#));

        first.close().await.expect("close first");
        second.close().await.expect("close second");

        let mut third = renderer.new_context().await.expect("third context");
        third.navigate(&url, 10000).await.expect("third navigation");
        let seen = third.execute_js(state_js).await.expect("read state");
        assert_eq!(seen.as_str(), Some(r#"["",null]"#));
        third.close().await.expect("close third");

        assert_eq!(renderer.active_contexts(), 0);
        renderer.shutdown().await.expect("shutdown failed");
    }
}
