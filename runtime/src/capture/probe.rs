//! Preflight HTTP probe.
//!
//! A plain GET issued before any browser tab is spent. Unreachable hosts
//! surface as navigation errors and anti-automation responses as blocked
//! errors, so the expensive render only runs for pages that answered.

use facsimile::CloneError;
use rand::seq::SliceRandom;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Desktop User-Agent pool rotated across probes and browser launches.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
];

/// Markers that only appear on interstitial challenge pages.
const STRONG_CHALLENGE_MARKERS: &[&str] = &[
    "cf-challenge",
    "challenge-platform",
    "cf-browser-verification",
    "verify you are human",
    "checking your browser before accessing",
    "are you a robot",
    "unusual traffic from your computer",
    "attention required! | cloudflare",
    "px-captcha",
];

/// Markers that signal a challenge only on pages with little other text.
const WEAK_CHALLENGE_MARKERS: &[&str] = &["captcha", "access denied", "request blocked", "bot detection"];

const SHORT_PAGE_CHARS: usize = 1500;

/// Pick a User-Agent from the pool.
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Find a challenge marker in page text.
///
/// `text` is either raw HTML or visible text; weak markers only count when
/// the page is short, since full pages often mention captchas in forms.
pub fn challenge_marker(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    if let Some(marker) = strong_marker(&lower) {
        return Some(marker);
    }
    if lower.chars().count() <= SHORT_PAGE_CHARS {
        return WEAK_CHALLENGE_MARKERS
            .iter()
            .copied()
            .find(|m| lower.contains(m));
    }
    None
}

fn strong_marker(lower: &str) -> Option<&'static str> {
    STRONG_CHALLENGE_MARKERS
        .iter()
        .copied()
        .find(|m| lower.contains(m))
}

/// Outcome of a successful probe.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub status: u16,
    pub final_url: String,
}

/// Issues the preflight request.
#[derive(Clone)]
pub struct Prober {
    client: reqwest::Client,
}

impl Prober {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Probe `url`, classifying failures into capture-phase errors.
    pub async fn check(&self, url: &Url) -> Result<ProbeReport, CloneError> {
        let response = self
            .client
            .get(url.as_str())
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| CloneError::Navigation {
                url: url.to_string(),
                reason: describe_transport_error(&e),
            })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        debug!(url = %url, status, final_url = %final_url, "probe response");

        match status {
            401 | 403 | 429 => {
                return Err(CloneError::Blocked {
                    url: url.to_string(),
                    signal: format!("HTTP {status}"),
                })
            }
            404 | 410 => {
                return Err(CloneError::Navigation {
                    url: url.to_string(),
                    reason: format!("HTTP {status}"),
                })
            }
            _ => {}
        }

        let body = response.text().await.unwrap_or_default();
        let head: String = body.chars().take(64 * 1024).collect::<String>().to_lowercase();
        if let Some(marker) = strong_marker(&head) {
            return Err(CloneError::Blocked {
                url: url.to_string(),
                signal: format!("challenge page ({marker})"),
            });
        }

        Ok(ProbeReport { status, final_url })
    }
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else if e.is_redirect() {
        "too many redirects".to_string()
    } else {
        e.to_string()
    }
}
