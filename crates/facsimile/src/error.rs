//! Error taxonomy for a clone request.
//!
//! Capture- and consolidation-phase errors are fatal for the request and are
//! reported to the caller. Generation-phase errors always have a recovery path:
//! transport failures are retried, rejections escalate, and exhaustion falls
//! back to the deterministic artifact.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes surfaced to non-interactive callers.
pub mod error_codes {
    pub const NAVIGATION: &str = "E_NAVIGATION";
    pub const BLOCKED: &str = "E_BLOCKED";
    pub const RENDER_TIMEOUT: &str = "E_RENDER_TIMEOUT";
    pub const EMPTY_MANIFEST: &str = "E_EMPTY_MANIFEST";
    pub const BUNDLE_TOO_LARGE: &str = "E_BUNDLE_TOO_LARGE";
    pub const PROVIDER_TRANSPORT: &str = "E_PROVIDER_TRANSPORT";
    pub const VALIDATION_REJECTED: &str = "E_VALIDATION_REJECTED";
    pub const GENERATION_EXHAUSTED: &str = "E_GENERATION_EXHAUSTED";
    pub const INVALID_INPUT: &str = "E_INVALID_INPUT";
}

/// Pipeline phase an error originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Request,
    Capture,
    Consolidation,
    Generation,
}

/// Structured cause of a provider transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Timeout,
    RateLimited,
    Auth,
    Http(u16),
    Network,
    Decode,
    EmptyResponse,
}

impl ProviderErrorKind {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth,
            429 => Self::RateLimited,
            s => Self::Http(s),
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::Auth => write!(f, "authentication failed"),
            Self::Http(status) => write!(f, "HTTP {status}"),
            Self::Network => write!(f, "network error"),
            Self::Decode => write!(f, "undecodable response"),
            Self::EmptyResponse => write!(f, "empty response"),
        }
    }
}

/// All errors a clone request can produce.
#[derive(thiserror::Error, Debug, Clone)]
pub enum CloneError {
    #[error("navigation failed for {url}: {reason}")]
    Navigation { url: String, reason: String },

    #[error("page at {url} blocked automated access: {signal}")]
    Blocked { url: String, signal: String },

    #[error("page at {url} did not finish rendering within {timeout_ms}ms")]
    RenderTimeout { url: String, timeout_ms: u64 },

    #[error("captured page has no visually significant content")]
    EmptyManifest,

    #[error("bundle of {size} chars cannot fit the {budget} char budget even after truncation")]
    BundleTooLarge { size: usize, budget: usize },

    #[error("provider {provider} failed ({kind}): {message}")]
    ProviderTransport {
        provider: String,
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("candidate from {provider} rejected: {reasons}")]
    ValidationRejected { provider: String, reasons: String },

    #[error("generation exhausted after {attempts} attempts: {last_error}")]
    GenerationExhausted { attempts: u32, last_error: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CloneError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        use error_codes::*;
        match self {
            Self::Navigation { .. } => NAVIGATION,
            Self::Blocked { .. } => BLOCKED,
            Self::RenderTimeout { .. } => RENDER_TIMEOUT,
            Self::EmptyManifest => EMPTY_MANIFEST,
            Self::BundleTooLarge { .. } => BUNDLE_TOO_LARGE,
            Self::ProviderTransport { .. } => PROVIDER_TRANSPORT,
            Self::ValidationRejected { .. } => VALIDATION_REJECTED,
            Self::GenerationExhausted { .. } => GENERATION_EXHAUSTED,
            Self::InvalidInput(_) => INVALID_INPUT,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Self::Navigation { .. } | Self::Blocked { .. } | Self::RenderTimeout { .. } => {
                Phase::Capture
            }
            Self::EmptyManifest | Self::BundleTooLarge { .. } => Phase::Consolidation,
            Self::ProviderTransport { .. }
            | Self::ValidationRejected { .. }
            | Self::GenerationExhausted { .. } => Phase::Generation,
            Self::InvalidInput(_) => Phase::Request,
        }
    }

    /// Fatal errors end the request and are surfaced to the caller.
    pub fn is_fatal(&self) -> bool {
        self.phase() != Phase::Generation
    }
}

/// Convenience result type.
pub type FacsimileResult<T> = Result<T, CloneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_errors_are_fatal() {
        let err = CloneError::Blocked {
            url: "https://example.com".into(),
            signal: "HTTP 403".into(),
        };
        assert!(err.is_fatal());
        assert_eq!(err.code(), "E_BLOCKED");
        assert_eq!(err.phase(), Phase::Capture);
    }

    #[test]
    fn test_generation_errors_are_recoverable() {
        let err = CloneError::GenerationExhausted {
            attempts: 6,
            last_error: "timeout".into(),
        };
        assert!(!err.is_fatal());
        let err = CloneError::ProviderTransport {
            provider: "openai".into(),
            kind: ProviderErrorKind::RateLimited,
            message: "slow down".into(),
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(ProviderErrorKind::from_status(401), ProviderErrorKind::Auth);
        assert_eq!(ProviderErrorKind::from_status(429), ProviderErrorKind::RateLimited);
        assert_eq!(ProviderErrorKind::from_status(503), ProviderErrorKind::Http(503));
    }
}
