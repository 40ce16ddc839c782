//! Runtime configuration, read from the environment.
//!
//! Every tunable has a default and environment variables override it. The
//! command line only adds `--log-json` and `--verbose` for logging and the
//! `serve` listen address. Provider credentials are the only required
//! input, and only for generation.

use crate::capture::CaptureConfig;
use facsimile::{AssemblerConfig, RetryPolicy, ValidatorConfig};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Supported generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Gemini,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [Self::Anthropic, Self::Gemini, Self::OpenAi];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }

    pub fn key_var(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    fn env_prefix(self) -> &'static str {
        match self {
            Self::Anthropic => "FACSIMILE_ANTHROPIC",
            Self::OpenAi => "FACSIMILE_OPENAI",
            Self::Gemini => "FACSIMILE_GEMINI",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-3-5-sonnet-20241022",
            Self::OpenAi => "gpt-4.1",
            Self::Gemini => "gemini-2.0-flash",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com",
            Self::OpenAi => "https://api.openai.com",
            Self::Gemini => "https://generativelanguage.googleapis.com",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "gpt" => Ok(Self::OpenAi),
            "gemini" | "google" => Ok(Self::Gemini),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// One enabled provider.
#[derive(Clone, Serialize)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    #[serde(skip)]
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("kind", &self.kind)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Generation driver tunables.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Per provider call.
    pub call_timeout: Duration,
    /// Outer deadline for the whole generate/validate loop.
    pub deadline: Duration,
    /// Race the first N providers; 0 or 1 keeps the serial policy.
    pub fan_out: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(120),
            deadline: Duration::from_secs(300),
            fan_out: 0,
        }
    }
}

/// Everything the runtime needs to build a pipeline.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub capture: CaptureConfig,
    pub assembler: AssemblerConfig,
    pub validator: ValidatorConfig,
    pub retry: RetryPolicy,
    pub generation: GenerationConfig,
    /// Enabled providers in priority order.
    pub providers: Vec<ProviderSettings>,
    pub chromium_path: Option<PathBuf>,
    /// Launch Chromium with `--no-sandbox`. Off unless requested.
    pub no_sandbox: bool,
    pub log_json: bool,
}

impl RuntimeConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to
    /// its value. Unparsable values fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env { lookup: &lookup };
        let mut config = Self::default();

        let capture = &mut config.capture;
        capture.navigation_timeout = env.secs("FACSIMILE_NAV_TIMEOUT_SECS", capture.navigation_timeout);
        capture.settle_timeout = env.secs("FACSIMILE_SETTLE_TIMEOUT_SECS", capture.settle_timeout);
        capture.hard_timeout = capture.navigation_timeout + capture.settle_timeout + Duration::from_secs(15);
        capture.limits.max_depth = env.parse("FACSIMILE_MAX_DEPTH", capture.limits.max_depth);
        capture.limits.max_nodes = env.parse("FACSIMILE_MAX_NODES", capture.limits.max_nodes);
        capture.limits.max_children = env.parse("FACSIMILE_MAX_CHILDREN", capture.limits.max_children);
        capture.viewport.width = env.parse("FACSIMILE_VIEWPORT_WIDTH", capture.viewport.width);
        capture.viewport.height = env.parse("FACSIMILE_VIEWPORT_HEIGHT", capture.viewport.height);
        capture.probe = !env.flag("FACSIMILE_NO_PROBE");

        let assembler = &mut config.assembler;
        assembler.budget = env.parse("FACSIMILE_PROMPT_BUDGET", assembler.budget);
        assembler.temperature = env.parse("FACSIMILE_TEMPERATURE", assembler.temperature);
        assembler.max_tokens = env.parse("FACSIMILE_MAX_TOKENS", assembler.max_tokens);
        assembler.seed = env.string("FACSIMILE_SEED").and_then(|s| s.parse().ok());

        let validator = &mut config.validator;
        validator.min_text_chars = env.parse("FACSIMILE_MIN_TEXT_CHARS", validator.min_text_chars);
        validator.min_elements = env.parse("FACSIMILE_MIN_ELEMENTS", validator.min_elements);
        validator.strict_asset_fraction = env
            .string("FACSIMILE_STRICT_ASSET_FRACTION")
            .and_then(|s| s.parse::<f32>().ok())
            .filter(|f| (0.0..=1.0).contains(f));

        let retry = &mut config.retry;
        retry.attempt_cap = env.parse("FACSIMILE_ATTEMPT_CAP", retry.attempt_cap).max(1);
        retry.escalation_ceiling = env.parse("FACSIMILE_ESCALATION_CEILING", retry.escalation_ceiling);
        retry.reduced_scope_threshold =
            env.parse("FACSIMILE_REDUCED_SCOPE_THRESHOLD", retry.reduced_scope_threshold);
        retry.backoff_base = env.millis("FACSIMILE_BACKOFF_BASE_MS", retry.backoff_base);
        retry.backoff_cap = env.millis("FACSIMILE_BACKOFF_CAP_MS", retry.backoff_cap);

        let generation = &mut config.generation;
        generation.call_timeout = env.secs("FACSIMILE_CALL_TIMEOUT_SECS", generation.call_timeout);
        generation.deadline = env.secs("FACSIMILE_DEADLINE_SECS", generation.deadline);
        generation.fan_out = env.parse("FACSIMILE_FAN_OUT", generation.fan_out);

        config.providers = env.providers();
        config.chromium_path = env.string("FACSIMILE_CHROMIUM_PATH").map(PathBuf::from);
        config.no_sandbox = env.flag("FACSIMILE_NO_SANDBOX");
        config.log_json = env.flag("FACSIMILE_LOG_JSON");
        config
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, name: &str, default_value: T) -> T {
        self.string(name)
            .and_then(|v| v.parse::<T>().ok())
            .unwrap_or(default_value)
    }

    fn secs(&self, name: &str, default_value: Duration) -> Duration {
        self.string(name)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(default_value)
    }

    fn millis(&self, name: &str, default_value: Duration) -> Duration {
        self.string(name)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(default_value)
    }

    fn flag(&self, name: &str) -> bool {
        matches!(
            self.string(name).map(|v| v.to_ascii_lowercase()).as_deref(),
            Some("1" | "true" | "yes" | "on")
        )
    }

    /// Providers in `FACSIMILE_PROVIDERS` order (default anthropic, gemini,
    /// openai), keeping only those with a key.
    fn providers(&self) -> Vec<ProviderSettings> {
        let order: Vec<ProviderKind> = match self.string("FACSIMILE_PROVIDERS") {
            Some(list) => list
                .split(',')
                .filter_map(|name| match name.parse::<ProviderKind>() {
                    Ok(kind) => Some(kind),
                    Err(e) => {
                        tracing::warn!("ignoring provider: {e}");
                        None
                    }
                })
                .collect(),
            None => ProviderKind::ALL.to_vec(),
        };

        let mut providers: Vec<ProviderSettings> = Vec::new();
        for kind in order {
            if providers.iter().any(|p| p.kind == kind) {
                continue;
            }
            let Some(api_key) = self.string(kind.key_var()) else {
                continue;
            };
            let prefix = kind.env_prefix();
            providers.push(ProviderSettings {
                kind,
                api_key,
                model: self
                    .string(&format!("{prefix}_MODEL"))
                    .unwrap_or_else(|| kind.default_model().to_string()),
                base_url: self
                    .string(&format!("{prefix}_BASE_URL"))
                    .unwrap_or_else(|| kind.default_base_url().to_string())
                    .trim_end_matches('/')
                    .to_string(),
            });
        }
        providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> RuntimeConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RuntimeConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]);
        assert!(c.providers.is_empty());
        assert_eq!(c.capture.navigation_timeout, Duration::from_secs(30));
        assert_eq!(c.capture.hard_timeout, Duration::from_secs(55));
        assert_eq!(c.assembler.budget, 120_000);
        assert_eq!(c.retry.attempt_cap, 3);
        assert_eq!(c.generation.deadline, Duration::from_secs(300));
        assert_eq!(c.validator.strict_asset_fraction, None);
        assert!(c.capture.probe);
        assert!(!c.no_sandbox);
        assert!(!c.log_json);
    }

    #[test]
    fn test_default_priority_keeps_keyed_providers() {
        let c = config(&[("OPENAI_API_KEY", "sk-1"), ("ANTHROPIC_API_KEY", "ak-1")]);
        let kinds: Vec<_> = c.providers.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![ProviderKind::Anthropic, ProviderKind::OpenAi]);
        assert_eq!(c.providers[0].model, "claude-3-5-sonnet-20241022");
        assert_eq!(c.providers[1].base_url, "https://api.openai.com");
    }

    #[test]
    fn test_explicit_priority_and_overrides() {
        let c = config(&[
            ("FACSIMILE_PROVIDERS", "openai, gemini, bogus, openai"),
            ("OPENAI_API_KEY", "sk-1"),
            ("GEMINI_API_KEY", "g-1"),
            ("ANTHROPIC_API_KEY", "ak-1"),
            ("FACSIMILE_GEMINI_MODEL", "gemini-2.5-pro"),
            ("FACSIMILE_OPENAI_BASE_URL", "http://127.0.0.1:9999/"),
        ]);
        let kinds: Vec<_> = c.providers.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![ProviderKind::OpenAi, ProviderKind::Gemini]);
        assert_eq!(c.providers[0].base_url, "http://127.0.0.1:9999");
        assert_eq!(c.providers[1].model, "gemini-2.5-pro");
    }

    #[test]
    fn test_tunables_and_bad_values() {
        let c = config(&[
            ("FACSIMILE_NAV_TIMEOUT_SECS", "5"),
            ("FACSIMILE_SETTLE_TIMEOUT_SECS", "2"),
            ("FACSIMILE_ATTEMPT_CAP", "0"),
            ("FACSIMILE_PROMPT_BUDGET", "not-a-number"),
            ("FACSIMILE_STRICT_ASSET_FRACTION", "0.6"),
            ("FACSIMILE_FAN_OUT", "2"),
            ("FACSIMILE_NO_PROBE", "true"),
            ("FACSIMILE_LOG_JSON", "1"),
            ("FACSIMILE_NO_SANDBOX", "yes"),
        ]);
        assert_eq!(c.capture.hard_timeout, Duration::from_secs(22));
        assert_eq!(c.retry.attempt_cap, 1);
        assert_eq!(c.assembler.budget, 120_000);
        assert_eq!(c.validator.strict_asset_fraction, Some(0.6));
        assert_eq!(c.generation.fan_out, 2);
        assert!(!c.capture.probe);
        assert!(c.no_sandbox);
        assert!(c.log_json);
    }

    #[test]
    fn test_debug_redacts_keys() {
        let c = config(&[("ANTHROPIC_API_KEY", "secret-key")]);
        let dump = format!("{:?}", c.providers);
        assert!(!dump.contains("secret-key"));
        assert!(dump.contains("redacted"));
    }
}
