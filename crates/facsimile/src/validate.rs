//! Candidate validation: structural checks, content sufficiency, disallowed
//! markers and optional asset retention.

use crate::sanitize::strip_code_fences;
use crate::types::AssetRef;
use regex::Regex;
use scraper::{ElementRef, Html, Node};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

/// Tags counted as meaningful when they carry text (or always, for media
/// and controls).
const MEANINGFUL_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "div", "span", "img", "a", "button", "nav", "main",
    "section", "article",
];

const INVISIBLE_TAGS: &[&str] = &["script", "style", "noscript", "template", "head", "title"];

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\blorem ipsum\b|\bdolor sit amet\b|\[(?:insert|placeholder|your)[^\]]{0,40}\]|\{\{[^}]{0,40}\}\}|\byour (?:content|text|title|headline) here\b",
        )
        .unwrap_or_else(|e| panic!("invalid placeholder regex: {e}"))
    })
}

fn elision_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<!--\s*(?:\.\.\.|…|rest of|more|remaining|additional|other|repeat|similar)[^>]*-->")
            .unwrap_or_else(|e| panic!("invalid elision regex: {e}"))
    })
}

/// Thresholds for accepting a candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub min_text_chars: usize,
    pub min_elements: usize,
    /// When set, this fraction of required asset URLs must appear verbatim.
    pub strict_asset_fraction: Option<f32>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_text_chars: 100,
            min_elements: 10,
            strict_asset_fraction: None,
        }
    }
}

/// How the orchestrator should adjust the next attempt after a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    RetryAsIs,
    Emphasize,
    ResupplyAssets,
    ForbidProse,
}

/// Structured rejection reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    Malformed { detail: String },
    InsufficientContent { text_chars: usize, elements: usize },
    DisallowedContent { marker: String },
    AssetLoss { present: usize, required: usize },
}

impl Rejection {
    pub fn strategy(&self) -> Strategy {
        match self {
            Self::Malformed { .. } => Strategy::RetryAsIs,
            Self::InsufficientContent { .. } => Strategy::Emphasize,
            Self::DisallowedContent { .. } => Strategy::ForbidProse,
            Self::AssetLoss { .. } => Strategy::ResupplyAssets,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { detail } => write!(f, "malformed document: {detail}"),
            Self::InsufficientContent {
                text_chars,
                elements,
            } => write!(
                f,
                "insufficient content: {text_chars} visible chars, {elements} meaningful elements"
            ),
            Self::DisallowedContent { marker } => write!(f, "disallowed content: {marker}"),
            Self::AssetLoss { present, required } => {
                write!(f, "asset loss: {present} of {required} asset URLs present")
            }
        }
    }
}

/// Outcome of validating one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub accepted: bool,
    /// Sufficiency score in `[0, 1]`.
    pub score: f32,
    pub text_chars: usize,
    pub elements: usize,
    pub rejections: Vec<Rejection>,
}

impl Verdict {
    /// Strategy for the most severe rejection, if any.
    pub fn strategy(&self) -> Option<Strategy> {
        self.rejections.first().map(Rejection::strategy)
    }

    pub fn reasons(&self) -> String {
        self.rejections
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Scores candidate documents against a [`ValidatorConfig`].
#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate raw provider output. Surrounding code fences are ignored.
    ///
    /// Rejections are ordered by severity: structure, disallowed content,
    /// content sufficiency, asset retention.
    pub fn validate(&self, raw: &str, required_assets: &[AssetRef]) -> Verdict {
        let content = strip_code_fences(raw);
        let lower = content.to_ascii_lowercase();
        let mut rejections = Vec::new();

        if let Some(detail) = structural_problem(&lower) {
            rejections.push(Rejection::Malformed { detail });
            let verdict = Verdict {
                accepted: false,
                score: 0.0,
                text_chars: 0,
                elements: 0,
                rejections,
            };
            debug!(reasons = %verdict.reasons(), "candidate rejected");
            return verdict;
        }

        if let Some(marker) = prose_outside_document(&lower) {
            rejections.push(Rejection::DisallowedContent { marker });
        }

        let doc = Html::parse_document(content);
        let text = visible_text(&doc);
        let text_chars = text.chars().count();
        let elements = meaningful_elements(&doc);

        if let Some(found) = placeholder_re().find(&text) {
            rejections.push(Rejection::DisallowedContent {
                marker: format!("placeholder text \"{}\"", found.as_str()),
            });
        } else if let Some(found) = elision_re().find(content) {
            rejections.push(Rejection::DisallowedContent {
                marker: format!("elided content {}", found.as_str()),
            });
        }

        if text_chars < self.config.min_text_chars || elements < self.config.min_elements {
            rejections.push(Rejection::InsufficientContent {
                text_chars,
                elements,
            });
        }

        let mut asset_factor = 1.0f32;
        if let Some(fraction) = self.config.strict_asset_fraction {
            let required = required_assets.len();
            if required > 0 {
                let present = required_assets
                    .iter()
                    .filter(|a| {
                        content.contains(a.url()) || content.contains(&a.url().replace('&', "&amp;"))
                    })
                    .count();
                asset_factor = present as f32 / required as f32;
                if asset_factor < fraction {
                    rejections.push(Rejection::AssetLoss { present, required });
                }
            }
        }

        let score = sufficiency(text_chars, self.config.min_text_chars)
            * 0.5
            + sufficiency(elements, self.config.min_elements) * 0.5;
        let verdict = Verdict {
            accepted: rejections.is_empty(),
            score: (score * asset_factor).clamp(0.0, 1.0),
            text_chars,
            elements,
            rejections,
        };
        if verdict.accepted {
            debug!(score = verdict.score, text_chars, elements, "candidate accepted");
        } else {
            debug!(reasons = %verdict.reasons(), "candidate rejected");
        }
        verdict
    }
}

fn sufficiency(value: usize, minimum: usize) -> f32 {
    if minimum == 0 {
        return 1.0;
    }
    (value as f32 / minimum as f32).min(1.0)
}

fn structural_problem(lower: &str) -> Option<String> {
    if lower.trim().is_empty() {
        return Some("empty output".into());
    }
    if !lower.contains("<html") {
        return Some("missing <html> root".into());
    }
    if !lower.contains("<body") {
        return Some("missing <body>".into());
    }
    if !lower.contains("</html>") {
        return Some("document truncated before </html>".into());
    }
    None
}

fn prose_outside_document(lower: &str) -> Option<String> {
    let start = match (lower.find("<!doctype"), lower.find("<html")) {
        (Some(d), Some(h)) => d.min(h),
        (Some(d), None) => d,
        (None, Some(h)) => h,
        (None, None) => return None,
    };
    if !lower[..start].trim().is_empty() {
        return Some("prose before the document".into());
    }
    let end = lower.rfind("</html>")? + "</html>".len();
    if !lower[end..].trim().is_empty() {
        return Some("prose after the document".into());
    }
    None
}

fn visible_text(doc: &Html) -> String {
    let mut words = Vec::new();
    collect_text(doc.root_element(), &mut words);
    words.join(" ")
}

fn collect_text(element: ElementRef<'_>, words: &mut Vec<String>) {
    if INVISIBLE_TAGS.contains(&element.value().name()) {
        return;
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => words.extend(text.split_whitespace().map(str::to_string)),
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child) {
                    collect_text(el, words);
                }
            }
            _ => {}
        }
    }
}

fn meaningful_elements(doc: &Html) -> usize {
    doc.root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| {
            let name = el.value().name();
            if !MEANINGFUL_TAGS.contains(&name) {
                return false;
            }
            name == "img" || name == "button" || el.text().any(|t| !t.trim().is_empty())
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssetKind;

    fn full_document() -> String {
        let mut body = String::from("<header><nav><a href=\"/\">Home</a><a href=\"/about\">About</a></nav></header><main>");
        for i in 0..6 {
            body.push_str(&format!(
                "<section><h2>Feature {i}</h2><p>Feature {i} makes deployment faster and safer for every team.</p></section>"
            ));
        }
        body.push_str("<img src=\"https://example.com/hero.png\" alt=\"hero\"></main>");
        format!("<!DOCTYPE html><html><head><title>T</title><style>p{{color:red}}</style></head><body>{body}</body></html>")
    }

    #[test]
    fn test_accepts_full_document() {
        let v = Validator::default().validate(&full_document(), &[]);
        assert!(v.accepted, "{:?}", v.rejections);
        assert!(v.score > 0.99);
        assert!(v.elements >= 10);
    }

    #[test]
    fn test_accepts_fenced_document() {
        let fenced = format!("```html\n{}\n```", full_document());
        assert!(Validator::default().validate(&fenced, &[]).accepted);
    }

    #[test]
    fn test_rejects_too_few_elements() {
        let html = format!(
            "<html><body><p>{}</p></body></html>",
            "Plenty of visible text but only a single element carrying it. ".repeat(5)
        );
        let v = Validator::default().validate(&html, &[]);
        assert!(!v.accepted);
        assert!(matches!(v.rejections[0], Rejection::InsufficientContent { elements: 1, .. }));
        assert_eq!(v.strategy(), Some(Strategy::Emphasize));
        assert!(v.score < 1.0);
    }

    #[test]
    fn test_rejects_malformed() {
        let v = Validator::default().validate("<div>just a fragment</div>", &[]);
        assert_eq!(v.strategy(), Some(Strategy::RetryAsIs));
        assert_eq!(v.score, 0.0);
        let truncated = full_document().replace("</body></html>", "");
        let v = Validator::default().validate(&truncated, &[]);
        assert!(matches!(&v.rejections[0], Rejection::Malformed { detail } if detail.contains("truncated")));
    }

    #[test]
    fn test_rejects_prose_and_placeholders() {
        let wrapped = format!("Here is your page:\n{}", full_document());
        let v = Validator::default().validate(&wrapped, &[]);
        assert_eq!(v.strategy(), Some(Strategy::ForbidProse));

        let lorem = full_document().replace("Feature 3 makes", "Lorem ipsum dolor sit amet makes");
        let v = Validator::default().validate(&lorem, &[]);
        assert!(!v.accepted);
        assert!(matches!(&v.rejections[0], Rejection::DisallowedContent { marker } if marker.contains("placeholder")));

        let elided = full_document().replace("</main>", "<!-- rest of sections omitted --></main>");
        assert!(!Validator::default().validate(&elided, &[]).accepted);
    }

    #[test]
    fn test_strict_asset_fraction() {
        let validator = Validator::new(ValidatorConfig {
            strict_asset_fraction: Some(0.6),
            ..Default::default()
        });
        let hero = AssetRef::absolute("https://example.com/hero.png", AssetKind::Image).unwrap();
        let logo = AssetRef::absolute("https://example.com/logo.svg", AssetKind::Image).unwrap();
        let v = validator.validate(&full_document(), &[hero.clone(), logo]);
        assert!(!v.accepted);
        assert_eq!(v.rejections[0], Rejection::AssetLoss { present: 1, required: 2 });
        assert_eq!(v.strategy(), Some(Strategy::ResupplyAssets));
        assert!(validator.validate(&full_document(), &[hero]).accepted);
    }
}
