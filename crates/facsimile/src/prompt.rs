//! Prompt assembly: turn a consolidated bundle into a size-bounded,
//! provider-agnostic generation request.

use crate::consolidate::{ConsolidatedBundle, SkeletonTree};
use crate::error::CloneError;
use crate::types::{AssetKind, AssetRef, is_absolute_url};
use crate::validate::Strategy;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tracing::{debug, info};

/// Fidelity contract sent as the system instruction with every request.
pub const INSTRUCTION_CONTRACT: &str = "\
You are an expert front-end engineer. Reproduce the described web page as one static HTML document.

Rules:
1. Output a single complete, self-contained HTML document that starts with <!DOCTYPE html> and ends with </html>.
2. Put all CSS in one <style> element inside <head>. Do not include <script> elements or inline event handlers.
3. Preserve every color, gradient, font family and image URL exactly as given, character for character.
4. Reproduce all provided text. Never invent placeholder text and never use lorem ipsum.
5. Output only the document. No explanations, no Markdown fences, no commentary before or after it.";

const REFINE_CONTRACT: &str = "\
You are editing an existing static HTML document. Apply the requested change and keep everything else as it is.";

/// Tunables for prompt assembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblerConfig {
    /// Maximum payload size in characters.
    pub budget: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub seed: Option<u64>,
    /// Text kept for a collapsed subtree.
    pub collapsed_text_chars: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            budget: 120_000,
            temperature: 0.2,
            max_tokens: 8192,
            seed: None,
            collapsed_text_chars: 200,
        }
    }
}

/// Sampling parameters forwarded to providers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub seed: Option<u64>,
}

/// What truncation removed to meet the budget.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationReport {
    pub original_chars: usize,
    pub final_chars: usize,
    pub dropped_decorative_assets: usize,
    pub collapsed_subtrees: usize,
    pub removed_nodes: usize,
    pub dropped_font_faces: bool,
}

impl TruncationReport {
    pub fn is_lossless(&self) -> bool {
        self.dropped_decorative_assets == 0 && self.collapsed_subtrees == 0 && !self.dropped_font_faces
    }
}

/// Immutable request handed to the generation orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    system: String,
    payload: String,
    reduced_payload: String,
    params: GenerationParams,
    assets: Vec<AssetRef>,
    truncation: TruncationReport,
}

impl GenerationRequest {
    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Maximally truncated payload used at high escalation levels.
    pub fn reduced_payload(&self) -> &str {
        &self.reduced_payload
    }

    pub fn params(&self) -> GenerationParams {
        self.params
    }

    /// Asset references the candidate is expected to carry.
    pub fn assets(&self) -> &[AssetRef] {
        &self.assets
    }

    pub fn truncation(&self) -> &TruncationReport {
        &self.truncation
    }

    /// User message for one attempt.
    ///
    /// Level 0 sends the payload unchanged. Higher levels append an escalation
    /// note chosen by the last rejection's strategy. The payload was fitted
    /// with room for the longest note, so every message stays within the
    /// budget the request was assembled for.
    pub fn user_message(&self, escalation: u8, strategy: Option<Strategy>, reduced: bool) -> String {
        let mut message = if reduced {
            self.reduced_payload.clone()
        } else {
            self.payload.clone()
        };
        if escalation == 0 {
            return message;
        }
        message.push_str(&escalation_header(escalation));
        message.push_str(&escalation_note(strategy.unwrap_or(Strategy::Emphasize), &self.assets));
        if reduced {
            message.push_str(REDUCED_NOTE);
        }
        message
    }
}

const REDUCED_NOTE: &str = "\nSome deeply nested sections were condensed to their text. Keep that text and \
                            give those sections a simple structure.";

const ESCALATION_STRATEGIES: [Strategy; 4] = [
    Strategy::RetryAsIs,
    Strategy::Emphasize,
    Strategy::ForbidProse,
    Strategy::ResupplyAssets,
];

fn escalation_header(escalation: u8) -> String {
    format!("\n\n## IMPORTANT (retry {escalation})\n")
}

fn escalation_note(strategy: Strategy, assets: &[AssetRef]) -> String {
    match strategy {
        Strategy::RetryAsIs => "Your previous output was not a complete HTML document. Return the entire \
                                document, from <!DOCTYPE html> through the closing </html> tag."
            .to_string(),
        Strategy::Emphasize => "Your previous output was missing content. You must include the full page: \
                                every section, heading, paragraph, link and image from the skeleton, with \
                                its real text."
            .to_string(),
        Strategy::ForbidProse => "Your previous output contained commentary or placeholder text. Return \
                                  only the HTML document itself and use only the real text from the \
                                  skeleton."
            .to_string(),
        Strategy::ResupplyAssets => {
            let mut note = String::from(
                "Your previous output dropped image or font references. Every one of these URLs \
                 must appear verbatim in the document:",
            );
            for asset in assets {
                let _ = write!(note, "\n- {}", asset.url());
            }
            note
        }
    }
}

/// Characters held back from the payload budget for the longest escalation
/// note any retry may append.
fn escalation_reserve(assets: &[AssetRef]) -> usize {
    let longest_note = ESCALATION_STRATEGIES
        .iter()
        .map(|&strategy| char_len(&escalation_note(strategy, assets)))
        .max()
        .unwrap_or(0);
    char_len(&escalation_header(u8::MAX)) + longest_note + char_len(REDUCED_NOTE)
}

/// Build a generation request for a bundle, truncating to the budget.
///
/// Truncation applies in a fixed order and stops as soon as the payload
/// fits: decorative asset references, then deep low-information subtrees
/// from the deepest level up to depth 2, then the `@font-face` preamble.
/// Depth-1 nodes and subtrees carrying background or gradient declarations
/// are never removed.
pub fn assemble(bundle: &ConsolidatedBundle, config: &AssemblerConfig) -> Result<GenerationRequest, CloneError> {
    let assets: Vec<AssetRef> = bundle
        .assets()
        .iter()
        .filter(|a| !a.is_decorative())
        .cloned()
        .collect();
    let reserve = escalation_reserve(&assets);

    let mut state = Truncation::new(bundle, config);
    let original_chars = state.size();
    let fits = config.budget > reserve && state.fit(config.budget - reserve);
    let payload = state.render();
    let mut report = state.report.clone();
    report.original_chars = original_chars;
    report.final_chars = char_len(&payload);

    if !fits {
        return Err(CloneError::BundleTooLarge {
            size: report.final_chars + reserve,
            budget: config.budget,
        });
    }
    if !report.is_lossless() {
        info!(
            original = report.original_chars,
            truncated = report.final_chars,
            budget = config.budget,
            collapsed = report.collapsed_subtrees,
            "prompt truncated to budget"
        );
    }

    state.fit(0);
    let reduced = state.render();
    let reduced_payload = if char_len(&reduced) < char_len(&payload) {
        reduced
    } else {
        payload.clone()
    };

    debug!(
        payload_chars = report.final_chars,
        reserved_chars = reserve,
        reduced_chars = char_len(&reduced_payload),
        "assembled generation request"
    );

    Ok(GenerationRequest {
        system: INSTRUCTION_CONTRACT.to_string(),
        payload,
        reduced_payload,
        params: params(config),
        assets,
        truncation: report,
    })
}

/// Build a refinement request that edits an existing document.
pub fn assemble_refinement(
    html: &str,
    instruction: &str,
    config: &AssemblerConfig,
) -> Result<GenerationRequest, CloneError> {
    if html.trim().is_empty() {
        return Err(CloneError::InvalidInput("html must not be empty".into()));
    }
    if instruction.trim().is_empty() {
        return Err(CloneError::InvalidInput("instruction must not be empty".into()));
    }
    let mut payload = String::new();
    let _ = write!(
        payload,
        "## Current document\n```html\n{}\n```\n\n## Requested change\n{}\n",
        html.trim(),
        instruction.trim()
    );
    let assets = document_images(html);
    let size = char_len(&payload);
    if size + escalation_reserve(&assets) > config.budget {
        return Err(CloneError::BundleTooLarge {
            size,
            budget: config.budget,
        });
    }
    Ok(GenerationRequest {
        system: format!("{REFINE_CONTRACT}\n\n{INSTRUCTION_CONTRACT}"),
        reduced_payload: payload.clone(),
        truncation: TruncationReport {
            original_chars: size,
            final_chars: size,
            ..Default::default()
        },
        payload,
        params: params(config),
        assets,
    })
}

/// Absolute image URLs referenced by `<img src>` in a document.
pub fn document_images(html: &str) -> Vec<AssetRef> {
    let Ok(selector) = Selector::parse("img[src]") else {
        return Vec::new();
    };
    let doc = Html::parse_document(html);
    let mut seen = std::collections::HashSet::new();
    doc.select(&selector)
        .filter_map(|el| el.value().attr("src"))
        .filter(|src| is_absolute_url(src) && seen.insert(src.to_string()))
        .filter_map(|src| AssetRef::absolute(src, AssetKind::Image).ok())
        .collect()
}

fn params(config: &AssemblerConfig) -> GenerationParams {
    GenerationParams {
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        seed: config.seed,
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Working copy of a bundle being shrunk step by step.
struct Truncation<'a> {
    bundle: &'a ConsolidatedBundle,
    tree: SkeletonTree,
    assets: Vec<AssetRef>,
    font_faces: bool,
    collapse_from: u16,
    collapsed_text_chars: usize,
    report: TruncationReport,
}

impl<'a> Truncation<'a> {
    fn new(bundle: &'a ConsolidatedBundle, config: &AssemblerConfig) -> Self {
        let tree = bundle.tree().clone();
        let deepest = tree
            .preorder()
            .into_iter()
            .map(|i| tree.nodes[i].depth)
            .max()
            .unwrap_or(0);
        Self {
            bundle,
            tree,
            assets: bundle.assets().to_vec(),
            font_faces: true,
            collapse_from: deepest.saturating_sub(1),
            collapsed_text_chars: config.collapsed_text_chars,
            report: TruncationReport::default(),
        }
    }

    fn size(&self) -> usize {
        char_len(&self.render())
    }

    /// Apply truncation steps until the payload fits `budget`. A budget of
    /// zero runs every step.
    fn fit(&mut self, budget: usize) -> bool {
        if self.size() <= budget {
            return true;
        }

        let before = self.assets.len();
        self.assets.retain(|a| !a.is_decorative());
        self.report.dropped_decorative_assets += before - self.assets.len();
        if self.size() <= budget {
            return true;
        }

        while self.collapse_from >= 2 {
            let depth = self.collapse_from;
            self.collapse_from -= 1;
            if self.collapse_level(depth) > 0 && self.size() <= budget {
                return true;
            }
        }

        if self.font_faces && !self.tree.font_faces.is_empty() {
            self.font_faces = false;
            self.report.dropped_font_faces = true;
        }
        self.size() <= budget
    }

    fn collapse_level(&mut self, depth: u16) -> usize {
        let targets: Vec<usize> = self
            .tree
            .preorder()
            .into_iter()
            .filter(|&i| {
                let node = &self.tree.nodes[i];
                node.depth == depth
                    && !node.children.is_empty()
                    && !self.tree.has_protected_descendant(i)
            })
            .collect();
        for &index in &targets {
            self.report.removed_nodes += self.tree.collapse(index, self.collapsed_text_chars);
            self.report.collapsed_subtrees += 1;
        }
        targets.len()
    }

    fn render(&self) -> String {
        let meta = self.bundle.metadata();
        let viewport = self.bundle.viewport();
        let mut out = String::new();
        let _ = writeln!(out, "## Page");
        let _ = writeln!(out, "Source: {}", self.bundle.source_url());
        if let Some(title) = &meta.title {
            let _ = writeln!(out, "Title: {title}");
        }
        if let Some(color) = &meta.theme_color {
            let _ = writeln!(out, "Theme color: {color}");
        }
        if let Some(charset) = &meta.charset {
            let _ = writeln!(out, "Charset: {charset}");
        }
        if meta.dark_theme {
            let _ = writeln!(out, "Color scheme: dark");
        }
        let _ = writeln!(out, "Viewport: {}x{}", viewport.width, viewport.height);
        let _ = write!(
            out,
            "\n## Stylesheet\n```css\n{}```\n\n## Skeleton\n```html\n{}\n```\n",
            self.tree.render_css(self.font_faces),
            self.tree.render_html()
        );
        if !self.assets.is_empty() {
            let _ = writeln!(out, "\n## Assets");
            for asset in &self.assets {
                let _ = writeln!(out, "- {} {}", asset.kind(), asset.url());
            }
        }
        out
    }
}
