//! Core data types shared by every pipeline stage.

use crate::error::CloneError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Resolved computed-style declarations for one node, keyed by property name.
pub type Declarations = BTreeMap<String, String>;

/// URL schemes an asset reference may carry.
const ASSET_SCHEMES: &[&str] = &["http", "https", "data"];

/// Index of a node inside its manifest's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// What an asset reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    Font,
    Stylesheet,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Font => write!(f, "font"),
            Self::Stylesheet => write!(f, "stylesheet"),
        }
    }
}

/// An absolute, dereferenceable asset URL plus its kind.
///
/// The URL is checked at construction; there is no way to build an
/// `AssetRef` holding a relative or protocol-relative URL, including
/// through deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "AssetRefRepr")]
pub struct AssetRef {
    url: String,
    kind: AssetKind,
    decorative: bool,
}

#[derive(Deserialize)]
struct AssetRefRepr {
    url: String,
    kind: AssetKind,
    #[serde(default)]
    decorative: bool,
}

impl TryFrom<AssetRefRepr> for AssetRef {
    type Error = CloneError;

    fn try_from(repr: AssetRefRepr) -> Result<Self, Self::Error> {
        let asset = AssetRef::absolute(&repr.url, repr.kind)?;
        Ok(if repr.decorative {
            asset.into_decorative()
        } else {
            asset
        })
    }
}

impl AssetRef {
    /// Resolve a raw reference (`src`, `href`, `url(...)` body) against a base URL.
    ///
    /// Returns `None` for references that do not name a fetchable asset
    /// (empty, fragment-only, `javascript:`, `about:`, unparsable).
    pub fn resolve(base: &Url, raw: &str, kind: AssetKind) -> Option<Self> {
        let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }
        let resolved = base.join(trimmed).ok()?;
        if !ASSET_SCHEMES.contains(&resolved.scheme()) {
            return None;
        }
        Some(Self {
            url: resolved.to_string(),
            kind,
            decorative: false,
        })
    }

    /// Build a reference from a URL that must already be absolute.
    pub fn absolute(url: &str, kind: AssetKind) -> Result<Self, CloneError> {
        if !is_absolute_url(url) {
            return Err(CloneError::InvalidInput(format!(
                "asset URL is not absolute: {url}"
            )));
        }
        Ok(Self {
            url: url.to_string(),
            kind,
            decorative: false,
        })
    }

    /// Mark this reference as decorative (backgrounds, tiny icons).
    pub fn into_decorative(mut self) -> Self {
        self.decorative = true;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    pub fn is_decorative(&self) -> bool {
        self.decorative
    }
}

/// True when `url` parses as an absolute URL with an asset-capable scheme.
///
/// Protocol-relative (`//cdn/x.png`) and path-relative inputs are rejected.
pub fn is_absolute_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => ASSET_SCHEMES.contains(&parsed.scheme()),
        Err(_) => false,
    }
}

/// Bounding box of a rendered element, in CSS pixels. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Viewport used for capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

/// Page-level facts gathered alongside the node tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub theme_color: Option<String>,
    pub charset: Option<String>,
    pub viewport_meta: Option<String>,
    pub lang: Option<String>,
    pub dark_theme: bool,
    /// Custom properties declared on `:root`, e.g. `--brand` → `#ff6600`.
    pub css_variables: BTreeMap<String, String>,
    pub logo_candidates: Vec<String>,
}

/// Coarse visual role of an element, derived from its tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Layout,
    Heading,
    Text,
    Media,
    Control,
    Inline,
}

impl NodeRole {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "body" | "header" | "footer" | "nav" | "main" | "section" | "article" | "aside"
            | "div" | "form" | "ul" | "ol" | "table" | "thead" | "tbody" | "tr" | "figure" => {
                Self::Layout
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Self::Heading,
            "p" | "li" | "blockquote" | "pre" | "td" | "th" | "dd" | "dt" | "figcaption"
            | "label" | "caption" => Self::Text,
            "img" | "svg" | "picture" | "video" | "canvas" => Self::Media,
            "button" | "input" | "select" | "textarea" => Self::Control,
            _ => Self::Inline,
        }
    }
}

/// A run of text owned directly by a node.
///
/// `before` is the index of the child element the text precedes; a value
/// equal to the child count means the text trails every child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRun {
    pub before: u32,
    pub text: String,
}

/// Visual snapshot of one rendered element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleNode {
    pub id: NodeId,
    /// Non-owning back-reference used for lookup only.
    pub parent: Option<NodeId>,
    pub tag: String,
    pub role: NodeRole,
    pub depth: u16,
    pub geometry: Option<Rect>,
    pub style: Declarations,
    /// Whitelisted attributes (`src`, `alt`, `href`, ...), URLs already absolute.
    pub attributes: BTreeMap<String, String>,
    pub text: Vec<TextRun>,
    /// Sanitized verbatim markup for opaque elements such as inline `<svg>`.
    pub markup: Option<String>,
    pub children: Vec<NodeId>,
    pub assets: Vec<AssetRef>,
}

impl StyleNode {
    /// True when the node paints a background color, gradient, or image.
    pub fn has_background(&self) -> bool {
        let color = self
            .style
            .get("background-color")
            .map(|v| !is_transparent(v))
            .unwrap_or(false);
        let image = self
            .style
            .get("background-image")
            .map(|v| v.trim() != "none")
            .unwrap_or(false);
        let shorthand = self
            .style
            .get("background")
            .map(|v| !v.trim().is_empty() && v.trim() != "none" && !is_transparent(v))
            .unwrap_or(false);
        color || image || shorthand
    }

    /// True when a declaration carries a gradient function.
    pub fn has_gradient(&self) -> bool {
        self.style.values().any(|v| v.contains("gradient("))
    }

    /// Concatenated own text (not descendants).
    pub fn own_text(&self) -> String {
        self.text
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_visually_significant(&self) -> bool {
        let has_area = self.geometry.map(|g| g.area() > 0.0).unwrap_or(false);
        has_area
            || self.has_background()
            || self.text.iter().any(|r| !r.text.trim().is_empty())
            || !self.assets.is_empty()
            || self.markup.is_some()
    }
}

fn is_transparent(value: &str) -> bool {
    let v = value.trim().replace(' ', "");
    v == "transparent" || v == "rgba(0,0,0,0)" || v.is_empty()
}

/// The extracted structural and style description of a rendered page.
///
/// Nodes live in an arena indexed by [`NodeId`]; the root is always
/// `NodeId::ROOT`. Built once by [`crate::manifest::ManifestBuilder`] and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ManifestRepr")]
pub struct VisualManifest {
    pub(crate) source_url: String,
    pub(crate) final_url: String,
    pub(crate) viewport: Viewport,
    pub(crate) metadata: PageMetadata,
    pub(crate) nodes: Vec<StyleNode>,
    pub(crate) stylesheets: Vec<String>,
    pub(crate) assets: Vec<AssetRef>,
}

#[derive(Deserialize)]
struct ManifestRepr {
    source_url: String,
    final_url: String,
    viewport: Viewport,
    metadata: PageMetadata,
    nodes: Vec<StyleNode>,
    stylesheets: Vec<String>,
    assets: Vec<AssetRef>,
}

impl TryFrom<ManifestRepr> for VisualManifest {
    type Error = CloneError;

    fn try_from(repr: ManifestRepr) -> Result<Self, Self::Error> {
        let manifest = VisualManifest {
            source_url: repr.source_url,
            final_url: repr.final_url,
            viewport: repr.viewport,
            metadata: repr.metadata,
            nodes: repr.nodes,
            stylesheets: repr.stylesheets,
            assets: repr.assets,
        };
        manifest.check_tree()?;
        Ok(manifest)
    }
}

impl VisualManifest {
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn final_url(&self) -> &str {
        &self.final_url
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn metadata(&self) -> &PageMetadata {
        &self.metadata
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.title.as_deref()
    }

    pub fn nodes(&self) -> &[StyleNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&StyleNode> {
        self.nodes.get(id.index())
    }

    pub fn root(&self) -> &StyleNode {
        &self.nodes[NodeId::ROOT.index()]
    }

    pub fn stylesheets(&self) -> &[String] {
        &self.stylesheets
    }

    pub fn assets(&self) -> &[AssetRef] {
        &self.assets
    }

    /// Node ids in document (pre-)order, children visited in their stored order.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![NodeId::ROOT];
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(node) = self.node(id) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        order
    }

    /// True when at least one node (other than a bare root box) carries content.
    pub fn has_significant_content(&self) -> bool {
        let root = self.root();
        let root_content = root.has_background()
            || root.text.iter().any(|r| !r.text.trim().is_empty())
            || !root.assets.is_empty();
        root_content
            || self
                .nodes
                .iter()
                .skip(1)
                .any(StyleNode::is_visually_significant)
    }

    /// Verify arena invariants: root at index 0 without parent, every other
    /// node reachable exactly once through its parent's child list.
    pub(crate) fn check_tree(&self) -> Result<(), CloneError> {
        let invalid = |msg: String| Err(CloneError::InvalidInput(format!("malformed manifest: {msg}")));
        let Some(root) = self.nodes.first() else {
            return invalid("no root node".into());
        };
        if root.parent.is_some() || root.id != NodeId::ROOT {
            return invalid("root must be node 0 without a parent".into());
        }
        let mut seen = vec![false; self.nodes.len()];
        seen[0] = true;
        for (index, node) in self.nodes.iter().enumerate() {
            if node.id.index() != index {
                return invalid(format!("node at {index} carries id {}", node.id));
            }
            for child in &node.children {
                let Some(child_node) = self.nodes.get(child.index()) else {
                    return invalid(format!("dangling child {child}"));
                };
                if child_node.parent != Some(node.id) || seen[child.index()] {
                    return invalid(format!("{child} is not owned exactly once by {}", node.id));
                }
                seen[child.index()] = true;
            }
        }
        if let Some(orphan) = seen.iter().position(|s| !s) {
            return invalid(format!("node n{orphan} has no owner"));
        }
        Ok(())
    }
}

/// Provenance of the terminal artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Generated,
    Fallback,
}

/// Raw text returned by a provider for one attempt.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateArtifact {
    pub provider: String,
    pub attempt: u32,
    pub escalation_level: u8,
    pub latency_ms: u64,
    pub content: String,
}

/// Terminal artifact of a clone request; the only object exposed externally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneResult {
    pub html: String,
    pub provenance: Provenance,
    pub score: f32,
    /// Asset URLs surfaced for diagnostics.
    pub images: Vec<String>,
    /// Provider that produced an accepted candidate, if any.
    pub provider: Option<String>,
    /// Provider invocations made before the result was settled.
    pub attempts: u32,
}
