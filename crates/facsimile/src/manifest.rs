//! ManifestBuilder for incrementally constructing a VisualManifest.

use crate::error::CloneError;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Bounds that keep a manifest's payload tractable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureLimits {
    pub max_depth: u16,
    pub max_nodes: usize,
    pub max_children: usize,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            max_depth: 48,
            max_nodes: 4000,
            max_children: 300,
        }
    }
}

/// Node content supplied by the capture walker.
#[derive(Debug, Clone, Default)]
pub struct NodeDraft {
    pub tag: String,
    pub geometry: Option<Rect>,
    pub style: Declarations,
    pub attributes: BTreeMap<String, String>,
    pub markup: Option<String>,
    pub assets: Vec<AssetRef>,
}

impl NodeDraft {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn with_style(mut self, property: &str, value: &str) -> Self {
        self.style.insert(property.to_string(), value.to_string());
        self
    }

    pub fn with_geometry(mut self, width: f64, height: f64) -> Self {
        self.geometry = Some(Rect {
            x: 0.0,
            y: 0.0,
            width,
            height,
        });
        self
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_asset(mut self, asset: AssetRef) -> Self {
        self.assets.push(asset);
        self
    }
}

/// Builder for constructing a VisualManifest incrementally.
///
/// Nodes are appended in document order; the first node added is the root.
/// Additions that would exceed the configured [`CaptureLimits`] are refused
/// and counted in [`ManifestBuilder::pruned`].
pub struct ManifestBuilder {
    source_url: String,
    final_url: String,
    viewport: Viewport,
    metadata: PageMetadata,
    limits: CaptureLimits,
    nodes: Vec<StyleNode>,
    stylesheets: Vec<String>,
    assets: Vec<AssetRef>,
    seen_assets: HashSet<String>,
    pruned: usize,
}

impl ManifestBuilder {
    /// Create a new builder for the given page.
    pub fn new(source_url: &str, final_url: &str, viewport: Viewport, limits: CaptureLimits) -> Self {
        Self {
            source_url: source_url.to_string(),
            final_url: final_url.to_string(),
            viewport,
            metadata: PageMetadata::default(),
            limits,
            nodes: Vec::new(),
            stylesheets: Vec::new(),
            assets: Vec::new(),
            seen_assets: HashSet::new(),
            pruned: 0,
        }
    }

    pub fn set_metadata(&mut self, metadata: PageMetadata) {
        self.metadata = metadata;
    }

    /// Record a raw stylesheet text block (URLs must already be absolute).
    pub fn add_stylesheet(&mut self, css: String) {
        if !css.trim().is_empty() {
            self.stylesheets.push(css);
        }
    }

    /// Register a page-level asset not attached to any node (fonts, sheets).
    pub fn add_page_asset(&mut self, asset: AssetRef) {
        if self.seen_assets.insert(asset.url().to_string()) {
            self.assets.push(asset);
        }
    }

    /// Add the root node. Replaces nothing: calling twice is an error.
    pub fn add_root(&mut self, draft: NodeDraft) -> Result<NodeId, CloneError> {
        if !self.nodes.is_empty() {
            return Err(CloneError::InvalidInput("manifest root already set".into()));
        }
        Ok(self.push(None, 0, draft))
    }

    /// Add a child under `parent`, or `None` when a limit refuses it.
    pub fn add_child(&mut self, parent: NodeId, draft: NodeDraft) -> Option<NodeId> {
        let (depth, breadth) = {
            let p = self.nodes.get(parent.index())?;
            (p.depth + 1, p.children.len())
        };
        if depth > self.limits.max_depth
            || breadth >= self.limits.max_children
            || self.nodes.len() >= self.limits.max_nodes
        {
            self.pruned += 1;
            return None;
        }
        let id = self.push(Some(parent), depth, draft);
        self.nodes[parent.index()].children.push(id);
        Some(id)
    }

    /// Append a text run to `node`, positioned after its current children.
    pub fn add_text(&mut self, node: NodeId, text: &str) {
        let collapsed = collapse_whitespace(text);
        if collapsed.is_empty() {
            return;
        }
        if let Some(n) = self.nodes.get_mut(node.index()) {
            let before = n.children.len() as u32;
            match n.text.last_mut() {
                Some(last) if last.before == before => {
                    last.text.push(' ');
                    last.text.push_str(&collapsed);
                }
                _ => n.text.push(TextRun {
                    before,
                    text: collapsed,
                }),
            }
        }
    }

    /// Number of nodes refused by limits so far.
    pub fn pruned(&self) -> usize {
        self.pruned
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Finish the manifest. Fails if no root was added.
    pub fn build(self) -> Result<VisualManifest, CloneError> {
        if self.nodes.is_empty() {
            return Err(CloneError::EmptyManifest);
        }
        let manifest = VisualManifest {
            source_url: self.source_url,
            final_url: self.final_url,
            viewport: self.viewport,
            metadata: self.metadata,
            nodes: self.nodes,
            stylesheets: self.stylesheets,
            assets: self.assets,
        };
        manifest.check_tree()?;
        Ok(manifest)
    }

    fn push(&mut self, parent: Option<NodeId>, depth: u16, draft: NodeDraft) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        for asset in &draft.assets {
            if self.seen_assets.insert(asset.url().to_string()) {
                self.assets.push(asset.clone());
            }
        }
        let role = NodeRole::from_tag(&draft.tag);
        self.nodes.push(StyleNode {
            id,
            parent,
            tag: draft.tag,
            role,
            depth,
            geometry: draft.geometry,
            style: draft.style,
            attributes: draft.attributes,
            text: Vec::new(),
            markup: draft.markup,
            children: Vec::new(),
            assets: draft.assets,
        });
        id
    }
}

/// Collapse runs of whitespace to single spaces and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
