//! Consolidation: merge per-node computed styles into one deduplicated
//! stylesheet plus a class-annotated HTML skeleton.
//!
//! Every node with captured declarations references exactly one synthetic
//! class (`fx-N`). Nodes with identical declaration sets share a class, so
//! each class has exactly one rule and rules never compete in the cascade.
//! Rules are numbered and emitted in document order of first use.

use crate::css::{escape_for_style_element, extract_blocks, serialize_declarations};
use crate::error::CloneError;
use crate::sanitize::strip_active_content;
use crate::types::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Emitted before any node rule. Capture only records non-default values,
/// so user-agent margins must be neutralized for recorded zeros to hold.
pub const RESET_CSS: &str = "*,*::before,*::after{margin:0;padding:0;box-sizing:border-box;}";

/// Attributes carried from the manifest into the skeleton, in their
/// canonical case. Captured names match case-insensitively.
const ALLOWED_ATTRIBUTES: &[&str] = &[
    "src", "alt", "href", "title", "width", "height", "type", "placeholder", "value", "colspan",
    "rowspan", "role", "aria-label", "lang", "dir", "for", "name", "viewBox", "xmlns", "fill",
    "stroke", "preserveAspectRatio",
];

/// Tags that must never appear in a static artifact.
const FORBIDDEN_TAGS: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "noscript", "template", "link", "meta", "base",
];

const VOID_TAGS: &[&str] = &[
    "area", "br", "col", "hr", "img", "input", "source", "track", "wbr",
];

/// One deduplicated rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssRule {
    pub class: String,
    pub declarations: String,
}

/// A skeleton element mirroring a manifest node.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonNode {
    pub tag: String,
    pub depth: u16,
    /// Index into [`SkeletonTree::rules`].
    pub rule: Option<usize>,
    pub attributes: BTreeMap<String, String>,
    pub text: Vec<TextRun>,
    pub markup: Option<String>,
    pub children: Vec<usize>,
    /// Carries background or gradient declarations; never collapsed away.
    pub protected: bool,
}

/// Structured form of the bundle, kept so later stages can truncate and
/// re-render without re-parsing HTML.
#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonTree {
    pub nodes: Vec<SkeletonNode>,
    pub rules: Vec<CssRule>,
    pub root_variables: Option<String>,
    pub font_faces: Vec<String>,
}

impl SkeletonTree {
    /// Render the stylesheet for the nodes still reachable from the root.
    pub fn render_css(&self, include_font_faces: bool) -> String {
        let mut css = String::from(RESET_CSS);
        css.push('\n');
        if let Some(vars) = &self.root_variables {
            css.push_str(vars);
            css.push('\n');
        }
        if include_font_faces {
            for block in &self.font_faces {
                css.push_str(block);
                css.push('\n');
            }
        }
        let mut emitted = HashSet::new();
        for index in self.preorder() {
            if let Some(rule_index) = self.nodes[index].rule {
                if emitted.insert(rule_index) {
                    let rule = &self.rules[rule_index];
                    css.push('.');
                    css.push_str(&rule.class);
                    css.push('{');
                    css.push_str(&rule.declarations);
                    css.push_str("}\n");
                }
            }
        }
        css
    }

    /// Render the `<body>` skeleton.
    pub fn render_html(&self) -> String {
        let mut out = String::new();
        if self.nodes.is_empty() {
            return "<body></body>".to_string();
        }
        let wrap = self.nodes[0].tag != "body";
        if wrap {
            out.push_str("<body>");
        }
        self.write_node(0, &mut out);
        if wrap {
            out.push_str("</body>");
        }
        out
    }

    /// Indices reachable from the root, in document order.
    pub fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        if self.nodes.is_empty() {
            return order;
        }
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            order.push(index);
            stack.extend(self.nodes[index].children.iter().rev().copied());
        }
        order
    }

    /// Whether any node strictly below `index` is protected.
    pub fn has_protected_descendant(&self, index: usize) -> bool {
        let mut stack: Vec<usize> = self.nodes[index].children.clone();
        while let Some(i) = stack.pop() {
            if self.nodes[i].protected {
                return true;
            }
            stack.extend(self.nodes[i].children.iter().copied());
        }
        false
    }

    /// Replace the subtree under `index` by its flattened text, capped at
    /// `max_chars`. Returns the number of descendants removed.
    pub fn collapse(&mut self, index: usize, max_chars: usize) -> usize {
        let mut parts = Vec::new();
        let mut removed = 0;
        let mut stack = vec![index];
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i];
            if i != index {
                removed += 1;
            }
            for run in &node.text {
                parts.push(run.text.clone());
            }
            stack.extend(node.children.iter().rev().copied());
        }
        let mut text = parts.join(" ");
        if text.chars().count() > max_chars {
            text = text.chars().take(max_chars).collect::<String>();
            text.push('…');
        }
        let node = &mut self.nodes[index];
        node.children.clear();
        node.markup = None;
        node.text = if text.is_empty() {
            Vec::new()
        } else {
            vec![TextRun { before: 0, text }]
        };
        removed
    }

    fn write_node(&self, index: usize, out: &mut String) {
        let node = &self.nodes[index];
        out.push('<');
        out.push_str(&node.tag);
        if let Some(rule) = node.rule {
            out.push_str(" class=\"");
            out.push_str(&self.rules[rule].class);
            out.push('"');
        }
        for (name, value) in &node.attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape_attr(value));
            out.push('"');
        }
        out.push('>');
        if VOID_TAGS.contains(&node.tag.as_str()) {
            return;
        }
        if let Some(markup) = &node.markup {
            out.push_str(markup);
        } else {
            let mut runs = node.text.iter().peekable();
            for (position, child) in node.children.iter().enumerate() {
                while let Some(run) = runs.next_if(|r| r.before as usize <= position) {
                    out.push_str(&escape_text(&run.text));
                }
                self.write_node(*child, out);
            }
            for run in runs {
                out.push_str(&escape_text(&run.text));
            }
        }
        out.push_str("</");
        out.push_str(&node.tag);
        out.push('>');
    }
}

/// Normalized CSS plus skeleton for one clone request.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedBundle {
    css: String,
    skeleton: String,
    assets: Vec<AssetRef>,
    source_url: String,
    viewport: Viewport,
    metadata: PageMetadata,
    tree: SkeletonTree,
}

impl ConsolidatedBundle {
    pub fn css(&self) -> &str {
        &self.css
    }

    pub fn skeleton(&self) -> &str {
        &self.skeleton
    }

    pub fn assets(&self) -> &[AssetRef] {
        &self.assets
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
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

    pub fn tree(&self) -> &SkeletonTree {
        &self.tree
    }

    /// Asset URLs in manifest order.
    pub fn asset_urls(&self) -> Vec<String> {
        self.assets.iter().map(|a| a.url().to_string()).collect()
    }
}

/// Consolidate a manifest into a bundle.
///
/// Deterministic: the same manifest always yields a byte-identical bundle.
pub fn consolidate(manifest: &VisualManifest) -> Result<ConsolidatedBundle, CloneError> {
    if !manifest.has_significant_content() {
        return Err(CloneError::EmptyManifest);
    }

    let mut rules: Vec<CssRule> = Vec::new();
    let mut by_declarations: HashMap<String, usize> = HashMap::new();
    let mut node_rule: Vec<Option<usize>> = vec![None; manifest.nodes().len()];

    for id in manifest.preorder() {
        let Some(node) = manifest.node(id) else {
            continue;
        };
        let declarations = serialize_declarations(&node.style);
        if declarations.is_empty() {
            continue;
        }
        let index = *by_declarations.entry(declarations.clone()).or_insert_with(|| {
            rules.push(CssRule {
                class: format!("fx-{}", rules.len()),
                declarations,
            });
            rules.len() - 1
        });
        node_rule[id.index()] = Some(index);
    }

    let nodes = manifest
        .nodes()
        .iter()
        .map(|node| SkeletonNode {
            tag: skeleton_tag(&node.tag),
            depth: node.depth,
            rule: node_rule[node.id.index()],
            attributes: filter_attributes(&node.attributes),
            text: node.text.clone(),
            markup: node.markup.as_deref().map(strip_active_content),
            children: node
                .children
                .iter()
                .filter(|c| {
                    manifest
                        .node(**c)
                        .map(|n| !FORBIDDEN_TAGS.contains(&n.tag.as_str()))
                        .unwrap_or(false)
                })
                .map(|c| c.index())
                .collect(),
            protected: node.has_background() || node.has_gradient(),
        })
        .collect();

    let root_variables = root_variables(&manifest.metadata().css_variables);

    let mut seen_faces = HashSet::new();
    let font_faces = manifest
        .stylesheets()
        .iter()
        .flat_map(|sheet| extract_blocks(sheet, "@font-face"))
        .map(|block| escape_for_style_element(&block))
        .filter(|block| seen_faces.insert(block.clone()))
        .collect();

    let tree = SkeletonTree {
        nodes,
        rules,
        root_variables,
        font_faces,
    };
    let css = tree.render_css(true);
    let skeleton = tree.render_html();

    debug!(
        nodes = manifest.nodes().len(),
        rules = tree.rules.len(),
        css_chars = css.len(),
        skeleton_chars = skeleton.len(),
        "consolidated manifest"
    );

    Ok(ConsolidatedBundle {
        css,
        skeleton,
        assets: manifest.assets().to_vec(),
        source_url: manifest.final_url().to_string(),
        viewport: manifest.viewport(),
        metadata: manifest.metadata().clone(),
        tree,
    })
}

/// Build the deterministic fallback artifact: skeleton plus inlined CSS.
pub fn render_document(bundle: &ConsolidatedBundle) -> String {
    let metadata = bundle.metadata();
    let lang = metadata.lang.as_deref().unwrap_or("en");
    let title = metadata.title.as_deref().unwrap_or("Untitled Page");
    format!(
        "<!DOCTYPE html>\n<html lang=\"{}\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{}</title>\n<style>\n{}</style>\n</head>\n{}\n</html>\n",
        escape_attr(lang),
        escape_text(title),
        bundle.css(),
        bundle.skeleton()
    )
}

fn root_variables(vars: &BTreeMap<String, String>) -> Option<String> {
    let body: String = vars
        .iter()
        .filter(|(name, _)| name.starts_with("--"))
        .map(|(name, value)| escape_for_style_element(&format!("{name}:{};", value.trim())))
        .collect();
    (!body.is_empty()).then(|| format!(":root{{{body}}}"))
}

fn skeleton_tag(tag: &str) -> String {
    let valid = !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        && tag.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false);
    if valid {
        tag.to_ascii_lowercase()
    } else {
        "div".to_string()
    }
}

fn filter_attributes(attrs: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    attrs
        .iter()
        .filter(|(_, value)| !value.trim_start().to_ascii_lowercase().starts_with("javascript:"))
        .filter_map(|(name, value)| {
            ALLOWED_ATTRIBUTES
                .iter()
                .find(|allowed| allowed.eq_ignore_ascii_case(name))
                .map(|allowed| (allowed.to_string(), value.clone()))
        })
        .collect()
}

pub(crate) fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub(crate) fn escape_attr(text: &str) -> String {
    escape_text(text).replace('"', "&quot;")
}
