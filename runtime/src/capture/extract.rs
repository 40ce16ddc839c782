//! In-page extraction and manifest assembly.
//!
//! The page-side script walks the rendered DOM once and returns a flat,
//! document-ordered item list (elements with parent indices, interleaved
//! with text runs) as a JSON string. [`build_manifest`] turns that list
//! into a [`VisualManifest`], making every URL absolute on the way.

use facsimile::css::{absolutize_urls, extract_blocks, find_urls, is_animation_property};
use facsimile::sanitize::strip_active_content;
use facsimile::{
    AssetKind, AssetRef, CaptureLimits, CloneError, ManifestBuilder, NodeDraft, NodeId,
    PageMetadata, Rect, Viewport, VisualManifest,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

/// Images at or below this size (both sides, CSS px) count as decorative.
const ICON_PX: f64 = 24.0;

/// Link schemes kept on `href` attributes.
const LINK_SCHEMES: &[&str] = &["http", "https", "mailto", "tel"];

const EXTRACT_SCRIPT: &str = r##"
(() => {
  const MAX_DEPTH = __MAX_DEPTH__;
  const MAX_NODES = __MAX_NODES__;
  const MAX_SHEET_CHARS = 400000;
  const MAX_MARKUP_CHARS = 20000;
  const SKIP = new Set(['script','noscript','template','style','link','meta','head','title','iframe','object','embed','base']);
  const REPLACED = new Set(['img','video','canvas','svg','input','textarea','select','picture']);
  const ATTRS = ['src','alt','href','title','width','height','type','placeholder','value','colspan','rowspan','role','aria-label','lang','dir','for','name','poster','viewBox','xmlns','fill','stroke','preserveAspectRatio'];
  const INHERITED = new Set(['color','font-family','font-size','font-weight','font-style','line-height',
    'letter-spacing','word-spacing','text-align','text-transform','text-indent','white-space',
    'list-style-type','text-shadow','visibility','cursor']);
  const PROPS = ['display','position','top','right','bottom','left','z-index','float','clear',
    'box-sizing','max-width','min-width','min-height','max-height',
    'margin-top','margin-right','margin-bottom','margin-left',
    'padding-top','padding-right','padding-bottom','padding-left',
    'border-top-width','border-right-width','border-bottom-width','border-left-width',
    'border-top-style','border-right-style','border-bottom-style','border-left-style',
    'border-top-color','border-right-color','border-bottom-color','border-left-color',
    'border-top-left-radius','border-top-right-radius','border-bottom-right-radius','border-bottom-left-radius',
    'background-color','background-image','background-size','background-position','background-repeat','background-clip',
    'color','font-family','font-size','font-weight','font-style','line-height','letter-spacing','word-spacing',
    'text-align','text-transform','text-indent','text-decoration-line','text-decoration-color','text-shadow','white-space',
    'flex-direction','flex-wrap','justify-content','align-items','align-content','align-self',
    'flex-grow','flex-shrink','flex-basis','order','row-gap','column-gap',
    'grid-template-columns','grid-template-rows','grid-column-start','grid-column-end','grid-row-start','grid-row-end',
    'opacity','box-shadow','overflow-x','overflow-y','object-fit','object-position','list-style-type',
    'vertical-align','transform','filter','backdrop-filter','mix-blend-mode','aspect-ratio','visibility','cursor'];

  const frame = document.createElement('iframe');
  frame.setAttribute('aria-hidden', 'true');
  frame.style.cssText = 'position:absolute;width:0;height:0;border:0;visibility:hidden';
  document.documentElement.appendChild(frame);
  const defaults = new Map();
  const defaultStyle = (tag) => {
    if (defaults.has(tag)) return defaults.get(tag);
    const out = {};
    try {
      const doc = frame.contentDocument;
      const probe = doc.createElement(tag);
      doc.body.appendChild(probe);
      const cs = frame.contentWindow.getComputedStyle(probe);
      for (const p of PROPS) out[p] = cs.getPropertyValue(p);
      probe.remove();
    } catch (e) {}
    defaults.set(tag, out);
    return out;
  };

  const transparent = (v) => !v || v === 'transparent' || v.replace(/\s/g, '') === 'rgba(0,0,0,0)';
  const luminance = (v) => {
    const m = (v || '').match(/rgba?\(([^)]+)\)/);
    if (!m) return 1;
    const [r, g, b] = m[1].split(',').map((x) => parseFloat(x) / 255);
    return 0.2126 * r + 0.7152 * g + 0.0722 * b;
  };

  const items = [];
  let truncated = false;

  const record = (el, tag, cs, parentCs) => {
    const base = defaultStyle(tag);
    const style = {};
    for (const p of PROPS) {
      const v = cs.getPropertyValue(p);
      if (!v) continue;
      const inherited = INHERITED.has(p);
      if (parentCs && inherited) {
        if (parentCs.getPropertyValue(p) === v) continue;
      } else if (!parentCs && inherited) {
        // root keeps every inherited value so page typography survives
      } else if (base[p] === v) {
        continue;
      }
      style[p] = v;
    }
    if (REPLACED.has(tag)) {
      const r = el.getBoundingClientRect();
      style['width'] = Math.round(r.width) + 'px';
      style['height'] = Math.round(r.height) + 'px';
    }
    return style;
  };

  const visit = (el, parent, depth, parentCs) => {
    const tag = el.tagName.toLowerCase();
    if (SKIP.has(tag)) return;
    if (items.length >= MAX_NODES || depth > MAX_DEPTH) { truncated = true; return; }
    const cs = getComputedStyle(el);
    if (cs.display === 'none') return;
    const r = el.getBoundingClientRect();
    const area = r.width > 0 && r.height > 0;
    const painted = !transparent(cs.backgroundColor) || cs.backgroundImage !== 'none';
    if (parent !== null && !area && !painted && cs.display !== 'contents') return;

    const style = record(el, tag, cs, parentCs);
    if (parent === null && transparent(cs.backgroundColor)) {
      const html = getComputedStyle(document.documentElement);
      if (!transparent(html.backgroundColor)) style['background-color'] = html.backgroundColor;
      if (cs.backgroundImage === 'none' && html.backgroundImage !== 'none') style['background-image'] = html.backgroundImage;
    }
    const attrs = {};
    for (const a of ATTRS) {
      const v = el.getAttribute(a);
      if (v !== null && v !== '') attrs[a] = v;
    }
    if (tag === 'img' && el.currentSrc) attrs['src'] = el.currentSrc;
    const index = items.length;
    const item = {
      k: 'element',
      parent,
      tag,
      rect: [r.left + window.scrollX, r.top + window.scrollY, r.width, r.height],
      style,
      attrs,
      markup: null,
    };
    items.push(item);
    if (tag === 'svg') {
      const markup = el.outerHTML;
      if (markup.length <= MAX_MARKUP_CHARS) item.markup = markup;
      return;
    }
    for (const child of el.childNodes) {
      if (child.nodeType === Node.TEXT_NODE) {
        const text = child.textContent;
        if (text && text.trim()) items.push({ k: 'text', parent: index, text });
      } else if (child.nodeType === Node.ELEMENT_NODE) {
        visit(child, index, depth + 1, cs);
      }
    }
  };
  if (document.body) visit(document.body, null, 0, null);

  const stylesheets = [];
  let sheetChars = 0;
  for (const sheet of Array.from(document.styleSheets)) {
    let text = null;
    try {
      text = Array.from(sheet.cssRules).map((rule) => rule.cssText).join('\n');
    } catch (e) {}
    if (text && sheetChars + text.length > MAX_SHEET_CHARS) { text = null; truncated = true; }
    if (text) sheetChars += text.length;
    stylesheets.push({ href: sheet.href, text });
  }

  const css_variables = {};
  const rootStyle = getComputedStyle(document.documentElement);
  for (const sheet of Array.from(document.styleSheets)) {
    let rules = [];
    try { rules = Array.from(sheet.cssRules); } catch (e) {}
    for (const rule of rules) {
      if (!rule.style || !rule.selectorText) continue;
      if (!/(^|,)\s*(:root|html)\s*(,|$)/.test(rule.selectorText)) continue;
      for (const name of Array.from(rule.style)) {
        if (name.startsWith('--')) {
          const v = rootStyle.getPropertyValue(name).trim();
          if (v) css_variables[name] = v;
        }
      }
    }
  }

  const meta = (name) => {
    const el = document.querySelector('meta[name="' + name + '"]');
    return el ? el.getAttribute('content') : null;
  };
  const logos = [];
  for (const img of Array.from(document.images)) {
    const hint = [img.alt, img.id, img.className, img.currentSrc || img.src].join(' ').toLowerCase();
    if (hint.includes('logo') && (img.currentSrc || img.src)) logos.push(img.currentSrc || img.src);
    if (logos.length >= 5) break;
  }
  for (const link of Array.from(document.querySelectorAll('link[rel~="icon"]'))) {
    if (link.href && logos.length < 8) logos.push(link.href);
  }
  const bodyBg = document.body ? getComputedStyle(document.body).backgroundColor : '';
  const pageBg = transparent(bodyBg) ? rootStyle.backgroundColor : bodyBg;
  const scheme = (meta('color-scheme') || '').toLowerCase();

  frame.remove();
  return JSON.stringify({
    final_url: location.href,
    base_url: document.baseURI,
    title: document.title || null,
    lang: document.documentElement.lang || null,
    charset: document.characterSet || null,
    theme_color: meta('theme-color'),
    viewport_meta: meta('viewport'),
    dark_theme: scheme.startsWith('dark') || (!transparent(pageBg) && luminance(pageBg) < 0.35),
    css_variables,
    logo_candidates: logos,
    stylesheets,
    items,
    probe_text: (document.title || '') + '\n' + (document.body ? document.body.innerText.slice(0, 4000) : ''),
    truncated,
  });
})()
"##;

/// The extraction script with capture limits substituted in.
pub fn extraction_script(limits: &CaptureLimits) -> String {
    EXTRACT_SCRIPT
        .replace("__MAX_DEPTH__", &limits.max_depth.to_string())
        .replace("__MAX_NODES__", &limits.max_nodes.to_string())
}

/// Raw page state as returned by the extraction script.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCapture {
    pub final_url: String,
    pub base_url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub charset: Option<String>,
    #[serde(default)]
    pub theme_color: Option<String>,
    #[serde(default)]
    pub viewport_meta: Option<String>,
    #[serde(default)]
    pub dark_theme: bool,
    #[serde(default)]
    pub css_variables: BTreeMap<String, String>,
    #[serde(default)]
    pub logo_candidates: Vec<String>,
    #[serde(default)]
    pub stylesheets: Vec<RawStylesheet>,
    pub items: Vec<RawItem>,
    /// Title plus leading visible text, used for challenge detection.
    #[serde(default)]
    pub probe_text: String,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStylesheet {
    pub href: Option<String>,
    pub text: Option<String>,
}

/// One entry of the flat, document-ordered walk.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "k", rename_all = "snake_case")]
pub enum RawItem {
    Element {
        parent: Option<usize>,
        tag: String,
        #[serde(default)]
        rect: Option<[f64; 4]>,
        #[serde(default)]
        style: BTreeMap<String, String>,
        #[serde(default)]
        attrs: BTreeMap<String, String>,
        #[serde(default)]
        markup: Option<String>,
    },
    Text {
        parent: usize,
        text: String,
    },
}

/// Parse the script's return value (a JSON string).
pub fn parse_capture(value: &serde_json::Value) -> Result<RawCapture, CloneError> {
    let text = value.as_str().ok_or_else(|| CloneError::Navigation {
        url: String::new(),
        reason: "extraction script returned no data".to_string(),
    })?;
    serde_json::from_str(text).map_err(|e| CloneError::Navigation {
        url: String::new(),
        reason: format!("extraction output unreadable: {e}"),
    })
}

/// Assemble a manifest from raw page state.
///
/// Every `src`, `href` and `url(...)` is resolved against the document base;
/// references that cannot be resolved to an absolute URL are dropped.
pub fn build_manifest(
    raw: RawCapture,
    source_url: &str,
    viewport: Viewport,
    limits: CaptureLimits,
) -> Result<VisualManifest, CloneError> {
    let base = Url::parse(&raw.base_url)
        .or_else(|_| Url::parse(&raw.final_url))
        .map_err(|e| CloneError::Navigation {
            url: source_url.to_string(),
            reason: format!("page reported an unusable base URL: {e}"),
        })?;

    let mut builder = ManifestBuilder::new(source_url, &raw.final_url, viewport, limits);
    builder.set_metadata(PageMetadata {
        title: raw.title.filter(|t| !t.trim().is_empty()),
        theme_color: raw.theme_color,
        charset: raw.charset,
        viewport_meta: raw.viewport_meta,
        lang: raw.lang.filter(|l| !l.is_empty()),
        dark_theme: raw.dark_theme,
        css_variables: raw.css_variables,
        logo_candidates: raw
            .logo_candidates
            .iter()
            .filter_map(|u| AssetRef::resolve(&base, u, AssetKind::Image))
            .map(|a| a.url().to_string())
            .collect(),
    });

    for sheet in &raw.stylesheets {
        add_stylesheet(&mut builder, &base, sheet);
    }

    let mut ids: Vec<Option<NodeId>> = Vec::with_capacity(raw.items.len());
    for item in raw.items {
        match item {
            RawItem::Element {
                parent,
                tag,
                rect,
                style,
                attrs,
                markup,
            } => {
                let draft = node_draft(&base, &tag, rect, style, attrs, markup);
                let id = match parent {
                    None if builder.node_count() == 0 => Some(builder.add_root(draft)?),
                    None => None,
                    Some(p) => match ids.get(p).copied().flatten() {
                        Some(pid) => builder.add_child(pid, draft),
                        None => None,
                    },
                };
                ids.push(id);
            }
            RawItem::Text { parent, text } => {
                if let Some(pid) = ids.get(parent).copied().flatten() {
                    builder.add_text(pid, &text);
                }
                ids.push(None);
            }
        }
    }

    if builder.pruned() > 0 || raw.truncated {
        debug!(pruned = builder.pruned(), truncated = raw.truncated, "capture hit limits");
    }
    builder.build()
}

fn add_stylesheet(builder: &mut ManifestBuilder, base: &Url, sheet: &RawStylesheet) {
    let href = sheet
        .href
        .as_deref()
        .and_then(|h| AssetRef::resolve(base, h, AssetKind::Stylesheet));
    // Rules from a linked sheet resolve against the sheet's own URL.
    let sheet_base = href
        .as_ref()
        .and_then(|a| Url::parse(a.url()).ok())
        .unwrap_or_else(|| base.clone());
    if let Some(asset) = href {
        builder.add_page_asset(asset.into_decorative());
    }
    let Some(text) = sheet.text.as_deref() else {
        return;
    };
    let (rewritten, _) = absolutize_urls(text, &sheet_base, AssetKind::Image);
    for block in extract_blocks(&rewritten, "@font-face") {
        for url in find_urls(&block) {
            if let Ok(font) = AssetRef::absolute(&url, AssetKind::Font) {
                builder.add_page_asset(font);
            }
        }
    }
    builder.add_stylesheet(rewritten);
}

fn node_draft(
    base: &Url,
    tag: &str,
    rect: Option<[f64; 4]>,
    style: BTreeMap<String, String>,
    attrs: BTreeMap<String, String>,
    markup: Option<String>,
) -> NodeDraft {
    let mut draft = NodeDraft::new(tag);
    draft.geometry = rect.map(|[x, y, width, height]| Rect {
        x,
        y,
        width,
        height,
    });
    let is_icon = draft
        .geometry
        .map(|g| g.width <= ICON_PX && g.height <= ICON_PX)
        .unwrap_or(false);

    for (property, value) in style {
        if is_animation_property(&property) {
            continue;
        }
        if value.contains("url(") {
            let (rewritten, assets) = absolutize_urls(&value, base, AssetKind::Image);
            draft
                .assets
                .extend(assets.into_iter().map(AssetRef::into_decorative));
            draft.style.insert(property, rewritten);
        } else {
            draft.style.insert(property, value);
        }
    }

    for (name, value) in attrs {
        match name.as_str() {
            "src" | "poster" => {
                if let Some(asset) = AssetRef::resolve(base, &value, AssetKind::Image) {
                    let asset = if is_icon || name == "poster" {
                        asset.into_decorative()
                    } else {
                        asset
                    };
                    draft.attributes.insert(name, asset.url().to_string());
                    draft.assets.push(asset);
                }
            }
            "href" => {
                if let Some(link) = resolve_link(base, &value) {
                    draft.attributes.insert(name, link);
                }
            }
            _ => {
                draft.attributes.insert(name, value);
            }
        }
    }

    draft.markup = markup.map(|m| strip_active_content(&m));
    draft
}

/// Resolve a hyperlink. Fragment links are kept as-is; only navigable
/// schemes survive.
fn resolve_link(base: &Url, raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('#') {
        return Some(trimmed.to_string());
    }
    let url = base.join(trimmed).ok()?;
    LINK_SCHEMES
        .contains(&url.scheme())
        .then(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use facsimile::is_absolute_url;
    use serde_json::json;

    fn raw(items: serde_json::Value, stylesheets: serde_json::Value) -> RawCapture {
        let payload = json!({
            "final_url": "https://example.com/docs/page.html",
            "base_url": "https://example.com/docs/page.html",
            "title": "Docs",
            "lang": "en",
            "charset": "UTF-8",
            "theme_color": "#112233",
            "viewport_meta": "width=device-width",
            "dark_theme": false,
            "css_variables": {"--brand": "#ff6600"},
            "logo_candidates": ["/img/logo.svg"],
            "stylesheets": stylesheets,
            "items": items,
            "probe_text": "Docs",
            "truncated": false
        });
        parse_capture(&serde_json::Value::String(payload.to_string())).unwrap()
    }

    fn sample() -> RawCapture {
        raw(
            json!([
                {"k": "element", "parent": null, "tag": "body", "rect": [0, 0, 1280, 2000],
                 "style": {"background-color": "rgb(255, 255, 255)", "font-family": "Inter"}},
                {"k": "element", "parent": 0, "tag": "div", "rect": [0, 0, 1280, 400],
                 "style": {"background-image": "url(\"../img/hero.jpg\")", "transition-duration": "0.3s"}},
                {"k": "element", "parent": 1, "tag": "h1", "rect": [0, 0, 600, 60], "style": {}},
                {"k": "text", "parent": 2, "text": "  Welcome  "},
                {"k": "element", "parent": 0, "tag": "a", "rect": [0, 0, 80, 20],
                 "attrs": {"href": "../about"}},
                {"k": "text", "parent": 4, "text": "About"},
                {"k": "element", "parent": 0, "tag": "a", "rect": [0, 0, 80, 20],
                 "attrs": {"href": "javascript:void(0)"}},
                {"k": "element", "parent": 0, "tag": "img", "rect": [0, 0, 640, 480],
                 "attrs": {"src": "photos/team.png", "alt": "Team"}},
                {"k": "element", "parent": 0, "tag": "img", "rect": [0, 0, 16, 16],
                 "attrs": {"src": "//cdn.example.net/icon.png"}},
                {"k": "element", "parent": 0, "tag": "svg", "rect": [0, 0, 32, 32],
                 "markup": "<svg onload=\"x()\"><script>x()</script><path d=\"M0 0\"/></svg>"}
            ]),
            json!([
                {"href": "/css/site.css",
                 "text": "@font-face{font-family:Inter;src:url(../fonts/inter.woff2)} .x{background:url(bg.png)}"},
                {"href": null, "text": "body{margin:0}"},
                {"href": "https://other.example.org/locked.css", "text": null}
            ]),
        )
    }

    fn manifest() -> VisualManifest {
        build_manifest(
            sample(),
            "https://example.com/docs/page.html",
            Viewport::default(),
            CaptureLimits::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_every_asset_is_absolute() {
        let m = manifest();
        assert!(!m.assets().is_empty());
        for asset in m.assets() {
            assert!(is_absolute_url(asset.url()), "{}", asset.url());
        }
        for node in m.nodes() {
            for asset in &node.assets {
                assert!(is_absolute_url(asset.url()));
            }
            if let Some(src) = node.attributes.get("src") {
                assert!(is_absolute_url(src));
            }
        }
        for css in m.stylesheets() {
            for url in find_urls(css) {
                assert!(is_absolute_url(&url), "{url}");
            }
        }
    }

    #[test]
    fn test_tree_shape_and_text() {
        let m = manifest();
        assert_eq!(m.root().tag, "body");
        let h1 = m.nodes().iter().find(|n| n.tag == "h1").unwrap();
        assert_eq!(h1.own_text(), "Welcome");
        assert_eq!(h1.depth, 2);
        assert_eq!(m.metadata().title.as_deref(), Some("Docs"));
        assert_eq!(
            m.metadata().logo_candidates,
            vec!["https://example.com/img/logo.svg".to_string()]
        );
    }

    #[test]
    fn test_style_urls_rewritten_and_motion_dropped() {
        let m = manifest();
        let hero = m.node(NodeId(1)).unwrap();
        assert_eq!(
            hero.style.get("background-image").map(String::as_str),
            Some("url(\"https://example.com/img/hero.jpg\")")
        );
        assert!(!hero.style.contains_key("transition-duration"));
        assert!(hero.assets.iter().all(AssetRef::is_decorative));
    }

    #[test]
    fn test_links_resolved_or_dropped() {
        let m = manifest();
        let links: Vec<_> = m.nodes().iter().filter(|n| n.tag == "a").collect();
        assert_eq!(
            links[0].attributes.get("href").map(String::as_str),
            Some("https://example.com/about")
        );
        assert!(!links[1].attributes.contains_key("href"));
    }

    #[test]
    fn test_images_and_icons() {
        let m = manifest();
        let imgs: Vec<_> = m.nodes().iter().filter(|n| n.tag == "img").collect();
        assert_eq!(
            imgs[0].attributes.get("src").map(String::as_str),
            Some("https://example.com/docs/photos/team.png")
        );
        assert!(!imgs[0].assets[0].is_decorative());
        assert_eq!(imgs[1].assets[0].url(), "https://cdn.example.net/icon.png");
        assert!(imgs[1].assets[0].is_decorative());
    }

    #[test]
    fn test_svg_markup_sanitized() {
        let m = manifest();
        let svg = m.nodes().iter().find(|n| n.tag == "svg").unwrap();
        let markup = svg.markup.as_deref().unwrap();
        assert!(!markup.contains("<script"));
        assert!(!markup.contains("onload"));
        assert!(markup.contains("<path"));
    }

    #[test]
    fn test_stylesheets_and_fonts() {
        let m = manifest();
        assert_eq!(m.stylesheets().len(), 2);
        assert!(m.stylesheets()[0].contains("https://example.com/fonts/inter.woff2"));
        assert!(m.stylesheets()[0].contains("https://example.com/css/bg.png"));
        let kinds: Vec<_> = m.assets().iter().map(|a| (a.kind(), a.url())).collect();
        assert!(kinds.contains(&(AssetKind::Font, "https://example.com/fonts/inter.woff2")));
        assert!(kinds.contains(&(AssetKind::Stylesheet, "https://other.example.org/locked.css")));
    }

    #[test]
    fn test_children_of_pruned_nodes_are_dropped() {
        let limits = CaptureLimits {
            max_depth: 1,
            ..CaptureLimits::default()
        };
        let m = build_manifest(
            sample(),
            "https://example.com/docs/page.html",
            Viewport::default(),
            limits,
        )
        .unwrap();
        assert!(m.nodes().iter().all(|n| n.depth <= 1));
        assert!(m.nodes().iter().all(|n| n.tag != "h1"));
    }

    #[test]
    fn test_script_substitutes_limits() {
        let script = extraction_script(&CaptureLimits {
            max_depth: 7,
            max_nodes: 99,
            max_children: 10,
        });
        assert!(script.contains("const MAX_DEPTH = 7;"));
        assert!(script.contains("const MAX_NODES = 99;"));
        assert!(!script.contains("__MAX_"));
    }

    #[test]
    fn test_unreadable_payload() {
        assert!(parse_capture(&serde_json::Value::Null).is_err());
        assert!(parse_capture(&serde_json::Value::String("{".into())).is_err());
    }
}
