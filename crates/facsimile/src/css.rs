//! Small CSS text utilities: `url(...)` rewriting, at-rule extraction,
//! declaration serialization.

use crate::types::{AssetKind, AssetRef, Declarations};
use regex::{Captures, Regex};
use std::sync::OnceLock;
use url::Url;

fn url_fn_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)'"\s]*))\s*\)"#)
            .unwrap_or_else(|e| panic!("invalid url() regex: {e}"))
    })
}

/// Every raw `url(...)` body in `css`, in order of appearance.
pub fn find_urls(css: &str) -> Vec<String> {
    url_fn_regex()
        .captures_iter(css)
        .filter_map(|c| url_body(&c).map(str::to_string))
        .collect()
}

fn url_body<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str())
}

/// Rewrite every `url(...)` in `css` to an absolute URL resolved against `base`.
///
/// Fragment references (`url(#clip)`) are left untouched since they do not
/// name an external resource. Returns the rewritten text and the resolved
/// asset references in order of appearance.
pub fn absolutize_urls(css: &str, base: &Url, kind: AssetKind) -> (String, Vec<AssetRef>) {
    let mut found = Vec::new();
    let rewritten = url_fn_regex().replace_all(css, |caps: &Captures<'_>| {
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let Some(body) = url_body(caps) else {
            return whole.to_string();
        };
        match AssetRef::resolve(base, body, kind) {
            Some(asset) => {
                let out = format!("url(\"{}\")", asset.url());
                found.push(asset);
                out
            }
            None => whole.to_string(),
        }
    });
    (rewritten.into_owned(), found)
}

/// Extract every top-level block introduced by `at_rule` (e.g. `@font-face`),
/// verbatim, including its braces.
pub fn extract_blocks(css: &str, at_rule: &str) -> Vec<String> {
    let lower = css.to_ascii_lowercase();
    let needle = at_rule.to_ascii_lowercase();
    let bytes = css.as_bytes();
    let mut blocks = Vec::new();
    let mut from = 0;
    while let Some(rel) = lower[from..].find(&needle) {
        let start = from + rel;
        let Some(open_rel) = css[start..].find('{') else {
            break;
        };
        let mut depth = 0usize;
        let mut end = None;
        for (i, b) in bytes.iter().enumerate().skip(start + open_rel) {
            match b {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i + 1);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(end) = end else {
            break;
        };
        blocks.push(css[start..end].trim().to_string());
        from = end;
    }
    blocks
}

/// Animation and transition properties never belong in a static artifact.
pub fn is_animation_property(name: &str) -> bool {
    name.starts_with("animation") || name.starts_with("transition")
}

/// Escape every `<` as the CSS escape `\3c `, so text inlined into a
/// `<style>` element can never close it or open a comment.
pub fn escape_for_style_element(css: &str) -> String {
    css.replace('<', "\\3c ")
}

/// Serialize declarations as `prop:value;` pairs in key order.
pub fn serialize_declarations(decls: &Declarations) -> String {
    let mut out = String::new();
    for (prop, value) in decls {
        if is_animation_property(prop) {
            continue;
        }
        out.push_str(&escape_for_style_element(prop));
        out.push(':');
        out.push_str(&escape_for_style_element(value.trim()));
        out.push(';');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_urls_all_quote_styles() {
        let css = r#"a{background:url("a.png")} b{background:url('b.png')} c{background:url( c.png )}"#;
        assert_eq!(find_urls(css), vec!["a.png", "b.png", "c.png"]);
    }

    #[test]
    fn test_absolutize_rewrites_relative_and_keeps_fragments() {
        let base = Url::parse("https://example.com/css/site.css").unwrap();
        let css = "x{background-image:url(../img/bg.jpg)} y{clip-path:url(#c)}";
        let (out, assets) = absolutize_urls(css, &base, AssetKind::Image);
        assert!(out.contains(r#"url("https://example.com/img/bg.jpg")"#));
        assert!(out.contains("url(#c)"));
        assert_eq!(assets.len(), 1);
    }

    #[test]
    fn test_gradients_untouched_by_url_rewrite() {
        let base = Url::parse("https://example.com/").unwrap();
        let css = "linear-gradient(90deg, rgb(255, 0, 0) 0%, rgb(0, 0, 255) 100%)";
        let (out, _) = absolutize_urls(css, &base, AssetKind::Image);
        assert_eq!(out, css);
    }

    #[test]
    fn test_extract_font_face_blocks() {
        let css = "body{margin:0}@font-face{font-family:X;src:url(a.woff2)}p{}@FONT-FACE { font-family: Y; }";
        let blocks = extract_blocks(css, "@font-face");
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].starts_with("@font-face{"));
        assert!(blocks[1].ends_with('}'));
    }

    #[test]
    fn test_serialize_skips_animation() {
        let mut d = Declarations::new();
        d.insert("color".into(), "red".into());
        d.insert("transition-duration".into(), "1s".into());
        d.insert("animation-name".into(), "spin".into());
        assert_eq!(serialize_declarations(&d), "color:red;");
    }

    #[test]
    fn test_style_element_breakout_escaped() {
        let mut decls = Declarations::new();
        decls.insert("font-family".into(), "x</style><script>alert(1)</script>".into());
        let out = serialize_declarations(&decls);
        assert!(!out.contains('<'));
        assert_eq!(out, "font-family:x\\3c /style>\\3c script>alert(1)\\3c /script>;");
    }
}
