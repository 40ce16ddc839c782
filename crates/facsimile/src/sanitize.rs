//! Static-output hygiene: strip active content from markup and normalize
//! provider output into a standalone document.

use crate::css::extract_blocks;
use regex::Regex;
use std::fmt::Write;
use std::sync::OnceLock;

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap_or_else(|e| panic!("invalid regex {pattern}: {e}")))
}

fn script_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?is)<script\b[^>]*>.*?</script\s*>|<script\b[^>]*/?>")
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r#"<([a-zA-Z][^\s/>]*)((?:"[^"]*"|'[^']*'|[^<>])*)>"#)
}

fn attribute_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r#"([\s/]+)([^\s"'/>=]+)(?:(\s*=\s*)("[^"]*"|'[^']*'|[^\s"'>][^\s>]*))?"#)
}

fn char_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?i)&#x([0-9a-f]+);?|&#([0-9]+);?|&(colon|tab|newline);")
}

/// Attributes whose value the browser resolves as a URL.
const URL_ATTRIBUTES: &[&str] = &[
    "href",
    "src",
    "action",
    "formaction",
    "xlink:href",
    "data",
    "poster",
    "background",
];

const SCRIPT_SCHEMES: &[&str] = &["javascript:", "vbscript:", "data:text/html"];

fn style_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?is)(<style\b[^>]*>)(.*?)(</style\s*>)")
}

fn style_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r#"(?i)(\sstyle\s*=\s*")([^"]*)(")"#)
}

fn motion_decl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r#"(?i)([{;"\s]|^)(?:-webkit-|-moz-)?(?:animation|transition)[a-z-]*\s*:[^;}]*"#)
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"(?s)^\s*```[a-zA-Z0-9_-]*[ \t]*\r?\n(.*?)\r?\n?```\s*$")
}

/// Remove `<script>` elements, event handler attributes, `srcdoc` and
/// script-scheme URLs.
///
/// Tags are tokenized with quote awareness, so a `>` inside a quoted value
/// does not end the tag and `/` separates attributes the way it does in a
/// browser.
pub fn strip_active_content(html: &str) -> String {
    let without_scripts = script_re().replace_all(html, "");
    tag_re()
        .replace_all(&without_scripts, |caps: &regex::Captures<'_>| {
            format!("<{}{}>", &caps[1], clean_attributes(&caps[2]))
        })
        .into_owned()
}

fn clean_attributes(attrs: &str) -> String {
    let mut out = String::with_capacity(attrs.len());
    let mut last = 0;
    for caps in attribute_re().captures_iter(attrs) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&attrs[last..whole.start()]);
        last = whole.end();

        let name = &caps[2];
        let lower = name.to_ascii_lowercase();
        if lower.starts_with("on") || lower == "srcdoc" {
            continue;
        }
        let scripted = URL_ATTRIBUTES.contains(&lower.as_str())
            && caps.get(4).is_some_and(|v| is_script_url(unquote(v.as_str())));
        if scripted {
            let _ = write!(out, "{}{name}=\"#\"", &caps[1]);
        } else {
            out.push_str(whole.as_str());
        }
    }
    out.push_str(&attrs[last..]);
    out
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
}

/// Whether a URL attribute value runs script once the browser decodes
/// character references and drops embedded whitespace.
fn is_script_url(value: &str) -> bool {
    let decoded = char_ref_re().replace_all(value, |caps: &regex::Captures<'_>| {
        let code = match (caps.get(1), caps.get(2), caps.get(3)) {
            (Some(hex), _, _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (_, Some(dec), _) => dec.as_str().parse().ok(),
            (_, _, Some(named)) => match named.as_str().to_ascii_lowercase().as_str() {
                "colon" => Some(u32::from(':')),
                "tab" => Some(u32::from('\t')),
                _ => Some(u32::from('\n')),
            },
            _ => None,
        };
        code.and_then(char::from_u32).map(String::from).unwrap_or_default()
    });
    let normalized: String = decoded
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    SCRIPT_SCHEMES.iter().any(|scheme| normalized.starts_with(scheme))
}

/// Remove animation and transition declarations and `@keyframes` blocks.
pub fn strip_motion(html: &str) -> String {
    let blocks = style_block_re().replace_all(html, |caps: &regex::Captures<'_>| {
        let mut css = caps[2].to_string();
        for at_rule in ["@keyframes", "@-webkit-keyframes"] {
            for block in extract_blocks(&css, at_rule) {
                css = css.replace(&block, "");
            }
        }
        format!("{}{}{}", &caps[1], strip_motion_declarations(&css), &caps[3])
    });
    style_attr_re()
        .replace_all(&blocks, |caps: &regex::Captures<'_>| {
            format!("{}{}{}", &caps[1], strip_motion_declarations(&caps[2]), &caps[3])
        })
        .into_owned()
}

fn strip_motion_declarations(css: &str) -> String {
    motion_decl_re().replace_all(css, "${1}").into_owned()
}

/// Strip a single Markdown code fence wrapping the whole text, if present.
pub fn strip_code_fences(text: &str) -> &str {
    match fence_re().captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => text.trim(),
    }
}

/// Ensure the document starts with an HTML5 doctype.
pub fn ensure_doctype(html: &str) -> String {
    let trimmed = html.trim_start();
    let has_doctype = trimmed
        .get(..9)
        .map(|p| p.eq_ignore_ascii_case("<!doctype"))
        .unwrap_or(false);
    if has_doctype {
        trimmed.to_string()
    } else {
        format!("<!DOCTYPE html>\n{trimmed}")
    }
}

/// Post-process an accepted candidate into the final static document.
pub fn finalize_document(html: &str) -> String {
    ensure_doctype(&strip_motion(&strip_active_content(strip_code_fences(html))))
}
