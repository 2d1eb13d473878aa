//! Helper functions for text normalization.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static UNSAFE_FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());

/// Find the largest valid UTF-8 char boundary <= index.
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let mut i = index;
        while i > 0 && !s.is_char_boundary(i) {
            i -= 1;
        }
        i
    }
}

/// Collapse every whitespace run to a single space and trim both ends.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

/// Decode HTML character references in a single pass.
///
/// Unknown named entities are left untouched.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    ENTITY_RE
        .replace_all(text, |caps: &Captures| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(body)
            };
            match decoded {
                Some(ch) => ch.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    let ch = match name {
        "nbsp" => ' ',
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "ndash" => '–',
        "mdash" => '—',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        "hellip" => '…',
        _ => return None,
    };
    Some(ch)
}

/// Remove markup tags, keeping the text between them.
pub fn strip_tags(markup: &str) -> String {
    TAG_RE.replace_all(markup, " ").into_owned()
}

/// Full message normalization: tags stripped, entities decoded, whitespace collapsed.
pub fn normalize_message(raw: &str) -> String {
    collapse_whitespace(&decode_entities(&strip_tags(raw)))
}

/// Number of whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Short, single-line excerpt for log and warning messages.
pub fn preview(text: &str, max_bytes: usize) -> String {
    let flat = collapse_whitespace(text);
    if flat.len() <= max_bytes {
        return flat;
    }
    let end = floor_char_boundary(&flat, max_bytes);
    format!("{}...", &flat[..end])
}

/// Turn a title into something usable as a file stem.
pub fn safe_file_stem(title: &str, max_chars: usize) -> String {
    let cleaned = UNSAFE_FILENAME_RE.replace_all(title, "");
    let truncated: String = cleaned.chars().take(max_chars).collect();
    collapse_whitespace(&truncated).replace(' ', "_")
}
