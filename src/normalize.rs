use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref LINE_BREAK_RE: Regex = Regex::new(r"[\r\n\t]+").unwrap();
    static ref UNSAFE_CHAR_RE: Regex = Regex::new(r"[^\w\s@:/.-]+").unwrap();
    static ref MULTI_SPACE_RE: Regex = Regex::new(r"\s{2,}").unwrap();
    static ref TAG_RE: Regex = Regex::new(r"<[^>]+>").unwrap();
}

/// Canonicalize raw text for substring matching: lower-case, collapse
/// line breaks and tabs, replace everything outside the safe character
/// set with spaces, then squeeze and trim whitespace.
pub fn normalize(text: &str) -> String {
    let text = text.to_lowercase();
    let text = LINE_BREAK_RE.replace_all(&text, " ");
    let text = UNSAFE_CHAR_RE.replace_all(&text, " ");
    let text = MULTI_SPACE_RE.replace_all(&text, " ");
    text.trim().to_string()
}

/// Remove HTML tag markup and normalize the remaining text.
pub fn strip_html(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    normalize(&TAG_RE.replace_all(html, " "))
}
