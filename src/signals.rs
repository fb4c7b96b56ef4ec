use crate::normalize::{normalize, strip_html};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const SIG_REPLYTO_MISMATCH: &str = "SIG_REPLYTO_MISMATCH";
pub const SIG_HAS_URL: &str = "SIG_HAS_URL";
pub const SIG_TWO_URLS: &str = "SIG_TWO_URLS";
pub const SIG_MANY_URLS: &str = "SIG_MANY_URLS";
pub const SIG_LINKTEXT_MISMATCH: &str = "SIG_LINKTEXT_MISMATCH";

/// How many href/anchor-text pairs the link-text check will look at.
const MAX_ANCHORS: usize = 15;

lazy_static! {
    static ref URL_RE: Regex =
        Regex::new(r#"(?i)https?://[^\s<>"]+|www\.[^\s<>"]+"#).unwrap();
    static ref EMAIL_RE: Regex =
        Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}").unwrap();
    static ref HREF_RE: Regex = Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).unwrap();
    static ref ANCHOR_TEXT_RE: Regex = Regex::new(r"(?is)<a\b[^>]*>(.*?)</a>").unwrap();
    static ref VISIBLE_DOMAIN_RE: Regex = Regex::new(r"\b[a-z0-9.-]+\.[a-z]{2,}\b").unwrap();
}

/// A structural observation independent of the keyword rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub weight: u32,
    pub detail: String,
}

impl Signal {
    fn new(id: &str, weight: u32, detail: String) -> Self {
        Signal {
            id: id.to_string(),
            weight,
            detail,
        }
    }

    /// Header rendering, `id:weight:detail`.
    pub fn summary(&self) -> String {
        format!("{}:{}:{}", self.id, self.weight, self.detail)
    }
}

/// Best-effort domain of the first email address in a header value.
/// Malformed or missing addresses yield an empty string, never an error.
pub fn extract_email_domain(header_value: &str) -> String {
    let value = header_value.trim();
    match EMAIL_RE.find(value) {
        Some(m) => m
            .as_str()
            .rsplit_once('@')
            .map(|(_, domain)| domain.to_lowercase())
            .unwrap_or_default(),
        None => String::new(),
    }
}

/// Extract structural signals from headers and bodies. Each rule is
/// independent; the output order carries no meaning.
pub fn extract_signals(
    from_header: Option<&str>,
    reply_to_header: Option<&str>,
    plain_body: &str,
    html_body: &str,
) -> Vec<Signal> {
    let mut signals = Vec::new();

    let from_domain = extract_email_domain(from_header.unwrap_or(""));
    let reply_to_domain = extract_email_domain(reply_to_header.unwrap_or(""));

    if !reply_to_domain.is_empty() && !from_domain.is_empty() && reply_to_domain != from_domain {
        signals.push(Signal::new(
            SIG_REPLYTO_MISMATCH,
            4,
            format!("{from_domain}->{reply_to_domain}"),
        ));
    }

    // Combined text view for URL counting: normalized plain body plus
    // tag-stripped HTML body.
    let body_text = normalize(plain_body);
    let body_html_text = strip_html(html_body);
    let combined = format!("{body_text} {body_html_text}").trim().to_string();

    let url_count = URL_RE.find_iter(&combined).count();
    if url_count >= 3 {
        signals.push(Signal::new(SIG_MANY_URLS, 2, format!("urls={url_count}")));
    } else if url_count == 2 {
        signals.push(Signal::new(SIG_TWO_URLS, 1, "urls=2".to_string()));
    } else if url_count == 1 {
        signals.push(Signal::new(SIG_HAS_URL, 1, "urls=1".to_string()));
    }

    // Link-text mismatch: visible anchor text names a domain that does
    // not appear anywhere in the paired href. One signal at most.
    if !html_body.is_empty() {
        let hrefs: Vec<&str> = HREF_RE
            .captures_iter(html_body)
            .take(MAX_ANCHORS)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        let anchor_texts: Vec<&str> = ANCHOR_TEXT_RE
            .captures_iter(html_body)
            .take(MAX_ANCHORS)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();

        for (i, href) in hrefs.iter().enumerate() {
            let visible = match anchor_texts.get(i) {
                Some(text) => strip_html(text),
                None => String::new(),
            };
            let visible_domains: Vec<&str> = VISIBLE_DOMAIN_RE
                .find_iter(&visible)
                .map(|m| m.as_str())
                .collect();
            if visible_domains.is_empty() {
                continue;
            }
            let href_n = normalize(href);
            if !visible_domains.iter().any(|d| href_n.contains(d)) {
                signals.push(Signal::new(
                    SIG_LINKTEXT_MISMATCH,
                    3,
                    format!("visible={}", visible_domains[0]),
                ));
                break;
            }
        }
    }

    signals
}
