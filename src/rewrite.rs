use crate::banner::{build_banner, build_banner_html};
use crate::correlate::correlate;
use crate::message::MailMessage;
use crate::rules::RuleSet;
use crate::scorer::score_message;
use crate::signals::extract_signals;
use std::sync::Arc;

/// Diagnostic header values are capped at this many characters.
const MAX_HEADER_CHARS: usize = 900;

/// Header names and marker wording. The defaults are part of the wire
/// contract with downstream consumers and the training content.
#[derive(Debug, Clone)]
pub struct RewriteOptions {
    pub marker_header: String,
    pub marker_value: String,
    pub tactics_header: String,
    pub signals_header: String,
    pub rules_header: String,
    pub subject_tag: String,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        RewriteOptions {
            marker_header: "X-Training-Gateway".to_string(),
            marker_value: "smtp-training-gateway".to_string(),
            tactics_header: "X-Training-Tactics".to_string(),
            signals_header: "X-Training-Signals".to_string(),
            rules_header: "X-Training-Rules".to_string(),
            subject_tag: "Potential phishing".to_string(),
        }
    }
}

/// Result of one rewrite pass: the final bytes to forward, plus the
/// `(tactic, score)` pairs for logging.
pub struct RewriteOutcome {
    pub bytes: Vec<u8>,
    pub detections: Vec<(String, u32)>,
    pub already_processed: bool,
}

pub struct Rewriter {
    rules: Arc<RuleSet>,
    opts: RewriteOptions,
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Insert the banner immediately after the first opening `<body>` tag,
/// or prepend it when no such tag exists. Empty banner is a no-op.
pub fn inject_banner_into_html(existing_html: &str, banner_html: &str) -> String {
    if banner_html.is_empty() {
        return existing_html.to_string();
    }

    let lower = existing_html.to_ascii_lowercase();
    if let Some(body_idx) = lower.find("<body") {
        if let Some(rel) = lower[body_idx..].find('>') {
            let insert_at = body_idx + rel + 1;
            let mut out = String::with_capacity(existing_html.len() + banner_html.len());
            out.push_str(&existing_html[..insert_at]);
            out.push_str(banner_html);
            out.push_str(&existing_html[insert_at..]);
            return out;
        }
    }

    format!("{banner_html}{existing_html}")
}

impl Rewriter {
    pub fn new(rules: Arc<RuleSet>, opts: RewriteOptions) -> Self {
        Rewriter { rules, opts }
    }

    /// Score, correlate and rewrite one message in place, returning the
    /// bytes to forward. A message that already carries the marker
    /// header passes through with its original bytes untouched.
    pub fn process(&self, msg: &mut MailMessage) -> RewriteOutcome {
        if msg.header(&self.opts.marker_header).is_some() {
            log::info!("already processed ({} present)", self.opts.marker_header);
            return RewriteOutcome {
                bytes: msg.raw_bytes().to_vec(),
                detections: Vec::new(),
                already_processed: true,
            };
        }

        let subject = msg.subject();
        let plain_body = msg.first_part_text("text/plain").unwrap_or_default();
        let html_body = msg.first_part_text("text/html").unwrap_or_default();

        let content_for_detection = if plain_body.is_empty() {
            html_body.as_str()
        } else {
            plain_body.as_str()
        };
        let mut detections = score_message(&self.rules, &subject, content_for_detection);

        let signals = extract_signals(
            msg.header("From"),
            msg.header("Reply-To"),
            &plain_body,
            &html_body,
        );
        if !signals.is_empty() {
            let summary = signals
                .iter()
                .map(|s| s.summary())
                .collect::<Vec<_>>()
                .join(", ");
            msg.set_header(
                &self.opts.signals_header,
                &truncate_chars(&summary, MAX_HEADER_CHARS),
            );
        }

        if !detections.is_empty() {
            correlate(&mut detections, &signals);

            msg.set_header(&self.opts.marker_header, &self.opts.marker_value);
            let tactic_list = detections
                .iter()
                .map(|d| d.tactic.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            msg.set_header(&self.opts.tactics_header, &tactic_list);

            // Trust-only detections are too generic to headline the
            // warning; prefer the best non-trust tactic for the tag.
            let primary = detections
                .iter()
                .find(|d| d.tactic != "trust")
                .unwrap_or(&detections[0]);
            let prefix = format!("[{}: {}]", self.opts.subject_tag, primary.label);
            let current_subject = msg.subject();
            if !current_subject.starts_with(&prefix) {
                msg.set_header("Subject", &format!("{prefix} {current_subject}"));
            }

            if !plain_body.is_empty() {
                let banner = build_banner(&self.rules, &detections);
                msg.replace_first_part_text("text/plain", format!("{banner}\n{plain_body}"));
            }

            let banner_html = build_banner_html(&self.rules, &detections);
            if !html_body.is_empty() {
                let new_html = inject_banner_into_html(&html_body, &banner_html);
                msg.replace_first_part_text("text/html", new_html);
            }

            let fired = detections
                .iter()
                .flat_map(|d| d.hits.iter())
                .map(|h| format!("{}:{}:{}", h.rule_id, h.location, h.weight))
                .collect::<Vec<_>>()
                .join(", ");
            msg.set_header(
                &self.opts.rules_header,
                &truncate_chars(&fired, MAX_HEADER_CHARS),
            );

            log::info!(
                "detected tactics: {:?}",
                detections.iter().map(|d| d.tactic.as_str()).collect::<Vec<_>>()
            );
        } else {
            log::info!("no tactics detected");
        }

        RewriteOutcome {
            bytes: msg.to_bytes(),
            detections: detections.iter().map(|d| (d.tactic.clone(), d.score)).collect(),
            already_processed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter() -> Rewriter {
        Rewriter::new(Arc::new(RuleSet::builtin()), RewriteOptions::default())
    }

    fn plain_message(subject: &str, body: &str, extra_headers: &str) -> Vec<u8> {
        format!(
            "From: sender@x.com\r\nTo: user@smtp-gateway-lab.com\r\n{extra_headers}Subject: {subject}\r\nContent-Type: text/plain\r\n\r\n{body}\r\n"
        )
        .into_bytes()
    }

    fn phishy_body() -> &'static str {
        "Please take action required within 24 hours or your account will be suspended immediately."
    }

    #[test]
    fn test_example_a_urgency_detected_and_tagged() {
        let raw = plain_message("URGENT: Please review", phishy_body(), "");
        let mut msg = MailMessage::parse(&raw).unwrap();
        let outcome = rewriter().process(&mut msg);

        assert!(!outcome.already_processed);
        let urgency = outcome
            .detections
            .iter()
            .find(|(t, _)| t == "urgency")
            .unwrap();
        assert!(urgency.1 >= 4);

        let result = MailMessage::parse(&outcome.bytes).unwrap();
        assert!(result
            .subject()
            .starts_with("[Potential phishing: Urgency]"));
        assert_eq!(result.header("X-Training-Gateway"), Some("smtp-training-gateway"));
        let body = result.first_part_text("text/plain").unwrap();
        assert!(body.contains("=== PERSUASION CUES DETECTED ==="));
        assert!(body.contains(&format!("- Urgency (score {})", urgency.1)));
        assert!(body.contains("action required within 24 hours"));
    }

    #[test]
    fn test_example_b_signals_without_detections() {
        let raw = plain_message(
            "lunch on friday?",
            "see you at noon",
            "Reply-To: other@y.com\r\n",
        );
        let mut msg = MailMessage::parse(&raw).unwrap();
        let outcome = rewriter().process(&mut msg);

        assert!(outcome.detections.is_empty());
        let result = MailMessage::parse(&outcome.bytes).unwrap();
        assert_eq!(
            result.header("X-Training-Signals"),
            Some("SIG_REPLYTO_MISMATCH:4:x.com->y.com")
        );
        assert_eq!(result.header("X-Training-Gateway"), None);
        assert_eq!(result.header("X-Training-Tactics"), None);
        assert_eq!(result.subject(), "lunch on friday?");
        assert_eq!(
            result.first_part_text("text/plain").unwrap().trim(),
            "see you at noon"
        );
    }

    #[test]
    fn test_already_processed_passthrough_is_byte_identical() {
        let raw = plain_message(
            "URGENT: Please review",
            phishy_body(),
            "X-Training-Gateway: smtp-training-gateway\r\n",
        );
        let mut msg = MailMessage::parse(&raw).unwrap();
        let outcome = rewriter().process(&mut msg);
        assert!(outcome.already_processed);
        assert!(outcome.detections.is_empty());
        assert_eq!(outcome.bytes, raw);
    }

    #[test]
    fn test_second_rewrite_is_a_noop_passthrough() {
        let raw = plain_message("URGENT: Please review", phishy_body(), "");
        let mut msg = MailMessage::parse(&raw).unwrap();
        let first = rewriter().process(&mut msg);

        let mut again = MailMessage::parse(&first.bytes).unwrap();
        let second = rewriter().process(&mut again);
        assert!(second.already_processed);
        assert_eq!(second.bytes, first.bytes);
    }

    #[test]
    fn test_subject_tag_never_doubles() {
        let raw = plain_message("URGENT: Please review", phishy_body(), "");
        let mut msg = MailMessage::parse(&raw).unwrap();
        let first = rewriter().process(&mut msg);

        // Strip the marker so the rewrite logic runs again over content
        // that already carries the subject tag.
        let mut stripped = MailMessage::parse(&first.bytes).unwrap();
        stripped.remove_header("X-Training-Gateway");
        let second = rewriter().process(&mut stripped);
        assert!(!second.already_processed);

        let result = MailMessage::parse(&second.bytes).unwrap();
        let subject = result.subject();
        assert_eq!(subject.matches("[Potential phishing:").count(), 1);
    }

    #[test]
    fn test_html_banner_injected_after_body_tag() {
        let raw = format!(
            "From: sender@x.com\r\nTo: user@smtp-gateway-lab.com\r\nSubject: URGENT notice\r\nMIME-Version: 1.0\r\nContent-Type: multipart/alternative; boundary=\"b1\"\r\n\r\n--b1\r\nContent-Type: text/plain\r\n\r\n{}\r\n--b1\r\nContent-Type: text/html\r\n\r\n<html><body><p>{}</p></body></html>\r\n--b1--\r\n",
            phishy_body(),
            phishy_body(),
        )
        .into_bytes();
        let mut msg = MailMessage::parse(&raw).unwrap();
        let outcome = rewriter().process(&mut msg);
        assert!(!outcome.detections.is_empty());

        let result = MailMessage::parse(&outcome.bytes).unwrap();
        let html = result.first_part_text("text/html").unwrap();
        let body_tag = html.find("<body>").unwrap();
        let banner = html.find("Persuasion cues detected").unwrap();
        let original = html.find("<p>").unwrap();
        assert!(body_tag < banner);
        assert!(banner < original);

        let plain = result.first_part_text("text/plain").unwrap();
        assert!(plain.starts_with("=== PERSUASION CUES DETECTED ==="));
    }

    #[test]
    fn test_correlated_hits_reach_rules_header() {
        let raw = plain_message(
            "account notice",
            "You are required to confirm your details at http://verify.example/now for compliance.",
            "Reply-To: other@y.com\r\n",
        );
        let mut msg = MailMessage::parse(&raw).unwrap();
        let outcome = rewriter().process(&mut msg);

        let authority = outcome
            .detections
            .iter()
            .find(|(t, _)| t == "authority")
            .unwrap();
        // AUTH_02 (3) + AUTH_03 (4) plus both correlation bonuses.
        assert_eq!(authority.1, 9);

        let result = MailMessage::parse(&outcome.bytes).unwrap();
        let rules_header = result.header("X-Training-Rules").unwrap();
        assert!(rules_header.contains("AUTH_03:body:4"));
        assert!(rules_header.contains("SIG_REPLYTOMISMATCH:signal:1"));
        assert!(rules_header.contains("SIG_LINK_PRESSURE:signal:1"));

        let signals_header = result.header("X-Training-Signals").unwrap();
        assert!(signals_header.contains("SIG_REPLYTO_MISMATCH:4:x.com->y.com"));
        assert!(signals_header.contains("SIG_HAS_URL:1:urls=1"));
    }

    #[test]
    fn test_trust_never_headlines_the_subject_tag() {
        // Trust scores highest here, but the tag prefers the best
        // non-trust tactic.
        let raw = plain_message(
            "notification of account update",
            "Thank you. Log in to view your statement. This is your last opportunity.",
            "",
        );
        let mut msg = MailMessage::parse(&raw).unwrap();
        let outcome = rewriter().process(&mut msg);

        let tactics: Vec<&str> = outcome.detections.iter().map(|(t, _)| t.as_str()).collect();
        assert!(tactics.contains(&"trust"));
        assert!(tactics.contains(&"urgency"));

        let result = MailMessage::parse(&outcome.bytes).unwrap();
        assert!(result.subject().starts_with("[Potential phishing: Urgency]"));
    }

    #[test]
    fn test_clean_message_is_not_modified() {
        let raw = plain_message("lunch on friday?", "see you at noon", "");
        let mut msg = MailMessage::parse(&raw).unwrap();
        let outcome = rewriter().process(&mut msg);

        assert!(outcome.detections.is_empty());
        let result = MailMessage::parse(&outcome.bytes).unwrap();
        assert_eq!(result.header("X-Training-Gateway"), None);
        assert_eq!(result.header("X-Training-Signals"), None);
        assert_eq!(result.header("X-Training-Rules"), None);
        assert_eq!(result.subject(), "lunch on friday?");
    }

    #[test]
    fn test_round_trip_headers_match_report() {
        let raw = plain_message("URGENT: Please review", phishy_body(), "");
        let mut msg = MailMessage::parse(&raw).unwrap();
        let outcome = rewriter().process(&mut msg);

        let result = MailMessage::parse(&outcome.bytes).unwrap();
        assert_eq!(result.header("X-Training-Gateway"), Some("smtp-training-gateway"));
        let expected = outcome
            .detections
            .iter()
            .map(|(t, _)| t.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        assert_eq!(result.header("X-Training-Tactics"), Some(expected.as_str()));
    }

    #[test]
    fn test_detections_sorted_desc_in_outcome() {
        let raw = plain_message("URGENT: Please review", phishy_body(), "");
        let mut msg = MailMessage::parse(&raw).unwrap();
        let outcome = rewriter().process(&mut msg);
        assert!(outcome.detections.len() >= 2);
        for pair in outcome.detections.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn test_inject_after_body_tag_with_attributes() {
        let html = r#"<html><body style="margin:0"><p>x</p></body></html>"#;
        let injected = inject_banner_into_html(html, "<div>B</div>");
        assert_eq!(
            injected,
            r#"<html><body style="margin:0"><div>B</div><p>x</p></body></html>"#
        );
    }

    #[test]
    fn test_inject_prepends_without_body_tag() {
        let html = "<p>bare fragment</p>";
        let injected = inject_banner_into_html(html, "<div>B</div>");
        assert_eq!(injected, "<div>B</div><p>bare fragment</p>");
    }

    #[test]
    fn test_inject_empty_banner_is_noop() {
        assert_eq!(inject_banner_into_html("<p>x</p>", ""), "<p>x</p>");
        assert_eq!(inject_banner_into_html("", ""), "");
    }
}
