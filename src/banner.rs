use crate::rules::{Detection, RuleSet};

const BANNER_HEADER: &str = "=== PERSUASION CUES DETECTED ===";
const BANNER_FOOTER: &str = "=== END TRAINING BANNER ===";

/// Render the plain-text training banner. The wording is part of the
/// training content; an empty detection list yields an empty string.
pub fn build_banner(rules: &RuleSet, detections: &[Detection]) -> String {
    if detections.is_empty() {
        return String::new();
    }

    let mut lines: Vec<String> = Vec::new();
    lines.push(BANNER_HEADER.to_string());
    lines.push("This email contains persuasion techniques commonly used in phishing.".to_string());
    lines.push("Pause before acting. Verify the sender via a trusted channel.".to_string());
    lines.push(String::new());
    lines.push("Detected tactics:".to_string());
    for d in detections {
        lines.push(format!("- {} (score {})", d.label, d.score));
    }
    lines.push(String::new());
    lines.push("What to look for:".to_string());
    for d in detections {
        if let Some(tip) = rules.tip_for(&d.tactic) {
            lines.push(format!("- {}: {}", d.label, tip));
        }
    }
    lines.push(String::new());
    lines.push(BANNER_FOOTER.to_string());
    lines.push(String::new());
    lines.join("\n")
}

/// Render the styled HTML banner block. Empty detection list yields an
/// empty string.
pub fn build_banner_html(rules: &RuleSet, detections: &[Detection]) -> String {
    if detections.is_empty() {
        return String::new();
    }

    let tactics = detections
        .iter()
        .map(|d| d.label.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let tips: String = detections
        .iter()
        .filter_map(|d| {
            rules
                .tip_for(&d.tactic)
                .map(|tip| format!("<li><strong>{}:</strong> {}</li>", d.label, tip))
        })
        .collect();

    let tip_block = if tips.is_empty() {
        String::new()
    } else {
        format!(
            "<div style='margin-top: 8px;'><strong>What to look for:</strong>\
<ul style='margin: 6px 0 0 18px; padding: 0;'>{tips}</ul></div>"
        )
    };

    format!(
        r#"<div style="
  margin: 0 0 16px 0;
  padding: 12px 14px;
  border: 1px solid #e6d9a8;
  background: #fff9db;
  color: #2b2b2b;
  border-radius: 6px;
  font-family: Arial, Helvetica, sans-serif;
  font-size: 13px;
  line-height: 1.35;">
  <div style="font-weight: 700; margin-bottom: 6px;">Persuasion cues detected</div>
  <div style="margin-bottom: 8px;">
    This email contains persuasion techniques commonly used in phishing. Pause before acting and verify the sender via a trusted channel.
  </div>
  <div style="margin-bottom: 6px;"><strong>Detected tactics:</strong> {tactics}</div>
  {tip_block}
</div>"#
    )
}
