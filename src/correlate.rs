use crate::rules::{Detection, Hit, HitLocation};
use crate::signals::{
    Signal, SIG_HAS_URL, SIG_LINKTEXT_MISMATCH, SIG_MANY_URLS, SIG_REPLYTO_MISMATCH, SIG_TWO_URLS,
};
use std::collections::HashSet;

/// One correlation adjustment: when any of `requires_any` fired and the
/// detection's tactic is listed, the bonus is added and a correlated hit
/// recorded. A rule with `requires_prior` only applies to detections
/// that already received that prior correlated hit.
pub struct CorrelationRule {
    pub hit_id: &'static str,
    pub requires_any: &'static [&'static str],
    pub tactics: &'static [&'static str],
    pub bonus: u32,
    pub requires_prior: Option<&'static str>,
}

/// Reply-To mismatch supports authority/trust abuse narratives; link
/// pressure supports "act now" tactics. The link-pressure rule is
/// chained behind the mismatch rule, so it never applies on its own.
/// That coupling is kept for compatibility with the authored training
/// content; see DESIGN.md for the policy discussion.
pub const CORRELATION_RULES: &[CorrelationRule] = &[
    CorrelationRule {
        hit_id: "SIG_REPLYTOMISMATCH",
        requires_any: &[SIG_REPLYTO_MISMATCH],
        tactics: &["authority", "trust"],
        bonus: 1,
        requires_prior: None,
    },
    CorrelationRule {
        hit_id: "SIG_LINK_PRESSURE",
        requires_any: &[SIG_HAS_URL, SIG_TWO_URLS, SIG_MANY_URLS, SIG_LINKTEXT_MISMATCH],
        tactics: &["urgency", "fear", "authority", "reward"],
        bonus: 1,
        requires_prior: Some("SIG_REPLYTOMISMATCH"),
    },
];

/// Adjust detection scores using the fired signals, then re-sort by
/// score descending (stable, so ties keep their order).
pub fn correlate(detections: &mut [Detection], signals: &[Signal]) {
    if detections.is_empty() || signals.is_empty() {
        return;
    }

    let fired: HashSet<&str> = signals.iter().map(|s| s.id.as_str()).collect();

    for detection in detections.iter_mut() {
        let mut applied: HashSet<&'static str> = HashSet::new();
        for rule in CORRELATION_RULES {
            if !rule.requires_any.iter().any(|id| fired.contains(id)) {
                continue;
            }
            if !rule.tactics.contains(&detection.tactic.as_str()) {
                continue;
            }
            if let Some(prior) = rule.requires_prior {
                if !applied.contains(prior) {
                    continue;
                }
            }
            detection.score += rule.bonus;
            detection.hits.push(Hit {
                rule_id: rule.hit_id.to_string(),
                location: HitLocation::Signal,
                weight: rule.bonus,
            });
            applied.insert(rule.hit_id);
            log::debug!(
                "correlated {} onto tactic '{}' (+{})",
                rule.hit_id,
                detection.tactic,
                rule.bonus
            );
        }
    }

    detections.sort_by(|a, b| b.score.cmp(&a.score));
}
