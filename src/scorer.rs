use crate::normalize::normalize;
use crate::rules::{Detection, Hit, HitLocation, RuleSet};

/// Score the subject and body against every tactic in the rule table.
///
/// Sub-rules are OR'd internally (any one pattern is enough) but every
/// matching sub-rule contributes its weight; there is no early exit. A
/// tactic whose cumulative score reaches its threshold yields a
/// Detection. The returned list is sorted by score descending, ties in
/// table order.
pub fn score_message(rules: &RuleSet, subject: &str, body: &str) -> Vec<Detection> {
    let subject = normalize(subject);
    let body = normalize(body);

    let mut detections = Vec::new();
    for tactic in &rules.tactics {
        let mut score = 0u32;
        let mut hits = Vec::new();

        for rule in &tactic.subject {
            if rule.patterns.iter().any(|p| subject.contains(p.as_str())) {
                score += rule.weight;
                hits.push(Hit {
                    rule_id: rule.id.clone(),
                    location: HitLocation::Subject,
                    weight: rule.weight,
                });
            }
        }

        for rule in &tactic.body {
            if rule.patterns.iter().any(|p| body.contains(p.as_str())) {
                score += rule.weight;
                hits.push(Hit {
                    rule_id: rule.id.clone(),
                    location: HitLocation::Body,
                    weight: rule.weight,
                });
            }
        }

        if score >= tactic.threshold {
            log::debug!("tactic '{}' fired with score {}", tactic.tactic, score);
            detections.push(Detection {
                tactic: tactic.tactic.clone(),
                label: tactic.label.clone(),
                score,
                hits,
            });
        }
    }

    detections.sort_by(|a, b| b.score.cmp(&a.score));
    detections
}
