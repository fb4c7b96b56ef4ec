use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a sub-rule matched within the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitLocation {
    Subject,
    Body,
    Signal,
}

impl fmt::Display for HitLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HitLocation::Subject => write!(f, "subject"),
            HitLocation::Body => write!(f, "body"),
            HitLocation::Signal => write!(f, "signal"),
        }
    }
}

/// One fired sub-rule, recorded on a Detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    pub rule_id: String,
    pub location: HitLocation,
    pub weight: u32,
}

/// The verdict that a message exhibits one persuasion tactic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub tactic: String,
    pub label: String,
    pub score: u32,
    pub hits: Vec<Hit>,
}

/// A weighted keyword sub-rule. Patterns are lowercase substrings; any
/// one match fires the whole sub-rule once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubRule {
    pub id: String,
    pub weight: u32,
    pub patterns: Vec<String>,
}

/// One persuasion tactic with its subject and body sub-rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TacticRule {
    pub tactic: String,
    pub label: String,
    #[serde(default)]
    pub subject: Vec<SubRule>,
    #[serde(default)]
    pub body: Vec<SubRule>,
    pub threshold: u32,
    /// Remediation tip shown in the training banner. Empty means the
    /// tactic is skipped in the "What to look for" section.
    #[serde(default)]
    pub tip: String,
}

/// The full rule table. Tactic order is load-bearing: ties in the
/// detection list keep first-encountered order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub tactics: Vec<TacticRule>,
}

fn sub(id: &str, weight: u32, patterns: &[&str]) -> SubRule {
    SubRule {
        id: id.to_string(),
        weight,
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
    }
}

impl RuleSet {
    /// The compiled-in rule table. Weights, patterns and thresholds are
    /// part of the training content and must not drift between releases.
    pub fn builtin() -> Self {
        RuleSet {
            tactics: vec![
                TacticRule {
                    tactic: "urgency".to_string(),
                    label: "Urgency".to_string(),
                    subject: vec![sub(
                        "URG_01",
                        4,
                        &["urgent", "final notice", "final reminder", "action required"],
                    )],
                    body: vec![
                        sub(
                            "URG_02",
                            3,
                            &[
                                "as soon as possible",
                                "immediately",
                                "you must",
                                "required to",
                                "act now",
                                "within 24 hours",
                                "within 48 hours",
                            ],
                        ),
                        sub(
                            "URG_03",
                            5,
                            &[
                                "failure to take action will result",
                                "last opportunity",
                                "final notice",
                                "final reminder",
                            ],
                        ),
                    ],
                    threshold: 4,
                    tip: "Look for deadlines and pressure to act quickly.".to_string(),
                },
                TacticRule {
                    tactic: "fear".to_string(),
                    label: "Fear".to_string(),
                    subject: vec![sub(
                        "FER_01",
                        5,
                        &[
                            "unauthorised access",
                            "identity theft",
                            "criminal investigation",
                            "account at risk",
                        ],
                    )],
                    body: vec![
                        sub(
                            "FER_02",
                            4,
                            &[
                                "failure to do so may result",
                                "may result in",
                                "may delay or prevent access",
                                "will be suspended",
                                "will be locked",
                            ],
                        ),
                        sub(
                            "FER_03",
                            3,
                            &[
                                "review your account activity",
                                "confirm your information",
                                "provide documentation",
                                "complete a security check",
                            ],
                        ),
                    ],
                    threshold: 4,
                    tip: "Look for threats (account locked, investigation, harm) that push compliance."
                        .to_string(),
                },
                TacticRule {
                    tactic: "authority".to_string(),
                    label: "Authority".to_string(),
                    subject: vec![sub(
                        "AUTH_01",
                        4,
                        &[
                            "hm revenue & customs",
                            "hmrc",
                            "account review department",
                            "customer services",
                            "policy team",
                        ],
                    )],
                    body: vec![
                        sub(
                            "AUTH_02",
                            3,
                            &[
                                "terms of service",
                                "privacy policy",
                                "regulatory requirements",
                                "policy review",
                                "compliance",
                                "guidelines",
                            ],
                        ),
                        sub(
                            "AUTH_03",
                            4,
                            &[
                                "you are required to",
                                "must",
                                "required to confirm",
                                "remain compliant",
                            ],
                        ),
                    ],
                    threshold: 4,
                    tip: "Look for impersonation of official bodies and 'policy/compliance' language."
                        .to_string(),
                },
                TacticRule {
                    tactic: "reward".to_string(),
                    label: "Reward".to_string(),
                    subject: vec![
                        sub(
                            "REW_02",
                            5,
                            &[
                                "congratulations",
                                "winner",
                                "you have been selected",
                                "cash prize",
                            ],
                        ),
                        sub(
                            "REW_01",
                            4,
                            &[
                                "tax refund",
                                "refund available",
                                "overpayment",
                                "reimbursement",
                            ],
                        ),
                    ],
                    body: vec![
                        sub(
                            "REW_03",
                            4,
                            &["small payment", "discounted", "reward card", "provides 100"],
                        ),
                        sub(
                            "REW_04",
                            4,
                            &[
                                "beneficiary",
                                "bequest",
                                "funds set aside",
                                "compensation matters",
                            ],
                        ),
                        sub(
                            "REW_05",
                            3,
                            &[
                                "wire transfer approved",
                                "payment processed",
                                "funds transferred",
                            ],
                        ),
                    ],
                    threshold: 5,
                    tip: "Look for unexpected refunds, prizes, or 'money owed to you' claims."
                        .to_string(),
                },
                TacticRule {
                    tactic: "trust".to_string(),
                    label: "Trust".to_string(),
                    subject: vec![sub(
                        "TRU_01",
                        2,
                        &[
                            "notification",
                            "account update",
                            "payment receipt",
                            "this message is to inform you",
                        ],
                    )],
                    body: vec![
                        sub(
                            "TRU_02",
                            2,
                            &[
                                "thank you",
                                "customer services",
                                "do not reply to this email",
                                "for your information",
                            ],
                        ),
                        sub(
                            "TRU_03",
                            3,
                            &[
                                "log in to view",
                                "review your account",
                                "access online banking",
                                "view message details",
                            ],
                        ),
                    ],
                    threshold: 4,
                    tip: "Look for familiar tone and routine prompts that lower suspicion."
                        .to_string(),
                },
            ],
        }
    }

    /// Load a rule table from a YAML file, replacing the builtin one.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let rules: RuleSet = serde_yaml::from_str(&content)?;
        Ok(rules)
    }

    pub fn tip_for(&self, tactic: &str) -> Option<&str> {
        self.tactics
            .iter()
            .find(|t| t.tactic == tactic)
            .map(|t| t.tip.as_str())
            .filter(|tip| !tip.is_empty())
    }
}
