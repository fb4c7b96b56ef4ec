use crate::rewrite::RewriteOptions;
use serde::{Deserialize, Serialize};

/// Gateway configuration, loaded from YAML. Every field has a default
/// so a partial file works.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_host: String,
    pub listen_port: u16,
    pub downstream_host: String,
    pub downstream_port: u16,
    /// Only recipients at this domain are relayed; everything else gets
    /// `550 5.7.1 Relaying denied`.
    pub allowed_domain: String,
    pub evidence_dir: String,
    /// Optional YAML file replacing the builtin rule table.
    pub rules_file: Option<String>,
    pub marker_header: String,
    pub marker_value: String,
    pub tactics_header: String,
    pub signals_header: String,
    pub rules_header: String,
    /// Wording of the bracketed subject tag: `[{subject_tag}: {label}]`.
    pub subject_tag: String,
}

impl Default for Config {
    fn default() -> Self {
        let opts = RewriteOptions::default();
        Config {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 2525,
            downstream_host: "127.0.0.1".to_string(),
            downstream_port: 1025,
            allowed_domain: "smtp-gateway-lab.com".to_string(),
            evidence_dir: "evidence".to_string(),
            rules_file: None,
            marker_header: opts.marker_header,
            marker_value: opts.marker_value,
            tactics_header: opts.tactics_header,
            signals_header: opts.signals_header,
            rules_header: opts.rules_header,
            subject_tag: opts.subject_tag,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Fall back to defaults when no config file is present.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::from_file(path)
        } else {
            log::warn!("config file {path} not found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn rewrite_options(&self) -> RewriteOptions {
        RewriteOptions {
            marker_header: self.marker_header.clone(),
            marker_value: self.marker_value.clone(),
            tactics_header: self.tactics_header.clone(),
            signals_header: self.signals_header.clone(),
            rules_header: self.rules_header.clone(),
            subject_tag: self.subject_tag.clone(),
        }
    }
}
