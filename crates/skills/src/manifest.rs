//! SKILL.md manifest — parsed from YAML frontmatter at the top of the file.
//!
//! Required fields:
//! ```yaml
//! ---
//! name: apple-notes
//! description: Manage Apple Notes via the memo CLI on macOS...
//! ---
//! ```
//!
//! Optional fields:
//! ```yaml
//! ---
//! name: sonoscli
//! description: Control Sonos via the sonos CLI
//! risk: io
//! inputs: "device name, command"
//! outputs: "command result text"
//! permission_scope: "sonos.*"
//! ---
//! ```

use serde::{Deserialize, Serialize};

/// Validates a skill name: `^[a-z0-9]+(-[a-z0-9]+)*$`
pub fn is_valid_skill_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let mut expect_alnum = true;
    for ch in name.chars() {
        if expect_alnum {
            if !ch.is_ascii_lowercase() && !ch.is_ascii_digit() {
                return false;
            }
            expect_alnum = false;
        } else if ch == '-' {
            expect_alnum = true;
        } else if !ch.is_ascii_lowercase() && !ch.is_ascii_digit() {
            return false;
        }
    }
    !expect_alnum || name.len() == 1
}

/// Parsed frontmatter from a SKILL.md file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SkillManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub risk: Option<String>,
    #[serde(default)]
    pub inputs: Option<String>,
    #[serde(default)]
    pub outputs: Option<String>,
    #[serde(default)]
    pub permission_scope: Option<String>,
}

/// Non-fatal validation issues found in a manifest.
#[derive(Debug, Clone, Default)]
pub struct ManifestValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ManifestValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl SkillManifest {
    pub fn validate(&self) -> ManifestValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        match &self.name {
            None => errors.push("missing required field: name".into()),
            Some(n) if !is_valid_skill_name(n) => {
                errors.push(format!(
                    "invalid skill name '{n}': must match ^[a-z0-9]+(-[a-z0-9]+)*$"
                ));
            }
            _ => {}
        }

        match &self.description {
            None => errors.push("missing required field: description".into()),
            Some(d) if d.is_empty() => errors.push("description must not be empty".into()),
            Some(d) if d.len() > 400 => {
                warnings.push(format!(
                    "description is {} chars (recommended < 400)",
                    d.len()
                ));
            }
            _ => {}
        }

        if let Some(ref risk) = self.risk {
            if !matches!(risk.as_str(), "pure" | "io" | "net" | "admin") {
                warnings.push(format!(
                    "unknown risk tier '{risk}': expected pure|io|net|admin"
                ));
            }
        }

        ManifestValidation { errors, warnings }
    }

    pub fn risk_tier(&self) -> crate::types::RiskTier {
        match self.risk.as_deref() {
            Some("net") => crate::types::RiskTier::Net,
            Some("admin") => crate::types::RiskTier::Admin,
            Some("pure") => crate::types::RiskTier::Pure,
            _ => crate::types::RiskTier::Io,
        }
    }
}

/// Parse YAML frontmatter from a SKILL.md file.
///
/// Returns `(manifest, body)` where body is the markdown after the
/// frontmatter block. Invalid frontmatter still returns a body (the whole
/// file), with `manifest` set to `None`.
pub fn parse_frontmatter(content: &str) -> (Option<SkillManifest>, String) {
    let trimmed = content.trim_start();
    if !trimmed.starts_with("---") {
        return (None, content.to_string());
    }

    let after_open = &trimmed[3..];
    let Some(close_idx) = after_open.find("\n---") else {
        return (None, content.to_string());
    };

    let yaml_str = &after_open[..close_idx];
    let body_start = close_idx + 4;
    let body = after_open[body_start..].trim_start_matches('\n').to_string();

    match serde_yaml::from_str::<SkillManifest>(yaml_str) {
        Ok(manifest) => {
            let validation = manifest.validate();
            for err in &validation.errors {
                tracing::warn!(error = %err, "SKILL.md manifest validation error");
            }
            for warn in &validation.warnings {
                tracing::debug!(warning = %warn, "SKILL.md manifest warning");
            }
            (Some(manifest), body)
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse SKILL.md frontmatter");
            (None, content.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        assert!(is_valid_skill_name("apple-notes"));
        assert!(is_valid_skill_name("a"));
        assert!(is_valid_skill_name("sonos2"));
    }

    #[test]
    fn invalid_names() {
        assert!(!is_valid_skill_name(""));
        assert!(!is_valid_skill_name("Apple-Notes"));
        assert!(!is_valid_skill_name("-leading"));
        assert!(!is_valid_skill_name("trailing-"));
    }

    #[test]
    fn parses_minimal_frontmatter() {
        let content = "---\nname: apple-notes\ndescription: manage notes\n---\n\nBody text.";
        let (manifest, body) = parse_frontmatter(content);
        let manifest = manifest.unwrap();
        assert_eq!(manifest.name.as_deref(), Some("apple-notes"));
        assert_eq!(body.trim(), "Body text.");
    }

    #[test]
    fn missing_frontmatter_yields_none() {
        let (manifest, body) = parse_frontmatter("just a markdown file");
        assert!(manifest.is_none());
        assert_eq!(body, "just a markdown file");
    }

    #[test]
    fn validate_flags_missing_fields() {
        let manifest = SkillManifest::default();
        let validation = manifest.validate();
        assert!(!validation.is_valid());
        assert_eq!(validation.errors.len(), 2);
    }

    #[test]
    fn risk_tier_defaults_to_io() {
        let manifest = SkillManifest {
            risk: None,
            ..Default::default()
        };
        assert_eq!(manifest.risk_tier(), crate::types::RiskTier::Io);
    }
}
