//! TOML-backed peephole rule toggles.
//!
//! Mirrors the teacher's `lint.rs`: an embedded default TOML document
//! (`rules.toml`) deserialized with `serde`, with an optional user-supplied
//! file merged on top by rule name. Lets a caller disable or re-enable a
//! named peephole rule (spec.md section 4.5) without recompiling, the same
//! way the teacher's lint config lets a caller retune a clippy-style rule
//! without recompiling.

use serde::Deserialize;

/// Embedded default rule toggles, one entry per `peephole::RULES` name.
pub static DEFAULT_RULES: &str = include_str!("rules.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct RuleToggle {
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    #[serde(rename = "rule")]
    pub rules: Vec<RuleToggle>,
}

impl RuleConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        toml::from_str(toml_str).map_err(|e| format!("failed to parse rule config: {e}"))
    }

    pub fn default_config() -> Self {
        Self::from_toml(DEFAULT_RULES).expect("embedded rules.toml must parse")
    }

    /// User rules override defaults with the same name; unmentioned names
    /// keep their default toggle.
    pub fn merge(&mut self, other: RuleConfig) {
        for toggle in other.rules {
            if let Some(existing) = self.rules.iter_mut().find(|r| r.name == toggle.name) {
                *existing = toggle;
            } else {
                self.rules.push(toggle);
            }
        }
    }

    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.rules.iter().find(|r| r.name == name).map(|r| r.enabled)
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        RuleConfig::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses_embedded_toml() {
        let cfg = RuleConfig::default_config();
        assert_eq!(cfg.is_enabled("StwLdiAddw"), Some(true));
        assert_eq!(cfg.is_enabled("StwLdPair"), Some(false));
    }

    #[test]
    fn unknown_rule_name_is_not_enabled_or_disabled() {
        let cfg = RuleConfig::default_config();
        assert_eq!(cfg.is_enabled("NoSuchRule"), None);
    }

    #[test]
    fn merge_overrides_named_rule_and_keeps_others() {
        let mut cfg = RuleConfig::default_config();
        let override_cfg = RuleConfig::from_toml(
            r#"
            [[rule]]
            name = "AddiZero"
            enabled = false
            "#,
        )
        .unwrap();
        cfg.merge(override_cfg);
        assert_eq!(cfg.is_enabled("AddiZero"), Some(false));
        assert_eq!(cfg.is_enabled("StwLdiAddw"), Some(true));
    }

    #[test]
    fn merge_adds_a_previously_unmentioned_rule_name() {
        let mut cfg = RuleConfig::from_toml(
            r#"
            [[rule]]
            name = "StwLdiAddw"
            enabled = true
            "#,
        )
        .unwrap();
        let override_cfg = RuleConfig::from_toml(
            r#"
            [[rule]]
            name = "Lsl8Var"
            enabled = false
            "#,
        )
        .unwrap();
        cfg.merge(override_cfg);
        assert_eq!(cfg.is_enabled("Lsl8Var"), Some(false));
    }
}
