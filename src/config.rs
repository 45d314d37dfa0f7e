//! Compiler configuration.
//!
//! Starts from CLI flags / defaults and is then mutated in place by the
//! pragma pass (spec.md section 4.7) before the code pass begins, the same
//! way the original compiler's globals were overwritten by `_PRAGMA_` lines
//! before code generation started.

use std::path::PathBuf;

use crate::rules_config::RuleConfig;

/// Target ROM revision. Older revisions need the comparison-operator test
/// stubs injected into the prologue (spec.md section 4.1.3); newer ones
/// already have them resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomTarget {
    Rom1,
    Rom2,
    Rom3,
    Rom4,
    Rom5,
}

impl Default for RomTarget {
    fn default() -> Self {
        RomTarget::Rom5
    }
}

impl RomTarget {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ROM1" | "1" => Some(RomTarget::Rom1),
            "ROM2" | "2" => Some(RomTarget::Rom2),
            "ROM3" | "3" => Some(RomTarget::Rom3),
            "ROM4" | "4" => Some(RomTarget::Rom4),
            "ROM5" | "5" => Some(RomTarget::Rom5),
            _ => None,
        }
    }

    /// Whether this revision needs the comparison-stub prologue injected
    /// (spec.md section 4.1.3: "On older ROM revisions...").
    pub fn needs_stub_injection(self) -> bool {
        matches!(self, RomTarget::Rom1 | RomTarget::Rom2)
    }
}

/// Peephole optimizer mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizeMode {
    Off,
    On,
    /// A named subset of rules, by rule name, for debugging a single rule.
    Rules(Vec<String>),
}

impl Default for OptimizeMode {
    fn default() -> Self {
        OptimizeMode::On
    }
}

/// Index base for `DIM`-declared arrays: `0` or `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayBase(pub u8);

impl Default for ArrayBase {
    fn default() -> Self {
        ArrayBase(0)
    }
}

/// All compilation-wide options, settable from the CLI and overridable by
/// in-source pragmas.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub rom_target: RomTarget,
    pub optimize: OptimizeMode,
    pub include_path: Option<PathBuf>,
    pub array_base: ArrayBase,
    pub numeric_label_lut: bool,
    pub time_data: bool,
    /// Per-rule peephole toggles (spec.md section 4.5), TOML-backed. Starts
    /// from the embedded defaults and is overridden, by rule name, by
    /// `with_rules_config` when a caller supplies its own file.
    pub rule_config: RuleConfig,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            rom_target: RomTarget::default(),
            optimize: OptimizeMode::default(),
            include_path: None,
            array_base: ArrayBase::default(),
            numeric_label_lut: false,
            time_data: false,
            rule_config: RuleConfig::default_config(),
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_rom_target(mut self, target: RomTarget) -> Self {
        self.rom_target = target;
        self
    }

    pub fn with_optimize(mut self, mode: OptimizeMode) -> Self {
        self.optimize = mode;
        self
    }

    pub fn with_include_path(mut self, path: PathBuf) -> Self {
        self.include_path = Some(path);
        self
    }

    pub fn with_array_base(mut self, base: u8) -> Self {
        self.array_base = ArrayBase(base);
        self
    }

    /// Merge a user-supplied rule-toggle TOML document on top of the
    /// embedded defaults, by rule name (spec.md section 4.5).
    pub fn with_rules_config(mut self, toml_str: &str) -> Result<Self, String> {
        let overrides = RuleConfig::from_toml(toml_str)?;
        self.rule_config.merge(overrides);
        Ok(self)
    }

    pub fn optimizer_enabled(&self) -> bool {
        !matches!(self.optimize, OptimizeMode::Off)
    }

    /// Apply a single `_PRAGMA_ NAME value...` directive. Unknown pragma
    /// names return `Err` with a warning message; the pragma pass turns
    /// that into a non-fatal diagnostic rather than aborting compilation.
    pub fn apply_pragma(&mut self, name: &str, args: &[&str]) -> Result<(), String> {
        match name.to_ascii_uppercase().as_str() {
            "ROM" => {
                let target = args
                    .first()
                    .and_then(|a| RomTarget::parse(a))
                    .ok_or_else(|| format!("unrecognised ROM target in pragma: {args:?}"))?;
                self.rom_target = target;
                Ok(())
            }
            "OPTIMISE" | "OPTIMIZE" => {
                match args.first().map(|s| s.to_ascii_uppercase()).as_deref() {
                    Some("ON") | None => self.optimize = OptimizeMode::On,
                    Some("OFF") => self.optimize = OptimizeMode::Off,
                    Some(_) => {
                        self.optimize =
                            OptimizeMode::Rules(args.iter().map(|s| s.to_string()).collect())
                    }
                }
                Ok(())
            }
            "INCLUDE" => {
                let path = args
                    .first()
                    .ok_or_else(|| "INCLUDE pragma requires a path".to_string())?;
                self.include_path = Some(PathBuf::from(path));
                Ok(())
            }
            "ARRAYBASE" => {
                let base: u8 = args
                    .first()
                    .and_then(|a| a.parse().ok())
                    .filter(|b| *b == 0 || *b == 1)
                    .ok_or_else(|| "ARRAYBASE pragma requires 0 or 1".to_string())?;
                self.array_base = ArrayBase(base);
                Ok(())
            }
            "NUMERICLABELLUT" => {
                self.numeric_label_lut = true;
                Ok(())
            }
            "TIMEDATA" => {
                self.time_data = true;
                Ok(())
            }
            other => Err(format!("unknown pragma '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_optimizes_and_targets_latest_rom() {
        let cfg = CompilerConfig::default();
        assert!(cfg.optimizer_enabled());
        assert_eq!(cfg.rom_target, RomTarget::Rom5);
    }

    #[test]
    fn apply_pragma_sets_rom_target() {
        let mut cfg = CompilerConfig::default();
        cfg.apply_pragma("ROM", &["ROM1"]).unwrap();
        assert_eq!(cfg.rom_target, RomTarget::Rom1);
        assert!(cfg.rom_target.needs_stub_injection());
    }

    #[test]
    fn apply_pragma_off_disables_optimizer() {
        let mut cfg = CompilerConfig::default();
        cfg.apply_pragma("OPTIMISE", &["OFF"]).unwrap();
        assert!(!cfg.optimizer_enabled());
    }

    #[test]
    fn apply_pragma_unknown_name_is_reported_not_fatal_here() {
        let mut cfg = CompilerConfig::default();
        let err = cfg.apply_pragma("BOGUS", &[]).unwrap_err();
        assert!(err.contains("BOGUS"));
    }

    #[test]
    fn array_base_rejects_values_other_than_zero_or_one() {
        let mut cfg = CompilerConfig::default();
        assert!(cfg.apply_pragma("ARRAYBASE", &["2"]).is_err());
        assert!(cfg.apply_pragma("ARRAYBASE", &["1"]).is_ok());
        assert_eq!(cfg.array_base.0, 1);
    }
}
