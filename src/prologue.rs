//! Conditional prologue injection (spec.md section 4.2.4).
//!
//! A fixed list of ROM-resident init snippets is conceptually emitted at line
//! 0, commented out. The first time emission asks for the stub a snippet
//! backs, the snippet becomes "enabled": its comment prefix would be stripped
//! at output time, and every address from that point on shifts forward by
//! [`crate::consts::SYS_INIT_FUNC_LEN`]. Enablement is idempotent — the
//! address-adjust happens once per snippet, not once per call site.

use crate::consts::SYS_INIT_FUNC_LEN;

/// One ROM-resident init snippet and the CALL-target stub name(s) that
/// trigger it.
#[derive(Debug, Clone, Copy)]
pub struct PrologueSnippet {
    pub name: &'static str,
    pub stubs: &'static [&'static str],
}

/// Declaration order doubles as prologue emission order (spec.md section
/// 4.6: sections, and within this one, snippets, are emitted in a fixed
/// order).
pub const INIT_SNIPPETS: &[PrologueSnippet] = &[
    PrologueSnippet { name: "InitEqOp", stubs: &["EqOp"] },
    PrologueSnippet { name: "InitNeOp", stubs: &["NeOp"] },
    PrologueSnippet { name: "InitLeOp", stubs: &["LeOp"] },
    PrologueSnippet { name: "InitGeOp", stubs: &["GeOp"] },
    PrologueSnippet { name: "InitLtOp", stubs: &["LtOp"] },
    PrologueSnippet { name: "InitGtOp", stubs: &["GtOp"] },
    PrologueSnippet { name: "InitArray2d", stubs: &["convertArr2d"] },
    PrologueSnippet { name: "InitArray3d", stubs: &["convertArr3d"] },
];

/// Which snippet (if any) a CALL to `stub` would enable.
pub fn snippet_for_stub(stub: &str) -> Option<&'static str> {
    INIT_SNIPPETS
        .iter()
        .find(|s| s.stubs.contains(&stub))
        .map(|s| s.name)
}

/// Tracks which snippets have been enabled so far, in first-reference order.
#[derive(Debug, Default)]
pub struct PrologueState {
    enabled: Vec<&'static str>,
}

impl PrologueState {
    pub fn clear(&mut self) {
        self.enabled.clear();
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.iter().any(|s| *s == name)
    }

    pub fn enabled(&self) -> &[&'static str] {
        &self.enabled
    }

    /// Mark `name` enabled if it isn't already. Returns `true` the first
    /// time (the caller should then run the one-time address-adjust).
    pub fn enable(&mut self, name: &'static str) -> bool {
        if self.is_enabled(name) {
            false
        } else {
            self.enabled.push(name);
            true
        }
    }

    /// Total byte shift accumulated from every snippet enabled so far.
    pub fn total_shift(&self) -> u16 {
        SYS_INIT_FUNC_LEN.wrapping_mul(self.enabled.len() as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_lookup_matches_stub_name() {
        assert_eq!(snippet_for_stub("EqOp"), Some("InitEqOp"));
        assert_eq!(snippet_for_stub("convertArr2d"), Some("InitArray2d"));
        assert_eq!(snippet_for_stub("StringCopy"), None);
    }

    #[test]
    fn enabling_the_same_snippet_twice_only_adjusts_once() {
        let mut state = PrologueState::default();
        assert!(state.enable("InitEqOp"));
        assert!(!state.enable("InitEqOp"));
        assert_eq!(state.total_shift(), SYS_INIT_FUNC_LEN);
    }

    #[test]
    fn clear_resets_enabled_snippets() {
        let mut state = PrologueState::default();
        state.enable("InitEqOp");
        state.clear();
        assert_eq!(state.total_shift(), 0);
    }
}
