//! Pragma pass (spec.md section 4.7): scan the raw source once, before the
//! label pass, applying every `_PRAGMA_` line to mutate [`CompilerConfig`].

use crate::compiler::Compiler;
use crate::source::{classify_line, LineKind};

/// Run the pragma pass over `source`, mutating `compiler.config` in place.
/// Unknown pragma names are reported as warnings (spec.md section 7: this is
/// a resource/structural nuisance, not a hard error).
pub fn run_pragma_pass(compiler: &mut Compiler, source: &str) {
    for (idx, raw_line) in source.lines().enumerate() {
        if let LineKind::Pragma { name, args } = classify_line(raw_line) {
            let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
            if let Err(message) = compiler.config.apply_pragma(&name, &arg_refs) {
                compiler.warning((idx + 1) as u32, message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;

    #[test]
    fn pragma_pass_applies_rom_target() {
        let mut c = Compiler::new(CompilerConfig::default());
        run_pragma_pass(&mut c, "_PRAGMA_ ROM ROM1\n10 A = 1\n");
        assert_eq!(c.config.rom_target, crate::config::RomTarget::Rom1);
        assert!(!c.has_errors());
    }

    #[test]
    fn unknown_pragma_is_a_warning_not_an_error() {
        let mut c = Compiler::new(CompilerConfig::default());
        run_pragma_pass(&mut c, "_PRAGMA_ BOGUS\n");
        assert!(!c.has_errors());
        assert_eq!(c.diagnostics.len(), 1);
        assert_eq!(c.diagnostics[0].severity, crate::errors::Severity::Warning);
    }

    #[test]
    fn multiple_pragmas_all_applied() {
        let mut c = Compiler::new(CompilerConfig::default());
        run_pragma_pass(&mut c, "_PRAGMA_ ROM ROM2\n_PRAGMA_ ARRAYBASE 1\n");
        assert_eq!(c.config.rom_target, crate::config::RomTarget::Rom2);
        assert_eq!(c.config.array_base.0, 1);
    }
}
