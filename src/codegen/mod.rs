//! The code pass (spec.md section 4.2): walks every parsed [`CodeLine`],
//! dispatches its `:`-separated statements, and installs the resulting
//! [`VasmLine`]s back onto the line that produced them.
//!
//! [`CodeLine`]: crate::ast::CodeLine
//! [`VasmLine`]: crate::ast::VasmLine

pub mod arrays;
pub mod strings;

use crate::compiler::Compiler;
use crate::dispatch::dispatch_statement;
use crate::errors::CompileError;

/// Run the code pass over every line the label pass produced. Label-pass
/// stub lines (`dont_parse`, spec.md section 4.8) are skipped; everything
/// else is split on top-level `:` and dispatched statement by statement.
///
/// Errors are accumulated rather than aborting the pass (spec.md section
/// 7), so one bad line doesn't hide problems on later lines; the pass
/// boundary check at the end surfaces them all at once.
pub fn run_code_pass(compiler: &mut Compiler) -> Result<(), CompileError> {
    let total = compiler.program.lines.len();
    for idx in 0..total {
        if compiler.program.lines[idx].dont_parse {
            continue;
        }
        let line_number = compiler.program.lines[idx].line_number;
        let statements = compiler.program.lines[idx].split_statements();
        compiler.begin_code_line(idx as u32);

        for stmt in &statements {
            if let Err(e) = dispatch_statement(compiler, line_number, stmt) {
                compiler.error(line_number, e.to_string());
            }
        }

        let vasm = compiler.take_line_vasm();
        let lut = compiler.take_line_on_goto_lut();
        compiler.program.lines[idx].vasm = vasm;
        if !lut.is_empty() {
            compiler.program.lines[idx].on_goto_lut = lut;
        }
    }

    compiler.finalize_prologue();
    compiler.check_pass_boundary()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::label_pass::run_label_pass;

    fn compile_lines(source: &str) -> Compiler {
        let mut c = Compiler::new(CompilerConfig::default());
        run_label_pass(&mut c, source);
        run_code_pass(&mut c).unwrap();
        c
    }

    #[test]
    fn simple_assignment_line_gets_its_vasm_installed() {
        let c = compile_lines("10 A = 1\n");
        let line = &c.program.lines[0];
        assert!(!line.vasm.is_empty());
    }

    #[test]
    fn stub_lines_from_the_label_pass_are_skipped() {
        let c = compile_lines("10 A = 1\n20 B = 2\n");
        assert!(c.pc() > crate::consts::USER_CODE_START);
    }

    #[test]
    fn multi_statement_line_emits_vasm_for_every_statement() {
        let c = compile_lines("10 A = 1:B = 2\n");
        let line = &c.program.lines[0];
        assert!(line.vasm.len() >= 2);
    }

    #[test]
    fn goto_to_a_later_numeric_label_resolves_once_label_pass_has_run() {
        let mut c = compile_lines("10 GOTO 20\n20 A = 1\n");
        assert!(!c.has_errors());
        let _ = &mut c;
    }

    #[test]
    fn bad_statement_is_accumulated_as_an_error_not_a_panic() {
        let mut c = Compiler::new(CompilerConfig::default());
        run_label_pass(&mut c, "10 GOTO 9999\n");
        assert!(run_code_pass(&mut c).is_err());
    }
}
