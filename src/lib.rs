//! vCPU assembly compiler library.
//!
//! Translates line-numbered, variable-typed BASIC-like source (SL) into
//! textual vCPU assembly in one pass, per spec.md: pragma pass, label pass,
//! code pass, peephole optimizer, output formatter.

pub mod allocator;
pub mod ast;
pub mod codegen;
pub mod compiler;
pub mod config;
pub mod consts;
pub mod control_flow;
pub mod dispatch;
pub mod errors;
pub mod evaluator;
pub mod keywords;
pub mod label_pass;
pub mod macros;
pub mod output;
pub mod peephole;
pub mod pragma;
pub mod prologue;
pub mod rules_config;
pub mod source;
pub mod symbols;
pub mod types;

use std::fs;
use std::path::Path;

pub use compiler::Compiler;
pub use config::CompilerConfig;
pub use errors::CompileError;

/// Run the full pipeline over `source` and return the assembled program text.
///
/// Does not read or pass through a macro library (spec.md section 4.2.5); for
/// that, use [`compile_file_with_config`]. Useful on its own for tests and any
/// caller that already has the source text in memory.
pub fn compile_source(source: &str, config: CompilerConfig) -> Result<String, CompileError> {
    let mut compiler = Compiler::new(config);
    run_pipeline(&mut compiler, source)?;
    output::run_output_pass(&mut compiler, None).map_err(|e| CompileError {
        diagnostics: vec![errors::Diagnostic {
            line: 0,
            message: e.to_string(),
            severity: errors::Severity::Error,
        }],
    })
}

/// Compile `input_path` to `output_path` using `config`, reading the macro
/// library named by `config.include_path` (if any) and passing its body
/// through verbatim into the rendered output (spec.md section 4.2.5).
///
/// Mirrors the teacher's `compile_file_with_config` shape: one function that
/// owns all file I/O so `compile_source` can stay file-system free.
pub fn compile_file_with_config(
    input_path: &Path,
    output_path: &Path,
    config: CompilerConfig,
) -> Result<(), String> {
    let source = fs::read_to_string(input_path)
        .map_err(|e| format!("failed to read source file {}: {e}", input_path.display()))?;

    let macro_source = match &config.include_path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("failed to read macro library {}: {e}", path.display()))?;
            // Parsed here only to surface unbalanced %MACRO/%ENDM pairs as a
            // fatal error before any output is written (spec.md section 7e);
            // the output pass re-consumes the raw text, not this table.
            macros::MacroTable::parse(&text)?;
            Some(text)
        }
        None => None,
    };

    let mut compiler = Compiler::new(config);
    run_pipeline(&mut compiler, &source).map_err(|e| e.to_string())?;
    let rendered = output::run_output_pass(&mut compiler, macro_source.as_deref())
        .map_err(|e| e.to_string())?;

    fs::write(output_path, rendered)
        .map_err(|e| format!("failed to write output file {}: {e}", output_path.display()))?;
    Ok(())
}

/// Pragma pass, label pass, code pass, then the peephole pass, in that order
/// (spec.md section 2's pipeline). Stops and returns the accumulated
/// diagnostics at the first pass boundary that has an error recorded.
fn run_pipeline(compiler: &mut Compiler, source: &str) -> Result<(), CompileError> {
    pragma::run_pragma_pass(compiler, source);
    label_pass::run_label_pass(compiler, source);
    codegen::run_code_pass(compiler)?;
    peephole::run_peephole_pass(compiler);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_source_renders_assignment_to_assembly_text() {
        let out = compile_source("10 A = 1\n", CompilerConfig::default()).unwrap();
        assert!(out.contains("; code"));
    }

    #[test]
    fn compile_source_surfaces_accumulated_diagnostics_on_failure() {
        let err = compile_source("10 GOTO 9999\n", CompilerConfig::default()).unwrap_err();
        assert!(!err.diagnostics.is_empty());
    }

    #[test]
    fn compile_file_with_config_round_trips_through_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("prog.sl");
        let output_path = dir.path().join("prog.asm");
        fs::write(&input_path, "10 A = 1\n").unwrap();

        compile_file_with_config(&input_path, &output_path, CompilerConfig::default()).unwrap();

        let rendered = fs::read_to_string(&output_path).unwrap();
        assert!(rendered.contains("; code"));
    }

    #[test]
    fn compile_file_with_config_passes_the_macro_library_through() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("prog.sl");
        let macro_path = dir.path().join("runtime.mac");
        let output_path = dir.path().join("prog.asm");
        fs::write(&input_path, "10 A = 1\n").unwrap();
        fs::write(&macro_path, "%MACRO PushPair\nNOP\n%ENDM\n").unwrap();

        let config = CompilerConfig::default().with_include_path(macro_path);
        compile_file_with_config(&input_path, &output_path, config).unwrap();

        let rendered = fs::read_to_string(&output_path).unwrap();
        assert!(rendered.contains("%MACRO PushPair"));
    }

    #[test]
    fn compile_file_with_config_rejects_an_unbalanced_macro_library() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("prog.sl");
        let macro_path = dir.path().join("runtime.mac");
        let output_path = dir.path().join("prog.asm");
        fs::write(&input_path, "10 A = 1\n").unwrap();
        fs::write(&macro_path, "%MACRO PushPair\nNOP\n").unwrap();

        let config = CompilerConfig::default().with_include_path(macro_path);
        let err = compile_file_with_config(&input_path, &output_path, config).unwrap_err();
        assert!(err.contains("ENDM"));
    }
}
