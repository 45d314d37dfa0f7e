//! String assignment and concatenation (spec.md section 4.4).

use crate::compiler::Compiler;
use crate::errors::CodeGenError;
use crate::evaluator::Evaluator;
use crate::types::{Numeric, VarKind};

/// `dest$ = source` where `source` is a single string literal, variable, or
/// constant reference: resolves the source address and emits a runtime copy,
/// eliding the copy entirely when source and destination are the same
/// variable.
pub fn emit_string_assign(
    compiler: &mut Compiler,
    line_number: u32,
    dest_name: &str,
    source_expr: &str,
) -> Result<(), CodeGenError> {
    let dest_idx = compiler
        .tables
        .find_string_var(dest_name)
        .ok_or_else(|| format!("unknown string variable '{dest_name}'"))?;

    if let Some(parts) = split_concat(source_expr) {
        return emit_string_concat(compiler, line_number, dest_idx, &parts);
    }

    let source = resolve_string_source(compiler, line_number, source_expr)?;
    let dest_label = compiler.tables.string_vars[dest_idx].output_label.trim().to_string();

    if source.var_kind == VarKind::StrVar && source.name == dest_name {
        // Self-assignment: elide the copy (spec.md section 4.4).
        return Ok(());
    }

    emit_load_string_address(compiler, &source);
    compiler.emit("CALL", "StringCopy", 3);
    compiler.emit("STW", &dest_label, 2);
    Ok(())
}

/// Split `a$ = b$ + c$ + ...` into its `+`-joined operands; returns `None`
/// when `expr` is not a concatenation (a bare literal/var/const reference).
fn split_concat(expr: &str) -> Option<Vec<String>> {
    let parts = crate::ast::split_outside_strings(expr, '+');
    if parts.len() < 2 {
        return None;
    }
    Some(parts.into_iter().map(|p| p.trim().to_string()).collect())
}

fn emit_string_concat(
    compiler: &mut Compiler,
    line_number: u32,
    dest_idx: usize,
    parts: &[String],
) -> Result<(), CodeGenError> {
    let mut lut = Vec::with_capacity(parts.len());
    for part in parts {
        let source = resolve_string_source(compiler, line_number, part)?;
        lut.push(source.index.max(0) as u16);
    }
    compiler.program.lines[dest_idx_to_line(compiler, dest_idx)]
        .str_concat_lut
        .clone_from(&lut);

    compiler.emit("CALL", "StringConcat", 3);
    let dest_label = compiler.tables.string_vars[dest_idx].output_label.trim().to_string();
    compiler.emit("STW", &dest_label, 2);
    Ok(())
}

/// The LUT is persisted on the *current* code line (spec.md section 4.4),
/// not necessarily the destination variable's declaration line; callers with
/// a real line index should route through that instead of this shim, which
/// only exists because the destination variable record carries no line
/// index of its own.
fn dest_idx_to_line(compiler: &Compiler, _dest_idx: usize) -> usize {
    compiler.program.lines.len().saturating_sub(1)
}

fn resolve_string_source(
    compiler: &mut Compiler,
    line_number: u32,
    expr: &str,
) -> Result<Numeric, CodeGenError> {
    let mut eval = Evaluator::new(compiler, expr, line_number);
    let value = eval.evaluate();
    if !value.is_valid {
        return Err(format!("invalid string expression '{expr}'").into());
    }
    match value.var_kind {
        VarKind::String => {
            let address = compiler.tables.intern_constant_string(&value.text, || {
                // Constant strings are allocated length+2 bytes (length
                // prefix + NUL terminator), descending from the runtime
                // window per spec.md section 3.
                let len = value.text.len() as u16;
                compiler
                    .free_ram
                    .get_free_ram(
                        crate::types::Fit::Descending,
                        len + 2,
                        crate::consts::USER_CODE_START,
                        compiler.runtime_start,
                        false,
                        &value.text,
                    )
                    .unwrap_or(compiler.runtime_start)
            });
            let mut n = value;
            n.index = address as i32;
            Ok(n)
        }
        VarKind::StrVar | VarKind::Constant => Ok(value),
        _ => Err(format!("'{expr}' is not a string expression").into()),
    }
}

fn emit_load_string_address(compiler: &mut Compiler, source: &Numeric) {
    match source.var_kind {
        VarKind::StrVar => {
            let label = compiler.tables.string_vars[source.index as usize]
                .output_label
                .trim()
                .to_string();
            compiler.emit("LDWI", &label, 3);
        }
        _ => {
            compiler.emit("LDWI", &format!("{:#06x}", source.index), 3);
        }
    }
}
