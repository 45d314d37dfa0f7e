//! Keyword dispatch registry (spec.md section 4.9).
//!
//! Each statement (already split on top-level `:`) is looked up by its
//! leading uppercased token in [`REGISTRY`]; a miss means the statement is a
//! bare assignment (`LET` is itself just an alias that falls through to the
//! same path). [`Keyword::handle`] is the single entry point the code pass
//! calls per statement.

use crate::ast::split_outside_strings;
use crate::compiler::Compiler;
use crate::control_flow::{ForFrame, IfFrame, RepeatFrame, WhileFrame};
use crate::errors::CodeGenError;
use crate::evaluator::{evaluate_and_materialize, Evaluator};
use crate::symbols::{IntVar, IntVarType, Label, StringVar};
use crate::types::{Fit, Int16Byte, Numeric, VarKind};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Statement-level keyword tags. Keywords whose bodies are external
/// collaborators (spec.md section 1 Out of scope: sprite/font/image
/// data-definition, file I/O) are recognised but only parse their argument
/// list and emit a call to the named runtime routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Let,
    If,
    ElseIf,
    Else,
    EndIf,
    For,
    Next,
    While,
    Wend,
    Repeat,
    Until,
    Goto,
    Gosub,
    Return,
    On,
    Dim,
    Input,
    Print,
    Data,
    Read,
    Restore,
    Poke,
    Doke,
    DefFn,
    End,
    /// Recognised but not owned by this crate: parses its argument list and
    /// emits a call to the named external runtime routine.
    External(&'static str),
}

pub static REGISTRY: LazyLock<HashMap<&'static str, Keyword>> = LazyLock::new(|| {
    HashMap::from([
        ("LET", Keyword::Let),
        ("IF", Keyword::If),
        ("ELSEIF", Keyword::ElseIf),
        ("ELSE", Keyword::Else),
        ("ENDIF", Keyword::EndIf),
        ("FOR", Keyword::For),
        ("NEXT", Keyword::Next),
        ("WHILE", Keyword::While),
        ("WEND", Keyword::Wend),
        ("REPEAT", Keyword::Repeat),
        ("UNTIL", Keyword::Until),
        ("GOTO", Keyword::Goto),
        ("GOSUB", Keyword::Gosub),
        ("RETURN", Keyword::Return),
        ("ON", Keyword::On),
        ("DIM", Keyword::Dim),
        ("INPUT", Keyword::Input),
        ("PRINT", Keyword::Print),
        ("DATA", Keyword::Data),
        ("READ", Keyword::Read),
        ("RESTORE", Keyword::Restore),
        ("POKE", Keyword::Poke),
        ("DOKE", Keyword::Doke),
        ("DEF", Keyword::DefFn),
        ("END", Keyword::End),
        ("SPRITE", Keyword::External("SpriteOp")),
        ("FONT", Keyword::External("FontOp")),
        ("IMAGE", Keyword::External("ImageOp")),
        ("LOAD", Keyword::External("FileLoadOp")),
        ("SAVE", Keyword::External("FileSaveOp")),
    ])
});

/// Split the leading identifier token off `stmt` (case-preserving), and
/// return it alongside the untouched remainder.
fn split_leading_word(stmt: &str) -> (&str, &str) {
    let trimmed = stmt.trim_start();
    let end = trimmed
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(trimmed.len());
    (&trimmed[..end], trimmed[end..].trim_start())
}

/// Dispatch one `:`-separated statement. Returns `Ok(())` having emitted
/// whatever vCPU instructions the statement required, or `Err` for a
/// structural/semantic problem the caller should report against `line`.
pub fn dispatch_statement(
    compiler: &mut Compiler,
    line_number: u32,
    stmt: &str,
) -> Result<(), CodeGenError> {
    let stmt = stmt.trim();
    if stmt.is_empty() {
        return Ok(());
    }
    let (word, rest) = split_leading_word(stmt);
    let upper = word.to_ascii_uppercase();

    match REGISTRY.get(upper.as_str()) {
        Some(Keyword::Let) => handle_assignment(compiler, line_number, rest),
        Some(Keyword::If) => handle_if(compiler, line_number, rest),
        Some(Keyword::ElseIf) => handle_elseif(compiler, line_number, rest),
        Some(Keyword::Else) => handle_else(compiler, line_number),
        Some(Keyword::EndIf) => handle_endif(compiler, line_number),
        Some(Keyword::For) => handle_for(compiler, line_number, rest),
        Some(Keyword::Next) => handle_next(compiler, line_number, rest),
        Some(Keyword::While) => handle_while(compiler, line_number, rest),
        Some(Keyword::Wend) => handle_wend(compiler, line_number),
        Some(Keyword::Repeat) => handle_repeat(compiler, line_number),
        Some(Keyword::Until) => handle_until(compiler, line_number, rest),
        Some(Keyword::Goto) => handle_goto(compiler, line_number, rest),
        Some(Keyword::Gosub) => handle_gosub(compiler, line_number, rest),
        Some(Keyword::Return) => {
            compiler.emit("RET", "", 1);
            Ok(())
        }
        Some(Keyword::On) => handle_on(compiler, line_number, rest),
        Some(Keyword::Dim) => handle_dim(compiler, line_number, rest),
        Some(Keyword::Input) => handle_input(compiler, line_number, rest),
        Some(Keyword::Print) => handle_print(compiler, line_number, rest),
        Some(Keyword::Data) => handle_data(compiler, rest),
        Some(Keyword::Read) => handle_read(compiler, line_number, rest),
        Some(Keyword::Restore) => handle_restore(compiler, line_number, rest),
        Some(Keyword::Poke) => handle_poke(compiler, line_number, rest, Int16Byte::Low),
        Some(Keyword::Doke) => handle_poke(compiler, line_number, rest, Int16Byte::Both),
        Some(Keyword::DefFn) => handle_def_fn(compiler, line_number, rest),
        Some(Keyword::End) => {
            compiler.emit("HALT", "", 1);
            Ok(())
        }
        Some(Keyword::External(routine)) => {
            // Out of scope (spec.md section 1): parse nothing further,
            // just synthesize the call the runtime library owns.
            let _ = rest;
            compiler.emit("CALL", routine, 3);
            Ok(())
        }
        None => handle_assignment(compiler, line_number, stmt),
    }
}

// ---- assignment -----------------------------------------------------------

/// `NAME = expr`, `NAME$ = expr`, or `NAME(idx,...) = expr`. Scalars and
/// plain string variables are auto-created on first assignment (spec.md
/// section 3: "created on first assignment or DIM"); arrays must already
/// have been `DIM`'d.
fn handle_assignment(compiler: &mut Compiler, line_number: u32, stmt: &str) -> Result<(), CodeGenError> {
    let eq_pos = find_top_level(stmt, '=').ok_or_else(|| format!("expected '=' in statement: {stmt}"))?;
    let (lhs, rhs) = (stmt[..eq_pos].trim(), stmt[eq_pos + 1..].trim());

    if let Some(paren) = lhs.find('(') {
        let name = lhs[..paren].trim();
        let index_text = lhs[paren + 1..lhs.rfind(')').unwrap_or(lhs.len())].to_string();
        let indices: Vec<String> = split_outside_strings(&index_text, ',')
            .into_iter()
            .map(|s| s.trim().to_string())
            .collect();
        let (base, int16_byte) = split_dot_suffix(name);
        return crate::codegen::arrays::emit_array_write(
            compiler,
            line_number,
            &base,
            &indices,
            rhs,
            int16_byte,
        );
    }

    if let Some(name) = lhs.strip_suffix('$') {
        if compiler.tables.find_string_var(name).is_none() {
            declare_string_var(compiler, name, line_number);
        }
        return crate::codegen::strings::emit_string_assign(compiler, line_number, name, rhs);
    }

    let (base, int16_byte) = split_dot_suffix(lhs);
    if compiler.tables.find_int_var(&base).is_none() {
        declare_int_var(compiler, &base, line_number);
    }
    let result = evaluate_and_materialize(compiler, rhs, line_number);
    let idx = compiler.tables.find_int_var(&base).unwrap();
    if let VarKind::Number = result.var_kind {
        compiler.tables.int_vars[idx].data = result.as_u16() as i16;
    }
    let label = compiler.tables.int_vars[idx].output_label.trim().to_string();
    let store_op = match int16_byte {
        Int16Byte::Low | Int16Byte::High => "POKE",
        Int16Byte::Both => "STW",
    };
    compiler.emit(store_op, &label, 2);
    Ok(())
}

fn declare_int_var(compiler: &mut Compiler, name: &str, line_number: u32) {
    let address = compiler.zero_page.allocate(line_number, &mut compiler.diagnostics);
    compiler.tables.int_vars.push(IntVar::new_scalar(name, address, line_number));
}

fn declare_string_var(compiler: &mut Compiler, name: &str, line_number: u32) {
    let address = compiler
        .free_ram
        .get_free_ram(
            Fit::Ascending,
            34,
            crate::consts::USER_CODE_START,
            compiler.runtime_start,
            false,
            name,
        )
        .unwrap_or_else(|e| {
            compiler.error(line_number, e);
            0
        });
    compiler.tables.string_vars.push(StringVar::new_variable(name, address, 32));
}

fn split_dot_suffix(ident: &str) -> (String, Int16Byte) {
    if let Some(base) = ident.strip_suffix(".LO").or_else(|| ident.strip_suffix(".lo")) {
        (base.trim().to_string(), Int16Byte::Low)
    } else if let Some(base) = ident.strip_suffix(".HI").or_else(|| ident.strip_suffix(".hi")) {
        (base.trim().to_string(), Int16Byte::High)
    } else {
        (ident.trim().to_string(), Int16Byte::Both)
    }
}

/// Index of the first occurrence of `needle` outside string literals and
/// parenthesised groups (so `A(I)=B` finds the assignment `=`, not one
/// buried in an index expression).
fn find_top_level(s: &str, needle: char) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => depth -= 1,
            c if c == needle && !in_string && depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

// ---- conditionals ----------------------------------------------------------

/// Materialize `n`'s value into the accumulator so a subsequent branch can
/// test it, the same minimal-cases approach `codegen::arrays` and
/// `codegen::strings` take for values they didn't emit themselves.
fn materialize_condition(compiler: &mut Compiler, n: &Numeric) {
    match n.var_kind {
        VarKind::Number if n.value.is_finite() => {
            compiler.emit("LDI", &format!("{}", n.as_u16()), 2);
        }
        VarKind::IntVar => {
            let label = compiler.tables.int_vars[n.index as usize].output_label.trim().to_string();
            compiler.emit("LDW", &label, 2);
        }
        _ => {}
    }
}

fn handle_if(compiler: &mut Compiler, line_number: u32, rest: &str) -> Result<(), CodeGenError> {
    let cond_text = strip_trailing_then(rest);
    let mut eval = Evaluator::new(compiler, cond_text, line_number);
    let cond = eval.evaluate();
    materialize_condition(compiler, &cond);

    let else_label = compiler.synthetic_label_name("else");
    let endif_label = compiler.synthetic_label_name("endif");
    compiler.emit("BEQ", &else_label, 3);
    compiler.control_flow.if_else_elseif.push(IfFrame {
        else_label,
        endif_label,
        else_seen: false,
    });
    Ok(())
}

fn strip_trailing_then(rest: &str) -> &str {
    let trimmed = rest.trim_end();
    trimmed
        .strip_suffix("THEN")
        .or_else(|| trimmed.strip_suffix("then"))
        .map(str::trim_end)
        .unwrap_or(trimmed)
}

fn handle_elseif(compiler: &mut Compiler, line_number: u32, rest: &str) -> Result<(), CodeGenError> {
    let frame = compiler
        .control_flow
        .if_else_elseif
        .last()
        .cloned()
        .ok_or_else(|| "ELSEIF without a matching IF".to_string())?;
    if frame.else_seen {
        return Err("ELSEIF after ELSE on the same IF".to_string().into());
    }
    compiler.emit("JMP", &frame.endif_label, 3);
    let label = Label::new(&frame.else_label, 0, line_number, false);
    compiler.set_next_internal_label(label);

    let cond_text = strip_trailing_then(rest);
    let mut eval = Evaluator::new(compiler, cond_text, line_number);
    let cond = eval.evaluate();
    materialize_condition(compiler, &cond);

    let new_else_label = compiler.synthetic_label_name("elseif");
    compiler.emit("BEQ", &new_else_label, 3);
    let top = compiler.control_flow.if_else_elseif.last_mut().unwrap();
    top.else_label = new_else_label;
    Ok(())
}

fn handle_else(compiler: &mut Compiler, line_number: u32) -> Result<(), CodeGenError> {
    let frame = compiler
        .control_flow
        .if_else_elseif
        .last()
        .cloned()
        .ok_or_else(|| "ELSE without a matching IF".to_string())?;
    if frame.else_seen {
        return Err("duplicate ELSE on the same IF".to_string().into());
    }
    compiler.emit("JMP", &frame.endif_label, 3);
    let label = Label::new(&frame.else_label, 0, line_number, false);
    compiler.set_next_internal_label(label);
    compiler.control_flow.if_else_elseif.last_mut().unwrap().else_seen = true;
    Ok(())
}

fn handle_endif(compiler: &mut Compiler, line_number: u32) -> Result<(), CodeGenError> {
    let frame = compiler
        .control_flow
        .if_else_elseif
        .pop()
        .ok_or_else(|| "ENDIF without a matching IF".to_string())?;
    if !frame.else_seen {
        let label = Label::new(&frame.else_label, 0, line_number, false);
        compiler.set_next_internal_label(label);
    }
    let label = Label::new(&frame.endif_label, 0, line_number, false);
    compiler.set_next_internal_label(label);
    Ok(())
}

// ---- loops ------------------------------------------------------------------

fn handle_for(compiler: &mut Compiler, line_number: u32, rest: &str) -> Result<(), CodeGenError> {
    let eq_pos = find_top_level(rest, '=').ok_or_else(|| "FOR requires '='".to_string())?;
    let loop_var = rest[..eq_pos].trim().to_string();
    let after_eq = rest[eq_pos + 1..].trim();
    let to_pos = find_keyword(after_eq, "TO").ok_or_else(|| "FOR requires TO".to_string())?;
    let start_expr = after_eq[..to_pos].trim();
    let after_to = after_eq[to_pos + 2..].trim();
    let (limit_expr, step_expr) = match find_keyword(after_to, "STEP") {
        Some(p) => (after_to[..p].trim(), Some(after_to[p + 4..].trim())),
        None => (after_to, None),
    };

    if compiler.tables.find_int_var(&loop_var).is_none() {
        declare_int_var(compiler, &loop_var, line_number);
    }
    let start = evaluate_and_materialize(compiler, start_expr, line_number);
    let idx = compiler.tables.find_int_var(&loop_var).unwrap();
    if let VarKind::Number = start.var_kind {
        compiler.tables.int_vars[idx].data = start.as_u16() as i16;
    }
    let label = compiler.tables.int_vars[idx].output_label.trim().to_string();
    compiler.emit("STW", &label, 2);

    let limit = {
        let mut eval = Evaluator::new(compiler, limit_expr, line_number);
        eval.evaluate()
    };
    let step = match step_expr {
        Some(expr) => {
            let mut eval = Evaluator::new(compiler, expr, line_number);
            let step = eval.evaluate();
            if !is_finite_number(&step) {
                // Non-constant step: materialize it once here and stash it
                // in `_step_tmp` so `NEXT` (which may be many lines away,
                // past the temp-var window rotating underneath it) has a
                // stable place to `ADDW` from.
                eval.materialize(&step);
                compiler.emit("STW", "_step_tmp", 2);
            }
            step
        }
        None => Numeric::number(1.0),
    };

    let top_label = compiler.synthetic_label_name("for");
    compiler.control_flow.for_next.push(ForFrame {
        loop_var,
        top_label: top_label.clone(),
        limit,
        step,
    });
    compiler.set_next_internal_label(Label::new(&top_label, 0, line_number, false));
    Ok(())
}

fn handle_next(compiler: &mut Compiler, line_number: u32, rest: &str) -> Result<(), CodeGenError> {
    let frame = compiler
        .control_flow
        .for_next
        .pop()
        .ok_or_else(|| "NEXT without a matching FOR".to_string())?;
    let requested = rest.trim();
    if !requested.is_empty() && !requested.eq_ignore_ascii_case(&frame.loop_var) {
        return Err(format!(
            "NEXT {requested} does not match innermost FOR {}",
            frame.loop_var
        )
        .into());
    }

    let next_label = compiler.synthetic_label_name("next");
    compiler.set_next_internal_label(Label::new(&next_label, 0, line_number, false));

    let idx = compiler
        .tables
        .find_int_var(&frame.loop_var)
        .ok_or_else(|| format!("unknown loop variable '{}'", frame.loop_var))?;
    let label = compiler.tables.int_vars[idx].output_label.trim().to_string();
    compiler.emit("LDW", &label, 2);
    if is_finite_number(&frame.step) {
        compiler.emit("ADDI", &format!("{}", frame.step.as_u16()), 2);
    } else {
        compiler.emit("ADDW", "_step_tmp", 2);
    }
    compiler.emit("STW", &label, 2);

    materialize_condition_owned(compiler, &frame.limit);
    let branch_op = if step_is_negative(&frame.step) { "BGE" } else { "BLE" };
    compiler.emit(branch_op, &frame.top_label, 3);
    Ok(())
}

fn materialize_condition_owned(compiler: &mut Compiler, n: &Numeric) {
    materialize_condition(compiler, n);
}

fn is_finite_number(n: &Numeric) -> bool {
    matches!(n.var_kind, VarKind::Number) && n.value.is_finite()
}

fn step_is_negative(n: &Numeric) -> bool {
    is_finite_number(n) && n.value < 0.0
}

fn handle_while(compiler: &mut Compiler, line_number: u32, rest: &str) -> Result<(), CodeGenError> {
    let top_label = compiler.synthetic_label_name("while");
    compiler.set_next_internal_label(Label::new(&top_label, 0, line_number, false));

    let mut eval = Evaluator::new(compiler, rest, line_number);
    let cond = eval.evaluate();
    materialize_condition(compiler, &cond);

    let bottom_label = compiler.synthetic_label_name("wend");
    compiler.emit("BEQ", &bottom_label, 3);
    compiler.control_flow.while_wend.push(WhileFrame { top_label, bottom_label });
    Ok(())
}

fn handle_wend(compiler: &mut Compiler, line_number: u32) -> Result<(), CodeGenError> {
    let frame = compiler
        .control_flow
        .while_wend
        .pop()
        .ok_or_else(|| "WEND without a matching WHILE".to_string())?;
    compiler.emit("JMP", &frame.top_label, 3);
    compiler.set_next_internal_label(Label::new(&frame.bottom_label, 0, line_number, false));
    Ok(())
}

fn handle_repeat(compiler: &mut Compiler, line_number: u32) -> Result<(), CodeGenError> {
    let top_label = compiler.synthetic_label_name("repeat");
    compiler.set_next_internal_label(Label::new(&top_label, 0, line_number, false));
    compiler.control_flow.repeat_until.push(RepeatFrame { top_label });
    Ok(())
}

fn handle_until(compiler: &mut Compiler, line_number: u32, rest: &str) -> Result<(), CodeGenError> {
    let frame = compiler
        .control_flow
        .repeat_until
        .pop()
        .ok_or_else(|| "UNTIL without a matching REPEAT".to_string())?;
    let mut eval = Evaluator::new(compiler, rest, line_number);
    let cond = eval.evaluate();
    materialize_condition(compiler, &cond);
    compiler.emit("BEQ", &frame.top_label, 3);
    Ok(())
}

// ---- jumps ------------------------------------------------------------------

/// Resolve a `GOTO`/`GOSUB` target to its output label name: a bare number
/// names a numeric line label (`_L<n>`), anything else names a text label.
fn resolve_jump_target(compiler: &mut Compiler, line_number: u32, target: &str) -> Result<String, CodeGenError> {
    let target = target.trim();
    let name = if target.chars().all(|c| c.is_ascii_digit()) {
        format!("_L{target}")
    } else {
        target.to_ascii_uppercase()
    };
    if compiler.tables.find_user_label(&name).is_none() {
        return Err(format!("undefined label '{target}'").into());
    }
    let _ = line_number;
    Ok(name)
}

fn handle_goto(compiler: &mut Compiler, line_number: u32, rest: &str) -> Result<(), CodeGenError> {
    let name = resolve_jump_target(compiler, line_number, rest)?;
    compiler.emit("JMP", &name, 3);
    Ok(())
}

fn handle_gosub(compiler: &mut Compiler, line_number: u32, rest: &str) -> Result<(), CodeGenError> {
    let name = resolve_jump_target(compiler, line_number, rest)?;
    compiler.emit("CALL", &name, 3);
    Ok(())
}

/// `ON expr GOTO l1,l2,...` / `ON expr GOSUB l1,l2,...`: evaluates the
/// selector, stores each target's label-table index into the current code
/// line's `on_goto_lut` (resolved to an address at output time, the same
/// deferred-resolution convention `str_concat_lut` uses), then calls the
/// runtime dispatch helper matching the chosen verb.
fn handle_on(compiler: &mut Compiler, line_number: u32, rest: &str) -> Result<(), CodeGenError> {
    let (verb, selector_expr, targets_text) = if let Some(p) = find_keyword(rest, "GOTO") {
        ("GOTO", &rest[..p], &rest[p + 4..])
    } else if let Some(p) = find_keyword(rest, "GOSUB") {
        ("GOSUB", &rest[..p], &rest[p + 5..])
    } else {
        return Err("ON requires GOTO or GOSUB".to_string().into());
    };

    let mut eval = Evaluator::new(compiler, selector_expr.trim(), line_number);
    let selector = eval.evaluate();
    eval.materialize(&selector);

    for target in split_outside_strings(targets_text, ',') {
        let target = target.trim();
        if target.is_empty() {
            continue;
        }
        let name = resolve_jump_target(compiler, line_number, target)?;
        let label_idx = compiler.tables.find_user_label(&name).unwrap() as u16;
        compiler.record_on_goto_target(label_idx);
    }

    let helper = if verb == "GOTO" { "OnGotoOp" } else { "OnGosubOp" };
    compiler.emit_call(helper);
    Ok(())
}

// ---- DIM / INPUT / PRINT / DATA / READ / RESTORE / POKE / DEF FN ----------

fn handle_dim(compiler: &mut Compiler, line_number: u32, rest: &str) -> Result<(), CodeGenError> {
    let paren = rest.find('(').ok_or_else(|| "DIM requires array dimensions".to_string())?;
    let name = rest[..paren].trim();
    let close = rest.rfind(')').ok_or_else(|| "DIM missing closing ')'".to_string())?;
    let dims_text = &rest[paren + 1..close];
    let after = rest[close + 1..].trim();

    let mut dims = Vec::new();
    for d in split_outside_strings(dims_text, ',') {
        let mut eval = Evaluator::new(compiler, d.trim(), line_number);
        dims.push(eval.evaluate().as_u16());
    }
    if dims.is_empty() || dims.len() > 3 {
        return Err("DIM supports 1 to 3 dimensions".to_string().into());
    }

    let mut inits = Vec::new();
    if let Some(inits_text) = after.strip_prefix('=') {
        for v in split_outside_strings(inits_text, ',') {
            let mut eval = Evaluator::new(compiler, v.trim(), line_number);
            inits.push(eval.evaluate().as_u16() as i16);
        }
    }

    let mut var = IntVar::new_scalar(name, 0, line_number);
    var.var_type = match dims.len() {
        1 => IntVarType::Array1,
        2 => IntVarType::Array2,
        _ => IntVarType::Array3,
    };
    var.arr_sizes = [
        dims.first().copied().unwrap_or(0),
        dims.get(1).copied().unwrap_or(0),
        dims.get(2).copied().unwrap_or(0),
    ];
    let total = var.total_elements();
    let default_init = inits.first().copied().unwrap_or(0);
    var.arr_inits = (0..total as usize)
        .map(|i| inits.get(i).copied().unwrap_or(default_init))
        .collect();

    let address = compiler
        .free_ram
        .get_free_ram(
            Fit::Ascending,
            total as u16 * 2,
            crate::consts::USER_CODE_START,
            compiler.runtime_start,
            false,
            name,
        )
        .map_err(CodeGenError::Logic)?;
    var.address = address;
    compiler.tables.int_vars.push(var);
    Ok(())
}

fn handle_input(compiler: &mut Compiler, line_number: u32, rest: &str) -> Result<(), CodeGenError> {
    for name in split_outside_strings(rest, ',') {
        let name = name.trim();
        if let Some(base) = name.strip_suffix('$') {
            if compiler.tables.find_string_var(base).is_none() {
                declare_string_var(compiler, base, line_number);
            }
            let idx = compiler.tables.find_string_var(base).unwrap();
            compiler.emit_call("InputStringOp");
            let label = compiler.tables.string_vars[idx].output_label.trim().to_string();
            compiler.emit("STW", &label, 2);
        } else {
            if compiler.tables.find_int_var(name).is_none() {
                declare_int_var(compiler, name, line_number);
            }
            let idx = compiler.tables.find_int_var(name).unwrap();
            compiler.emit_call("InputIntOp");
            let label = compiler.tables.int_vars[idx].output_label.trim().to_string();
            compiler.emit("STW", &label, 2);
        }
    }
    Ok(())
}

fn handle_print(compiler: &mut Compiler, line_number: u32, rest: &str) -> Result<(), CodeGenError> {
    for part in split_outside_strings(rest, ',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let mut eval = Evaluator::new(compiler, part, line_number);
        let value = eval.evaluate();
        if value.var_kind == VarKind::String || value.var_kind == VarKind::StrVar {
            eval.materialize(&value);
            compiler.emit_call("PrintStringOp");
        } else {
            eval.materialize(&value);
            compiler.emit_call("PrintIntOp");
        }
    }
    Ok(())
}

fn handle_data(compiler: &mut Compiler, rest: &str) -> Result<(), CodeGenError> {
    let mut bytes = Vec::new();
    for item in split_outside_strings(rest, ',') {
        let item = item.trim();
        if let Some(text) = item.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
            bytes.extend_from_slice(text.as_bytes());
            bytes.push(0);
        } else if let Ok(v) = item.parse::<i32>() {
            bytes.extend_from_slice(&(v as i16).to_le_bytes());
        }
    }
    match compiler.tables.def_data.iter().position(|d| d.name == "_data") {
        Some(idx) => compiler.tables.def_data[idx].bytes.extend(bytes),
        None => compiler.tables.def_data.push(crate::symbols::DefData {
            name: "_data".to_string(),
            address: 0,
            bytes,
            lut_address: None,
        }),
    }
    Ok(())
}

fn handle_read(compiler: &mut Compiler, line_number: u32, rest: &str) -> Result<(), CodeGenError> {
    for name in split_outside_strings(rest, ',') {
        let name = name.trim();
        if compiler.tables.find_int_var(name).is_none() {
            declare_int_var(compiler, name, line_number);
        }
        let idx = compiler.tables.find_int_var(name).unwrap();
        compiler.emit_call("ReadOp");
        let label = compiler.tables.int_vars[idx].output_label.trim().to_string();
        compiler.emit("STW", &label, 2);
    }
    Ok(())
}

fn handle_restore(compiler: &mut Compiler, line_number: u32, rest: &str) -> Result<(), CodeGenError> {
    let target = rest.trim();
    if target.is_empty() {
        compiler.emit_call("RestoreOp");
    } else {
        let name = resolve_jump_target(compiler, line_number, target)?;
        compiler.emit("CALL", &format!("RestoreOp+{name}"), 3);
    }
    Ok(())
}

fn handle_poke(
    compiler: &mut Compiler,
    line_number: u32,
    rest: &str,
    default_byte: Int16Byte,
) -> Result<(), CodeGenError> {
    let comma = find_top_level(rest, ',').ok_or_else(|| "POKE/DOKE requires two arguments".to_string())?;
    let addr_expr = rest[..comma].trim();
    let val_expr = rest[comma + 1..].trim();

    let addr = {
        let mut eval = Evaluator::new(compiler, addr_expr, line_number);
        eval.evaluate()
    };
    let opcode = if default_byte == Int16Byte::Both { "DOKE" } else { "POKE" };

    if is_finite_number(&addr) {
        // Constant address: the value lands in the accumulator and the
        // address is a literal operand on the store itself.
        evaluate_and_materialize(compiler, val_expr, line_number);
        compiler.emit(opcode, &format!("{:#06x}", addr.as_u16()), 2);
    } else {
        // Computed address: park it before materializing the value, since
        // the value's materialization is the last thing to own the AC.
        materialize_condition(compiler, &addr);
        compiler.emit("STW", "_pokeAddrTmp", 2);
        evaluate_and_materialize(compiler, val_expr, line_number);
        compiler.emit_call(if opcode == "DOKE" { "DokeIndirectOp" } else { "PokeIndirectOp" });
    }
    Ok(())
}

/// `DEF FN NAME(p1,...,pN) = body` (spec.md section 4.1.2): registers the
/// textual template; emits no code.
fn handle_def_fn(compiler: &mut Compiler, line_number: u32, rest: &str) -> Result<(), CodeGenError> {
    let rest = rest.trim().strip_prefix("FN").unwrap_or(rest).trim();
    let paren = rest.find('(').ok_or_else(|| "DEF FN requires a parameter list".to_string())?;
    let name = rest[..paren].trim().to_string();
    let close = rest.rfind(')').ok_or_else(|| "DEF FN missing closing ')'".to_string())?;
    let params: Vec<String> = split_outside_strings(&rest[paren + 1..close], ',')
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    let eq_pos = find_top_level(&rest[close + 1..], '=')
        .ok_or_else(|| "DEF FN requires '= body'".to_string())?;
    let body = rest[close + 1 + eq_pos + 1..].trim().to_string();

    let _ = line_number;
    compiler.tables.user_fns.push(crate::symbols::UserFn { name, params, body });
    Ok(())
}

/// Find the first standalone occurrence of an uppercase keyword as a whole
/// word, outside string literals (used for `TO`/`STEP`/`GOTO`/`GOSUB`).
fn find_keyword(s: &str, keyword: &str) -> Option<usize> {
    let upper = s.to_ascii_uppercase();
    let mut search_from = 0;
    while let Some(rel) = upper[search_from..].find(keyword) {
        let start = search_from + rel;
        let end = start + keyword.len();
        let before_ok = start == 0 || !upper.as_bytes()[start - 1].is_ascii_alphanumeric();
        let after_ok = end >= upper.len() || !upper.as_bytes()[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return Some(start);
        }
        search_from = end;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::consts::USER_CODE_START;

    fn new_compiler() -> Compiler {
        Compiler::new(CompilerConfig::default())
    }

    #[test]
    fn bare_assignment_creates_variable_and_stores() {
        let mut c = new_compiler();
        dispatch_statement(&mut c, 10, "A = 1 + 2").unwrap();
        assert!(c.tables.find_int_var("A").is_some());
        assert!(c.pc() > USER_CODE_START);
    }

    #[test]
    fn string_assignment_auto_declares_string_variable() {
        let mut c = new_compiler();
        dispatch_statement(&mut c, 10, "A$ = \"HI\"").unwrap();
        assert!(c.tables.find_string_var("A").is_some());
    }

    #[test]
    fn if_endif_pushes_and_pops_if_frame() {
        let mut c = new_compiler();
        dispatch_statement(&mut c, 10, "IF A = 1 THEN").unwrap();
        assert_eq!(c.control_flow.if_else_elseif.len(), 1);
        dispatch_statement(&mut c, 11, "ENDIF").unwrap();
        assert!(c.control_flow.if_else_elseif.is_empty());
    }

    #[test]
    fn endif_without_if_is_an_error() {
        let mut c = new_compiler();
        assert!(dispatch_statement(&mut c, 10, "ENDIF").is_err());
    }

    #[test]
    fn for_next_round_trips_control_flow_stack() {
        let mut c = new_compiler();
        dispatch_statement(&mut c, 10, "FOR I = 1 TO 10").unwrap();
        assert_eq!(c.control_flow.for_next.len(), 1);
        dispatch_statement(&mut c, 11, "NEXT I").unwrap();
        assert!(c.control_flow.for_next.is_empty());
    }

    #[test]
    fn next_with_mismatched_variable_is_an_error() {
        let mut c = new_compiler();
        dispatch_statement(&mut c, 10, "FOR I = 1 TO 10").unwrap();
        assert!(dispatch_statement(&mut c, 11, "NEXT J").is_err());
    }

    #[test]
    fn while_wend_round_trips() {
        let mut c = new_compiler();
        dispatch_statement(&mut c, 10, "WHILE A").unwrap();
        assert_eq!(c.control_flow.while_wend.len(), 1);
        dispatch_statement(&mut c, 11, "WEND").unwrap();
        assert!(c.control_flow.while_wend.is_empty());
    }

    #[test]
    fn repeat_until_round_trips() {
        let mut c = new_compiler();
        dispatch_statement(&mut c, 10, "REPEAT").unwrap();
        assert_eq!(c.control_flow.repeat_until.len(), 1);
        dispatch_statement(&mut c, 11, "UNTIL A = 1").unwrap();
        assert!(c.control_flow.repeat_until.is_empty());
    }

    #[test]
    fn goto_unknown_label_is_an_error() {
        let mut c = new_compiler();
        assert!(dispatch_statement(&mut c, 10, "GOTO 9999").is_err());
    }

    #[test]
    fn goto_known_numeric_label_emits_jmp() {
        let mut c = new_compiler();
        c.tables.user_labels.push(Label::new("_L1000", 0, 0, true));
        dispatch_statement(&mut c, 10, "GOTO 1000").unwrap();
        assert!(c.pc() > USER_CODE_START);
    }

    #[test]
    fn dim_declares_array_with_initializers() {
        let mut c = new_compiler();
        dispatch_statement(&mut c, 10, "DIM A(3) = 1,2,3").unwrap();
        let idx = c.tables.find_int_var("A").unwrap();
        assert_eq!(c.tables.int_vars[idx].arr_inits, vec![1, 2, 3]);
    }

    #[test]
    fn dim_pads_remaining_cells_with_default_init() {
        let mut c = new_compiler();
        dispatch_statement(&mut c, 10, "DIM A(5) = 9").unwrap();
        let idx = c.tables.find_int_var("A").unwrap();
        assert_eq!(c.tables.int_vars[idx].arr_inits, vec![9, 9, 9, 9, 9]);
    }

    #[test]
    fn def_fn_registers_template_without_emitting_code() {
        let mut c = new_compiler();
        dispatch_statement(&mut c, 10, "DEF FN SQ(X) = X*X").unwrap();
        assert!(c.tables.find_user_fn("SQ").is_some());
        assert_eq!(c.pc(), USER_CODE_START);
    }

    #[test]
    fn data_statement_appends_bytes_without_emitting_code() {
        let mut c = new_compiler();
        dispatch_statement(&mut c, 10, "DATA 1,2,3").unwrap();
        assert_eq!(c.pc(), USER_CODE_START);
        assert_eq!(c.tables.def_data.len(), 1);
    }

    #[test]
    fn end_emits_halt() {
        let mut c = new_compiler();
        dispatch_statement(&mut c, 10, "END").unwrap();
        assert!(c.pc() > USER_CODE_START);
    }

    #[test]
    fn external_sprite_keyword_emits_a_call_without_owning_its_body() {
        let mut c = new_compiler();
        dispatch_statement(&mut c, 10, "SPRITE 0, 10, 20").unwrap();
        assert!(c.pc() > USER_CODE_START);
    }

    #[test]
    fn on_goto_records_label_indices_for_each_target() {
        let mut c = new_compiler();
        c.tables.user_labels.push(Label::new("_L100", 0, 0, true));
        c.tables.user_labels.push(Label::new("_L200", 0, 0, true));
        dispatch_statement(&mut c, 10, "ON 1 GOTO 100, 200").unwrap();
        assert!(c.pc() > USER_CODE_START);
    }

    #[test]
    fn on_goto_unknown_target_is_an_error() {
        let mut c = new_compiler();
        assert!(dispatch_statement(&mut c, 10, "ON 1 GOTO 999").is_err());
    }

    #[test]
    fn poke_with_constant_address_emits_immediate_operand() {
        let mut c = new_compiler();
        let start = c.pc();
        dispatch_statement(&mut c, 10, "POKE 0x40, 5").unwrap();
        assert!(c.pc() > start);
    }
}
