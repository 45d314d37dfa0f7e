//! Recursive-descent expression evaluator (spec.md section 4.1).
//!
//! Operates directly on a mutable character buffer rather than a pre-built
//! token stream: user-defined function calls splice their substituted body
//! back into that buffer and restart factor parsing from the splice offset
//! (section 4.1.2), so the buffer has to stay live and mutable across the
//! whole descent, per the Design Notes' instruction to preserve this
//! semantic exactly.

use crate::compiler::Compiler;
use crate::keywords::{is_inbuilt_function, is_reserved};
use crate::symbols::IntVarType;
use crate::types::{CcKind, Int16Byte, Numeric, VarKind};

/// Parse state for one expression. Does not own the `Compiler` for its
/// whole lifetime the way a `Parser` struct might; instead each recursive
/// call borrows it mutably for the duration of a single evaluation so
/// emission (symbol lookups, instruction emission, temp-var allocation)
/// can happen inline as the grammar descends.
pub struct Evaluator<'c> {
    compiler: &'c mut Compiler,
    chars: Vec<char>,
    pos: usize,
    line: u32,
}

/// `value.is_nan()` marks "not known at compile time" rather than a real
/// NaN from user arithmetic (the source language has no float literals);
/// this lets constant folding and runtime-materialized results share one
/// `Numeric::value` field without a second boolean.
fn unknown_number() -> Numeric {
    Numeric::number(f64::NAN)
}

fn is_compile_time_constant(n: &Numeric) -> bool {
    matches!(n.var_kind, VarKind::Number) && n.value.is_finite()
}

impl<'c> Evaluator<'c> {
    pub fn new(compiler: &'c mut Compiler, expr: &str, line: u32) -> Self {
        Evaluator {
            compiler,
            chars: expr.chars().collect(),
            pos: 0,
            line,
        }
    }

    /// Entry point: parse a full `expression` and emit whatever code was
    /// needed to materialize it.
    pub fn evaluate(&mut self) -> Numeric {
        let result = self.parse_expression();
        self.skip_ws();
        result
    }

    // ---- character-level helpers -----------------------------------

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        self.skip_ws();
        let s_chars: Vec<char> = s.chars().collect();
        if self.chars[self.pos..].starts_with(s_chars.as_slice()) {
            self.pos += s_chars.len();
            true
        } else {
            false
        }
    }

    fn eat_char(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&mut self, message: impl Into<String>) -> Numeric {
        self.compiler.error(self.line, message);
        Numeric::invalid()
    }

    /// Read a bare identifier (letters, digits, `_`), including a trailing
    /// `$` (string-variable sigil) and an optional `.LO`/`.HI` suffix.
    fn read_ident(&mut self) -> Option<String> {
        self.skip_ws();
        let start = self.pos;
        if !matches!(self.peek(), Some(c) if c.is_alphabetic() || c == '_') {
            return None;
        }
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        if self.peek() == Some('$') {
            self.pos += 1;
        }
        Some(self.chars[start..self.pos].iter().collect())
    }

    fn read_number(&mut self) -> Option<f64> {
        self.skip_ws();
        let start = self.pos;
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.pos += 2;
            let hex_start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let hex: String = self.chars[hex_start..self.pos].iter().collect();
            return u32::from_str_radix(&hex, 16).ok().map(|v| v as f64);
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        let s: String = self.chars[start..self.pos].iter().collect();
        s.parse().ok()
    }

    fn read_string_literal(&mut self) -> Option<String> {
        self.skip_ws();
        if self.peek() != Some('"') {
            return None;
        }
        self.pos += 1;
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c != '"') {
            self.pos += 1;
        }
        let s: String = self.chars[start..self.pos].iter().collect();
        if self.peek() == Some('"') {
            self.pos += 1;
        }
        Some(s)
    }

    // ---- grammar ------------------------------------------------------

    /// `expression := logical ( cmp_op logical )*`
    fn parse_expression(&mut self) -> Numeric {
        let mut lhs = self.parse_logical();
        loop {
            self.skip_ws();
            let Some(cc_kind) = self.peek_comparison_family() else {
                break;
            };
            let Some(op) = self.eat_comparison_operator() else {
                break;
            };
            let rhs = self.parse_logical();
            lhs = self.lower_comparison(cc_kind, &op, lhs, rhs);
        }
        lhs
    }

    /// Which CC family the next comparison operator belongs to, without
    /// consuming it: `&&` is Fast, a lone `&` is Normal, anything else in
    /// the comparison set is Boolean.
    fn peek_comparison_family(&self) -> Option<CcKind> {
        let mut p = self.pos;
        while matches!(self.chars.get(p), Some(c) if c.is_whitespace()) {
            p += 1;
        }
        match self.chars.get(p) {
            Some('&') if self.chars.get(p + 1) == Some(&'&') => Some(CcKind::FastCC),
            Some('&') => Some(CcKind::NormalCC),
            Some('=') | Some('<') | Some('>') => Some(CcKind::BooleanCC),
            _ => None,
        }
    }

    fn eat_comparison_operator(&mut self) -> Option<String> {
        self.skip_ws();
        for op in ["&&=", "&&<>", "&&<=", "&&>=", "&&<", "&&>", "&&=="] {
            if self.eat_str(op) {
                return Some(op.trim_start_matches("&&").to_string());
            }
        }
        for op in ["&=", "&<>", "&<=", "&>=", "&<", "&>", "&=="] {
            if self.eat_str(op) {
                return Some(op.trim_start_matches('&').to_string());
            }
        }
        for op in ["==", "<>", "<=", ">=", "<", ">", "="] {
            if self.eat_str(op) {
                return Some(op.to_string());
            }
        }
        None
    }

    fn lower_comparison(&mut self, cc_kind: CcKind, op: &str, lhs: Numeric, rhs: Numeric) -> Numeric {
        if is_compile_time_constant(&lhs) && is_compile_time_constant(&rhs) {
            let truth = match op {
                "=" | "==" => lhs.value == rhs.value,
                "<>" => lhs.value != rhs.value,
                "<=" => lhs.value <= rhs.value,
                ">=" => lhs.value >= rhs.value,
                "<" => lhs.value < rhs.value,
                ">" => lhs.value > rhs.value,
                _ => false,
            };
            let mut n = Numeric::number(if truth { -1.0 } else { 0.0 });
            n.cc_kind = cc_kind;
            return n;
        }
        // Materialize both operands, then jump to the matching ROM test
        // stub named after the operator (spec.md section 4.1.3).
        self.materialize(&lhs);
        let tmp = self.compiler.next_temp_var();
        self.compiler.emit("STW", &format!("0x{tmp:04x}"), 2);
        self.materialize(&rhs);
        let stub = match op {
            "=" | "==" => "EqOp",
            "<>" => "NeOp",
            "<=" => "LeOp",
            ">=" => "GeOp",
            "<" => "LtOp",
            ">" => "GtOp",
            _ => "EqOp",
        };
        self.compiler.emit_call(stub);
        let mut result = unknown_number();
        result.cc_kind = cc_kind;
        result
    }

    /// `logical := expr ( bool_op expr )*`
    fn parse_logical(&mut self) -> Numeric {
        let mut lhs = self.parse_expr();
        loop {
            self.skip_ws();
            if self.eat_str("AND") {
                let rhs = self.parse_expr();
                lhs = self.fold_or_emit_int(lhs, rhs, "ANDI", "ANDW", |a, b| {
                    ((a as i64) & (b as i64)) as f64
                });
            } else if self.eat_str("OR") {
                let rhs = self.parse_expr();
                lhs = self.fold_or_emit_int(lhs, rhs, "ORI", "ORW", |a, b| {
                    ((a as i64) | (b as i64)) as f64
                });
            } else {
                break;
            }
        }
        lhs
    }

    /// `expr := term ( ('+'|'-') term )*`
    fn parse_expr(&mut self) -> Numeric {
        let mut lhs = self.parse_term();
        loop {
            self.skip_ws();
            if self.peek() == Some('+') && self.peek_at(1) != Some('+') {
                self.pos += 1;
                let rhs = self.parse_term();
                lhs = self.fold_or_emit_int(lhs, rhs, "ADDI", "ADDW", |a, b| a + b);
            } else if self.peek() == Some('-') {
                self.pos += 1;
                let rhs = self.parse_term();
                lhs = self.fold_or_emit_int(lhs, rhs, "SUBI", "SUBW", |a, b| a - b);
            } else {
                break;
            }
        }
        lhs
    }

    /// `term := factor ( ('*'|'/'|'%'|'**'|MOD) factor )*`
    fn parse_term(&mut self) -> Numeric {
        let mut lhs = self.parse_factor();
        loop {
            self.skip_ws();
            if self.eat_str("**") {
                let rhs = self.parse_factor();
                lhs = self.fold_or_call(lhs, rhs, "PowOp", |a, b| a.powf(b));
            } else if self.peek() == Some('*') {
                self.pos += 1;
                let rhs = self.parse_factor();
                lhs = self.fold_or_call(lhs, rhs, "MulOp", |a, b| a * b);
            } else if self.peek() == Some('/') {
                self.pos += 1;
                let rhs = self.parse_factor();
                lhs = self.fold_or_call(lhs, rhs, "DivOp", |a, b| {
                    if b == 0.0 { 0.0 } else { (a as i64 / b as i64) as f64 }
                });
            } else if self.peek() == Some('%') || self.eat_str("MOD") {
                if self.peek() == Some('%') {
                    self.pos += 1;
                }
                let rhs = self.parse_factor();
                lhs = self.fold_or_call(lhs, rhs, "ModOp", |a, b| {
                    if b == 0.0 { 0.0 } else { (a as i64 % b as i64) as f64 }
                });
            } else {
                break;
            }
        }
        lhs
    }

    /// `factor := number | string | '(' expression ')' | '@'ident | '#'ident
    ///          | '+'factor | '-'factor | NOT factor | func_call | var_ref
    ///          | const_ref | user_fn_call`
    fn parse_factor(&mut self) -> Numeric {
        self.skip_ws();

        if self.eat_char('(') {
            let inner = self.parse_expression();
            if !self.eat_char(')') {
                return self.error("expected ')'");
            }
            return inner;
        }

        if self.eat_char('@') {
            return self.parse_address_of();
        }

        if self.eat_char('#') {
            return self.parse_length_of();
        }

        if self.peek() == Some('+') {
            self.pos += 1;
            return self.parse_factor();
        }

        if self.peek() == Some('-') {
            self.pos += 1;
            let operand = self.parse_factor();
            return self.fold_or_emit_int(Numeric::number(0.0), operand, "SUBI", "SUBW", |_, b| -b);
        }

        if self.eat_str("NOT") {
            let operand = self.parse_factor();
            if is_compile_time_constant(&operand) {
                return Numeric::number(if operand.value == 0.0 { -1.0 } else { 0.0 });
            }
            self.materialize(&operand);
            self.compiler.emit("NOTW", "", 1);
            return unknown_number();
        }

        if let Some(value) = self.read_number() {
            return Numeric::number(value);
        }

        if let Some(text) = self.read_string_literal() {
            let mut n = Numeric::number(0.0);
            n.var_kind = VarKind::String;
            n.text = text;
            return n;
        }

        let checkpoint = self.pos;
        if let Some(ident) = self.read_ident() {
            return self.resolve_identifier(ident, checkpoint);
        }

        self.error(format!(
            "unexpected character in expression: {:?}",
            self.peek()
        ))
    }

    fn parse_address_of(&mut self) -> Numeric {
        let Some(name) = self.read_ident() else {
            return self.error("expected identifier after '@'");
        };
        let base = self.resolve_bare_name(&name);
        let mut n = Numeric::number(base.value);
        n.is_address = true;
        n.var_kind = base.var_kind;
        n.name = name;
        n
    }

    fn parse_length_of(&mut self) -> Numeric {
        let Some(name) = self.read_ident() else {
            return self.error("expected identifier after '#'");
        };
        if let Some(idx) = self.compiler.tables.find_string_var(&name) {
            return Numeric::number(self.compiler.tables.string_vars[idx].size as f64);
        }
        self.error(format!("'{name}' is not a string variable"))
    }

    /// Disambiguate a bare identifier per spec.md section 4.1.1: integer
    /// var, string var, constant, label (only with a leading `@`, handled
    /// separately), inbuilt function, user-defined function, then reserved
    /// keyword (an error at this position).
    fn resolve_identifier(&mut self, ident: String, start_pos: usize) -> Numeric {
        let (base_name, int16_byte) = split_byte_suffix(&ident);

        self.skip_ws();
        if self.peek() == Some('(') {
            if is_inbuilt_function(&base_name) {
                return self.parse_inbuilt_call(&base_name);
            }
            if self.compiler.tables.find_user_fn(&base_name).is_some() {
                return self.inline_user_fn_call(&base_name, start_pos);
            }
            if let Some(idx) = self.compiler.tables.find_int_var(&base_name) {
                if self.compiler.tables.int_vars[idx].var_type != IntVarType::Scalar {
                    return self.parse_array_index_read(idx);
                }
            }
        }

        let mut n = self.resolve_bare_name(&base_name);
        n.int16_byte = int16_byte;
        n
    }

    fn resolve_bare_name(&mut self, name: &str) -> Numeric {
        if let Some(idx) = self.compiler.tables.find_int_var(name) {
            let var = &self.compiler.tables.int_vars[idx];
            let mut n = Numeric::number(var.data as f64);
            n.index = idx as i32;
            n.var_kind = VarKind::IntVar;
            n.name = name.to_string();
            n.relocatable = true;
            return n;
        }
        if let Some(idx) = self.compiler.tables.find_string_var(name) {
            let mut n = Numeric::number(0.0);
            n.index = idx as i32;
            n.var_kind = VarKind::StrVar;
            n.name = name.to_string();
            return n;
        }
        if let Some(idx) = self.compiler.tables.find_constant(name) {
            let c = &self.compiler.tables.constants[idx];
            let value = match &c.data {
                crate::symbols::ConstData::Int(v) => *v as f64,
                crate::symbols::ConstData::Text(_) => 0.0,
            };
            let mut n = Numeric::number(value);
            n.index = idx as i32;
            n.var_kind = VarKind::Constant;
            n.name = name.to_string();
            return n;
        }
        if is_reserved(name) {
            return self.error(format!("'{name}' is a reserved keyword and cannot be used here"));
        }
        self.error(format!("unknown identifier '{name}'"))
    }

    fn parse_inbuilt_call(&mut self, name: &str) -> Numeric {
        self.eat_char('(');
        let mut args = Vec::new();
        if self.peek() != Some(')') {
            loop {
                args.push(self.parse_expression());
                if !self.eat_char(',') {
                    break;
                }
            }
        }
        if !self.eat_char(')') {
            return self.error("expected ')' after function arguments");
        }
        match name {
            "ABS" => {
                if let Some(a) = args.first().filter(|a| is_compile_time_constant(a)) {
                    return Numeric::number(a.value.abs());
                }
            }
            "SGN" => {
                if let Some(a) = args.first().filter(|a| is_compile_time_constant(a)) {
                    return Numeric::number(a.value.signum());
                }
            }
            _ => {}
        }
        for a in &args {
            self.materialize(a);
        }
        self.compiler.emit("CALL", name, 3);
        unknown_number()
    }

    fn parse_array_index_read(&mut self, _var_idx: usize) -> Numeric {
        self.eat_char('(');
        let mut indices = Vec::new();
        loop {
            indices.push(self.parse_expression());
            if !self.eat_char(',') {
                break;
            }
        }
        self.eat_char(')');
        for (i, idx) in indices.iter().enumerate() {
            self.materialize(idx);
            self.compiler
                .emit("STW", &format!("memIndex{i}"), 2);
        }
        let helper = match indices.len() {
            2 => "convertArr2d",
            3 => "convertArr3d",
            _ => "PeekArray",
        };
        self.compiler.emit_call(helper);
        unknown_number()
    }

    /// Textual macro substitution for `DEF FN` calls (spec.md section
    /// 4.1.2): the call's arguments are spliced as *raw text* into the
    /// function body, the result replaces the call span in the live
    /// expression buffer, and parsing restarts from the splice offset —
    /// deliberately not a recursive call, so nested user-fn calls need no
    /// extra stack.
    fn inline_user_fn_call(&mut self, name: &str, call_start: usize) -> Numeric {
        self.eat_char('(');
        let args = self.read_raw_call_args();
        if !self.eat_char(')') {
            return self.error("expected ')' closing user function call");
        }
        let call_end = self.pos;

        let idx = self.compiler.tables.find_user_fn(name).unwrap();
        let user_fn = self.compiler.tables.user_fns[idx].clone();
        if args.len() != user_fn.params.len() {
            return self.error(format!(
                "function '{}' expects {} argument(s), got {}",
                user_fn.name,
                user_fn.params.len(),
                args.len()
            ));
        }

        let mut substituted = user_fn.body.clone();
        for (param, arg) in user_fn.params.iter().zip(args.iter()) {
            substituted = substitute_word(&substituted, param, &format!("({arg})"));
        }

        let new_chars: Vec<char> = substituted.chars().collect();
        self.chars.splice(call_start..call_end, new_chars);
        self.pos = call_start;
        self.parse_factor()
    }

    /// Read each comma-separated call argument as raw, un-evaluated text
    /// (balancing parens and skipping string literals), since the
    /// substitution is textual, not by value.
    fn read_raw_call_args(&mut self) -> Vec<String> {
        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            return args;
        }
        loop {
            let start = self.pos;
            let mut depth = 0i32;
            let mut in_string = false;
            loop {
                match self.peek() {
                    Some('"') => {
                        in_string = !in_string;
                        self.pos += 1;
                    }
                    Some('(') if !in_string => {
                        depth += 1;
                        self.pos += 1;
                    }
                    Some(')') if !in_string && depth == 0 => break,
                    Some(')') if !in_string => {
                        depth -= 1;
                        self.pos += 1;
                    }
                    Some(',') if !in_string && depth == 0 => break,
                    Some(_) => self.pos += 1,
                    None => break,
                }
            }
            args.push(self.chars[start..self.pos].iter().collect::<String>());
            if self.peek() == Some(',') {
                self.pos += 1;
                continue;
            }
            break;
        }
        args
    }

    // ---- emission helpers ----------------------------------------------

    /// Fold two sides of an arithmetic op at compile time when both are
    /// known constants; otherwise materialize both and emit the
    /// immediate/memory variant of `opcode`.
    fn fold_or_emit_int(
        &mut self,
        lhs: Numeric,
        rhs: Numeric,
        imm_opcode: &str,
        mem_opcode: &str,
        fold: impl Fn(f64, f64) -> f64,
    ) -> Numeric {
        if is_compile_time_constant(&lhs) && is_compile_time_constant(&rhs) {
            return Numeric::number(fold(lhs.value, rhs.value));
        }
        self.materialize(&lhs);
        if is_compile_time_constant(&rhs) {
            self.compiler
                .emit(imm_opcode, &format!("{}", rhs.as_u16()), 2);
        } else {
            let tmp = self.compiler.next_temp_var();
            self.compiler.emit("STW", &format!("0x{tmp:04x}"), 2);
            self.materialize(&rhs);
            self.compiler.emit(mem_opcode, &format!("0x{tmp:04x}"), 2);
        }
        unknown_number()
    }

    /// Like [`Self::fold_or_emit_int`] but for operations the machine has no
    /// native instruction for (multiply, divide, modulo, power): emits a
    /// call to a named ROM helper instead of an immediate/memory opcode
    /// pair.
    fn fold_or_call(
        &mut self,
        lhs: Numeric,
        rhs: Numeric,
        helper: &str,
        fold: impl Fn(f64, f64) -> f64,
    ) -> Numeric {
        if is_compile_time_constant(&lhs) && is_compile_time_constant(&rhs) {
            return Numeric::number(fold(lhs.value, rhs.value));
        }
        self.materialize(&lhs);
        let tmp = self.compiler.next_temp_var();
        self.compiler.emit("STW", &format!("0x{tmp:04x}"), 2);
        self.materialize(&rhs);
        self.compiler.emit("CALL", helper, 3);
        unknown_number()
    }

    /// Emit whatever load is needed to put `n`'s value into the accumulator.
    pub(crate) fn materialize(&mut self, n: &Numeric) {
        match n.var_kind {
            VarKind::Number | VarKind::Constant if n.value.is_finite() => {
                self.compiler.emit("LDI", &format!("{}", n.as_u16()), 2);
            }
            VarKind::IntVar => {
                let label = &self.compiler.tables.int_vars[n.index as usize].output_label;
                let label = label.trim().to_string();
                self.compiler.emit("LDW", &label, 2);
            }
            _ => {
                // Already materialized by a prior call/opcode (e.g. the
                // result of a nested binary op already sits in the AC).
            }
        }
    }
}

/// Parse and fully materialize `expr` into the accumulator, for statement
/// handlers (dispatch, array writes, string assignment) that need a value
/// ready to store rather than a `Numeric` to keep folding.
pub fn evaluate_and_materialize(compiler: &mut Compiler, expr: &str, line: u32) -> Numeric {
    let mut eval = Evaluator::new(compiler, expr, line);
    let n = eval.evaluate();
    eval.materialize(&n);
    n
}

fn split_byte_suffix(ident: &str) -> (String, Int16Byte) {
    if let Some(base) = ident.strip_suffix(".LO").or_else(|| ident.strip_suffix(".lo")) {
        (base.to_string(), Int16Byte::Low)
    } else if let Some(base) = ident.strip_suffix(".HI").or_else(|| ident.strip_suffix(".hi")) {
        (base.to_string(), Int16Byte::High)
    } else {
        (ident.to_string(), Int16Byte::Both)
    }
}

/// Replace whole-word occurrences of `word` in `text` with `replacement`,
/// never matching inside a longer identifier.
fn substitute_word(text: &str, word: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let word_chars: Vec<char> = word.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i..].starts_with(word_chars.as_slice()) {
            let before_ok = i == 0 || !is_ident_char(chars[i - 1]);
            let after_idx = i + word_chars.len();
            let after_ok = after_idx >= chars.len() || !is_ident_char(chars[after_idx]);
            if before_ok && after_ok {
                out.push_str(replacement);
                i = after_idx;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;

    fn new_compiler() -> Compiler {
        Compiler::new(CompilerConfig::default())
    }

    #[test]
    fn constant_arithmetic_folds_at_compile_time() {
        let mut c = new_compiler();
        let mut eval = Evaluator::new(&mut c, "1 + 2", 10);
        let result = eval.evaluate();
        assert_eq!(result.value, 3.0);
        assert_eq!(result.var_kind, VarKind::Number);
    }

    #[test]
    fn scenario_a_equals_one_plus_two_emits_single_store() {
        let mut c = new_compiler();
        let mut eval = Evaluator::new(&mut c, "1 + 2", 10);
        let result = eval.evaluate();
        assert_eq!(result.value, 3.0);
        // No instructions should have been emitted for a fully-constant
        // expression: the caller (assignment handler) does the one STW.
        assert_eq!(c.pc(), crate::consts::USER_CODE_START);
    }

    #[test]
    fn variable_plus_zero_still_emits_addi_zero_before_optimisation() {
        let mut c = new_compiler();
        c.tables
            .int_vars
            .push(crate::symbols::IntVar::new_scalar("B", 0x30, 1));
        let mut eval = Evaluator::new(&mut c, "B + 0", 10);
        let result = eval.evaluate();
        assert!(!is_compile_time_constant(&result));
        assert!(c.pc() > crate::consts::USER_CODE_START);
    }

    #[test]
    fn unary_minus_negates_constant() {
        let mut c = new_compiler();
        let mut eval = Evaluator::new(&mut c, "-5", 1);
        assert_eq!(eval.evaluate().value, -5.0);
    }

    #[test]
    fn boolean_comparison_folds_constants_to_0_or_minus1() {
        let mut c = new_compiler();
        let mut eval = Evaluator::new(&mut c, "3 = 3", 1);
        let r = eval.evaluate();
        assert_eq!(r.value, -1.0);
        assert_eq!(r.cc_kind, CcKind::BooleanCC);

        let mut eval2 = Evaluator::new(&mut c, "3 = 4", 1);
        assert_eq!(eval2.evaluate().value, 0.0);
    }

    #[test]
    fn normal_and_fast_comparison_prefixes_are_recognised() {
        let mut c = new_compiler();
        let mut eval = Evaluator::new(&mut c, "3 &< 4", 1);
        assert_eq!(eval.evaluate().cc_kind, CcKind::NormalCC);

        let mut eval2 = Evaluator::new(&mut c, "3 &&< 4", 1);
        assert_eq!(eval2.evaluate().cc_kind, CcKind::FastCC);
    }

    #[test]
    fn address_of_sets_is_address() {
        let mut c = new_compiler();
        c.tables
            .int_vars
            .push(crate::symbols::IntVar::new_scalar("A", 0x30, 1));
        let mut eval = Evaluator::new(&mut c, "@A", 1);
        let r = eval.evaluate();
        assert!(r.is_address);
    }

    #[test]
    fn length_of_string_var_returns_size() {
        let mut c = new_compiler();
        let mut sv = crate::symbols::StringVar::new_variable("S", 0x40, 10);
        sv.size = 4;
        c.tables.string_vars.push(sv);
        let mut eval = Evaluator::new(&mut c, "#S", 1);
        assert_eq!(eval.evaluate().value, 4.0);
    }

    #[test]
    fn unknown_identifier_is_a_semantic_error() {
        let mut c = new_compiler();
        let mut eval = Evaluator::new(&mut c, "NOSUCHVAR", 5);
        let r = eval.evaluate();
        assert!(!r.is_valid);
        assert!(c.has_errors());
    }

    #[test]
    fn reserved_keyword_cannot_be_used_as_a_value() {
        let mut c = new_compiler();
        let mut eval = Evaluator::new(&mut c, "GOTO", 5);
        let r = eval.evaluate();
        assert!(!r.is_valid);
    }

    #[test]
    fn user_fn_call_inlines_and_reparses_substituted_body() {
        let mut c = new_compiler();
        c.tables.user_fns.push(crate::symbols::UserFn {
            name: "SQ".to_string(),
            params: vec!["X".to_string()],
            body: "X*X".to_string(),
        });
        let mut eval = Evaluator::new(&mut c, "SQ(3+1)", 20);
        let r = eval.evaluate();
        assert_eq!(r.value, 16.0);
    }

    #[test]
    fn user_fn_wrong_arg_count_is_a_parse_error_naming_the_function() {
        let mut c = new_compiler();
        c.tables.user_fns.push(crate::symbols::UserFn {
            name: "SQ".to_string(),
            params: vec!["X".to_string()],
            body: "X*X".to_string(),
        });
        let mut eval = Evaluator::new(&mut c, "SQ(1,2)", 20);
        let r = eval.evaluate();
        assert!(!r.is_valid);
        assert!(c.diagnostics.iter().any(|d| d.message.contains("SQ")));
    }

    #[test]
    fn nested_user_fn_calls_need_no_extra_stack() {
        let mut c = new_compiler();
        c.tables.user_fns.push(crate::symbols::UserFn {
            name: "DBL".to_string(),
            params: vec!["X".to_string()],
            body: "X*2".to_string(),
        });
        let mut eval = Evaluator::new(&mut c, "DBL(DBL(3))", 1);
        assert_eq!(eval.evaluate().value, 12.0);
    }

    #[test]
    fn dot_lo_hi_suffix_selects_int16_byte() {
        let mut c = new_compiler();
        c.tables
            .int_vars
            .push(crate::symbols::IntVar::new_scalar("W", 0x30, 1));
        let mut eval = Evaluator::new(&mut c, "W.LO", 1);
        let r = eval.evaluate();
        assert_eq!(r.int16_byte, Int16Byte::Low);
    }

    #[test]
    fn string_literal_factor_carries_text() {
        let mut c = new_compiler();
        let mut eval = Evaluator::new(&mut c, "\"HI\"", 1);
        let r = eval.evaluate();
        assert_eq!(r.text, "HI");
        assert_eq!(r.var_kind, VarKind::String);
    }

    #[test]
    fn substitute_word_does_not_match_inside_longer_identifiers() {
        let out = substitute_word("X + XMAX", "X", "9");
        assert_eq!(out, "9 + XMAX");
    }
}
