//! Source-line and emitted-instruction records (spec.md section 3).

use crate::types::Int16Byte;
use std::collections::HashMap;

/// One emitted vCPU instruction.
///
/// `address` is the program counter *at emit time* (invariant #1 in
/// spec.md section 3: a VasmLine's recorded address equals PC at emit).
#[derive(Debug, Clone)]
pub struct VasmLine {
    pub address: u16,
    pub opcode: String,
    pub operand: String,
    pub formatted_code: String,
    /// Name of an internal label bound to this instruction, if any.
    pub internal_label: Option<String>,
    pub page_jump: bool,
    pub size: u8,
}

impl VasmLine {
    pub fn new(address: u16, opcode: &str, operand: &str, size: u8) -> Self {
        let formatted_code = format_instruction(opcode, operand);
        VasmLine {
            address,
            opcode: opcode.to_string(),
            operand: operand.to_string(),
            formatted_code,
            internal_label: None,
            page_jump: false,
            size,
        }
    }
}

/// Right-pad an opcode to the operand column, per spec.md section 6.
pub fn format_instruction(opcode: &str, operand: &str) -> String {
    use crate::consts::OPCODE_TRUNC_SIZE;
    if operand.is_empty() {
        return opcode.to_string();
    }
    if opcode.len() >= OPCODE_TRUNC_SIZE {
        format!("{opcode} {operand}")
    } else {
        format!("{opcode}{}{operand}", " ".repeat(OPCODE_TRUNC_SIZE - opcode.len()))
    }
}

/// A source code line, split into `:`-separated statements at parse time.
#[derive(Debug, Clone, Default)]
pub struct CodeLine {
    pub text: String,
    /// Source line number, used for diagnostics.
    pub line_number: u32,
    pub tokens: Vec<String>,
    pub token_offsets: Vec<usize>,
    pub vasm: Vec<VasmLine>,
    pub expression: String,
    /// `ON ... GOTO/GOSUB` target-address table, keyed by case index.
    pub on_goto_lut: Vec<u16>,
    /// Concatenation-source-address table for this line's `a$ = b$+c$+...`.
    pub str_concat_lut: Vec<u16>,
    pub input_lut: Vec<u16>,
    pub label_index: Option<usize>,
    pub var_index: Option<usize>,
    pub var_type: Option<&'static str>,
    pub int16_byte: Int16Byte,
    pub contains_vars: bool,
    /// Set on stub lines created by the label pass for forward references;
    /// cleared once the code pass actually parses this line's text.
    pub dont_parse: bool,
    pub push_emitted: bool,
    pub vasm_size: u32,
}

impl CodeLine {
    pub fn new(text: &str, line_number: u32) -> Self {
        CodeLine {
            text: text.to_string(),
            line_number,
            dont_parse: true,
            ..Default::default()
        }
    }

    /// Split this line's text on `:` that are outside string literals.
    pub fn split_statements(&self) -> Vec<String> {
        split_outside_strings(&self.text, ':')
    }
}

/// Split `text` on `sep`, ignoring occurrences inside `"..."` string literals.
pub fn split_outside_strings(text: &str, sep: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    for c in text.chars() {
        if c == '"' {
            in_string = !in_string;
            current.push(c);
        } else if c == sep && !in_string {
            out.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    out.push(current);
    out
}

/// All parsed source lines plus a by-label-name lookup, built by the label
/// pass and consumed by the code pass (spec.md section 2/4.8).
#[derive(Debug, Default)]
pub struct Program {
    pub lines: Vec<CodeLine>,
    pub label_line_index: HashMap<String, usize>,
}

impl Program {
    pub fn clear(&mut self) {
        self.lines.clear();
        self.label_line_index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_outside_strings_ignores_colons_in_literals() {
        let parts = split_outside_strings(r#"A=1:B$="x:y":C=2"#, ':');
        assert_eq!(parts, vec!["A=1", r#"B$="x:y""#, "C=2"]);
    }

    #[test]
    fn format_instruction_pads_to_operand_column() {
        let formatted = format_instruction("STW", "_A");
        assert_eq!(formatted, format!("STW{}_A", " ".repeat(3)));
    }

    #[test]
    fn format_instruction_no_operand_is_bare_opcode() {
        assert_eq!(format_instruction("RET", ""), "RET");
    }

    #[test]
    fn code_line_split_statements_matches_free_function() {
        let line = CodeLine::new("A=1:B=2", 10);
        assert_eq!(line.split_statements(), vec!["A=1", "B=2"]);
    }
}
