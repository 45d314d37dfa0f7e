//! Runtime macro library (spec.md section 4.2.5).
//!
//! A macro file (the downstream assembler's `%MACRO NAME` ... `%ENDM`
//! blocks, passed through verbatim at output time) is indexed here by name so
//! the code pass can look up each macro's byte size without re-deriving it
//! every time the macro is invoked as an opcode.

use std::collections::HashMap;

/// One `%MACRO NAME` ... `%ENDM` block: its body lines (each either a plain
/// opcode-with-operand line or a nested `%OTHERMACRO` invocation) and its
/// computed size in bytes.
#[derive(Debug, Clone)]
pub struct Macro {
    pub name: String,
    pub body: Vec<String>,
    size: Option<u32>,
}

/// Every macro defined in the runtime library, indexed by name.
#[derive(Debug, Default)]
pub struct MacroTable {
    macros: HashMap<String, Macro>,
    /// Source order, so output can pass macro bodies through in the order
    /// the runtime library defined them.
    order: Vec<String>,
}

/// Static per-opcode byte sizes for the instructions a macro body can
/// contain. Unrecognised mnemonics default to 2 bytes (the common
/// immediate/absolute-operand case on this machine).
///
/// Shared with [`crate::peephole`], which sizes synthesized replacement
/// instructions against this same table rather than keeping a second copy.
pub(crate) fn opcode_size(opcode: &str) -> u32 {
    match opcode.to_ascii_uppercase().as_str() {
        "NOP" | "RET" | "PUSH" | "POP" | "NOTW" => 1,
        "CALL" | "LDWI" | "JMP" => 3,
        _ => 2,
    }
}

impl MacroTable {
    /// Parse a macro-library source text into an indexed table. Unbalanced
    /// `%MACRO`/`%ENDM` pairs are a fatal structural error (spec.md section
    /// 7(e)).
    pub fn parse(source: &str) -> Result<Self, String> {
        let mut table = MacroTable::default();
        let mut current: Option<Macro> = None;

        for raw in source.lines() {
            let trimmed = raw.trim();
            if let Some(rest) = trimmed.strip_prefix("%MACRO") {
                if current.is_some() {
                    return Err("nested %MACRO before matching %ENDM".to_string());
                }
                let name = rest.trim().split_whitespace().next().unwrap_or("").to_string();
                if name.is_empty() {
                    return Err("%MACRO directive missing a name".to_string());
                }
                current = Some(Macro {
                    name,
                    body: Vec::new(),
                    size: None,
                });
            } else if trimmed == "%ENDM" {
                let mut m = current
                    .take()
                    .ok_or_else(|| "%ENDM without a matching %MACRO".to_string())?;
                m.size = None;
                table.order.push(m.name.clone());
                table.macros.insert(m.name.clone(), m);
            } else if let Some(m) = current.as_mut() {
                if !trimmed.is_empty() {
                    m.body.push(trimmed.to_string());
                }
            }
        }

        if current.is_some() {
            return Err("unbalanced %MACRO: missing %ENDM".to_string());
        }

        let names: Vec<String> = table.order.clone();
        for name in names {
            table.compute_size(&name, &mut Vec::new())?;
        }
        Ok(table)
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.macros.get(name)
    }

    pub fn size_of(&self, name: &str) -> Option<u32> {
        self.macros.get(name).and_then(|m| m.size)
    }

    /// Sum opcode sizes of a macro's body lines, recursing into nested
    /// macro invocations (spec.md section 4.2.5). `in_progress` guards
    /// against a macro that (directly or transitively) invokes itself.
    fn compute_size(&mut self, name: &str, in_progress: &mut Vec<String>) -> Result<u32, String> {
        if let Some(size) = self.macros.get(name).and_then(|m| m.size) {
            return Ok(size);
        }
        if in_progress.contains(&name.to_string()) {
            return Err(format!("macro '{name}' recursively invokes itself"));
        }
        in_progress.push(name.to_string());

        let body = self
            .macros
            .get(name)
            .ok_or_else(|| format!("undefined macro '{name}'"))?
            .body
            .clone();

        let mut total = 0u32;
        for line in &body {
            let mnemonic = line.split_whitespace().next().unwrap_or("");
            if let Some(nested) = mnemonic.strip_prefix('%') {
                total += self.compute_size(nested, in_progress)?;
            } else {
                total += opcode_size(mnemonic);
            }
        }

        in_progress.pop();
        self.macros.get_mut(name).unwrap().size = Some(total);
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_macro_and_sums_opcode_sizes() {
        let table = MacroTable::parse("%MACRO PushPair\nLDI 1\nSTW 0xc0\n%ENDM\n").unwrap();
        assert_eq!(table.size_of("PushPair"), Some(4));
    }

    #[test]
    fn nested_macro_invocation_recurses_into_callee_size() {
        let src = "%MACRO Inner\nNOP\n%ENDM\n%MACRO Outer\n%Inner\nLDI 1\n%ENDM\n";
        let table = MacroTable::parse(src).unwrap();
        assert_eq!(table.size_of("Inner"), Some(1));
        assert_eq!(table.size_of("Outer"), Some(3));
    }

    #[test]
    fn unbalanced_macro_is_a_fatal_error() {
        let err = MacroTable::parse("%MACRO Foo\nNOP\n").unwrap_err();
        assert!(err.contains("ENDM"));
    }

    #[test]
    fn endm_without_macro_is_a_fatal_error() {
        let err = MacroTable::parse("%ENDM\n").unwrap_err();
        assert!(err.contains("MACRO"));
    }

    #[test]
    fn self_recursive_macro_is_rejected() {
        let src = "%MACRO Loopy\n%Loopy\n%ENDM\n";
        let err = MacroTable::parse(src).unwrap_err();
        assert!(err.contains("recursively"));
    }
}
