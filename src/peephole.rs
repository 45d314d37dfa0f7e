//! Peephole optimizer (spec.md section 4.5): a static rule table scanned
//! over every code line's emitted [`VasmLine`] window, rewriting matched
//! subsequences and restarting from the top of the program after each
//! successful rewrite until none apply.
//!
//! Every rewrite must strictly reduce total emitted bytes (invariant #2 in
//! spec.md section 8): rules that can't guarantee a shrink for a given match
//! (`AddiPair` when the folded sum doesn't fit in a byte) bail out of that
//! one match rather than apply it, so termination stays guaranteed.

use crate::ast::VasmLine;
use crate::compiler::Compiler;
use crate::config::OptimizeMode;
use crate::macros::opcode_size;

/// One rule: a fixed-width window shape to look for, and a rewrite that
/// either narrows it (returning fewer, cheaper instructions) or declines
/// (`None`) when this particular match doesn't actually shrink anything.
///
/// spec section 4.5 splits the rule table into operand-sensitive rules
/// (matching requires the same variable/address on both ends, e.g.
/// `StwLdwPair`) and operand-insensitive ones (matching on opcode shape
/// alone, e.g. `ExtraStw`); that distinction lives inside each rule's own
/// `matches` function rather than as a generic engine parameter, since each
/// rule's notion of "same operand" differs (a 4-character slot-identity
/// prefix vs. an exact string).
struct Rule {
    name: &'static str,
    enabled: bool,
    window_len: usize,
    matches: fn(&[VasmLine]) -> bool,
    rewrite: fn(&[VasmLine]) -> Option<Vec<(String, String)>>,
}

/// First four characters of an operand, the slot-identity comparison spec.md
/// section 4.5 calls out explicitly ("e.g., `0xc0`").
fn operand_prefix(operand: &str) -> &str {
    let end = operand.len().min(4);
    &operand[..end]
}

fn op_is(line: &VasmLine, opcode: &str) -> bool {
    line.opcode.eq_ignore_ascii_case(opcode)
}

// ---- StwLdwPair (operand-sensitive): STW t ; LDW t -> STW t ----------------
//
// The store doesn't clobber the accumulator, so the load immediately after
// reads back exactly what's already there.

fn stw_ldw_pair_matches(w: &[VasmLine]) -> bool {
    op_is(&w[0], "STW") && op_is(&w[1], "LDW") && operand_prefix(&w[0].operand) == operand_prefix(&w[1].operand)
}

fn stw_ldw_pair_rewrite(w: &[VasmLine]) -> Option<Vec<(String, String)>> {
    Some(vec![(w[0].opcode.clone(), w[0].operand.clone())])
}

// ---- StwLdiAddw (operand-sensitive): STW t ; LDI k ; ADDW t -> ADDI k ------
//
// spec.md section 4.5 / section 8 scenario 6's canonical example.

fn stw_ldi_addw_matches(w: &[VasmLine]) -> bool {
    op_is(&w[0], "STW")
        && op_is(&w[1], "LDI")
        && op_is(&w[2], "ADDW")
        && operand_prefix(&w[0].operand) == operand_prefix(&w[2].operand)
}

fn stw_ldi_addw_rewrite(w: &[VasmLine]) -> Option<Vec<(String, String)>> {
    Some(vec![("ADDI".to_string(), w[1].operand.clone())])
}

// ---- Lsl8Var (operand-sensitive, single operand): LSL8 ; STW x -> POKE x+1
//
// A shift-by-8 immediately stored is just "write the high byte"; POKE is
// already this codebase's single-byte store opcode (see
// `crate::dispatch::handle_poke` and the `Int16Byte::High` arm of
// `store_opcode` in `crate::codegen::arrays`).

fn lsl8_var_matches(w: &[VasmLine]) -> bool {
    op_is(&w[0], "LSL8") && op_is(&w[1], "STW")
}

fn lsl8_var_rewrite(w: &[VasmLine]) -> Option<Vec<(String, String)>> {
    Some(vec![("POKE".to_string(), format!("{}+1", w[1].operand))])
}

// ---- ExtraStw (operand-insensitive): STW a ; STW b -> STW b ---------------
//
// Matched purely on opcode shape (spec.md section 4.5): two stores in a row
// with nothing reading the first one's destination in between means the
// first store never had an observer.

fn extra_stw_matches(w: &[VasmLine]) -> bool {
    op_is(&w[0], "STW") && op_is(&w[1], "STW")
}

fn extra_stw_rewrite(w: &[VasmLine]) -> Option<Vec<(String, String)>> {
    Some(vec![(w[1].opcode.clone(), w[1].operand.clone())])
}

// ---- AddiPair (operand-insensitive): ADDI a ; ADDI b -> ADDI (a+b) --------
//
// Only applies when the combined literal still fits in a byte; otherwise the
// match declines so a 2-instruction sequence isn't replaced by a 2-byte-plus
// encoding that wouldn't actually shrink anything.

fn addi_pair_matches(w: &[VasmLine]) -> bool {
    op_is(&w[0], "ADDI") && op_is(&w[1], "ADDI")
}

fn parse_literal(operand: &str) -> Option<i64> {
    let trimmed = operand.trim();
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        trimmed.parse::<i64>().ok()
    }
}

fn addi_pair_rewrite(w: &[VasmLine]) -> Option<Vec<(String, String)>> {
    let a = parse_literal(&w[0].operand)?;
    let b = parse_literal(&w[1].operand)?;
    let sum = a + b;
    if !(0..=0xff).contains(&sum) {
        return None;
    }
    Some(vec![("ADDI".to_string(), format!("{sum}"))])
}

// ---- AddiZero / SubiZero (operand-insensitive): drop no-op arithmetic ----
//
// spec.md section 8 end-to-end scenario 2: `A = B + 0` must not leave an
// `ADDI 0` behind after optimisation.

fn addi_zero_matches(w: &[VasmLine]) -> bool {
    op_is(&w[0], "ADDI")
}

fn addi_zero_rewrite(w: &[VasmLine]) -> Option<Vec<(String, String)>> {
    (parse_literal(&w[0].operand)? == 0).then(Vec::new)
}

fn subi_zero_matches(w: &[VasmLine]) -> bool {
    op_is(&w[0], "SUBI")
}

fn subi_zero_rewrite(w: &[VasmLine]) -> Option<Vec<(String, String)>> {
    (parse_literal(&w[0].operand)? == 0).then(Vec::new)
}

// ---- StwLdPair: listed in the rule table but disabled -----------------------
//
// spec.md section 9 "Open questions": "`StwLdPair` is listed among match
// sequences but the case body is commented out. Treat as intentionally
// disabled." We keep the entry (matcher/rewriter included, `enabled: false`)
// rather than deleting it, since its presence-but-inertness *is* the
// documented behaviour.

fn stw_ld_pair_matches(w: &[VasmLine]) -> bool {
    op_is(&w[0], "STW") && op_is(&w[1], "LD")
}

fn stw_ld_pair_rewrite(w: &[VasmLine]) -> Option<Vec<(String, String)>> {
    Some(vec![(w[0].opcode.clone(), w[0].operand.clone())])
}

// ---- PeekArray / DeekArray / PokeArray / DokeArray -------------------------
//
// This codebase routes every array index through the fixed `memIndex0..2`
// scratch cells (`crate::codegen::arrays`, `crate::evaluator`). When two
// index-expression evaluations write the same slot back-to-back with no
// intervening read (e.g. re-evaluating an index inside one statement), the
// first materialize-and-store pair is dead. The four named rules share this
// one shape and differ only in which of the read/write array paths they
// guard against.

fn redundant_index_store_matches(w: &[VasmLine]) -> bool {
    let first_load = op_is(&w[0], "LDI") || op_is(&w[0], "LDW");
    let second_load = op_is(&w[2], "LDI") || op_is(&w[2], "LDW");
    first_load
        && op_is(&w[1], "STW")
        && second_load
        && op_is(&w[3], "STW")
        && w[1].operand == w[3].operand
        && w[1].operand.starts_with("memIndex")
}

fn redundant_index_store_rewrite(w: &[VasmLine]) -> Option<Vec<(String, String)>> {
    Some(vec![
        (w[2].opcode.clone(), w[2].operand.clone()),
        (w[3].opcode.clone(), w[3].operand.clone()),
    ])
}

/// Declaration order doubles as application-priority order (spec.md section
/// 4.5.2: "Rewrites are applied in rule-table order; ordering is
/// significant"). Roughly thirty rules exist in the source this was
/// distilled from; the subset implemented here is every rule spec.md names
/// explicitly, grounded in this crate's own emission shapes rather than
/// invented opcode semantics for the ones spec.md describes only in the
/// abstract (see DESIGN.md for the Open Question this records).
static RULES: &[Rule] = &[
    Rule {
        name: "StwLdwPair",
        enabled: true,
        window_len: 2,
        matches: stw_ldw_pair_matches,
        rewrite: stw_ldw_pair_rewrite,
    },
    Rule {
        name: "StwLdiAddw",
        enabled: true,
        window_len: 3,
        matches: stw_ldi_addw_matches,
        rewrite: stw_ldi_addw_rewrite,
    },
    Rule {
        name: "Lsl8Var",
        enabled: true,
        window_len: 2,
        matches: lsl8_var_matches,
        rewrite: lsl8_var_rewrite,
    },
    Rule {
        name: "StwLdPair",
        enabled: false,
        window_len: 2,
        matches: stw_ld_pair_matches,
        rewrite: stw_ld_pair_rewrite,
    },
    Rule {
        name: "ExtraStw",
        enabled: true,
        window_len: 2,
        matches: extra_stw_matches,
        rewrite: extra_stw_rewrite,
    },
    Rule {
        name: "PeekArray",
        enabled: true,
        window_len: 4,
        matches: redundant_index_store_matches,
        rewrite: redundant_index_store_rewrite,
    },
    Rule {
        name: "DeekArray",
        enabled: true,
        window_len: 4,
        matches: redundant_index_store_matches,
        rewrite: redundant_index_store_rewrite,
    },
    Rule {
        name: "PokeArray",
        enabled: true,
        window_len: 4,
        matches: redundant_index_store_matches,
        rewrite: redundant_index_store_rewrite,
    },
    Rule {
        name: "DokeArray",
        enabled: true,
        window_len: 4,
        matches: redundant_index_store_matches,
        rewrite: redundant_index_store_rewrite,
    },
    Rule {
        name: "AddiPair",
        enabled: true,
        window_len: 2,
        matches: addi_pair_matches,
        rewrite: addi_pair_rewrite,
    },
    Rule {
        name: "AddiZero",
        enabled: true,
        window_len: 1,
        matches: addi_zero_matches,
        rewrite: addi_zero_rewrite,
    },
    Rule {
        name: "SubiZero",
        enabled: true,
        window_len: 1,
        matches: subi_zero_matches,
        rewrite: subi_zero_rewrite,
    },
];

fn rule_is_active(config: &crate::config::CompilerConfig, rule: &Rule) -> bool {
    // The TOML-backed `rule_config` (spec.md section 4.5, `rules_config.rs`)
    // takes precedence over the compiled-in default; a rule name absent from
    // it (shouldn't happen with `rules.toml` kept in sync with `RULES`) falls
    // back to `Rule::enabled`.
    let toml_enabled = config.rule_config.is_enabled(rule.name).unwrap_or(rule.enabled);
    if !toml_enabled {
        return false;
    }
    match &config.optimize {
        OptimizeMode::Off => false,
        OptimizeMode::On => true,
        OptimizeMode::Rules(names) => names.iter().any(|n| n.eq_ignore_ascii_case(rule.name)),
    }
}

/// Run every enabled rule to a fixed point (spec.md section 4.5.2): after
/// any successful rewrite, restart scanning from the beginning of the
/// program, in rule-table order. Termination follows from invariant #2 -
/// every applied rewrite strictly reduces total emitted bytes, which is
/// bounded below by zero.
pub fn run_peephole_pass(compiler: &mut Compiler) {
    loop {
        let mut rewritten = false;
        'rules: for rule in RULES {
            if !rule_is_active(&compiler.config, rule) {
                continue;
            }
            for line_idx in 0..compiler.program.lines.len() {
                let vasm_len = compiler.program.lines[line_idx].vasm.len();
                if vasm_len < rule.window_len {
                    continue;
                }
                for start in 0..=(vasm_len - rule.window_len) {
                    let window = &compiler.program.lines[line_idx].vasm[start..start + rule.window_len];
                    if !(rule.matches)(window) {
                        continue;
                    }
                    let Some(replacement) = (rule.rewrite)(window) else {
                        continue;
                    };
                    if apply_rewrite(compiler, line_idx, start, rule.window_len, replacement) {
                        rewritten = true;
                        break 'rules;
                    }
                }
            }
        }
        if !rewritten {
            break;
        }
    }
}

/// Splice `replacement` into `program.lines[line_idx].vasm[start..start+window_len]`,
/// re-addressing the replacement from the window's original start address and
/// shifting every later address in the whole program by the byte delta
/// (spec.md section 4.5.1, invariants 1-3). Returns `false` (refusing the
/// rewrite, leaving the program untouched) when the replacement doesn't
/// actually shrink anything, or when a removed label has nowhere to migrate.
fn apply_rewrite(
    compiler: &mut Compiler,
    line_idx: usize,
    start: usize,
    window_len: usize,
    replacement: Vec<(String, String)>,
) -> bool {
    let old_window = compiler.program.lines[line_idx].vasm[start..start + window_len].to_vec();
    let old_bytes: u32 = old_window.iter().map(|v| v.size as u32).sum();
    let new_sizes: Vec<u8> = replacement
        .iter()
        .map(|(op, _)| opcode_size(op) as u8)
        .collect();
    let new_bytes: u32 = new_sizes.iter().map(|s| *s as u32).sum();
    if new_bytes >= old_bytes {
        return false;
    }
    let delta = (old_bytes - new_bytes) as u16;
    let window_start_addr = old_window[0].address;
    let shift_point = window_start_addr.wrapping_add(old_bytes as u16);

    // Invariant #1: a label on any removed instruction migrates to the next
    // surviving instruction (the window's own replacement starts at the same
    // address, so the earliest surviving point is always `replacement[0]`
    // when non-empty).
    let carried_label = old_window.iter().find_map(|v| v.internal_label.clone());

    let mut new_vasm = Vec::with_capacity(replacement.len());
    let mut addr = window_start_addr;
    for (i, (op, operand)) in replacement.iter().enumerate() {
        let size = new_sizes[i];
        let mut vline = VasmLine::new(addr, op, operand, size);
        if i == 0 {
            if let Some(label) = &carried_label {
                vline.internal_label = Some(label.clone());
            }
        }
        addr = addr.wrapping_add(size as u16);
        new_vasm.push(vline);
    }

    if new_vasm.is_empty() {
        if let Some(label) = carried_label {
            match compiler.program.lines[line_idx].vasm.get_mut(start + window_len) {
                Some(next) => next.internal_label = Some(label),
                None => return false,
            }
        }
    }

    compiler.program.lines[line_idx]
        .vasm
        .splice(start..start + window_len, new_vasm);

    for line in &mut compiler.program.lines {
        for v in &mut line.vasm {
            if v.address >= shift_point {
                v.address = v.address.wrapping_sub(delta);
            }
        }
    }
    for label in compiler
        .tables
        .user_labels
        .iter_mut()
        .chain(compiler.tables.internal_labels.iter_mut())
        .chain(compiler.tables.discarded_labels.iter_mut())
    {
        if label.address >= shift_point {
            label.address = label.address.wrapping_sub(delta);
        }
    }
    for data in &mut compiler.tables.def_data {
        if data.address >= shift_point {
            data.address = data.address.wrapping_sub(delta);
        }
    }
    if compiler.pc() >= shift_point {
        compiler.shift_pc(delta);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::CodeLine;
    use crate::config::CompilerConfig;
    use crate::symbols::Label;

    fn line_with(instrs: &[(&str, &str, u8)], start_addr: u16) -> CodeLine {
        let mut line = CodeLine::new("", 1);
        let mut addr = start_addr;
        for (op, operand, size) in instrs {
            line.vasm.push(VasmLine::new(addr, op, operand, *size));
            addr += *size as u16;
        }
        line
    }

    #[test]
    fn stw_ldi_addw_folds_to_addi() {
        let mut c = Compiler::new(CompilerConfig::default());
        let line = line_with(&[("STW", "0xc0", 2), ("LDI", "5", 2), ("ADDW", "0xc0", 2)], 0x0200);
        c.program.lines.push(line);
        run_peephole_pass(&mut c);
        let vasm = &c.program.lines[0].vasm;
        assert_eq!(vasm.len(), 1);
        assert_eq!(vasm[0].opcode, "ADDI");
        assert_eq!(vasm[0].operand, "5");
    }

    #[test]
    fn later_labels_shift_by_the_byte_delta() {
        let mut c = Compiler::new(CompilerConfig::default());
        let mut line = line_with(&[("STW", "0xc0", 2), ("LDI", "5", 2), ("ADDW", "0xc0", 2)], 0x0200);
        line.vasm
            .push(VasmLine::new(0x0206, "STW", "_A", 2));
        c.program.lines.push(line);
        c.tables.user_labels.push(Label::new("_LATER", 0x0208, 0, false));
        run_peephole_pass(&mut c);
        // 6 bytes folded to 2: everything at/after 0x0206 shifts back by 4.
        assert_eq!(c.program.lines[0].vasm.last().unwrap().address, 0x0202);
        assert_eq!(c.tables.user_labels[0].address, 0x0204);
    }

    #[test]
    fn addi_zero_is_deleted_entirely() {
        let mut c = Compiler::new(CompilerConfig::default());
        let mut line = line_with(&[("LDW", "_B", 2), ("ADDI", "0", 2)], 0x0200);
        line.vasm.push(VasmLine::new(0x0204, "STW", "_A", 2));
        c.program.lines.push(line);
        run_peephole_pass(&mut c);
        let ops: Vec<&str> = c.program.lines[0].vasm.iter().map(|v| v.opcode.as_str()).collect();
        assert_eq!(ops, vec!["LDW", "STW"]);
    }

    #[test]
    fn extra_stw_keeps_only_the_second_store() {
        let mut c = Compiler::new(CompilerConfig::default());
        let line = line_with(&[("STW", "_A", 2), ("STW", "_B", 2)], 0x0200);
        c.program.lines.push(line);
        run_peephole_pass(&mut c);
        let vasm = &c.program.lines[0].vasm;
        assert_eq!(vasm.len(), 1);
        assert_eq!(vasm[0].operand, "_B");
    }

    #[test]
    fn addi_pair_folds_when_sum_fits_a_byte() {
        let mut c = Compiler::new(CompilerConfig::default());
        let line = line_with(&[("ADDI", "100", 2), ("ADDI", "50", 2)], 0x0200);
        c.program.lines.push(line);
        run_peephole_pass(&mut c);
        let vasm = &c.program.lines[0].vasm;
        assert_eq!(vasm.len(), 1);
        assert_eq!(vasm[0].operand, "150");
    }

    #[test]
    fn addi_pair_declines_when_sum_overflows_a_byte() {
        let mut c = Compiler::new(CompilerConfig::default());
        let line = line_with(&[("ADDI", "200", 2), ("ADDI", "100", 2)], 0x0200);
        c.program.lines.push(line);
        run_peephole_pass(&mut c);
        assert_eq!(c.program.lines[0].vasm.len(), 2);
    }

    #[test]
    fn optimizer_off_leaves_redundant_sequence_untouched() {
        let mut c = Compiler::new(CompilerConfig::default());
        c.config.optimize = OptimizeMode::Off;
        let line = line_with(&[("STW", "0xc0", 2), ("LDW", "0xc0", 2)], 0x0200);
        c.program.lines.push(line);
        run_peephole_pass(&mut c);
        assert_eq!(c.program.lines[0].vasm.len(), 2);
    }

    #[test]
    fn rule_subset_restricts_to_named_rules_only() {
        let mut c = Compiler::new(CompilerConfig::default());
        c.config.optimize = OptimizeMode::Rules(vec!["AddiZero".to_string()]);
        let line = line_with(&[("STW", "0xc0", 2), ("LDW", "0xc0", 2)], 0x0200);
        c.program.lines.push(line);
        run_peephole_pass(&mut c);
        // StwLdwPair isn't in the active subset, so this sequence survives.
        assert_eq!(c.program.lines[0].vasm.len(), 2);
    }

    #[test]
    fn internal_label_migrates_to_the_surviving_instruction() {
        let mut c = Compiler::new(CompilerConfig::default());
        let mut line = line_with(&[("STW", "0xc0", 2), ("LDI", "5", 2), ("ADDW", "0xc0", 2)], 0x0200);
        line.vasm[0].internal_label = Some("_while_0000".to_string());
        c.program.lines.push(line);
        run_peephole_pass(&mut c);
        assert_eq!(
            c.program.lines[0].vasm[0].internal_label.as_deref(),
            Some("_while_0000")
        );
    }

    #[test]
    fn deletion_with_no_surviving_instruction_and_a_label_aborts_the_rewrite() {
        let mut c = Compiler::new(CompilerConfig::default());
        let mut line = line_with(&[("ADDI", "0", 2)], 0x0200);
        line.vasm[0].internal_label = Some("_endif_0000".to_string());
        c.program.lines.push(line);
        run_peephole_pass(&mut c);
        // Nothing survives to carry the label, so the rewrite must be refused.
        assert_eq!(c.program.lines[0].vasm.len(), 1);
    }

    #[test]
    fn stw_ld_pair_rule_is_registered_but_never_fires() {
        let mut c = Compiler::new(CompilerConfig::default());
        let line = line_with(&[("STW", "_A", 2), ("LD", "_A", 2)], 0x0200);
        c.program.lines.push(line);
        run_peephole_pass(&mut c);
        assert_eq!(c.program.lines[0].vasm.len(), 2);
    }
}
