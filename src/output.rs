//! Output formatter (spec.md section 4.6): renders the fully-compiled
//! program as textual vCPU assembly, in a fixed section order, with label
//! conflict resolution and unreferenced-internal-label pruning applied
//! before anything is written out.

use crate::compiler::Compiler;
use crate::consts::{
    MEM_INDEX0, MEM_INDEX1, MEM_INDEX2, POKE_ADDR_TMP, SCROLL_FLAG, STEP_TMP, TEXT_WORK_AREA,
};
use crate::errors::CodeGenError;
use crate::symbols::ConstData;
use crate::types::Fit;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Render `compiler`'s fully-compiled program as assembly text.
///
/// `macro_source`, when given, is the runtime macro library's already-read
/// text, passed through verbatim right after the include directives (spec.md
/// section 6: `%MACRO`/`%ENDM` bodies "passed through from runtime library").
pub fn run_output_pass(compiler: &mut Compiler, macro_source: Option<&str>) -> Result<String, CodeGenError> {
    assign_data_addresses(compiler)?;
    let renames = resolve_label_conflicts(compiler);
    apply_renames(compiler, &renames);
    let referenced = referenced_names(compiler);

    let mut out = String::new();
    write_reserved_equates(&mut out, compiler)?;
    write_internal_equates(&mut out)?;
    write_includes(&mut out, compiler, macro_source)?;
    write_user_labels(&mut out, compiler)?;
    write_internal_labels(&mut out, compiler, &renames, &referenced)?;
    write_constants(&mut out, compiler)?;
    write_scalars(&mut out, compiler)?;
    write_arrays(&mut out, compiler)?;
    write_strings(&mut out, compiler)?;
    write_data(&mut out, compiler)?;
    write_time_buffer(&mut out, compiler)?;
    write_def_blobs(&mut out, compiler)?;
    write_luts(&mut out, compiler)?;
    write_code(&mut out, compiler)?;
    Ok(out)
}

fn equ_line(out: &mut String, label: &str, value: u16) -> Result<(), CodeGenError> {
    writeln!(out, "{}EQU    {:#06x}", crate::symbols::pad_label(label), value)?;
    Ok(())
}

/// spec.md section 4.6's first section. The fixed identifiers the downstream
/// assembler and runtime treat as reserved: the ROM target this build was
/// compiled against, and the free-RAM window every other allocation lives in
/// (spec.md section 5's `get_free_ram` bounds).
fn write_reserved_equates(out: &mut String, compiler: &Compiler) -> Result<(), CodeGenError> {
    writeln!(out, "; reserved-word equates")?;
    let rom_number: u16 = match compiler.config.rom_target {
        crate::config::RomTarget::Rom1 => 1,
        crate::config::RomTarget::Rom2 => 2,
        crate::config::RomTarget::Rom3 => 3,
        crate::config::RomTarget::Rom4 => 4,
        crate::config::RomTarget::Rom5 => 5,
    };
    equ_line(out, "_romTarget", rom_number)?;
    equ_line(out, "_runtimeStart", compiler.runtime_start)?;
    equ_line(out, "_runtimeEnd", compiler.runtime_end)?;
    writeln!(out)?;
    Ok(())
}

/// spec.md section 4.6's second section: the zero-page register file, scroll
/// flags, and text work area the runtime library owns (spec.md section 4.6
/// naming these explicitly). Addresses come from [`crate::consts`].
fn write_internal_equates(out: &mut String) -> Result<(), CodeGenError> {
    writeln!(out, "; internal equates")?;
    equ_line(out, "memIndex0", MEM_INDEX0)?;
    equ_line(out, "memIndex1", MEM_INDEX1)?;
    equ_line(out, "memIndex2", MEM_INDEX2)?;
    equ_line(out, "_pokeAddrTmp", POKE_ADDR_TMP)?;
    equ_line(out, "_step_tmp", STEP_TMP)?;
    equ_line(out, "_scrollFlag", SCROLL_FLAG)?;
    equ_line(out, "_textWorkArea", TEXT_WORK_AREA)?;
    writeln!(out)?;
    Ok(())
}

fn write_includes(out: &mut String, compiler: &Compiler, macro_source: Option<&str>) -> Result<(), CodeGenError> {
    writeln!(out, "; include directives")?;
    if let Some(path) = &compiler.config.include_path {
        writeln!(out, "%includePath \"{}\"", path.display())?;
    }
    if let Some(source) = macro_source {
        out.push_str(source);
        if !source.ends_with('\n') {
            out.push('\n');
        }
    }
    writeln!(out)?;
    Ok(())
}

fn write_user_labels(out: &mut String, compiler: &Compiler) -> Result<(), CodeGenError> {
    writeln!(out, "; user labels")?;
    for label in &compiler.tables.user_labels {
        equ_line(out, &label.name, label.address)?;
    }
    writeln!(out)?;
    Ok(())
}

fn write_internal_labels(
    out: &mut String,
    compiler: &Compiler,
    renames: &HashMap<String, String>,
    referenced: &std::collections::HashSet<String>,
) -> Result<(), CodeGenError> {
    writeln!(out, "; internal labels")?;
    for label in &compiler.tables.internal_labels {
        // Renamed-away labels are now just aliases of a user label equate
        // already emitted above (spec.md section 4.6.1); no separate equate
        // needed. Labels nothing in the emitted code still names get pruned
        // here too (spec.md section 4.6, final step).
        if renames.contains_key(&label.name) {
            continue;
        }
        if !referenced.contains(&label.name) {
            continue;
        }
        equ_line(out, &label.name, label.address)?;
    }
    writeln!(out)?;
    Ok(())
}

fn write_constants(out: &mut String, compiler: &Compiler) -> Result<(), CodeGenError> {
    writeln!(out, "; constants")?;
    for c in &compiler.tables.constants {
        match &c.data {
            ConstData::Int(v) => equ_line(out, &c.internal_name, *v as u16)?,
            ConstData::Text(_) => equ_line(out, &c.internal_name, c.address)?,
        }
    }
    writeln!(out)?;
    Ok(())
}

fn write_scalars(out: &mut String, compiler: &Compiler) -> Result<(), CodeGenError> {
    use crate::symbols::IntVarType;
    writeln!(out, "; scalar variables")?;
    for v in &compiler.tables.int_vars {
        if v.var_type == IntVarType::Scalar {
            equ_line(out, &v.name, v.address)?;
        }
    }
    writeln!(out)?;
    Ok(())
}

/// Arrays, with initializers padded by the single default `init` value when
/// not fully provided (spec.md section 4.6 / testable property #5).
fn write_arrays(out: &mut String, compiler: &Compiler) -> Result<(), CodeGenError> {
    use crate::symbols::IntVarType;
    writeln!(out, "; arrays")?;
    for v in &compiler.tables.int_vars {
        if v.var_type == IntVarType::Scalar {
            continue;
        }
        let total = v.total_elements() as usize;
        let mut values: Vec<i16> = v.arr_inits.clone();
        values.resize(total, v.init);
        write!(out, "{}", v.output_label)?;
        write!(out, "DW     ")?;
        let rendered: Vec<String> = values.iter().map(|n| n.to_string()).collect();
        writeln!(out, "{}", rendered.join(" "))?;
    }
    writeln!(out)?;
    Ok(())
}

/// Mutable string variables first, then deduplicated constant strings
/// (spec.md section 4.6 ordering; testable property #3 guarantees dedup
/// already happened at intern time).
fn write_strings(out: &mut String, compiler: &Compiler) -> Result<(), CodeGenError> {
    writeln!(out, "; strings")?;
    for s in compiler.tables.string_vars.iter().filter(|s| !s.constant) {
        equ_line(out, &s.name, s.address)?;
    }
    for s in compiler.tables.string_vars.iter().filter(|s| s.constant) {
        let mut bytes: Vec<String> = Vec::with_capacity(s.text.len() + 2);
        bytes.push(s.text.len().to_string());
        bytes.extend(s.text.bytes().map(|b| b.to_string()));
        bytes.push("0".to_string());
        write!(out, "{}", s.output_label)?;
        writeln!(out, "DB     {}", bytes.join(" "))?;
    }
    writeln!(out)?;
    Ok(())
}

/// Allocate a real address for every `DefData` blob that hasn't been placed
/// yet (address `0` is never a valid allocation, since it sits below
/// [`crate::consts::USER_CODE_START`] — it is this module's sentinel for
/// "not yet allocated").
fn assign_data_addresses(compiler: &mut Compiler) -> Result<(), CodeGenError> {
    let runtime_start = compiler.runtime_start;
    for idx in 0..compiler.tables.def_data.len() {
        if compiler.tables.def_data[idx].address != 0 {
            continue;
        }
        let size = compiler.tables.def_data[idx].bytes.len() as u16;
        let name = compiler.tables.def_data[idx].name.clone();
        let address = compiler
            .free_ram
            .get_free_ram(Fit::Ascending, size.max(1), crate::consts::USER_CODE_START, runtime_start, false, &name)
            .map_err(CodeGenError::Logic)?;
        compiler.tables.def_data[idx].address = address;
    }
    Ok(())
}

fn write_data(out: &mut String, compiler: &mut Compiler) -> Result<(), CodeGenError> {
    writeln!(out, "; DATA objects")?;
    if let Some(data) = compiler.tables.def_data.iter().find(|d| d.name == "_data") {
        let bytes: Vec<String> = data.bytes.iter().map(|b| b.to_string()).collect();
        equ_line(out, &data.name, data.address)?;
        if !bytes.is_empty() {
            writeln!(out, "       DB     {}", bytes.join(" "))?;
        }
        let ptr = compiler.zero_page.allocate(0, &mut compiler.diagnostics);
        equ_line(out, "_dataPtr", ptr)?;
    }
    writeln!(out)?;
    Ok(())
}

/// `_PRAGMA_ TIMEDATA` reserves a small fixed-size buffer the runtime's
/// real-time-clock read fills in (spec.md section 4.7's `TIMEDATA` pragma).
fn write_time_buffer(out: &mut String, compiler: &mut Compiler) -> Result<(), CodeGenError> {
    writeln!(out, "; time buffer")?;
    if compiler.config.time_data {
        const TIME_BUFFER_BYTES: u16 = 6;
        let runtime_start = compiler.runtime_start;
        let address = compiler
            .free_ram
            .get_free_ram(
                Fit::Ascending,
                TIME_BUFFER_BYTES,
                crate::consts::USER_CODE_START,
                runtime_start,
                false,
                "_timeBuffer",
            )
            .map_err(CodeGenError::Logic)?;
        equ_line(out, "_timeBuffer", address)?;
    }
    writeln!(out)?;
    Ok(())
}

/// DEF bytes/words/images/sprites/fonts: every `DefData` blob other than the
/// plain `DATA`/`READ` blob (spec.md section 1: sprite/font/image
/// data-definition keywords synthesize this same record shape).
fn write_def_blobs(out: &mut String, compiler: &Compiler) -> Result<(), CodeGenError> {
    writeln!(out, "; DEF bytes/words/images/sprites/fonts")?;
    for data in compiler.tables.def_data.iter().filter(|d| d.name != "_data") {
        let bytes: Vec<String> = data.bytes.iter().map(|b| b.to_string()).collect();
        equ_line(out, &data.name, data.address)?;
        if !bytes.is_empty() {
            writeln!(out, "       DB     {}", bytes.join(" "))?;
        }
    }
    writeln!(out)?;
    Ok(())
}

fn write_luts(out: &mut String, compiler: &Compiler) -> Result<(), CodeGenError> {
    writeln!(out, "; LUTs")?;

    if compiler.config.numeric_label_lut {
        let mut numeric: Vec<&crate::symbols::Label> =
            compiler.tables.user_labels.iter().filter(|l| l.numeric).collect();
        numeric.sort_by_key(|l| l.address);
        if !numeric.is_empty() {
            writeln!(out, "_numericLabelLut")?;
            let names: Vec<String> = numeric.iter().map(|l| l.name.clone()).collect();
            writeln!(out, "       DW     {}", names.join(" "))?;
        }
    }

    for line in &compiler.program.lines {
        if !line.on_goto_lut.is_empty() {
            writeln!(out, "_onGoto_{:04}", line.line_number)?;
            let names: Vec<String> = line
                .on_goto_lut
                .iter()
                .filter_map(|idx| compiler.tables.user_labels.get(*idx as usize))
                .map(|l| l.name.clone())
                .collect();
            writeln!(out, "       DW     {}", names.join(" "))?;
        }
        if !line.str_concat_lut.is_empty() {
            writeln!(out, "_strConcat_{:04}", line.line_number)?;
            let words: Vec<String> = line.str_concat_lut.iter().map(|w| format!("{w:#06x}")).collect();
            writeln!(out, "       DW     {}", words.join(" "))?;
        }
        if !line.input_lut.is_empty() {
            writeln!(out, "_input_{:04}", line.line_number)?;
            let words: Vec<String> = line.input_lut.iter().map(|w| format!("{w:#06x}")).collect();
            writeln!(out, "       DW     {}", words.join(" "))?;
        }
    }
    writeln!(out)?;
    Ok(())
}

/// Prologue snippets are conceptually emitted at line 0 (spec.md section
/// 4.2.4): enabled ones pass through as a bare `%NAME` macro invocation,
/// everything else stays a commented-out placeholder so the shape of the
/// full prologue is visible even when most of it wasn't needed.
fn write_code(out: &mut String, compiler: &Compiler) -> Result<(), CodeGenError> {
    writeln!(out, "; code")?;
    for snippet in crate::prologue::INIT_SNIPPETS {
        if compiler.prologue.is_enabled(snippet.name) {
            writeln!(out, "%{}", snippet.name)?;
        } else {
            writeln!(out, ";%{}", snippet.name)?;
        }
    }
    for line in &compiler.program.lines {
        for vasm in &line.vasm {
            writeln!(out, "{}", vasm.formatted_code)?;
        }
    }
    Ok(())
}

/// spec.md section 4.6.1: when an internal label's address equals a user
/// label's, the user label wins and the internal label's name is replaced
/// by it everywhere it appears.
fn resolve_label_conflicts(compiler: &Compiler) -> HashMap<String, String> {
    let mut by_address: HashMap<u16, &str> = HashMap::new();
    for label in &compiler.tables.user_labels {
        by_address.entry(label.address).or_insert(&label.name);
    }
    let mut renames = HashMap::new();
    for label in &compiler.tables.internal_labels {
        if let Some(user_name) = by_address.get(&label.address) {
            renames.insert(label.name.clone(), user_name.to_string());
        }
    }
    renames
}

fn apply_renames(compiler: &mut Compiler, renames: &HashMap<String, String>) {
    if renames.is_empty() {
        return;
    }
    for line in &mut compiler.program.lines {
        for vasm in &mut line.vasm {
            let renamed = rename_operand(&vasm.operand, renames);
            if renamed != vasm.operand {
                vasm.operand = renamed;
                vasm.formatted_code = crate::ast::format_instruction(&vasm.opcode, &vasm.operand);
            }
            if let Some(label) = &vasm.internal_label {
                if let Some(new_name) = renames.get(label) {
                    vasm.internal_label = Some(new_name.clone());
                }
            }
        }
    }
}

/// Replace whole-identifier occurrences of any key in `renames` inside
/// `operand` (which may be a bare label, or an expression like `_label+1`).
fn rename_operand(operand: &str, renames: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(operand.len());
    let bytes = operand.as_bytes();
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_';

    let mut i = 0;
    while i < bytes.len() {
        if is_ident(bytes[i]) {
            let start = i;
            while i < bytes.len() && is_ident(bytes[i]) {
                i += 1;
            }
            let word = &operand[start..i];
            match renames.get(word) {
                Some(replacement) => result.push_str(replacement),
                None => result.push_str(word),
            }
        } else {
            let next_char = operand[i..].chars().next().unwrap();
            result.push(next_char);
            i += next_char.len_utf8();
        }
    }
    result
}

/// Every identifier-shaped word referenced from any emitted operand, used to
/// prune internal-label equates nothing in the code actually names (spec.md
/// section 4.6, final step).
fn referenced_names(compiler: &Compiler) -> std::collections::HashSet<String> {
    let mut set = std::collections::HashSet::new();
    for line in &compiler.program.lines {
        for vasm in &line.vasm {
            for word in identifiers(&vasm.operand) {
                set.insert(word);
            }
        }
    }
    set
}

fn identifiers(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if is_ident(bytes[i]) {
            let start = i;
            while i < bytes.len() && is_ident(bytes[i]) {
                i += 1;
            }
            out.push(text[start..i].to_string());
        } else {
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CodeLine, VasmLine};
    use crate::config::CompilerConfig;
    use crate::symbols::{IntVar, Label};

    fn new_compiler() -> Compiler {
        Compiler::new(CompilerConfig::default())
    }

    #[test]
    fn user_and_internal_labels_both_appear_when_addresses_differ() {
        let mut c = new_compiler();
        c.tables.user_labels.push(Label::new("_L10", 0x0200, 0, true));
        let mut internal = Label::new("_while_0000", 0x0210, 0, false);
        internal.address = 0x0210;
        c.tables.internal_labels.push(internal);
        let mut line = CodeLine::new("", 1);
        line.vasm.push(VasmLine::new(0x0210, "JMP", "_while_0000", 3));
        c.program.lines.push(line);

        let out = run_output_pass(&mut c, None).unwrap();
        assert!(out.contains("_L10"));
        assert!(out.contains("_while_0000"));
    }

    #[test]
    fn internal_label_sharing_a_user_labels_address_is_renamed_away() {
        let mut c = new_compiler();
        c.tables.user_labels.push(Label::new("_L10", 0x0200, 0, true));
        c.tables.internal_labels.push(Label::new("_if_0000", 0x0200, 0, false));
        let mut line = CodeLine::new("", 1);
        line.vasm.push(VasmLine::new(0x0200, "JMP", "_if_0000", 3));
        c.program.lines.push(line);

        let out = run_output_pass(&mut c, None).unwrap();
        assert!(out.contains("JMP   _L10"));
        assert!(!out.contains("_if_0000"));
    }

    #[test]
    fn unreferenced_internal_label_equate_is_pruned() {
        let mut c = new_compiler();
        c.tables.internal_labels.push(Label::new("_for_0000", 0x0200, 0, false));
        let mut line = CodeLine::new("", 1);
        line.vasm.push(VasmLine::new(0x0200, "NOP", "", 1));
        c.program.lines.push(line);

        let out = run_output_pass(&mut c, None).unwrap();
        assert!(!out.contains("_for_0000"));
    }

    #[test]
    fn array_initializers_are_padded_with_the_default() {
        let mut c = new_compiler();
        let mut v = IntVar::new_scalar("ARR", 0x40, 1);
        v.var_type = crate::symbols::IntVarType::Array1;
        v.arr_sizes = [4, 0, 0];
        v.init = 9;
        v.arr_inits = vec![1, 2];
        c.tables.int_vars.push(v);

        let out = run_output_pass(&mut c, None).unwrap();
        assert!(out.contains("1 2 9 9"));
    }

    #[test]
    fn data_blob_gets_a_real_address_and_renders_as_bytes() {
        let mut c = new_compiler();
        c.tables.def_data.push(crate::symbols::DefData {
            name: "_data".to_string(),
            address: 0,
            bytes: vec![1, 2, 3],
            lut_address: None,
        });

        let out = run_output_pass(&mut c, None).unwrap();
        assert!(out.contains("_data"));
        assert!(out.contains("1 2 3"));
        assert!(!out.contains("0x0000")); // never left at the sentinel address
    }

    #[test]
    fn macro_source_is_passed_through_verbatim() {
        let mut c = new_compiler();
        let out = run_output_pass(&mut c, Some("%MACRO Foo\nNOP\n%ENDM\n")).unwrap();
        assert!(out.contains("%MACRO Foo"));
        assert!(out.contains("%ENDM"));
    }

    #[test]
    fn numeric_label_lut_lists_addresses_in_order_when_enabled() {
        let mut c = new_compiler();
        c.config.numeric_label_lut = true;
        c.tables.user_labels.push(Label::new("_L20", 0x0210, 0, true));
        c.tables.user_labels.push(Label::new("_L10", 0x0200, 0, true));

        let out = run_output_pass(&mut c, None).unwrap();
        let lut_pos = out.find("_numericLabelLut").unwrap();
        let l10_pos = out[lut_pos..].find("_L10").unwrap();
        let l20_pos = out[lut_pos..].find("_L20").unwrap();
        assert!(l10_pos < l20_pos);
    }
}
