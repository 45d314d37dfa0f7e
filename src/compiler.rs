//! The `Compiler` context: the single value that owns all pipeline state.
//!
//! spec.md's Design Notes call for migrating the original's process-wide
//! globals into one context value threaded explicitly through the pipeline,
//! with pipeline phases as methods on it. This is that value.

use crate::allocator::{BumpAllocator, FreeRamAllocator, ZeroPageAllocator};
use crate::ast::{Program, VasmLine};
use crate::config::CompilerConfig;
use crate::consts::{TEMP_VAR_START, TEMP_VAR_WINDOW_BYTES, USER_CODE_START};
use crate::control_flow::ControlFlowStacks;
use crate::errors::{CompileError, Diagnostic, Severity};
use crate::prologue::{self, PrologueState};
use crate::symbols::SymbolTables;

/// All process-wide mutable compilation state, now confined to one value.
///
/// [`Compiler::clear`] must be called before each compilation (spec.md
/// section 5); two concurrent compilations sharing one `Compiler` are not
/// supported, matching the single-threaded scheduling model.
pub struct Compiler {
    pub config: CompilerConfig,
    pub tables: SymbolTables,
    pub program: Program,
    pub control_flow: ControlFlowStacks,
    pub free_ram: Box<dyn FreeRamAllocator>,
    pub zero_page: ZeroPageAllocator,

    /// Current vCPU program counter; every emission advances this
    /// monotonically and stamps the pre-increment value onto the emitted
    /// [`VasmLine`].
    pc: u16,
    /// Base of the current 16-byte (8-slot) temp-variable rolling window.
    temp_var_base: u16,
    /// Current offset within the window; resets when `current_code_line`
    /// changes (spec.md section 4.2.2).
    temp_var_offset: u16,
    current_code_line: u32,
    next_unique_id: u32,
    /// At most one queued label at a time (spec.md section 4.2.3); queuing a
    /// second displaces the first into `tables.discarded_labels`.
    next_internal_label: Option<crate::symbols::Label>,

    pub runtime_start: u16,
    pub runtime_end: u16,

    pub diagnostics: Vec<Diagnostic>,
    compiling_error: bool,

    /// Which ROM-resident init snippets have been enabled so far (spec.md
    /// section 4.2.4), in first-reference order.
    pub prologue: PrologueState,

    /// Every [`VasmLine`] emitted for the code line currently being
    /// dispatched; drained into that line's `CodeLine.vasm` by the code
    /// pass driver once all of its `:`-separated statements are handled.
    current_line_vasm: Vec<VasmLine>,
    /// Label-table indices recorded by `ON ... GOTO/GOSUB` for the current
    /// line, drained into `CodeLine.on_goto_lut` the same way.
    current_line_on_goto_lut: Vec<u16>,
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Self {
        let runtime_start = 0xf800;
        let runtime_end = 0xffff;
        Compiler {
            config,
            tables: SymbolTables::default(),
            program: Program::default(),
            control_flow: ControlFlowStacks::default(),
            free_ram: Box::new(BumpAllocator::new(USER_CODE_START, runtime_start)),
            zero_page: ZeroPageAllocator::default(),
            pc: USER_CODE_START,
            temp_var_base: TEMP_VAR_START,
            temp_var_offset: 0,
            current_code_line: 0,
            next_unique_id: 0,
            next_internal_label: None,
            runtime_start,
            runtime_end,
            diagnostics: Vec::new(),
            compiling_error: false,
            prologue: PrologueState::default(),
            current_line_vasm: Vec::new(),
            current_line_on_goto_lut: Vec::new(),
        }
    }

    /// Reset every symbol table, stack, and address cursor (testable
    /// property #4). Configuration is intentionally *not* reset here: a
    /// caller compiling multiple files with the same CLI flags reuses it.
    pub fn clear(&mut self) {
        self.tables.clear();
        self.program.clear();
        self.control_flow.clear();
        self.free_ram = Box::new(BumpAllocator::new(USER_CODE_START, self.runtime_start));
        self.zero_page.clear();
        self.pc = USER_CODE_START;
        self.temp_var_base = TEMP_VAR_START;
        self.temp_var_offset = 0;
        self.current_code_line = 0;
        self.next_unique_id = 0;
        self.next_internal_label = None;
        self.diagnostics.clear();
        self.compiling_error = false;
        self.prologue.clear();
        self.current_line_vasm.clear();
        self.current_line_on_goto_lut.clear();
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    /// Shift the final program counter by a rewrite's byte delta (spec.md
    /// section 4.5.1, invariant 3). Only [`crate::peephole`] calls this,
    /// after every other address in the program has been shifted the same
    /// way.
    pub(crate) fn shift_pc(&mut self, delta: u16) {
        self.pc = self.pc.wrapping_sub(delta);
    }

    /// Begin processing a new source code line: resets the temp-var window
    /// if the line index actually changed (spec.md section 4.2.2).
    pub fn begin_code_line(&mut self, line_index: u32) {
        if line_index != self.current_code_line {
            self.temp_var_offset = 0;
        }
        self.current_code_line = line_index;
    }

    /// Hand the caller every [`VasmLine`] emitted since the last drain, for
    /// the code pass driver to install onto the owning `CodeLine`.
    pub fn take_line_vasm(&mut self) -> Vec<VasmLine> {
        std::mem::take(&mut self.current_line_vasm)
    }

    /// Record one `ON ... GOTO/GOSUB` case target as a label-table index,
    /// resolved to an address later by the output pass (the same
    /// deferred-resolution convention `str_concat_lut` uses).
    pub fn record_on_goto_target(&mut self, label_index: u16) {
        self.current_line_on_goto_lut.push(label_index);
    }

    pub fn take_line_on_goto_lut(&mut self) -> Vec<u16> {
        std::mem::take(&mut self.current_line_on_goto_lut)
    }

    /// Allocate the next temp-variable slot from the rolling 8-slot window.
    pub fn next_temp_var(&mut self) -> u16 {
        let addr = self.temp_var_base + self.temp_var_offset;
        self.temp_var_offset = (self.temp_var_offset + 2) % TEMP_VAR_WINDOW_BYTES;
        addr
    }

    /// Generate a monotonically increasing unique id, embedded as a 4-hex
    /// suffix in synthetic label names (spec.md section 4.2.3 / 9 "Open
    /// questions": discarded-label rewriting pins this naming convention).
    pub fn unique_id(&mut self) -> u32 {
        let id = self.next_unique_id;
        self.next_unique_id += 1;
        id
    }

    /// Build a synthetic internal label name: `_kind_XXXX` where `XXXX` is a
    /// 4-hex-digit unique suffix.
    pub fn synthetic_label_name(&mut self, kind: &str) -> String {
        let id = self.unique_id();
        format!("_{kind}_{id:04x}")
    }

    /// Queue a label to be bound to the very next emission. Queuing a second
    /// label before an emission consumes the first displaces it onto
    /// `discarded_labels`, keyed by the address it would have landed on —
    /// exactly one queue slot exists (spec.md section 3/4.2.3).
    pub fn set_next_internal_label(&mut self, label: crate::symbols::Label) {
        let pc = self.pc;
        if let Some(mut prev) = self.next_internal_label.replace(label) {
            // The displaced label would have landed here too, had it been
            // consumed instead of the new one (spec.md section 4.2.3).
            prev.address = pc;
            self.tables.discarded_labels.push(prev);
        }
    }

    /// Consume the queued label (if any), binding it to `address`.
    fn take_next_internal_label(&mut self, address: u16) -> Option<crate::symbols::Label> {
        self.next_internal_label.take().map(|mut l| {
            l.address = address;
            l
        })
    }

    /// Emit one vCPU instruction, advancing the PC by `size` bytes and
    /// stamping the pre-increment PC as this instruction's address
    /// (spec.md section 4.2.1 / invariant #1).
    pub fn emit(&mut self, opcode: &str, operand: &str, size: u8) -> VasmLine {
        let address = self.pc;
        self.pc = self.pc.wrapping_add(size as u16);
        let mut vasm = VasmLine::new(address, opcode, operand, size);
        if let Some(label) = self.take_next_internal_label(address) {
            vasm.internal_label = Some(label.name.clone());
            self.tables.internal_labels.push(label);
        }
        self.current_line_vasm.push(vasm.clone());
        vasm
    }

    /// Emit a `CALL stub` instruction, first-referencing whichever ROM-init
    /// snippet backs `stub` (spec.md section 4.2.4). The comment-stripping
    /// and address shift itself happens once, at [`Self::finalize_prologue`].
    pub fn emit_call(&mut self, stub: &str) -> VasmLine {
        if let Some(snippet) = prologue::snippet_for_stub(stub) {
            self.prologue.enable(snippet);
        }
        self.emit("CALL", stub, 3)
    }

    /// After the full code pass, shift every label and emitted instruction
    /// address forward by the total bytes occupied by every snippet enabled
    /// during this compilation (spec.md section 4.2.4): "all subsequent
    /// labels and VasmLine addresses are shifted forward by
    /// SYS_INIT_FUNC_LEN for each enabled snippet."
    pub fn finalize_prologue(&mut self) {
        let shift = self.prologue.total_shift();
        if shift == 0 {
            return;
        }
        for line in &mut self.program.lines {
            for vasm in &mut line.vasm {
                vasm.address = vasm.address.wrapping_add(shift);
            }
        }
        for label in self
            .tables
            .user_labels
            .iter_mut()
            .chain(self.tables.internal_labels.iter_mut())
            .chain(self.tables.discarded_labels.iter_mut())
        {
            label.address = label.address.wrapping_add(shift);
        }
        for data in &mut self.tables.def_data {
            data.address = data.address.wrapping_add(shift);
        }
        self.pc = self.pc.wrapping_add(shift);
    }

    pub fn diagnostic(&mut self, line: u32, message: impl Into<String>, severity: Severity) {
        if severity == Severity::Error {
            self.compiling_error = true;
        }
        self.diagnostics.push(Diagnostic {
            line,
            message: message.into(),
            severity,
        });
    }

    pub fn error(&mut self, line: u32, message: impl Into<String>) {
        self.diagnostic(line, message, Severity::Error);
    }

    pub fn warning(&mut self, line: u32, message: impl Into<String>) {
        self.diagnostic(line, message, Severity::Warning);
    }

    pub fn has_errors(&self) -> bool {
        self.compiling_error
    }

    /// Check the accumulated-error flag at a pass boundary (spec.md section
    /// 7): continue opportunistically within a pass, but stop the pipeline
    /// once a pass finishes if anything set the flag.
    pub fn check_pass_boundary(&self) -> Result<(), CompileError> {
        if self.compiling_error {
            Err(CompileError {
                diagnostics: self.diagnostics.clone(),
            })
        } else {
            Ok(())
        }
    }
}
