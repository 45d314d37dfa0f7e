//! Fixed machine-layout constants for the target vCPU.
//!
//! These mirror the retro machine's documented memory map. They are plain
//! constants rather than config fields because they describe the hardware,
//! not a compilation option.

/// First address of the zero-page scalar-variable region.
pub const USER_VAR_START: u16 = 0x0030;
/// One past the last usable zero-page scalar-variable address.
pub const USER_VAR_END: u16 = 0x00f0;
/// Start of the 16-byte (8-slot) expression temp-variable rolling window.
pub const TEMP_VAR_START: u16 = 0x00f0;
/// First address emitted code occupies.
pub const USER_CODE_START: u16 = 0x0200;

/// Column at which an instruction's operand begins.
pub const OPCODE_TRUNC_SIZE: usize = 6;
/// Fixed width a label is padded/truncated to in the label column.
pub const LABEL_TRUNC_SIZE: usize = 16;

/// Width of the temp-variable rolling window in bytes (8 slots of 2 bytes).
pub const TEMP_VAR_WINDOW_BYTES: u16 = 16;

/// Byte length of one ROM-resident system-init snippet (spec.md section
/// 4.2.4). Every snippet in [`crate::prologue::INIT_SNIPPETS`] costs the same
/// fixed amount once enabled, regardless of which one it is.
pub const SYS_INIT_FUNC_LEN: u16 = 12;

/// Fixed zero-page scratch registers used directly by name across
/// [`crate::codegen::arrays`], [`crate::evaluator`], and [`crate::dispatch`]
/// (`memIndex0..2`, `_pokeAddrTmp`, `_step_tmp`). These sit just past the
/// temp-var window so the output formatter's internal-equates section has
/// somewhere real to point the symbol at (spec.md section 4.6: "internal
/// equates (zero-page register file, scroll flags, text work area)").
pub const MEM_INDEX0: u16 = 0x0100;
pub const MEM_INDEX1: u16 = 0x0102;
pub const MEM_INDEX2: u16 = 0x0104;
pub const POKE_ADDR_TMP: u16 = 0x0106;
pub const STEP_TMP: u16 = 0x0108;

/// ROM-resident scroll-flag and text-work-area registers named in spec.md
/// section 4.6's internal-equates description. Their contents are owned by
/// the runtime library (spec.md section 1, out of scope); only their fixed
/// addresses are this crate's concern, so the output formatter can emit an
/// `EQU` a caller of `PRINT`/scroll routines can reference.
pub const SCROLL_FLAG: u16 = 0x010a;
pub const TEXT_WORK_AREA: u16 = 0x010c;
