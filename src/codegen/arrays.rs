//! Array write specialization (spec.md section 4.3).
//!
//! Each index expression is evaluated and stored into the dedicated
//! `memIndex0..memIndex2` scratch cells; 2D/3D writes then call a runtime
//! helper to fold those into an effective address, while a 1D write with a
//! constant index is folded to a single immediate at compile time.

use crate::compiler::Compiler;
use crate::errors::CodeGenError;
use crate::evaluator::Evaluator;
use crate::symbols::IntVarType;
use crate::types::{Int16Byte, Numeric, VarKind};

/// Write `value_expr` into `var_name`'s element at `index_exprs` (1-3 of
/// them, already split on top-level commas by the caller).
///
/// Each index is evaluated and stored to its `memIndex` scratch cell one at
/// a time, immediately after it's evaluated, since evaluating the *next*
/// index clobbers the accumulator the previous one's value sat in. The
/// value expression is evaluated and materialized last of all, so it's
/// sitting in the accumulator right before the final `POKE`/`DOKE` — not
/// before the index stores or the `convertArr2d`/`convertArr3d`/`PeekArray`
/// helper call, any of which would clobber it first.
pub fn emit_array_write(
    compiler: &mut Compiler,
    line_number: u32,
    var_name: &str,
    index_exprs: &[String],
    value_expr: &str,
    int16_byte: Int16Byte,
) -> Result<(), CodeGenError> {
    let var_idx = compiler
        .tables
        .find_int_var(var_name)
        .ok_or_else(|| format!("unknown array '{var_name}'"))?;

    let var_type = compiler.tables.int_vars[var_idx].var_type;
    let label = compiler.tables.int_vars[var_idx].output_label.trim().to_string();
    let expected = dims_for(var_type);
    if index_exprs.len() != expected as usize {
        return Err(format!("'{var_name}' expects {expected} index expression(s)").into());
    }

    let store_op = store_opcode(int16_byte);

    if var_type == IntVarType::Array1 {
        let mut idx_eval = Evaluator::new(compiler, &index_exprs[0], line_number);
        let idx = idx_eval.evaluate();
        if is_constant(&idx) {
            // Constant-index 1D write folds to a single immediate operand;
            // the index never touches memIndex0.
            let offset = idx.as_u16().wrapping_mul(2);
            crate::evaluator::evaluate_and_materialize(compiler, value_expr, line_number);
            compiler.emit(store_op, &format!("{label}+{offset}"), 2);
            return Ok(());
        }
        store_index(compiler, 0, &idx);
        compiler.emit("CALL", "PeekArray", 3);
        crate::evaluator::evaluate_and_materialize(compiler, value_expr, line_number);
        compiler.emit(store_op, &label, 2);
        return Ok(());
    }

    for slot in 0..expected {
        let mut idx_eval = Evaluator::new(compiler, &index_exprs[slot as usize], line_number);
        let idx = idx_eval.evaluate();
        store_index(compiler, slot, &idx);
    }
    let helper = match var_type {
        IntVarType::Array2 => "convertArr2d",
        IntVarType::Array3 => "convertArr3d",
        IntVarType::Scalar | IntVarType::Array1 => unreachable!("dims_for checked above"),
    };
    compiler.emit_call(helper);
    crate::evaluator::evaluate_and_materialize(compiler, value_expr, line_number);
    compiler.emit(store_op, &label, 2);
    Ok(())
}

fn dims_for(t: IntVarType) -> u8 {
    match t {
        IntVarType::Scalar => 0,
        IntVarType::Array1 => 1,
        IntVarType::Array2 => 2,
        IntVarType::Array3 => 3,
    }
}

fn is_constant(n: &Numeric) -> bool {
    matches!(n.var_kind, VarKind::Number) && n.value.is_finite()
}

fn store_index(compiler: &mut Compiler, slot: u8, n: &Numeric) {
    materialize_value(compiler, n);
    compiler.emit("STW", &format!("memIndex{slot}"), 2);
}

/// Emit whatever load is needed to put `n`'s value into the accumulator —
/// the same cases the evaluator's own `materialize` and the array-READ path
/// (`Evaluator::parse_array_index_read`) handle: a bare variable reference
/// needs an explicit `LDW`, a constant needs an `LDI`, and anything else
/// (a nested binary op's result) is already sitting in the accumulator from
/// the opcode that produced it.
fn materialize_value(compiler: &mut Compiler, n: &Numeric) {
    match n.var_kind {
        VarKind::Number | VarKind::Constant if n.value.is_finite() => {
            compiler.emit("LDI", &format!("{}", n.as_u16()), 2);
        }
        VarKind::IntVar => {
            let label = compiler.tables.int_vars[n.index as usize].output_label.trim().to_string();
            compiler.emit("LDW", &label, 2);
        }
        _ => {}
    }
}

fn store_opcode(byte: Int16Byte) -> &'static str {
    match byte {
        Int16Byte::Low => "POKE",
        Int16Byte::High => "POKE",
        Int16Byte::Both => "DOKE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;

    fn new_compiler_with_array(var_type: IntVarType, sizes: [u16; 3]) -> Compiler {
        let mut c = Compiler::new(CompilerConfig::default());
        let mut v = crate::symbols::IntVar::new_scalar("ARR", 0x40, 1);
        v.var_type = var_type;
        v.arr_sizes = sizes;
        c.tables.int_vars.push(v);
        c
    }

    #[test]
    fn constant_index_1d_write_folds_offset() {
        let mut c = new_compiler_with_array(IntVarType::Array1, [10, 0, 0]);
        let start = c.pc();
        emit_array_write(&mut c, 1, "ARR", &["2".to_string()], "5", Int16Byte::Both).unwrap();
        assert!(c.pc() > start);
        let emitted: Vec<_> = c.tables.int_vars.iter().collect();
        assert_eq!(emitted.len(), 1);
    }

    #[test]
    fn non_constant_index_2d_write_calls_runtime_helper() {
        let mut c = new_compiler_with_array(IntVarType::Array2, [4, 4, 0]);
        c.tables.int_vars.push(crate::symbols::IntVar::new_scalar("I", 0x30, 1));
        c.tables.int_vars.push(crate::symbols::IntVar::new_scalar("J", 0x32, 1));
        emit_array_write(
            &mut c,
            1,
            "ARR",
            &["I".to_string(), "J".to_string()],
            "9",
            Int16Byte::Both,
        )
        .unwrap();
        assert!(c.pc() > crate::consts::USER_CODE_START);
    }

    #[test]
    fn wrong_dimension_count_is_an_error() {
        let mut c = new_compiler_with_array(IntVarType::Array2, [4, 4, 0]);
        let err = emit_array_write(&mut c, 1, "ARR", &["1".to_string()], "9", Int16Byte::Both)
            .unwrap_err();
        assert!(err.to_string().contains("index expression"));
    }
}
