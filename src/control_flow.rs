//! Control-flow stack frames.
//!
//! Per the Design Notes in spec.md section 9, the four block-structured
//! control flow constructs become plain stacks on [`crate::compiler::Compiler`]
//! rather than process globals; each frame records exactly what its matching
//! closing keyword needs to thread a branch back to.

/// One live `FOR`, awaiting its `NEXT`.
#[derive(Debug, Clone)]
pub struct ForFrame {
    pub loop_var: String,
    pub top_label: String,
    pub limit: crate::types::Numeric,
    pub step: crate::types::Numeric,
}

/// One live `IF`, tracking which branch (if any) is currently open.
#[derive(Debug, Clone)]
pub struct IfFrame {
    pub else_label: String,
    pub endif_label: String,
    /// Set once an `ELSE` or matching `ELSEIF` has been seen, so a second
    /// `ELSE` on the same `IF` is a structural error.
    pub else_seen: bool,
}

/// One live `WHILE`, awaiting its `WEND`.
#[derive(Debug, Clone)]
pub struct WhileFrame {
    pub top_label: String,
    pub bottom_label: String,
}

/// One live `REPEAT`, awaiting its `UNTIL`.
#[derive(Debug, Clone)]
pub struct RepeatFrame {
    pub top_label: String,
}

/// The four block-structured stacks named in spec.md section 3.
#[derive(Debug, Default)]
pub struct ControlFlowStacks {
    pub for_next: Vec<ForFrame>,
    pub if_else_elseif: Vec<IfFrame>,
    pub endif: Vec<String>,
    pub while_wend: Vec<WhileFrame>,
    pub repeat_until: Vec<RepeatFrame>,
}

impl ControlFlowStacks {
    pub fn clear(&mut self) {
        self.for_next.clear();
        self.if_else_elseif.clear();
        self.endif.clear();
        self.while_wend.clear();
        self.repeat_until.clear();
    }

    pub fn all_empty(&self) -> bool {
        self.for_next.is_empty()
            && self.if_else_elseif.is_empty()
            && self.endif.is_empty()
            && self.while_wend.is_empty()
            && self.repeat_until.is_empty()
    }
}
