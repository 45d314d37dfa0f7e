//! Zero-page scalar allocator and the free-RAM allocator interface.
//!
//! The free-RAM allocator itself is an external collaborator in the real
//! toolchain (spec.md section 1, Out of scope); we model its interface
//! (`get_free_ram`) as a trait so the rest of the compiler can depend on it
//! without owning its placement strategy, and ship a simple bump-allocator
//! implementation so the crate is runnable end to end.

use crate::consts::{USER_VAR_END, USER_VAR_START};
use crate::errors::{Diagnostic, Severity};
use crate::types::Fit;

/// `get_free_ram(fit, size, lo_bound, hi_bound, must_fit_within_page)` from
/// spec.md section 5.
pub trait FreeRamAllocator {
    /// Returns the allocated address, or an error naming the request that
    /// could not be satisfied.
    fn get_free_ram(
        &mut self,
        fit: Fit,
        size: u16,
        lo_bound: u16,
        hi_bound: u16,
        must_fit_within_page: bool,
        requested_for: &str,
    ) -> Result<u16, String>;
}

/// Simple bump allocator over `[lo, hi)`, growing up for `Ascending` and down
/// for `Descending`. Good enough to drive the compiler end to end; the
/// downstream toolchain's allocator is free to do fancier free-list reuse.
#[derive(Debug)]
pub struct BumpAllocator {
    ascending_cursor: u16,
    descending_cursor: u16,
}

impl BumpAllocator {
    pub fn new(lo_bound: u16, hi_bound: u16) -> Self {
        BumpAllocator {
            ascending_cursor: lo_bound,
            descending_cursor: hi_bound,
        }
    }
}

impl FreeRamAllocator for BumpAllocator {
    fn get_free_ram(
        &mut self,
        fit: Fit,
        size: u16,
        lo_bound: u16,
        hi_bound: u16,
        must_fit_within_page: bool,
        requested_for: &str,
    ) -> Result<u16, String> {
        match fit {
            Fit::Ascending => {
                let start = self.ascending_cursor.max(lo_bound);
                let end = start
                    .checked_add(size)
                    .ok_or_else(|| format!("address overflow allocating {size} bytes for '{requested_for}'"))?;
                if end > hi_bound {
                    return Err(format!(
                        "out of free RAM: could not allocate {size} bytes for '{requested_for}' within [{lo_bound:#06x}, {hi_bound:#06x})"
                    ));
                }
                if must_fit_within_page && (start & 0xff00) != ((end - 1) & 0xff00) {
                    let page_start = (start & 0xff00).wrapping_add(0x0100);
                    return self.get_free_ram(
                        fit,
                        size,
                        page_start,
                        hi_bound,
                        must_fit_within_page,
                        requested_for,
                    );
                }
                self.ascending_cursor = end;
                Ok(start)
            }
            Fit::Descending => {
                let end = self.descending_cursor.min(hi_bound);
                let start = end
                    .checked_sub(size)
                    .ok_or_else(|| format!("address underflow allocating {size} bytes for '{requested_for}'"))?;
                if start < lo_bound {
                    return Err(format!(
                        "out of free RAM: could not allocate {size} bytes for '{requested_for}' within [{lo_bound:#06x}, {hi_bound:#06x})"
                    ));
                }
                if must_fit_within_page && (start & 0xff00) != ((end - 1) & 0xff00) {
                    let page_end = end & 0xff00;
                    return self.get_free_ram(
                        fit,
                        size,
                        lo_bound,
                        page_end,
                        must_fit_within_page,
                        requested_for,
                    );
                }
                self.descending_cursor = start;
                Ok(start)
            }
        }
    }
}

/// Zero-page cursor for scalar integer variables.
///
/// Strictly increasing until [`USER_VAR_END`]; per spec.md's documented
/// open question, the source wraps the cursor back to the start rather than
/// failing, which would silently corrupt earlier variables. We preserve that
/// behavior exactly but surface it as a warning diagnostic first, and
/// require tests to assert the warning precedes the next allocation.
#[derive(Debug)]
pub struct ZeroPageAllocator {
    cursor: u16,
    wrapped: bool,
}

impl Default for ZeroPageAllocator {
    fn default() -> Self {
        ZeroPageAllocator {
            cursor: USER_VAR_START,
            wrapped: false,
        }
    }
}

impl ZeroPageAllocator {
    pub fn clear(&mut self) {
        *self = ZeroPageAllocator::default();
    }

    /// Allocate the next 2-byte scalar slot, wrapping (with a warning) at
    /// [`USER_VAR_END`] per the documented (buggy-but-preserved) behavior.
    pub fn allocate(&mut self, code_line: u32, diagnostics: &mut Vec<Diagnostic>) -> u16 {
        if self.cursor >= USER_VAR_END {
            diagnostics.push(Diagnostic {
                line: code_line,
                message: format!(
                    "zero-page variable region exhausted at {:#06x}; wrapping to {:#06x} (may overwrite earlier variables)",
                    self.cursor, USER_VAR_START
                ),
                severity: Severity::Warning,
            });
            self.cursor = USER_VAR_START;
            self.wrapped = true;
        }
        let address = self.cursor;
        self.cursor += 2;
        address
    }

    pub fn has_wrapped(&self) -> bool {
        self.wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocator_ascending_advances_cursor() {
        let mut alloc = BumpAllocator::new(0x0200, 0x8000);
        let a = alloc.get_free_ram(Fit::Ascending, 4, 0x0200, 0x8000, false, "x").unwrap();
        let b = alloc.get_free_ram(Fit::Ascending, 4, 0x0200, 0x8000, false, "y").unwrap();
        assert_eq!(a, 0x0200);
        assert_eq!(b, 0x0204);
    }

    #[test]
    fn bump_allocator_descending_shrinks_from_top() {
        let mut alloc = BumpAllocator::new(0x0200, 0x8000);
        let a = alloc.get_free_ram(Fit::Descending, 4, 0x0200, 0x8000, false, "x").unwrap();
        assert_eq!(a, 0x7ffc);
    }

    #[test]
    fn bump_allocator_reports_out_of_ram() {
        let mut alloc = BumpAllocator::new(0x0200, 0x0204);
        let err = alloc
            .get_free_ram(Fit::Ascending, 8, 0x0200, 0x0204, false, "big_array")
            .unwrap_err();
        assert!(err.contains("big_array"));
    }

    #[test]
    fn zero_page_allocator_wraps_with_warning_before_reuse() {
        let mut zp = ZeroPageAllocator::default();
        let mut diags = Vec::new();
        zp.cursor = USER_VAR_END;
        let first_after_wrap = zp.allocate(10, &mut diags);
        assert_eq!(first_after_wrap, USER_VAR_START);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Warning);
        assert!(zp.has_wrapped());
    }

    #[test]
    fn zero_page_allocator_clear_resets_cursor() {
        let mut zp = ZeroPageAllocator::default();
        let mut diags = Vec::new();
        zp.allocate(1, &mut diags);
        zp.clear();
        assert_eq!(zp.cursor, USER_VAR_START);
        assert!(!zp.has_wrapped());
    }
}
