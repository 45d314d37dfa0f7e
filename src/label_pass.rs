//! Label pass (spec.md section 4.8): discover GOSUB targets first, then
//! create labels and code-line stubs so the code pass can reference forward
//! labels before the line that owns them has been emitted.

use crate::ast::CodeLine;
use crate::compiler::Compiler;
use crate::source::{classify_line, LineKind};
use crate::symbols::Label;
use std::collections::HashSet;

/// Scan every line for `GOSUB <target>` and collect the set of targets
/// (numeric label text, or bare label name) referenced that way.
fn discover_gosub_targets(source: &str) -> HashSet<String> {
    let mut targets = HashSet::new();
    for raw in source.lines() {
        let upper = raw.to_ascii_uppercase();
        let mut search_from = 0;
        while let Some(rel) = upper[search_from..].find("GOSUB") {
            let start = search_from + rel + "GOSUB".len();
            let tail = raw[start..].trim_start();
            let target: String = tail
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if !target.is_empty() {
                targets.insert(target.to_ascii_uppercase());
            }
            search_from = start;
        }
    }
    targets
}

/// Run the label pass: populates `compiler.tables.user_labels` and
/// `compiler.program.lines` with one stub [`CodeLine`] per source line
/// (pragma/blank/comment lines get an empty, unparsed stub so line numbers
/// stay aligned for diagnostics).
pub fn run_label_pass(compiler: &mut Compiler, source: &str) {
    let gosub_targets = discover_gosub_targets(source);
    let mut last_numbered_index: Option<usize> = None;

    for (idx, raw_line) in source.lines().enumerate() {
        let line_number = (idx + 1) as u32;
        match classify_line(raw_line) {
            LineKind::Blank | LineKind::Comment | LineKind::Pragma { .. } => {
                compiler.program.lines.push(CodeLine::new("", line_number));
                last_numbered_index = None;
            }
            LineKind::NumericLabel {
                number,
                gosub_marker,
                rest,
            } => {
                let name = format!("_L{number}");
                let line_index = compiler.program.lines.len();
                let gosub = match gosub_marker {
                    Some(explicit) => explicit,
                    None => gosub_targets.contains(&number.to_string()),
                };
                let mut label = Label::new(&name, 0, line_index as u32, true);
                label.gosub = gosub;
                compiler.tables.user_labels.push(label);
                compiler
                    .program
                    .label_line_index
                    .insert(number.to_string(), line_index);

                let mut line = CodeLine::new(&rest, line_number);
                line.label_index = Some(compiler.tables.user_labels.len() - 1);
                line.dont_parse = false;
                compiler.program.lines.push(line);
                last_numbered_index = Some(line_index);
            }
            LineKind::TextLabel { name, rest } => {
                let line_index = compiler.program.lines.len();
                let gosub = gosub_targets.contains(&name.to_ascii_uppercase());
                let mut label = Label::new(&name, 0, line_index as u32, false);
                label.gosub = gosub;
                compiler.tables.user_labels.push(label);
                compiler
                    .program
                    .label_line_index
                    .insert(name.to_ascii_uppercase(), line_index);

                let mut line = CodeLine::new(&rest, line_number);
                line.label_index = Some(compiler.tables.user_labels.len() - 1);
                line.dont_parse = false;
                compiler.program.lines.push(line);
                last_numbered_index = Some(line_index);
            }
            LineKind::Continuation(rest) => {
                if let Some(prev_idx) = last_numbered_index {
                    let prev = &mut compiler.program.lines[prev_idx];
                    if !prev.text.is_empty() {
                        prev.text.push(':');
                    }
                    prev.text.push_str(&rest);
                } else {
                    compiler.error(line_number, "statement has no preceding line label");
                    compiler.program.lines.push(CodeLine::new(&rest, line_number));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;

    #[test]
    fn discovers_gosub_target_by_number() {
        let targets = discover_gosub_targets("10 GOSUB 1000\n1000 RETURN\n");
        assert!(targets.contains("1000"));
    }

    #[test]
    fn numeric_label_without_marker_is_gosub_eligible_iff_referenced() {
        let mut c = Compiler::new(CompilerConfig::default());
        run_label_pass(&mut c, "10 GOSUB 1000\n1000 RETURN\n2000 END\n");
        let l1000 = c
            .tables
            .user_labels
            .iter()
            .find(|l| l.name == "_L1000")
            .unwrap();
        assert!(l1000.gosub);
        let l2000 = c
            .tables
            .user_labels
            .iter()
            .find(|l| l.name == "_L2000")
            .unwrap();
        assert!(!l2000.gosub);
    }

    #[test]
    fn explicit_marker_overrides_gosub_inference() {
        let mut c = Compiler::new(CompilerConfig::default());
        run_label_pass(&mut c, "1000! GOSUB attempted anyway\n");
        let label = &c.tables.user_labels[0];
        assert!(!label.gosub);
    }

    #[test]
    fn continuation_lines_append_to_the_previous_numbered_line() {
        let mut c = Compiler::new(CompilerConfig::default());
        run_label_pass(&mut c, "10 A = 1\nB = 2\n");
        assert_eq!(c.program.lines[0].text, "A = 1:B = 2");
    }

    #[test]
    fn text_label_creates_a_non_numeric_label() {
        let mut c = Compiler::new(CompilerConfig::default());
        run_label_pass(&mut c, "LOOP: GOTO LOOP\n");
        let label = &c.tables.user_labels[0];
        assert_eq!(label.name, "LOOP");
        assert!(!label.numeric);
    }

    #[test]
    fn blank_and_comment_lines_keep_line_numbering_aligned() {
        let mut c = Compiler::new(CompilerConfig::default());
        run_label_pass(&mut c, "10 A = 1\n\n' a comment\n20 B = 2\n");
        assert_eq!(c.program.lines.len(), 4);
        assert_eq!(c.program.lines[3].line_number, 4);
    }
}
