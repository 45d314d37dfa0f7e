//! Source-line classification (spec.md section 6).
//!
//! Each physical line is either blank, a comment, a pragma, a numeric-labeled
//! statement, a text-labeled statement, or an unlabeled continuation of the
//! previous numbered line.

#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    Blank,
    Comment,
    Pragma { name: String, args: Vec<String> },
    NumericLabel {
        number: u32,
        /// `Some(true)` for a trailing `:` (GOSUB-eligible), `Some(false)`
        /// for a trailing `!` (explicitly not GOSUB-eligible), `None` when
        /// neither marker is present (eligibility then follows from whether
        /// any `GOSUB` in the program targets this line number).
        gosub_marker: Option<bool>,
        rest: String,
    },
    TextLabel { name: String, rest: String },
    Continuation(String),
}

/// Strip a trailing comment (`'` outside of string literals) from `line`.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '\'' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}

pub fn classify_line(raw: &str) -> LineKind {
    let line = strip_comment(raw);
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return if raw.trim().is_empty() {
            LineKind::Blank
        } else {
            LineKind::Comment
        };
    }

    if let Some(rest) = trimmed.strip_prefix("_PRAGMA_") {
        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or("").to_string();
        let args = parts.map(|s| s.to_string()).collect();
        return LineKind::Pragma { name, args };
    }

    let mut chars = trimmed.char_indices().peekable();
    let mut digit_end = 0;
    while let Some(&(i, c)) = chars.peek() {
        if c.is_ascii_digit() {
            digit_end = i + c.len_utf8();
            chars.next();
        } else {
            break;
        }
    }
    if digit_end > 0 {
        let number: u32 = trimmed[..digit_end].parse().unwrap_or(0);
        let after = &trimmed[digit_end..];
        let (gosub_marker, rest) = if let Some(stripped) = after.strip_prefix(':') {
            (Some(true), stripped)
        } else if let Some(stripped) = after.strip_prefix('!') {
            (Some(false), stripped)
        } else {
            (None, after)
        };
        return LineKind::NumericLabel {
            number,
            gosub_marker,
            rest: rest.trim_start().to_string(),
        };
    }

    if let Some(colon_idx) = trimmed.find(':') {
        let candidate = &trimmed[..colon_idx];
        if !candidate.is_empty()
            && candidate
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_')
            && candidate.chars().next().is_some_and(|c| c.is_alphabetic())
        {
            return LineKind::TextLabel {
                name: candidate.to_string(),
                rest: trimmed[colon_idx + 1..].trim_start().to_string(),
            };
        }
    }

    LineKind::Continuation(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_is_blank() {
        assert_eq!(classify_line("   "), LineKind::Blank);
    }

    #[test]
    fn comment_line_strips_to_comment() {
        assert_eq!(classify_line("   ' a note"), LineKind::Comment);
    }

    #[test]
    fn pragma_line_parses_name_and_args() {
        let kind = classify_line("_PRAGMA_ ROM ROM1");
        assert_eq!(
            kind,
            LineKind::Pragma {
                name: "ROM".to_string(),
                args: vec!["ROM1".to_string()]
            }
        );
    }

    #[test]
    fn numeric_label_with_gosub_marker() {
        let kind = classify_line("1000: A = 1");
        assert_eq!(
            kind,
            LineKind::NumericLabel {
                number: 1000,
                gosub_marker: Some(true),
                rest: "A = 1".to_string()
            }
        );
    }

    #[test]
    fn numeric_label_with_non_gosub_marker() {
        let kind = classify_line("1000! A = 1");
        assert_eq!(
            kind,
            LineKind::NumericLabel {
                number: 1000,
                gosub_marker: Some(false),
                rest: "A = 1".to_string()
            }
        );
    }

    #[test]
    fn numeric_label_without_marker() {
        let kind = classify_line("1000 A = 1");
        assert_eq!(
            kind,
            LineKind::NumericLabel {
                number: 1000,
                gosub_marker: None,
                rest: "A = 1".to_string()
            }
        );
    }

    #[test]
    fn text_label_statement() {
        let kind = classify_line("LOOP: GOTO LOOP");
        assert_eq!(
            kind,
            LineKind::TextLabel {
                name: "LOOP".to_string(),
                rest: "GOTO LOOP".to_string()
            }
        );
    }

    #[test]
    fn colon_inside_string_is_not_a_text_label() {
        let kind = classify_line(r#"A$ = "x:y""#);
        assert!(matches!(kind, LineKind::Continuation(_)));
    }

    #[test]
    fn unlabeled_line_is_a_continuation() {
        assert_eq!(
            classify_line("  PRINT A"),
            LineKind::Continuation("PRINT A".to_string())
        );
    }
}
