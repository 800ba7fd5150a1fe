//! Logical-line source model
//!
//! Ingests the program text once: normalizes line endings, captures leading
//! line numbers and `name:` labels, strips `'` and `REM` comments, and splits
//! each line into its colon-separated sub-statements (string literals are
//! opaque to the splitter). The result is immutable; everything downstream
//! addresses statements by `(line index, statement index)`.

use crate::stmt::is_keyword;

/// Compiler directive smuggled through a comment (`' $STATIC`, `REM $DYNAMIC`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    StaticArrays,
    DynamicArrays,
}

/// One colon-separated sub-statement with its column in the original line.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementText {
    pub text: String,
    pub col: u32,
}

/// One logical line after load.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLine {
    /// Classic numeric line number, when the line leads with one.
    pub number: Option<u32>,
    /// Leading `name:` label, normalized to uppercase.
    pub label: Option<String>,
    /// The sub-statements, already comment-free. May be empty.
    pub statements: Vec<StatementText>,
    /// Directive found in this line's comment, if any.
    pub directive: Option<Directive>,
}

/// The whole program as logical lines. Line indices are 0-based internally;
/// user-facing diagnostics use 1-based physical positions.
#[derive(Debug, Clone, Default)]
pub struct SourceProgram {
    pub lines: Vec<SourceLine>,
}

impl SourceProgram {
    pub fn parse(text: &str) -> SourceProgram {
        let lines = text
            .replace("\r\n", "\n")
            .replace('\r', "\n")
            .split('\n')
            .map(parse_line)
            .collect();
        SourceProgram { lines }
    }

    /// User-facing line identity: the numeric line number when present,
    /// else the 1-based physical index. This is what `ERL` reports.
    pub fn display_line(&self, index: usize) -> u32 {
        self.lines
            .get(index)
            .and_then(|l| l.number)
            .unwrap_or((index + 1) as u32)
    }
}

fn parse_line(raw: &str) -> SourceLine {
    let mut rest = raw.trim_start();
    let indent = (raw.len() - rest.len()) as u32;

    // Leading numeric line number
    let mut number = None;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if !digits.is_empty() {
        let after = &rest[digits.len()..];
        if after.is_empty() || after.starts_with([' ', '\t']) {
            number = digits.parse::<u32>().ok();
            rest = after.trim_start();
        }
    }
    // Leading `name:` label. Keywords are never labels, so `DO:` opens a
    // loop rather than defining a label.
    let mut label = None;
    if let Some(ident_len) = leading_identifier_len(rest) {
        let ident = &rest[..ident_len];
        if rest[ident_len..].starts_with(':') && !is_keyword(ident) {
            label = Some(ident.to_ascii_uppercase());
            rest = rest[ident_len + 1..].trim_start();
        }
    }
    let label_offset = indent + (raw.trim_start().len() - rest.len()) as u32;

    let (statements, directive) = split_statements(rest, label_offset);
    SourceLine {
        number,
        label,
        statements,
        directive,
    }
}

fn leading_identifier_len(s: &str) -> Option<usize> {
    let mut chars = s.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_alphabetic() => {}
        _ => return None,
    }
    let mut end = 1;
    for (i, c) in chars {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            end = i + c.len_utf8();
        } else {
            return Some(i);
        }
    }
    Some(end)
}

/// Split on `:` outside string literals, dropping comments. `REM` swallows
/// the rest of the line including colons; `'` does the same anywhere.
fn split_statements(s: &str, base_col: u32) -> (Vec<StatementText>, Option<Directive>) {
    let mut out = Vec::new();
    let mut directive = None;
    let mut start = 0usize;
    let mut in_string = false;
    let bytes = s.as_bytes();
    let mut i = 0usize;

    let mut push_segment = |from: usize, to: usize, out: &mut Vec<StatementText>| {
        let text = s[from..to].trim();
        if !text.is_empty() {
            out.push(StatementText {
                text: text.to_string(),
                col: base_col + from as u32,
            });
        }
    };

    while i < bytes.len() {
        let c = bytes[i] as char;
        if in_string {
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                i += 1;
            }
            '\'' => {
                directive = directive.or_else(|| scan_directive(&s[i + 1..]));
                push_segment(start, i, &mut out);
                return (out, directive);
            }
            ':' => {
                push_segment(start, i, &mut out);
                start = i + 1;
                i += 1;
            }
            _ => {
                // REM at a statement start comments out the rest of the line
                if (c == 'R' || c == 'r') && s[start..i].trim().is_empty() {
                    let tail = &s[i..];
                    if tail.len() >= 3
                        && tail[..3].eq_ignore_ascii_case("REM")
                        && tail[3..]
                            .chars()
                            .next()
                            .is_none_or(|n| !n.is_ascii_alphanumeric())
                    {
                        directive = directive.or_else(|| scan_directive(&tail[3..]));
                        return (out, directive);
                    }
                }
                i += 1;
            }
        }
    }
    push_segment(start, bytes.len(), &mut out);
    (out, directive)
}

fn scan_directive(comment: &str) -> Option<Directive> {
    let upper = comment.trim().to_ascii_uppercase();
    if upper.starts_with("$STATIC") {
        Some(Directive::StaticArrays)
    } else if upper.starts_with("$DYNAMIC") {
        Some(Directive::DynamicArrays)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(line: &SourceLine) -> Vec<&str> {
        line.statements.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn test_colon_split() {
        let src = SourceProgram::parse("PRINT \"A\": PRINT \"B\"");
        assert_eq!(texts(&src.lines[0]), vec!["PRINT \"A\"", "PRINT \"B\""]);
    }

    #[test]
    fn test_colon_inside_string_is_opaque() {
        let src = SourceProgram::parse("PRINT \"a:b\": PRINT \"c\"");
        assert_eq!(texts(&src.lines[0]), vec!["PRINT \"a:b\"", "PRINT \"c\""]);
    }

    #[test]
    fn test_line_number_and_label() {
        let src = SourceProgram::parse("100 PRINT 1\nstart: PRINT 2");
        assert_eq!(src.lines[0].number, Some(100));
        assert_eq!(src.lines[1].label.as_deref(), Some("START"));
        assert_eq!(texts(&src.lines[1]), vec!["PRINT 2"]);
    }

    #[test]
    fn test_keyword_is_not_a_label() {
        let src = SourceProgram::parse("DO: PRINT 1: LOOP");
        assert_eq!(src.lines[0].label, None);
        assert_eq!(texts(&src.lines[0]), vec!["DO", "PRINT 1", "LOOP"]);
    }

    #[test]
    fn test_apostrophe_comment() {
        let src = SourceProgram::parse("PRINT 1 ' trailing: not a statement");
        assert_eq!(texts(&src.lines[0]), vec!["PRINT 1"]);
    }

    #[test]
    fn test_rem_swallows_colons() {
        let src = SourceProgram::parse("REM setup: nothing here\nPRINT 1: REM done: really");
        assert!(src.lines[0].statements.is_empty());
        assert_eq!(texts(&src.lines[1]), vec!["PRINT 1"]);
    }

    #[test]
    fn test_remark_prefix_is_not_rem() {
        let src = SourceProgram::parse("REMARK = 5");
        assert_eq!(texts(&src.lines[0]), vec!["REMARK = 5"]);
    }

    #[test]
    fn test_dynamic_directive() {
        let src = SourceProgram::parse("' $DYNAMIC\nDIM a(10)");
        assert_eq!(src.lines[0].directive, Some(Directive::DynamicArrays));
    }

    #[test]
    fn test_display_line() {
        let src = SourceProgram::parse("PRINT 1\n200 PRINT 2");
        assert_eq!(src.display_line(0), 1);
        assert_eq!(src.display_line(1), 200);
    }

    #[test]
    fn test_crlf_normalized() {
        let src = SourceProgram::parse("PRINT 1\r\nPRINT 2");
        assert_eq!(src.lines.len(), 2);
        assert_eq!(texts(&src.lines[1]), vec!["PRINT 2"]);
    }
}
