//! Expression-level lexer
//!
//! Turns one statement's text into a token stream. Identifiers keep their
//! type sigil and may contain dots (`player.x` is lexed as one identifier;
//! whether it is a record field path is decided at resolution time, which is
//! how QBasic itself treats dotted names). Numeric literals default to the
//! narrowest kind that holds them.

use crate::error::{Result, RuntimeError};

/// Numeric literal, already typed per the literal rules.
#[derive(Debug, Clone, PartialEq)]
pub enum NumLit {
    Integer(i16),
    Long(i32),
    Single(f32),
    Double(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Num(NumLit),
    Str(String),
    /// Uppercased identifier, sigil and interior dots preserved.
    Ident(String),
    LParen,
    RParen,
    Comma,
    Semicolon,
    /// `#` introducing a file number (`PRINT #1, …`).
    Hash,
    /// `.` before a field name after a `)` (`arr(i).x`).
    Dot,
    Caret,
    Star,
    Slash,
    Backslash,
    Plus,
    Minus,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub col: u32,
}

/// Lex a full statement text. Fails only on malformed literals; an unclosed
/// string is tolerated (QBasic closes it at end of line).
pub fn tokenize(text: &str) -> Result<Vec<Token>> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i] as char;
        let col = i as u32;
        match c {
            ' ' | '\t' => {
                i += 1;
            }
            '"' => {
                let (s, next) = lex_string(text, i);
                out.push(Token {
                    tok: Tok::Str(s),
                    col,
                });
                i = next;
            }
            '(' => {
                out.push(Token {
                    tok: Tok::LParen,
                    col,
                });
                i += 1;
            }
            ')' => {
                out.push(Token {
                    tok: Tok::RParen,
                    col,
                });
                i += 1;
            }
            ',' => {
                out.push(Token {
                    tok: Tok::Comma,
                    col,
                });
                i += 1;
            }
            ';' => {
                out.push(Token {
                    tok: Tok::Semicolon,
                    col,
                });
                i += 1;
            }
            '^' => {
                out.push(Token {
                    tok: Tok::Caret,
                    col,
                });
                i += 1;
            }
            '*' => {
                out.push(Token {
                    tok: Tok::Star,
                    col,
                });
                i += 1;
            }
            '/' => {
                out.push(Token {
                    tok: Tok::Slash,
                    col,
                });
                i += 1;
            }
            '\\' => {
                out.push(Token {
                    tok: Tok::Backslash,
                    col,
                });
                i += 1;
            }
            '+' => {
                out.push(Token {
                    tok: Tok::Plus,
                    col,
                });
                i += 1;
            }
            '-' => {
                out.push(Token {
                    tok: Tok::Minus,
                    col,
                });
                i += 1;
            }
            '#' => {
                out.push(Token {
                    tok: Tok::Hash,
                    col,
                });
                i += 1;
            }
            '=' | '<' | '>' => {
                let next = bytes.get(i + 1).map(|b| *b as char);
                let (tok, len) = match (c, next) {
                    ('<', Some('=')) | ('=', Some('<')) => (Tok::Le, 2),
                    ('>', Some('=')) | ('=', Some('>')) => (Tok::Ge, 2),
                    ('<', Some('>')) | ('>', Some('<')) => (Tok::Ne, 2),
                    ('<', _) => (Tok::Lt, 1),
                    ('>', _) => (Tok::Gt, 1),
                    ('=', _) => (Tok::Eq, 1),
                    _ => unreachable!(),
                };
                out.push(Token { tok, col });
                i += len;
            }
            '&' => {
                let (lit, next) = lex_radix_literal(text, i)?;
                out.push(Token {
                    tok: Tok::Num(lit),
                    col,
                });
                i = next;
            }
            '0'..='9' => {
                let (lit, next) = lex_number(text, i)?;
                out.push(Token {
                    tok: Tok::Num(lit),
                    col,
                });
                i = next;
            }
            '.' => {
                if bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit()) {
                    let (lit, next) = lex_number(text, i)?;
                    out.push(Token {
                        tok: Tok::Num(lit),
                        col,
                    });
                    i = next;
                } else {
                    out.push(Token {
                        tok: Tok::Dot,
                        col,
                    });
                    i += 1;
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                // Underscore starts the extension keywords (_DELAY)
                let (ident, next) = lex_ident(text, i);
                out.push(Token {
                    tok: Tok::Ident(ident),
                    col,
                });
                i = next;
            }
            '?' => {
                // Classic PRINT shorthand
                out.push(Token {
                    tok: Tok::Ident("PRINT".into()),
                    col,
                });
                i += 1;
            }
            _ => {
                return Err(RuntimeError::syntax(format!(
                    "unexpected character {c:?} in {text:?}"
                )));
            }
        }
    }
    Ok(out)
}

fn lex_string(text: &str, start: usize) -> (String, usize) {
    let bytes = text.as_bytes();
    let mut out = String::new();
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            // Doubled quote is a literal quote
            if bytes.get(i + 1) == Some(&b'"') {
                out.push('"');
                i += 2;
                continue;
            }
            return (out, i + 1);
        }
        let c = text[i..].chars().next().unwrap();
        out.push(c);
        i += c.len_utf8();
    }
    (out, i)
}

fn lex_ident(text: &str, start: usize) -> (String, usize) {
    let bytes = text.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            i += 1;
        } else if matches!(c, '%' | '&' | '!' | '#' | '$') {
            i += 1;
            break;
        } else {
            break;
        }
    }
    (text[start..i].to_ascii_uppercase(), i)
}

/// `&H` hex, `&O` octal, `&B` binary. 16-bit values land in Integer with
/// wrap-around sign (`&HFFFF` is -1); a trailing `&` forces Long.
fn lex_radix_literal(text: &str, start: usize) -> Result<(NumLit, usize)> {
    let bytes = text.as_bytes();
    let radix_char = bytes
        .get(start + 1)
        .map(|b| (*b as char).to_ascii_uppercase());
    let (radix, mut i) = match radix_char {
        Some('H') => (16, start + 2),
        Some('O') => (8, start + 2),
        Some('B') => (2, start + 2),
        _ => {
            return Err(RuntimeError::syntax("malformed & literal"));
        }
    };
    let digits_start = i;
    while i < bytes.len() && (bytes[i] as char).is_ascii_alphanumeric() {
        let c = (bytes[i] as char).to_ascii_uppercase();
        let ok = match radix {
            16 => c.is_ascii_hexdigit(),
            8 => ('0'..='7').contains(&c),
            _ => c == '0' || c == '1',
        };
        if !ok {
            break;
        }
        i += 1;
    }
    if i == digits_start {
        return Err(RuntimeError::syntax("digits expected after & prefix"));
    }
    let value = u32::from_str_radix(&text[digits_start..i], radix)
        .map_err(|_| RuntimeError::overflow(format!("literal {}", &text[start..i])))?;
    let long_suffix = bytes.get(i) == Some(&b'&');
    if long_suffix {
        i += 1;
    }
    let lit = if !long_suffix && value <= 0xFFFF {
        NumLit::Integer(value as u16 as i16)
    } else {
        NumLit::Long(value as i32)
    };
    Ok((lit, i))
}

fn lex_number(text: &str, start: usize) -> Result<(NumLit, usize)> {
    let bytes = text.as_bytes();
    let mut i = start;
    let mut has_dot = false;
    let mut has_exp = false;
    let mut exp_char = 'E';

    while i < bytes.len() {
        let c = (bytes[i] as char).to_ascii_uppercase();
        match c {
            '0'..='9' => i += 1,
            '.' if !has_dot && !has_exp => {
                has_dot = true;
                i += 1;
            }
            'E' | 'D' if !has_exp => {
                // Exponent only if followed by digit or signed digit
                let mut j = i + 1;
                if matches!(bytes.get(j), Some(b'+') | Some(b'-')) {
                    j += 1;
                }
                if bytes.get(j).is_some_and(|b| b.is_ascii_digit()) {
                    has_exp = true;
                    exp_char = c;
                    i = j + 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                } else {
                    break;
                }
            }
            _ => break,
        }
    }

    let body = &text[start..i];
    let sigil = bytes.get(i).map(|b| *b as char);
    let lit = match sigil {
        Some('%') => {
            i += 1;
            let v = parse_f64(body)?;
            NumLit::Integer(
                int_in_range(v, i16::MIN as f64, i16::MAX as f64)
                    .ok_or_else(|| RuntimeError::overflow(format!("literal {body}%")))?
                    as i16,
            )
        }
        Some('&') => {
            i += 1;
            let v = parse_f64(body)?;
            NumLit::Long(
                int_in_range(v, i32::MIN as f64, i32::MAX as f64)
                    .ok_or_else(|| RuntimeError::overflow(format!("literal {body}&")))?
                    as i32,
            )
        }
        Some('!') => {
            i += 1;
            NumLit::Single(parse_f64(body)? as f32)
        }
        Some('#') => {
            i += 1;
            NumLit::Double(parse_f64(body)?)
        }
        _ => {
            if exp_char == 'D' {
                NumLit::Double(parse_f64(body)?)
            } else if has_dot || has_exp {
                // Seven significant digits fit a Single; more means Double
                let digits = body.chars().filter(|c| c.is_ascii_digit()).count();
                if digits <= 7 {
                    NumLit::Single(parse_f64(body)? as f32)
                } else {
                    NumLit::Double(parse_f64(body)?)
                }
            } else {
                let v: i64 = body
                    .parse()
                    .map_err(|_| RuntimeError::overflow(format!("literal {body}")))?;
                if let Ok(small) = i16::try_from(v) {
                    NumLit::Integer(small)
                } else if let Ok(long) = i32::try_from(v) {
                    NumLit::Long(long)
                } else {
                    NumLit::Double(v as f64)
                }
            }
        }
    };
    Ok((lit, i))
}

fn parse_f64(body: &str) -> Result<f64> {
    body.to_ascii_uppercase()
        .replace('D', "E")
        .parse::<f64>()
        .map_err(|_| RuntimeError::syntax(format!("malformed number {body:?}")))
}

fn int_in_range(v: f64, lo: f64, hi: f64) -> Option<i64> {
    let r = v.round();
    (r >= lo && r <= hi).then_some(r as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(text: &str) -> Vec<Tok> {
        tokenize(text).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_integer_literal_narrowest_fit() {
        assert_eq!(toks("42"), vec![Tok::Num(NumLit::Integer(42))]);
        assert_eq!(toks("40000"), vec![Tok::Num(NumLit::Long(40000))]);
        assert_eq!(
            toks("3000000000"),
            vec![Tok::Num(NumLit::Double(3000000000.0))]
        );
    }

    #[test]
    fn test_float_literals() {
        assert_eq!(toks("1.5"), vec![Tok::Num(NumLit::Single(1.5))]);
        assert_eq!(toks("1D2"), vec![Tok::Num(NumLit::Double(100.0))]);
        assert_eq!(toks("2E3"), vec![Tok::Num(NumLit::Single(2000.0))]);
        assert_eq!(toks(".25"), vec![Tok::Num(NumLit::Single(0.25))]);
        assert_eq!(toks("3#"), vec![Tok::Num(NumLit::Double(3.0))]);
    }

    #[test]
    fn test_radix_literals() {
        assert_eq!(toks("&HFF"), vec![Tok::Num(NumLit::Integer(255))]);
        assert_eq!(toks("&HFFFF"), vec![Tok::Num(NumLit::Integer(-1))]);
        assert_eq!(toks("&H10000"), vec![Tok::Num(NumLit::Long(65536))]);
        assert_eq!(toks("&O17"), vec![Tok::Num(NumLit::Integer(15))]);
        assert_eq!(toks("&B1010"), vec![Tok::Num(NumLit::Integer(10))]);
        assert_eq!(toks("&HFF&"), vec![Tok::Num(NumLit::Long(255))]);
    }

    #[test]
    fn test_string_doubled_quote() {
        assert_eq!(
            toks(r#""say ""hi"""#),
            vec![Tok::Str("say \"hi".to_string())]
        );
    }

    #[test]
    fn test_ident_keeps_sigil_and_dots() {
        assert_eq!(
            toks("player.x score%"),
            vec![
                Tok::Ident("PLAYER.X".into()),
                Tok::Ident("SCORE%".into())
            ]
        );
    }

    #[test]
    fn test_relational_synonyms() {
        assert_eq!(toks("=<"), vec![Tok::Le]);
        assert_eq!(toks("=>"), vec![Tok::Ge]);
        assert_eq!(toks("><"), vec![Tok::Ne]);
        assert_eq!(toks("<="), vec![Tok::Le]);
    }

    #[test]
    fn test_print_shorthand() {
        assert_eq!(toks("? 1"), vec![Tok::Ident("PRINT".into()), Tok::Num(NumLit::Integer(1))]);
    }

    #[test]
    fn test_file_hash() {
        assert_eq!(
            toks("#1"),
            vec![Tok::Hash, Tok::Num(NumLit::Integer(1))]
        );
    }
}
