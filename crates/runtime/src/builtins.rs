//! Built-in function surface
//!
//! A fixed table keyed by case-normalized name. Each entry checks its arity
//! and coerces its arguments; out-of-domain arguments raise
//! `IllegalCall` (code 5). Zero-argument builtins (`INKEY$`, `TIMER`, `RND`
//! without parens, `ERR`, …) are resolved by the evaluator through
//! [`zero_arg`] before variable lookup, since they lex as bare names.

use qb_lang::error::{Result, RuntimeError};
use qb_lang::types::ScalarType;

use crate::files::{basic_to_bytes, bytes_to_basic};
use crate::host::Host;
use crate::rng::Rng;
use crate::value::{number_text, round_half_even, Value};

/// Mutable context handed to builtins that touch the host or RNG.
pub struct BuiltinCtx<'a> {
    pub host: &'a mut dyn Host,
    pub rng: &'a mut Rng,
    pub err: u16,
    pub erl: u32,
}

fn arity(name: &str, args: &[Value], expected: std::ops::RangeInclusive<usize>) -> Result<()> {
    if expected.contains(&args.len()) {
        Ok(())
    } else {
        Err(RuntimeError::illegal_call(format!(
            "{name} takes {expected:?} arguments, got {}",
            args.len()
        )))
    }
}

/// Names the dispatch table claims; used by the evaluator's resolution
/// memo before falling back to implicit arrays.
pub fn is_builtin_name(name: &str) -> bool {
    const NAMES: &[&str] = &[
        "ABS", "SGN", "SQR", "SIN", "COS", "TAN", "ATN", "EXP", "LOG", "INT", "FIX", "CINT",
        "CLNG", "CSNG", "CDBL", "RND", "LEN", "ASC", "VAL", "INSTR", "STR$", "CHR$", "HEX$",
        "OCT$", "LEFT$", "RIGHT$", "MID$", "LCASE$", "UCASE$", "LTRIM$", "RTRIM$", "SPACE$",
        "STRING$", "MKI$", "MKL$", "MKS$", "MKD$", "CVI", "CVL", "CVS", "CVD", "MKSMBF$",
        "CVSMBF", "MKDMBF$", "CVDMBF", "POINT", "SCREEN", "POS", "EOF", "LOF", "LOC", "SEEK",
        "STICK", "STRIG", "PEN", "FRE", "PEEK", "VARPTR", "VARSEG", "INP",
    ];
    NAMES.contains(&name)
}

/// Zero-argument builtins that appear as bare names in expressions.
pub fn zero_arg(name: &str, ctx: &mut BuiltinCtx) -> Option<Result<Value>> {
    let v = match name {
        "INKEY$" => Value::Str(ctx.host.input().inkey().unwrap_or_default()),
        "TIMER" => Value::Single(ctx.host.clock().timer() as f32),
        "RND" => Value::Single(ctx.rng.next()),
        "ERR" => Value::Integer(ctx.err as i16),
        "ERL" => Value::Long(ctx.erl as i32),
        "TIME$" => Value::Str(ctx.host.clock().time()),
        "DATE$" => Value::Str(ctx.host.clock().date()),
        "CSRLIN" => Value::Integer(ctx.host.surface().cursor().0 as i16),
        "FREEFILE" => Value::Integer(ctx.host.files().freefile() as i16),
        "COMMAND$" => Value::Str(String::new()),
        _ => return None,
    };
    Some(Ok(v))
}

/// Dispatch a named builtin. `None` when the name is not a builtin, so the
/// evaluator can try arrays and user functions.
pub fn call(name: &str, args: &[Value], ctx: &mut BuiltinCtx) -> Option<Result<Value>> {
    let result = match name {
        // --- numeric ---
        "ABS" => num1(name, args, |x| x.abs()),
        "SGN" => with1(name, args, |v| {
            Ok(Value::Integer(match v.as_f64()?.partial_cmp(&0.0) {
                Some(std::cmp::Ordering::Greater) => 1,
                Some(std::cmp::Ordering::Less) => -1,
                _ => 0,
            }))
        }),
        "SQR" => domain1(name, args, |x| (x >= 0.0).then(|| x.sqrt())),
        "SIN" => num1(name, args, f64::sin),
        "COS" => num1(name, args, f64::cos),
        "TAN" => num1(name, args, f64::tan),
        "ATN" => num1(name, args, f64::atan),
        "EXP" => domain1(name, args, |x| {
            let r = x.exp();
            r.is_finite().then_some(r)
        }),
        "LOG" => domain1(name, args, |x| (x > 0.0).then(|| x.ln())),
        "INT" => with1(name, args, |v| {
            Ok(float_like(v, v.as_f64()?.floor()))
        }),
        "FIX" => with1(name, args, |v| {
            Ok(float_like(v, v.as_f64()?.trunc()))
        }),
        "CINT" => with1(name, args, |v| {
            Value::Double(round_half_even(v.as_f64()?)).coerce_to(ScalarType::Integer)
        }),
        "CLNG" => with1(name, args, |v| {
            Value::Double(round_half_even(v.as_f64()?)).coerce_to(ScalarType::Long)
        }),
        "CSNG" => with1(name, args, |v| v.coerce_to(ScalarType::Single)),
        "CDBL" => with1(name, args, |v| v.coerce_to(ScalarType::Double)),
        "RND" => {
            if let Err(e) = arity(name, args, 0..=1) {
                return Some(Err(e));
            }
            match args.first() {
                None => Ok(Value::Single(ctx.rng.next())),
                Some(v) => match v.as_f64() {
                    Err(e) => Err(e),
                    Ok(n) if n > 0.0 => Ok(Value::Single(ctx.rng.next())),
                    Ok(n) if n < 0.0 => Ok(Value::Single(ctx.rng.reseed_negative(n))),
                    Ok(_) => Ok(Value::Single(ctx.rng.last())),
                },
            }
        }

        // --- string inspection ---
        "LEN" => with1(name, args, |v| {
            Ok(Value::Integer(match v {
                Value::Str(s) => s.chars().count() as i16,
                // LEN of a numeric is its storage size
                Value::Integer(_) => 2,
                Value::Long(_) | Value::Single(_) => 4,
                Value::Double(_) => 8,
                Value::Record(..) => {
                    return Err(RuntimeError::illegal_call("LEN of a record needs a layout"));
                }
            }))
        }),
        "ASC" => with1(name, args, |v| {
            let s = v.as_str()?;
            match s.chars().next() {
                Some(c) => Ok(Value::Integer((c as u32 & 0xFF) as i16)),
                None => Err(RuntimeError::illegal_call("ASC of empty string")),
            }
        }),
        "VAL" => with1(name, args, |v| Ok(val_of(v.as_str()?))),
        "INSTR" => instr(args),
        "STR$" => with1(name, args, |v| {
            let body = number_text(v);
            if v.as_f64()? >= 0.0 {
                Ok(Value::Str(format!(" {body}")))
            } else {
                Ok(Value::Str(body))
            }
        }),
        "CHR$" => with1(name, args, |v| {
            let code = v.as_i32()?;
            if (0..=255).contains(&code) {
                Ok(Value::Str(bytes_to_basic(&[code as u8])))
            } else {
                Err(RuntimeError::illegal_call(format!("CHR$({code})")))
            }
        }),
        "HEX$" => with1(name, args, |v| Ok(Value::Str(format!("{:X}", v.as_i32()?)))),
        "OCT$" => with1(name, args, |v| Ok(Value::Str(format!("{:o}", v.as_i32()?)))),

        // --- string building ---
        "LEFT$" => with2(name, args, |s, n| {
            let s = s.as_str()?;
            let n = clamp_len(n.as_i32()?);
            Ok(Value::Str(s.chars().take(n).collect()))
        }),
        "RIGHT$" => with2(name, args, |s, n| {
            let s = s.as_str()?;
            let n = clamp_len(n.as_i32()?);
            let len = s.chars().count();
            Ok(Value::Str(s.chars().skip(len.saturating_sub(n)).collect()))
        }),
        "MID$" => {
            if let Err(e) = arity(name, args, 2..=3) {
                return Some(Err(e));
            }
            (|| {
                let s = args[0].as_str()?;
                let start = args[1].as_i32()?;
                if start < 1 {
                    return Err(RuntimeError::illegal_call("MID$ start must be >= 1"));
                }
                let len = match args.get(2) {
                    Some(v) => clamp_len(v.as_i32()?),
                    None => usize::MAX,
                };
                Ok(Value::Str(
                    s.chars().skip(start as usize - 1).take(len).collect(),
                ))
            })()
        }
        "LCASE$" => str1(name, args, |s| s.to_ascii_lowercase()),
        "UCASE$" => str1(name, args, |s| s.to_ascii_uppercase()),
        "LTRIM$" => str1(name, args, |s| s.trim_start_matches(' ').to_string()),
        "RTRIM$" => str1(name, args, |s| s.trim_end_matches(' ').to_string()),
        "SPACE$" => with1(name, args, |v| {
            Ok(Value::Str(" ".repeat(clamp_len(v.as_i32()?))))
        }),
        "STRING$" => with2(name, args, |n, ch| {
            let n = clamp_len(n.as_i32()?);
            let c = match ch {
                Value::Str(s) => s
                    .chars()
                    .next()
                    .ok_or_else(|| RuntimeError::illegal_call("STRING$ of empty string"))?,
                v => {
                    let code = v.as_i32()?;
                    if !(0..=255).contains(&code) {
                        return Err(RuntimeError::illegal_call(format!("STRING$({code})")));
                    }
                    (code as u8) as char
                }
            };
            Ok(Value::Str(c.to_string().repeat(n)))
        }),

        // --- byte codecs ---
        "MKI$" => with1(name, args, |v| {
            Ok(Value::Str(bytes_to_basic(&v.as_i16()?.to_le_bytes())))
        }),
        "MKL$" => with1(name, args, |v| {
            Ok(Value::Str(bytes_to_basic(&v.as_i32()?.to_le_bytes())))
        }),
        "MKS$" => with1(name, args, |v| {
            Ok(Value::Str(bytes_to_basic(
                &(v.as_f64()? as f32).to_le_bytes(),
            )))
        }),
        "MKD$" => with1(name, args, |v| {
            Ok(Value::Str(bytes_to_basic(&v.as_f64()?.to_le_bytes())))
        }),
        "CVI" => codec(name, args, 2, |b| {
            Value::Integer(i16::from_le_bytes([b[0], b[1]]))
        }),
        "CVL" => codec(name, args, 4, |b| {
            Value::Long(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        }),
        "CVS" => codec(name, args, 4, |b| {
            Value::Single(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        }),
        "CVD" => codec(name, args, 8, |b| {
            Value::Double(f64::from_le_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ]))
        }),
        "MKSMBF$" => with1(name, args, |v| {
            Ok(Value::Str(bytes_to_basic(&mbf_from_f32(v.as_f64()? as f32)?)))
        }),
        "CVSMBF" => codec(name, args, 4, |b| {
            Value::Single(f32_from_mbf([b[0], b[1], b[2], b[3]]))
        }),
        "MKDMBF$" => with1(name, args, |v| {
            Ok(Value::Str(bytes_to_basic(&mbf_from_f64(v.as_f64()?)?)))
        }),
        "CVDMBF" => codec(name, args, 8, |b| {
            Value::Double(f64_from_mbf([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ]))
        }),

        // --- host-facing ---
        "POINT" => with2(name, args, |x, y| {
            Ok(Value::Integer(
                ctx_point(ctx, x.as_i32()?, y.as_i32()?) as i16
            ))
        }),
        "SCREEN" => {
            if let Err(e) = arity(name, args, 2..=3) {
                return Some(Err(e));
            }
            // Character/attribute probe; this surface has no text ram
            Ok(Value::Integer(0))
        }
        "POS" => {
            if let Err(e) = arity(name, args, 0..=1) {
                return Some(Err(e));
            }
            Ok(Value::Integer(ctx.host.surface().cursor().1 as i16))
        }
        "EOF" => file1(name, args, ctx, |fs, h| Ok(Value::Integer(if fs.eof(h)? { -1 } else { 0 }))),
        "LOF" => file1(name, args, ctx, |fs, h| Ok(Value::Long(fs.lof(h)? as i32))),
        "LOC" => file1(name, args, ctx, |fs, h| Ok(Value::Long(fs.loc(h)? as i32))),
        "SEEK" => file1(name, args, ctx, |fs, h| {
            Ok(Value::Long(fs.loc(h)? as i32 + 1))
        }),
        "STICK" => with1(name, args, |v| {
            Ok(Value::Integer(ctx.host.input().stick(v.as_i32()?) as i16))
        }),
        "STRIG" => with1(name, args, |v| {
            Ok(Value::Integer(if ctx.host.input().strig(v.as_i32()?) {
                -1
            } else {
                0
            }))
        }),
        "PEN" => with1(name, args, |v| {
            let (x, y, buttons) = ctx.host.input().mouse();
            Ok(Value::Integer(match v.as_i32()? {
                0 | 3 => (buttons != 0) as i16 * -1,
                1 | 4 => x as i16,
                2 | 5 => y as i16,
                6 => (y / 8 + 1) as i16,
                7 => (x / 8 + 1) as i16,
                n => {
                    return Err(RuntimeError::illegal_call(format!("PEN({n})")));
                }
            }))
        }),
        "FRE" => {
            if let Err(e) = arity(name, args, 1..=1) {
                return Some(Err(e));
            }
            // Report a roomy fixed heap, as interpreters without a 64K
            // segment model do
            Ok(Value::Long(61_440))
        }
        "PEEK" | "VARPTR" | "VARSEG" | "INP" => {
            Err(RuntimeError::unsupported(format!("{name} is not available")))
        }

        _ => return None,
    };
    Some(result)
}

fn ctx_point(ctx: &mut BuiltinCtx, x: i32, y: i32) -> i32 {
    ctx.host.surface().point(x, y)
}

fn with1(
    name: &str,
    args: &[Value],
    f: impl FnOnce(&Value) -> Result<Value>,
) -> Result<Value> {
    arity(name, args, 1..=1)?;
    f(&args[0])
}

fn with2(
    name: &str,
    args: &[Value],
    f: impl FnOnce(&Value, &Value) -> Result<Value>,
) -> Result<Value> {
    arity(name, args, 2..=2)?;
    f(&args[0], &args[1])
}

fn num1(name: &str, args: &[Value], f: impl FnOnce(f64) -> f64) -> Result<Value> {
    with1(name, args, |v| Ok(float_like(v, f(v.as_f64()?))))
}

fn domain1(name: &str, args: &[Value], f: impl FnOnce(f64) -> Option<f64>) -> Result<Value> {
    let name_owned = name.to_string();
    with1(name, args, move |v| {
        let x = v.as_f64()?;
        match f(x) {
            Some(r) => Ok(float_like(v, r)),
            None => Err(RuntimeError::illegal_call(format!("{name_owned}({x})"))),
        }
    })
}

fn str1(name: &str, args: &[Value], f: impl FnOnce(&str) -> String) -> Result<Value> {
    with1(name, args, |v| Ok(Value::Str(f(v.as_str()?))))
}

fn codec(
    name: &str,
    args: &[Value],
    len: usize,
    f: impl FnOnce(&[u8]) -> Value,
) -> Result<Value> {
    with1(name, args, |v| {
        let bytes = basic_to_bytes(v.as_str()?);
        if bytes.len() < len {
            return Err(RuntimeError::illegal_call(format!(
                "{name} needs {len} bytes"
            )));
        }
        Ok(f(&bytes[..len]))
    })
}

fn file1(
    name: &str,
    args: &[Value],
    ctx: &mut BuiltinCtx,
    f: impl FnOnce(&mut dyn crate::host::FileSys, u16) -> Result<Value>,
) -> Result<Value> {
    arity(name, args, 1..=1)?;
    let handle = args[0].as_i32()?;
    if !(1..=255).contains(&handle) {
        return Err(RuntimeError::illegal_call(format!("{name}({handle})")));
    }
    f(ctx.host.files(), handle as u16)
}

/// Result keeps the operand's width: Double stays Double, everything else
/// narrows through Single, landing on an integer kind only if exact.
fn float_like(v: &Value, r: f64) -> Value {
    match v {
        Value::Double(_) => Value::Double(r),
        Value::Integer(_) | Value::Long(_)
            if r == r.trunc() && (i32::MIN as f64..=i32::MAX as f64).contains(&r) =>
        {
            match i16::try_from(r as i32) {
                Ok(n) => Value::Integer(n),
                Err(_) => Value::Long(r as i32),
            }
        }
        _ => Value::Single(r as f32),
    }
}

fn clamp_len(n: i32) -> usize {
    n.max(0) as usize
}

/// `VAL`: leading numeric prefix, 0 when none. Accepts `&H`/`&O` prefixes
/// and skips embedded spaces, as QBasic does.
fn val_of(s: &str) -> Value {
    let cleaned: String = s.chars().filter(|c| !matches!(c, ' ' | '\t')).collect();
    let upper = cleaned.to_ascii_uppercase();
    if let Some(hex) = upper.strip_prefix("&H") {
        let digits: String = hex.chars().take_while(|c| c.is_ascii_hexdigit()).collect();
        if let Ok(v) = i64::from_str_radix(&digits, 16) {
            return long_or_double(v);
        }
        return Value::Integer(0);
    }
    if let Some(oct) = upper.strip_prefix("&O") {
        let digits: String = oct.chars().take_while(|c| ('0'..='8').contains(c)).collect();
        if let Ok(v) = i64::from_str_radix(&digits, 8) {
            return long_or_double(v);
        }
        return Value::Integer(0);
    }
    // Longest numeric prefix
    let mut end = 0;
    let bytes = upper.as_bytes();
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        let c = bytes[end] as char;
        let ok = match c {
            '0'..='9' => true,
            '+' | '-' => end == 0 || matches!(bytes[end - 1], b'E' | b'D'),
            '.' if !seen_dot && !seen_exp => {
                seen_dot = true;
                true
            }
            'E' | 'D' if !seen_exp && end > 0 => {
                seen_exp = true;
                true
            }
            _ => false,
        };
        if !ok {
            break;
        }
        end += 1;
    }
    let prefix = upper[..end].trim_end_matches(['E', 'D', '+', '-']);
    if prefix.is_empty() || prefix == "." {
        return Value::Integer(0);
    }
    match prefix.replace('D', "E").parse::<f64>() {
        Ok(v) if v == v.trunc() && !seen_dot && !seen_exp => long_or_double(v as i64),
        Ok(v) => Value::Double(v),
        Err(_) => Value::Integer(0),
    }
}

fn long_or_double(v: i64) -> Value {
    if let Ok(n) = i16::try_from(v) {
        Value::Integer(n)
    } else if let Ok(n) = i32::try_from(v) {
        Value::Long(n)
    } else {
        Value::Double(v as f64)
    }
}

fn instr(args: &[Value]) -> Result<Value> {
    let (start, hay, needle) = match args {
        [hay, needle] => (1usize, hay, needle),
        [start, hay, needle] => {
            let s = start.as_i32()?;
            if s < 1 {
                return Err(RuntimeError::illegal_call("INSTR start must be >= 1"));
            }
            (s as usize, hay, needle)
        }
        _ => return Err(RuntimeError::illegal_call("INSTR takes 2 or 3 arguments")),
    };
    let hay: Vec<char> = hay.as_str()?.chars().collect();
    let needle: Vec<char> = needle.as_str()?.chars().collect();
    if start > hay.len() {
        return Ok(Value::Integer(0));
    }
    if needle.is_empty() {
        return Ok(Value::Integer(start as i16));
    }
    for i in (start - 1)..=hay.len().saturating_sub(needle.len()) {
        if hay[i..i + needle.len()] == needle[..] {
            return Ok(Value::Integer((i + 1) as i16));
        }
    }
    Ok(Value::Integer(0))
}

// --- Microsoft Binary Format codecs ---

fn f32_from_mbf(b: [u8; 4]) -> f32 {
    if b[3] == 0 {
        return 0.0;
    }
    let sign = (b[2] & 0x80) as u32;
    let mantissa = (((b[2] & 0x7F) as u32) << 16) | ((b[1] as u32) << 8) | b[0] as u32;
    let ieee_exp = b[3] as i32 - 2;
    if !(1..=254).contains(&ieee_exp) {
        return 0.0;
    }
    f32::from_bits((sign << 24) | ((ieee_exp as u32) << 23) | mantissa)
}

fn mbf_from_f32(v: f32) -> Result<[u8; 4]> {
    if v == 0.0 {
        return Ok([0; 4]);
    }
    let bits = v.to_bits();
    let ieee_exp = ((bits >> 23) & 0xFF) as i32;
    let mbf_exp = ieee_exp + 2;
    if !(1..=255).contains(&mbf_exp) {
        return Err(RuntimeError::overflow("MKSMBF$ exponent out of range"));
    }
    let mantissa = bits & 0x7F_FFFF;
    let sign = ((bits >> 31) as u8) << 7;
    Ok([
        (mantissa & 0xFF) as u8,
        ((mantissa >> 8) & 0xFF) as u8,
        sign | ((mantissa >> 16) & 0x7F) as u8,
        mbf_exp as u8,
    ])
}

fn f64_from_mbf(b: [u8; 8]) -> f64 {
    if b[7] == 0 {
        return 0.0;
    }
    let sign = ((b[6] & 0x80) as u64) << 56;
    let mut mant55: u64 = (b[6] & 0x7F) as u64;
    for byte in b[..6].iter().rev() {
        mant55 = (mant55 << 8) | *byte as u64;
    }
    let ieee_exp = b[7] as i64 + 894; // 129 bias → 1023 bias, mantissa shift
    if !(1..=2046).contains(&ieee_exp) {
        return 0.0;
    }
    f64::from_bits(sign | ((ieee_exp as u64) << 52) | (mant55 >> 3))
}

fn mbf_from_f64(v: f64) -> Result<[u8; 8]> {
    if v == 0.0 {
        return Ok([0; 8]);
    }
    let bits = v.to_bits();
    let ieee_exp = ((bits >> 52) & 0x7FF) as i64;
    let mbf_exp = ieee_exp - 894;
    if !(1..=255).contains(&mbf_exp) {
        return Err(RuntimeError::overflow("MKDMBF$ exponent out of range"));
    }
    let mant55 = (bits & 0xF_FFFF_FFFF_FFFF) << 3;
    let sign = ((bits >> 63) as u8) << 7;
    let mut out = [0u8; 8];
    for (i, slot) in out[..6].iter_mut().enumerate() {
        *slot = ((mant55 >> (8 * i)) & 0xFF) as u8;
    }
    out[6] = sign | ((mant55 >> 48) & 0x7F) as u8;
    out[7] = mbf_exp as u8;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HeadlessHost;

    fn eval(name: &str, args: &[Value]) -> Result<Value> {
        let mut host = HeadlessHost::default();
        let mut rng = Rng::default();
        let mut ctx = BuiltinCtx {
            host: &mut host,
            rng: &mut rng,
            err: 0,
            erl: 0,
        };
        call(name, args, &mut ctx).expect("not a builtin")
    }

    #[test]
    fn test_val_str_round_trip() {
        for v in [
            Value::Integer(-32768),
            Value::Integer(32767),
            Value::Long(123456),
            Value::Single(0.25),
        ] {
            let s = eval("STR$", &[v.clone()]).unwrap();
            let back = eval("VAL", &[s]).unwrap();
            assert_eq!(back.as_f64().unwrap(), v.as_f64().unwrap(), "{v:?}");
        }
    }

    #[test]
    fn test_val_prefix_and_radix() {
        assert_eq!(eval("VAL", &[Value::Str("12ab".into())]).unwrap(), Value::Integer(12));
        assert_eq!(eval("VAL", &[Value::Str("xyz".into())]).unwrap(), Value::Integer(0));
        assert_eq!(
            eval("VAL", &[Value::Str("&HFF".into())]).unwrap(),
            Value::Integer(255)
        );
        assert_eq!(
            eval("VAL", &[Value::Str(" 1 2 ".into())]).unwrap(),
            Value::Integer(12)
        );
    }

    #[test]
    fn test_asc_chr_round_trip() {
        for b in [0u16, 1, 65, 200, 255] {
            let c = eval("CHR$", &[Value::Integer(b as i16)]).unwrap();
            assert_eq!(
                eval("ASC", &[c]).unwrap(),
                Value::Integer(b as i16),
                "byte {b}"
            );
        }
        assert!(eval("CHR$", &[Value::Integer(-1)]).is_err());
    }

    #[test]
    fn test_cvi_mki_round_trip() {
        for x in [-32768i16, -1, 0, 1, 32767] {
            let s = eval("MKI$", &[Value::Integer(x)]).unwrap();
            assert_eq!(eval("CVI", &[s]).unwrap(), Value::Integer(x));
        }
        let s = eval("MKD$", &[Value::Double(3.14159265358979)]).unwrap();
        assert_eq!(
            eval("CVD", &[s]).unwrap(),
            Value::Double(3.14159265358979)
        );
    }

    #[test]
    fn test_mbf_round_trip() {
        for x in [0.0f32, 1.0, -1.5, 100.25, 0.03125] {
            let s = eval("MKSMBF$", &[Value::Single(x)]).unwrap();
            assert_eq!(eval("CVSMBF", &[s]).unwrap(), Value::Single(x), "{x}");
        }
        for x in [0.0f64, 2.0, -0.75, 12345.6789] {
            let s = eval("MKDMBF$", &[Value::Double(x)]).unwrap();
            assert_eq!(eval("CVDMBF", &[s]).unwrap(), Value::Double(x), "{x}");
        }
    }

    #[test]
    fn test_int_fix_boundaries() {
        assert_eq!(
            eval("INT", &[Value::Single(-0.0001)]).unwrap().as_f64().unwrap(),
            -1.0
        );
        assert_eq!(
            eval("FIX", &[Value::Single(-0.0001)]).unwrap().as_f64().unwrap(),
            0.0
        );
        assert_eq!(eval("CINT", &[Value::Single(2.5)]).unwrap(), Value::Integer(2));
        assert_eq!(eval("CINT", &[Value::Single(3.5)]).unwrap(), Value::Integer(4));
    }

    #[test]
    fn test_string_builders() {
        assert_eq!(
            eval("LEFT$", &[Value::Str("hello".into()), Value::Integer(2)]).unwrap(),
            Value::Str("he".into())
        );
        assert_eq!(
            eval("RIGHT$", &[Value::Str("hello".into()), Value::Integer(2)]).unwrap(),
            Value::Str("lo".into())
        );
        assert_eq!(
            eval(
                "MID$",
                &[Value::Str("hello".into()), Value::Integer(2), Value::Integer(3)]
            )
            .unwrap(),
            Value::Str("ell".into())
        );
        assert_eq!(
            eval("STRING$", &[Value::Integer(3), Value::Str("ab".into())]).unwrap(),
            Value::Str("aaa".into())
        );
        assert_eq!(
            eval("SPACE$", &[Value::Integer(2)]).unwrap(),
            Value::Str("  ".into())
        );
    }

    #[test]
    fn test_ucase_lcase_idempotent() {
        let s = Value::Str("MiXeD 123".into());
        let lower = eval("LCASE$", &[s.clone()]).unwrap();
        let via_lower = eval("UCASE$", &[lower]).unwrap();
        let direct = eval("UCASE$", &[s]).unwrap();
        assert_eq!(via_lower, direct);
    }

    #[test]
    fn test_instr_forms() {
        let hay = Value::Str("abcabc".into());
        assert_eq!(
            instr(&[hay.clone(), Value::Str("c".into())]).unwrap(),
            Value::Integer(3)
        );
        assert_eq!(
            instr(&[Value::Integer(4), hay.clone(), Value::Str("c".into())]).unwrap(),
            Value::Integer(6)
        );
        assert_eq!(
            instr(&[hay, Value::Str("zz".into())]).unwrap(),
            Value::Integer(0)
        );
    }

    #[test]
    fn test_domain_errors() {
        assert!(eval("SQR", &[Value::Single(-1.0)]).is_err());
        assert!(eval("LOG", &[Value::Single(0.0)]).is_err());
        assert!(eval("ASC", &[Value::Str(String::new())]).is_err());
    }

    #[test]
    fn test_hex_oct() {
        assert_eq!(
            eval("HEX$", &[Value::Integer(255)]).unwrap(),
            Value::Str("FF".into())
        );
        assert_eq!(
            eval("OCT$", &[Value::Integer(8)]).unwrap(),
            Value::Str("10".into())
        );
    }
}
