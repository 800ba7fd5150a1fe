//! The typed value model
//!
//! A tagged union over the five scalar kinds plus user-defined records.
//! BASIC strings are byte strings; each byte is held as one Unicode scalar
//! in `0..=255`, which keeps `CHR$`/`ASC` and the `MK…$`/`CV…` codecs exact
//! while still printing as text.
//!
//! Numeric rules: arithmetic promotes to the widest operand
//! (`Integer < Long < Single < Double`), `/` always yields a float, `\` and
//! `MOD` coerce to Long first, and narrowing assignment truncates toward
//! zero, raising `Overflow` when the result does not fit.

use qb_lang::error::{Result, RuntimeError};
use qb_lang::types::{ElemType, RecordId, RecordTable, ScalarType};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i16),
    Long(i32),
    Single(f32),
    Double(f64),
    Str(String),
    Record(RecordId, Vec<Value>),
}

impl Value {
    pub fn zero(ty: ScalarType) -> Value {
        match ty {
            ScalarType::Integer => Value::Integer(0),
            ScalarType::Long => Value::Long(0),
            ScalarType::Single => Value::Single(0.0),
            ScalarType::Double => Value::Double(0.0),
            ScalarType::String => Value::Str(String::new()),
        }
    }

    /// Zero value for an element type, expanding record layouts recursively.
    pub fn zero_of(elem: ElemType, records: &RecordTable) -> Value {
        match elem {
            ElemType::Scalar(ty) => Value::zero(ty),
            ElemType::FixedStr(n) => Value::Str(" ".repeat(n as usize)),
            ElemType::Record(id) => {
                let fields = records
                    .layout(id)
                    .fields
                    .iter()
                    .map(|(_, fty)| Value::zero_of(*fty, records))
                    .collect();
                Value::Record(id, fields)
            }
        }
    }

    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            Value::Integer(_) => Some(ScalarType::Integer),
            Value::Long(_) => Some(ScalarType::Long),
            Value::Single(_) => Some(ScalarType::Single),
            Value::Double(_) => Some(ScalarType::Double),
            Value::Str(_) => Some(ScalarType::String),
            Value::Record(..) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Integer(_) | Value::Long(_) | Value::Single(_) | Value::Double(_)
        )
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Integer(n) => Ok(*n as f64),
            Value::Long(n) => Ok(*n as f64),
            Value::Single(f) => Ok(*f as f64),
            Value::Double(f) => Ok(*f),
            Value::Str(_) | Value::Record(..) => {
                Err(RuntimeError::type_mismatch("expected a number"))
            }
        }
    }

    /// Round to the nearest Long, for arguments that QBasic takes as
    /// integers (array subscripts, file handles, coordinates).
    pub fn as_i32(&self) -> Result<i32> {
        let v = self.as_f64()?;
        let r = round_half_even(v);
        if (i32::MIN as f64..=i32::MAX as f64).contains(&r) {
            Ok(r as i32)
        } else {
            Err(RuntimeError::overflow(format!("{v} does not fit a LONG")))
        }
    }

    pub fn as_i16(&self) -> Result<i16> {
        let v = self.as_i32()?;
        i16::try_from(v).map_err(|_| RuntimeError::overflow(format!("{v} does not fit an INTEGER")))
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) => Ok(s),
            _ => Err(RuntimeError::type_mismatch("expected a string")),
        }
    }

    pub fn into_string(self) -> Result<String> {
        match self {
            Value::Str(s) => Ok(s),
            _ => Err(RuntimeError::type_mismatch("expected a string")),
        }
    }

    /// BASIC truth: any non-zero numeric.
    pub fn is_true(&self) -> Result<bool> {
        Ok(self.as_f64()? != 0.0)
    }

    /// Coerce for assignment into a cell of the given scalar type.
    /// Narrowing truncates toward zero and checks the target range.
    pub fn coerce_to(&self, ty: ScalarType) -> Result<Value> {
        match ty {
            ScalarType::String => Ok(Value::Str(self.as_str()?.to_string())),
            ScalarType::Integer => {
                let t = self.as_f64()?.trunc();
                if (i16::MIN as f64..=i16::MAX as f64).contains(&t) {
                    Ok(Value::Integer(t as i16))
                } else {
                    Err(RuntimeError::overflow(format!("{t} does not fit an INTEGER")))
                }
            }
            ScalarType::Long => {
                let t = self.as_f64()?.trunc();
                if (i32::MIN as f64..=i32::MAX as f64).contains(&t) {
                    Ok(Value::Long(t as i32))
                } else {
                    Err(RuntimeError::overflow(format!("{t} does not fit a LONG")))
                }
            }
            ScalarType::Single => {
                let v = self.as_f64()?;
                let s = v as f32;
                if s.is_finite() || v == 0.0 {
                    Ok(Value::Single(s))
                } else {
                    Err(RuntimeError::overflow(format!("{v} does not fit a SINGLE")))
                }
            }
            ScalarType::Double => Ok(Value::Double(self.as_f64()?)),
        }
    }

    /// Coerce for assignment into a cell currently holding `target`'s type.
    pub fn coerce_like(&self, target: &Value, records: &RecordTable) -> Result<Value> {
        match target {
            Value::Record(id, _) => match self {
                Value::Record(sid, _) if sid == id => Ok(self.clone()),
                _ => Err(RuntimeError::type_mismatch(format!(
                    "expected a {} record",
                    records.layout(*id).name
                ))),
            },
            _ => self.coerce_to(target.scalar_type().unwrap()),
        }
    }
}

/// QBasic's display form, minus the PRINT sign slot: integers plain,
/// floats with the leading zero dropped (`.5`, `-.5`).
pub fn number_text(v: &Value) -> String {
    match v {
        Value::Integer(n) => n.to_string(),
        Value::Long(n) => n.to_string(),
        Value::Single(f) => float_text(*f as f64, 7),
        Value::Double(f) => float_text(*f, 15),
        _ => String::new(),
    }
}

fn float_text(v: f64, sig: usize) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        return format!("{}", v as i64);
    }
    let abs = v.abs();
    let text = if abs != 0.0 && !(1e-4..1e15).contains(&abs) {
        let formatted = format!("{:E}", v);
        // Rust prints `2.5E20`; QBasic prints `2.5E+20`
        match formatted.split_once('E') {
            Some((m, e)) if !e.starts_with('-') => format!("{m}E+{e}"),
            _ => formatted,
        }
    } else {
        let rounded = format!("{:.*}", sig, v);
        let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
        trimmed.to_string()
    };
    // QBasic drops the zero before the decimal point
    if let Some(stripped) = text.strip_prefix("0.") {
        format!(".{stripped}")
    } else if let Some(stripped) = text.strip_prefix("-0.") {
        format!("-.{stripped}")
    } else {
        text
    }
}

/// Round-half-even, the rounding QBasic uses for CINT/CLNG and
/// integer-argument conversion.
pub fn round_half_even(v: f64) -> f64 {
    let floor = v.floor();
    let frac = v - floor;
    if frac > 0.5 {
        floor + 1.0
    } else if frac < 0.5 {
        floor
    } else if (floor as i64) % 2 == 0 {
        floor
    } else {
        floor + 1.0
    }
}

fn widest(a: &Value, b: &Value) -> ScalarType {
    use ScalarType::*;
    let rank = |v: &Value| match v {
        Value::Integer(_) => 0,
        Value::Long(_) => 1,
        Value::Single(_) => 2,
        _ => 3,
    };
    match rank(a).max(rank(b)) {
        0 => Integer,
        1 => Long,
        2 => Single,
        _ => Double,
    }
}

/// `+` on strings concatenates, on numerics adds in the widest type.
pub fn add(a: &Value, b: &Value) -> Result<Value> {
    if let (Value::Str(x), Value::Str(y)) = (a, b) {
        let mut s = x.clone();
        s.push_str(y);
        return Ok(Value::Str(s));
    }
    arith(a, b, i16::checked_add, i32::checked_add, |x, y| x + y)
}

pub fn sub(a: &Value, b: &Value) -> Result<Value> {
    arith(a, b, i16::checked_sub, i32::checked_sub, |x, y| x - y)
}

pub fn mul(a: &Value, b: &Value) -> Result<Value> {
    arith(a, b, i16::checked_mul, i32::checked_mul, |x, y| x * y)
}

fn arith(
    a: &Value,
    b: &Value,
    int_op: fn(i16, i16) -> Option<i16>,
    long_op: fn(i32, i32) -> Option<i32>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    match widest(a, b) {
        ScalarType::Integer => {
            let (x, y) = (int_of(a)?, int_of(b)?);
            match int_op(x as i16, y as i16) {
                Some(r) => Ok(Value::Integer(r)),
                None => Err(RuntimeError::overflow("INTEGER arithmetic overflow")),
            }
        }
        ScalarType::Long => {
            let (x, y) = (int_of(a)?, int_of(b)?);
            match long_op(x, y) {
                Some(r) => Ok(Value::Long(r)),
                None => Err(RuntimeError::overflow("LONG arithmetic overflow")),
            }
        }
        ScalarType::Single => {
            let r = float_op(a.as_f64()?, b.as_f64()?);
            Ok(Value::Single(r as f32))
        }
        _ => Ok(Value::Double(float_op(a.as_f64()?, b.as_f64()?))),
    }
}

fn int_of(v: &Value) -> Result<i32> {
    match v {
        Value::Integer(n) => Ok(*n as i32),
        Value::Long(n) => Ok(*n),
        _ => v.as_i32(),
    }
}

/// `/` always yields a float: Single unless either operand is Double.
pub fn div(a: &Value, b: &Value) -> Result<Value> {
    let y = b.as_f64()?;
    if y == 0.0 {
        return Err(RuntimeError::division_by_zero());
    }
    let r = a.as_f64()? / y;
    if matches!(a, Value::Double(_)) || matches!(b, Value::Double(_)) {
        Ok(Value::Double(r))
    } else {
        Ok(Value::Single(r as f32))
    }
}

/// `\`: both operands coerce to Long, quotient truncates toward zero.
pub fn int_div(a: &Value, b: &Value) -> Result<Value> {
    let y = b.as_i32()?;
    if y == 0 {
        return Err(RuntimeError::division_by_zero());
    }
    let x = a.as_i32()?;
    Ok(narrow_long(x.wrapping_div(y)))
}

/// `MOD`: Long remainder with the dividend's sign.
pub fn modulo(a: &Value, b: &Value) -> Result<Value> {
    let y = b.as_i32()?;
    if y == 0 {
        return Err(RuntimeError::division_by_zero());
    }
    let x = a.as_i32()?;
    Ok(narrow_long(x.wrapping_rem(y)))
}

fn narrow_long(v: i32) -> Value {
    match i16::try_from(v) {
        Ok(n) => Value::Integer(n),
        Err(_) => Value::Long(v),
    }
}

pub fn pow(a: &Value, b: &Value) -> Result<Value> {
    let base = a.as_f64()?;
    let exp = b.as_f64()?;
    if base == 0.0 && exp < 0.0 {
        return Err(RuntimeError::division_by_zero());
    }
    let r = base.powf(exp);
    if !r.is_finite() {
        return Err(RuntimeError::overflow("exponentiation overflow"));
    }
    if matches!(a, Value::Double(_)) || matches!(b, Value::Double(_)) {
        Ok(Value::Double(r))
    } else {
        Ok(Value::Single(r as f32))
    }
}

pub fn neg(v: &Value) -> Result<Value> {
    match v {
        Value::Integer(n) => n
            .checked_neg()
            .map(Value::Integer)
            .ok_or_else(|| RuntimeError::overflow("INTEGER negation overflow")),
        Value::Long(n) => n
            .checked_neg()
            .map(Value::Long)
            .ok_or_else(|| RuntimeError::overflow("LONG negation overflow")),
        Value::Single(f) => Ok(Value::Single(-f)),
        Value::Double(f) => Ok(Value::Double(-f)),
        _ => Err(RuntimeError::type_mismatch("cannot negate a string")),
    }
}

/// Relational result: Integer -1 for true, 0 for false.
pub fn compare(op: qb_lang::expr::BinOp, a: &Value, b: &Value) -> Result<Value> {
    use qb_lang::expr::BinOp;
    use std::cmp::Ordering;
    let ord = match (a, b) {
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        (Value::Str(_), _) | (_, Value::Str(_)) => {
            return Err(RuntimeError::type_mismatch(
                "cannot compare string and number",
            ));
        }
        _ => a
            .as_f64()?
            .partial_cmp(&b.as_f64()?)
            .unwrap_or(Ordering::Equal),
    };
    let truth = match op {
        BinOp::Eq => ord == Ordering::Equal,
        BinOp::Ne => ord != Ordering::Equal,
        BinOp::Lt => ord == Ordering::Less,
        BinOp::Le => ord != Ordering::Greater,
        BinOp::Gt => ord == Ordering::Greater,
        BinOp::Ge => ord != Ordering::Less,
        _ => unreachable!("compare called with non-relational operator"),
    };
    Ok(Value::Integer(if truth { -1 } else { 0 }))
}

/// Bitwise logical operators over Long, narrowing back to Integer when both
/// operands were Integer.
pub fn logical(op: qb_lang::expr::BinOp, a: &Value, b: &Value) -> Result<Value> {
    use qb_lang::expr::BinOp;
    let x = a.as_i32()?;
    let y = b.as_i32()?;
    let r = match op {
        BinOp::And => x & y,
        BinOp::Or => x | y,
        BinOp::Xor => x ^ y,
        BinOp::Eqv => !(x ^ y),
        BinOp::Imp => !x | y,
        _ => unreachable!("logical called with non-logical operator"),
    };
    if matches!(a, Value::Integer(_)) && matches!(b, Value::Integer(_)) {
        Ok(Value::Integer(r as i16))
    } else {
        Ok(narrow_long(r))
    }
}

/// `NOT` is bitwise complement over Long.
pub fn bit_not(v: &Value) -> Result<Value> {
    let x = v.as_i32()?;
    if matches!(v, Value::Integer(_)) {
        Ok(Value::Integer(!x as i16))
    } else {
        Ok(narrow_long(!x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qb_lang::expr::BinOp;

    #[test]
    fn test_promotion_ladder() {
        assert_eq!(
            add(&Value::Integer(1), &Value::Integer(2)).unwrap(),
            Value::Integer(3)
        );
        assert_eq!(
            add(&Value::Integer(1), &Value::Long(2)).unwrap(),
            Value::Long(3)
        );
        assert!(matches!(
            add(&Value::Long(1), &Value::Single(2.0)).unwrap(),
            Value::Single(_)
        ));
        assert!(matches!(
            add(&Value::Single(1.0), &Value::Double(2.0)).unwrap(),
            Value::Double(_)
        ));
    }

    #[test]
    fn test_integer_overflow_raises() {
        assert!(add(&Value::Integer(i16::MAX), &Value::Integer(1)).is_err());
        assert!(mul(&Value::Long(i32::MAX), &Value::Long(2)).is_err());
    }

    #[test]
    fn test_division_always_float() {
        assert_eq!(
            div(&Value::Integer(7), &Value::Integer(2)).unwrap(),
            Value::Single(3.5)
        );
        assert!(div(&Value::Integer(1), &Value::Integer(0)).is_err());
    }

    #[test]
    fn test_intdiv_and_mod_coerce_long() {
        assert_eq!(
            int_div(&Value::Single(7.9), &Value::Integer(2)).unwrap(),
            Value::Integer(4)
        );
        assert_eq!(
            modulo(&Value::Integer(-7), &Value::Integer(3)).unwrap(),
            Value::Integer(-1)
        );
        assert!(int_div(&Value::Integer(1), &Value::Integer(0)).is_err());
    }

    #[test]
    fn test_string_concat_and_compare() {
        assert_eq!(
            add(&Value::Str("ab".into()), &Value::Str("cd".into())).unwrap(),
            Value::Str("abcd".into())
        );
        assert_eq!(
            compare(BinOp::Lt, &Value::Str("abc".into()), &Value::Str("abd".into())).unwrap(),
            Value::Integer(-1)
        );
        assert!(add(&Value::Str("a".into()), &Value::Integer(1)).is_err());
    }

    #[test]
    fn test_narrowing_truncates_toward_zero() {
        assert_eq!(
            Value::Single(2.9).coerce_to(ScalarType::Integer).unwrap(),
            Value::Integer(2)
        );
        assert_eq!(
            Value::Single(-2.9).coerce_to(ScalarType::Integer).unwrap(),
            Value::Integer(-2)
        );
        assert!(Value::Single(40000.0).coerce_to(ScalarType::Integer).is_err());
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(2.5), 2.0);
        assert_eq!(round_half_even(3.5), 4.0);
        assert_eq!(round_half_even(-2.5), -2.0);
        assert_eq!(round_half_even(2.4), 2.0);
        assert_eq!(round_half_even(2.6), 3.0);
    }

    #[test]
    fn test_logical_bitwise() {
        assert_eq!(
            logical(BinOp::And, &Value::Integer(6), &Value::Integer(3)).unwrap(),
            Value::Integer(2)
        );
        assert_eq!(bit_not(&Value::Integer(0)).unwrap(), Value::Integer(-1));
        assert_eq!(
            logical(BinOp::Eqv, &Value::Integer(-1), &Value::Integer(-1)).unwrap(),
            Value::Integer(-1)
        );
    }

    #[test]
    fn test_number_text_drops_leading_zero() {
        assert_eq!(number_text(&Value::Single(0.5)), ".5");
        assert_eq!(number_text(&Value::Single(-0.5)), "-.5");
        assert_eq!(number_text(&Value::Integer(42)), "42");
        assert_eq!(number_text(&Value::Double(3.0)), "3");
    }

    #[test]
    fn test_record_zero_expansion() {
        let mut records = RecordTable::default();
        let id = records
            .define(qb_lang::types::RecordLayout {
                name: "P".into(),
                fields: vec![
                    ("X".into(), ElemType::Scalar(ScalarType::Integer)),
                    ("TAG".into(), ElemType::FixedStr(3)),
                ],
            })
            .unwrap();
        match Value::zero_of(ElemType::Record(id), &records) {
            Value::Record(rid, fields) => {
                assert_eq!(rid, id);
                assert_eq!(fields[0], Value::Integer(0));
                assert_eq!(fields[1], Value::Str("   ".into()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
