//! Runtime error taxonomy
//!
//! Every failure the interpreter can surface is one of twelve kinds, each
//! carrying a QBasic-compatible numeric code so that `ON ERROR` handlers can
//! inspect `ERR` the way existing programs expect. The printed form is the
//! classic one-liner: `Type mismatch in line 120: expected a number`.

use thiserror::Error;

/// Semantic failure kinds. The numeric code travels separately because
/// QBasic distinguishes several codes within one kind (e.g. `BlockMismatch`
/// covers both "NEXT without FOR" = 1 and "RETURN without GOSUB" = 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Syntax,
    TypeMismatch,
    Overflow,
    Subscript,
    DivisionByZero,
    IllegalCall,
    UndefinedName,
    DuplicateDefinition,
    BlockMismatch,
    StackOverflow,
    IoError,
    FeatureUnsupported,
}

impl ErrorKind {
    /// Default QBasic error code for this kind. Constructors may override
    /// where QBasic is more specific.
    pub fn default_code(self) -> u16 {
        match self {
            ErrorKind::Syntax => 2,
            ErrorKind::TypeMismatch => 13,
            ErrorKind::Overflow => 6,
            ErrorKind::Subscript => 9,
            ErrorKind::DivisionByZero => 11,
            ErrorKind::IllegalCall => 5,
            ErrorKind::UndefinedName => 8,
            ErrorKind::DuplicateDefinition => 10,
            ErrorKind::BlockMismatch => 1,
            ErrorKind::StackOverflow => 7,
            ErrorKind::IoError => 57,
            ErrorKind::FeatureUnsupported => 73,
        }
    }

    /// Kind that owns a given QBasic code, for synthetic `ERROR n`.
    pub fn from_code(code: u16) -> ErrorKind {
        match code {
            1 | 3 | 26 | 29 | 30 | 33 | 39 => ErrorKind::BlockMismatch,
            2 => ErrorKind::Syntax,
            4 | 5 | 20 => ErrorKind::IllegalCall,
            6 => ErrorKind::Overflow,
            7 | 14 => ErrorKind::StackOverflow,
            8 | 18 | 35 => ErrorKind::UndefinedName,
            9 => ErrorKind::Subscript,
            10 => ErrorKind::DuplicateDefinition,
            11 => ErrorKind::DivisionByZero,
            13 => ErrorKind::TypeMismatch,
            52..=76 => ErrorKind::IoError,
            73 => ErrorKind::FeatureUnsupported,
            _ => ErrorKind::IllegalCall,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "Syntax error",
            ErrorKind::TypeMismatch => "Type mismatch",
            ErrorKind::Overflow => "Overflow",
            ErrorKind::Subscript => "Subscript out of range",
            ErrorKind::DivisionByZero => "Division by zero",
            ErrorKind::IllegalCall => "Illegal function call",
            ErrorKind::UndefinedName => "Undefined name",
            ErrorKind::DuplicateDefinition => "Duplicate definition",
            ErrorKind::BlockMismatch => "Block mismatch",
            ErrorKind::StackOverflow => "Out of stack space",
            ErrorKind::IoError => "I/O error",
            ErrorKind::FeatureUnsupported => "Advanced feature unavailable",
        }
    }
}

/// A runtime error: kind, QBasic code, the line it arose on, and detail text.
///
/// `line` is the value later reported by `ERL` (the classic line number when
/// the source line carries one, else the 1-based physical index). It is 0
/// while the error is in flight before the executor stamps it.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{} in line {line}: {detail}", kind.describe())]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub code: u16,
    pub line: u32,
    pub detail: String,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        RuntimeError {
            kind,
            code: kind.default_code(),
            line: 0,
            detail: detail.into(),
        }
    }

    /// Override the QBasic code (e.g. 3 for RETURN without GOSUB).
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    /// Stamp the source line once the executor knows it. Does not overwrite
    /// a line already recorded by a nested frame.
    pub fn at_line(mut self, line: u32) -> Self {
        if self.line == 0 {
            self.line = line;
        }
        self
    }

    /// Synthetic error for the `ERROR n` statement.
    pub fn from_code(code: u16) -> Self {
        let kind = ErrorKind::from_code(code);
        RuntimeError {
            kind,
            code,
            line: 0,
            detail: format!("error {code} raised"),
        }
    }

    pub fn syntax(detail: impl Into<String>) -> Self {
        RuntimeError::new(ErrorKind::Syntax, detail)
    }

    pub fn type_mismatch(detail: impl Into<String>) -> Self {
        RuntimeError::new(ErrorKind::TypeMismatch, detail)
    }

    pub fn overflow(detail: impl Into<String>) -> Self {
        RuntimeError::new(ErrorKind::Overflow, detail)
    }

    pub fn subscript(detail: impl Into<String>) -> Self {
        RuntimeError::new(ErrorKind::Subscript, detail)
    }

    pub fn division_by_zero() -> Self {
        RuntimeError::new(ErrorKind::DivisionByZero, "division by zero")
    }

    pub fn illegal_call(detail: impl Into<String>) -> Self {
        RuntimeError::new(ErrorKind::IllegalCall, detail)
    }

    pub fn undefined(detail: impl Into<String>) -> Self {
        RuntimeError::new(ErrorKind::UndefinedName, detail)
    }

    pub fn duplicate(detail: impl Into<String>) -> Self {
        RuntimeError::new(ErrorKind::DuplicateDefinition, detail)
    }

    pub fn block_mismatch(detail: impl Into<String>) -> Self {
        RuntimeError::new(ErrorKind::BlockMismatch, detail)
    }

    pub fn io(detail: impl Into<String>) -> Self {
        RuntimeError::new(ErrorKind::IoError, detail)
    }

    pub fn unsupported(detail: impl Into<String>) -> Self {
        RuntimeError::new(ErrorKind::FeatureUnsupported, detail)
    }

    pub fn out_of_data() -> Self {
        RuntimeError::new(ErrorKind::IllegalCall, "out of DATA").with_code(4)
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_shape() {
        let err = RuntimeError::type_mismatch("expected a number").at_line(120);
        assert_eq!(err.to_string(), "Type mismatch in line 120: expected a number");
    }

    #[test]
    fn test_default_codes() {
        assert_eq!(RuntimeError::division_by_zero().code, 11);
        assert_eq!(RuntimeError::syntax("x").code, 2);
        assert_eq!(RuntimeError::out_of_data().code, 4);
        assert_eq!(RuntimeError::unsupported("x").code, 73);
    }

    #[test]
    fn test_from_code_round_trip() {
        let err = RuntimeError::from_code(11);
        assert_eq!(err.kind, ErrorKind::DivisionByZero);
        assert_eq!(err.code, 11);
        let err = RuntimeError::from_code(53);
        assert_eq!(err.kind, ErrorKind::IoError);
    }

    #[test]
    fn test_at_line_keeps_first() {
        let err = RuntimeError::syntax("x").at_line(10).at_line(99);
        assert_eq!(err.line, 10);
    }
}
