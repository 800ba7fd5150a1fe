//! qb-lang: the structural layer of the qb BASIC interpreter
//!
//! Everything that can be computed from the program text alone lives here:
//! the logical-line source model, the token lexer, the expression and
//! statement parsers, and the one-pass structural indexer that produces the
//! immutable [`Program`] artifact the runtime executes against.

pub mod error;
pub mod expr;
pub mod index;
pub mod source;
pub mod stmt;
pub mod token;
pub mod types;

pub use error::{ErrorKind, Result, RuntimeError};
pub use index::{index_program, ConstDef, Procedure, ProcId, Program};
pub use source::{SourceLine, SourceProgram};
pub use stmt::{parse_line_statement, parse_statement, Stmt};
pub use types::{DefaultTypes, ElemType, RecordId, RecordLayout, RecordTable, ScalarType};

/// Load source text straight through to an indexed [`Program`].
pub fn load_program(text: &str) -> Result<Program> {
    index_program(SourceProgram::parse(text))
}
