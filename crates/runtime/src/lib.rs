//! qb-runtime: the execution engine of the qb BASIC interpreter
//!
//! Takes the immutable [`qb_lang::Program`] artifact and runs it: typed
//! values with QBasic coercion rules, the frame/scope store, the cached
//! expression evaluator, the statement executor with its block/GOSUB/call
//! stacks, the event-trap layer, and the narrow host-collaborator traits
//! behind which graphics, audio, files, and input live.

pub mod array;
pub mod builtins;
pub mod data;
pub mod eval;
pub mod events;
pub mod exec;
pub mod files;
pub mod host;
pub mod printer;
pub mod rng;
pub mod scope;
pub mod value;

pub use exec::{ExitReason, Interp, Pc, DEFAULT_STATEMENTS_PER_FRAME};
pub use host::{
    Audio, Clock, FileOpenMode, FileSys, HeadlessHost, Host, Input, PutMode, Sprite, Surface,
};
pub use value::Value;

/// Load, index, and run a program against a host. Convenience for the CLI
/// and the integration tests.
pub fn run_source(source: &str, host: &mut dyn Host) -> qb_lang::Result<ExitReason> {
    let program = qb_lang::load_program(source)?;
    Interp::new(program, host).run()
}
