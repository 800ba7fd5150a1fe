//! qb CLI
//!
//! Loads a BASIC source file, indexes it, and runs it against the terminal
//! host. Exit code 0 on a normal end (`END`, `SYSTEM`, falling off the
//! program); 1 on an uncaught runtime error, printed in the classic
//! `<Kind> in line <N>: <detail>` shape.

mod config;
mod terminal;

use std::path::PathBuf;
use std::process;

use clap::Parser;
use qb_runtime::{ExitReason, Interp};
use tracing::info;

use config::Config;
use terminal::TerminalHost;

#[derive(Parser)]
#[command(name = "qb")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "QBasic-compatible interpreter", long_about = None)]
struct Cli {
    /// BASIC source file
    source: PathBuf,

    /// Run the program (the default; kept as an explicit synonym)
    #[arg(long)]
    run: bool,

    /// TOML config with executor/terminal tunables
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the statements-per-frame budget
    #[arg(long, value_name = "N")]
    max_steps: Option<u32>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{e}");
                process::exit(2);
            }
        },
        None => Config::default(),
    };

    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cannot read {}: {e}", cli.source.display());
            process::exit(2);
        }
    };

    let program = match qb_lang::load_program(&source) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };
    info!(
        lines = program.source.lines.len(),
        procedures = program.procedures.len(),
        "program loaded"
    );

    let mut host = TerminalHost::new(&config.terminal);
    let mut interp = Interp::new(program, &mut host);
    interp.statements_per_frame = cli
        .max_steps
        .unwrap_or(config.executor.statements_per_frame);

    let result = interp.run();
    drop(interp);
    drop(host);

    match result {
        Ok(ExitReason::Normal) | Ok(ExitReason::Cancelled) => {}
        Ok(ExitReason::Stopped) => {
            eprintln!("Program stopped.");
        }
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}
