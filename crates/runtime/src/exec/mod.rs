//! The statement executor
//!
//! Drives a program counter over the pre-split source, dispatching each
//! classified statement. Owns the block stack, the GOSUB return stack, the
//! call stack, the error/trap state, and the statement/jump caches.
//!
//! Layout: this module holds the machine itself plus structured control
//! flow; `decl` has procedures and declarations, `io` the console and file
//! statements, `gfx` graphics and sound. Expression evaluation is in
//! [`crate::eval`].

pub(crate) mod decl;
mod gfx;
mod io;

use std::collections::HashMap;
use std::rc::Rc;

use qb_lang::error::{ErrorKind, Result, RuntimeError};
use qb_lang::index::ProcId;
use qb_lang::stmt::{parse_line_statement, ResumeMode, Stmt, Target};
use qb_lang::Program;
use tracing::debug;

use crate::data::DataCursor;
use crate::events::{EventTraps, TrapId};
use crate::host::Host;
use crate::rng::Rng;
use crate::scope::{Cell, VarStore};
use crate::value::Value;

/// Program counter: line index plus colon-segment index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pc {
    pub line: usize,
    pub seg: usize,
}

impl Pc {
    pub fn start() -> Pc {
        Pc { line: 0, seg: 0 }
    }
}

/// One structured block in flight.
#[derive(Debug)]
pub(crate) enum BlockFrame {
    For {
        var: String,
        limit: Value,
        step: Value,
        /// First statement of the body.
        top: Pc,
    },
    Do {
        /// The DO statement itself, so pre-conditions re-evaluate.
        top: Pc,
    },
    While {
        top: Pc,
    },
    Select {
        selector: Value,
        arm_taken: bool,
    },
    If,
}

/// GOSUB return entry; trap-handler returns also unmask their trap.
#[derive(Debug)]
struct GosubEntry {
    return_pc: Pc,
    trap: Option<TrapId>,
}

/// Procedure activation.
#[derive(Debug)]
pub(crate) struct CallFrame {
    pub proc: ProcId,
    return_pc: Pc,
    block_base: usize,
    gosub_base: usize,
    /// FUNCTION result cell; assignment to the function name lands here.
    pub result: Option<Cell>,
    /// Copy-out actions for element/field by-reference arguments.
    pub copy_out: Vec<decl::CopyOut>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// END or SYSTEM, or fell off the end of the program.
    Normal,
    /// STOP statement.
    Stopped,
    /// Host asked for termination.
    Cancelled,
}

enum Flow {
    Next,
    Jump(Pc),
    End(ExitReason),
}

#[derive(Debug, Clone)]
struct CachedStmt {
    stmt: Rc<Stmt>,
    consumes_line: bool,
}

/// What a forward scan is looking for; part of the jump-memo key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ScanKind {
    ElseBranch,
    EndIf,
    PastLoop,
    PastWend,
    NextCase,
    EndSelect,
    PastNext,
    PastEndType,
}

/// Where an error was raised, for RESUME.
#[derive(Debug, Clone, Copy)]
struct ErrorSite {
    pc: Pc,
}

pub struct Interp<'h> {
    pub program: Rc<Program>,
    pub host: &'h mut dyn Host,
    pub store: VarStore,
    pub data: DataCursor,
    pub rng: Rng,
    pub traps: EventTraps,

    pc: Pc,
    pub(crate) block_stack: Vec<BlockFrame>,
    gosub_stack: Vec<GosubEntry>,
    pub(crate) call_stack: Vec<CallFrame>,
    pub(crate) def_fns: HashMap<String, Rc<decl::DefFn>>,

    // Error trap state
    err_code: u16,
    erl: u32,
    error_handler: Option<usize>,
    in_error_handler: bool,
    error_site: Option<ErrorSite>,

    // Function return plumbing
    pub(crate) last_function_result: Option<Value>,
    /// END reached inside a nested FUNCTION call; the program finishes
    /// once the current statement completes.
    pub(crate) pending_exit: Option<ExitReason>,

    // Caches
    stmt_cache: HashMap<(usize, usize), CachedStmt>,
    jump_cache: HashMap<(usize, usize, ScanKind), Pc>,
    pub(crate) resolve_cache: HashMap<(Option<ProcId>, String), crate::eval::NameKind>,
    pub(crate) resolve_fingerprint: u64,

    /// Column tracking for PRINT zones on open files.
    pub(crate) file_cols: HashMap<u16, u16>,

    /// Statements per host frame before yielding (§5 budget).
    pub statements_per_frame: u32,
    steps_since_yield: u32,
    max_depth: usize,
}

pub const DEFAULT_STATEMENTS_PER_FRAME: u32 = 2000;
pub const CALL_DEPTH_LIMIT: usize = 256;
pub const GOSUB_DEPTH_LIMIT: usize = 4096;

/// Internal marker code: END reached inside an expression-level FUNCTION
/// call. Never user-visible and never trappable.
pub(crate) const EXIT_ERROR_CODE: u16 = u16::MAX;

impl<'h> Interp<'h> {
    pub fn new(program: Program, host: &'h mut dyn Host) -> Interp<'h> {
        Interp {
            program: Rc::new(program),
            host,
            store: VarStore::default(),
            data: DataCursor::default(),
            rng: Rng::default(),
            traps: EventTraps::default(),
            pc: Pc::start(),
            block_stack: Vec::new(),
            gosub_stack: Vec::new(),
            call_stack: Vec::new(),
            def_fns: HashMap::new(),
            err_code: 0,
            erl: 0,
            error_handler: None,
            in_error_handler: false,
            error_site: None,
            last_function_result: None,
            pending_exit: None,
            stmt_cache: HashMap::new(),
            jump_cache: HashMap::new(),
            resolve_cache: HashMap::new(),
            resolve_fingerprint: 0,
            file_cols: HashMap::new(),
            statements_per_frame: DEFAULT_STATEMENTS_PER_FRAME,
            steps_since_yield: 0,
            max_depth: CALL_DEPTH_LIMIT,
        }
    }

    pub(crate) fn current_proc(&self) -> Option<ProcId> {
        self.call_stack.last().map(|f| f.proc)
    }

    pub(crate) fn err_erl(&self) -> (u16, u32) {
        (self.err_code, self.erl)
    }

    /// Fold CONST bindings, then run to completion.
    pub fn run(&mut self) -> Result<ExitReason> {
        self.fold_consts()?;
        self.skip_owned_lines();
        loop {
            if self.host.cancelled() {
                return Ok(ExitReason::Cancelled);
            }
            match self.step() {
                Ok(Some(reason)) => return Ok(reason),
                Ok(None) => {}
                Err(err) => {
                    if err.code == EXIT_ERROR_CODE {
                        return Ok(self.pending_exit.take().unwrap_or(ExitReason::Normal));
                    }
                    if self.trap_error(&err)?.is_some() {
                        continue;
                    }
                    return Err(err);
                }
            }
            self.steps_since_yield += 1;
            if self.steps_since_yield >= self.statements_per_frame {
                self.steps_since_yield = 0;
                self.host.yield_frame();
            }
            if let Some((id, line)) = self.traps.poll(self.host) {
                self.synthetic_gosub(id, line)?;
            }
        }
    }

    /// Evaluate CONST definitions in source order (module-wide namespace).
    fn fold_consts(&mut self) -> Result<()> {
        let program = self.program.clone();
        for def in &program.consts {
            let value = self
                .eval_expr(&def.expr)
                .map_err(|e| e.at_line(program.display_line(def.line)))?;
            self.store
                .define_const(&def.name, value)
                .map_err(|e| e.at_line(program.display_line(def.line)))?;
        }
        Ok(())
    }

    /// Execute the statement at the PC. `Ok(Some(reason))` ends the program.
    fn step(&mut self) -> Result<Option<ExitReason>> {
        if self.pc.line >= self.program.source.lines.len() {
            return Ok(Some(ExitReason::Normal));
        }
        let cached = match self.stmt_at(self.pc) {
            Ok(c) => c,
            Err(e) => return Err(self.stamp(e)),
        };
        let flow = match self.dispatch(&cached.stmt) {
            Ok(f) => f,
            Err(e) => return Err(self.stamp(e)),
        };
        if let Some(reason) = self.pending_exit.take() {
            return Ok(Some(reason));
        }
        match flow {
            Flow::Next => {
                if cached.consumes_line {
                    self.next_line();
                } else {
                    self.advance();
                }
                Ok(None)
            }
            Flow::Jump(pc) => {
                self.pc = pc;
                self.skip_owned_lines();
                Ok(None)
            }
            Flow::End(reason) => Ok(Some(reason)),
        }
    }

    fn stamp(&self, e: RuntimeError) -> RuntimeError {
        e.at_line(self.program.display_line(self.pc.line))
    }

    /// Classified statement at a position, memoized per source location.
    fn stmt_at(&mut self, pc: Pc) -> Result<CachedStmt> {
        if let Some(c) = self.stmt_cache.get(&(pc.line, pc.seg)) {
            return Ok(c.clone());
        }
        let line = &self.program.source.lines[pc.line];
        if pc.seg >= line.statements.len() {
            let c = CachedStmt {
                stmt: Rc::new(Stmt::Empty),
                consumes_line: false,
            };
            self.stmt_cache.insert((pc.line, pc.seg), c.clone());
            return Ok(c);
        }
        let (stmt, consumes_line) = parse_line_statement(line, pc.seg)?;
        let c = CachedStmt {
            stmt: Rc::new(stmt),
            consumes_line,
        };
        self.stmt_cache.insert((pc.line, pc.seg), c.clone());
        Ok(c)
    }

    fn advance(&mut self) {
        let segs = self.program.source.lines[self.pc.line].statements.len();
        if self.pc.seg + 1 < segs {
            self.pc.seg += 1;
        } else {
            self.next_line();
        }
    }

    fn next_line(&mut self) {
        self.pc = Pc {
            line: self.pc.line + 1,
            seg: 0,
        };
        self.skip_owned_lines();
    }

    /// In module flow, hop over procedure bodies; inside a procedure, stay
    /// within it (END SUB is executed, never walked past).
    fn skip_owned_lines(&mut self) {
        let current = self.current_proc();
        while let Some(owner) = self
            .program
            .line_owner
            .get(self.pc.line)
            .copied()
            .flatten()
        {
            if Some(owner) == current {
                break;
            }
            let end = self.program.procedure(owner).end_line;
            self.pc = Pc {
                line: end + 1,
                seg: 0,
            };
        }
    }

    // ----- statement dispatch -----

    fn dispatch(&mut self, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Empty | Stmt::Data | Stmt::Declare => Ok(Flow::Next),
            Stmt::Let { target, expr } => {
                let v = self.eval_expr(expr)?;
                self.assign_lvalue(target, v)?;
                Ok(Flow::Next)
            }
            Stmt::Print(p) => self.exec_print(p),
            Stmt::Write { file, items } => self.exec_write(file.as_ref(), items),
            Stmt::Input {
                file,
                prompt,
                question_mark,
                vars,
            } => self.exec_input(file.as_ref(), prompt.as_deref(), *question_mark, vars),
            Stmt::LineInput { file, prompt, var } => {
                self.exec_line_input(file.as_ref(), prompt.as_deref(), var)
            }

            Stmt::IfSingle {
                cond,
                then_branch,
                else_branch,
            } => self.exec_if_single(cond, then_branch, else_branch),
            Stmt::IfBlock { cond } => self.exec_if_block(cond),
            Stmt::ElseIf { .. } | Stmt::Else | Stmt::ElseInline(_) => self.exec_else_reached(),
            Stmt::EndIf => self.exec_end_if(),

            Stmt::For {
                var,
                from,
                to,
                step,
            } => self.exec_for(var, from, to, step.as_ref()),
            Stmt::Next { vars } => self.exec_next(vars),
            Stmt::ExitFor => self.exec_exit_for(),
            Stmt::Do { pre } => self.exec_do(pre.as_ref()),
            Stmt::Loop { post } => self.exec_loop(post.as_ref()),
            Stmt::ExitDo => self.exec_exit_do(),
            Stmt::While { cond } => self.exec_while(cond),
            Stmt::Wend => self.exec_wend(),
            Stmt::SelectCase { selector } => self.exec_select(selector),
            Stmt::Case { arms } => self.exec_case(arms),
            Stmt::CaseElse => self.exec_case_else(),
            Stmt::EndSelect => self.exec_end_select(),

            Stmt::Goto(target) => self.exec_goto(target),
            Stmt::Gosub(target) => self.exec_gosub(target),
            Stmt::OnGoto {
                expr,
                targets,
                gosub,
            } => self.exec_on_goto(expr, targets, *gosub),
            Stmt::Return { target } => self.exec_return(target.as_ref()),

            Stmt::OnErrorGoto { target } => self.exec_on_error(target.as_ref()),
            Stmt::ErrorStmt { code } => {
                let code = self.eval_expr(code)?.as_i32()?;
                if !(1..=255).contains(&code) {
                    return Err(RuntimeError::illegal_call(format!("ERROR {code}")));
                }
                Err(RuntimeError::from_code(code as u16))
            }
            Stmt::Resume { mode } => self.exec_resume(mode),

            Stmt::OnEventGosub { event, target } => self.exec_on_event(event, target),
            Stmt::EventControl { event, action } => self.exec_event_control(event, *action),
            Stmt::KeySet { n, text } => {
                // Soft-key strings have no observable effect here
                self.eval_expr(n)?;
                self.eval_expr(text)?;
                Ok(Flow::Next)
            }

            Stmt::Call { name, args } => self.exec_call(name, args),
            Stmt::ProcStart { .. } => {
                // Reached only by stepping into a header in module flow,
                // which skip_owned_lines prevents; a direct GOTO cannot
                // target it (labels are line-leading).
                Err(RuntimeError::block_mismatch("statement inside a procedure"))
            }
            Stmt::ProcEnd { .. } | Stmt::ExitSub | Stmt::ExitFunction => self.exec_proc_exit(stmt),
            Stmt::DefFn { name, params, body } => self.exec_def_fn(name, params, body),

            Stmt::Dim { shared, decls } => self.exec_dim(*shared, decls, false),
            Stmt::Redim { shared, decls } => self.exec_dim(*shared, decls, true),
            Stmt::Erase { names } => self.exec_erase(names),
            Stmt::Shared { names } => self.exec_shared(names),
            Stmt::Static { decls } => self.exec_static(decls),
            Stmt::Common { shared, names } => self.exec_common(*shared, names),
            Stmt::Const { .. }
            | Stmt::DefType { .. }
            | Stmt::OptionBase(_) => Ok(Flow::Next),
            Stmt::TypeStart { .. } => {
                let target = self.scan_for(ScanKind::PastEndType)?;
                Ok(Flow::Jump(target))
            }
            Stmt::EndType => Ok(Flow::Next),

            Stmt::Read { vars } => self.exec_read(vars),
            Stmt::Restore { target } => {
                let offset = self
                    .program
                    .clone()
                    .data_offset_for(target.as_ref(), self.current_proc())?;
                self.data.restore(offset);
                Ok(Flow::Next)
            }

            Stmt::End | Stmt::System => Ok(Flow::End(ExitReason::Normal)),
            Stmt::Stop => Ok(Flow::End(ExitReason::Stopped)),
            Stmt::Clear => self.exec_clear(),
            Stmt::Run { target } => self.exec_run(target.as_ref()),
            Stmt::Randomize { seed } => {
                let seed = match seed {
                    Some(e) => self.eval_expr(e)?.as_f64()?,
                    None => self.host.clock().timer(),
                };
                self.rng.randomize(seed);
                Ok(Flow::Next)
            }
            Stmt::Sleep { seconds } => self.exec_sleep(seconds.as_ref()),
            Stmt::Swap { a, b } => self.exec_swap(a, b),
            Stmt::MidAssign {
                target,
                start,
                len,
                expr,
            } => self.exec_mid_assign(target, start, len.as_ref(), expr),
            Stmt::LsetRset { left, target, expr } => self.exec_lset(*left, target, expr),

            Stmt::ScreenStmt { .. }
            | Stmt::Cls { .. }
            | Stmt::ColorStmt { .. }
            | Stmt::Locate { .. }
            | Stmt::WidthStmt { .. }
            | Stmt::Pset { .. }
            | Stmt::LineStmt { .. }
            | Stmt::CircleStmt { .. }
            | Stmt::Paint { .. }
            | Stmt::PaletteStmt { .. }
            | Stmt::ViewStmt { .. }
            | Stmt::WindowStmt { .. }
            | Stmt::Pcopy { .. }
            | Stmt::GfxGet { .. }
            | Stmt::GfxPut { .. }
            | Stmt::Beep
            | Stmt::Sound { .. }
            | Stmt::Play { .. } => self.exec_gfx(stmt),

            Stmt::Open { .. }
            | Stmt::OpenShort { .. }
            | Stmt::CloseStmt { .. }
            | Stmt::FileGet { .. }
            | Stmt::FilePut { .. }
            | Stmt::SeekStmt { .. }
            | Stmt::Kill { .. }
            | Stmt::NameAs { .. }
            | Stmt::ChDir { .. }
            | Stmt::MkDir { .. }
            | Stmt::RmDir { .. }
            | Stmt::FilesStmt { .. }
            | Stmt::Bload { .. }
            | Stmt::Bsave { .. } => self.exec_file_stmt(stmt),

            Stmt::Unsupported { keyword } => Err(RuntimeError::unsupported(format!(
                "{keyword} is accepted but not implemented"
            ))),
        }
    }

    // ----- single-line IF -----

    fn exec_if_single(
        &mut self,
        cond: &qb_lang::expr::Expr,
        then_branch: &[Stmt],
        else_branch: &[Stmt],
    ) -> Result<Flow> {
        let branch = if self.eval_expr(cond)?.is_true()? {
            then_branch
        } else {
            else_branch
        };
        self.run_branch(branch)
    }

    /// Run the statement list of a single-line IF branch. GOSUB comes back
    /// to the following statements, and a complete FOR…NEXT inside the
    /// branch loops over list indices; multi-line-only blocks (DO, WHILE,
    /// SELECT) cannot live in a one-liner.
    fn run_branch(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        // Local FOR state: (counter name, limit, step, body index)
        let mut fors: Vec<(String, Value, Value, usize)> = Vec::new();
        let mut i = 0;
        while i < stmts.len() {
            match &stmts[i] {
                Stmt::Gosub(t) => match self.gosub_sync(t)? {
                    Flow::Next => {}
                    other => return Ok(other),
                },
                Stmt::OnGoto {
                    expr,
                    targets,
                    gosub: true,
                } => {
                    let k = self.eval_expr(expr)?.as_i32()?;
                    if k >= 1 && (k as usize) <= targets.len() {
                        match self.gosub_sync(&targets[k as usize - 1])? {
                            Flow::Next => {}
                            other => return Ok(other),
                        }
                    }
                }
                Stmt::For {
                    var,
                    from,
                    to,
                    step,
                } => {
                    let start = self.eval_expr(from)?;
                    let limit = self.eval_expr(to)?;
                    let step = match step {
                        Some(e) => self.eval_expr(e)?,
                        None => Value::Integer(1),
                    };
                    self.assign_lvalue(var, start.clone())?;
                    if for_continues(&start, &limit, &step)? {
                        fors.push((var.name.clone(), limit, step, i + 1));
                    } else {
                        i = branch_past_next(stmts, i)?;
                        continue;
                    }
                }
                Stmt::Next { vars } => {
                    let names: Vec<Option<&String>> = if vars.is_empty() {
                        vec![None]
                    } else {
                        vars.iter().map(Some).collect()
                    };
                    let mut jumped = false;
                    for name in names {
                        let Some((var, limit, step, body)) = fors.last().cloned() else {
                            return Err(RuntimeError::block_mismatch("NEXT without FOR"));
                        };
                        if let Some(n) = name
                            && **n != var
                        {
                            return Err(RuntimeError::block_mismatch(format!(
                                "NEXT {n} does not match FOR {var}"
                            )));
                        }
                        let lv = qb_lang::stmt::LValue {
                            name: var,
                            indices: Vec::new(),
                            fields: Vec::new(),
                        };
                        let bumped =
                            crate::value::add(&self.eval_lvalue(&lv)?, &step)?;
                        self.assign_lvalue(&lv, bumped.clone())?;
                        if for_continues(&bumped, &limit, &step)? {
                            i = body;
                            jumped = true;
                            break;
                        }
                        fors.pop();
                    }
                    if jumped {
                        continue;
                    }
                }
                Stmt::ExitFor => {
                    if fors.pop().is_none() {
                        return Err(RuntimeError::block_mismatch("EXIT FOR outside FOR"));
                    }
                    i = branch_past_next(stmts, i)?;
                    continue;
                }
                Stmt::Do { .. }
                | Stmt::Loop { .. }
                | Stmt::While { .. }
                | Stmt::Wend
                | Stmt::SelectCase { .. } => {
                    return Err(RuntimeError::syntax(
                        "block statement needs its own line",
                    ));
                }
                other => match self.dispatch(other)? {
                    Flow::Next => {}
                    flow => return Ok(flow),
                },
            }
            i += 1;
        }
        Ok(Flow::Next)
    }

    /// Run a GOSUB to completion and come back, for branch-embedded GOSUBs.
    /// A `RETURN label` escapes the branch entirely.
    fn gosub_sync(&mut self, target: &Target) -> Result<Flow> {
        let line = self
            .program
            .clone()
            .resolve_target(target, self.current_proc(), true)?;
        let depth = self.gosub_stack.len();
        let saved_pc = self.pc;
        if self.gosub_stack.len() >= GOSUB_DEPTH_LIMIT {
            return Err(RuntimeError::new(
                ErrorKind::StackOverflow,
                "GOSUB nesting too deep",
            ));
        }
        self.gosub_stack.push(GosubEntry {
            return_pc: decl::SENTINEL,
            trap: None,
        });
        self.pc = Pc { line, seg: 0 };
        self.skip_owned_lines();
        loop {
            if self.gosub_stack.len() <= depth {
                break;
            }
            if self.host.cancelled() {
                return Ok(Flow::End(ExitReason::Cancelled));
            }
            match self.step()? {
                None => {}
                Some(reason) => return Ok(Flow::End(reason)),
            }
        }
        if self.pc == decl::SENTINEL {
            // Plain RETURN: continue with the rest of the branch
            self.pc = saved_pc;
            Ok(Flow::Next)
        } else {
            // RETURN label jumped somewhere real
            Ok(Flow::Jump(self.pc))
        }
    }

    // ----- multi-line IF -----

    fn exec_if_block(&mut self, cond: &qb_lang::expr::Expr) -> Result<Flow> {
        if self.eval_expr(cond)?.is_true()? {
            self.block_stack.push(BlockFrame::If);
            return Ok(Flow::Next);
        }
        // Walk ELSEIF arms until one passes
        let mut from = self.pc;
        loop {
            let target = self.scan_from(from, ScanKind::ElseBranch)?;
            let stmt = self.stmt_at(target)?.stmt;
            match &*stmt {
                Stmt::ElseIf { cond } => {
                    if self.eval_expr(&cond.clone())?.is_true()? {
                        self.block_stack.push(BlockFrame::If);
                        return Ok(Flow::Jump(self.after(target)));
                    }
                    from = target;
                }
                Stmt::Else => {
                    self.block_stack.push(BlockFrame::If);
                    return Ok(Flow::Jump(self.after(target)));
                }
                Stmt::ElseInline(stmts) => {
                    self.block_stack.push(BlockFrame::If);
                    let stmts = stmts.clone();
                    return match self.run_branch(&stmts)? {
                        Flow::Next => Ok(Flow::Jump(self.after(target))),
                        other => Ok(other),
                    };
                }
                Stmt::EndIf => return Ok(Flow::Jump(self.after(target))),
                _ => return Err(RuntimeError::block_mismatch("IF block has no END IF")),
            }
        }
    }

    /// Reached ELSEIF/ELSE after executing a taken branch.
    fn exec_else_reached(&mut self) -> Result<Flow> {
        match self.block_stack.last() {
            Some(BlockFrame::If) => {
                self.block_stack.pop();
                let end = self.scan_for(ScanKind::EndIf)?;
                Ok(Flow::Jump(self.after(end)))
            }
            _ => Err(RuntimeError::block_mismatch("ELSE without IF")),
        }
    }

    fn exec_end_if(&mut self) -> Result<Flow> {
        match self.block_stack.last() {
            Some(BlockFrame::If) => {
                self.block_stack.pop();
                Ok(Flow::Next)
            }
            _ => Err(RuntimeError::block_mismatch("END IF without IF")),
        }
    }

    // ----- FOR / NEXT -----

    fn exec_for(
        &mut self,
        var: &qb_lang::stmt::LValue,
        from: &qb_lang::expr::Expr,
        to: &qb_lang::expr::Expr,
        step: Option<&qb_lang::expr::Expr>,
    ) -> Result<Flow> {
        let start = self.eval_expr(from)?;
        let limit = self.eval_expr(to)?;
        let step = match step {
            Some(e) => self.eval_expr(e)?,
            None => Value::Integer(1),
        };
        self.assign_lvalue(var, start.clone())?;

        if !for_continues(&start, &limit, &step)? {
            // Zero-trip: jump past the matching NEXT
            let target = self.scan_for(ScanKind::PastNext)?;
            return Ok(Flow::Jump(target));
        }
        let top = self.pc_after_current();
        self.block_stack.push(BlockFrame::For {
            var: var.name.clone(),
            limit,
            step,
            top,
        });
        Ok(Flow::Next)
    }

    fn exec_next(&mut self, vars: &[String]) -> Result<Flow> {
        let names: Vec<Option<&String>> = if vars.is_empty() {
            vec![None]
        } else {
            vars.iter().map(Some).collect()
        };
        for name in names {
            let (var, limit, step, top) = match self.block_stack.last() {
                Some(BlockFrame::For {
                    var,
                    limit,
                    step,
                    top,
                }) => (var.clone(), limit.clone(), step.clone(), *top),
                _ => return Err(RuntimeError::block_mismatch("NEXT without FOR")),
            };
            if let Some(n) = name
                && **n != var
            {
                return Err(RuntimeError::block_mismatch(format!(
                    "NEXT {n} does not match FOR {var}"
                )));
            }
            // Counter re-reads the cell: body writes feed the increment
            let lv = qb_lang::stmt::LValue {
                name: var.clone(),
                indices: Vec::new(),
                fields: Vec::new(),
            };
            let current = self.eval_lvalue(&lv)?;
            let bumped = crate::value::add(&current, &step)?;
            self.assign_lvalue(&lv, bumped.clone())?;
            if for_continues(&bumped, &limit, &step)? {
                return Ok(Flow::Jump(top));
            }
            self.block_stack.pop();
        }
        Ok(Flow::Next)
    }

    fn exec_exit_for(&mut self) -> Result<Flow> {
        loop {
            match self.block_stack.pop() {
                Some(BlockFrame::For { .. }) => break,
                Some(_) => {}
                None => return Err(RuntimeError::block_mismatch("EXIT FOR outside FOR")),
            }
        }
        let target = self.scan_for(ScanKind::PastNext)?;
        Ok(Flow::Jump(target))
    }

    // ----- DO / LOOP / WHILE / WEND -----

    fn exec_do(&mut self, pre: Option<&(bool, qb_lang::expr::Expr)>) -> Result<Flow> {
        if let Some((until, cond)) = pre {
            let truth = self.eval_expr(cond)?.is_true()?;
            let pass = if *until { !truth } else { truth };
            if !pass {
                let target = self.scan_for(ScanKind::PastLoop)?;
                return Ok(Flow::Jump(target));
            }
        }
        self.block_stack.push(BlockFrame::Do { top: self.pc });
        Ok(Flow::Next)
    }

    fn exec_loop(&mut self, post: Option<&(bool, qb_lang::expr::Expr)>) -> Result<Flow> {
        let top = match self.block_stack.last() {
            Some(BlockFrame::Do { top }) => *top,
            _ => return Err(RuntimeError::block_mismatch("LOOP without DO")),
        };
        self.block_stack.pop();
        if let Some((until, cond)) = post {
            let truth = self.eval_expr(cond)?.is_true()?;
            let pass = if *until { !truth } else { truth };
            if !pass {
                return Ok(Flow::Next);
            }
        }
        // Back to the DO statement so a pre-condition re-evaluates
        Ok(Flow::Jump(top))
    }

    fn exec_exit_do(&mut self) -> Result<Flow> {
        loop {
            match self.block_stack.pop() {
                Some(BlockFrame::Do { .. }) => break,
                Some(_) => {}
                None => return Err(RuntimeError::block_mismatch("EXIT DO outside DO")),
            }
        }
        let target = self.scan_for(ScanKind::PastLoop)?;
        Ok(Flow::Jump(target))
    }

    fn exec_while(&mut self, cond: &qb_lang::expr::Expr) -> Result<Flow> {
        if self.eval_expr(cond)?.is_true()? {
            self.block_stack.push(BlockFrame::While { top: self.pc });
            Ok(Flow::Next)
        } else {
            let target = self.scan_for(ScanKind::PastWend)?;
            Ok(Flow::Jump(target))
        }
    }

    fn exec_wend(&mut self) -> Result<Flow> {
        match self.block_stack.pop() {
            Some(BlockFrame::While { top }) => Ok(Flow::Jump(top)),
            _ => Err(RuntimeError::block_mismatch("WEND without WHILE")),
        }
    }

    // ----- SELECT CASE -----

    fn exec_select(&mut self, selector: &qb_lang::expr::Expr) -> Result<Flow> {
        let selector = self.eval_expr(selector)?;
        self.block_stack.push(BlockFrame::Select {
            selector,
            arm_taken: false,
        });
        // Flow runs to the first CASE; statements before it are skipped by
        // QBasic as dead space, so scan directly.
        let target = self.scan_for(ScanKind::NextCase)?;
        Ok(Flow::Jump(target))
    }

    fn exec_case(&mut self, arms: &[qb_lang::stmt::CaseArm]) -> Result<Flow> {
        let (selector, arm_taken) = match self.block_stack.last() {
            Some(BlockFrame::Select {
                selector,
                arm_taken,
            }) => (selector.clone(), *arm_taken),
            _ => return Err(RuntimeError::block_mismatch("CASE without SELECT")),
        };
        if arm_taken {
            // Previous arm ran to completion; only one arm executes
            let end = self.scan_for(ScanKind::EndSelect)?;
            return Ok(Flow::Jump(end));
        }
        for arm in arms {
            if self.case_arm_matches(arm, &selector)? {
                if let Some(BlockFrame::Select { arm_taken, .. }) = self.block_stack.last_mut() {
                    *arm_taken = true;
                }
                return Ok(Flow::Next);
            }
        }
        let target = self.scan_for(ScanKind::NextCase)?;
        Ok(Flow::Jump(target))
    }

    fn case_arm_matches(
        &mut self,
        arm: &qb_lang::stmt::CaseArm,
        selector: &Value,
    ) -> Result<bool> {
        use qb_lang::expr::BinOp;
        use qb_lang::stmt::CaseArm;
        Ok(match arm {
            CaseArm::Value(e) => {
                let v = self.eval_expr(e)?;
                crate::value::compare(BinOp::Eq, selector, &v)?.is_true()?
            }
            CaseArm::Range(lo, hi) => {
                let lo = self.eval_expr(lo)?;
                let hi = self.eval_expr(hi)?;
                crate::value::compare(BinOp::Ge, selector, &lo)?.is_true()?
                    && crate::value::compare(BinOp::Le, selector, &hi)?.is_true()?
            }
            CaseArm::Is(op, e) => {
                let v = self.eval_expr(e)?;
                crate::value::compare(*op, selector, &v)?.is_true()?
            }
        })
    }

    fn exec_case_else(&mut self) -> Result<Flow> {
        let arm_taken = match self.block_stack.last() {
            Some(BlockFrame::Select { arm_taken, .. }) => *arm_taken,
            _ => return Err(RuntimeError::block_mismatch("CASE ELSE without SELECT")),
        };
        if arm_taken {
            let end = self.scan_for(ScanKind::EndSelect)?;
            return Ok(Flow::Jump(end));
        }
        if let Some(BlockFrame::Select { arm_taken, .. }) = self.block_stack.last_mut() {
            *arm_taken = true;
        }
        Ok(Flow::Next)
    }

    fn exec_end_select(&mut self) -> Result<Flow> {
        match self.block_stack.pop() {
            Some(BlockFrame::Select { .. }) => Ok(Flow::Next),
            _ => Err(RuntimeError::block_mismatch("END SELECT without SELECT")),
        }
    }

    // ----- jumps -----

    fn exec_goto(&mut self, target: &Target) -> Result<Flow> {
        let line = self
            .program
            .clone()
            .resolve_target(target, self.current_proc(), false)?;
        Ok(Flow::Jump(Pc { line, seg: 0 }))
    }

    fn exec_gosub(&mut self, target: &Target) -> Result<Flow> {
        let line = self
            .program
            .clone()
            .resolve_target(target, self.current_proc(), true)?;
        self.push_gosub(None)?;
        Ok(Flow::Jump(Pc { line, seg: 0 }))
    }

    fn push_gosub(&mut self, trap: Option<TrapId>) -> Result<()> {
        if self.gosub_stack.len() >= GOSUB_DEPTH_LIMIT {
            return Err(RuntimeError::new(
                ErrorKind::StackOverflow,
                "GOSUB nesting too deep",
            ));
        }
        let return_pc = self.pc_after_current();
        self.gosub_stack.push(GosubEntry { return_pc, trap });
        Ok(())
    }

    fn exec_on_goto(
        &mut self,
        expr: &qb_lang::expr::Expr,
        targets: &[Target],
        gosub: bool,
    ) -> Result<Flow> {
        let k = self.eval_expr(expr)?.as_i32()?;
        if k < 1 || k as usize > targets.len() {
            // 0 or out of range falls through, never raises
            return Ok(Flow::Next);
        }
        let target = &targets[k as usize - 1];
        if gosub {
            self.exec_gosub(target)
        } else {
            self.exec_goto(target)
        }
    }

    fn exec_return(&mut self, target: Option<&Target>) -> Result<Flow> {
        let base = self.call_stack.last().map(|f| f.gosub_base).unwrap_or(0);
        if self.gosub_stack.len() <= base {
            return Err(
                RuntimeError::block_mismatch("RETURN without GOSUB").with_code(3)
            );
        }
        let entry = self.gosub_stack.pop().unwrap();
        if let Some(trap) = entry.trap {
            self.traps.unmask(trap);
        }
        match target {
            None => Ok(Flow::Jump(entry.return_pc)),
            Some(t) => {
                let line = self
                    .program
                    .clone()
                    .resolve_target(t, self.current_proc(), false)?;
                Ok(Flow::Jump(Pc { line, seg: 0 }))
            }
        }
    }

    /// Trap dispatch is a synthetic GOSUB that also remembers which trap to
    /// unmask on RETURN.
    fn synthetic_gosub(&mut self, id: TrapId, line: usize) -> Result<()> {
        self.push_gosub(Some(id))
            .map_err(|e| self.stamp(e))?;
        self.pc = Pc { line, seg: 0 };
        self.skip_owned_lines();
        Ok(())
    }

    // ----- ON ERROR / RESUME -----

    fn exec_on_error(&mut self, target: Option<&Target>) -> Result<Flow> {
        match target {
            None => {
                self.error_handler = None;
                if self.in_error_handler {
                    // Re-raise the active error with the trap now disabled
                    return Err(RuntimeError::from_code(self.err_code));
                }
            }
            Some(t) => {
                let line = self.program.clone().resolve_target(t, None, false)?;
                self.error_handler = Some(line);
            }
        }
        Ok(Flow::Next)
    }

    /// Route a raised error into the installed handler if possible.
    /// `Ok(Some(()))` means control transferred; `Ok(None)` means the error
    /// is fatal.
    fn trap_error(&mut self, err: &RuntimeError) -> Result<Option<()>> {
        let Some(handler) = self.error_handler else {
            return Ok(None);
        };
        if self.in_error_handler {
            // An error inside the handler aborts
            return Ok(None);
        }
        debug!(code = err.code, line = err.line, "error trapped");
        self.err_code = err.code;
        self.erl = err.line;
        self.error_site = Some(ErrorSite { pc: self.pc });
        self.in_error_handler = true;
        self.pc = Pc {
            line: handler,
            seg: 0,
        };
        self.skip_owned_lines();
        Ok(Some(()))
    }

    fn exec_resume(&mut self, mode: &ResumeMode) -> Result<Flow> {
        if !self.in_error_handler {
            return Err(RuntimeError::illegal_call("RESUME without error").with_code(20));
        }
        let site = self
            .error_site
            .take()
            .ok_or_else(|| RuntimeError::illegal_call("RESUME without error").with_code(20))?;
        self.in_error_handler = false;
        match mode {
            ResumeMode::Same => Ok(Flow::Jump(site.pc)),
            ResumeMode::Next => {
                // Resume at the statement after the offender
                self.pc = site.pc;
                let consumed = self.stmt_at(site.pc)?.consumes_line;
                if consumed {
                    Ok(Flow::Jump(Pc {
                        line: site.pc.line + 1,
                        seg: 0,
                    }))
                } else {
                    let segs = self.program.source.lines[site.pc.line].statements.len();
                    if site.pc.seg + 1 < segs {
                        Ok(Flow::Jump(Pc {
                            line: site.pc.line,
                            seg: site.pc.seg + 1,
                        }))
                    } else {
                        Ok(Flow::Jump(Pc {
                            line: site.pc.line + 1,
                            seg: 0,
                        }))
                    }
                }
            }
            ResumeMode::Label(t) => {
                let line = self
                    .program
                    .clone()
                    .resolve_target(t, self.current_proc(), false)?;
                Ok(Flow::Jump(Pc { line, seg: 0 }))
            }
        }
    }

    // ----- events -----

    fn exec_on_event(
        &mut self,
        event: &qb_lang::stmt::EventSpec,
        target: &Target,
    ) -> Result<Flow> {
        let param = match &event.index {
            Some(e) => self.eval_expr(e)?.as_f64()?,
            None => 0.0,
        };
        let line = self
            .program
            .clone()
            .resolve_target(target, self.current_proc(), true)?;
        let id = match event.kind {
            qb_lang::stmt::EventKind::Key => TrapId::Key(param as u8),
            qb_lang::stmt::EventKind::Timer => TrapId::Timer,
            qb_lang::stmt::EventKind::Strig => TrapId::Strig(param as u8),
            qb_lang::stmt::EventKind::Pen => TrapId::Pen,
            qb_lang::stmt::EventKind::Play => TrapId::Play,
        };
        self.traps.install(id, line, param);
        Ok(Flow::Next)
    }

    fn exec_event_control(
        &mut self,
        event: &qb_lang::stmt::EventSpec,
        action: qb_lang::stmt::EventAction,
    ) -> Result<Flow> {
        let index = match &event.index {
            Some(e) => Some(self.eval_expr(e)?.as_i32()? as u8),
            None => None,
        };
        self.traps.control(event.kind, index, action);
        Ok(Flow::Next)
    }

    // ----- misc -----

    fn exec_sleep(&mut self, seconds: Option<&qb_lang::expr::Expr>) -> Result<Flow> {
        match seconds {
            Some(e) => {
                let n = self.eval_expr(e)?.as_f64()?;
                self.host.clock().sleep(n);
            }
            None => {
                // Wait for a keypress, pumping events
                loop {
                    if self.host.cancelled() {
                        return Ok(Flow::End(ExitReason::Cancelled));
                    }
                    if self.host.input().inkey().is_some() {
                        break;
                    }
                    self.host.clock().sleep(0.02);
                    self.host.yield_frame();
                }
            }
        }
        Ok(Flow::Next)
    }

    fn exec_swap(
        &mut self,
        a: &qb_lang::stmt::LValue,
        b: &qb_lang::stmt::LValue,
    ) -> Result<Flow> {
        let va = self.eval_lvalue(a)?;
        let vb = self.eval_lvalue(b)?;
        if va.scalar_type() != vb.scalar_type() {
            return Err(RuntimeError::type_mismatch("SWAP of different types"));
        }
        self.assign_lvalue(a, vb)?;
        self.assign_lvalue(b, va)?;
        Ok(Flow::Next)
    }

    fn exec_mid_assign(
        &mut self,
        target: &qb_lang::stmt::LValue,
        start: &qb_lang::expr::Expr,
        len: Option<&qb_lang::expr::Expr>,
        expr: &qb_lang::expr::Expr,
    ) -> Result<Flow> {
        let current = self.eval_lvalue(target)?.into_string()?;
        let repl = self.eval_expr(expr)?.into_string()?;
        let start = self.eval_expr(start)?.as_i32()?;
        if start < 1 {
            return Err(RuntimeError::illegal_call("MID$ start must be >= 1"));
        }
        let chars: Vec<char> = current.chars().collect();
        let start = (start as usize - 1).min(chars.len());
        let max_len = chars.len() - start;
        let len = match len {
            Some(e) => (self.eval_expr(e)?.as_i32()?.max(0) as usize).min(max_len),
            None => repl.chars().count().min(max_len),
        };
        let mut out: Vec<char> = chars;
        for (i, c) in repl.chars().take(len).enumerate() {
            out[start + i] = c;
        }
        self.assign_lvalue(target, Value::Str(out.into_iter().collect()))?;
        Ok(Flow::Next)
    }

    fn exec_lset(
        &mut self,
        left: bool,
        target: &qb_lang::stmt::LValue,
        expr: &qb_lang::expr::Expr,
    ) -> Result<Flow> {
        let current = self.eval_lvalue(target)?.into_string()?;
        let value = self.eval_expr(expr)?.into_string()?;
        let width = current.chars().count();
        let vlen = value.chars().count();
        let out = if vlen >= width {
            value.chars().take(width).collect::<String>()
        } else if left {
            let mut s = value;
            s.extend(std::iter::repeat_n(' ', width - vlen));
            s
        } else {
            let mut s = " ".repeat(width - vlen);
            s.push_str(&value);
            s
        };
        self.assign_lvalue(target, Value::Str(out))?;
        Ok(Flow::Next)
    }

    fn exec_clear(&mut self) -> Result<Flow> {
        self.store.clear();
        self.block_stack.clear();
        self.gosub_stack.clear();
        self.call_stack.clear();
        self.data.restore(0);
        self.traps.reset();
        self.error_handler = None;
        self.in_error_handler = false;
        Ok(Flow::Next)
    }

    fn exec_run(&mut self, target: Option<&Target>) -> Result<Flow> {
        self.exec_clear()?;
        self.host.files().close_all();
        let line = match target {
            None => 0,
            Some(t) => self.program.clone().resolve_target(t, None, false)?,
        };
        Ok(Flow::Jump(Pc { line, seg: 0 }))
    }

    // ----- scanning -----

    pub(crate) fn pc_after_current(&mut self) -> Pc {
        if self.pc.line >= self.program.source.lines.len() {
            return self.pc;
        }
        let consumed = self
            .stmt_cache
            .get(&(self.pc.line, self.pc.seg))
            .map(|c| c.consumes_line)
            .unwrap_or(false);
        let segs = self.program.source.lines[self.pc.line].statements.len();
        if !consumed && self.pc.seg + 1 < segs {
            Pc {
                line: self.pc.line,
                seg: self.pc.seg + 1,
            }
        } else {
            Pc {
                line: self.pc.line + 1,
                seg: 0,
            }
        }
    }

    fn after(&self, pc: Pc) -> Pc {
        let segs = self.program.source.lines[pc.line].statements.len();
        if pc.seg + 1 < segs {
            Pc {
                line: pc.line,
                seg: pc.seg + 1,
            }
        } else {
            Pc {
                line: pc.line + 1,
                seg: 0,
            }
        }
    }

    fn scan_for(&mut self, kind: ScanKind) -> Result<Pc> {
        self.scan_from(self.pc, kind)
    }

    /// Forward scan from just after `from` for a block-structure target,
    /// memoized per `(position, kind)`.
    fn scan_from(&mut self, from: Pc, kind: ScanKind) -> Result<Pc> {
        if let Some(pc) = self.jump_cache.get(&(from.line, from.seg, kind)) {
            return Ok(*pc);
        }
        let target = self.scan_uncached(from, kind)?;
        self.jump_cache
            .insert((from.line, from.seg, kind), target);
        Ok(target)
    }

    fn scan_uncached(&mut self, from: Pc, kind: ScanKind) -> Result<Pc> {
        let program = self.program.clone();
        let mut pc = self.after(from);
        let mut depth = 0usize;

        while pc.line < program.source.lines.len() {
            let segs = program.source.lines[pc.line].statements.len();
            if pc.seg >= segs {
                pc = Pc {
                    line: pc.line + 1,
                    seg: 0,
                };
                continue;
            }
            if kind == ScanKind::PastEndType {
                let text = program.source.lines[pc.line].statements[pc.seg]
                    .text
                    .trim_start()
                    .to_ascii_uppercase();
                if text.starts_with("END TYPE") {
                    return Ok(self.after(pc));
                }
                pc = self.after(pc);
                continue;
            }
            let stmt = self.stmt_at(pc)?.stmt;
            match (&*stmt, kind) {
                // Nesting bookkeeping
                (Stmt::IfBlock { .. }, ScanKind::ElseBranch | ScanKind::EndIf) => depth += 1,
                (Stmt::EndIf, ScanKind::ElseBranch | ScanKind::EndIf) if depth > 0 => depth -= 1,
                (Stmt::Do { .. }, ScanKind::PastLoop) => depth += 1,
                (Stmt::Loop { .. }, ScanKind::PastLoop) if depth > 0 => depth -= 1,
                (Stmt::While { .. }, ScanKind::PastWend) => depth += 1,
                (Stmt::Wend, ScanKind::PastWend) if depth > 0 => depth -= 1,
                (Stmt::SelectCase { .. }, ScanKind::NextCase | ScanKind::EndSelect) => depth += 1,
                (Stmt::EndSelect, ScanKind::NextCase | ScanKind::EndSelect) if depth > 0 => {
                    depth -= 1
                }
                (Stmt::For { .. }, ScanKind::PastNext) => depth += 1,
                (Stmt::Next { vars }, ScanKind::PastNext) if depth > 0 => {
                    // A NEXT with k variables closes k nesting levels
                    let closes = vars.len().max(1);
                    if closes > depth {
                        return Ok(self.after(pc));
                    }
                    depth -= closes;
                }

                // Matches at depth zero
                (
                    Stmt::ElseIf { .. } | Stmt::Else | Stmt::ElseInline(_) | Stmt::EndIf,
                    ScanKind::ElseBranch,
                ) if depth == 0 => {
                    return Ok(pc);
                }
                (Stmt::EndIf, ScanKind::EndIf) if depth == 0 => return Ok(pc),
                (Stmt::Loop { .. }, ScanKind::PastLoop) if depth == 0 => {
                    return Ok(self.after(pc));
                }
                (Stmt::Wend, ScanKind::PastWend) if depth == 0 => return Ok(self.after(pc)),
                (Stmt::Case { .. } | Stmt::CaseElse, ScanKind::NextCase) if depth == 0 => {
                    return Ok(pc);
                }
                (Stmt::EndSelect, ScanKind::NextCase | ScanKind::EndSelect) if depth == 0 => {
                    return Ok(pc);
                }
                (Stmt::Next { .. }, ScanKind::PastNext) if depth == 0 => {
                    return Ok(self.after(pc));
                }
                (Stmt::ProcEnd { .. } | Stmt::ProcStart { .. }, _) => {
                    return Err(RuntimeError::block_mismatch(
                        "block not closed before procedure boundary",
                    ));
                }
                _ => {}
            }
            pc = self.after(pc);
        }
        Err(RuntimeError::block_mismatch(format!(
            "no matching close found (scanning for {kind:?})"
        )))
    }

    // ----- procedure entry/exit plumbing shared with decl.rs -----

    pub(crate) fn push_call_frame(&mut self, proc: ProcId, result: Option<Cell>) -> Result<()> {
        if self.call_stack.len() >= self.max_depth {
            return Err(RuntimeError::new(
                ErrorKind::StackOverflow,
                "procedure calls nested too deeply",
            ));
        }
        self.call_stack.push(CallFrame {
            proc,
            // Calls run synchronously; the sentinel tells the nested loop
            // the frame came back
            return_pc: decl::SENTINEL,
            block_base: self.block_stack.len(),
            gosub_base: self.gosub_stack.len(),
            result,
            copy_out: Vec::new(),
        });
        Ok(())
    }

    /// END SUB/END FUNCTION/EXIT SUB/EXIT FUNCTION.
    fn exec_proc_exit(&mut self, stmt: &Stmt) -> Result<Flow> {
        let is_function = matches!(
            stmt,
            Stmt::ProcEnd { is_function: true } | Stmt::ExitFunction
        );
        let frame = self
            .call_stack
            .pop()
            .ok_or_else(|| RuntimeError::block_mismatch("END SUB outside a call"))?;
        let proc = self.program.procedure(frame.proc);
        if proc.is_function != is_function {
            self.call_stack.push(frame);
            return Err(RuntimeError::block_mismatch("procedure kind mismatch"));
        }
        self.block_stack.truncate(frame.block_base);
        self.gosub_stack.truncate(frame.gosub_base);
        if let Some(cell) = &frame.result {
            self.last_function_result = Some(cell.borrow().clone());
        } else {
            self.last_function_result = None;
        }
        if proc.is_static {
            self.store.extract_frame_to_pool(frame.proc);
        }
        frame.apply_copy_out(&mut self.store, &self.program)?;
        self.store.pop_frame();
        Ok(Flow::Jump(frame.return_pc))
    }

    /// Unwind nested frames after an error inside a called FUNCTION.
    pub(crate) fn unwind_to(&mut self, depth: usize) {
        while self.call_stack.len() > depth {
            let frame = self.call_stack.pop().unwrap();
            self.block_stack.truncate(frame.block_base);
            self.gosub_stack.truncate(frame.gosub_base);
            self.store.pop_frame();
        }
    }

    /// Depth accessors for tests and the nested-call loop in eval.
    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    pub(crate) fn step_nested(&mut self) -> Result<Option<ExitReason>> {
        self.step()
    }

    pub(crate) fn pc(&self) -> Pc {
        self.pc
    }

    pub(crate) fn set_pc(&mut self, pc: Pc) {
        self.pc = pc;
    }
}

/// Index just past the NEXT that closes the FOR at `at` in a branch list.
fn branch_past_next(stmts: &[Stmt], at: usize) -> Result<usize> {
    let mut depth = 0usize;
    for (j, stmt) in stmts.iter().enumerate().skip(at + 1) {
        match stmt {
            Stmt::For { .. } => depth += 1,
            Stmt::Next { vars } => {
                let closes = vars.len().max(1);
                if closes > depth {
                    return Ok(j + 1);
                }
                depth -= closes;
            }
            _ => {}
        }
    }
    Err(RuntimeError::block_mismatch("FOR without NEXT"))
}

/// The FOR continuation test: `(v - limit) * sign(step) <= 0`.
fn for_continues(v: &Value, limit: &Value, step: &Value) -> Result<bool> {
    let v = v.as_f64()?;
    let limit = limit.as_f64()?;
    let step = step.as_f64()?;
    Ok(if step < 0.0 {
        v >= limit
    } else {
        v <= limit
    })
}

impl CallFrame {
    fn apply_copy_out(
        &self,
        store: &mut VarStore,
        program: &Program,
    ) -> Result<()> {
        for out in &self.copy_out {
            out.apply(store, program)?;
        }
        Ok(())
    }
}
