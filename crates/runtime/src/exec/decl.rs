//! Procedures and declarations
//!
//! CALL/implicit-call, parameter binding, FUNCTION invocation from the
//! evaluator, DEF FN registration, and the declaration statements (DIM,
//! REDIM, ERASE, SHARED, STATIC, COMMON).
//!
//! Binding rules: scalars pass by reference (the caller's cell is aliased
//! into the callee frame); a parenthesized actual or any computed
//! expression passes by value. Whole arrays (`arr()`) alias the caller's
//! storage. Array elements and record fields bind copy-in/copy-out: the
//! callee works on a private cell whose final value is written back on
//! return.

use std::cell::RefCell;
use std::rc::Rc;

use qb_lang::error::{Result, RuntimeError};
use qb_lang::expr::Expr;
use qb_lang::index::ProcId;
use qb_lang::stmt::{DimDecl, Param, TypeRef};
use qb_lang::types::{name_type, ElemType};
use qb_lang::Program;
use tracing::trace;

use super::{ExitReason, Flow, Interp, Pc};
use crate::array::BasicArray;
use crate::scope::{assign_field_path, ArrayCell, Cell, VarStore};
use crate::value::Value;

/// PC parked while a procedure runs synchronously; reaching it tells the
/// nested loop the frame returned.
pub(crate) const SENTINEL: Pc = Pc {
    line: usize::MAX,
    seg: 0,
};

/// A registered single-line `DEF FN`.
#[derive(Debug)]
pub(crate) struct DefFn {
    pub params: Vec<Param>,
    pub body: Expr,
}

/// Write-back for element/field by-reference arguments.
#[derive(Debug)]
pub(crate) enum CopyOut {
    Element {
        arr: ArrayCell,
        idx: Vec<i32>,
        fields: Vec<String>,
        cell: Cell,
    },
    Field {
        record: Cell,
        fields: Vec<String>,
        cell: Cell,
    },
}

impl CopyOut {
    pub(crate) fn apply(&self, _store: &mut VarStore, program: &Program) -> Result<()> {
        match self {
            CopyOut::Element {
                arr,
                idx,
                fields,
                cell,
            } => {
                let value = cell.borrow().clone();
                let mut arr = arr.borrow_mut();
                let slot = arr.get_mut(idx)?;
                if fields.is_empty() {
                    *slot = value.coerce_like(slot, &program.records)?;
                } else {
                    assign_field_path(slot, fields, &value, &program.records)?;
                }
                Ok(())
            }
            CopyOut::Field {
                record,
                fields,
                cell,
            } => {
                let value = cell.borrow().clone();
                assign_field_path(&mut record.borrow_mut(), fields, &value, &program.records)
            }
        }
    }
}

enum Binding {
    Array(String, ArrayCell),
    Alias(String, Cell),
    ByValue(String, Value),
    CopyInOut(String, Value, CopyOut),
}

impl<'h> Interp<'h> {
    pub(super) fn exec_call(&mut self, name: &str, args: &[Expr]) -> Result<Flow> {
        let id = match self.program.find_procedure(name) {
            Some(id) => id,
            None => {
                return Err(RuntimeError::undefined(format!(
                    "subprogram {name} is not defined"
                ))
                .with_code(35));
            }
        };
        if self.program.procedure(id).is_function {
            return Err(RuntimeError::illegal_call(format!(
                "FUNCTION {name} cannot be CALLed as a statement"
            )));
        }
        match self.run_procedure(id, args)? {
            Some(reason) => Ok(Flow::End(reason)),
            None => Ok(Flow::Next),
        }
    }

    /// FUNCTION invocation from expression context.
    pub(crate) fn call_function(&mut self, id: ProcId, args: &[Expr]) -> Result<Value> {
        let return_type = self.program.procedure(id).return_type;
        match self.run_procedure(id, args)? {
            Some(reason) => {
                // END inside the function: abort the enclosing statement
                // with the internal exit marker, which the run loop turns
                // into a normal program end
                self.pending_exit = Some(reason);
                Err(RuntimeError::illegal_call("program ended")
                    .with_code(super::EXIT_ERROR_CODE))
            }
            None => Ok(self
                .last_function_result
                .take()
                .unwrap_or(Value::zero(return_type))),
        }
    }

    /// Enter a procedure and run it to its END/EXIT, synchronously.
    pub(crate) fn run_procedure(
        &mut self,
        id: ProcId,
        args: &[Expr],
    ) -> Result<Option<ExitReason>> {
        let depth = self.call_depth();
        let saved_pc = self.pc();
        self.enter_procedure(id, args)?;
        while self.call_depth() > depth {
            if self.host.cancelled() {
                return Ok(Some(ExitReason::Cancelled));
            }
            if let Some((trap, line)) = self.traps.poll(self.host) {
                self.synthetic_gosub(trap, line)?;
            }
            match self.step_nested() {
                Ok(None) => {}
                Ok(Some(reason)) => return Ok(Some(reason)),
                Err(e) => {
                    self.unwind_to(depth);
                    self.set_pc(saved_pc);
                    return Err(e);
                }
            }
        }
        self.set_pc(saved_pc);
        Ok(None)
    }

    fn enter_procedure(&mut self, id: ProcId, args: &[Expr]) -> Result<()> {
        let proc = self.program.procedure(id);
        let params = proc.params.clone();
        let is_static = proc.is_static;
        let is_function = proc.is_function;
        let return_type = proc.return_type;
        let entry = Pc {
            line: proc.header_line + 1,
            seg: 0,
        };
        if args.len() != params.len() {
            return Err(RuntimeError::illegal_call(format!(
                "{}: argument-count mismatch ({} given, {} expected)",
                proc.name,
                args.len(),
                params.len()
            )));
        }
        trace!(proc = %proc.name, args = args.len(), "entering procedure");

        // Resolve bindings in the caller's scope before pushing the frame
        let mut bindings = Vec::with_capacity(params.len());
        for (param, actual) in params.iter().zip(args) {
            bindings.push(self.bind_argument(param, actual)?);
        }

        let result: Option<Cell> =
            is_function.then(|| Rc::new(RefCell::new(Value::zero(return_type))));
        self.push_call_frame(id, result)?;
        self.store.push_frame(id);
        if is_static {
            self.store.preload_frame_from_pool(id);
        }
        for binding in bindings {
            match binding {
                Binding::Array(name, cell) => self.store.bind_array(&name, cell),
                Binding::Alias(name, cell) => self.store.bind_scalar(&name, cell),
                Binding::ByValue(name, value) => {
                    let cell = Rc::new(RefCell::new(value));
                    self.store.bind_scalar(&name, cell);
                }
                Binding::CopyInOut(name, value, copy_out) => {
                    let cell = Rc::new(RefCell::new(value));
                    let copy_out = match copy_out {
                        CopyOut::Element {
                            arr, idx, fields, ..
                        } => CopyOut::Element {
                            arr,
                            idx,
                            fields,
                            cell: cell.clone(),
                        },
                        CopyOut::Field { record, fields, .. } => CopyOut::Field {
                            record,
                            fields,
                            cell: cell.clone(),
                        },
                    };
                    self.store.bind_scalar(&name, cell);
                    if let Some(frame) = self.call_stack.last_mut() {
                        frame.copy_out.push(copy_out);
                    }
                }
            }
        }
        self.set_pc(entry);
        Ok(())
    }

    fn bind_argument(&mut self, param: &Param, actual: &Expr) -> Result<Binding> {
        if param.is_array {
            let name = match actual {
                Expr::Var(n) => n,
                Expr::NameArgs(n, inner) if inner.is_empty() => n,
                _ => {
                    return Err(RuntimeError::type_mismatch(format!(
                        "parameter {}() needs an array",
                        param.name
                    )));
                }
            };
            let cell = self
                .store
                .find_array(name)
                .ok_or_else(|| RuntimeError::undefined(format!("array {name}")))?;
            return Ok(Binding::Array(param.name.clone(), cell));
        }

        match actual {
            Expr::Var(name) if !self.store.is_const(name) => {
                if let Some(cell) = self.store.find_scalar(name) {
                    self.check_param_type(param, &cell.borrow())?;
                    return Ok(Binding::Alias(param.name.clone(), cell));
                }
                // Dotted record field binds copy-in/copy-out
                if let Some((base, fields)) = split_base(name)
                    && let Some(cell) = self.store.find_scalar(&base)
                {
                    let is_record = matches!(&*cell.borrow(), Value::Record(..));
                    if is_record {
                        let value = crate::scope::field_path(
                            &cell.borrow(),
                            &fields,
                            &self.program.records,
                        )?
                        .clone();
                        self.check_param_type(param, &value)?;
                        return Ok(Binding::CopyInOut(
                            param.name.clone(),
                            value,
                            CopyOut::Field {
                                record: cell.clone(),
                                fields,
                                cell: Rc::new(RefCell::new(Value::Integer(0))),
                            },
                        ));
                    }
                }
                // Fresh name passed by reference: created in the caller
                let program = self.program.clone();
                let zero = Value::zero(name_type(name, &program.defaults));
                self.store
                    .write_scalar(name, &zero, &program.defaults, &program.records)?;
                let cell = self.store.find_scalar(name).unwrap();
                self.check_param_type(param, &cell.borrow())?;
                Ok(Binding::Alias(param.name.clone(), cell))
            }
            Expr::NameArgs(name, idx_exprs)
                if self.store.find_array(name).is_some() && !idx_exprs.is_empty() =>
            {
                let idx = self.eval_subscripts(idx_exprs)?;
                let arr = self.store.find_array(name).unwrap();
                let value = arr.borrow().get(&idx)?.clone();
                self.check_param_type(param, &value)?;
                Ok(Binding::CopyInOut(
                    param.name.clone(),
                    value,
                    CopyOut::Element {
                        arr,
                        idx,
                        fields: Vec::new(),
                        cell: Rc::new(RefCell::new(Value::Integer(0))),
                    },
                ))
            }
            // Parenthesized or computed: by value, coerced to the formal
            _ => {
                let v = self.eval_expr(actual)?;
                if matches!(&param.ty, Some(TypeRef::Record(_))) {
                    return Err(RuntimeError::type_mismatch(format!(
                        "record parameter {} cannot bind a value",
                        param.name
                    )));
                }
                let coerced = v.coerce_to(self.param_scalar_type(param))?;
                Ok(Binding::ByValue(param.name.clone(), coerced))
            }
        }
    }

    /// By-reference binding requires the actual's type to match the formal.
    fn check_param_type(&self, param: &Param, actual: &Value) -> Result<()> {
        match (&param.ty, actual) {
            (Some(TypeRef::Record(rname)), Value::Record(id, _)) => {
                if self.program.records.lookup(rname) == Some(*id) {
                    Ok(())
                } else {
                    Err(RuntimeError::type_mismatch(format!(
                        "parameter {} expects a {rname} record",
                        param.name
                    )))
                }
            }
            (Some(TypeRef::Record(rname)), _) => Err(RuntimeError::type_mismatch(format!(
                "parameter {} expects a {rname} record",
                param.name
            ))),
            (_, Value::Record(..)) => Err(RuntimeError::type_mismatch(format!(
                "parameter {} is scalar, record passed",
                param.name
            ))),
            _ => {
                let want = self.param_scalar_type(param);
                let got = actual.scalar_type().unwrap();
                if want == got {
                    Ok(())
                } else {
                    Err(RuntimeError::type_mismatch(format!(
                        "parameter {} type mismatch",
                        param.name
                    )))
                }
            }
        }
    }

    // ----- DEF FN -----

    pub(super) fn exec_def_fn(
        &mut self,
        name: &str,
        params: &[Param],
        body: &Expr,
    ) -> Result<Flow> {
        self.def_fns.insert(
            name.to_string(),
            Rc::new(DefFn {
                params: params.to_vec(),
                body: body.clone(),
            }),
        );
        Ok(Flow::Next)
    }

    // ----- declarations -----

    pub(super) fn exec_dim(
        &mut self,
        shared: bool,
        decls: &[DimDecl],
        is_redim: bool,
    ) -> Result<Flow> {
        let program = self.program.clone();
        let dynamic_directive = program
            .dynamic_at_line
            .get(self.pc().line)
            .copied()
            .unwrap_or(false);
        for decl in decls {
            let elem = self.elem_type_of(decl.ty.as_ref(), &decl.name)?;
            if decl.bounds.is_empty() {
                if is_redim {
                    return Err(RuntimeError::duplicate(format!(
                        "REDIM {} needs subscripts",
                        decl.name
                    )));
                }
                self.store.declare_scalar(&decl.name, elem, &program.records)?;
            } else {
                let mut bounds = Vec::with_capacity(decl.bounds.len());
                let mut literal = true;
                for (lo, hi) in &decl.bounds {
                    let lo_v = match lo {
                        Some(e) => {
                            literal &= is_literal(e);
                            self.eval_expr(e)?.as_i32()?
                        }
                        None => program.option_base as i32,
                    };
                    literal &= is_literal(hi);
                    bounds.push((lo_v, self.eval_expr(hi)?.as_i32()?));
                }
                let dynamic = dynamic_directive || is_redim || !literal;
                if is_redim {
                    match self.store.find_array(&decl.name) {
                        Some(cell) => {
                            cell.borrow_mut().redim(bounds, &program.records)?;
                        }
                        None => {
                            let array =
                                BasicArray::new(elem, bounds, true, &program.records)?;
                            self.store.insert_array(&decl.name, array)?;
                        }
                    }
                } else {
                    let array = BasicArray::new(elem, bounds, dynamic, &program.records)?;
                    self.store.insert_array(&decl.name, array)?;
                }
            }
            if shared {
                self.store.mark_module_shared(&decl.name);
            }
        }
        Ok(Flow::Next)
    }

    pub(super) fn exec_erase(&mut self, names: &[String]) -> Result<Flow> {
        let program = self.program.clone();
        for name in names {
            let cell = self
                .store
                .find_array(name)
                .ok_or_else(|| RuntimeError::undefined(format!("array {name}")))?;
            let dynamic = cell.borrow().dynamic;
            if dynamic {
                self.store.erase_array(name)?;
            } else {
                // ERASE on a static array re-zeroes it in place
                let mut arr = cell.borrow_mut();
                let zero = Value::zero_of(arr.elem, &program.records);
                arr.cells.fill(zero);
                arr.sprites.clear();
            }
        }
        Ok(Flow::Next)
    }

    pub(super) fn exec_shared(&mut self, names: &[(String, bool)]) -> Result<Flow> {
        if self.current_proc().is_none() {
            return Err(RuntimeError::illegal_call(
                "SHARED is only valid inside SUB or FUNCTION",
            ));
        }
        let program = self.program.clone();
        for (name, is_array) in names {
            self.store
                .install_shared(name, *is_array, &program.defaults)?;
        }
        Ok(Flow::Next)
    }

    pub(super) fn exec_static(&mut self, decls: &[DimDecl]) -> Result<Flow> {
        let Some(proc) = self.current_proc() else {
            // STATIC at module level has nothing to persist
            return Ok(Flow::Next);
        };
        let program = self.program.clone();
        for decl in decls {
            let elem = self.elem_type_of(decl.ty.as_ref(), &decl.name)?;
            if decl.bounds.is_empty() {
                self.store
                    .install_static(proc, &decl.name, elem, &program.records);
            } else {
                let mut bounds = Vec::with_capacity(decl.bounds.len());
                for (lo, hi) in &decl.bounds {
                    let lo_v = match lo {
                        Some(e) => self.eval_expr(e)?.as_i32()?,
                        None => program.option_base as i32,
                    };
                    bounds.push((lo_v, self.eval_expr(hi)?.as_i32()?));
                }
                let array = BasicArray::new(elem, bounds, false, &program.records)?;
                self.store.install_static_array(proc, &decl.name, array);
            }
        }
        Ok(Flow::Next)
    }

    pub(super) fn exec_common(
        &mut self,
        shared: bool,
        names: &[(String, bool)],
    ) -> Result<Flow> {
        // Without program chaining COMMON only matters for its SHARED
        // visibility effect
        if shared {
            for (name, _) in names {
                self.store.mark_module_shared(name);
            }
        }
        Ok(Flow::Next)
    }

    pub(crate) fn elem_type_of(
        &self,
        ty: Option<&TypeRef>,
        name: &str,
    ) -> Result<ElemType> {
        Ok(match ty {
            Some(TypeRef::Scalar(s)) => ElemType::Scalar(*s),
            Some(TypeRef::Record(rname)) => match self.program.records.lookup(rname) {
                Some(id) => ElemType::Record(id),
                None => {
                    return Err(RuntimeError::undefined(format!("type {rname}")));
                }
            },
            None => ElemType::Scalar(name_type(name, &self.program.defaults)),
        })
    }
}

fn is_literal(e: &Expr) -> bool {
    match e {
        Expr::Num(_) => true,
        Expr::Paren(inner) | Expr::Unary(_, inner) => is_literal(inner),
        _ => false,
    }
}

fn split_base(name: &str) -> Option<(String, Vec<String>)> {
    let mut parts = name.split('.');
    let base = parts.next()?.to_string();
    let fields: Vec<String> = parts.map(str::to_string).collect();
    (!fields.is_empty()).then_some((base, fields))
}
