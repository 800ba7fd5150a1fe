//! Expression evaluation
//!
//! Works over the parsed AST that the statement cache holds, so each
//! textual expression parses exactly once per source location. The one
//! genuinely dynamic decision, whether `name(args)` is an array index, a
//! builtin, a user FUNCTION, or a `DEF FN`, is memoized per
//! `(procedure, name)` and guarded by the store's scope fingerprint; any
//! `DIM`/`ERASE`/`SHARED`/`CLEAR` bumps the fingerprint and drops the memo,
//! so a cached resolution can never go stale.
//!
//! Name resolution order on read: procedure statics → locals → SHARED
//! bindings → constants → globals; unresolved reads yield the sigil type's
//! zero without creating a cell.

use qb_lang::error::{Result, RuntimeError};
use qb_lang::expr::{BinOp, Expr, UnaryOp};
use qb_lang::stmt::LValue;
use qb_lang::token::NumLit;
use qb_lang::types::{name_type, ElemType, ScalarType};
use tracing::trace;

use crate::builtins::{self, BuiltinCtx};
use crate::exec::Interp;
use crate::scope::{assign_field_path, field_path};
use crate::value::{self, Value};

/// What a `name(args)` reference resolved to last time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Array,
    Builtin,
    UserFunction(qb_lang::index::ProcId),
    DefFn,
}

impl<'h> Interp<'h> {
    pub(crate) fn builtin_ctx(&mut self) -> BuiltinCtx<'_> {
        let (err, erl) = self.err_erl();
        BuiltinCtx {
            host: &mut *self.host,
            rng: &mut self.rng,
            err,
            erl,
        }
    }

    pub fn eval_expr(&mut self, e: &Expr) -> Result<Value> {
        match e {
            Expr::Num(lit) => Ok(match lit {
                NumLit::Integer(n) => Value::Integer(*n),
                NumLit::Long(n) => Value::Long(*n),
                NumLit::Single(f) => Value::Single(*f),
                NumLit::Double(f) => Value::Double(*f),
            }),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Paren(inner) => self.eval_expr(inner),
            Expr::Var(name) => self.eval_var(name),
            Expr::NameArgs(name, args) => self.eval_name_args(name, args),
            Expr::Field(base, field) => {
                let base = self.eval_expr(base)?;
                field_path(&base, std::slice::from_ref(field), &self.program.records)
                    .map(|v| v.clone())
            }
            Expr::Unary(op, inner) => {
                let v = self.eval_expr(inner)?;
                match op {
                    UnaryOp::Neg => value::neg(&v),
                    UnaryOp::Not => value::bit_not(&v),
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let a = self.eval_expr(lhs)?;
                let b = self.eval_expr(rhs)?;
                match op {
                    BinOp::Add => value::add(&a, &b),
                    BinOp::Sub => value::sub(&a, &b),
                    BinOp::Mul => value::mul(&a, &b),
                    BinOp::Div => value::div(&a, &b),
                    BinOp::IntDiv => value::int_div(&a, &b),
                    BinOp::Mod => value::modulo(&a, &b),
                    BinOp::Pow => value::pow(&a, &b),
                    BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                        value::compare(*op, &a, &b)
                    }
                    BinOp::And | BinOp::Or | BinOp::Xor | BinOp::Eqv | BinOp::Imp => {
                        value::logical(*op, &a, &b)
                    }
                }
            }
        }
    }

    fn eval_var(&mut self, name: &str) -> Result<Value> {
        // Reserved zero-argument builtins win over variables
        if let Some(result) = builtins::zero_arg(name, &mut self.builtin_ctx()) {
            return result;
        }
        if name.starts_with("FN") && self.def_fns.contains_key(name) {
            return self.call_def_fn(name, &[]);
        }
        // A FUNCTION name without parens is a zero-argument call, unless a
        // local of the same name shadows it (the function's own result slot
        // is handled at assignment, not here)
        if self.store.find_scalar(name).is_none()
            && let Some(id) = self.program.find_procedure(name)
            && self.program.procedure(id).is_function
            && self.current_proc() != Some(id)
        {
            return self.call_function(id, &[]);
        }
        if self.store.find_scalar(name).is_none()
            && let Some((base, fields)) = split_dotted(name)
            && let Some(cell) = self.store.find_scalar(&base)
        {
            let v = cell.borrow();
            if matches!(&*v, Value::Record(..)) {
                return field_path(&v, &fields, &self.program.records).map(|v| v.clone());
            }
        }
        Ok(self.store.read_scalar(name, &self.program.defaults))
    }

    fn eval_name_args(&mut self, name: &str, args: &[Expr]) -> Result<Value> {
        // Pseudo-functions with non-value arguments come first
        match name {
            "LBOUND" | "UBOUND" => return self.eval_bound(name, args),
            "INPUT$" => return self.eval_input_chars(args),
            "TAB" | "SPC" => {
                return Err(RuntimeError::illegal_call(format!(
                    "{name} is only valid inside PRINT"
                )));
            }
            _ => {}
        }

        match self.resolve_name(name)? {
            NameKind::Array => {
                let idx = self.eval_subscripts(args)?;
                let arr = self.array_for(name, idx.len())?;
                let arr = arr.borrow();
                arr.get(&idx).map(|v| v.clone())
            }
            NameKind::Builtin => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.eval_expr(a)?);
                }
                builtins::call(name, &values, &mut self.builtin_ctx())
                    .expect("resolved builtin vanished")
            }
            NameKind::UserFunction(id) => self.call_function(id, args),
            NameKind::DefFn => self.call_def_fn(name, args),
        }
    }

    /// Memoized array/builtin/function disambiguation; the fingerprint
    /// guard drops the memo whenever visible bindings change.
    fn resolve_name(&mut self, name: &str) -> Result<NameKind> {
        let fp = self.store.fingerprint();
        if self.resolve_fingerprint != fp {
            trace!(fingerprint = fp, "scope changed, clearing resolution memo");
            self.resolve_cache.clear();
            self.resolve_fingerprint = fp;
        }
        let key = (self.current_proc(), name.to_string());
        if let Some(kind) = self.resolve_cache.get(&key) {
            return Ok(*kind);
        }
        let kind = if self.store.find_array(name).is_some() {
            NameKind::Array
        } else if let Some(id) = self.program.find_procedure(name) {
            if self.program.procedure(id).is_function {
                NameKind::UserFunction(id)
            } else {
                return Err(RuntimeError::type_mismatch(format!(
                    "SUB {name} used as a function"
                )));
            }
        } else if self.def_fns.contains_key(name) {
            NameKind::DefFn
        } else if builtins::is_builtin_name(name) {
            NameKind::Builtin
        } else {
            // Unknown name with subscripts: implicit array (auto-DIM)
            NameKind::Array
        };
        self.resolve_cache.insert(key, kind);
        Ok(kind)
    }

    pub(crate) fn eval_subscripts(&mut self, args: &[Expr]) -> Result<Vec<i32>> {
        let mut idx = Vec::with_capacity(args.len());
        for a in args {
            idx.push(self.eval_expr(a)?.as_i32()?);
        }
        Ok(idx)
    }

    /// Array cell for `name`, auto-DIMming `(base TO 10)` per dimension on
    /// first reference, as QBasic does.
    pub(crate) fn array_for(
        &mut self,
        name: &str,
        dims: usize,
    ) -> Result<crate::scope::ArrayCell> {
        if let Some(cell) = self.store.find_array(name) {
            return Ok(cell);
        }
        let base = self.program.option_base as i32;
        let elem = ElemType::Scalar(name_type(name, &self.program.defaults));
        let bounds = vec![(base, 10); dims.max(1)];
        let array = crate::array::BasicArray::new(elem, bounds, false, &self.program.records)?;
        self.store.insert_array(name, array)
    }

    fn eval_bound(&mut self, which: &str, args: &[Expr]) -> Result<Value> {
        let name = match args.first() {
            Some(Expr::Var(n)) => n.clone(),
            Some(Expr::NameArgs(n, inner)) if inner.is_empty() => n.clone(),
            _ => {
                return Err(RuntimeError::illegal_call(format!(
                    "{which} needs an array name"
                )));
            }
        };
        let dim = match args.get(1) {
            Some(e) => self.eval_expr(e)?.as_i32()?,
            None => 1,
        };
        let arr = self
            .store
            .find_array(&name)
            .ok_or_else(|| RuntimeError::undefined(format!("array {name}")))?;
        let arr = arr.borrow();
        if dim < 1 || dim as usize > arr.dims() {
            return Err(RuntimeError::illegal_call(format!("{which} dimension {dim}")));
        }
        let (lo, hi) = arr.bounds[dim as usize - 1];
        Ok(Value::Long(if which == "LBOUND" { lo } else { hi }))
    }

    /// `INPUT$(n)` from the keyboard, `INPUT$(n, #f)` from a file.
    fn eval_input_chars(&mut self, args: &[Expr]) -> Result<Value> {
        let n = self
            .eval_expr(args.first().ok_or_else(|| {
                RuntimeError::illegal_call("INPUT$ needs a count")
            })?)?
            .as_i32()?;
        if n < 0 {
            return Err(RuntimeError::illegal_call("INPUT$ count must be >= 0"));
        }
        match args.get(1) {
            Some(h) => {
                let handle = self.eval_expr(h)?.as_i32()?;
                self.host
                    .files()
                    .read_chars(handle as u16, n as usize)
                    .map(Value::Str)
            }
            None => {
                let mut out = String::new();
                while out.chars().count() < n as usize {
                    if self.host.cancelled() {
                        break;
                    }
                    match self.host.input().inkey() {
                        Some(k) => out.push_str(&k),
                        None => {
                            self.host.clock().sleep(0.02);
                            self.host.yield_frame();
                        }
                    }
                }
                Ok(Value::Str(out))
            }
        }
    }

    // ----- lvalues -----

    pub fn eval_lvalue(&mut self, lv: &LValue) -> Result<Value> {
        if lv.indices.is_empty() && lv.fields.is_empty() {
            return self.eval_var(&lv.name);
        }
        let idx = self.eval_subscripts(&lv.indices)?;
        let arr = self.array_for(&lv.name, idx.len())?;
        let arr = arr.borrow();
        let elem = arr.get(&idx)?;
        if lv.fields.is_empty() {
            Ok(elem.clone())
        } else {
            field_path(elem, &lv.fields, &self.program.records).map(|v| v.clone())
        }
    }

    pub fn assign_lvalue(&mut self, lv: &LValue, v: Value) -> Result<()> {
        // FUNCTION result: assignment to the function's own name
        if lv.indices.is_empty()
            && lv.fields.is_empty()
            && let Some(frame) = self.call_stack.last()
            && let Some(result) = frame.result.clone()
        {
            let proc = self.program.procedure(frame.proc);
            if names_match(&proc.name, &lv.name) {
                let coerced = v.coerce_to(proc.return_type)?;
                *result.borrow_mut() = coerced;
                return Ok(());
            }
        }

        if lv.indices.is_empty() {
            // Dotted scalar: whole-name cell wins, else record field
            if self.store.find_scalar(&lv.name).is_none()
                && let Some((base, fields)) = split_dotted(&lv.name)
                && let Some(cell) = self.store.find_scalar(&base)
            {
                let is_record = matches!(&*cell.borrow(), Value::Record(..));
                if is_record {
                    return assign_field_path(
                        &mut cell.borrow_mut(),
                        &fields,
                        &v,
                        &self.program.records,
                    );
                }
            }
            let program = self.program.clone();
            return self
                .store
                .write_scalar(&lv.name, &v, &program.defaults, &program.records);
        }

        let idx = self.eval_subscripts(&lv.indices)?;
        let arr = self.array_for(&lv.name, idx.len())?;
        let mut arr = arr.borrow_mut();
        let records = &self.program.records;
        let slot = arr.get_mut(&idx)?;
        if lv.fields.is_empty() {
            *slot = v.coerce_like(slot, records)?;
        } else {
            assign_field_path(slot, &lv.fields, &v, records)?;
        }
        Ok(())
    }

    // ----- DEF FN -----

    fn call_def_fn(&mut self, name: &str, args: &[Expr]) -> Result<Value> {
        let def = self
            .def_fns
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::undefined(format!("{name} is not defined")))?;
        if args.len() != def.params.len() {
            return Err(RuntimeError::illegal_call(format!(
                "{name} takes {} arguments",
                def.params.len()
            )));
        }
        // Arguments bind by value over the current scope; previous bindings
        // of the parameter names are restored afterwards.
        let mut values = Vec::with_capacity(args.len());
        for (param, arg) in def.params.iter().zip(args) {
            let v = self.eval_expr(arg)?;
            let ty = self.param_scalar_type(param);
            values.push(v.coerce_to(ty)?);
        }
        let mut saved = Vec::with_capacity(values.len());
        for (param, v) in def.params.iter().zip(values) {
            let cell = std::rc::Rc::new(std::cell::RefCell::new(v));
            saved.push((
                param.name.clone(),
                self.store.swap_local(&param.name, Some(cell)),
            ));
        }
        let result = self.eval_expr(&def.body);
        for (name, prev) in saved {
            self.store.swap_local(&name, prev);
        }
        let ty = name_type(name.trim_start_matches("FN"), &self.program.defaults);
        let ty = match name.chars().last().and_then(ScalarType::from_sigil) {
            Some(s) => s,
            None => ty,
        };
        result?.coerce_to(ty)
    }

    pub(crate) fn param_scalar_type(&self, param: &qb_lang::stmt::Param) -> ScalarType {
        match &param.ty {
            Some(qb_lang::stmt::TypeRef::Scalar(ty)) => *ty,
            _ => name_type(&param.name, &self.program.defaults),
        }
    }
}

/// Split a dotted name at its first dot: `"P.X.Y"` → (`"P"`, `["X","Y"]`).
fn split_dotted(name: &str) -> Option<(String, Vec<String>)> {
    let mut parts = name.split('.');
    let base = parts.next()?.to_string();
    let fields: Vec<String> = parts.map(|s| s.to_string()).collect();
    if fields.is_empty() || base.is_empty() {
        None
    } else {
        Some((base, fields))
    }
}

/// Function-name match, tolerant of the sigil (`f` and `f#` both assign the
/// result of `FUNCTION f#`).
fn names_match(proc_name: &str, lv_name: &str) -> bool {
    let strip = |s: &str| {
        s.trim_end_matches(['%', '&', '!', '#', '$'])
            .to_ascii_uppercase()
    };
    strip(proc_name) == strip(lv_name)
}
