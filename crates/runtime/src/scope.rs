//! Variable store: frames, SHARED aliases, STATIC pools
//!
//! Cells are `Rc<RefCell<…>>` so that SHARED bindings and by-reference
//! parameters alias the same storage; a write through any name is visible
//! through every name bound to the cell. The bottom frame is module scope.
//!
//! Lookup order (spec'd): STATIC locals → locals → SHARED bindings →
//! constants → globals (module-`DIM SHARED` names are visible in every
//! procedure). Scalars and arrays live in separate namespaces, as in QBasic.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use qb_lang::error::{Result, RuntimeError};
use qb_lang::index::ProcId;
use qb_lang::types::{name_type, DefaultTypes, ElemType, RecordTable};

use crate::array::BasicArray;
use crate::value::Value;

pub type Cell = Rc<RefCell<Value>>;
pub type ArrayCell = Rc<RefCell<BasicArray>>;

fn new_cell(v: Value) -> Cell {
    Rc::new(RefCell::new(v))
}

#[derive(Debug, Default)]
pub struct Frame {
    pub proc: Option<ProcId>,
    scalars: HashMap<String, Cell>,
    arrays: HashMap<String, ArrayCell>,
    shared_scalars: HashMap<String, Cell>,
    shared_arrays: HashMap<String, ArrayCell>,
    /// Names bound from the procedure's STATIC pool.
    statics: HashSet<String>,
}

/// Persistent STATIC storage per procedure.
#[derive(Debug, Default)]
struct StaticPool {
    scalars: HashMap<String, Cell>,
    arrays: HashMap<String, ArrayCell>,
}

#[derive(Debug)]
pub struct VarStore {
    frames: Vec<Frame>,
    statics: HashMap<ProcId, StaticPool>,
    consts: HashMap<String, Value>,
    /// Module-level names declared `DIM SHARED`/`COMMON SHARED`, visible
    /// from every procedure without a SHARED statement.
    module_shared: HashSet<String>,
    /// Bumped whenever visible name resolution can change; the expression
    /// cache compares this before trusting memoized resolutions.
    fingerprint: u64,
}

impl Default for VarStore {
    fn default() -> Self {
        VarStore {
            frames: vec![Frame::default()],
            statics: HashMap::new(),
            consts: HashMap::new(),
            module_shared: HashSet::new(),
            fingerprint: 1,
        }
    }
}

impl VarStore {
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    fn bump(&mut self) {
        self.fingerprint += 1;
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn current_proc(&self) -> Option<ProcId> {
        self.frames.last().and_then(|f| f.proc)
    }

    pub fn push_frame(&mut self, proc: ProcId) {
        self.frames.push(Frame {
            proc: Some(proc),
            ..Frame::default()
        });
    }

    pub fn pop_frame(&mut self) {
        debug_assert!(self.frames.len() > 1, "cannot pop the global frame");
        self.frames.pop();
    }

    fn top(&mut self) -> &mut Frame {
        self.frames.last_mut().unwrap()
    }

    fn global(&self) -> &Frame {
        &self.frames[0]
    }

    fn global_mut(&mut self) -> &mut Frame {
        &mut self.frames[0]
    }

    pub fn in_module_scope(&self) -> bool {
        self.frames.len() == 1
    }

    // ----- constants -----

    pub fn define_const(&mut self, name: &str, value: Value) -> Result<()> {
        let key = name.to_ascii_uppercase();
        if self.consts.contains_key(&key) {
            return Err(RuntimeError::duplicate(format!("CONST {key}")));
        }
        self.consts.insert(key, value);
        self.bump();
        Ok(())
    }

    pub fn const_value(&self, name: &str) -> Option<&Value> {
        self.consts.get(name)
    }

    pub fn is_const(&self, name: &str) -> bool {
        self.consts.contains_key(name)
    }

    // ----- scalars -----

    /// The cell a read/write of `name` resolves to, if any.
    pub fn find_scalar(&self, name: &str) -> Option<Cell> {
        let frame = self.frames.last().unwrap();
        if let Some(cell) = frame.scalars.get(name) {
            return Some(cell.clone());
        }
        if let Some(cell) = frame.shared_scalars.get(name) {
            return Some(cell.clone());
        }
        if self.frames.len() > 1
            && self.module_shared.contains(name)
            && let Some(cell) = self.global().scalars.get(name)
        {
            return Some(cell.clone());
        }
        None
    }

    /// Read a scalar; unresolved names yield the sigil/DEFtype zero without
    /// creating a cell.
    pub fn read_scalar(&self, name: &str, defaults: &DefaultTypes) -> Value {
        if let Some(cell) = self.find_scalar(name) {
            return cell.borrow().clone();
        }
        if let Some(v) = self.consts.get(name) {
            return v.clone();
        }
        Value::zero(name_type(name, defaults))
    }

    /// Write a scalar, creating it in the current frame on first write.
    /// The value coerces to the cell's established type.
    pub fn write_scalar(
        &mut self,
        name: &str,
        value: &Value,
        defaults: &DefaultTypes,
        records: &RecordTable,
    ) -> Result<()> {
        if self.consts.contains_key(name) {
            return Err(RuntimeError::duplicate(format!(
                "CONST {name} cannot be assigned"
            )));
        }
        if let Some(cell) = self.find_scalar(name) {
            let coerced = value.coerce_like(&cell.borrow(), records)?;
            *cell.borrow_mut() = coerced;
            return Ok(());
        }
        let ty = name_type(name, defaults);
        let coerced = value.coerce_to(ty)?;
        self.top().scalars.insert(name.to_string(), new_cell(coerced));
        Ok(())
    }

    /// Declare a scalar with an explicit element type (DIM … AS …).
    pub fn declare_scalar(
        &mut self,
        name: &str,
        elem: ElemType,
        records: &RecordTable,
    ) -> Result<Cell> {
        if self.find_scalar(name).is_some() {
            return Err(RuntimeError::duplicate(format!("variable {name}")));
        }
        let cell = new_cell(Value::zero_of(elem, records));
        self.top().scalars.insert(name.to_string(), cell.clone());
        Ok(cell)
    }

    /// Bind a caller-provided cell as a local (by-reference parameter).
    pub fn bind_scalar(&mut self, name: &str, cell: Cell) {
        self.top().scalars.insert(name.to_string(), cell);
    }

    // ----- arrays -----

    pub fn find_array(&self, name: &str) -> Option<ArrayCell> {
        let frame = self.frames.last().unwrap();
        if let Some(arr) = frame.arrays.get(name) {
            return Some(arr.clone());
        }
        if let Some(arr) = frame.shared_arrays.get(name) {
            return Some(arr.clone());
        }
        if self.frames.len() > 1 && self.module_shared.contains(name) {
            if let Some(arr) = self.global().arrays.get(name) {
                return Some(arr.clone());
            }
        }
        None
    }

    pub fn insert_array(&mut self, name: &str, array: BasicArray) -> Result<ArrayCell> {
        if self.find_array(name).is_some() {
            return Err(RuntimeError::duplicate(format!("array {name}")));
        }
        let cell = Rc::new(RefCell::new(array));
        self.top().arrays.insert(name.to_string(), cell.clone());
        self.bump();
        Ok(cell)
    }

    pub fn bind_array(&mut self, name: &str, cell: ArrayCell) {
        self.top().arrays.insert(name.to_string(), cell);
        self.bump();
    }

    pub fn erase_array(&mut self, name: &str) -> Result<()> {
        for frame in self.frames.iter_mut().rev() {
            if frame.arrays.remove(name).is_some() || frame.shared_arrays.remove(name).is_some() {
                self.bump();
                return Ok(());
            }
        }
        Err(RuntimeError::undefined(format!("array {name}")))
    }

    // ----- SHARED / STATIC plumbing -----

    /// Mark a module-level name as visible to all procedures (DIM SHARED).
    pub fn mark_module_shared(&mut self, name: &str) {
        self.module_shared.insert(name.to_string());
        self.bump();
    }

    /// `SHARED x, a()` inside a procedure: alias the module-scope cell into
    /// the current frame, creating the module cell if it does not exist yet.
    pub fn install_shared(
        &mut self,
        name: &str,
        is_array: bool,
        defaults: &DefaultTypes,
    ) -> Result<()> {
        if is_array {
            let cell = match self.global().arrays.get(name) {
                Some(c) => c.clone(),
                None => {
                    // Array not dimensioned yet; alias appears once DIM runs
                    return Ok(());
                }
            };
            self.top().shared_arrays.insert(name.to_string(), cell);
        } else {
            let cell = match self.global().scalars.get(name) {
                Some(c) => c.clone(),
                None => {
                    let ty = name_type(name, defaults);
                    let cell = new_cell(Value::zero(ty));
                    self.global_mut()
                        .scalars
                        .insert(name.to_string(), cell.clone());
                    cell
                }
            };
            self.top().shared_scalars.insert(name.to_string(), cell);
        }
        self.bump();
        Ok(())
    }

    /// Bind a STATIC local from the procedure's persistent pool, creating
    /// the pooled cell on first use.
    pub fn install_static(
        &mut self,
        proc: ProcId,
        name: &str,
        elem: ElemType,
        records: &RecordTable,
    ) {
        let pool = self.statics.entry(proc).or_default();
        let cell = pool
            .scalars
            .entry(name.to_string())
            .or_insert_with(|| new_cell(Value::zero_of(elem, records)))
            .clone();
        let frame = self.frames.last_mut().unwrap();
        frame.scalars.insert(name.to_string(), cell);
        frame.statics.insert(name.to_string());
    }

    pub fn install_static_array(
        &mut self,
        proc: ProcId,
        name: &str,
        array: BasicArray,
    ) -> ArrayCell {
        let pool = self.statics.entry(proc).or_default();
        let cell = pool
            .arrays
            .entry(name.to_string())
            .or_insert_with(|| Rc::new(RefCell::new(array)))
            .clone();
        let frame = self.frames.last_mut().unwrap();
        frame.arrays.insert(name.to_string(), cell.clone());
        frame.statics.insert(name.to_string());
        self.bump();
        cell
    }

    /// Temporarily rebind a top-frame local (DEF FN parameter binding);
    /// returns the previous cell for restoration.
    pub fn swap_local(&mut self, name: &str, cell: Option<Cell>) -> Option<Cell> {
        let frame = self.frames.last_mut().unwrap();
        match cell {
            Some(c) => frame.scalars.insert(name.to_string(), c),
            None => frame.scalars.remove(name),
        }
    }

    /// For a `SUB … STATIC` procedure: persist every local created during
    /// this invocation into the procedure's pool on exit.
    pub fn extract_frame_to_pool(&mut self, proc: ProcId) {
        let frame = self.frames.last_mut().unwrap();
        let scalars = std::mem::take(&mut frame.scalars);
        let arrays = std::mem::take(&mut frame.arrays);
        let pool = self.statics.entry(proc).or_default();
        for (name, cell) in scalars {
            pool.scalars.insert(name, cell);
        }
        for (name, cell) in arrays {
            pool.arrays.insert(name, cell);
        }
    }

    /// For a `SUB … STATIC` procedure: rebind every pooled local on entry.
    pub fn preload_frame_from_pool(&mut self, proc: ProcId) {
        let Some(pool) = self.statics.get(&proc) else {
            return;
        };
        let scalars: Vec<(String, Cell)> = pool
            .scalars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let arrays: Vec<(String, ArrayCell)> = pool
            .arrays
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let frame = self.frames.last_mut().unwrap();
        for (name, cell) in scalars {
            frame.scalars.entry(name.clone()).or_insert(cell);
            frame.statics.insert(name);
        }
        for (name, cell) in arrays {
            frame.arrays.entry(name.clone()).or_insert(cell);
            frame.statics.insert(name);
        }
    }

    pub fn has_static(&self, proc: ProcId, name: &str) -> bool {
        self.statics
            .get(&proc)
            .is_some_and(|p| p.scalars.contains_key(name) || p.arrays.contains_key(name))
    }

    /// `CLEAR`: every frame above module scope is dropped, module scope and
    /// STATIC pools reset. Constants survive (they are bindings, not cells).
    pub fn clear(&mut self) {
        self.frames.truncate(1);
        self.frames[0] = Frame::default();
        self.statics.clear();
        self.module_shared.clear();
        self.bump();
    }
}

/// Walk a record value down a field path, immutably.
pub fn field_path<'a>(
    mut value: &'a Value,
    fields: &[String],
    records: &RecordTable,
) -> Result<&'a Value> {
    for field in fields {
        match value {
            Value::Record(id, cells) => {
                let (idx, _) = records
                    .layout(*id)
                    .field(field)
                    .ok_or_else(|| RuntimeError::undefined(format!("field {field}")))?;
                value = &cells[idx];
            }
            _ => return Err(RuntimeError::type_mismatch(format!("{field} of a non-record"))),
        }
    }
    Ok(value)
}

/// Walk a record value down a field path and assign, honoring fixed-length
/// string fields (space-padded / truncated).
pub fn assign_field_path(
    target: &mut Value,
    fields: &[String],
    value: &Value,
    records: &RecordTable,
) -> Result<()> {
    let mut slot = target;
    let mut elem = None;
    for field in fields {
        match slot {
            Value::Record(id, cells) => {
                let (idx, fty) = records
                    .layout(*id)
                    .field(field)
                    .ok_or_else(|| RuntimeError::undefined(format!("field {field}")))?;
                elem = Some(fty);
                slot = &mut cells[idx];
            }
            _ => return Err(RuntimeError::type_mismatch(format!("{field} of a non-record"))),
        }
    }
    *slot = match elem {
        Some(ElemType::FixedStr(n)) => Value::Str(fit_fixed(value.as_str()?, n as usize)),
        Some(ElemType::Scalar(ty)) => value.coerce_to(ty)?,
        Some(ElemType::Record(_)) | None => value.coerce_like(slot, records)?,
    };
    Ok(())
}

/// Pad with trailing spaces or truncate to exactly `n` BASIC bytes.
pub fn fit_fixed(s: &str, n: usize) -> String {
    let mut out: String = s.chars().take(n).collect();
    let len = out.chars().count();
    for _ in len..n {
        out.push(' ');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use qb_lang::types::ScalarType;

    fn defaults() -> DefaultTypes {
        DefaultTypes::default()
    }

    fn records() -> RecordTable {
        RecordTable::default()
    }

    #[test]
    fn test_create_on_first_write() {
        let mut store = VarStore::default();
        store
            .write_scalar("X%", &Value::Single(2.9), &defaults(), &records())
            .unwrap();
        // Narrowing truncates toward zero
        assert_eq!(store.read_scalar("X%", &defaults()), Value::Integer(2));
        // Unresolved read is the sigil zero, no cell created
        assert_eq!(store.read_scalar("Y$", &defaults()), Value::Str("".into()));
        assert!(store.find_scalar("Y$").is_none());
    }

    #[test]
    fn test_sigil_names_are_distinct() {
        let mut store = VarStore::default();
        store
            .write_scalar("N", &Value::Single(1.5), &defaults(), &records())
            .unwrap();
        store
            .write_scalar("N%", &Value::Integer(7), &defaults(), &records())
            .unwrap();
        assert_eq!(store.read_scalar("N", &defaults()), Value::Single(1.5));
        assert_eq!(store.read_scalar("N%", &defaults()), Value::Integer(7));
    }

    #[test]
    fn test_proc_frame_isolation() {
        let mut store = VarStore::default();
        store
            .write_scalar("A", &Value::Single(1.0), &defaults(), &records())
            .unwrap();
        store.push_frame(0);
        assert_eq!(store.read_scalar("A", &defaults()), Value::Single(0.0));
        store
            .write_scalar("A", &Value::Single(5.0), &defaults(), &records())
            .unwrap();
        store.pop_frame();
        assert_eq!(store.read_scalar("A", &defaults()), Value::Single(1.0));
    }

    #[test]
    fn test_shared_aliases_module_cell() {
        let mut store = VarStore::default();
        store
            .write_scalar("SCORE", &Value::Single(10.0), &defaults(), &records())
            .unwrap();
        store.push_frame(0);
        store
            .install_shared("SCORE", false, &defaults())
            .unwrap();
        store
            .write_scalar("SCORE", &Value::Single(99.0), &defaults(), &records())
            .unwrap();
        store.pop_frame();
        assert_eq!(store.read_scalar("SCORE", &defaults()), Value::Single(99.0));
    }

    #[test]
    fn test_module_shared_visible_in_proc() {
        let mut store = VarStore::default();
        store
            .write_scalar("LIVES", &Value::Single(3.0), &defaults(), &records())
            .unwrap();
        store.mark_module_shared("LIVES");
        store.push_frame(0);
        assert_eq!(store.read_scalar("LIVES", &defaults()), Value::Single(3.0));
        store
            .write_scalar("LIVES", &Value::Single(2.0), &defaults(), &records())
            .unwrap();
        store.pop_frame();
        assert_eq!(store.read_scalar("LIVES", &defaults()), Value::Single(2.0));
    }

    #[test]
    fn test_static_survives_invocations() {
        let mut store = VarStore::default();
        store.push_frame(3);
        store.install_static(3, "COUNT", ElemType::Scalar(ScalarType::Single), &records());
        store
            .write_scalar("COUNT", &Value::Single(1.0), &defaults(), &records())
            .unwrap();
        store.pop_frame();
        store.push_frame(3);
        store.install_static(3, "COUNT", ElemType::Scalar(ScalarType::Single), &records());
        assert_eq!(store.read_scalar("COUNT", &defaults()), Value::Single(1.0));
        store.pop_frame();
        // Not visible outside the owning procedure
        assert_eq!(store.read_scalar("COUNT", &defaults()), Value::Single(0.0));
    }

    #[test]
    fn test_const_immutable() {
        let mut store = VarStore::default();
        store.define_const("MAX", Value::Integer(10)).unwrap();
        assert!(store.define_const("MAX", Value::Integer(11)).is_err());
        assert!(store
            .write_scalar("MAX", &Value::Integer(5), &defaults(), &records())
            .is_err());
        assert_eq!(store.read_scalar("MAX", &defaults()), Value::Integer(10));
    }

    #[test]
    fn test_clear_resets() {
        let mut store = VarStore::default();
        store
            .write_scalar("X", &Value::Single(5.0), &defaults(), &records())
            .unwrap();
        store.define_const("K", Value::Integer(1)).unwrap();
        let before = store.fingerprint();
        store.clear();
        assert_eq!(store.read_scalar("X", &defaults()), Value::Single(0.0));
        assert_eq!(store.read_scalar("K", &defaults()), Value::Integer(1));
        assert!(store.fingerprint() > before);
    }

    #[test]
    fn test_fit_fixed() {
        assert_eq!(fit_fixed("ab", 4), "ab  ");
        assert_eq!(fit_fixed("abcdef", 4), "abcd");
    }
}
