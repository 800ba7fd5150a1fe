//! Console and file I/O statements
//!
//! PRINT (zones, TAB/SPC, USING), WRITE, INPUT/LINE INPUT from keyboard and
//! files, READ from the DATA pool, and the OPEN/CLOSE/GET/PUT/SEEK family.
//! Record values serialize to the little-endian layouts the `MK…$`/`CV…`
//! codecs use, so RANDOM-file records interoperate with string-codec code.

use qb_lang::error::{Result, RuntimeError};
use qb_lang::expr::Expr;
use qb_lang::stmt::{LValue, OpenMode, PrintItem, PrintStmt, Stmt};
use qb_lang::types::{name_type, ElemType, RecordTable, ScalarType};
use tracing::debug;

use super::{Flow, Interp};
use crate::files::{basic_to_bytes, bytes_to_basic};
use crate::host::FileOpenMode;
use crate::printer;
use crate::value::{number_text, Value};

impl<'h> Interp<'h> {
    /// Text sink shared by PRINT/WRITE: the surface, or an open file with
    /// its own column tracking for TAB and zones.
    fn emit(&mut self, file: Option<u16>, text: &str) -> Result<()> {
        match file {
            None => {
                self.host.surface().print(text);
                Ok(())
            }
            Some(h) => {
                let col = self.file_cols.entry(h).or_insert(1);
                for c in text.chars() {
                    if c == '\n' {
                        *col = 1;
                    } else {
                        *col += 1;
                    }
                }
                self.host.files().write_text(h, text)
            }
        }
    }

    fn out_col(&mut self, file: Option<u16>) -> u16 {
        match file {
            None => self.host.surface().cursor().1,
            Some(h) => *self.file_cols.get(&h).unwrap_or(&1),
        }
    }

    fn file_handle(&mut self, e: &Expr) -> Result<u16> {
        let h = self.eval_expr(e)?.as_i32()?;
        if (1..=255).contains(&h) {
            Ok(h as u16)
        } else {
            Err(RuntimeError::io(format!("bad file number {h}")).with_code(52))
        }
    }

    pub(super) fn exec_print(&mut self, p: &PrintStmt) -> Result<Flow> {
        let file = match &p.file {
            Some(e) => Some(self.file_handle(e)?),
            None => None,
        };

        if let Some(mask_expr) = &p.using {
            let mask = self.eval_expr(mask_expr)?.into_string()?;
            let mut values = Vec::new();
            for item in &p.items {
                if let PrintItem::Expr(e) = item {
                    values.push(self.eval_expr(e)?);
                }
            }
            let text = printer::print_using(&mask, &values)?;
            self.emit(file, &text)?;
            if !matches!(p.items.last(), Some(PrintItem::Semi | PrintItem::Comma)) {
                self.emit(file, "\n")?;
            }
            return Ok(Flow::Next);
        }

        for item in &p.items {
            match item {
                PrintItem::Semi => {}
                PrintItem::Comma => {
                    let col = self.out_col(file);
                    let pad = printer::zone_advance(col);
                    self.emit(file, &" ".repeat(pad))?;
                }
                PrintItem::Expr(e) => {
                    if let Some(text) = self.print_positioning(file, e)? {
                        self.emit(file, &text)?;
                        continue;
                    }
                    let v = self.eval_expr(e)?;
                    let text = printer::display(&v)?;
                    self.emit(file, &text)?;
                }
            }
        }
        if !matches!(p.items.last(), Some(PrintItem::Semi | PrintItem::Comma)) {
            self.emit(file, "\n")?;
        }
        Ok(Flow::Next)
    }

    /// `TAB(n)` / `SPC(n)` are positioning pseudo-items, only meaningful
    /// directly inside PRINT.
    fn print_positioning(&mut self, file: Option<u16>, e: &Expr) -> Result<Option<String>> {
        let Expr::NameArgs(name, args) = e else {
            return Ok(None);
        };
        match name.as_str() {
            "TAB" if args.len() == 1 => {
                let target = self.eval_expr(&args[0])?.as_i32()?;
                let col = self.out_col(file);
                Ok(Some(" ".repeat(printer::tab_advance(col, target))))
            }
            "SPC" if args.len() == 1 => {
                let n = self.eval_expr(&args[0])?.as_i32()?.max(0);
                Ok(Some(" ".repeat(n as usize)))
            }
            _ => Ok(None),
        }
    }

    pub(super) fn exec_write(&mut self, file: Option<&Expr>, items: &[Expr]) -> Result<Flow> {
        let file = match file {
            Some(e) => Some(self.file_handle(e)?),
            None => None,
        };
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            let v = self.eval_expr(item)?;
            parts.push(match &v {
                Value::Str(s) => format!("\"{s}\""),
                _ => number_text(&v),
            });
        }
        self.emit(file, &parts.join(","))?;
        self.emit(file, "\n")?;
        Ok(Flow::Next)
    }

    pub(super) fn exec_input(
        &mut self,
        file: Option<&Expr>,
        prompt: Option<&str>,
        question_mark: bool,
        vars: &[LValue],
    ) -> Result<Flow> {
        if let Some(h) = file {
            let handle = self.file_handle(h)?;
            for lv in vars {
                let token = self.host.files().read_token(handle)?;
                let value = if self.lvalue_is_string(lv)? {
                    Value::Str(token)
                } else {
                    parse_data_number(&token).unwrap_or(Value::Integer(0))
                };
                self.assign_lvalue(lv, value)?;
            }
            return Ok(Flow::Next);
        }

        loop {
            if let Some(text) = prompt {
                let text = text.to_string();
                self.emit(None, &text)?;
            }
            if question_mark {
                self.emit(None, "? ")?;
            }
            let Some(line) = self.host.input().read_line() else {
                return Err(RuntimeError::io("input stream closed"));
            };
            let fields = split_input_fields(&line);
            if fields.len() == vars.len()
                && let Some(values) = self.convert_input_fields(&fields, vars)?
            {
                for (lv, v) in vars.iter().zip(values) {
                    self.assign_lvalue(lv, v)?;
                }
                return Ok(Flow::Next);
            }
            self.emit(None, "Redo from start\n")?;
        }
    }

    /// All-or-nothing conversion; `None` asks for a redo.
    fn convert_input_fields(
        &mut self,
        fields: &[String],
        vars: &[LValue],
    ) -> Result<Option<Vec<Value>>> {
        let mut out = Vec::with_capacity(vars.len());
        for (field, lv) in fields.iter().zip(vars) {
            if self.lvalue_is_string(lv)? {
                out.push(Value::Str(field.clone()));
            } else {
                match parse_data_number(field) {
                    Some(v) => out.push(v),
                    None => return Ok(None),
                }
            }
        }
        Ok(Some(out))
    }

    pub(super) fn exec_line_input(
        &mut self,
        file: Option<&Expr>,
        prompt: Option<&str>,
        var: &LValue,
    ) -> Result<Flow> {
        let line = match file {
            Some(h) => {
                let handle = self.file_handle(h)?;
                self.host.files().read_line(handle)?
            }
            None => {
                if let Some(text) = prompt {
                    let text = text.to_string();
                    self.emit(None, &text)?;
                }
                self.host
                    .input()
                    .read_line()
                    .ok_or_else(|| RuntimeError::io("input stream closed"))?
            }
        };
        self.assign_lvalue(var, Value::Str(line))?;
        Ok(Flow::Next)
    }

    pub(super) fn exec_read(&mut self, vars: &[LValue]) -> Result<Flow> {
        let program = self.program.clone();
        for lv in vars {
            let item = self.data.next(&program)?.to_string();
            let value = if self.lvalue_is_string(lv)? {
                Value::Str(item)
            } else {
                parse_data_number(&item).ok_or_else(|| {
                    RuntimeError::syntax(format!("DATA item {item:?} is not numeric"))
                })?
            };
            self.assign_lvalue(lv, value)?;
        }
        Ok(Flow::Next)
    }

    /// Whether a READ/INPUT destination wants a string.
    fn lvalue_is_string(&mut self, lv: &LValue) -> Result<bool> {
        if !lv.fields.is_empty() {
            return Ok(matches!(self.eval_lvalue(lv)?, Value::Str(_)));
        }
        if !lv.indices.is_empty() {
            let arr = self.array_for(&lv.name, lv.indices.len())?;
            let elem = arr.borrow().elem;
            return Ok(matches!(
                elem,
                ElemType::Scalar(ScalarType::String) | ElemType::FixedStr(_)
            ));
        }
        if let Some(cell) = self.store.find_scalar(&lv.name) {
            return Ok(matches!(&*cell.borrow(), Value::Str(_)));
        }
        Ok(name_type(&lv.name, &self.program.defaults) == ScalarType::String)
    }

    // ----- file statements -----

    pub(super) fn exec_file_stmt(&mut self, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Open {
                path,
                mode,
                handle,
                rec_len,
            } => {
                let path = self.eval_expr(path)?.into_string()?;
                let handle = self.file_handle(handle)?;
                let rec_len = match rec_len {
                    Some(e) => Some(self.eval_expr(e)?.as_i32()?),
                    None => None,
                };
                let mode = match mode {
                    OpenMode::Input => FileOpenMode::Input,
                    OpenMode::Output => FileOpenMode::Output,
                    OpenMode::Append => FileOpenMode::Append,
                    OpenMode::Binary => FileOpenMode::Binary,
                    OpenMode::Random => FileOpenMode::Random(rec_len.unwrap_or(128) as u32),
                };
                self.host.files().open(&path, mode, handle)
            }
            Stmt::OpenShort {
                mode,
                handle,
                path,
                rec_len,
            } => {
                let mode_str = self.eval_expr(mode)?.into_string()?;
                let path = self.eval_expr(path)?.into_string()?;
                let handle = self.file_handle(handle)?;
                let rec_len = match rec_len {
                    Some(e) => Some(self.eval_expr(e)?.as_i32()?),
                    None => None,
                };
                let mode = match mode_str.trim().to_ascii_uppercase().chars().next() {
                    Some('I') => FileOpenMode::Input,
                    Some('O') => FileOpenMode::Output,
                    Some('A') => FileOpenMode::Append,
                    Some('B') => FileOpenMode::Binary,
                    Some('R') => FileOpenMode::Random(rec_len.unwrap_or(128) as u32),
                    _ => {
                        return Err(RuntimeError::io(format!("bad OPEN mode {mode_str:?}"))
                            .with_code(54));
                    }
                };
                self.host.files().open(&path, mode, handle)
            }
            Stmt::CloseStmt { handles } => {
                if handles.is_empty() {
                    self.host.files().close_all();
                    self.file_cols.clear();
                } else {
                    for h in handles.clone() {
                        let handle = self.file_handle(&h)?;
                        if self.host.files().is_open(handle) {
                            self.host.files().close(handle)?;
                        }
                        self.file_cols.remove(&handle);
                    }
                }
                Ok(())
            }
            Stmt::FileGet { handle, pos, var } => self.exec_file_get(handle, pos.as_ref(), var),
            Stmt::FilePut { handle, pos, var } => self.exec_file_put(handle, pos.as_ref(), var),
            Stmt::SeekStmt { handle, pos } => {
                let handle = self.file_handle(handle)?;
                let pos = self.eval_expr(pos)?.as_i32()? as i64;
                self.host.files().seek(handle, pos)
            }
            Stmt::Kill { path } => {
                let path = self.eval_expr(path)?.into_string()?;
                self.host.files().kill(&path)
            }
            Stmt::NameAs { from, to } => {
                let from = self.eval_expr(from)?.into_string()?;
                let to = self.eval_expr(to)?.into_string()?;
                self.host.files().rename(&from, &to)
            }
            Stmt::ChDir { path } => {
                let path = self.eval_expr(path)?.into_string()?;
                self.host.files().chdir(&path)
            }
            Stmt::MkDir { path } => {
                let path = self.eval_expr(path)?.into_string()?;
                self.host.files().mkdir(&path)
            }
            Stmt::RmDir { path } => {
                let path = self.eval_expr(path)?.into_string()?;
                self.host.files().rmdir(&path)
            }
            Stmt::FilesStmt { pattern } => {
                let pattern = match pattern {
                    Some(e) => self.eval_expr(e)?.into_string()?,
                    None => "*".to_string(),
                };
                let names = self.host.files().list(&pattern)?;
                for name in names {
                    self.emit(None, &name)?;
                    self.emit(None, "\n")?;
                }
                Ok(())
            }
            Stmt::Bload { path, offset } => {
                let path = self.eval_expr(path)?.into_string()?;
                if let Some(e) = offset {
                    self.eval_expr(e)?;
                }
                // No segment memory to land in; validate the image and log
                let payload = self.host.files().bload(&path)?;
                debug!(path, bytes = payload.len(), "BLOAD image read and discarded");
                Ok(())
            }
            Stmt::Bsave {
                path,
                offset,
                length,
            } => {
                let path = self.eval_expr(path)?.into_string()?;
                let offset = self.eval_expr(offset)?.as_i32()?;
                let length = self.eval_expr(length)?.as_i32()?.max(0);
                let payload = vec![0u8; length as usize];
                self.host
                    .files()
                    .bsave(&path, offset as u16, &payload)
            }
            _ => unreachable!("exec_file_stmt got a non-file statement"),
        }?;
        Ok(Flow::Next)
    }

    fn exec_file_get(
        &mut self,
        handle: &Expr,
        pos: Option<&Expr>,
        var: &Option<LValue>,
    ) -> Result<()> {
        let handle = self.file_handle(handle)?;
        let pos = match pos {
            Some(e) => Some(self.eval_expr(e)?.as_i32()? as i64),
            None => None,
        };
        let rec_len = self.host.files().record_len(handle)?;
        let Some(lv) = var else {
            // GET without a variable just advances a record
            if let Some(len) = rec_len {
                self.host.files().get_bytes(handle, pos, len as usize)?;
            }
            return Ok(());
        };
        let current = self.eval_lvalue(lv)?;
        let records = self.program.records.clone();
        let len = match (&current, rec_len) {
            (_, Some(len)) => len as usize,
            (Value::Str(s), None) => s.chars().count(),
            (v, None) => value_byte_size(v, &records)?,
        };
        let bytes = self.host.files().get_bytes(handle, pos, len)?;
        let value = match &current {
            Value::Str(_) => Value::Str(bytes_to_basic(&bytes)),
            Value::Record(id, _) => {
                let mut at = 0usize;
                deserialize_from(&bytes, &mut at, ElemType::Record(*id), &records)?
            }
            v => {
                let mut at = 0usize;
                let elem = ElemType::Scalar(v.scalar_type().unwrap());
                deserialize_from(&bytes, &mut at, elem, &records)?
            }
        };
        self.assign_lvalue(lv, value)
    }

    fn exec_file_put(
        &mut self,
        handle: &Expr,
        pos: Option<&Expr>,
        var: &Option<LValue>,
    ) -> Result<()> {
        let handle = self.file_handle(handle)?;
        let pos = match pos {
            Some(e) => Some(self.eval_expr(e)?.as_i32()? as i64),
            None => None,
        };
        let rec_len = self.host.files().record_len(handle)?;
        let Some(lv) = var else {
            return Err(RuntimeError::io("PUT needs a variable").with_code(54));
        };
        let value = self.eval_lvalue(lv)?;
        let records = self.program.records.clone();
        let mut bytes = match &value {
            Value::Str(s) => basic_to_bytes(s),
            Value::Record(id, _) => {
                let mut out = Vec::new();
                serialize_into(&value, ElemType::Record(*id), &records, &mut out)?;
                out
            }
            v => {
                let mut out = Vec::new();
                let elem = ElemType::Scalar(v.scalar_type().unwrap());
                serialize_into(v, elem, &records, &mut out)?;
                out
            }
        };
        if let Some(len) = rec_len {
            bytes.resize(len as usize, 0);
        }
        self.host.files().put_bytes(handle, pos, &bytes)
    }
}

/// Strict numeric parse for DATA/INPUT items: an optionally signed literal.
pub(crate) fn parse_data_number(item: &str) -> Option<Value> {
    let trimmed = item.trim();
    if trimmed.is_empty() {
        return Some(Value::Integer(0));
    }
    let tokens = qb_lang::token::tokenize(trimmed).ok()?;
    let (neg, lit) = match tokens.as_slice() {
        [t] => (false, t),
        [s, t] if s.tok == qb_lang::token::Tok::Minus => (true, t),
        [s, t] if s.tok == qb_lang::token::Tok::Plus => (false, t),
        _ => return None,
    };
    let v = match &lit.tok {
        qb_lang::token::Tok::Num(n) => match n {
            qb_lang::token::NumLit::Integer(x) => Value::Integer(*x),
            qb_lang::token::NumLit::Long(x) => Value::Long(*x),
            qb_lang::token::NumLit::Single(x) => Value::Single(*x),
            qb_lang::token::NumLit::Double(x) => Value::Double(*x),
        },
        _ => return None,
    };
    if neg { crate::value::neg(&v).ok() } else { Some(v) }
}

/// INPUT line → fields: commas split, double quotes protect.
fn split_input_fields(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_string = false;
    let mut quoted = false;
    for c in line.chars() {
        match c {
            '"' => {
                in_string = !in_string;
                quoted = true;
            }
            ',' if !in_string => {
                out.push(finish_field(&mut cur, &mut quoted));
            }
            _ => cur.push(c),
        }
    }
    out.push(finish_field(&mut cur, &mut quoted));
    out
}

fn finish_field(cur: &mut String, quoted: &mut bool) -> String {
    let field = if *quoted {
        std::mem::take(cur)
    } else {
        std::mem::take(cur).trim().to_string()
    };
    *quoted = false;
    field
}

/// Byte size of a value in a file record.
fn value_byte_size(v: &Value, records: &RecordTable) -> Result<usize> {
    Ok(match v {
        Value::Integer(_) => 2,
        Value::Long(_) | Value::Single(_) => 4,
        Value::Double(_) => 8,
        Value::Str(s) => s.chars().count(),
        Value::Record(id, fields) => {
            let layout = records.layout(*id);
            let mut size = 0;
            for ((_, elem), field) in layout.fields.iter().zip(fields) {
                size += match elem {
                    ElemType::FixedStr(n) => *n as usize,
                    _ => value_byte_size(field, records)?,
                };
            }
            size
        }
    })
}

fn serialize_into(
    v: &Value,
    elem: ElemType,
    records: &RecordTable,
    out: &mut Vec<u8>,
) -> Result<()> {
    match (elem, v) {
        (ElemType::Scalar(ScalarType::Integer), _) => {
            out.extend_from_slice(&v.as_i16()?.to_le_bytes());
        }
        (ElemType::Scalar(ScalarType::Long), _) => {
            out.extend_from_slice(&v.as_i32()?.to_le_bytes());
        }
        (ElemType::Scalar(ScalarType::Single), _) => {
            out.extend_from_slice(&(v.as_f64()? as f32).to_le_bytes());
        }
        (ElemType::Scalar(ScalarType::Double), _) => {
            out.extend_from_slice(&v.as_f64()?.to_le_bytes());
        }
        (ElemType::Scalar(ScalarType::String), Value::Str(s)) => {
            out.extend_from_slice(&basic_to_bytes(s));
        }
        (ElemType::FixedStr(n), Value::Str(s)) => {
            let mut bytes = basic_to_bytes(s);
            bytes.resize(n as usize, b' ');
            out.extend_from_slice(&bytes);
        }
        (ElemType::Record(id), Value::Record(vid, fields)) if id == *vid => {
            let layout = records.layout(id);
            for ((_, felem), field) in layout.fields.iter().zip(fields) {
                serialize_into(field, *felem, records, out)?;
            }
        }
        _ => {
            return Err(RuntimeError::type_mismatch(
                "value does not match its record layout",
            ));
        }
    }
    Ok(())
}

fn deserialize_from(
    bytes: &[u8],
    at: &mut usize,
    elem: ElemType,
    records: &RecordTable,
) -> Result<Value> {
    let need = |at: &usize, n: usize| -> Result<()> {
        if *at + n > bytes.len() {
            Err(RuntimeError::io("record shorter than its layout").with_code(63))
        } else {
            Ok(())
        }
    };
    Ok(match elem {
        ElemType::Scalar(ScalarType::Integer) => {
            need(at, 2)?;
            let v = i16::from_le_bytes([bytes[*at], bytes[*at + 1]]);
            *at += 2;
            Value::Integer(v)
        }
        ElemType::Scalar(ScalarType::Long) => {
            need(at, 4)?;
            let v = i32::from_le_bytes([bytes[*at], bytes[*at + 1], bytes[*at + 2], bytes[*at + 3]]);
            *at += 4;
            Value::Long(v)
        }
        ElemType::Scalar(ScalarType::Single) => {
            need(at, 4)?;
            let v = f32::from_le_bytes([bytes[*at], bytes[*at + 1], bytes[*at + 2], bytes[*at + 3]]);
            *at += 4;
            Value::Single(v)
        }
        ElemType::Scalar(ScalarType::Double) => {
            need(at, 8)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[*at..*at + 8]);
            *at += 8;
            Value::Double(f64::from_le_bytes(buf))
        }
        ElemType::Scalar(ScalarType::String) => {
            let v = bytes_to_basic(&bytes[*at..]);
            *at = bytes.len();
            Value::Str(v)
        }
        ElemType::FixedStr(n) => {
            need(at, n as usize)?;
            let v = bytes_to_basic(&bytes[*at..*at + n as usize]);
            *at += n as usize;
            Value::Str(v)
        }
        ElemType::Record(id) => {
            let layout = records.layout(id).clone();
            let mut fields = Vec::with_capacity(layout.fields.len());
            for (_, felem) in &layout.fields {
                fields.push(deserialize_from(bytes, at, *felem, records)?);
            }
            Value::Record(id, fields)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_number() {
        assert_eq!(parse_data_number("42"), Some(Value::Integer(42)));
        assert_eq!(parse_data_number("-1.5"), Some(Value::Single(-1.5)));
        assert_eq!(parse_data_number(""), Some(Value::Integer(0)));
        assert_eq!(parse_data_number("abc"), None);
        assert_eq!(parse_data_number("1 2"), None);
    }

    #[test]
    fn test_split_input_fields() {
        assert_eq!(split_input_fields("a, 2 ,c"), vec!["a", "2", "c"]);
        assert_eq!(
            split_input_fields("\"x, y\",3"),
            vec!["x, y".to_string(), "3".into()]
        );
    }

    #[test]
    fn test_record_round_trip() {
        let mut records = RecordTable::default();
        let id = records
            .define(qb_lang::types::RecordLayout {
                name: "SCORE".into(),
                fields: vec![
                    ("NAME".into(), ElemType::FixedStr(4)),
                    ("PTS".into(), ElemType::Scalar(ScalarType::Long)),
                ],
            })
            .unwrap();
        let v = Value::Record(
            id,
            vec![Value::Str("AB".into()), Value::Long(1234)],
        );
        let mut bytes = Vec::new();
        serialize_into(&v, ElemType::Record(id), &records, &mut bytes).unwrap();
        assert_eq!(bytes.len(), 8);
        let mut at = 0;
        let back = deserialize_from(&bytes, &mut at, ElemType::Record(id), &records).unwrap();
        match back {
            Value::Record(_, fields) => {
                assert_eq!(fields[0], Value::Str("AB  ".into()));
                assert_eq!(fields[1], Value::Long(1234));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
