//! Structural indexer
//!
//! One pass over the loaded source builds the immutable [`Program`]: label
//! and line-number tables (module-level and per-procedure), SUB/FUNCTION
//! boundaries with parameter lists, the DECLARE table, TYPE layouts, CONST
//! bindings, the DATA pool with per-line offsets, OPTION BASE, DEFtype
//! ranges, and the `$STATIC`/`$DYNAMIC` state per line. Execution never
//! re-parses any of this.

use std::collections::HashMap;

use crate::error::{Result, RuntimeError};
use crate::expr::Expr;
use crate::source::{Directive, SourceProgram};
use crate::stmt::{self, Param, Stmt, Target};
use crate::token::{tokenize, Tok};
use crate::types::{
    name_type, DefaultTypes, ElemType, RecordLayout, RecordTable, ScalarType,
};

/// Procedure index in [`Program::procedures`].
pub type ProcId = u16;

#[derive(Debug, Clone)]
pub struct Procedure {
    pub name: String,
    pub is_function: bool,
    pub params: Vec<Param>,
    pub is_static: bool,
    /// Line index of the SUB/FUNCTION header.
    pub header_line: usize,
    /// Line index of the END SUB/END FUNCTION line.
    pub end_line: usize,
    /// Labels local to the body, line index keyed by normalized name.
    pub labels: HashMap<String, usize>,
    /// Classic line numbers local to the body.
    pub line_numbers: HashMap<u32, usize>,
    /// FUNCTION return type per sigil/DEFtype at the header.
    pub return_type: ScalarType,
}

/// A CONST binding in definition order; the runtime folds these at startup.
#[derive(Debug, Clone)]
pub struct ConstDef {
    pub name: String,
    pub expr: Expr,
    pub line: usize,
}

/// The immutable program artifact.
#[derive(Debug, Clone)]
pub struct Program {
    pub source: SourceProgram,
    pub labels: HashMap<String, usize>,
    pub line_numbers: HashMap<u32, usize>,
    pub procedures: Vec<Procedure>,
    pub proc_by_name: HashMap<String, ProcId>,
    /// DECLAREd procedures: name → parameter list.
    pub declares: HashMap<String, Vec<Param>>,
    pub records: RecordTable,
    pub consts: Vec<ConstDef>,
    /// Flat DATA pool in source order, raw item text (quotes removed).
    pub data_pool: Vec<String>,
    /// Pool length before each line; `RESTORE target` resolves through this.
    pub pool_offset_by_line: Vec<usize>,
    /// Owning procedure for each line (header and END lines included).
    pub line_owner: Vec<Option<ProcId>>,
    /// Whether `$DYNAMIC` was in effect at each line.
    pub dynamic_at_line: Vec<bool>,
    pub option_base: u8,
    pub defaults: DefaultTypes,
}

impl Program {
    pub fn display_line(&self, index: usize) -> u32 {
        self.source.display_line(index)
    }

    pub fn procedure(&self, id: ProcId) -> &Procedure {
        &self.procedures[id as usize]
    }

    pub fn find_procedure(&self, name: &str) -> Option<ProcId> {
        self.proc_by_name.get(&name.to_ascii_uppercase()).copied()
    }

    /// Resolve a GOTO/GOSUB/RESTORE/RUN target to a line index. Inside a
    /// procedure its own labels win; module labels remain reachable for
    /// GOTO but not for GOSUB.
    pub fn resolve_target(
        &self,
        target: &Target,
        proc: Option<ProcId>,
        gosub: bool,
    ) -> Result<usize> {
        if let Some(id) = proc {
            let p = self.procedure(id);
            let hit = match target {
                Target::Label(name) => p.labels.get(name).copied(),
                Target::Line(n) => p.line_numbers.get(n).copied(),
            };
            if let Some(line) = hit {
                return Ok(line);
            }
            if gosub {
                return Err(RuntimeError::undefined(format!(
                    "label {} not found in procedure {}",
                    target_name(target),
                    p.name
                )));
            }
        }
        match target {
            Target::Label(name) => self.labels.get(name).copied(),
            Target::Line(n) => self.line_numbers.get(n).copied(),
        }
        .ok_or_else(|| {
            RuntimeError::undefined(format!("label {} not defined", target_name(target)))
        })
    }

    /// Pool offset for `RESTORE [target]`.
    pub fn data_offset_for(&self, target: Option<&Target>, proc: Option<ProcId>) -> Result<usize> {
        match target {
            None => Ok(0),
            Some(t) => {
                let line = self.resolve_target(t, proc, false)?;
                Ok(self.pool_offset_by_line[line])
            }
        }
    }
}

fn target_name(target: &Target) -> String {
    match target {
        Target::Label(name) => name.clone(),
        Target::Line(n) => n.to_string(),
    }
}

/// Build the structural index. Fails on duplicate labels/procedures,
/// unterminated SUB/FUNCTION/TYPE, and malformed structural statements.
pub fn index_program(source: SourceProgram) -> Result<Program> {
    let line_count = source.lines.len();
    let mut labels = HashMap::new();
    let mut line_numbers = HashMap::new();
    let mut procedures: Vec<Procedure> = Vec::new();
    let mut proc_by_name = HashMap::new();
    let mut declares = HashMap::new();
    let mut records = RecordTable::default();
    let mut consts = Vec::new();
    let mut data_pool = Vec::new();
    let mut pool_offset_by_line = Vec::with_capacity(line_count + 1);
    let mut line_owner = vec![None; line_count];
    let mut dynamic_at_line = Vec::with_capacity(line_count);
    let mut option_base = 0u8;
    let mut defaults = DefaultTypes::default();

    let mut dynamic = false;
    let mut open_proc: Option<Procedure> = None;
    let mut open_type: Option<(String, Vec<(String, ElemType)>, usize)> = None;

    for (idx, line) in source.lines.iter().enumerate() {
        let err_line = source.display_line(idx);
        if let Some(d) = line.directive {
            dynamic = d == Directive::DynamicArrays;
        }
        dynamic_at_line.push(dynamic);
        pool_offset_by_line.push(data_pool.len());

        if let Some(p) = open_proc.as_mut() {
            line_owner[idx] = Some(procedures.len() as ProcId);
            if let Some(label) = &line.label {
                if p.labels.insert(label.clone(), idx).is_some() {
                    return Err(
                        RuntimeError::duplicate(format!("label {label}")).at_line(err_line)
                    );
                }
            }
            if let Some(n) = line.number {
                if p.line_numbers.insert(n, idx).is_some() {
                    return Err(RuntimeError::duplicate(format!("line {n}")).at_line(err_line));
                }
            }
        } else {
            if let Some(label) = &line.label {
                if labels.insert(label.clone(), idx).is_some() {
                    return Err(
                        RuntimeError::duplicate(format!("label {label}")).at_line(err_line)
                    );
                }
            }
            if let Some(n) = line.number {
                if line_numbers.insert(n, idx).is_some() {
                    return Err(RuntimeError::duplicate(format!("line {n}")).at_line(err_line));
                }
            }
        }

        for seg in &line.statements {
            let text = seg.text.as_str();

            // TYPE bodies are field declarations, not statements
            if let Some((name, fields, _)) = open_type.as_mut() {
                if starts_with_keyword(text, "END") && second_word_is(text, "TYPE") {
                    let layout = RecordLayout {
                        name: name.clone(),
                        fields: std::mem::take(fields),
                    };
                    records.define(layout).map_err(|e| e.at_line(err_line))?;
                    open_type = None;
                } else {
                    let field =
                        parse_type_field(text, &records).map_err(|e| e.at_line(err_line))?;
                    fields.push(field);
                }
                continue;
            }

            let head = first_word(text).map(|w| w.to_ascii_uppercase());
            match head.as_deref() {
                Some("DATA") => {
                    let tail_at = text.find(|c: char| c.is_whitespace()).unwrap_or(text.len());
                    harvest_data(&text[tail_at..], &mut data_pool);
                }
                Some("TYPE") => {
                    let name = text.trim_start()[4..].trim().to_ascii_uppercase();
                    if name.is_empty() || !name.chars().next().unwrap().is_ascii_alphabetic() {
                        return Err(
                            RuntimeError::syntax("TYPE needs a name").at_line(err_line)
                        );
                    }
                    open_type = Some((name, Vec::new(), idx));
                }
                Some("SUB") | Some("FUNCTION") => {
                    if open_proc.is_some() {
                        return Err(RuntimeError::syntax(
                            "SUB/FUNCTION cannot nest",
                        )
                        .at_line(err_line));
                    }
                    let parsed = stmt::parse_statement(text).map_err(|e| e.at_line(err_line))?;
                    if let Stmt::ProcStart {
                        is_function,
                        name,
                        params,
                        is_static,
                    } = parsed
                    {
                        if proc_by_name.contains_key(&name) {
                            return Err(RuntimeError::duplicate(format!(
                                "procedure {name}"
                            ))
                            .at_line(err_line));
                        }
                        line_owner[idx] = Some(procedures.len() as ProcId);
                        let return_type = name_type(&name, &defaults);
                        open_proc = Some(Procedure {
                            name,
                            is_function,
                            params,
                            is_static,
                            header_line: idx,
                            end_line: idx,
                            labels: HashMap::new(),
                            line_numbers: HashMap::new(),
                            return_type,
                        });
                    }
                }
                Some("END") if second_word_is(text, "SUB") || second_word_is(text, "FUNCTION") => {
                    let mut p = open_proc.take().ok_or_else(|| {
                        RuntimeError::block_mismatch("END SUB outside a procedure")
                            .at_line(err_line)
                    })?;
                    p.end_line = idx;
                    line_owner[idx] = Some(procedures.len() as ProcId);
                    proc_by_name.insert(p.name.clone(), procedures.len() as ProcId);
                    procedures.push(p);
                }
                Some("DECLARE") => {
                    if let Some((name, params)) = parse_declare(text)? {
                        declares.insert(name, params);
                    }
                }
                Some("CONST") => {
                    if let Stmt::Const { bindings } =
                        stmt::parse_statement(text).map_err(|e| e.at_line(err_line))?
                    {
                        for (name, expr) in bindings {
                            consts.push(ConstDef {
                                name,
                                expr,
                                line: idx,
                            });
                        }
                    }
                }
                Some("OPTION") => {
                    if let Stmt::OptionBase(base) =
                        stmt::parse_statement(text).map_err(|e| e.at_line(err_line))?
                    {
                        option_base = base;
                    }
                }
                Some("DEFINT") | Some("DEFLNG") | Some("DEFSNG") | Some("DEFDBL")
                | Some("DEFSTR") => {
                    if let Stmt::DefType { ty, ranges } =
                        stmt::parse_statement(text).map_err(|e| e.at_line(err_line))?
                    {
                        for (from, to) in ranges {
                            defaults.set_range(from, to, ty);
                        }
                    }
                }
                _ => {}
            }
        }
    }
    pool_offset_by_line.push(data_pool.len());

    if let Some(p) = open_proc {
        return Err(RuntimeError::block_mismatch(format!(
            "{} {} has no END",
            if p.is_function { "FUNCTION" } else { "SUB" },
            p.name
        ))
        .at_line(source.display_line(p.header_line)));
    }
    if let Some((name, _, line)) = open_type {
        return Err(RuntimeError::block_mismatch(format!("TYPE {name} has no END TYPE"))
            .at_line(source.display_line(line)));
    }

    Ok(Program {
        source,
        labels,
        line_numbers,
        procedures,
        proc_by_name,
        declares,
        records,
        consts,
        data_pool,
        pool_offset_by_line,
        line_owner,
        dynamic_at_line,
        option_base,
        defaults,
    })
}

fn first_word(text: &str) -> Option<&str> {
    let trimmed = text.trim_start();
    let end = trimmed
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '$'))
        .unwrap_or(trimmed.len());
    (end > 0 && trimmed.chars().next().unwrap().is_ascii_alphabetic())
        .then(|| &trimmed[..end])
}

fn word_eq(word: &str, upper: &str) -> bool {
    word.eq_ignore_ascii_case(upper)
}

fn second_word_is(text: &str, upper: &str) -> bool {
    let trimmed = text.trim_start();
    let rest = trimmed
        .trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '$')
        .trim_start();
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '$'))
        .unwrap_or(rest.len());
    rest[..end].eq_ignore_ascii_case(upper)
}

fn starts_with_keyword(text: &str, upper: &str) -> bool {
    first_word(text).is_some_and(|w| word_eq(w, upper))
}

/// DATA items: comma-separated, quotes optional, raw text kept for READ to
/// coerce against the destination type.
fn harvest_data(tail: &str, pool: &mut Vec<String>) {
    let bytes = tail.as_bytes();
    let mut items = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    for (i, b) in bytes.iter().enumerate() {
        match *b {
            b'"' => in_string = !in_string,
            b',' if !in_string => {
                items.push(&tail[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&tail[start..]);
    for item in items {
        let trimmed = item.trim();
        let cleaned = if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
            trimmed[1..trimmed.len() - 1].to_string()
        } else {
            trimmed.to_string()
        };
        pool.push(cleaned);
    }
}

/// `fieldname AS type` / `fieldname AS STRING * n` inside a TYPE block.
fn parse_type_field(text: &str, records: &RecordTable) -> Result<(String, ElemType)> {
    let tokens = tokenize(text)?;
    let mut cur = crate::expr::TokenCursor::new(&tokens);
    let name = cur.expect_ident("field name")?;
    if !cur.eat_word("AS") {
        return Err(RuntimeError::syntax(format!(
            "TYPE field needs AS: {text:?}"
        )));
    }
    let ty_word = cur.expect_ident("field type")?;
    let elem = if ty_word == "STRING" && cur.eat(&Tok::Star) {
        match cur.next() {
            Some(Tok::Num(crate::token::NumLit::Integer(n))) if *n > 0 => {
                ElemType::FixedStr(*n as u16)
            }
            _ => return Err(RuntimeError::syntax("STRING * needs a positive length")),
        }
    } else if let Some(scalar) = ScalarType::from_keyword(&ty_word) {
        ElemType::Scalar(scalar)
    } else if let Some(id) = records.lookup(&ty_word) {
        ElemType::Record(id)
    } else {
        return Err(RuntimeError::undefined(format!("type {ty_word}")));
    };
    Ok((name, elem))
}

/// `DECLARE SUB name (params)` / `DECLARE FUNCTION name (params)`.
fn parse_declare(text: &str) -> Result<Option<(String, Vec<Param>)>> {
    let tokens = tokenize(text)?;
    let mut cur = crate::expr::TokenCursor::new(&tokens);
    cur.next(); // DECLARE
    if !(cur.eat_word("SUB") || cur.eat_word("FUNCTION")) {
        return Ok(None);
    }
    let rest: Vec<_> = tokens[cur.pos()..].to_vec();
    let mut cur = crate::expr::TokenCursor::new(&rest);
    let name = cur.expect_ident("procedure name")?;
    let mut params = Vec::new();
    if cur.eat(&Tok::LParen) && !cur.eat(&Tok::RParen) {
        loop {
            let pname = cur.expect_ident("parameter name")?;
            let mut is_array = false;
            if cur.eat(&Tok::LParen) {
                cur.expect(&Tok::RParen, ")")?;
                is_array = true;
            }
            let ty = if cur.eat_word("AS") {
                let word = cur.expect_ident("type")?;
                match ScalarType::from_keyword(&word) {
                    Some(s) => Some(stmt::TypeRef::Scalar(s)),
                    None => Some(stmt::TypeRef::Record(word)),
                }
            } else {
                None
            };
            params.push(Param {
                name: pname,
                ty,
                is_array,
            });
            if cur.eat(&Tok::RParen) {
                break;
            }
            cur.expect(&Tok::Comma, ", or )")?;
        }
    }
    Ok(Some((name, params)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(src: &str) -> Program {
        index_program(SourceProgram::parse(src)).unwrap()
    }

    #[test]
    fn test_labels_and_line_numbers() {
        let p = index("start:\nPRINT 1\n100 PRINT 2\nGOTO start");
        assert_eq!(p.labels.get("START"), Some(&0));
        assert_eq!(p.line_numbers.get(&100), Some(&2));
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let err = index_program(SourceProgram::parse("a:\na:\n")).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::DuplicateDefinition);
    }

    #[test]
    fn test_procedure_boundaries() {
        let p = index("PRINT 1\nSUB greet (name$)\nPRINT name$\nEND SUB\nPRINT 2");
        assert_eq!(p.procedures.len(), 1);
        let proc = &p.procedures[0];
        assert_eq!(proc.name, "GREET");
        assert_eq!(proc.header_line, 1);
        assert_eq!(proc.end_line, 3);
        assert_eq!(p.line_owner[2], Some(0));
        assert_eq!(p.line_owner[0], None);
        assert_eq!(p.line_owner[4], None);
    }

    #[test]
    fn test_proc_local_labels() {
        let p = index("top:\nSUB s\nloop1:\nGOTO loop1\nEND SUB");
        let proc = &p.procedures[0];
        assert!(proc.labels.contains_key("LOOP1"));
        assert!(!p.labels.contains_key("LOOP1"));
        // Proc labels resolve inside the proc; module labels via GOTO only
        assert!(p
            .resolve_target(&Target::Label("LOOP1".into()), Some(0), true)
            .is_ok());
        assert!(p
            .resolve_target(&Target::Label("TOP".into()), Some(0), false)
            .is_ok());
        assert!(p
            .resolve_target(&Target::Label("TOP".into()), Some(0), true)
            .is_err());
    }

    #[test]
    fn test_data_pool_and_restore_offsets() {
        let p = index("DATA 1, 2, \"three, four\"\nmore:\nDATA 5\nREAD x");
        assert_eq!(
            p.data_pool,
            vec!["1".to_string(), "2".into(), "three, four".into(), "5".into()]
        );
        let off = p
            .data_offset_for(Some(&Target::Label("MORE".into())), None)
            .unwrap();
        assert_eq!(off, 3);
    }

    #[test]
    fn test_type_layout() {
        let p = index("TYPE Score\nname AS STRING * 8\npoints AS LONG\nEND TYPE");
        let id = p.records.lookup("score").unwrap();
        let layout = p.records.layout(id);
        assert_eq!(layout.fields.len(), 2);
        assert_eq!(layout.fields[0].1, ElemType::FixedStr(8));
    }

    #[test]
    fn test_const_and_option_base() {
        let p = index("OPTION BASE 1\nCONST PI = 3.14159, N = 10");
        assert_eq!(p.option_base, 1);
        assert_eq!(p.consts.len(), 2);
        assert_eq!(p.consts[0].name, "PI");
    }

    #[test]
    fn test_dynamic_directive_tracking() {
        let p = index("DIM a(5)\n' $DYNAMIC\nDIM b(5)");
        assert!(!p.dynamic_at_line[0]);
        assert!(p.dynamic_at_line[2]);
    }

    #[test]
    fn test_declare_table() {
        let p = index("DECLARE SUB bump (x AS INTEGER, arr())");
        let params = p.declares.get("BUMP").unwrap();
        assert_eq!(params.len(), 2);
        assert!(params[1].is_array);
    }

    #[test]
    fn test_unterminated_sub_rejected() {
        let err = index_program(SourceProgram::parse("SUB s\nPRINT 1")).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::BlockMismatch);
    }

    #[test]
    fn test_deftype_applies_to_function_return() {
        let p = index("DEFINT A-Z\nFUNCTION add2 (a, b)\nadd2 = a + b\nEND FUNCTION");
        assert_eq!(p.procedures[0].return_type, ScalarType::Integer);
    }
}
