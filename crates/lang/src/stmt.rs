//! Statement classification and parsing
//!
//! Each colon-separated segment classifies by its leading keyword(s) and
//! parses into a [`Stmt`]. Multi-word keywords (`END IF`, `LINE INPUT`,
//! `EXIT FOR`, `ON ERROR`, …) are recognized here.
//!
//! A single-line `IF` owns the rest of its source line: QBasic runs the
//! trailing colon segments as part of the THEN clause, so
//! [`parse_line_statement`] re-joins them and the executor skips to the next
//! line afterward. `ELSE` binding follows QBasic: each `ELSE` pairs with the
//! nearest unmatched single-line `IF`.

use crate::error::{Result, RuntimeError};
use crate::expr::{parse_expression, Expr, TokenCursor};
use crate::source::SourceLine;
use crate::token::{tokenize, Tok};
use crate::types::ScalarType;

/// Words that can never be labels or variable names in statement position.
const KEYWORDS: &[&str] = &[
    "AND", "AS", "BEEP", "BLOAD", "BSAVE", "CALL", "CASE", "CHDIR", "CIRCLE", "CLEAR", "CLOSE",
    "CLS", "COLOR", "COMMON", "CONST", "DATA", "DECLARE", "DEF", "DEFDBL", "DEFINT", "DEFLNG",
    "DEFSNG", "DEFSTR", "DIM", "DO", "DRAW", "ELSE", "ELSEIF", "END", "ERASE", "ERROR", "EXIT",
    "FIELD", "FILES", "FOR", "FUNCTION", "GET", "GOSUB", "GOTO", "IF", "INPUT", "KEY", "KILL",
    "LET", "LINE", "LOCATE", "LOOP", "LPRINT", "LSET", "MKDIR", "MOD", "NAME", "NEXT", "NOT",
    "ON", "OPEN", "OPTION", "OR", "OUT", "PAINT", "PALETTE", "PCOPY", "PEN", "PLAY", "POKE",
    "PRESET", "PRINT", "PSET", "PUT", "RANDOMIZE", "READ", "REDIM", "REM", "RESTORE", "RESUME",
    "RETURN", "RMDIR", "RSET", "RUN", "SCREEN", "SEEK", "SELECT", "SHARED", "SHELL", "SLEEP",
    "SOUND", "STATIC", "STEP", "STOP", "STRIG", "SUB", "SWAP", "SYSTEM", "THEN", "TIMER", "TO",
    "TROFF", "TRON", "TYPE", "UNTIL", "VIEW", "WAIT", "WEND", "WHILE", "WIDTH", "WINDOW",
    "WRITE", "XOR", "EQV", "IMP", "_DELAY",
];

pub fn is_keyword(word: &str) -> bool {
    let upper = word.to_ascii_uppercase();
    KEYWORDS.contains(&upper.as_str())
}

/// A jump target as written: label name or classic line number.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Label(String),
    Line(u32),
}

/// Assignment/READ/INPUT destination: name, optional subscripts, optional
/// field path after the subscripts. Dotted names without subscripts stay in
/// `name` and resolve at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct LValue {
    pub name: String,
    pub indices: Vec<Expr>,
    pub fields: Vec<String>,
}

/// Declared type in `AS` position.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeRef {
    Scalar(ScalarType),
    Record(String),
}

/// One declaration in DIM/REDIM/STATIC: `name(subscripts) AS type`.
#[derive(Debug, Clone, PartialEq)]
pub struct DimDecl {
    pub name: String,
    /// Per dimension: optional lower bound (`lo TO hi`) and upper bound.
    pub bounds: Vec<(Option<Expr>, Expr)>,
    pub ty: Option<TypeRef>,
}

/// Formal parameter of SUB/FUNCTION/DEF FN.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Option<TypeRef>,
    pub is_array: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrintItem {
    Expr(Expr),
    Semi,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrintStmt {
    pub file: Option<Expr>,
    pub using: Option<Expr>,
    pub items: Vec<PrintItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaseArm {
    Value(Expr),
    Range(Expr, Expr),
    Is(crate::expr::BinOp, Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Key,
    Timer,
    Strig,
    Pen,
    Play,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventSpec {
    pub kind: EventKind,
    pub index: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    On,
    Off,
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResumeMode {
    Same,
    Next,
    Label(Target),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Input,
    Output,
    Append,
    Random,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Plain,
    Box,
    FilledBox,
}

/// A fully parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Empty,
    Let {
        target: LValue,
        expr: Expr,
    },
    Print(PrintStmt),
    Input {
        file: Option<Expr>,
        prompt: Option<String>,
        question_mark: bool,
        vars: Vec<LValue>,
    },
    LineInput {
        file: Option<Expr>,
        prompt: Option<String>,
        var: LValue,
    },
    IfSingle {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    IfBlock {
        cond: Expr,
    },
    ElseIf {
        cond: Expr,
    },
    Else,
    /// `ELSE stmt` on the ELSE line of a block IF.
    ElseInline(Vec<Stmt>),
    EndIf,
    For {
        var: LValue,
        from: Expr,
        to: Expr,
        step: Option<Expr>,
    },
    Next {
        vars: Vec<String>,
    },
    ExitFor,
    ExitDo,
    ExitSub,
    ExitFunction,
    Do {
        /// `(is_until, cond)` for the pre-test form.
        pre: Option<(bool, Expr)>,
    },
    Loop {
        post: Option<(bool, Expr)>,
    },
    While {
        cond: Expr,
    },
    Wend,
    SelectCase {
        selector: Expr,
    },
    Case {
        arms: Vec<CaseArm>,
    },
    CaseElse,
    EndSelect,
    Goto(Target),
    Gosub(Target),
    OnGoto {
        expr: Expr,
        targets: Vec<Target>,
        gosub: bool,
    },
    Return {
        target: Option<Target>,
    },
    OnErrorGoto {
        /// `None` is `ON ERROR GOTO 0`.
        target: Option<Target>,
    },
    OnEventGosub {
        event: EventSpec,
        target: Target,
    },
    EventControl {
        event: EventSpec,
        action: EventAction,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    ProcStart {
        is_function: bool,
        name: String,
        params: Vec<Param>,
        is_static: bool,
    },
    ProcEnd {
        is_function: bool,
    },
    DefFn {
        name: String,
        params: Vec<Param>,
        body: Expr,
    },
    Declare,
    Dim {
        shared: bool,
        decls: Vec<DimDecl>,
    },
    Redim {
        shared: bool,
        decls: Vec<DimDecl>,
    },
    Erase {
        names: Vec<String>,
    },
    Shared {
        names: Vec<(String, bool)>,
    },
    Static {
        decls: Vec<DimDecl>,
    },
    Common {
        shared: bool,
        names: Vec<(String, bool)>,
    },
    Const {
        bindings: Vec<(String, Expr)>,
    },
    DefType {
        ty: ScalarType,
        ranges: Vec<(char, char)>,
    },
    OptionBase(u8),
    TypeStart {
        name: String,
    },
    EndType,
    Data,
    Read {
        vars: Vec<LValue>,
    },
    Restore {
        target: Option<Target>,
    },
    End,
    Stop,
    System,
    Clear,
    Run {
        target: Option<Target>,
    },
    ErrorStmt {
        code: Expr,
    },
    Resume {
        mode: ResumeMode,
    },
    Randomize {
        seed: Option<Expr>,
    },
    Sleep {
        seconds: Option<Expr>,
    },
    Swap {
        a: LValue,
        b: LValue,
    },
    MidAssign {
        target: LValue,
        start: Expr,
        len: Option<Expr>,
        expr: Expr,
    },
    LsetRset {
        left: bool,
        target: LValue,
        expr: Expr,
    },
    ScreenStmt {
        mode: Expr,
    },
    Cls {
        arg: Option<Expr>,
    },
    ColorStmt {
        fg: Option<Expr>,
        bg: Option<Expr>,
    },
    Locate {
        row: Option<Expr>,
        col: Option<Expr>,
        cursor: Option<Expr>,
    },
    WidthStmt {
        cols: Expr,
    },
    Pset {
        preset: bool,
        step: bool,
        x: Expr,
        y: Expr,
        color: Option<Expr>,
    },
    LineStmt {
        from: Option<(bool, Expr, Expr)>,
        to: (bool, Expr, Expr),
        color: Option<Expr>,
        style: LineStyle,
    },
    CircleStmt {
        step: bool,
        x: Expr,
        y: Expr,
        r: Expr,
        color: Option<Expr>,
        start: Option<Expr>,
        end: Option<Expr>,
        aspect: Option<Expr>,
    },
    Paint {
        step: bool,
        x: Expr,
        y: Expr,
        fill: Option<Expr>,
        border: Option<Expr>,
    },
    PaletteStmt {
        index: Option<Expr>,
        color: Option<Expr>,
    },
    ViewStmt {
        screen: bool,
        coords: Option<(Expr, Expr, Expr, Expr)>,
        fill: Option<Expr>,
        border: Option<Expr>,
    },
    WindowStmt {
        screen: bool,
        coords: Option<(Expr, Expr, Expr, Expr)>,
    },
    Pcopy {
        src: Expr,
        dst: Expr,
    },
    GfxGet {
        step1: bool,
        x1: Expr,
        y1: Expr,
        step2: bool,
        x2: Expr,
        y2: Expr,
        array: LValue,
    },
    GfxPut {
        step: bool,
        x: Expr,
        y: Expr,
        array: LValue,
        mode: Option<String>,
    },
    Beep,
    Sound {
        freq: Expr,
        ticks: Expr,
    },
    Play {
        mml: Expr,
    },
    Open {
        path: Expr,
        mode: OpenMode,
        handle: Expr,
        rec_len: Option<Expr>,
    },
    OpenShort {
        mode: Expr,
        handle: Expr,
        path: Expr,
        rec_len: Option<Expr>,
    },
    CloseStmt {
        handles: Vec<Expr>,
    },
    FileGet {
        handle: Expr,
        pos: Option<Expr>,
        var: Option<LValue>,
    },
    FilePut {
        handle: Expr,
        pos: Option<Expr>,
        var: Option<LValue>,
    },
    SeekStmt {
        handle: Expr,
        pos: Expr,
    },
    Kill {
        path: Expr,
    },
    NameAs {
        from: Expr,
        to: Expr,
    },
    ChDir {
        path: Expr,
    },
    MkDir {
        path: Expr,
    },
    RmDir {
        path: Expr,
    },
    FilesStmt {
        pattern: Option<Expr>,
    },
    Write {
        file: Option<Expr>,
        items: Vec<Expr>,
    },
    Bload {
        path: Expr,
        offset: Option<Expr>,
    },
    Bsave {
        path: Expr,
        offset: Expr,
        length: Expr,
    },
    KeySet {
        n: Expr,
        text: Expr,
    },
    /// Parsed for compatibility, raises `FeatureUnsupported` when executed.
    Unsupported {
        keyword: String,
    },
}

/// Parse the statement at segment `k` of a line. Returns the statement and
/// whether it consumed the rest of the line (single-line `IF` does).
pub fn parse_line_statement(line: &SourceLine, k: usize) -> Result<(Stmt, bool)> {
    let seg = &line.statements[k];
    if is_single_line_if(&seg.text)? {
        let joined = line.statements[k..]
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(": ");
        return Ok((parse_statement(&joined)?, true));
    }
    Ok((parse_statement(&seg.text)?, false))
}

/// Single-line vs multi-line IF: non-empty text after `THEN` means
/// single-line. `IF … GOTO n` is also single-line. Stable per source text.
pub fn is_single_line_if(text: &str) -> Result<bool> {
    let trimmed = text.trim_start();
    if !starts_with_word(trimmed, "IF") {
        return Ok(false);
    }
    match find_word_outside_strings(trimmed, "THEN") {
        Some(pos) => Ok(!trimmed[pos + 4..].trim().is_empty()),
        None => {
            if find_word_outside_strings(trimmed, "GOTO").is_some() {
                Ok(true)
            } else {
                Err(RuntimeError::syntax("IF without THEN"))
            }
        }
    }
}

fn starts_with_word(text: &str, word: &str) -> bool {
    let upper = text.as_bytes();
    if upper.len() < word.len() || !text[..word.len()].eq_ignore_ascii_case(word) {
        return false;
    }
    upper
        .get(word.len())
        .is_none_or(|b| !(b.is_ascii_alphanumeric() || *b == b'$' || *b == b'_'))
}

/// Byte offset of the first occurrence of `word` (word-bounded, outside
/// string literals), if any.
fn find_word_outside_strings(text: &str, word: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if in_string {
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = true;
            i += 1;
            continue;
        }
        if c.is_ascii_alphabetic() {
            let start = i;
            while i < bytes.len()
                && ((bytes[i] as char).is_ascii_alphanumeric()
                    || matches!(bytes[i], b'.' | b'_' | b'%' | b'&' | b'!' | b'#' | b'$'))
            {
                i += 1;
            }
            if text[start..i].eq_ignore_ascii_case(word) {
                return Some(start);
            }
        } else {
            i += 1;
        }
    }
    None
}

/// Split on `:` outside string literals (for re-joined IF bodies).
fn split_colons(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    for (i, b) in bytes.iter().enumerate() {
        match *b {
            b'"' => in_string = !in_string,
            b':' if !in_string => {
                out.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(text[start..].trim());
    out.retain(|s| !s.is_empty());
    out
}

/// Parse one statement from its text. For a single-line IF, `text` must be
/// the full remainder of the line (see [`parse_line_statement`]).
pub fn parse_statement(text: &str) -> Result<Stmt> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Stmt::Empty);
    }
    if is_single_line_if(text)? {
        return parse_if_single(text);
    }

    let tokens = tokenize(text)?;
    let mut cur = TokenCursor::new(&tokens);

    let head = match cur.peek() {
        Some(Tok::Ident(word)) => word.clone(),
        Some(Tok::Hash) => {
            return Err(RuntimeError::syntax("statement cannot start with #"));
        }
        _ => return Err(RuntimeError::syntax(format!("cannot parse {text:?}"))),
    };

    // Assignment or implicit CALL when the head is not a keyword
    if !is_keyword(&head) {
        return parse_assign_or_call(&mut cur, text);
    }

    cur.next();
    let stmt = match head.as_str() {
        "LET" => parse_let(&mut cur)?,
        "PRINT" | "LPRINT" => {
            if head == "LPRINT" {
                return Ok(Stmt::Unsupported { keyword: head });
            }
            parse_print(&mut cur)?
        }
        "INPUT" => parse_input(&mut cur, false)?,
        "LINE" => {
            if cur.eat_word("INPUT") {
                parse_input(&mut cur, true)?
            } else {
                parse_line_gfx(&mut cur)?
            }
        }
        "IF" => {
            // Multi-line opener (single-line handled above)
            let cond = parse_expression(&mut cur)?;
            if !cur.eat_word("THEN") {
                return Err(RuntimeError::syntax("IF without THEN"));
            }
            Stmt::IfBlock { cond }
        }
        "ELSEIF" => {
            let cond = parse_expression(&mut cur)?;
            cur.eat_word("THEN");
            if !cur.at_end() {
                return Err(RuntimeError::syntax(
                    "ELSEIF branch must start on a new line",
                ));
            }
            Stmt::ElseIf { cond }
        }
        "ELSE" => {
            if cur.at_end() {
                Stmt::Else
            } else {
                // `ELSE stmt` inline on the ELSE line of a block IF
                let rest = text.trim_start()[4..].trim();
                Stmt::ElseInline(parse_branch(rest)?)
            }
        }
        "END" => parse_end(&mut cur)?,
        "FOR" => {
            let var = parse_lvalue(&mut cur)?;
            cur.expect(&Tok::Eq, "= in FOR")?;
            let from = parse_expression(&mut cur)?;
            if !cur.eat_word("TO") {
                return Err(RuntimeError::syntax("FOR without TO"));
            }
            let to = parse_expression(&mut cur)?;
            let step = if cur.eat_word("STEP") {
                Some(parse_expression(&mut cur)?)
            } else {
                None
            };
            Stmt::For {
                var,
                from,
                to,
                step,
            }
        }
        "NEXT" => {
            let mut vars = Vec::new();
            while let Some(Tok::Ident(name)) = cur.peek() {
                vars.push(name.clone());
                cur.next();
                if !cur.eat(&Tok::Comma) {
                    break;
                }
            }
            Stmt::Next { vars }
        }
        "EXIT" => {
            if cur.eat_word("FOR") {
                Stmt::ExitFor
            } else if cur.eat_word("DO") {
                Stmt::ExitDo
            } else if cur.eat_word("SUB") {
                Stmt::ExitSub
            } else if cur.eat_word("FUNCTION") {
                Stmt::ExitFunction
            } else {
                return Err(RuntimeError::syntax("EXIT must name FOR, DO, SUB or FUNCTION"));
            }
        }
        "DO" => {
            let pre = if cur.eat_word("WHILE") {
                Some((false, parse_expression(&mut cur)?))
            } else if cur.eat_word("UNTIL") {
                Some((true, parse_expression(&mut cur)?))
            } else {
                None
            };
            Stmt::Do { pre }
        }
        "LOOP" => {
            let post = if cur.eat_word("WHILE") {
                Some((false, parse_expression(&mut cur)?))
            } else if cur.eat_word("UNTIL") {
                Some((true, parse_expression(&mut cur)?))
            } else {
                None
            };
            Stmt::Loop { post }
        }
        "WHILE" => Stmt::While {
            cond: parse_expression(&mut cur)?,
        },
        "WEND" => Stmt::Wend,
        "SELECT" => {
            if !cur.eat_word("CASE") {
                return Err(RuntimeError::syntax("SELECT without CASE"));
            }
            Stmt::SelectCase {
                selector: parse_expression(&mut cur)?,
            }
        }
        "CASE" => parse_case(&mut cur)?,
        "GOTO" => Stmt::Goto(parse_target(&mut cur)?),
        "GOSUB" => Stmt::Gosub(parse_target(&mut cur)?),
        "RETURN" => {
            let target = if cur.at_end() {
                None
            } else {
                Some(parse_target(&mut cur)?)
            };
            Stmt::Return { target }
        }
        "ON" => parse_on(&mut cur)?,
        "KEY" | "TIMER" | "STRIG" | "PEN" | "PLAY" => parse_event_or_misc(&mut cur, &head)?,
        "CALL" => {
            let name = cur.expect_ident("SUB name after CALL")?;
            let mut args = Vec::new();
            if cur.eat(&Tok::LParen) {
                if !cur.eat(&Tok::RParen) {
                    loop {
                        args.push(parse_expression(&mut cur)?);
                        if cur.eat(&Tok::RParen) {
                            break;
                        }
                        cur.expect(&Tok::Comma, ", or )")?;
                    }
                }
            }
            Stmt::Call { name, args }
        }
        "SUB" | "FUNCTION" => parse_proc_header(&mut cur, head == "FUNCTION")?,
        "DECLARE" => Stmt::Declare,
        "DEF" => parse_def(&mut cur)?,
        "DIM" => {
            let shared = cur.eat_word("SHARED");
            Stmt::Dim {
                shared,
                decls: parse_dim_decls(&mut cur)?,
            }
        }
        "REDIM" => {
            let shared = cur.eat_word("SHARED");
            Stmt::Redim {
                shared,
                decls: parse_dim_decls(&mut cur)?,
            }
        }
        "ERASE" => {
            let mut names = Vec::new();
            loop {
                names.push(cur.expect_ident("array name")?);
                if !cur.eat(&Tok::Comma) {
                    break;
                }
            }
            Stmt::Erase { names }
        }
        "SHARED" => Stmt::Shared {
            names: parse_shared_names(&mut cur)?,
        },
        "STATIC" => Stmt::Static {
            decls: parse_dim_decls(&mut cur)?,
        },
        "COMMON" => {
            let shared = cur.eat_word("SHARED");
            // Block name `/name/` is accepted and ignored
            if cur.eat(&Tok::Slash) {
                cur.next();
                cur.eat(&Tok::Slash);
            }
            Stmt::Common {
                shared,
                names: parse_shared_names(&mut cur)?,
            }
        }
        "CONST" => {
            let mut bindings = Vec::new();
            loop {
                let name = cur.expect_ident("CONST name")?;
                cur.expect(&Tok::Eq, "= in CONST")?;
                bindings.push((name, parse_expression(&mut cur)?));
                if !cur.eat(&Tok::Comma) {
                    break;
                }
            }
            Stmt::Const { bindings }
        }
        "DEFINT" | "DEFLNG" | "DEFSNG" | "DEFDBL" | "DEFSTR" => {
            let ty = match head.as_str() {
                "DEFINT" => ScalarType::Integer,
                "DEFLNG" => ScalarType::Long,
                "DEFSNG" => ScalarType::Single,
                "DEFDBL" => ScalarType::Double,
                _ => ScalarType::String,
            };
            Stmt::DefType {
                ty,
                ranges: parse_letter_ranges(&mut cur)?,
            }
        }
        "OPTION" => {
            if !cur.eat_word("BASE") {
                return Err(RuntimeError::syntax("OPTION must be OPTION BASE"));
            }
            match cur.next() {
                Some(Tok::Num(crate::token::NumLit::Integer(n))) if *n == 0 || *n == 1 => {
                    Stmt::OptionBase(*n as u8)
                }
                _ => return Err(RuntimeError::syntax("OPTION BASE must be 0 or 1")),
            }
        }
        "TYPE" => Stmt::TypeStart {
            name: cur.expect_ident("TYPE name")?,
        },
        "DATA" => Stmt::Data,
        "READ" => {
            let mut vars = Vec::new();
            loop {
                vars.push(parse_lvalue(&mut cur)?);
                if !cur.eat(&Tok::Comma) {
                    break;
                }
            }
            Stmt::Read { vars }
        }
        "RESTORE" => {
            let target = if cur.at_end() {
                None
            } else {
                Some(parse_target(&mut cur)?)
            };
            Stmt::Restore { target }
        }
        "STOP" => Stmt::Stop,
        "SYSTEM" => Stmt::System,
        "CLEAR" => {
            // CLEAR [,stack][,heap] arguments are accepted and ignored
            while cur.next().is_some() {}
            Stmt::Clear
        }
        "RUN" => {
            let target = if cur.at_end() {
                None
            } else {
                Some(parse_target(&mut cur)?)
            };
            Stmt::Run { target }
        }
        "ERROR" => Stmt::ErrorStmt {
            code: parse_expression(&mut cur)?,
        },
        "RESUME" => {
            let mode = if cur.at_end() {
                ResumeMode::Same
            } else if cur.eat_word("NEXT") {
                ResumeMode::Next
            } else {
                match parse_target(&mut cur)? {
                    Target::Line(0) => ResumeMode::Same,
                    t => ResumeMode::Label(t),
                }
            };
            Stmt::Resume { mode }
        }
        "RANDOMIZE" => Stmt::Randomize {
            seed: if cur.at_end() {
                None
            } else {
                Some(parse_expression(&mut cur)?)
            },
        },
        "SLEEP" => Stmt::Sleep {
            seconds: if cur.at_end() {
                None
            } else {
                Some(parse_expression(&mut cur)?)
            },
        },
        // Extension spelling for a sub-second wait
        "_DELAY" => Stmt::Sleep {
            seconds: Some(parse_expression(&mut cur)?),
        },
        "SWAP" => {
            let a = parse_lvalue(&mut cur)?;
            cur.expect(&Tok::Comma, ", in SWAP")?;
            let b = parse_lvalue(&mut cur)?;
            Stmt::Swap { a, b }
        }
        "LSET" | "RSET" => {
            let target = parse_lvalue(&mut cur)?;
            cur.expect(&Tok::Eq, "= in LSET/RSET")?;
            Stmt::LsetRset {
                left: head == "LSET",
                target,
                expr: parse_expression(&mut cur)?,
            }
        }
        "SCREEN" => {
            let mode = parse_expression(&mut cur)?;
            // colorswitch / page arguments accepted and ignored
            while cur.eat(&Tok::Comma) {
                if cur.peek().is_some() && !matches!(cur.peek(), Some(Tok::Comma)) {
                    parse_expression(&mut cur)?;
                }
            }
            Stmt::ScreenStmt { mode }
        }
        "CLS" => Stmt::Cls {
            arg: if cur.at_end() {
                None
            } else {
                Some(parse_expression(&mut cur)?)
            },
        },
        "COLOR" => {
            let fg = if cur.at_end() || matches!(cur.peek(), Some(Tok::Comma)) {
                None
            } else {
                Some(parse_expression(&mut cur)?)
            };
            let bg = if cur.eat(&Tok::Comma) && !cur.at_end() {
                Some(parse_expression(&mut cur)?)
            } else {
                None
            };
            // border argument accepted and ignored
            if cur.eat(&Tok::Comma) && !cur.at_end() {
                parse_expression(&mut cur)?;
            }
            Stmt::ColorStmt { fg, bg }
        }
        "LOCATE" => {
            let row = if cur.at_end() || matches!(cur.peek(), Some(Tok::Comma)) {
                None
            } else {
                Some(parse_expression(&mut cur)?)
            };
            let col = if cur.eat(&Tok::Comma)
                && !cur.at_end()
                && !matches!(cur.peek(), Some(Tok::Comma))
            {
                Some(parse_expression(&mut cur)?)
            } else {
                None
            };
            let cursor = if cur.eat(&Tok::Comma) && !cur.at_end() {
                Some(parse_expression(&mut cur)?)
            } else {
                None
            };
            // start/stop scan lines accepted and ignored
            while cur.eat(&Tok::Comma) {
                if !cur.at_end() {
                    parse_expression(&mut cur)?;
                }
            }
            Stmt::Locate { row, col, cursor }
        }
        "WIDTH" => {
            let cols = parse_expression(&mut cur)?;
            if cur.eat(&Tok::Comma) && !cur.at_end() {
                parse_expression(&mut cur)?;
            }
            Stmt::WidthStmt { cols }
        }
        "PSET" | "PRESET" => {
            let step = cur.eat_word("STEP");
            cur.expect(&Tok::LParen, "( in PSET")?;
            let x = parse_expression(&mut cur)?;
            cur.expect(&Tok::Comma, ", in PSET")?;
            let y = parse_expression(&mut cur)?;
            cur.expect(&Tok::RParen, ") in PSET")?;
            let color = if cur.eat(&Tok::Comma) {
                Some(parse_expression(&mut cur)?)
            } else {
                None
            };
            Stmt::Pset {
                preset: head == "PRESET",
                step,
                x,
                y,
                color,
            }
        }
        "CIRCLE" => parse_circle(&mut cur)?,
        "PAINT" => {
            let step = cur.eat_word("STEP");
            cur.expect(&Tok::LParen, "( in PAINT")?;
            let x = parse_expression(&mut cur)?;
            cur.expect(&Tok::Comma, ", in PAINT")?;
            let y = parse_expression(&mut cur)?;
            cur.expect(&Tok::RParen, ") in PAINT")?;
            let fill = if cur.eat(&Tok::Comma) && !matches!(cur.peek(), Some(Tok::Comma)) {
                Some(parse_expression(&mut cur)?)
            } else {
                None
            };
            let border = if cur.eat(&Tok::Comma) && !cur.at_end() {
                Some(parse_expression(&mut cur)?)
            } else {
                None
            };
            Stmt::Paint {
                step,
                x,
                y,
                fill,
                border,
            }
        }
        "PALETTE" => {
            if cur.at_end() {
                Stmt::PaletteStmt {
                    index: None,
                    color: None,
                }
            } else if cur.peek_word("USING") {
                Stmt::Unsupported {
                    keyword: "PALETTE USING".into(),
                }
            } else {
                let index = parse_expression(&mut cur)?;
                cur.expect(&Tok::Comma, ", in PALETTE")?;
                let color = parse_expression(&mut cur)?;
                Stmt::PaletteStmt {
                    index: Some(index),
                    color: Some(color),
                }
            }
        }
        "VIEW" => parse_view(&mut cur)?,
        "WINDOW" => {
            let screen = cur.eat_word("SCREEN");
            let coords = if cur.at_end() {
                None
            } else {
                Some(parse_coord_pair(&mut cur)?)
            };
            Stmt::WindowStmt { screen, coords }
        }
        "PCOPY" => {
            let src = parse_expression(&mut cur)?;
            cur.expect(&Tok::Comma, ", in PCOPY")?;
            let dst = parse_expression(&mut cur)?;
            Stmt::Pcopy { src, dst }
        }
        "GET" => parse_get_put(&mut cur, true)?,
        "PUT" => parse_get_put(&mut cur, false)?,
        "BEEP" => Stmt::Beep,
        "SOUND" => {
            let freq = parse_expression(&mut cur)?;
            cur.expect(&Tok::Comma, ", in SOUND")?;
            let ticks = parse_expression(&mut cur)?;
            Stmt::Sound { freq, ticks }
        }
        "OPEN" => parse_open(&mut cur)?,
        "CLOSE" => {
            let mut handles = Vec::new();
            while !cur.at_end() {
                cur.eat(&Tok::Hash);
                handles.push(parse_expression(&mut cur)?);
                if !cur.eat(&Tok::Comma) {
                    break;
                }
            }
            Stmt::CloseStmt { handles }
        }
        "SEEK" => {
            cur.eat(&Tok::Hash);
            let handle = parse_expression(&mut cur)?;
            cur.expect(&Tok::Comma, ", in SEEK")?;
            let pos = parse_expression(&mut cur)?;
            Stmt::SeekStmt { handle, pos }
        }
        "KILL" => Stmt::Kill {
            path: parse_expression(&mut cur)?,
        },
        "NAME" => {
            let from = parse_expression(&mut cur)?;
            if !cur.eat_word("AS") {
                return Err(RuntimeError::syntax("NAME without AS"));
            }
            Stmt::NameAs {
                from,
                to: parse_expression(&mut cur)?,
            }
        }
        "CHDIR" => Stmt::ChDir {
            path: parse_expression(&mut cur)?,
        },
        "MKDIR" => Stmt::MkDir {
            path: parse_expression(&mut cur)?,
        },
        "RMDIR" => Stmt::RmDir {
            path: parse_expression(&mut cur)?,
        },
        "FILES" => Stmt::FilesStmt {
            pattern: if cur.at_end() {
                None
            } else {
                Some(parse_expression(&mut cur)?)
            },
        },
        "WRITE" => {
            let file = if cur.eat(&Tok::Hash) {
                let h = parse_expression(&mut cur)?;
                cur.eat(&Tok::Comma);
                Some(h)
            } else {
                None
            };
            let mut items = Vec::new();
            while !cur.at_end() {
                items.push(parse_expression(&mut cur)?);
                if !cur.eat(&Tok::Comma) {
                    break;
                }
            }
            Stmt::Write { file, items }
        }
        "BLOAD" => {
            let path = parse_expression(&mut cur)?;
            let offset = if cur.eat(&Tok::Comma) {
                Some(parse_expression(&mut cur)?)
            } else {
                None
            };
            Stmt::Bload { path, offset }
        }
        "BSAVE" => {
            let path = parse_expression(&mut cur)?;
            cur.expect(&Tok::Comma, ", in BSAVE")?;
            let offset = parse_expression(&mut cur)?;
            cur.expect(&Tok::Comma, ", in BSAVE")?;
            let length = parse_expression(&mut cur)?;
            Stmt::Bsave {
                path,
                offset,
                length,
            }
        }
        "TRON" | "TROFF" => Stmt::Empty,
        "FIELD" | "SHELL" | "POKE" | "OUT" | "WAIT" | "DRAW" => {
            Stmt::Unsupported { keyword: head }
        }
        other => {
            return Err(RuntimeError::syntax(format!(
                "unrecognized statement {other}"
            )));
        }
    };
    Ok(stmt)
}

fn parse_assign_or_call(cur: &mut TokenCursor, text: &str) -> Result<Stmt> {
    if let Ok(target) = parse_lvalue(cur)
        && cur.eat(&Tok::Eq)
    {
        let expr = parse_expression(cur)?;
        if !cur.at_end() {
            return Err(RuntimeError::syntax(format!(
                "trailing tokens in assignment {text:?}"
            )));
        }
        return Ok(Stmt::Let { target, expr });
    }
    // Implicit CALL: `name arg1, arg2` (re-lex since the lvalue attempt may
    // have consumed tokens)
    let tokens = tokenize(text)?;
    let mut cur = TokenCursor::new(&tokens);
    let name = cur.expect_ident("statement")?;
    let mut args = Vec::new();
    if !cur.at_end() {
        loop {
            args.push(parse_expression(&mut cur)?);
            if !cur.eat(&Tok::Comma) {
                break;
            }
        }
    }
    if !cur.at_end() {
        return Err(RuntimeError::syntax(format!("cannot parse {text:?}")));
    }
    Ok(Stmt::Call { name, args })
}

fn parse_let(cur: &mut TokenCursor) -> Result<Stmt> {
    // MID$(s$, i [, n]) = expr assignment form
    if cur.peek_word("MID$") {
        return parse_mid_assign(cur);
    }
    let target = parse_lvalue(cur)?;
    cur.expect(&Tok::Eq, "= in LET")?;
    Ok(Stmt::Let {
        target,
        expr: parse_expression(cur)?,
    })
}

fn parse_mid_assign(cur: &mut TokenCursor) -> Result<Stmt> {
    cur.next(); // MID$
    cur.expect(&Tok::LParen, "( in MID$")?;
    let target = parse_lvalue(cur)?;
    cur.expect(&Tok::Comma, ", in MID$")?;
    let start = parse_expression(cur)?;
    let len = if cur.eat(&Tok::Comma) {
        Some(parse_expression(cur)?)
    } else {
        None
    };
    cur.expect(&Tok::RParen, ") in MID$")?;
    cur.expect(&Tok::Eq, "= after MID$()")?;
    Ok(Stmt::MidAssign {
        target,
        start,
        len,
        expr: parse_expression(cur)?,
    })
}

pub fn parse_lvalue(cur: &mut TokenCursor) -> Result<LValue> {
    let name = match cur.peek() {
        Some(Tok::Ident(n)) if !is_keyword(n) => n.clone(),
        _ => return Err(RuntimeError::syntax("expected a variable name")),
    };
    cur.next();
    let mut indices = Vec::new();
    if cur.eat(&Tok::LParen) {
        if !cur.eat(&Tok::RParen) {
            loop {
                indices.push(parse_expression(cur)?);
                if cur.eat(&Tok::RParen) {
                    break;
                }
                cur.expect(&Tok::Comma, ", or )")?;
            }
        }
    }
    let mut fields = Vec::new();
    while cur.eat(&Tok::Dot) {
        fields.push(cur.expect_ident("field name")?);
    }
    Ok(LValue {
        name,
        indices,
        fields,
    })
}

fn parse_target(cur: &mut TokenCursor) -> Result<Target> {
    match cur.next() {
        Some(Tok::Ident(name)) => Ok(Target::Label(name.clone())),
        Some(Tok::Num(crate::token::NumLit::Integer(n))) => Ok(Target::Line(*n as u32)),
        Some(Tok::Num(crate::token::NumLit::Long(n))) => Ok(Target::Line(*n as u32)),
        _ => Err(RuntimeError::syntax("expected a label or line number")),
    }
}

fn parse_if_single(text: &str) -> Result<Stmt> {
    let trimmed = text.trim_start();
    let body = &trimmed[2..]; // past IF

    // `IF cond GOTO target` without THEN
    let (cond_text, tail) = match find_word_outside_strings(body, "THEN") {
        Some(pos) => (&body[..pos], body[pos + 4..].trim()),
        None => {
            let pos = find_word_outside_strings(body, "GOTO")
                .ok_or_else(|| RuntimeError::syntax("IF without THEN"))?;
            let cond = parse_cond(&body[..pos])?;
            let tokens = tokenize(body[pos + 4..].trim())?;
            let mut cur = TokenCursor::new(&tokens);
            return Ok(Stmt::IfSingle {
                cond,
                then_branch: vec![Stmt::Goto(parse_target(&mut cur)?)],
                else_branch: Vec::new(),
            });
        }
    };
    let cond = parse_cond(cond_text)?;

    let (then_text, else_text) = split_else(tail);
    Ok(Stmt::IfSingle {
        cond,
        then_branch: parse_branch(then_text)?,
        else_branch: match else_text {
            Some(t) => parse_branch(t)?,
            None => Vec::new(),
        },
    })
}

fn parse_cond(text: &str) -> Result<Expr> {
    let tokens = tokenize(text.trim())?;
    crate::expr::parse_full_expression(&tokens)
}

/// Find the ELSE belonging to this IF: scan words outside strings, counting
/// nested `IF`s; an `ELSE` at depth zero is ours, otherwise it closes an
/// inner IF.
fn split_else(tail: &str) -> (&str, Option<&str>) {
    let bytes = tail.as_bytes();
    let mut in_string = false;
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if in_string {
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = true;
            i += 1;
            continue;
        }
        if c.is_ascii_alphabetic() {
            let start = i;
            while i < bytes.len()
                && ((bytes[i] as char).is_ascii_alphanumeric()
                    || matches!(bytes[i], b'.' | b'_' | b'%' | b'&' | b'!' | b'#' | b'$'))
            {
                i += 1;
            }
            let word = &tail[start..i];
            if word.eq_ignore_ascii_case("IF") {
                depth += 1;
            } else if word.eq_ignore_ascii_case("ELSE") {
                if depth == 0 {
                    return (tail[..start].trim_end(), Some(tail[i..].trim_start()));
                }
                depth -= 1;
            }
        } else {
            i += 1;
        }
    }
    (tail, None)
}

/// Parse a THEN/ELSE branch: colon-separated statements; a bare target is a
/// GOTO; a nested single-line IF consumes everything after it.
fn parse_branch(text: &str) -> Result<Vec<Stmt>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    // `THEN 100` / `ELSE done`
    if let Ok(tokens) = tokenize(text)
        && tokens.len() == 1
    {
        match &tokens[0].tok {
            Tok::Num(crate::token::NumLit::Integer(n)) => {
                return Ok(vec![Stmt::Goto(Target::Line(*n as u32))]);
            }
            Tok::Num(crate::token::NumLit::Long(n)) => {
                return Ok(vec![Stmt::Goto(Target::Line(*n as u32))]);
            }
            Tok::Ident(name) if !is_keyword(name) => {
                return Ok(vec![Stmt::Goto(Target::Label(name.clone()))]);
            }
            _ => {}
        }
    }
    let segments = split_colons(text);
    let mut out = Vec::new();
    for (k, seg) in segments.iter().enumerate() {
        if is_single_line_if(seg)? {
            let rest = segments[k..].join(": ");
            out.push(parse_if_single(&rest)?);
            break;
        }
        out.push(parse_statement(seg)?);
    }
    Ok(out)
}

fn parse_end(cur: &mut TokenCursor) -> Result<Stmt> {
    if cur.eat_word("IF") {
        Ok(Stmt::EndIf)
    } else if cur.eat_word("SELECT") {
        Ok(Stmt::EndSelect)
    } else if cur.eat_word("SUB") {
        Ok(Stmt::ProcEnd { is_function: false })
    } else if cur.eat_word("FUNCTION") {
        Ok(Stmt::ProcEnd { is_function: true })
    } else if cur.eat_word("TYPE") {
        Ok(Stmt::EndType)
    } else if cur.eat_word("DEF") {
        Ok(Stmt::Unsupported {
            keyword: "END DEF".into(),
        })
    } else if cur.at_end() {
        Ok(Stmt::End)
    } else {
        Err(RuntimeError::syntax("malformed END"))
    }
}

fn parse_case(cur: &mut TokenCursor) -> Result<Stmt> {
    if cur.eat_word("ELSE") {
        return Ok(Stmt::CaseElse);
    }
    let mut arms = Vec::new();
    loop {
        if cur.eat_word("IS") {
            let op = match cur.next() {
                Some(Tok::Eq) => crate::expr::BinOp::Eq,
                Some(Tok::Ne) => crate::expr::BinOp::Ne,
                Some(Tok::Lt) => crate::expr::BinOp::Lt,
                Some(Tok::Le) => crate::expr::BinOp::Le,
                Some(Tok::Gt) => crate::expr::BinOp::Gt,
                Some(Tok::Ge) => crate::expr::BinOp::Ge,
                _ => return Err(RuntimeError::syntax("CASE IS needs a relational operator")),
            };
            arms.push(CaseArm::Is(op, parse_expression(cur)?));
        } else {
            let first = parse_expression(cur)?;
            if cur.eat_word("TO") {
                arms.push(CaseArm::Range(first, parse_expression(cur)?));
            } else {
                arms.push(CaseArm::Value(first));
            }
        }
        if !cur.eat(&Tok::Comma) {
            break;
        }
    }
    Ok(Stmt::Case { arms })
}

fn parse_on(cur: &mut TokenCursor) -> Result<Stmt> {
    if cur.eat_word("ERROR") {
        if !cur.eat_word("GOTO") {
            return Err(RuntimeError::syntax("ON ERROR without GOTO"));
        }
        let target = parse_target(cur)?;
        return Ok(Stmt::OnErrorGoto {
            target: match target {
                Target::Line(0) => None,
                t => Some(t),
            },
        });
    }
    // Event traps: ON KEY(n) / TIMER(n) / STRIG(n) / PEN / PLAY(n) GOSUB
    for (word, kind) in [
        ("KEY", EventKind::Key),
        ("TIMER", EventKind::Timer),
        ("STRIG", EventKind::Strig),
        ("PEN", EventKind::Pen),
        ("PLAY", EventKind::Play),
    ] {
        if cur.eat_word(word) {
            let index = if cur.eat(&Tok::LParen) {
                let e = parse_expression(cur)?;
                cur.expect(&Tok::RParen, ")")?;
                Some(e)
            } else {
                None
            };
            if !cur.eat_word("GOSUB") {
                return Err(RuntimeError::syntax("event trap without GOSUB"));
            }
            return Ok(Stmt::OnEventGosub {
                event: EventSpec { kind, index },
                target: parse_target(cur)?,
            });
        }
    }
    // Computed jump: ON expr GOTO/GOSUB t1, t2, …
    let expr = parse_expression(cur)?;
    let gosub = if cur.eat_word("GOTO") {
        false
    } else if cur.eat_word("GOSUB") {
        true
    } else {
        return Err(RuntimeError::syntax("ON expr needs GOTO or GOSUB"));
    };
    let mut targets = Vec::new();
    loop {
        targets.push(parse_target(cur)?);
        if !cur.eat(&Tok::Comma) {
            break;
        }
    }
    Ok(Stmt::OnGoto {
        expr,
        targets,
        gosub,
    })
}

/// `KEY(n) ON` and friends, plus `KEY n, text$` soft-key assignment and the
/// `PLAY mml$` statement (shared leading keywords).
fn parse_event_or_misc(cur: &mut TokenCursor, head: &str) -> Result<Stmt> {
    let kind = match head {
        "KEY" => EventKind::Key,
        "TIMER" => EventKind::Timer,
        "STRIG" => EventKind::Strig,
        "PEN" => EventKind::Pen,
        _ => EventKind::Play,
    };
    let index = if cur.eat(&Tok::LParen) {
        let e = parse_expression(cur)?;
        cur.expect(&Tok::RParen, ")")?;
        Some(e)
    } else {
        None
    };
    if cur.eat_word("ON") {
        return Ok(Stmt::EventControl {
            event: EventSpec { kind, index },
            action: EventAction::On,
        });
    }
    if cur.eat_word("OFF") {
        return Ok(Stmt::EventControl {
            event: EventSpec { kind, index },
            action: EventAction::Off,
        });
    }
    if cur.eat_word("STOP") {
        return Ok(Stmt::EventControl {
            event: EventSpec { kind, index },
            action: EventAction::Stop,
        });
    }
    match head {
        "PLAY" if index.is_none() => Ok(Stmt::Play {
            mml: parse_expression(cur)?,
        }),
        "KEY" if index.is_none() => {
            let n = parse_expression(cur)?;
            cur.expect(&Tok::Comma, ", in KEY")?;
            let text = parse_expression(cur)?;
            Ok(Stmt::KeySet { n, text })
        }
        _ => Err(RuntimeError::syntax(format!("malformed {head} statement"))),
    }
}

fn parse_proc_header(cur: &mut TokenCursor, is_function: bool) -> Result<Stmt> {
    let name = cur.expect_ident("procedure name")?;
    let mut params = Vec::new();
    if cur.eat(&Tok::LParen) {
        if !cur.eat(&Tok::RParen) {
            loop {
                params.push(parse_param(cur)?);
                if cur.eat(&Tok::RParen) {
                    break;
                }
                cur.expect(&Tok::Comma, ", or )")?;
            }
        }
    }
    let is_static = cur.eat_word("STATIC");
    Ok(Stmt::ProcStart {
        is_function,
        name,
        params,
        is_static,
    })
}

fn parse_param(cur: &mut TokenCursor) -> Result<Param> {
    let name = cur.expect_ident("parameter name")?;
    let mut is_array = false;
    if cur.eat(&Tok::LParen) {
        cur.expect(&Tok::RParen, ") in array parameter")?;
        is_array = true;
    }
    let ty = if cur.eat_word("AS") {
        Some(parse_type_ref(cur)?)
    } else {
        None
    };
    Ok(Param { name, ty, is_array })
}

fn parse_type_ref(cur: &mut TokenCursor) -> Result<TypeRef> {
    let word = cur.expect_ident("type name after AS")?;
    Ok(match ScalarType::from_keyword(&word) {
        Some(ty) => TypeRef::Scalar(ty),
        None => TypeRef::Record(word),
    })
}

fn parse_def(cur: &mut TokenCursor) -> Result<Stmt> {
    if cur.eat_word("SEG") {
        // DEF SEG [= addr]
        while cur.next().is_some() {}
        return Ok(Stmt::Unsupported {
            keyword: "DEF SEG".into(),
        });
    }
    let name = cur.expect_ident("FN name after DEF")?;
    if !name.starts_with("FN") {
        return Err(RuntimeError::syntax("DEF name must start with FN"));
    }
    let mut params = Vec::new();
    if cur.eat(&Tok::LParen) {
        if !cur.eat(&Tok::RParen) {
            loop {
                params.push(parse_param(cur)?);
                if cur.eat(&Tok::RParen) {
                    break;
                }
                cur.expect(&Tok::Comma, ", or )")?;
            }
        }
    }
    if !cur.eat(&Tok::Eq) {
        // Block DEF FN … END DEF
        return Ok(Stmt::Unsupported {
            keyword: "block DEF FN".into(),
        });
    }
    Ok(Stmt::DefFn {
        name,
        params,
        body: parse_expression(cur)?,
    })
}

fn parse_dim_decls(cur: &mut TokenCursor) -> Result<Vec<DimDecl>> {
    let mut decls = Vec::new();
    loop {
        let name = cur.expect_ident("variable name")?;
        let mut bounds = Vec::new();
        if cur.eat(&Tok::LParen) {
            if !cur.eat(&Tok::RParen) {
                loop {
                    let first = parse_expression(cur)?;
                    if cur.eat_word("TO") {
                        bounds.push((Some(first), parse_expression(cur)?));
                    } else {
                        bounds.push((None, first));
                    }
                    if cur.eat(&Tok::RParen) {
                        break;
                    }
                    cur.expect(&Tok::Comma, ", or )")?;
                }
            }
        }
        let ty = if cur.eat_word("AS") {
            Some(parse_type_ref(cur)?)
        } else {
            None
        };
        decls.push(DimDecl { name, bounds, ty });
        if !cur.eat(&Tok::Comma) {
            break;
        }
    }
    Ok(decls)
}

fn parse_shared_names(cur: &mut TokenCursor) -> Result<Vec<(String, bool)>> {
    let mut names = Vec::new();
    loop {
        let name = cur.expect_ident("variable name")?;
        let mut is_array = false;
        if cur.eat(&Tok::LParen) {
            cur.expect(&Tok::RParen, ") in array name")?;
            is_array = true;
        }
        // `AS type` on SHARED/COMMON entries is accepted and ignored here;
        // the declaring DIM carries the type.
        if cur.eat_word("AS") {
            parse_type_ref(cur)?;
        }
        names.push((name, is_array));
        if !cur.eat(&Tok::Comma) {
            break;
        }
    }
    Ok(names)
}

fn parse_letter_ranges(cur: &mut TokenCursor) -> Result<Vec<(char, char)>> {
    let mut ranges = Vec::new();
    loop {
        let from = cur.expect_ident("letter")?;
        let from_c = from
            .chars()
            .next()
            .filter(|c| c.is_ascii_alphabetic() && from.len() == 1)
            .ok_or_else(|| RuntimeError::syntax("DEFtype expects single letters"))?;
        let to_c = if cur.eat(&Tok::Minus) {
            let to = cur.expect_ident("letter")?;
            to.chars()
                .next()
                .filter(|c| c.is_ascii_alphabetic() && to.len() == 1)
                .ok_or_else(|| RuntimeError::syntax("DEFtype expects single letters"))?
        } else {
            from_c
        };
        ranges.push((from_c, to_c));
        if !cur.eat(&Tok::Comma) {
            break;
        }
    }
    Ok(ranges)
}

fn parse_print(cur: &mut TokenCursor) -> Result<Stmt> {
    let file = if cur.eat(&Tok::Hash) {
        let h = parse_expression(cur)?;
        cur.expect(&Tok::Comma, ", after file number")?;
        Some(h)
    } else {
        None
    };
    let using = if cur.eat_word("USING") {
        let mask = parse_expression(cur)?;
        cur.expect(&Tok::Semicolon, "; after USING mask")?;
        Some(mask)
    } else {
        None
    };
    let mut items = Vec::new();
    while !cur.at_end() {
        if cur.eat(&Tok::Semicolon) {
            items.push(PrintItem::Semi);
        } else if cur.eat(&Tok::Comma) {
            items.push(PrintItem::Comma);
        } else {
            items.push(PrintItem::Expr(parse_expression(cur)?));
        }
    }
    Ok(Stmt::Print(PrintStmt { file, using, items }))
}

fn parse_input(cur: &mut TokenCursor, line_mode: bool) -> Result<Stmt> {
    if cur.eat(&Tok::Hash) {
        let handle = parse_expression(cur)?;
        cur.expect(&Tok::Comma, ", after file number")?;
        if line_mode {
            return Ok(Stmt::LineInput {
                file: Some(handle),
                prompt: None,
                var: parse_lvalue(cur)?,
            });
        }
        let mut vars = Vec::new();
        loop {
            vars.push(parse_lvalue(cur)?);
            if !cur.eat(&Tok::Comma) {
                break;
            }
        }
        return Ok(Stmt::Input {
            file: Some(handle),
            prompt: None,
            question_mark: false,
            vars,
        });
    }

    // `INPUT ;` keeps the cursor on the line after entry; accepted, ignored
    cur.eat(&Tok::Semicolon);
    let mut prompt = None;
    let mut question_mark = true;
    if let Some(Tok::Str(s)) = cur.peek() {
        let s = s.clone();
        // Prompt must be followed by `;` (question mark) or `,` (plain)
        if matches!(cur.peek_at(1), Some(Tok::Semicolon) | Some(Tok::Comma)) {
            question_mark = matches!(cur.peek_at(1), Some(Tok::Semicolon));
            prompt = Some(s);
            cur.next();
            cur.next();
        }
    }
    if line_mode {
        return Ok(Stmt::LineInput {
            file: None,
            prompt,
            var: parse_lvalue(cur)?,
        });
    }
    let mut vars = Vec::new();
    loop {
        vars.push(parse_lvalue(cur)?);
        if !cur.eat(&Tok::Comma) {
            break;
        }
    }
    Ok(Stmt::Input {
        file: None,
        prompt,
        question_mark,
        vars,
    })
}

fn parse_coord(cur: &mut TokenCursor) -> Result<(bool, Expr, Expr)> {
    let step = cur.eat_word("STEP");
    cur.expect(&Tok::LParen, "(")?;
    let x = parse_expression(cur)?;
    cur.expect(&Tok::Comma, ",")?;
    let y = parse_expression(cur)?;
    cur.expect(&Tok::RParen, ")")?;
    Ok((step, x, y))
}

fn parse_coord_pair(cur: &mut TokenCursor) -> Result<(Expr, Expr, Expr, Expr)> {
    let (_, x1, y1) = parse_coord(cur)?;
    cur.expect(&Tok::Minus, "- between coordinates")?;
    let (_, x2, y2) = parse_coord(cur)?;
    Ok((x1, y1, x2, y2))
}

fn parse_line_gfx(cur: &mut TokenCursor) -> Result<Stmt> {
    let from = if matches!(cur.peek(), Some(Tok::Minus)) {
        None
    } else {
        Some(parse_coord(cur)?)
    };
    cur.expect(&Tok::Minus, "- in LINE")?;
    let to = parse_coord(cur)?;
    let mut color = None;
    let mut style = LineStyle::Plain;
    if cur.eat(&Tok::Comma) {
        if !matches!(cur.peek(), Some(Tok::Comma)) && !cur.at_end() {
            color = Some(parse_expression(cur)?);
        }
        if cur.eat(&Tok::Comma) {
            if cur.eat_word("BF") {
                style = LineStyle::FilledBox;
            } else if cur.eat_word("B") {
                style = LineStyle::Box;
            }
            // Dash pattern argument accepted and ignored
            if cur.eat(&Tok::Comma) && !cur.at_end() {
                parse_expression(cur)?;
            }
        }
    }
    Ok(Stmt::LineStmt {
        from,
        to,
        color,
        style,
    })
}

fn parse_circle(cur: &mut TokenCursor) -> Result<Stmt> {
    let (step, x, y) = parse_coord(cur)?;
    cur.expect(&Tok::Comma, ", in CIRCLE")?;
    let r = parse_expression(cur)?;
    let mut color = None;
    let mut start = None;
    let mut end = None;
    let mut aspect = None;
    for slot in 0..4 {
        if !cur.eat(&Tok::Comma) {
            break;
        }
        if matches!(cur.peek(), Some(Tok::Comma)) || cur.at_end() {
            continue;
        }
        let e = parse_expression(cur)?;
        match slot {
            0 => color = Some(e),
            1 => start = Some(e),
            2 => end = Some(e),
            _ => aspect = Some(e),
        }
    }
    Ok(Stmt::CircleStmt {
        step,
        x,
        y,
        r,
        color,
        start,
        end,
        aspect,
    })
}

fn parse_view(cur: &mut TokenCursor) -> Result<Stmt> {
    if cur.eat_word("PRINT") {
        // Text viewport rows; accepted and ignored
        while cur.next().is_some() {}
        return Ok(Stmt::Empty);
    }
    let screen = cur.eat_word("SCREEN");
    if cur.at_end() {
        return Ok(Stmt::ViewStmt {
            screen,
            coords: None,
            fill: None,
            border: None,
        });
    }
    let coords = Some(parse_coord_pair(cur)?);
    let fill = if cur.eat(&Tok::Comma) && !matches!(cur.peek(), Some(Tok::Comma)) {
        Some(parse_expression(cur)?)
    } else {
        None
    };
    let border = if cur.eat(&Tok::Comma) && !cur.at_end() {
        Some(parse_expression(cur)?)
    } else {
        None
    };
    Ok(Stmt::ViewStmt {
        screen,
        coords,
        fill,
        border,
    })
}

/// GET/PUT: graphics form when a coordinate follows, file form otherwise.
fn parse_get_put(cur: &mut TokenCursor, is_get: bool) -> Result<Stmt> {
    let gfx = matches!(cur.peek(), Some(Tok::LParen))
        || (cur.peek_word("STEP") && matches!(cur.peek_at(1), Some(Tok::LParen)));
    if gfx {
        if is_get {
            let (step1, x1, y1) = parse_coord(cur)?;
            cur.expect(&Tok::Minus, "- in GET")?;
            let (step2, x2, y2) = parse_coord(cur)?;
            cur.expect(&Tok::Comma, ", in GET")?;
            let array = parse_lvalue(cur)?;
            return Ok(Stmt::GfxGet {
                step1,
                x1,
                y1,
                step2,
                x2,
                y2,
                array,
            });
        }
        let (step, x, y) = parse_coord(cur)?;
        cur.expect(&Tok::Comma, ", in PUT")?;
        let array = parse_lvalue(cur)?;
        let mode = if cur.eat(&Tok::Comma) {
            Some(cur.expect_ident("PUT mode")?)
        } else {
            None
        };
        return Ok(Stmt::GfxPut {
            step,
            x,
            y,
            array,
            mode,
        });
    }

    cur.eat(&Tok::Hash);
    let handle = parse_expression(cur)?;
    let mut pos = None;
    let mut var = None;
    if cur.eat(&Tok::Comma) {
        if !matches!(cur.peek(), Some(Tok::Comma)) && !cur.at_end() {
            pos = Some(parse_expression(cur)?);
        }
        if cur.eat(&Tok::Comma) {
            var = Some(parse_lvalue(cur)?);
        }
    }
    Ok(if is_get {
        Stmt::FileGet { handle, pos, var }
    } else {
        Stmt::FilePut { handle, pos, var }
    })
}

fn parse_open(cur: &mut TokenCursor) -> Result<Stmt> {
    let path = parse_expression(cur)?;
    if cur.eat_word("FOR") {
        let mode = if cur.eat_word("INPUT") {
            OpenMode::Input
        } else if cur.eat_word("OUTPUT") {
            OpenMode::Output
        } else if cur.eat_word("APPEND") {
            OpenMode::Append
        } else if cur.eat_word("RANDOM") {
            OpenMode::Random
        } else if cur.eat_word("BINARY") {
            OpenMode::Binary
        } else {
            return Err(RuntimeError::syntax("bad OPEN mode"));
        };
        // ACCESS / lock clauses accepted and ignored
        if cur.eat_word("ACCESS") {
            cur.eat_word("READ");
            cur.eat_word("WRITE");
        }
        cur.eat_word("SHARED");
        if cur.eat_word("LOCK") {
            cur.eat_word("READ");
            cur.eat_word("WRITE");
        }
        if !cur.eat_word("AS") {
            return Err(RuntimeError::syntax("OPEN without AS"));
        }
        cur.eat(&Tok::Hash);
        let handle = parse_expression(cur)?;
        let rec_len = if cur.eat_word("LEN") {
            cur.expect(&Tok::Eq, "= after LEN")?;
            Some(parse_expression(cur)?)
        } else {
            None
        };
        return Ok(Stmt::Open {
            path,
            mode,
            handle,
            rec_len,
        });
    }
    // Short form: OPEN mode$, [#]n, path$ [, reclen]
    cur.expect(&Tok::Comma, ", in OPEN")?;
    cur.eat(&Tok::Hash);
    let handle = parse_expression(cur)?;
    cur.expect(&Tok::Comma, ", in OPEN")?;
    let file_path = parse_expression(cur)?;
    let rec_len = if cur.eat(&Tok::Comma) {
        Some(parse_expression(cur)?)
    } else {
        None
    };
    Ok(Stmt::OpenShort {
        mode: path,
        handle,
        path: file_path,
        rec_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceProgram;

    fn parse(text: &str) -> Stmt {
        parse_statement(text).unwrap()
    }

    #[test]
    fn test_assignment_and_implicit_call() {
        assert!(matches!(parse("X = 1"), Stmt::Let { .. }));
        assert!(matches!(parse("LET X = 1"), Stmt::Let { .. }));
        match parse("bump a, (b)") {
            Stmt::Call { name, args } => {
                assert_eq!(name, "BUMP");
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_print_items() {
        match parse("PRINT \"Hello, \"; X, 42") {
            Stmt::Print(p) => {
                assert!(p.file.is_none());
                assert_eq!(p.items.len(), 5);
                assert!(matches!(p.items[1], PrintItem::Semi));
                assert!(matches!(p.items[3], PrintItem::Comma));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_print_file_and_using() {
        match parse("PRINT #1, USING \"##.#\"; X") {
            Stmt::Print(p) => {
                assert!(p.file.is_some());
                assert!(p.using.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_single_line_if_classification() {
        assert!(is_single_line_if("IF X > 0 THEN PRINT 1").unwrap());
        assert!(!is_single_line_if("IF X > 0 THEN").unwrap());
        assert!(!is_single_line_if("PRINT \"IF THEN\"").unwrap());
    }

    #[test]
    fn test_if_single_with_else() {
        match parse("IF X THEN PRINT 1 ELSE PRINT 2") {
            Stmt::IfSingle {
                then_branch,
                else_branch,
                ..
            } => {
                assert_eq!(then_branch.len(), 1);
                assert_eq!(else_branch.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_if_single_nested_else_binds_inner() {
        // ELSE pairs with the inner IF
        match parse("IF A THEN IF B THEN PRINT 1 ELSE PRINT 2") {
            Stmt::IfSingle {
                then_branch,
                else_branch,
                ..
            } => {
                assert!(else_branch.is_empty());
                match &then_branch[0] {
                    Stmt::IfSingle {
                        then_branch,
                        else_branch,
                        ..
                    } => {
                        assert_eq!(then_branch.len(), 1);
                        assert_eq!(else_branch.len(), 1);
                    }
                    other => panic!("unexpected inner {other:?}"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_if_then_line_number() {
        match parse("IF X THEN 100") {
            Stmt::IfSingle { then_branch, .. } => {
                assert_eq!(then_branch, vec![Stmt::Goto(Target::Line(100))]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_if_consumes_rest_of_line() {
        let src = SourceProgram::parse("IF X THEN A = 1: B = 2");
        let (stmt, consumed) = parse_line_statement(&src.lines[0], 0).unwrap();
        assert!(consumed);
        match stmt {
            Stmt::IfSingle { then_branch, .. } => assert_eq!(then_branch.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_for_next() {
        match parse("FOR I = 10 TO 1 STEP -2") {
            Stmt::For { var, step, .. } => {
                assert_eq!(var.name, "I");
                assert!(step.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse("NEXT I, J") {
            Stmt::Next { vars } => assert_eq!(vars, vec!["I", "J"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_select_case_arms() {
        match parse("CASE 90 TO 99, IS >= 70, 5") {
            Stmt::Case { arms } => {
                assert_eq!(arms.len(), 3);
                assert!(matches!(arms[0], CaseArm::Range(_, _)));
                assert!(matches!(arms[1], CaseArm::Is(crate::expr::BinOp::Ge, _)));
                assert!(matches!(arms[2], CaseArm::Value(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_on_forms() {
        assert!(matches!(
            parse("ON ERROR GOTO handler"),
            Stmt::OnErrorGoto { target: Some(_) }
        ));
        assert!(matches!(
            parse("ON ERROR GOTO 0"),
            Stmt::OnErrorGoto { target: None }
        ));
        match parse("ON X GOTO 10, 20, 30") {
            Stmt::OnGoto { targets, gosub, .. } => {
                assert_eq!(targets.len(), 3);
                assert!(!gosub);
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse("ON KEY(1) GOSUB handler") {
            Stmt::OnEventGosub { event, .. } => assert_eq!(event.kind, EventKind::Key),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_event_control_vs_play() {
        assert!(matches!(
            parse("KEY(1) ON"),
            Stmt::EventControl {
                action: EventAction::On,
                ..
            }
        ));
        assert!(matches!(parse("PLAY \"cdef\""), Stmt::Play { .. }));
        assert!(matches!(
            parse("PLAY ON"),
            Stmt::EventControl { .. }
        ));
    }

    #[test]
    fn test_dim_bounds_and_as() {
        match parse("DIM SHARED grid(1 TO 10, 5), name$ , v AS LONG") {
            Stmt::Dim { shared, decls } => {
                assert!(shared);
                assert_eq!(decls.len(), 3);
                assert_eq!(decls[0].bounds.len(), 2);
                assert!(decls[0].bounds[0].0.is_some());
                assert_eq!(decls[2].ty, Some(TypeRef::Scalar(ScalarType::Long)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_proc_header() {
        match parse("SUB bump (x, y AS INTEGER, arr())") {
            Stmt::ProcStart {
                is_function,
                name,
                params,
                ..
            } => {
                assert!(!is_function);
                assert_eq!(name, "BUMP");
                assert_eq!(params.len(), 3);
                assert!(params[2].is_array);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_line_input_vs_line_gfx() {
        assert!(matches!(
            parse("LINE INPUT \"name: \"; n$"),
            Stmt::LineInput { .. }
        ));
        match parse("LINE (0, 0)-(10, 10), 4, BF") {
            Stmt::LineStmt { style, .. } => assert_eq!(style, LineStyle::FilledBox),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_get_put_disambiguation() {
        assert!(matches!(parse("GET (0,0)-(15,15), sprite"), Stmt::GfxGet { .. }));
        assert!(matches!(parse("GET #1, 5, rec"), Stmt::FileGet { .. }));
        match parse("PUT (10, 20), sprite, XOR") {
            Stmt::GfxPut { mode, .. } => assert_eq!(mode.as_deref(), Some("XOR")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_open_forms() {
        match parse("OPEN \"scores.dat\" FOR RANDOM AS #1 LEN = 32") {
            Stmt::Open { mode, rec_len, .. } => {
                assert_eq!(mode, OpenMode::Random);
                assert!(rec_len.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            parse("OPEN \"I\", #1, \"data.txt\""),
            Stmt::OpenShort { .. }
        ));
    }

    #[test]
    fn test_mid_assignment() {
        assert!(matches!(
            parse("MID$(s$, 3, 2) = \"ab\""),
            Stmt::MidAssign { .. }
        ));
    }

    #[test]
    fn test_def_fn() {
        match parse("DEF FNsq(x) = x * x") {
            Stmt::DefFn { name, params, .. } => {
                assert_eq!(name, "FNSQ");
                assert_eq!(params.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_keywords() {
        assert!(matches!(
            parse("FIELD #1, 20 AS a$"),
            Stmt::Unsupported { .. }
        ));
        assert!(matches!(parse("DEF SEG = 0"), Stmt::Unsupported { .. }));
    }

    #[test]
    fn test_deftype() {
        match parse("DEFINT A-F, X") {
            Stmt::DefType { ty, ranges } => {
                assert_eq!(ty, ScalarType::Integer);
                assert_eq!(ranges, vec![('A', 'F'), ('X', 'X')]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
