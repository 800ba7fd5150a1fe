//! Type descriptions shared by the indexer and the runtime
//!
//! Scalar kinds, sigil mapping, user-defined `TYPE` record layouts, and the
//! per-letter DEFtype table. Names are case-insensitive; the *normalized*
//! form is uppercase with the sigil kept, so `x` and `x%` stay distinct keys.

use crate::error::{Result, RuntimeError};

/// The five scalar kinds of classic BASIC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Integer,
    Long,
    Single,
    Double,
    String,
}

impl ScalarType {
    /// Type named by a sigil character, if any.
    pub fn from_sigil(c: char) -> Option<ScalarType> {
        match c {
            '%' => Some(ScalarType::Integer),
            '&' => Some(ScalarType::Long),
            '!' => Some(ScalarType::Single),
            '#' => Some(ScalarType::Double),
            '$' => Some(ScalarType::String),
            _ => None,
        }
    }

    /// Type named in an `AS` clause (`INTEGER`, `LONG`, …).
    pub fn from_keyword(word: &str) -> Option<ScalarType> {
        match word.to_ascii_uppercase().as_str() {
            "INTEGER" => Some(ScalarType::Integer),
            "LONG" => Some(ScalarType::Long),
            "SINGLE" => Some(ScalarType::Single),
            "DOUBLE" => Some(ScalarType::Double),
            "STRING" => Some(ScalarType::String),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        self != ScalarType::String
    }
}

/// Element type of a cell: scalar, fixed-length string (TYPE fields only),
/// or a record layout by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemType {
    Scalar(ScalarType),
    /// `AS STRING * n` inside a TYPE; space-padded to exactly `n` bytes.
    FixedStr(u16),
    Record(RecordId),
}

impl ElemType {
    pub const SINGLE: ElemType = ElemType::Scalar(ScalarType::Single);
}

/// Index into [`RecordTable`].
pub type RecordId = u16;

/// One `TYPE name … END TYPE` layout: ordered fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordLayout {
    pub name: String,
    pub fields: Vec<(String, ElemType)>,
}

impl RecordLayout {
    pub fn field(&self, name: &str) -> Option<(usize, ElemType)> {
        let upper = name.to_ascii_uppercase();
        self.fields
            .iter()
            .position(|(f, _)| *f == upper)
            .map(|i| (i, self.fields[i].1))
    }
}

/// All record layouts of a program, indexed by [`RecordId`].
#[derive(Debug, Clone, Default)]
pub struct RecordTable {
    layouts: Vec<RecordLayout>,
}

impl RecordTable {
    pub fn define(&mut self, layout: RecordLayout) -> Result<RecordId> {
        if self.lookup(&layout.name).is_some() {
            return Err(RuntimeError::duplicate(format!(
                "TYPE {} already defined",
                layout.name
            )));
        }
        self.layouts.push(layout);
        Ok((self.layouts.len() - 1) as RecordId)
    }

    pub fn lookup(&self, name: &str) -> Option<RecordId> {
        let upper = name.to_ascii_uppercase();
        self.layouts
            .iter()
            .position(|l| l.name == upper)
            .map(|i| i as RecordId)
    }

    pub fn layout(&self, id: RecordId) -> &RecordLayout {
        &self.layouts[id as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}

/// Per-letter default scalar type, set by `DEFINT A-Z` and friends.
/// A sigil on the name always wins over this table.
#[derive(Debug, Clone)]
pub struct DefaultTypes {
    by_letter: [ScalarType; 26],
}

impl Default for DefaultTypes {
    fn default() -> Self {
        DefaultTypes {
            by_letter: [ScalarType::Single; 26],
        }
    }
}

impl DefaultTypes {
    pub fn set_range(&mut self, from: char, to: char, ty: ScalarType) {
        let lo = from.to_ascii_uppercase() as usize;
        let hi = to.to_ascii_uppercase() as usize;
        for i in lo..=hi.min(b'Z' as usize) {
            if i >= b'A' as usize {
                self.by_letter[i - b'A' as usize] = ty;
            }
        }
    }

    pub fn for_name(&self, name: &str) -> ScalarType {
        match name.chars().next() {
            Some(c) if c.is_ascii_alphabetic() => {
                self.by_letter[(c.to_ascii_uppercase() as usize) - b'A' as usize]
            }
            _ => ScalarType::Single,
        }
    }
}

/// Split a raw identifier into its normalized base name and optional sigil.
/// `Score%` → (`"SCORE%"`, Some(Integer)). The sigil stays in the key.
pub fn normalize_name(raw: &str) -> (String, Option<ScalarType>) {
    let upper = raw.to_ascii_uppercase();
    let sigil = upper.chars().last().and_then(ScalarType::from_sigil);
    (upper, sigil)
}

/// Scalar type a name resolves to: sigil first, then the DEFtype table.
pub fn name_type(raw: &str, defaults: &DefaultTypes) -> ScalarType {
    match raw.chars().last().and_then(ScalarType::from_sigil) {
        Some(ty) => ty,
        None => defaults.for_name(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigil_mapping() {
        assert_eq!(ScalarType::from_sigil('%'), Some(ScalarType::Integer));
        assert_eq!(ScalarType::from_sigil('$'), Some(ScalarType::String));
        assert_eq!(ScalarType::from_sigil('x'), None);
    }

    #[test]
    fn test_normalize_keeps_sigil_distinct() {
        let (a, _) = normalize_name("score");
        let (b, _) = normalize_name("Score%");
        assert_eq!(a, "SCORE");
        assert_eq!(b, "SCORE%");
        assert_ne!(a, b);
    }

    #[test]
    fn test_deftype_ranges() {
        let mut d = DefaultTypes::default();
        d.set_range('a', 'f', ScalarType::Integer);
        assert_eq!(d.for_name("alpha"), ScalarType::Integer);
        assert_eq!(d.for_name("Foo"), ScalarType::Integer);
        assert_eq!(d.for_name("gamma"), ScalarType::Single);
        // Sigil wins over the table
        assert_eq!(name_type("alpha#", &d), ScalarType::Double);
    }

    #[test]
    fn test_record_table() {
        let mut table = RecordTable::default();
        let id = table
            .define(RecordLayout {
                name: "VEC".into(),
                fields: vec![
                    ("X".into(), ElemType::Scalar(ScalarType::Single)),
                    ("Y".into(), ElemType::Scalar(ScalarType::Single)),
                ],
            })
            .unwrap();
        assert_eq!(table.lookup("vec"), Some(id));
        assert_eq!(table.layout(id).field("y").unwrap().0, 1);
        assert!(
            table
                .define(RecordLayout {
                    name: "VEC".into(),
                    fields: vec![],
                })
                .is_err()
        );
    }
}
