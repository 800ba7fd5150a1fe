//! DATA pool cursor
//!
//! The indexer flattens every `DATA` item into one pool in source order;
//! this cursor is the `READ` pointer. `RESTORE` moves it to 0 or to the
//! offset recorded for a label's line.

use qb_lang::error::Result;
use qb_lang::error::RuntimeError;
use qb_lang::Program;

#[derive(Debug, Default)]
pub struct DataCursor {
    pos: usize,
}

impl DataCursor {
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn restore(&mut self, offset: usize) {
        self.pos = offset;
    }

    /// Next raw item; `Out of DATA` (code 4) past the end, without
    /// advancing the cursor.
    pub fn next<'p>(&mut self, program: &'p Program) -> Result<&'p str> {
        match program.data_pool.get(self.pos) {
            Some(item) => {
                self.pos += 1;
                Ok(item)
            }
            None => Err(RuntimeError::out_of_data()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qb_lang::load_program;

    #[test]
    fn test_read_and_restore() {
        let program = load_program("DATA 1, 2\nmid:\nDATA 3").unwrap();
        let mut cursor = DataCursor::default();
        assert_eq!(cursor.next(&program).unwrap(), "1");
        assert_eq!(cursor.next(&program).unwrap(), "2");
        cursor.restore(0);
        assert_eq!(cursor.next(&program).unwrap(), "1");
        cursor.restore(
            program
                .data_offset_for(Some(&qb_lang::stmt::Target::Label("MID".into())), None)
                .unwrap(),
        );
        assert_eq!(cursor.next(&program).unwrap(), "3");
    }

    #[test]
    fn test_out_of_data_does_not_advance() {
        let program = load_program("DATA 1").unwrap();
        let mut cursor = DataCursor::default();
        cursor.next(&program).unwrap();
        let err = cursor.next(&program).unwrap_err();
        assert_eq!(err.code, 4);
        assert_eq!(cursor.position(), 1);
    }
}
