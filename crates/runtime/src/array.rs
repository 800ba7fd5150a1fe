//! Arrays
//!
//! Row-major storage with per-dimension `(lo, hi)` bounds. An array marked
//! dynamic may be `REDIM`ed (all elements reset to zero); a static array
//! keeps its shape until `ERASE`. Graphics `GET` parks sprite captures here,
//! keyed by the start index the program named.

use std::collections::HashMap;

use qb_lang::error::{Result, RuntimeError};
use qb_lang::types::{ElemType, RecordTable};

use crate::host::Sprite;
use crate::value::Value;

/// Subscripts beyond this total size indicate a runaway DIM.
const MAX_ELEMENTS: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct BasicArray {
    pub elem: ElemType,
    pub bounds: Vec<(i32, i32)>,
    pub cells: Vec<Value>,
    pub dynamic: bool,
    /// Sprites captured by graphics GET into this array, by start index.
    pub sprites: HashMap<usize, Sprite>,
}

impl BasicArray {
    pub fn new(
        elem: ElemType,
        bounds: Vec<(i32, i32)>,
        dynamic: bool,
        records: &RecordTable,
    ) -> Result<BasicArray> {
        let mut size = 1usize;
        for (lo, hi) in &bounds {
            if hi < lo {
                return Err(RuntimeError::subscript(format!(
                    "bad bounds {lo} TO {hi}"
                )));
            }
            size = size
                .checked_mul((hi - lo + 1) as usize)
                .filter(|s| *s <= MAX_ELEMENTS)
                .ok_or_else(|| RuntimeError::subscript("array too large"))?;
        }
        let zero = Value::zero_of(elem, records);
        Ok(BasicArray {
            elem,
            bounds,
            cells: vec![zero; size],
            dynamic,
            sprites: HashMap::new(),
        })
    }

    pub fn dims(&self) -> usize {
        self.bounds.len()
    }

    /// Flat offset for a subscript list; `Subscript` when out of range.
    pub fn offset(&self, subscripts: &[i32]) -> Result<usize> {
        if subscripts.len() != self.bounds.len() {
            return Err(RuntimeError::subscript(format!(
                "expected {} subscripts, got {}",
                self.bounds.len(),
                subscripts.len()
            )));
        }
        let mut flat = 0usize;
        for (i, (&(lo, hi), &idx)) in self.bounds.iter().zip(subscripts).enumerate() {
            if idx < lo || idx > hi {
                return Err(RuntimeError::subscript(format!(
                    "subscript {idx} outside {lo} TO {hi} in dimension {}",
                    i + 1
                )));
            }
            flat = flat * (hi - lo + 1) as usize + (idx - lo) as usize;
        }
        Ok(flat)
    }

    pub fn get(&self, subscripts: &[i32]) -> Result<&Value> {
        Ok(&self.cells[self.offset(subscripts)?])
    }

    pub fn get_mut(&mut self, subscripts: &[i32]) -> Result<&mut Value> {
        let off = self.offset(subscripts)?;
        Ok(&mut self.cells[off])
    }

    /// Recreate with new bounds, zeroing every element. Only dynamic arrays
    /// may be redimensioned.
    pub fn redim(&mut self, bounds: Vec<(i32, i32)>, records: &RecordTable) -> Result<()> {
        if !self.dynamic {
            return Err(RuntimeError::duplicate("array is not dynamic"));
        }
        let fresh = BasicArray::new(self.elem, bounds, true, records)?;
        self.bounds = fresh.bounds;
        self.cells = fresh.cells;
        self.sprites.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qb_lang::types::ScalarType;

    fn records() -> RecordTable {
        RecordTable::default()
    }

    fn int_array(bounds: Vec<(i32, i32)>) -> BasicArray {
        BasicArray::new(
            ElemType::Scalar(ScalarType::Integer),
            bounds,
            true,
            &records(),
        )
        .unwrap()
    }

    #[test]
    fn test_zero_after_dim() {
        let a = int_array(vec![(0, 4)]);
        for i in 0..=4 {
            assert_eq!(a.get(&[i]).unwrap(), &Value::Integer(0));
        }
    }

    #[test]
    fn test_row_major_offsets() {
        let mut a = int_array(vec![(1, 3), (1, 2)]);
        *a.get_mut(&[2, 1]).unwrap() = Value::Integer(7);
        assert_eq!(a.get(&[2, 1]).unwrap(), &Value::Integer(7));
        assert_eq!(a.get(&[2, 2]).unwrap(), &Value::Integer(0));
    }

    #[test]
    fn test_subscript_out_of_range() {
        let a = int_array(vec![(1, 10)]);
        assert!(a.get(&[0]).is_err());
        assert!(a.get(&[11]).is_err());
        assert!(a.get(&[1, 1]).is_err());
    }

    #[test]
    fn test_redim_zeroes() {
        let mut a = int_array(vec![(0, 3)]);
        *a.get_mut(&[2]).unwrap() = Value::Integer(9);
        a.redim(vec![(0, 5)], &records()).unwrap();
        assert_eq!(a.bounds, vec![(0, 5)]);
        assert_eq!(a.get(&[2]).unwrap(), &Value::Integer(0));
    }

    #[test]
    fn test_redim_static_rejected() {
        let mut a = BasicArray::new(
            ElemType::Scalar(ScalarType::Integer),
            vec![(0, 3)],
            false,
            &records(),
        )
        .unwrap();
        assert!(a.redim(vec![(0, 5)], &records()).is_err());
    }
}
