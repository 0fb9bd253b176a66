use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Schema-level type tag for a column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Float32,
    Int32,
    UInt32,
    Boolean,
    Categorical,
}

/// A single cell value, used when broadcasting or rewriting column entries.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    F32(f32),
    I32(i32),
    U32(u32),
    Bool(bool),
    Str(String),
}

impl CellValue {
    #[inline]
    #[must_use]
    pub fn dtype(&self) -> ColumnType {
        match self {
            CellValue::F32(_) => ColumnType::Float32,
            CellValue::I32(_) => ColumnType::Int32,
            CellValue::U32(_) => ColumnType::UInt32,
            CellValue::Bool(_) => ColumnType::Boolean,
            CellValue::Str(_) => ColumnType::Categorical,
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Str(s.to_string())
    }
}

/// Column data - a homogeneously-typed sequence of values
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ColumnData {
    Float32(Vec<f32>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Boolean(Vec<bool>),
    Categorical(Vec<String>),
}

impl ColumnData {
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float32(v) => v.len(),
            ColumnData::Int32(v) => v.len(),
            ColumnData::UInt32(v) => v.len(),
            ColumnData::Boolean(v) => v.len(),
            ColumnData::Categorical(v) => v.len(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    #[must_use]
    pub fn dtype(&self) -> ColumnType {
        match self {
            ColumnData::Float32(_) => ColumnType::Float32,
            ColumnData::Int32(_) => ColumnType::Int32,
            ColumnData::UInt32(_) => ColumnType::UInt32,
            ColumnData::Boolean(_) => ColumnType::Boolean,
            ColumnData::Categorical(_) => ColumnType::Categorical,
        }
    }

    /// Build a column of `len` copies of `value`.
    pub fn broadcast(value: &CellValue, len: usize) -> ColumnData {
        match value {
            CellValue::F32(x) => ColumnData::Float32(vec![*x; len]),
            CellValue::I32(x) => ColumnData::Int32(vec![*x; len]),
            CellValue::U32(x) => ColumnData::UInt32(vec![*x; len]),
            CellValue::Bool(x) => ColumnData::Boolean(vec![*x; len]),
            CellValue::Str(x) => ColumnData::Categorical(vec![x.clone(); len]),
        }
    }

    pub fn get(&self, offset: usize) -> Result<CellValue> {
        if offset >= self.len() {
            return Err(Error::OffsetOutOfBounds(offset));
        }
        Ok(match self {
            ColumnData::Float32(v) => CellValue::F32(v[offset]),
            ColumnData::Int32(v) => CellValue::I32(v[offset]),
            ColumnData::UInt32(v) => CellValue::U32(v[offset]),
            ColumnData::Boolean(v) => CellValue::Bool(v[offset]),
            ColumnData::Categorical(v) => CellValue::Str(v[offset].clone()),
        })
    }

    /// New column containing the given row offsets, in the given order.
    pub fn slice(&self, offsets: &[usize]) -> Result<ColumnData> {
        fn take<T: Clone>(v: &[T], offsets: &[usize]) -> Result<Vec<T>> {
            offsets
                .iter()
                .map(|&i| v.get(i).cloned().ok_or(Error::OffsetOutOfBounds(i)))
                .collect()
        }
        Ok(match self {
            ColumnData::Float32(v) => ColumnData::Float32(take(v, offsets)?),
            ColumnData::Int32(v) => ColumnData::Int32(take(v, offsets)?),
            ColumnData::UInt32(v) => ColumnData::UInt32(take(v, offsets)?),
            ColumnData::Boolean(v) => ColumnData::Boolean(take(v, offsets)?),
            ColumnData::Categorical(v) => ColumnData::Categorical(take(v, offsets)?),
        })
    }

    /// Rewrite the entries at `offsets` to `value`. Fails on type mismatch.
    pub fn set_at(&self, offsets: &[usize], value: &CellValue) -> Result<ColumnData> {
        if value.dtype() != self.dtype() {
            return Err(Error::TypeMismatch {
                expected: self.dtype(),
                actual: value.dtype(),
            });
        }
        let mut out = self.clone();
        for &i in offsets {
            if i >= out.len() {
                return Err(Error::OffsetOutOfBounds(i));
            }
            match (&mut out, value) {
                (ColumnData::Float32(v), CellValue::F32(x)) => v[i] = *x,
                (ColumnData::Int32(v), CellValue::I32(x)) => v[i] = *x,
                (ColumnData::UInt32(v), CellValue::U32(x)) => v[i] = *x,
                (ColumnData::Boolean(v), CellValue::Bool(x)) => v[i] = *x,
                (ColumnData::Categorical(v), CellValue::Str(x)) => v[i] = x.clone(),
                _ => unreachable!("dtype checked above"),
            }
        }
        Ok(out)
    }

    /// Rewrite every entry equal to `old` to `new` (categorical columns).
    pub fn replace_value(&self, old: &str, new: &str) -> Result<ColumnData> {
        match self {
            ColumnData::Categorical(v) => Ok(ColumnData::Categorical(
                v.iter()
                    .map(|s| {
                        if s == old {
                            new.to_string()
                        } else {
                            s.clone()
                        }
                    })
                    .collect(),
            )),
            _ => Err(Error::TypeMismatch {
                expected: ColumnType::Categorical,
                actual: self.dtype(),
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn as_f32s(&self) -> Option<&[f32]> {
        match self {
            ColumnData::Float32(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            ColumnData::Categorical(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric view of the value at `offset`, for continuous predicates.
    pub fn as_f64_at(&self, offset: usize) -> Option<f64> {
        match self {
            ColumnData::Float32(v) => v.get(offset).map(|&x| f64::from(x)),
            ColumnData::Int32(v) => v.get(offset).map(|&x| f64::from(x)),
            ColumnData::UInt32(v) => v.get(offset).map(|&x| f64::from(x)),
            ColumnData::Boolean(_) | ColumnData::Categorical(_) => None,
        }
    }

    /// Distinct values of a categorical column, in first-seen order.
    pub fn summarize_categories(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        if let ColumnData::Categorical(v) = self {
            for s in v {
                if !seen.iter().any(|c| c == s) {
                    seen.push(s.clone());
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_reorders() {
        let col = ColumnData::Int32(vec![10, 20, 30, 40]);
        let out = col.slice(&[3, 1]).unwrap();
        assert_eq!(out, ColumnData::Int32(vec![40, 20]));
    }

    #[test]
    fn test_slice_out_of_bounds() {
        let col = ColumnData::Int32(vec![1, 2]);
        assert!(matches!(
            col.slice(&[5]),
            Err(Error::OffsetOutOfBounds(5))
        ));
    }

    #[test]
    fn test_set_at_type_check() {
        let col = ColumnData::Categorical(vec!["a".into(), "b".into()]);
        let err = col.set_at(&[0], &CellValue::I32(1)).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));

        let out = col.set_at(&[1], &CellValue::from("c")).unwrap();
        assert_eq!(out.as_strings().unwrap(), &["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_summarize_categories_first_seen_order() {
        let col = ColumnData::Categorical(vec![
            "b".into(),
            "a".into(),
            "b".into(),
            "c".into(),
        ]);
        assert_eq!(col.summarize_categories(), vec!["b", "a", "c"]);
    }
}
