use ahash::AHashMap;
use std::sync::Arc;

use crate::column::ColumnData;
use crate::rowindex::RowIndex;
use crate::{Error, Result};

/// An immutable, typed, named-column table.
///
/// Every operation returns a new `Dataframe`; the receiver is never
/// mutated. Column payloads are `Arc`-shared, so derived frames overlay
/// deltas without duplicating resident data. Invariant: all columns have
/// length equal to the frame's row count, and all share one [`RowIndex`].
#[derive(Debug, Clone)]
pub struct Dataframe {
    row_index: RowIndex,
    columns: Vec<(String, Arc<ColumnData>)>,
    by_name: AHashMap<String, usize>,
}

impl Dataframe {
    /// Frame with no columns over the given row space.
    #[must_use]
    pub fn empty(row_index: RowIndex) -> Self {
        Self {
            row_index,
            columns: Vec::new(),
            by_name: AHashMap::new(),
        }
    }

    pub fn from_columns(
        row_index: RowIndex,
        columns: Vec<(String, ColumnData)>,
    ) -> Result<Self> {
        let mut df = Dataframe::empty(row_index);
        for (name, data) in columns {
            df = df.with_col(&name, data)?;
        }
        Ok(df)
    }

    #[inline]
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.row_index.len()
    }

    #[inline]
    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn row_index(&self) -> &RowIndex {
        &self.row_index
    }

    #[inline]
    #[must_use]
    pub fn has_col(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn col(&self, name: &str) -> Result<&ColumnData> {
        self.by_name
            .get(name)
            .map(|&i| self.columns[i].1.as_ref())
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
    }

    pub fn col_shared(&self, name: &str) -> Result<Arc<ColumnData>> {
        self.by_name
            .get(name)
            .map(|&i| Arc::clone(&self.columns[i].1))
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))
    }

    #[must_use]
    pub fn col_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// New frame with `data` added under `name`. Length is checked before
    /// the new frame is returned.
    pub fn with_col(&self, name: &str, data: ColumnData) -> Result<Dataframe> {
        self.with_col_shared(name, Arc::new(data))
    }

    /// `with_col` without copying an already-shared column payload.
    pub fn with_col_shared(&self, name: &str, data: Arc<ColumnData>) -> Result<Dataframe> {
        if self.has_col(name) {
            return Err(Error::ColumnExists(name.to_string()));
        }
        if data.len() != self.n_rows() {
            return Err(Error::LengthMismatch {
                expected: self.n_rows(),
                actual: data.len(),
            });
        }
        let mut out = self.clone();
        out.by_name.insert(name.to_string(), out.columns.len());
        out.columns.push((name.to_string(), data));
        Ok(out)
    }

    pub fn drop_col(&self, name: &str) -> Result<Dataframe> {
        if !self.has_col(name) {
            return Err(Error::ColumnNotFound(name.to_string()));
        }
        let columns: Vec<(String, Arc<ColumnData>)> = self
            .columns
            .iter()
            .filter(|(n, _)| n != name)
            .cloned()
            .collect();
        let by_name = columns
            .iter()
            .enumerate()
            .map(|(i, (n, _))| (n.clone(), i))
            .collect();
        Ok(Dataframe {
            row_index: self.row_index.clone(),
            columns,
            by_name,
        })
    }

    /// Same columns, one column's values replaced.
    pub fn replace_col_data(&self, name: &str, data: ColumnData) -> Result<Dataframe> {
        let idx = *self
            .by_name
            .get(name)
            .ok_or_else(|| Error::ColumnNotFound(name.to_string()))?;
        if data.len() != self.n_rows() {
            return Err(Error::LengthMismatch {
                expected: self.n_rows(),
                actual: data.len(),
            });
        }
        let mut out = self.clone();
        out.columns[idx].1 = Arc::new(data);
        Ok(out)
    }

    /// New frame containing only the given row offsets, in the given order.
    /// Supports both subsetting and reordering.
    pub fn isubset(&self, offsets: &[usize]) -> Result<Dataframe> {
        let labels: Vec<i32> = offsets
            .iter()
            .map(|&o| {
                self.row_index
                    .label_at(o)
                    .ok_or(Error::OffsetOutOfBounds(o))
            })
            .collect::<Result<_>>()?;
        let row_index = RowIndex::from_labels(labels)?;
        let columns: Vec<(String, Arc<ColumnData>)> = self
            .columns
            .iter()
            .map(|(n, c)| Ok((n.clone(), Arc::new(c.slice(offsets)?))))
            .collect::<Result<_>>()?;
        let by_name = self.by_name.clone();
        Ok(Dataframe {
            row_index,
            columns,
            by_name,
        })
    }

    /// New frame restricted to the given row labels, in the given order.
    pub fn subset_by_labels(&self, labels: &[i32]) -> Result<Dataframe> {
        let offsets = self.row_index.offsets_of(labels)?;
        self.isubset(&offsets)
    }

    /// New frame containing only the named columns.
    pub fn select_cols(&self, names: &[String]) -> Result<Dataframe> {
        let mut out = Dataframe::empty(self.row_index.clone());
        for name in names {
            out = out.with_col_shared(name, self.col_shared(name)?)?;
        }
        Ok(out)
    }

    /// Merge: columns of `other` are added, replacing same-named columns.
    /// Both frames must share a row space.
    pub fn with_cols_from(&self, other: &Dataframe) -> Result<Dataframe> {
        if other.n_rows() != self.n_rows() {
            return Err(Error::LengthMismatch {
                expected: self.n_rows(),
                actual: other.n_rows(),
            });
        }
        let mut out = self.clone();
        for (name, data) in &other.columns {
            if out.has_col(name) {
                let idx = out.by_name[name];
                out.columns[idx].1 = Arc::clone(data);
            } else {
                out.by_name.insert(name.clone(), out.columns.len());
                out.columns.push((name.clone(), Arc::clone(data)));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Dataframe {
        Dataframe::from_columns(
            RowIndex::identity(3),
            vec![
                ("a".to_string(), ColumnData::Int32(vec![1, 2, 3])),
                (
                    "b".to_string(),
                    ColumnData::Categorical(vec!["x".into(), "y".into(), "z".into()]),
                ),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_with_col_rejects_duplicate() {
        let df = frame();
        assert!(matches!(
            df.with_col("a", ColumnData::Int32(vec![0, 0, 0])),
            Err(Error::ColumnExists(_))
        ));
    }

    #[test]
    fn test_with_col_checks_length() {
        let df = frame();
        assert!(matches!(
            df.with_col("c", ColumnData::Int32(vec![0])),
            Err(Error::LengthMismatch {
                expected: 3,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_operations_do_not_mutate_receiver() {
        let df = frame();
        let df2 = df.drop_col("a").unwrap();
        let df3 = df
            .replace_col_data("a", ColumnData::Int32(vec![9, 9, 9]))
            .unwrap();
        assert!(df.has_col("a"));
        assert_eq!(df.col("a").unwrap(), &ColumnData::Int32(vec![1, 2, 3]));
        assert!(!df2.has_col("a"));
        assert_eq!(df3.col("a").unwrap(), &ColumnData::Int32(vec![9, 9, 9]));
    }

    #[test]
    fn test_isubset_reorders() {
        let df = frame();
        let sub = df.isubset(&[2, 0]).unwrap();
        assert_eq!(sub.n_rows(), 2);
        assert_eq!(sub.col("a").unwrap(), &ColumnData::Int32(vec![3, 1]));
        assert_eq!(sub.row_index().labels(), &[2, 0]);
    }

    #[test]
    fn test_row_count_invariant() {
        let df = frame();
        for name in df.col_names() {
            assert_eq!(df.col(name).unwrap().len(), df.n_rows());
        }
        let sub = df.isubset(&[1]).unwrap();
        for name in sub.col_names() {
            assert_eq!(sub.col(name).unwrap().len(), sub.n_rows());
        }
    }

    #[test]
    fn test_merge_replaces_and_appends() {
        let df = frame();
        let other = Dataframe::from_columns(
            RowIndex::identity(3),
            vec![
                ("a".to_string(), ColumnData::Int32(vec![7, 7, 7])),
                ("c".to_string(), ColumnData::Boolean(vec![true, false, true])),
            ],
        )
        .unwrap();
        let merged = df.with_cols_from(&other).unwrap();
        assert_eq!(merged.col("a").unwrap(), &ColumnData::Int32(vec![7, 7, 7]));
        assert!(merged.has_col("c"));
        assert_eq!(merged.n_cols(), 3);
    }
}
