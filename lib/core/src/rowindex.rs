use ahash::AHashMap;
use std::sync::Arc;

use crate::{Error, Result};

/// Bidirectional mapping between external row labels and dense offsets.
///
/// Created once per base matrix and narrowed (not recomputed) when a view
/// subsets rows. Label and offset tables are shared between clones.
#[derive(Debug, Clone)]
pub struct RowIndex {
    labels: Arc<Vec<i32>>,
    offsets: Arc<AHashMap<i32, u32>>,
}

impl RowIndex {
    /// Identity index: labels 0..n at offsets 0..n.
    #[must_use]
    pub fn identity(n: usize) -> Self {
        let labels: Vec<i32> = (0..n as i32).collect();
        let offsets = labels.iter().map(|&l| (l, l as u32)).collect();
        Self {
            labels: Arc::new(labels),
            offsets: Arc::new(offsets),
        }
    }

    pub fn from_labels(labels: Vec<i32>) -> Result<Self> {
        let mut offsets = AHashMap::with_capacity(labels.len());
        for (i, &label) in labels.iter().enumerate() {
            if offsets.insert(label, i as u32).is_some() {
                return Err(Error::DuplicateRowLabel(label));
            }
        }
        Ok(Self {
            labels: Arc::new(labels),
            offsets: Arc::new(offsets),
        })
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    #[inline]
    #[must_use]
    pub fn label_at(&self, offset: usize) -> Option<i32> {
        self.labels.get(offset).copied()
    }

    #[inline]
    #[must_use]
    pub fn offset_of(&self, label: i32) -> Option<usize> {
        self.offsets.get(&label).map(|&o| o as usize)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, label: i32) -> bool {
        self.offsets.contains_key(&label)
    }

    /// Offsets for a list of labels; any unknown label is an error.
    pub fn offsets_of(&self, labels: &[i32]) -> Result<Vec<usize>> {
        labels
            .iter()
            .map(|&l| self.offset_of(l).ok_or(Error::UnknownRowLabel(l)))
            .collect()
    }

    /// Narrow this index to `labels`, keeping their given order.
    pub fn subset(&self, labels: &[i32]) -> Result<RowIndex> {
        for &l in labels {
            if !self.contains(l) {
                return Err(Error::UnknownRowLabel(l));
            }
        }
        RowIndex::from_labels(labels.to_vec())
    }

    /// Labels present in both indices, in this index's enumeration order.
    #[must_use]
    pub fn intersect(&self, other: &RowIndex) -> Vec<i32> {
        self.labels
            .iter()
            .copied()
            .filter(|&l| other.contains(l))
            .collect()
    }
}

impl PartialEq for RowIndex {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.labels, &other.labels) || self.labels == other.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_round_trip() {
        let idx = RowIndex::identity(4);
        assert_eq!(idx.len(), 4);
        assert_eq!(idx.offset_of(2), Some(2));
        assert_eq!(idx.label_at(3), Some(3));
    }

    #[test]
    fn test_subset_preserves_order() {
        let idx = RowIndex::identity(10);
        let sub = idx.subset(&[7, 2, 5]).unwrap();
        assert_eq!(sub.labels(), &[7, 2, 5]);
        assert_eq!(sub.offset_of(2), Some(1));
    }

    #[test]
    fn test_subset_unknown_label() {
        let idx = RowIndex::identity(3);
        assert!(matches!(
            idx.subset(&[0, 9]),
            Err(Error::UnknownRowLabel(9))
        ));
    }

    #[test]
    fn test_duplicate_label_rejected() {
        assert!(matches!(
            RowIndex::from_labels(vec![1, 2, 1]),
            Err(Error::DuplicateRowLabel(1))
        ));
    }

    #[test]
    fn test_intersect_keeps_receiver_order() {
        let a = RowIndex::from_labels(vec![3, 1, 2]).unwrap();
        let b = RowIndex::from_labels(vec![2, 3]).unwrap();
        assert_eq!(a.intersect(&b), vec![3, 2]);
    }
}
