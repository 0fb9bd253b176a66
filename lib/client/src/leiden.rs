// Clustering ("leiden") results: construction of the categorical
// observation column from per-subset cluster labels.

use cellgrid_core::{ColumnData, ColumnSchema, ColumnType, RowIndex};

use crate::UNASSIGNED_LABEL;

/// Build the new cluster column over `matrix_index`'s row space.
///
/// Rows outside the subset default to the "unassigned" sentinel; rows
/// inside take the returned label by position, falling back to the
/// sentinel when a label is missing. Subset labels no longer present in
/// the matrix are skipped.
#[must_use]
pub fn leiden_column(
    cluster_labels: &[String],
    subset_labels: &[i32],
    matrix_index: &RowIndex,
) -> (ColumnSchema, ColumnData) {
    let mut values = vec![UNASSIGNED_LABEL.to_string(); matrix_index.len()];
    for (i, &label) in subset_labels.iter().enumerate() {
        if let Some(offset) = matrix_index.offset_of(label) {
            values[offset] = cluster_labels
                .get(i)
                .cloned()
                .unwrap_or_else(|| UNASSIGNED_LABEL.to_string());
        }
    }

    let data = ColumnData::Categorical(values);
    let mut categories = data.summarize_categories();
    // The sentinel is always present in the category list, used or not.
    if !categories.iter().any(|c| c == UNASSIGNED_LABEL) {
        categories.push(UNASSIGNED_LABEL.to_string());
    }

    let schema = ColumnSchema {
        name: String::new(),
        kind: ColumnType::Categorical,
        writable: true,
        categories: Some(categories),
    };
    (schema, data)
}
