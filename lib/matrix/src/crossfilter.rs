use std::sync::Arc;

use cellgrid_core::{
    CellValue, ColumnSchema, Error, Field, Query, Rect, Result, SelectionFilter,
};

use crate::annomatrix::{AnnoMatrix, ColumnInit};
use crate::bitset::BitSet;

/// Interaction phase of a graph brush or lasso gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrushPhase {
    Start,
    Change,
    End,
    Cancel,
    Deselect,
}

/// The current observation selection over an [`AnnoMatrix`].
///
/// Selection-mutating operations return a new `(AnnoMatrix, Crossfilter)`
/// pair; nothing is mutated in place. Any operation that changes the row
/// count invalidates and recomputes the selection rather than
/// reinterpreting stale offsets.
#[derive(Clone)]
pub struct Crossfilter {
    matrix: Arc<AnnoMatrix>,
    selection: BitSet,
}

impl Crossfilter {
    /// All observations selected.
    #[must_use]
    pub fn new(matrix: Arc<AnnoMatrix>) -> Self {
        let selection = BitSet::new(matrix.n_obs(), true);
        Self { matrix, selection }
    }

    #[inline]
    #[must_use]
    pub fn matrix(&self) -> &Arc<AnnoMatrix> {
        &self.matrix
    }

    #[inline]
    #[must_use]
    pub fn count_selected(&self) -> usize {
        self.selection.count_ones()
    }

    #[inline]
    #[must_use]
    pub fn is_selected(&self, offset: usize) -> bool {
        self.selection.get(offset)
    }

    /// Labels of the selected rows, in index enumeration order.
    #[must_use]
    pub fn selected_labels(&self) -> Vec<i32> {
        let index = self.matrix.row_index();
        self.selection
            .ones()
            .into_iter()
            .filter_map(|o| index.label_at(o))
            .collect()
    }

    fn with_selection(&self, selection: BitSet) -> (Arc<AnnoMatrix>, Crossfilter) {
        let matrix = Arc::clone(&self.matrix);
        (
            Arc::clone(&matrix),
            Crossfilter { matrix, selection },
        )
    }

    /// Pair a (possibly new) matrix with a selection, recomputing whenever
    /// the row count no longer matches.
    fn rebind(matrix: Arc<AnnoMatrix>, selection: BitSet) -> (Arc<AnnoMatrix>, Crossfilter) {
        let selection = if selection.len() == matrix.n_obs() {
            selection
        } else {
            BitSet::new(matrix.n_obs(), true)
        };
        (
            Arc::clone(&matrix),
            Crossfilter { matrix, selection },
        )
    }

    #[must_use]
    pub fn select_all(&self) -> (Arc<AnnoMatrix>, Crossfilter) {
        self.with_selection(BitSet::new(self.matrix.n_obs(), true))
    }

    /// Select rows whose categorical value is one of `values`.
    pub async fn select_categorical(
        &self,
        col: &str,
        values: &[String],
    ) -> Result<(Arc<AnnoMatrix>, Crossfilter)> {
        let frame = self.matrix.fetch(Field::Obs, &Query::simple(col)).await?;
        let filter = SelectionFilter::AnyOf {
            values: values.to_vec(),
        };
        let bits = filter.eval_column(frame.col(col)?)?;
        Ok(self.with_selection(BitSet::from_bools(&bits)))
    }

    /// Select rows whose continuous value lies in `[lo, hi]`.
    pub async fn select_range(
        &self,
        col: &str,
        lo: f64,
        hi: f64,
    ) -> Result<(Arc<AnnoMatrix>, Crossfilter)> {
        let frame = self.matrix.fetch(Field::Obs, &Query::simple(col)).await?;
        let filter = SelectionFilter::Range { lo, hi };
        let bits = filter.eval_column(frame.col(col)?)?;
        Ok(self.with_selection(BitSet::from_bools(&bits)))
    }

    /// Graph brush over a named layout. `Start` leaves the selection
    /// unchanged; `Change`/`End` apply the rectangle; `End` without one,
    /// `Cancel` and `Deselect` restore select-all.
    pub async fn brush_rect(
        &self,
        layout: &str,
        phase: BrushPhase,
        rect: Option<Rect>,
    ) -> Result<(Arc<AnnoMatrix>, Crossfilter)> {
        match (phase, rect) {
            (BrushPhase::Start, _) => Ok(self.with_selection(self.selection.clone())),
            (BrushPhase::Change | BrushPhase::End, Some(rect)) => {
                self.select_spatial(layout, SelectionFilter::WithinRect(rect))
                    .await
            }
            _ => Ok(self.select_all()),
        }
    }

    /// Lasso polygon over a named layout. `End` with a polygon applies it;
    /// every other phase restores select-all except `Start`.
    pub async fn lasso(
        &self,
        layout: &str,
        phase: BrushPhase,
        polygon: Option<Vec<(f32, f32)>>,
    ) -> Result<(Arc<AnnoMatrix>, Crossfilter)> {
        match (phase, polygon) {
            (BrushPhase::Start, _) => Ok(self.with_selection(self.selection.clone())),
            (BrushPhase::End, Some(vertices)) => {
                self.select_spatial(layout, SelectionFilter::WithinPolygon { vertices })
                    .await
            }
            _ => Ok(self.select_all()),
        }
    }

    async fn select_spatial(
        &self,
        layout: &str,
        filter: SelectionFilter,
    ) -> Result<(Arc<AnnoMatrix>, Crossfilter)> {
        let dims = self
            .matrix
            .schema()
            .layout(layout)
            .ok_or_else(|| Error::LayoutNotFound(layout.to_string()))?
            .dims
            .clone();
        if dims.len() < 2 {
            return Err(Error::InvalidQuery(format!(
                "layout {layout} has fewer than two dimensions"
            )));
        }
        let frame = self.matrix.fetch(Field::Emb, &Query::simple(layout)).await?;
        let xs = frame
            .col(&dims[0])?
            .as_f32s()
            .ok_or_else(|| Error::Decode(format!("layout column {} is not float", dims[0])))?
            .to_vec();
        let ys = frame
            .col(&dims[1])?
            .as_f32s()
            .ok_or_else(|| Error::Decode(format!("layout column {} is not float", dims[1])))?
            .to_vec();
        let bits = filter.eval_layout(&xs, &ys)?;
        Ok(self.with_selection(BitSet::from_bools(&bits)))
    }

    /// Add an observation column to the underlying matrix; the selection
    /// carries over unchanged (row count is preserved).
    pub fn with_obs_column(
        &self,
        col_schema: ColumnSchema,
        init: ColumnInit,
    ) -> Result<(Arc<AnnoMatrix>, Crossfilter)> {
        let matrix = self.matrix.with_obs_column(col_schema, init)?;
        Ok(Self::rebind(matrix, self.selection.clone()))
    }

    pub fn drop_obs_column(&self, name: &str) -> Result<(Arc<AnnoMatrix>, Crossfilter)> {
        let matrix = self.matrix.drop_obs_column(name)?;
        Ok(Self::rebind(matrix, self.selection.clone()))
    }

    /// Set the values of a categorical column for the selected rows.
    pub async fn set_selected_values(
        &self,
        col: &str,
        value: &CellValue,
    ) -> Result<(Arc<AnnoMatrix>, Crossfilter)> {
        let labels = self.selected_labels();
        let matrix = self
            .matrix
            .set_obs_column_values(col, &labels, value)
            .await?;
        Ok(Self::rebind(matrix, self.selection.clone()))
    }

    /// Narrow the matrix to the given row labels. The row count changes,
    /// so the selection is recomputed rather than carried over.
    pub fn subset(&self, labels: &[i32]) -> Result<(Arc<AnnoMatrix>, Crossfilter)> {
        let matrix = self.matrix.subset_by_labels(labels)?;
        let selection = BitSet::new(matrix.n_obs(), true);
        Ok((
            Arc::clone(&matrix),
            Crossfilter { matrix, selection },
        ))
    }

    /// Return to the unfiltered base matrix with everything selected.
    #[must_use]
    pub fn reset_subset(&self) -> (Arc<AnnoMatrix>, Crossfilter) {
        let base = self.matrix.base();
        let cf = Crossfilter::new(Arc::clone(&base));
        (base, cf)
    }
}
