// Selection predicates evaluated over columns or layout coordinates.
use crate::column::ColumnData;
use crate::{Error, Result};

/// Axis-aligned rectangle in layout coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Rect {
    #[inline]
    #[must_use]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionFilter {
    /// Categorical membership: row value is one of `values`.
    AnyOf { values: Vec<String> },
    /// Continuous inclusive range over a numeric column.
    Range { lo: f64, hi: f64 },
    /// Brush rectangle over a 2-D layout.
    WithinRect(Rect),
    /// Lasso polygon over a 2-D layout.
    WithinPolygon { vertices: Vec<(f32, f32)> },
}

impl SelectionFilter {
    /// Evaluate a one-dimensional predicate to a membership vector.
    pub fn eval_column(&self, col: &ColumnData) -> Result<Vec<bool>> {
        match self {
            SelectionFilter::AnyOf { values } => {
                let data = col.as_strings().ok_or(Error::TypeMismatch {
                    expected: crate::column::ColumnType::Categorical,
                    actual: col.dtype(),
                })?;
                Ok(data
                    .iter()
                    .map(|v| values.iter().any(|s| s == v))
                    .collect())
            }
            SelectionFilter::Range { lo, hi } => (0..col.len())
                .map(|i| {
                    col.as_f64_at(i)
                        .map(|x| x >= *lo && x <= *hi)
                        .ok_or(Error::TypeMismatch {
                            expected: crate::column::ColumnType::Float32,
                            actual: col.dtype(),
                        })
                })
                .collect(),
            _ => Err(Error::InvalidQuery(
                "spatial predicate applied to a single column".to_string(),
            )),
        }
    }

    /// Evaluate a spatial predicate over paired layout coordinates.
    pub fn eval_layout(&self, xs: &[f32], ys: &[f32]) -> Result<Vec<bool>> {
        if xs.len() != ys.len() {
            return Err(Error::LengthMismatch {
                expected: xs.len(),
                actual: ys.len(),
            });
        }
        match self {
            SelectionFilter::WithinRect(rect) => Ok(xs
                .iter()
                .zip(ys)
                .map(|(&x, &y)| rect.contains(x, y))
                .collect()),
            SelectionFilter::WithinPolygon { vertices } => Ok(xs
                .iter()
                .zip(ys)
                .map(|(&x, &y)| point_in_polygon(x, y, vertices))
                .collect()),
            _ => Err(Error::InvalidQuery(
                "column predicate applied to layout coordinates".to_string(),
            )),
        }
    }
}

/// Ray-casting point-in-polygon test.
fn point_in_polygon(x: f32, y: f32, vertices: &[(f32, f32)]) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = vertices[i];
        let (xj, yj) = vertices[j];
        if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_of() {
        let col = ColumnData::Categorical(vec!["t".into(), "b".into(), "t".into()]);
        let f = SelectionFilter::AnyOf {
            values: vec!["t".to_string()],
        };
        assert_eq!(f.eval_column(&col).unwrap(), vec![true, false, true]);
    }

    #[test]
    fn test_range_inclusive() {
        let col = ColumnData::Float32(vec![0.5, 1.0, 2.0, 3.5]);
        let f = SelectionFilter::Range { lo: 1.0, hi: 2.0 };
        assert_eq!(
            f.eval_column(&col).unwrap(),
            vec![false, true, true, false]
        );
    }

    #[test]
    fn test_range_rejects_categorical() {
        let col = ColumnData::Categorical(vec!["a".into()]);
        let f = SelectionFilter::Range { lo: 0.0, hi: 1.0 };
        assert!(f.eval_column(&col).is_err());
    }

    #[test]
    fn test_rect() {
        let f = SelectionFilter::WithinRect(Rect {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 1.0,
            max_y: 1.0,
        });
        let hits = f
            .eval_layout(&[0.5, 2.0, 1.0], &[0.5, 0.5, 1.0])
            .unwrap();
        assert_eq!(hits, vec![true, false, true]);
    }

    #[test]
    fn test_polygon() {
        // Unit square lasso.
        let f = SelectionFilter::WithinPolygon {
            vertices: vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)],
        };
        let hits = f.eval_layout(&[0.5, 1.5], &[0.5, 0.5]).unwrap();
        assert_eq!(hits, vec![true, false]);
    }
}
