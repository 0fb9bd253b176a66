//! # cellgrid Core
//!
//! Core library for the cellgrid remote-dataset client.
//!
//! This crate provides the fundamental data structures:
//!
//! - [`ColumnData`] - Homogeneously-typed column storage
//! - [`Dataframe`] - Immutable, named-column table with O(1) lookup
//! - [`RowIndex`] - Row label / dense offset bijection
//! - [`Schema`] - Dataset-wide metadata and its pure transformations
//! - [`Query`] - Cache-keyed query descriptors
//! - [`SelectionFilter`] - Selection predicates over columns and layouts
//!
//! ## Example
//!
//! ```rust
//! use cellgrid_core::{ColumnData, Dataframe, RowIndex};
//!
//! let df = Dataframe::empty(RowIndex::identity(3))
//!     .with_col("n_counts", ColumnData::Float32(vec![1.0, 2.0, 3.0]))
//!     .unwrap();
//!
//! // Operations are pure: the receiver is unchanged.
//! let narrowed = df.isubset(&[2, 0]).unwrap();
//! assert_eq!(df.n_rows(), 3);
//! assert_eq!(narrowed.n_rows(), 2);
//! ```

pub mod column;
pub mod dataframe;
pub mod error;
pub mod filter;
pub mod query;
pub mod rowindex;
pub mod schema;

pub use column::{CellValue, ColumnData, ColumnType};
pub use dataframe::Dataframe;
pub use error::{Error, Result};
pub use filter::{Rect, SelectionFilter};
pub use query::{hash_query_strings, Field, Query, SummarizeQuery, WhereQuery};
pub use rowindex::RowIndex;
pub use schema::{normalize_categories, ColumnSchema, LayoutSchema, Schema};
