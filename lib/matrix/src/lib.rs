//! # cellgrid Matrix
//!
//! The virtual-matrix layer of the cellgrid client:
//!
//! - [`AnnoMatrix`] - Lazy data-matrix over a remote loader, with immutable
//!   copy-on-write views chained through ancestry delegation
//! - [`WhereCache`] - At-most-once-per-query fetch semantics
//! - [`FetchScheduler`] - Priority-ordered, concurrency-bounded admission
//! - [`Crossfilter`] - The current observation selection, paired with the
//!   matrix it selects from

pub mod annomatrix;
pub mod bitset;
pub mod crossfilter;
pub mod scheduler;
pub mod wherecache;

pub use annomatrix::{AnnoMatrix, ColumnInit, FetchOpts, LoadResult, MatrixLoader, ViewDelta};
pub use bitset::BitSet;
pub use crossfilter::{BrushPhase, Crossfilter};
pub use scheduler::{FetchScheduler, DEFAULT_FETCH_LIMIT, PRIORITY_DEFAULT, PRIORITY_LAYOUT};
pub use wherecache::WhereCache;
