//! # cellgrid
//!
//! A client-side abstraction over remote, columnar single-cell datasets
//! too large to hold in memory: a virtual matrix of observations x
//! variables that fetches slices from a server on demand, caches them,
//! and layers cheap, immutable views on top without re-fetching or
//! duplicating already-resident data.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cellgrid::prelude::*;
//!
//! # async fn run() -> cellgrid::Result<()> {
//! let scheduler = FetchScheduler::new(DEFAULT_FETCH_LIMIT);
//! let bootstrap = initial_data_load("http://localhost:5005/api/v0.2", scheduler).await?;
//!
//! let state = bootstrap.session.state();
//! let frame = state
//!     .matrix
//!     .fetch(Field::Obs, &Query::simple("cell_type"))
//!     .await?;
//! println!("fetched {} rows", frame.n_rows());
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Structure
//!
//! cellgrid is composed of several crates:
//!
//! - [`cellgrid-core`](https://docs.rs/cellgrid-core) - Columnar containers, row indexing, schema and query model
//! - [`cellgrid-matrix`](https://docs.rs/cellgrid-matrix) - Lazy matrix cache, view chains, fetch scheduling, crossfilter
//! - [`cellgrid-client`](https://docs.rs/cellgrid-client) - HTTP loader, duplex job channels, job correlation
//!
//! ## Features
//!
//! - **Lazy fetching**: At-most-once-per-query network fetches with
//!   request coalescing
//! - **Immutable views**: Subsets and column overlays share resident data
//!   with their ancestors
//! - **Prioritized scheduling**: Embeddings are never starved behind bulk
//!   expression fetches
//! - **Async job protocol**: Differential expression, re-embedding,
//!   category flow, clustering and bulk export over duplex channels

// Re-export core types
pub use cellgrid_core::{
    CellValue, ColumnData, ColumnSchema, ColumnType, Dataframe, Error, Field, LayoutSchema,
    Query, Rect, Result, RowIndex, Schema, SelectionFilter,
};

// Re-export the matrix layer
pub use cellgrid_matrix::{
    AnnoMatrix, BrushPhase, ColumnInit, Crossfilter, FetchOpts, FetchScheduler, MatrixLoader,
    WhereCache, DEFAULT_FETCH_LIMIT, PRIORITY_DEFAULT, PRIORITY_LAYOUT,
};

// Re-export the client layer
pub use cellgrid_client::{
    initial_data_load, AbortHandle, ApiClient, Bootstrap, Event, HttpMatrixLoader, JobChannel,
    JobFamily, Session, SessionState, UNASSIGNED_LABEL,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        AnnoMatrix, ApiClient, BrushPhase, CellValue, ColumnData, ColumnInit, ColumnSchema,
        ColumnType, Crossfilter, Dataframe, Error, Event, FetchScheduler, Field, JobFamily,
        LayoutSchema, Query, Result, RowIndex, Schema, Session, DEFAULT_FETCH_LIMIT,
    };
    pub use cellgrid_client::initial_data_load;
}
