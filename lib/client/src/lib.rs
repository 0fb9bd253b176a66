//! # cellgrid Client
//!
//! Network layer of the cellgrid remote-dataset client:
//!
//! - [`HttpMatrixLoader`] - Binary columnar fetches behind the matrix's
//!   loader seam
//! - [`JobChannel`] - One persistent duplex channel per job family, with
//!   typed inbound dispatch
//! - [`Session`] - Correlates asynchronous job results back to the jobs
//!   that requested them and emits [`Event`] state-change records
//! - [`ApiClient`] - Synchronous mutation and export endpoints
//! - [`initial_data_load`] - The startup handshake

pub mod channel;
pub mod codec;
pub mod diffexp;
pub mod endpoints;
pub mod events;
pub mod http;
pub mod leiden;
pub mod loader;
pub mod protocol;
pub mod sankey;
pub mod session;
pub mod startup;

/// Sentinel category for rows not covered by an assignment. Excluded from
/// multiplexed comparisons and flow-graph rendering, always present in
/// cluster category lists.
pub const UNASSIGNED_LABEL: &str = "unassigned";

pub use channel::{ChannelEvent, ChannelState, JobChannel, JobFamily};
pub use codec::{decode_matrix_payload, encode_matrix_payload, MatrixPayload};
pub use diffexp::{map_gene_offsets, BatchEmission, DiffExpAggregator, DiffExpEntry, DiffExpTable};
pub use endpoints::ApiClient;
pub use events::Event;
pub use http::{abortable, AbortHandle};
pub use leiden::leiden_column;
pub use loader::HttpMatrixLoader;
pub use protocol::{parse_inbound, InboundMessage};
pub use sankey::{build_sankey_graph, sankey_cache_key, SankeyGraph, SankeyLink, SankeyParams, SankeyResponse};
pub use session::{LayoutChoice, Session, SessionState};
pub use startup::{initial_data_load, Bootstrap, ServerConfig};
