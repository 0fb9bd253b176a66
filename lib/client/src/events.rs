use std::sync::Arc;

use cellgrid_matrix::{AnnoMatrix, Crossfilter};

use crate::channel::JobFamily;
use crate::diffexp::DiffExpTable;
use crate::sankey::SankeyGraph;

/// State-change records emitted by the core. The UI layer (out of scope
/// here) consumes these from an unbounded channel and renders them; the
/// core never blocks on the consumer.
#[derive(Clone)]
pub enum Event {
    /// One differential-expression comparison, tagged with the caller's
    /// group label.
    DiffExpResult {
        group_name: String,
        result: DiffExpTable,
    },
    /// Aggregated multiplexed batch, one entry per category, ordered by
    /// the category enumeration.
    DiffExpBatchResult {
        grouping: String,
        date_string: String,
        names: Vec<String>,
        results: Vec<DiffExpTable>,
    },
    /// Re-embedding completed; the new matrix has the server's schema
    /// grafted on and the active layout switched.
    ReembeddingComplete {
        matrix: Arc<AnnoMatrix>,
        crossfilter: Crossfilter,
        layout: String,
    },
    SankeyResult {
        cache_key: String,
        graph: SankeyGraph,
        from_cache: bool,
    },
    /// Clustering produced a new categorical observation column.
    LeidenComplete {
        matrix: Arc<AnnoMatrix>,
        crossfilter: Crossfilter,
        column: String,
    },
    /// Served-file export: the caller should follow this link.
    DownloadReady { url: String },
    /// In-place-write export completed on the server.
    DownloadComplete,
    /// A `fail` message arrived for this family; its in-flight state has
    /// been reset. The channel itself stays open.
    JobFailed { family: JobFamily, message: String },
    /// The channel dropped without a `fail` message. The family's
    /// in-flight job is expired so it cannot stay pending forever.
    ChannelDisconnected { family: JobFamily },
}
