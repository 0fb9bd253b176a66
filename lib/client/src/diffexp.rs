// Differential-expression result handling: gene-offset mapping and
// multiplexed batch aggregation.
//
// Aggregation is a pure state machine, independent of any real channel:
// partial results arrive in arbitrary order and are reconciled by
// generation number, not arrival order.

use tracing::debug;

use cellgrid_core::{Error, Result};

use crate::protocol::DiffExpResponse;
use crate::UNASSIGNED_LABEL;

/// One ranked gene with its statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffExpEntry {
    pub gene: String,
    pub stats: Vec<f64>,
}

/// A full comparison result, split by polarity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiffExpTable {
    pub positive: Vec<DiffExpEntry>,
    pub negative: Vec<DiffExpEntry>,
}

/// Replace wire var offsets with gene names from the var index column.
pub fn map_gene_offsets(response: &DiffExpResponse, var_names: &[String]) -> Result<DiffExpTable> {
    fn map_rows(rows: &[Vec<f64>], var_names: &[String]) -> Result<Vec<DiffExpEntry>> {
        rows.iter()
            .map(|row| {
                let offset = row.first().copied().unwrap_or(-1.0);
                if offset < 0.0 {
                    return Err(Error::Decode("diffexp row missing var offset".to_string()));
                }
                let offset = offset as usize;
                let gene = var_names
                    .get(offset)
                    .ok_or(Error::OffsetOutOfBounds(offset))?
                    .clone();
                Ok(DiffExpEntry {
                    gene,
                    stats: row[1..].to_vec(),
                })
            })
            .collect()
    }
    Ok(DiffExpTable {
        positive: map_rows(&response.positive, var_names)?,
        negative: map_rows(&response.negative, var_names)?,
    })
}

/// The aggregated emission for one completed multiplexed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEmission {
    pub grouping: String,
    pub date_string: String,
    /// Categories in enumeration order, contaminants dropped.
    pub names: Vec<String>,
    pub results: Vec<DiffExpTable>,
}

struct BatchState {
    generation: u64,
    grouping: String,
    date_string: String,
    /// Category enumeration order for the final reordering.
    name_list: Vec<String>,
    /// Comparisons actually submitted for this batch.
    expected: usize,
    /// Ordered category -> result map, populated incrementally.
    results: Vec<(String, DiffExpTable)>,
}

impl BatchState {
    fn insert(&mut self, category: String, table: DiffExpTable) {
        if !self.results.iter().any(|(c, _)| *c == category) {
            self.results.push((category, table));
        }
    }

    fn is_complete(&self) -> bool {
        self.results.len() >= self.expected
    }

    fn finish(self) -> BatchEmission {
        let mut names = Vec::new();
        let mut results = Vec::new();
        for name in &self.name_list {
            if name == UNASSIGNED_LABEL {
                continue;
            }
            // Categories absent from the result map are contaminants.
            if let Some((_, table)) = self.results.iter().find(|(c, _)| c == name) {
                names.push(name.clone());
                results.push(table.clone());
            }
        }
        BatchEmission {
            grouping: self.grouping,
            date_string: self.date_string,
            names,
            results,
        }
    }
}

/// Accumulates multiplexed partial results until the active batch is
/// satisfied. Strictly newest generation wins: results from older
/// generations are dropped, results from a not-yet-registered newer
/// generation are parked until that batch begins.
pub struct DiffExpAggregator {
    active: Option<BatchState>,
    pending: Vec<(u64, String, DiffExpTable)>,
}

impl DiffExpAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: None,
            pending: Vec::new(),
        }
    }

    /// Register a new batch. Supersedes any batch still accumulating:
    /// parked results matching the new generation are folded in, everything
    /// older is dropped.
    pub fn begin_batch(
        &mut self,
        generation: u64,
        grouping: &str,
        date_string: &str,
        name_list: Vec<String>,
        expected: usize,
    ) -> Option<BatchEmission> {
        let mut batch = BatchState {
            generation,
            grouping: grouping.to_string(),
            date_string: date_string.to_string(),
            name_list,
            expected,
            results: Vec::new(),
        };
        for (gen, category, table) in std::mem::take(&mut self.pending) {
            if gen == generation {
                batch.insert(category, table);
            } else {
                debug!(generation = gen, "dropping stale parked diffexp result");
            }
        }
        if batch.is_complete() {
            self.active = None;
            return Some(batch.finish());
        }
        self.active = Some(batch);
        None
    }

    /// Feed one partial result; returns the aggregated emission once the
    /// full set of categories has arrived.
    pub fn accept(
        &mut self,
        generation: u64,
        category: &str,
        table: DiffExpTable,
    ) -> Option<BatchEmission> {
        let complete = match &mut self.active {
            Some(batch) if generation == batch.generation => {
                batch.insert(category.to_string(), table);
                batch.is_complete()
            }
            Some(batch) if generation < batch.generation => {
                debug!(generation, "dropping diffexp result from superseded batch");
                return None;
            }
            _ => {
                // Out-of-generation arrival; park until its batch begins.
                self.pending
                    .push((generation, category.to_string(), table));
                return None;
            }
        };
        if complete {
            self.active.take().map(BatchState::finish)
        } else {
            None
        }
    }

    /// Discard the in-flight batch (family failure or channel loss).
    pub fn reset(&mut self) {
        self.active = None;
        self.pending.clear();
    }

    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.active.is_some()
    }
}

impl Default for DiffExpAggregator {
    fn default() -> Self {
        Self::new()
    }
}
