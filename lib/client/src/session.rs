use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use cellgrid_core::{Error, Field, Query, Result};
use cellgrid_matrix::{AnnoMatrix, ColumnInit, Crossfilter};

use crate::channel::{ChannelEvent, JobChannel, JobFamily};
use crate::diffexp::{map_gene_offsets, DiffExpAggregator};
use crate::endpoints::ApiClient;
use crate::http::AbortHandle;
use crate::events::Event;
use crate::leiden::leiden_column;
use crate::protocol::{
    self, DiffExpMessage, InboundMessage, LeidenMessage, ReembeddingResponse, SankeyMessage,
};
use crate::sankey::{build_sankey_graph, sankey_cache_key, SankeyParams, SankeyResponse};
use crate::UNASSIGNED_LABEL;

/// Delay before the served-file download cleanup callback fires.
const DOWNLOAD_CLEANUP_DELAY: Duration = Duration::from_secs(10);

/// The active layout plus everything the schema offers.
#[derive(Debug, Clone)]
pub struct LayoutChoice {
    pub current: String,
    pub available: Vec<String>,
}

/// Mutable application state the session revises as jobs complete. Each
/// revision replaces the pair wholesale; the instances themselves are
/// immutable.
#[derive(Clone)]
pub struct SessionState {
    pub matrix: Arc<AnnoMatrix>,
    pub crossfilter: Crossfilter,
    pub layout: LayoutChoice,
    /// Expression layer and scaling forwarded to diffexp requests.
    pub layer: String,
    pub scale: bool,
}

/// Owns the job channels and correlates their unsolicited inbound traffic
/// back to the logical jobs that requested it, emitting [`Event`] records
/// as results land.
pub struct Session {
    api: ApiClient,
    hosted_mode: bool,
    state: RwLock<SessionState>,
    events: UnboundedSender<Event>,
    channels: Mutex<AHashMap<JobFamily, JobChannel>>,
    diffexp: Mutex<DiffExpAggregator>,
    generation: AtomicU64,
    sankey_cache: Mutex<AHashMap<String, SankeyResponse>>,
    /// Row labels of the subset a leiden job was submitted for.
    leiden_subset: Mutex<Option<Vec<i32>>>,
}

impl Session {
    pub fn new(
        api: ApiClient,
        hosted_mode: bool,
        state: SessionState,
        events: UnboundedSender<Event>,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            hosted_mode,
            state: RwLock::new(state),
            events,
            channels: Mutex::new(AHashMap::new()),
            diffexp: Mutex::new(DiffExpAggregator::new()),
            generation: AtomicU64::new(0),
            sankey_cache: Mutex::new(AHashMap::new()),
            leiden_subset: Mutex::new(None),
        })
    }

    #[inline]
    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    /// Open one duplex channel per job family and start the inbound pump.
    pub fn open_channels(self: &Arc<Self>, ws_base: &str) {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut channels = self.channels.lock();
            for family in JobFamily::ALL {
                let url = format!("{}/{}", ws_base.trim_end_matches('/'), family.tag());
                channels.insert(family, JobChannel::connect(family, url, tx.clone()));
            }
        }
        let session = Arc::clone(self);
        tokio::spawn(async move { session.pump(rx).await });
    }

    async fn pump(self: Arc<Self>, mut rx: UnboundedReceiver<ChannelEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                ChannelEvent::Frame { family, text } => {
                    let parsed = protocol::parse_inbound(&text);
                    match parsed {
                        Ok(message) => {
                            if let Err(err) = self.handle_inbound(message).await {
                                warn!(family = %family, error = %err, "job handling failed");
                                self.reset_family(family);
                                self.emit(Event::JobFailed {
                                    family,
                                    message: err.to_string(),
                                });
                            }
                        }
                        Err(err) => {
                            warn!(family = %family, error = %err, "undecodable channel frame");
                        }
                    }
                }
                ChannelEvent::Disconnected { family } => {
                    // Connection loss is not a job failure, but the family's
                    // in-flight job is expired rather than left pending.
                    self.reset_family(family);
                    self.emit(Event::ChannelDisconnected { family });
                }
            }
        }
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    fn send_on(&self, family: JobFamily, message: &serde_json::Value) -> Result<()> {
        let channels = self.channels.lock();
        let channel = channels
            .get(&family)
            .ok_or_else(|| Error::ChannelClosed(family.tag().to_string()))?;
        channel.send(message)
    }

    /// A `fail` message or disconnect resets only this family's in-flight
    /// state; other families and the channels themselves are untouched.
    fn reset_family(&self, family: JobFamily) {
        match family {
            JobFamily::DiffExp => self.diffexp.lock().reset(),
            JobFamily::Leiden => *self.leiden_subset.lock() = None,
            _ => {}
        }
    }

    // ---- outbound requests -------------------------------------------

    /// Single differential-expression comparison between two label sets.
    pub fn request_diffexp(&self, set1: &[i32], set2: &[i32], num_genes: usize) -> Result<()> {
        let state = self.state();
        let group_name = chrono::Local::now()
            .format("%m_%d_%Y %H:%M:%S")
            .to_string();
        let message = protocol::diffexp_request(
            num_genes,
            set1,
            set2,
            &state.layer,
            state.scale,
            &group_name,
        );
        self.send_on(JobFamily::DiffExp, &message)
    }

    /// Multiplexed batch: one comparison per category of `grouping_col`,
    /// each category against the rest. All comparisons carry the same
    /// freshly-assigned generation number.
    pub async fn request_diffexp_all(&self, grouping_col: &str, num_genes: usize) -> Result<()> {
        let state = self.state();
        let frame = state
            .matrix
            .fetch(Field::Obs, &Query::simple(grouping_col))
            .await?;
        let values = frame
            .col(grouping_col)?
            .as_strings()
            .ok_or_else(|| Error::NotCategorical(grouping_col.to_string()))?
            .to_vec();
        let labels = state.matrix.row_index().labels().to_vec();

        let name_list = match state
            .matrix
            .schema()
            .obs_column(grouping_col)
            .and_then(|c| c.categories.clone())
        {
            Some(categories) => categories,
            None => frame.col(grouping_col)?.summarize_categories(),
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let date_string = chrono::Local::now().format("%m_%d_%Y %H:%M:%S").to_string();

        let mut submitted = 0usize;
        for category in &name_list {
            if category == UNASSIGNED_LABEL {
                continue;
            }
            let mut set1 = Vec::new();
            let mut set2 = Vec::new();
            for (value, &label) in values.iter().zip(&labels) {
                if value == category {
                    set1.push(label);
                } else {
                    set2.push(label);
                }
            }
            // A comparison needs at least two rows on either side.
            if set1.len() < 2 || set2.len() < 2 {
                continue;
            }
            let message = protocol::diffexp_multiplex_request(
                num_genes,
                &set1,
                &set2,
                &state.layer,
                state.scale,
                grouping_col,
                &date_string,
                &name_list,
                category,
                generation,
            );
            self.send_on(JobFamily::DiffExp, &message)?;
            submitted += 1;
        }

        if let Some(emission) = self.diffexp.lock().begin_batch(
            generation,
            grouping_col,
            &date_string,
            name_list,
            submitted,
        ) {
            self.emit(Event::DiffExpBatchResult {
                grouping: emission.grouping,
                date_string: emission.date_string,
                names: emission.names,
                results: emission.results,
            });
        }
        Ok(())
    }

    /// Category-flow request; identical requests are served from cache.
    pub fn request_sankey(
        &self,
        cat_names: &[String],
        threshold: f64,
        params: &SankeyParams,
    ) -> Result<()> {
        let state = self.state();
        let key = sankey_cache_key(cat_names, &state.layout.current, params);
        if let Some(cached) = self.sankey_cache.lock().get(&key).cloned() {
            self.emit(Event::SankeyResult {
                cache_key: key,
                graph: build_sankey_graph(&cached, threshold),
                from_cache: true,
            });
            return Ok(());
        }
        let message = protocol::sankey_request(cat_names, &state.layout.current, threshold, params);
        self.send_on(JobFamily::Sankey, &message)
    }

    /// Clustering over the current subset.
    pub fn request_leiden(&self, column_name: &str, resolution: f64) -> Result<()> {
        let state = self.state();
        let labels = state.matrix.row_index().labels().to_vec();
        let message =
            protocol::leiden_request(column_name, &labels, resolution, &state.layout.current);
        *self.leiden_subset.lock() = Some(labels);
        self.send_on(JobFamily::Leiden, &message)
    }

    pub fn request_reembedding(&self, params: &serde_json::Value, name: &str) -> Result<()> {
        let state = self.state();
        let message = protocol::reembedding_request(params, &state.layout.current, name);
        self.send_on(JobFamily::Reembedding, &message)
    }

    /// Bulk export of the current view.
    pub fn request_download(&self) -> Result<()> {
        let state = self.state();
        let label_names: Vec<String> = state
            .matrix
            .schema()
            .obs_columns
            .iter()
            .map(|c| c.name.clone())
            .collect();
        let message = protocol::download_request(
            &label_names,
            &state.layout.current,
            state.matrix.row_index().labels(),
        );
        self.send_on(JobFamily::DownloadAnndata, &message)
    }

    /// Save the whole dataset server-side: current rows, active layout,
    /// and every categorical annotation column (fetched on demand).
    pub async fn save_dataset(&self, save_name: &str, abort: &AbortHandle) -> Result<()> {
        let state = self.state();
        let columns: Vec<_> = state
            .matrix
            .schema()
            .obs_columns
            .iter()
            .filter(|c| c.categories.is_some())
            .map(|c| c.name.clone())
            .collect();

        let mut labels = Vec::with_capacity(columns.len());
        for name in &columns {
            let frame = state.matrix.fetch(Field::Obs, &Query::simple(name)).await?;
            let values = frame
                .col(name)?
                .as_strings()
                .map(<[String]>::to_vec)
                .unwrap_or_default();
            labels.push(serde_json::json!({ "name": name, "values": values }));
        }

        self.api
            .save_dataset(
                save_name,
                &columns,
                &serde_json::Value::Array(labels),
                &state.layout.current,
                state.matrix.row_index().labels(),
                abort,
            )
            .await
    }

    // ---- inbound dispatch --------------------------------------------

    async fn handle_inbound(self: &Arc<Self>, message: InboundMessage) -> Result<()> {
        match message {
            InboundMessage::Fail { family, message } => {
                self.reset_family(family);
                self.emit(Event::JobFailed { family, message });
                Ok(())
            }
            InboundMessage::DiffExp(msg) => self.handle_diffexp(msg).await,
            InboundMessage::Reembedding(response) => self.apply_reembedding(response).await,
            InboundMessage::Sankey(msg) => {
                self.handle_sankey(msg);
                Ok(())
            }
            InboundMessage::Leiden(msg) => self.apply_leiden(&msg),
            InboundMessage::DownloadAnndata { response } => {
                self.handle_download(response);
                Ok(())
            }
        }
    }

    async fn handle_diffexp(self: &Arc<Self>, msg: DiffExpMessage) -> Result<()> {
        let state = self.state();
        let var_index_name = state.matrix.schema().var_index.clone();
        let var_frame = state
            .matrix
            .fetch(Field::Var, &Query::simple(&var_index_name))
            .await?;
        let var_names = var_frame
            .col(&var_index_name)?
            .as_strings()
            .ok_or_else(|| Error::NotCategorical(var_index_name.clone()))?
            .to_vec();
        let table = map_gene_offsets(&msg.response, &var_names)?;

        if !msg.multiplex {
            let group_name = msg.group_name.unwrap_or_default();
            self.emit(Event::DiffExpResult {
                group_name,
                result: table,
            });
            return Ok(());
        }

        let category = msg
            .category
            .ok_or_else(|| Error::Decode("multiplex result missing category".to_string()))?;
        let emission = self.diffexp.lock().accept(msg.num, &category, table);
        if let Some(emission) = emission {
            self.emit(Event::DiffExpBatchResult {
                grouping: emission.grouping,
                date_string: emission.date_string,
                names: emission.names,
                results: emission.results,
            });
        }
        Ok(())
    }

    /// Graft a completed re-embedding onto the unfiltered dataset. Each
    /// step depends on the previous step's matrix reference: schema update,
    /// then subset reset, then layout switch, then placeholder cleanup.
    async fn apply_reembedding(self: &Arc<Self>, response: ReembeddingResponse) -> Result<()> {
        let state = self.state();
        let new_layout = response.layout_schema.name.clone();
        let had_only_placeholder =
            state.layout.available.len() == 1 && state.layout.available[0] == "root";

        // 1. Graft the new layout onto the base and apply the server's
        //    full updated schema.
        let base = state.matrix.base();
        let base = base.with_layout(response.layout_schema)?;
        let base = base.update_schema(response.schema)?;

        // 2. Reset any active subsetting.
        let mut matrix = base;
        let mut crossfilter = Crossfilter::new(Arc::clone(&matrix));

        // 3. Switch the active layout to the new embedding.
        matrix.fetch(Field::Emb, &Query::simple(&new_layout)).await?;

        // 4. Delete the placeholder layout if it was all the dataset had.
        if had_only_placeholder && new_layout != "root" && matrix.schema().layout("root").is_some()
        {
            matrix = matrix.drop_layout("root")?;
            crossfilter = Crossfilter::new(Arc::clone(&matrix));
        }

        let layout = LayoutChoice {
            current: new_layout.clone(),
            available: matrix
                .schema()
                .layout_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        };
        self.set_state(SessionState {
            matrix: Arc::clone(&matrix),
            crossfilter: crossfilter.clone(),
            layout,
            layer: state.layer,
            scale: state.scale,
        });
        info!(layout = %new_layout, "re-embedding complete");
        self.emit(Event::ReembeddingComplete {
            matrix,
            crossfilter,
            layout: new_layout,
        });
        Ok(())
    }

    fn handle_sankey(&self, msg: SankeyMessage) {
        let state = self.state();
        let key = sankey_cache_key(&msg.cat_names, &state.layout.current, &msg.params);
        self.sankey_cache
            .lock()
            .insert(key.clone(), msg.response.clone());
        self.emit(Event::SankeyResult {
            cache_key: key,
            graph: build_sankey_graph(&msg.response, msg.threshold),
            from_cache: false,
        });
    }

    fn apply_leiden(self: &Arc<Self>, msg: &LeidenMessage) -> Result<()> {
        let state = self.state();
        let subset = self
            .leiden_subset
            .lock()
            .take()
            .unwrap_or_else(|| state.matrix.row_index().labels().to_vec());

        let (mut col_schema, data) =
            leiden_column(&msg.response, &subset, state.matrix.row_index());
        col_schema.name = msg.name.clone();

        // An existing column of that name is dropped and recreated.
        let crossfilter = if state.matrix.schema().obs_column(&msg.name).is_some() {
            state.crossfilter.drop_obs_column(&msg.name)?.1
        } else {
            state.crossfilter.clone()
        };
        let (matrix, crossfilter) = crossfilter.with_obs_column(col_schema, ColumnInit::Data(data))?;

        self.set_state(SessionState {
            matrix: Arc::clone(&matrix),
            crossfilter: crossfilter.clone(),
            layout: state.layout,
            layer: state.layer,
            scale: state.scale,
        });
        self.emit(Event::LeidenComplete {
            matrix,
            crossfilter,
            column: msg.name.clone(),
        });
        Ok(())
    }

    fn handle_download(self: &Arc<Self>, response: String) {
        if self.hosted_mode {
            self.emit(Event::DownloadReady {
                url: response.clone(),
            });
            // Delayed follow-up cleanup for the served file.
            let session = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(DOWNLOAD_CLEANUP_DELAY).await;
                if let Err(err) = session.api.download_callback(&response).await {
                    debug!(error = %err, "download cleanup callback failed");
                }
            });
        } else {
            self.emit(Event::DownloadComplete);
        }
    }
}
