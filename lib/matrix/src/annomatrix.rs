use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use tracing::debug;

use cellgrid_core::schema::normalize_categories;
use cellgrid_core::{
    CellValue, ColumnData, ColumnSchema, Dataframe, Error, Field, LayoutSchema, Query, Result,
    RowIndex, Schema,
};

use crate::scheduler::{FetchScheduler, PRIORITY_DEFAULT, PRIORITY_LAYOUT};
use crate::wherecache::WhereCache;

/// Options forwarded to expression-matrix fetches.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOpts {
    pub layer: String,
    pub logscale: bool,
    pub scale: bool,
}

impl Default for FetchOpts {
    fn default() -> Self {
        Self {
            layer: "X".to_string(),
            logscale: false,
            scale: false,
        }
    }
}

/// Result of one loader round trip: the column labels satisfying the query
/// and a frame carrying their data.
pub struct LoadResult {
    pub columns: Vec<String>,
    pub frame: Dataframe,
}

/// The network seam owned by a base matrix. The HTTP implementation lives
/// in the client crate; tests substitute an in-memory loader.
pub trait MatrixLoader: Send + Sync {
    fn load<'a>(
        &'a self,
        field: Field,
        query: &'a Query,
        opts: &'a FetchOpts,
    ) -> BoxFuture<'a, Result<LoadResult>>;
}

/// Transform a view applies on top of its parent.
#[derive(Debug, Clone)]
pub enum ViewDelta {
    RowSubset,
    ObsColumnAdded(String),
    ObsColumnDropped(String),
    ObsValuesChanged(String),
    CategoryChanged(String),
    LayoutAdded(String),
    LayoutDropped(String),
    SchemaUpdated,
}

enum MatrixKind {
    Base {
        loader: Arc<dyn MatrixLoader>,
        scheduler: Arc<FetchScheduler>,
    },
    View {
        parent: Arc<AnnoMatrix>,
        delta: ViewDelta,
    },
}

struct FieldCaches {
    obs: RwLock<Dataframe>,
    var: RwLock<Dataframe>,
    x: RwLock<Dataframe>,
    emb: RwLock<Dataframe>,
    jemb: RwLock<Dataframe>,
}

impl FieldCaches {
    fn empty(obs_index: &RowIndex, var_index: &RowIndex) -> Self {
        Self {
            obs: RwLock::new(Dataframe::empty(obs_index.clone())),
            var: RwLock::new(Dataframe::empty(var_index.clone())),
            x: RwLock::new(Dataframe::empty(obs_index.clone())),
            emb: RwLock::new(Dataframe::empty(obs_index.clone())),
            jemb: RwLock::new(Dataframe::empty(var_index.clone())),
        }
    }

    fn snapshot(&self) -> Self {
        Self {
            obs: RwLock::new(self.obs.read().clone()),
            var: RwLock::new(self.var.read().clone()),
            x: RwLock::new(self.x.read().clone()),
            emb: RwLock::new(self.emb.read().clone()),
            jemb: RwLock::new(self.jemb.read().clone()),
        }
    }
}

/// Initial value for a new observation column: a full data array, or a
/// single value broadcast across all rows.
pub enum ColumnInit {
    Data(ColumnData),
    Broadcast(CellValue),
}

/// The virtual matrix: a window onto a remote observations x variables
/// dataset, fetching slices on demand and caching them.
///
/// A base instance owns the network loader and authoritative schema.
/// Derived instances are lightweight views overlaying a delta on a parent;
/// they delegate cache misses up the ancestry chain and never duplicate
/// data already resident in an ancestor. View-producing operations follow
/// one discipline: clone, mutate the clone, return it.
pub struct AnnoMatrix {
    kind: MatrixKind,
    schema: Schema,
    n_obs: usize,
    n_var: usize,
    row_index: RowIndex,
    var_index: RowIndex,
    caches: FieldCaches,
    where_cache: WhereCache,
}

impl std::fmt::Debug for AnnoMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnoMatrix")
            .field("n_obs", &self.n_obs)
            .field("n_var", &self.n_var)
            .finish_non_exhaustive()
    }
}

impl AnnoMatrix {
    /// Construct the base (non-view) instance from the authoritative schema.
    #[must_use]
    pub fn base_matrix(
        loader: Arc<dyn MatrixLoader>,
        scheduler: Arc<FetchScheduler>,
        schema: Schema,
    ) -> Arc<Self> {
        let row_index = RowIndex::identity(schema.n_obs);
        let var_index = RowIndex::identity(schema.n_var);
        Arc::new(Self {
            kind: MatrixKind::Base { loader, scheduler },
            n_obs: schema.n_obs,
            n_var: schema.n_var,
            caches: FieldCaches::empty(&row_index, &var_index),
            where_cache: WhereCache::new(),
            row_index,
            var_index,
            schema,
        })
    }

    #[inline]
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[inline]
    #[must_use]
    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    #[inline]
    #[must_use]
    pub fn n_var(&self) -> usize {
        self.n_var
    }

    #[inline]
    #[must_use]
    pub fn row_index(&self) -> &RowIndex {
        &self.row_index
    }

    #[inline]
    #[must_use]
    pub fn is_view(&self) -> bool {
        matches!(self.kind, MatrixKind::View { .. })
    }

    #[must_use]
    pub fn delta(&self) -> Option<&ViewDelta> {
        match &self.kind {
            MatrixKind::View { delta, .. } => Some(delta),
            MatrixKind::Base { .. } => None,
        }
    }

    /// Root (non-view) instance of the chain. Used when a freshly computed
    /// server-side artifact must be grafted onto the unmodified dataset.
    #[must_use]
    pub fn base(self: &Arc<Self>) -> Arc<AnnoMatrix> {
        let mut cur = Arc::clone(self);
        loop {
            let next = match &cur.kind {
                MatrixKind::View { parent, .. } => Arc::clone(parent),
                MatrixKind::Base { .. } => return cur,
            };
            cur = next;
        }
    }

    fn cache(&self, field: Field) -> &RwLock<Dataframe> {
        match field {
            Field::Obs => &self.caches.obs,
            Field::Var => &self.caches.var,
            Field::X => &self.caches.x,
            Field::Emb => &self.caches.emb,
            Field::JointEmb => &self.caches.jemb,
        }
    }

    /// Obs-space fields follow the view's row subset; var-space fields do not.
    fn is_obs_space(field: Field) -> bool {
        matches!(field, Field::Obs | Field::X | Field::Emb)
    }

    fn parent(&self) -> Option<&Arc<AnnoMatrix>> {
        match &self.kind {
            MatrixKind::View { parent, .. } => Some(parent),
            MatrixKind::Base { .. } => None,
        }
    }

    /// Expression fetches key on layer/scaling as well as the query itself;
    /// two structurally-equal queries still share one key.
    fn fetch_key(field: Field, query: &Query, opts: &FetchOpts) -> String {
        if field == Field::X {
            format!(
                "{}&layer={}&logscale={}&scale={}",
                query.cache_key(field),
                opts.layer,
                opts.logscale,
                opts.scale
            )
        } else {
            query.cache_key(field)
        }
    }

    /// Resolve `query` against `field`.
    ///
    /// Cache hit returns immediately. On a miss the ancestry chain is
    /// consulted; if the data is absent everywhere, exactly one
    /// scheduler-bounded network request is issued (concurrent callers of
    /// the same query coalesce onto it), and the result is merged into this
    /// instance's own cache layer before the caller is released.
    pub async fn fetch(self: &Arc<Self>, field: Field, query: &Query) -> Result<Dataframe> {
        self.fetch_with(field, query, &FetchOpts::default()).await
    }

    pub async fn fetch_with(
        self: &Arc<Self>,
        field: Field,
        query: &Query,
        opts: &FetchOpts,
    ) -> Result<Dataframe> {
        let key = Self::fetch_key(field, query, opts);

        if let Some(hit) = self.resolve_resident(field, &key)? {
            return Ok(hit);
        }

        let _guard = self.where_cache.guard(&key).await;
        // A coalesced caller may have satisfied the query while this one
        // waited for the guard.
        if let Some(hit) = self.resolve_resident(field, &key)? {
            return Ok(hit);
        }
        if let Some(hit) = self.resolve_from_ancestors(field, &key)? {
            return Ok(hit);
        }

        let LoadResult { columns, frame } = self.load_uncached(field, query, opts).await?;
        self.merge_into_cache(field, &frame)?;
        self.where_cache.insert(&key, columns.clone());
        let cache = self.cache(field).read();
        cache.select_cols(&columns)
    }

    /// Fire-and-forget variant of [`fetch`](Self::fetch), used to warm
    /// embeddings before they are needed. Failures are swallowed.
    pub fn prefetch(self: &Arc<Self>, field: Field, query: Query) {
        let matrix = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = matrix.fetch(field, &query).await {
                debug!(field = %field, error = %err, "prefetch failed");
            }
        });
    }

    fn resolve_resident(&self, field: Field, key: &str) -> Result<Option<Dataframe>> {
        let Some(columns) = self.where_cache.lookup(key) else {
            return Ok(None);
        };
        let cache = self.cache(field).read();
        if columns.iter().all(|c| cache.has_col(c)) {
            Ok(Some(cache.select_cols(&columns)?))
        } else {
            Ok(None)
        }
    }

    /// Walk the ancestry chain for resident data; on a hit, narrow it to
    /// this instance's rows and merge it into this instance's cache.
    fn resolve_from_ancestors(&self, field: Field, key: &str) -> Result<Option<Dataframe>> {
        let mut cur = self.parent();
        while let Some(ancestor) = cur {
            if let Some(columns) = ancestor.where_cache.lookup(key) {
                let resident = {
                    let cache = ancestor.cache(field).read();
                    if columns.iter().all(|c| cache.has_col(c)) {
                        Some(cache.select_cols(&columns)?)
                    } else {
                        None
                    }
                };
                if let Some(frame) = resident {
                    let narrowed = self.narrow_to_own_rows(field, ancestor, frame)?;
                    self.merge_into_cache(field, &narrowed)?;
                    self.where_cache.insert(key, columns.clone());
                    return Ok(Some(narrowed.select_cols(&columns)?));
                }
            }
            cur = ancestor.parent();
        }
        Ok(None)
    }

    fn narrow_to_own_rows(
        &self,
        field: Field,
        ancestor: &AnnoMatrix,
        frame: Dataframe,
    ) -> Result<Dataframe> {
        if Self::is_obs_space(field) && ancestor.row_index != self.row_index {
            frame.subset_by_labels(self.row_index.labels())
        } else {
            Ok(frame)
        }
    }

    /// Delegate a cache miss to the network, narrowing the result to this
    /// instance's row space at each level of the chain. Ancestor caches are
    /// not touched.
    fn load_uncached<'a>(
        &'a self,
        field: Field,
        query: &'a Query,
        opts: &'a FetchOpts,
    ) -> BoxFuture<'a, Result<LoadResult>> {
        Box::pin(async move {
            match &self.kind {
                MatrixKind::Base { loader, scheduler } => {
                    let priority = match field {
                        Field::Emb | Field::JointEmb => PRIORITY_LAYOUT,
                        _ => PRIORITY_DEFAULT,
                    };
                    scheduler.run(priority, loader.load(field, query, opts)).await
                }
                MatrixKind::View { parent, .. } => {
                    let LoadResult { columns, frame } =
                        parent.load_uncached(field, query, opts).await?;
                    let frame = self.narrow_to_own_rows(field, parent, frame)?;
                    Ok(LoadResult { columns, frame })
                }
            }
        })
    }

    fn merge_into_cache(&self, field: Field, frame: &Dataframe) -> Result<()> {
        let mut cache = self.cache(field).write();
        *cache = cache.with_cols_from(frame)?;
        Ok(())
    }

    /// Clone-style constructor shared by the delta-overlay operations.
    fn overlay(self: &Arc<Self>, delta: ViewDelta) -> AnnoMatrix {
        AnnoMatrix {
            kind: match &self.kind {
                // A transform of a base stays a base: the clone keeps the
                // loader and remains the root of its chain.
                MatrixKind::Base { loader, scheduler } => MatrixKind::Base {
                    loader: Arc::clone(loader),
                    scheduler: Arc::clone(scheduler),
                },
                MatrixKind::View { parent, .. } => MatrixKind::View {
                    parent: Arc::clone(parent),
                    delta,
                },
            },
            schema: self.schema.clone(),
            n_obs: self.n_obs,
            n_var: self.n_var,
            row_index: self.row_index.clone(),
            var_index: self.var_index.clone(),
            caches: self.caches.snapshot(),
            where_cache: self.where_cache.clone_resident(),
        }
    }

    /// Narrow to the given row labels, in the given order. The only
    /// operation that introduces a new parent link; the view starts with
    /// empty caches and resolves lazily through the chain.
    pub fn subset_by_labels(self: &Arc<Self>, labels: &[i32]) -> Result<Arc<AnnoMatrix>> {
        let row_index = self.row_index.subset(labels)?;
        let mut schema = self.schema.clone();
        schema.n_obs = labels.len();
        Ok(Arc::new(AnnoMatrix {
            kind: MatrixKind::View {
                parent: Arc::clone(self),
                delta: ViewDelta::RowSubset,
            },
            n_obs: labels.len(),
            n_var: self.n_var,
            caches: FieldCaches::empty(&row_index, &self.var_index),
            where_cache: WhereCache::new(),
            var_index: self.var_index.clone(),
            row_index,
            schema,
        }))
    }

    /// Add an observation column. The column is forced writable; a full
    /// data array must match the declared type and the row count.
    pub fn with_obs_column(
        self: &Arc<Self>,
        col_schema: ColumnSchema,
        init: ColumnInit,
    ) -> Result<Arc<AnnoMatrix>> {
        let name = col_schema.name.clone();
        if self.schema.obs_column(&name).is_some() || self.caches.obs.read().has_col(&name) {
            return Err(Error::ColumnExists(name));
        }

        let data = match init {
            ColumnInit::Data(data) => {
                if data.dtype() != col_schema.kind {
                    return Err(Error::TypeMismatch {
                        expected: col_schema.kind,
                        actual: data.dtype(),
                    });
                }
                if data.len() != self.n_obs {
                    return Err(Error::LengthMismatch {
                        expected: self.n_obs,
                        actual: data.len(),
                    });
                }
                data
            }
            ColumnInit::Broadcast(value) => {
                if value.dtype() != col_schema.kind {
                    return Err(Error::TypeMismatch {
                        expected: col_schema.kind,
                        actual: value.dtype(),
                    });
                }
                ColumnData::broadcast(&value, self.n_obs)
            }
        };

        let mut col_schema = col_schema;
        col_schema.writable = true;
        if col_schema.kind == cellgrid_core::ColumnType::Categorical {
            col_schema.categories = Some(normalize_categories(
                col_schema.categories.as_deref(),
                &data,
            ));
        }

        let mut out = self.overlay(ViewDelta::ObsColumnAdded(name.clone()));
        let obs = out.caches.obs.read().with_col(&name, data)?;
        *out.caches.obs.write() = obs;
        out.schema = out.schema.add_obs_column(col_schema)?;
        Ok(Arc::new(out))
    }

    pub fn drop_obs_column(self: &Arc<Self>, name: &str) -> Result<Arc<AnnoMatrix>> {
        self.schema.writable_check(name)?;
        let mut out = self.overlay(ViewDelta::ObsColumnDropped(name.to_string()));
        let obs = out.caches.obs.read().clone();
        if obs.has_col(name) {
            *out.caches.obs.write() = obs.drop_col(name)?;
        }
        out.schema = out.schema.remove_obs_column(name)?;
        Ok(Arc::new(out))
    }

    /// Rename: drop-then-add, preserving prior data.
    pub async fn rename_obs_column(
        self: &Arc<Self>,
        old: &str,
        new: &str,
    ) -> Result<Arc<AnnoMatrix>> {
        let old_schema = self.schema.writable_check(old)?.clone();
        let data = self.fetch(Field::Obs, &Query::simple(old)).await?;
        let data = data.col(old)?.clone();
        let dropped = self.drop_obs_column(old)?;
        dropped.with_obs_column(
            ColumnSchema {
                name: new.to_string(),
                ..old_schema
            },
            ColumnInit::Data(data),
        )
    }

    /// Add a new category (label) to the schema of an obs column.
    pub fn add_obs_category(
        self: &Arc<Self>,
        col: &str,
        category: &str,
    ) -> Result<Arc<AnnoMatrix>> {
        self.schema.writable_category_check(col)?;
        let mut out = self.overlay(ViewDelta::CategoryChanged(col.to_string()));
        out.schema = out.schema.add_obs_category(col, category)?;
        Ok(Arc::new(out))
    }

    /// Remove a category from the data and schema of an obs column: rows
    /// holding it are reassigned to `unassigned` first.
    pub async fn remove_obs_category(
        self: &Arc<Self>,
        col: &str,
        category: &str,
        unassigned: &str,
    ) -> Result<Arc<AnnoMatrix>> {
        self.schema.writable_category_check(col)?;
        let reset = self.reset_obs_column_values(col, category, unassigned).await?;
        let mut out = reset.overlay(ViewDelta::CategoryChanged(col.to_string()));
        out.schema = out.schema.remove_obs_category(col, category)?;
        Ok(Arc::new(out))
    }

    /// Set all rows identified by `labels` to `value`.
    pub async fn set_obs_column_values(
        self: &Arc<Self>,
        col: &str,
        labels: &[i32],
        value: &CellValue,
    ) -> Result<Arc<AnnoMatrix>> {
        self.schema.writable_category_check(col)?;
        self.fetch(Field::Obs, &Query::simple(col)).await?;

        let offsets = self.row_index.offsets_of(labels)?;
        let current = {
            let obs = self.caches.obs.read();
            obs.col(col)?.clone()
        };
        let updated = current.set_at(&offsets, value)?;

        let mut out = self.overlay(ViewDelta::ObsValuesChanged(col.to_string()));
        let obs = out.caches.obs.read().replace_col_data(col, updated)?;
        *out.caches.obs.write() = obs;
        if let CellValue::Str(category) = value {
            out.schema = out.schema.add_obs_category(col, category)?;
        }
        Ok(Arc::new(out))
    }

    /// Set all rows holding `old_value` to `new_value`.
    pub async fn reset_obs_column_values(
        self: &Arc<Self>,
        col: &str,
        old_value: &str,
        new_value: &str,
    ) -> Result<Arc<AnnoMatrix>> {
        let col_schema = self.schema.writable_category_check(col)?;
        let known = col_schema
            .categories
            .as_ref()
            .is_some_and(|c| c.iter().any(|v| v == old_value));
        if !known {
            return Err(Error::UnknownCategory(old_value.to_string()));
        }

        self.fetch(Field::Obs, &Query::simple(col)).await?;
        let current = {
            let obs = self.caches.obs.read();
            obs.col(col)?.clone()
        };
        let updated = current.replace_value(old_value, new_value)?;

        let mut out = self.overlay(ViewDelta::ObsValuesChanged(col.to_string()));
        let obs = out.caches.obs.read().replace_col_data(col, updated)?;
        *out.caches.obs.write() = obs;
        out.schema = out.schema.add_obs_category(col, new_value)?;
        Ok(Arc::new(out))
    }

    /// Add a layout to the obs embeddings.
    pub fn with_layout(self: &Arc<Self>, layout: LayoutSchema) -> Result<Arc<AnnoMatrix>> {
        let mut out = self.overlay(ViewDelta::LayoutAdded(layout.name.clone()));
        out.schema = out.schema.add_layout(layout)?;
        Ok(Arc::new(out))
    }

    pub fn drop_layout(self: &Arc<Self>, name: &str) -> Result<Arc<AnnoMatrix>> {
        let dims = self
            .schema
            .layout(name)
            .ok_or_else(|| Error::LayoutNotFound(name.to_string()))?
            .dims
            .clone();
        let mut out = self.overlay(ViewDelta::LayoutDropped(name.to_string()));
        let mut emb = out.caches.emb.read().clone();
        for dim in &dims {
            if emb.has_col(dim) {
                emb = emb.drop_col(dim)?;
            }
        }
        *out.caches.emb.write() = emb;
        out.schema = out.schema.remove_layout(name)?;
        Ok(Arc::new(out))
    }

    /// Rename a layout: drop the old dims from cache and schema, declare
    /// the replacement. Coordinates reload under the new name on demand.
    pub fn rename_layout(
        self: &Arc<Self>,
        old: &str,
        replacement: LayoutSchema,
    ) -> Result<Arc<AnnoMatrix>> {
        let dropped = self.drop_layout(old)?;
        dropped.with_layout(replacement)
    }

    /// Apply a server-authoritative schema wholesale (re-embedding).
    pub fn update_schema(self: &Arc<Self>, schema: Schema) -> Result<Arc<AnnoMatrix>> {
        if schema.n_obs != self.n_obs {
            return Err(Error::LengthMismatch {
                expected: self.n_obs,
                actual: schema.n_obs,
            });
        }
        let mut out = self.overlay(ViewDelta::SchemaUpdated);
        out.schema = schema;
        Ok(Arc::new(out))
    }
}
