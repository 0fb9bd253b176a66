// Startup handshake: configuration and schema gate construction of the
// base matrix; channels open only for authenticated (or auth-free)
// sessions.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::info;
use url::Url;

use cellgrid_core::{Dataframe, Error, Field, Query, Result, Schema};
use cellgrid_matrix::{AnnoMatrix, Crossfilter, FetchScheduler, MatrixLoader};

use crate::endpoints::ApiClient;
use crate::events::Event;
use crate::loader::HttpMatrixLoader;
use crate::session::{LayoutChoice, Session, SessionState};

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ConfigResponse {
    config: ServerConfig,
}

#[derive(Debug, Deserialize)]
struct SchemaResponse {
    schema: Schema,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    #[serde(default)]
    response: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FlagResponse {
    #[serde(default)]
    response: bool,
}

/// Everything the startup sequence produces.
pub struct Bootstrap {
    pub session: Arc<Session>,
    pub events: UnboundedReceiver<Event>,
    pub config: ServerConfig,
    pub hosted_mode: bool,
    pub joint_mode: bool,
    /// The var index column, fetched eagerly for gene lookups.
    pub all_genes: Dataframe,
}

/// Derive the duplex-channel base (`wss://host`) from the HTTP API base.
fn derive_ws_base(base_url: &str) -> Result<String> {
    let url = Url::parse(base_url).map_err(|e| Error::InvalidConfig(e.to_string()))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    let host = url
        .host_str()
        .ok_or_else(|| Error::InvalidConfig(format!("no host in {base_url}")))?;
    Ok(match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    })
}

/// Pick the startup layout: the dataset's declared root projection, then
/// "umap", then whatever is first.
fn initial_layout(schema: &Schema) -> Option<String> {
    let mut preferred: Vec<String> = Vec::new();
    if let Some(root) = &schema.root_name {
        preferred.push(root.rsplit("X_").next().unwrap_or(root).to_string());
    }
    preferred.push("umap".to_string());
    for name in &preferred {
        if schema.layout(name).is_some() {
            return Some(name.clone());
        }
    }
    schema.layouts.first().map(|l| l.name.clone())
}

/// Run the full startup sequence against a dataset server and return a
/// live session.
pub async fn initial_data_load(
    base_url: &str,
    scheduler: Arc<FetchScheduler>,
) -> Result<Bootstrap> {
    let api = ApiClient::new(base_url);

    api.fetch_json::<serde_json::Value>("initialize").await?;

    // Config and schema are prerequisites for the base matrix; user and
    // hosting info decide whether channels open.
    let (config, schema, user_info, hosted) = tokio::try_join!(
        api.fetch_json::<ConfigResponse>("config"),
        api.fetch_json::<SchemaResponse>("schema"),
        api.fetch_json::<UserInfoResponse>("userInfo"),
        api.fetch_json::<FlagResponse>("hostedMode"),
    )?;
    let joint_mode = api
        .fetch_json::<FlagResponse>("jointMode")
        .await
        .map(|r| r.response)
        .unwrap_or(false);
    let _ = api.fetch_json::<serde_json::Value>("colors").await;
    let _ = api.fetch_json::<serde_json::Value>("userinfo").await;

    // Feature-gated follow-ups.
    let genesets_enabled = config
        .config
        .parameters
        .get("annotations_genesets")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    if genesets_enabled {
        let _ = api.fetch_json::<serde_json::Value>("genesets").await;
    }
    let _ = api.fetch_json::<serde_json::Value>("reembed-parameters").await;

    let schema = schema.schema;
    let loader = HttpMatrixLoader::new(
        api.http().clone(),
        base_url,
        schema.n_obs,
        schema.n_var,
    )?;
    let matrix = AnnoMatrix::base_matrix(Arc::new(loader) as Arc<dyn MatrixLoader>, scheduler, schema);
    let crossfilter = Crossfilter::new(Arc::clone(&matrix));
    info!(
        n_obs = matrix.n_obs(),
        n_var = matrix.n_var(),
        "base matrix constructed"
    );

    // Warm every declared embedding before it is needed.
    for name in matrix.schema().layout_names() {
        matrix.prefetch(Field::Emb, Query::simple(name));
    }

    let var_index = matrix.schema().var_index.clone();
    let all_genes = matrix.fetch(Field::Var, &Query::simple(&var_index)).await?;

    let current = match initial_layout(matrix.schema()) {
        Some(name) => {
            matrix.fetch(Field::Emb, &Query::simple(&name)).await?;
            name
        }
        None => String::new(),
    };
    let layout = LayoutChoice {
        current,
        available: matrix
            .schema()
            .layout_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let hosted_mode = hosted.response;
    let session = Session::new(
        api,
        hosted_mode,
        SessionState {
            matrix,
            crossfilter,
            layout,
            layer: "X".to_string(),
            scale: false,
        },
        events_tx,
    );

    let logged_in = user_info.response.is_some();
    if logged_in || !hosted_mode {
        let ws_base = derive_ws_base(base_url)?;
        session.open_channels(&ws_base);
    }

    Ok(Bootstrap {
        session,
        events: events_rx,
        config: config.config,
        hosted_mode,
        joint_mode,
        all_genes,
    })
}
