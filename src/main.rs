use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use cellgrid::prelude::*;

/// Inspect a remote single-cell dataset from the command line
#[derive(Parser, Debug)]
#[command(name = "cellgrid")]
#[command(about = "Client for remote single-cell dataset servers", long_about = None)]
struct Args {
    /// Base URL of the dataset server API
    #[arg(short, long, default_value = "http://localhost:5005/api/v0.2")]
    server: String,

    /// Observation column to fetch after startup
    #[arg(short, long)]
    column: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting cellgrid v{}", env!("CARGO_PKG_VERSION"));
    info!("Server: {}", args.server);

    let scheduler = FetchScheduler::new(DEFAULT_FETCH_LIMIT);
    let bootstrap = initial_data_load(&args.server, scheduler).await?;
    let state = bootstrap.session.state();

    info!(
        "Dataset: {} observations x {} variables",
        state.matrix.n_obs(),
        state.matrix.n_var()
    );
    info!("Layouts: {}", state.layout.available.join(", "));
    info!("Active layout: {}", state.layout.current);
    info!("Genes loaded: {}", bootstrap.all_genes.n_rows());

    let obs_columns: Vec<&str> = state
        .matrix
        .schema()
        .obs_columns
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    info!("Observation columns: {}", obs_columns.join(", "));

    if let Some(column) = &args.column {
        let frame = state.matrix.fetch(Field::Obs, &Query::simple(column)).await?;
        let data = frame.col(column)?;
        info!("Fetched '{}': {} values", column, data.len());
        if data.as_strings().is_some() {
            let categories = data.summarize_categories();
            info!("Categories ({}): {}", categories.len(), categories.join(", "));
        }
    }

    info!("Done");
    Ok(())
}
