//! Wave server CLI
//!
//! A thin wrapper around the seiswave-serve library.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use seiswave::{Ingestor, MemoryStore, QueryEngine, WaveStore, epoch_now};
use seiswave_serve::{ServerState, StorePool, WaveServer};
use seiswave_server::{DEFAULT_CONFIG_PATH, config, loader};

#[derive(Parser)]
#[command(name = "seiswave-server")]
#[command(about = "Waveform time-series server")]
#[command(after_help = "\
EXAMPLES:
    # Serve sample files from a directory
    seiswave-server ./data/

    # Files are named STA.CHA.NET[.LOC].txt, one '<time> <count>' per line:
    #   data/STA1.EHZ.NW.txt -> channel STA1$EHZ$NW$--

    # Limit lookback to 30 days on another port
    seiswave-server --max-days 30 --port 16023 ./data/
")]
struct Args {
    /// Sample files or directories to import at startup
    paths: Vec<PathBuf>,

    /// TOML configuration file [default: seiswave.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Lookback limit in days, 0 for unlimited (overrides the config file)
    #[arg(long)]
    max_days: Option<f64>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = match &args.config {
        Some(path) => config::load(path, true)?,
        None => config::load(Path::new(DEFAULT_CONFIG_PATH), false)?,
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(max_days) = args.max_days {
        config.query.max_days = max_days;
    }

    let store: Arc<dyn WaveStore> = Arc::new(MemoryStore::new());
    let quarantine: Arc<dyn WaveStore> = Arc::new(MemoryStore::new());

    let files = loader::collect_files(&args.paths);
    if !files.is_empty() {
        let ingestor = Ingestor::new(store.clone(), config.filter_chain()?, config.ingest.clone())
            .with_quarantine(quarantine);
        log::info!("Importing {} files", files.len());
        let report = loader::import_files(Arc::new(ingestor), files, epoch_now()).await;
        log::info!(
            "Imported {} records ({} rejected, {} quarantined, {} new channels) in {:?}",
            report.accepted,
            report.rejected,
            report.quarantined,
            report.channels_created,
            report.elapsed
        );
    }

    let query = config.query_config();
    log::info!(
        "Max days per query: {}",
        if query.max_days > 0.0 {
            query.max_days.to_string()
        } else {
            "unlimited".to_string()
        }
    );

    let pool = StorePool::shared(store, config.server.store_handles)?;
    let server = WaveServer::new(ServerState::new(
        pool,
        QueryEngine::new(query),
        config.server_config(),
    ));

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
