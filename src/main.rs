mod cache;
mod clock;
mod config;
mod model;
mod remote;
mod server;
mod sync;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use cache::{Cache, FileStore, KvStore, MemoryStore};
use clock::SystemClock;
use remote::HttpBackend;
use server::state::AppState;
use sync::SyncContext;

#[derive(Parser)]
#[command(name = "tripsync", about = "Local state-sync service for the trip-planner client")]
struct Cli {
    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Start the local bridge against a trip-planner backend
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Bind address
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,

        /// Base URL of the trip-planner backend
        #[arg(long, env = "TRIPSYNC_BACKEND_URL", default_value = config::DEFAULT_BACKEND_URL)]
        backend_url: String,

        /// Directory for the persistent cache (default: ~/.tripsync/cache)
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Timeout in seconds for backend requests
        #[arg(long, default_value_t = config::DEFAULT_TIMEOUT_SECS)]
        timeout_secs: u64,

        /// Keep the cache in memory only; nothing survives a restart
        #[arg(long)]
        ephemeral: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("tripsync v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            bind,
            backend_url,
            cache_dir,
            timeout_secs,
            ephemeral,
        } => {
            let store = open_store(cache_dir, ephemeral)?;
            run_server(store, port, bind, backend_url, timeout_secs).await?;
        }
    }

    Ok(())
}

fn open_store(cache_dir: Option<PathBuf>, ephemeral: bool) -> anyhow::Result<Arc<dyn KvStore>> {
    if ephemeral {
        info!("Using in-memory cache");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let dir = match cache_dir {
        Some(dir) => dir,
        None => dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("No home directory; pass --cache-dir"))?
            .join(config::DEFAULT_CACHE_DIR),
    };
    let store = FileStore::open(&dir)
        .map_err(|e| anyhow::anyhow!("Failed to open cache at '{}': {}", dir.display(), e))?;
    info!("Cache directory: {}", store.dir().display());
    Ok(Arc::new(store))
}

async fn run_server(
    store: Arc<dyn KvStore>,
    port: u16,
    bind: String,
    backend_url: String,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    let backend = HttpBackend::new(&backend_url, Duration::from_secs(timeout_secs))?;
    info!("Backend: {}", backend.base_url());

    let sync = SyncContext::new(Cache::new(store), Arc::new(backend), Arc::new(SystemClock));
    spawn_cache_logger(&sync);
    sync.initialize().await;

    // Build router
    let state = AppState::new(sync.clone());
    let app = server::build_router(state);

    let addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("tripsync listening on http://{}", addr);

    // Graceful shutdown: flush the tracking log on ctrl-c
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down, uploading pending tracking data...");
            match sync.upload_and_restart().await {
                Ok(outcome) => info!("Tracking upload: {:?}", outcome),
                Err(e) => warn!("Tracking upload failed; kept in cache: {}", e),
            }
            info!("Goodbye.");
        })
        .await?;

    Ok(())
}

fn spawn_cache_logger(sync: &SyncContext) {
    let mut events = sync.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!("Cache {:?}", event),
                Err(RecvError::Lagged(n)) => debug!("Cache logger skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
