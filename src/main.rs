use anyhow::Context;
use axum::http::HeaderName;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use watchlist_import::app::ports::{MappingStorePort, WatchlistStorePort};
use watchlist_import::config::Config;
use watchlist_import::domain::ImportSource;
use watchlist_import::infra::{HeaderIdentity, TmdbClient};
use watchlist_import::logging;
use watchlist_import::observability;
use watchlist_import::pipeline::{ImportPipeline, ImportRequest};
use watchlist_import::server::{self, AppState};
use watchlist_import::storage::{InMemoryStorage, SqliteStorage};

#[derive(Parser)]
#[command(name = "watchlist_import")]
#[command(about = "Import IMDb and Letterboxd watchlist exports into the catalog")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP import server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Import a CSV export from the command line, printing progress as JSON lines
    Import {
        /// User id to import for
        #[arg(long)]
        user: String,
        /// Export format: imdb or letterboxd
        #[arg(long)]
        source: String,
        /// Path to the CSV export
        #[arg(long)]
        file: String,
        /// Use in-memory stores; nothing is persisted
        #[arg(long)]
        dry_run: bool,
    },
}

type Stores = (Arc<dyn MappingStorePort>, Arc<dyn WatchlistStorePort>);

fn open_stores(config: &Config, in_memory: bool) -> anyhow::Result<Stores> {
    if in_memory {
        let store = Arc::new(InMemoryStorage::new());
        return Ok((store.clone(), store));
    }
    let store = Arc::new(
        SqliteStorage::open(&config.storage.database_path)
            .with_context(|| format!("opening database {}", config.storage.database_path))?,
    );
    Ok((store.clone(), store))
}

fn build_pipeline(config: &Config, dry_run: bool) -> anyhow::Result<ImportPipeline> {
    let search = Arc::new(TmdbClient::new(&config.tmdb)?);
    let (mappings, watchlist) = open_stores(config, dry_run)?;
    Ok(ImportPipeline::new(
        search,
        mappings,
        watchlist,
        config.import.clone(),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;

    if let Some(addr) = &config.metrics_addr {
        if let Err(e) = observability::install_prometheus(addr) {
            warn!("Metrics exporter disabled: {}", e);
        }
    }

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            let header = HeaderName::from_bytes(config.server.user_header.to_lowercase().as_bytes())
                .with_context(|| format!("invalid user header '{}'", config.server.user_header))?;
            let state = Arc::new(AppState {
                pipeline: build_pipeline(&config, false)?,
                identity: Arc::new(HeaderIdentity::new(header)),
                max_upload_bytes: config.server.max_upload_bytes,
            });
            server::start_server(state, port).await?;
        }
        Commands::Import {
            user,
            source,
            file,
            dry_run,
        } => {
            let source: ImportSource = source.parse()?;
            let content = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file))?;
            let pipeline = build_pipeline(&config, dry_run)?;
            info!(%user, %source, dry_run, "Importing {}", file);

            let mut events = pipeline.start(ImportRequest {
                user_id: user,
                source,
                content,
            });
            let mut failed = false;
            while let Some(event) = events.recv().await {
                println!("{}", event.to_json());
                if event.phase() == watchlist_import::pipeline::progress::Phase::Error {
                    failed = true;
                }
            }
            if failed {
                anyhow::bail!("import failed");
            }
        }
    }

    Ok(())
}
