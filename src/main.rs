//! CLI entry point: `serve`, `sync batch`, `sync configured`, `schema bootstrap`.

mod auth;
mod chat_client;
mod chunk;
mod config;
mod discovery;
mod embedding_client;
mod error;
mod extraction_client;
mod jobs;
mod lake_client;
mod metadata_ingester;
mod models;
mod queue;
mod rag;
mod retrieval;
mod server;
mod source_client;
mod worker_pool;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use chat_client::HttpChatModel;
use config::Config;
use embedding_client::HttpEmbeddingModel;
use extraction_client::ExtractionClient;
use jobs::JobRegistry;
use lake_client::LakeClient;
use queue::TransformationQueue;
use source_client::SourceClient;
use worker_pool::WorkerPool;

#[derive(Parser)]
#[command(
    name = "lakebridge",
    about = "Ingests a source repository into a content lake's vector index and answers questions over it under the source's ACLs",
    version
)]
struct Cli {
    #[arg(long, global = true, default_value = "./config/lakebridge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve,

    /// Ingestion operations
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },

    /// Content lake schema management
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },
}

#[derive(Subcommand)]
enum SyncAction {
    /// Ingest every configured source root, ignoring any prior checkpoint
    Batch,
    /// Ingest using the roots and exclude rules exactly as configured
    Configured,
}

#[derive(Subcommand)]
enum SchemaAction {
    /// Provision the configured schema fragments in the content lake
    Bootstrap,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => run_serve(cfg).await,
        Commands::Sync { action: _ } => run_sync_cli(cfg).await,
        Commands::Schema { action: SchemaAction::Bootstrap } => run_schema_bootstrap(cfg).await,
    }
}

struct Clients {
    source: Arc<SourceClient>,
    lake: Arc<LakeClient>,
    extraction: Arc<ExtractionClient>,
    embedding_model: Arc<HttpEmbeddingModel>,
    chat_model: Arc<HttpChatModel>,
}

fn build_clients(cfg: &Config) -> anyhow::Result<Clients> {
    let source = Arc::new(SourceClient::new(&cfg.source)?);
    let lake = Arc::new(LakeClient::new(&cfg.lake)?);
    let extraction = Arc::new(ExtractionClient::new(&cfg.transform_service)?);
    let embedding_model = Arc::new(HttpEmbeddingModel::new(cfg.embedding.endpoint.clone(), &cfg.embedding)?);
    let chat_model = Arc::new(HttpChatModel::new(
        cfg.chat.endpoint.clone(),
        cfg.chat.model_name.clone(),
        cfg.chat.timeout_secs,
    )?);
    Ok(Clients { source, lake, extraction, embedding_model, chat_model })
}

async fn run_serve(cfg: Config) -> anyhow::Result<()> {
    let cfg = Arc::new(cfg);
    let clients = build_clients(&cfg)?;

    let state = server::AppState {
        config: cfg.clone(),
        source: clients.source,
        lake: clients.lake,
        extraction: clients.extraction,
        embedding_model: clients.embedding_model,
        chat_model: clients.chat_model,
        queue: TransformationQueue::new(cfg.transform.queue_capacity),
        jobs: Arc::new(JobRegistry::new()),
    };

    server::run_server(cfg, state).await
}

async fn run_sync_cli(cfg: Config) -> anyhow::Result<()> {
    let cfg = Arc::new(cfg);
    let clients = build_clients(&cfg)?;
    let queue = TransformationQueue::new(cfg.transform.queue_capacity);
    let registry = JobRegistry::new();

    let worker_pool = WorkerPool::spawn(
        cfg.transform.worker_threads,
        clients.source.clone(),
        clients.lake.clone(),
        clients.extraction.clone(),
        clients.embedding_model.clone(),
        queue.clone(),
        cfg.clone(),
    );

    let job_id = registry.start_job();
    let repository_id = clients.source.repository_id().await?;
    let stream = discovery::discover(&clients.source, &cfg);
    tokio::pin!(stream);

    let summary = metadata_ingester::run_ingestion(
        &clients.source,
        &clients.lake,
        &queue,
        &registry,
        job_id,
        &repository_id,
        stream,
    )
    .await;

    tracing::info!(
        discovered = summary.discovered,
        ingested = summary.ingested,
        failed = summary.failed,
        "metadata ingestion complete, draining transformation queue"
    );

    while queue.pending() > 0 {
        sleep(Duration::from_millis(500)).await;
    }

    worker_pool.shutdown().await;

    println!(
        "discovered {} ingested {} failed {} transformed {} transform_failed {}",
        summary.discovered,
        summary.ingested,
        summary.failed,
        queue.completed(),
        queue.failed()
    );

    Ok(())
}

async fn run_schema_bootstrap(cfg: Config) -> anyhow::Result<()> {
    let lake = LakeClient::new(&cfg.lake)?;

    if !cfg.lake.model.bootstrap.enabled {
        println!("schema bootstrap is disabled in configuration, nothing to do");
        return Ok(());
    }

    let fragments: Vec<serde_json::Value> = cfg
        .lake
        .model
        .bootstrap
        .fragments
        .iter()
        .map(|f| serde_json::from_str(f))
        .collect::<Result<_, _>>()?;

    lake.bootstrap_schema(&fragments).await?;
    println!("bootstrapped {} schema fragment(s)", fragments.len());
    Ok(())
}
