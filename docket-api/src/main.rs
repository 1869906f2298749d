use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use docket_api::{
    init_tracing,
    router::{create_router, AppState},
};
use docket_core::{
    config::{DEFAULT_MAX_CONCURRENT_TASKS, DEFAULT_MAX_FILE_SIZE},
    processor::{default_processor, CommandConfig},
    JobManager, JobManagerConfig,
};
use mimalloc::MiMalloc;
use tokio::net::TcpListener;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// OpenTelemetry collector endpoint, spans are only exported when set
    #[arg(long, env = "OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    /// API listen address
    #[arg(long, env = "API_LISTEN_ADDR", default_value = "0.0.0.0:8002")]
    listen_addr: String,

    /// Maximum number of documents processed at the same time
    #[arg(long, env = "MAX_CONCURRENT_TASKS", default_value_t = DEFAULT_MAX_CONCURRENT_TASKS)]
    max_concurrent_tasks: usize,

    /// Per-document processing timeout, in seconds
    #[arg(long, env = "TASK_TIMEOUT", default_value_t = 300)]
    task_timeout: u64,

    /// Largest accepted upload, in bytes
    #[arg(long, env = "MAX_FILE_SIZE", default_value_t = DEFAULT_MAX_FILE_SIZE)]
    max_file_size: u64,

    /// Document parser executable
    #[arg(long, env = "DOCKET_PARSER_BIN", default_value = "mineru")]
    parser_bin: String,

    /// Office converter used for Word documents
    #[arg(long, env = "DOCKET_CONVERTER_BIN", default_value = "libreoffice")]
    converter_bin: String,

    /// Inference device passed to the parser (cpu, cuda, mps...)
    #[arg(long, env = "DOCKET_DEVICE", default_value = "cpu")]
    device: String,

    /// Local model cache directory used in offline mode
    #[arg(long, env = "DOCKET_MODEL_CACHE")]
    model_cache: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(args.otlp_endpoint.as_deref(), "docket-api".into())
        .context("can't setup tracing for API")?;

    let config = JobManagerConfig::default()
        .with_max_concurrent_tasks(args.max_concurrent_tasks)
        .with_task_timeout(Duration::from_secs(args.task_timeout))
        .with_max_file_size(args.max_file_size);
    let processor = default_processor(CommandConfig {
        parser_bin: args.parser_bin,
        converter_bin: args.converter_bin,
        device: args.device,
        model_cache: args.model_cache,
    });
    tracing::debug!(?processor, "document processor configured");
    let manager = JobManager::new(config, processor);

    let app = create_router(AppState { manager });

    let listener = TcpListener::bind(&args.listen_addr)
        .await
        .with_context(|| format!("can't bind {}", args.listen_addr))?;
    tracing::info!(
        "Starting docket service listening on {}",
        listener.local_addr()?
    );
    axum::serve(listener, app).await?;
    Ok(())
}
