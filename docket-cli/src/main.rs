use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use colored::*;
use docket_core::{
    config::{DEFAULT_MAX_CONCURRENT_TASKS, DEFAULT_MAX_FILE_SIZE},
    processor::{default_processor, CommandConfig},
    ExtractionMode, JobManager, JobManagerConfig, JobSnapshot, JobState, ProcessOptions,
    ResultSaver,
};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use memmap2::Mmap;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Docket - batch document extraction",
    long_about = "Docket runs documents through an external parser with a bounded number of concurrent jobs and a per-document timeout, then saves the extracted content as JSON and markdown."
)]
struct Args {
    /// Documents to process (pdf, images, word, text, xml)
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Specifies the target directory where results will be saved
    ///
    /// If not specified, defaults to the current working directory.
    #[arg(
        long,
        env = "DOCKET_OUTPUT_DIR",
        help = "Specify the directory to store extraction results"
    )]
    output_dir: Option<PathBuf>,

    #[arg(
        long,
        short = 'm',
        default_value = "markdown",
        help = "Extraction mode: text_only, text_layout, markdown or structured"
    )]
    mode: ExtractionMode,

    #[arg(
        long,
        short = 'j',
        default_value_t = DEFAULT_MAX_CONCURRENT_TASKS,
        help = "Number of documents processed at the same time"
    )]
    max_concurrent: usize,

    #[arg(long, default_value_t = 300, help = "Per-document timeout in seconds")]
    timeout: u64,

    #[arg(long, default_value_t = DEFAULT_MAX_FILE_SIZE, help = "Largest accepted file, in bytes")]
    max_file_size: u64,

    #[arg(long, default_value_t = false, help = "Also save the markdown content")]
    save_markdown: bool,

    #[arg(long, default_value_t = false, help = "Skip listing extracted images")]
    no_images: bool,

    #[arg(long, default_value = "ch", help = "OCR language hint for the parser")]
    ocr_language: String,

    #[arg(long, env = "DOCKET_PARSER_BIN", default_value = "mineru")]
    parser_bin: String,

    #[arg(long, env = "DOCKET_CONVERTER_BIN", default_value = "libreoffice")]
    converter_bin: String,

    #[arg(long, env = "DOCKET_DEVICE", default_value = "cpu")]
    device: String,

    #[arg(long, env = "DOCKET_MODEL_CACHE")]
    model_cache: Option<PathBuf>,
}

fn setup_progress_bar(len: usize) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("#>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    Ok(pb)
}

fn read_document(path: &std::path::Path) -> anyhow::Result<Arc<[u8]>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("can't open {}", path.display()))?;
    if file.metadata()?.len() == 0 {
        return Ok(Arc::from(Vec::new()));
    }
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(Arc::from(&mmap[..]))
}

fn print_failure(snapshot: &JobSnapshot) {
    let reason = snapshot
        .failure
        .as_ref()
        .map(|f| f.to_string())
        .unwrap_or_default();
    match snapshot.state {
        JobState::TimedOut => println!(
            "{} {} timed out: {}",
            "⏱".yellow().bold(),
            snapshot.filename.yellow(),
            reason
        ),
        _ => println!(
            "{} {} failed: {}",
            "✗".red().bold(),
            snapshot.filename.red(),
            reason
        ),
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = JobManagerConfig::default()
        .with_max_concurrent_tasks(args.max_concurrent)
        .with_task_timeout(Duration::from_secs(args.timeout))
        .with_max_file_size(args.max_file_size);
    let processor = default_processor(CommandConfig {
        parser_bin: args.parser_bin,
        converter_bin: args.converter_bin,
        device: args.device,
        model_cache: args.model_cache,
    });
    let manager = JobManager::new(config, processor);

    let options = ProcessOptions {
        extraction_mode: args.mode,
        extract_images: !args.no_images,
        ocr_language: args.ocr_language,
        ..Default::default()
    };

    tracing::debug!(files = args.files.len(), ?options, "submitting documents");
    let mut rejected = 0;
    let mut job_ids = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        let submitted = read_document(path).and_then(|payload| {
            manager
                .submit(payload, filename, options.clone())
                .map_err(anyhow::Error::from)
        });
        match submitted {
            Ok(job_id) => job_ids.push(job_id),
            Err(e) => {
                rejected += 1;
                println!("{} {}: {e}", "✗".red().bold(), path.display());
            }
        }
    }

    let pb = setup_progress_bar(job_ids.len())?;
    let mut pending: FuturesUnordered<_> = job_ids
        .into_iter()
        .map(|job_id| {
            let manager = manager.clone();
            async move { manager.wait_for(job_id).await }
        })
        .collect();

    let mut finished = Vec::new();
    while let Some(snapshot) = pending.next().await {
        let snapshot = snapshot?;
        pb.inc(1);
        pb.set_message(snapshot.filename.clone());
        finished.push(snapshot);
    }
    pb.finish_and_clear();

    let mut saver = ResultSaver::new(args.output_dir, args.save_markdown);
    let mut failed = rejected;
    for snapshot in &finished {
        match snapshot.state {
            JobState::Completed => {
                saver.save(snapshot)?;
            }
            _ => {
                failed += 1;
                print_failure(snapshot);
            }
        }
    }

    let stats = manager.stats();
    println!(
        "{} {} completed, {} failed, {} timed out, {} rejected",
        "ℹ".cyan().bold(),
        stats.completed.to_string().green(),
        stats.failed.to_string().red(),
        stats.timed_out.to_string().yellow(),
        rejected
    );

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
