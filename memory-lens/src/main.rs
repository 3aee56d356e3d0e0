mod cli;

use anyhow::{bail, Context};
use clap::Parser;
use cli::{Cli, Command, IndexArgs, IngestArgs, RequeueArgs, SearchArgs, StoreArgs};
use memory_lens::{
    render_response, BulkIndexer, DescriptionStore, ElasticsearchClient, IndexerError, IngestionPipeline,
    OpenAiCaptioner, RecordStatus, SearchService,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Command::Ingest(args) => ingest(args).await,
        Command::Index(args) => index(args).await,
        Command::Search(args) => search(args).await,
        Command::Status(args) => status(args),
        Command::Requeue(args) => requeue(args),
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

async fn ingest(args: IngestArgs) -> anyhow::Result<()> {
    let api_key = match args.api_key.clone() {
        Some(key) if !key.trim().is_empty() => key,
        _ => bail!("no captioning API key: pass --api-key or set OPENAI_API_KEY"),
    };

    let captioner = OpenAiCaptioner::new(args.caption_config(api_key))?;
    let pipeline = IngestionPipeline::new(Arc::new(captioner), args.ingest_config());
    let report = pipeline.run().await?;

    if report.store_recovered {
        warn!("The previous store could not be read and has been replaced");
    }
    for failure in &report.discovery_errors {
        warn!("Unreadable: {}", failure);
    }
    for failure in &report.failed {
        error!("Failed: {}", failure);
    }

    println!(
        "{} images found, {} described, {} failed, {} already described, {} skipped after repeated failures",
        report.discovered,
        report.described,
        report.failed.len(),
        report.skipped_described,
        report.skipped_exhausted
    );
    Ok(())
}

async fn index(args: IndexArgs) -> anyhow::Result<()> {
    let engine = ElasticsearchClient::new(args.engine.engine_config())
        .with_context(|| format!("invalid search engine address {}", args.engine.es_host))?;
    let indexer = BulkIndexer::new(Arc::new(engine), args.index_config());

    let store = DescriptionStore::load(&args.store.store);
    if let Some(anomaly) = store.anomaly() {
        bail!("cannot index {}: {}", args.store.store.display(), anomaly);
    }

    let report = indexer.index_store(&store).await?;
    println!(
        "Indexed {} of {} documents into '{}' ({} records without a description skipped)",
        report.succeeded, report.submitted, report.index_name, report.skipped_undescribed
    );
    for failure in &report.failures {
        println!("  failed {}: {}", failure.image_path, failure.reason);
    }

    if args.strict && !report.is_complete() {
        return Err(IndexerError::BulkPartialFailure {
            failed: report.failures.len(),
            total: report.submitted,
        }
        .into());
    }
    Ok(())
}

async fn search(args: SearchArgs) -> anyhow::Result<()> {
    let engine = ElasticsearchClient::new(args.engine.engine_config())?;
    let service = SearchService::connect(Arc::new(engine), args.search_config()).await?;

    if let Some(query) = args.query_text() {
        let response = service.search_or_message(&query).await;
        print!("{}", render_response(&response));
        return Ok(());
    }

    info!("Reading queries from stdin, one per line");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let response = service.search_or_message(&line).await;
        print!("{}", render_response(&response));
    }
    Ok(())
}

fn status(args: StoreArgs) -> anyhow::Result<()> {
    let store = DescriptionStore::load(&args.store);
    if let Some(anomaly) = store.anomaly() {
        println!("warning: {}", anomaly);
    }

    let counts = store.counts();
    println!(
        "{}: {} records ({} described, {} pending, {} failed)",
        args.store.display(),
        store.len(),
        counts.described,
        counts.pending,
        counts.failed
    );
    for record in store.with_status(RecordStatus::Failed) {
        println!(
            "  {} (attempts: {}): {}",
            record.image_path,
            record.attempts,
            record.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn requeue(args: RequeueArgs) -> anyhow::Result<()> {
    let mut store = DescriptionStore::load(&args.store.store);
    if let Some(anomaly) = store.anomaly() {
        bail!("refusing to rewrite {}: {}", args.store.store.display(), anomaly);
    }

    let changed = store.requeue_failed(&args.paths);
    store.save(&args.store.store)?;
    println!("Requeued {} failed image(s)", changed);
    Ok(())
}
