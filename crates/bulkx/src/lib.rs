//! 📦 bulkx — buffer documents, ship them to `_bulk`, bring the 429s home.
//!
//! 🧠 Knowledge graph:
//! - [`BulkIndexer`] is the engine: `add` documents, `flush` when you feel like it.
//! - [`backends`] is where payloads go: real Elasticsearch over HTTP, or an in-memory stand-in.
//! - [`run`] is the batteries-included driver: NDJSON file in, summary table out.
//!
//! 🦆 The duck reviewed the public API. The duck had notes. The duck was ignored.

pub mod app_config;
pub mod backends;
mod buffer;
pub mod common;
pub mod error;
pub mod indexer;
mod progress;
pub mod redact;

use anyhow::{Context, Result, bail};
use tokio::io::AsyncBufReadExt;
use tracing::{debug, info, warn};

use crate::app_config::AppConfig;
use crate::backends::{BulkClient, ClientBackend, ElasticsearchClient, InMemoryClient};
use crate::progress::{IngestProgress, summary_table};

pub use crate::buffer::CompressionLevel;
pub use crate::common::{BulkAction, BulkItem, DocumentError, FailedDoc, FlushStats};
pub use crate::error::{BulkIndexerError, TransportError};
pub use crate::indexer::{BulkIndexer, BulkIndexerConfig, IndexerStats};
pub use tokio_util::sync::CancellationToken;

/// 🚀 Read `runtime.input_file` line by line, index every line, drain, report.
///
/// Each non-blank line is one document for `runtime.index`. A flush fires
/// whenever the buffer crosses `flush_max_docs` entries or `flush_max_bytes`
/// raw bytes. At the end, flushes repeat until the buffer is empty or
/// `max_flush_rounds` is spent.
///
/// 💀 Errors if the input can't be read, a flush fails at the transport level,
/// or documents are still buffered when the rounds run out. Rejected documents
/// are logged and counted, not fatal.
pub async fn run(app_config: AppConfig) -> Result<IndexerStats> {
    let client = if app_config.runtime.dry_run {
        info!("🧪 dry run: documents go to an in-memory client and stay there");
        ClientBackend::InMemory(InMemoryClient::new())
    } else {
        ClientBackend::from_config(&app_config.client)
            .context("💀 Could not build the bulk client from the [client] section")?
    };
    if let ClientBackend::Elasticsearch(ref es) = client {
        ping(es).await?;
    }

    let indexer = BulkIndexer::new(client, app_config.indexer.clone())
        .context("💀 The [indexer] section was rejected")?;
    let stats = ingest(&indexer, &app_config).await?;
    Ok(stats)
}

async fn ping(es: &ElasticsearchClient) -> Result<()> {
    es.ping()
        .await
        .context("💀 Elasticsearch did not answer the ping. Is it up? Is the URL right? Is it even Elasticsearch?")
}

/// 🔄 The read-add-flush loop, generic so tests can hand in any client.
pub(crate) async fn ingest<C: BulkClient>(
    indexer: &BulkIndexer<C>,
    app_config: &AppConfig,
) -> Result<IndexerStats> {
    let runtime = &app_config.runtime;
    let input_file = runtime
        .input_file
        .as_deref()
        .context("💀 runtime.input_file is not set. We can't index a file we don't know about.")?;

    let file = tokio::fs::File::open(input_file)
        .await
        .with_context(|| format!("💀 Could not open input file '{}'", input_file.display()))?;
    let total_bytes = file.metadata().await.map(|m| m.len()).unwrap_or(0);
    let progress = IngestProgress::new(input_file.display().to_string(), total_bytes);
    let cancel = CancellationToken::new();

    let mut lines = tokio::io::BufReader::new(file).lines();
    let mut bytes_read: u64 = 0;
    let mut line_number: u64 = 0;
    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("💀 Read failed at line {} of '{}'", line_number + 1, input_file.display()))?
    {
        line_number += 1;
        // 📏 +1 for the newline `lines()` swallowed
        bytes_read += line.len() as u64 + 1;
        if line.trim().is_empty() {
            continue;
        }
        let item = BulkItem::from_bytes(runtime.index.as_str(), line.into_bytes());
        if let Err(err) = indexer.add(item) {
            // 🐛 one bad line doesn't get to sink the whole file
            warn!(line_number, error = %err, "⚠️ skipping a line the indexer refused");
            continue;
        }

        if indexer.items() >= runtime.flush_max_docs
            || indexer.uncompressed_len() >= runtime.flush_max_bytes
        {
            flush_once(indexer, &cancel).await?;
            progress.update(bytes_read, &indexer.stats(), indexer.items());
        }
    }
    progress.update(bytes_read, &indexer.stats(), indexer.items());

    // 🔄 drain: retries keep landing back in the buffer, so keep going until it's dry or we're out of patience
    let mut rounds = 0;
    while !indexer.is_empty() && rounds < runtime.max_flush_rounds {
        rounds += 1;
        debug!(round = rounds, items = indexer.items(), "🔄 draining");
        flush_once(indexer, &cancel).await?;
        progress.update(bytes_read, &indexer.stats(), indexer.items());
    }
    progress.finish();

    let stats = indexer.stats();
    println!("{}", summary_table(&stats, progress.elapsed()));

    if !indexer.is_empty() {
        bail!(
            "💀 {} documents are still buffered after {} flush rounds. The cluster keeps saying 'later'; \
             raise runtime.max_flush_rounds or indexer.max_document_retries, or give it a minute.",
            indexer.items(),
            runtime.max_flush_rounds
        );
    }
    info!(
        indexed = stats.indexed,
        failed = stats.failed,
        "✅ input file fully processed"
    );
    Ok(stats)
}

async fn flush_once<C: BulkClient>(
    indexer: &BulkIndexer<C>,
    cancel: &CancellationToken,
) -> Result<()> {
    let flush = indexer
        .flush(cancel)
        .await
        .context("💀 Bulk flush failed. The documents are still buffered, but this run is over.")?;
    for failed in &flush.failed_docs {
        warn!(
            index = %failed.index,
            status = failed.status,
            position = failed.position,
            attempts = failed.attempts,
            kind = %failed.error.kind,
            reason = %failed.error.reason,
            "💀 document rejected"
        );
    }
    Ok(())
}
