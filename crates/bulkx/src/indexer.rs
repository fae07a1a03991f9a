//! 🔄 The Bulk Indexer — buffer in, verdicts out, retries back in.
//!
//! 🎬 *[a flush begins. the buffer is emptied in one breath.]*
//! *[the payload flies. the cluster answers, item by item, in order.]*
//! *[some documents come home. some never will.]*
//!
//! 🧠 Knowledge graph:
//! - `add` serializes one `BulkItem` and appends it to the [`BatchBuffer`]. Sync. No I/O beyond the body reader.
//! - `flush` snapshots the buffer, sends it through the [`BulkClient`], and walks the response positionally:
//!   - 2xx → `indexed`
//!   - retryable status with budget left → back into the buffer, counter + 1, `retried_docs`
//!   - anything else → `failed_docs`, reason redacted unless asked otherwise
//! - No lock is held while the request is in flight. New `add`s land in the fresh buffer.
//! - Transport failure, cancellation, or dropping the flush future → the whole snapshot goes back, counters untouched.
//! - Two flushes at once on one indexer → the second gets `Busy`.
//!
//! ⚠️ There is no timer in here. Nothing flushes on its own. Nothing sleeps between retries.
//! When to flush again is the caller's call. 🦆

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::backends::{BulkClient, BulkRequest};
use crate::buffer::{BatchBuffer, BufferSnapshot, CompressionLevel, split_entries};
use crate::common::{BulkItem, DocumentError, FailedDoc, FlushStats};
use crate::error::{BulkIndexerError, Result, TransportError};
use crate::redact::redact_error_reason;

/// 🔧 Indexer knobs. Everything defaults to the cautious choice.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BulkIndexerConfig {
    /// 🔄 How many times one document may be put back for another flush. 0 = never.
    #[serde(default)]
    pub max_document_retries: u32,
    /// 🔄 Item statuses worth another try.
    #[serde(default = "default_retry_on_document_status")]
    pub retry_on_document_status: Vec<u16>,
    /// 🫁 gzip level for the buffer. Fixed for the indexer's lifetime.
    #[serde(default)]
    pub compression_level: CompressionLevel,
    /// 🔒 Keep the whole `error.reason` instead of just its first sentence.
    #[serde(default)]
    pub capture_full_error_reason: bool,
}

// 🚦 429 Too Many Requests: the cluster's polite way of saying "not right now"
fn default_retry_on_document_status() -> Vec<u16> {
    vec![429]
}

impl Default for BulkIndexerConfig {
    fn default() -> Self {
        Self {
            max_document_retries: 0,
            retry_on_document_status: default_retry_on_document_status(),
            compression_level: CompressionLevel::default(),
            capture_full_error_reason: false,
        }
    }
}

impl BulkIndexerConfig {
    fn validate(&self) -> Result<()> {
        if let Some(status) = self
            .retry_on_document_status
            .iter()
            .find(|status| !(400..=599).contains(*status))
        {
            return Err(BulkIndexerError::Config(format!(
                "retry_on_document_status may only hold failure statuses (400..=599), got {status}"
            )));
        }
        Ok(())
    }
}

/// 📊 Lifetime totals for one indexer. Cumulative, unlike [`FlushStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexerStats {
    pub added: u64,
    pub indexed: u64,
    pub retried: u64,
    pub failed: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
    /// Compressed payload bytes sent, all attempts.
    pub bytes_flushed: u64,
    pub bytes_uncompressed_flushed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    added: AtomicU64,
    indexed: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    flushes: AtomicU64,
    failed_flushes: AtomicU64,
    bytes_flushed: AtomicU64,
    bytes_uncompressed_flushed: AtomicU64,
}

// 🔒 one flush at a time. released on drop, whatever path we leave by.
struct FlushPermit<'a>(&'a AtomicBool);

impl<'a> FlushPermit<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlushPermit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// ↩️ Holds a snapshot while its request is in flight.
///
/// Unless `take` is called, dropping it puts the snapshot back into the buffer.
/// That covers transport errors, cancellation, and the flush future being dropped mid-request.
struct InFlight<'a> {
    buffer: &'a BatchBuffer,
    snapshot: Option<BufferSnapshot>,
}

impl InFlight<'_> {
    fn take(mut self) -> Option<BufferSnapshot> {
        self.snapshot.take()
    }

    fn restore(mut self) -> std::io::Result<()> {
        match self.snapshot.take() {
            Some(snapshot) => self.buffer.merge_back(&snapshot),
            None => Ok(()),
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            warn!(
                items = snapshot.items(),
                "↩️ flush abandoned mid-request, putting the batch back in the buffer"
            );
            if let Err(err) = self.buffer.merge_back(&snapshot) {
                error!(%err, items = snapshot.items(), "💀 could not restore abandoned batch");
            }
        }
    }
}

/// 📦 The bulk indexer.
///
/// Share it behind an `Arc` and call [`BulkIndexer::add`] from as many threads
/// as you like. Call [`BulkIndexer::flush`] from one place.
#[derive(Debug)]
pub struct BulkIndexer<C> {
    client: C,
    config: BulkIndexerConfig,
    buffer: BatchBuffer,
    flushing: AtomicBool,
    bytes_flushed: AtomicUsize,
    bytes_uncompressed_flushed: AtomicUsize,
    counters: Counters,
}

impl<C: BulkClient> BulkIndexer<C> {
    /// 🚀 Wire an indexer to `client`.
    pub fn new(client: C, config: BulkIndexerConfig) -> Result<Self> {
        config.validate()?;
        if config.max_document_retries > 0 && config.retry_on_document_status.is_empty() {
            warn!("🔄 max_document_retries is set but no status is retryable, nothing will ever be retried");
        }
        debug!(?config, "🚀 bulk indexer ready");
        Ok(Self {
            client,
            buffer: BatchBuffer::new(config.compression_level),
            config,
            flushing: AtomicBool::new(false),
            bytes_flushed: AtomicUsize::new(0),
            bytes_uncompressed_flushed: AtomicUsize::new(0),
            counters: Counters::default(),
        })
    }

    /// 📥 Serialize `item` into the buffer.
    ///
    /// On `Err` the item was not buffered and not counted.
    pub fn add(&self, item: BulkItem) -> Result<()> {
        let entry = item.into_entry()?;
        self.buffer.append(&entry)?;
        self.counters.added.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// 🚀 Send everything buffered right now, classify every item, requeue the retryable ones.
    ///
    /// Entries added while the request is in flight stay buffered for the next flush.
    /// `Err` only for call-level failures; rejected documents come back inside `Ok`.
    pub async fn flush(&self, cancel: &CancellationToken) -> Result<FlushStats> {
        let _permit = FlushPermit::acquire(&self.flushing).ok_or(BulkIndexerError::Busy)?;

        let snapshot = self.buffer.snapshot()?;
        if snapshot.is_empty() {
            trace!("🫙 nothing buffered, nothing to flush");
            return Ok(FlushStats::default());
        }

        self.bytes_uncompressed_flushed
            .store(snapshot.uncompressed_len, Ordering::SeqCst);
        self.bytes_flushed.store(snapshot.payload.len(), Ordering::SeqCst);
        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_flushed
            .fetch_add(snapshot.payload.len() as u64, Ordering::Relaxed);
        self.counters
            .bytes_uncompressed_flushed
            .fetch_add(snapshot.uncompressed_len as u64, Ordering::Relaxed);

        let in_flight = InFlight {
            buffer: &self.buffer,
            snapshot: Some(snapshot),
        };

        let outcome = match in_flight.snapshot.as_ref() {
            Some(snapshot) => {
                let request = BulkRequest {
                    payload: snapshot.payload.clone(),
                    items: snapshot.items(),
                    compressed: snapshot.compressed,
                    uncompressed_len: snapshot.uncompressed_len,
                };
                debug!(
                    items = request.items,
                    bytes = request.payload.len(),
                    uncompressed_bytes = request.uncompressed_len,
                    "📡 flushing batch"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(TransportError::Cancelled),
                    response = self.client.bulk(request) => response,
                }
                .and_then(|response| {
                    if response.items.len() == snapshot.items() {
                        Ok(response)
                    } else {
                        Err(TransportError::ItemCountMismatch {
                            expected: snapshot.items(),
                            received: response.items.len(),
                        })
                    }
                })
            }
            None => Ok(Default::default()),
        };

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                self.counters.failed_flushes.fetch_add(1, Ordering::Relaxed);
                warn!(%err, "📡 bulk request failed, batch goes back in the buffer");
                in_flight.restore()?;
                return Err(err.into());
            }
        };

        // ✅ a parsed response is always honored from here on, cancellation or not
        let Some(snapshot) = in_flight.take() else {
            return Ok(FlushStats::default());
        };

        let mut stats = FlushStats::default();
        let mut requeue: Vec<(usize, u32)> = Vec::new();
        for (position, (item, &attempts)) in response
            .items
            .iter()
            .zip(snapshot.attempts.iter())
            .enumerate()
        {
            if item.is_success() {
                stats.indexed += 1;
                continue;
            }
            let retryable = self.config.retry_on_document_status.contains(&item.status);
            if retryable && attempts < self.config.max_document_retries {
                requeue.push((position, attempts + 1));
                stats.retried_docs += 1;
                continue;
            }
            let error = item.error.clone().unwrap_or_default();
            stats.failed_docs.push(FailedDoc {
                index: item.index.clone(),
                status: item.status,
                error: DocumentError {
                    reason: redact_error_reason(
                        &error.reason,
                        self.config.capture_full_error_reason,
                    ),
                    kind: error.kind,
                },
                position,
                attempts: attempts + 1,
            });
        }

        if !requeue.is_empty() {
            self.requeue(&snapshot, &requeue)?;
        }

        self.counters
            .indexed
            .fetch_add(stats.indexed, Ordering::Relaxed);
        self.counters
            .retried
            .fetch_add(stats.retried_docs, Ordering::Relaxed);
        self.counters
            .failed
            .fetch_add(stats.failed(), Ordering::Relaxed);

        if let Some(first) = stats.failed_docs.first() {
            warn!(
                failed = stats.failed_docs.len(),
                status = first.status,
                kind = %first.error.kind,
                reason = %first.error.reason,
                "🪦 documents rejected for good"
            );
        }
        debug!(
            indexed = stats.indexed,
            retried = stats.retried_docs,
            failed = stats.failed_docs.len(),
            "✅ flush done"
        );
        Ok(stats)
    }

    // 🔄 retries are just adds that already know their bytes
    fn requeue(&self, snapshot: &BufferSnapshot, requeue: &[(usize, u32)]) -> Result<()> {
        let raw = snapshot.raw_ndjson()?;
        let entries = split_entries(&raw);
        if entries.len() != snapshot.items() {
            return Err(BulkIndexerError::Buffer(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "snapshot holds {} entries but {} were counted",
                    entries.len(),
                    snapshot.items()
                ),
            )));
        }
        self.buffer.append_entries(
            requeue
                .iter()
                .map(|&(position, attempts)| (entries[position], attempts)),
        )?;
        trace!(requeued = requeue.len(), "🔄 retryable documents back in the buffer");
        Ok(())
    }

    /// 📏 Compressed bytes buffered (emitted by the compressor so far).
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// 📏 Raw NDJSON bytes buffered, requeued retries included.
    pub fn uncompressed_len(&self) -> usize {
        self.buffer.uncompressed_len()
    }

    /// 🔢 Entries buffered, requeued retries included.
    pub fn items(&self) -> usize {
        self.buffer.items()
    }

    /// 🫙 Nothing buffered.
    pub fn is_empty(&self) -> bool {
        self.items() == 0
    }

    /// 📏 Raw size of the most recently attempted flush batch. Not cumulative.
    pub fn bytes_uncompressed_flushed(&self) -> usize {
        self.bytes_uncompressed_flushed.load(Ordering::SeqCst)
    }

    /// 📏 Wire size of the most recently attempted flush batch. Not cumulative.
    pub fn bytes_flushed(&self) -> usize {
        self.bytes_flushed.load(Ordering::SeqCst)
    }

    /// 📊 Lifetime totals.
    pub fn stats(&self) -> IndexerStats {
        let c = &self.counters;
        IndexerStats {
            added: c.added.load(Ordering::Relaxed),
            indexed: c.indexed.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            flushes: c.flushes.load(Ordering::Relaxed),
            failed_flushes: c.failed_flushes.load(Ordering::Relaxed),
            bytes_flushed: c.bytes_flushed.load(Ordering::Relaxed),
            bytes_uncompressed_flushed: c.bytes_uncompressed_flushed.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &BulkIndexerConfig {
        &self.config
    }

    pub fn compression_level(&self) -> CompressionLevel {
        self.buffer.compression_level()
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}
