//! # Previously, on bulkx...
//!
//! 🎬 The cluster was down. Or expensive. Or in another country. Someone
//! needed a `_bulk` endpoint that lives entirely in RAM, answers instantly,
//! and can be told to say 429 on cue.
//!
//! That someone was this module.
//!
//! [`InMemoryClient`] decodes each payload exactly the way Elasticsearch would
//! (gzip aware, two lines per entry), records every document it saw, and asks
//! a responder closure what to say about each one. The default responder says
//! "201 Created" to everything, like a golden retriever.
//!
//! ⚠️ This is for tests, benchmarks, and dry runs. Deploying it to prod will
//! make your indexing throughput look incredible right up until someone searches.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::backends::{BulkClient, BulkItemResult, BulkRequest, BulkResponse};
use crate::buffer::{gunzip, split_entries};
use crate::common::DocumentError;
use crate::error::TransportError;

/// 🔧 `[client.InMemory]` in the config file. An empty table is fine.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct InMemoryClientConfig {
    /// ⏱️ Pretend the network exists for this many milliseconds per request.
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

/// 📦 One document as the in-memory store saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedDoc {
    pub action: String,
    pub index: String,
    pub document_id: Option<String>,
    /// The raw document line, without its newline.
    pub source: String,
}

/// 📬 What the responder decided about one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub status: u16,
    pub error: Option<DocumentError>,
    /// Overrides the `_index` reported back. `None` echoes the requested index.
    pub index: Option<String>,
}

impl ItemOutcome {
    /// ✅ 201 Created.
    pub fn created() -> Self {
        Self {
            status: 201,
            error: None,
            index: None,
        }
    }

    /// 💀 Rejected with `status`, an error type and a reason.
    pub fn rejected(status: u16, kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(DocumentError {
                kind: kind.into(),
                reason: reason.into(),
            }),
            index: None,
        }
    }

    /// 📡 Report a different resolved index (aliases, data stream backing indices).
    pub fn in_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }
}

/// 🎯 Decides the fate of each received document.
pub type Responder = Arc<dyn Fn(&ReceivedDoc) -> ItemOutcome + Send + Sync>;

/// 📦 A `_bulk` endpoint that never leaves the process.
///
/// Clone-able; clones share the same record of received documents and the
/// same switches, so tests can keep a handle after giving one to the indexer.
#[derive(Clone)]
pub struct InMemoryClient {
    received: Arc<Mutex<Vec<ReceivedDoc>>>,
    requests: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
    responder: Responder,
    latency: Option<Duration>,
}

impl std::fmt::Debug for InMemoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 🎭 the responder is a closure and closures do not do Debug
        f.debug_struct("InMemoryClient")
            .field("requests", &self.requests.load(Ordering::Relaxed))
            .field("unavailable", &self.unavailable.load(Ordering::Relaxed))
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryClient {
    /// 🚀 Accept everything.
    pub fn new() -> Self {
        Self::with_responder(|_| ItemOutcome::created())
    }

    /// 🔧 Accept everything, with whatever latency the config asks for.
    pub fn from_config(config: &InMemoryClientConfig) -> Self {
        match config.latency_ms {
            Some(ms) => Self::new().with_latency(Duration::from_millis(ms)),
            None => Self::new(),
        }
    }

    /// 🎯 Ask `responder` about every document.
    pub fn with_responder(
        responder: impl Fn(&ReceivedDoc) -> ItemOutcome + Send + Sync + 'static,
    ) -> Self {
        Self {
            received: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(AtomicUsize::new(0)),
            unavailable: Arc::new(AtomicBool::new(false)),
            responder: Arc::new(responder),
            latency: None,
        }
    }

    /// ⏱️ Sleep this long before answering. Handy for racing flushes against each other.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// 🔌 While set, every request fails as a whole with HTTP 503.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 🔢 Requests that produced a response (including 503s).
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// 📦 Every document received so far, in arrival order. Rejected ones included.
    pub fn received(&self) -> Vec<ReceivedDoc> {
        self.lock().clone()
    }

    /// 🧹 Forget every received document. Long-running benches would otherwise hoard them all.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ReceivedDoc>> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn decode_entry(entry: &[u8]) -> Result<ReceivedDoc, TransportError> {
    let newline = memchr::memchr(b'\n', entry)
        .ok_or_else(|| TransportError::Decode("entry without an action line".into()))?;
    let action_line: serde_json::Value = serde_json::from_slice(&entry[..newline])?;
    let (action, metadata) = action_line
        .as_object()
        .and_then(|envelope| envelope.iter().next())
        .ok_or_else(|| TransportError::Decode("action line is not an object".into()))?;
    let field = |name: &str| {
        metadata
            .get(name)
            .and_then(|v| v.as_str())
            .map(str::to_owned)
    };
    let source = entry[newline + 1..]
        .strip_suffix(b"\n")
        .unwrap_or(&entry[newline + 1..]);
    Ok(ReceivedDoc {
        action: action.clone(),
        index: field("_index").unwrap_or_default(),
        document_id: field("_id"),
        source: String::from_utf8_lossy(source).into_owned(),
    })
}

#[async_trait]
impl BulkClient for InMemoryClient {
    async fn bulk(&self, request: BulkRequest) -> Result<BulkResponse, TransportError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::Status {
                status: 503,
                body: "🔌 in-memory cluster is taking a nap".into(),
            });
        }

        // 🫁 same decode path the indexer uses to requeue, so both agree on framing
        let raw = gunzip(&request.payload, request.compressed)
            .map_err(|err| TransportError::Decode(format!("payload is not valid gzip: {err}")))?;

        let mut items = Vec::with_capacity(request.items);
        let mut docs = Vec::with_capacity(request.items);
        for entry in split_entries(&raw) {
            let doc = decode_entry(entry)?;
            let outcome = (self.responder)(&doc);
            items.push(BulkItemResult {
                action: doc.action.clone(),
                index: outcome.index.unwrap_or_else(|| doc.index.clone()),
                status: outcome.status,
                error: outcome.error,
            });
            docs.push(doc);
        }
        self.lock().extend(docs);

        Ok(BulkResponse {
            errors: items.iter().any(|item| !item.is_success()),
            took: Some(0),
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BatchBuffer, BufferSnapshot, CompressionLevel};

    fn payload_of(level: CompressionLevel, entries: &[&[u8]]) -> BufferSnapshot {
        let buffer = BatchBuffer::new(level);
        for entry in entries {
            buffer.append(entry).expect("💀 append");
        }
        buffer.snapshot().expect("💀 snapshot")
    }

    fn request_of(snapshot: &BufferSnapshot) -> BulkRequest {
        BulkRequest {
            payload: snapshot.payload.clone(),
            items: snapshot.items(),
            compressed: snapshot.compressed,
            uncompressed_len: snapshot.uncompressed_len,
        }
    }

    #[tokio::test]
    async fn the_one_where_every_doc_is_welcome() -> Result<(), TransportError> {
        let snapshot = payload_of(
            CompressionLevel::Default,
            &[
                b"{\"index\":{\"_index\":\"a\",\"_id\":\"1\"}}\n{\"n\":1}\n",
                b"{\"create\":{\"_index\":\"b\"}}\n{\"n\":2}\n",
            ],
        );
        let client = InMemoryClient::new();
        let response = client.bulk(request_of(&snapshot)).await?;

        assert!(!response.errors);
        assert_eq!(response.items.len(), 2);
        assert_eq!(response.items[1].action, "create");
        let received = client.received();
        assert_eq!(received[0].document_id.as_deref(), Some("1"));
        assert_eq!(received[1].index, "b");
        assert_eq!(received[1].source, "{\"n\":2}");
        assert_eq!(client.requests(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_responder_picks_favorites() -> Result<(), TransportError> {
        let snapshot = payload_of(
            CompressionLevel::None,
            &[
                b"{\"index\":{\"_index\":\"a\"}}\n{\"ok\":true}\n",
                b"{\"index\":{\"_index\":\"a\"}}\n{\"ok\":false}\n",
            ],
        );
        let client = InMemoryClient::with_responder(|doc| {
            if doc.source.contains("false") {
                ItemOutcome::rejected(400, "mapper_parsing_exception", "bad")
            } else {
                ItemOutcome::created().in_index(".ds-a-000001")
            }
        });
        let response = client.bulk(request_of(&snapshot)).await?;
        assert!(response.errors);
        assert_eq!(response.items[0].index, ".ds-a-000001");
        assert_eq!(response.items[1].status, 400);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_cluster_naps() {
        let snapshot = payload_of(CompressionLevel::None, &[b"{\"index\":{}}\n{}\n"]);
        let client = InMemoryClient::new();
        client.set_unavailable(true);
        let result = client.bulk(request_of(&snapshot)).await;
        assert!(matches!(
            result,
            Err(TransportError::Status { status: 503, .. })
        ));
        assert!(client.received().is_empty());
    }

    #[tokio::test]
    async fn the_one_where_clones_share_one_memory() -> Result<(), TransportError> {
        let snapshot = payload_of(CompressionLevel::Fastest, &[b"{\"index\":{}}\n{}\n"]);
        let client = InMemoryClient::from_config(&InMemoryClientConfig { latency_ms: Some(1) });
        let handle = client.clone();
        client.bulk(request_of(&snapshot)).await?;
        assert_eq!(handle.received().len(), 1);
        handle.clear();
        assert!(client.received().is_empty());
        assert_eq!(client.requests(), 1);
        Ok(())
    }
}
