//! 🔌 Backends — the Bulk Transport Adapter layer.
//!
//! 🚰 The indexer hands over one finished payload. A backend turns it into one
//! bulk request and hands back one structured response. No retries here, no
//! classification, no opinions. Retries are the engine's problem. Good luck, engine.
//!
//! 🧠 Knowledge graph:
//! - Pattern: trait (`BulkClient`) → concrete impls (`ElasticsearchClient`, `InMemoryClient`) → `ClientBackend` enum
//! - `ClientBackend::from_config` resolves the backend from `ClientConfig`, same as every other resolver in here.
//! - Wire format parsing (`BulkResponse::from_slice`) lives here so every backend agrees on what a response is.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;

use crate::common::DocumentError;
use crate::error::TransportError;

pub mod elasticsearch;
pub mod in_mem;

pub use elasticsearch::{ElasticsearchClient, ElasticsearchClientConfig};
pub use in_mem::{InMemoryClient, InMemoryClientConfig, ItemOutcome, ReceivedDoc};

/// 📡 One outbound bulk request. The payload shares its bytes with the indexer's snapshot.
#[derive(Debug, Clone)]
pub struct BulkRequest {
    /// NDJSON, gzip-framed when `compressed` is set.
    pub payload: Bytes,
    /// Number of entries in the payload.
    pub items: usize,
    pub compressed: bool,
    pub uncompressed_len: usize,
}

/// 📬 One item's outcome, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemResult {
    /// Action key the store used for the item (`index`, `create`, ...).
    pub action: String,
    /// Index the item landed in (or would have).
    pub index: String,
    pub status: u16,
    pub error: Option<DocumentError>,
}

impl BulkItemResult {
    /// ✅ 2xx means the store took it.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 📬 The structured bulk response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkResponse {
    /// The top-level `errors` flag. Informational; every item is classified on its own.
    pub errors: bool,
    pub took: Option<u64>,
    pub items: Vec<BulkItemResult>,
}

// 📦 What actually comes over the wire. Each item is a single-key map keyed by action.
#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    took: Option<u64>,
    items: Vec<HashMap<String, WireItem>>,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    #[serde(rename = "_index", default)]
    index: String,
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

fn document_error_from_wire(error: serde_json::Value) -> DocumentError {
    match error {
        // 🎯 the usual shape: {"type": "...", "reason": "..."}
        serde_json::Value::Object(fields) => DocumentError {
            kind: fields
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned(),
            reason: fields
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned(),
        },
        // 🐛 some proxies flatten the error into a string. we take what we get.
        serde_json::Value::String(reason) => DocumentError {
            kind: String::new(),
            reason,
        },
        other => DocumentError {
            kind: String::new(),
            reason: other.to_string(),
        },
    }
}

impl BulkResponse {
    /// 📖 Parse a `_bulk` response body.
    pub fn from_slice(body: &[u8]) -> Result<Self, TransportError> {
        let wire: WireResponse = serde_json::from_slice(body)?;
        let mut items = Vec::with_capacity(wire.items.len());
        for (position, item) in wire.items.into_iter().enumerate() {
            let mut entries = item.into_iter();
            let (action, result) = match (entries.next(), entries.next()) {
                (Some(only), None) => only,
                _ => {
                    return Err(TransportError::Decode(format!(
                        "bulk response item {position} must hold exactly one action"
                    )));
                }
            };
            items.push(BulkItemResult {
                action,
                index: result.index,
                status: result.status,
                error: result.error.map(document_error_from_wire),
            });
        }
        Ok(Self {
            errors: wire.errors,
            took: wire.took,
            items,
        })
    }
}

/// 📡 Something that can carry a bulk request to a store and bring back the verdict.
///
/// # Contract 📜
/// - One call, one request. No retries, no splitting that reorders items.
/// - `Ok` only when a complete per-item response was obtained.
/// - Anything else is a `TransportError` and the indexer treats the batch as unacknowledged.
#[async_trait]
pub trait BulkClient: Send + Sync + std::fmt::Debug {
    async fn bulk(&self, request: BulkRequest) -> Result<BulkResponse, TransportError>;
}

/// 🔧 Which backend to build, straight out of the config file.
#[derive(Debug, Deserialize, Clone)]
pub enum ClientConfig {
    Elasticsearch(ElasticsearchClientConfig),
    /// Accept everything, keep it in RAM. Dry runs and tests.
    InMemory(InMemoryClientConfig),
}

/// 🎭 The many faces of a bulk client, dispatched by match.
#[derive(Debug, Clone)]
pub enum ClientBackend {
    Elasticsearch(ElasticsearchClient),
    InMemory(InMemoryClient),
}

impl ClientBackend {
    /// 🔧 Resolve the backend from config. Builds the HTTP client where one is needed.
    pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
        match config {
            ClientConfig::Elasticsearch(es) => {
                Ok(Self::Elasticsearch(ElasticsearchClient::new(es.clone())?))
            }
            ClientConfig::InMemory(in_mem) => Ok(Self::InMemory(InMemoryClient::from_config(in_mem))),
        }
    }
}

#[async_trait]
impl BulkClient for ClientBackend {
    async fn bulk(&self, request: BulkRequest) -> Result<BulkResponse, TransportError> {
        match self {
            Self::Elasticsearch(client) => client.bulk(request).await,
            Self::InMemory(client) => client.bulk(request).await,
        }
    }
}

#[async_trait]
impl<C: BulkClient + ?Sized> BulkClient for std::sync::Arc<C> {
    async fn bulk(&self, request: BulkRequest) -> Result<BulkResponse, TransportError> {
        (**self).bulk(request).await
    }
}
