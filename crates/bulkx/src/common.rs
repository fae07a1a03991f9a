//! 📦 Common data structures — the building blocks of bulkx
//!
//! 🎬 COLD OPEN — INT. INGEST NODE — 3:47 AM
//!
//! A document arrives. It has an index it wants to live in and a body it
//! refuses to explain. It gets serialized into two lines of NDJSON, dropped
//! into a buffer, and forgotten by its caller. Some documents come back as
//! `FailedDoc`s. Most just quietly become a number in `FlushStats::indexed`.
//!
//! 🦆
//!
//! This module defines the caller-facing item type, how it turns into a
//! buffered entry, and the per-flush report that comes back out.

use std::io::Read;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{BulkIndexerError, Result};

/// 🎯 Which bulk action keys the metadata line.
///
/// `index` overwrites, `create` refuses to overwrite (and is what data streams demand).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    #[default]
    Index,
    Create,
}

impl BulkAction {
    /// 📡 The key used on the action-metadata line and in the response item map.
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkAction::Index => "index",
            BulkAction::Create => "create",
        }
    }
}

/// 📦 A single "please index this" request from a caller.
///
/// The body is any byte-producing reader. It is read exactly once, during
/// `BulkIndexer::add`, and then the item is gone. Only its serialized bytes
/// live on inside the buffer.
pub struct BulkItem {
    /// 📡 Target index (or data stream) name.
    pub index: String,
    /// 🎯 Bulk action for the metadata line.
    pub action: BulkAction,
    /// 🔖 Optional `_id`. Absent means the cluster picks one.
    pub document_id: Option<String>,
    /// 📦 The document itself, one JSON object, no interior newlines.
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for BulkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 🎭 the body is a trait object reader, it has nothing to say for itself
        f.debug_struct("BulkItem")
            .field("index", &self.index)
            .field("action", &self.action)
            .field("document_id", &self.document_id)
            .finish_non_exhaustive()
    }
}

impl BulkItem {
    /// 🚀 An `index` action for `index`, body pulled from `body`.
    pub fn new(index: impl Into<String>, body: impl Read + Send + 'static) -> Self {
        Self {
            index: index.into(),
            action: BulkAction::Index,
            document_id: None,
            body: Box::new(body),
        }
    }

    /// 📦 Same as [`BulkItem::new`] but for bytes you already have in hand.
    pub fn from_bytes(index: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(index, std::io::Cursor::new(body.into()))
    }

    /// 🦆 Serialize any `Serialize` value as the document body.
    pub fn from_json<T: Serialize>(index: impl Into<String>, document: &T) -> Result<Self> {
        let index = index.into();
        let body = serde_json::to_vec(document).map_err(|err| BulkIndexerError::Encoding {
            index: index.clone(),
            reason: err.to_string(),
        })?;
        Ok(Self::from_bytes(index, body))
    }

    /// 🎯 Switch the bulk action.
    pub fn with_action(mut self, action: BulkAction) -> Self {
        self.action = action;
        self
    }

    /// 🔖 Pin the document `_id`.
    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    /// 🧱 Turn the item into its buffered entry: action line, document line, each `\n` terminated.
    ///
    /// Consumes the reader. On error nothing has been written anywhere.
    pub(crate) fn into_entry(mut self) -> Result<Vec<u8>> {
        if self.index.is_empty() {
            return Err(self.encoding_error("index name is empty"));
        }

        let mut body = Vec::new();
        if let Err(err) = self.body.read_to_end(&mut body) {
            return Err(self.encoding_error(format!("failed to read document body: {err}")));
        }

        // 🧹 a trailing newline from the caller is fine, we add our own
        while body.last().is_some_and(|b| b.is_ascii_whitespace()) {
            body.pop();
        }
        if body.is_empty() {
            return Err(self.encoding_error("document body is empty"));
        }
        // ⚠️ two lines per entry, no more. an interior newline would shift every position after it.
        if memchr::memchr(b'\n', &body).is_some() {
            return Err(self.encoding_error("document body spans multiple lines"));
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("_index".to_owned(), json!(self.index));
        if let Some(ref id) = self.document_id {
            metadata.insert("_id".to_owned(), json!(id));
        }
        let mut envelope = serde_json::Map::new();
        envelope.insert(
            self.action.as_str().to_owned(),
            serde_json::Value::Object(metadata),
        );
        let action_line = serde_json::to_vec(&envelope)
            .map_err(|err| self.encoding_error(format!("failed to serialize action line: {err}")))?;

        let mut entry = Vec::with_capacity(action_line.len() + body.len() + 2);
        entry.extend_from_slice(&action_line);
        entry.push(b'\n');
        entry.extend_from_slice(&body);
        entry.push(b'\n');
        Ok(entry)
    }

    fn encoding_error(&self, reason: impl Into<String>) -> BulkIndexerError {
        BulkIndexerError::Encoding {
            index: self.index.clone(),
            reason: reason.into(),
        }
    }
}

/// 💀 What the store said about a document it would not take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct DocumentError {
    /// `error.type`, e.g. `mapper_parsing_exception`.
    pub kind: String,
    /// `error.reason`, possibly trimmed to its first sentence.
    pub reason: String,
}

/// 🪦 A document in terminal failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDoc {
    /// 📡 The index the store resolved for the item.
    pub index: String,
    /// HTTP-style item status.
    pub status: u16,
    pub error: DocumentError,
    /// 0-based position inside the flushed batch.
    pub position: usize,
    /// Flush attempts this document took part in, this one included.
    pub attempts: u32,
}

/// 📊 The outcome of one `flush`.
///
/// Returned to the caller and then forgotten by the indexer. If you want
/// lifetime totals, look at [`crate::IndexerStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushStats {
    /// ✅ Documents the store confirmed.
    pub indexed: u64,
    /// 🔄 Documents put back in the buffer for another go.
    pub retried_docs: u64,
    /// 🪦 Documents that will not be sent again, in submission order.
    pub failed_docs: Vec<FailedDoc>,
}

impl FlushStats {
    /// 🔢 Count of terminal failures.
    pub fn failed(&self) -> u64 {
        self.failed_docs.len() as u64
    }

    /// ✅ Every document in the batch was indexed.
    pub fn is_clean(&self) -> bool {
        self.retried_docs == 0 && self.failed_docs.is_empty()
    }
}
