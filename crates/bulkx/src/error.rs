//! 💀 Errors — the ways a call into the indexer can actually fail.
//!
//! 🧠 Knowledge graph:
//! - `Encoding`: the document never made it into the buffer. Raised by `add`.
//! - `Transport`: the batch went out (or tried to) and nothing usable came back. Raised by `flush`.
//! - `Buffer`: the in-memory stream itself failed. Should not happen. Says so loudly if it does.
//! - `Busy`: somebody else is already flushing this indexer. Raised by `flush`.
//! - `Config`: the settings are self-contradictory. Raised at construction.
//!
//! ⚠️ A rejected *document* is not an error. It is data, and it lives in
//! `FlushStats::failed_docs`. A bulk response where every single item failed
//! is still an `Ok(..)`. The cluster answered. It just said "no" a lot. 🦆

use thiserror::Error;

/// 📦 Everything the public `BulkIndexer` surface can hand back as `Err`.
#[derive(Debug, Error)]
pub enum BulkIndexerError {
    /// 🧱 The item could not be serialized into an NDJSON entry. Buffer untouched.
    #[error("💀 could not encode bulk item for index '{index}': {reason}")]
    Encoding { index: String, reason: String },

    /// 📡 The bulk round trip failed as a whole. The snapshot went back into the buffer.
    #[error("💀 bulk request failed, the batch is back in the buffer: {0}")]
    Transport(#[from] TransportError),

    /// 🔒 A flush is already in flight on this indexer.
    #[error("🔒 a flush is already in progress on this indexer, wait your turn")]
    Busy,

    /// 🫁 The buffer's own byte stream misbehaved while writing or re-reading entries.
    #[error("💀 buffer stream error: {0}")]
    Buffer(#[from] std::io::Error),

    /// 🔧 Settings rejected at construction.
    #[error("🔧 invalid bulk indexer configuration: {0}")]
    Config(String),
}

/// 📡 Failures of the bulk transport round trip.
///
/// Any of these means no per-item outcome was observed, so nothing in the
/// batch is considered acknowledged.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request never got a response: DNS, TCP, TLS, timeouts, the usual suspects.
    #[error("failed to send bulk request: {0}")]
    Send(String),

    /// The endpoint answered with a non-2xx status for the whole request.
    #[error("bulk endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not a bulk response we could read.
    #[error("failed to decode bulk response: {0}")]
    Decode(String),

    /// The response did not carry exactly one result per submitted item,
    /// so positional attribution is impossible.
    #[error("bulk response carried {received} item results for {expected} submitted items")]
    ItemCountMismatch { expected: usize, received: usize },

    /// The flush was cancelled before the response arrived.
    #[error("flush cancelled before the bulk response arrived")]
    Cancelled,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        // 🧅 reqwest keeps the juicy part ("tcp connect error", "dns error") in the source chain
        let mut message = err.to_string();
        let mut cause = std::error::Error::source(&err);
        while let Some(inner) = cause {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            cause = inner.source();
        }
        TransportError::Send(message)
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Decode(err.to_string())
    }
}

/// 🎯 The crate-wide result alias. `E` is overridable for the transport layer.
pub type Result<T, E = BulkIndexerError> = std::result::Result<T, E>;
