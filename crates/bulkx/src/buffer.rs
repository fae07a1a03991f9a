//! 🫁 The Batch Buffer — where documents wait, squished, for their flight to `_bulk`.
//!
//! 🎬 *[a document enters. it is gzipped before it can even say hello.]*
//!
//! Entries are appended through a streaming compressor, so the byte stream is
//! always already-compressed and `len()` is live. Two size domains are tracked
//! at once: raw NDJSON bytes (`uncompressed_len`) and what the compressor has
//! emitted so far (`len`). The latter lags a bit because deflate likes to
//! hold onto bytes until it has enough to be clever with. That's fine. The
//! snapshot finishes the stream, and then the number is real.
//!
//! 🧠 Knowledge graph:
//! - One `Mutex<BufferState>` covers stream + counters + retry counters. Nothing else is shared.
//! - Entries are positional. `attempts[i]` belongs to the i-th entry in the stream.
//! - `snapshot()` swaps in a fresh state under the lock and finishes the old stream outside it.
//! - `append_entries()` is how retries and restored snapshots come back. Same path, same accounting.
//!
//! ⚠️ The lock is never held across an `.await`. There are no `.await`s in here at all. 🦆

use std::borrow::Cow;
use std::io::{Read, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// 🫁 How hard to squeeze the buffer. Fixed for the lifetime of an indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Plain NDJSON, no gzip framing, no `Content-Encoding` header.
    None,
    /// gzip level 6. The sensible middle child.
    #[default]
    Default,
    /// gzip level 1.
    Fastest,
    /// gzip level 9.
    Smallest,
}

impl CompressionLevel {
    fn gzip(self) -> Option<Compression> {
        match self {
            CompressionLevel::None => None,
            CompressionLevel::Default => Some(Compression::default()),
            CompressionLevel::Fastest => Some(Compression::fast()),
            CompressionLevel::Smallest => Some(Compression::best()),
        }
    }
}

/// 📦 The byte stream itself: either plain bytes or a live gzip encoder.
#[derive(Debug)]
enum Stream {
    Plain(Vec<u8>),
    Gzip(GzEncoder<Vec<u8>>),
}

impl Stream {
    fn new(level: CompressionLevel) -> Self {
        match level.gzip() {
            None => Stream::Plain(Vec::new()),
            Some(compression) => Stream::Gzip(GzEncoder::new(Vec::new(), compression)),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Plain(buf) => {
                buf.extend_from_slice(bytes);
                Ok(())
            }
            Stream::Gzip(encoder) => encoder.write_all(bytes),
        }
    }

    /// Bytes emitted so far. For gzip this trails the input until the encoder flushes.
    fn emitted_len(&self) -> usize {
        match self {
            Stream::Plain(buf) => buf.len(),
            Stream::Gzip(encoder) => encoder.get_ref().len(),
        }
    }

    /// 🏁 Write the gzip trailer and hand back the finished payload.
    fn finish(self) -> std::io::Result<Vec<u8>> {
        match self {
            Stream::Plain(buf) => Ok(buf),
            Stream::Gzip(encoder) => encoder.finish(),
        }
    }
}

/// 🔒 Everything the lock protects.
#[derive(Debug)]
struct BufferState {
    stream: Stream,
    uncompressed_len: usize,
    /// One retry counter per buffered entry, in stream order. Its length is the item count.
    attempts: Vec<u32>,
}

impl BufferState {
    fn new(level: CompressionLevel) -> Self {
        Self {
            stream: Stream::new(level),
            uncompressed_len: 0,
            attempts: Vec::new(),
        }
    }

    fn append(&mut self, entry: &[u8], attempts: u32) -> std::io::Result<()> {
        self.stream.write_all(entry)?;
        // ✅ counters move only after the bytes are in
        self.uncompressed_len += entry.len();
        self.attempts.push(attempts);
        Ok(())
    }
}

/// 📸 A detached, finished copy of what the buffer held at snapshot time.
#[derive(Debug)]
pub(crate) struct BufferSnapshot {
    /// The wire payload, gzip-framed when `compressed`. Cheap to clone into a request.
    pub(crate) payload: Bytes,
    pub(crate) uncompressed_len: usize,
    /// Retry counters, positionally aligned with the entries in `payload`.
    pub(crate) attempts: Vec<u32>,
    pub(crate) compressed: bool,
}

impl BufferSnapshot {
    pub(crate) fn items(&self) -> usize {
        self.attempts.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// 🫁 The raw NDJSON behind the payload.
    pub(crate) fn raw_ndjson(&self) -> std::io::Result<Cow<'_, [u8]>> {
        gunzip(&self.payload, self.compressed)
    }
}

/// 🫁 Undo the gzip framing, if there is any. Plain payloads are borrowed as-is.
pub(crate) fn gunzip(payload: &[u8], compressed: bool) -> std::io::Result<Cow<'_, [u8]>> {
    if !compressed {
        return Ok(Cow::Borrowed(payload));
    }
    let mut raw = Vec::new();
    GzDecoder::new(payload).read_to_end(&mut raw)?;
    Ok(Cow::Owned(raw))
}

/// ✂️ Split raw NDJSON into entries: every second `\n` closes one.
///
/// Each slice keeps both of its trailing newlines, so it can be re-appended verbatim.
pub(crate) fn split_entries(raw: &[u8]) -> Vec<&[u8]> {
    let mut entries = Vec::new();
    let mut start = 0;
    for (nth, newline) in memchr::memchr_iter(b'\n', raw).enumerate() {
        if nth % 2 == 1 {
            entries.push(&raw[start..=newline]);
            start = newline + 1;
        }
    }
    entries
}

/// 📦 The Batch Buffer.
#[derive(Debug)]
pub(crate) struct BatchBuffer {
    level: CompressionLevel,
    state: Mutex<BufferState>,
}

impl BatchBuffer {
    pub(crate) fn new(level: CompressionLevel) -> Self {
        Self {
            level,
            state: Mutex::new(BufferState::new(level)),
        }
    }

    pub(crate) fn compression_level(&self) -> CompressionLevel {
        self.level
    }

    // 🔒 a panic elsewhere can't leave the counters half-updated (they move after the write), so poison is survivable
    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 📥 Append one fresh entry.
    pub(crate) fn append(&self, entry: &[u8]) -> std::io::Result<()> {
        self.lock().append(entry, 0)?;
        trace!(bytes = entry.len(), "📥 entry buffered");
        Ok(())
    }

    /// 🔄 Append several entries with their retry counters, under one lock acquisition.
    pub(crate) fn append_entries<'a>(
        &self,
        entries: impl IntoIterator<Item = (&'a [u8], u32)>,
    ) -> std::io::Result<()> {
        let mut state = self.lock();
        for (entry, attempts) in entries {
            state.append(entry, attempts)?;
        }
        Ok(())
    }

    /// 📏 Compressed bytes emitted so far.
    pub(crate) fn len(&self) -> usize {
        self.lock().stream.emitted_len()
    }

    /// 📏 Raw NDJSON bytes buffered.
    pub(crate) fn uncompressed_len(&self) -> usize {
        self.lock().uncompressed_len
    }

    /// 🔢 Entries buffered.
    pub(crate) fn items(&self) -> usize {
        self.lock().attempts.len()
    }

    /// 📸 Detach everything buffered right now and leave an empty buffer behind.
    ///
    /// The swap happens under the lock. Finishing the gzip stream happens after
    /// the lock is released, on the detached encoder, so `add` callers are not
    /// kept waiting on the trailer.
    pub(crate) fn snapshot(&self) -> std::io::Result<BufferSnapshot> {
        let detached = {
            let mut state = self.lock();
            std::mem::replace(&mut *state, BufferState::new(self.level))
        };
        let compressed = matches!(detached.stream, Stream::Gzip(_));
        let payload = detached.stream.finish()?;
        Ok(BufferSnapshot {
            payload: Bytes::from(payload),
            uncompressed_len: detached.uncompressed_len,
            attempts: detached.attempts,
            compressed,
        })
    }

    /// ↩️ Put an entire snapshot back in front of whatever arrived since, retry counters untouched.
    ///
    /// Afterwards the buffer reads exactly as it did before the snapshot, followed by
    /// the entries added while the snapshot was away.
    pub(crate) fn merge_back(&self, snapshot: &BufferSnapshot) -> std::io::Result<()> {
        if snapshot.is_empty() {
            return Ok(());
        }
        let raw = snapshot.raw_ndjson()?;
        let mut restored = BufferState::new(self.level);
        for (entry, attempts) in split_entries(&raw)
            .into_iter()
            .zip(snapshot.attempts.iter().copied())
        {
            restored.append(entry, attempts)?;
        }

        let mut state = self.lock();
        let arrived = std::mem::replace(&mut *state, restored);
        if arrived.attempts.is_empty() {
            return Ok(());
        }
        // 🔁 the newcomers go to the back of the line, still under the same lock
        let compressed = matches!(arrived.stream, Stream::Gzip(_));
        let arrived_payload = arrived.stream.finish()?;
        let arrived_raw = gunzip(&arrived_payload, compressed)?;
        for (entry, attempts) in split_entries(&arrived_raw)
            .into_iter()
            .zip(arrived.attempts.iter().copied())
        {
            state.append(entry, attempts)?;
        }
        trace!(
            restored = snapshot.items(),
            arrived = arrived.attempts.len(),
            "↩️ snapshot restored ahead of newer entries"
        );
        Ok(())
    }
}
