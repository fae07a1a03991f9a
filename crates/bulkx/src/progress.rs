//! 📊 progress.rs — "Are we there yet?" — every ingest, every time, forever.
//!
//! 🚀 Two things live here: a live progress bar while the input file is read
//! and flushed, and the end-of-run summary table. Both are for humans. The
//! indexer itself never touches this module.
//!
//! ⚠️  Warning: Watching this progress bar will not make it go faster.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

use crate::indexer::IndexerStats;

// -- 📏 one mebibyte — not a megabyte, pedants.
const MIB: u64 = 1024 * 1024;

/// 📦 Bytes, scaled to something a human can read without counting digits.
pub(crate) fn format_bytes(bytes: u64) -> String {
    if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= 1024 {
        format!("{:.2} KiB", bytes as f64 / 1024.0)
    } else {
        // -- 🐛 raw bytes mode. small payloads need love too.
        format!("{} bytes", bytes)
    }
}

/// 🔢 "1000000 docs" → "1,000,000 docs" — you're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS if you should probably call your mom.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📊 Live ingest progress: input bytes consumed, plus the indexer's running totals.
pub(crate) struct IngestProgress {
    /// 🏷️ what are we even ingesting? shown above the bar
    source_name: String,
    progress_bar: ProgressBar,
    start_time: Instant,
}

impl std::fmt::Debug for IngestProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("IngestProgress")
            .field("source_name", &self.source_name)
            .finish_non_exhaustive()
    }
}

impl IngestProgress {
    /// 🚀 `total_bytes` is the input size. 0 means "no idea", the bar just spins.
    pub(crate) fn new(source_name: String, total_bytes: u64) -> Self {
        let progress_bar = ProgressBar::new(total_bytes);
        let style = ProgressStyle::default_bar()
            .template("{msg}\n| [{bar:40.cyan/blue}] {bytes}/{total_bytes}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        progress_bar.set_style(style);
        Self {
            source_name,
            progress_bar,
            start_time: Instant::now(),
        }
    }

    /// 🔄 Move the bar to `bytes_read` and redraw the counters.
    pub(crate) fn update(&self, bytes_read: u64, stats: &IndexerStats, buffered: usize) {
        self.progress_bar.set_position(bytes_read);
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let docs_per_sec = if elapsed > 0.0 {
            stats.indexed as f64 / elapsed
        } else {
            0.0
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} Docs/s", format_number(docs_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} indexed", format_number(stats.indexed)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} buffered", format_number(buffered as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!(
                "{} retried / {} failed",
                format_number(stats.retried),
                format_number(stats.failed)
            ))
            .set_alignment(CellAlignment::Right),
        ]);
        self.progress_bar
            .set_message(format!("source: {}\n{}", self.source_name, table));
    }

    /// ✅ Done. Ring the bell.
    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// 🍽️ The end-of-run summary, one metric per row.
pub(crate) fn summary_table(stats: &IndexerStats, elapsed: Duration) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["metric", "value"]);
    let rows = [
        ("added", format_number(stats.added)),
        ("indexed", format_number(stats.indexed)),
        ("retried", format_number(stats.retried)),
        ("failed", format_number(stats.failed)),
        ("flushes", format_number(stats.flushes)),
        ("failed flushes", format_number(stats.failed_flushes)),
        ("bytes sent", format_bytes(stats.bytes_flushed)),
        ("bytes sent (raw)", format_bytes(stats.bytes_uncompressed_flushed)),
        ("elapsed", format_duration(elapsed)),
    ];
    for (metric, value) in rows {
        table.add_row(vec![
            Cell::new(metric),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}
