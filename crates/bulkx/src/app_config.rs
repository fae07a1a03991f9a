//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.

use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::ClientConfig;
use crate::indexer::BulkIndexerConfig;

/// 📦 The AppConfig: one struct to rule them all.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 📡 Where the bulk requests go.
    pub client: ClientConfig,
    /// 🔄 Retry budget, retryable statuses, compression, redaction.
    #[serde(default)]
    pub indexer: BulkIndexerConfig,
    /// 🚀 How the batch driver reads input and paces flushes.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// 🚀 Knobs for `crate::run`, the file-to-cluster driver.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// 📁 NDJSON input, one document per line. Required by `run`.
    #[serde(default)]
    pub input_file: Option<PathBuf>,
    /// 📡 Target index for every document read.
    #[serde(default = "default_index")]
    pub index: String,
    /// 🧪 Swap the configured client for an in-memory one. Nothing leaves the process.
    #[serde(default)]
    pub dry_run: bool,
    /// 🔢 Flush once this many entries are buffered.
    #[serde(default = "default_flush_max_docs")]
    pub flush_max_docs: usize,
    /// 📏 Flush once this many raw bytes are buffered.
    #[serde(default = "default_flush_max_bytes")]
    pub flush_max_bytes: usize,
    /// 🔄 Flushes allowed at the end to drain retries before giving up.
    #[serde(default = "default_max_flush_rounds")]
    pub max_flush_rounds: usize,
}

fn default_index() -> String {
    "bulkx".to_string()
}

// 📦 1,000 docs: a nice round number that will age like milk the moment someone indexes a 50MB PDF
fn default_flush_max_docs() -> usize {
    1_000
}

// 📦 5MB: the bulk API docs say "a few MB" and we took them at their word
fn default_flush_max_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_max_flush_rounds() -> usize {
    10
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            input_file: None,
            index: default_index(),
            dry_run: false,
            flush_max_docs: default_flush_max_docs(),
            flush_max_bytes: default_flush_max_bytes(),
            max_flush_rounds: default_max_flush_rounds(),
        }
    }
}

/// 🚀 Load the config — from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (`BULKX_*`, nested keys split on `__`, so
/// `BULKX_RUNTIME__INDEX=logs` sets `runtime.index`) with an optional TOML file.
/// TOML wins on conflicts.
///
/// 💀 Returns an error if config is unparseable. The message says which source was involved.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("BULKX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (BULKX_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (BULKX_*). \
                 No file was provided — this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
