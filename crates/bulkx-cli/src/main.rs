//! 🚀 bulkx-cli — the front door, the bouncer, the maitre d' of bulkx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary crate is the thin CLI wrapper that loads config,
//! sets up logging, and then lets the library do the heavy lifting.
//! Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 📦 Bulk-index an NDJSON file into Elasticsearch.
#[derive(Debug, Parser)]
#[command(name = "bulkx", version, about)]
struct Args {
    /// 🔧 TOML config. Missing file is fine; env vars (BULKX_*) still apply.
    #[arg(short, long, default_value = "bulkx.toml")]
    config: PathBuf,
    /// 📁 Overrides runtime.input_file.
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// 📡 Overrides runtime.index.
    #[arg(long)]
    index: Option<String>,
    /// 🧪 Index into memory instead of the configured cluster.
    #[arg(long)]
    dry_run: bool,
}

/// 🚀 main() — where it all begins. The genesis. The big bang.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args
/// 3. Load config (the moment of truth)
/// 4. Run the thing (send it and pray 🙏)
/// 5. Handle errors (cry)
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 println! debugging is a lifestyle choice we're trying to move past, like flip phones and cargo shorts
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // 🔒 Validate the config file exists before we get too emotionally attached
    let config_file = match args.config.try_exists().context(format!(
        "💀 Couldn't check whether the configuration file exists. If it's a relative path, \
         pwd/cwd might be the culprit; an absolute path removes all doubt. Was checking here: '{}'",
        args.config.display()
    ))? {
        true => Some(args.config.as_path()), // ✅ Found it! Better than finding my car keys
        false => None,                       // 💤 Not there. Env vars, you're up.
    };

    // 🔧 Load the config — this is where we find out if someone put a tab where a space should be
    let mut app_config = bulkx::app_config::load_config(config_file).context(
        "💀 In bulkx-cli, main, we couldn't load the config. Take a look at the file and the BULKX_* \
         env vars, and make sure you didn't forget something obvious, like the [client] section",
    )?;

    if let Some(input) = args.input {
        app_config.runtime.input_file = Some(input);
    }
    if let Some(index) = args.index {
        app_config.runtime.index = index;
    }
    app_config.runtime.dry_run |= args.dry_run;

    // 🚀 SEND IT. No take-backs.
    let result = bulkx::run(app_config).await;

    if let Err(err) = result {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one tear-jerking layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        // -- 📡 full bars on the wifi icon, nothing loads
        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: Elasticsearch doesn't look reachable. Check client.Elasticsearch.url, \
                 and that the cluster is actually running (`docker ps`, `docker compose up -d`). \
                 Or pass --dry-run to see what would have been sent. ☕"
            );
        }

        // 🗑️ Exit with prejudice. Process exitus maximus.
        std::process::exit(1);
    }

    // ✅ Pop the champagne. 🍾
    Ok(())
}
