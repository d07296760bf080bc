//! Loot core CLI.
//!
//! ```text
//! loot-core <content.ron|json> <table-id> [seed] [level]
//! loot-core --audit <content.ron|json> <table-id>
//! ```
//!
//! Content is validated on load and issues are printed to stderr.
//! `LOOT_CORE_CONFIG` (or `--config`) may point at a `.ron`/`.json` engine config.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use loot_core::audit::run_drop_audit;
use loot_core::config::LootEngineConfig;
use loot_core::constants::DEFAULT_LOOT_LEVEL;
use loot_core::logging::init_tracing;
use loot_core::loot::{roll_loot, LootRequest};
use loot_core::registry::validate::validate_content;
use loot_core::registry::{ContentRegistry, PrototypeId, PrototypeRegistry};

#[derive(Parser, Debug)]
#[command(author, version, about = "Roll or audit a loot table", long_about = None)]
struct Args {
    /// Content database (`.ron` or `.json`)
    content: PathBuf,

    /// Loot table prototype id
    table_id: u64,

    /// Roll seed, defaults to the config's base seed
    seed: Option<u64>,

    /// Requested loot level
    #[arg(default_value_t = DEFAULT_LOOT_LEVEL, allow_negative_numbers = true)]
    level: i32,

    /// Run the Monte-Carlo drop audit instead of a single roll
    #[arg(long)]
    audit: bool,

    /// Engine config file
    #[arg(long, env = "LOOT_CORE_CONFIG")]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<LootEngineConfig> {
    match path {
        Some(path) => LootEngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(LootEngineConfig::default()),
    }
}

fn load_content(path: &Path) -> Result<ContentRegistry> {
    let registry = ContentRegistry::load(path)
        .with_context(|| format!("loading content {}", path.display()))?;
    let report = validate_content(&registry);
    if !report.is_clean() {
        eprintln!("{} content issue(s):", report.issues.len());
        for issue in &report.issues {
            eprintln!("  {issue}");
        }
    }
    Ok(registry)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    init_tracing(&config.tracing);

    let registry = load_content(&args.content)?;
    let table = registry
        .loot_table(PrototypeId(args.table_id))
        .with_context(|| format!("no loot table {}", args.table_id))?;

    if args.audit {
        let report = run_drop_audit(&registry, table, &config);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let request = LootRequest::new(&registry, args.seed.unwrap_or(config.base_seed))
        .with_config(&config)
        .with_level(args.level);
    let results = roll_loot(table, request);
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
