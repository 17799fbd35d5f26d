use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use semdex::{AssetUrlMap, QdrantIndex, Reconciler};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "semdex-enrich",
    about = "Merge an asset URL mapping into existing index payloads"
)]
struct EnrichCli {
    /// Path to the source_id -> url JSON mapping artifact
    #[arg(long, env = "SEMDEX_URL_MAP", default_value = "asset_urls.json")]
    url_map: PathBuf,

    /// Vector index service base URL
    #[arg(long, env = "SEMDEX_INDEX_URL")]
    index_url: String,

    /// Vector index API key
    #[arg(long, env = "SEMDEX_INDEX_API_KEY", default_value = "")]
    index_api_key: String,

    /// Collection name
    #[arg(long, env = "SEMDEX_COLLECTION", default_value = "attractions")]
    collection: String,

    /// Max seconds to wait for each external call
    #[arg(long, env = "SEMDEX_TIMEOUT_SECS", default_value_t = 60)]
    timeout_secs: u64,

    /// Retries for rate limits and transient errors
    #[arg(long, env = "SEMDEX_MAX_RETRIES", default_value_t = 5)]
    max_retries: usize,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = EnrichCli::parse();

    let map = AssetUrlMap::load(&cli.url_map)?;
    println!(
        "loaded {} url mappings from {}",
        map.len(),
        cli.url_map.display()
    );

    let index = QdrantIndex::new(
        &cli.index_url,
        &cli.index_api_key,
        Duration::from_secs(cli.timeout_secs),
        cli.max_retries,
    )?;
    let reconciler = Reconciler::new(index, cli.collection.clone());
    let report = reconciler.apply(&map);

    println!("enrichment complete");
    println!("  updated: {}", report.updated);
    println!("  missing: {}", report.missing);
    println!("  failed:  {}", report.failed);
    println!("  success rate: {:.1}%", report.success_rate() * 100.0);
    for (source_id, reason) in &report.example_failures {
        println!("  example failure {source_id}: {reason}");
    }
    Ok(())
}
