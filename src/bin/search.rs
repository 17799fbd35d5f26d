use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use semdex::{AppConfig, ComputeDevice, DistanceMetric, QdrantIndex, QueryEngine, RemoteEncoder};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "semdex-search",
    about = "Embed a free-text query and print ranked nearest records"
)]
struct SearchCli {
    /// Query text (ignored with --stats)
    #[arg(default_value = "")]
    query: String,

    /// Number of results to return
    #[arg(long, env = "SEMDEX_TOP_K", default_value_t = 3)]
    top_k: usize,

    /// Print collection statistics instead of searching
    #[arg(long, default_value_t = false)]
    stats: bool,

    /// Vector index service base URL
    #[arg(long, env = "SEMDEX_INDEX_URL")]
    index_url: String,

    /// Vector index API key
    #[arg(long, env = "SEMDEX_INDEX_API_KEY", default_value = "")]
    index_api_key: String,

    /// Collection name
    #[arg(long, env = "SEMDEX_COLLECTION", default_value = "attractions")]
    collection: String,

    /// Embedding service base URL
    #[arg(long, env = "SEMDEX_EMBED_URL")]
    embed_url: String,

    /// Embedding service API key
    #[arg(long, env = "SEMDEX_EMBED_API_KEY", default_value = "")]
    embed_api_key: String,

    /// Embedding model identifier; must match the one used at ingest
    #[arg(
        long,
        env = "SEMDEX_EMBED_MODEL",
        default_value = "paraphrase-multilingual-MiniLM-L12-v2"
    )]
    embed_model: String,

    /// Embedding dimension; must match the collection's vector size
    #[arg(long, env = "SEMDEX_VECTOR_SIZE", default_value_t = 384)]
    vector_size: usize,

    /// Preferred compute device (accelerated or default)
    #[arg(long, env = "SEMDEX_DEVICE", default_value = "accelerated")]
    device: ComputeDevice,

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
    let cli = SearchCli::parse();
    let config = AppConfig {
        index_url: cli.index_url.clone(),
        index_api_key: cli.index_api_key.clone(),
        collection_name: cli.collection.clone(),
        embed_url: cli.embed_url.clone(),
        embed_api_key: cli.embed_api_key.clone(),
        embed_model: cli.embed_model.clone(),
        vector_size: cli.vector_size,
        device: cli.device,
        distance: DistanceMetric::Cosine,
        embed_batch_size: 1,
        upsert_batch_size: 1,
        request_timeout: Duration::from_secs(cli.timeout_secs),
        max_retries: cli.max_retries,
    };
    config.validate()?;

    let index = QdrantIndex::connect(&config)?;
    if cli.stats {
        return print_stats(&index, &config.collection_name);
    }
    anyhow::ensure!(!cli.query.trim().is_empty(), "query text is required");
    let encoder = RemoteEncoder::connect(&config)?;
    let engine = QueryEngine::new(encoder, index, config.collection_name.clone())?;

    let hits = engine.search(&cli.query, cli.top_k)?;
    if hits.is_empty() {
        println!("no matches");
        return Ok(());
    }
    for (rank, hit) in hits.iter().enumerate() {
        let p = &hit.payload;
        println!("{}. {} (score {:.4})", rank + 1, p.name, hit.score);
        println!("   category: {}  location: {}  language: {}", p.category, p.location, p.language);
        match &p.asset_url {
            Some(url) => println!("   asset: {url}"),
            None => println!("   asset: none"),
        }
        if !p.description.is_empty() {
            let preview: String = p.description.chars().take(150).collect();
            println!("   {preview}");
        }
    }
    Ok(())
}

fn print_stats(index: &QdrantIndex, collection: &str) -> Result<()> {
    use semdex::VectorIndex;
    use std::collections::BTreeMap;

    let points = index.scroll_all(collection)?;
    let mut categories: BTreeMap<String, usize> = BTreeMap::new();
    let mut languages: BTreeMap<String, usize> = BTreeMap::new();
    let mut with_assets = 0usize;
    for (_, payload) in &points {
        *categories.entry(payload.category.clone()).or_insert(0) += 1;
        *languages.entry(payload.language.clone()).or_insert(0) += 1;
        if payload.asset_url.is_some() {
            with_assets += 1;
        }
    }
    println!("total records: {}", points.len());
    println!("categories:");
    for (category, count) in &categories {
        println!("  {category}: {count}");
    }
    println!("languages:");
    for (language, count) in &languages {
        println!("  {language}: {count}");
    }
    println!("with asset url: {with_assets}");
    println!("without asset url: {}", points.len() - with_assets);
    Ok(())
}
