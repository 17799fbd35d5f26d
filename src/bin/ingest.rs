use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use semdex::{
    AppConfig, CollectionSpec, ComputeDevice, DistanceMetric, Embedder, IndexManager,
    IngestPipeline, QdrantIndex, RemoteEncoder,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "semdex-ingest",
    about = "Normalize, embed, and upsert a record dataset into the vector index"
)]
struct IngestCli {
    /// Path to the JSONL dataset of raw records
    #[arg(long, env = "SEMDEX_DATASET", default_value = "records.jsonl")]
    dataset: PathBuf,

    /// Only process the first N records (stable file order)
    #[arg(long, env = "SEMDEX_SAMPLE_SIZE")]
    sample_size: Option<usize>,

    /// Delete and recreate the collection before upserting (destructive)
    #[arg(long, default_value_t = false)]
    recreate: bool,

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

    /// Embedding model identifier
    #[arg(
        long,
        env = "SEMDEX_EMBED_MODEL",
        default_value = "paraphrase-multilingual-MiniLM-L12-v2"
    )]
    embed_model: String,

    /// Fixed embedding dimension for the collection lifetime
    #[arg(long, env = "SEMDEX_VECTOR_SIZE", default_value_t = 384)]
    vector_size: usize,

    /// Preferred compute device (accelerated or default)
    #[arg(long, env = "SEMDEX_DEVICE", default_value = "accelerated")]
    device: ComputeDevice,

    /// Distance metric for collection creation (cosine, dot, euclid)
    #[arg(long, env = "SEMDEX_DISTANCE", default_value = "cosine")]
    distance: DistanceMetric,

    /// Records per embedding request
    #[arg(long, env = "SEMDEX_EMBED_BATCH", default_value_t = 32)]
    embed_batch_size: usize,

    /// Points per upsert request
    #[arg(long, env = "SEMDEX_UPSERT_BATCH", default_value_t = 100)]
    upsert_batch_size: usize,

    /// Max seconds to wait for each external call
    #[arg(long, env = "SEMDEX_TIMEOUT_SECS", default_value_t = 60)]
    timeout_secs: u64,

    /// Retries for rate limits and transient errors
    #[arg(long, env = "SEMDEX_MAX_RETRIES", default_value_t = 5)]
    max_retries: usize,
}

impl IngestCli {
    fn app_config(&self) -> AppConfig {
        AppConfig {
            index_url: self.index_url.clone(),
            index_api_key: self.index_api_key.clone(),
            collection_name: self.collection.clone(),
            embed_url: self.embed_url.clone(),
            embed_api_key: self.embed_api_key.clone(),
            embed_model: self.embed_model.clone(),
            vector_size: self.vector_size,
            device: self.device,
            distance: self.distance,
            embed_batch_size: self.embed_batch_size,
            upsert_batch_size: self.upsert_batch_size,
            request_timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = IngestCli::parse();
    let config = cli.app_config();
    config.validate()?;

    let raws = semdex::read_dataset(&cli.dataset, cli.sample_size)?;
    println!("loaded {} raw records from {}", raws.len(), cli.dataset.display());

    let encoder = RemoteEncoder::connect(&config)?;
    let index = QdrantIndex::connect(&config)?;
    let pipeline = IngestPipeline::new(
        Embedder::new(encoder, config.embed_batch_size),
        IndexManager::new(index, config.collection_name.clone(), config.upsert_batch_size),
    );

    let spec = CollectionSpec {
        name: config.collection_name.clone(),
        vector_size: config.vector_size,
        distance: config.distance,
    };
    let report = pipeline.run(&raws, &spec, cli.recreate)?;

    println!("ingest complete");
    println!("  records in:      {}", report.records_in);
    println!("  points prepared: {}", report.points_prepared);
    println!("  points written:  {}", report.upsert.points_written);
    println!("  batches:         {}", report.upsert.batches_attempted);
    for failed in &report.upsert.failed_batches {
        println!(
            "  failed batch {} (points {}..{}): {}",
            failed.batch,
            failed.start,
            failed.start + failed.len,
            failed.error
        );
    }
    if let Some(mismatch) = report.upsert.count_mismatch {
        println!(
            "  count mismatch: expected {}, stored {}",
            mismatch.expected, mismatch.stored
        );
    }
    if !report.upsert.is_clean() {
        anyhow::bail!("ingest finished with reported inconsistencies");
    }
    Ok(())
}
