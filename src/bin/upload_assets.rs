use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use semdex::AssetUploader;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "semdex-upload-assets",
    about = "Upload record assets to the blob store and save the URL mapping"
)]
struct UploadCli {
    /// Path to the JSONL dataset of raw records
    #[arg(long, env = "SEMDEX_DATASET", default_value = "records.jsonl")]
    dataset: PathBuf,

    /// Only process the first N records (stable file order)
    #[arg(long, env = "SEMDEX_SAMPLE_SIZE")]
    sample_size: Option<usize>,

    /// Output path for the source_id -> url mapping artifact
    #[arg(long, env = "SEMDEX_URL_MAP", default_value = "asset_urls.json")]
    url_map: PathBuf,

    /// Blob store upload endpoint
    #[arg(long, env = "SEMDEX_ASSET_URL")]
    asset_url: String,

    /// Blob store API key
    #[arg(long, env = "SEMDEX_ASSET_API_KEY", default_value = "")]
    asset_api_key: String,

    /// Folder prefix for public ids ({folder}/{source_id})
    #[arg(long, env = "SEMDEX_ASSET_FOLDER", default_value = "attractions")]
    folder: String,

    /// Directory that raw-record asset paths resolve against
    #[arg(long, env = "SEMDEX_ASSET_ROOT", default_value = ".")]
    asset_root: PathBuf,

    /// Max seconds to wait for each upload
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
    let cli = UploadCli::parse();

    let raws = semdex::read_dataset(&cli.dataset, cli.sample_size)?;
    println!(
        "loaded {} raw records from {}",
        raws.len(),
        cli.dataset.display()
    );

    let uploader = AssetUploader::new(
        cli.asset_api_key.clone(),
        cli.asset_url.clone(),
        cli.folder.clone(),
        cli.asset_root.clone(),
        Duration::from_secs(cli.timeout_secs),
        cli.max_retries,
    )?;
    let (map, report) = uploader.upload_all(&raws);
    map.save(&cli.url_map)?;

    println!("asset upload complete");
    println!("  total:    {}", report.total);
    println!("  uploaded: {}", report.uploaded);
    println!("  skipped:  {}", report.skipped);
    println!("  failed:   {}", report.failed);
    println!("  success rate: {:.1}%", report.success_rate() * 100.0);
    for (source_id, reason) in &report.example_failures {
        println!("  example failure {source_id}: {reason}");
    }
    println!("url mapping saved to {}", cli.url_map.display());
    Ok(())
}
