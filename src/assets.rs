//! Asset-upload side channel: pushes record assets to an external blob
//! store and collects the resulting `source_id -> url` mapping.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{info, warn};

use crate::enrich::AssetUrlMap;
use crate::record::{safe_str, RawRecord};

const EXAMPLE_FAILURES: usize = 5;

/// Accounting for one asset-upload run.
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    /// Records inspected.
    pub total: usize,
    /// Assets uploaded and mapped.
    pub uploaded: usize,
    /// Records with no asset reference (not failures).
    pub skipped: usize,
    /// Per-item failures; the run always continues past them.
    pub failed: usize,
    /// First few failures, as `(source_id, reason)`.
    pub example_failures: Vec<(String, String)>,
}

impl UploadReport {
    /// Fraction of attempted uploads that succeeded, in `[0, 1]`.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.uploaded + self.failed;
        if attempted == 0 {
            return 1.0;
        }
        self.uploaded as f64 / attempted as f64
    }
}

/// Blocking client for the binary-asset storage service: blob plus
/// path-like identifier in, durable public URL out.
///
/// Asset bytes are read one record at a time and dropped after the upload;
/// the side channel never holds binary payloads in bulk.
#[derive(Clone)]
pub struct AssetUploader {
    client: Client,
    endpoint: String,
    folder: String,
    asset_root: PathBuf,
    max_retries: usize,
}

impl AssetUploader {
    /// Builds an uploader.
    ///
    /// `endpoint` is the blob store's upload URL, `folder` prefixes every
    /// public id (`{folder}/{source_id}`), and `asset_root` resolves the
    /// relative asset paths referenced by raw records.
    pub fn new(
        api_key: String,
        endpoint: String,
        folder: String,
        asset_root: PathBuf,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        anyhow::ensure!(
            endpoint.starts_with("http://") || endpoint.starts_with("https://"),
            "asset store endpoint must be an http(s) URL"
        );
        anyhow::ensure!(!folder.trim().is_empty(), "asset folder is required");
        let mut headers = reqwest::header::HeaderMap::new();
        if !api_key.trim().is_empty() {
            headers.insert(
                "api-key",
                HeaderValue::from_str(api_key.trim()).context("invalid asset store API key")?,
            );
        }
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build asset store HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            folder: folder.trim().to_string(),
            asset_root,
            max_retries: max_retries.max(1),
        })
    }

    /// Uploads every referenced asset and returns the URL mapping keyed by
    /// `source_id`. Per-item failures are reported, never fatal.
    pub fn upload_all(&self, raws: &[RawRecord]) -> (AssetUrlMap, UploadReport) {
        let mut map = AssetUrlMap::new();
        let mut report = UploadReport::default();
        for (position, raw) in raws.iter().enumerate() {
            report.total += 1;
            let id = safe_str(raw.get("id"));
            let source_id = if id.is_empty() {
                position.to_string()
            } else {
                id
            };
            let reference = safe_str(raw.get("image"));
            if reference.is_empty() {
                report.skipped += 1;
                continue;
            }
            match self.upload_one(&source_id, &reference) {
                Ok(url) => {
                    map.insert(source_id, url);
                    report.uploaded += 1;
                }
                Err(err) => {
                    warn!(source_id = %source_id, error = %err, "asset upload failed");
                    report.failed += 1;
                    if report.example_failures.len() < EXAMPLE_FAILURES {
                        report.example_failures.push((source_id, err.to_string()));
                    }
                }
            }
        }
        info!(
            uploaded = report.uploaded,
            skipped = report.skipped,
            failed = report.failed,
            success_rate = report.success_rate(),
            "asset upload run complete"
        );
        (map, report)
    }

    fn upload_one(&self, source_id: &str, reference: &str) -> Result<String> {
        let path = self.asset_root.join(reference);
        let bytes = std::fs::read(&path)
            .with_context(|| format!("failed to read asset {}", path.display()))?;
        let public_id = format!("{}/{}", self.folder, source_id);

        let mut attempt = 0usize;
        loop {
            let response = self
                .client
                .post(&self.endpoint)
                .query(&[("public_id", public_id.as_str())])
                .body(bytes.clone())
                .send();
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: UploadResponse =
                            resp.json().context("malformed asset store response")?;
                        return Ok(parsed.secure_url);
                    }
                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(anyhow!("asset upload failed ({status}): {body}"));
                }
                Err(err) => {
                    if (err.is_timeout() || err.is_connect() || err.is_request())
                        && attempt + 1 < self.max_retries
                    {
                        attempt += 1;
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }

    /// Root directory asset references resolve against.
    pub fn asset_root(&self) -> &Path {
        &self.asset_root
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
}
