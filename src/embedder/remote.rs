//! Blocking HTTP client for a remote embedding service.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{AppConfig, ComputeDevice, ConfigError};
use crate::embedder::{EmbedError, TextEncoder};

/// Blocking embeddings client that talks to an OpenAI-compatible inference
/// endpoint. Device availability is probed once at construction; if the
/// accelerated mode is unavailable the encoder drops to the service default
/// and stays there for the process lifetime.
#[derive(Clone)]
pub struct RemoteEncoder {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
    device: ComputeDevice,
    max_retries: usize,
}

impl RemoteEncoder {
    /// Builds the client and probes the service with a single-item request.
    ///
    /// The probe verifies the advertised dimension against the configured
    /// one (mismatch is a fatal configuration error) and settles the compute
    /// device: a failed accelerated probe falls back to the default mode
    /// rather than failing outright.
    pub fn connect(config: &AppConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if !config.embed_api_key.trim().is_empty() {
            headers.insert(
                "api-key",
                HeaderValue::from_str(config.embed_api_key.trim())
                    .context("invalid embedding API key")?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .context("failed to build embedding HTTP client")?;

        let mut encoder = Self {
            client,
            endpoint: format!("{}/embeddings", config.embed_url.trim_end_matches('/')),
            model: config.embed_model.clone(),
            dimension: config.vector_size,
            device: config.device,
            max_retries: config.max_retries.max(1),
        };

        let probe = match encoder.request_batch(&["probe"]) {
            Ok(vectors) => vectors,
            Err(err) if encoder.device == ComputeDevice::Accelerated => {
                warn!(error = %err, "accelerated probe failed, falling back to default compute mode");
                encoder.device = ComputeDevice::Default;
                encoder
                    .request_batch(&["probe"])
                    .map_err(|e| anyhow::anyhow!(e))
                    .context("embedding service unavailable in default compute mode")?
            }
            Err(err) => {
                return Err(anyhow::anyhow!(err).context("embedding service probe failed"))
            }
        };
        let observed = probe.first().map(Vec::len).unwrap_or(0);
        if observed != encoder.dimension {
            return Err(ConfigError::DimensionMismatch {
                configured: encoder.dimension,
                observed,
            }
            .into());
        }
        info!(
            model = %encoder.model,
            device = encoder.device.as_str(),
            dimension = encoder.dimension,
            "embedding service ready"
        );
        Ok(encoder)
    }

    /// Compute device settled by the startup probe.
    pub fn device(&self) -> ComputeDevice {
        self.device
    }

    fn request_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: inputs,
                device: self.device.as_str(),
            };
            let response = self.client.post(&self.endpoint).json(&request).send();
            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let mut parsed: EmbeddingResponse = resp.json().map_err(|err| {
                            EmbedError::Backend(format!("malformed response: {err}"))
                        })?;
                        parsed.data.sort_by_key(|entry| entry.index);
                        if parsed.data.len() != inputs.len() {
                            return Err(EmbedError::CountMismatch {
                                expected: inputs.len(),
                                returned: parsed.data.len(),
                            });
                        }
                        return Ok(parsed
                            .data
                            .into_iter()
                            .map(|entry| entry.embedding)
                            .collect());
                    }
                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(EmbedError::Backend(format!(
                        "embedding request failed ({status}): {body}"
                    )));
                }
                Err(err) => {
                    if is_retryable(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(EmbedError::Backend(err.to_string()));
                }
            }
        }
    }
}

impl TextEncoder for RemoteEncoder {
    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_batch(texts)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    device: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
