//! Blocking Qdrant REST client implementing the `VectorIndex` interface.

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::AppConfig;
use crate::index::{CollectionInfo, CollectionSpec, IndexPoint, RecordPayload, VectorIndex};

const SCROLL_PAGE: usize = 256;

/// Blocking HTTP client for a Qdrant-compatible vector index service.
#[derive(Clone)]
pub struct QdrantIndex {
    client: Client,
    base_url: String,
    max_retries: usize,
}

impl QdrantIndex {
    /// Builds a client for the given service endpoint.
    pub fn new(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "index endpoint must be an http(s) URL"
        );
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !api_key.trim().is_empty() {
            headers.insert(
                "api-key",
                HeaderValue::from_str(api_key.trim()).context("invalid index API key")?,
            );
        }
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build index HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries: max_retries.max(1),
        })
    }

    /// Builds the client from validated process configuration.
    pub fn connect(config: &AppConfig) -> Result<Self> {
        Self::new(
            &config.index_url,
            &config.index_api_key,
            config.request_timeout,
            config.max_retries,
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends a request, retrying transient failures with exponential
    /// backoff. `build` constructs a fresh request per attempt.
    fn send_with_retry<F>(&self, build: F) -> Result<reqwest::blocking::Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            match build().send() {
                Ok(resp) => {
                    let status = resp.status();
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if is_retryable(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(err).context("index request failed");
                }
            }
        }
    }

    fn expect_success(resp: reqwest::blocking::Response, what: &str) -> Result<Value> {
        let status = resp.status();
        if status.is_success() {
            resp.json()
                .with_context(|| format!("malformed {what} response"))
        } else {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            Err(anyhow!("{what} failed ({status}): {body}"))
        }
    }

    fn collection_exists(&self, name: &str) -> Result<bool> {
        let resp = self.send_with_retry(|| self.client.get(self.url(&format!("/collections/{name}"))))?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => {
                let body = resp
                    .text()
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                Err(anyhow!("collection lookup failed ({status}): {body}"))
            }
        }
    }

    fn create_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let body = json!({
            "vectors": {
                "size": spec.vector_size,
                "distance": spec.distance.as_str(),
            }
        });
        let resp = self.send_with_retry(|| {
            self.client
                .put(self.url(&format!("/collections/{}", spec.name)))
                .json(&body)
        })?;
        Self::expect_success(resp, "collection create")?;
        Ok(())
    }

    fn delete_collection(&self, name: &str) -> Result<()> {
        let resp =
            self.send_with_retry(|| self.client.delete(self.url(&format!("/collections/{name}"))))?;
        Self::expect_success(resp, "collection delete")?;
        Ok(())
    }

    fn scroll_page(
        &self,
        collection: &str,
        filter: Option<&Value>,
        offset: Option<&Value>,
        limit: usize,
    ) -> Result<(Vec<(u64, RecordPayload)>, Option<Value>)> {
        let mut body = json!({
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = filter.clone();
        }
        if let Some(offset) = offset {
            body["offset"] = offset.clone();
        }
        let resp = self.send_with_retry(|| {
            self.client
                .post(self.url(&format!("/collections/{collection}/points/scroll")))
                .json(&body)
        })?;
        let value = Self::expect_success(resp, "scroll")?;
        let result = &value["result"];
        let mut page = Vec::new();
        for entry in result["points"].as_array().into_iter().flatten() {
            let point_id = entry["id"]
                .as_u64()
                .ok_or_else(|| anyhow!("scroll entry missing integer id"))?;
            let payload = parse_payload(&entry["payload"])?;
            page.push((point_id, payload));
        }
        let next = match &result["next_page_offset"] {
            Value::Null => None,
            other => Some(other.clone()),
        };
        Ok((page, next))
    }
}

impl VectorIndex for QdrantIndex {
    fn ensure_collection(&self, spec: &CollectionSpec, recreate: bool) -> Result<()> {
        if self.collection_exists(&spec.name)? {
            if !recreate {
                debug!(collection = %spec.name, "collection already exists, reusing");
                return Ok(());
            }
            // Destructive path, reached only on explicit operator intent.
            self.delete_collection(&spec.name)?;
        }
        self.create_collection(spec)
    }

    fn describe(&self, collection: &str) -> Result<CollectionInfo> {
        let resp = self
            .send_with_retry(|| self.client.get(self.url(&format!("/collections/{collection}"))))?;
        let value = Self::expect_success(resp, "collection describe")?;
        let result = &value["result"];
        let vector_size = result["config"]["params"]["vectors"]["size"]
            .as_u64()
            .ok_or_else(|| anyhow!("collection describe missing vector size"))?
            as usize;
        let points_count = result["points_count"].as_u64().unwrap_or(0) as usize;
        Ok(CollectionInfo {
            vector_size,
            points_count,
        })
    }

    fn upsert(&self, collection: &str, points: &[IndexPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = json!({ "points": points });
        let resp = self.send_with_retry(|| {
            self.client
                .put(self.url(&format!("/collections/{collection}/points")))
                .query(&[("wait", "true")])
                .json(&body)
        })?;
        Self::expect_success(resp, "upsert")?;
        Ok(())
    }

    fn count(&self, collection: &str) -> Result<usize> {
        let body = json!({ "exact": true });
        let resp = self.send_with_retry(|| {
            self.client
                .post(self.url(&format!("/collections/{collection}/points/count")))
                .json(&body)
        })?;
        let value = Self::expect_success(resp, "count")?;
        value["result"]["count"]
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| anyhow!("count response missing result"))
    }

    fn retrieve(
        &self,
        collection: &str,
        point_id: u64,
    ) -> Result<Option<(Vec<f32>, RecordPayload)>> {
        let body = json!({
            "ids": [point_id],
            "with_payload": true,
            "with_vector": true,
        });
        let resp = self.send_with_retry(|| {
            self.client
                .post(self.url(&format!("/collections/{collection}/points")))
                .json(&body)
        })?;
        let value = Self::expect_success(resp, "retrieve")?;
        let Some(entry) = value["result"].as_array().and_then(|points| points.first()) else {
            return Ok(None);
        };
        let vector: Vec<f32> = serde_json::from_value(entry["vector"].clone())
            .context("retrieve entry has malformed vector")?;
        let payload = parse_payload(&entry["payload"])?;
        Ok(Some((vector, payload)))
    }

    fn find_by_source_id(
        &self,
        collection: &str,
        source_id: &str,
    ) -> Result<Vec<(u64, RecordPayload)>> {
        let filter = json!({
            "must": [{ "key": "source_id", "match": { "value": source_id } }]
        });
        // Two is enough to distinguish "exactly one" from "ambiguous".
        let (page, _) = self.scroll_page(collection, Some(&filter), None, 2)?;
        Ok(page)
    }

    fn set_asset_url(&self, collection: &str, point_id: u64, url: &str) -> Result<()> {
        let body = json!({
            "payload": { "asset_url": url },
            "points": [point_id],
        });
        let resp = self.send_with_retry(|| {
            self.client
                .post(self.url(&format!("/collections/{collection}/points/payload")))
                .query(&[("wait", "true")])
                .json(&body)
        })?;
        Self::expect_success(resp, "set payload")?;
        Ok(())
    }

    fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(f32, RecordPayload)>> {
        let body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        let resp = self.send_with_retry(|| {
            self.client
                .post(self.url(&format!("/collections/{collection}/points/search")))
                .json(&body)
        })?;
        let value = Self::expect_success(resp, "search")?;
        let mut hits = Vec::new();
        for entry in value["result"].as_array().into_iter().flatten() {
            let score = entry["score"]
                .as_f64()
                .ok_or_else(|| anyhow!("search entry missing score"))? as f32;
            let payload = parse_payload(&entry["payload"])?;
            hits.push((score, payload));
        }
        Ok(hits)
    }

    fn scroll_all(&self, collection: &str) -> Result<Vec<(u64, RecordPayload)>> {
        let mut all = Vec::new();
        let mut offset: Option<Value> = None;
        loop {
            let (page, next) =
                self.scroll_page(collection, None, offset.as_ref(), SCROLL_PAGE)?;
            if page.is_empty() {
                break;
            }
            all.extend(page);
            match next {
                Some(value) => offset = Some(value),
                None => break,
            }
        }
        Ok(all)
    }
}

fn parse_payload(value: &Value) -> Result<RecordPayload> {
    serde_json::from_value(value.clone()).context("point payload has unexpected shape")
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
