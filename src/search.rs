//! Query path: embed a free-text query and retrieve ranked records.

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::ConfigError;
use crate::embedder::TextEncoder;
use crate::index::{RecordPayload, VectorIndex};

/// One ranked search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Similarity score under the collection's declared metric.
    pub score: f32,
    /// Stored payload, reflecting whatever enrichment has been applied at
    /// query time. `asset_url = None` before enrichment is expected, not a
    /// defect.
    pub payload: RecordPayload,
}

/// Stateless consumer of the index: query text in, ranked hits out.
#[derive(Debug)]
pub struct QueryEngine<E, I> {
    encoder: E,
    index: I,
    collection: String,
}

impl<E: TextEncoder, I: VectorIndex> QueryEngine<E, I> {
    /// Builds a query engine, failing fast when the encoder's dimension
    /// disagrees with the collection's fixed vector size. A mismatched
    /// configuration must never produce a garbled numeric result.
    pub fn new(encoder: E, index: I, collection: impl Into<String>) -> Result<Self> {
        let collection = collection.into();
        let info = index
            .describe(&collection)
            .context("failed to describe collection")?;
        if info.vector_size != encoder.dimension() {
            return Err(ConfigError::DimensionMismatch {
                configured: encoder.dimension(),
                observed: info.vector_size,
            }
            .into());
        }
        Ok(Self {
            encoder,
            index,
            collection,
        })
    }

    /// Embeds the query with the same configuration as ingest and returns
    /// up to `top_k` hits ordered by descending score (fewer only when the
    /// index holds fewer points). Equal scores keep the backend's stable
    /// insertion order.
    pub fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let vectors = self
            .encoder
            .encode_batch(&[query_text])
            .context("failed to embed query")?;
        let vector = vectors
            .into_iter()
            .next()
            .context("encoder returned no vector for query")?;
        debug!(dimension = vector.len(), top_k, "running k-NN search");
        let results = self.index.search(&self.collection, &vector, top_k)?;
        Ok(results
            .into_iter()
            .map(|(score, payload)| SearchHit { score, payload })
            .collect())
    }
}
