//! Batched text embedding with order- and count-preserving semantics.

pub mod remote;

use std::fmt;

use tracing::debug;

use crate::record::Record;

/// Interface every embedding backend implements.
///
/// A backend receives one contiguous batch and must return exactly one
/// vector per input, in input order. Backends never skip items: a malformed
/// input fails the whole batch deterministically so record-to-vector
/// alignment can never desynchronize.
pub trait TextEncoder {
    /// Embeds one batch of texts, preserving order and count.
    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Fixed output dimension, constant for the index lifetime.
    fn dimension(&self) -> usize;
}

/// Failures surfaced by embedding backends and the batch driver.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedError {
    /// The backend returned a different number of vectors than inputs.
    CountMismatch {
        /// Number of inputs submitted.
        expected: usize,
        /// Number of vectors returned.
        returned: usize,
    },
    /// A returned vector's length differs from the configured dimension.
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Observed vector length.
        observed: usize,
        /// Index of the offending vector within the batch.
        batch_index: usize,
    },
    /// Transport or service failure after bounded retries.
    Backend(String),
}

impl fmt::Display for EmbedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CountMismatch { expected, returned } => {
                write!(f, "backend returned {returned} vectors for {expected} inputs")
            }
            Self::DimensionMismatch {
                expected,
                observed,
                batch_index,
            } => write!(
                f,
                "vector {batch_index} has dimension {observed}, expected {expected}"
            ),
            Self::Backend(msg) => write!(f, "embedding backend failure: {msg}"),
        }
    }
}

impl std::error::Error for EmbedError {}

/// Drives an encoder over a sequence of texts in contiguous batches.
#[derive(Debug, Clone)]
pub struct Embedder<E> {
    encoder: E,
    batch_size: usize,
}

impl<E: TextEncoder> Embedder<E> {
    /// Builds a batch driver. `batch_size` is clamped to at least 1.
    pub fn new(encoder: E, batch_size: usize) -> Self {
        Self {
            encoder,
            batch_size: batch_size.max(1),
        }
    }

    /// Configured output dimension.
    pub fn dimension(&self) -> usize {
        self.encoder.dimension()
    }

    /// Embeds every text, in input order, in batches of at most the
    /// configured size. The final partial batch is embedded like any other.
    /// Returns exactly one vector per input or the first batch's error.
    pub fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            let embedded = self.encoder.encode_batch(batch)?;
            if embedded.len() != batch.len() {
                return Err(EmbedError::CountMismatch {
                    expected: batch.len(),
                    returned: embedded.len(),
                });
            }
            let expected = self.encoder.dimension();
            for (i, vector) in embedded.iter().enumerate() {
                if vector.len() != expected {
                    return Err(EmbedError::DimensionMismatch {
                        expected,
                        observed: vector.len(),
                        batch_index: i,
                    });
                }
            }
            debug!(batch = batch_no, size = batch.len(), "embedded batch");
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    /// Fills `embedding` for every record, composing `combined_text` first
    /// where missing. Record order is preserved throughout.
    pub fn embed_records(&self, records: &mut [Record]) -> Result<(), EmbedError> {
        crate::composer::compose_all(records);
        let texts: Vec<&str> = records
            .iter()
            .map(|r| r.combined_text.as_deref().unwrap_or(""))
            .collect();
        let vectors = self.embed_texts(&texts)?;
        for (record, vector) in records.iter_mut().zip(vectors) {
            record.embedding = Some(vector);
        }
        Ok(())
    }
}
