//! Vector index types, the storage interface, and the bulk-upsert driver.

pub mod qdrant;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DistanceMetric;
use crate::record::Record;

/// Metadata payload stored alongside each vector: every scalar/sequence
/// field of the record except the vector itself. Carrying `source_id` here
/// is what keeps the `point_id -> source_id` mapping externally
/// reconstructible for the enrichment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPayload {
    /// Stable source identifier, the enrichment join key.
    pub source_id: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Location text.
    pub location: String,
    /// Category label.
    pub category: String,
    /// Uppercase language code.
    pub language: String,
    /// Ordered tag list.
    pub tags: Vec<String>,
    /// Photo file name metadata.
    pub photo_name: String,
    /// Photo author metadata.
    pub photo_author: String,
    /// License metadata.
    pub license: String,
    /// Whether the source carried binary asset data.
    pub has_asset: bool,
    /// Public asset URL once enrichment has run.
    pub asset_url: Option<String>,
    /// Text that was embedded for this point.
    pub combined_text: String,
}

impl RecordPayload {
    /// Builds the payload snapshot of a composed record.
    pub fn from_record(record: &Record) -> Self {
        Self {
            source_id: record.source_id.clone(),
            name: record.name.clone(),
            description: record.description.clone(),
            location: record.location.clone(),
            category: record.category.clone(),
            language: record.language.clone(),
            tags: record.tags.clone(),
            photo_name: record.photo_name.clone(),
            photo_author: record.photo_author.clone(),
            license: record.license.clone(),
            has_asset: record.has_asset,
            asset_url: record.asset_url.clone(),
            combined_text: record.combined_text.clone().unwrap_or_default(),
        }
    }
}

/// The unit stored in the vector index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexPoint {
    /// Index-assigned integer identifier, positional within an ingestion run.
    #[serde(rename = "id")]
    pub point_id: u64,
    /// Fixed-length embedding vector.
    pub vector: Vec<f32>,
    /// Metadata payload.
    pub payload: RecordPayload,
}

impl IndexPoint {
    /// Builds a point from an embedded record. Returns `None` when the
    /// record has not passed the embedder yet.
    pub fn from_record(point_id: u64, record: &Record) -> Option<Self> {
        let vector = record.embedding.clone()?;
        Some(Self {
            point_id,
            vector,
            payload: RecordPayload::from_record(record),
        })
    }
}

/// Fixed parameters a collection is created with.
#[derive(Debug, Clone)]
pub struct CollectionSpec {
    /// Collection name.
    pub name: String,
    /// Vector dimension, constant for the collection lifetime.
    pub vector_size: usize,
    /// Declared distance metric.
    pub distance: DistanceMetric,
}

/// Live collection description as reported by the backend.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    /// Configured vector dimension.
    pub vector_size: usize,
    /// Stored point count.
    pub points_count: usize,
}

/// Storage interface over the external vector index service.
///
/// Upsert semantics are idempotent per `point_id`: re-upserting fully
/// replaces the prior vector and payload (last-write-wins, vectors are never
/// merged). `set_asset_url` is the only payload-only partial update.
pub trait VectorIndex {
    /// Creates the collection if missing. When it exists: `recreate = false`
    /// is a no-op, `recreate = true` deletes and recreates — destructive,
    /// operator-intent only, never called automatically.
    fn ensure_collection(&self, spec: &CollectionSpec, recreate: bool) -> Result<()>;

    /// Describes the live collection.
    fn describe(&self, collection: &str) -> Result<CollectionInfo>;

    /// Writes one batch of points in a single RPC.
    fn upsert(&self, collection: &str, points: &[IndexPoint]) -> Result<()>;

    /// Stored point count.
    fn count(&self, collection: &str) -> Result<usize>;

    /// Fetches one point's vector and payload.
    fn retrieve(&self, collection: &str, point_id: u64) -> Result<Option<(Vec<f32>, RecordPayload)>>;

    /// All points whose payload `source_id` equals the given id.
    fn find_by_source_id(&self, collection: &str, source_id: &str)
        -> Result<Vec<(u64, RecordPayload)>>;

    /// Payload-only update of `asset_url`; the vector and every other
    /// payload field stay untouched.
    fn set_asset_url(&self, collection: &str, point_id: u64, url: &str) -> Result<()>;

    /// k-NN search returning `(score, payload)` ordered by descending score.
    fn search(&self, collection: &str, vector: &[f32], top_k: usize)
        -> Result<Vec<(f32, RecordPayload)>>;

    /// Streams every stored payload, for statistics and audits.
    fn scroll_all(&self, collection: &str) -> Result<Vec<(u64, RecordPayload)>>;
}

/// One upsert batch that did not make it into the index.
#[derive(Debug, Clone)]
pub struct FailedBatch {
    /// Zero-based batch number within the run.
    pub batch: usize,
    /// Offset of the batch's first point in the input sequence.
    pub start: usize,
    /// Number of points in the batch.
    pub len: usize,
    /// Backend error text.
    pub error: String,
}

/// Point count disagreement detected after a bulk upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountMismatch {
    /// Points the run expected to be stored.
    pub expected: usize,
    /// Points the backend reports.
    pub stored: usize,
}

/// Accounting for one bulk-upsert run. Nothing is silently dropped: every
/// failed batch appears here, and retry is the caller's responsibility,
/// scoped to the failed batches only.
#[derive(Debug, Clone, Default)]
pub struct UpsertReport {
    /// Batches attempted.
    pub batches_attempted: usize,
    /// Points that made it into successful batches.
    pub points_written: usize,
    /// Batches that failed after the backend's bounded retries.
    pub failed_batches: Vec<FailedBatch>,
    /// Set when post-run verification found a count disagreement.
    pub count_mismatch: Option<CountMismatch>,
}

impl UpsertReport {
    /// True when every batch landed and verification (if run) agreed.
    pub fn is_clean(&self) -> bool {
        self.failed_batches.is_empty() && self.count_mismatch.is_none()
    }
}

/// Collection lifecycle plus batched, accounted bulk upsert.
#[derive(Debug, Clone)]
pub struct IndexManager<I> {
    index: I,
    collection: String,
    batch_size: usize,
}

impl<I: VectorIndex> IndexManager<I> {
    /// Builds a manager over a collection. `batch_size` is clamped to ≥ 1.
    pub fn new(index: I, collection: impl Into<String>, batch_size: usize) -> Self {
        Self {
            index,
            collection: collection.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// Borrow of the underlying index.
    pub fn index(&self) -> &I {
        &self.index
    }

    /// Collection this manager writes to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Creates or reuses the collection; see [`VectorIndex::ensure_collection`].
    pub fn ensure_collection(&self, spec: &CollectionSpec, recreate: bool) -> Result<()> {
        self.index.ensure_collection(spec, recreate)
    }

    /// Upserts every point in batches. One write RPC per batch; a failed
    /// batch is recorded and the run continues — already-successful batches
    /// are never re-applied.
    pub fn bulk_upsert(&self, points: &[IndexPoint]) -> UpsertReport {
        let mut report = UpsertReport::default();
        for (batch_no, batch) in points.chunks(self.batch_size).enumerate() {
            report.batches_attempted += 1;
            let start = batch_no * self.batch_size;
            match self.index.upsert(&self.collection, batch) {
                Ok(()) => {
                    report.points_written += batch.len();
                    info!(batch = batch_no, points = batch.len(), "upserted batch");
                }
                Err(err) => {
                    warn!(batch = batch_no, error = %err, "upsert batch failed");
                    report.failed_batches.push(FailedBatch {
                        batch: batch_no,
                        start,
                        len: batch.len(),
                        error: err.to_string(),
                    });
                }
            }
        }
        report
    }

    /// Compares the stored point count against the expected one and records
    /// any disagreement on the report. Mismatches are reported, never
    /// auto-corrected.
    pub fn verify_count(&self, expected: usize, report: &mut UpsertReport) -> Result<()> {
        let stored = self.index.count(&self.collection)?;
        if stored != expected {
            warn!(expected, stored, "stored point count disagrees with expectation");
            report.count_mismatch = Some(CountMismatch { expected, stored });
        } else {
            info!(stored, "point count verified");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Fake index that fails specific upsert batches and reports a fixed count.
    struct FlakyIndex {
        fail_batches: Vec<usize>,
        calls: RefCell<usize>,
        stored: RefCell<usize>,
    }

    impl FlakyIndex {
        fn new(fail_batches: Vec<usize>) -> Self {
            Self {
                fail_batches,
                calls: RefCell::new(0),
                stored: RefCell::new(0),
            }
        }
    }

    impl VectorIndex for FlakyIndex {
        fn ensure_collection(&self, _spec: &CollectionSpec, _recreate: bool) -> Result<()> {
            Ok(())
        }
        fn describe(&self, _collection: &str) -> Result<CollectionInfo> {
            Ok(CollectionInfo {
                vector_size: 4,
                points_count: *self.stored.borrow(),
            })
        }
        fn upsert(&self, _collection: &str, points: &[IndexPoint]) -> Result<()> {
            let call = *self.calls.borrow();
            *self.calls.borrow_mut() += 1;
            if self.fail_batches.contains(&call) {
                anyhow::bail!("simulated write failure");
            }
            *self.stored.borrow_mut() += points.len();
            Ok(())
        }
        fn count(&self, _collection: &str) -> Result<usize> {
            Ok(*self.stored.borrow())
        }
        fn retrieve(
            &self,
            _collection: &str,
            _point_id: u64,
        ) -> Result<Option<(Vec<f32>, RecordPayload)>> {
            Ok(None)
        }
        fn find_by_source_id(
            &self,
            _collection: &str,
            _source_id: &str,
        ) -> Result<Vec<(u64, RecordPayload)>> {
            Ok(Vec::new())
        }
        fn set_asset_url(&self, _collection: &str, _point_id: u64, _url: &str) -> Result<()> {
            Ok(())
        }
        fn search(
            &self,
            _collection: &str,
            _vector: &[f32],
            _top_k: usize,
        ) -> Result<Vec<(f32, RecordPayload)>> {
            Ok(Vec::new())
        }
        fn scroll_all(&self, _collection: &str) -> Result<Vec<(u64, RecordPayload)>> {
            Ok(Vec::new())
        }
    }

    fn points(n: usize) -> Vec<IndexPoint> {
        (0..n)
            .map(|i| IndexPoint {
                point_id: i as u64,
                vector: vec![0.0; 4],
                payload: RecordPayload {
                    source_id: i.to_string(),
                    name: format!("point {i}"),
                    description: String::new(),
                    location: String::new(),
                    category: String::new(),
                    language: "EN".to_string(),
                    tags: Vec::new(),
                    photo_name: String::new(),
                    photo_author: String::new(),
                    license: String::new(),
                    has_asset: false,
                    asset_url: None,
                    combined_text: String::new(),
                },
            })
            .collect()
    }

    #[test]
    fn clean_run_writes_every_point() {
        let manager = IndexManager::new(FlakyIndex::new(vec![]), "test", 3);
        let mut report = manager.bulk_upsert(&points(10));
        assert_eq!(report.batches_attempted, 4);
        assert_eq!(report.points_written, 10);
        assert!(report.failed_batches.is_empty());
        manager.verify_count(10, &mut report).expect("verify");
        assert!(report.is_clean());
    }

    #[test]
    fn failed_batch_is_reported_and_run_continues() {
        let manager = IndexManager::new(FlakyIndex::new(vec![1]), "test", 3);
        let report = manager.bulk_upsert(&points(10));
        assert_eq!(report.batches_attempted, 4);
        assert_eq!(report.points_written, 7);
        assert_eq!(report.failed_batches.len(), 1);
        let failed = &report.failed_batches[0];
        assert_eq!(failed.batch, 1);
        assert_eq!(failed.start, 3);
        assert_eq!(failed.len, 3);
    }

    #[test]
    fn count_mismatch_is_a_reported_inconsistency() {
        let manager = IndexManager::new(FlakyIndex::new(vec![0]), "test", 5);
        let mut report = manager.bulk_upsert(&points(10));
        manager.verify_count(10, &mut report).expect("verify");
        assert_eq!(
            report.count_mismatch,
            Some(CountMismatch {
                expected: 10,
                stored: 5
            })
        );
        assert!(!report.is_clean());
    }
}
