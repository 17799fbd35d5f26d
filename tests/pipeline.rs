//! End-to-end pipeline tests over in-memory fakes of the embedding and
//! vector index services.

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use anyhow::Result;
use serde_json::json;

use semdex::{
    AssetUrlMap, CollectionInfo, CollectionSpec, DistanceMetric, EmbedError, Embedder,
    IndexManager, IndexPoint, IngestPipeline, QueryEngine, RawRecord, Reconciler, RecordPayload,
    TextEncoder, VectorIndex,
};

const DIM: usize = 64;

/// Deterministic bag-of-words encoder: each lowercase token bumps one
/// hashed dimension, so texts sharing words land near each other under
/// cosine similarity.
#[derive(Clone)]
struct BagOfWordsEncoder;

impl TextEncoder for BagOfWordsEncoder {
    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; DIM];
                for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
                    if token.is_empty() {
                        continue;
                    }
                    let mut hasher = DefaultHasher::new();
                    token.hash(&mut hasher);
                    v[(hasher.finish() % DIM as u64) as usize] += 1.0;
                }
                v
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

#[derive(Default, Debug)]
struct MemoryState {
    exists: bool,
    vector_size: usize,
    points: BTreeMap<u64, (Vec<f32>, RecordPayload)>,
    insertion: Vec<u64>,
}

/// In-memory stand-in for the vector index service. Cosine scoring, stable
/// insertion order for ties.
#[derive(Clone, Default, Debug)]
struct MemoryIndex {
    state: Rc<RefCell<MemoryState>>,
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

impl VectorIndex for MemoryIndex {
    fn ensure_collection(&self, spec: &CollectionSpec, recreate: bool) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.exists && !recreate {
            return Ok(());
        }
        state.exists = true;
        state.vector_size = spec.vector_size;
        state.points.clear();
        state.insertion.clear();
        Ok(())
    }

    fn describe(&self, _collection: &str) -> Result<CollectionInfo> {
        let state = self.state.borrow();
        anyhow::ensure!(state.exists, "collection does not exist");
        Ok(CollectionInfo {
            vector_size: state.vector_size,
            points_count: state.points.len(),
        })
    }

    fn upsert(&self, _collection: &str, points: &[IndexPoint]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        for point in points {
            if !state.points.contains_key(&point.point_id) {
                state.insertion.push(point.point_id);
            }
            state
                .points
                .insert(point.point_id, (point.vector.clone(), point.payload.clone()));
        }
        Ok(())
    }

    fn count(&self, _collection: &str) -> Result<usize> {
        Ok(self.state.borrow().points.len())
    }

    fn retrieve(
        &self,
        _collection: &str,
        point_id: u64,
    ) -> Result<Option<(Vec<f32>, RecordPayload)>> {
        Ok(self.state.borrow().points.get(&point_id).cloned())
    }

    fn find_by_source_id(
        &self,
        _collection: &str,
        source_id: &str,
    ) -> Result<Vec<(u64, RecordPayload)>> {
        Ok(self
            .state
            .borrow()
            .points
            .iter()
            .filter(|(_, (_, payload))| payload.source_id == source_id)
            .map(|(id, (_, payload))| (*id, payload.clone()))
            .collect())
    }

    fn set_asset_url(&self, _collection: &str, point_id: u64, url: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let (_, payload) = state
            .points
            .get_mut(&point_id)
            .ok_or_else(|| anyhow::anyhow!("point {point_id} not found"))?;
        payload.asset_url = Some(url.to_string());
        Ok(())
    }

    fn search(
        &self,
        _collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<(f32, RecordPayload)>> {
        let state = self.state.borrow();
        let mut scored: Vec<(f32, u64)> = state
            .insertion
            .iter()
            .filter_map(|id| {
                state
                    .points
                    .get(id)
                    .map(|(v, _)| (cosine(vector, v), *id))
            })
            .collect();
        // Stable sort keeps insertion order for equal scores.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, id)| (score, state.points[&id].1.clone()))
            .collect())
    }

    fn scroll_all(&self, _collection: &str) -> Result<Vec<(u64, RecordPayload)>> {
        Ok(self
            .state
            .borrow()
            .points
            .iter()
            .map(|(id, (_, payload))| (*id, payload.clone()))
            .collect())
    }
}

fn raw(value: serde_json::Value) -> RawRecord {
    value.as_object().expect("object").clone()
}

fn dataset() -> Vec<RawRecord> {
    vec![
        raw(json!({"id": "a", "name": "Lake X"})),
        raw(json!({"id": "b", "name": "Church Y"})),
        raw(json!({"id": "c", "name": "Museum Z"})),
    ]
}

fn spec() -> CollectionSpec {
    CollectionSpec {
        name: "test".to_string(),
        vector_size: DIM,
        distance: DistanceMetric::Cosine,
    }
}

fn ingest(index: &MemoryIndex, raws: &[RawRecord]) -> semdex::IngestReport {
    let pipeline = IngestPipeline::new(
        Embedder::new(BagOfWordsEncoder, 2),
        IndexManager::new(index.clone(), "test", 2),
    );
    pipeline.run(raws, &spec(), true).expect("ingest run")
}

#[test]
fn ingest_writes_one_point_per_record() {
    let index = MemoryIndex::default();
    let report = ingest(&index, &dataset());
    assert_eq!(report.records_in, 3);
    assert_eq!(report.points_prepared, 3);
    assert_eq!(report.upsert.points_written, 3);
    assert!(report.upsert.is_clean());
    assert_eq!(index.count("test").unwrap(), 3);
}

#[test]
fn upsert_is_idempotent_per_point_id() {
    let index = MemoryIndex::default();
    ingest(&index, &dataset());

    let (_, first_payload) = index.retrieve("test", 0).unwrap().expect("point 0");
    assert_eq!(first_payload.name, "Lake X");

    // Re-upsert point 0 with new vector and payload: full replacement.
    let mut replacement = first_payload.clone();
    replacement.name = "Lake X (renamed)".to_string();
    index
        .upsert(
            "test",
            &[IndexPoint {
                point_id: 0,
                vector: vec![1.0; DIM],
                payload: replacement.clone(),
            }],
        )
        .unwrap();

    assert_eq!(index.count("test").unwrap(), 3);
    let (vector, payload) = index.retrieve("test", 0).unwrap().expect("point 0");
    assert_eq!(vector, vec![1.0; DIM]);
    assert_eq!(payload.name, "Lake X (renamed)");
}

#[test]
fn enrichment_is_payload_only() {
    let index = MemoryIndex::default();
    ingest(&index, &dataset());
    let before = index.retrieve("test", 0).unwrap().expect("point 0");

    let mut map = AssetUrlMap::new();
    map.insert("a", "https://cdn/x.jpg");
    let report = Reconciler::new(index.clone(), "test").apply(&map);
    assert_eq!(report.updated, 1);
    assert_eq!(report.failed, 0);

    let after = index.retrieve("test", 0).unwrap().expect("point 0");
    assert_eq!(after.0, before.0, "vector must be untouched");
    assert_eq!(after.1.asset_url.as_deref(), Some("https://cdn/x.jpg"));
    // Every other payload field is byte-identical.
    let mut expected = before.1.clone();
    expected.asset_url = Some("https://cdn/x.jpg".to_string());
    assert_eq!(after.1, expected);
}

#[test]
fn enrichment_is_idempotent() {
    let index = MemoryIndex::default();
    ingest(&index, &dataset());

    let mut map = AssetUrlMap::new();
    map.insert("a", "https://cdn/x.jpg");
    let reconciler = Reconciler::new(index.clone(), "test");
    reconciler.apply(&map);
    let once = index.scroll_all("test").unwrap();
    let report = reconciler.apply(&map);
    let twice = index.scroll_all("test").unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(once, twice);
}

#[test]
fn enrichment_reports_missing_targets_without_aborting() {
    let index = MemoryIndex::default();
    ingest(&index, &dataset());

    let mut map = AssetUrlMap::new();
    map.insert("a", "https://cdn/x.jpg");
    map.insert("ghost", "https://cdn/ghost.jpg");
    let report = Reconciler::new(index.clone(), "test").apply(&map);

    assert_eq!(report.updated, 1);
    assert_eq!(report.missing, 1);
    assert_eq!(report.failed, 0);
    assert!((report.success_rate() - 0.5).abs() < f64::EPSILON);
}

#[test]
fn enrichment_skips_ambiguous_targets() {
    let index = MemoryIndex::default();
    ingest(&index, &dataset());

    // A second point claiming source_id "a", as a bad reingest could leave.
    let (vector, payload) = index.retrieve("test", 0).unwrap().expect("point 0");
    index
        .upsert(
            "test",
            &[IndexPoint {
                point_id: 99,
                vector,
                payload,
            }],
        )
        .unwrap();

    let mut map = AssetUrlMap::new();
    map.insert("a", "https://cdn/x.jpg");
    let report = Reconciler::new(index.clone(), "test").apply(&map);

    assert_eq!(report.updated, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.example_failures.len(), 1);
    // Neither candidate was written.
    for (_, payload) in index.scroll_all("test").unwrap() {
        assert_eq!(payload.asset_url, None);
    }
}

#[test]
fn search_respects_top_k_with_non_increasing_scores() {
    let index = MemoryIndex::default();
    ingest(&index, &dataset());

    let engine = QueryEngine::new(BagOfWordsEncoder, index, "test").expect("engine");
    let hits = engine.search("lake", 3).expect("search");
    assert_eq!(hits.len(), 3);
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn query_engine_rejects_dimension_mismatch() {
    #[derive(Debug)]
    struct TinyEncoder;
    impl TextEncoder for TinyEncoder {
        fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(texts.iter().map(|_| vec![0.0; 8]).collect())
        }
        fn dimension(&self) -> usize {
            8
        }
    }

    let index = MemoryIndex::default();
    ingest(&index, &dataset());
    let err = QueryEngine::new(TinyEncoder, index, "test").unwrap_err();
    assert!(err.to_string().contains("does not match"));
}

#[test]
fn end_to_end_ingest_enrich_query() {
    let index = MemoryIndex::default();
    ingest(&index, &dataset());

    // Before enrichment: "lake" ranks record a first, no asset URL yet.
    let engine = QueryEngine::new(BagOfWordsEncoder, index.clone(), "test").expect("engine");
    let hits = engine.search("lake", 3).expect("search");
    assert_eq!(hits[0].payload.source_id, "a");
    assert_eq!(hits[0].payload.name, "Lake X");
    assert_eq!(hits[0].payload.asset_url, None);

    // Out-of-band asset upload resolves a URL for record a only.
    let mut map = AssetUrlMap::new();
    map.insert("a", "https://cdn/x.jpg");
    let report = Reconciler::new(index.clone(), "test").apply(&map);
    assert_eq!(report.updated, 1);

    // Same query now carries the URL for a; b and c stay unenriched.
    let hits = engine.search("lake", 3).expect("search");
    assert_eq!(hits[0].payload.source_id, "a");
    assert_eq!(hits[0].payload.asset_url.as_deref(), Some("https://cdn/x.jpg"));
    for hit in &hits[1..] {
        assert_eq!(hit.payload.asset_url, None);
    }
}
