//! Ingestion run driver: normalize, compose, embed, upsert, verify.

use anyhow::{Context, Result};
use tracing::info;

use crate::embedder::{Embedder, TextEncoder};
use crate::index::{CollectionSpec, IndexManager, IndexPoint, UpsertReport, VectorIndex};
use crate::record::{Normalizer, RawRecord, Record};

/// Accounting for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestReport {
    /// Raw records read from the dataset source.
    pub records_in: usize,
    /// Points prepared for upsert (always equals `records_in`: the
    /// normalizer never drops a record and the embedder preserves count).
    pub points_prepared: usize,
    /// Bulk-upsert outcome, including failed batches and the post-run
    /// count verification.
    pub upsert: UpsertReport,
}

/// One logical sequential pass from raw records to stored index points.
///
/// Batching inside the embedder and the index manager bounds per-call
/// payload size; it does not introduce concurrency.
pub struct IngestPipeline<E, I> {
    normalizer: Normalizer,
    embedder: Embedder<E>,
    manager: IndexManager<I>,
}

impl<E: TextEncoder, I: VectorIndex> IngestPipeline<E, I> {
    /// Assembles a pipeline from its stages.
    pub fn new(embedder: Embedder<E>, manager: IndexManager<I>) -> Self {
        Self {
            normalizer: Normalizer::new(),
            embedder,
            manager,
        }
    }

    /// Normalizes raw records in collection order. Positional indices feed
    /// the `source_id` fallback, so the slice must be in the source's
    /// stable iteration order.
    pub fn normalize_all(&self, raws: &[RawRecord]) -> Vec<Record> {
        raws.iter()
            .enumerate()
            .map(|(position, raw)| self.normalizer.normalize(raw, position))
            .collect()
    }

    /// Runs the full ingestion pass.
    ///
    /// `recreate = true` drops and recreates the collection first — an
    /// exclusive maintenance operation that must not race in-flight writes.
    pub fn run(
        &self,
        raws: &[RawRecord],
        spec: &CollectionSpec,
        recreate: bool,
    ) -> Result<IngestReport> {
        let mut records = self.normalize_all(raws);
        info!(records = records.len(), "normalized records");

        self.embedder
            .embed_records(&mut records)
            .context("embedding pass failed")?;
        info!(records = records.len(), "embedded records");

        // Point ids are positional within this run; the durable join key is
        // the payload's source_id.
        let points: Vec<IndexPoint> = records
            .iter()
            .enumerate()
            .filter_map(|(i, record)| IndexPoint::from_record(i as u64, record))
            .collect();

        self.manager.ensure_collection(spec, recreate)?;
        let mut upsert = self.manager.bulk_upsert(&points);
        // Count verification is meaningful against this run's size for a
        // fresh or fully re-upserted collection; disagreements are reported,
        // never corrected here.
        self.manager.verify_count(points.len(), &mut upsert)?;

        Ok(IngestReport {
            records_in: raws.len(),
            points_prepared: points.len(),
            upsert,
        })
    }
}

/// Parses one JSONL line into a raw record, tolerating blank lines.
pub fn parse_raw_line(line: &str) -> Result<Option<RawRecord>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value: serde_json::Value =
        serde_json::from_str(trimmed).context("dataset line is not valid JSON")?;
    match value {
        serde_json::Value::Object(map) => Ok(Some(map)),
        _ => anyhow::bail!("dataset line is not a JSON object"),
    }
}

/// Reads a JSONL dataset file, optionally capped to the first
/// `sample_size` records (in file order, to keep positional ids stable).
pub fn read_dataset(path: &std::path::Path, sample_size: Option<usize>) -> Result<Vec<RawRecord>> {
    use std::io::BufRead;
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open dataset {}", path.display()))?;
    let reader = std::io::BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line.context("failed to read dataset line")?;
        if let Some(raw) = parse_raw_line(&line)? {
            records.push(raw);
        }
        if let Some(cap) = sample_size {
            if records.len() >= cap {
                break;
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_jsonl_lines() {
        let raw = parse_raw_line(r#"{"id": "a", "name": "Lake X"}"#)
            .expect("parse")
            .expect("record");
        assert_eq!(raw.get("id").unwrap(), "a");
        assert!(parse_raw_line("   ").expect("blank").is_none());
        assert!(parse_raw_line("[1, 2]").is_err());
    }

    #[test]
    fn sample_cap_preserves_file_order() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        for i in 0..5 {
            writeln!(file, r#"{{"id": "r{i}"}}"#).expect("write");
        }
        let records = read_dataset(file.path(), Some(3)).expect("read");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get("id").unwrap(), "r0");
        assert_eq!(records[2].get("id").unwrap(), "r2");
    }
}
