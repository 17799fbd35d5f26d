//! Asset-URL enrichment: payload-only reconciliation of an external
//! `source_id -> url` mapping into the live index.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::index::VectorIndex;

/// Maximum example failures carried in a report.
const EXAMPLE_FAILURES: usize = 5;

/// Flat `source_id -> url` document produced by the asset-upload side
/// channel and consumed by the reconciler. Keys are true source ids, never
/// index-assigned point ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetUrlMap {
    entries: BTreeMap<String, String>,
}

impl AssetUrlMap {
    /// Empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces one entry.
    pub fn insert(&mut self, source_id: impl Into<String>, url: impl Into<String>) {
        self.entries.insert(source_id.into(), url.into());
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the mapping holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in stable key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Loads the mapping from a flat JSON object file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read url map {}", path.display()))?;
        let entries: BTreeMap<String, String> =
            serde_json::from_str(&text).context("url map is not a flat JSON object")?;
        Ok(Self { entries })
    }

    /// Saves the mapping as a pretty-printed flat JSON object.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.entries).context("serialize url map")?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write url map {}", path.display()))?;
        Ok(())
    }
}

impl FromIterator<(String, String)> for AssetUrlMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Per-run enrichment accounting. Every entry lands in exactly one bucket;
/// nothing is silently dropped.
#[derive(Debug, Clone, Default)]
pub struct EnrichReport {
    /// Entries whose target point received the URL.
    pub updated: usize,
    /// Entries whose source id no longer resolves to any point.
    pub missing: usize,
    /// Entries that failed (ambiguous target, id disagreement, or I/O).
    pub failed: usize,
    /// First few failures, as `(source_id, reason)`.
    pub example_failures: Vec<(String, String)>,
}

impl EnrichReport {
    /// Fraction of entries successfully applied, in `[0, 1]`.
    pub fn success_rate(&self) -> f64 {
        let total = self.updated + self.missing + self.failed;
        if total == 0 {
            return 1.0;
        }
        self.updated as f64 / total as f64
    }

    fn record_failure(&mut self, source_id: &str, reason: String) {
        self.failed += 1;
        if self.example_failures.len() < EXAMPLE_FAILURES {
            self.example_failures.push((source_id.to_string(), reason));
        }
    }
}

/// Applies an asset-URL mapping to the live index as payload-only updates.
///
/// Targets are resolved by the payload's `source_id`, never by casting the
/// mapping key to a point id: positional point ids are only coincidentally
/// equal to source ids, and a reingest with a different sample size or
/// ordering would silently land updates on the wrong records.
pub struct Reconciler<I> {
    index: I,
    collection: String,
}

impl<I: VectorIndex> Reconciler<I> {
    /// Builds a reconciler over a collection.
    pub fn new(index: I, collection: impl Into<String>) -> Self {
        Self {
            index,
            collection: collection.into(),
        }
    }

    /// Applies every mapping entry. A single entry failure never aborts the
    /// remaining entries, and re-applying the same mapping writes equal
    /// values (idempotent).
    pub fn apply(&self, map: &AssetUrlMap) -> EnrichReport {
        let mut report = EnrichReport::default();
        for (source_id, url) in map.iter() {
            match self.apply_entry(source_id, url) {
                Ok(EntryOutcome::Updated) => report.updated += 1,
                Ok(EntryOutcome::Missing) => {
                    warn!(source_id, "enrichment target not found in index");
                    report.missing += 1;
                }
                Err(reason) => {
                    warn!(source_id, %reason, "enrichment entry failed");
                    report.record_failure(source_id, reason.to_string());
                }
            }
        }
        info!(
            updated = report.updated,
            missing = report.missing,
            failed = report.failed,
            success_rate = report.success_rate(),
            "enrichment run complete"
        );
        report
    }

    fn apply_entry(&self, source_id: &str, url: &str) -> std::result::Result<EntryOutcome, anyhow::Error> {
        let matches = self.index.find_by_source_id(&self.collection, source_id)?;
        match matches.as_slice() {
            [] => Ok(EntryOutcome::Missing),
            [(point_id, payload)] => {
                if payload.source_id != source_id {
                    anyhow::bail!(
                        "stored source_id {:?} disagrees with mapping key",
                        payload.source_id
                    );
                }
                self.index.set_asset_url(&self.collection, *point_id, url)?;
                Ok(EntryOutcome::Updated)
            }
            _ => anyhow::bail!("source_id resolves to more than one point"),
        }
    }
}

enum EntryOutcome {
    Updated,
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_round_trips_through_json_file() {
        let mut map = AssetUrlMap::new();
        map.insert("a", "https://cdn/x.jpg");
        map.insert("b", "https://cdn/y.jpg");
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        map.save(file.path()).expect("save");
        let loaded = AssetUrlMap::load(file.path()).expect("load");
        assert_eq!(loaded, map);
    }

    #[test]
    fn empty_report_counts_as_fully_successful() {
        assert_eq!(EnrichReport::default().success_rate(), 1.0);
    }

    #[test]
    fn success_rate_counts_all_buckets() {
        let mut report = EnrichReport {
            updated: 3,
            missing: 1,
            ..Default::default()
        };
        report.record_failure("x", "boom".to_string());
        assert!((report.success_rate() - 0.6).abs() < f64::EPSILON);
        assert_eq!(report.example_failures.len(), 1);
    }
}
