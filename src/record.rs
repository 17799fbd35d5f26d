//! Raw record normalization into the canonical `Record` schema.

use serde_json::{Map, Value};

/// One raw item from the dataset source: an unordered mapping with no
/// guaranteed keys. Field presence and types are entirely untrusted.
pub type RawRecord = Map<String, Value>;

/// Canonical normalized representation of one source item.
///
/// String fields are empty (never null) when the source omits them. The
/// derived fields `combined_text` and `embedding` stay `None` until the
/// composer and embedder stages run; once set they are snapshots of the
/// record at indexing time.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Stable identifier from the source collection, preserved verbatim.
    /// Falls back to the positional index only when the source has no id.
    pub source_id: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Location text.
    pub location: String,
    /// Category label.
    pub category: String,
    /// Ordered tag list, possibly empty.
    pub tags: Vec<String>,
    /// Uppercase language code, `"EN"` by default.
    pub language: String,
    /// Photo file name metadata.
    pub photo_name: String,
    /// Photo author metadata.
    pub photo_author: String,
    /// License metadata.
    pub license: String,
    /// True when the source carried binary asset data. The asset bytes
    /// themselves are discarded during normalization.
    pub has_asset: bool,
    /// Public asset URL, filled only by the enrichment run.
    pub asset_url: Option<String>,
    /// Embedding-ready text, set by the composer.
    pub combined_text: Option<String>,
    /// Fixed-length embedding vector, set by the embedder.
    pub embedding: Option<Vec<f32>>,
}

/// Stateless raw-record normalization service.
///
/// Never fails and never mutates its input: every unexpected shape is
/// recovered locally via safe coercion.
#[derive(Debug, Clone, Default)]
pub struct Normalizer;

impl Normalizer {
    /// Builds a new normalizer.
    pub fn new() -> Self {
        Self
    }

    /// Normalizes one raw record. `position` is the record's iteration index
    /// in the originating collection and doubles as the `source_id` fallback,
    /// so callers must enumerate the collection in its stable order.
    pub fn normalize(&self, raw: &RawRecord, position: usize) -> Record {
        let id = safe_str(raw.get("id"));
        let source_id = if id.is_empty() {
            position.to_string()
        } else {
            id
        };

        let language = {
            let lang = safe_str(raw.get("language")).to_uppercase();
            if lang.is_empty() {
                "EN".to_string()
            } else {
                lang
            }
        };

        Record {
            source_id,
            name: safe_str(raw.get("name")),
            description: safe_str(raw.get("description")),
            location: safe_str(raw.get("location")),
            category: safe_str(raw.get("category")),
            tags: coerce_tags(raw.get("tags")),
            language,
            photo_name: safe_str(raw.get("photo_name")),
            photo_author: safe_str(raw.get("photo_author")),
            license: safe_str(raw.get("license")),
            has_asset: is_truthy(raw.get("image")),
            asset_url: None,
            combined_text: None,
            embedding: None,
        }
    }
}

/// Safely coerces any JSON value to a trimmed string. Null and absent values
/// become the empty string; numbers use their decimal rendering.
pub fn safe_str(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

fn coerce_tags(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| safe_str(Some(item)))
            .filter(|tag| !tag.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawRecord {
        value.as_object().expect("object").clone()
    }

    #[test]
    fn empty_record_yields_defaults() {
        let record = Normalizer::new().normalize(&RawRecord::new(), 7);
        assert_eq!(record.source_id, "7");
        assert_eq!(record.name, "");
        assert_eq!(record.description, "");
        assert_eq!(record.location, "");
        assert_eq!(record.category, "");
        assert!(record.tags.is_empty());
        assert_eq!(record.language, "EN");
        assert!(!record.has_asset);
        assert_eq!(record.asset_url, None);
        assert_eq!(record.combined_text, None);
        assert_eq!(record.embedding, None);
    }

    #[test]
    fn preserves_source_id_verbatim() {
        let record = Normalizer::new().normalize(&raw(json!({"id": "abc-42"})), 0);
        assert_eq!(record.source_id, "abc-42");
    }

    #[test]
    fn coerces_numeric_id() {
        let record = Normalizer::new().normalize(&raw(json!({"id": 15})), 0);
        assert_eq!(record.source_id, "15");
    }

    #[test]
    fn trims_and_coerces_strings() {
        let record = Normalizer::new().normalize(
            &raw(json!({
                "name": "  Lake Ritsa  ",
                "description": null,
                "location": 42,
            })),
            0,
        );
        assert_eq!(record.name, "Lake Ritsa");
        assert_eq!(record.description, "");
        assert_eq!(record.location, "42");
    }

    #[test]
    fn uppercases_language_with_default() {
        let record = Normalizer::new().normalize(&raw(json!({"language": "ka"})), 0);
        assert_eq!(record.language, "KA");
        let record = Normalizer::new().normalize(&raw(json!({"language": "  "})), 0);
        assert_eq!(record.language, "EN");
    }

    #[test]
    fn keeps_tag_order() {
        let record =
            Normalizer::new().normalize(&raw(json!({"tags": ["nature", "lake", "hiking"]})), 0);
        assert_eq!(record.tags, vec!["nature", "lake", "hiking"]);
    }

    #[test]
    fn non_array_tags_become_empty() {
        let record = Normalizer::new().normalize(&raw(json!({"tags": "nature"})), 0);
        assert!(record.tags.is_empty());
    }

    #[test]
    fn asset_flag_without_retaining_bytes() {
        let record =
            Normalizer::new().normalize(&raw(json!({"image": "base64payload..."})), 0);
        assert!(record.has_asset);
        // The canonical record never carries the asset data itself.
        let record = Normalizer::new().normalize(&raw(json!({"image": null})), 0);
        assert!(!record.has_asset);
        let record = Normalizer::new().normalize(&raw(json!({"image": false})), 0);
        assert!(!record.has_asset);
    }

    #[test]
    fn does_not_mutate_input() {
        let input = raw(json!({"id": "x", "name": "  Lake  "}));
        let before = input.clone();
        let _ = Normalizer::new().normalize(&input, 0);
        assert_eq!(input, before);
    }
}
