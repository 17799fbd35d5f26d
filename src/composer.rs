//! Deterministic embedding-text composition.

use crate::record::Record;

/// Field order baked into `combined_text`. Changing this order or the
/// rendering changes index semantics for every previously stored point, so
/// it is a versioned contract, not a tuning knob.
pub const COMBINED_TEXT_FIELDS: [&str; 5] =
    ["name", "description", "category", "location", "tags"];

/// Separator between rendered fields.
const FIELD_SEPARATOR: &str = " | ";

/// Composes the canonical text representation of a record.
///
/// Each non-empty field renders as `"<Label>: <value>"` in the fixed
/// [`COMBINED_TEXT_FIELDS`] order; empty fields are omitted entirely. The
/// output is byte-identical for records with identical field values.
pub fn compose_combined_text(record: &Record) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(COMBINED_TEXT_FIELDS.len());

    if !record.name.is_empty() {
        parts.push(format!("Name: {}", record.name));
    }
    if !record.description.is_empty() {
        parts.push(format!("Description: {}", record.description));
    }
    if !record.category.is_empty() {
        parts.push(format!("Category: {}", record.category));
    }
    if !record.location.is_empty() {
        parts.push(format!("Location: {}", record.location));
    }
    if !record.tags.is_empty() {
        parts.push(format!("Tags: {}", record.tags.join(", ")));
    }

    parts.join(FIELD_SEPARATOR)
}

/// Fills `combined_text` for every record that does not already carry one.
pub fn compose_all(records: &mut [Record]) {
    for record in records {
        if record.combined_text.is_none() {
            record.combined_text = Some(compose_combined_text(record));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record {
            source_id: "a".to_string(),
            name: "Lake Ritsa".to_string(),
            description: "Mountain lake".to_string(),
            location: "Abkhazia".to_string(),
            category: "Nature".to_string(),
            tags: vec!["lake".to_string(), "hiking".to_string()],
            language: "EN".to_string(),
            photo_name: String::new(),
            photo_author: String::new(),
            license: String::new(),
            has_asset: false,
            asset_url: None,
            combined_text: None,
            embedding: None,
        }
    }

    #[test]
    fn renders_fields_in_fixed_order() {
        assert_eq!(
            compose_combined_text(&record()),
            "Name: Lake Ritsa | Description: Mountain lake | Category: Nature | \
             Location: Abkhazia | Tags: lake, hiking"
        );
    }

    #[test]
    fn omits_empty_fields_entirely() {
        let mut r = record();
        r.description = String::new();
        r.tags.clear();
        assert_eq!(
            compose_combined_text(&r),
            "Name: Lake Ritsa | Category: Nature | Location: Abkhazia"
        );
    }

    #[test]
    fn fully_empty_record_composes_to_empty() {
        let mut r = record();
        r.name = String::new();
        r.description = String::new();
        r.category = String::new();
        r.location = String::new();
        r.tags.clear();
        assert_eq!(compose_combined_text(&r), "");
    }

    #[test]
    fn is_byte_deterministic() {
        let a = compose_combined_text(&record());
        let b = compose_combined_text(&record());
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn compose_all_skips_existing_text() {
        let mut records = vec![record(), record()];
        records[0].combined_text = Some("frozen".to_string());
        compose_all(&mut records);
        assert_eq!(records[0].combined_text.as_deref(), Some("frozen"));
        assert!(records[1]
            .combined_text
            .as_deref()
            .unwrap()
            .starts_with("Name: Lake Ritsa"));
    }
}
