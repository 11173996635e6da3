use crate::error::Result;
use crate::models::Place;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

fn header_key(raw: &str) -> String {
    raw.trim().trim_start_matches('\u{feff}').to_lowercase()
}

/// Maps tolerated header spellings onto canonical field names.
fn canonical_field(key: &str) -> Option<&'static str> {
    match key {
        "place_id" | "place id" | "placeid" => Some("place_id"),
        "name" | "place" | "place name" | "place_name" => Some("name"),
        "place_url" | "place url" | "url" => Some("place_url"),
        "group_id" | "group id" | "beach_id" | "beach id" => Some("group_id"),
        "category" => Some("category"),
        "categories" => Some("categories"),
        _ => None,
    }
}

/// Accepts either a JSON array (`["Cafe","Bar"]`) or a loose
/// comma-separated cell, as both occur in exported sheets.
pub fn parse_categories(raw: &str) -> Option<Vec<String>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with('[') {
        if let Ok(items) = serde_json::from_str::<Vec<String>>(raw) {
            let items: Vec<String> = items
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            return if items.is_empty() { None } else { Some(items) };
        }
    }
    let items: Vec<String> = raw
        .trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .map(|s| s.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Loads the target-place CSV. Header spellings are matched
/// case-insensitively with a few legacy aliases; rows missing the required
/// id or name are skipped with a warning rather than failing the batch.
pub fn load_places(path: &Path) -> Result<Vec<Place>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut columns: HashMap<&'static str, usize> = HashMap::new();
    for (idx, raw) in reader.headers()?.iter().enumerate() {
        if let Some(field) = canonical_field(&header_key(raw)) {
            columns.entry(field).or_insert(idx);
        }
    }

    let cell = |record: &csv::StringRecord, field: &str| -> Option<String> {
        columns
            .get(field)
            .and_then(|&idx| record.get(idx))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let mut places = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let place_id = cell(&record, "place_id").unwrap_or_default();
        let name = cell(&record, "name").unwrap_or_default();
        match Place::new(place_id, name) {
            Ok(mut place) => {
                place.place_url = cell(&record, "place_url");
                place.group_id = cell(&record, "group_id");
                place.category = cell(&record, "category");
                place.categories = cell(&record, "categories")
                    .as_deref()
                    .and_then(parse_categories);
                places.push(place);
            }
            Err(e) => {
                warn!(row = row + 2, "skipping invalid place row: {e}");
            }
        }
    }

    info!(count = places.len(), path = %path.display(), "loaded places");
    Ok(places)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(content.as_bytes()).unwrap();
        tmp
    }

    #[test]
    fn test_loads_canonical_headers() {
        let tmp = write_csv(
            "place_id,name,place_url,group_id,category,categories\n\
             p1,Cafe X,https://maps.google.com/?cid=1,g1,Cafe,\"[\"\"Cafe\"\",\"\"Bar\"\"]\"\n",
        );
        let places = load_places(tmp.path()).unwrap();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].place_id, "p1");
        assert_eq!(places[0].group_id.as_deref(), Some("g1"));
        assert_eq!(
            places[0].categories,
            Some(vec!["Cafe".to_string(), "Bar".to_string()])
        );
    }

    #[test]
    fn test_accepts_legacy_aliases_case_insensitively() {
        let tmp = write_csv("Place ID,Place,Beach ID\np2,Playa Sur,b7\n");
        let places = load_places(tmp.path()).unwrap();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].name, "Playa Sur");
        assert_eq!(places[0].group_id.as_deref(), Some("b7"));
    }

    #[test]
    fn test_skips_rows_missing_required_fields() {
        let tmp = write_csv("place_id,name\n,No Id\np3,Named\np4,\n");
        let places = load_places(tmp.path()).unwrap();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].place_id, "p3");
    }

    #[test]
    fn test_parse_categories_variants() {
        assert_eq!(
            parse_categories(r#"["Cafe","Bar"]"#),
            Some(vec!["Cafe".to_string(), "Bar".to_string()])
        );
        assert_eq!(
            parse_categories("Cafe, Bar"),
            Some(vec!["Cafe".to_string(), "Bar".to_string()])
        );
        assert_eq!(parse_categories("[]"), None);
        assert_eq!(parse_categories("  "), None);
    }
}
