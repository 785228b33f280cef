use crate::models::{SkippedRow, Variant};
use crate::sheet::RawRow;
use std::collections::HashMap;

/// Columns every row must carry to be ingestible.
pub const REQUIRED_FIELDS: [&str; 5] = [
    "product name",
    "material of construction",
    "cap type",
    "image url",
    "size label",
];

/// Per-variant columns defaulted to `"N/A"` when blank.
pub const VARIANT_FIELDS: [&str; 6] = [
    "brimful capacity",
    "neck size",
    "total height",
    "diameter",
    "label height",
    "standard weight",
];

/// One logical product accumulated from grouped rows, still carrying its
/// unresolved `image_source`. The source reference is consumed during image
/// resolution and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductGroup {
    pub name: String,
    pub material_of_construction: String,
    pub cap_type: String,
    pub image_source: String,
    pub description: String,
    pub variants: Vec<Variant>,
    /// 1-based spreadsheet line numbers (header included) for error
    /// attribution.
    pub source_rows: Vec<usize>,
}

/// Grouping result: product groups in first-appearance order plus the rows
/// validation rejected. `groups`-contributing rows and `skipped` rows
/// partition the input exactly.
#[derive(Debug, Default)]
pub struct GroupedRows {
    pub groups: Vec<ProductGroup>,
    pub skipped: Vec<SkippedRow>,
}

/// Canonicalizes a raw row: keys lower-cased and trimmed, values trimmed.
/// Pure and total; applying it twice is a no-op.
pub fn normalize_row(row: &RawRow) -> RawRow {
    row.iter()
        .map(|(key, value)| (key.trim().to_lowercase(), value.trim().to_string()))
        .collect()
}

/// Validates and groups normalized rows into products-with-variants.
///
/// Rows missing required fields are recorded and skipped without aborting
/// the batch. Rows sharing the identity key
/// `name|material|capType|imageSource` become variants of one product. Row
/// *i* (0-based) reports as line *i + 2*: 1-based plus the header row.
///
/// The grouping map lives and dies inside this call; nothing is accumulated
/// across invocations.
pub fn group_rows(rows: &[RawRow]) -> GroupedRows {
    let mut grouped = GroupedRows::default();
    let mut index_by_key: HashMap<String, usize> = HashMap::new();

    for (idx, raw) in rows.iter().enumerate() {
        let line = idx + 2;
        let mut row = normalize_row(raw);

        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| row.get(*field).map(String::as_str).unwrap_or("").is_empty())
            .collect();
        if !missing.is_empty() {
            grouped.skipped.push(SkippedRow {
                row: line,
                reason: format!("Missing fields: {}", missing.join(", ")),
            });
            continue;
        }

        for field in VARIANT_FIELDS {
            let entry = row.entry(field.to_string()).or_default();
            if entry.is_empty() {
                *entry = "N/A".to_string();
            }
        }

        let key = format!(
            "{}|{}|{}|{}",
            row["product name"], row["material of construction"], row["cap type"], row["image url"],
        );

        let position = *index_by_key.entry(key).or_insert_with(|| {
            grouped.groups.push(ProductGroup {
                name: row["product name"].clone(),
                material_of_construction: row["material of construction"].clone(),
                cap_type: row["cap type"].clone(),
                image_source: row["image url"].clone(),
                description: row.get("description").cloned().unwrap_or_default(),
                variants: Vec::new(),
                source_rows: Vec::new(),
            });
            grouped.groups.len() - 1
        });

        let group = &mut grouped.groups[position];
        group.source_rows.push(line);
        group.variants.push(variant_from_row(&row));
    }

    grouped
}

fn variant_from_row(row: &RawRow) -> Variant {
    Variant {
        size_label: row["size label"].clone(),
        brimful_capacity: row["brimful capacity"].clone(),
        neck_size: row["neck size"].clone(),
        total_height: row["total height"].clone(),
        diameter: row["diameter"].clone(),
        label_height: row["label height"].clone(),
        standard_weight: row["standard weight"].clone(),
    }
}
