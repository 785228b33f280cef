use serde::{Deserialize, Serialize};

/// One size/dimension configuration belonging to a product.
///
/// Dimensional fields are free-form strings: source spreadsheets mix units,
/// ranges and `"N/A"` sentinels, so nothing here is numeric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub size_label: String,
    pub brimful_capacity: String,
    pub neck_size: String,
    pub total_height: String,
    pub diameter: String,
    pub label_height: String,
    pub standard_weight: String,
}

/// Client payload for the single-item create/update flows.
///
/// `image_url` is a remote source reference, not the hosted URL; the
/// service resolves it through the media store before anything is persisted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPayload {
    pub name: String,
    pub material_of_construction: String,
    pub cap_type: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Omitted variants leave the stored variants untouched on update.
    #[serde(default)]
    pub variants: Option<Vec<Variant>>,
}

/// Final response of a bulk ingestion call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub message: String,
    pub summary: IngestSummary,
}

/// Aggregate counts plus per-row / per-product detail.
///
/// Detail lists serialize even when empty so clients never have to probe
/// for absent keys.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub total_products: usize,
    pub inserted: u64,
    pub updated: u64,
    pub matched: u64,
    pub failed_products: usize,
    pub skipped_rows: usize,
    pub failed_product_details: Vec<FailedProduct>,
    pub skipped_row_details: Vec<SkippedRow>,
}

/// A product that could not be ingested, with the spreadsheet rows that
/// contributed to it. Covers both image-resolution and write failures.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedProduct {
    pub product: String,
    pub rows: Vec<usize>,
    pub reason: String,
}

/// A spreadsheet row rejected during validation. `row` is the 1-based line
/// number including the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRow {
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
