//! Flat item exports shared by every frontend.

use std::fmt::Write as _;
use std::str::FromStr;

use chrono::TimeZone;
use serde::{Deserialize, Serialize};

use crate::models::Item;

/// Export output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unknown export format '{other}', expected json or csv")),
        }
    }
}

/// Serializable item representation used in JSON and CSV exports.
///
/// Date-valued fields are rendered as calendar days; the bookkeeping
/// timestamps stay as Unix ms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportItem {
    pub id: String,
    pub name: String,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub quantity: u32,
    pub expiry_date: Option<String>,
    pub production_date: Option<String>,
    pub medicine_tags: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Convert an item into an export record with stable tag ordering.
#[must_use]
pub fn item_to_export_row(item: &Item) -> ExportItem {
    let mut medicine_tags = item.medicine_tags.clone();
    medicine_tags.sort();

    ExportItem {
        id: item.id.as_str().to_string(),
        name: item.name.clone(),
        category: item.category.clone(),
        brand: item.brand.clone(),
        location: item.location.clone(),
        notes: item.notes.clone(),
        quantity: item.quantity,
        expiry_date: item.expiry_date.map(format_day),
        production_date: item.production_date.map(format_day),
        medicine_tags,
        created_at: item.created_at,
        updated_at: item.updated_at,
    }
}

/// Render items as pretty-printed JSON.
pub fn render_json_export(items: &[Item]) -> serde_json::Result<String> {
    let rows = items.iter().map(item_to_export_row).collect::<Vec<ExportItem>>();
    serde_json::to_string_pretty(&rows)
}

/// Render items as RFC 4180 CSV with a header row.
#[must_use]
pub fn render_csv_export(items: &[Item]) -> String {
    let mut output = String::from(
        "id,name,category,brand,location,notes,quantity,expiryDate,productionDate,medicineTags,createdAt,updatedAt\n",
    );

    for item in items {
        let row = item_to_export_row(item);
        let fields = [
            row.id,
            row.name,
            row.category.unwrap_or_default(),
            row.brand.unwrap_or_default(),
            row.location.unwrap_or_default(),
            row.notes.unwrap_or_default(),
            row.quantity.to_string(),
            row.expiry_date.unwrap_or_default(),
            row.production_date.unwrap_or_default(),
            row.medicine_tags.join(";"),
            row.created_at.to_string(),
            row.updated_at.to_string(),
        ];
        let line = fields.iter().map(|f| csv_field(f)).collect::<Vec<String>>().join(",");
        let _ = writeln!(output, "{line}");
    }

    output
}

/// Render items based on selected export format.
pub fn render_items_export(items: &[Item], format: ExportFormat) -> serde_json::Result<String> {
    match format {
        ExportFormat::Json => render_json_export(items),
        ExportFormat::Csv => Ok(render_csv_export(items)),
    }
}

/// Build a deterministic default file name for export flows.
#[must_use]
pub fn suggested_export_file_name(format: ExportFormat, timestamp_ms: i64) -> String {
    format!("larder-export-{timestamp_ms}.{}", format.extension())
}

fn csv_field(value: &str) -> String {
    if value.contains(|c| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn format_day(ms: i64) -> String {
    chrono::Utc
        .timestamp_millis_opt(ms)
        .single()
        .map_or_else(|| ms.to_string(), |dt| dt.format("%Y-%m-%d").to_string())
}
