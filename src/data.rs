//! Dataset sources: CSV via Polars and JSON via serde_json

use crate::error::SegmentationError;
use crate::schema::FieldValue;
use polars::prelude::*;
use std::path::Path;
use tracing::info;

/// One uploaded row: raw column name -> value, in column order
pub type RawRow = Vec<(String, FieldValue)>;

/// Raw records as produced by a dataset source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDataset {
    /// Distinct column names in first-seen order
    pub columns: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl RawDataset {
    /// Build a dataset from rows, collecting the distinct column names
    pub fn from_rows(rows: Vec<RawRow>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for (name, _) in row {
                if !columns.contains(name) {
                    columns.push(name.clone());
                }
            }
        }
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Load a dataset, choosing the reader from the file extension
pub fn load_dataset(path: &Path) -> crate::Result<RawDataset> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);

    let dataset = match extension.as_deref() {
        Some("csv") => load_csv(path)?,
        Some("json") => load_json(path)?,
        _ => {
            return Err(SegmentationError::Dataset(format!(
                "unsupported file type for {}. Only CSV and JSON are supported",
                path.display()
            )))
        }
    };

    info!(
        path = %path.display(),
        rows = dataset.len(),
        columns = dataset.columns.len(),
        "Dataset loaded"
    );
    Ok(dataset)
}

/// Read a CSV file with a header row
pub fn load_csv(path: &Path) -> crate::Result<RawDataset> {
    let df = CsvReader::from_path(path)
        .and_then(|reader| reader.has_header(true).finish())
        .map_err(|e| SegmentationError::Dataset(format!("failed to read CSV {}: {e}", path.display())))?;

    dataframe_to_dataset(&df)
        .map_err(|e| SegmentationError::Dataset(format!("failed to convert CSV {}: {e}", path.display())))
}

fn dataframe_to_dataset(df: &DataFrame) -> PolarsResult<RawDataset> {
    let columns: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    let mut rows: Vec<RawRow> = vec![Vec::with_capacity(columns.len()); df.height()];

    for series in df.get_columns() {
        let name = series.name().to_string();
        for (row, value) in rows.iter_mut().zip(series_values(series)?) {
            row.push((name.clone(), value));
        }
    }

    Ok(RawDataset { columns, rows })
}

fn series_values(series: &Series) -> PolarsResult<Vec<FieldValue>> {
    let dtype = series.dtype();
    if dtype.is_numeric() || matches!(dtype, DataType::Boolean) {
        let numbers = series.cast(&DataType::Float64)?;
        let values = numbers
            .f64()?
            .into_iter()
            .map(|v| v.map_or(FieldValue::Null, FieldValue::Number))
            .collect();
        return Ok(values);
    }

    let text = series.cast(&DataType::Utf8)?;
    let values = text
        .utf8()?
        .into_iter()
        .map(|v| match v.map(str::trim) {
            Some(s) if !s.is_empty() => FieldValue::Text(s.to_string()),
            _ => FieldValue::Null,
        })
        .collect();
    Ok(values)
}

/// Read a JSON file holding an array of objects or a single object
pub fn load_json(path: &Path) -> crate::Result<RawDataset> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| SegmentationError::Dataset(format!("failed to read {}: {e}", path.display())))?;
    parse_json(&content)
}

/// Parse JSON text into a raw dataset
pub fn parse_json(content: &str) -> crate::Result<RawDataset> {
    let value: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| SegmentationError::Dataset(format!("invalid JSON: {e}")))?;

    let objects = match value {
        serde_json::Value::Array(items) => items,
        object @ serde_json::Value::Object(_) => vec![object],
        _ => {
            return Err(SegmentationError::Dataset(
                "expected a JSON object or an array of objects".to_string(),
            ))
        }
    };

    let mut rows = Vec::with_capacity(objects.len());
    for item in objects {
        let serde_json::Value::Object(map) = item else {
            return Err(SegmentationError::Dataset(
                "every JSON record must be an object".to_string(),
            ));
        };
        rows.push(map.into_iter().map(|(k, v)| (k, json_to_field(v))).collect());
    }

    Ok(RawDataset::from_rows(rows))
}

fn json_to_field(value: serde_json::Value) -> FieldValue {
    match value {
        serde_json::Value::Null => FieldValue::Null,
        serde_json::Value::Bool(b) => FieldValue::Number(if b { 1.0 } else { 0.0 }),
        serde_json::Value::Number(n) => n.as_f64().map_or(FieldValue::Null, FieldValue::Number),
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                FieldValue::Null
            } else {
                FieldValue::Text(trimmed.to_string())
            }
        }
        other => FieldValue::Text(other.to_string()),
    }
}
