//! Column reconciliation: maps uploaded column names onto the canonical schema

use crate::data::{RawDataset, RawRow};
use crate::error::SegmentationError;
use crate::schema::{CanonicalRecord, Column};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Uploaded column name -> canonical column
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnMapping(BTreeMap<String, Column>);

impl ColumnMapping {
    pub fn get(&self, uploaded: &str) -> Option<Column> {
        self.0.get(uploaded).copied()
    }

    /// Canonical columns covered by at least one uploaded column
    pub fn mapped_columns(&self) -> BTreeSet<Column> {
        self.0.values().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Column)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Outcome of checking a mapping against the required column set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub detected: Vec<Column>,
    pub missing_required: Vec<Column>,
    pub missing_optional: Vec<Column>,
}

impl ValidationResult {
    /// Turn an invalid verdict into a [`SegmentationError::Validation`]
    pub fn into_result(self) -> crate::Result<Self> {
        if self.valid {
            return Ok(self);
        }
        Err(SegmentationError::Validation {
            missing: self.missing_required.iter().map(|c| c.name().to_string()).collect(),
            required: Column::REQUIRED.iter().map(|c| c.name().to_string()).collect(),
        })
    }
}

/// Canonical records produced from one uploaded dataset
#[derive(Debug, Clone)]
pub struct ReconciledDataset {
    pub records: Vec<CanonicalRecord>,
    pub mapping: ColumnMapping,
    pub validation: ValidationResult,
    /// Rows dropped because a required value was null
    pub skipped_rows: usize,
}

/// Map uploaded column names to canonical columns.
///
/// Matching is case-insensitive on trimmed names; unmatched columns are dropped.
pub fn map_columns<'a, I>(uploaded: I) -> ColumnMapping
where
    I: IntoIterator<Item = &'a str>,
{
    let mut mapping = BTreeMap::new();
    for name in uploaded {
        match Column::resolve(name) {
            Some(column) => {
                info!("Mapped column '{}' to '{}'", name, column);
                mapping.insert(name.to_string(), column);
            }
            None => debug!("Dropping unrecognized column '{}'", name),
        }
    }
    ColumnMapping(mapping)
}

/// Check that every required column has been mapped
pub fn validate_columns(mapping: &ColumnMapping) -> ValidationResult {
    let mapped = mapping.mapped_columns();
    let mut detected = Vec::new();
    let mut missing_required = Vec::new();
    let mut missing_optional = Vec::new();

    for column in Column::REQUIRED {
        if mapped.contains(&column) {
            detected.push(column);
        } else {
            missing_required.push(column);
        }
    }

    for column in Column::ALL.into_iter().filter(|c| !c.is_required()) {
        if mapped.contains(&column) {
            detected.push(column);
        } else {
            missing_optional.push(column);
        }
    }

    ValidationResult {
        valid: missing_required.is_empty(),
        detected,
        missing_required,
        missing_optional,
    }
}

/// Re-key a raw row by canonical column and fill defaults for absent columns
pub fn normalize_row(row: &RawRow, mapping: &ColumnMapping) -> CanonicalRecord {
    let mut record = CanonicalRecord::new();
    for (uploaded, value) in row {
        if let Some(column) = mapping.get(uploaded) {
            record.insert(column, value.clone());
        }
    }

    for column in Column::ALL {
        if record.contains(column) {
            continue;
        }
        if let Some(default) = column.default_value() {
            debug!("Using default value for missing column: {}", column);
            record.insert(column, default);
        }
    }

    record
}

/// Rewrite every numeric cell as a finite number.
///
/// Unreadable optional cells fall back to their default and are reported
/// here, once per cell. Returns the required columns with no usable value.
pub fn coerce_numeric_cells(record: &mut CanonicalRecord, row: usize) -> Vec<Column> {
    let mut unusable = Vec::new();
    for column in Column::ALL.into_iter().filter(|c| c.is_numeric()) {
        let Some(value) = record.get(column).cloned() else {
            continue;
        };
        match value.to_number() {
            Some(number) => record.insert(column, number),
            None if column.is_required() => unusable.push(column),
            None => {
                if !value.is_null() {
                    warn!(row, column = %column, value = ?value, "Unreadable numeric value, using default");
                }
                if let Some(default) = column.default_value() {
                    record.insert(column, default);
                }
            }
        }
    }
    unusable
}

/// Map, validate, and normalize a whole dataset
pub fn reconcile(dataset: &RawDataset) -> crate::Result<ReconciledDataset> {
    if dataset.rows.is_empty() {
        return Err(SegmentationError::EmptyDataset(
            "file is empty or contains no valid data".to_string(),
        ));
    }

    let mapping = map_columns(dataset.columns.iter().map(String::as_str));
    let validation = validate_columns(&mapping).into_result()?;

    let mut records = Vec::with_capacity(dataset.rows.len());
    let mut skipped_rows = 0;
    for (index, row) in dataset.rows.iter().enumerate() {
        let mut record = normalize_row(row, &mapping);
        let unusable = coerce_numeric_cells(&mut record, index);
        if unusable.is_empty() {
            records.push(record);
        } else {
            warn!(row = index, columns = ?unusable, "Skipping row without usable required values");
            skipped_rows += 1;
        }
    }

    info!(
        records = records.len(),
        skipped_rows,
        missing_optional = validation.missing_optional.len(),
        "Dataset reconciled"
    );

    Ok(ReconciledDataset {
        records,
        mapping,
        validation,
        skipped_rows,
    })
}
