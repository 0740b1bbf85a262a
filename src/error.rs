//! Error taxonomy for the segmentation engine

use thiserror::Error;

/// Errors surfaced by ingestion, clustering, training, and prediction.
///
/// Every variant carries enough detail to render a specific message; use
/// [`SegmentationError::kind`] for a stable machine readable code.
#[derive(Debug, Error)]
pub enum SegmentationError {
    /// Required columns are missing from an uploaded dataset
    #[error(
        "Missing required columns: {}. Please ensure your file contains at least: {}",
        .missing.join(", "),
        .required.join(", ")
    )]
    Validation {
        missing: Vec<String>,
        required: Vec<String>,
    },

    /// A feature name outside the registered vocabulary
    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    /// Clustering or training invoked on zero records
    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    /// Training invoked before any clustering run produced labels
    #[error("No customers with assigned segments found. Please run clustering first.")]
    NoLabeledData,

    /// Inference invoked before any successful training
    #[error("No active model found. Please train a model first.")]
    NoActiveModel,

    /// Model store or collaborator store read/write failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Out of range argument (cluster count, iterations, vector shape)
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The clustering backend rejected the input
    #[error("Clustering failed: {0}")]
    Clustering(String),

    /// Dataset source could not be read
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Caller tripped the cancel token
    #[error("Operation cancelled")]
    Cancelled,
}

impl SegmentationError {
    /// Stable code for this error's kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::UnknownFeature(_) => "unknown_feature",
            Self::EmptyDataset(_) => "empty_dataset",
            Self::NoLabeledData => "no_labeled_data",
            Self::NoActiveModel => "no_active_model",
            Self::Persistence(_) => "persistence_error",
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::Clustering(_) => "clustering_error",
            Self::Dataset(_) => "dataset_error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the user can fix this by changing their input
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::UnknownFeature(_)
                | Self::EmptyDataset(_)
                | Self::NoLabeledData
                | Self::NoActiveModel
                | Self::InvalidParameter(_)
                | Self::Dataset(_)
        )
    }

    pub(crate) fn persistence(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Persistence(format!("{context}: {err}"))
    }
}

impl From<std::io::Error> for SegmentationError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for SegmentationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}
