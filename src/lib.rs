//! SegForge: customer segmentation with K-Means and a nearest-centroid predictor
//!
//! Uploaded customer files are reconciled onto a canonical column schema,
//! clustered into segments, and summarized. A lightweight prediction model
//! memorizes per-segment centroids so new customers can be classified without
//! rerunning the clustering.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod insights;
pub mod model;
pub mod reconcile;
pub mod schema;
pub mod service;
pub mod store;

// Re-export public items for easier access
pub use cli::{Args, Command};
pub use cluster::{ClusteringOutcome, ClusteringStrategy, KMeansStrategy, Segment};
pub use config::Config;
pub use data::{load_dataset, RawDataset};
pub use error::SegmentationError;
pub use features::{Feature, FeatureVector, NormalizationParams};
pub use model::{CancelToken, Classification, PredictionRecord, TrainOptions, TrainedModel};
pub use insights::Dashboard;
pub use schema::{CanonicalRecord, Column, Customer, CustomerFilter, FieldValue, SegmentId};
pub use service::{FileService, InMemoryService, PredictionOutcome, SegmentationService};
pub use store::{FileModelStore, FileStore, InMemoryModelStore, InMemoryStore, ModelStore, ModelSummary};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, SegmentationError>;
