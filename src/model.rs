//! Nearest-centroid segment prediction model

use crate::error::SegmentationError;
use crate::features::{self, Feature, FeatureVector, NormalizationParams, CLUSTERING_FEATURES};
use crate::schema::{CanonicalRecord, Customer, SegmentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Trained centroids plus the normalization they were computed under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub model_id: String,
    pub model_name: String,
    /// Ordered feature list; centroid and input vectors are positional over it
    pub features: Vec<Feature>,
    pub normalization: NormalizationParams,
    pub centroids: BTreeMap<SegmentId, FeatureVector>,
    pub training_size: usize,
    /// Fraction of training records whose nearest centroid is their own segment
    pub training_accuracy: f64,
    pub trained_at: DateTime<Utc>,
    pub training_time_ms: u64,
}

/// Training parameters
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOptions {
    pub model_name: Option<String>,
    pub features: Vec<Feature>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            model_name: None,
            features: CLUSTERING_FEATURES.to_vec(),
        }
    }
}

/// Cooperative cancellation flag shared between a caller and a training run
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            return Err(SegmentationError::Cancelled);
        }
        Ok(())
    }
}

/// Classification of one record against a trained model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub segment: SegmentId,
    /// `1 / (1 + distance)` to the winning centroid
    pub confidence: f64,
    pub distances: BTreeMap<SegmentId, f64>,
    /// Inverse-distance weights normalized to sum to 1
    pub probabilities: BTreeMap<SegmentId, f64>,
    /// Share of each normalized input value in the vector's L1 norm
    pub feature_importance: BTreeMap<Feature, f64>,
}

/// Train a nearest-centroid model on customers labeled by a prior clustering run
pub fn train(customers: &[Customer], options: &TrainOptions, cancel: &CancelToken) -> crate::Result<TrainedModel> {
    let start_time = Instant::now();

    if customers.is_empty() {
        return Err(SegmentationError::EmptyDataset(
            "no customer data found".to_string(),
        ));
    }

    let mut feature_list: Vec<Feature> = Vec::with_capacity(options.features.len());
    for &feature in &options.features {
        if !feature_list.contains(&feature) {
            feature_list.push(feature);
        }
    }
    if feature_list.is_empty() {
        return Err(SegmentationError::InvalidParameter(
            "at least one feature is required".to_string(),
        ));
    }

    let labeled: Vec<(SegmentId, &CanonicalRecord)> = customers
        .iter()
        .filter_map(|c| c.segment.map(|s| (s, &c.record)))
        .collect();
    if labeled.is_empty() {
        return Err(SegmentationError::NoLabeledData);
    }
    info!("Found {} customers with assigned segments", labeled.len());

    let records: Vec<&CanonicalRecord> = labeled.iter().map(|(_, r)| *r).collect();
    let normalization = features::compute_normalization_params(&records, &feature_list)?;

    let mut groups: BTreeMap<SegmentId, Vec<FeatureVector>> = BTreeMap::new();
    let mut vectors = Vec::with_capacity(labeled.len());
    for &(segment, record) in &labeled {
        let vector = features::vectorize(record, &feature_list, &normalization)?;
        groups.entry(segment).or_default().push(vector.clone());
        vectors.push((segment, vector));
    }

    let mut centroids = BTreeMap::new();
    for (segment, members) in &groups {
        cancel.check()?;
        if let Some(centroid) = FeatureVector::mean(members) {
            info!("Segment {} centroid calculated from {} customers", segment, members.len());
            centroids.insert(*segment, centroid);
        }
    }
    cancel.check()?;

    let correct = vectors
        .iter()
        .filter(|(segment, vector)| nearest_centroid(&centroids, vector).map(|(s, _)| s) == Some(*segment))
        .count();
    let training_accuracy = correct as f64 / vectors.len() as f64;

    let trained_at = Utc::now();
    let model = TrainedModel {
        model_id: uuid::Uuid::new_v4().to_string(),
        model_name: options
            .model_name
            .clone()
            .unwrap_or_else(|| format!("PredictionModel_{}", trained_at.format("%Y%m%d_%H%M%S"))),
        features: feature_list,
        normalization,
        centroids,
        training_size: labeled.len(),
        training_accuracy,
        trained_at,
        training_time_ms: start_time.elapsed().as_millis() as u64,
    };

    info!(
        model_id = %model.model_id,
        segments = model.centroids.len(),
        accuracy = training_accuracy,
        "Prediction model trained in {}ms",
        model.training_time_ms
    );
    Ok(model)
}

/// Closest centroid; ties go to the lowest segment id
fn nearest_centroid(
    centroids: &BTreeMap<SegmentId, FeatureVector>,
    vector: &FeatureVector,
) -> Option<(SegmentId, f64)> {
    let mut best: Option<(SegmentId, f64)> = None;
    for (&segment, centroid) in centroids {
        let distance = vector.distance(centroid);
        match best {
            Some((_, min_distance)) if distance >= min_distance => {}
            _ => best = Some((segment, distance)),
        }
    }
    best
}

impl TrainedModel {
    pub fn num_segments(&self) -> usize {
        self.centroids.len()
    }

    /// Vectorize a record with this model's stored normalization
    pub fn vectorize(&self, record: &CanonicalRecord) -> crate::Result<FeatureVector> {
        features::vectorize(record, &self.features, &self.normalization)
    }

    /// Classify a record by nearest centroid
    pub fn classify(&self, record: &CanonicalRecord) -> crate::Result<Classification> {
        let input = self.vectorize(record)?;
        self.classify_vector(&input)
    }

    /// Classify an already normalized vector
    pub fn classify_vector(&self, input: &FeatureVector) -> crate::Result<Classification> {
        if input.len() != self.features.len() {
            return Err(SegmentationError::InvalidParameter(format!(
                "input has {} dimensions, model expects {}",
                input.len(),
                self.features.len()
            )));
        }
        if let Some((feature, value)) = self
            .features
            .iter()
            .zip(input.as_slice())
            .find(|(_, value)| !value.is_finite())
        {
            return Err(SegmentationError::InvalidParameter(format!(
                "{feature} must be a finite number, got {value}"
            )));
        }

        let (segment, min_distance) = nearest_centroid(&self.centroids, input).ok_or_else(|| {
            SegmentationError::Persistence(format!("model {} has no centroids", self.model_id))
        })?;
        if !min_distance.is_finite() {
            return Err(SegmentationError::InvalidParameter(
                "input values are too large to compare with the model centroids".to_string(),
            ));
        }

        let distances: BTreeMap<SegmentId, f64> = self
            .centroids
            .iter()
            .map(|(&s, centroid)| (s, input.distance(centroid)))
            .collect();

        let total_inverse: f64 = distances.values().map(|d| 1.0 / (1.0 + d)).sum();
        let probabilities = distances
            .iter()
            .map(|(&s, d)| (s, (1.0 / (1.0 + d)) / total_inverse))
            .collect();

        let feature_importance = feature_importance(&self.features, input);
        let confidence = 1.0 / (1.0 + min_distance);
        debug!(segment, confidence, "Classified input");

        Ok(Classification {
            segment,
            confidence,
            distances,
            probabilities,
            feature_importance,
        })
    }
}

fn feature_importance(features: &[Feature], input: &FeatureVector) -> BTreeMap<Feature, f64> {
    let total: f64 = input.as_slice().iter().map(|v| v.abs()).sum();
    features
        .iter()
        .zip(input.as_slice())
        .map(|(&feature, value)| {
            let importance = if total > 0.0 {
                value.abs() / total
            } else {
                1.0 / features.len() as f64
            };
            (feature, importance)
        })
        .collect()
}

/// Audit entry written for every inference call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub prediction_id: String,
    pub model_id: String,
    pub predicted_segment: SegmentId,
    pub confidence: f64,
    /// JSON of the raw input record
    pub input: String,
    /// JSON of `{"segments": probabilities, "distances": distances}`
    pub probabilities: String,
    pub predicted_at: DateTime<Utc>,
}

impl PredictionRecord {
    pub fn new(model_id: &str, input: &CanonicalRecord, classification: &Classification) -> crate::Result<Self> {
        let probabilities = serde_json::json!({
            "segments": classification.probabilities,
            "distances": classification.distances,
        });
        Ok(Self {
            prediction_id: uuid::Uuid::new_v4().to_string(),
            model_id: model_id.to_string(),
            predicted_segment: classification.segment,
            confidence: classification.confidence,
            input: serde_json::to_string(input)?,
            probabilities: serde_json::to_string(&probabilities)?,
            predicted_at: Utc::now(),
        })
    }
}
