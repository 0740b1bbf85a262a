//! K-Means customer segmentation and per-segment statistics

use crate::error::SegmentationError;
use crate::features::{self, FeatureVector, NormalizationParams, CLUSTERING_FEATURES};
use crate::schema::{CanonicalRecord, Column, Customer, SegmentId};
use chrono::{DateTime, Utc};
use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;

/// Labels and centroids produced by a clustering strategy
#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    /// One label in `[0, k)` per input vector
    pub labels: Vec<SegmentId>,
    /// Final centroids, indexed by label
    pub centroids: Vec<FeatureVector>,
    /// Within-cluster sum of squares
    pub inertia: f64,
}

impl ClusterAssignment {
    /// Number of vectors assigned to each of `k` clusters
    pub fn cluster_sizes(&self, k: usize) -> Vec<usize> {
        let mut sizes = vec![0; k];
        for &label in &self.labels {
            if label < k {
                sizes[label] += 1;
            }
        }
        sizes
    }
}

/// Partitions normalized vectors into `k` segments
pub trait ClusteringStrategy {
    fn cluster(
        &self,
        vectors: &[FeatureVector],
        k: usize,
        max_iterations: usize,
    ) -> crate::Result<ClusterAssignment>;
}

/// Check clustering inputs and return the vector dimension
pub fn validate_inputs(vectors: &[FeatureVector], k: usize, max_iterations: usize) -> crate::Result<usize> {
    if k == 0 {
        return Err(SegmentationError::InvalidParameter(
            "number of clusters must be at least 1".to_string(),
        ));
    }
    if max_iterations == 0 {
        return Err(SegmentationError::InvalidParameter(
            "maximum iterations must be at least 1".to_string(),
        ));
    }
    let first = vectors.first().ok_or_else(|| {
        SegmentationError::EmptyDataset("clustering requires at least one record".to_string())
    })?;
    let dim = first.len();
    if dim == 0 {
        return Err(SegmentationError::InvalidParameter(
            "feature vectors must not be empty".to_string(),
        ));
    }
    if let Some((index, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dim) {
        return Err(SegmentationError::InvalidParameter(format!(
            "vector {index} has {} dimensions, expected {dim}",
            v.len()
        )));
    }
    if vectors.len() < k {
        return Err(SegmentationError::InvalidParameter(format!(
            "Number of data points ({}) must be at least equal to number of clusters ({})",
            vectors.len(),
            k
        )));
    }
    Ok(dim)
}

/// Seeded K-Means backed by linfa; identical seeds give identical partitions
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansStrategy {
    pub seed: u64,
    pub tolerance: f64,
    pub n_runs: usize,
}

impl Default for KMeansStrategy {
    fn default() -> Self {
        Self {
            seed: 42,
            tolerance: 1e-4,
            n_runs: 10,
        }
    }
}

impl KMeansStrategy {
    pub fn new(seed: u64, tolerance: f64) -> Self {
        Self {
            seed,
            tolerance,
            ..Self::default()
        }
    }
}

impl ClusteringStrategy for KMeansStrategy {
    fn cluster(
        &self,
        vectors: &[FeatureVector],
        k: usize,
        max_iterations: usize,
    ) -> crate::Result<ClusterAssignment> {
        let dim = validate_inputs(vectors, k, max_iterations)?;

        let flat: Vec<f64> = vectors.iter().flat_map(|v| v.as_slice().iter().copied()).collect();
        let features = Array2::from_shape_vec((vectors.len(), dim), flat)
            .map_err(|e| SegmentationError::InvalidParameter(e.to_string()))?;

        // Dummy targets for unsupervised learning
        let targets: Array1<usize> = Array1::zeros(vectors.len());
        let dataset = Dataset::new(features.clone(), targets);

        let model = KMeans::params_with(k, StdRng::seed_from_u64(self.seed), L2Dist)
            .max_n_iterations(max_iterations as u64)
            .tolerance(self.tolerance)
            .n_runs(self.n_runs)
            .fit(&dataset)
            .map_err(|e| SegmentationError::Clustering(e.to_string()))?;

        let labels: Array1<usize> = model.predict(&features);
        let labels = labels.to_vec();
        let centroids: Vec<FeatureVector> = model
            .centroids()
            .outer_iter()
            .map(|row| FeatureVector::new(row.to_vec()))
            .collect();

        Ok(ClusterAssignment {
            inertia: inertia(vectors, &labels, &centroids),
            labels,
            centroids,
        })
    }
}

/// Within-cluster sum of squared distances to the assigned centroid
pub fn inertia(vectors: &[FeatureVector], labels: &[SegmentId], centroids: &[FeatureVector]) -> f64 {
    vectors
        .iter()
        .zip(labels)
        .filter_map(|(vector, &label)| centroids.get(label).map(|c| vector.distance(c).powi(2)))
        .sum()
}

/// Mean silhouette coefficient over the first `sample_size` points.
///
/// A point alone in its cluster scores against a cohesion of 0; a sample with
/// a single cluster scores 0.
pub fn silhouette_sample(vectors: &[FeatureVector], labels: &[SegmentId], sample_size: usize) -> f64 {
    let n = vectors.len().min(labels.len()).min(sample_size);
    if n < 2 {
        return 0.0;
    }

    let score = |i: usize| -> f64 {
        // label -> (distance sum, count) over every other sampled point
        let mut by_label: BTreeMap<SegmentId, (f64, usize)> = BTreeMap::new();
        for j in (0..n).filter(|&j| j != i) {
            let entry = by_label.entry(labels[j]).or_insert((0.0, 0));
            entry.0 += vectors[i].distance(&vectors[j]);
            entry.1 += 1;
        }

        let mean = |(sum, count): (f64, usize)| sum / count as f64;
        let cohesion = by_label.remove(&labels[i]).map_or(0.0, mean);
        let separation = by_label.into_values().map(mean).fold(f64::INFINITY, f64::min);

        let scale = cohesion.max(separation);
        if separation.is_infinite() || scale == 0.0 {
            0.0
        } else {
            (separation - cohesion) / scale
        }
    };

    (0..n).map(score).sum::<f64>() / n as f64
}

/// Aggregate statistics for the customers sharing one cluster label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub segment_id: SegmentId,
    pub name: String,
    pub description: String,
    pub customer_count: usize,
    pub avg_income: f64,
    pub avg_spending: f64,
    pub avg_wines: f64,
    pub avg_web_purchases: f64,
    /// Percentage (0-100) of campaign offers accepted
    pub response_rate: f64,
    pub updated_at: DateTime<Utc>,
}

/// Canned description from income, spending, and response tiers
pub fn describe_segment(avg_income: f64, avg_spending: f64, response_rate: f64) -> String {
    let income = if avg_income > 75_000.0 {
        "High-income customers"
    } else if avg_income > 40_000.0 {
        "Mid-income customers"
    } else {
        "Budget-conscious customers"
    };

    let spending = if avg_spending > 1_000.0 {
        "high spenders"
    } else {
        "moderate spenders"
    };

    let response = if response_rate > 15.0 {
        "highly responsive to campaigns"
    } else if response_rate > 8.0 {
        "moderately responsive to campaigns"
    } else {
        "low campaign engagement"
    };

    format!("{income}, {spending}, {response}")
}

fn mean_of(records: &[&CanonicalRecord], value: impl Fn(&CanonicalRecord) -> f64) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    records.iter().map(|r| value(*r)).sum::<f64>() / records.len() as f64
}

/// Recompute every segment from scratch over the labeled customers
pub fn compute_segments(customers: &[Customer]) -> Vec<Segment> {
    let mut groups: BTreeMap<SegmentId, Vec<&CanonicalRecord>> = BTreeMap::new();
    for customer in customers {
        if let Some(segment) = customer.segment {
            groups.entry(segment).or_default().push(&customer.record);
        }
    }

    let now = Utc::now();
    groups
        .into_iter()
        .map(|(segment_id, records)| {
            let count = records.len() as f64;
            let avg_income = mean_of(&records, |r| r.number(Column::Income));
            let avg_spending = mean_of(&records, CanonicalRecord::total_spending);
            let avg_wines = mean_of(&records, |r| r.number(Column::MntWines));
            let avg_web_purchases = mean_of(&records, |r| r.number(Column::NumWebPurchases));
            let accepted: f64 = records.iter().map(|r| r.total_campaigns()).sum();
            let response_rate = accepted / (count * Column::CAMPAIGNS.len() as f64) * 100.0;

            Segment {
                segment_id,
                name: format!("Segment {segment_id}"),
                description: describe_segment(avg_income, avg_spending, response_rate),
                customer_count: records.len(),
                avg_income,
                avg_spending,
                avg_wines,
                avg_web_purchases,
                response_rate,
                updated_at: now,
            }
        })
        .collect()
}

/// Result of a full clustering run over the stored customers
#[derive(Debug, Clone)]
pub struct ClusteringOutcome {
    /// Customers with their new segment labels
    pub customers: Vec<Customer>,
    pub segments: Vec<Segment>,
    pub num_clusters: usize,
    pub cluster_sizes: Vec<usize>,
    pub inertia: f64,
    pub silhouette: f64,
    /// Normalization used for this run only; prediction models compute their own
    pub normalization: NormalizationParams,
    pub processing_time_ms: u64,
}

/// Label every customer and rebuild the segment table
pub fn segment_customers(
    mut customers: Vec<Customer>,
    strategy: &dyn ClusteringStrategy,
    k: usize,
    max_iterations: usize,
) -> crate::Result<ClusteringOutcome> {
    let start_time = Instant::now();

    let records: Vec<&CanonicalRecord> = customers.iter().map(|c| &c.record).collect();
    let normalization = features::compute_normalization_params(&records, &CLUSTERING_FEATURES)?;
    let vectors = records
        .iter()
        .map(|r| features::vectorize(r, &CLUSTERING_FEATURES, &normalization))
        .collect::<crate::Result<Vec<_>>>()?;

    let assignment = strategy.cluster(&vectors, k, max_iterations)?;

    for (customer, &label) in customers.iter_mut().zip(&assignment.labels) {
        customer.segment = Some(label);
    }

    let segments = compute_segments(&customers);
    let cluster_sizes = assignment.cluster_sizes(k);
    let silhouette = silhouette_sample(&vectors, &assignment.labels, 100);
    let processing_time_ms = start_time.elapsed().as_millis() as u64;

    info!(
        customers = customers.len(),
        segments = segments.len(),
        inertia = assignment.inertia,
        "Clustering completed in {}ms",
        processing_time_ms
    );

    Ok(ClusteringOutcome {
        customers,
        segments,
        num_clusters: k,
        cluster_sizes,
        inertia: assignment.inertia,
        silhouette,
        normalization,
        processing_time_ms,
    })
}
