//! Feature extraction and min-max normalization

use crate::error::SegmentationError;
use crate::schema::{CanonicalRecord, Column};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Numeric features a model can be built on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Feature {
    Income,
    MntWines,
    MntFruits,
    MntMeatProducts,
    MntFishProducts,
    MntSweetProducts,
    MntGoldProds,
    NumWebPurchases,
    NumCatalogPurchases,
    NumStorePurchases,
    TotalSpending,
    TotalCampaigns,
}

/// Registration entry: a feature, its name, and how to extract it
struct FeatureSpec {
    feature: Feature,
    name: &'static str,
    extract: fn(&CanonicalRecord) -> f64,
}

static REGISTRY: [FeatureSpec; 12] = [
    FeatureSpec { feature: Feature::Income, name: "Income", extract: |r| r.number(Column::Income) },
    FeatureSpec { feature: Feature::MntWines, name: "MntWines", extract: |r| r.number(Column::MntWines) },
    FeatureSpec { feature: Feature::MntFruits, name: "MntFruits", extract: |r| r.number(Column::MntFruits) },
    FeatureSpec {
        feature: Feature::MntMeatProducts,
        name: "MntMeatProducts",
        extract: |r| r.number(Column::MntMeatProducts),
    },
    FeatureSpec {
        feature: Feature::MntFishProducts,
        name: "MntFishProducts",
        extract: |r| r.number(Column::MntFishProducts),
    },
    FeatureSpec {
        feature: Feature::MntSweetProducts,
        name: "MntSweetProducts",
        extract: |r| r.number(Column::MntSweetProducts),
    },
    FeatureSpec { feature: Feature::MntGoldProds, name: "MntGoldProds", extract: |r| r.number(Column::MntGoldProds) },
    FeatureSpec {
        feature: Feature::NumWebPurchases,
        name: "NumWebPurchases",
        extract: |r| r.number(Column::NumWebPurchases),
    },
    FeatureSpec {
        feature: Feature::NumCatalogPurchases,
        name: "NumCatalogPurchases",
        extract: |r| r.number(Column::NumCatalogPurchases),
    },
    FeatureSpec {
        feature: Feature::NumStorePurchases,
        name: "NumStorePurchases",
        extract: |r| r.number(Column::NumStorePurchases),
    },
    FeatureSpec { feature: Feature::TotalSpending, name: "TotalSpending", extract: CanonicalRecord::total_spending },
    FeatureSpec { feature: Feature::TotalCampaigns, name: "TotalCampaigns", extract: CanonicalRecord::total_campaigns },
];

/// Features used for clustering and as the default prediction feature list
pub const CLUSTERING_FEATURES: [Feature; 8] = [
    Feature::Income,
    Feature::MntWines,
    Feature::MntMeatProducts,
    Feature::MntFishProducts,
    Feature::NumWebPurchases,
    Feature::NumCatalogPurchases,
    Feature::NumStorePurchases,
    Feature::TotalCampaigns,
];

impl Feature {
    fn spec(self) -> &'static FeatureSpec {
        // REGISTRY is declared in enum order
        &REGISTRY[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    /// Raw (unnormalized) value of this feature for a record
    pub fn extract(self, record: &CanonicalRecord) -> f64 {
        (self.spec().extract)(record)
    }

    pub fn all() -> impl Iterator<Item = Feature> {
        REGISTRY.iter().map(|spec| spec.feature)
    }

    /// Parse a comma separated feature list such as `"Income, MntWines"`
    pub fn parse_list(list: &str) -> crate::Result<Vec<Feature>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Feature::from_str)
            .collect()
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Feature {
    type Err = SegmentationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        REGISTRY
            .iter()
            .find(|spec| spec.name.eq_ignore_ascii_case(wanted))
            .map(|spec| spec.feature)
            .ok_or_else(|| SegmentationError::UnknownFeature(s.to_string()))
    }
}

/// Observed range of one feature over a reference dataset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMax {
    pub min: f64,
    pub max: f64,
}

impl MinMax {
    /// Scale into [0, 1] over the observed range.
    ///
    /// Values outside the range are not clamped. A zero-width range maps
    /// everything to 0.5.
    pub fn normalize(&self, value: f64) -> f64 {
        if self.max == self.min {
            return 0.5;
        }
        (value - self.min) / (self.max - self.min)
    }

    pub fn is_degenerate(&self) -> bool {
        self.max == self.min
    }
}

/// Per-feature normalization ranges, frozen once computed
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizationParams(BTreeMap<Feature, MinMax>);

impl NormalizationParams {
    pub fn get(&self, feature: Feature) -> Option<&MinMax> {
        self.0.get(&feature)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Feature, &MinMax)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Feature, MinMax)> for NormalizationParams {
    fn from_iter<I: IntoIterator<Item = (Feature, MinMax)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Positional vector aligned with an ordered feature list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Euclidean distance to another vector of the same length
    pub fn distance(&self, other: &FeatureVector) -> f64 {
        euclidean_distance(&self.0, &other.0)
    }

    /// Element-wise mean of a non-empty set of equal-length vectors
    pub fn mean<'a, I>(vectors: I) -> Option<FeatureVector>
    where
        I: IntoIterator<Item = &'a FeatureVector>,
    {
        let mut iter = vectors.into_iter();
        let first = iter.next()?;
        let mut sum = first.0.clone();
        let mut count = 1usize;
        for v in iter {
            for (acc, x) in sum.iter_mut().zip(&v.0) {
                *acc += x;
            }
            count += 1;
        }
        Some(FeatureVector(sum.into_iter().map(|s| s / count as f64).collect()))
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// Calculate Euclidean distance between two points
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Compute per-feature min/max over a dataset
pub fn compute_normalization_params(
    records: &[&CanonicalRecord],
    features: &[Feature],
) -> crate::Result<NormalizationParams> {
    if records.is_empty() {
        return Err(SegmentationError::EmptyDataset(
            "cannot compute normalization parameters over zero records".to_string(),
        ));
    }

    let params: NormalizationParams = features
        .iter()
        .map(|&feature| {
            let (min, max) = records
                .iter()
                .map(|r| feature.extract(r))
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
            let range = MinMax { min, max };
            if range.is_degenerate() {
                warn!(feature = %feature, value = min, "Feature has zero variance, normalizing to 0.5");
            } else {
                debug!("Feature '{}': min={}, max={}", feature, min, max);
            }
            (feature, range)
        })
        .collect();

    Ok(params)
}

/// Build a normalized vector for one record against frozen parameters
pub fn vectorize(
    record: &CanonicalRecord,
    features: &[Feature],
    params: &NormalizationParams,
) -> crate::Result<FeatureVector> {
    features
        .iter()
        .map(|&feature| -> crate::Result<f64> {
            let range = params.get(feature).ok_or_else(|| {
                SegmentationError::Persistence(format!("normalization parameters missing feature {feature}"))
            })?;
            Ok(range.normalize(feature.extract(record)))
        })
        .collect::<crate::Result<Vec<f64>>>()
        .map(FeatureVector::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(income: f64, wines: f64) -> CanonicalRecord {
        CanonicalRecord::new()
            .with(Column::Income, income)
            .with(Column::MntWines, wines)
    }

    #[test]
    fn test_registry_matches_enum_order() {
        for (index, spec) in REGISTRY.iter().enumerate() {
            assert_eq!(spec.feature as usize, index);
            assert_eq!(spec.feature.to_string(), spec.name);
        }
    }

    #[test]
    fn test_parse_feature_names() {
        assert_eq!("income".parse::<Feature>().unwrap(), Feature::Income);
        assert_eq!(" TOTALSPENDING ".parse::<Feature>().unwrap(), Feature::TotalSpending);
        assert!(matches!(
            "Height".parse::<Feature>(),
            Err(SegmentationError::UnknownFeature(_))
        ));
        assert_eq!(
            Feature::parse_list("Income, mntwines,").unwrap(),
            vec![Feature::Income, Feature::MntWines]
        );
    }

    #[test]
    fn test_range_endpoints_normalize_to_zero_and_one() {
        let records = [record(10.0, 0.0), record(50.0, 50.0), record(90.0, 100.0)];
        let refs: Vec<&CanonicalRecord> = records.iter().collect();
        let params = compute_normalization_params(&refs, &[Feature::Income, Feature::MntWines]).unwrap();

        let income = params.get(Feature::Income).unwrap();
        assert_eq!(income.normalize(10.0), 0.0);
        assert_eq!(income.normalize(90.0), 1.0);
        assert_eq!(income.normalize(50.0), 0.5);
    }

    #[test]
    fn test_degenerate_feature_normalizes_to_half() {
        let records = [record(10.0, 7.0), record(20.0, 7.0)];
        let refs: Vec<&CanonicalRecord> = records.iter().collect();
        let params = compute_normalization_params(&refs, &[Feature::MntWines]).unwrap();

        let wines = params.get(Feature::MntWines).unwrap();
        assert!(wines.is_degenerate());
        assert_eq!(wines.normalize(7.0), 0.5);
        assert_eq!(wines.normalize(1e6), 0.5);
    }

    #[test]
    fn test_vectorize_does_not_clamp() {
        let records = [record(10.0, 0.0), record(20.0, 10.0)];
        let refs: Vec<&CanonicalRecord> = records.iter().collect();
        let features = [Feature::Income, Feature::MntWines];
        let params = compute_normalization_params(&refs, &features).unwrap();

        let v = vectorize(&record(30.0, -10.0), &features, &params).unwrap();
        assert_eq!(v.as_slice(), &[2.0, -1.0]);
    }

    #[test]
    fn test_vectorize_missing_values_count_as_zero() {
        let records = [record(0.0, 0.0), record(100.0, 10.0)];
        let refs: Vec<&CanonicalRecord> = records.iter().collect();
        let params = compute_normalization_params(&refs, &[Feature::Income, Feature::TotalSpending]).unwrap();

        let v = vectorize(&CanonicalRecord::new(), &[Feature::Income, Feature::TotalSpending], &params).unwrap();
        assert_eq!(v.as_slice(), &[0.0, 0.0]);
    }

    #[test]
    fn test_empty_records_rejected() {
        let result = compute_normalization_params(&[], &[Feature::Income]);
        assert!(matches!(result, Err(SegmentationError::EmptyDataset(_))));
    }

    #[test]
    fn test_vector_mean_and_distance() {
        let a = FeatureVector::new(vec![0.0, 0.0]);
        let b = FeatureVector::new(vec![3.0, 4.0]);
        assert_eq!(a.distance(&b), 5.0);

        let mean = FeatureVector::mean([&a, &b]).unwrap();
        assert_eq!(mean.as_slice(), &[1.5, 2.0]);
        assert!(FeatureVector::mean(std::iter::empty()).is_none());
    }

    #[test]
    fn test_params_serialize_by_feature_name() {
        let params: NormalizationParams = [(Feature::Income, MinMax { min: 1.0, max: 2.0 })].into_iter().collect();
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"Income":{"min":1.0,"max":2.0}}"#);
    }
}
