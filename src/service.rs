//! Orchestration of ingest, clustering, training, and prediction over the stores

use crate::cluster::{self, ClusteringOutcome, ClusteringStrategy, KMeansStrategy, Segment};
use crate::config::Config;
use crate::data::RawDataset;
use crate::error::SegmentationError;
use crate::features::Feature;
use crate::insights::{self, Dashboard, Insight};
use crate::model::{self, CancelToken, PredictionRecord, TrainOptions, TrainedModel};
use crate::reconcile::{self, ColumnMapping, ValidationResult};
use crate::schema::{CanonicalRecord, Customer, CustomerFilter, SegmentId};
use crate::store::{
    CustomerStore, FileModelStore, FileStore, InMemoryModelStore, InMemoryStore, ModelStore, ModelSummary,
    PredictionLog, SegmentStore,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Summary of one ingested dataset
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub records_processed: usize,
    pub skipped_rows: usize,
    pub mapping: ColumnMapping,
    pub validation: ValidationResult,
}

/// Prediction for one customer, enriched with its segment profile
#[derive(Debug, Clone, Serialize)]
pub struct PredictionOutcome {
    pub prediction_id: String,
    pub model_id: String,
    pub segment: SegmentId,
    pub segment_name: String,
    pub segment_description: String,
    pub confidence: f64,
    pub probabilities: BTreeMap<SegmentId, f64>,
    pub distances: BTreeMap<SegmentId, f64>,
    pub feature_importance: BTreeMap<Feature, f64>,
    pub recommendation: String,
}

/// Segmentation engine bound to its persistence collaborators
pub struct SegmentationService<M, C, S, P> {
    models: M,
    customers: C,
    segments: S,
    predictions: P,
    strategy: Box<dyn ClusteringStrategy + Send + Sync>,
}

/// Service backed by the JSON files in a data directory
pub type FileService = SegmentationService<FileModelStore, Arc<FileStore>, Arc<FileStore>, Arc<FileStore>>;

/// Service with nothing persisted beyond the process
pub type InMemoryService =
    SegmentationService<InMemoryModelStore, Arc<InMemoryStore>, Arc<InMemoryStore>, Arc<InMemoryStore>>;

impl FileService {
    /// Open the file stores named by `config`
    pub fn open(config: &Config) -> crate::Result<Self> {
        let models = FileModelStore::open(&config.model_dir)?;
        let store = Arc::new(FileStore::open(&config.data_dir)?);
        Ok(Self::new(models, store.clone(), store.clone(), store)
            .with_strategy(KMeansStrategy::new(config.seed, config.tolerance)))
    }
}

impl InMemoryService {
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self::new(InMemoryModelStore::new(), store.clone(), store.clone(), store)
    }
}

impl<M, C, S, P> SegmentationService<M, C, S, P>
where
    M: ModelStore,
    C: CustomerStore,
    S: SegmentStore,
    P: PredictionLog,
{
    pub fn new(models: M, customers: C, segments: S, predictions: P) -> Self {
        Self {
            models,
            customers,
            segments,
            predictions,
            strategy: Box::new(KMeansStrategy::default()),
        }
    }

    pub fn with_strategy(mut self, strategy: impl ClusteringStrategy + Send + Sync + 'static) -> Self {
        self.strategy = Box::new(strategy);
        self
    }

    /// Reconcile an uploaded dataset and store its rows as customers
    #[instrument(skip_all, fields(rows = dataset.len()))]
    pub fn ingest(&self, dataset: &RawDataset) -> crate::Result<IngestReport> {
        let reconciled = reconcile::reconcile(dataset)?;
        let customers: Vec<Customer> = reconciled
            .records
            .into_iter()
            .map(Customer::from_record)
            .collect();
        self.customers.upsert_all(&customers)?;

        info!("Successfully processed {} customer records", customers.len());
        Ok(IngestReport {
            records_processed: customers.len(),
            skipped_rows: reconciled.skipped_rows,
            mapping: reconciled.mapping,
            validation: reconciled.validation,
        })
    }

    /// Cluster every stored customer into `k` segments and persist the labels
    #[instrument(skip(self))]
    pub fn cluster(&self, k: usize, max_iterations: usize) -> crate::Result<ClusteringOutcome> {
        let customers = self.customers.load_all()?;
        if customers.is_empty() {
            return Err(SegmentationError::EmptyDataset(
                "no customer data found. Please ingest data first.".to_string(),
            ));
        }
        info!("Loaded {} customers for segmentation", customers.len());

        let outcome = cluster::segment_customers(customers, self.strategy.as_ref(), k, max_iterations)?;
        self.customers.upsert_all(&outcome.customers)?;
        self.segments.replace_all(&outcome.segments)?;
        Ok(outcome)
    }

    /// Train on the labeled customers, persist the model, and make it active
    #[instrument(skip(self, cancel))]
    pub fn train_model(&self, options: &TrainOptions, cancel: &CancelToken) -> crate::Result<Arc<TrainedModel>> {
        let customers = self.customers.load_all()?;
        let model = model::train(&customers, options, cancel)?;

        self.models.save(&model)?;
        let previous = self.models.activate(&model.model_id)?;
        if let Some(previous) = previous {
            info!("Deactivated previous model {}", previous);
        }
        info!(model_id = %model.model_id, "Model activated");
        Ok(Arc::new(model))
    }

    /// Classify one customer with the active model and log the prediction
    pub fn predict(&self, input: &CanonicalRecord) -> crate::Result<PredictionOutcome> {
        let model = self.models.active()?.ok_or(SegmentationError::NoActiveModel)?;
        let classification = model.classify(input)?;

        let segment = match self.segments.find(classification.segment) {
            Ok(segment) => segment,
            Err(e) => {
                warn!("Could not load segment {}: {}", classification.segment, e);
                None
            }
        };

        let record = PredictionRecord::new(&model.model_id, input, &classification)?;
        self.predictions.append(&record)?;

        let id = classification.segment;
        Ok(PredictionOutcome {
            prediction_id: record.prediction_id,
            model_id: model.model_id.clone(),
            segment: id,
            segment_name: segment
                .as_ref()
                .map_or_else(|| format!("Segment {id}"), |s| s.name.clone()),
            segment_description: segment
                .as_ref()
                .map_or_else(|| format!("Customer segment {id}"), |s| s.description.clone()),
            confidence: classification.confidence,
            recommendation: insights::recommend(segment.as_ref()).to_string(),
            probabilities: classification.probabilities,
            distances: classification.distances,
            feature_importance: classification.feature_importance,
        })
    }

    pub fn segments(&self) -> crate::Result<Vec<Segment>> {
        self.segments.load_all()
    }

    pub fn insights(&self) -> crate::Result<Vec<Insight>> {
        Ok(self.segments()?.iter().map(insights::segment_insight).collect())
    }

    pub fn models(&self) -> crate::Result<Vec<ModelSummary>> {
        self.models.list()
    }

    pub fn active_model(&self) -> crate::Result<Option<Arc<TrainedModel>>> {
        self.models.active()
    }

    pub fn customers(&self) -> crate::Result<Vec<Customer>> {
        self.customers.load_all()
    }

    pub fn customers_filtered(&self, filter: &CustomerFilter) -> crate::Result<Vec<Customer>> {
        let mut customers = self.customers()?;
        customers.retain(|customer| filter.matches(customer));
        Ok(customers)
    }

    pub fn customer(&self, id: &str) -> crate::Result<Option<Customer>> {
        Ok(self.customers()?.into_iter().find(|customer| customer.id == id))
    }

    pub fn dashboard(&self) -> crate::Result<Dashboard> {
        Ok(insights::dashboard(&self.customers()?, &self.segments()?))
    }

    pub fn predictions(&self) -> crate::Result<Vec<PredictionRecord>> {
        self.predictions.load_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, FieldValue};

    fn dataset() -> RawDataset {
        let rows = [
            (10_000.0, 0.0, 1.0),
            (12_000.0, 5.0, 2.0),
            (15_000.0, 10.0, 1.0),
            (85_000.0, 900.0, 9.0),
            (90_000.0, 1_000.0, 10.0),
            (95_000.0, 1_100.0, 8.0),
        ];
        RawDataset::from_rows(
            rows.iter()
                .map(|&(income, wines, web)| {
                    vec![
                        ("Annual_Income".to_string(), FieldValue::Number(income)),
                        ("wines".to_string(), FieldValue::Number(wines)),
                        ("Web_Purchases".to_string(), FieldValue::Number(web)),
                    ]
                })
                .collect(),
        )
    }

    #[test]
    fn test_predict_before_train_fails() {
        let service = InMemoryService::in_memory();
        let err = service
            .predict(&CanonicalRecord::new().with(Column::Income, 10.0))
            .unwrap_err();
        assert!(matches!(err, SegmentationError::NoActiveModel));
        assert!(service.predictions().unwrap().is_empty());
    }

    #[test]
    fn test_train_before_cluster_fails() {
        let service = InMemoryService::in_memory();
        service.ingest(&dataset()).unwrap();

        let err = service
            .train_model(&TrainOptions::default(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, SegmentationError::NoLabeledData));
    }

    #[test]
    fn test_cluster_without_customers_fails() {
        let service = InMemoryService::in_memory();
        assert!(matches!(
            service.cluster(2, 100),
            Err(SegmentationError::EmptyDataset(_))
        ));
    }

    #[test]
    fn test_full_pipeline_in_memory() {
        let service = InMemoryService::in_memory();

        let report = service.ingest(&dataset()).unwrap();
        assert_eq!(report.records_processed, 6);
        assert!(report.validation.valid);

        let outcome = service.cluster(2, 100).unwrap();
        assert_eq!(outcome.cluster_sizes.iter().sum::<usize>(), 6);
        assert_eq!(service.segments().unwrap().len(), 2);
        assert_eq!(service.insights().unwrap().len(), 2);
        assert!(service.customers().unwrap().iter().all(|c| c.segment.is_some()));

        let model = service
            .train_model(&TrainOptions::default(), &CancelToken::new())
            .unwrap();
        assert_eq!(model.num_segments(), 2);

        let rich = CanonicalRecord::new()
            .with(Column::Income, 92_000.0)
            .with(Column::MntWines, 1_050.0)
            .with(Column::NumWebPurchases, 9.0);
        let prediction = service.predict(&rich).unwrap();

        let rich_segment = service.customers().unwrap()[4].segment.unwrap();
        assert_eq!(prediction.segment, rich_segment);
        assert_eq!(prediction.model_id, model.model_id);
        assert_eq!(prediction.segment_name, format!("Segment {rich_segment}"));
        assert!(!prediction.recommendation.is_empty());
        let total: f64 = prediction.probabilities.values().sum();
        assert!((total - 1.0).abs() < 1e-9);

        let log = service.predictions().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].prediction_id, prediction.prediction_id);
    }

    #[test]
    fn test_dashboard_and_customer_queries() {
        let service = InMemoryService::in_memory();
        service.ingest(&dataset()).unwrap();

        let before = service.dashboard().unwrap();
        assert_eq!(before.total_customers, 6);
        assert!(before.segment_distribution.is_empty());
        assert!(before.top_segments.is_empty());

        service.cluster(2, 100).unwrap();
        let board = service.dashboard().unwrap();
        assert_eq!(board.segment_distribution.values().sum::<usize>(), 6);
        assert_eq!(board.top_segments.len(), 2);
        assert!(board.top_segments[0].avg_spending >= board.top_segments[1].avg_spending);
        assert_eq!(board.income_by_segment["<20k"].values().sum::<usize>(), 3);
        assert_eq!(board.income_by_segment["80k+"].values().sum::<usize>(), 3);

        let rich_segment = board.top_segments[0].segment_id;
        let rich = service
            .customers_filtered(&CustomerFilter {
                segment: Some(rich_segment),
                ..CustomerFilter::default()
            })
            .unwrap();
        assert_eq!(rich.len(), 3);
        assert!(rich.iter().all(|c| c.record.number(Column::Income) > 80_000.0));

        let nobody = CustomerFilter {
            marital_status: Some("Married".to_string()),
            ..CustomerFilter::default()
        };
        assert!(service.customers_filtered(&nobody).unwrap().is_empty());

        let first = &service.customers().unwrap()[0];
        assert_eq!(service.customer(&first.id).unwrap().as_ref(), Some(first));
        assert_eq!(service.customer("no-such-id").unwrap(), None);
    }

    #[test]
    fn test_retraining_keeps_one_active_model() {
        let service = InMemoryService::in_memory();
        service.ingest(&dataset()).unwrap();
        service.cluster(2, 100).unwrap();

        let first = service
            .train_model(&TrainOptions::default(), &CancelToken::new())
            .unwrap();
        let second = service
            .train_model(&TrainOptions::default(), &CancelToken::new())
            .unwrap();

        let models = service.models().unwrap();
        assert_eq!(models.len(), 2);
        let active: Vec<&ModelSummary> = models.iter().filter(|m| m.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].model_id, second.model_id);
        assert_ne!(first.model_id, second.model_id);
        assert_eq!(service.active_model().unwrap().unwrap().model_id, second.model_id);
    }

    #[test]
    fn test_cancelled_training_leaves_active_model() {
        let service = InMemoryService::in_memory();
        service.ingest(&dataset()).unwrap();
        service.cluster(2, 100).unwrap();
        let first = service
            .train_model(&TrainOptions::default(), &CancelToken::new())
            .unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = service.train_model(&TrainOptions::default(), &cancel).unwrap_err();

        assert!(matches!(err, SegmentationError::Cancelled));
        assert_eq!(service.models().unwrap().len(), 1);
        assert_eq!(service.active_model().unwrap().unwrap().model_id, first.model_id);
    }
}
