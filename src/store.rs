//! Persistence for models, customers, segments, and prediction audit records
//!
//! Each collaborator is a trait with an in-memory implementation (tests,
//! embedding) and a file-backed one (the CLI). The model store owns the
//! "active model" pointer and swaps it under a single writer lock, so readers
//! always get a complete model snapshot.

use crate::cluster::Segment;
use crate::error::SegmentationError;
use crate::model::{PredictionRecord, TrainedModel};
use crate::schema::{Customer, SegmentId};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Current on-disk model format
pub const MODEL_FORMAT_VERSION: u32 = 1;

const ACTIVE_POINTER: &str = "ACTIVE";

/// Listing entry for a stored model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub model_id: String,
    pub model_name: String,
    pub model_type: &'static str,
    pub features: Vec<String>,
    pub num_segments: usize,
    pub training_size: usize,
    pub training_accuracy: f64,
    pub trained_at: DateTime<Utc>,
    pub is_active: bool,
}

impl ModelSummary {
    fn new(model: &TrainedModel, is_active: bool) -> Self {
        Self {
            model_id: model.model_id.clone(),
            model_name: model.model_name.clone(),
            model_type: "PREDICTION",
            features: model.features.iter().map(|f| f.to_string()).collect(),
            num_segments: model.num_segments(),
            training_size: model.training_size,
            training_accuracy: model.training_accuracy,
            trained_at: model.trained_at,
            is_active,
        }
    }
}

/// Durable storage of trained models plus the active-model pointer
pub trait ModelStore: Send + Sync {
    /// Persist a model; does not change which model is active
    fn save(&self, model: &TrainedModel) -> crate::Result<()>;

    fn load(&self, model_id: &str) -> crate::Result<Option<Arc<TrainedModel>>>;

    /// Make `model_id` the only active model, returning the one it replaced
    fn activate(&self, model_id: &str) -> crate::Result<Option<String>>;

    /// Snapshot of the currently active model
    fn active(&self) -> crate::Result<Option<Arc<TrainedModel>>>;

    /// All stored models, oldest first
    fn list(&self) -> crate::Result<Vec<ModelSummary>>;
}

/// Source of customers for training and sink for clustering labels
pub trait CustomerStore: Send + Sync {
    fn load_all(&self) -> crate::Result<Vec<Customer>>;

    /// Insert or replace customers by id
    fn upsert_all(&self, customers: &[Customer]) -> crate::Result<()>;
}

/// Segment aggregates, replaced wholesale on every clustering run
pub trait SegmentStore: Send + Sync {
    fn replace_all(&self, segments: &[Segment]) -> crate::Result<()>;

    fn load_all(&self) -> crate::Result<Vec<Segment>>;

    fn find(&self, segment_id: SegmentId) -> crate::Result<Option<Segment>> {
        Ok(self.load_all()?.into_iter().find(|s| s.segment_id == segment_id))
    }
}

/// Append-only audit trail of predictions
pub trait PredictionLog: Send + Sync {
    fn append(&self, record: &PredictionRecord) -> crate::Result<()>;

    fn load_all(&self) -> crate::Result<Vec<PredictionRecord>>;
}

// One store value can back several collaborators through shared handles.

impl<T: CustomerStore + ?Sized> CustomerStore for Arc<T> {
    fn load_all(&self) -> crate::Result<Vec<Customer>> {
        (**self).load_all()
    }

    fn upsert_all(&self, customers: &[Customer]) -> crate::Result<()> {
        (**self).upsert_all(customers)
    }
}

impl<T: SegmentStore + ?Sized> SegmentStore for Arc<T> {
    fn replace_all(&self, segments: &[Segment]) -> crate::Result<()> {
        (**self).replace_all(segments)
    }

    fn load_all(&self) -> crate::Result<Vec<Segment>> {
        (**self).load_all()
    }

    fn find(&self, segment_id: SegmentId) -> crate::Result<Option<Segment>> {
        (**self).find(segment_id)
    }
}

impl<T: PredictionLog + ?Sized> PredictionLog for Arc<T> {
    fn append(&self, record: &PredictionRecord) -> crate::Result<()> {
        (**self).append(record)
    }

    fn load_all(&self) -> crate::Result<Vec<PredictionRecord>> {
        (**self).load_all()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> crate::Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| SegmentationError::Persistence("store lock poisoned".to_string()))
}

fn merge_customers(existing: &mut Vec<Customer>, incoming: &[Customer]) {
    let mut index: HashMap<String, usize> = existing
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.clone(), i))
        .collect();
    for customer in incoming {
        match index.get(&customer.id) {
            Some(&i) => existing[i] = customer.clone(),
            None => {
                index.insert(customer.id.clone(), existing.len());
                existing.push(customer.clone());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ModelState {
    models: BTreeMap<String, Arc<TrainedModel>>,
    active: Option<String>,
}

/// Model store kept entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryModelStore {
    state: Mutex<ModelState>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelStore for InMemoryModelStore {
    fn save(&self, model: &TrainedModel) -> crate::Result<()> {
        let mut state = lock(&self.state)?;
        state
            .models
            .insert(model.model_id.clone(), Arc::new(model.clone()));
        Ok(())
    }

    fn load(&self, model_id: &str) -> crate::Result<Option<Arc<TrainedModel>>> {
        Ok(lock(&self.state)?.models.get(model_id).cloned())
    }

    fn activate(&self, model_id: &str) -> crate::Result<Option<String>> {
        let mut state = lock(&self.state)?;
        if !state.models.contains_key(model_id) {
            return Err(SegmentationError::Persistence(format!(
                "cannot activate unknown model {model_id}"
            )));
        }
        Ok(state.active.replace(model_id.to_string()))
    }

    fn active(&self) -> crate::Result<Option<Arc<TrainedModel>>> {
        let state = lock(&self.state)?;
        Ok(state
            .active
            .as_ref()
            .and_then(|id| state.models.get(id))
            .cloned())
    }

    fn list(&self) -> crate::Result<Vec<ModelSummary>> {
        let state = lock(&self.state)?;
        let mut summaries: Vec<ModelSummary> = state
            .models
            .values()
            .map(|m| ModelSummary::new(m, state.active.as_deref() == Some(m.model_id.as_str())))
            .collect();
        summaries.sort_by_key(|s| s.trained_at);
        Ok(summaries)
    }
}

/// Customer, segment, and prediction collaborators kept in memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    customers: Mutex<Vec<Customer>>,
    segments: Mutex<Vec<Segment>>,
    predictions: Mutex<Vec<PredictionRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CustomerStore for InMemoryStore {
    fn load_all(&self) -> crate::Result<Vec<Customer>> {
        Ok(lock(&self.customers)?.clone())
    }

    fn upsert_all(&self, customers: &[Customer]) -> crate::Result<()> {
        merge_customers(&mut *lock(&self.customers)?, customers);
        Ok(())
    }
}

impl SegmentStore for InMemoryStore {
    fn replace_all(&self, segments: &[Segment]) -> crate::Result<()> {
        *lock(&self.segments)? = segments.to_vec();
        Ok(())
    }

    fn load_all(&self) -> crate::Result<Vec<Segment>> {
        Ok(lock(&self.segments)?.clone())
    }
}

impl PredictionLog for InMemoryStore {
    fn append(&self, record: &PredictionRecord) -> crate::Result<()> {
        lock(&self.predictions)?.push(record.clone());
        Ok(())
    }

    fn load_all(&self) -> crate::Result<Vec<PredictionRecord>> {
        Ok(lock(&self.predictions)?.clone())
    }
}

// ---------------------------------------------------------------------------
// File-backed implementations
// ---------------------------------------------------------------------------

/// Write through a temp file in the same directory, then rename into place
fn write_atomic(path: &Path, bytes: &[u8]) -> crate::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| SegmentationError::persistence(&format!("writing {}", path.display()), e.error))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> crate::Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| SegmentationError::persistence(&format!("reading {}", path.display()), e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SegmentationError::persistence(&format!("reading {}", path.display()), e)),
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> crate::Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

#[derive(Serialize)]
struct ModelEnvelopeRef<'a> {
    format_version: u32,
    model: &'a TrainedModel,
}

#[derive(Deserialize)]
struct ModelEnvelope {
    format_version: u32,
    model: TrainedModel,
}

/// Directory of versioned model files plus an `ACTIVE` pointer file
#[derive(Debug)]
pub struct FileModelStore {
    dir: PathBuf,
    writer: Mutex<()>,
}

impl FileModelStore {
    pub fn open(dir: impl Into<PathBuf>) -> crate::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| SegmentationError::persistence(&format!("creating {}", dir.display()), e))?;
        info!("Model directory initialized: {}", dir.display());
        Ok(Self {
            dir,
            writer: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn model_path(&self, model_id: &str) -> crate::Result<PathBuf> {
        let valid = !model_id.is_empty()
            && model_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SegmentationError::Persistence(format!("invalid model id {model_id:?}")));
        }
        Ok(self.dir.join(format!("{model_id}.json")))
    }

    fn read_model(&self, path: &Path) -> crate::Result<Option<TrainedModel>> {
        let Some(envelope) = read_json::<ModelEnvelope>(path)? else {
            return Ok(None);
        };
        if envelope.format_version != MODEL_FORMAT_VERSION {
            return Err(SegmentationError::Persistence(format!(
                "unsupported model format version {} in {}",
                envelope.format_version,
                path.display()
            )));
        }
        Ok(Some(envelope.model))
    }

    fn active_id(&self) -> crate::Result<Option<String>> {
        match fs::read_to_string(self.dir.join(ACTIVE_POINTER)) {
            Ok(id) => {
                let id = id.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SegmentationError::persistence("reading active model pointer", e)),
        }
    }
}

impl ModelStore for FileModelStore {
    fn save(&self, model: &TrainedModel) -> crate::Result<()> {
        let path = self.model_path(&model.model_id)?;
        let _guard = lock(&self.writer)?;
        write_json(
            &path,
            &ModelEnvelopeRef {
                format_version: MODEL_FORMAT_VERSION,
                model,
            },
        )?;
        info!("Model saved to: {}", path.display());
        Ok(())
    }

    fn load(&self, model_id: &str) -> crate::Result<Option<Arc<TrainedModel>>> {
        let path = self.model_path(model_id)?;
        Ok(self.read_model(&path)?.map(Arc::new))
    }

    fn activate(&self, model_id: &str) -> crate::Result<Option<String>> {
        let path = self.model_path(model_id)?;
        let _guard = lock(&self.writer)?;
        if !path.exists() {
            return Err(SegmentationError::Persistence(format!(
                "cannot activate unknown model {model_id}"
            )));
        }
        let previous = self.active_id()?;
        write_atomic(&self.dir.join(ACTIVE_POINTER), model_id.as_bytes())?;
        debug!(model_id, previous = ?previous, "Active model switched");
        Ok(previous)
    }

    fn active(&self) -> crate::Result<Option<Arc<TrainedModel>>> {
        let Some(id) = self.active_id()? else {
            return Ok(None);
        };
        match self.read_model(&self.model_path(&id)?)? {
            Some(model) => Ok(Some(Arc::new(model))),
            None => {
                warn!(model_id = %id, "Active model pointer refers to a missing model file");
                Ok(None)
            }
        }
    }

    fn list(&self) -> crate::Result<Vec<ModelSummary>> {
        let active = self.active_id()?;
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_model(&path) {
                Ok(Some(model)) => {
                    let is_active = active.as_deref() == Some(model.model_id.as_str());
                    summaries.push(ModelSummary::new(&model, is_active));
                }
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), "Skipping file that is not a stored model: {}", e),
            }
        }
        summaries.sort_by_key(|s| s.trained_at);
        Ok(summaries)
    }
}

/// Customers, segments, and predictions as JSON files in a data directory
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    writer: Mutex<()>,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> crate::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| SegmentationError::persistence(&format!("creating {}", dir.display()), e))?;
        Ok(Self {
            dir,
            writer: Mutex::new(()),
        })
    }

    fn customers_path(&self) -> PathBuf {
        self.dir.join("customers.json")
    }

    fn segments_path(&self) -> PathBuf {
        self.dir.join("segments.json")
    }

    fn predictions_path(&self) -> PathBuf {
        self.dir.join("predictions.jsonl")
    }
}

impl CustomerStore for FileStore {
    fn load_all(&self) -> crate::Result<Vec<Customer>> {
        Ok(read_json(&self.customers_path())?.unwrap_or_default())
    }

    fn upsert_all(&self, customers: &[Customer]) -> crate::Result<()> {
        let _guard = lock(&self.writer)?;
        let mut existing: Vec<Customer> = read_json(&self.customers_path())?.unwrap_or_default();
        merge_customers(&mut existing, customers);
        write_json(&self.customers_path(), &existing)
    }
}

impl SegmentStore for FileStore {
    fn replace_all(&self, segments: &[Segment]) -> crate::Result<()> {
        let _guard = lock(&self.writer)?;
        write_json(&self.segments_path(), segments)
    }

    fn load_all(&self) -> crate::Result<Vec<Segment>> {
        Ok(read_json(&self.segments_path())?.unwrap_or_default())
    }
}

impl PredictionLog for FileStore {
    fn append(&self, record: &PredictionRecord) -> crate::Result<()> {
        // JSON has no NaN, so such a line could not be read back
        if !record.confidence.is_finite() {
            return Err(SegmentationError::Persistence(format!(
                "prediction {} has a non-finite confidence",
                record.prediction_id
            )));
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = lock(&self.writer)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.predictions_path())?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn load_all(&self) -> crate::Result<Vec<PredictionRecord>> {
        let file = match fs::File::open(self.predictions_path()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(line = number + 1, "Skipping unreadable prediction record: {}", e),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Feature, FeatureVector, MinMax};
    use crate::schema::{CanonicalRecord, Column};
    use tempfile::TempDir;

    fn model(id: &str) -> TrainedModel {
        TrainedModel {
            model_id: id.to_string(),
            model_name: format!("model-{id}"),
            features: vec![Feature::Income],
            normalization: [(Feature::Income, MinMax { min: 0.0, max: 10.0 })]
                .into_iter()
                .collect(),
            centroids: BTreeMap::from([
                (0, FeatureVector::new(vec![0.1])),
                (1, FeatureVector::new(vec![0.9])),
            ]),
            training_size: 4,
            training_accuracy: 1.0,
            trained_at: Utc::now(),
            training_time_ms: 1,
        }
    }

    fn exercise_activation(store: &dyn ModelStore) {
        assert!(store.active().unwrap().is_none());

        store.save(&model("a")).unwrap();
        assert!(store.active().unwrap().is_none(), "save must not activate");
        assert_eq!(store.activate("a").unwrap(), None);

        store.save(&model("b")).unwrap();
        assert_eq!(store.activate("b").unwrap(), Some("a".to_string()));

        let active = store.active().unwrap().unwrap();
        assert_eq!(active.model_id, "b");
        assert_eq!(active.centroids.len(), 2);

        let summaries = store.list().unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries.iter().filter(|s| s.is_active).count(), 1);

        let err = store.activate("missing").unwrap_err();
        assert_eq!(err.kind(), "persistence_error");
        assert_eq!(store.active().unwrap().unwrap().model_id, "b");
    }

    #[test]
    fn test_in_memory_activation_swap() {
        exercise_activation(&InMemoryModelStore::new());
    }

    #[test]
    fn test_file_activation_swap() {
        let dir = TempDir::new().unwrap();
        let store = FileModelStore::open(dir.path().join("models")).unwrap();
        exercise_activation(&store);

        // A second handle on the same directory sees the same active model
        let reopened = FileModelStore::open(dir.path().join("models")).unwrap();
        assert_eq!(reopened.active().unwrap().unwrap().model_id, "b");
        let loaded = reopened.load("a").unwrap().unwrap();
        assert_eq!(loaded.model_name, "model-a");
        assert_eq!(loaded.features, vec![Feature::Income]);
        assert_eq!(loaded.centroids.len(), 2);
        assert!(reopened.load("never-saved").unwrap().is_none());
    }

    #[test]
    fn test_file_model_rejects_unknown_version() {
        let dir = TempDir::new().unwrap();
        let store = FileModelStore::open(dir.path()).unwrap();
        let body = serde_json::json!({ "format_version": 99, "model": model("old") });
        fs::write(dir.path().join("old.json"), body.to_string()).unwrap();

        let err = store.load("old").unwrap_err();
        assert!(err.to_string().contains("unsupported model format version 99"));
    }

    #[test]
    fn test_file_model_rejects_path_like_ids() {
        let dir = TempDir::new().unwrap();
        let store = FileModelStore::open(dir.path()).unwrap();
        assert!(store.load("../etc/passwd").is_err());
    }

    fn customer(id: &str, income: f64) -> Customer {
        Customer {
            id: id.to_string(),
            record: CanonicalRecord::new().with(Column::Income, income),
            segment: None,
        }
    }

    #[test]
    fn test_file_store_upserts_customers() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.upsert_all(&[customer("1", 10.0), customer("2", 20.0)]).unwrap();
        let mut relabeled = customer("1", 10.0);
        relabeled.segment = Some(3);
        store.upsert_all(&[relabeled, customer("3", 30.0)]).unwrap();

        let loaded = CustomerStore::load_all(&store).unwrap();
        let ids: Vec<&str> = loaded.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(loaded[0].segment, Some(3));
    }

    #[test]
    fn test_prediction_log_appends() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let m = model("m");
        let input = CanonicalRecord::new().with(Column::Income, 1.0);
        let classification = m.classify(&input).unwrap();

        for _ in 0..3 {
            let record = PredictionRecord::new(&m.model_id, &input, &classification).unwrap();
            store.append(&record).unwrap();
        }

        let records = PredictionLog::load_all(&store).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.model_id == "m" && r.predicted_segment == 0));
    }

    #[test]
    fn test_prediction_log_survives_bad_records() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let m = model("m");
        let input = CanonicalRecord::new().with(Column::Income, 1.0);
        let classification = m.classify(&input).unwrap();

        let record = PredictionRecord::new(&m.model_id, &input, &classification).unwrap();
        store.append(&record).unwrap();

        let mut broken = record.clone();
        broken.confidence = f64::NAN;
        assert_eq!(store.append(&broken).unwrap_err().kind(), "persistence_error");

        // A line written by an older build with nulls in numeric fields
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join("predictions.jsonl"))
            .unwrap();
        writeln!(file, r#"{{"prediction_id":"x","confidence":null}}"#).unwrap();
        store.append(&record).unwrap();

        let records = PredictionLog::load_all(&store).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.confidence.is_finite()));
    }

    #[test]
    fn test_file_list_skips_foreign_json() {
        let dir = TempDir::new().unwrap();
        let store = FileModelStore::open(dir.path()).unwrap();
        store.save(&model("a")).unwrap();
        fs::write(dir.path().join("customers.json"), "[]").unwrap();
        fs::write(dir.path().join("notes.json"), "not json").unwrap();

        let summaries = store.list().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].model_id, "a");
    }

    #[test]
    fn test_segment_store_replaces_wholesale() {
        let store = InMemoryStore::new();
        let segment = |id: SegmentId| Segment {
            segment_id: id,
            name: format!("Segment {id}"),
            description: String::new(),
            customer_count: 1,
            avg_income: 0.0,
            avg_spending: 0.0,
            avg_wines: 0.0,
            avg_web_purchases: 0.0,
            response_rate: 0.0,
            updated_at: Utc::now(),
        };

        store.replace_all(&[segment(0), segment(1), segment(2)]).unwrap();
        store.replace_all(&[segment(5)]).unwrap();

        assert_eq!(SegmentStore::load_all(&store).unwrap().len(), 1);
        assert!(store.find(5).unwrap().is_some());
        assert!(store.find(0).unwrap().is_none());
    }
}
