use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::debug;

use envwatch_ai::{AiError, AiResult, ArtifactStore, ForecastModel, ModelKey};

#[derive(Debug)]
struct CachedModel {
    model: Arc<ForecastModel>,
    version_modified: SystemTime,
}

/// Loaded forecast models keyed by `(target, horizon)`.
///
/// An entry is reloaded when the live version pointer on disk changes, so a model
/// retrained by another process is picked up on the next request.
#[derive(Debug)]
pub struct ModelCache {
    artifacts: ArtifactStore,
    entries: RwLock<HashMap<ModelKey, CachedModel>>,
}

impl ModelCache {
    pub fn new(artifacts: ArtifactStore) -> Self {
        Self {
            artifacts,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// The live model for `key`; [`AiError::ModelNotFound`] when none is persisted.
    pub fn get(&self, key: &ModelKey) -> AiResult<Arc<ForecastModel>> {
        let Some(modified) = self.artifacts.live_version_modified(key)? else {
            self.entries.write().remove(key);
            return Err(AiError::ModelNotFound {
                target: key.target().to_string(),
                horizon: key.horizon(),
            });
        };

        if let Some(cached) = self.entries.read().get(key) {
            if cached.version_modified == modified {
                return Ok(cached.model.clone());
            }
        }

        let model = Arc::new(self.artifacts.load(key)?);
        debug!(model = %key, "forecast model loaded");
        self.entries.write().insert(
            key.clone(),
            CachedModel {
                model: model.clone(),
                version_modified: modified,
            },
        );
        Ok(model)
    }

    /// Persist `model` as the live version and cache it.
    pub fn put(&self, model: ForecastModel) -> AiResult<Arc<ForecastModel>> {
        self.artifacts.persist(&model)?;
        let key = model.key.clone();
        let model = Arc::new(model);
        if let Some(modified) = self.artifacts.live_version_modified(&key)? {
            self.entries.write().insert(
                key,
                CachedModel {
                    model: model.clone(),
                    version_modified: modified,
                },
            );
        }
        Ok(model)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::fixtures::{climate_csv, quick_training};
    use crate::external::parse_climate_csv;
    use envwatch_ai::{FeatureSpec, TrainingConfig, WeatherFeature};

    fn trained(key: &ModelKey, config: &TrainingConfig) -> ForecastModel {
        let history = parse_climate_csv(&climate_csv(60)).unwrap();
        ForecastModel::train(&history, key, &FeatureSpec::new(key.target()), config)
            .unwrap()
            .model
    }

    #[test]
    fn unknown_keys_are_model_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelCache::new(ArtifactStore::new(dir.path()));
        let key = ModelKey::for_feature(WeatherFeature::Tn, 3).unwrap();

        assert!(cache.get(&key).unwrap_err().is_not_found());
        assert!(cache.is_empty());
    }

    #[test]
    fn persisted_models_are_served_from_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelCache::new(ArtifactStore::new(dir.path()));
        let key = ModelKey::for_feature(WeatherFeature::Tx, 1).unwrap();

        let put = cache.put(trained(&key, &quick_training())).unwrap();
        let first = cache.get(&key).unwrap();
        let second = cache.get(&key).unwrap();

        assert!(Arc::ptr_eq(&put, &first));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn a_model_replaced_on_disk_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelCache::new(ArtifactStore::new(dir.path()));
        let key = ModelKey::for_feature(WeatherFeature::Tx, 1).unwrap();
        let old = cache.put(trained(&key, &quick_training())).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut bigger = quick_training();
        bigger.boosting.n_estimators += 10;
        let replacement = trained(&key, &bigger);
        ArtifactStore::new(dir.path()).persist(&replacement).unwrap();

        let current = cache.get(&key).unwrap();
        assert!(!Arc::ptr_eq(&old, &current));
        assert_eq!(*current, replacement);
    }
}
