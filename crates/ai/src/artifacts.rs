//! Versioned on-disk storage of forecast artifact triplets.
//!
//! Layout under the root directory:
//!
//! ```text
//! TX_1day/
//!   CURRENT                 name of the live version directory
//!   v0192.../model.json     regressor + key + feature spec
//!   v0192.../scaler.json    standard scaler
//!   v0192.../features.txt   ordered feature names, one per line
//! ```
//!
//! A version directory is filled completely under a temporary name and renamed
//! into place before `CURRENT` is swapped (write-temp-then-rename), so readers
//! always see a whole triplet: the previous one or the new one.
//!
//! Writers of one key are serialized by an exclusive lock on `TX_1day/.lock`,
//! which also holds across processes (the server and `envwatch-train`).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::features::FeatureSpec;
use crate::forecast::{ForecastModel, ModelKey};
use crate::gbm::GradientBoostedRegressor;
use crate::result::{AiError, AiResult};
use crate::scaler::StandardScaler;

const POINTER_FILE: &str = "CURRENT";
const MODEL_FILE: &str = "model.json";
const SCALER_FILE: &str = "scaler.json";
const FEATURES_FILE: &str = "features.txt";
const LOCK_FILE: &str = ".lock";

#[derive(Serialize, Deserialize)]
struct ModelFile {
    key: ModelKey,
    spec: FeatureSpec,
    regressor: GradientBoostedRegressor,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, key: &ModelKey) -> PathBuf {
        self.root.join(key.slug())
    }

    /// Write the triplet for `model.key` and make it the live version.
    pub fn persist(&self, model: &ForecastModel) -> AiResult<PathBuf> {
        if model.feature_names.len() != model.scaler.width()
            || model.feature_names.len() != model.regressor.n_features()
        {
            return Err(AiError::InvalidInput(format!(
                "inconsistent triplet for {}: {} features, scaler width {}, model width {}",
                model.key,
                model.feature_names.len(),
                model.scaler.width(),
                model.regressor.n_features()
            )));
        }

        let key_dir = self.key_dir(&model.key);
        fs::create_dir_all(&key_dir).map_err(|e| AiError::artifact(&key_dir, e))?;

        let lock_path = key_dir.join(LOCK_FILE);
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| AiError::artifact(&lock_path, e))?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write().map_err(|e| AiError::artifact(&lock_path, e))?;

        let version = format!("v{}", Uuid::now_v7().simple());
        let staging = key_dir.join(format!(".staging-{version}"));
        fs::create_dir(&staging).map_err(|e| AiError::artifact(&staging, e))?;

        let written = self.write_triplet(&staging, model);
        if let Err(e) = written {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        let version_dir = key_dir.join(&version);
        fs::rename(&staging, &version_dir).map_err(|e| AiError::artifact(&version_dir, e))?;

        let pointer = key_dir.join(POINTER_FILE);
        let previous = read_optional(&pointer)?.map(|v| v.trim().to_string());
        let pointer_tmp = key_dir.join(format!(".{POINTER_FILE}.{version}"));
        write_synced(&pointer_tmp, version.as_bytes())?;
        fs::rename(&pointer_tmp, &pointer).map_err(|e| AiError::artifact(&pointer, e))?;

        // The predecessor stays: a concurrent reader may have resolved it already.
        let keep = [Some(version.as_str()), previous.as_deref()];
        self.prune_versions(&key_dir, &keep);
        tracing::info!(model = %model.key, version = %version, "model artifacts persisted");
        Ok(version_dir)
    }

    fn write_triplet(&self, dir: &Path, model: &ForecastModel) -> AiResult<()> {
        let model_file = ModelFile {
            key: model.key.clone(),
            spec: model.spec.clone(),
            regressor: model.regressor.clone(),
        };
        let path = dir.join(MODEL_FILE);
        let bytes = serde_json::to_vec(&model_file).map_err(|e| AiError::artifact(&path, e))?;
        write_synced(&path, &bytes)?;

        let path = dir.join(SCALER_FILE);
        let bytes = serde_json::to_vec(&model.scaler).map_err(|e| AiError::artifact(&path, e))?;
        write_synced(&path, &bytes)?;

        write_synced(&dir.join(FEATURES_FILE), model.feature_names.join("\n").as_bytes())
    }

    /// Load the live triplet.
    ///
    /// A missing pointer or missing file is [`AiError::ModelNotFound`]; an
    /// unreadable or inconsistent file is [`AiError::Artifact`].
    pub fn load(&self, key: &ModelKey) -> AiResult<ForecastModel> {
        let not_found = || AiError::ModelNotFound {
            target: key.target().to_string(),
            horizon: key.horizon(),
        };
        let key_dir = self.key_dir(key);

        let Some(version) = read_optional(&key_dir.join(POINTER_FILE))? else {
            return Err(not_found());
        };
        let version_dir = key_dir.join(version.trim());

        let (Some(model_json), Some(scaler_json), Some(features_txt)) = (
            read_optional(&version_dir.join(MODEL_FILE))?,
            read_optional(&version_dir.join(SCALER_FILE))?,
            read_optional(&version_dir.join(FEATURES_FILE))?,
        ) else {
            return Err(not_found());
        };

        let model_file: ModelFile =
            serde_json::from_str(&model_json).map_err(|e| AiError::artifact(&version_dir.join(MODEL_FILE), e))?;
        let scaler: StandardScaler =
            serde_json::from_str(&scaler_json).map_err(|e| AiError::artifact(&version_dir.join(SCALER_FILE), e))?;
        let feature_names: Vec<String> = features_txt.lines().map(str::to_string).collect();

        if &model_file.key != key {
            return Err(AiError::artifact(
                &version_dir,
                format!("holds {} instead of {key}", model_file.key),
            ));
        }
        if feature_names.len() != scaler.width() || feature_names.len() != model_file.regressor.n_features() {
            return Err(AiError::artifact(&version_dir, "feature list does not match model width"));
        }

        Ok(ForecastModel {
            key: model_file.key,
            spec: model_file.spec,
            regressor: model_file.regressor,
            scaler,
            feature_names,
        })
    }

    pub fn exists(&self, key: &ModelKey) -> bool {
        self.key_dir(key).join(POINTER_FILE).is_file()
    }

    /// Modification time of the live pointer; `None` when nothing is persisted.
    pub fn live_version_modified(&self, key: &ModelKey) -> AiResult<Option<SystemTime>> {
        let pointer = self.key_dir(key).join(POINTER_FILE);
        match fs::metadata(&pointer) {
            Ok(meta) => meta.modified().map(Some).map_err(|e| AiError::artifact(&pointer, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AiError::artifact(&pointer, e)),
        }
    }

    /// Remove version directories not listed in `keep`. Failures are logged, never returned.
    fn prune_versions(&self, key_dir: &Path, keep: &[Option<&str>]) {
        let entries = match fs::read_dir(key_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %key_dir.display(), error = %e, "cannot list model versions");
                return;
            }
        };
        let stale: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.starts_with('v') && !keep.contains(&Some(name.as_str())))
            .collect();

        for name in &stale {
            let path = key_dir.join(name);
            if let Err(e) = fs::remove_dir_all(&path) {
                tracing::warn!(dir = %path.display(), error = %e, "cannot remove stale model version");
            }
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> AiResult<()> {
    let mut file = fs::File::create(path).map_err(|e| AiError::artifact(path, e))?;
    file.write_all(bytes).map_err(|e| AiError::artifact(path, e))?;
    file.sync_all().map_err(|e| AiError::artifact(path, e))
}

fn read_optional(path: &Path) -> AiResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AiError::artifact(path, e)),
    }
}
