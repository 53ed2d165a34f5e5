//! Model persistence: JSON manifests in a models directory

use super::logistic::LinearModel;
use super::onnx::OnnxModel;
use super::preprocess::Preprocessor;
use super::Model;
use crate::config::ModelsConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// File name of the shared preprocessor written by every training run.
pub const PREPROCESSOR_FILE: &str = "preprocessor.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("model manifest not found at {0}")]
    NotFound(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid model manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to initialise model backend: {0}")]
    Backend(String),
}

/// Where a model comes from. Loading returns a fully initialised,
/// immutable model.
pub trait ModelStore: Send + Sync {
    /// Load the model currently designated for serving.
    fn load(&self) -> Result<Arc<dyn Model>, StoreError>;

    /// Persist a model artifact under `name`.
    fn save(&self, name: &str, manifest: &ModelManifest) -> Result<(), StoreError>;
}

/// On-disk description of a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelManifest {
    /// Fitted in process; weights inline
    LogisticRegression(LinearModel),
    /// Trained elsewhere and exported to ONNX
    Onnx(OnnxManifest),
}

/// Pointer to an ONNX export plus the preprocessor it was trained behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnnxManifest {
    /// Identifier reported as `model_used`
    pub name: String,
    /// Path of the `.onnx` file, relative to the models directory
    pub file: String,
    pub preprocessor: Preprocessor,
}

/// A directory of `<name>.json` manifests with one active model.
#[derive(Debug, Clone)]
pub struct ModelDirectory {
    root: PathBuf,
    active_model: String,
    onnx_threads: usize,
}

impl ModelDirectory {
    pub fn new<P: AsRef<Path>>(root: P, active_model: &str, onnx_threads: usize) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            active_model: active_model.to_string(),
            onnx_threads,
        }
    }

    pub fn from_config(config: &ModelsConfig) -> Self {
        Self::new(&config.models_dir, &config.active_model, config.onnx_threads)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn active_model(&self) -> &str {
        &self.active_model
    }

    pub fn manifest_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    /// Load the manifest `name` and initialise its model.
    pub fn load_named(&self, name: &str) -> Result<Arc<dyn Model>, StoreError> {
        let path = self.manifest_path(name);
        if !path.exists() {
            return Err(StoreError::NotFound(path));
        }

        info!(model = %name, path = %path.display(), "Loading model manifest");
        let text = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let manifest: ModelManifest =
            serde_json::from_str(&text).map_err(|source| StoreError::Manifest {
                path: path.clone(),
                source,
            })?;

        let model: Arc<dyn Model> = match manifest {
            ModelManifest::LogisticRegression(model) => Arc::new(model),
            ModelManifest::Onnx(onnx) => Arc::new(OnnxModel::load(
                self.root.join(&onnx.file),
                &onnx.name,
                onnx.preprocessor,
                self.onnx_threads,
            )?),
        };

        info!(
            model = %model.name(),
            features = model.feature_names().len(),
            "Model loaded successfully"
        );
        Ok(model)
    }

    /// Write the fitted preprocessor so externally trained models can be
    /// exported behind the exact same encoding.
    pub fn save_preprocessor(&self, preprocessor: &Preprocessor) -> Result<PathBuf, StoreError> {
        let path = self.root.join(PREPROCESSOR_FILE);
        self.write_json(&path, preprocessor)?;
        Ok(path)
    }

    /// Register an ONNX export as model `name`, paired with the preprocessor
    /// it was trained behind. `file` is resolved against the models directory.
    pub fn register_onnx(
        &self,
        name: &str,
        file: &str,
        preprocessor: &Preprocessor,
    ) -> Result<PathBuf, StoreError> {
        let manifest = ModelManifest::Onnx(OnnxManifest {
            name: name.to_string(),
            file: file.to_string(),
            preprocessor: preprocessor.clone(),
        });
        self.save(name, &manifest)?;
        Ok(self.manifest_path(name))
    }

    /// Write via a temporary file and rename, so a concurrent reader sees
    /// the old file or the new one.
    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        fs::create_dir_all(&self.root).map_err(io_err)?;

        let json = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }
}

impl ModelStore for ModelDirectory {
    fn load(&self) -> Result<Arc<dyn Model>, StoreError> {
        self.load_named(&self.active_model)
    }

    fn save(&self, name: &str, manifest: &ModelManifest) -> Result<(), StoreError> {
        let path = self.manifest_path(name);
        self.write_json(&path, manifest)?;
        info!(model = %name, path = %path.display(), "Model manifest saved");
        Ok(())
    }
}
