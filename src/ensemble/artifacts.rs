//! Model artifacts: per-crop manifest, loaded member set, and the sources that
//! produce them.
//!
//! On disk a crop's models live under `<model_dir>/<crop>/`:
//!
//! ```text
//! manifest.json       crop, feature schema version, feature names, members
//! sequence.json       SequenceModel
//! tree.json           RandomForestModel
//! feed_forward.json   FeedForwardModel
//! boosted.json        BoostedModel (optional)
//! ```
//!
//! Artifacts are written by the bootstrap/training step, which is out of scope
//! for the engine. A missing directory or manifest means that step has not run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::models::Predictor;
use crate::error::{ArtifactError, ForecastError};
use crate::features::{feature_names, FEATURE_SCHEMA_VERSION};
use crate::types::ModelKind;

pub const MANIFEST_FILE: &str = "manifest.json";

// ============================================================================
// Manifest
// ============================================================================

/// Describes one crop's trained ensemble.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub crop: String,
    pub feature_schema_version: u32,
    /// Flat feature names in training order
    pub feature_names: Vec<String>,
    /// Members that have an artifact file
    pub members: Vec<ModelKind>,
    /// Free-form provenance (training run, date)
    #[serde(default)]
    pub trained_at: Option<String>,
}

impl ModelManifest {
    /// Manifest for the feature schema this build produces.
    pub fn current(crop: impl Into<String>, members: Vec<ModelKind>) -> Self {
        Self {
            crop: crop.into(),
            feature_schema_version: FEATURE_SCHEMA_VERSION,
            feature_names: feature_names(),
            members,
            trained_at: None,
        }
    }

    /// Reject artifacts trained on a different crop or feature order.
    pub fn check(&self, crop: &str) -> Result<(), ArtifactError> {
        if self.crop != crop {
            return Err(ArtifactError::CropMismatch {
                expected: crop.to_string(),
                found: self.crop.clone(),
            });
        }
        if self.feature_schema_version != FEATURE_SCHEMA_VERSION {
            return Err(ArtifactError::SchemaMismatch(format!(
                "artifacts use schema v{}, engine produces v{}",
                self.feature_schema_version, FEATURE_SCHEMA_VERSION
            )));
        }
        let expected = feature_names();
        if self.feature_names != expected {
            let first_diff = self
                .feature_names
                .iter()
                .zip(&expected)
                .position(|(a, b)| a != b)
                .unwrap_or_else(|| self.feature_names.len().min(expected.len()));
            return Err(ArtifactError::SchemaMismatch(format!(
                "feature names differ at position {first_diff} ({} trained, {} expected)",
                self.feature_names.len(),
                expected.len()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Loaded Models
// ============================================================================

/// One loaded ensemble member.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedMember {
    pub kind: ModelKind,
    /// `<crop>/<kind>`
    pub model_id: String,
    pub predictor: Predictor,
}

/// All enabled members for one crop. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct CropModels {
    pub crop: String,
    pub manifest: ModelManifest,
    pub members: Vec<LoadedMember>,
}

impl CropModels {
    /// Assemble and validate a member set.
    ///
    /// Only kinds in `enabled` are kept. Fails when none remain.
    pub fn assemble(
        manifest: ModelManifest,
        predictors: Vec<Predictor>,
        enabled: &[ModelKind],
    ) -> Result<Self, ArtifactError> {
        let crop = manifest.crop.clone();
        let n_features = manifest.feature_names.len();
        let mut members = Vec::new();
        for predictor in predictors {
            let kind = predictor.kind();
            if !enabled.contains(&kind) {
                continue;
            }
            predictor.validate(n_features)?;
            members.push(LoadedMember {
                kind,
                model_id: format!("{crop}/{kind}"),
                predictor,
            });
        }
        members.sort_by_key(|m| m.kind);
        if members.is_empty() {
            return Err(ArtifactError::NotFound(format!(
                "no enabled ensemble members for crop '{crop}'"
            )));
        }
        Ok(Self {
            crop,
            manifest,
            members,
        })
    }
}

// ============================================================================
// Model Sources
// ============================================================================

/// Where trained models come from.
///
/// Implementations report [`ForecastError::ModelNotFound`] when the crop has
/// never been bootstrapped and [`ForecastError::ModelLoadFailed`] for anything
/// else.
#[async_trait]
pub trait ModelSource: Send + Sync {
    async fn load(&self, crop: &str, enabled: &[ModelKind]) -> Result<CropModels, ForecastError>;

    /// Human-readable identifier for logs.
    fn describe(&self) -> String;
}

/// Reads artifacts from `<root>/<crop>/`.
#[derive(Debug, Clone)]
pub struct FsModelSource {
    root: PathBuf,
}

impl FsModelSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn crop_dir(&self, crop: &str) -> PathBuf {
        self.root.join(crop)
    }

    async fn read(path: &Path) -> Result<Vec<u8>, ArtifactError> {
        tokio::fs::read(path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ArtifactError::NotFound(path.display().to_string())
            } else {
                ArtifactError::Io {
                    path: path.display().to_string(),
                    source: Arc::new(source),
                }
            }
        })
    }

    async fn load_artifacts(
        &self,
        crop: &str,
        enabled: &[ModelKind],
    ) -> Result<CropModels, ArtifactError> {
        let dir = self.crop_dir(crop);
        let manifest_path = dir.join(MANIFEST_FILE);
        let bytes = Self::read(&manifest_path).await?;
        let manifest: ModelManifest =
            serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Parse {
                path: manifest_path.display().to_string(),
                source: Arc::new(source),
            })?;
        manifest.check(crop)?;

        let mut predictors = Vec::new();
        for &kind in enabled {
            if !manifest.members.contains(&kind) {
                warn!(crop, member = %kind, "Enabled member has no trained artifact, skipping");
                continue;
            }
            let path = dir.join(kind.artifact_file());
            let bytes = Self::read(&path).await?;
            predictors.push(Predictor::from_json(kind, &bytes, &path.display().to_string())?);
            debug!(crop, member = %kind, path = %path.display(), "Loaded model artifact");
        }

        CropModels::assemble(manifest, predictors, enabled)
    }

    /// Write a crop's artifacts. Used by the bootstrap tooling and tests.
    pub fn save(&self, models: &CropModels) -> Result<(), ArtifactError> {
        let dir = self.crop_dir(&models.crop);
        let io_err = |path: &Path| {
            let path = path.display().to_string();
            move |source: std::io::Error| ArtifactError::Io {
                path,
                source: Arc::new(source),
            }
        };
        std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest = serde_json::to_vec_pretty(&models.manifest).map_err(|source| {
            ArtifactError::Parse {
                path: manifest_path.display().to_string(),
                source: Arc::new(source),
            }
        })?;
        std::fs::write(&manifest_path, manifest).map_err(io_err(&manifest_path))?;

        for member in &models.members {
            let path = dir.join(member.kind.artifact_file());
            let body = member.predictor.to_json().map_err(|source| ArtifactError::Parse {
                path: path.display().to_string(),
                source: Arc::new(source),
            })?;
            std::fs::write(&path, body).map_err(io_err(&path))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ModelSource for FsModelSource {
    async fn load(&self, crop: &str, enabled: &[ModelKind]) -> Result<CropModels, ForecastError> {
        let manifest_path = self.crop_dir(crop).join(MANIFEST_FILE);
        match self.load_artifacts(crop, enabled).await {
            Ok(models) => {
                info!(
                    crop,
                    members = models.members.len(),
                    root = %self.root.display(),
                    "Loaded crop models"
                );
                Ok(models)
            }
            Err(ArtifactError::NotFound(path)) if path == manifest_path.display().to_string() => {
                Err(ForecastError::ModelNotFound {
                    crop: crop.to_string(),
                })
            }
            Err(source) => Err(ForecastError::ModelLoadFailed {
                crop: crop.to_string(),
                source,
            }),
        }
    }

    fn describe(&self) -> String {
        format!("filesystem:{}", self.root.display())
    }
}

/// In-process model table, for embedding and tests.
///
/// Counts loads so single-flight behaviour can be observed.
#[derive(Debug, Default)]
pub struct MemoryModelSource {
    crops: HashMap<String, CropModels>,
    delay: Option<Duration>,
    loads: AtomicUsize,
}

impl MemoryModelSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_crop(mut self, models: CropModels) -> Self {
        self.crops.insert(models.crop.clone(), models);
        self
    }

    /// Simulated load latency.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelSource for MemoryModelSource {
    async fn load(&self, crop: &str, enabled: &[ModelKind]) -> Result<CropModels, ForecastError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let models = self.crops.get(crop).ok_or_else(|| ForecastError::ModelNotFound {
            crop: crop.to_string(),
        })?;
        let predictors = models.members.iter().map(|m| m.predictor.clone()).collect();
        CropModels::assemble(models.manifest.clone(), predictors, enabled).map_err(|source| {
            ForecastError::ModelLoadFailed {
                crop: crop.to_string(),
                source,
            }
        })
    }

    fn describe(&self) -> String {
        format!("memory:{} crops", self.crops.len())
    }
}
