//! Process-lifetime cache of loaded crop models.
//!
//! Created once at startup and shared (via `Arc`) by every request. The first
//! request for a crop starts its load and parks a [`Shared`] handle to it in
//! the crop's slot; every request arriving while that load is in flight awaits
//! the same handle and receives the same outcome, success or failure. A
//! success replaces the slot with the loaded models. A failure clears it, so a
//! later request retries once the bootstrap step has produced artifacts.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::artifacts::{CropModels, ModelSource};
use crate::config::EnsembleWeightsConfig;
use crate::error::ForecastError;
use crate::types::ModelKind;

type LoadResult = Result<Arc<CropModels>, ForecastError>;
type InFlight = Shared<BoxFuture<'static, LoadResult>>;

enum Slot {
    Loading(InFlight),
    Ready(Arc<CropModels>),
}

/// Init-once, read-many model cache keyed by crop.
pub struct ModelStore {
    source: Arc<dyn ModelSource>,
    enabled: Arc<[ModelKind]>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl std::fmt::Debug for ModelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelStore")
            .field("source", &self.source.describe())
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl ModelStore {
    /// Members with a zero weight are never loaded.
    pub fn new(source: Arc<dyn ModelSource>, weights: &EnsembleWeightsConfig) -> Self {
        Self {
            source,
            enabled: weights.enabled().into_iter().map(|(k, _)| k).collect(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Loaded models for `crop`, loading them on first use.
    #[instrument(skip(self), fields(source = %self.source.describe()))]
    pub async fn get(&self, crop: &str) -> Result<Arc<CropModels>, ForecastError> {
        let in_flight = {
            let mut slots = self.slots.lock().await;
            match slots.get(crop) {
                Some(Slot::Ready(models)) => return Ok(Arc::clone(models)),
                Some(Slot::Loading(load)) => {
                    debug!(crop, "Joining in-flight model load");
                    load.clone()
                }
                None => {
                    let load = self.start_load(crop);
                    slots.insert(crop.to_string(), Slot::Loading(load.clone()));
                    load
                }
            }
        };

        let result = in_flight.clone().await;

        // Every waiter settles the slot; only the first one still finds its
        // own load parked there.
        let mut slots = self.slots.lock().await;
        if let Some(Slot::Loading(parked)) = slots.get(crop) {
            if parked.ptr_eq(&in_flight) {
                match &result {
                    Ok(models) => {
                        slots.insert(crop.to_string(), Slot::Ready(Arc::clone(models)));
                    }
                    Err(_) => {
                        slots.remove(crop);
                    }
                }
            }
        }
        result
    }

    fn start_load(&self, crop: &str) -> InFlight {
        let source = Arc::clone(&self.source);
        let enabled = Arc::clone(&self.enabled);
        let crop = crop.to_string();
        async move {
            info!(crop = %crop, "Loading crop models");
            source.load(&crop, &enabled).await.map(Arc::new)
        }
        .boxed()
        .shared()
    }

    /// Crops whose models are currently resident.
    pub async fn loaded_crops(&self) -> Vec<String> {
        let slots = self.slots.lock().await;
        let mut crops: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(crop, _)| crop.clone())
            .collect();
        crops.sort();
        crops
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::config::BloomConfig;
    use crate::ensemble::{baseline_models, MemoryModelSource};

    fn store_over(source: &Arc<MemoryModelSource>) -> Arc<ModelStore> {
        let weights = BloomConfig::default().ensemble_weights;
        let source: Arc<dyn ModelSource> = Arc::clone(source) as Arc<dyn ModelSource>;
        Arc::new(ModelStore::new(source, &weights))
    }

    #[tokio::test]
    async fn test_failed_load_is_shared_by_concurrent_waiters() {
        let source = Arc::new(MemoryModelSource::new().with_delay(Duration::from_millis(100)));
        let store = store_over(&source);

        let started = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.get("almond").await })
            })
            .collect();
        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, ForecastError::ModelNotFound { .. }));
        }

        assert_eq!(source.load_count(), 1);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(store.loaded_crops().await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let source = Arc::new(MemoryModelSource::new());
        let store = store_over(&source);
        assert!(store.get("almond").await.is_err());
        assert!(store.get("almond").await.is_err());
        assert_eq!(source.load_count(), 2);
    }

    #[tokio::test]
    async fn test_ready_models_are_served_without_reloading() {
        let config = BloomConfig::default();
        let almond = baseline_models("almond", config.crop("almond").unwrap());
        let source = Arc::new(MemoryModelSource::new().with_crop(almond));
        let store = store_over(&source);

        let first = store.get("almond").await.unwrap();
        let second = store.get("almond").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.load_count(), 1);
        assert_eq!(store.loaded_crops().await, vec!["almond".to_string()]);
    }
}
