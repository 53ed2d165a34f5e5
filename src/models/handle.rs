//! Shared handle to the model being served

use super::store::{ModelStore, StoreError};
use super::Model;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Process-wide reference to the serving model.
///
/// The lock guards only the `Arc` itself: readers clone it and score
/// without holding the lock, and a replacement swaps in a model that is
/// already fully loaded. A prediction in flight during a swap finishes on
/// the model it started with.
pub struct ModelHandle {
    current: RwLock<Arc<dyn Model>>,
}

impl ModelHandle {
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self {
            current: RwLock::new(model),
        }
    }

    /// Load the initial model from a store.
    pub fn load(store: &dyn ModelStore) -> Result<Self, StoreError> {
        Ok(Self::new(store.load()?))
    }

    /// The model to score with right now.
    pub fn current(&self) -> Arc<dyn Model> {
        // A poisoned lock still holds a complete Arc
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in a new model, returning the previous one.
    pub fn replace(&self, model: Arc<dyn Model>) -> Arc<dyn Model> {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, model)
    }

    /// Load a fresh model from `store` and swap it in. On failure the
    /// current model stays in place.
    pub fn reload(&self, store: &dyn ModelStore) -> Result<(), StoreError> {
        let fresh = store.load()?;
        let name = fresh.name().to_string();
        let previous = self.replace(fresh);
        info!(previous = %previous.name(), current = %name, "Model handle replaced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::store::ModelManifest;
    use crate::models::ModelError;
    use crate::types::FeatureRow;
    use std::sync::Mutex;

    struct Constant {
        name: &'static str,
        columns: Vec<String>,
    }

    impl Model for Constant {
        fn name(&self) -> &str {
            self.name
        }

        fn feature_names(&self) -> &[String] {
            &self.columns
        }

        fn predict_probability(&self, _row: &FeatureRow) -> Result<f64, ModelError> {
            Ok(0.5)
        }
    }

    fn constant(name: &'static str) -> Arc<dyn Model> {
        Arc::new(Constant {
            name,
            columns: Vec::new(),
        })
    }

    /// Hands out queued models, failing once empty.
    struct QueueStore(Mutex<Vec<Arc<dyn Model>>>);

    impl ModelStore for QueueStore {
        fn load(&self) -> Result<Arc<dyn Model>, StoreError> {
            self.0
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| StoreError::Backend("no model queued".to_string()))
        }

        fn save(&self, _name: &str, _manifest: &ModelManifest) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_replace_keeps_in_flight_reference() {
        let handle = ModelHandle::new(constant("first"));
        let in_flight = handle.current();

        let previous = handle.replace(constant("second"));

        assert_eq!(previous.name(), "first");
        assert_eq!(in_flight.name(), "first");
        assert_eq!(handle.current().name(), "second");
    }

    #[test]
    fn test_reload_failure_keeps_current_model() {
        let store = QueueStore(Mutex::new(vec![constant("reloaded")]));
        let handle = ModelHandle::new(constant("initial"));

        handle.reload(&store).unwrap();
        assert_eq!(handle.current().name(), "reloaded");

        assert!(handle.reload(&store).is_err());
        assert_eq!(handle.current().name(), "reloaded");
    }

    #[test]
    fn test_concurrent_readers_during_replace() {
        let handle = Arc::new(ModelHandle::new(constant("a")));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let name = handle.current().name().to_string();
                        assert!(name == "a" || name == "b");
                    }
                })
            })
            .collect();
        for _ in 0..100 {
            handle.replace(constant("b"));
            handle.replace(constant("a"));
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
