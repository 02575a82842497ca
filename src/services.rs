//! Lazy lifecycle management for the expensive services.
//!
//! The embedding generator and the vector store are both constructed on
//! first demand, each behind its own lock so a slow model download never
//! blocks a store open. Construction is exactly-once: concurrent first
//! callers race to the write lock, the winner constructs, the rest observe
//! the published handle. A failed construction is recorded with its reason
//! and the next demand retries.
//!
//! Uses RwLock over a three-state slot instead of OnceLock because
//! get_or_try_init is unstable, and a OnceLock could not model
//! failed-then-retry or reset.

use std::sync::{Arc, RwLock, TryLockError};

use serde::Serialize;

use crate::config::Config;
use crate::embedding::ImageEncoder;
use crate::error::{SearchError, ServiceKind};
use crate::store::CatalogStore;

/// Externally visible lifecycle state of one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Uninitialized,
    Ready,
    Failed(String),
}

enum Slot<T> {
    Uninit,
    Ready(Arc<T>),
    Failed(String),
}

/// One lazily constructed service.
pub struct LazyService<T> {
    slot: RwLock<Slot<T>>,
}

impl<T> LazyService<T> {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Slot::Uninit),
        }
    }

    /// Get the service handle, constructing on first demand.
    ///
    /// If the previous attempt failed, this demand retries. Losers of a
    /// construction race block on the write lock, then observe whatever
    /// the winner published.
    pub fn get_or_init<F, E>(&self, init: F) -> Result<Arc<T>, String>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::fmt::Display,
    {
        {
            let slot = self
                .slot
                .read()
                .map_err(|e| format!("service lock poisoned: {e}"))?;
            if let Slot::Ready(service) = &*slot {
                return Ok(service.clone());
            }
        }

        let mut slot = self
            .slot
            .write()
            .map_err(|e| format!("service lock poisoned: {e}"))?;

        // Re-check: another caller may have settled while we waited.
        if let Slot::Ready(service) = &*slot {
            return Ok(service.clone());
        }

        match init() {
            Ok(service) => {
                let service = Arc::new(service);
                *slot = Slot::Ready(service.clone());
                Ok(service)
            }
            Err(err) => {
                let reason = err.to_string();
                *slot = Slot::Failed(reason.clone());
                Err(reason)
            }
        }
    }

    /// The handle if one is already constructed. Never constructs and
    /// never waits.
    pub fn get_if_ready(&self) -> Option<Arc<T>> {
        match self.slot.try_read() {
            Ok(slot) => match &*slot {
                Slot::Ready(service) => Some(service.clone()),
                _ => None,
            },
            Err(_) => None,
        }
    }

    /// Report lifecycle state without constructing anything.
    ///
    /// While a construction is in flight the slot is still not ready, so
    /// an unavailable read lock reports `Uninitialized` rather than wait.
    pub fn status(&self) -> ServiceStatus {
        match self.slot.try_read() {
            Ok(slot) => match &*slot {
                Slot::Uninit => ServiceStatus::Uninitialized,
                Slot::Ready(_) => ServiceStatus::Ready,
                Slot::Failed(reason) => ServiceStatus::Failed(reason.clone()),
            },
            Err(TryLockError::WouldBlock) => ServiceStatus::Uninitialized,
            Err(TryLockError::Poisoned(_)) => {
                ServiceStatus::Failed("service lock poisoned".to_string())
            }
        }
    }

    /// Discard the current state, returning any evicted handle.
    ///
    /// In-flight holders keep their Arc; new demands construct fresh.
    /// Always succeeds, even over a poisoned lock.
    pub fn reset(&self) -> Option<Arc<T>> {
        let mut slot = match self.slot.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        match std::mem::replace(&mut *slot, Slot::Uninit) {
            Slot::Ready(service) => Some(service),
            _ => None,
        }
    }
}

impl<T> Default for LazyService<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of every managed service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryStatus {
    pub embedding_generator: ServiceStatus,
    pub vector_store: ServiceStatus,
}

/// Registry owning one lazy slot per service.
///
/// The two slots are deliberately independent: demanding the store neither
/// constructs nor waits on the encoder, and vice versa.
pub struct ServiceRegistry {
    config: Config,
    encoder: LazyService<ImageEncoder>,
    store: LazyService<CatalogStore>,
}

impl ServiceRegistry {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            encoder: LazyService::new(),
            store: LazyService::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The embedding generator, constructed on first demand.
    pub fn encoder(&self) -> Result<Arc<ImageEncoder>, SearchError> {
        let model = self.config.embedding.model.clone();
        let cache_dir = self.config.base_path().to_path_buf();
        self.encoder
            .get_or_init(|| {
                log::info!("initializing embedding generator with model '{model}'");
                ImageEncoder::new(&model, cache_dir)
            })
            .map_err(|reason| SearchError::Initialization {
                service: ServiceKind::EmbeddingGenerator,
                reason,
            })
    }

    /// The vector store, constructed on first demand.
    pub fn store(&self) -> Result<Arc<CatalogStore>, SearchError> {
        let catalog_path = self.config.catalog_path();
        let vectors_path = self.config.vectors_path();
        let model = self.config.embedding.model.clone();
        self.store
            .get_or_init(|| {
                log::info!("opening vector store at {}", vectors_path.display());
                CatalogStore::open(&catalog_path, vectors_path.clone(), &model)
            })
            .map_err(|reason| SearchError::Initialization {
                service: ServiceKind::VectorStore,
                reason,
            })
    }

    /// The store handle only if it is already constructed.
    pub fn store_if_ready(&self) -> Option<Arc<CatalogStore>> {
        self.store.get_if_ready()
    }

    /// Pure read of both lifecycle states. Never constructs.
    pub fn status(&self) -> RegistryStatus {
        RegistryStatus {
            embedding_generator: self.encoder.status(),
            vector_store: self.store.status(),
        }
    }

    /// Drop both services. Searches in flight finish on their own handles;
    /// the next demand reconstructs from scratch.
    pub fn reset(&self) {
        if self.encoder.reset().is_some() {
            log::info!("embedding generator evicted");
        }
        if self.store.reset().is_some() {
            log::info!("vector store evicted");
        }
    }
}
