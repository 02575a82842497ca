//! The catalog vector store.
//!
//! Joins catalog metadata with persisted embeddings and serves search and
//! browse queries from memory. Opening the store touches only config and
//! files on disk, never the embedding model: the sidecar is validated
//! against a hash of the configured model name, and an unusable sidecar
//! degrades to an empty index that re-ingestion can rebuild.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::catalog::{self, CatalogError, CatalogItem};
use crate::embedding;
use crate::index::{CatalogIndex, IndexError, SearchHit};
use crate::storage::{VectorFile, VectorFileError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("vector file error: {0}")]
    Vectors(#[from] VectorFileError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("store lock poisoned")]
    LockPoisoned,
}

#[derive(Debug)]
pub struct CatalogStore {
    index: RwLock<CatalogIndex>,
    vectors: VectorFile,
    model_id: [u8; 32],
}

impl CatalogStore {
    /// Open the store from the catalog file and vectors sidecar.
    ///
    /// A malformed catalog file is a hard error. A missing, stale, or
    /// corrupt sidecar is not: those start with an empty index and a
    /// warning, since ingestion can always rebuild the vectors.
    pub fn open(
        catalog_path: &Path,
        vectors_path: PathBuf,
        model_name: &str,
    ) -> Result<Self, StoreError> {
        let items = catalog::load_catalog(catalog_path)?;
        let by_id: HashMap<&str, &CatalogItem> =
            items.iter().map(|item| (item.id.as_str(), item)).collect();

        let vectors = VectorFile::new(vectors_path);
        let model_id = embedding::model_id(model_name);

        let index = if vectors.exists() {
            match vectors.load(&model_id) {
                Ok(loaded) if loaded.entries.is_empty() => CatalogIndex::new(),
                Ok(loaded) => {
                    let mut index =
                        CatalogIndex::with_dimensions(loaded.dimensions, loaded.entries.len());
                    let mut stale = 0usize;
                    for (id, embedding) in loaded.entries {
                        match by_id.get(id.as_str()) {
                            Some(item) => {
                                if let Err(err) = index.insert((*item).clone(), embedding) {
                                    log::warn!("dropping stored vector for {id}: {err}");
                                }
                            }
                            None => stale += 1,
                        }
                    }
                    if stale > 0 {
                        log::warn!("{stale} stored vectors have no catalog entry, dropping");
                    }
                    index
                }
                Err(err) => {
                    log::warn!("vector file unusable ({err}), starting with an empty index");
                    CatalogIndex::new()
                }
            }
        } else {
            CatalogIndex::new()
        };

        log::info!(
            "catalog store ready: {} of {} items embedded",
            index.len(),
            items.len()
        );

        Ok(Self {
            index: RwLock::new(index),
            vectors,
            model_id,
        })
    }

    /// Ranked similarity search. Ordering and clamping are handled by the
    /// index; this adds only locking.
    pub fn search(
        &self,
        query: &[f32],
        category: Option<&str>,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let index = self.index.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(index.search(query, category, threshold, limit)?)
    }

    /// Score-free browse in insertion order, with the pre-pagination total.
    pub fn browse(
        &self,
        category: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<CatalogItem>, usize), StoreError> {
        let index = self.index.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(index.browse(category, offset, limit))
    }

    pub fn categories(&self) -> Result<Vec<String>, StoreError> {
        let index = self.index.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(index.categories())
    }

    pub fn get(&self, id: &str) -> Result<Option<CatalogItem>, StoreError> {
        let index = self.index.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(index.get(id).map(|entry| entry.item.clone()))
    }

    pub fn contains(&self, id: &str) -> Result<bool, StoreError> {
        let index = self.index.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(index.contains(id))
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let index = self.index.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(index.len())
    }

    /// Insert or update an embedded item. In-memory only; call
    /// [`persist`](Self::persist) to write the sidecar.
    pub fn insert(&self, item: CatalogItem, embedding: Vec<f32>) -> Result<(), StoreError> {
        let mut index = self.index.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(index.insert(item, embedding)?)
    }

    pub fn remove(&self, id: &str) -> Result<Option<CatalogItem>, StoreError> {
        let mut index = self.index.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(index.remove(id).map(|entry| entry.item))
    }

    /// Write the current index to the sidecar file atomically.
    pub fn persist(&self) -> Result<(), StoreError> {
        let index = self.index.read().map_err(|_| StoreError::LockPoisoned)?;
        let ordered = index.entries_ordered();
        self.vectors.save(
            ordered
                .iter()
                .map(|entry| (entry.item.id.as_str(), entry.embedding.as_slice())),
            ordered.len(),
            index.dimensions().unwrap_or(0),
            &self.model_id,
        )?;
        Ok(())
    }

    /// Delete the sidecar and clear the in-memory index.
    pub fn wipe(&self) -> Result<(), StoreError> {
        let mut index = self.index.write().map_err(|_| StoreError::LockPoisoned)?;
        index.clear();
        self.vectors.delete()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn item(id: &str, category: &str) -> CatalogItem {
        CatalogItem {
            id: id.to_string(),
            name: format!("Item {id}"),
            category: category.to_string(),
            price: 25.0,
            rating: 4.2,
            image_ref: format!("{id}.jpg"),
        }
    }

    fn open_store(dir: &TempDir, model: &str) -> CatalogStore {
        CatalogStore::open(
            &dir.path().join("catalog.json"),
            dir.path().join("vectors.bin"),
            model,
        )
        .unwrap()
    }

    fn write_catalog(dir: &TempDir, items: &[CatalogItem]) {
        catalog::save_catalog(&dir.path().join("catalog.json"), items).unwrap();
    }

    #[test]
    fn test_open_with_no_files_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, "clip-vit-b-32");
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_persist_and_reopen_joins_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let items = vec![item("p-1", "shoes"), item("p-2", "bags")];
        write_catalog(&dir, &items);

        let store = open_store(&dir, "clip-vit-b-32");
        store.insert(items[0].clone(), vec![1.0, 0.0, 0.0]).unwrap();
        store.insert(items[1].clone(), vec![0.0, 1.0, 0.0]).unwrap();
        store.persist().unwrap();

        let reopened = open_store(&dir, "clip-vit-b-32");
        assert_eq!(reopened.len().unwrap(), 2);

        let got = reopened.get("p-2").unwrap().unwrap();
        assert_eq!(got.name, "Item p-2");
        assert_eq!(got.category, "bags");

        // Insertion order survives the round trip.
        let (page, total) = reopened.browse(None, 0, 10).unwrap();
        assert_eq!(total, 2);
        assert_eq!(page[0].id, "p-1");
        assert_eq!(page[1].id, "p-2");
    }

    #[test]
    fn test_model_change_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let items = vec![item("p-1", "shoes")];
        write_catalog(&dir, &items);

        let store = open_store(&dir, "clip-vit-b-32");
        store.insert(items[0].clone(), vec![1.0, 0.0]).unwrap();
        store.persist().unwrap();

        let reopened = open_store(&dir, "resnet-50");
        assert_eq!(reopened.len().unwrap(), 0);
    }

    #[test]
    fn test_vectors_without_catalog_entry_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let items = vec![item("kept", "shoes"), item("removed", "shoes")];
        write_catalog(&dir, &items);

        let store = open_store(&dir, "clip-vit-b-32");
        store.insert(items[0].clone(), vec![1.0, 0.0]).unwrap();
        store.insert(items[1].clone(), vec![0.0, 1.0]).unwrap();
        store.persist().unwrap();

        // Shrink the catalog, then reopen against the old sidecar.
        write_catalog(&dir, &items[..1]);
        let reopened = open_store(&dir, "clip-vit-b-32");
        assert_eq!(reopened.len().unwrap(), 1);
        assert!(reopened.contains("kept").unwrap());
        assert!(!reopened.contains("removed").unwrap());
    }

    #[test]
    fn test_corrupt_sidecar_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let items = vec![item("p-1", "shoes")];
        write_catalog(&dir, &items);

        let store = open_store(&dir, "clip-vit-b-32");
        store.insert(items[0].clone(), vec![1.0, 0.0]).unwrap();
        store.persist().unwrap();

        let vectors_path = dir.path().join("vectors.bin");
        let mut raw = std::fs::read(&vectors_path).unwrap();
        raw[10] ^= 0xFF;
        std::fs::write(&vectors_path, &raw).unwrap();

        let reopened = open_store(&dir, "clip-vit-b-32");
        assert_eq!(reopened.len().unwrap(), 0);
    }

    #[test]
    fn test_malformed_catalog_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("catalog.json"), "{broken").unwrap();

        let result = CatalogStore::open(
            &dir.path().join("catalog.json"),
            dir.path().join("vectors.bin"),
            "clip-vit-b-32",
        );
        assert!(matches!(result, Err(StoreError::Catalog(_))));
    }

    #[test]
    fn test_search_and_categories_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, "clip-vit-b-32");

        store.insert(item("shoe", "shoes"), vec![1.0, 0.0, 0.0]).unwrap();
        store.insert(item("bag", "bags"), vec![0.6, 0.8, 0.0]).unwrap();

        let hits = store.search(&[1.0, 0.0, 0.0], None, 0.0, 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].item.id, "shoe");
        assert!(hits[0].similarity > hits[1].similarity);

        let hits = store.search(&[1.0, 0.0, 0.0], Some("bags"), 0.0, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item.id, "bag");

        assert_eq!(
            store.categories().unwrap(),
            vec!["bags".to_string(), "shoes".to_string()]
        );
    }

    #[test]
    fn test_remove_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let items = vec![item("p-1", "shoes"), item("p-2", "shoes")];
        write_catalog(&dir, &items);

        let store = open_store(&dir, "clip-vit-b-32");
        store.insert(items[0].clone(), vec![1.0, 0.0]).unwrap();
        store.insert(items[1].clone(), vec![0.0, 1.0]).unwrap();

        let removed = store.remove("p-1").unwrap();
        assert_eq!(removed.unwrap().id, "p-1");
        store.persist().unwrap();

        let reopened = open_store(&dir, "clip-vit-b-32");
        assert_eq!(reopened.len().unwrap(), 1);
        assert!(reopened.contains("p-2").unwrap());
    }

    #[test]
    fn test_wipe_clears_index_and_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, "clip-vit-b-32");
        store.insert(item("p-1", "shoes"), vec![1.0, 0.0]).unwrap();
        store.persist().unwrap();
        assert!(dir.path().join("vectors.bin").exists());

        store.wipe().unwrap();
        assert_eq!(store.len().unwrap(), 0);
        assert!(!dir.path().join("vectors.bin").exists());
    }
}
