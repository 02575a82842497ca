//! Product catalog records and the JSON catalog file.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub rating: f32,
    /// Either an `http(s)://` URL or a file name under the catalog image
    /// directory.
    pub image_ref: String,
}

/// Where an item's source image lives.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageLocation {
    Remote(String),
    Local(PathBuf),
}

impl CatalogItem {
    pub fn image_location(&self, images_dir: &Path) -> ImageLocation {
        if self.image_ref.starts_with("http://") || self.image_ref.starts_with("https://") {
            ImageLocation::Remote(self.image_ref.clone())
        } else {
            ImageLocation::Local(images_dir.join(&self.image_ref))
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed catalog file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate item id: {0}")]
    DuplicateId(String),
}

/// Load the catalog file. A missing file is an empty catalog.
pub fn load_catalog(path: &Path) -> Result<Vec<CatalogItem>, CatalogError> {
    if !path.exists() {
        log::warn!("catalog file {} not found, starting empty", path.display());
        return Ok(Vec::new());
    }

    let raw = fs::read_to_string(path)?;
    let items: Vec<CatalogItem> = serde_json::from_str(&raw)?;

    let mut seen = HashSet::new();
    for item in &items {
        if !seen.insert(item.id.as_str()) {
            return Err(CatalogError::DuplicateId(item.id.clone()));
        }
    }

    Ok(items)
}

/// Write the catalog file atomically: temp file, then rename.
pub fn save_catalog(path: &Path, items: &[CatalogItem]) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let payload = serde_json::to_string_pretty(items)?;

    let mut file = fs::File::create(&temp_path)?;
    file.write_all(payload.as_bytes())?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;

    Ok(())
}
