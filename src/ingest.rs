//! Catalog ingestion: embedding items into the vector store.
//!
//! `ingest_catalog` embeds every catalog item that has no stored vector yet.
//! Image materialization (local reads, remote fetches, temp JPEG conversion)
//! runs in parallel; encoding runs in batches through the one model session.
//! A bad image skips that item with a warning, it never aborts the run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::catalog::{self, CatalogItem, ImageLocation};
use crate::config::FetchConfig;
use crate::fetch;
use crate::images;
use crate::services::ServiceRegistry;

/// Items per encode call. Small enough for steady progress output.
const EMBED_BATCH: usize = 32;

/// What one ingestion run did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub embedded: usize,
    pub skipped: usize,
    pub already_present: usize,
}

/// Embed every catalog item that has no stored vector, then persist the
/// sidecar. Returns a summary of what happened.
///
/// The catalog file is re-read here, so items appended since the store was
/// opened are picked up without a restart. The model is only demanded when
/// there is actually something to embed.
pub fn ingest_catalog(
    registry: &ServiceRegistry,
    show_progress: bool,
) -> anyhow::Result<IngestReport> {
    let config = registry.config();
    let items = catalog::load_catalog(&config.catalog_path())?;

    let store = registry.store()?;

    let mut pending = Vec::new();
    let mut already_present = 0usize;
    for item in items {
        if store.contains(&item.id)? {
            already_present += 1;
        } else {
            pending.push(item);
        }
    }

    if pending.is_empty() {
        log::info!("all {already_present} catalog items already embedded");
        return Ok(IngestReport {
            embedded: 0,
            skipped: 0,
            already_present,
        });
    }

    let encoder = registry.encoder()?;

    log::info!("embedding {} catalog items", pending.len());

    let images_dir = config.images_dir();
    let fetch_config = config.fetch.clone();

    let materialized: Vec<(CatalogItem, Result<NamedTempFile, String>)> = pending
        .into_par_iter()
        .map(|item| {
            let result = materialize(&item, &images_dir, &fetch_config);
            (item, result)
        })
        .collect();

    let mut skipped = 0usize;
    let mut ready: Vec<(CatalogItem, NamedTempFile)> = Vec::new();
    for (item, result) in materialized {
        match result {
            Ok(file) => ready.push((item, file)),
            Err(reason) => {
                log::warn!("skipping {}: {reason}", item.id);
                skipped += 1;
            }
        }
    }

    let bar = if show_progress {
        let bar = ProgressBar::new(ready.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} embedded")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Some(bar)
    } else {
        None
    };

    // Materialization already validated every file, so an encode failure
    // here is a model problem and worth aborting for. Nothing has been
    // persisted yet, so an abort leaves the sidecar as it was.
    let mut embedded = 0usize;
    for chunk in ready.chunks(EMBED_BATCH) {
        let paths: Vec<PathBuf> = chunk
            .iter()
            .map(|(_, file)| file.path().to_path_buf())
            .collect();

        let vectors = encoder
            .encode_files(&paths)
            .context("batch embedding failed")?;

        for ((item, _), vector) in chunk.iter().zip(vectors) {
            store.insert(item.clone(), vector)?;
            embedded += 1;
        }

        if let Some(bar) = &bar {
            bar.inc(chunk.len() as u64);
        }
    }

    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    store.persist()?;
    log::info!("ingestion done: {embedded} embedded, {skipped} skipped, {already_present} already present");

    Ok(IngestReport {
        embedded,
        skipped,
        already_present,
    })
}

/// Add one item to the catalog: embed its image, keep a JPEG copy under the
/// image directory, append it to the catalog file, and index it.
///
/// An empty id gets a generated ULID. The stored copy becomes the item's
/// `image_ref`, so later re-ingestion reads the local file.
pub fn add_item(
    registry: &ServiceRegistry,
    mut item: CatalogItem,
    image_bytes: &[u8],
) -> anyhow::Result<CatalogItem> {
    if item.id.is_empty() {
        item.id = rusty_ulid::generate_ulid_string().to_lowercase();
    }
    if item.name.trim().is_empty() {
        anyhow::bail!("item name must not be empty");
    }
    if item.category.trim().is_empty() {
        anyhow::bail!("item category must not be empty");
    }

    let config = registry.config();
    let catalog_path = config.catalog_path();

    let mut items = catalog::load_catalog(&catalog_path)?;
    if items.iter().any(|existing| existing.id == item.id) {
        anyhow::bail!("item {} already exists in the catalog", item.id);
    }

    let image = images::decode_image(image_bytes)?;
    let prepared = images::prepare_for_encoding(image);

    // Demand the encoder before touching the image directory so an
    // initialization failure leaves nothing behind.
    let encoder = registry.encoder()?;

    let images_dir = config.images_dir();
    fs::create_dir_all(&images_dir)
        .with_context(|| format!("failed to create {}", images_dir.display()))?;
    let file_name = format!("{}.jpg", item.id);
    let image_path = images_dir.join(&file_name);
    images::save_jpeg(&image_path, &prepared)?;
    item.image_ref = file_name;

    let vector = match encoder.encode_files(&[image_path.clone()]) {
        Ok(mut vectors) => vectors
            .pop()
            .context("model returned no embedding for the image")?,
        Err(err) => {
            // Don't leave an image file around for an item that was never
            // added.
            let _ = fs::remove_file(&image_path);
            return Err(err).context("failed to embed the image");
        }
    };

    items.push(item.clone());
    catalog::save_catalog(&catalog_path, &items)?;

    // If persisting fails after this point the sidecar just lags the
    // catalog; the next ingestion run re-embeds from the stored JPEG.
    let store = registry.store()?;
    store.insert(item.clone(), vector)?;
    store.persist()?;

    log::info!("added {} ({})", item.id, item.name);
    Ok(item)
}

/// Turn an item's image reference into a temp JPEG the encoder can read.
fn materialize(
    item: &CatalogItem,
    images_dir: &Path,
    fetch_config: &FetchConfig,
) -> Result<NamedTempFile, String> {
    let bytes = match item.image_location(images_dir) {
        ImageLocation::Local(path) => fs::read(&path)
            .map_err(|err| format!("cannot read {}: {err}", path.display()))?,
        ImageLocation::Remote(url) => {
            fetch::fetch_image(&url, fetch_config).map_err(|err| err.to_string())?
        }
    };

    let image = images::decode_image(&bytes).map_err(|err| err.to_string())?;
    let prepared = images::prepare_for_encoding(image);
    images::write_temp_jpeg(&prepared).map_err(|err| err.to_string())
}
