use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

mod catalog;
mod cli;
mod config;
mod embedding;
mod error;
mod fetch;
mod filter;
mod images;
mod index;
mod ingest;
mod search;
mod services;
mod storage;
mod store;
#[cfg(test)]
mod tests;
mod web;

use config::Config;
use inquire::error::InquireResult;
use search::{ImageSource, SearchOptions, Searcher};
use services::ServiceRegistry;

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let base_path = config::resolve_base_path(args.data_dir.as_deref());
    let config = Config::load_with(&base_path);
    let registry = Arc::new(ServiceRegistry::new(config));

    match args.command {
        cli::Command::Serve {} => {
            web::start_daemon(registry);
            Ok(())
        }

        cli::Command::Ingest {} => {
            let report = ingest::ingest_catalog(&registry, true)?;
            println!("{}", serde_json::to_string_pretty(&report).unwrap());
            Ok(())
        }

        cli::Command::Search {
            image,
            min_score,
            top_k,
            category,
            refine,
        } => {
            let source = if image.starts_with("http://") || image.starts_with("https://") {
                ImageSource::Url(image)
            } else {
                let bytes = std::fs::read(&image)
                    .with_context(|| format!("failed to read {image}"))?;
                ImageSource::Bytes(bytes)
            };

            let opts = SearchOptions {
                min_score,
                top_k,
                category,
            };
            let outcome = Searcher::new(registry).search(source, &opts)?;

            match refine {
                // Local re-filter pass over the fetched set.
                Some(threshold) => {
                    let kept = filter::reapply(&outcome.hits, threshold);
                    println!("{}", serde_json::to_string_pretty(&kept).unwrap());
                    println!(
                        "{} of {} fetched results at or above {threshold:.2}",
                        kept.len(),
                        outcome.hits.len()
                    );
                }
                None => {
                    println!("{}", serde_json::to_string_pretty(&outcome).unwrap());
                }
            }
            Ok(())
        }

        cli::Command::Browse {
            category,
            offset,
            limit,
        } => {
            let store = registry.store()?;
            let (products, total) = store.browse(category.as_deref(), offset, limit)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "products": products,
                    "total": total,
                }))
                .unwrap()
            );
            Ok(())
        }

        cli::Command::Add {
            image,
            id,
            name,
            category,
            price,
            rating,
        } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;

            let item = catalog::CatalogItem {
                id: id.unwrap_or_default(),
                name,
                category,
                price,
                rating,
                image_ref: String::new(),
            };

            let added = ingest::add_item(&registry, item, &bytes)?;
            println!("{}", serde_json::to_string_pretty(&added).unwrap());
            Ok(())
        }

        cli::Command::Status {} => {
            let config = registry.config();
            let items = catalog::load_catalog(&config.catalog_path())?;

            let vectors = storage::VectorFile::new(config.vectors_path());
            let embedded = if vectors.exists() {
                match vectors.load(&embedding::model_id(&config.embedding.model)) {
                    Ok(loaded) => Some(loaded.entries.len()),
                    // Present but unusable counts as nothing embedded.
                    Err(_) => Some(0),
                }
            } else {
                None
            };

            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "base_path": config.base_path(),
                    "model": config.embedding.model,
                    "catalog_items": items.len(),
                    "embedded_vectors": embedded,
                }))
                .unwrap()
            );
            Ok(())
        }

        cli::Command::Reset { yes } => {
            if !yes {
                match inquire::prompt_confirmation(
                    "Delete all stored vectors? The next ingestion will re-embed every item.",
                ) {
                    InquireResult::Ok(true) => {}
                    InquireResult::Ok(false) => return Ok(()),
                    InquireResult::Err(err) => bail!("An error occurred: {}", err),
                }
            }

            let vectors = storage::VectorFile::new(registry.config().vectors_path());
            vectors.delete()?;
            registry.reset();

            println!("stored vectors deleted");
            Ok(())
        }
    }
}
