use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Base directory for config, catalog, images, and the model cache.
    /// Defaults to $LOOKALIKE_BASE_PATH, then ~/.local/share/lookalike.
    #[clap(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP service.
    Serve {},

    /// Embed every catalog item that has no stored vector yet.
    Ingest {},

    /// Search the catalog with a query image.
    Search {
        /// Path to the query image, or an http(s) URL.
        image: String,

        /// Minimum similarity in [0, 1].
        #[clap(short, long)]
        min_score: Option<f32>,

        /// Number of results to return.
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Restrict the search to one category.
        #[clap(short, long)]
        category: Option<String>,

        /// After fetching, re-filter the results locally at this threshold
        /// and report how many survived.
        #[clap(long)]
        refine: Option<f32>,
    },

    /// List catalog items in insertion order, without scores.
    Browse {
        /// Restrict the listing to one category.
        #[clap(short, long)]
        category: Option<String>,

        /// Items to skip.
        #[clap(long, default_value = "0")]
        offset: usize,

        /// Page size.
        #[clap(short, long, default_value = "20")]
        limit: usize,
    },

    /// Add one item to the catalog and index it.
    Add {
        /// Path to the item's image.
        image: PathBuf,

        /// Item id. Generated when omitted.
        #[clap(long)]
        id: Option<String>,

        /// Item name.
        #[clap(short, long)]
        name: String,

        /// Item category.
        #[clap(short, long)]
        category: String,

        /// Item price.
        #[clap(short, long, default_value = "0.0")]
        price: f64,

        /// Item rating.
        #[clap(short, long, default_value = "0.0")]
        rating: f32,
    },

    /// Report what is on disk: catalog size, stored vectors, model.
    Status {},

    /// Delete the stored vectors. The catalog itself is untouched;
    /// the next ingestion re-embeds everything.
    Reset {
        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },
}
