use std::path::{Path, PathBuf};

use homedir::my_home;
use serde::{Deserialize, Serialize};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Default image embedding model (CLIP ViT-B/32, 512 dimensions)
const DEFAULT_EMBEDDING_MODEL: &str = "clip-vit-b-32";

/// Default similarity threshold for search
const DEFAULT_MIN_SCORE: f32 = 0.0;
const DEFAULT_TOP_K: usize = 5;
const DEFAULT_MAX_TOP_K: usize = 50;

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP daemon binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Upper bound on request bodies, including uploaded images
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name for image embeddings (e.g., "clip-vit-b-32")
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default similarity threshold [0.0, 1.0] when the request omits one
    #[serde(default = "default_min_score")]
    pub default_min_score: f32,

    /// Default number of results when the request omits top_k
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Hard cap on top_k; larger requests are clamped
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_min_score: DEFAULT_MIN_SCORE,
            default_top_k: DEFAULT_TOP_K,
            max_top_k: DEFAULT_MAX_TOP_K,
        }
    }
}

fn default_min_score() -> f32 {
    DEFAULT_MIN_SCORE
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_max_top_k() -> usize {
    DEFAULT_MAX_TOP_K
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Timeout for fetching a query image by URL, in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    /// Upper bound on a fetched image body
    #[serde(default = "default_max_upload_bytes")]
    pub max_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    fn validate(&self) {
        self.server
            .bind_addr
            .parse::<std::net::SocketAddr>()
            .unwrap_or_else(|_| {
                panic!(
                    "server.bind_addr is not a valid address: {}",
                    self.server.bind_addr
                )
            });

        if self.server.max_upload_bytes == 0 {
            panic!("server.max_upload_bytes must be greater than 0");
        }

        if self.embedding.model.trim().is_empty() {
            panic!("embedding.model must not be empty");
        }

        if !(0.0..=1.0).contains(&self.search.default_min_score) {
            panic!(
                "search.default_min_score must be between 0.0 and 1.0, got {}",
                self.search.default_min_score
            );
        }

        if self.search.default_top_k == 0 {
            panic!("search.default_top_k must be greater than 0");
        }

        if self.search.max_top_k < self.search.default_top_k {
            panic!(
                "search.max_top_k ({}) must not be below search.default_top_k ({})",
                self.search.max_top_k, self.search.default_top_k
            );
        }

        if self.fetch.timeout_secs == 0 {
            panic!("fetch.timeout_secs must be greater than 0");
        }
    }

    pub fn load_with(base_path: &Path) -> Self {
        std::fs::create_dir_all(base_path).expect("failed to create data directory");
        let config_path = base_path.join("config.yaml");

        // create new if does not exist
        if !config_path.exists() {
            std::fs::write(
                &config_path,
                serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
            )
            .expect("failed to write default config");
        }

        let config_str = std::fs::read_to_string(&config_path).expect("failed to read config");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_path = base_path.to_path_buf();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap() {
            config.save();
        }

        config
    }

    pub fn save(&self) {
        let config_str = serde_yml::to_string(&self).unwrap();
        std::fs::write(self.base_path.join("config.yaml"), config_str.as_bytes())
            .expect("failed to write config");
    }

    /// Default configuration rooted at the given directory, without
    /// touching the filesystem.
    pub fn defaults_at(base_path: &Path) -> Self {
        let mut config = Self::default();
        config.base_path = base_path.to_path_buf();
        config
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.base_path.join("catalog.json")
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.base_path.join("vectors.bin")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.base_path.join("images")
    }
}

/// Resolve the data directory: explicit flag, then LOOKALIKE_BASE_PATH,
/// then ~/.local/share/lookalike.
pub fn resolve_base_path(override_path: Option<&Path>) -> PathBuf {
    if let Some(path) = override_path {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var("LOOKALIKE_BASE_PATH") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    my_home()
        .expect("couldnt find home dir")
        .expect("couldnt find home dir")
        .join(".local/share/lookalike")
}
