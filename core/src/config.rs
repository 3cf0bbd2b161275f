//! Environment-driven configuration
//!
//! Every knob has a `PROMPTLOOM_*` environment variable and a default that
//! matches the shipped worker behavior. Unparseable values fall back to the
//! default with a warning rather than aborting startup.

use std::path::PathBuf;

use tracing::warn;

/// Runtime configuration for the classification and templating core.
#[derive(Debug, Clone)]
pub struct Config {
    /// Embedding model identifier (recorded alongside cached vectors)
    pub embedding_model: String,
    /// OpenAI-style embeddings endpoint; empty means the local hash embedder
    pub embedding_endpoint: Option<String>,
    pub embedding_api_key: Option<String>,
    /// Fixed output dimension of the embedding model
    pub embedding_dim: usize,

    /// HDBSCAN minimum cluster size
    pub min_cluster_size: usize,
    /// HDBSCAN minimum samples (core distance k)
    pub min_samples: usize,
    /// HDBSCAN cluster selection epsilon
    pub epsilon: f64,

    /// Cosine threshold for incremental assignment
    pub similarity_threshold: f32,
    /// Labeled-prompt count below which a tick falls back to a full pass
    pub bootstrap_threshold: u64,
    /// Minimum pending prompts for an incremental tick to proceed
    pub batch_size: usize,
    /// Seconds between classification ticks
    pub tick_interval_secs: u64,

    /// Max Hamming distance treated as a near-duplicate
    pub hamming_threshold: u32,

    /// Chat-completions endpoint for template extraction / naming
    pub llm_endpoint: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: String,

    /// Log-export API base URL and key
    pub export_base_url: Option<String>,
    pub export_api_key: Option<String>,
    /// Seconds between export status polls
    pub export_poll_secs: u64,

    /// Database and state directory
    pub data_dir: PathBuf,
    /// Embedding cache directory
    pub cache_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".promptloom"))
            .unwrap_or_else(|| PathBuf::from("/tmp/.promptloom"));
        let cache_dir = data_dir.join("cache");

        Self {
            embedding_model: "hash-256".to_string(),
            embedding_endpoint: None,
            embedding_api_key: None,
            embedding_dim: 256,
            min_cluster_size: 2,
            min_samples: 1,
            epsilon: 0.15,
            similarity_threshold: 0.60,
            bootstrap_threshold: 500,
            batch_size: 500,
            tick_interval_secs: 600,
            hamming_threshold: 3,
            llm_endpoint: None,
            llm_api_key: None,
            llm_model: "gpt-4o-mini".to_string(),
            export_base_url: None,
            export_api_key: None,
            export_poll_secs: 5,
            data_dir,
            cache_dir,
        }
    }
}

impl Config {
    /// Build configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("PROMPTLOOM_EMBEDDING_MODEL") {
            cfg.embedding_model = v;
        }
        cfg.embedding_endpoint = non_empty_var("PROMPTLOOM_EMBEDDING_ENDPOINT");
        cfg.embedding_api_key = non_empty_var("PROMPTLOOM_EMBEDDING_API_KEY");
        cfg.embedding_dim = parse_var("PROMPTLOOM_EMBEDDING_DIM", cfg.embedding_dim);

        cfg.min_cluster_size = parse_var("PROMPTLOOM_MIN_CLUSTER_SIZE", cfg.min_cluster_size);
        cfg.min_samples = parse_var("PROMPTLOOM_MIN_SAMPLES", cfg.min_samples);
        cfg.epsilon = parse_var("PROMPTLOOM_EPSILON", cfg.epsilon);
        cfg.similarity_threshold =
            parse_var("PROMPTLOOM_SIMILARITY_THRESHOLD", cfg.similarity_threshold);
        cfg.bootstrap_threshold =
            parse_var("PROMPTLOOM_BOOTSTRAP_THRESHOLD", cfg.bootstrap_threshold);
        cfg.batch_size = parse_var("PROMPTLOOM_BATCH_SIZE", cfg.batch_size);
        cfg.tick_interval_secs = parse_var("PROMPTLOOM_TICK_INTERVAL", cfg.tick_interval_secs);
        cfg.hamming_threshold = parse_var("PROMPTLOOM_HAMMING_THRESHOLD", cfg.hamming_threshold);

        cfg.llm_endpoint = non_empty_var("PROMPTLOOM_LLM_ENDPOINT");
        cfg.llm_api_key = non_empty_var("PROMPTLOOM_LLM_API_KEY");
        if let Ok(v) = std::env::var("PROMPTLOOM_LLM_MODEL") {
            cfg.llm_model = v;
        }

        cfg.export_base_url = non_empty_var("PROMPTLOOM_EXPORT_BASE_URL");
        cfg.export_api_key = non_empty_var("PROMPTLOOM_EXPORT_API_KEY");
        cfg.export_poll_secs = parse_var("PROMPTLOOM_EXPORT_POLL_SECS", cfg.export_poll_secs);

        if let Some(dir) = non_empty_var("PROMPTLOOM_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
            cfg.cache_dir = cfg.data_dir.join("cache");
        }
        if let Some(dir) = non_empty_var("PROMPTLOOM_CACHE_DIR") {
            cfg.cache_dir = PathBuf::from(dir);
        }

        cfg
    }

    /// Path of the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("promptloom.db")
    }

    /// Path of the ingestion worker state file.
    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("ingestion_state.json")
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("Ignoring unparseable {}={:?}", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}
