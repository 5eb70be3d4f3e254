//! Runtime configuration.
//!
//! Settings are loaded once at startup from the YAML config file and
//! overlaid with `CTXC_*` environment variables, then passed explicitly to
//! components as an immutable value.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::defaults;
use crate::error::{Error, Result};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "CTXC_";

/// Runtime configuration for the whole engine.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path of the embedded database file.
    pub db_path: PathBuf,
    /// Optional sidecar directory for rebuildable vector index files.
    pub vectors_dir: Option<PathBuf>,
    /// HTTP bind host.
    pub host: String,
    /// HTTP bind port.
    pub port: u16,
    /// Worker pool size; defaults to the CPU count when zero.
    pub workers: usize,
    /// Embedding model name stamped into every embedding row.
    pub embedding_model: String,
    /// Embedding vector dimension.
    pub embedding_dim: usize,
    /// Whether queries rerank by default.
    pub rerank_enabled: bool,
    /// Cross-encoder model identifier.
    pub rerank_model: String,
    /// Default MMR trade-off.
    pub mmr_lambda: f32,
    /// Default include glob for watched sources.
    pub watch_include: String,
    /// Default exclude glob for watched sources.
    pub watch_exclude: String,
    /// Days soft-deleted documents are retained before GC.
    pub retention_days: i64,
}

impl Default for Settings {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            db_path: home.join(".context-cache").join("cc.db"),
            vectors_dir: None,
            host: defaults::SERVER_HOST.to_string(),
            port: defaults::SERVER_PORT,
            workers: 0,
            embedding_model: defaults::EMBED_MODEL.to_string(),
            embedding_dim: defaults::EMBED_DIMENSION,
            rerank_enabled: true,
            rerank_model: "lexical/overlap-v1".to_string(),
            mmr_lambda: defaults::MMR_LAMBDA,
            watch_include: defaults::WATCH_INCLUDE.to_string(),
            watch_exclude: defaults::WATCH_EXCLUDE.to_string(),
            retention_days: defaults::SOFT_DELETE_RETENTION_DAYS,
        }
    }
}

/// On-disk YAML layout (`~/.config/context-cache/config.yaml`).
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    storage: StorageSection,
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    embeddings: EmbeddingsSection,
    #[serde(default)]
    retrieval: RetrievalSection,
    #[serde(default)]
    watch: WatchSection,
}

#[derive(Debug, Default, Deserialize)]
struct StorageSection {
    db_path: Option<PathBuf>,
    vectors_dir: Option<PathBuf>,
    retention_days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    host: Option<String>,
    port: Option<u16>,
    workers: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingsSection {
    model: Option<String>,
    dim: Option<usize>,
    rerank_model: Option<String>,
    rerank_enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalSection {
    mmr_lambda: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct WatchSection {
    include_glob: Option<String>,
    exclude_glob: Option<String>,
}

impl Settings {
    /// Load settings from the default config location with env overrides.
    ///
    /// Resolution order: built-in defaults, then the YAML file (if present),
    /// then `CTXC_*` environment variables.
    pub fn load() -> Result<Self> {
        let path = std::env::var(format!("{ENV_PREFIX}CONFIG"))
            .map(PathBuf::from)
            .ok()
            .or_else(default_config_path);
        match path {
            Some(p) if p.exists() => Self::from_yaml(&p),
            _ => Ok(Self::default().with_env_overrides()),
        }
    }

    /// Load settings from a specific YAML file, then apply env overrides.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let file: FileConfig = serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid config {}: {}", path.display(), e)))?;

        let mut settings = Settings::default();
        if let Some(v) = file.storage.db_path {
            settings.db_path = v;
        }
        if let Some(v) = file.storage.vectors_dir {
            settings.vectors_dir = Some(v);
        }
        if let Some(v) = file.storage.retention_days {
            settings.retention_days = v;
        }
        if let Some(v) = file.server.host {
            settings.host = v;
        }
        if let Some(v) = file.server.port {
            settings.port = v;
        }
        if let Some(v) = file.server.workers {
            settings.workers = v;
        }
        if let Some(v) = file.embeddings.model {
            settings.embedding_model = v;
        }
        if let Some(v) = file.embeddings.dim {
            settings.embedding_dim = v;
        }
        if let Some(v) = file.embeddings.rerank_model {
            settings.rerank_model = v;
        }
        if let Some(v) = file.embeddings.rerank_enabled {
            settings.rerank_enabled = v;
        }
        if let Some(v) = file.retrieval.mmr_lambda {
            settings.mmr_lambda = v;
        }
        if let Some(v) = file.watch.include_glob {
            settings.watch_include = v;
        }
        if let Some(v) = file.watch.exclude_glob {
            settings.watch_exclude = v;
        }

        settings.with_env_overrides().validated()
    }

    /// Apply `CTXC_DB_PATH`, `CTXC_HOST`, and `CTXC_WORKERS` overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}DB_PATH")) {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}HOST")) {
            // Accept "host" or "host:port".
            match v.rsplit_once(':') {
                Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => {
                    self.host = host.to_string();
                    if let Ok(p) = port.parse() {
                        self.port = p;
                    }
                }
                _ => self.host = v,
            }
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}WORKERS")) {
            if let Ok(n) = v.parse() {
                self.workers = n;
            }
        }
        self
    }

    fn validated(self) -> Result<Self> {
        if !(0.0..=1.0).contains(&self.mmr_lambda) {
            return Err(Error::Config(format!(
                "mmr_lambda must be in 0..1, got {}",
                self.mmr_lambda
            )));
        }
        if self.embedding_dim == 0 {
            return Err(Error::Config("embedding dim must be non-zero".into()));
        }
        Ok(self)
    }

    /// Worker pool size with the CPU-count default applied.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("context-cache").join("config.yaml"))
}
